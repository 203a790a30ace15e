pub mod config;
pub mod errors;
pub mod routes;
pub mod telemetry;
pub mod tools;

pub use config::Config;
pub use errors::{ApiError, ApiResult};
pub use routes::{create_router, AppState};
