use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use sb_core::traits::ToolRegistry;
use sb_core::types::{FunctionCall, LoopState, Profile};

/// Result of one tool invocation, already shaped as a function response.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub name: String,
    pub response: Value,
    pub products: Vec<Value>,
}

/// Executes tool calls with explicit request context.
///
/// The user id travels as a field, never through ambient task-local state:
/// registry implementations may offload to worker threads where implicit
/// context silently vanishes. The profile is pre-fetched so the common
/// parallel pair (`get_profile` + `search_products`) collapses to a single
/// upstream call.
pub struct ToolExecutor {
    registry: Arc<dyn ToolRegistry>,
    user_id: String,
    profile: Profile,
    max_unique_queries: usize,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        user_id: impl Into<String>,
        profile: Profile,
        max_unique_queries: usize,
    ) -> Self {
        Self {
            registry,
            user_id: user_id.into(),
            profile,
            max_unique_queries,
        }
    }

    /// Executes one call, updating the loop's dedup set and product
    /// accumulator. Tool failures come back as structured responses; the
    /// loop is never aborted by a tool.
    pub async fn execute(&self, call: &FunctionCall, state: &mut LoopState) -> ToolOutcome {
        if call.name == "get_profile" {
            info!(user_id = %self.user_id, "answering get_profile from pre-fetched profile");
            return ToolOutcome {
                name: call.name.clone(),
                response: serde_json::to_value(&self.profile).unwrap_or(Value::Null),
                products: Vec::new(),
            };
        }

        let query_key = query_key(&call.name, &call.args);

        if state.executed_queries.contains(&query_key) {
            warn!(key = %query_key, "duplicate tool call, answering with stop directive");
            return self.search_complete_outcome(&call.name, state);
        }

        if state.executed_queries.len() >= self.max_unique_queries {
            warn!(
                limit = self.max_unique_queries,
                "unique query limit reached, answering with stop directive"
            );
            return self.search_complete_outcome(&call.name, state);
        }

        // Marked before the call so a re-entrant duplicate cannot race past
        // the check.
        state.executed_queries.insert(query_key);

        let response = match self
            .registry
            .call(&call.name, &call.args, &self.user_id)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(tool = %call.name, %error, "tool failed, returning structured error");
                return ToolOutcome {
                    name: call.name.clone(),
                    response: json!({ "status": "error", "message": error.to_string() }),
                    products: Vec::new(),
                };
            }
        };

        let products: Vec<Value> = response
            .get("products")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if !products.is_empty() {
            let added = state.add_products(&products);
            info!(tool = %call.name, added, total = state.all_products.len(), "products accumulated");
        }

        ToolOutcome {
            name: call.name.clone(),
            response,
            products,
        }
    }

    /// Forceful stop directive. A passive note is ignored by the upstream;
    /// a status code plus imperative instruction reliably ends the calls.
    fn search_complete_outcome(&self, name: &str, state: &LoopState) -> ToolOutcome {
        ToolOutcome {
            name: name.to_string(),
            response: json!({
                "status": "SEARCH_COMPLETE",
                "count": state.all_products.len(),
                "instruction": format!(
                    "ძიება დასრულებულია. ნაპოვნია {} პროდუქტი. აღარ გამოიძახო ეს ფუნქცია! \
                     დაწერე პასუხი ახლავე ნაპოვნი შედეგების საფუძველზე.",
                    state.all_products.len()
                ),
            }),
            products: Vec::new(),
        }
    }
}

/// Dedup key for a call: tool name plus its argument values, e.g.
/// `search(x)` for `search(q: "x")`.
fn query_key(name: &str, args: &Value) -> String {
    let rendered = match args {
        Value::Object(map) => {
            let values: Vec<String> = map
                .values()
                .map(|v| match v {
                    Value::String(s) => s.trim().to_lowercase(),
                    other => other.to_string(),
                })
                .collect();
            values.join(",")
        }
        Value::Null => String::new(),
        other => other.to_string(),
    };
    format!("{}({})", name, rendered)
}
