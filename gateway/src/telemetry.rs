use metrics::{counter, gauge, histogram};
use std::time::Instant;

pub struct Telemetry;

impl Telemetry {
    pub fn record_request() {
        counter!("chat_requests_total").increment(1);
    }

    pub fn record_fallback(reason: &str) {
        counter!("chat_fallbacks_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_error(code: &str) {
        counter!("chat_errors_total", "code" => code.to_string()).increment(1);
    }

    pub fn record_latency(duration_ms: f64) {
        histogram!("chat_request_duration_ms").record(duration_ms);
    }

    pub fn set_active_streams(count: usize) {
        gauge!("chat_active_streams").set(count as f64);
    }
}

pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed().as_millis() as f64;
        Telemetry::record_latency(duration);
    }
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self::new()
    }
}
