use chrono::Utc;

/// Epoch milliseconds, the unit of every timestamp on edges and reports.
pub fn time_millis() -> i64 {
    Utc::now().timestamp_millis()
}
