use chrono::Utc;

/// Current UTC time in milliseconds.
pub fn time_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Run identifiers: url-safe, 21 characters.
pub fn longid() -> String {
    nanoid::nanoid!()
}

/// NodeRun record identifiers.
pub fn record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
