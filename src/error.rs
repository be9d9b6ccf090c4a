use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed {table} row for service {service_id}: {reason}")]
    MalformedRow {
        table: &'static str,
        service_id: String,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("arrival time {0:?} has no parsable hour")]
    Hour(String),
    #[error("arrival time {0:?} is not a valid HH:MM:SS time")]
    Time(String),
    #[error("arrival time {time} does not exist on {date} in the local timezone")]
    NonexistentLocalTime { date: chrono::NaiveDate, time: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteCallError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api reported error code {0:?}")]
    Api(String),
    #[error("no response within {0:?}")]
    DeadlineExceeded(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("could not write result: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("result receiver was dropped")]
    Closed,
}
