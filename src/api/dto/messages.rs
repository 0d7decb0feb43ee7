use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct MessageReadResponse {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
}
