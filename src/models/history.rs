use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_HISTORY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMethod {
    Browser,
    Aria2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tweet_id: Option<String>,
    pub url: String,
    pub filename: String,
    pub method: DownloadMethod,
    pub source: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reference_id: Option<String>,
}

impl HistoryEntry {
    pub fn new(
        tweet_id: Option<String>,
        url: impl Into<String>,
        filename: impl Into<String>,
        method: DownloadMethod,
        source: impl Into<String>,
        reference_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tweet_id,
            url: url.into(),
            filename: filename.into(),
            method,
            source: source.into(),
            created_at: Utc::now(),
            reference_id,
        }
    }
}
