use serde::{Deserialize, Serialize};

/// Metadata of one recorded browsing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub record_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_record_id: Option<String>,
    pub page_url: String,
    pub user_agent: String,
    pub app_version: String,
    pub created_at_ms: i64,
}

/// Client request to open a new record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub previous_record_id: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
}
