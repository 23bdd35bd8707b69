// Backend response models
//
// All JSON endpoints share a `{status, message?}` envelope. `status != "success"` is a
// backend rejection whose message is shown verbatim.

use serde::Deserialize;

use super::connection::Connection;
use super::de_opt_string_id;

pub const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some(STATUS_SUCCESS)
    }

    pub fn message_text(&self) -> Option<String> {
        match &self.message {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectResponse {
    pub status: String,
    #[serde(default, deserialize_with = "de_opt_string_id")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsResponse {
    pub status: String,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `GET /doctypes/{id}` answers `{message: [..]}` on success and `{status, message: ".."}` on error.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DoctypesResponse {
    List { message: Vec<String> },
    Error {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(default, deserialize_with = "de_opt_string_id")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// What the wizard keeps after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub job_id: String,
    pub columns: Vec<String>,
    pub total_rows: Option<u64>,
    pub batch_size: Option<u32>,
}
