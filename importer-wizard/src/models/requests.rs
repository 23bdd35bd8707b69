// Backend request bodies (snake_case on the wire)

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectRequest {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateRequest {
    pub doctype: String,
    /// Wire form of the selected field keys, in display order.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRequest {
    /// Uploaded column -> backend field (wire form).
    pub mapping: BTreeMap<String, String>,
}

/// Multipart upload. Not serialized directly; the client builds the form from it.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_path: PathBuf,
    pub connection_id: String,
    pub batch_size: u32,
    pub doctype: String,
}
