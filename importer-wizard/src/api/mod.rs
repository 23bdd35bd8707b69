//! Backend REST contract.
//!
//! Everything above this module talks to [`BackendApi`]; [`http::HttpBackend`] is the
//! reqwest implementation and tests substitute in-crate fakes.

pub mod http;

pub use http::HttpBackend;

use crate::error::Result;
use crate::models::connection::Connection;
use crate::models::job::JobStatusSnapshot;
use crate::models::requests::{ConnectRequest, ImportRequest, TemplateRequest, UploadRequest};
use crate::models::responses::UploadReceipt;
use async_trait::async_trait;

/// Action phrases used in `Transport` errors ("Failed to {action}").
pub mod actions {
    pub const CONNECT: &str = "connect to Frappe";
    pub const LIST_CONNECTIONS: &str = "load saved connections";
    pub const DELETE_CONNECTION: &str = "delete connection";
    pub const LIST_DOCTYPES: &str = "load doctypes";
    pub const FETCH_SCHEMA: &str = "load schema";
    pub const UPLOAD: &str = "upload file";
    pub const TEMPLATE: &str = "download template";
    pub const START_IMPORT: &str = "start import";
    pub const JOB_STATUS: &str = "fetch job status";
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Returns the backend-assigned connection id.
    async fn connect(&self, req: &ConnectRequest) -> Result<String>;

    async fn list_connections(&self) -> Result<Vec<Connection>>;

    async fn delete_connection(&self, connection_id: &str) -> Result<()>;

    async fn list_doctypes(&self, connection_id: &str) -> Result<Vec<String>>;

    /// Raw `{"docs": [...]}` payload; normalization happens in `schema`.
    async fn fetch_schema(&self, connection_id: &str, doctype: &str)
        -> Result<serde_json::Value>;

    async fn upload(&self, req: &UploadRequest) -> Result<UploadReceipt>;

    /// Binary spreadsheet bytes.
    async fn generate_template(&self, connection_id: &str, req: &TemplateRequest)
        -> Result<Vec<u8>>;

    async fn start_import(&self, job_id: &str, req: &ImportRequest) -> Result<()>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatusSnapshot>;
}
