// reqwest implementation of the backend contract

use super::{actions, BackendApi};
use crate::error::{ImporterError, Result};
use crate::models::connection::Connection;
use crate::models::job::JobStatusSnapshot;
use crate::models::requests::{ConnectRequest, ImportRequest, TemplateRequest, UploadRequest};
use crate::models::responses::{
    ConnectResponse, ConnectionsResponse, DoctypesResponse, Envelope, UploadReceipt,
    UploadResponse, STATUS_SUCCESS,
};
use crate::utils::logging::mask_url_credentials;
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Budget for `POST /import`, which only answers after the last batch.
pub const DEFAULT_IMPORT_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    import_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url.trim())
            .with_context(|| format!("Invalid backend URL: {}", mask_url_credentials(base_url)))?;
        if base.cannot_be_a_base() {
            anyhow::bail!(
                "Backend URL cannot carry a path: {}",
                mask_url_credentials(base_url)
            );
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        info!(
            "[PHASE: backend] [STEP: init] backend {} (timeout {:?})",
            mask_url_credentials(base.as_str()),
            timeout
        );
        Ok(Self {
            client,
            base,
            import_timeout: DEFAULT_IMPORT_TIMEOUT,
        })
    }

    /// Override the per-request timeout of `start_import`. The client-wide timeout
    /// still applies to every other call.
    pub fn with_import_timeout(mut self, timeout: Duration) -> Self {
        self.import_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Base URL with percent-encoded path segments appended.
    pub fn endpoint(&self, action: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ImporterError::transport(action, "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Map a non-2xx body: a readable `{status, message}` envelope is a backend rejection,
/// anything else is transport.
fn error_from_body(action: &str, status: StatusCode, body: &[u8]) -> ImporterError {
    match serde_json::from_slice::<Envelope>(body)
        .ok()
        .and_then(|env| env.message_text())
    {
        Some(message) => ImporterError::BackendRejection(message),
        None => ImporterError::transport(action, format!("HTTP {}", status)),
    }
}

fn rejection(action: &str, status: &str, message: Option<String>) -> ImporterError {
    debug!(
        "[PHASE: backend] [STEP: {}] backend answered status '{}'",
        action, status
    );
    ImporterError::BackendRejection(message.unwrap_or_else(|| format!("Failed to {}", action)))
}

async fn read_body(action: &str, resp: reqwest::Response) -> Result<Vec<u8>> {
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| ImporterError::transport(action, e))?;
    if !status.is_success() {
        return Err(error_from_body(action, status, &body));
    }
    Ok(body.to_vec())
}

async fn read_json<T: DeserializeOwned>(action: &str, resp: reqwest::Response) -> Result<T> {
    let body = read_body(action, resp).await?;
    serde_json::from_slice(&body)
        .map_err(|e| ImporterError::transport(action, format!("invalid response body: {}", e)))
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn connect(&self, req: &ConnectRequest) -> Result<String> {
        let action = actions::CONNECT;
        let url = self.endpoint(action, &["connect"])?;
        let resp = self
            .client
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        let parsed: ConnectResponse = read_json(action, resp).await?;
        if parsed.status != STATUS_SUCCESS {
            return Err(rejection(action, &parsed.status, parsed.message));
        }
        parsed
            .connection_id
            .ok_or_else(|| ImporterError::transport(action, "response carried no connection_id"))
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let action = actions::LIST_CONNECTIONS;
        let url = self.endpoint(action, &["connections"])?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        let parsed: ConnectionsResponse = read_json(action, resp).await?;
        if parsed.status != STATUS_SUCCESS {
            return Err(rejection(action, &parsed.status, parsed.message));
        }
        Ok(parsed.connections)
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<()> {
        let action = actions::DELETE_CONNECTION;
        let url = self.endpoint(action, &["connections", connection_id])?;
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        let env: Envelope = read_json(action, resp).await?;
        if !env.is_success() {
            let status = env.status.clone().unwrap_or_default();
            return Err(rejection(action, &status, env.message_text()));
        }
        Ok(())
    }

    async fn list_doctypes(&self, connection_id: &str) -> Result<Vec<String>> {
        let action = actions::LIST_DOCTYPES;
        let url = self.endpoint(action, &["doctypes", connection_id])?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        match read_json::<DoctypesResponse>(action, resp).await? {
            DoctypesResponse::List { message } => Ok(message),
            DoctypesResponse::Error { status, message } => Err(rejection(
                action,
                status.as_deref().unwrap_or_default(),
                message,
            )),
        }
    }

    async fn fetch_schema(
        &self,
        connection_id: &str,
        doctype: &str,
    ) -> Result<serde_json::Value> {
        let action = actions::FETCH_SCHEMA;
        let url = self.endpoint(action, &["schema", connection_id])?;
        let resp = self
            .client
            .get(url)
            .query(&[("doctype", doctype)])
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        let value: serde_json::Value = read_json(action, resp).await?;
        if value.get("docs").is_none() {
            if let Ok(env) = serde_json::from_value::<Envelope>(value.clone()) {
                if env.status.is_some() && !env.is_success() {
                    let status = env.status.clone().unwrap_or_default();
                    return Err(rejection(action, &status, env.message_text()));
                }
            }
        }
        Ok(value)
    }

    async fn upload(&self, req: &UploadRequest) -> Result<UploadReceipt> {
        let action = actions::UPLOAD;
        let bytes = tokio::fs::read(&req.file_path).await.map_err(|e| {
            ImporterError::validation(format!(
                "Cannot read file {}: {}",
                req.file_path.display(),
                e
            ))
        })?;
        let file_name = req
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("connection_id", req.connection_id.clone())
            .text("batch_size", req.batch_size.to_string())
            .text("doctype", req.doctype.clone());

        let url = self.endpoint(action, &["upload"])?;
        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        let parsed: UploadResponse = read_json(action, resp).await?;
        if parsed.status != STATUS_SUCCESS {
            return Err(rejection(action, &parsed.status, parsed.message));
        }
        let job_id = parsed
            .job_id
            .ok_or_else(|| ImporterError::transport(action, "response carried no job_id"))?;
        Ok(UploadReceipt {
            job_id,
            columns: parsed.columns,
            total_rows: parsed.total_rows,
            batch_size: parsed.batch_size,
        })
    }

    async fn generate_template(
        &self,
        connection_id: &str,
        req: &TemplateRequest,
    ) -> Result<Vec<u8>> {
        let action = actions::TEMPLATE;
        let url = self.endpoint(action, &["template", connection_id])?;
        let resp = self
            .client
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        read_body(action, resp).await
    }

    async fn start_import(&self, job_id: &str, req: &ImportRequest) -> Result<()> {
        let action = actions::START_IMPORT;
        let url = self.endpoint(action, &["import", job_id])?;
        debug!(
            "[PHASE: backend] [STEP: import] POST /import/{} (timeout {:?})",
            job_id, self.import_timeout
        );
        let resp = self
            .client
            .post(url)
            .timeout(self.import_timeout)
            .json(req)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        let env: Envelope = read_json(action, resp).await?;
        if !env.is_success() {
            let status = env.status.clone().unwrap_or_default();
            return Err(rejection(action, &status, env.message_text()));
        }
        Ok(())
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusSnapshot> {
        let action = actions::JOB_STATUS;
        let url = self.endpoint(action, &["status", job_id])?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImporterError::transport(action, e))?;
        read_json(action, resp).await
    }
}
