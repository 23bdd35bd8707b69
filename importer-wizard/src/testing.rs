// In-crate backend stub for unit tests

use crate::api::BackendApi;
use crate::error::{ImporterError, Result};
use crate::models::connection::Connection;
use crate::models::job::JobStatusSnapshot;
use crate::models::requests::{ConnectRequest, ImportRequest, TemplateRequest, UploadRequest};
use crate::models::responses::UploadReceipt;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Scripted backend. Every call bumps a counter; status polls pop from a queue.
pub struct FakeBackend {
    pub connect_result: Mutex<Result<String>>,
    pub connections: Mutex<Vec<Connection>>,
    pub doctypes: Mutex<Vec<String>>,
    pub schema: Mutex<Value>,
    pub upload_result: Mutex<Result<UploadReceipt>>,
    pub template_bytes: Mutex<Vec<u8>>,
    pub import_result: Mutex<Result<()>>,
    pub statuses: Mutex<VecDeque<Result<JobStatusSnapshot>>>,

    pub last_connect: Mutex<Option<ConnectRequest>>,
    pub last_upload: Mutex<Option<UploadRequest>>,
    pub last_template: Mutex<Option<TemplateRequest>>,
    pub last_import: Mutex<Option<ImportRequest>>,

    pub connect_calls: AtomicU32,
    pub delete_calls: AtomicU32,
    pub schema_calls: AtomicU32,
    pub upload_calls: AtomicU32,
    pub template_calls: AtomicU32,
    pub import_calls: AtomicU32,
    pub status_calls: AtomicU32,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            connect_result: Mutex::new(Ok("c1".to_string())),
            connections: Mutex::new(Vec::new()),
            doctypes: Mutex::new(vec!["Customer".to_string(), "Item".to_string()]),
            schema: Mutex::new(crate::schema::fixtures::customer_schema()),
            upload_result: Mutex::new(Ok(UploadReceipt {
                job_id: "j1".to_string(),
                columns: vec![
                    "customer_name [Data]".to_string(),
                    "territory [Link] [Territory]".to_string(),
                    "Notes".to_string(),
                ],
                total_rows: Some(100),
                batch_size: Some(100),
            })),
            template_bytes: Mutex::new(b"PK\x03\x04fake-xlsx".to_vec()),
            import_result: Mutex::new(Ok(())),
            statuses: Mutex::new(VecDeque::new()),
            last_connect: Mutex::new(None),
            last_upload: Mutex::new(None),
            last_template: Mutex::new(None),
            last_import: Mutex::new(None),
            connect_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
            schema_calls: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
            template_calls: AtomicU32::new(0),
            import_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(statuses: Vec<Result<JobStatusSnapshot>>) -> Self {
        let fake = Self::default();
        *fake.statuses.lock().unwrap() = statuses.into();
        fake
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn connect(&self, req: &ConnectRequest) -> Result<String> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_connect.lock().unwrap() = Some(req.clone());
        self.connect_result.lock().unwrap().clone()
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        Ok(self.connections.lock().unwrap().clone())
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut conns = self.connections.lock().unwrap();
        let before = conns.len();
        conns.retain(|c| c.id != connection_id);
        if conns.len() == before {
            return Err(ImporterError::BackendRejection(
                "Connection not found".to_string(),
            ));
        }
        Ok(())
    }

    async fn list_doctypes(&self, _connection_id: &str) -> Result<Vec<String>> {
        Ok(self.doctypes.lock().unwrap().clone())
    }

    async fn fetch_schema(&self, _connection_id: &str, _doctype: &str) -> Result<Value> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.schema.lock().unwrap().clone())
    }

    async fn upload(&self, req: &UploadRequest) -> Result<UploadReceipt> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_upload.lock().unwrap() = Some(req.clone());
        self.upload_result.lock().unwrap().clone()
    }

    async fn generate_template(
        &self,
        _connection_id: &str,
        req: &TemplateRequest,
    ) -> Result<Vec<u8>> {
        self.template_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_template.lock().unwrap() = Some(req.clone());
        Ok(self.template_bytes.lock().unwrap().clone())
    }

    async fn start_import(&self, _job_id: &str, req: &ImportRequest) -> Result<()> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_import.lock().unwrap() = Some(req.clone());
        self.import_result.lock().unwrap().clone()
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatusSnapshot> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ImporterError::transport("fetch job status", "script exhausted")))
    }
}
