// Step-local operations
//
// Each returns `Result<T, ImporterError>`; the caller turns errors into
// `WizardEvent::ErrorReported` and success into the matching completion event.

use crate::api::BackendApi;
use crate::error::{ImporterError, Result};
use crate::models::connection::Connection;
use crate::models::requests::{ConnectRequest, ImportRequest, TemplateRequest, UploadRequest};
use crate::models::responses::UploadReceipt;
use crate::schema::{self, FieldCatalog, FieldKey};
use crate::selection::{FieldSelectionEngine, Recommendations};
use crate::template::{column_field_key, parse_column_header, template_file_name};
use crate::utils::logging::{correlation_id, mask_url_credentials};
use crate::utils::validation::{
    has_supported_extension, require, validate_batch_size, validate_site_url,
};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BATCH_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectForm {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl ConnectForm {
    pub fn validate(&self) -> Result<()> {
        validate_site_url(&self.url)?;
        require(&self.username, "Username")?;
        require(&self.password, "Password")?;
        Ok(())
    }

    /// Prefill from a saved connection. The password is never stored, so it is cleared.
    pub fn prefill(connection: &Connection) -> Self {
        Self {
            url: connection.url.clone(),
            username: connection.username.clone(),
            password: String::new(),
        }
    }
}

pub async fn connect(api: &dyn BackendApi, form: &ConnectForm) -> Result<Connection> {
    form.validate()?;
    let cid = correlation_id();
    let url = form.url.trim().to_string();
    info!(
        "[PHASE: connect] [STEP: submit] connecting {}@{} (correlation_id={})",
        form.username.trim(),
        mask_url_credentials(&url),
        cid
    );

    let req = ConnectRequest {
        url: url.clone(),
        username: form.username.trim().to_string(),
        password: form.password.clone(),
    };
    let id = api.connect(&req).await.map_err(|e| {
        warn!(
            "[PHASE: connect] [STEP: submit] failed: {} (correlation_id={})",
            e.log_details(),
            cid
        );
        e
    })?;

    info!(
        "[PHASE: connect] [STEP: submit] connected as {} (correlation_id={})",
        id, cid
    );
    Ok(Connection::new(id, url, req.username).created_now())
}

pub async fn saved_connections(api: &dyn BackendApi) -> Result<Vec<Connection>> {
    api.list_connections().await
}

pub async fn forget_connection(api: &dyn BackendApi, connection_id: &str) -> Result<()> {
    info!(
        "[PHASE: connect] [STEP: forget] deleting saved connection {}",
        connection_id
    );
    api.delete_connection(connection_id).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadForm {
    pub doctype: Option<String>,
    pub file: Option<PathBuf>,
    pub batch_size: u32,
}

impl Default for UploadForm {
    fn default() -> Self {
        Self {
            doctype: None,
            file: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl UploadForm {
    pub fn validate(&self) -> Result<()> {
        let file = self
            .file
            .as_ref()
            .filter(|f| !f.as_os_str().is_empty())
            .ok_or_else(|| ImporterError::validation("Please select a file"))?;
        let doctype = self.doctype.as_deref().map(str::trim).unwrap_or_default();
        if doctype.is_empty() {
            return Err(ImporterError::validation("Please select a doctype"));
        }
        if !file.is_file() {
            return Err(ImporterError::validation(format!(
                "File not found: {}",
                file.display()
            )));
        }
        if !has_supported_extension(file) {
            return Err(ImporterError::validation(
                "Unsupported file format. Use .csv, .xlsx or .xls",
            ));
        }
        validate_batch_size(self.batch_size)
    }

    pub fn to_request(&self, connection: &Connection) -> Result<UploadRequest> {
        self.validate()?;
        Ok(UploadRequest {
            file_path: self.file.clone().unwrap_or_default(),
            connection_id: connection.id.clone(),
            batch_size: self.batch_size,
            doctype: self
                .doctype
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

pub async fn list_doctypes(api: &dyn BackendApi, connection: &Connection) -> Result<Vec<String>> {
    let mut doctypes = api.list_doctypes(&connection.id).await?;
    doctypes.sort_by_key(|d| d.to_ascii_lowercase());
    doctypes.dedup();
    Ok(doctypes)
}

/// Fetch and install the schema for `doctype` into the selection engine.
pub async fn load_schema(
    api: &dyn BackendApi,
    connection: &Connection,
    doctype: &str,
    engine: &mut FieldSelectionEngine,
    recommendations: &Recommendations,
) -> Result<()> {
    let raw = api.fetch_schema(&connection.id, doctype).await?;
    install_schema(engine, doctype, &raw, recommendations)
}

/// Normalize a raw schema payload and hand it to the engine.
pub fn install_schema(
    engine: &mut FieldSelectionEngine,
    doctype: &str,
    raw: &serde_json::Value,
    recommendations: &Recommendations,
) -> Result<()> {
    let doc = schema::normalize(raw)?;
    engine.load_schema(doctype, &doc, recommendations);
    Ok(())
}

pub async fn upload(
    api: &dyn BackendApi,
    connection: &Connection,
    form: &UploadForm,
) -> Result<UploadReceipt> {
    let req = form.to_request(connection)?;
    let cid = correlation_id();
    info!(
        "[PHASE: upload] [STEP: submit] uploading {:?} as {} (batch {}) (correlation_id={})",
        req.file_path, req.doctype, req.batch_size, cid
    );
    let receipt = api.upload(&req).await?;
    info!(
        "[PHASE: upload] [STEP: submit] job {} created, {} columns, {:?} rows (correlation_id={})",
        receipt.job_id,
        receipt.columns.len(),
        receipt.total_rows,
        cid
    );
    Ok(receipt)
}

/// Request a template for `fields` and write it as `<doctype>_template.xlsx` under `dir`.
pub async fn download_template(
    api: &dyn BackendApi,
    connection: &Connection,
    doctype: &str,
    fields: &[FieldKey],
    dir: &Path,
) -> Result<PathBuf> {
    require(doctype, "Doctype")?;
    if fields.is_empty() {
        return Err(ImporterError::validation(
            "Please select at least one field",
        ));
    }

    let req = TemplateRequest {
        doctype: doctype.trim().to_string(),
        fields: fields.iter().map(FieldKey::to_wire).collect(),
    };
    let bytes = api.generate_template(&connection.id, &req).await?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ImporterError::Storage(format!("create {:?}: {}", dir, e)))?;
    let path = dir.join(template_file_name(doctype));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| ImporterError::Storage(format!("write {:?}: {}", path, e)))?;

    info!(
        "[PHASE: template] [STEP: download] wrote {} fields to {:?}",
        req.fields.len(),
        path
    );
    Ok(path)
}

/// Uploaded column -> target field assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingDraft {
    columns: Vec<String>,
    mapping: BTreeMap<String, FieldKey>,
}

impl MappingDraft {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            mapping: BTreeMap::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&FieldKey> {
        self.mapping.get(column)
    }

    pub fn mapped_count(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Map each column whose header names a catalog field. Returns how many were mapped.
    /// Existing assignments are replaced.
    pub fn auto_map(&mut self, catalog: &FieldCatalog) -> usize {
        self.mapping.clear();
        for column in &self.columns {
            let key = parse_column_header(column)
                .and_then(|h| column_field_key(&h.name))
                .filter(|k| catalog.contains(k));
            if let Some(key) = key {
                self.mapping.insert(column.clone(), key);
            }
        }
        self.mapping.len()
    }

    pub fn assign(&mut self, column: &str, key: FieldKey) -> Result<()> {
        if !self.columns.iter().any(|c| c == column) {
            return Err(ImporterError::validation(format!(
                "Unknown column: {}",
                column
            )));
        }
        self.mapping.insert(column.to_string(), key);
        Ok(())
    }

    pub fn unassign(&mut self, column: &str) -> Option<FieldKey> {
        self.mapping.remove(column)
    }

    /// Step the column's assignment through `catalog` (unassigned sits before the first entry).
    pub fn cycle(&mut self, column: &str, catalog: &FieldCatalog, forward: bool) {
        if catalog.is_empty() || !self.columns.iter().any(|c| c == column) {
            return;
        }
        let len = catalog.len();
        let current = self.mapping.get(column).and_then(|k| catalog.position(k));
        let next = match (current, forward) {
            (None, true) => Some(0),
            (None, false) => Some(len - 1),
            (Some(i), true) if i + 1 < len => Some(i + 1),
            (Some(i), false) if i > 0 => Some(i - 1),
            _ => None,
        };
        match next.and_then(|i| catalog.entries().get(i)) {
            Some(entry) => {
                self.mapping.insert(column.to_string(), entry.key.clone());
            }
            None => {
                self.mapping.remove(column);
            }
        }
    }

    pub fn to_wire(&self) -> BTreeMap<String, String> {
        self.mapping
            .iter()
            .map(|(col, key)| (col.clone(), key.to_wire()))
            .collect()
    }
}

pub async fn start_import(api: &dyn BackendApi, job_id: &str, draft: &MappingDraft) -> Result<()> {
    if draft.is_empty() {
        return Err(ImporterError::validation(
            "Map at least one column before starting the import",
        ));
    }
    info!(
        "[PHASE: import] [STEP: start] job {} with {} mapped columns",
        job_id,
        draft.mapped_count()
    );
    api.start_import(
        job_id,
        &ImportRequest {
            mapping: draft.to_wire(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BackendStatusSource, JobStatusWatcher, WatchState};
    use crate::models::job::{JobStatus, JobStatusSnapshot};
    use crate::testing::FakeBackend;
    use crate::wizard::{StepLayout, WizardController, WizardEvent, Step};
    use crate::session::MemorySessionStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn c1() -> Connection {
        Connection::new("c1", "https://x", "u")
    }

    fn csv_file(dir: &Path) -> PathBuf {
        let path = dir.join("items.csv");
        std::fs::write(&path, "item_code,item_name\nA,Alpha\n").unwrap();
        path
    }

    #[test]
    fn connect_form_requires_all_fields() {
        let mut form = ConnectForm {
            url: "https://erp.example.com".to_string(),
            username: "admin".to_string(),
            password: String::new(),
        };
        assert_eq!(form.validate().unwrap_err().to_string(), "Password is required");
        form.password = "secret".to_string();
        assert!(form.validate().is_ok());
        form.url = "erp.example.com".to_string();
        assert!(form.validate().is_err());
    }

    #[tokio::test]
    async fn invalid_connect_form_never_reaches_backend() {
        let fake = FakeBackend::new();
        let err = connect(&fake, &ConnectForm::default()).await.unwrap_err();
        assert!(matches!(err, ImporterError::Validation(_)));
        assert_eq!(FakeBackend::calls(&fake.connect_calls), 0);
    }

    #[tokio::test]
    async fn connect_stamps_creation_time() {
        let fake = FakeBackend::new();
        let form = ConnectForm {
            url: " https://erp.example.com ".to_string(),
            username: "admin".to_string(),
            password: "pw".to_string(),
        };
        let conn = connect(&fake, &form).await.unwrap();
        assert_eq!(conn.id, "c1");
        assert_eq!(conn.url, "https://erp.example.com");
        assert!(conn.created_at.is_some());
        let sent = fake.last_connect.lock().unwrap().clone().unwrap();
        assert_eq!(sent.password, "pw");
    }

    #[tokio::test]
    async fn forget_connection_removes_saved_entry() {
        let fake = FakeBackend::new();
        *fake.connections.lock().unwrap() = vec![c1(), Connection::new("c2", "https://y", "v")];

        forget_connection(&fake, "c1").await.unwrap();
        let left = saved_connections(&fake).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "c2");
        assert!(forget_connection(&fake, "missing").await.is_err());
    }

    #[test]
    fn upload_form_validation_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut form = UploadForm::default();
        assert_eq!(form.validate().unwrap_err().to_string(), "Please select a file");

        form.file = Some(csv_file(dir.path()));
        assert_eq!(form.validate().unwrap_err().to_string(), "Please select a doctype");

        form.doctype = Some("Item".to_string());
        assert!(form.validate().is_ok());

        form.batch_size = 0;
        assert!(form.validate().is_err());
        form.batch_size = 100;

        form.file = Some(dir.path().join("missing.csv"));
        assert!(form
            .validate()
            .unwrap_err()
            .to_string()
            .starts_with("File not found"));

        let json = dir.path().join("items.json");
        std::fs::write(&json, "[]").unwrap();
        form.file = Some(json);
        assert!(form.validate().unwrap_err().to_string().contains("Unsupported"));
    }

    #[tokio::test]
    async fn upload_sends_form_fields() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let form = UploadForm {
            doctype: Some("Item".to_string()),
            file: Some(csv_file(dir.path())),
            batch_size: 100,
        };

        let receipt = upload(&fake, &c1(), &form).await.unwrap();
        assert_eq!(receipt.job_id, "j1");

        let sent = fake.last_upload.lock().unwrap().clone().unwrap();
        assert_eq!(sent.connection_id, "c1");
        assert_eq!(sent.doctype, "Item");
        assert_eq!(sent.batch_size, 100);
    }

    #[tokio::test]
    async fn template_requires_a_selection() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let err = download_template(&fake, &c1(), "Customer", &[], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ImporterError::Validation(_)));
        assert_eq!(FakeBackend::calls(&fake.template_calls), 0);
    }

    #[tokio::test]
    async fn template_uses_display_order_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let mut engine = FieldSelectionEngine::new();
        load_schema(&fake, &c1(), "Customer", &mut engine, &Recommendations::default())
            .await
            .unwrap();
        engine.toggle_field(&FieldKey::child("address", "city"));
        engine.toggle_field(&FieldKey::parent("customer_name"));

        let path = download_template(
            &fake,
            &c1(),
            "Customer",
            &engine.selected_in_display_order(),
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(path, dir.path().join("Customer_template.xlsx"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04fake-xlsx");
        let sent = fake.last_template.lock().unwrap().clone().unwrap();
        assert_eq!(sent.fields, vec!["customer_name", "address.city"]);
    }

    #[tokio::test]
    async fn malformed_schema_is_reported() {
        let fake = FakeBackend::new();
        *fake.schema.lock().unwrap() = serde_json::json!({"docs": []});
        let mut engine = FieldSelectionEngine::new();
        let err = load_schema(&fake, &c1(), "Customer", &mut engine, &Recommendations::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ImporterError::SchemaMalformed(_)));
    }

    fn customer_catalog() -> FieldCatalog {
        let doc = schema::normalize(&schema::fixtures::customer_schema()).unwrap();
        schema::catalog(&doc)
    }

    #[test]
    fn auto_map_matches_headers_to_catalog() {
        let mut draft = MappingDraft::new(vec![
            "customer_name [Data]".to_string(),
            "territory [Link] [Territory]".to_string(),
            "address.1.city [Data]".to_string(),
            "Notes".to_string(),
        ]);
        let mapped = draft.auto_map(&customer_catalog());
        assert_eq!(mapped, 3);
        assert!(draft.get("Notes").is_none());

        let wire = draft.to_wire();
        assert_eq!(wire["customer_name [Data]"], "customer_name");
        assert_eq!(wire["address.1.city [Data]"], "address.city");
    }

    #[test]
    fn cycle_walks_catalog_and_back_to_unassigned() {
        let catalog = customer_catalog();
        let mut draft = MappingDraft::new(vec!["Notes".to_string()]);

        draft.cycle("Notes", &catalog, true);
        assert_eq!(draft.get("Notes"), Some(&catalog.entries()[0].key));
        draft.cycle("Notes", &catalog, false);
        assert!(draft.get("Notes").is_none());
        draft.cycle("Notes", &catalog, false);
        assert_eq!(draft.get("Notes"), catalog.entries().last().map(|e| &e.key));
    }

    #[test]
    fn assign_rejects_unknown_columns() {
        let mut draft = MappingDraft::new(vec!["A".to_string()]);
        assert!(draft.assign("B", FieldKey::parent("x")).is_err());
        draft.assign("A", FieldKey::parent("x")).unwrap();
        assert_eq!(draft.unassign("A"), Some(FieldKey::parent("x")));
    }

    #[tokio::test]
    async fn start_import_requires_a_mapping() {
        let fake = FakeBackend::new();
        let err = start_import(&fake, "j1", &MappingDraft::new(vec!["A".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ImporterError::Validation(_)));
        assert_eq!(FakeBackend::calls(&fake.import_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_connect_upload_watch() {
        let dir = tempfile::tempdir().unwrap();
        let mut completed = JobStatusSnapshot::processing(100, 100);
        completed.status = JobStatus::Completed;
        let fake = Arc::new(FakeBackend::with_statuses(vec![
            Ok(JobStatusSnapshot::processing(40, 100)),
            Ok(completed),
        ]));
        let store = Arc::new(MemorySessionStore::new());
        let mut wizard = WizardController::new(StepLayout::ThreeStep, store.clone());
        wizard.mount().await;

        let form = ConnectForm {
            url: "https://x".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let connection = connect(fake.as_ref(), &form).await.unwrap();
        assert_eq!(connection.id, "c1");
        wizard
            .dispatch(WizardEvent::ConnectionEstablished { connection: connection.clone() })
            .await;

        let upload_form = UploadForm {
            doctype: Some("Item".to_string()),
            file: Some(csv_file(dir.path())),
            batch_size: 100,
        };
        let receipt = upload(fake.as_ref(), &connection, &upload_form).await.unwrap();
        assert_eq!(receipt.job_id, "j1");
        wizard.dispatch(WizardEvent::FileUploaded { receipt }).await;
        assert_eq!(wizard.step(), Step::Import);

        let watcher = JobStatusWatcher::new(
            Arc::new(BackendStatusSource::new(fake.clone())),
            Duration::from_millis(2000),
        );
        let mut rx = watcher.subscribe();
        watcher.start(wizard.session().job_id.clone().unwrap());

        let mut percentages = Vec::new();
        loop {
            let update = rx.borrow_and_update().clone();
            if update.snapshot.is_some() && percentages.len() < update.fetches as usize {
                percentages.push(update.percentage());
            }
            if update.state == WatchState::Terminal {
                break;
            }
            rx.changed().await.unwrap();
        }
        assert_eq!(percentages, vec![40, 100]);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(FakeBackend::calls(&fake.status_calls), 2);
        assert_eq!(store.snapshot().map(|c| c.id), Some("c1".to_string()));
    }
}
