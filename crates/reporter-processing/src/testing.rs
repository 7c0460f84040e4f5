//! In-memory collaborators for tests and local runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reporter_bucket::{BucketError, ReportStore, TemplateStore};
use reporter_repository::{
    ColumnInformation, DocumentRepository, FieldFilters, LegacyFilter, RelationalRepository,
    ReportRecord, ReportStatus, ReportStatusRepository, RepositoryError, Row, TableSchema,
};
use serde_json::Value;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerManager;
use crate::datasource::SafeDataSources;
use crate::error::ProcessingError;
use crate::pdf::PdfPool;
use crate::pipeline::PipelineCollaborators;

/// Builds a row from a JSON object literal.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

pub fn table_schema(schema: &str, table: &str, columns: &[&str]) -> TableSchema {
    TableSchema {
        schema_name: schema.to_string(),
        table_name: table.to_string(),
        columns: columns
            .iter()
            .map(|name| ColumnInformation {
                name: name.to_string(),
                data_type: "text".to_string(),
                is_primary_key: *name == "id",
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct FakeTemplateStore {
    templates: Mutex<HashMap<String, Bytes>>,
    calls: AtomicUsize,
}

impl FakeTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, name: impl ToString, body: &str) -> Self {
        self.templates
            .lock()
            .insert(name.to_string(), Bytes::from(body.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateStore for FakeTemplateStore {
    async fn get(&self, name: &str) -> Result<Bytes, BucketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.templates
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| BucketError::NotFound(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub key: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub ttl: String,
}

impl StoredReport {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Default)]
pub struct FakeReportStore {
    stored: Mutex<Vec<StoredReport>>,
    fail: AtomicBool,
}

impl FakeReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    pub fn stored(&self) -> Vec<StoredReport> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl ReportStore for FakeReportStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Bytes,
        ttl: &str,
    ) -> Result<(), BucketError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BucketError::request(key, "put rejected"));
        }
        self.stored.lock().push(StoredReport {
            key: key.to_string(),
            content_type: content_type.to_string(),
            bytes,
            ttl: ttl.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub id: Uuid,
    pub status: ReportStatus,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

#[derive(Default)]
pub struct FakeStatusRepository {
    records: Mutex<HashMap<Uuid, ReportRecord>>,
    changes: Mutex<Vec<StatusChange>>,
    fail_updates: AtomicBool,
    fail_lookups: AtomicBool,
}

impl FakeStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(self, id: Uuid, status: ReportStatus) -> Self {
        self.records.lock().insert(
            id,
            ReportRecord {
                id,
                status,
                updated_at: Utc::now(),
                metadata: None,
            },
        );
        self
    }

    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes.lock().clone()
    }

    pub fn last_change(&self) -> Option<StatusChange> {
        self.changes.lock().last().cloned()
    }
}

#[async_trait]
impl ReportStatusRepository for FakeStatusRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<ReportRecord, RepositoryError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(RepositoryError::Decode("status store offline".into()));
        }
        self.records
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update_status_by_id(
        &self,
        status: ReportStatus,
        id: Uuid,
        updated_at: DateTime<Utc>,
        metadata: Option<Value>,
    ) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Decode("status store offline".into()));
        }
        self.changes.lock().push(StatusChange {
            id,
            status,
            updated_at,
            metadata: metadata.clone(),
        });
        self.records.lock().insert(
            id,
            ReportRecord {
                id,
                status,
                updated_at,
                metadata,
            },
        );
        Ok(())
    }
}

/// One call made against a fake repository.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCall {
    /// `schema.table` for relational calls, the collection for documents.
    pub target: String,
    pub fields: Vec<String>,
    pub filters: Option<FieldFilters>,
}

#[derive(Default)]
pub struct FakeRelationalRepository {
    schema: Vec<TableSchema>,
    rows: HashMap<String, Vec<Row>>,
    discovered_schemas: Mutex<Vec<Vec<String>>>,
    calls: Mutex<Vec<QueryCall>>,
    failure: Mutex<Option<String>>,
}

impl FakeRelationalRepository {
    pub fn new(schema: Vec<TableSchema>) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    pub fn with_rows(mut self, schema: &str, table: &str, rows: Vec<Row>) -> Self {
        self.rows.insert(format!("{schema}.{table}"), rows);
        self
    }

    /// Makes every subsequent call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<QueryCall> {
        self.calls.lock().clone()
    }

    /// Schema lists passed to discovery, one entry per call.
    pub fn discovery_calls(&self) -> Vec<Vec<String>> {
        self.discovered_schemas.lock().clone()
    }

    fn check(&self) -> Result<(), RepositoryError> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(RepositoryError::Decode(message.clone())),
            None => Ok(()),
        }
    }

    fn record(&self, schema_name: &str, table: &str, fields: &[String], filters: Option<FieldFilters>) -> Vec<Row> {
        let target = format!("{schema_name}.{table}");
        self.calls.lock().push(QueryCall {
            target: target.clone(),
            fields: fields.to_vec(),
            filters,
        });
        self.rows.get(&target).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RelationalRepository for FakeRelationalRepository {
    async fn get_database_schema(
        &self,
        schemas: &[String],
    ) -> Result<Vec<TableSchema>, RepositoryError> {
        self.discovered_schemas.lock().push(schemas.to_vec());
        self.check()?;
        Ok(self
            .schema
            .iter()
            .filter(|table| schemas.contains(&table.schema_name))
            .cloned()
            .collect())
    }

    async fn query(
        &self,
        _schema: &[TableSchema],
        schema_name: &str,
        table: &str,
        fields: &[String],
        _filter: Option<&LegacyFilter>,
    ) -> Result<Vec<Row>, RepositoryError> {
        self.check()?;
        Ok(self.record(schema_name, table, fields, None))
    }

    async fn query_with_advanced_filters(
        &self,
        _schema: &[TableSchema],
        schema_name: &str,
        table: &str,
        fields: &[String],
        filters: &FieldFilters,
    ) -> Result<Vec<Row>, RepositoryError> {
        self.check()?;
        Ok(self.record(schema_name, table, fields, Some(filters.clone())))
    }
}

#[derive(Default)]
pub struct FakeDocumentRepository {
    rows: HashMap<String, Vec<Row>>,
    calls: Mutex<Vec<QueryCall>>,
    failure: Mutex<Option<String>>,
}

impl FakeDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, collection: &str, rows: Vec<Row>) -> Self {
        self.rows.insert(collection.to_string(), rows);
        self
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<QueryCall> {
        self.calls.lock().clone()
    }

    fn record(&self, collection: &str, fields: &[String], filters: Option<FieldFilters>) -> Result<Vec<Row>, RepositoryError> {
        if let Some(message) = self.failure.lock().as_ref() {
            return Err(RepositoryError::Decode(message.clone()));
        }
        self.calls.lock().push(QueryCall {
            target: collection.to_string(),
            fields: fields.to_vec(),
            filters,
        });
        Ok(self.rows.get(collection).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl DocumentRepository for FakeDocumentRepository {
    async fn query(
        &self,
        collection: &str,
        fields: &[String],
        _filter: Option<&LegacyFilter>,
    ) -> Result<Vec<Row>, RepositoryError> {
        self.record(collection, fields, None)
    }

    async fn query_with_advanced_filters(
        &self,
        collection: &str,
        fields: &[String],
        filters: &FieldFilters,
    ) -> Result<Vec<Row>, RepositoryError> {
        self.record(collection, fields, Some(filters.clone()))
    }
}

/// Writes `%PDF-fake ` followed by the HTML instead of running a browser.
#[derive(Default)]
pub struct FakePdfPool {
    submissions: AtomicUsize,
}

impl FakePdfPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PdfPool for FakePdfPool {
    async fn submit(&self, html: &str, output: &Path) -> Result<(), ProcessingError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, format!("%PDF-fake {html}"))
            .await
            .map_err(|err| ProcessingError::Pdf(err.to_string()))
    }
}

/// Fakes wired together, with handles kept for assertions.
pub struct Harness {
    pub templates: Arc<FakeTemplateStore>,
    pub reports: Arc<FakeReportStore>,
    pub statuses: Arc<FakeStatusRepository>,
    pub datasources: Arc<SafeDataSources>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub pdf_pool: Arc<FakePdfPool>,
}

impl Harness {
    pub fn new(templates: FakeTemplateStore, datasources: SafeDataSources) -> Self {
        Self {
            templates: Arc::new(templates),
            reports: Arc::new(FakeReportStore::new()),
            statuses: Arc::new(FakeStatusRepository::new()),
            datasources: Arc::new(datasources),
            breakers: Arc::new(CircuitBreakerManager::default()),
            pdf_pool: Arc::new(FakePdfPool::new()),
        }
    }

    pub fn collaborators(&self) -> PipelineCollaborators {
        PipelineCollaborators {
            templates: self.templates.clone(),
            reports: self.reports.clone(),
            statuses: self.statuses.clone(),
            datasources: self.datasources.clone(),
            breakers: self.breakers.clone(),
            pdf_pool: self.pdf_pool.clone(),
        }
    }
}
