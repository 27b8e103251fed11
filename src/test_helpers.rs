//! Shared test doubles for the publish pipeline.
//!
//! Each collaborator trait has a recording mock that stores what it was asked
//! to do behind a `Mutex`, so tests can assert on the exact sequence of side
//! effects after the fact.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let source = MockSource::with_rows(vec![json!({ "name": "Aeroplan" })]);
//! let store = MockStore::default();
//! // ... run a publish ...
//! assert_eq!(source.get_operations().last(), Some(&SourceOp::Release));
//! let put = find_put(&store.get_puts(), "tables/rates.html");
//! assert_eq!(put.content_type, HTML_CONTENT_TYPE);
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::cms::{CmsError, ContentType, Document, DocumentStore, Identifier};
use crate::source::{Connection, DataFetcher, SourceError, SourceProvider};
use crate::store::{ArtifactStore, PutReceipt, PutRequest, Scope, StoreError};

// =========================================================================
// Source provider
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOp {
    Acquire,
    Query { sql: String, params: Vec<Value> },
    Release,
}

/// Source provider whose connections answer every query with fixed rows.
#[derive(Default)]
pub struct MockSource {
    rows: Vec<Value>,
    acquire_error: Option<String>,
    release_error: Option<String>,
    operations: Arc<Mutex<Vec<SourceOp>>>,
}

impl MockSource {
    pub fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn failing_acquire(message: &str) -> Self {
        Self {
            acquire_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_release(message: &str) -> Self {
        Self {
            release_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn get_operations(&self) -> Vec<SourceOp> {
        self.operations.lock().unwrap().clone()
    }
}

struct MockConnection {
    rows: Vec<Value>,
    operations: Arc<Mutex<Vec<SourceOp>>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Value>, SourceError> {
        self.operations.lock().unwrap().push(SourceOp::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(self.rows.clone())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for MockSource {
    async fn acquire(&self) -> Result<Box<dyn Connection>, SourceError> {
        self.operations.lock().unwrap().push(SourceOp::Acquire);
        if let Some(message) = &self.acquire_error {
            return Err(SourceError::Fetch(message.clone()));
        }
        Ok(Box::new(MockConnection {
            rows: self.rows.clone(),
            operations: Arc::clone(&self.operations),
        }))
    }

    async fn release(&self, mut connection: Box<dyn Connection>) -> Result<(), SourceError> {
        self.operations.lock().unwrap().push(SourceOp::Release);
        connection.close().await?;
        match &self.release_error {
            Some(message) => Err(SourceError::Fetch(message.clone())),
            None => Ok(()),
        }
    }
}

/// Fetcher with a canned outcome that never touches the connection.
pub struct MockFetcher {
    result: Result<Value, String>,
}

impl MockFetcher {
    pub fn returning(data: Value) -> Self {
        Self { result: Ok(data) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl DataFetcher for MockFetcher {
    async fn fetch(&self, _connection: &mut dyn Connection) -> Result<Value, SourceError> {
        self.result.clone().map_err(SourceError::Fetch)
    }
}

// =========================================================================
// Artifact store
// =========================================================================

/// One recorded upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOp {
    pub scope: Scope,
    pub bucket: Option<String>,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

impl PutOp {
    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }
}

/// Artifact store that keeps uploads in memory.
pub struct MockStore {
    scopes: Vec<Scope>,
    fail_key: Option<String>,
    puts: Mutex<Vec<PutOp>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self {
            scopes: vec![Scope::Public, Scope::Private],
            fail_key: None,
            puts: Mutex::new(Vec::new()),
        }
    }
}

impl MockStore {
    /// Only `scopes` are configured.
    pub fn with_scopes(scopes: &[Scope]) -> Self {
        Self {
            scopes: scopes.to_vec(),
            ..Self::default()
        }
    }

    /// Uploads to `key` fail.
    pub fn failing_on(key: &str) -> Self {
        Self {
            fail_key: Some(key.to_string()),
            ..Self::default()
        }
    }

    pub fn get_puts(&self) -> Vec<PutOp> {
        self.puts.lock().unwrap().clone()
    }

    pub fn get_keys(&self) -> Vec<String> {
        self.get_puts().into_iter().map(|p| p.key).collect()
    }
}

#[async_trait]
impl ArtifactStore for MockStore {
    fn supports(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    async fn put(&self, request: PutRequest<'_>) -> Result<PutReceipt, StoreError> {
        if !self.supports(request.scope) {
            return Err(StoreError::Unconfigured(request.scope));
        }
        if self.fail_key.as_deref() == Some(request.key) {
            return Err(StoreError::Upload {
                key: request.key.to_string(),
                message: "access denied".to_string(),
            });
        }
        let bytes = request.body.len();
        let location = format!(
            "mock://{}/{}",
            request.bucket.unwrap_or(request.scope.as_str()),
            request.key
        );
        self.puts.lock().unwrap().push(PutOp {
            scope: request.scope,
            bucket: request.bucket.map(str::to_string),
            key: request.key.to_string(),
            body: request.body,
            content_type: request.content_type.to_string(),
            cache_control: request.cache_control.to_string(),
        });
        Ok(PutReceipt { location, bytes })
    }
}

/// Find an upload by key. Panics if not found.
pub fn find_put<'a>(puts: &'a [PutOp], key: &str) -> &'a PutOp {
    puts.iter().find(|p| p.key == key).unwrap_or_else(|| {
        let keys: Vec<&str> = puts.iter().map(|p| p.key.as_str()).collect();
        panic!("no upload to '{key}'. Uploaded: {keys:?}")
    })
}

// =========================================================================
// Document store
// =========================================================================

struct StoredDocument {
    content_type: ContentType,
    slug: String,
    document: Document,
}

/// Document store holding documents in memory. Writes are recorded and
/// applied, so a second fetch sees the patched body.
#[derive(Default)]
pub struct MockDocuments {
    documents: Mutex<Vec<StoredDocument>>,
    reject_writes: Option<u16>,
    writes: Mutex<Vec<(ContentType, Document)>>,
}

impl MockDocuments {
    pub fn with_page(slug: &str, id: &str, html: &str, updated_at: &str) -> Self {
        let store = Self::default();
        store.documents.lock().unwrap().push(StoredDocument {
            content_type: ContentType::Pages,
            slug: slug.to_string(),
            document: Document {
                id: id.to_string(),
                html: html.to_string(),
                updated_at: updated_at.to_string(),
            },
        });
        store
    }

    /// Every write fails with `status`, as Ghost does for a stale `updated_at`.
    pub fn rejecting_writes(mut self, status: u16) -> Self {
        self.reject_writes = Some(status);
        self
    }

    pub fn get_writes(&self) -> Vec<(ContentType, Document)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MockDocuments {
    async fn fetch(
        &self,
        content_type: ContentType,
        identifier: &Identifier,
    ) -> Result<Option<Document>, CmsError> {
        let documents = self.documents.lock().unwrap();
        Ok(documents
            .iter()
            .find(|d| {
                d.content_type == content_type
                    && match identifier {
                        Identifier::Slug(slug) => &d.slug == slug,
                        Identifier::Id(id) => &d.document.id == id,
                    }
            })
            .map(|d| d.document.clone()))
    }

    async fn write(
        &self,
        content_type: ContentType,
        document: &Document,
    ) -> Result<Document, CmsError> {
        if let Some(status) = self.reject_writes {
            return Err(CmsError::Status {
                status,
                body: "UpdateCollisionError".to_string(),
            });
        }
        self.writes
            .lock()
            .unwrap()
            .push((content_type, document.clone()));

        let mut documents = self.documents.lock().unwrap();
        let stored = documents
            .iter_mut()
            .find(|d| d.content_type == content_type && d.document.id == document.id);
        let updated = Document {
            updated_at: format!("{}+1", document.updated_at),
            ..document.clone()
        };
        if let Some(stored) = stored {
            stored.document = updated.clone();
        }
        Ok(updated)
    }
}
