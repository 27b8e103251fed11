//! Publish orchestration.
//!
//! One run of a [`Job`] goes through fixed stages, strictly in order:
//!
//! ```text
//! 1. Preflight  every upload scope configured, document store present if patching
//! 2. Fetch      acquire connection → fetch → release (always)
//! 3. Build      one TableSpec per table, ids unique within the job
//! 4. Render     HTML fragment + JSON envelope per table
//! 5. Upload     JSON then HTML, table by table
//! 6. Patch      one combined replacement pass over the target document
//! ```
//!
//! Every table is built and rendered before the first upload, so a validation
//! failure anywhere in a page publishes nothing. A failure at any stage ends
//! the run; nothing is retried. [`Publisher::run_all`] runs jobs one after
//! another and keeps going past failed ones.
//!
//! Failures carry the job name and stage, and classify into
//! [`ErrorCategory`]:
//!
//! | Category | Examples |
//! |----------|----------|
//! | Configuration | unconfigured scope, duplicate table id, no document store |
//! | Validation | cell count mismatch, missing sort value, builder data errors |
//! | Upstream | query failure, upload failure, anchor missing or ambiguous |
//! | ResourceRelease | connection release failed after a successful fetch |

use crate::cms::{Document, DocumentStore};
use crate::config::HeaderConfig;
use crate::envelope::{Envelope, Header};
use crate::job::{Job, TableJob};
use crate::normalize::{BuildContext, BuildError};
use crate::patch::{PatchError, PatchTarget, patch_document};
use crate::render::{RenderError, render_table};
use crate::source::{FetchFailure, SourceProvider, fetch_scoped};
use crate::store::{
    ArtifactStore, HTML_CONTENT_TYPE, JSON_CONTENT_TYPE, PutReceipt, PutRequest, StoreError,
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Source of the run timestamp.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Fetch,
    Build,
    Render,
    Upload,
    Patch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Preflight => "preflight",
            Stage::Fetch => "fetch",
            Stage::Build => "build",
            Stage::Render => "render",
            Stage::Upload => "upload",
            Stage::Patch => "patch",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Upstream,
    ResourceRelease,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::ResourceRelease => "resource release",
        })
    }
}

#[derive(Error, Debug)]
pub enum Failure {
    #[error("{0}")]
    Configuration(String),
    #[error(transparent)]
    Fetch(#[from] FetchFailure),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Could not serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl Failure {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Failure::Configuration(_) => ErrorCategory::Configuration,
            Failure::Fetch(FetchFailure::Release(_)) => ErrorCategory::ResourceRelease,
            Failure::Fetch(FetchFailure::Fetch { .. }) => ErrorCategory::Upstream,
            Failure::Build(BuildError::NoConstruction | BuildError::MissingId) => {
                ErrorCategory::Configuration
            }
            Failure::Build(_) | Failure::Render(_) | Failure::Serialize(_) => {
                ErrorCategory::Validation
            }
            Failure::Store(
                StoreError::Unconfigured(_)
                | StoreError::InvalidKey(_)
                | StoreError::InvalidBucket(_),
            ) => ErrorCategory::Configuration,
            Failure::Store(_) => ErrorCategory::Upstream,
            Failure::Patch(PatchError::MissingAnchor | PatchError::EmptyReplacement(_)) => {
                ErrorCategory::Validation
            }
            Failure::Patch(_) => ErrorCategory::Upstream,
        }
    }
}

/// A failed job run.
#[derive(Error, Debug)]
#[error("Job \"{job}\" failed at {stage}{}: {failure}", table_note(.table))]
pub struct PublishError {
    pub job: String,
    pub stage: Stage,
    /// Table being processed, when the failure belongs to one.
    pub table: Option<String>,
    #[source]
    pub failure: Failure,
}

fn table_note(table: &Option<String>) -> String {
    match table {
        Some(id) => format!(" (table \"{id}\")"),
        None => String::new(),
    }
}

impl PublishError {
    pub fn category(&self) -> ErrorCategory {
        self.failure.category()
    }
}

/// One published table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedTable {
    pub id: String,
    pub json: PutReceipt,
    pub html: PutReceipt,
    /// SHA-256 of the rendered HTML, hex.
    pub digest: String,
}

/// The document a run patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub target: PatchTarget,
    pub document_id: String,
    pub updated_at: String,
    pub tables: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub job: String,
    pub tables: Vec<PublishedTable>,
    pub patched: Option<PatchSummary>,
}

/// A table ready to upload.
struct Prepared<'j> {
    table: &'j TableJob,
    id: String,
    json: Vec<u8>,
    html: String,
}

/// Runs jobs against a set of collaborators.
pub struct Publisher<'a> {
    source: &'a dyn SourceProvider,
    store: &'a dyn ArtifactStore,
    documents: Option<&'a dyn DocumentStore>,
    skip_patch: bool,
    header: HeaderConfig,
    clock: Clock,
}

impl<'a> Publisher<'a> {
    pub fn new(
        source: &'a dyn SourceProvider,
        store: &'a dyn ArtifactStore,
        header: HeaderConfig,
    ) -> Self {
        Self {
            source,
            store,
            documents: None,
            skip_patch: false,
            header,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_documents(mut self, documents: &'a dyn DocumentStore) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Publish artifacts but leave documents untouched.
    pub fn skip_patch(mut self, skip: bool) -> Self {
        self.skip_patch = skip;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one job through every stage.
    pub async fn run(&self, job: &Job) -> Result<PublishReport, PublishError> {
        let fail = |stage: Stage, table: Option<&str>| {
            let job = job.name.clone();
            let table = table.map(str::to_string);
            move |failure: Failure| PublishError {
                job,
                stage,
                table,
                failure,
            }
        };

        let documents = self.preflight(job).map_err(fail(Stage::Preflight, None))?;

        info!(job = %job.name, "fetching data");
        let data = fetch_scoped(self.source, job.source.fetcher())
            .await
            .map_err(|e| fail(Stage::Fetch, None)(e.into()))?;

        let header = Header::at(&self.header, (self.clock)());
        let mut prepared: Vec<Prepared<'_>> = Vec::with_capacity(job.layout.tables().len());
        for table in job.layout.tables() {
            info!(job = %job.name, table = %table.id, "building table");
            let ctx = BuildContext {
                header: &header,
                table_id: &table.id,
            };
            let spec = table
                .definition
                .build(&data, &ctx)
                .map_err(|e| fail(Stage::Build, Some(table.id.as_str()))(e.into()))?;
            if prepared.iter().any(|p| p.id == spec.id) {
                let message = format!("Duplicate table id \"{}\" in page job.", spec.id);
                return Err(fail(Stage::Build, Some(spec.id.as_str()))(
                    Failure::Configuration(message),
                ));
            }

            let html = render_table(&spec)
                .map_err(|e| fail(Stage::Render, Some(spec.id.as_str()))(e.into()))?
                .into_string();
            let json = Envelope::new(&header, &spec)
                .to_bytes()
                .map_err(|e| fail(Stage::Render, Some(spec.id.as_str()))(e.into()))?;
            prepared.push(Prepared {
                table,
                id: spec.id,
                json,
                html,
            });
        }

        let mut published = Vec::with_capacity(prepared.len());
        for item in &prepared {
            let output = &item.table.output;

            info!(job = %job.name, table = %item.id, key = %output.json_key, "publishing JSON");
            let json = self
                .store
                .put(PutRequest {
                    scope: output.scope,
                    bucket: output.bucket.as_deref(),
                    key: &output.json_key,
                    body: item.json.clone(),
                    content_type: JSON_CONTENT_TYPE,
                    cache_control: &output.cache_control,
                })
                .await
                .map_err(|e| fail(Stage::Upload, Some(item.id.as_str()))(e.into()))?;

            info!(job = %job.name, table = %item.id, key = %output.html_key, "publishing HTML");
            let html = self
                .store
                .put(PutRequest {
                    scope: output.scope,
                    bucket: output.bucket.as_deref(),
                    key: &output.html_key,
                    body: item.html.clone().into_bytes(),
                    content_type: HTML_CONTENT_TYPE,
                    cache_control: &output.cache_control,
                })
                .await
                .map_err(|e| fail(Stage::Upload, Some(item.id.as_str()))(e.into()))?;

            published.push(PublishedTable {
                id: item.id.clone(),
                json,
                html,
                digest: hex::encode(Sha256::digest(item.html.as_bytes())),
            });
        }

        let patched = match (&job.patch, documents) {
            (Some(target), Some(documents)) => {
                let replacements: BTreeMap<String, String> = prepared
                    .into_iter()
                    .map(|p| (p.id, p.html))
                    .collect();
                info!(
                    job = %job.name,
                    document = %format!("{}:{}", target.content_type, target.identifier),
                    tables = replacements.len(),
                    "updating document"
                );
                let document: Document = patch_document(documents, target, &replacements)
                    .await
                    .map_err(|e| fail(Stage::Patch, None)(e.into()))?;
                Some(PatchSummary {
                    target: target.clone(),
                    document_id: document.id,
                    updated_at: document.updated_at,
                    tables: replacements.len(),
                })
            }
            (Some(target), None) => {
                info!(
                    job = %job.name,
                    document = %format!("{}:{}", target.content_type, target.identifier),
                    "skipping document patch"
                );
                None
            }
            (None, _) => None,
        };

        Ok(PublishReport {
            job: job.name.clone(),
            tables: published,
            patched,
        })
    }

    /// Check everything that can be known before touching the data source.
    /// Returns the document store to patch with, if any.
    fn preflight(&self, job: &Job) -> Result<Option<&'a dyn DocumentStore>, Failure> {
        for scope in job.scopes() {
            if !self.store.supports(scope) {
                return Err(Failure::Configuration(format!(
                    "Spaces scope \"{scope}\" is not configured"
                )));
            }
        }
        if job.patch.is_none() || self.skip_patch {
            return Ok(None);
        }
        match self.documents {
            Some(documents) => Ok(Some(documents)),
            None => Err(Failure::Configuration(
                "Job patches a Ghost document but no Ghost client is configured".to_string(),
            )),
        }
    }

    /// Run jobs one after another. Each outcome is independent.
    pub async fn run_all(&self, jobs: &[&Job]) -> Vec<Result<PublishReport, PublishError>> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let outcome = self.run(job).await;
            match &outcome {
                Ok(report) => {
                    info!(job = %report.job, tables = report.tables.len(), "job published")
                }
                Err(err) if err.category() == ErrorCategory::ResourceRelease => {
                    warn!(job = %err.job, error = %err, "job failed releasing its connection")
                }
                Err(err) => {
                    error!(job = %err.job, stage = %err.stage, error = %err, "job failed")
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}
