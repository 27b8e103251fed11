//! Job configuration.
//!
//! A job is one TOML file in the jobs directory. It names where the data comes
//! from, how each table is built, where the artifacts go, and optionally
//! which CMS document to patch:
//!
//! ```text
//! jobs/
//! ├── defaults.toml              # optional, merged under every job
//! ├── transfer_partners.toml     # single table
//! └── pages/
//!     └── card_matrix.toml       # several tables for one page
//! ```
//!
//! A file carries exactly one of `[table]` (a [`JobLayout::SingleTable`] job)
//! or `[[tables]]` (a [`JobLayout::MultiTablePage`] job). Every section
//! rejects unknown keys, so a typo fails at load time instead of silently
//! changing what gets published. `rp-tables gen-config` prints a documented
//! example ([`stock_job_toml`]).
//!
//! ## Table construction
//!
//! Each table picks one construction mode:
//!
//! | Keys | Mode |
//! |------|------|
//! | `builder = "name"` | registered [`TableBuilder`] |
//! | `[table.pivot]` | declarative [`PivotTable`] |
//! | `[table.template]` + `[table.rows]` | template with [`RecordRows`] |
//! | `[table.template]` + `row_builder = "name"` | template with a registered [`RowBuilder`] |
//!
//! Named builders and fetchers come from a [`Registry`] populated by the
//! embedding program.

use crate::builders::{PivotTable, RecordRows};
use crate::cms::{ContentType, Identifier};
use crate::envelope::Header;
use crate::normalize::{CaptionFn, RowBuilder, TableBuilder, TableDefinition, resolve_caption};
use crate::patch::PatchTarget;
use crate::source::{DataFetcher, QueryFetch};
use crate::spec::TableSpec;
use crate::store::{DEFAULT_CACHE_CONTROL, Scope};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// File in the jobs directory merged under every job.
pub const DEFAULTS_FILE: &str = "defaults.toml";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not read jobs directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("TOML parse error in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Job \"{job}\": {reason}")]
    Invalid { job: String, reason: String },
    #[error("Job \"{name}\" is defined in both {} and {}", first.display(), second.display())]
    Duplicate {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Unknown job \"{name}\". Available: {available}")]
    Unknown { name: String, available: String },
}

fn invalid(job: &str, reason: impl Into<String>) -> JobError {
    JobError::Invalid {
        job: job.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// File format
// ============================================================================

/// A job file as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    /// Defaults to the file stem.
    #[serde(default)]
    pub name: String,
    /// Whether `run-all` includes this job.
    #[serde(default = "default_true")]
    pub include_in_all: bool,
    pub source: SourceFile,
    #[serde(default)]
    pub output: OutputFile,
    pub ghost: Option<GhostFile>,
    pub table: Option<TableFile>,
    #[serde(default)]
    pub tables: Vec<TableFile>,
}

fn default_true() -> bool {
    true
}

/// `[source]`: a query with parameters, or a registered fetcher.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceFile {
    pub query: Option<String>,
    /// Positional parameters. Arrays expand into `?, ?, ...` lists.
    pub params: Vec<Value>,
    pub fetcher: Option<String>,
}

/// `[output]`: where artifacts go unless a table overrides it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputFile {
    pub space: Scope,
    pub cache_control: String,
    /// Replaces the scope's configured bucket.
    pub bucket: Option<String>,
}

impl Default for OutputFile {
    fn default() -> Self {
        Self {
            space: Scope::Public,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            bucket: None,
        }
    }
}

/// `[ghost]`: the document to patch after publishing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GhostFile {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub slug: Option<String>,
    pub id: Option<String>,
    /// Anchor id of a single-table job, ahead of `table.id`.
    pub table_id: Option<String>,
}

/// `[table]` / `[[tables]]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableFile {
    pub id: Option<String>,
    pub json_key: String,
    pub html_key: String,
    pub space: Option<Scope>,
    pub cache_control: Option<String>,
    pub bucket: Option<String>,
    /// Caption template; `{{published}}` and `{{generated_at}}` are substituted.
    pub caption: Option<String>,
    pub builder: Option<String>,
    pub pivot: Option<PivotTable>,
    pub template: Option<TableSpec>,
    pub rows: Option<RecordRows>,
    pub row_builder: Option<String>,
}

// ============================================================================
// Registry
// ============================================================================

/// Named builders and fetchers that job files can refer to.
#[derive(Clone, Default)]
pub struct Registry {
    tables: BTreeMap<String, Arc<dyn TableBuilder>>,
    rows: BTreeMap<String, Arc<dyn RowBuilder>>,
    fetchers: BTreeMap<String, Arc<dyn DataFetcher>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("rows", &self.rows.keys().collect::<Vec<_>>())
            .field("fetchers", &self.fetchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn table_builder(mut self, name: &str, builder: impl TableBuilder + 'static) -> Self {
        self.tables.insert(name.to_string(), Arc::new(builder));
        self
    }

    pub fn row_builder(mut self, name: &str, builder: impl RowBuilder + 'static) -> Self {
        self.rows.insert(name.to_string(), Arc::new(builder));
        self
    }

    pub fn fetcher(mut self, name: &str, fetcher: impl DataFetcher + 'static) -> Self {
        self.fetchers.insert(name.to_string(), Arc::new(fetcher));
        self
    }
}

fn lookup<T: ?Sized>(
    job: &str,
    kind: &str,
    map: &BTreeMap<String, Arc<T>>,
    name: &str,
) -> Result<Arc<T>, JobError> {
    map.get(name).cloned().ok_or_else(|| {
        let available: Vec<&str> = map.keys().map(String::as_str).collect();
        invalid(
            job,
            format!(
                "unknown {kind} \"{name}\" (registered: {})",
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            ),
        )
    })
}

// ============================================================================
// Resolved jobs
// ============================================================================

/// Where a job's data comes from.
#[derive(Clone)]
pub enum Source {
    Query(QueryFetch),
    Fetcher {
        name: String,
        fetcher: Arc<dyn DataFetcher>,
    },
}

impl Source {
    pub fn fetcher(&self) -> &dyn DataFetcher {
        match self {
            Source::Query(query) => query,
            Source::Fetcher { fetcher, .. } => fetcher.as_ref(),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Query(query) => f.debug_tuple("Query").field(query).finish(),
            Source::Fetcher { name, .. } => f.debug_tuple("Fetcher").field(name).finish(),
        }
    }
}

/// Upload settings for one table's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub scope: Scope,
    pub bucket: Option<String>,
    pub cache_control: String,
    pub json_key: String,
    pub html_key: String,
}

#[derive(Debug, Clone)]
pub struct TableJob {
    /// Default table id, also the document anchor.
    pub id: String,
    pub definition: TableDefinition,
    pub output: Output,
}

#[derive(Debug, Clone)]
pub enum JobLayout {
    SingleTable(TableJob),
    MultiTablePage(Vec<TableJob>),
}

impl JobLayout {
    pub fn tables(&self) -> &[TableJob] {
        match self {
            JobLayout::SingleTable(table) => std::slice::from_ref(table),
            JobLayout::MultiTablePage(tables) => tables,
        }
    }
}

/// A validated job, ready to run.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub include_in_all: bool,
    pub source: Source,
    pub patch: Option<PatchTarget>,
    pub layout: JobLayout,
}

impl Job {
    /// Scopes the job uploads to.
    pub fn scopes(&self) -> BTreeSet<Scope> {
        self.layout.tables().iter().map(|t| t.output.scope).collect()
    }
}

impl JobFile {
    /// Validate and bind names against `registry`.
    pub fn resolve(self, registry: &Registry) -> Result<Job, JobError> {
        let name = self.name;
        if name.is_empty() {
            return Err(invalid("", "name is required"));
        }

        let source = match (self.source.query, self.source.fetcher) {
            (Some(sql), None) => Source::Query(QueryFetch {
                sql,
                params: self.source.params,
            }),
            (None, Some(fetcher)) => {
                if !self.source.params.is_empty() {
                    return Err(invalid(&name, "source.params only apply to source.query"));
                }
                Source::Fetcher {
                    fetcher: lookup(&name, "fetcher", &registry.fetchers, &fetcher)?,
                    name: fetcher,
                }
            }
            (Some(_), Some(_)) => {
                return Err(invalid(&name, "source sets both query and fetcher"));
            }
            (None, None) => return Err(invalid(&name, "source needs a query or a fetcher")),
        };

        let patch = match &self.ghost {
            Some(ghost) => Some(PatchTarget {
                content_type: ghost.content_type,
                identifier: match (&ghost.slug, &ghost.id) {
                    (Some(slug), None) => Identifier::Slug(slug.clone()),
                    (None, Some(id)) => Identifier::Id(id.clone()),
                    _ => return Err(invalid(&name, "ghost needs exactly one of slug or id")),
                },
            }),
            None => None,
        };

        let layout = match (self.table, self.tables.is_empty()) {
            (Some(table), true) => {
                let default_id = self
                    .ghost
                    .as_ref()
                    .and_then(|g| g.table_id.clone())
                    .or_else(|| table.id.clone())
                    .or_else(|| table.template.as_ref().map(|t| t.id.clone()))
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| name.clone());
                let table = resolve_table(&name, table, default_id, &self.output, registry)?;
                JobLayout::SingleTable(table)
            }
            (None, false) => {
                let mut seen = BTreeSet::new();
                let mut tables = Vec::with_capacity(self.tables.len());
                for (index, table) in self.tables.into_iter().enumerate() {
                    let id = table
                        .id
                        .clone()
                        .or_else(|| table.template.as_ref().map(|t| t.id.clone()))
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| {
                            invalid(&name, format!("table {} is missing an id", index + 1))
                        })?;
                    if !seen.insert(id.clone()) {
                        return Err(invalid(&name, format!("duplicate table id \"{id}\"")));
                    }
                    tables.push(resolve_table(&name, table, id, &self.output, registry)?);
                }
                JobLayout::MultiTablePage(tables)
            }
            (Some(_), false) => {
                return Err(invalid(&name, "set either [table] or [[tables]], not both"));
            }
            (None, true) => return Err(invalid(&name, "no [table] or [[tables]] defined")),
        };

        Ok(Job {
            name,
            include_in_all: self.include_in_all,
            source,
            patch,
            layout,
        })
    }
}

fn resolve_table(
    job: &str,
    table: TableFile,
    id: String,
    defaults: &OutputFile,
    registry: &Registry,
) -> Result<TableJob, JobError> {
    if table.json_key.is_empty() || table.html_key.is_empty() {
        return Err(invalid(
            job,
            format!("table \"{id}\" requires json_key and html_key"),
        ));
    }

    let definition = match (table.builder, table.pivot, table.template) {
        (Some(builder), None, None) => {
            TableDefinition::from_builder(lookup(job, "table builder", &registry.tables, &builder)?)
        }
        (None, Some(pivot), None) => TableDefinition::from_builder(Arc::new(pivot)),
        (None, None, Some(template)) => {
            let rows: Arc<dyn RowBuilder> = match (table.rows, table.row_builder) {
                (Some(rows), None) => Arc::new(rows.for_template(&template)),
                (None, Some(name)) => lookup(job, "row builder", &registry.rows, &name)?,
                _ => {
                    return Err(invalid(
                        job,
                        format!("table \"{id}\" template needs exactly one of rows or row_builder"),
                    ));
                }
            };
            TableDefinition::from_template(template, rows)
        }
        _ => {
            return Err(invalid(
                job,
                format!("table \"{id}\" needs exactly one of builder, pivot or template"),
            ));
        }
    };
    let definition = match table.caption {
        Some(template) => {
            let caption: CaptionFn =
                Arc::new(move |header: &Header| resolve_caption(&template, header));
            definition.with_caption(caption)
        }
        None => definition,
    };

    Ok(TableJob {
        id,
        definition,
        output: Output {
            scope: table.space.unwrap_or(defaults.space),
            bucket: table.bucket.or_else(|| defaults.bucket.clone()),
            cache_control: table
                .cache_control
                .unwrap_or_else(|| defaults.cache_control.clone()),
            json_key: table.json_key,
            html_key: table.html_key,
        },
    })
}

// ============================================================================
// Loading
// ============================================================================

/// Deep-merge `overlay` onto `base`. Tables merge key by key; anything else in
/// `overlay` replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

fn read_toml(path: &Path) -> Result<toml::Value, JobError> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| JobError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse one job file, merged over `defaults`.
pub fn parse_job_file(path: &Path, defaults: Option<&toml::Value>) -> Result<JobFile, JobError> {
    let raw = read_toml(path)?;
    let merged = match defaults {
        Some(base) => merge_toml(base.clone(), raw),
        None => raw,
    };
    let mut file: JobFile = merged.try_into().map_err(|source| JobError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    if file.name.is_empty() {
        file.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(file)
}

/// Load and resolve every `*.toml` job under `dir`, sorted by name.
pub fn load_jobs(dir: &Path, registry: &Registry) -> Result<Vec<Job>, JobError> {
    let defaults_path = dir.join(DEFAULTS_FILE);
    let defaults = if defaults_path.is_file() {
        Some(read_toml(&defaults_path)?)
    } else {
        None
    };

    let mut paths: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut jobs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().is_none_or(|ext| ext != "toml")
            || path == defaults_path
        {
            continue;
        }
        let job = parse_job_file(path, defaults.as_ref())?.resolve(registry)?;
        if let Some(first) = paths.insert(job.name.clone(), path.to_path_buf()) {
            return Err(JobError::Duplicate {
                name: job.name,
                first,
                second: path.to_path_buf(),
            });
        }
        jobs.push(job);
    }
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(jobs)
}

/// Look up jobs by name, preserving the requested order.
pub fn select<'a>(jobs: &'a [Job], names: &[String]) -> Result<Vec<&'a Job>, JobError> {
    names
        .iter()
        .map(|name| {
            jobs.iter().find(|j| &j.name == name).ok_or_else(|| JobError::Unknown {
                name: name.clone(),
                available: jobs
                    .iter()
                    .map(|j| j.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
        })
        .collect()
}

/// Returns a fully-commented example job file.
///
/// Used by the `gen-config` CLI command.
pub fn stock_job_toml() -> &'static str {
    r##"# rp-tables job
# =============
# One file per job in the jobs directory. A `defaults.toml` next to the jobs
# is merged under every job, so shared settings only need to be written once.
# Unknown keys will cause an error.

# Job name used by `rp-tables run <name>`. Defaults to the file name.
name = "transfer_partners"

# Whether `rp-tables run-all` publishes this job.
include_in_all = true

# ---------------------------------------------------------------------------
# Data source
# ---------------------------------------------------------------------------
[source]
# A parameterized query. Each `?` takes one parameter; an array parameter
# expands into a list, so `IN (?)` works with `[[1, 2, 3]]`.
query = """
SELECT lp.short_name AS program, ctp.ratio, ctp.speed, ctp.speed_hours
FROM CurrencyTransferPartner ctp
JOIN LoyaltyProgram lp ON lp.id = ctp.to_loyalty_program_id
WHERE ctp.from_loyalty_program_id IN (?) AND ctp.is_active = 1
"""
params = [[63, 62]]
# Or a fetcher registered by the embedding program:
# fetcher = "transfer_partners"

# ---------------------------------------------------------------------------
# Upload defaults (tables may override each key)
# ---------------------------------------------------------------------------
[output]
# "public" uploads are world-readable; "private" uploads are not.
space = "public"
cache_control = "public, max-age=300"
# Upload to this bucket instead of the scope's configured one.
# bucket = "tables-staging"

# ---------------------------------------------------------------------------
# Document patch (optional)
# ---------------------------------------------------------------------------
# After uploading, replace the figure tagged data-rp-table-id="<table id>"
# in this Ghost document.
[ghost]
type = "page"
slug = "transfer-partners"
# id = "65a1f0c2e4b0a1b2c3d4e5f6"

# ---------------------------------------------------------------------------
# Table
# ---------------------------------------------------------------------------
# Use [table] for one table, or repeat [[tables]] for several tables that are
# patched into the same document together.
[table]
id = "transfer-partners"
json_key = "tables/transfer_partners.json"
html_key = "tables/transfer_partners.html"
# {{published}} and {{generated_at}} are substituted. Without a caption the
# table reads "Last updated <published> ET".
caption = "Last updated {{published}} ET"

# Construction: one of
#   builder = "name"          a registered table builder
#   [table.pivot]             a row x column matrix
#   [table.template] + [table.rows] or row_builder = "name"
[table.template]
settings = { sortableColumns = true, sortableRows = true, density = "compact" }

[[table.template.columns]]
key = "program"
label = "Program"
sort = { enabled = false }

[[table.template.columns]]
key = "ratio"
label = "Transfer ratio"
align = "center"

[[table.template.columns]]
key = "speed"
label = "Transfer speed"
align = "center"

[table.rows]
# Field shown as the row header (consumes the first column).
label = "program"
# Fields per cell. Defaults to the remaining column keys.
cells = ["ratio", "speed"]
# Sort a cell by another field.
sort = { speed = "speed_hours" }

# A pivot instead of a template:
# [table.pivot]
# row = "partner"
# column = "program"
# value = "ratio"
# row_label = "Partner"
# total_column = "Total"
# total_row = "Total"
"##
}
