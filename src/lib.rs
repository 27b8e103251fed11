//! # rp-tables
//!
//! Publishes database-backed comparison tables. Each job queries a MySQL
//! source, builds a table description, renders it to a self-describing HTML
//! fragment, uploads both the fragment and a JSON envelope to object storage,
//! and optionally splices the fragment into a Ghost page or post in place of
//! the previously published version.
//!
//! # Architecture: One Pipeline Per Job
//!
//! ```text
//! 1. Fetch     source  →  rows             (connection always released)
//! 2. Build     rows    →  TableSpec        (builder or template + rows, validated)
//! 3. Render    spec    →  HTML + JSON      (pure, byte-for-byte deterministic)
//! 4. Upload    bytes   →  Spaces           (JSON, then HTML)
//! 5. Patch     HTML    →  Ghost document   (anchor-matched replacement)
//! ```
//!
//! Rendering is a pure function of the spec, so republishing unchanged data
//! produces identical artifacts and an identical document patch.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`spec`] | Table model: columns, rows, cells, settings, structural validation |
//! | [`normalize`] | Builder traits, construction modes, id and caption defaults |
//! | [`builders`] | Declarative record-row and pivot builders for job files |
//! | [`render`] | Deterministic spec → HTML fragment renderer |
//! | [`envelope`] | Publication header and the JSON envelope |
//! | [`patch`] | Anchored fragment replacement inside a CMS document |
//! | [`source`] | Source-data provider traits, scoped fetch, MySQL implementation |
//! | [`store`] | Artifact store trait, Spaces (S3) and local-directory stores |
//! | [`cms`] | Document store trait and the Ghost Admin API client |
//! | [`job`] | TOML job files, builder registry, job discovery |
//! | [`publish`] | The orchestrator and its error taxonomy |
//! | [`config`] | Credentials and header text from the environment |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Trust the Spec
//!
//! Cell values and row labels are inserted into the markup as given, because
//! builders legitimately emit inline markup (a rate and a transfer speed on
//! two lines, say). Builders escape any text that came from the database; the
//! declarative builders in [`builders`] always do. Attribute values are always
//! escaped by the renderer.
//!
//! ## Validate Before Anything Leaves
//!
//! Every table of a job is built, validated and rendered before the first
//! upload. A broken table never reaches storage, and a page with several
//! tables is published all-or-nothing up to the upload stage.
//!
//! ## Closed Job Files
//!
//! Job files are parsed with `deny_unknown_fields` everywhere and resolved
//! into a [`job::JobLayout`] of either one table or a page of tables, so the
//! orchestrator has a single code path and a misspelled key is a load error.

pub mod builders;
pub mod cms;
pub mod config;
pub mod envelope;
pub mod job;
pub mod normalize;
pub mod output;
pub mod patch;
pub mod publish;
pub mod render;
pub mod source;
pub mod spec;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
