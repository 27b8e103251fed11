//! Publication header and JSON envelope.
//!
//! Every publish run builds one [`Header`] and shares it across all tables:
//! it goes into each JSON artifact and feeds caption placeholders.
//!
//! ```json
//! {
//!   "header": {
//!     "author": "…",
//!     "disclosure": "…",
//!     "license_url": "…",
//!     "published": "January 1, 2025 at 09:00",
//!     "generated_at": "2025-01-01T14:00:00.000Z"
//!   },
//!   "contents": { "table": { "columns": [], "rows": [] } }
//! }
//! ```
//!
//! `published` is wall-clock time in New York; `generated_at` is UTC with
//! millisecond precision.

use crate::config::HeaderConfig;
use crate::spec::TableSpec;
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub author: String,
    pub disclosure: String,
    pub license_url: String,
    /// Human-readable Eastern time, e.g. `January 1, 2025 at 09:00`.
    pub published: String,
    /// ISO-8601 UTC timestamp.
    pub generated_at: String,
}

impl Header {
    /// Stamp the configured header text with the given instant.
    pub fn at(config: &HeaderConfig, now: DateTime<Utc>) -> Self {
        Self {
            author: config.author.clone(),
            disclosure: config.disclosure.clone(),
            license_url: config.license_url.clone(),
            published: format_published(now),
            generated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// `January 1, 2025 at 09:00` in America/New_York.
pub fn format_published(now: DateTime<Utc>) -> String {
    now.with_timezone(&New_York)
        .format("%B %-d, %Y at %H:%M")
        .to_string()
}

/// The published JSON document for one table.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub header: &'a Header,
    pub contents: Contents<'a>,
}

#[derive(Debug, Serialize)]
pub struct Contents<'a> {
    pub table: &'a TableSpec,
}

impl<'a> Envelope<'a> {
    pub fn new(header: &'a Header, table: &'a TableSpec) -> Self {
        Self {
            header,
            contents: Contents { table },
        }
    }

    /// Compact JSON bytes, as uploaded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
