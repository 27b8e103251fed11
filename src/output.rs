//! CLI output formatting.
//!
//! Output is organized by job, the unit an operator schedules and reruns.
//! Each job is a header line (positional index + name) followed by indented
//! context lines for its tables, uploads and document patch.
//!
//! # Output Format
//!
//! ## List / Check
//!
//! ```text
//! 001 card_matrix (2 tables)
//!     Source: query
//!     Table: cards-hotels → public tables/hotels.json, tables/hotels.html
//!     Table: cards-airlines → public tables/airlines.json, tables/airlines.html
//!     Patch: page slug "card-matrix"
//! 002 transfer_partners (1 table, not in run-all)
//!     Source: fetcher transfer_partners
//!     Table: transfer-partners → private tables/partners.json, tables/partners.html
//! ```
//!
//! ## Run
//!
//! ```text
//! transfer_partners
//!     transfer-partners
//!         JSON: s3://tables/tables/partners.json (2,144 bytes)
//!         HTML: s3://tables/tables/partners.html (9,870 bytes)
//!         sha256: 3f2a9c01d4e7
//!     Patched page slug "transfer-partners" (1 table)
//!
//! Published 1 job
//! ```
//!
//! Failures print the job, stage and category, then the cause:
//!
//! ```text
//! transfer_partners failed at build (validation)
//!     Row 3 has 2 cells, expected 3.
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout or stderr.
//! Format functions are pure.

use crate::job::{Job, Source};
use crate::publish::{PublishError, PublishReport};

/// Characters of the HTML digest shown.
const DIGEST_PREFIX: usize = 12;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

/// `1234567` → `1,234,567`.
fn grouped(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Job inventory
// ============================================================================

pub fn format_job_list(jobs: &[Job]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, job) in jobs.iter().enumerate() {
        let tables = job.layout.tables();
        let mut detail = plural(tables.len(), "table", "tables");
        if !job.include_in_all {
            detail.push_str(", not in run-all");
        }
        lines.push(format!("{} {} ({detail})", format_index(i + 1), job.name));

        let source = match &job.source {
            Source::Query(_) => "query".to_string(),
            Source::Fetcher { name, .. } => format!("fetcher {name}"),
        };
        lines.push(format!("{}Source: {source}", indent(1)));

        for table in tables {
            let output = &table.output;
            let bucket = output
                .bucket
                .as_deref()
                .map(|b| format!(" ({b})"))
                .unwrap_or_default();
            lines.push(format!(
                "{}Table: {} → {}{bucket} {}, {}",
                indent(1),
                table.id,
                output.scope,
                output.json_key,
                output.html_key
            ));
        }
        if let Some(target) = &job.patch {
            lines.push(format!(
                "{}Patch: {} {}",
                indent(1),
                target.content_type,
                target.identifier
            ));
        }
    }
    lines
}

pub fn print_job_list(jobs: &[Job]) {
    for line in format_job_list(jobs) {
        println!("{}", line);
    }
}

// ============================================================================
// Publish results
// ============================================================================

pub fn format_report(report: &PublishReport) -> Vec<String> {
    let mut lines = vec![report.job.clone()];
    for table in &report.tables {
        lines.push(format!("{}{}", indent(1), table.id));
        lines.push(format!(
            "{}JSON: {} ({} bytes)",
            indent(2),
            table.json.location,
            grouped(table.json.bytes)
        ));
        lines.push(format!(
            "{}HTML: {} ({} bytes)",
            indent(2),
            table.html.location,
            grouped(table.html.bytes)
        ));
        let short = table.digest.get(..DIGEST_PREFIX).unwrap_or(&table.digest);
        lines.push(format!("{}sha256: {short}", indent(2)));
    }
    if let Some(patch) = &report.patched {
        lines.push(format!(
            "{}Patched {} {} ({})",
            indent(1),
            patch.target.content_type,
            patch.target.identifier,
            plural(patch.tables, "table", "tables")
        ));
    }
    lines
}

pub fn format_failure(err: &PublishError) -> Vec<String> {
    let mut header = format!("{} failed at {}", err.job, err.stage);
    if let Some(table) = &err.table {
        header.push_str(&format!(" of table {table}"));
    }
    header.push_str(&format!(" ({})", err.category()));
    vec![header, format!("{}{}", indent(1), err.failure)]
}

pub fn format_summary(outcomes: &[Result<PublishReport, PublishError>]) -> String {
    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    let published = outcomes.len() - failed;
    let mut summary = format!("Published {}", plural(published, "job", "jobs"));
    if failed > 0 {
        summary.push_str(&format!(", {failed} failed"));
    }
    summary
}

/// Reports go to stdout, failures to stderr.
pub fn print_outcomes(outcomes: &[Result<PublishReport, PublishError>]) {
    for outcome in outcomes {
        match outcome {
            Ok(report) => {
                for line in format_report(report) {
                    println!("{}", line);
                }
            }
            Err(err) => {
                for line in format_failure(err) {
                    eprintln!("{}", line);
                }
            }
        }
    }
    println!();
    println!("{}", format_summary(outcomes));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::{ContentType, Identifier};
    use crate::job::{JobFile, Registry};
    use crate::normalize::BuildError;
    use crate::patch::PatchTarget;
    use crate::publish::{Failure, PatchSummary, PublishedTable, Stage};
    use crate::spec::SpecError;
    use crate::store::PutReceipt;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn grouped_inserts_commas() {
        assert_eq!(grouped(0), "0");
        assert_eq!(grouped(999), "999");
        assert_eq!(grouped(1000), "1,000");
        assert_eq!(grouped(1234567), "1,234,567");
    }

    // =========================================================================
    // Job list
    // =========================================================================

    #[test]
    fn job_list_shows_tables_and_patch() {
        let job = toml::from_str::<JobFile>(
            r#"
name = "matrix"
include_in_all = false
[source]
query = "SELECT 1"
[output]
space = "private"
bucket = "archive"
[ghost]
type = "post"
slug = "hotels"
[table]
id = "hotels"
json_key = "t/hotels.json"
html_key = "t/hotels.html"
pivot = { row = "r", column = "c", value = "v", row_label = "R" }
"#,
        )
        .unwrap()
        .resolve(&Registry::default())
        .unwrap();

        assert_eq!(
            format_job_list(&[job]),
            vec![
                "001 matrix (1 table, not in run-all)",
                "    Source: query",
                "    Table: hotels → private (archive) t/hotels.json, t/hotels.html",
                "    Patch: post slug \"hotels\"",
            ]
        );
    }

    // =========================================================================
    // Reports
    // =========================================================================

    fn report() -> PublishReport {
        PublishReport {
            job: "rates".to_string(),
            tables: vec![PublishedTable {
                id: "rates".to_string(),
                json: PutReceipt {
                    location: "s3://tables/rates.json".to_string(),
                    bytes: 2144,
                },
                html: PutReceipt {
                    location: "s3://tables/rates.html".to_string(),
                    bytes: 987,
                },
                digest: "3f2a9c01d4e7b8a6".to_string(),
            }],
            patched: Some(PatchSummary {
                target: PatchTarget {
                    content_type: ContentType::Pages,
                    identifier: Identifier::Slug("rates".to_string()),
                },
                document_id: "p1".to_string(),
                updated_at: "2025-01-01T14:00:01.000Z".to_string(),
                tables: 1,
            }),
        }
    }

    #[test]
    fn report_lists_uploads_and_patch() {
        assert_eq!(
            format_report(&report()),
            vec![
                "rates",
                "    rates",
                "        JSON: s3://tables/rates.json (2,144 bytes)",
                "        HTML: s3://tables/rates.html (987 bytes)",
                "        sha256: 3f2a9c01d4e7",
                "    Patched page slug \"rates\" (1 table)",
            ]
        );
    }

    #[test]
    fn failure_shows_stage_and_category() {
        let err = PublishError {
            job: "rates".to_string(),
            stage: Stage::Build,
            table: Some("rates".to_string()),
            failure: Failure::Build(BuildError::Spec(SpecError::CellCount {
                row: 3,
                actual: 2,
                expected: 3,
            })),
        };
        assert_eq!(
            format_failure(&err),
            vec![
                "rates failed at build of table rates (validation)",
                "    Row 3 has 2 cells, expected 3.",
            ]
        );
    }

    #[test]
    fn summary_counts_failures() {
        let failed = Err(PublishError {
            job: "x".to_string(),
            stage: Stage::Preflight,
            table: None,
            failure: Failure::Configuration("nope".to_string()),
        });
        assert_eq!(format_summary(&[Ok(report())]), "Published 1 job");
        assert_eq!(
            format_summary(&[Ok(report()), Ok(report()), failed]),
            "Published 2 jobs, 1 failed"
        );
    }
}
