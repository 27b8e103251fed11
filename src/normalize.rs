//! Table spec normalization.
//!
//! Turns fetched data into a finished [`TableSpec`] using one of two
//! construction modes:
//!
//! | Mode | Inputs | Result |
//! |------|--------|--------|
//! | Builder | a [`TableBuilder`] | whatever the builder returns |
//! | Template | a template spec + a [`RowBuilder`] | template with its rows replaced |
//!
//! A builder takes precedence when both are configured. After construction the
//! spec gets its defaults filled in and is validated:
//!
//! 1. `id` falls back to the context's table id and must end up non-empty.
//! 2. The caption is resolved: a caption function wins, otherwise the
//!    `{{published}}` / `{{generated_at}}` placeholders in the caption string
//!    are substituted, otherwise `Last updated {published} ET` is used.
//! 3. [`TableSpec::validate`] runs, so an invalid spec never leaves this module.

use crate::envelope::Header;
use crate::spec::{Row, SpecError, TableSpec};
use regex::{NoExpand, Regex};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

static GENERATED_AT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*generated_at\s*\}\}").expect("valid regex"));
static PUBLISHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*published\s*\}\}").expect("valid regex"));

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Table builder requires a builder or a table template with a row builder.")]
    NoConstruction,
    #[error("Table spec has no id and no default id was provided.")]
    MissingId,
    #[error("{0}")]
    Data(String),
    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// What a builder sees besides the data.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub header: &'a Header,
    /// Default id for specs that don't set one.
    pub table_id: &'a str,
}

/// Builds a whole table from fetched data.
pub trait TableBuilder: Send + Sync {
    fn build(&self, data: &Value, ctx: &BuildContext<'_>) -> Result<TableSpec, BuildError>;
}

/// Builds only the rows; columns and settings come from a template.
pub trait RowBuilder: Send + Sync {
    fn rows(&self, data: &Value, ctx: &BuildContext<'_>) -> Result<Vec<Row>, BuildError>;
}

/// Computes a caption from the run header, used verbatim.
pub type CaptionFn = Arc<dyn Fn(&Header) -> String + Send + Sync>;

/// Adapter so plain functions can serve as table builders.
pub struct FnTableBuilder<F>(pub F);

impl<F> FnTableBuilder<F>
where
    F: Fn(&Value, &BuildContext<'_>) -> Result<TableSpec, BuildError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> TableBuilder for FnTableBuilder<F>
where
    F: Fn(&Value, &BuildContext<'_>) -> Result<TableSpec, BuildError> + Send + Sync,
{
    fn build(&self, data: &Value, ctx: &BuildContext<'_>) -> Result<TableSpec, BuildError> {
        (self.0)(data, ctx)
    }
}

/// Adapter so plain functions can serve as row builders.
pub struct FnRowBuilder<F>(pub F);

impl<F> FnRowBuilder<F>
where
    F: Fn(&Value, &BuildContext<'_>) -> Result<Vec<Row>, BuildError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> RowBuilder for FnRowBuilder<F>
where
    F: Fn(&Value, &BuildContext<'_>) -> Result<Vec<Row>, BuildError> + Send + Sync,
{
    fn rows(&self, data: &Value, ctx: &BuildContext<'_>) -> Result<Vec<Row>, BuildError> {
        (self.0)(data, ctx)
    }
}

/// Everything needed to construct one table.
#[derive(Clone, Default)]
pub struct TableDefinition {
    pub builder: Option<Arc<dyn TableBuilder>>,
    pub template: Option<TableSpec>,
    pub rows: Option<Arc<dyn RowBuilder>>,
    pub caption: Option<CaptionFn>,
}

impl fmt::Debug for TableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDefinition")
            .field("builder", &self.builder.is_some())
            .field("template", &self.template)
            .field("rows", &self.rows.is_some())
            .field("caption", &self.caption.is_some())
            .finish()
    }
}

impl TableDefinition {
    pub fn from_builder(builder: Arc<dyn TableBuilder>) -> Self {
        Self {
            builder: Some(builder),
            ..Self::default()
        }
    }

    pub fn from_template(template: TableSpec, rows: Arc<dyn RowBuilder>) -> Self {
        Self {
            template: Some(template),
            rows: Some(rows),
            ..Self::default()
        }
    }

    pub fn with_caption(mut self, caption: CaptionFn) -> Self {
        self.caption = Some(caption);
        self
    }

    /// True when at least one construction mode is complete.
    pub fn is_constructible(&self) -> bool {
        self.builder.is_some() || (self.template.is_some() && self.rows.is_some())
    }

    /// Construct, default, and validate the table for this run.
    pub fn build(&self, data: &Value, ctx: &BuildContext<'_>) -> Result<TableSpec, BuildError> {
        let mut spec = match (&self.builder, &self.template, &self.rows) {
            (Some(builder), _, _) => builder.build(data, ctx)?,
            (None, Some(template), Some(rows)) => TableSpec {
                rows: rows.rows(data, ctx)?,
                ..template.clone()
            },
            _ => return Err(BuildError::NoConstruction),
        };

        if spec.id.is_empty() {
            spec.id = ctx.table_id.to_string();
        }
        if spec.id.is_empty() {
            return Err(BuildError::MissingId);
        }

        let caption = match &self.caption {
            Some(caption) => caption(ctx.header),
            None => spec
                .figcaption
                .as_deref()
                .map(|template| resolve_caption(template, ctx.header))
                .unwrap_or_default(),
        };
        spec.figcaption = Some(if caption.is_empty() {
            default_caption(ctx.header)
        } else {
            caption
        });

        spec.validate()?;
        Ok(spec)
    }
}

/// Substitute `{{generated_at}}` and `{{published}}` (whitespace inside the
/// braces allowed).
pub fn resolve_caption(template: &str, header: &Header) -> String {
    let with_iso = GENERATED_AT.replace_all(template, NoExpand(&header.generated_at));
    PUBLISHED
        .replace_all(&with_iso, NoExpand(&header.published))
        .into_owned()
}

pub fn default_caption(header: &Header) -> String {
    format!("Last updated {} ET", header.published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Cell, Column};
    use serde_json::json;

    fn header() -> Header {
        Header {
            author: "A".to_string(),
            disclosure: "D".to_string(),
            license_url: "L".to_string(),
            published: "January 1, 2025 at 09:00".to_string(),
            generated_at: "2025-01-01T14:00:00.000Z".to_string(),
        }
    }

    fn template() -> TableSpec {
        TableSpec::new(vec![Column::new("name", "Name")], vec![])
    }

    fn name_rows() -> Arc<dyn RowBuilder> {
        Arc::new(FnRowBuilder::new(|data, _ctx| {
            let rows = data
                .as_array()
                .ok_or_else(|| BuildError::Data("expected an array".to_string()))?;
            Ok(rows
                .iter()
                .map(|r| Row::new(vec![Cell::new(r["name"].as_str().unwrap_or_default())]))
                .collect())
        }))
    }

    // =========================================================================
    // Captions
    // =========================================================================

    #[test]
    fn caption_published_placeholder() {
        assert_eq!(
            resolve_caption("Last updated {{published}} ET", &header()),
            "Last updated January 1, 2025 at 09:00 ET"
        );
    }

    #[test]
    fn caption_generated_at_placeholder_with_spaces() {
        assert_eq!(
            resolve_caption("As of {{ generated_at }}", &header()),
            "As of 2025-01-01T14:00:00.000Z"
        );
    }

    #[test]
    fn caption_replacement_is_literal() {
        let mut h = header();
        h.published = "$1 and ${x}".to_string();
        assert_eq!(resolve_caption("{{published}}", &h), "$1 and ${x}");
    }

    // =========================================================================
    // Construction modes
    // =========================================================================

    #[test]
    fn template_mode_replaces_rows_and_defaults() {
        let h = header();
        let ctx = BuildContext {
            header: &h,
            table_id: "cards",
        };
        let def = TableDefinition::from_template(template(), name_rows());
        let spec = def.build(&json!([{ "name": "x" }, { "name": "y" }]), &ctx).unwrap();
        assert_eq!(spec.id, "cards");
        assert_eq!(spec.rows.len(), 2);
        assert_eq!(
            spec.figcaption.as_deref(),
            Some("Last updated January 1, 2025 at 09:00 ET")
        );
    }

    #[test]
    fn builder_wins_over_template() {
        let h = header();
        let ctx = BuildContext {
            header: &h,
            table_id: "fallback",
        };
        let builder = Arc::new(FnTableBuilder::new(|_, _| {
            let mut spec = TableSpec::new(vec![Column::new("b", "B")], vec![]);
            spec.id = "own".to_string();
            spec.figcaption = Some("At {{published}}".to_string());
            Ok(spec)
        }));
        let def = TableDefinition {
            builder: Some(builder),
            template: Some(template()),
            rows: Some(name_rows()),
            caption: None,
        };
        let spec = def.build(&json!([]), &ctx).unwrap();
        assert_eq!(spec.id, "own");
        assert_eq!(spec.columns[0].key, "b");
        assert_eq!(
            spec.figcaption.as_deref(),
            Some("At January 1, 2025 at 09:00")
        );
    }

    #[test]
    fn caption_function_is_used_verbatim() {
        let h = header();
        let ctx = BuildContext {
            header: &h,
            table_id: "t",
        };
        let mut tpl = template();
        tpl.figcaption = Some("ignored {{published}}".to_string());
        let def = TableDefinition::from_template(tpl, name_rows())
            .with_caption(Arc::new(|h: &Header| format!("Data as of {{{{published}}}} {}", h.author)));
        let spec = def.build(&json!([]), &ctx).unwrap();
        assert_eq!(spec.figcaption.as_deref(), Some("Data as of {{published}} A"));
    }

    #[test]
    fn missing_construction_mode_fails() {
        let h = header();
        let ctx = BuildContext {
            header: &h,
            table_id: "t",
        };
        let def = TableDefinition {
            template: Some(template()),
            ..TableDefinition::default()
        };
        assert_eq!(
            def.build(&json!([]), &ctx).unwrap_err(),
            BuildError::NoConstruction
        );
    }

    #[test]
    fn empty_id_everywhere_fails() {
        let h = header();
        let ctx = BuildContext {
            header: &h,
            table_id: "",
        };
        let def = TableDefinition::from_template(template(), name_rows());
        assert_eq!(
            def.build(&json!([]), &ctx).unwrap_err(),
            BuildError::MissingId
        );
    }

    #[test]
    fn builder_json_without_rows_fails() {
        let h = header();
        let ctx = BuildContext {
            header: &h,
            table_id: "t",
        };
        let def = TableDefinition::from_builder(Arc::new(FnTableBuilder::new(|_, _| {
            Ok(TableSpec::from_value(json!({ "columns": [] }))?)
        })));
        assert_eq!(
            def.build(&json!(null), &ctx).unwrap_err(),
            BuildError::Spec(SpecError::MissingRows)
        );
    }

    #[test]
    fn built_spec_is_validated() {
        let h = header();
        let ctx = BuildContext {
            header: &h,
            table_id: "t",
        };
        let mut tpl = template();
        tpl.settings.sortable_rows = true;
        let def = TableDefinition::from_template(tpl, name_rows());
        let err = def.build(&json!([{ "name": "x" }]), &ctx).unwrap_err();
        assert_eq!(err, BuildError::Spec(SpecError::MissingRowLabel { row: 1 }));
    }
}
