//! Table specification model.
//!
//! A [`TableSpec`] is the abstract description of one published table:
//! ordered columns, ordered rows of cells, and table-wide [`Settings`] that
//! drive the client-side enhancement layer (sorting, filtering, heat maps).
//! The same structure is serialized verbatim into the JSON artifact and
//! rendered into HTML by [`crate::render`], so field names follow the JSON
//! contract (`camelCase`, `type`, `figcaption`).
//!
//! ## Shape invariants
//!
//! ```text
//! columns.len() >= 1
//! every row:  cells.len() == columns.len() - (1 if row has a label else 0)
//! sortableRows:            every row carries a non-empty label
//! sortableColumns:         every cell under a sortable column has a sort value
//! ```
//!
//! [`TableSpec::validate`] checks all of them at once and reports the first
//! violation. Unknown keys are rejected when deserializing.
//!
//! ## Values
//!
//! Display content, sort keys, filter values and heat values are all
//! [`Scalar`]s: a JSON boolean, number or string. Numbers are stringified the
//! way a browser would (`2.0` renders as `2`), so attribute values match what
//! the client-side code compares against.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Table class that turns on column sorting in the client layer.
pub const SORT_COLUMNS_CLASS: &str = "table-sort-columns";
/// Table class that turns on row sorting in the client layer.
pub const SORT_ROWS_CLASS: &str = "table-sort-rows";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("Table spec must include a columns array.")]
    MissingColumns,
    #[error("Table spec must include a rows array.")]
    MissingRows,
    #[error("Table spec must include at least one column.")]
    NoColumns,
    #[error("Column {index} is missing required key or label.")]
    IncompleteColumn { index: usize },
    #[error("Row {row} has {actual} cells, expected {expected}.")]
    CellCount {
        row: usize,
        actual: usize,
        expected: usize,
    },
    #[error("Row {row} is missing a label but row sorting is enabled.")]
    MissingRowLabel { row: usize },
    #[error("Missing sort.primary for sortable column \"{column}\" (row {row}).")]
    MissingSortValue { column: String, row: usize },
    #[error("Invalid table spec: {0}")]
    Malformed(String),
}

// ============================================================================
// Scalar values
// ============================================================================

/// A JSON scalar: boolean, number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl Scalar {
    /// Numeric view, if this scalar is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) => f.write_str(&format_number(n)),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Stringify a number the way JavaScript's `String(n)` does: integral
/// floats drop their fraction, and magnitudes from `1e21` up or below `1e-6`
/// switch to exponent form (`1e+21`, `1.5e-7`).
fn format_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(v) if v == 0.0 => "0".to_string(),
        Some(v) if v.abs() >= 1e21 || v.abs() < 1e-6 => {
            let exp = format!("{v:e}");
            match exp.split_once('e') {
                Some((mantissa, power)) if !power.starts_with('-') => {
                    format!("{mantissa}e+{power}")
                }
                _ => exp,
            }
        }
        Some(v) if v.fract() == 0.0 => format!("{v:.0}"),
        Some(v) => v.to_string(),
        None => n.to_string(),
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<usize> for Scalar {
    fn from(value: usize) -> Self {
        Scalar::Number((value as u64).into())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        match Number::from_f64(value) {
            Some(n) => Scalar::Number(n),
            None => Scalar::Text(value.to_string()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl Scalar {
    /// Convert a JSON value into a scalar. Arrays and objects are carried as
    /// their JSON text; `null` has no scalar form.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            Value::String(s) => Some(Scalar::Text(s.clone())),
            other => Some(Scalar::Text(other.to_string())),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Axis selector for reorder/resize behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Columns,
    Rows,
    Both,
}

impl Axis {
    pub fn as_str(self) -> &'static str {
        match self {
            Axis::Columns => "columns",
            Axis::Rows => "rows",
            Axis::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Auto,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidthMode {
    Auto,
    MaxContent,
}

/// Named heat-map color scale, applied as a class on the figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeatmapScheme {
    One,
    Two,
    RedGreen,
}

impl HeatmapScheme {
    pub fn class(self) -> &'static str {
        match self {
            HeatmapScheme::One => "table-heatmap-one",
            HeatmapScheme::Two => "table-heatmap-two",
            HeatmapScheme::RedGreen => "table-heatmap-red-green",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterSettings {
    pub enabled: bool,
    pub search: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeatmapSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<HeatmapScheme>,
    /// Heat scope hint for the client layer (e.g. `"column"`, `"table"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Table-wide behavior flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    #[serde(skip_serializing_if = "is_false")]
    pub sortable_columns: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub sortable_rows: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reorder: Option<Axis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<Axis>,
    /// Row density keyword (`compact`, `comfortable`, ...), emitted as a class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<WidthMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<HeatmapSettings>,
}

impl Settings {
    fn is_default(&self) -> bool {
        *self == Settings::default()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ============================================================================
// Decoration shared by columns, rows and cells
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    pub fn as_str(self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    Middle,
    Bottom,
}

impl VAlign {
    pub fn as_str(self) -> &'static str {
        match self {
            VAlign::Top => "top",
            VAlign::Middle => "middle",
            VAlign::Bottom => "bottom",
        }
    }
}

/// Preferred/min/max CSS lengths, emitted as custom properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Extent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

/// Client-side formatting hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Format {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<Scalar>,
}

/// Figure-level decoration around the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Figure {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Scalar>,
}

// ============================================================================
// Columns
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnSort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ColumnFilter {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub default_hidden: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Column {
    /// Stable key, emitted as `data-col-key`.
    pub key: String,
    /// Header text. Inline markup is passed through.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<ColumnSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<Align>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valign: Option<VAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<Extent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ColumnFilter>,
    /// Marks a computed total column.
    #[serde(skip_serializing_if = "is_false")]
    pub total: bool,
    /// Marks a column of multi-value cells.
    #[serde(skip_serializing_if = "is_false")]
    pub distribution: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Scalar>,
}

impl Column {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            ..Self::default()
        }
    }

    /// Columns sort unless explicitly disabled.
    pub fn is_sortable(&self) -> bool {
        self.sort.as_ref().and_then(|s| s.enabled).unwrap_or(true)
    }

    pub fn unsortable(mut self) -> Self {
        self.sort = Some(ColumnSort {
            enabled: Some(false),
        });
        self
    }

    pub fn aligned(mut self, align: Align, valign: VAlign) -> Self {
        self.align = Some(align);
        self.valign = Some(valign);
        self
    }
}

// ============================================================================
// Rows and cells
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CellSort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CellFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Scalar>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub skip: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Heat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Distribution {
    pub values: Vec<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Cell {
    /// Pre-formatted display content; inserted into the markup unescaped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<CellSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<CellFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat: Option<Heat>,
    /// When present, replaces `value` with the joined list of its members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    /// Unformatted source value for client-side reformatting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<Align>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valign: Option<VAlign>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Scalar>,
}

impl Cell {
    pub fn new(value: impl Into<Scalar>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Set the primary sort key.
    pub fn sorted_by(mut self, primary: impl Into<Scalar>) -> Self {
        self.sort.get_or_insert_with(CellSort::default).primary = Some(primary.into());
        self
    }

    /// Set the tie-breaking sort key.
    pub fn then_by(mut self, secondary: impl Into<Scalar>) -> Self {
        self.sort.get_or_insert_with(CellSort::default).secondary = Some(secondary.into());
        self
    }

    pub fn aligned(mut self, align: Align, valign: VAlign) -> Self {
        self.align = Some(align);
        self.valign = Some(valign);
        self
    }

    /// A sort value is usable when declared explicitly or pre-set as an attribute.
    pub fn has_sort_value(&self) -> bool {
        self.sort.as_ref().is_some_and(|s| s.primary.is_some())
            || self.attributes.contains_key("data-sort-value")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Row {
    /// Row header content. A non-empty label consumes the first column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub cells: Vec<Cell>,
    /// Marks a totals row.
    #[serde(skip_serializing_if = "is_false")]
    pub total: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<Align>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valign: Option<VAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<Extent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Scalar>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self {
            cells,
            ..Self::default()
        }
    }

    pub fn labeled(label: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            label: Some(label.into()),
            cells,
            ..Self::default()
        }
    }

    /// The non-empty row label, if any.
    pub fn header(&self) -> Option<&str> {
        self.label.as_deref().filter(|l| !l.is_empty())
    }

    pub fn has_label(&self) -> bool {
        self.header().is_some()
    }
}

// ============================================================================
// TableSpec
// ============================================================================

/// The root description of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TableSpec {
    /// Storage key component and document patch anchor.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Settings::is_default")]
    pub settings: Settings,
    /// Caption text. `caption` is accepted as an input alias.
    #[serde(default, alias = "caption", skip_serializing_if = "Option::is_none")]
    pub figcaption: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figure: Option<Figure>,
}

impl TableSpec {
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            ..Self::default()
        }
    }

    /// Load a spec from JSON. Accepts either the spec itself or the
    /// `{ "table": ... }` contents wrapper used by the JSON artifact.
    pub fn from_value(value: Value) -> Result<TableSpec, SpecError> {
        let value = match value {
            Value::Object(mut map) if !map.contains_key("columns") && map.contains_key("table") => {
                map.remove("table").unwrap_or(Value::Null)
            }
            other => other,
        };
        if !value.get("columns").is_some_and(Value::is_array) {
            return Err(SpecError::MissingColumns);
        }
        if !value.get("rows").is_some_and(Value::is_array) {
            return Err(SpecError::MissingRows);
        }
        serde_json::from_value(value).map_err(|e| SpecError::Malformed(e.to_string()))
    }

    pub fn from_json_str(json: &str) -> Result<TableSpec, SpecError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| SpecError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Column sorting is on via settings or a caller-supplied table class.
    pub fn sorts_columns(&self) -> bool {
        self.settings.sortable_columns || self.classes.iter().any(|c| c == SORT_COLUMNS_CLASS)
    }

    /// Row sorting is on via settings or a caller-supplied table class.
    pub fn sorts_rows(&self) -> bool {
        self.settings.sortable_rows || self.classes.iter().any(|c| c == SORT_ROWS_CLASS)
    }

    /// Check every structural invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.columns.is_empty() {
            return Err(SpecError::NoColumns);
        }
        for (index, column) in self.columns.iter().enumerate() {
            if column.key.is_empty() || column.label.is_empty() {
                return Err(SpecError::IncompleteColumn { index: index + 1 });
            }
        }

        for (index, row) in self.rows.iter().enumerate() {
            let expected = self.columns.len() - usize::from(row.has_label());
            if row.cells.len() != expected {
                return Err(SpecError::CellCount {
                    row: index + 1,
                    actual: row.cells.len(),
                    expected,
                });
            }
        }

        if self.sorts_rows() {
            if let Some(index) = self.rows.iter().position(|r| !r.has_label()) {
                return Err(SpecError::MissingRowLabel { row: index + 1 });
            }
        }

        if self.sorts_columns() {
            for (index, row) in self.rows.iter().enumerate() {
                let offset = usize::from(row.has_label());
                for (cell, column) in row.cells.iter().zip(&self.columns[offset..]) {
                    if column.is_sortable() && !cell.has_sort_value() {
                        return Err(SpecError::MissingSortValue {
                            column: column.key.clone(),
                            row: index + 1,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
