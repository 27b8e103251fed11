//! Declarative table builders.
//!
//! Job files can publish a table without any Rust code by naming one of the
//! builders below. Both read the fetched data as a list of records (JSON
//! objects keyed by column name, as returned by [`crate::source`]).
//!
//! | Builder | Mode | Produces |
//! |---------|------|----------|
//! | [`RecordRows`] | template + rows | one row per record, cells taken from named fields |
//! | [`PivotTable`] | full builder | a row × column matrix of one value field |
//!
//! Record text is HTML-escaped before it becomes a label or a cell value,
//! since the renderer inserts both verbatim.

use crate::normalize::{BuildContext, BuildError, RowBuilder, TableBuilder};
use crate::spec::{
    Align, Axis, Cell, Column, Row, Scalar, Settings, TableSpec, VAlign, WidthMode,
};
use maud::html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

type Record = Map<String, Value>;

fn records(data: &Value) -> Result<Vec<&Record>, BuildError> {
    let items = data
        .as_array()
        .ok_or_else(|| BuildError::Data("Expected fetched data to be a list of records.".into()))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_object().ok_or_else(|| {
                BuildError::Data(format!("Record {} is not an object.", index + 1))
            })
        })
        .collect()
}

fn field<'a>(record: &'a Record, name: &str, index: usize) -> Result<&'a Value, BuildError> {
    record.get(name).ok_or_else(|| {
        BuildError::Data(format!("Record {} has no field \"{name}\".", index + 1))
    })
}

/// Display text of a field, escaped. `null` displays as nothing.
fn display(value: &Value) -> String {
    match Scalar::from_json(value) {
        Some(scalar) => escape(&scalar.to_string()),
        None => String::new(),
    }
}

/// Display text of a field that becomes a row or column label. Labels
/// can't be empty: an empty row label drops the row header cell and an
/// empty column label leaves the column incomplete.
fn label(record: &Record, name: &str, index: usize) -> Result<String, BuildError> {
    let text = display(field(record, name, index)?);
    if text.trim().is_empty() {
        return Err(BuildError::Data(format!(
            "Record {} has an empty \"{name}\"; pivot labels can't be empty.",
            index + 1
        )));
    }
    Ok(text)
}

fn escape(text: &str) -> String {
    html! { (text) }.into_string()
}

/// Sort key of a field: numbers stay numeric, numeric strings (DECIMAL
/// columns) become numbers, `null` sorts as the empty string.
fn sort_key(value: &Value) -> Scalar {
    match value {
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Scalar::from(n),
            _ => Scalar::Text(s.clone()),
        },
        other => Scalar::from_json(other).unwrap_or_else(|| Scalar::Text(String::new())),
    }
}

// ============================================================================
// Record rows
// ============================================================================

/// Row builder mapping each record to one row.
///
/// ```toml
/// [table.rows]
/// label = "program"
/// cells = ["ratio", "speed"]
/// sort = { speed = "speed_hours" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordRows {
    /// Field rendered as the row header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Field per data cell, in column order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<String>,
    /// Cell field → field holding its sort key. Unlisted cells sort by their own field.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sort: BTreeMap<String, String>,
}

impl RecordRows {
    /// Fill in `cells` from the template's column keys when none were listed.
    /// With a label field the first column is the row header and is skipped.
    pub fn for_template(mut self, template: &TableSpec) -> Self {
        if self.cells.is_empty() {
            let skip = usize::from(self.label.is_some());
            self.cells = template
                .columns
                .iter()
                .skip(skip)
                .map(|c| c.key.clone())
                .collect();
        }
        self
    }

    fn row(&self, record: &Record, index: usize) -> Result<Row, BuildError> {
        let cells = self
            .cells
            .iter()
            .map(|name| {
                let value = field(record, name, index)?;
                let sort_source = match self.sort.get(name) {
                    Some(sort_field) => field(record, sort_field, index)?,
                    None => value,
                };
                Ok(Cell::new(display(value)).sorted_by(sort_key(sort_source)))
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        Ok(match &self.label {
            Some(label) => Row::labeled(display(field(record, label, index)?), cells),
            None => Row::new(cells),
        })
    }
}

impl RowBuilder for RecordRows {
    fn rows(&self, data: &Value, _ctx: &BuildContext<'_>) -> Result<Vec<Row>, BuildError> {
        records(data)?
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.row(record, index))
            .collect()
    }
}

// ============================================================================
// Pivot matrix
// ============================================================================

/// Full builder producing a matrix of `value` indexed by distinct `row` and
/// `column` field values.
///
/// Row and column labels are sorted case-insensitively. Missing combinations
/// render as empty cells that sort as `""`. The optional total column counts
/// the filled cells of each row; the optional totals row counts the filled
/// cells of each column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PivotTable {
    /// Field whose distinct values become rows.
    pub row: String,
    /// Field whose distinct values become columns.
    pub column: String,
    /// Field displayed in each cell.
    pub value: String,
    /// Field sorted by instead of `value`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// Header of the row-label column.
    pub row_label: String,
    /// Header of the total column; no total column when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_column: Option<String>,
    /// Label of the totals row; no totals row when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_row: Option<String>,
    /// Replaces the matrix defaults (sortable both ways, reorderable,
    /// compact, max-content width).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
}

/// One filled matrix cell.
struct Entry {
    display: String,
    sort: Scalar,
}

impl PivotTable {
    fn default_settings() -> Settings {
        Settings {
            sortable_columns: true,
            sortable_rows: true,
            reorder: Some(Axis::Both),
            density: Some("compact".to_string()),
            width: Some(WidthMode::MaxContent),
            ..Settings::default()
        }
    }

    fn centered(cell: Cell) -> Cell {
        cell.aligned(Align::Center, VAlign::Middle)
    }

    fn count(n: usize) -> Cell {
        Self::centered(Cell::new(n.to_string()).sorted_by(n))
    }
}

impl TableBuilder for PivotTable {
    fn build(&self, data: &Value, _ctx: &BuildContext<'_>) -> Result<TableSpec, BuildError> {
        let mut matrix: BTreeMap<(String, String), Entry> = BTreeMap::new();
        let mut row_names = BTreeSet::new();
        let mut column_names = BTreeSet::new();

        for (index, record) in records(data)?.into_iter().enumerate() {
            let row = label(record, &self.row, index)?;
            let column = label(record, &self.column, index)?;
            let value = field(record, &self.value, index)?;
            let sort = match &self.sort {
                Some(name) => field(record, name, index)?,
                None => value,
            };
            row_names.insert(row.clone());
            column_names.insert(column.clone());
            matrix.insert(
                (row, column),
                Entry {
                    display: display(value),
                    sort: sort_key(sort),
                },
            );
        }

        let rows_sorted = sort_labels(row_names);
        let columns_sorted = sort_labels(column_names);

        let mut columns = vec![Column::new("label", &self.row_label).unsortable()];
        let mut keys = BTreeSet::from(["label".to_string(), "total".to_string()]);
        columns.extend(columns_sorted.iter().map(|name| {
            let key = unique_key(column_key(name), &mut keys);
            Column::new(key, name).aligned(Align::Center, VAlign::Middle)
        }));
        if let Some(label) = &self.total_column {
            let mut total = Column::new("total", label).aligned(Align::Center, VAlign::Middle);
            total.total = true;
            columns.push(total);
        }

        let mut column_counts = vec![0usize; columns_sorted.len()];
        let mut rows: Vec<Row> = rows_sorted
            .iter()
            .map(|row_name| {
                let mut filled = 0;
                let mut cells: Vec<Cell> = columns_sorted
                    .iter()
                    .enumerate()
                    .map(|(i, column_name)| {
                        match matrix.get(&(row_name.clone(), column_name.clone())) {
                            Some(entry) => {
                                filled += 1;
                                column_counts[i] += 1;
                                Self::centered(
                                    Cell::new(entry.display.as_str()).sorted_by(entry.sort.clone()),
                                )
                            }
                            None => Self::centered(Cell::new("").sorted_by("")),
                        }
                    })
                    .collect();
                if self.total_column.is_some() {
                    cells.push(Self::count(filled));
                }
                let mut row = Row::labeled(row_name, cells);
                row.valign = Some(VAlign::Middle);
                row
            })
            .collect();

        if let Some(label) = &self.total_row {
            let mut cells: Vec<Cell> = column_counts.iter().map(|&n| Self::count(n)).collect();
            if self.total_column.is_some() {
                cells.push(Self::count(matrix.len()));
            }
            let mut row = Row::labeled(label, cells);
            row.total = true;
            row.valign = Some(VAlign::Middle);
            rows.push(row);
        }

        Ok(TableSpec {
            settings: self.settings.clone().unwrap_or_else(Self::default_settings),
            classes: self.classes.clone(),
            ..TableSpec::new(columns, rows)
        })
    }
}

/// Case-insensitive order, ties broken by the exact text so output is stable.
fn sort_labels(labels: BTreeSet<String>) -> Vec<String> {
    let mut labels: Vec<String> = labels.into_iter().collect();
    labels.sort_by_cached_key(|l| (l.to_lowercase(), l.clone()));
    labels
}

/// `"Air Canada Aeroplan"` → `"air-canada-aeroplan"`.
pub fn column_key(label: &str) -> String {
    let mut key = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c.to_ascii_lowercase());
        } else if !key.is_empty() && !key.ends_with('-') {
            key.push('-');
        }
    }
    while key.ends_with('-') {
        key.pop();
    }
    if key.is_empty() {
        key.push_str("column");
    }
    key
}

/// `key`, or `key-2`, `key-3`, ... when already taken.
fn unique_key(key: String, taken: &mut BTreeSet<String>) -> String {
    let mut candidate = key.clone();
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{key}-{n}");
    }
    candidate
}
