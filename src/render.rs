//! Deterministic table markup.
//!
//! Turns a validated [`TableSpec`] into the HTML fragment that gets uploaded
//! and spliced into documents. The output carries every piece of metadata the
//! client-side enhancement layer needs (sort keys, filter values, heat values,
//! format hints) as classes and `data-*` attributes, so the browser never has
//! to fetch the JSON artifact to sort or filter.
//!
//! ## Fragment Structure
//!
//! ```text
//! <figure class="rp-table …" data-rp-table-id="{id}">
//!   <div class="rp-table__card">
//!     <div class="rp-table__scroll">
//!       <table class="table-sort-columns …">
//!         <thead>
//!           <tr>
//!             <th class="…" data-col-key="{key}">{label}</th>
//!           </tr>
//!         </thead>
//!         <tbody>
//!           <tr><th scope="row">{label}</th><td data-sort-value="…">{value}</td></tr>
//!         </tbody>
//!       </table>
//!     </div>
//!   </div>
//!   <figcaption>{caption}</figcaption>
//! </figure>
//! ```
//!
//! ## Determinism
//!
//! The same spec always yields byte-identical output: classes keep insertion
//! order (caller classes first, derived classes after, duplicates dropped),
//! attributes likewise, and nothing depends on time or hashing. Document
//! patching and artifact caching both rely on this.
//!
//! ## Escaping
//!
//! Attribute values and inline style text are escaped. Text content (labels,
//! captions, cell values) is inserted as-is: builders hand the renderer
//! pre-formatted markup such as two-line row headers, and are responsible for
//! escaping anything externally sourced.

use crate::spec::{
    Cell, Column, Extent, Format, Row, SORT_COLUMNS_CLASS, SORT_ROWS_CLASS, Scalar, SpecError,
    TableSpec,
};
use maud::{DOCTYPE, Markup, PreEscaped, Render, html};
use std::collections::BTreeMap;
use thiserror::Error;

/// Class always present on the figure.
pub const FIGURE_CLASS: &str = "rp-table";
/// Figure attribute that anchors document patching.
pub const ANCHOR_ATTR: &str = "data-rp-table-id";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("{0}")]
    Invalid(#[from] SpecError),
}

/// Render a table spec to its HTML fragment.
///
/// Validation runs first; a failure produces no output at all.
pub fn render_table(spec: &TableSpec) -> Result<Markup, RenderError> {
    spec.validate()?;

    let (table, figure) = table_decor(spec);
    let sort_columns = spec.sorts_columns();
    let sort_rows = spec.sorts_rows();

    let mut lines: Vec<String> = Vec::with_capacity(spec.rows.len() + spec.columns.len() + 16);
    lines.push(format!("{}>", figure.open("figure", None)));
    lines.push("  <div class=\"rp-table__card\">".to_string());
    lines.push("    <div class=\"rp-table__scroll\">".to_string());
    lines.push(format!("      {}>", table.open("table", None)));
    lines.push("        <thead>".to_string());
    lines.push("          <tr>".to_string());
    for column in &spec.columns {
        lines.push(format!("            {}", column_header(column)));
    }
    lines.push("          </tr>".to_string());
    lines.push("        </thead>".to_string());
    lines.push("        <tbody>".to_string());
    for row in &spec.rows {
        lines.push(format!(
            "          {}",
            table_row(row, &spec.columns, sort_columns, sort_rows)
        ));
    }
    lines.push("        </tbody>".to_string());
    lines.push("      </table>".to_string());
    lines.push("    </div>".to_string());
    lines.push("  </div>".to_string());
    if let Some(caption) = spec.figcaption.as_deref().filter(|c| !c.is_empty()) {
        lines.push(format!("  <figcaption>{caption}</figcaption>"));
    }
    lines.push("</figure>".to_string());

    Ok(PreEscaped(lines.join("\n")))
}

/// Wrap a rendered fragment in a standalone page for local previewing.
pub fn preview_page(title: &str, fragment: &Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
            }
            body {
                main { (fragment) }
            }
        }
    }
}

// ============================================================================
// Decoration: ordered classes, attributes and style variables
// ============================================================================

/// Class list, attribute list and style declarations for one element.
///
/// Insertion order is preserved so output is stable; `set` overwrites in
/// place, `set_default` only fills a missing key.
#[derive(Debug, Default)]
struct Decor {
    classes: Vec<String>,
    attributes: Vec<(String, String)>,
    styles: Vec<(&'static str, String)>,
}

impl Decor {
    fn from_parts(classes: &[String], attributes: &BTreeMap<String, Scalar>) -> Self {
        let mut decor = Decor::default();
        for class in classes {
            decor.class(class.as_str());
        }
        for (key, value) in attributes {
            decor.set(key, value.to_string());
        }
        decor
    }

    fn class(&mut self, class: impl Into<String>) {
        let class = class.into();
        if !class.is_empty() && !self.classes.contains(&class) {
            self.classes.push(class);
        }
    }

    fn has(&self, key: &str) -> bool {
        self.attributes.iter().any(|(k, _)| k == key)
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    fn set_default(&mut self, key: &str, value: impl Into<String>) {
        if !self.has(key) {
            self.attributes.push((key.to_string(), value.into()));
        }
    }

    fn style(&mut self, property: &'static str, value: &str) {
        if !value.is_empty() {
            self.styles.push((property, value.to_string()));
        }
    }

    /// Opening tag without the closing `>`, so callers can finish it.
    fn open(&self, tag: &str, scope: Option<&str>) -> String {
        let mut out = format!("<{tag}");
        if let Some(scope) = scope {
            out.push_str(" scope=\"");
            scope.render_to(&mut out);
            out.push('"');
        }
        if !self.classes.is_empty() {
            out.push_str(" class=\"");
            self.classes.join(" ").render_to(&mut out);
            out.push('"');
        }
        if !self.styles.is_empty() {
            let style = self
                .styles
                .iter()
                .map(|(property, value)| format!("{property}: {value}"))
                .collect::<Vec<_>>()
                .join("; ");
            out.push_str(" style=\"");
            style.render_to(&mut out);
            out.push('"');
        }
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            value.render_to(&mut out);
            out.push('"');
        }
        out
    }

    fn element(&self, tag: &str, scope: Option<&str>, content: &str) -> String {
        format!("{}>{content}</{tag}>", self.open(tag, scope))
    }

    fn format_hints(&mut self, format: Option<&Format>, prefix: &str) {
        let Some(format) = format else { return };
        let Some(kind) = format.kind.as_deref().filter(|k| !k.is_empty()) else {
            return;
        };
        self.class(format!("{prefix}-format-{kind}"));
        if let Some(decimals) = &format.decimals {
            self.set_default("data-format-decimals", decimals.to_string());
        }
        if let Some(round) = &format.round {
            self.set_default("data-format-round", round.to_string());
        }
    }
}

// ============================================================================
// Table and figure
// ============================================================================

fn table_decor(spec: &TableSpec) -> (Decor, Decor) {
    let mut table = Decor::from_parts(&spec.classes, &spec.attributes);
    let mut figure = match &spec.figure {
        Some(f) => {
            let mut classes = vec![FIGURE_CLASS.to_string()];
            classes.extend(f.classes.iter().cloned());
            Decor::from_parts(&classes, &f.attributes)
        }
        None => Decor::from_parts(&[FIGURE_CLASS.to_string()], &BTreeMap::new()),
    };

    if !spec.id.is_empty() {
        figure.set_default(ANCHOR_ATTR, spec.id.as_str());
    }

    let settings = &spec.settings;
    if settings.sortable_columns {
        table.class(SORT_COLUMNS_CLASS);
    }
    if settings.sortable_rows {
        table.class(SORT_ROWS_CLASS);
    }
    if let Some(axis) = settings.reorder {
        table.class(format!("table-reorder-{}", axis.as_str()));
    }
    if let Some(axis) = settings.resize {
        table.class(format!("table-resize-{}", axis.as_str()));
    }
    if let Some(density) = settings.density.as_deref().filter(|d| !d.is_empty()) {
        table.class(format!("table-density-{density}"));
    }
    if settings.layout == Some(crate::spec::Layout::Fixed) {
        table.class("table-layout-fixed");
    }
    if settings.width == Some(crate::spec::WidthMode::MaxContent) {
        table.class("table-width-max-content");
    }
    if let Some(filters) = &settings.filters {
        if filters.enabled {
            table.class("table-filters");
        }
        if filters.search {
            table.set_default("data-rp-search", "1");
        }
    }
    if let Some(heatmap) = &settings.heatmap {
        if let Some(scheme) = heatmap.scheme {
            figure.class(scheme.class());
        }
        if let Some(scope) = heatmap.scope.as_deref().filter(|s| !s.is_empty()) {
            table.set_default("data-heat-scope", scope);
        }
    }

    (table, figure)
}

// ============================================================================
// Header, rows, cells
// ============================================================================

fn column_header(column: &Column) -> String {
    let mut decor = Decor::from_parts(&column.classes, &column.attributes);

    if let Some(align) = column.align {
        decor.class(format!("column-align-{}", align.as_str()));
    }
    if let Some(valign) = column.valign {
        decor.class(format!("column-valign-{}", valign.as_str()));
    }
    if let Some(width) = &column.width {
        decor.class("column-width");
        extent_styles(&mut decor, width, "column", "width");
    }

    decor.format_hints(column.format.as_ref(), "column");

    if let Some(filter) = &column.filter {
        if let Some(kind) = filter.kind.as_deref().filter(|k| !k.is_empty()) {
            decor.class(format!("column-filter-{kind}"));
            if filter.default_hidden {
                decor.set_default("data-filter-default", "hidden");
            }
        }
    }

    if column.total {
        decor.class("table-total-column");
    }
    if column.distribution {
        decor.class("column-distribution");
    }

    decor.set_default("data-col-key", column.key.as_str());
    decor.element("th", None, &column.label)
}

fn table_row(row: &Row, columns: &[Column], sort_columns: bool, sort_rows: bool) -> String {
    let mut decor = Decor::from_parts(&row.classes, &row.attributes);

    if row.total {
        decor.class("table-total-row");
    }
    if let Some(align) = row.align {
        decor.class(format!("row-align-{}", align.as_str()));
    }
    if let Some(valign) = row.valign {
        decor.class(format!("row-valign-{}", valign.as_str()));
    }
    if let Some(height) = &row.height {
        if height.value.as_deref().is_some_and(|v| !v.is_empty()) {
            decor.class("row-height");
        }
        if height.min.as_deref().is_some_and(|v| !v.is_empty()) {
            decor.class("row-min-height");
        }
        if height.max.as_deref().is_some_and(|v| !v.is_empty()) {
            decor.class("row-max-height");
        }
        extent_styles(&mut decor, height, "row", "height");
    }

    let mut content = String::new();
    let offset = match row.header() {
        Some(label) => {
            let mut header = Decor::default();
            if sort_rows {
                header.set("data-sort-value", label);
            }
            content.push_str(&header.element("th", Some("row"), label));
            1
        }
        None => 0,
    };

    for (cell, column) in row.cells.iter().zip(&columns[offset..]) {
        content.push_str(&table_cell(cell, column, sort_columns));
    }

    decor.element("tr", None, &content)
}

fn extent_styles(decor: &mut Decor, extent: &Extent, axis: &str, dimension: &str) {
    let (value, min, max) = match (axis, dimension) {
        ("column", _) => (
            "--rp-table-column-width",
            "--rp-table-column-min-width",
            "--rp-table-column-max-width",
        ),
        _ => (
            "--rp-table-row-height",
            "--rp-table-row-min-height",
            "--rp-table-row-max-height",
        ),
    };
    if let Some(v) = &extent.value {
        decor.style(value, v);
    }
    if let Some(v) = &extent.min {
        decor.style(min, v);
    }
    if let Some(v) = &extent.max {
        decor.style(max, v);
    }
}

fn table_cell(cell: &Cell, column: &Column, sort_columns: bool) -> String {
    let mut decor = Decor::from_parts(&cell.classes, &cell.attributes);

    if let Some(align) = cell.align {
        decor.class(format!("cell-align-{}", align.as_str()));
    }
    if let Some(valign) = cell.valign {
        decor.class(format!("cell-valign-{}", valign.as_str()));
    }

    decor.format_hints(cell.format.as_ref(), "cell");

    if let Some(raw) = &cell.raw {
        decor.set_default("data-format-value", raw.to_string());
    }

    if let Some(sort) = &cell.sort {
        if let Some(primary) = &sort.primary {
            decor.set("data-sort-value", primary.to_string());
            if let Some(secondary) = &sort.secondary {
                decor.set("data-sort-secondary", secondary.to_string());
            }
        }
    }

    if let Some(filter) = &cell.filter {
        if let Some(value) = &filter.value {
            decor.set("data-filter-value", value.to_string());
        }
        if let Some(label) = &filter.label {
            decor.set("data-filter-label", label.to_string());
        }
        if let Some(kind) = filter.kind.as_deref().filter(|k| !k.is_empty()) {
            decor.set_default("data-filter-type", kind);
        }
        if filter.skip {
            decor.set("data-filter-skip", "1");
        }
    }

    if let Some(heat) = &cell.heat {
        if let Some(value) = &heat.value {
            decor.set("data-heat", value.to_string());
            if let Some(min) = &heat.min {
                decor.set("data-heat-min", min.to_string());
            }
            if let Some(max) = &heat.max {
                decor.set("data-heat-max", max.to_string());
            }
        }
    }

    // validate() has already rejected sortable cells without a key
    debug_assert!(!sort_columns || !column.is_sortable() || cell.has_sort_value());

    decor.element("td", None, &cell_content(cell))
}

fn cell_content(cell: &Cell) -> String {
    if let Some(distribution) = &cell.distribution {
        return distribution
            .values
            .iter()
            .map(|value| match value.as_f64() {
                Some(n) => format!("${}", format_grouped(n)),
                None => format!("${value}"),
            })
            .collect::<Vec<_>>()
            .join(", ");
    }
    cell.value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// en-US number formatting: thousands separators, at most three fraction
/// digits, trailing zeros dropped. Exact ties round away from zero, never
/// to even. Large values stay in positional form.
pub fn format_grouped(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "∞" } else { "-∞" }.to_string();
    }

    // A float ties at the third decimal only as an odd multiple of 1/16.
    let abs = value.abs();
    let sixteenths = abs * 16.0;
    let tie = sixteenths.fract() == 0.0 && sixteenths % 2.0 == 1.0;
    let fixed = format!("{:.3}", if tie { abs + 0.0005 } else { abs });
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let is_zero = int_part.chars().all(|c| c == '0') && frac_part.is_empty();
    let sign = if value < 0.0 && !is_zero { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac_part}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        Align, Axis, CellFilter, ColumnFilter, Distribution, Figure, FilterSettings, Heat,
        HeatmapScheme, HeatmapSettings, Layout, Settings, VAlign, WidthMode,
    };

    fn render(spec: &TableSpec) -> String {
        render_table(spec).unwrap().into_string()
    }

    fn simple_spec() -> TableSpec {
        TableSpec::new(
            vec![Column::new("a", "A"), Column::new("b", "B")],
            vec![Row::new(vec![
                Cell::new("1").sorted_by(1),
                Cell::new("2").sorted_by(2),
            ])],
        )
    }

    // =========================================================================
    // Structure
    // =========================================================================

    #[test]
    fn renders_exact_skeleton() {
        let mut spec = simple_spec();
        spec.id = "t1".to_string();
        spec.figcaption = Some("Caption".to_string());
        let html = render(&spec);
        let expected = [
            r#"<figure class="rp-table" data-rp-table-id="t1">"#,
            r#"  <div class="rp-table__card">"#,
            r#"    <div class="rp-table__scroll">"#,
            r#"      <table>"#,
            r#"        <thead>"#,
            r#"          <tr>"#,
            r#"            <th data-col-key="a">A</th>"#,
            r#"            <th data-col-key="b">B</th>"#,
            r#"          </tr>"#,
            r#"        </thead>"#,
            r#"        <tbody>"#,
            r#"          <tr><td data-sort-value="1">1</td><td data-sort-value="2">2</td></tr>"#,
            r#"        </tbody>"#,
            r#"      </table>"#,
            r#"    </div>"#,
            r#"  </div>"#,
            r#"  <figcaption>Caption</figcaption>"#,
            r#"</figure>"#,
        ]
        .join("\n");
        assert_eq!(html, expected);
    }

    #[test]
    fn omits_anchor_and_caption_when_absent() {
        let html = render(&simple_spec());
        assert!(html.starts_with("<figure class=\"rp-table\">"));
        assert!(!html.contains("figcaption"));
        assert!(!html.contains(ANCHOR_ATTR));
    }

    #[test]
    fn caller_anchor_wins() {
        let mut spec = simple_spec();
        spec.id = "t1".to_string();
        let mut figure = Figure::default();
        figure
            .attributes
            .insert(ANCHOR_ATTR.to_string(), Scalar::from("custom"));
        spec.figure = Some(figure);
        let html = render(&spec);
        assert!(html.contains(r#"data-rp-table-id="custom""#));
        assert!(!html.contains(r#"data-rp-table-id="t1""#));
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut spec = simple_spec();
        spec.settings.sortable_columns = true;
        spec.settings.heatmap = Some(HeatmapSettings {
            scheme: Some(HeatmapScheme::Two),
            scope: Some("column".to_string()),
        });
        assert_eq!(render(&spec), render(&spec.clone()));
    }

    #[test]
    fn invalid_spec_produces_no_output() {
        let spec = TableSpec::new(
            vec![Column::new("a", "A"), Column::new("b", "B")],
            vec![Row::new(vec![Cell::new("1")])],
        );
        let err = render_table(&spec).unwrap_err();
        assert_eq!(err.to_string(), "Row 1 has 1 cells, expected 2.");
    }

    // =========================================================================
    // Settings
    // =========================================================================

    #[test]
    fn settings_become_table_classes() {
        let mut spec = simple_spec();
        spec.settings = Settings {
            sortable_columns: true,
            sortable_rows: false,
            reorder: Some(Axis::Columns),
            resize: Some(Axis::Both),
            density: Some("compact".to_string()),
            layout: Some(Layout::Fixed),
            width: Some(WidthMode::MaxContent),
            filters: Some(FilterSettings {
                enabled: true,
                search: true,
            }),
            heatmap: Some(HeatmapSettings {
                scheme: Some(HeatmapScheme::RedGreen),
                scope: Some("table".to_string()),
            }),
        };
        let html = render(&spec);
        assert!(html.contains(
            r#"<table class="table-sort-columns table-reorder-columns table-resize-both table-density-compact table-layout-fixed table-width-max-content table-filters" data-rp-search="1" data-heat-scope="table">"#
        ));
        assert!(html.starts_with(r#"<figure class="rp-table table-heatmap-red-green">"#));
    }

    #[test]
    fn caller_classes_come_first_without_duplicates() {
        let mut spec = simple_spec();
        spec.classes = vec!["wide".to_string(), SORT_COLUMNS_CLASS.to_string()];
        spec.settings.sortable_columns = true;
        let html = render(&spec);
        assert!(html.contains(r#"<table class="wide table-sort-columns">"#));
    }

    #[test]
    fn auto_layout_adds_nothing() {
        let mut spec = simple_spec();
        spec.settings.layout = Some(Layout::Auto);
        spec.settings.width = Some(WidthMode::Auto);
        assert!(render(&spec).contains("      <table>"));
    }

    // =========================================================================
    // Columns
    // =========================================================================

    #[test]
    fn column_header_decoration() {
        let mut column = Column::new("amount", "Amount").aligned(Align::Right, VAlign::Top);
        column.width = Some(Extent {
            value: Some("8rem".to_string()),
            min: Some("4rem".to_string()),
            max: None,
        });
        column.format = Some(Format {
            kind: Some("currency".to_string()),
            decimals: Some(Scalar::from(0)),
            round: None,
        });
        column.filter = Some(ColumnFilter {
            kind: Some("range".to_string()),
            default_hidden: true,
        });
        column.total = true;
        let spec = TableSpec::new(vec![column], vec![]);
        let html = render(&spec);
        assert!(html.contains(
            r#"<th class="column-align-right column-valign-top column-width column-format-currency column-filter-range table-total-column" style="--rp-table-column-width: 8rem; --rp-table-column-min-width: 4rem" data-format-decimals="0" data-filter-default="hidden" data-col-key="amount">Amount</th>"#
        ));
    }

    #[test]
    fn column_label_markup_passes_through() {
        let spec = TableSpec::new(vec![Column::new("a", "Total<br>Spend")], vec![]);
        assert!(render(&spec).contains(">Total<br>Spend</th>"));
    }

    #[test]
    fn caller_col_key_is_kept() {
        let mut column = Column::new("a", "A");
        column
            .attributes
            .insert("data-col-key".to_string(), Scalar::from("alias"));
        let html = render(&TableSpec::new(vec![column], vec![]));
        assert!(html.contains(r#"<th data-col-key="alias">A</th>"#));
    }

    // =========================================================================
    // Rows
    // =========================================================================

    #[test]
    fn row_header_carries_sort_value_when_rows_sort() {
        let mut spec = TableSpec::new(
            vec![Column::new("program", "Program"), Column::new("b", "B")],
            vec![Row::labeled("Housing", vec![Cell::new("2")])],
        );
        spec.settings.sortable_rows = true;
        let html = render(&spec);
        assert!(html.contains(
            r#"<tr><th scope="row" data-sort-value="Housing">Housing</th><td>2</td></tr>"#
        ));
    }

    #[test]
    fn row_header_without_row_sorting() {
        let spec = TableSpec::new(
            vec![Column::new("program", "Program"), Column::new("b", "B")],
            vec![Row::labeled("Housing", vec![Cell::new("2")])],
        );
        assert!(render(&spec).contains(r#"<tr><th scope="row">Housing</th><td>2</td></tr>"#));
    }

    #[test]
    fn unlabeled_rows_render_when_row_sorting_is_off() {
        let spec = TableSpec::new(
            vec![Column::new("a", "A")],
            vec![Row::new(vec![Cell::new("x")])],
        );
        assert!(render(&spec).contains("<tr><td>x</td></tr>"));
    }

    #[test]
    fn total_row_with_height_variables() {
        let mut row = Row::labeled("Total", vec![Cell::new("9")]);
        row.total = true;
        row.height = Some(Extent {
            value: None,
            min: Some("2rem".to_string()),
            max: Some("4rem".to_string()),
        });
        let spec = TableSpec::new(vec![Column::new("l", "L"), Column::new("v", "V")], vec![row]);
        assert!(render(&spec).contains(
            r#"<tr class="table-total-row row-min-height row-max-height" style="--rp-table-row-min-height: 2rem; --rp-table-row-max-height: 4rem">"#
        ));
    }

    // =========================================================================
    // Cells
    // =========================================================================

    #[test]
    fn cell_metadata_attributes() {
        let mut cell = Cell::new("$1,200").sorted_by(1200).then_by("b");
        cell.raw = Some(Scalar::from(1200));
        cell.format = Some(Format {
            kind: Some("currency".to_string()),
            decimals: None,
            round: Some(Scalar::from(2)),
        });
        cell.filter = Some(CellFilter {
            value: Some(Scalar::from("high")),
            label: Some(Scalar::from("High")),
            kind: Some("select".to_string()),
            skip: true,
        });
        cell.heat = Some(Heat {
            value: Some(Scalar::from(0.75)),
            min: Some(Scalar::from(0)),
            max: Some(Scalar::from(1)),
        });
        let spec = TableSpec::new(vec![Column::new("a", "A")], vec![Row::new(vec![cell])]);
        assert!(render(&spec).contains(
            r#"<td class="cell-format-currency" data-format-round="2" data-format-value="1200" data-sort-value="1200" data-sort-secondary="b" data-filter-value="high" data-filter-label="High" data-filter-type="select" data-filter-skip="1" data-heat="0.75" data-heat-min="0" data-heat-max="1">$1,200</td>"#
        ));
    }

    #[test]
    fn declared_sort_overwrites_attribute_in_place() {
        let mut cell = Cell::new("x").sorted_by(5);
        cell.attributes
            .insert("data-sort-value".to_string(), Scalar::from("old"));
        cell.attributes
            .insert("title".to_string(), Scalar::from("t"));
        let spec = TableSpec::new(vec![Column::new("a", "A")], vec![Row::new(vec![cell])]);
        assert!(render(&spec).contains(r#"<td data-sort-value="5" title="t">x</td>"#));
    }

    #[test]
    fn heat_bounds_need_a_value() {
        let mut cell = Cell::new("x");
        cell.heat = Some(Heat {
            value: None,
            min: Some(Scalar::from(0)),
            max: None,
        });
        let spec = TableSpec::new(vec![Column::new("a", "A")], vec![Row::new(vec![cell])]);
        assert!(render(&spec).contains("<td>x</td>"));
    }

    #[test]
    fn attribute_values_are_escaped_content_is_not() {
        let mut cell = Cell::new("<b>bold</b>");
        cell.attributes
            .insert("title".to_string(), Scalar::from(r#"a "quoted" <tag> & more"#));
        let spec = TableSpec::new(vec![Column::new("a", "A")], vec![Row::new(vec![cell])]);
        assert!(render(&spec).contains(
            r#"<td title="a &quot;quoted&quot; &lt;tag&gt; &amp; more"><b>bold</b></td>"#
        ));
    }

    #[test]
    fn distribution_overrides_value() {
        let mut cell = Cell::new("ignored");
        cell.distribution = Some(Distribution {
            values: vec![Scalar::from(1500), Scalar::from(25.5), Scalar::from("TBD")],
        });
        let spec = TableSpec::new(vec![Column::new("a", "A")], vec![Row::new(vec![cell])]);
        assert!(render(&spec).contains("<td>$1,500, $25.5, $TBD</td>"));
    }

    #[test]
    fn missing_value_renders_empty_cell() {
        let spec = TableSpec::new(
            vec![Column::new("a", "A")],
            vec![Row::new(vec![Cell::default()])],
        );
        assert!(render(&spec).contains("<tr><td></td></tr>"));
    }

    #[test]
    fn format_grouped_matches_en_us() {
        assert_eq!(format_grouped(0.0), "0");
        assert_eq!(format_grouped(999.0), "999");
        assert_eq!(format_grouped(1000.0), "1,000");
        assert_eq!(format_grouped(1234567.891), "1,234,567.891");
        assert_eq!(format_grouped(1.23456), "1.235");
        assert_eq!(format_grouped(-2500.5), "-2,500.5");
        assert_eq!(format_grouped(-0.0001), "0");
    }

    #[test]
    fn format_grouped_rounds_ties_away_from_zero() {
        assert_eq!(format_grouped(0.0625), "0.063");
        assert_eq!(format_grouped(2.5625), "2.563");
        assert_eq!(format_grouped(-1.0625), "-1.063");
        assert_eq!(format_grouped(0.1875), "0.188");
        assert_eq!(format_grouped(0.125), "0.125");
    }

    #[test]
    fn format_grouped_keeps_large_values_positional() {
        assert_eq!(format_grouped(1e21), "1,000,000,000,000,000,000,000");
        assert_eq!(format_grouped(0.0000001), "0");
    }

    #[test]
    fn preview_page_wraps_fragment() {
        let fragment = render_table(&simple_spec()).unwrap();
        let page = preview_page("Preview", &fragment).into_string();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<title>Preview</title>"));
        assert!(page.contains(r#"<main><figure class="rp-table">"#));
    }
}
