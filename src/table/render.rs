//! Text rendering of summaries and wide draw tables with `comfy_table`.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED,
};

use super::WideTable;
use crate::draws::SummaryTable;
use crate::draws::summary::R_K_HAT_LABEL;

/// R-hat above this value is highlighted as poorly converged.
pub const R_HAT_WARNING_THRESHOLD: f64 = 1.05;

/// Render a summary table; indices are shown 1-based.
#[must_use]
pub fn render_summary_table(summary: &SummaryTable) -> String {
    let quantile_names = summary.quantile_names();
    let mut headers = vec!["variable", "row", "col", "mean"];
    headers.extend(quantile_names.iter().map(String::as_str));
    headers.extend(["N_Eff", R_K_HAT_LABEL]);

    let mut table = make_table(&headers);
    for record in summary.records() {
        let mut row = vec![
            Cell::new(&record.variable),
            Cell::new(record.row + 1),
            Cell::new(record.col.map_or_else(|| "-".to_string(), |col| (col + 1).to_string())),
            Cell::new(format!("{:.4}", record.mean)),
        ];
        row.extend(
            record
                .quantiles
                .iter()
                .map(|value| Cell::new(format!("{value:.4}"))),
        );
        row.push(Cell::new(format!("{:.1}", record.effective_sample_size)));
        row.push(r_hat_cell(record.r_k_hat));
        table.add_row(row);
    }
    table.to_string()
}

/// Render the first `max_rows` rows of a wide table.
///
/// `group_labels`, when given, is indexed by the 0-based row of each key and
/// shown as a leading `group` column.
#[must_use]
pub fn render_draws_preview(
    table: &WideTable,
    group_labels: Option<&[String]>,
    max_rows: usize,
) -> String {
    let mut headers = Vec::with_capacity(table.ncols() + 5);
    if group_labels.is_some() {
        headers.push("group");
    }
    headers.extend([".chain", ".iteration", ".draw", "row"]);
    headers.extend(table.column_names());

    let mut rendered = make_table(&headers);
    for (i, key) in table.keys().iter().enumerate().take(max_rows) {
        let mut row = Vec::with_capacity(headers.len());
        if let Some(labels) = group_labels {
            row.push(Cell::new(labels.get(key.row).map_or("?", String::as_str)));
        }
        row.extend([
            Cell::new(key.chain_id),
            Cell::new(key.iteration),
            Cell::new(key.draw),
            Cell::new(key.row + 1),
        ]);
        row.extend((0..table.ncols()).map(|j| Cell::new(format!("{:.4}", table.value(i, j)))));
        rendered.add_row(row);
    }
    rendered.to_string()
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}

fn r_hat_cell(value: f64) -> Cell {
    if value > R_HAT_WARNING_THRESHOLD {
        Cell::new(format!("{value:.3}"))
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    } else {
        Cell::new(format!("{value:.3}"))
    }
}
