//! Plain-text rendering of the configured output schema.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{config::TableSpecConfig, error::Result};

const HEADERS: [&str; 5] = ["#", "output", "type", "source", "converter"];

/// One line per kept output column: slot, output name, destination type,
/// original column name and converter.
pub fn render_output_schema(config: &TableSpecConfig) -> Result<String> {
    // Fails on duplicate output names before anything is printed.
    config.output_schema()?;
    let rows = config
        .output_columns()
        .iter()
        .enumerate()
        .map(|(slot, column)| {
            vec![
                (slot + 1).to_string(),
                column.column.name.clone(),
                column.column.column_type.to_string(),
                column.original_name.to_string(),
                column.path.converter.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    let headers = HEADERS.map(String::from);
    Ok(render_table(&headers, &rows))
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|h| display_width(h).max(1))
        .collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(&sanitize_cell(cell)));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
