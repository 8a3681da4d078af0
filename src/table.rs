use std::borrow::Cow;
use std::fmt::Write as _;

/// Cells wider than this are cut and marked with an ellipsis.
pub const MAX_CELL_WIDTH: usize = 48;

/// Renders left-aligned columns separated by two spaces, with a dashed rule
/// under the header.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let header_cells = headers.iter().map(|h| fit_cell(h)).collect::<Vec<_>>();
    let body = rows
        .iter()
        .map(|row| row.iter().take(headers.len()).map(|c| fit_cell(c)).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let mut widths = header_cells
        .iter()
        .map(|cell| cell.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in &body {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in &body {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let mut line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell.as_ref(), width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    line.truncate(line.trim_end().len());
    line
}

fn fit_cell(value: &str) -> Cow<'_, str> {
    let flattened = if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    };
    if flattened.chars().count() <= MAX_CELL_WIDTH {
        return flattened;
    }
    let mut cut = flattened
        .chars()
        .take(MAX_CELL_WIDTH - 1)
        .collect::<String>();
    cut.push('…');
    Cow::Owned(cut)
}
