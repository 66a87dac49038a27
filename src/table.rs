//! Plain-text table rendering for preview and column listings.

use std::fmt::Write as _;

/// Renders rows under padded headers with a dashed rule and two spaces
/// between columns. Control characters in cells become plain spaces so one
/// row stays on one line.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| cell_width(h)).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(cell_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    write_row(&mut output, headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut output, &rule, &widths);
    for row in rows {
        write_row(&mut output, row, &widths);
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn write_row(output: &mut String, cells: &[String], widths: &[usize]) {
    for (idx, cell) in cells.iter().enumerate().take(widths.len()) {
        if idx > 0 {
            output.push_str("  ");
        }
        let clean = sanitize(cell);
        let _ = write!(output, "{clean}");
        if idx + 1 < widths.len() {
            let pad = widths[idx].saturating_sub(clean.chars().count());
            for _ in 0..pad {
                output.push(' ');
            }
        }
    }
    output.push('\n');
}

fn cell_width(value: &str) -> usize {
    sanitize(value).chars().count()
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}
