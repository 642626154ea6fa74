// src/tables/render.rs

use super::TableSet;
use serde_json::Value;
use std::borrow::{Borrow, Cow};
use std::cmp::Ordering;
use std::fmt::Display;

/// Layout chosen for a table, decided from the shape of its rows alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStyle {
    /// Rows are `{"<digits>": [values…]}` and render as pipe-delimited lines.
    Headerless,
    /// Anything else renders as a pretty JSON dump.
    Header,
}

/// Render a page's tables as one prompt-ready text block.
pub fn render(tables: &TableSet) -> String {
    render_values(tables.iter().map(|(id, table)| (id, table.to_value())))
}

/// Render arbitrary `(id, rows)` pairs, in iteration order, separated by a
/// blank line. Total: any JSON shape yields some text.
///
/// Non-string values inside headerless rows render as compact JSON text
/// (`true`, `null`, `2.5`).
pub fn render_values<K, V>(tables: impl IntoIterator<Item = (K, V)>) -> String
where
    K: Display,
    V: Borrow<Value>,
{
    tables
        .into_iter()
        .map(|(id, content)| render_table(&id, content.borrow()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_table(id: &dyn Display, content: &Value) -> String {
    let rows = table_rows(content);
    match classify(&rows) {
        TableStyle::Headerless => format_headerless(id, &rows),
        TableStyle::Header => format_header(id, &rows),
    }
}

pub fn classify(rows: &[Value]) -> TableStyle {
    if rows.is_empty() {
        return TableStyle::Header;
    }
    if rows.iter().filter(|row| !is_blank(row)).all(is_positional_row) {
        TableStyle::Headerless
    } else {
        TableStyle::Header
    }
}

// A lone object is a one-row table; any other non-array is no rows at all.
fn table_rows(content: &Value) -> Cow<'_, [Value]> {
    match content {
        Value::Array(rows) => Cow::Borrowed(rows.as_slice()),
        Value::Object(_) => Cow::Owned(vec![content.clone()]),
        _ => Cow::Owned(Vec::new()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn is_digit_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

fn is_positional_row(row: &Value) -> bool {
    match row {
        Value::Object(map) if !map.is_empty() => map
            .iter()
            .all(|(key, value)| is_digit_key(key) && value.is_array()),
        _ => false,
    }
}

/// Digit keys first, by numeric value; everything else after, lexicographically.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (is_digit_key(a), is_digit_key(b)) {
        (true, true) => {
            let a = a.trim_start_matches('0');
            let b = b.trim_start_matches('0');
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

fn scalar_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

fn column_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(" | "),
        other => scalar_text(other).into_owned(),
    }
}

fn format_headerless(id: &dyn Display, rows: &[Value]) -> String {
    let mut lines = vec![format!("Table {id} (no headers or we couldn't detect headers):")];

    // Skipped rows still advance the displayed index.
    for (i, row) in rows.iter().enumerate() {
        let Value::Object(map) = row else {
            continue;
        };
        if map.is_empty() {
            continue;
        }

        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort_by(|a, b| compare_keys(a, b));
        let parts: Vec<String> = keys.into_iter().map(|k| column_text(&map[k])).collect();
        lines.push(format!("  - Row {i}: {}", parts.join(" || ")));
    }

    lines.join("\n")
}

fn format_header(id: &dyn Display, rows: &[Value]) -> String {
    let dump = serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string());
    format!("Table {id} (headers):\n{dump}")
}
