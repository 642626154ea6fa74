// src/tables/reconstruct.rs

use super::{AnalyzeResult, Cell, PositionalRow, Record, Table, TableId, TableSet};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Column index -> header text, taken from the header-typed prefix of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap(HashMap<u32, String>);

impl HeaderMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Header name for a column; unmapped columns resolve to `""`.
    pub fn resolve(&self, column_index: u32) -> &str {
        self.0.get(&column_index).map_or("", String::as_str)
    }
}

/// A data cell paired with the header it was filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCell<'a> {
    pub cell: &'a Cell,
    pub header: &'a str,
}

/// Collect headers from the leading run of header cells.
///
/// Scanning stops at the first data cell, so a table whose first cell is data
/// has no headers at all, whatever follows.
pub fn detect_headers(cells: &[Cell]) -> HeaderMap {
    let map = cells
        .iter()
        .take_while(|cell| cell.role.is_header())
        .map(|cell| (cell.column_index, cell.content.clone()))
        .collect();
    HeaderMap(map)
}

/// Build the table set for one page. Ids are 1-based positions in the
/// service's table list; empty tables keep their id but produce no entry.
pub fn reconstruct(result: &AnalyzeResult) -> TableSet {
    let mut tables = TableSet::default();

    for (id, table) in (1 as TableId..).zip(&result.tables) {
        match reconstruct_table(&table.cells) {
            Some(reconstructed) => {
                debug!(table = id, cells = table.cells.len(), rows = reconstructed.len(), "Reconstructed table");
                tables.insert(id, reconstructed);
            }
            None => debug!(table = id, "Skipping table with no cells"),
        }
    }

    tables
}

/// Reconstruct a single table, or `None` when it has no cells.
pub fn reconstruct_table(cells: &[Cell]) -> Option<Table> {
    if cells.is_empty() {
        return None;
    }

    let headers = detect_headers(cells);
    if headers.is_empty() {
        return Some(Table::Positional(positional_rows(cells)));
    }

    for resolved in resolve_headers(cells, &headers) {
        trace!(
            row = resolved.cell.row_index,
            column = resolved.cell.column_index,
            header = resolved.header,
            "Resolved data cell"
        );
    }

    Some(Table::Header(header_records(cells, &headers)))
}

/// Pair every non-empty data cell with its header name.
pub fn resolve_headers<'a>(cells: &'a [Cell], headers: &'a HeaderMap) -> Vec<ResolvedCell<'a>> {
    cells
        .iter()
        .filter(|cell| !cell.role.is_header() && !cell.content.is_empty())
        .map(|cell| ResolvedCell {
            cell,
            header: headers.resolve(cell.column_index),
        })
        .collect()
}

// A new row starts whenever the row index differs from the previous cell's.
// Indices are taken literally, so a row index that comes back later starts a
// second row rather than joining the first.
fn positional_rows(cells: &[Cell]) -> Vec<PositionalRow> {
    let mut rows: Vec<PositionalRow> = Vec::new();

    for cell in cells {
        match rows.last_mut() {
            Some(row) if row.row_index == cell.row_index => row.values.push(cell.content.clone()),
            _ => rows.push(PositionalRow {
                row_index: cell.row_index,
                values: vec![cell.content.clone()],
            }),
        }
    }

    rows
}

fn header_records(cells: &[Cell], headers: &HeaderMap) -> Vec<Record> {
    let mut records: Vec<Record> = Vec::new();
    let mut current_row = None;

    for cell in cells.iter().filter(|cell| !cell.role.is_header()) {
        // Empty content neither opens a row nor is stored.
        if cell.content.is_empty() {
            continue;
        }

        if current_row != Some(cell.row_index) {
            records.push(Record::new());
            current_row = Some(cell.row_index);
        }

        if let Some(record) = records.last_mut() {
            record.insert(headers.resolve(cell.column_index).to_string(), cell.content.clone());
        }
    }

    records
}
