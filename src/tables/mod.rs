// src/tables/mod.rs

mod reconstruct;
mod render;

pub use reconstruct::{HeaderMap, ResolvedCell, detect_headers, reconstruct, reconstruct_table, resolve_headers};
pub use render::{TableStyle, classify, render, render_table, render_values};

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Role the analysis service assigned to a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Option<String>")]
pub enum CellRole {
    Header,
    #[default]
    Data,
}

impl From<Option<String>> for CellRole {
    fn from(kind: Option<String>) -> Self {
        match kind.as_deref() {
            Some("columnHeader") => Self::Header,
            _ => Self::Data,
        }
    }
}

impl CellRole {
    pub fn is_header(self) -> bool {
        self == Self::Header
    }
}

/// A single detected table cell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    #[serde(default)]
    pub row_index: u32,
    #[serde(default)]
    pub column_index: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "kind")]
    pub role: CellRole,
}

impl Cell {
    pub fn data(row_index: u32, column_index: u32, content: impl Into<String>) -> Self {
        Self {
            row_index,
            column_index,
            content: content.into(),
            role: CellRole::Data,
        }
    }

    pub fn header(row_index: u32, column_index: u32, content: impl Into<String>) -> Self {
        Self {
            role: CellRole::Header,
            ..Self::data(row_index, column_index, content)
        }
    }
}

/// One detected table, cells in the service's emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocTable {
    pub cells: Vec<Cell>,
}

/// The part of an analysis result the table engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeResult {
    pub tables: Vec<DocTable>,
}

impl AnalyzeResult {
    /// Read `tables[].cells[]` out of a raw analysis result.
    ///
    /// Never fails: a missing or non-array `tables` means zero tables, a
    /// non-array `cells` means an empty table, and a cell that does not
    /// deserialize is dropped with a warning.
    pub fn from_value(value: &Value) -> Self {
        let Some(tables) = value.get("tables").and_then(Value::as_array) else {
            debug!("Result carries no tables array");
            return Self::default();
        };

        let tables = tables
            .iter()
            .enumerate()
            .map(|(i, table)| {
                let cells = table
                    .get("cells")
                    .and_then(Value::as_array)
                    .map(|cells| {
                        cells
                            .iter()
                            .filter_map(|cell| match Cell::deserialize(cell) {
                                Ok(cell) => Some(cell),
                                Err(e) => {
                                    warn!(table = i + 1, error = %e, "Dropping malformed cell");
                                    None
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                DocTable { cells }
            })
            .collect();

        Self { tables }
    }
}

/// Header-keyed row: header name -> cell content, in column encounter order.
pub type Record = IndexMap<String, String>;

/// A row of a table without detected headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalRow {
    pub row_index: u32,
    pub values: Vec<String>,
}

impl Serialize for PositionalRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.row_index.to_string(), &self.values)?;
        map.end()
    }
}

/// A reconstructed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Table {
    Header(Vec<Record>),
    Positional(Vec<PositionalRow>),
}

impl Table {
    pub fn len(&self) -> usize {
        match self {
            Self::Header(records) => records.len(),
            Self::Positional(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON shape consumed by the renderer.
    pub fn to_value(&self) -> Value {
        let rows = match self {
            Self::Header(records) => records
                .iter()
                .map(|record| {
                    Value::Object(
                        record
                            .iter()
                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                            .collect(),
                    )
                })
                .collect(),
            Self::Positional(rows) => rows
                .iter()
                .map(|row| {
                    let values = row.values.iter().cloned().map(Value::String).collect();
                    let mut map = serde_json::Map::new();
                    map.insert(row.row_index.to_string(), Value::Array(values));
                    Value::Object(map)
                })
                .collect(),
        };
        Value::Array(rows)
    }
}

pub type TableId = u32;

/// Tables of one page, keyed by 1-based detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableSet {
    tables: IndexMap<TableId, Table>,
}

impl TableSet {
    pub fn insert(&mut self, id: TableId, table: Table) -> Option<Table> {
        self.tables.insert(id, table)
    }

    pub fn get(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables.iter().map(|(id, table)| (*id, table))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl IntoIterator for TableSet {
    type Item = (TableId, Table);
    type IntoIter = indexmap::map::IntoIter<TableId, Table>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

/// How per-page table ids are combined across a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableIdMode {
    /// Keys are `(page, table)`; nothing is overwritten.
    #[default]
    Namespaced,
    /// Keys are the bare per-page ids; a later page replaces an earlier
    /// page's table with the same id.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKey {
    Page { page: u32, table: TableId },
    Shared(TableId),
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page { page, table } => write!(f, "page{page}.table{table}"),
            Self::Shared(table) => write!(f, "{table}"),
        }
    }
}

impl Serialize for TableKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Tables accumulated over every page of a document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentTables {
    #[serde(skip)]
    mode: TableIdMode,
    #[serde(flatten)]
    tables: IndexMap<TableKey, Table>,
}

impl DocumentTables {
    pub fn new(mode: TableIdMode) -> Self {
        Self {
            mode,
            tables: IndexMap::new(),
        }
    }

    pub fn merge_page(&mut self, page: u32, tables: TableSet) {
        for (id, table) in tables {
            let key = match self.mode {
                TableIdMode::Namespaced => TableKey::Page { page, table: id },
                TableIdMode::Legacy => TableKey::Shared(id),
            };
            if self.tables.insert(key, table).is_some() {
                warn!(page, table = id, "Table id collision, earlier page's table replaced");
            }
        }
    }

    pub fn get(&self, key: TableKey) -> Option<&Table> {
        self.tables.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableKey, &Table)> {
        self.tables.iter().map(|(key, table)| (*key, table))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_cells_and_roles() {
        let raw = json!({
            "tables": [{
                "rowCount": 2,
                "cells": [
                    {"rowIndex": 0, "columnIndex": 1, "content": "Price", "kind": "columnHeader"},
                    {"rowIndex": 1, "columnIndex": 1, "content": "9.99", "kind": "content"},
                    {"rowIndex": 1, "columnIndex": 2}
                ]
            }]
        });
        let result = AnalyzeResult::from_value(&raw);
        assert_eq!(
            result.tables[0].cells,
            vec![
                Cell::header(0, 1, "Price"),
                Cell::data(1, 1, "9.99"),
                Cell::data(1, 2, ""),
            ]
        );
    }

    #[test]
    fn missing_or_malformed_tables_mean_none() {
        assert!(AnalyzeResult::from_value(&json!({})).tables.is_empty());
        assert!(AnalyzeResult::from_value(&json!({"tables": "nope"})).tables.is_empty());
        assert!(AnalyzeResult::from_value(&json!(null)).tables.is_empty());
    }

    #[test]
    fn malformed_cells_are_dropped_but_table_kept() {
        let raw = json!({
            "tables": [
                {"cells": [{"rowIndex": "zero", "content": "x"}, {"rowIndex": 0, "content": "y"}]},
                {"cells": 7}
            ]
        });
        let result = AnalyzeResult::from_value(&raw);
        assert_eq!(result.tables.len(), 2);
        assert_eq!(result.tables[0].cells, vec![Cell::data(0, 0, "y")]);
        assert!(result.tables[1].cells.is_empty());
    }

    #[test]
    fn to_value_matches_serde_shape() {
        let mut record = Record::new();
        record.insert("Qty".into(), "2".into());
        let header = Table::Header(vec![record]);
        let positional = Table::Positional(vec![PositionalRow {
            row_index: 3,
            values: vec!["a".into(), "b".into()],
        }]);

        for table in [header, positional] {
            assert_eq!(table.to_value(), serde_json::to_value(&table).unwrap());
        }
    }

    fn one_table_page(content: &str) -> TableSet {
        let mut set = TableSet::default();
        set.insert(1, Table::Positional(vec![PositionalRow { row_index: 0, values: vec![content.into()] }]));
        set
    }

    #[test]
    fn namespaced_merge_keeps_every_page() {
        let mut doc = DocumentTables::new(TableIdMode::Namespaced);
        doc.merge_page(1, one_table_page("first"));
        doc.merge_page(2, one_table_page("second"));

        assert_eq!(doc.len(), 2);
        let keys: Vec<String> = doc.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["page1.table1", "page2.table1"]);
    }

    #[test]
    fn legacy_merge_overwrites_same_id() {
        let mut doc = DocumentTables::new(TableIdMode::Legacy);
        doc.merge_page(1, one_table_page("first"));
        doc.merge_page(2, one_table_page("second"));

        assert_eq!(doc.len(), 1);
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"1": [{"0": ["second"]}]})
        );
    }
}
