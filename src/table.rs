//! Tabular view handed to the search backend / 表格视图
//!
//! Row/column addressable projection of a dataset or a protocol tree,
//! materialized on demand for indexing.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Column definition / 列定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableView {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl TableView {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; its width must match the column count / 追加一行（列数必须一致）
    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "row has {} cells but table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell lookup by row index and column name / 按行号和列名取值
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)?.as_deref()
    }

    /// Non-empty cells as (row, column index, column name, value) / 遍历非空单元格
    ///
    /// Column names may repeat; the index is what identifies a cell.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &str, &str)> + '_ {
        self.rows.iter().enumerate().flat_map(move |(row_idx, row)| {
            row.iter().zip(&self.columns).enumerate().filter_map(move |(col_idx, (cell, column))| {
                cell.as_deref().map(|value| (row_idx, col_idx, column.name.as_str(), value))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableView {
        let mut table = TableView::new(vec![Column::new("name", "string"), Column::new("age", "int")]);
        table.push_row(vec![Some("alice".into()), Some("42".into())]).unwrap();
        table.push_row(vec![Some("bob".into()), None]).unwrap();
        table
    }

    #[test]
    fn test_push_row_rejects_wrong_width() {
        let mut table = sample();
        assert!(table.push_row(vec![Some("carol".into())]).is_err());
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_cell_lookup() {
        let table = sample();
        assert_eq!(table.cell(0, "age"), Some("42"));
        assert_eq!(table.cell(1, "age"), None);
        assert_eq!(table.cell(1, "name"), Some("bob"));
        assert_eq!(table.cell(5, "name"), None);
        assert_eq!(table.cell(0, "missing"), None);
    }

    #[test]
    fn test_cells_skip_empty_values() {
        let table = sample();
        let cells: Vec<_> = table.cells().collect();
        assert_eq!(cells, vec![(0, 0, "name", "alice"), (0, 1, "age", "42"), (1, 0, "name", "bob")]);
    }

    #[test]
    fn test_cells_keep_repeated_column_names_apart() {
        let mut table = TableView::new(vec![Column::new("Weight", "float"), Column::new("Weight", "float")]);
        table.push_row(vec![Some("70".into()), Some("71.5".into())]).unwrap();
        let cells: Vec<_> = table.cells().collect();
        assert_eq!(cells, vec![(0, 0, "Weight", "70"), (0, 1, "Weight", "71.5")]);
    }
}
