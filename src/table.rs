//! Stacked Table
//!
//! The already-materialized long-format table consumed by the matrix builder:
//! one record per (row label, column label, value) observation, stored
//! column by column under named fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MatrixError, Result};

/// One table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// The cell rendered as a category label, `None` for nulls.
    pub fn as_label(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Text(s) => Some(s.clone()),
        }
    }

    /// The cell as a count; whole, finite and non-negative only.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Cell::Int(v) => u64::try_from(*v).ok(),
            // u64::MAX as f64 rounds up to 2^64, which is already out of range
            Cell::Float(v) if v.is_finite() && *v >= 0.0 && v.fract() == 0.0 && *v < u64::MAX as f64 => {
                Some(*v as u64)
            }
            Cell::Text(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Number(n) => n
                .as_i64()
                .map(Cell::Int)
                .or_else(|| n.as_f64().map(Cell::Float))
                .unwrap_or(Cell::Null),
            Value::String(s) => Cell::Text(s.clone()),
            Value::Bool(b) => Cell::Text(b.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Long-format table with named fields, stored column-wise.
#[derive(Debug, Clone, Default)]
pub struct StackedTable {
    fields: Vec<String>,
    field_index: HashMap<String, usize>,
    columns: Vec<Vec<Cell>>,
    len: usize,
}

impl StackedTable {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let field_index = fields.iter().enumerate().map(|(i, f)| (f.clone(), i)).collect();
        let columns = vec![Vec::new(); fields.len()];
        Self { fields, field_index, columns, len: 0 }
    }

    /// Append one record. Cells are given in field order.
    pub fn push_record<I>(&mut self, cells: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Cell>,
    {
        let cells: Vec<Cell> = cells.into_iter().map(Into::into).collect();
        if cells.len() != self.fields.len() {
            return Err(MatrixError::InvalidValue {
                record: self.len,
                field: self.fields.join(","),
                value: format!("{} cells", cells.len()),
            });
        }
        for (column, cell) in self.columns.iter_mut().zip(cells) {
            column.push(cell);
        }
        self.len += 1;
        Ok(())
    }

    /// Build a table from a JSON array of flat objects.
    ///
    /// The field set is the union of all record keys; absent keys become nulls.
    pub fn from_json_records(json: &str) -> Result<Self> {
        let records: Vec<serde_json::Map<String, Value>> = serde_json::from_str(json)
            .map_err(|e| MatrixError::InvalidValue {
                record: 0,
                field: String::new(),
                value: e.to_string(),
            })?;

        let mut fields: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !fields.contains(key) {
                    fields.push(key.clone());
                }
            }
        }

        let mut table = StackedTable::new(fields.clone());
        for record in &records {
            let cells = fields
                .iter()
                .map(|f| record.get(f).map(Cell::from_json).unwrap_or(Cell::Null));
            table.push_record(cells)?;
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn column(&self, field: &str) -> Result<&[Cell]> {
        self.field_index
            .get(field)
            .map(|&i| self.columns[i].as_slice())
            .ok_or_else(|| MatrixError::MissingField(field.to_string()))
    }

    /// Labels of one field, `None` for null cells.
    pub fn labels(&self, field: &str) -> Result<Vec<Option<String>>> {
        Ok(self.column(field)?.iter().map(Cell::as_label).collect())
    }

    /// Add a text field built by joining two existing fields with a space.
    ///
    /// Used to make species labels unique by pairing a taxon key with its name.
    /// A record where either input is null gets a null.
    pub fn add_combined_field(&mut self, name: &str, first: &str, second: &str) -> Result<()> {
        let left = self.labels(first)?;
        let right = self.labels(second)?;
        let combined: Vec<Cell> = left
            .into_iter()
            .zip(right)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Cell::Text(format!("{} {}", a, b)),
                _ => Cell::Null,
            })
            .collect();

        match self.field_index.get(name) {
            Some(&i) => self.columns[i] = combined,
            None => {
                self.field_index.insert(name.to_string(), self.fields.len());
                self.fields.push(name.to_string());
                self.columns.push(combined);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_columns() {
        let mut table = StackedTable::new(["species", "dataset", "count"]);
        table.push_record([Cell::from("A"), Cell::from("D1"), Cell::from(5)]).unwrap();
        table.push_record([Cell::from("B"), Cell::Null, Cell::from(2.0)]).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.labels("dataset").unwrap(), vec![Some("D1".to_string()), None]);
        let counts: Vec<Option<u64>> = table.column("count").unwrap().iter().map(Cell::as_count).collect();
        assert_eq!(counts, vec![Some(5), Some(2)]);
        assert!(matches!(table.column("nope"), Err(MatrixError::MissingField(_))));
    }

    #[test]
    fn test_push_rejects_wrong_arity() {
        let mut table = StackedTable::new(["a", "b"]);
        assert!(table.push_record([Cell::from(1)]).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_counts_reject_fractions_and_negatives() {
        assert_eq!(Cell::from(2.5).as_count(), None);
        assert_eq!(Cell::from(-3).as_count(), None);
        assert_eq!(Cell::from(-1.0).as_count(), None);
        assert_eq!(Cell::from(f64::NAN).as_count(), None);
        assert_eq!(Cell::from("12").as_count(), Some(12));
        assert_eq!(Cell::Null.as_count(), None);
    }

    #[test]
    fn test_float_counts_stay_in_range() {
        // 2^64 does not fit, even though it compares equal to u64::MAX as f64
        assert_eq!(Cell::from(18446744073709551616.0).as_count(), None);
        assert_eq!(Cell::from(9007199254740992.0).as_count(), Some(9007199254740992));
        assert_eq!(Cell::from(u64::MAX.to_string()).as_count(), Some(u64::MAX));
    }

    #[test]
    fn test_from_json_records() {
        let json = r#"[
            {"taxonKey": 1, "species": "Acer rubrum", "datasetKey": "d1", "occ_count": 4},
            {"taxonKey": 2, "species": "Acer saccharum", "datasetKey": "d1"}
        ]"#;
        let table = StackedTable::from_json_records(json).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.fields().len(), 4);
        assert_eq!(table.column("occ_count").unwrap()[1], Cell::Null);
        assert_eq!(table.column("taxonKey").unwrap()[0], Cell::Int(1));
    }

    #[test]
    fn test_add_combined_field() {
        let mut table = StackedTable::new(["taxonKey", "species"]);
        table.push_record([Cell::from(7), Cell::from("Acer rubrum")]).unwrap();
        table.push_record([Cell::Null, Cell::from("Unknown")]).unwrap();

        table.add_combined_field("taxonKey_species", "taxonKey", "species").unwrap();
        assert_eq!(
            table.labels("taxonKey_species").unwrap(),
            vec![Some("7 Acer rubrum".to_string()), None]
        );
    }
}
