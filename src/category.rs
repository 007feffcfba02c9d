//! Category Index
//!
//! Bidirectional mapping between the unique labels of one matrix axis and
//! dense integer codes. Codes are positions in the ordered label list, so the
//! order captured at construction is exactly the order exported on save.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MatrixError, Result};

/// One of the two axes of a sparse matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Axis 0
    Row,
    /// Axis 1
    Column,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::Row => 0,
            Axis::Column => 1,
        }
    }

    /// The axis whose labels address the entries of a vector on this axis.
    pub fn opposite(self) -> Axis {
        match self {
            Axis::Row => Axis::Column,
            Axis::Column => Axis::Row,
        }
    }
}

impl TryFrom<i64> for Axis {
    type Error = MatrixError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Axis::Row),
            1 => Ok(Axis::Column),
            other => Err(MatrixError::InvalidAxis(other)),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => write!(f, "row (0)"),
            Axis::Column => write!(f, "column (1)"),
        }
    }
}

/// Ordered set of unique labels with their integer codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryIndex {
    axis: Axis,
    labels: Vec<String>,
    codes: HashMap<String, usize>,
}

impl CategoryIndex {
    /// Build an index from raw column values.
    ///
    /// `None` values are dropped; the remaining distinct values keep the order
    /// in which they were first seen.
    pub fn build<I, S>(values: I, axis: Axis, field: &str) -> Result<Self>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut labels = Vec::new();
        let mut codes = HashMap::new();
        for value in values.into_iter().flatten() {
            let value = value.as_ref();
            if !codes.contains_key(value) {
                codes.insert(value.to_string(), labels.len());
                labels.push(value.to_string());
            }
        }
        if labels.is_empty() {
            return Err(MatrixError::EmptyDomain { field: field.to_string(), axis });
        }
        Ok(Self { axis, labels, codes })
    }

    /// Restore an index from a persisted, already ordered label list.
    pub fn from_labels(labels: Vec<String>, axis: Axis) -> Result<Self> {
        if labels.is_empty() {
            return Err(MatrixError::EmptyDomain { field: String::new(), axis });
        }
        let mut codes = HashMap::with_capacity(labels.len());
        for (code, label) in labels.iter().enumerate() {
            if codes.insert(label.clone(), code).is_some() {
                return Err(MatrixError::DuplicateLabel { label: label.clone(), axis });
            }
        }
        Ok(Self { axis, labels, codes })
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.codes.contains_key(label)
    }

    pub fn code_of(&self, label: &str) -> Result<usize> {
        self.codes.get(label).copied().ok_or_else(|| MatrixError::LabelNotFound {
            label: label.to_string(),
            axis: self.axis,
        })
    }

    pub fn label_of(&self, code: usize) -> Result<&str> {
        self.labels.get(code).map(String::as_str).ok_or(MatrixError::CodeOutOfRange {
            code,
            len: self.labels.len(),
            axis: self.axis,
        })
    }

    /// Resolve a list of codes to their labels, preserving the given order.
    pub fn labels_of<I>(&self, codes: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = usize>,
    {
        codes
            .into_iter()
            .map(|code| self.label_of(code).map(str::to_string))
            .collect()
    }

    /// The full ordered label list.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_drops_nulls_and_keeps_first_seen_order() {
        let values = vec![Some("b"), None, Some("a"), Some("b"), Some("c"), None];
        let index = CategoryIndex::build(values, Axis::Row, "species").unwrap();

        assert_eq!(index.labels(), &["b", "a", "c"]);
        assert_eq!(index.code_of("b").unwrap(), 0);
        assert_eq!(index.code_of("c").unwrap(), 2);
        assert_eq!(index.label_of(1).unwrap(), "a");
    }

    #[test]
    fn test_build_is_reproducible() {
        let values = || vec![Some("x"), Some("z"), Some("y"), Some("x")];
        let first = CategoryIndex::build(values(), Axis::Column, "dataset").unwrap();
        let second = CategoryIndex::build(values(), Axis::Column, "dataset").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_domain() {
        let values: Vec<Option<&str>> = vec![None, None];
        let err = CategoryIndex::build(values, Axis::Row, "species").unwrap_err();
        assert!(matches!(err, MatrixError::EmptyDomain { axis: Axis::Row, .. }));
    }

    #[test]
    fn test_lookup_errors() {
        let index = CategoryIndex::from_labels(vec!["a".into(), "b".into()], Axis::Column).unwrap();

        assert!(matches!(
            index.code_of("zzz"),
            Err(MatrixError::LabelNotFound { axis: Axis::Column, .. })
        ));
        assert!(matches!(
            index.label_of(2),
            Err(MatrixError::CodeOutOfRange { code: 2, len: 2, .. })
        ));
    }

    #[test]
    fn test_from_labels_rejects_duplicates() {
        let err = CategoryIndex::from_labels(vec!["a".into(), "a".into()], Axis::Row).unwrap_err();
        assert!(matches!(err, MatrixError::DuplicateLabel { .. }));
    }

    #[test]
    fn test_axis_conversion() {
        assert_eq!(Axis::try_from(0).unwrap(), Axis::Row);
        assert_eq!(Axis::try_from(1).unwrap(), Axis::Column);
        assert!(matches!(Axis::try_from(2), Err(MatrixError::InvalidAxis(2))));
        assert!(matches!(Axis::try_from(-1), Err(MatrixError::InvalidAxis(-1))));
        assert_eq!(Axis::Row.opposite(), Axis::Column);
    }
}
