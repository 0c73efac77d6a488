use chrono::NaiveDateTime;
use std::fmt;

use crate::conversions::{format_float, format_timestamp, is_null_token};

/// A single value of an exported spreadsheet cell.
///
/// The variant is decided once by the reader. Later stages only convert between
/// variants when a destination column requires it.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Timestamp(NaiveDateTime),
}

impl Cell {
    /// Returns whether the cell carries no usable value.
    ///
    /// Besides [`Cell::Null`] this covers non finite floats and strings that spreadsheet
    /// tooling writes for missing values, such as `NaN` or `None`.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::F64(value) => !value.is_finite(),
            Cell::String(value) => is_null_token(value),
            Cell::Bool(_) | Cell::I64(_) | Cell::Timestamp(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    /// Renders the value the way it is hashed and logged, with missing values as empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_missing() {
            return Ok(());
        }

        match self {
            Cell::Null => Ok(()),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::F64(value) => f.write_str(&format_float(*value)),
            Cell::String(value) => f.write_str(value.trim()),
            Cell::Timestamp(value) => f.write_str(&format_timestamp(value)),
        }
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::I64(value.into())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::F64(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::Timestamp(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}
