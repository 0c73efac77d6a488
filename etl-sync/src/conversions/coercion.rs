use std::fmt;

use chrono::NaiveDateTime;
use etl_postgres::types::ColumnInfo;
use tracing::debug;

use crate::conversions::{
    Number, format_float, format_timestamp, is_non_finite_number, number_from_float,
    parse_bool_literal, parse_number, parse_timestamp,
};
use crate::types::Cell;

/// How values are prepared for a destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFamily {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
    /// Any other type, bound as text and cast to the named type by Postgres.
    Cast(String),
}

impl ColumnFamily {
    pub fn of(column: &ColumnInfo) -> Self {
        match column.data_type.as_str() {
            "smallint" | "integer" | "bigint" => ColumnFamily::Integer,
            "real" | "double precision" => ColumnFamily::Float,
            "boolean" => ColumnFamily::Boolean,
            "timestamp without time zone" | "timestamp with time zone" | "date" => {
                ColumnFamily::Timestamp
            }
            "text" | "character varying" | "character" => ColumnFamily::Text,
            _ => ColumnFamily::Cast(column.sql_type()),
        }
    }

    /// The `::type` suffix appended to bound parameters, if any.
    pub fn cast(&self) -> Option<&str> {
        match self {
            ColumnFamily::Cast(sql_type) => Some(sql_type),
            _ => None,
        }
    }
}

/// A value ready to be bound as a statement parameter.
///
/// Nulls keep their type so Postgres receives typed parameters for every column.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Integer(Option<i64>),
    Float(Option<f64>),
    Boolean(Option<bool>),
    Timestamp(Option<NaiveDateTime>),
    Text(Option<String>),
}

impl BindValue {
    pub fn is_null(&self) -> bool {
        match self {
            BindValue::Integer(value) => value.is_none(),
            BindValue::Float(value) => value.is_none(),
            BindValue::Boolean(value) => value.is_none(),
            BindValue::Timestamp(value) => value.is_none(),
            BindValue::Text(value) => value.is_none(),
        }
    }
}

impl fmt::Display for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Integer(Some(value)) => write!(f, "{value}"),
            BindValue::Float(Some(value)) => write!(f, "{}", format_float(*value)),
            BindValue::Boolean(Some(value)) => write!(f, "{value}"),
            BindValue::Timestamp(Some(value)) => write!(f, "{}", format_timestamp(value)),
            BindValue::Text(Some(value)) => write!(f, "{value:?}"),
            _ => write!(f, "null"),
        }
    }
}

/// Converts `cell` for a column of `family`.
///
/// Values that cannot be represented become null instead of failing the row.
pub fn coerce(cell: &Cell, family: &ColumnFamily) -> BindValue {
    if cell.is_missing() {
        return null_for(family);
    }

    match family {
        ColumnFamily::Integer => BindValue::Integer(to_integer(cell)),
        ColumnFamily::Float => BindValue::Float(to_float(cell)),
        ColumnFamily::Boolean => BindValue::Boolean(to_bool(cell)),
        ColumnFamily::Timestamp => BindValue::Timestamp(to_timestamp(cell)),
        ColumnFamily::Text => BindValue::Text(to_text(cell)),
        ColumnFamily::Cast(sql_type) => BindValue::Text(to_cast_text(cell, sql_type)),
    }
}

fn null_for(family: &ColumnFamily) -> BindValue {
    match family {
        ColumnFamily::Integer => BindValue::Integer(None),
        ColumnFamily::Float => BindValue::Float(None),
        ColumnFamily::Boolean => BindValue::Boolean(None),
        ColumnFamily::Timestamp => BindValue::Timestamp(None),
        ColumnFamily::Text | ColumnFamily::Cast(_) => BindValue::Text(None),
    }
}

fn to_integer(cell: &Cell) -> Option<i64> {
    let number = match cell {
        Cell::Bool(value) => Number::Whole(i64::from(*value)),
        Cell::I64(value) => Number::Whole(*value),
        Cell::F64(value) => number_from_float(*value),
        Cell::String(value) => parse_number(value)?,
        Cell::Null | Cell::Timestamp(_) => return None,
    };

    match number {
        Number::Whole(value) => Some(value),
        Number::Fractional(value) => {
            debug!(value, "fractional value for an integer column stored as null");
            None
        }
    }
}

fn to_float(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
        Cell::I64(value) => Some(*value as f64),
        Cell::F64(value) => Some(*value).filter(|value| value.is_finite()),
        Cell::String(value) => match parse_number(value)? {
            Number::Whole(value) => Some(value as f64),
            Number::Fractional(value) => Some(value),
        },
        Cell::Null | Cell::Timestamp(_) => None,
    }
}

fn to_bool(cell: &Cell) -> Option<bool> {
    let number = match cell {
        Cell::Bool(value) => return Some(*value),
        Cell::I64(value) => Number::Whole(*value),
        Cell::F64(value) => number_from_float(*value),
        Cell::String(value) => match parse_bool_literal(value) {
            Some(value) => return Some(value),
            None => parse_number(value)?,
        },
        Cell::Null | Cell::Timestamp(_) => return None,
    };

    match number {
        Number::Whole(0) => Some(false),
        Number::Whole(1) => Some(true),
        _ => None,
    }
}

fn to_timestamp(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::Timestamp(value) => Some(*value),
        Cell::String(value) => parse_timestamp(value),
        _ => None,
    }
}

/// Text for a column cast by Postgres. Non-finite numbers are null in `numeric` columns.
fn to_cast_text(cell: &Cell, sql_type: &str) -> Option<String> {
    if sql_type.starts_with("numeric")
        && let Cell::String(value) = cell
        && is_non_finite_number(value)
    {
        debug!(value = %value, "non-finite value for a numeric column stored as null");
        return None;
    }

    to_text(cell)
}

fn to_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Null => None,
        Cell::Bool(value) => Some(value.to_string()),
        Cell::I64(value) => Some(value.to_string()),
        Cell::F64(value) => Some(format_float(*value)),
        Cell::String(value) => Some(value.trim().to_string()),
        Cell::Timestamp(value) => Some(format_timestamp(value)),
    }
}
