use crate::conversions::{
    Number, is_non_finite_number, number_from_float, parse_bool_literal, parse_number,
    parse_timestamp,
};
use crate::types::{Batch, Cell};

/// Storage type chosen for a column that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
}

impl StorageType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            StorageType::Integer => "bigint",
            StorageType::Float => "double precision",
            StorageType::Boolean => "boolean",
            StorageType::Timestamp => "timestamp",
            StorageType::Text => "text",
        }
    }
}

/// Running classification of the values seen in one column.
#[derive(Debug)]
struct Observation {
    seen_value: bool,
    bool_like: bool,
    genuine_bool: bool,
    numeric: bool,
    fractional: bool,
    timestamp_like: bool,
}

impl Observation {
    fn new() -> Self {
        Self {
            seen_value: false,
            bool_like: true,
            genuine_bool: false,
            numeric: true,
            fractional: false,
            timestamp_like: true,
        }
    }

    fn observe(&mut self, cell: &Cell) {
        if cell.is_missing() {
            return;
        }
        // Spelled out infinities are stored as null, like their float counterparts.
        if let Cell::String(value) = cell
            && is_non_finite_number(value)
        {
            return;
        }
        self.seen_value = true;

        let (is_bool, number, is_timestamp) = match cell {
            Cell::Null => return,
            Cell::Bool(_) => (true, None, false),
            Cell::I64(value) => (false, Some(Number::Whole(*value)), false),
            Cell::F64(value) => (false, Some(number_from_float(*value)), false),
            Cell::Timestamp(_) => (false, None, true),
            Cell::String(value) => (
                parse_bool_literal(value).is_some(),
                parse_number(value),
                parse_timestamp(value).is_some(),
            ),
        };

        let binary = matches!(number, Some(Number::Whole(0 | 1)));
        self.bool_like &= is_bool || binary;
        self.genuine_bool |= is_bool;

        match number {
            Some(Number::Fractional(_)) => self.fractional = true,
            Some(Number::Whole(_)) => {}
            None => self.numeric = false,
        }

        self.timestamp_like &= is_timestamp;
    }

    fn storage_type(&self) -> StorageType {
        if !self.seen_value {
            return StorageType::Text;
        }

        // A column of only 0 and 1 stays numeric, it takes a real boolean to flip it.
        if self.bool_like && self.genuine_bool {
            return StorageType::Boolean;
        }

        if self.numeric {
            return if self.fractional {
                StorageType::Float
            } else {
                StorageType::Integer
            };
        }

        if self.timestamp_like {
            return StorageType::Timestamp;
        }

        StorageType::Text
    }
}

/// Infers a storage type from observed values, ignoring missing ones.
pub fn infer_storage_type<'a, I>(values: I) -> StorageType
where
    I: IntoIterator<Item = &'a Cell>,
{
    let mut observation = Observation::new();
    for value in values {
        observation.observe(value);
    }

    observation.storage_type()
}

/// Infers the storage type of batch column `column`.
///
/// Columns listed in `text_columns` are always text so join keys keep leading zeros and
/// compare as strings across tables.
pub fn infer_column_type(batch: &Batch, column: &str, text_columns: &[String]) -> StorageType {
    if text_columns.iter().any(|text_column| text_column == column) {
        return StorageType::Text;
    }

    match batch.column_values(column) {
        Some(values) => infer_storage_type(values),
        None => StorageType::Text,
    }
}
