use sqlx::prelude::FromRow;

use crate::types::quote_column;

/// A column of an existing table as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ColumnInfo {
    pub column_name: String,
    /// The SQL standard type name, e.g. `character varying` or `USER-DEFINED`.
    pub data_type: String,
    /// The underlying type name, e.g. `varchar`, `int8` or `_text` for arrays.
    pub udt_name: String,
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub is_identity: bool,
    pub ordinal_position: i32,
}

impl ColumnInfo {
    /// Returns the type as written in DDL, including length or precision modifiers.
    ///
    /// Used to recreate the column on another table and as the target of casts.
    pub fn sql_type(&self) -> String {
        match self.data_type.as_str() {
            "character varying" => match self.character_maximum_length {
                Some(length) => format!("varchar({length})"),
                None => "varchar".to_string(),
            },
            "character" => match self.character_maximum_length {
                Some(length) => format!("char({length})"),
                None => "char".to_string(),
            },
            "numeric" => match (self.numeric_precision, self.numeric_scale) {
                (Some(precision), Some(scale)) => format!("numeric({precision},{scale})"),
                (Some(precision), None) => format!("numeric({precision})"),
                _ => "numeric".to_string(),
            },
            "ARRAY" => {
                let element = self.udt_name.strip_prefix('_').unwrap_or(&self.udt_name);
                format!("{element}[]")
            }
            "USER-DEFINED" => quote_column(&self.udt_name),
            other => other.to_string(),
        }
    }
}
