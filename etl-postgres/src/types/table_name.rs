use pg_escape::quote_identifier;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Schema used when a table name is given without one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Longest identifier Postgres keeps, in bytes. Longer names are truncated on creation.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Errors raised while parsing a [`TableName`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableNameError {
    #[error("table name must not be empty")]
    Empty,

    #[error("table name `{0}` has more than one schema separator")]
    TooManyParts(String),
}

/// A fully qualified Postgres table name consisting of a schema and table name.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TableName {
    /// The schema name containing the table
    pub schema: String,
    /// The name of the table within the schema
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }

    /// Returns a sibling table in the same schema whose name is prefixed with `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> TableName {
        Self {
            schema: self.schema.clone(),
            name: format!("{prefix}{}", self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{0}.{1}", self.schema, self.name))
    }
}

impl FromStr for TableName {
    type Err = TableNameError;

    /// Parses `schema.table` or a bare `table`, which lands in the `public` schema.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TableNameError::Empty);
        }

        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [name] => Ok(TableName::new(DEFAULT_SCHEMA, *name)),
            [schema, name] if !schema.is_empty() && !name.is_empty() => {
                Ok(TableName::new(*schema, *name))
            }
            [_, _] => Err(TableNameError::Empty),
            _ => Err(TableNameError::TooManyParts(s.to_string())),
        }
    }
}

/// Quotes a column name for use in generated SQL.
pub fn quote_column(name: &str) -> String {
    quote_identifier(name).into_owned()
}

/// Returns `name` as Postgres stores it, cut to [`MAX_IDENTIFIER_LENGTH`] bytes on a
/// character boundary.
pub fn truncate_identifier(name: &str) -> &str {
    if name.len() <= MAX_IDENTIFIER_LENGTH {
        return name;
    }

    let mut end = MAX_IDENTIFIER_LENGTH;
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    &name[..end]
}
