mod column;
mod table_name;

pub use column::ColumnInfo;
pub use table_name::{
    MAX_IDENTIFIER_LENGTH, TableName, TableNameError, quote_column, truncate_identifier,
};
