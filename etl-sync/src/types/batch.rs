use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::Cell;

/// Read access to the named values of one record.
pub trait Record {
    /// Returns the value of `field`, or [`None`] if the record has no such field.
    fn value(&self, field: &str) -> Option<&Cell>;
}

/// An owned record: column names mapped to values, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRecord {
    values: Vec<(String, Cell)>,
}

impl DataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `field`, replacing an earlier value of the same field in place.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Cell>) {
        let field = field.into();
        let value = value.into();

        match self.values.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = value,
            None => self.values.push((field, value)),
        }
    }

    /// Builder form of [`DataRecord::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Cell>) -> Self {
        self.set(field, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Record for DataRecord {
    fn value(&self, field: &str) -> Option<&Cell> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

/// A borrowed row of a [`Batch`].
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Cell],
}

impl<'a> RowRef<'a> {
    pub fn values(&self) -> &'a [Cell] {
        self.values
    }
}

impl Record for RowRef<'_> {
    fn value(&self, field: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .position(|name| name == field)
            .and_then(|index| self.values.get(index))
    }
}

/// A cleaned tabular batch: named columns and rows of values aligned to them.
///
/// Every row always has exactly one value per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Batch {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates a batch from prepared rows, failing if a row does not match the columns.
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> EtlResult<Self> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            bail!(
                ErrorKind::InvalidBatch,
                "Row width does not match the batch columns",
                format!(
                    "row {index} has {} values but the batch has {} columns",
                    row.len(),
                    columns.len()
                )
            );
        }

        Ok(Self { columns, rows })
    }

    /// Builds a batch from records, taking the union of their fields in first-seen order.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = DataRecord>,
    {
        let mut batch = Batch::default();
        for record in records {
            batch.push_record(record);
        }
        batch
    }

    /// Appends a record. Unseen fields become new columns, back-filled with [`Cell::Null`].
    pub fn push_record(&mut self, record: DataRecord) {
        let mut row = vec![Cell::Null; self.columns.len()];

        for (field, value) in record.values {
            match self.column_index(&field) {
                Some(index) => row[index] = value,
                None => {
                    self.columns.push(field);
                    for existing in &mut self.rows {
                        existing.push(Cell::Null);
                    }
                    row.push(value);
                }
            }
        }

        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    /// Returns the values of `name` in row order, or [`None`] if the column is absent.
    pub fn column_values(&self, name: &str) -> Option<impl Iterator<Item = &Cell>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[index]))
    }

    /// Sets the values of column `name`, appending the column if it is absent.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> EtlResult<()> {
        if values.len() != self.rows.len() {
            bail!(
                ErrorKind::InvalidBatch,
                "Column length does not match the batch",
                format!(
                    "column `{name}` has {} values but the batch has {} rows",
                    values.len(),
                    self.rows.len()
                )
            );
        }

        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }

        Ok(())
    }

    /// Keeps only the rows whose position is flagged in `keep`.
    pub(crate) fn retain_rows(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.rows.retain(|_| flags.next().copied().unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_record_back_fills_new_columns() {
        let mut batch = Batch::default();
        batch.push_record(DataRecord::new().with("lot", "L1").with("qty", 5));
        batch.push_record(DataRecord::new().with("lot", "L2").with("station", "AOI"));

        assert_eq!(batch.columns(), &["lot", "qty", "station"]);
        assert_eq!(batch.row(0).unwrap().value("station"), Some(&Cell::Null));
        assert_eq!(batch.row(1).unwrap().value("qty"), Some(&Cell::Null));
        assert_eq!(
            batch.row(1).unwrap().value("station"),
            Some(&Cell::from("AOI"))
        );
    }

    #[test]
    fn with_rows_rejects_ragged_rows() {
        let result = Batch::with_rows(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![Cell::Null, Cell::Null], vec![Cell::Null]],
        );

        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidBatch);
    }

    #[test]
    fn set_column_appends_or_overwrites() {
        let mut batch = Batch::from_records([
            DataRecord::new().with("lot", "L1"),
            DataRecord::new().with("lot", "L2"),
        ]);

        batch
            .set_column("hash", vec![Cell::from("a"), Cell::from("b")])
            .unwrap();
        batch
            .set_column("hash", vec![Cell::from("c"), Cell::from("d")])
            .unwrap();

        assert_eq!(batch.columns(), &["lot", "hash"]);
        let hashes: Vec<_> = batch.column_values("hash").unwrap().cloned().collect();
        assert_eq!(hashes, vec![Cell::from("c"), Cell::from("d")]);
        assert!(batch.set_column("hash", vec![]).is_err());
    }

    #[test]
    fn data_record_set_replaces_in_place() {
        let mut record = DataRecord::new().with("a", 1).with("b", 2);
        record.set("a", 3);

        let fields: Vec<_> = record.iter().map(|(name, _)| name).collect();
        assert_eq!(fields, vec!["a", "b"]);
        assert_eq!(record.value("a"), Some(&Cell::I64(3)));
    }
}
