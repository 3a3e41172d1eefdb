//! Columnar dataset produced by the transform stage.

use arrow::array::{
    Array, ArrayRef, Date32Array, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// An ordered, typed collection of rows backed by an Arrow [`RecordBatch`].
///
/// Cloning is cheap: columns are reference counted.
#[derive(Debug, Clone)]
pub struct Dataset {
    batch: RecordBatch,
}

impl Dataset {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema().index_of(name).is_ok()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn data_type(&self, name: &str) -> Option<DataType> {
        self.column(name).map(|c| c.data_type().clone())
    }

    /// Values of a UTF-8 column; `None` if absent or of another type.
    pub fn string_values(&self, name: &str) -> Option<Vec<Option<String>>> {
        let arr = self.column(name)?.as_any().downcast_ref::<StringArray>()?;
        Some(
            (0..arr.len())
                .map(|i| (!arr.is_null(i)).then(|| arr.value(i).to_string()))
                .collect(),
        )
    }

    /// Values of an integer column, widening `Int32` to `i64`.
    pub fn i64_values(&self, name: &str) -> Option<Vec<Option<i64>>> {
        let col = self.column(name)?;
        if let Some(arr) = col.as_any().downcast_ref::<Int64Array>() {
            return Some(
                (0..arr.len())
                    .map(|i| (!arr.is_null(i)).then(|| arr.value(i)))
                    .collect(),
            );
        }
        let arr = col.as_any().downcast_ref::<Int32Array>()?;
        Some(
            (0..arr.len())
                .map(|i| (!arr.is_null(i)).then(|| i64::from(arr.value(i))))
                .collect(),
        )
    }

    pub fn f64_values(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let arr = self.column(name)?.as_any().downcast_ref::<Float64Array>()?;
        Some(
            (0..arr.len())
                .map(|i| (!arr.is_null(i)).then(|| arr.value(i)))
                .collect(),
        )
    }

    /// Values of a `Date32` column.
    pub fn date_values(&self, name: &str) -> Option<Vec<Option<NaiveDate>>> {
        let arr = self.column(name)?.as_any().downcast_ref::<Date32Array>()?;
        Some(
            (0..arr.len())
                .map(|i| {
                    if arr.is_null(i) {
                        None
                    } else {
                        days_to_date(arr.value(i))
                    }
                })
                .collect(),
        )
    }

    /// Values of a microsecond timestamp column, interpreted as UTC.
    pub fn timestamp_values(&self, name: &str) -> Option<Vec<Option<DateTime<Utc>>>> {
        let arr = self
            .column(name)?
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()?;
        Some(
            (0..arr.len())
                .map(|i| {
                    if arr.is_null(i) {
                        None
                    } else {
                        DateTime::from_timestamp_micros(arr.value(i))
                    }
                })
                .collect(),
        )
    }

    /// Null count per column, in schema order.
    pub fn null_counts(&self) -> Vec<(String, usize)> {
        self.batch
            .schema()
            .fields()
            .iter()
            .zip(self.batch.columns())
            .map(|(field, col)| (field.name().clone(), col.null_count()))
            .collect()
    }

    /// Build a dataset from named columns.
    pub fn from_columns(columns: Vec<(&str, ArrayRef)>) -> Result<Self, arrow::error::ArrowError> {
        let batch = RecordBatch::try_from_iter(
            columns
                .into_iter()
                .map(|(name, col)| (name.to_string(), col)),
        )?;
        Ok(Self::new(batch))
    }
}

impl From<RecordBatch> for Dataset {
    fn from(batch: RecordBatch) -> Self {
        Self::new(batch)
    }
}

/// Arrow `Date32` value (days since the Unix epoch) for a calendar date.
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

/// Calendar date for an Arrow `Date32` value.
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}
