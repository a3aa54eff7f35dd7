//! Dataset handles (Arrow/Parquet)
//!
//! The coordinator only needs two things from a dataset: how many rows it has
//! and which columns it exposes. [`Dataset`] captures that contract so trial
//! engines can bring their own data representation; [`TableDataset`] is the
//! columnar implementation over Arrow record batches.
//!
//! Datasets are read-only once loaded and are shared across trials behind an
//! `Arc`. Row slicing is zero-copy (Arrow buffers are reference counted).

use crate::{Error, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::path::Path;

/// Row-count-queryable, column-addressable dataset.
pub trait Dataset: Send + Sync + 'static {
    /// Number of rows.
    fn row_count(&self) -> usize;

    /// Column names in schema order.
    fn column_names(&self) -> Vec<String>;

    /// Check whether a column exists.
    fn has_column(&self, name: &str) -> bool {
        self.column_names().iter().any(|column| column == name)
    }
}

/// Columnar dataset backed by Arrow record batches.
#[derive(Debug, Clone)]
pub struct TableDataset {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl TableDataset {
    /// Create a dataset from a schema and batches sharing it.
    ///
    /// # Errors
    ///
    /// Returns error if a batch schema doesn't match `schema`
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for batch in &batches {
            if batch.schema() != schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    schema,
                    batch.schema()
                )));
            }
        }
        Ok(Self { schema, batches })
    }

    /// Create a dataset from batches, taking the schema from the first one.
    ///
    /// # Errors
    ///
    /// Returns error if `batches` is empty or schemas differ
    pub fn from_batches(batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| {
                Error::StorageError("Cannot infer schema from zero record batches".to_string())
            })?;
        Self::try_new(schema, batches)
    }

    /// Load a dataset from a Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!("Failed to open Parquet file: {e}"))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file: {e}"))
        })?;
        let schema = builder.schema().clone();

        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?;
            batches.push(batch);
        }

        tracing::debug!(
            path = %path.as_ref().display(),
            batches = batches.len(),
            "loaded parquet dataset"
        );
        Self::try_new(schema, batches)
    }

    /// Schema shared by all batches.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Underlying record batches.
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Rows `[offset, offset + length)` as a new dataset (zero-copy).
    ///
    /// # Errors
    ///
    /// Returns error if the range exceeds the row count
    pub fn slice(&self, offset: usize, length: usize) -> Result<Self> {
        let end = offset.checked_add(length).filter(|end| *end <= self.row_count());
        let Some(end) = end else {
            return Err(Error::InvalidInput(format!(
                "Row range {offset}..{} out of bounds (dataset has {} rows)",
                offset.saturating_add(length),
                self.row_count()
            )));
        };

        let mut batches = Vec::new();
        let mut batch_start = 0;
        for batch in &self.batches {
            let batch_end = batch_start + batch.num_rows();
            let lo = offset.max(batch_start);
            let hi = end.min(batch_end);
            if lo < hi {
                batches.push(batch.slice(lo - batch_start, hi - lo));
            }
            batch_start = batch_end;
            if batch_start >= end {
                break;
            }
        }

        Ok(Self {
            schema: self.schema.clone(),
            batches,
        })
    }

    /// Concatenate datasets with identical schemas, preserving order.
    ///
    /// # Errors
    ///
    /// Returns error if `parts` is empty or schemas differ
    pub fn concat(parts: &[Self]) -> Result<Self> {
        let schema = parts
            .first()
            .map(Self::schema)
            .ok_or_else(|| Error::InvalidInput("Cannot concatenate zero datasets".to_string()))?;
        let batches = parts
            .iter()
            .flat_map(|part| part.batches.iter().cloned())
            .collect();
        Self::try_new(schema, batches)
    }

    /// Materialize all rows into one contiguous record batch.
    ///
    /// # Errors
    ///
    /// Returns error if Arrow fails to concatenate the batches
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        Ok(arrow::compute::concat_batches(&self.schema, &self.batches)?)
    }
}

impl Dataset for TableDataset {
    fn row_count(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    fn column_names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect()
    }

    fn has_column(&self, name: &str) -> bool {
        self.schema.column_with_name(name).is_some()
    }
}
