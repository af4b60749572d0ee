use std::hash::BuildHasher;
use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use weft_error::{Result, ResultExt, WeftError};

/// Seeds are fixed so that every operator instance routes a given key to the
/// same partition.
const PARTITION_HASH_SEEDS: (u64, u64, u64, u64) = (
    0x243f6a8885a308d3,
    0x13198a2e03707344,
    0xa4093822299f31d0,
    0x082efa98ec4e6c89,
);

pub(crate) fn take_record_batch(batch: &RecordBatch, indices: &UInt32Array) -> Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|c| take(c.as_ref(), indices, None))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to take rows from batch")?;
    RecordBatch::try_new(batch.schema(), columns).context("failed to rebuild batch after take")
}

pub(crate) fn concat_record_batches(
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> Result<RecordBatch> {
    concat_batches(schema, batches).context("failed to concatenate batches")
}

/// Output schema of a join: probe-side fields followed by build-side fields.
pub(crate) fn concat_schemas(left: &SchemaRef, right: &SchemaRef) -> SchemaRef {
    let fields: Vec<_> = left
        .fields()
        .iter()
        .chain(right.fields().iter())
        .map(|f| f.as_ref().clone())
        .collect();
    Arc::new(Schema::new(fields))
}

/// Pull out key columns by index, bounds-checked.
pub(crate) fn key_columns(
    batch: &RecordBatch,
    keys: &[usize],
    side: &str,
) -> Result<Vec<ArrayRef>> {
    keys.iter()
        .map(|&key| {
            if key >= batch.num_columns() {
                return Err(WeftError::new(format!(
                    "{side} key column @{key} out of bounds for batch with {} columns",
                    batch.num_columns()
                )));
            }
            Ok(batch.column(key).clone())
        })
        .collect()
}

/// Row converter over the types of the given columns.
pub(crate) fn row_converter_for(columns: &[ArrayRef]) -> Result<RowConverter> {
    RowConverter::new(
        columns
            .iter()
            .map(|c| SortField::new(c.data_type().clone()))
            .collect(),
    )
    .context("failed to create row converter")
}

/// Split a batch into per-partition batches by a hash of the key columns.
///
/// Partitions that receive no rows are absent from the result.
pub(crate) fn hash_partition(
    batch: &RecordBatch,
    keys: &[usize],
    num_partitions: usize,
) -> Result<Vec<(usize, RecordBatch)>> {
    if keys.is_empty() {
        return Err(WeftError::new("Hash partitioning requires key columns"));
    }
    let state = ahash::RandomState::with_seeds(
        PARTITION_HASH_SEEDS.0,
        PARTITION_HASH_SEEDS.1,
        PARTITION_HASH_SEEDS.2,
        PARTITION_HASH_SEEDS.3,
    );

    let columns = key_columns(batch, keys, "Partition")?;
    let converter = row_converter_for(&columns)?;
    let rows = converter
        .convert_columns(&columns)
        .context("failed to convert partition keys to rows")?;

    let mut indices: Vec<Vec<u32>> = vec![Vec::new(); num_partitions];
    for (idx, row) in rows.iter().enumerate() {
        let partition = (state.hash_one(row.as_ref()) as usize) % num_partitions;
        indices[partition].push(idx as u32);
    }

    let mut out = Vec::new();
    for (partition, rows) in indices.into_iter().enumerate() {
        if rows.is_empty() {
            continue;
        }
        let indices = UInt32Array::from(rows);
        out.push((partition, take_record_batch(batch, &indices)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field};

    use super::*;

    fn test_batch(values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn hash_partition_is_stable_and_complete() {
        let batch = test_batch(vec![1, 2, 3, 4, 5, 6, 7, 8]);

        let first = hash_partition(&batch, &[0], 3).unwrap();
        let second = hash_partition(&batch, &[0], 3).unwrap();

        let total: usize = first.iter().map(|(_, b)| b.num_rows()).sum();
        assert_eq!(8, total);

        let firsts: Vec<_> = first.iter().map(|(p, b)| (*p, b.num_rows())).collect();
        let seconds: Vec<_> = second.iter().map(|(p, b)| (*p, b.num_rows())).collect();
        assert_eq!(firsts, seconds);
    }

    #[test]
    fn hash_partition_same_key_same_partition() {
        let batch = test_batch(vec![5, 5, 5, 5]);
        let parts = hash_partition(&batch, &[0], 4).unwrap();
        assert_eq!(1, parts.len());
        assert_eq!(4, parts[0].1.num_rows());
    }

    #[test]
    fn key_columns_out_of_bounds() {
        let batch = test_batch(vec![1]);
        let err = key_columns(&batch, &[2], "Probe").unwrap_err();
        assert!(err.to_string().contains("Probe key column @2"), "{err}");
    }
}
