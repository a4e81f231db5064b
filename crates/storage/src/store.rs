//! The array store contract.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::StorageResult;
use crate::schema::{ArrayData, ArraySchema};

/// Tiled array storage addressed by `/`-separated names.
///
/// Three node kinds live in the namespace: groups (plain containers),
/// key-value stores (string to string maps) and dense arrays. Creation is
/// never implicit and never overwrites: `create_*` on an existing name fails
/// with [`StorageError::AlreadyExists`](crate::StorageError::AlreadyExists).
pub trait ArrayStore: Send + Sync {
    /// Whether any node exists under `name`.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    fn create_group(&self, name: &str) -> StorageResult<()>;

    fn create_array(&self, name: &str, schema: &ArraySchema) -> StorageResult<()>;

    fn array_schema(&self, name: &str) -> StorageResult<ArraySchema>;

    /// Write `data` (row-major, shaped by the slice extents) into the region
    /// given by one global half-open range per dimension.
    fn write_slice(&self, name: &str, slices: &[Range<u64>], data: &ArrayData) -> StorageResult<()>;

    fn read_slice(&self, name: &str, slices: &[Range<u64>]) -> StorageResult<ArrayData>;

    fn create_kv(&self, name: &str) -> StorageResult<()>;

    /// Insert or replace entries in a key-value store as one transaction.
    fn kv_write(&self, name: &str, entries: &BTreeMap<String, String>) -> StorageResult<()>;

    fn kv_get(&self, name: &str, key: &str) -> StorageResult<Option<String>>;

    /// Sorted keys of a key-value store.
    fn kv_keys(&self, name: &str) -> StorageResult<Vec<String>>;

    /// Sorted names (last path segment) of the nodes directly below a group.
    fn children(&self, name: &str) -> StorageResult<Vec<String>>;

    /// Compact the on-disk representation of a node. Safe to call repeatedly.
    fn consolidate(&self, name: &str) -> StorageResult<()>;
}

/// Check that a buffer matches the element type and extent of a write.
pub(crate) fn check_block(
    name: &str,
    schema: &ArraySchema,
    shape: &[u64],
    data: &ArrayData,
) -> StorageResult<()> {
    if data.element_type() != schema.element_type {
        return Err(crate::StorageError::InvalidSchema {
            name: name.to_string(),
            reason: format!(
                "array holds {} but {} was written",
                schema.element_type,
                data.element_type()
            ),
        });
    }
    let expected: u64 = shape.iter().product();
    if data.len() as u64 != expected {
        return Err(crate::StorageError::InvalidSlice {
            name: name.to_string(),
            reason: format!("slice holds {} cells but {} values were given", expected, data.len()),
        });
    }
    Ok(())
}
