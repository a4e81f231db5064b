//! Array schemas and typed element buffers.

use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// One named dimension of an array domain.
///
/// Bounds are inclusive: a dimension with `min = 0, max = 60` holds 61 cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub min: u64,
    pub max: u64,
    /// Tile (chunk) extent along this dimension.
    pub tile: u64,
}

impl Dimension {
    pub fn new(name: impl Into<String>, min: u64, max: u64, tile: u64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            tile,
        }
    }

    /// Number of cells covered by the inclusive bounds.
    pub fn len(&self) -> u64 {
        self.max - self.min + 1
    }

    /// Whether `range` (global coordinates, half-open) lies inside the domain.
    pub fn contains(&self, range: &Range<u64>) -> bool {
        range.start >= self.min && range.end <= self.max + 1 && range.start < range.end
    }
}

/// Element type stored in an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
    U8,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dense array schema: ordered dimensions plus a single typed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySchema {
    pub dimensions: Vec<Dimension>,
    /// Name of the value attribute (the variable name).
    pub attribute: String,
    pub element_type: ElementType,
}

impl ArraySchema {
    pub fn new(
        dimensions: Vec<Dimension>,
        attribute: impl Into<String>,
        element_type: ElementType,
    ) -> Self {
        Self {
            dimensions,
            attribute: attribute.into(),
            element_type,
        }
    }

    pub fn ndim(&self) -> usize {
        self.dimensions.len()
    }

    /// Array shape (cells per dimension).
    pub fn shape(&self) -> Vec<u64> {
        self.dimensions.iter().map(Dimension::len).collect()
    }

    pub fn tiles(&self) -> Vec<u64> {
        self.dimensions.iter().map(|d| d.tile).collect()
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Check bounds, tile sizes and name uniqueness.
    pub fn validate(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: String| StorageError::InvalidSchema {
            name: name.to_string(),
            reason,
        };

        let mut seen = HashSet::new();
        for dim in &self.dimensions {
            if !seen.insert(dim.name.as_str()) {
                return Err(invalid(format!("duplicate dimension '{}'", dim.name)));
            }
            if dim.max < dim.min {
                return Err(invalid(format!(
                    "dimension '{}' has max {} below min {}",
                    dim.name, dim.max, dim.min
                )));
            }
            if dim.tile == 0 {
                return Err(invalid(format!("dimension '{}' has zero tile size", dim.name)));
            }
        }
        Ok(())
    }

    /// Translate global half-open slices into a zero-based `(start, shape)` pair.
    pub fn subset(&self, name: &str, slices: &[Range<u64>]) -> StorageResult<(Vec<u64>, Vec<u64>)> {
        if slices.len() != self.ndim() {
            return Err(StorageError::InvalidSlice {
                name: name.to_string(),
                reason: format!("expected {} ranges, got {}", self.ndim(), slices.len()),
            });
        }

        let mut start = Vec::with_capacity(slices.len());
        let mut shape = Vec::with_capacity(slices.len());
        for (dim, range) in self.dimensions.iter().zip(slices) {
            if !dim.contains(range) {
                return Err(StorageError::InvalidSlice {
                    name: name.to_string(),
                    reason: format!(
                        "range {}..{} outside '{}' domain [{}, {}]",
                        range.start, range.end, dim.name, dim.min, dim.max
                    ),
                });
            }
            start.push(range.start - dim.min);
            shape.push(range.end - range.start);
        }
        Ok((start, shape))
    }
}

/// Typed element buffer, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
}

impl ArrayData {
    pub fn element_type(&self) -> ElementType {
        match self {
            ArrayData::F32(_) => ElementType::F32,
            ArrayData::F64(_) => ElementType::F64,
            ArrayData::I32(_) => ElementType::I32,
            ArrayData::I64(_) => ElementType::I64,
            ArrayData::U8(_) => ElementType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer of `len` fill values: NaN for floats, zero for integers.
    pub fn filled(element_type: ElementType, len: usize) -> Self {
        match element_type {
            ElementType::F32 => ArrayData::F32(vec![f32::NAN; len]),
            ElementType::F64 => ArrayData::F64(vec![f64::NAN; len]),
            ElementType::I32 => ArrayData::I32(vec![0; len]),
            ElementType::I64 => ArrayData::I64(vec![0; len]),
            ElementType::U8 => ArrayData::U8(vec![0; len]),
        }
    }

    /// Contiguous sub-range of the buffer.
    pub fn slice(&self, range: Range<usize>) -> Option<ArrayData> {
        Some(match self {
            ArrayData::F32(v) => ArrayData::F32(v.get(range)?.to_vec()),
            ArrayData::F64(v) => ArrayData::F64(v.get(range)?.to_vec()),
            ArrayData::I32(v) => ArrayData::I32(v.get(range)?.to_vec()),
            ArrayData::I64(v) => ArrayData::I64(v.get(range)?.to_vec()),
            ArrayData::U8(v) => ArrayData::U8(v.get(range)?.to_vec()),
        })
    }

    /// Values as `f64`, for comparisons in tests and diagnostics.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            ArrayData::F32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::F64(v) => v.clone(),
            ArrayData::I32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::I64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::U8(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ArraySchema {
        ArraySchema::new(
            vec![
                Dimension::new("Time", 0, 60, 1),
                Dimension::new("south_north", 0, 9, 5),
                Dimension::new("west_east", 0, 19, 10),
            ],
            "T2",
            ElementType::F32,
        )
    }

    #[test]
    fn test_shape_uses_inclusive_bounds() {
        assert_eq!(schema().shape(), vec![61, 10, 20]);
    }

    #[test]
    fn test_subset_translates_global_ranges() {
        let (start, shape) = schema().subset("T2", &[10..11, 5..10, 0..10]).unwrap();
        assert_eq!(start, vec![10, 5, 0]);
        assert_eq!(shape, vec![1, 5, 10]);
    }

    #[test]
    fn test_subset_rejects_out_of_domain() {
        let err = schema().subset("T2", &[60..62, 0..10, 0..20]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidSlice { .. }));
    }

    #[test]
    fn test_subset_rejects_wrong_rank() {
        let err = schema().subset("T2", &[0..1]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidSlice { .. }));
    }

    #[test]
    fn test_subset_honours_nonzero_min() {
        let s = ArraySchema::new(vec![Dimension::new("level", 5, 9, 5)], "v", ElementType::I32);
        let (start, shape) = s.subset("v", &[6..8]).unwrap();
        assert_eq!(start, vec![1]);
        assert_eq!(shape, vec![2]);
        assert!(s.subset("v", &[4..6]).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_tile_and_duplicates() {
        let mut s = schema();
        s.dimensions[1].tile = 0;
        assert!(s.validate("T2").is_err());

        let mut s = schema();
        s.dimensions[2].name = "south_north".to_string();
        assert!(s.validate("T2").is_err());

        assert!(schema().validate("T2").is_ok());
    }

    #[test]
    fn test_schema_json_uses_lowercase_types() {
        let json = serde_json::to_value(schema()).unwrap();
        assert_eq!(json["element_type"], "f32");
        let back: ArraySchema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema());
    }

    #[test]
    fn test_array_data_slice() {
        let data = ArrayData::I32(vec![1, 2, 3, 4]);
        assert_eq!(data.slice(1..3), Some(ArrayData::I32(vec![2, 3])));
        assert_eq!(data.slice(3..5), None);
    }
}
