//! In-memory model of one opened output file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{NetCdfError, NetCdfResult};

/// Global attribute naming the simulation start, `YYYY-MM-DD_HH:MM:SS`.
pub const SIMULATION_START_ATTR: &str = "SIMULATION_START_DATE";

/// Timestamp format used in file names and `SIMULATION_START_DATE`.
pub const WRF_DATETIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

const CANONICAL_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

/// Attribute value, as decoded from the file.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    DateTime(NaiveDateTime),
}

fn join<T: ToString>(values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}

impl AttrValue {
    /// Canonical text form used by the key-value stores.
    ///
    /// Empty strings and empty lists become `"None"`; datetimes use a fixed
    /// nanosecond-width format.
    pub fn to_canonical_text(&self) -> String {
        match self {
            AttrValue::Text(s) if s.trim().is_empty() => "None".to_string(),
            AttrValue::Text(s) => s.clone(),
            AttrValue::Int(v) => v.to_string(),
            AttrValue::Float(v) => v.to_string(),
            AttrValue::Ints(v) if v.is_empty() => "None".to_string(),
            AttrValue::Ints(v) => join(v),
            AttrValue::Floats(v) if v.is_empty() => "None".to_string(),
            AttrValue::Floats(v) => join(v),
            AttrValue::DateTime(dt) => dt.format(CANONICAL_DATETIME_FORMAT).to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Ints(v) if v.len() == 1 => Some(v[0]),
            AttrValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttrValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Numeric element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    F32,
    F64,
    I32,
    I64,
    /// Unsigned bytes, also used for character data.
    U8,
}

/// Decoded variable contents, row-major over the variable's dimensions.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
}

impl VariableData {
    pub fn var_type(&self) -> VarType {
        match self {
            VariableData::F32(_) => VarType::F32,
            VariableData::F64(_) => VarType::F64,
            VariableData::I32(_) => VarType::I32,
            VariableData::I64(_) => VarType::I64,
            VariableData::U8(_) => VarType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VariableData::F32(v) => v.len(),
            VariableData::F64(v) => v.len(),
            VariableData::I32(v) => v.len(),
            VariableData::I64(v) => v.len(),
            VariableData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Variable metadata, without data.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    /// Dimension names in storage order.
    pub dimensions: Vec<String>,
    pub var_type: VarType,
    pub attributes: BTreeMap<String, AttrValue>,
}

/// Lazy access to variable data. Implemented per backend.
pub trait VariableSource {
    fn read(&self, variable: &str) -> NetCdfResult<VariableData>;
}

/// An opened output file: dimensions, variables, attributes and a data handle.
///
/// Holds the underlying file open until dropped.
pub struct Dataset {
    path: PathBuf,
    dimensions: Vec<(String, usize)>,
    variables: Vec<VariableInfo>,
    attributes: BTreeMap<String, AttrValue>,
    coordinates: Vec<String>,
    source: Box<dyn VariableSource>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("dimensions", &self.dimensions)
            .field("variables", &self.variables.len())
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

impl Dataset {
    pub fn new(
        path: impl Into<PathBuf>,
        dimensions: Vec<(String, usize)>,
        variables: Vec<VariableInfo>,
        attributes: BTreeMap<String, AttrValue>,
        coordinates: Vec<String>,
        source: Box<dyn VariableSource>,
    ) -> Self {
        Self {
            path: path.into(),
            dimensions,
            variables,
            attributes,
            coordinates,
            source,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dimensions in file order.
    pub fn dimensions(&self) -> &[(String, usize)] {
        &self.dimensions
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, len)| *len)
    }

    /// Variables in file order.
    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Local extent of each of the variable's dimensions.
    pub fn variable_shape(&self, variable: &VariableInfo) -> NetCdfResult<Vec<usize>> {
        variable
            .dimensions
            .iter()
            .map(|d| {
                self.dimension_len(d).ok_or_else(|| {
                    NetCdfError::MissingData(format!("dimension {} of {}", d, variable.name))
                })
            })
            .collect()
    }

    /// Global attributes.
    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn attribute_i64(&self, name: &str) -> Option<i64> {
        self.attribute(name).and_then(AttrValue::as_i64)
    }

    /// Names of coordinate variables, sorted.
    pub fn coordinates(&self) -> &[String] {
        &self.coordinates
    }

    pub fn read(&self, variable: &str) -> NetCdfResult<VariableData> {
        self.source.read(variable)
    }

    /// Parse the `SIMULATION_START_DATE` global attribute.
    pub fn simulation_start(&self) -> NetCdfResult<NaiveDateTime> {
        let raw = self
            .attribute(SIMULATION_START_ATTR)
            .and_then(AttrValue::as_text)
            .ok_or_else(|| NetCdfError::MissingData(SIMULATION_START_ATTR.to_string()))?;
        NaiveDateTime::parse_from_str(raw.trim(), WRF_DATETIME_FORMAT).map_err(|e| {
            NetCdfError::InvalidFormat(format!("{} '{}': {}", SIMULATION_START_ATTR, raw, e))
        })
    }
}

/// Opens datasets by path.
pub trait DatasetReader: Send + Sync {
    fn open(&self, path: &Path) -> NetCdfResult<Dataset>;
}
