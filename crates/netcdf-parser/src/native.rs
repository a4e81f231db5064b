//! Native NetCDF reading using the netcdf library.
//!
//! Metadata (dimensions, variables, attributes) is decoded eagerly on open;
//! variable data is read on demand while the file handle is held by the
//! returned [`Dataset`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Once;

use netcdf::types::{FloatType, IntType, NcVariableType};
use netcdf::AttributeValue;
use tracing::{debug, instrument};

use crate::dataset::{
    AttrValue, Dataset, DatasetReader, VarType, VariableData, VariableInfo, VariableSource,
};
use crate::error::{NetCdfError, NetCdfResult};

/// Silence HDF5's automatic error printing to stderr.
///
/// The HDF5 C library prints verbose error messages to stderr even when errors
/// are handled gracefully by the Rust code (e.g., when probing optional
/// attributes). This disables that output by calling H5Eset_auto2 with null
/// handlers. Safe to call multiple times; call it early in `main()`.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 is thread-safe and we're passing null pointers
        // to disable error output, which is a documented valid use.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// [`DatasetReader`] backed by libnetcdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetCdfReader;

impl NetCdfReader {
    pub fn new() -> Self {
        Self
    }
}

fn var_type(vartype: &NcVariableType) -> Option<VarType> {
    match vartype {
        NcVariableType::Float(FloatType::F32) => Some(VarType::F32),
        NcVariableType::Float(FloatType::F64) => Some(VarType::F64),
        NcVariableType::Int(IntType::U8) => Some(VarType::U8),
        NcVariableType::Int(IntType::I8 | IntType::I16 | IntType::U16 | IntType::I32) => {
            Some(VarType::I32)
        }
        NcVariableType::Int(IntType::U32 | IntType::I64 | IntType::U64) => Some(VarType::I64),
        NcVariableType::Char => Some(VarType::U8),
        _ => None,
    }
}

fn attr_value(value: AttributeValue) -> Option<AttrValue> {
    let converted = match value {
        AttributeValue::Str(s) => AttrValue::Text(s),
        AttributeValue::Strs(v) => AttrValue::Text(v.join(" ")),
        AttributeValue::Uchar(v) => AttrValue::Int(v as i64),
        AttributeValue::Schar(v) => AttrValue::Int(v as i64),
        AttributeValue::Ushort(v) => AttrValue::Int(v as i64),
        AttributeValue::Short(v) => AttrValue::Int(v as i64),
        AttributeValue::Uint(v) => AttrValue::Int(v as i64),
        AttributeValue::Int(v) => AttrValue::Int(v as i64),
        AttributeValue::Longlong(v) => AttrValue::Int(v),
        AttributeValue::Ulonglong(v) => AttrValue::Int(v as i64),
        AttributeValue::Float(v) => AttrValue::Float(v as f64),
        AttributeValue::Double(v) => AttrValue::Float(v),
        AttributeValue::Uchars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Schars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Ushorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Shorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Uints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Ints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Longlongs(v) => AttrValue::Ints(v),
        AttributeValue::Ulonglongs(v) => AttrValue::Ints(v.into_iter().map(|x| x as i64).collect()),
        AttributeValue::Floats(v) => AttrValue::Floats(v.into_iter().map(f64::from).collect()),
        AttributeValue::Doubles(v) => AttrValue::Floats(v),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(converted)
}

fn read_attributes<'a>(
    attrs: impl Iterator<Item = netcdf::Attribute<'a>>,
) -> BTreeMap<String, AttrValue> {
    attrs
        .filter_map(|attr| {
            let name = attr.name().to_string();
            match attr.value().ok().and_then(attr_value) {
                Some(value) => Some((name, value)),
                None => {
                    debug!(attribute = %name, "Skipping attribute with unsupported type");
                    None
                }
            }
        })
        .collect()
}

/// Coordinate variables named by the `coordinates` attribute of any variable.
fn coordinate_names(variables: &[VariableInfo]) -> Vec<String> {
    let names: BTreeSet<String> = variables
        .iter()
        .filter_map(|v| v.attributes.get("coordinates"))
        .filter_map(AttrValue::as_text)
        .flat_map(|s| s.split_whitespace().map(str::to_string))
        .collect();
    names.into_iter().collect()
}

struct NativeSource {
    file: netcdf::File,
    types: BTreeMap<String, VarType>,
}

impl VariableSource for NativeSource {
    fn read(&self, variable: &str) -> NetCdfResult<VariableData> {
        let var = self
            .file
            .variable(variable)
            .ok_or_else(|| NetCdfError::MissingData(format!("{} variable", variable)))?;
        let var_type = self.types.get(variable).copied().ok_or_else(|| {
            NetCdfError::UnsupportedType {
                variable: variable.to_string(),
                reason: "no numeric mapping".to_string(),
            }
        })?;

        let fail = |e: netcdf::Error| {
            NetCdfError::InvalidFormat(format!("Failed to read {}: {}", variable, e))
        };

        // Read all extents with (..)
        let data = match var_type {
            VarType::F32 => VariableData::F32(var.get_values(..).map_err(fail)?),
            VarType::F64 => VariableData::F64(var.get_values(..).map_err(fail)?),
            VarType::I32 => VariableData::I32(var.get_values(..).map_err(fail)?),
            VarType::I64 => VariableData::I64(var.get_values(..).map_err(fail)?),
            VarType::U8 if matches!(var.vartype(), NcVariableType::Char) => {
                VariableData::U8(var.get_raw_values(..).map_err(fail)?)
            }
            VarType::U8 => VariableData::U8(var.get_values(..).map_err(fail)?),
        };
        Ok(data)
    }
}

impl DatasetReader for NetCdfReader {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn open(&self, path: &Path) -> NetCdfResult<Dataset> {
        silence_hdf5_errors();

        let file = netcdf::open(path)
            .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to open NetCDF: {}", e)))?;

        let dimensions: Vec<(String, usize)> = file
            .dimensions()
            .map(|d| (d.name().to_string(), d.len()))
            .collect();

        let mut variables = Vec::new();
        let mut types = BTreeMap::new();
        for var in file.variables() {
            let name = var.name().to_string();
            let Some(var_type) = var_type(&var.vartype()) else {
                debug!(variable = %name, "Skipping variable with unsupported type");
                continue;
            };
            types.insert(name.clone(), var_type);
            variables.push(VariableInfo {
                name,
                dimensions: var.dimensions().iter().map(|d| d.name().to_string()).collect(),
                var_type,
                attributes: read_attributes(var.attributes()),
            });
        }

        let attributes = read_attributes(file.attributes());
        let coordinates = coordinate_names(&variables);

        debug!(
            dimensions = dimensions.len(),
            variables = variables.len(),
            attributes = attributes.len(),
            "Opened dataset"
        );

        Ok(Dataset::new(
            path,
            dimensions,
            variables,
            attributes,
            coordinates,
            Box::new(NativeSource { file, types }),
        ))
    }
}
