//! NetCDF reader for time-stepped simulation output (WRF `wrfout_*` files).
//!
//! The [`DatasetReader`] trait is the seam used by the ingestion core; the
//! native implementation wraps libnetcdf via the `netcdf` crate. Tests
//! substitute in-memory readers built from [`Dataset::new`].
//!
//! # Output file structure
//!
//! Each file is written by one simulation process for one sub-domain and
//! carries its patch placement as global attributes, e.g.
//! `WEST-EAST_PATCH_START_UNSTAG` / `WEST-EAST_PATCH_END_UNSTAG` (1-based,
//! inclusive), plus `SIMULATION_START_DATE`.

pub mod dataset;
pub mod error;
pub mod native;

pub use dataset::{
    AttrValue, Dataset, DatasetReader, VarType, VariableData, VariableInfo, VariableSource,
    SIMULATION_START_ATTR, WRF_DATETIME_FORMAT,
};
pub use error::{NetCdfError, NetCdfResult};
pub use native::{silence_hdf5_errors, NetCdfReader};
