//! Array storage for simulation output.
//!
//! Provides a single [`ArrayStore`] contract with two backends:
//! - [`ZarrArrayStore`]: Zarr V3 on a local or mounted filesystem
//! - [`MemoryArrayStore`]: in-process store with a call log and fault injection, for tests
//!
//! Names are `/`-separated paths relative to the store root
//! (e.g. `run-1/variables/T2`). Dense arrays are addressed by global
//! coordinates; key-value stores hold string attributes.

pub mod error;
pub mod layout;
pub mod memory;
pub mod schema;
pub mod store;
pub mod zarr;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryArrayStore, StoreCall};
pub use schema::{ArrayData, ArraySchema, Dimension, ElementType};
pub use store::ArrayStore;
pub use zarr::ZarrArrayStore;
