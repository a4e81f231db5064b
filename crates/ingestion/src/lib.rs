//! Incremental ingestion of simulation output into an array store.
//!
//! A running simulation writes one file per process, sub-domain and output
//! interval. The [`Orchestrator`] polls the output directory, groups files
//! into partitions, withholds each partition's newest file until the
//! simulation has completed, and drives the [`FrameWriter`] which places
//! every frame at its global coordinates. A [`CheckpointStore`] records
//! finished files so a restarted writer never repeats or loses work.
//!
//! # Architecture
//!
//! - [`coordinates`]: global dimension bounds and per-file slices
//! - [`descriptor`]: file name classification and partitioning
//! - [`writer`]: store initialization, metadata and frame writes
//! - [`checkpoint`]: durable per-host progress record
//! - [`orchestrator`]: the polling state machine
//! - [`waiter`]: waiting for every writer to finish

pub mod checkpoint;
pub mod config;
pub mod coordinates;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod simulation;
pub mod waiter;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-exports
pub use checkpoint::{CheckpointStore, FileState};
pub use config::{NameFilter, RunConfiguration};
pub use coordinates::{dimension_domains, CoordinateMapper, DimensionDomains, TIME_DIM};
pub use descriptor::{group_into_partitions, DatasetFile, Partition, PartitionKey};
pub use error::{IngestionError, Result};
pub use orchestrator::{Orchestrator, RunState};
pub use retry::Backoff;
pub use simulation::{wait_for_path, DirectoryScanner, FileSource, MasterLog, SimulationLog};
pub use waiter::CompletionWaiter;
pub use writer::{FrameWriter, StoreLayout, WriteReport};
