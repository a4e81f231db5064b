//! Incremental discovery of output files and checkpointed writes.
//!
//! The newest file of every partition may still be open in the simulation,
//! so it is withheld until the run is known complete. Older files are
//! written as soon as they are discovered.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use netcdf_parser::DatasetReader;
use storage::ArrayStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::RunConfiguration;
use crate::coordinates::CoordinateMapper;
use crate::descriptor::{group_into_partitions, DatasetFile};
use crate::error::Result;
use crate::simulation::{DirectoryScanner, FileSource, MasterLog, SimulationLog};
use crate::writer::FrameWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Simulation running; newest file per partition withheld.
    Polling,
    /// Simulation finished; flushing what remains.
    Draining,
    /// Every file handled and the run marked complete.
    Completed,
}

pub struct Orchestrator {
    files: Box<dyn FileSource>,
    log: Box<dyn SimulationLog>,
    reader: Arc<dyn DatasetReader>,
    writer: FrameWriter,
    checkpoint: CheckpointStore,
    seen: HashSet<PathBuf>,
    state: RunState,
    interval: Duration,
    exit_on_complete: bool,
}

impl Orchestrator {
    /// Orchestrator over the configured output directory, master log and
    /// this host's checkpoint.
    pub fn new(
        config: &RunConfiguration,
        store: Arc<dyn ArrayStore>,
        reader: Arc<dyn DatasetReader>,
    ) -> Result<Self> {
        let files = DirectoryScanner::new(config.out_dir(), &config.polling.data_file_prefix);
        let log = MasterLog::new(config.master_log_path(), &config.polling.completion_marker);
        let checkpoint = CheckpointStore::for_host(&config.logs_dir())?;
        Self::with_sources(
            config,
            store,
            reader,
            Box::new(files),
            Box::new(log),
            checkpoint,
        )
    }

    pub fn with_sources(
        config: &RunConfiguration,
        store: Arc<dyn ArrayStore>,
        reader: Arc<dyn DatasetReader>,
        files: Box<dyn FileSource>,
        log: Box<dyn SimulationLog>,
        checkpoint: CheckpointStore,
    ) -> Result<Self> {
        let mapper = Arc::new(CoordinateMapper::from_config(config)?);
        let writer = FrameWriter::new(store, mapper, config)?;

        let seen: HashSet<PathBuf> = checkpoint.processed_paths().into_iter().collect();
        let state = if checkpoint.is_complete() {
            RunState::Completed
        } else {
            RunState::Polling
        };
        info!(
            checkpoint = %checkpoint.path().display(),
            processed = seen.len(),
            state = ?state,
            "Orchestrator ready"
        );

        Ok(Self {
            files,
            log,
            reader,
            writer,
            checkpoint,
            seen,
            state,
            interval: config.polling.interval(),
            exit_on_complete: false,
        })
    }

    /// Return from [`run`](Self::run) once the run is complete instead of
    /// idling until cancelled.
    pub fn exit_on_complete(mut self, exit: bool) -> Self {
        self.exit_on_complete = exit;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn writer(&self) -> &FrameWriter {
        &self.writer
    }

    /// Files present and not yet seen, parsed. Unparseable names are logged
    /// once and ignored from then on.
    fn unseen_files(&mut self) -> Vec<DatasetFile> {
        let paths = match self.files.list() {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "Failed to list output files");
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        for path in paths {
            if self.seen.contains(&path) {
                continue;
            }
            match DatasetFile::parse(&path) {
                Ok(file) => files.push(file),
                Err(e) => {
                    warn!(error = %e, "Ignoring file");
                    self.seen.insert(path);
                }
            }
        }
        files
    }

    /// Whether the store is ready for `file`. An unreachable store counts as
    /// not initialized.
    async fn store_initialized(&self, file: &DatasetFile) -> bool {
        match self.writer.is_initialized().await {
            Ok(initialized) => initialized,
            Err(e) => {
                warn!(file = %file.display_name(), error = %e, "Could not check store initialization");
                false
            }
        }
    }

    /// Write one file and record the outcome. Returns `false` when the file
    /// was deferred and stays unseen.
    async fn process(&mut self, file: DatasetFile) -> Result<bool> {
        let dataset = match self.reader.open(&file.path) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(file = %file.display_name(), error = %e, "Failed to open file");
                self.checkpoint.mark_failed(&file.path)?;
                self.seen.insert(file.path);
                return Ok(true);
            }
        };

        if !file.is_first_of_run(&dataset) && !self.store_initialized(&file).await {
            if self.state == RunState::Polling {
                debug!(file = %file.display_name(), "Store not initialized yet, deferring");
                return Ok(false);
            }
            warn!(file = %file.display_name(), "Store not initialized, writing anyway");
        }

        self.checkpoint.mark_processing(&file.path)?;
        let outcome = self.writer.write_file(&file, &dataset).await;
        drop(dataset);

        match outcome {
            Ok(report) if report.is_clean() => {
                self.checkpoint.mark_processed(&file.path)?;
            }
            Ok(report) => {
                warn!(
                    file = %file.display_name(),
                    frames_failed = report.frames_failed,
                    attribute_failures = report.attribute_failures,
                    metadata_failures = report.metadata_failures,
                    "File written with failures"
                );
                self.checkpoint.mark_failed(&file.path)?;
            }
            Err(e) => {
                warn!(file = %file.display_name(), error = %e, "Failed to write file");
                self.checkpoint.mark_failed(&file.path)?;
            }
        }
        self.seen.insert(file.path);
        Ok(true)
    }

    /// One polling iteration.
    pub async fn tick(&mut self) -> Result<RunState> {
        if self.state == RunState::Completed {
            return Ok(self.state);
        }

        // Sampled before listing: every file present afterwards is final.
        if self.state == RunState::Polling && self.log.has_completed() {
            info!("Simulation completed, draining remaining files");
            self.state = RunState::Draining;
        }

        let new_files = self.unseen_files();
        if !new_files.is_empty() {
            debug!(count = new_files.len(), "New files discovered");
        }

        let mut deferred = 0;
        for partition in group_into_partitions(new_files) {
            let key = partition.key;
            let (older, newest) = partition.split_newest();
            for file in older {
                if !self.process(file).await? {
                    deferred += 1;
                }
            }
            if let Some(newest) = newest {
                if self.state == RunState::Draining {
                    if !self.process(newest).await? {
                        deferred += 1;
                    }
                } else {
                    debug!(partition = %key, file = %newest.display_name(), "Withholding newest file");
                }
            }
        }

        if deferred > 0 {
            debug!(deferred, "Files deferred to a later poll");
        }

        if self.state == RunState::Draining {
            let remaining = self.unseen_files();
            if remaining.is_empty() {
                if let Err(e) = self.writer.consolidate() {
                    warn!(error = %e, "Consolidation failed");
                }
                self.checkpoint.mark_run_complete()?;
                self.state = RunState::Completed;
                info!("Run complete");
            } else {
                debug!(remaining = remaining.len(), "Files remain after drain");
            }
        }

        Ok(self.state)
    }

    /// Poll at the configured interval until cancelled, or until complete
    /// when `exit_on_complete` is set.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunState> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs_f64(), "Starting ingestion loop");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(state = ?self.state, "Shutdown requested");
                    return Ok(self.state);
                }
                _ = ticker.tick() => {}
            }

            if self.tick().await? == RunState::Completed {
                if self.exit_on_complete {
                    return Ok(self.state);
                }
                cancel.cancelled().await;
                info!("Shutdown requested");
                return Ok(self.state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::FileState;
    use crate::testing::layout_config;
    use storage::MemoryArrayStore;
    use test_utils::{MemoryDatasetReader, RunLayout, DEFAULT_START};

    struct Harness {
        layout: RunLayout,
        reader: Arc<MemoryDatasetReader>,
        store: Arc<MemoryArrayStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                layout: RunLayout::new(),
                reader: Arc::new(MemoryDatasetReader::new()),
                store: Arc::new(MemoryArrayStore::new()),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(
                &layout_config(&self.layout),
                self.store.clone(),
                self.reader.clone(),
            )
            .unwrap()
        }

        fn publish(&self, timestamp: &str, step: usize, process: u32) -> PathBuf {
            let file = self
                .layout
                .file(timestamp)
                .process(process)
                .frames(1, step)
                .build();
            self.layout.publish(&self.reader, file)
        }
    }

    #[tokio::test]
    async fn test_newest_file_withheld_until_completion() {
        let h = Harness::new();
        let mut orch = h.orchestrator();
        let t0 = h.publish(DEFAULT_START, 0, 0);
        let t1 = h.publish("2018-01-01_00:01:00", 1, 0);

        assert_eq!(orch.tick().await.unwrap(), RunState::Polling);
        assert!(orch.checkpoint().is_processed(&t0));
        assert_eq!(orch.checkpoint().state(&t1), None);

        let t2 = h.publish("2018-01-01_00:02:00", 2, 0);
        orch.tick().await.unwrap();
        assert!(orch.checkpoint().is_processed(&t1));
        assert_eq!(orch.checkpoint().state(&t2), None);

        h.layout.write_master_log(true);
        assert_eq!(orch.tick().await.unwrap(), RunState::Completed);
        assert!(orch.checkpoint().is_processed(&t2));
        assert!(orch.checkpoint().is_complete());
        for path in [&t0, &t1, &t2] {
            assert_eq!(h.reader.open_count(path), 1);
        }
        assert_eq!(h.store.write_count("test-run/variables/T2"), 3);
    }

    #[tokio::test]
    async fn test_restart_skips_processed_files() {
        let h = Harness::new();
        let t0 = h.publish(DEFAULT_START, 0, 0);
        let t1 = h.publish("2018-01-01_00:01:00", 1, 0);
        h.orchestrator().tick().await.unwrap();
        assert_eq!(h.reader.open_count(&t0), 1);

        let mut restarted = h.orchestrator();
        h.layout.write_master_log(true);
        assert_eq!(restarted.tick().await.unwrap(), RunState::Completed);
        assert_eq!(h.reader.open_count(&t0), 1);
        assert_eq!(h.reader.open_count(&t1), 1);

        // A completed checkpoint starts completed.
        assert_eq!(h.orchestrator().state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_other_ranks_wait_for_initialization() {
        let h = Harness::new();
        let mut orch = h.orchestrator();
        let r1_t0 = h.publish(DEFAULT_START, 0, 1);
        h.publish("2018-01-01_00:01:00", 1, 1);

        orch.tick().await.unwrap();
        assert_eq!(orch.checkpoint().state(&r1_t0), None);
        assert!(h.store.calls().is_empty());

        let r0_t0 = h.publish(DEFAULT_START, 0, 0);
        h.publish("2018-01-01_00:01:00", 1, 0);
        orch.tick().await.unwrap();
        assert!(orch.checkpoint().is_processed(&r0_t0));
        assert!(orch.checkpoint().is_processed(&r1_t0));
    }

    #[tokio::test]
    async fn test_store_errors_do_not_stop_polling() {
        let h = Harness::new();
        let mut orch = h.orchestrator();
        let r1_t0 = h.publish(DEFAULT_START, 0, 1);
        h.publish("2018-01-01_00:01:00", 1, 1);

        // Recovers within the backoff.
        h.store.fail_exists_for(2);
        assert_eq!(orch.tick().await.unwrap(), RunState::Polling);
        assert_eq!(orch.checkpoint().state(&r1_t0), None);

        // Outlasts the backoff: deferred, not fatal.
        h.store.fail_exists_for(100);
        assert_eq!(orch.tick().await.unwrap(), RunState::Polling);
        assert_eq!(orch.checkpoint().state(&r1_t0), None);

        h.store.fail_exists_for(0);
        h.publish(DEFAULT_START, 0, 0);
        h.publish("2018-01-01_00:01:00", 1, 0);
        orch.tick().await.unwrap();
        assert!(orch.checkpoint().is_processed(&r1_t0));
    }

    #[tokio::test]
    async fn test_failed_file_not_retried_in_loop() {
        let h = Harness::new();
        let mut orch = h.orchestrator();
        h.store.fail_writes_to("test-run/variables/U");
        let t0 = h.publish(DEFAULT_START, 0, 0);
        h.layout.write_master_log(true);

        assert_eq!(orch.tick().await.unwrap(), RunState::Completed);
        assert_eq!(orch.checkpoint().state(&t0), Some(FileState::Failed));
        assert_eq!(h.store.write_count("test-run/variables/T2"), 1);

        orch.tick().await.unwrap();
        assert_eq!(h.reader.open_count(&t0), 1);
    }

    #[tokio::test]
    async fn test_unparseable_names_are_ignored() {
        let h = Harness::new();
        let mut orch = h.orchestrator();
        std::fs::write(h.layout.out_dir.join("wrfout_garbage"), b"").unwrap();
        h.layout.write_master_log(true);
        assert_eq!(orch.tick().await.unwrap(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_run_exits_on_completion() {
        let h = Harness::new();
        let t0 = h.publish(DEFAULT_START, 0, 0);
        h.layout.write_master_log(true);

        let state = h
            .orchestrator()
            .exit_on_complete(true)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state, RunState::Completed);
        assert_eq!(h.reader.open_count(&t0), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = Harness::new();
        h.publish(DEFAULT_START, 0, 0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = h.orchestrator().run(cancel).await.unwrap();
        assert_eq!(state, RunState::Polling);
    }
}
