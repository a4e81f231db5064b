//! Shared setup for ingestion integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use ingestion::RunConfiguration;
use test_utils::{MemoryDatasetReader, RunLayout};

pub const RUN_ID: &str = "it-run";

/// Staggered grid extents of the test domain.
pub const E_WE: usize = 11;
pub const E_SN: usize = 7;

/// Run configuration for `layout`, parsed from YAML like the service does.
pub fn config_for(layout: &RunLayout) -> RunConfiguration {
    let yaml = format!(
        r#"
run:
  id: {run_id}
  start: "2018-01-01_00:00:00"
  end: "2018-01-01_01:00:00"
  time_step: 60
paths:
  run_dir: "{run}"
  out_dir: "{out}"
  logs_dir: "{logs}"
  store_dir: "{store}"
domains:
  base:
    geometry:
      e_we: {e_we}
      e_sn: {e_sn}
      num_metgrid_levels: 2
      num_metgrid_soil_levels: 3
    frames_per_outfile: 1
polling:
  interval_secs: 1
  backoff:
    initial_delay_ms: 1
    max_delay_ms: 4
    max_attempts: 3
"#,
        run_id = RUN_ID,
        run = layout.run_dir.display(),
        out = layout.out_dir.display(),
        logs = layout.logs_dir.display(),
        store = layout.store_dir.display(),
        e_we = E_WE,
        e_sn = E_SN,
    );
    let config: RunConfiguration = serde_yaml::from_str(&yaml).expect("valid test config");
    config.validate().expect("config validates");
    config
}

/// Publish one single-frame file of `rank` whose patch covers the left
/// (`rank` 0) or right (`rank` 1) half of the grid.
pub fn publish_half(
    layout: &RunLayout,
    reader: &Arc<MemoryDatasetReader>,
    timestamp: &str,
    step: usize,
    rank: u32,
) -> PathBuf {
    let we = if rank == 0 { (1, 5) } else { (6, E_WE - 1) };
    let file = layout
        .file(timestamp)
        .process(rank)
        .grid(E_WE, E_SN)
        .patch(we, (1, E_SN - 1))
        .frames(1, step)
        .build();
    layout.publish(reader, file)
}

pub fn timestamp(step: usize) -> String {
    format!("2018-01-01_00:{:02}:00", step)
}
