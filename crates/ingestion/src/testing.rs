//! Configuration builders shared by unit tests.

use std::collections::BTreeMap;

use test_utils::{RunLayout, DEFAULT_START};

use crate::config::{
    BackoffConfig, DomainConfig, Geometry, PathsConfig, PollingConfig, RunConfiguration,
    RunSection,
};

/// Configuration over an 11x7 staggered grid with 2 levels and 3 soil levels.
pub(crate) fn run_config(start: &str, end: &str, step: i64) -> RunConfiguration {
    let mut domains = BTreeMap::new();
    domains.insert(
        "base".to_string(),
        DomainConfig {
            geometry: Geometry {
                e_we: Some(11),
                e_sn: Some(7),
                num_metgrid_levels: Some(2),
                num_metgrid_soil_levels: Some(3),
            },
            frames_per_outfile: Some(1),
        },
    );
    RunConfiguration {
        run: RunSection {
            id: Some("test-run".to_string()),
            start: Some(start.to_string()),
            end: Some(end.to_string()),
            time_step: Some(step),
        },
        paths: PathsConfig {
            run_dir: "/run".into(),
            out_dir: "/out".into(),
            logs_dir: None,
            store_dir: "/store".into(),
        },
        domains,
        filters: Default::default(),
        storage: Default::default(),
        polling: Default::default(),
    }
}

/// One-hour run at 60 s steps rooted in `layout`, with a fast backoff.
pub(crate) fn layout_config(layout: &RunLayout) -> RunConfiguration {
    let mut config = run_config(DEFAULT_START, "2018-01-01_01:00:00", 60);
    config.paths = PathsConfig {
        run_dir: layout.run_dir.clone(),
        out_dir: layout.out_dir.clone(),
        logs_dir: Some(layout.logs_dir.clone()),
        store_dir: layout.store_dir.clone(),
    };
    config.polling = PollingConfig {
        interval_secs: 1,
        backoff: BackoffConfig {
            initial_delay_ms: 1,
            max_delay_ms: 4,
            max_attempts: 3,
        },
        ..Default::default()
    };
    config
}
