//! Run configuration.
//!
//! Loaded once at startup (see the `ingester` service's config loader) and
//! shared read-only. Geometry and time bounds are optional at parse time and
//! validated by [`CoordinateMapper`](crate::CoordinateMapper), so a missing
//! field is reported as a configuration error rather than defaulted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};

/// Domain used when the configuration names none explicitly.
pub const BASE_DOMAIN: &str = "base";

/// Accepted timestamp layouts for `run.start` / `run.end`.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d_%H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub run: RunSection,
    pub paths: PathsConfig,
    #[serde(default)]
    pub domains: BTreeMap<String, DomainConfig>,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSection {
    /// Run identifier; names the run's group in the array store.
    pub id: Option<String>,
    /// Simulation start, `YYYY-MM-DD_HH:MM:SS`.
    pub start: Option<String>,
    pub end: Option<String>,
    /// Output time step in seconds.
    pub time_step: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the simulation's master log.
    pub run_dir: PathBuf,
    /// Directory the simulation writes output files into.
    pub out_dir: PathBuf,
    /// Root for per-host checkpoints. Defaults to `./logs`.
    pub logs_dir: Option<PathBuf>,
    /// Root of the array store.
    pub store_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub geometry: Geometry,
    pub frames_per_outfile: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub e_we: Option<u64>,
    pub e_sn: Option<u64>,
    pub num_metgrid_levels: Option<u64>,
    pub num_metgrid_soil_levels: Option<u64>,
}

/// A list of names given either as a comma-separated string or a YAML list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    Csv(String),
    List(Vec<String>),
}

impl Default for NameList {
    fn default() -> Self {
        NameList::List(Vec::new())
    }
}

impl NameList {
    pub fn names(&self) -> BTreeSet<String> {
        let items: Vec<&str> = match self {
            NameList::Csv(s) => s.split(',').collect(),
            NameList::List(v) => v.iter().map(String::as_str).collect(),
        };
        items
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Variables to keep; empty keeps all.
    #[serde(default)]
    pub variables: NameList,
    /// Attributes to keep; empty keeps all.
    #[serde(default)]
    pub attributes: NameList,
    #[serde(default)]
    pub exclude_variables: NameList,
    #[serde(default)]
    pub exclude_attributes: NameList,
}

/// Include/exclude name filter. An empty include set admits every name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl NameFilter {
    pub fn new(include: BTreeSet<String>, exclude: BTreeSet<String>) -> Self {
        Self { include, exclude }
    }

    pub fn allows(&self, name: &str) -> bool {
        (self.include.is_empty() || self.include.contains(name)) && !self.exclude.contains(name)
    }
}

impl FilterConfig {
    pub fn variable_filter(&self) -> NameFilter {
        NameFilter::new(self.variables.names(), self.exclude_variables.names())
    }

    pub fn attribute_filter(&self) -> NameFilter {
        NameFilter::new(self.attributes.names(), self.exclude_attributes.names())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub remote: Option<RemoteStorage>,
}

/// Parameters of a remote (HDFS) backend. Accepted and logged; only the
/// filesystem backend is implemented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStorage {
    pub user: String,
    pub namenode_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_data_file_prefix")]
    pub data_file_prefix: String,
    #[serde(default = "default_master_log")]
    pub master_log: String,
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_interval_secs() -> u64 {
    5
}

fn default_data_file_prefix() -> String {
    "wrfout".to_string()
}

fn default_master_log() -> String {
    "rsl.out.0000".to_string()
}

fn default_completion_marker() -> String {
    "SUCCESS COMPLETE WRF".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            data_file_prefix: default_data_file_prefix(),
            master_log: default_master_log(),
            completion_marker: default_completion_marker(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Bounded exponential backoff for "wait until node exists".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    8
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

pub(crate) fn parse_datetime(field: &str, value: &str) -> Result<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value.trim(), fmt).ok())
        .ok_or_else(|| IngestionError::Config(format!("{} '{}' is not a valid timestamp", field, value)))
}

impl RunConfiguration {
    /// Fill in a time-based run id when none is configured.
    pub fn ensure_run_id(&mut self) {
        let missing = self.run.id.as_deref().map_or(true, |id| id.trim().is_empty());
        if missing {
            let generated = chrono::Utc::now().timestamp().to_string();
            tracing::warn!(run_id = %generated, "run.id not configured, using a time-based id");
            self.run.id = Some(generated);
        }
    }

    pub fn run_id(&self) -> Result<&str> {
        self.run
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IngestionError::Config("run.id is required".to_string()))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.paths.logs_dir.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("logs")
        })
    }

    pub fn master_log_path(&self) -> PathBuf {
        self.paths.run_dir.join(&self.polling.master_log)
    }

    pub fn out_dir(&self) -> &Path {
        &self.paths.out_dir
    }

    /// The `base` domain, or the only configured one.
    pub fn base_domain(&self) -> Result<&DomainConfig> {
        if let Some(domain) = self.domains.get(BASE_DOMAIN) {
            return Ok(domain);
        }
        match self.domains.len() {
            1 => Ok(self.domains.values().next().ok_or_else(|| {
                IngestionError::Config("no domain configured".to_string())
            })?),
            0 => Err(IngestionError::Config("no domain configured".to_string())),
            _ => Err(IngestionError::Config(format!(
                "several domains configured but none named '{}'",
                BASE_DOMAIN
            ))),
        }
    }

    /// Check the fields every command needs. Geometry and time are checked
    /// when the coordinate mapper is built.
    pub fn validate(&self) -> Result<()> {
        if self.paths.out_dir.as_os_str().is_empty() {
            return Err(IngestionError::Config("paths.out_dir cannot be empty".to_string()));
        }
        if self.paths.run_dir.as_os_str().is_empty() {
            return Err(IngestionError::Config("paths.run_dir cannot be empty".to_string()));
        }
        if self.paths.store_dir.as_os_str().is_empty() {
            return Err(IngestionError::Config("paths.store_dir cannot be empty".to_string()));
        }
        if self.polling.data_file_prefix.is_empty() {
            return Err(IngestionError::Config(
                "polling.data_file_prefix cannot be empty".to_string(),
            ));
        }
        if self.polling.backoff.max_attempts == 0 {
            return Err(IngestionError::Config(
                "polling.backoff.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
