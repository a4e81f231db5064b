//! Output file classification.
//!
//! File names follow `<prefix>_d<NN>_<YYYY-MM-DD_HH:MM:SS>_<PPPP>`, e.g.
//! `wrfout_d01_2018-01-01_00:10:00_0003`: sub-domain `01`, process `0003`,
//! first frame at 00:10.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use netcdf_parser::{Dataset, WRF_DATETIME_FORMAT};
use tracing::debug;

use crate::error::{IngestionError, Result};

/// Rank of the process that writes the run's first file.
pub const PRIMARY_RANK: u32 = 0;

const TIMESTAMP_LEN: usize = "YYYY-MM-DD_HH:MM:SS".len();

/// Logical partition: one simulation process on one sub-domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub process: u32,
    pub domain: u32,
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{:02}/{:04}", self.domain, self.process)
    }
}

/// One physical output file. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFile {
    pub path: PathBuf,
    pub prefix: String,
    pub domain: u32,
    pub process: u32,
    /// Timestamp of the file's first frame.
    pub timestamp: NaiveDateTime,
}

impl DatasetFile {
    pub fn parse(path: &Path) -> Result<Self> {
        let fail = |reason: &str| IngestionError::Parse {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| fail("file name is not valid UTF-8"))?;

        let (rest, process) = name
            .rsplit_once('_')
            .ok_or_else(|| fail("missing process suffix"))?;
        if process.is_empty() || !process.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail("process suffix is not numeric"));
        }
        let process: u32 = process
            .parse()
            .map_err(|_| fail("process suffix out of range"))?;

        let split = rest
            .len()
            .checked_sub(TIMESTAMP_LEN)
            .ok_or_else(|| fail("missing timestamp"))?;
        let (head, timestamp) = match (rest.get(..split), rest.get(split..)) {
            (Some(h), Some(t)) => (h, t),
            _ => return Err(fail("missing timestamp")),
        };
        let timestamp = NaiveDateTime::parse_from_str(timestamp, WRF_DATETIME_FORMAT)
            .map_err(|_| fail("malformed timestamp"))?;

        let head = head
            .strip_suffix('_')
            .ok_or_else(|| fail("missing separator before timestamp"))?;
        let (prefix, domain) = head
            .rsplit_once('_')
            .ok_or_else(|| fail("missing domain"))?;
        let domain = domain
            .strip_prefix('d')
            .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|d| d.parse::<u32>().ok())
            .ok_or_else(|| fail("malformed domain, expected d<NN>"))?;
        if prefix.is_empty() {
            return Err(fail("missing prefix"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            prefix: prefix.to_string(),
            domain,
            process,
            timestamp,
        })
    }

    pub fn key(&self) -> PartitionKey {
        PartitionKey {
            process: self.process,
            domain: self.domain,
        }
    }

    pub fn is_primary_rank(&self) -> bool {
        self.process == PRIMARY_RANK
    }

    /// Written by the primary rank at the simulation start time.
    pub fn is_first_of_run(&self, dataset: &Dataset) -> bool {
        if !self.is_primary_rank() {
            return false;
        }
        match dataset.simulation_start() {
            Ok(start) => start == self.timestamp,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No usable simulation start");
                false
            }
        }
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The files of one partition, newest first.
#[derive(Debug, Clone)]
pub struct Partition {
    pub key: PartitionKey,
    files: Vec<DatasetFile>,
}

impl Partition {
    /// The file currently considered the partition's last. Files are kept
    /// newest first with timestamp ties broken on path.
    pub fn newest(&self) -> Option<&DatasetFile> {
        self.files.first()
    }

    /// Split into older files (oldest first) and the newest file.
    pub fn split_newest(mut self) -> (Vec<DatasetFile>, Option<DatasetFile>) {
        let newest = if self.files.is_empty() {
            None
        } else {
            Some(self.files.remove(0))
        };
        self.files.reverse();
        (self.files, newest)
    }
}

/// Group files by partition; partitions ordered by key.
pub fn group_into_partitions(files: impl IntoIterator<Item = DatasetFile>) -> Vec<Partition> {
    let mut groups: BTreeMap<PartitionKey, Vec<DatasetFile>> = BTreeMap::new();
    for file in files {
        groups.entry(file.key()).or_default().push(file);
    }
    groups
        .into_iter()
        .map(|(key, mut files)| {
            files.sort_by(|a, b| {
                b.timestamp
                    .cmp(&a.timestamp)
                    .then_with(|| b.path.cmp(&a.path))
            });
            Partition { key, files }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcdf_parser::AttrValue;
    use test_utils::{WrfFileBuilder, DEFAULT_START};

    fn parse(name: &str) -> Result<DatasetFile> {
        DatasetFile::parse(&Path::new("/out").join(name))
    }

    #[test]
    fn test_parse_name() {
        let f = parse("wrfout_d01_2018-01-01_00:10:00_0003").unwrap();
        assert_eq!(f.prefix, "wrfout");
        assert_eq!(f.domain, 1);
        assert_eq!(f.process, 3);
        assert_eq!(f.timestamp.to_string(), "2018-01-01 00:10:00");
    }

    #[test]
    fn test_same_domain_distinct_processes() {
        let a = parse("out_d01_2018-01-01_00:00:00_0000").unwrap();
        let b = parse("out_d01_2018-01-01_00:00:00_0001").unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(a.domain, b.domain);
        assert!(a.is_primary_rank());
        assert!(!b.is_primary_rank());
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in [
            "rsl.out.0000",
            "wrfout_d01_2018-01-01_00:10:00",
            "wrfout_d01_2018-01-01_00:10:00_00x3",
            "wrfout_dXX_2018-01-01_00:10:00_0003",
            "wrfout_d01_2018-13-01_00:10:00_0003",
            "d01_2018-01-01_00:10:00_0003",
            "_d01_2018-01-01_00:10:00_0003",
            "wrfout_d01_2018-01-01_00:10:00.nc_0003",
        ] {
            assert!(
                matches!(parse(name), Err(IngestionError::Parse { .. })),
                "{} should not parse",
                name
            );
        }
    }

    #[test]
    fn test_first_of_run() {
        let ds = WrfFileBuilder::new("/out", DEFAULT_START).build().dataset();
        let first = DatasetFile::parse(ds.path()).unwrap();
        assert!(first.is_first_of_run(&ds));

        let other_rank = WrfFileBuilder::new("/out", DEFAULT_START).process(1).build();
        let f = DatasetFile::parse(&other_rank.path).unwrap();
        assert!(!f.is_first_of_run(&other_rank.dataset()));

        let later = WrfFileBuilder::new("/out", "2018-01-01_00:10:00").build();
        let f = DatasetFile::parse(&later.path).unwrap();
        assert!(!f.is_first_of_run(&later.dataset()));

        let restarted = WrfFileBuilder::new("/out", "2018-01-01_00:10:00")
            .attribute("SIMULATION_START_DATE", AttrValue::Text("2018-01-01_00:10:00".into()))
            .build();
        let f = DatasetFile::parse(&restarted.path).unwrap();
        assert!(f.is_first_of_run(&restarted.dataset()));
    }

    #[test]
    fn test_grouping_orders_newest_first() {
        let files = [
            "wrfout_d01_2018-01-01_00:10:00_0000",
            "wrfout_d01_2018-01-01_00:00:00_0001",
            "wrfout_d01_2018-01-01_00:20:00_0000",
            "wrfout_d01_2018-01-01_00:00:00_0000",
        ]
        .into_iter()
        .map(|n| parse(n).unwrap());

        let partitions = group_into_partitions(files);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].key, PartitionKey { process: 0, domain: 1 });
        assert_eq!(
            partitions[0].newest().unwrap().display_name(),
            "wrfout_d01_2018-01-01_00:20:00_0000"
        );

        let (older, newest) = partitions[0].clone().split_newest();
        let names: Vec<String> = older.iter().map(DatasetFile::display_name).collect();
        assert_eq!(
            names,
            vec![
                "wrfout_d01_2018-01-01_00:00:00_0000",
                "wrfout_d01_2018-01-01_00:10:00_0000"
            ]
        );
        assert!(newest.is_some());

        let (older, newest) = partitions[1].clone().split_newest();
        assert!(older.is_empty());
        assert_eq!(newest.unwrap().process, 1);
    }

    #[test]
    fn test_timestamp_ties_break_on_path() {
        let a = DatasetFile::parse(Path::new("/a/wrfout_d01_2018-01-01_00:00:00_0000")).unwrap();
        let b = DatasetFile::parse(Path::new("/b/wrfout_d01_2018-01-01_00:00:00_0000")).unwrap();
        let partitions = group_into_partitions(vec![a, b]);
        assert_eq!(
            partitions[0].newest().unwrap().path,
            PathBuf::from("/b/wrfout_d01_2018-01-01_00:00:00_0000")
        );
    }
}
