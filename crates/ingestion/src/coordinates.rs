//! Mapping between file-local and global simulation coordinates.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::NaiveDateTime;
use netcdf_parser::Dataset;

use crate::config::{parse_datetime, RunConfiguration};
use crate::error::{IngestionError, Result};

/// Name of the time dimension.
pub const TIME_DIM: &str = "Time";

/// Inclusive `(min, max)` bounds per global dimension.
pub type DimensionDomains = BTreeMap<String, (u64, u64)>;

fn required<T: Copy>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| IngestionError::Config(format!("{} is required", field)))
}

/// Global dimension bounds derived from the run configuration.
///
/// `Time` covers `(end - start) / time_step` steps; spatial bounds come from
/// the base domain geometry, staggered dimensions one cell wider.
pub fn dimension_domains(config: &RunConfiguration) -> Result<DimensionDomains> {
    let mapper = CoordinateMapper::from_config(config)?;
    Ok(mapper.domains)
}

/// Derives global bounds and per-file slices. Pure; built once per run.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    start: NaiveDateTime,
    end: NaiveDateTime,
    time_step_secs: i64,
    frames_per_file: u32,
    domains: DimensionDomains,
}

impl CoordinateMapper {
    pub fn from_config(config: &RunConfiguration) -> Result<Self> {
        let start = parse_datetime(
            "run.start",
            config
                .run
                .start
                .as_deref()
                .ok_or_else(|| IngestionError::Config("run.start is required".to_string()))?,
        )?;
        let end = parse_datetime(
            "run.end",
            config
                .run
                .end
                .as_deref()
                .ok_or_else(|| IngestionError::Config("run.end is required".to_string()))?,
        )?;
        let time_step_secs = required(config.run.time_step, "run.time_step")?;
        if time_step_secs <= 0 {
            return Err(IngestionError::Config(format!(
                "run.time_step must be positive, got {}",
                time_step_secs
            )));
        }
        if end < start {
            return Err(IngestionError::Config(format!(
                "run.end {} is before run.start {}",
                end, start
            )));
        }

        let domain = config.base_domain()?;
        let geometry = &domain.geometry;
        let e_we = required(geometry.e_we, "geometry.e_we")?;
        let e_sn = required(geometry.e_sn, "geometry.e_sn")?;
        let levels = required(geometry.num_metgrid_levels, "geometry.num_metgrid_levels")?;
        let soil_levels = required(
            geometry.num_metgrid_soil_levels,
            "geometry.num_metgrid_soil_levels",
        )?;
        for (field, value) in [
            ("geometry.e_we", e_we),
            ("geometry.e_sn", e_sn),
            ("geometry.num_metgrid_levels", levels),
        ] {
            if value == 0 {
                return Err(IngestionError::Config(format!("{} must be positive", field)));
            }
        }

        let frames_per_file = required(domain.frames_per_outfile, "frames_per_outfile")?;
        if frames_per_file == 0 {
            return Err(IngestionError::Config(
                "frames_per_outfile must be positive".to_string(),
            ));
        }

        let steps = (end - start).num_seconds() / time_step_secs;

        let domains: DimensionDomains = [
            (TIME_DIM, (0, steps as u64)),
            ("bottom_top", (0, levels - 1)),
            ("bottom_top_stag", (0, levels)),
            ("soil_layers_stag", (0, soil_levels)),
            ("south_north", (0, e_sn - 1)),
            ("south_north_stag", (0, e_sn)),
            ("west_east", (0, e_we - 1)),
            ("west_east_stag", (0, e_we)),
        ]
        .into_iter()
        .map(|(name, bounds)| (name.to_string(), bounds))
        .collect();

        Ok(Self {
            start,
            end,
            time_step_secs,
            frames_per_file,
            domains,
        })
    }

    pub fn dimension_domains(&self) -> &DimensionDomains {
        &self.domains
    }

    pub fn domain(&self, dimension: &str) -> Option<(u64, u64)> {
        self.domains.get(dimension).copied()
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn frames_per_file(&self) -> u32 {
        self.frames_per_file
    }

    /// Whole time steps elapsed since the run start (floored, days included).
    pub fn step_number(&self, timestamp: NaiveDateTime) -> i64 {
        (timestamp - self.start)
            .num_seconds()
            .div_euclid(self.time_step_secs)
    }

    /// Global `Time` range of one frame of a file starting at `timestamp`.
    pub fn time_slice(&self, timestamp: NaiveDateTime, frame: u32) -> Result<Range<u64>> {
        let step = self.step_number(timestamp);
        if step < 0 {
            return Err(IngestionError::WriteFailure {
                target: TIME_DIM.to_string(),
                reason: format!("timestamp {} precedes run start {}", timestamp, self.start),
            });
        }
        let first = step as u64 + frame as u64;
        Ok(first..first + 1)
    }

    /// Global half-open range covered by a file along `dimension`.
    ///
    /// Reads the file's 1-based inclusive patch bounds
    /// (`<DIM>_PATCH_START_STAG|UNSTAG`, `<DIM>_PATCH_END_...`) and converts
    /// them to `[start - 1, end)`. Dimensions without patch attributes, and
    /// `Time`, span the file's whole extent.
    pub fn local_slice(dataset: &Dataset, dimension: &str) -> Result<Range<u64>> {
        let parse_error = |reason: String| IngestionError::Parse {
            path: dataset.path().to_path_buf(),
            reason,
        };

        let full_extent = || {
            dataset
                .dimension_len(dimension)
                .map(|len| 0..len as u64)
                .ok_or_else(|| parse_error(format!("dimension {} not in file", dimension)))
        };

        if dimension == TIME_DIM {
            return full_extent();
        }

        let staggered = dimension.contains("stag");
        let base = dimension
            .replace("_stag", "")
            .replace('_', "-")
            .to_uppercase();
        let suffix = if staggered { "STAG" } else { "UNSTAG" };
        let start_attr = format!("{}_PATCH_START_{}", base, suffix);
        let end_attr = format!("{}_PATCH_END_{}", base, suffix);

        match (dataset.attribute_i64(&start_attr), dataset.attribute_i64(&end_attr)) {
            (Some(start), Some(end)) => {
                if start < 1 || end < start {
                    return Err(parse_error(format!(
                        "invalid patch bounds {}={} {}={}",
                        start_attr, start, end_attr, end
                    )));
                }
                Ok((start - 1) as u64..end as u64)
            }
            _ => full_extent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_config as config;
    use chrono::Duration;
    use test_utils::{WrfFileBuilder, DEFAULT_START};

    #[test]
    fn test_one_hour_at_sixty_seconds() {
        let mapper =
            CoordinateMapper::from_config(&config(DEFAULT_START, "2018-01-01_01:00:00", 60))
                .unwrap();
        assert_eq!(mapper.domain(TIME_DIM), Some((0, 60)));

        let ten = mapper.start() + Duration::minutes(10);
        assert_eq!(mapper.step_number(ten), 10);
        assert_eq!(mapper.step_number(mapper.start()), 0);
    }

    #[test]
    fn test_spatial_domains() {
        let domains =
            dimension_domains(&config(DEFAULT_START, "2018-01-01_01:00:00", 60)).unwrap();
        assert_eq!(domains["west_east"], (0, 10));
        assert_eq!(domains["west_east_stag"], (0, 11));
        assert_eq!(domains["south_north"], (0, 6));
        assert_eq!(domains["bottom_top"], (0, 1));
        assert_eq!(domains["bottom_top_stag"], (0, 2));
        assert_eq!(domains["soil_layers_stag"], (0, 3));
    }

    #[test]
    fn test_step_number_spans_days_and_is_monotonic() {
        let mapper =
            CoordinateMapper::from_config(&config(DEFAULT_START, "2018-01-03_00:00:00", 3600))
                .unwrap();
        let mut previous = -1;
        for hours in 0..48 {
            let step = mapper.step_number(mapper.start() + Duration::hours(hours));
            assert!(step > previous);
            previous = step;
        }
        assert_eq!(mapper.step_number(mapper.start() + Duration::hours(25)), 25);
        // Floors partial steps
        assert_eq!(mapper.step_number(mapper.start() + Duration::minutes(90)), 1);
    }

    #[test]
    fn test_invalid_time_config() {
        let err = CoordinateMapper::from_config(&config(DEFAULT_START, "2018-01-01_01:00:00", 0))
            .unwrap_err();
        assert!(err.is_config());

        let err = CoordinateMapper::from_config(&config("2018-01-02_00:00:00", DEFAULT_START, 60))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_missing_geometry_is_config_error() {
        let mut cfg = config(DEFAULT_START, "2018-01-01_01:00:00", 60);
        cfg.domains.get_mut("base").unwrap().geometry.e_sn = None;
        let err = CoordinateMapper::from_config(&cfg).unwrap_err();
        assert!(matches!(err, IngestionError::Config(msg) if msg.contains("e_sn")));

        let mut cfg = config(DEFAULT_START, "2018-01-01_01:00:00", 60);
        cfg.run.start = None;
        assert!(CoordinateMapper::from_config(&cfg).unwrap_err().is_config());
    }

    #[test]
    fn test_time_slice() {
        let mapper =
            CoordinateMapper::from_config(&config(DEFAULT_START, "2018-01-01_01:00:00", 60))
                .unwrap();
        let t = mapper.start() + Duration::minutes(10);
        assert_eq!(mapper.time_slice(t, 0).unwrap(), 10..11);
        assert_eq!(mapper.time_slice(t, 2).unwrap(), 12..13);
        assert!(mapper
            .time_slice(mapper.start() - Duration::minutes(1), 0)
            .is_err());
    }

    #[test]
    fn test_local_slice_from_patch_attributes() {
        let ds = WrfFileBuilder::new("/out", DEFAULT_START)
            .grid(11, 7)
            .patch((6, 10), (1, 3))
            .build()
            .dataset();

        assert_eq!(CoordinateMapper::local_slice(&ds, "west_east").unwrap(), 5..10);
        assert_eq!(CoordinateMapper::local_slice(&ds, "west_east_stag").unwrap(), 5..11);
        assert_eq!(CoordinateMapper::local_slice(&ds, "south_north").unwrap(), 0..3);
        assert_eq!(CoordinateMapper::local_slice(&ds, "bottom_top").unwrap(), 0..2);
        // No patch attributes: whole file extent
        assert_eq!(CoordinateMapper::local_slice(&ds, "soil_layers_stag").unwrap(), 0..3);
        assert_eq!(CoordinateMapper::local_slice(&ds, TIME_DIM).unwrap(), 0..1);
        assert!(CoordinateMapper::local_slice(&ds, "unknown_dim").is_err());
    }
}
