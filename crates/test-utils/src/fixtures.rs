//! Synthetic WRF-style output files and run directory layouts.
//!
//! [`WrfFileBuilder`] produces an in-memory model of one `wrfout_*` file
//! (dimensions, patch attributes, variables with cell-coded data);
//! [`MemoryDatasetReader`] serves those models through the
//! [`DatasetReader`] seam; [`RunLayout`] creates the directories a run uses.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use netcdf_parser::{
    AttrValue, Dataset, DatasetReader, NetCdfError, NetCdfResult, VarType, VariableData,
    VariableInfo, VariableSource, SIMULATION_START_ATTR,
};
use tempfile::TempDir;

use crate::generators::{create_patch_block, create_times_chars};

/// Simulation start used by default fixtures.
pub const DEFAULT_START: &str = "2018-01-01_00:00:00";

/// Marker line the master log carries once the simulation finished.
pub const SUCCESS_MARKER: &str = "SUCCESS COMPLETE WRF";

/// Shape family of a fixture variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// `[Time, south_north, west_east]`, e.g. `T2`
    Surface,
    /// `[Time, bottom_top, south_north, west_east]`, e.g. `T`
    Volume,
    /// `[Time, bottom_top, south_north, west_east_stag]`, e.g. `U`
    StaggeredU,
    /// `[Time, soil_layers_stag, south_north, west_east]`, e.g. `TSLB`
    Soil,
    /// `[south_north, west_east]`, no time axis
    Static,
    /// `[Time, DateStrLen]` characters
    Times,
}

/// In-memory model of one output file.
#[derive(Debug, Clone)]
pub struct WrfFile {
    pub path: PathBuf,
    pub dimensions: Vec<(String, usize)>,
    pub variables: Vec<(VariableInfo, VariableData)>,
    pub attributes: BTreeMap<String, AttrValue>,
}

struct MemorySource {
    data: BTreeMap<String, VariableData>,
}

impl VariableSource for MemorySource {
    fn read(&self, variable: &str) -> NetCdfResult<VariableData> {
        self.data
            .get(variable)
            .cloned()
            .ok_or_else(|| NetCdfError::MissingData(format!("{} variable", variable)))
    }
}

impl WrfFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|(v, _)| v.name.clone()).collect()
    }

    /// Open the model as a [`Dataset`].
    pub fn dataset(&self) -> Dataset {
        let coordinates: BTreeSet<String> = self
            .variables
            .iter()
            .filter_map(|(v, _)| v.attributes.get("coordinates"))
            .filter_map(AttrValue::as_text)
            .flat_map(|s| s.split_whitespace().map(str::to_string))
            .collect();

        Dataset::new(
            &self.path,
            self.dimensions.clone(),
            self.variables.iter().map(|(v, _)| v.clone()).collect(),
            self.attributes.clone(),
            coordinates.into_iter().collect(),
            Box::new(MemorySource {
                data: self
                    .variables
                    .iter()
                    .map(|(v, d)| (v.name.clone(), d.clone()))
                    .collect(),
            }),
        )
    }
}

/// Builder for [`WrfFile`].
///
/// Grid extents follow WRF conventions: `e_we`/`e_sn` are staggered sizes,
/// so the unstaggered grid is `(e_we - 1) x (e_sn - 1)`. Patch bounds are
/// 1-based and inclusive on the unstaggered grid.
#[derive(Debug, Clone)]
pub struct WrfFileBuilder {
    dir: PathBuf,
    prefix: String,
    domain: u32,
    process: u32,
    timestamp: String,
    simulation_start: String,
    frames: usize,
    first_step: usize,
    e_we: usize,
    e_sn: usize,
    levels: usize,
    soil_levels: usize,
    patch_we: (usize, usize),
    patch_sn: (usize, usize),
    variables: Vec<(String, VarKind)>,
    attributes: BTreeMap<String, AttrValue>,
}

impl WrfFileBuilder {
    pub fn new(dir: impl AsRef<Path>, timestamp: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: "wrfout".to_string(),
            domain: 1,
            process: 0,
            timestamp: timestamp.to_string(),
            simulation_start: DEFAULT_START.to_string(),
            frames: 1,
            first_step: 0,
            e_we: 7,
            e_sn: 5,
            levels: 2,
            soil_levels: 3,
            patch_we: (1, 6),
            patch_sn: (1, 4),
            variables: vec![
                ("T2".to_string(), VarKind::Surface),
                ("U".to_string(), VarKind::StaggeredU),
            ],
            attributes: BTreeMap::new(),
        }
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn domain(mut self, domain: u32) -> Self {
        self.domain = domain;
        self
    }

    pub fn process(mut self, process: u32) -> Self {
        self.process = process;
        self
    }

    pub fn simulation_start(mut self, start: &str) -> Self {
        self.simulation_start = start.to_string();
        self
    }

    /// Frames per file and the global step of the first frame (used to
    /// encode cell values).
    pub fn frames(mut self, frames: usize, first_step: usize) -> Self {
        self.frames = frames;
        self.first_step = first_step;
        self
    }

    /// Staggered grid extents.
    pub fn grid(mut self, e_we: usize, e_sn: usize) -> Self {
        self.e_we = e_we;
        self.e_sn = e_sn;
        self.patch_we = (1, e_we - 1);
        self.patch_sn = (1, e_sn - 1);
        self
    }

    pub fn levels(mut self, levels: usize, soil_levels: usize) -> Self {
        self.levels = levels;
        self.soil_levels = soil_levels;
        self
    }

    /// Unstaggered patch bounds, 1-based inclusive.
    pub fn patch(mut self, we: (usize, usize), sn: (usize, usize)) -> Self {
        self.patch_we = we;
        self.patch_sn = sn;
        self
    }

    /// Replace the variable list.
    pub fn variables(mut self, variables: &[(&str, VarKind)]) -> Self {
        self.variables = variables
            .iter()
            .map(|(n, k)| (n.to_string(), *k))
            .collect();
        self
    }

    pub fn attribute(mut self, name: &str, value: AttrValue) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    fn stag_end(end: usize, e: usize) -> usize {
        // Only the patch on the far edge owns the extra staggered column.
        if end + 1 >= e {
            e
        } else {
            end
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_d{:02}_{}_{:04}",
            self.prefix, self.domain, self.timestamp, self.process
        )
    }

    pub fn build(self) -> WrfFile {
        let (we0, we1) = self.patch_we;
        let (sn0, sn1) = self.patch_sn;
        let we1_stag = Self::stag_end(we1, self.e_we);
        let sn1_stag = Self::stag_end(sn1, self.e_sn);
        let nx = we1 - we0 + 1;
        let ny = sn1 - sn0 + 1;
        let nx_stag = we1_stag - we0 + 1;
        let ny_stag = sn1_stag - sn0 + 1;

        let dimensions: Vec<(String, usize)> = [
            ("Time", self.frames),
            ("DateStrLen", 19),
            ("bottom_top", self.levels),
            ("bottom_top_stag", self.levels + 1),
            ("soil_layers_stag", self.soil_levels),
            ("south_north", ny),
            ("south_north_stag", ny_stag),
            ("west_east", nx),
            ("west_east_stag", nx_stag),
        ]
        .into_iter()
        .map(|(n, l)| (n.to_string(), l))
        .collect();

        let int = |v: usize| AttrValue::Int(v as i64);
        let mut attributes: BTreeMap<String, AttrValue> = [
            ("TITLE", AttrValue::Text(" OUTPUT FROM WRF V4.0 MODEL".to_string())),
            (SIMULATION_START_ATTR, AttrValue::Text(self.simulation_start.clone())),
            ("START_DATE", AttrValue::Text(self.simulation_start.clone())),
            ("DX", AttrValue::Float(3000.0)),
            ("WEST-EAST_GRID_DIMENSION", int(self.e_we)),
            ("SOUTH-NORTH_GRID_DIMENSION", int(self.e_sn)),
            ("BOTTOM-TOP_GRID_DIMENSION", int(self.levels + 1)),
            ("WEST-EAST_PATCH_START_UNSTAG", int(we0)),
            ("WEST-EAST_PATCH_END_UNSTAG", int(we1)),
            ("WEST-EAST_PATCH_START_STAG", int(we0)),
            ("WEST-EAST_PATCH_END_STAG", int(we1_stag)),
            ("SOUTH-NORTH_PATCH_START_UNSTAG", int(sn0)),
            ("SOUTH-NORTH_PATCH_END_UNSTAG", int(sn1)),
            ("SOUTH-NORTH_PATCH_START_STAG", int(sn0)),
            ("SOUTH-NORTH_PATCH_END_STAG", int(sn1_stag)),
            ("BOTTOM-TOP_PATCH_START_UNSTAG", int(1)),
            ("BOTTOM-TOP_PATCH_END_UNSTAG", int(self.levels)),
            ("BOTTOM-TOP_PATCH_START_STAG", int(1)),
            ("BOTTOM-TOP_PATCH_END_STAG", int(self.levels + 1)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        attributes.extend(self.attributes.clone());

        let dims = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let attrs = |units: &str, stagger: &str, coords: Option<&str>| {
            let mut a = BTreeMap::new();
            a.insert("units".to_string(), AttrValue::Text(units.to_string()));
            a.insert("stagger".to_string(), AttrValue::Text(stagger.to_string()));
            a.insert("FieldType".to_string(), AttrValue::Int(104));
            if let Some(c) = coords {
                a.insert("coordinates".to_string(), AttrValue::Text(c.to_string()));
            }
            a
        };

        let (x0, y0) = (we0 - 1, sn0 - 1);
        let variables = self
            .variables
            .iter()
            .map(|(name, kind)| {
                let (dimensions, var_type, attributes, data) = match kind {
                    VarKind::Surface => (
                        dims(&["Time", "south_north", "west_east"]),
                        VarType::F32,
                        attrs("K", "", Some("XLONG XLAT XTIME")),
                        VariableData::F32(create_patch_block(
                            self.frames, 1, ny, nx, self.first_step, y0, x0,
                        )),
                    ),
                    VarKind::Volume => (
                        dims(&["Time", "bottom_top", "south_north", "west_east"]),
                        VarType::F32,
                        attrs("K", "", Some("XLONG XLAT XTIME")),
                        VariableData::F32(create_patch_block(
                            self.frames, self.levels, ny, nx, self.first_step, y0, x0,
                        )),
                    ),
                    VarKind::StaggeredU => (
                        dims(&["Time", "bottom_top", "south_north", "west_east_stag"]),
                        VarType::F32,
                        attrs("m s-1", "X", Some("XLONG_U XLAT_U XTIME")),
                        VariableData::F32(create_patch_block(
                            self.frames, self.levels, ny, nx_stag, self.first_step, y0, x0,
                        )),
                    ),
                    VarKind::Soil => (
                        dims(&["Time", "soil_layers_stag", "south_north", "west_east"]),
                        VarType::F32,
                        attrs("K", "Z", Some("XLONG XLAT XTIME")),
                        VariableData::F32(create_patch_block(
                            self.frames, self.soil_levels, ny, nx, self.first_step, y0, x0,
                        )),
                    ),
                    VarKind::Static => (
                        dims(&["south_north", "west_east"]),
                        VarType::F32,
                        attrs("m", "", None),
                        VariableData::F32(create_patch_block(1, 1, ny, nx, 0, y0, x0)),
                    ),
                    VarKind::Times => (
                        dims(&["Time", "DateStrLen"]),
                        VarType::U8,
                        BTreeMap::new(),
                        VariableData::U8(create_times_chars(&vec![
                            self.timestamp.clone();
                            self.frames
                        ])),
                    ),
                };
                (
                    VariableInfo {
                        name: name.clone(),
                        dimensions,
                        var_type,
                        attributes,
                    },
                    data,
                )
            })
            .collect();

        WrfFile {
            path: self.dir.join(self.file_name()),
            dimensions,
            variables,
            attributes,
        }
    }
}

/// [`DatasetReader`] serving registered [`WrfFile`] models by path.
#[derive(Default)]
pub struct MemoryDatasetReader {
    files: Mutex<HashMap<PathBuf, WrfFile>>,
    opens: Mutex<HashMap<PathBuf, usize>>,
}

impl MemoryDatasetReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: WrfFile) {
        self.files
            .lock()
            .expect("reader lock")
            .insert(file.path.clone(), file);
    }

    /// How many times `path` was opened.
    pub fn open_count(&self, path: &Path) -> usize {
        self.opens
            .lock()
            .expect("reader lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl DatasetReader for MemoryDatasetReader {
    fn open(&self, path: &Path) -> NetCdfResult<Dataset> {
        *self
            .opens
            .lock()
            .expect("reader lock")
            .entry(path.to_path_buf())
            .or_insert(0) += 1;

        let files = self.files.lock().expect("reader lock");
        files.get(path).map(WrfFile::dataset).ok_or_else(|| {
            NetCdfError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no dataset registered for {}", path.display()),
            ))
        })
    }
}

/// Temporary directory tree for one simulation run.
pub struct RunLayout {
    _root: TempDir,
    pub run_dir: PathBuf,
    pub out_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub store_dir: PathBuf,
}

impl RunLayout {
    pub fn new() -> Self {
        let root = tempfile::Builder::new()
            .prefix("wrf_run_")
            .tempdir()
            .expect("Failed to create temporary run directory");
        let run_dir = root.path().join("run");
        let out_dir = root.path().join("output");
        let logs_dir = root.path().join("logs");
        let store_dir = root.path().join("store");
        for dir in [&run_dir, &out_dir, &logs_dir, &store_dir] {
            fs::create_dir_all(dir).expect("Failed to create run subdirectory");
        }
        Self {
            _root: root,
            run_dir,
            out_dir,
            logs_dir,
            store_dir,
        }
    }

    /// Builder for a file placed in the output directory.
    pub fn file(&self, timestamp: &str) -> WrfFileBuilder {
        WrfFileBuilder::new(&self.out_dir, timestamp)
    }

    /// Create `file` on disk (empty) and register it with `reader`.
    pub fn publish(&self, reader: &MemoryDatasetReader, file: WrfFile) -> PathBuf {
        let path = file.path.clone();
        fs::write(&path, b"").expect("Failed to create output file");
        reader.insert(file);
        path
    }

    /// Write `rsl.out.0000`, with the success marker when `complete`.
    pub fn write_master_log(&self, complete: bool) {
        let mut text = String::from(" starting wrf task 0 of 4\n");
        if complete {
            text.push_str(&format!("d01 2018-01-01_01:00:00 wrf: {}\n", SUCCESS_MARKER));
        }
        fs::write(self.run_dir.join("rsl.out.0000"), text).expect("Failed to write master log");
    }
}

impl Default for RunLayout {
    fn default() -> Self {
        Self::new()
    }
}
