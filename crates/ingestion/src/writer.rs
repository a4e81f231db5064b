//! Writes the contents of one output file into the array store.
//!
//! Store layout under the run id:
//!
//! ```text
//! <run>/variables/<var>     one array per variable, global coordinates
//! <run>/attributes/<var>    per-variable attributes (key-value)
//! <run>/global_attributes   file-level attributes (key-value)
//! <run>/dimensions          dimension name -> local size (key-value)
//! <run>/coords              coordinate variable names (key-value)
//! ```

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use netcdf_parser::{Dataset, VarType, VariableData, VariableInfo};
use storage::{ArrayData, ArraySchema, ArrayStore, Dimension, ElementType, StorageError};
use tracing::{debug, info, instrument, warn};

use crate::config::{NameFilter, RunConfiguration};
use crate::coordinates::{CoordinateMapper, TIME_DIM};
use crate::descriptor::DatasetFile;
use crate::error::{IngestionError, Result};
use crate::retry::Backoff;

/// Store node names for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    run: String,
}

impl StoreLayout {
    pub fn new(run_id: &str) -> Self {
        Self {
            run: run_id.trim_matches('/').to_string(),
        }
    }

    pub fn run_group(&self) -> String {
        self.run.clone()
    }

    pub fn variables_group(&self) -> String {
        format!("{}/variables", self.run)
    }

    pub fn attributes_group(&self) -> String {
        format!("{}/attributes", self.run)
    }

    pub fn variable_array(&self, variable: &str) -> String {
        format!("{}/variables/{}", self.run, variable)
    }

    pub fn variable_attributes(&self, variable: &str) -> String {
        format!("{}/attributes/{}", self.run, variable)
    }

    pub fn global_attributes(&self) -> String {
        format!("{}/global_attributes", self.run)
    }

    pub fn dimensions(&self) -> String {
        format!("{}/dimensions", self.run)
    }

    pub fn coords(&self) -> String {
        format!("{}/coords", self.run)
    }

    /// The three auxiliary key-value stores.
    pub fn auxiliary_stores(&self) -> [String; 3] {
        [self.global_attributes(), self.dimensions(), self.coords()]
    }
}

/// Outcome of writing one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub frames_written: usize,
    pub frames_failed: usize,
    pub attribute_failures: usize,
    pub metadata_failures: usize,
    /// Variables whose dimensions have no global counterpart (e.g. `Times`).
    pub variables_skipped: usize,
}

impl WriteReport {
    /// No write of any kind failed.
    pub fn is_clean(&self) -> bool {
        self.frames_failed == 0 && self.attribute_failures == 0 && self.metadata_failures == 0
    }
}

fn element_type(var_type: VarType) -> ElementType {
    match var_type {
        VarType::F32 => ElementType::F32,
        VarType::F64 => ElementType::F64,
        VarType::I32 => ElementType::I32,
        VarType::I64 => ElementType::I64,
        VarType::U8 => ElementType::U8,
    }
}

fn array_data(data: VariableData) -> ArrayData {
    match data {
        VariableData::F32(v) => ArrayData::F32(v),
        VariableData::F64(v) => ArrayData::F64(v),
        VariableData::I32(v) => ArrayData::I32(v),
        VariableData::I64(v) => ArrayData::I64(v),
        VariableData::U8(v) => ArrayData::U8(v),
    }
}

/// Maps file contents into global array coordinates and writes them.
pub struct FrameWriter {
    store: Arc<dyn ArrayStore>,
    mapper: Arc<CoordinateMapper>,
    layout: StoreLayout,
    variables: NameFilter,
    attributes: NameFilter,
    backoff: Backoff,
}

impl FrameWriter {
    pub fn new(
        store: Arc<dyn ArrayStore>,
        mapper: Arc<CoordinateMapper>,
        config: &RunConfiguration,
    ) -> Result<Self> {
        Ok(Self {
            store,
            mapper,
            layout: StoreLayout::new(config.run_id()?),
            variables: config.filters.variable_filter(),
            attributes: config.filters.attribute_filter(),
            backoff: Backoff::from(&config.polling.backoff),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Whether the run's containers and auxiliary stores exist. Store errors
    /// are retried with backoff before giving up.
    pub async fn is_initialized(&self) -> Result<bool> {
        for name in [self.layout.variables_group(), self.layout.attributes_group()]
            .into_iter()
            .chain(self.layout.auxiliary_stores())
        {
            if !self.backoff.retry(&name, || self.store.exists(&name)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Global dimensions of `variable`, or `None` when one of its dimensions
    /// has no global bounds.
    fn target_schema(&self, dataset: &Dataset, variable: &VariableInfo) -> Option<ArraySchema> {
        let dimensions = variable
            .dimensions
            .iter()
            .map(|dim| {
                let (min, max) = self.mapper.domain(dim)?;
                let tile = dataset.dimension_len(dim).unwrap_or(1).max(1) as u64;
                Some(Dimension::new(dim.as_str(), min, max, tile))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(ArraySchema::new(
            dimensions,
            variable.name.as_str(),
            element_type(variable.var_type),
        ))
    }

    fn writable_variables<'a>(
        &'a self,
        dataset: &'a Dataset,
    ) -> impl Iterator<Item = &'a VariableInfo> + 'a {
        dataset
            .variables()
            .iter()
            .filter(move |v| self.variables.allows(&v.name))
    }

    /// Create `name` unless something already exists there.
    fn ensure_node<F>(&self, name: &str, create: F) -> Result<()>
    where
        F: FnOnce(&str) -> storage::StorageResult<()>,
    {
        if self.store.exists(name)? {
            return Ok(());
        }
        match create(name) {
            Ok(()) => {
                debug!(name = %name, "Created store node");
                Ok(())
            }
            Err(StorageError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create containers, auxiliary stores and one array plus attribute
    /// store per variable. Existing nodes are left untouched.
    #[instrument(skip(self, dataset), fields(file = %dataset.path().display()))]
    pub fn ensure_arrays_initialized(&self, dataset: &Dataset) -> Result<()> {
        for group in [
            self.layout.run_group(),
            self.layout.variables_group(),
            self.layout.attributes_group(),
        ] {
            self.ensure_node(&group, |n| self.store.create_group(n))?;
        }
        for kv in self.layout.auxiliary_stores() {
            self.ensure_node(&kv, |n| self.store.create_kv(n))?;
        }

        let mut created = 0;
        for variable in self.writable_variables(dataset) {
            let Some(schema) = self.target_schema(dataset, variable) else {
                debug!(variable = %variable.name, "No global bounds for variable, not creating array");
                continue;
            };
            self.ensure_node(&self.layout.variable_attributes(&variable.name), |n| {
                self.store.create_kv(n)
            })?;
            let array = self.layout.variable_array(&variable.name);
            if !self.store.exists(&array)? {
                self.ensure_node(&array, |n| self.store.create_array(n, &schema))?;
                created += 1;
            }
        }
        info!(arrays_created = created, "Store initialized");
        Ok(())
    }

    async fn write_kv(&self, name: &str, entries: BTreeMap<String, String>) -> Result<usize> {
        self.backoff
            .wait_until(name, || self.store.exists(name))
            .await?;
        if entries.is_empty() {
            return Ok(0);
        }
        match self.store.kv_write(name, &entries) {
            Ok(()) => Ok(0),
            Err(e) => {
                warn!(name = %name, error = %e, "Key-value write failed");
                Ok(1)
            }
        }
    }

    /// Copy global attributes, dimension sizes and coordinate names into the
    /// auxiliary stores. Returns the number of failed writes.
    #[instrument(skip(self, dataset), fields(file = %dataset.path().display()))]
    pub async fn write_global_metadata(&self, dataset: &Dataset) -> Result<usize> {
        let attributes: BTreeMap<String, String> = dataset
            .attributes()
            .iter()
            .filter(|(name, _)| self.attributes.allows(name))
            .map(|(name, value)| (name.clone(), value.to_canonical_text()))
            .collect();
        let dimensions: BTreeMap<String, String> = dataset
            .dimensions()
            .iter()
            .map(|(name, len)| (name.clone(), len.to_string()))
            .collect();
        let coords: BTreeMap<String, String> = dataset
            .coordinates()
            .iter()
            .map(|name| (name.clone(), name.clone()))
            .collect();

        let mut failures = 0;
        failures += self
            .write_kv(&self.layout.global_attributes(), attributes)
            .await?;
        failures += self.write_kv(&self.layout.dimensions(), dimensions).await?;
        failures += self.write_kv(&self.layout.coords(), coords).await?;
        Ok(failures)
    }

    /// Copy the filtered attributes of `variable`. Returns the number of
    /// failed writes.
    pub async fn write_variable_attributes(&self, variable: &VariableInfo) -> Result<usize> {
        let entries: BTreeMap<String, String> = variable
            .attributes
            .iter()
            .filter(|(name, _)| self.attributes.allows(name))
            .map(|(name, value)| (name.clone(), value.to_canonical_text()))
            .collect();
        self.write_kv(&self.layout.variable_attributes(&variable.name), entries)
            .await
    }

    /// Write every frame of `variable` into its array, one write per frame.
    /// Failed writes are logged and counted; the remaining frames still run.
    /// Errors returned here concern this variable only, except
    /// [`IngestionError::StoreUnavailable`].
    pub async fn write_frames(
        &self,
        file: &DatasetFile,
        dataset: &Dataset,
        variable: &VariableInfo,
        report: &mut WriteReport,
    ) -> Result<()> {
        let array = self.layout.variable_array(&variable.name);
        self.backoff
            .wait_until(&array, || self.store.exists(&array))
            .await?;

        let shape = dataset.variable_shape(variable)?;
        let time_axis = variable.dimensions.iter().position(|d| d == TIME_DIM);
        if matches!(time_axis, Some(axis) if axis != 0) {
            warn!(variable = %variable.name, "Time is not the leading dimension, skipping");
            report.variables_skipped += 1;
            return Ok(());
        }

        let mut spatial: Vec<Range<u64>> = Vec::with_capacity(variable.dimensions.len());
        for (dim, &len) in variable.dimensions.iter().zip(&shape) {
            if dim == TIME_DIM {
                spatial.push(0..0);
                continue;
            }
            let slice = CoordinateMapper::local_slice(dataset, dim)?;
            if slice.end - slice.start != len as u64 {
                warn!(
                    variable = %variable.name,
                    dimension = %dim,
                    slice = ?slice,
                    len,
                    "Patch bounds disagree with dimension size"
                );
                report.frames_failed += 1;
                return Ok(());
            }
            spatial.push(slice);
        }

        let data = match dataset.read(&variable.name) {
            Ok(data) => array_data(data),
            Err(e) => {
                warn!(variable = %variable.name, error = %e, "Failed to read variable");
                report.frames_failed += 1;
                return Ok(());
            }
        };

        let (frames, frame_len) = match time_axis {
            Some(_) => {
                let in_file = shape.first().copied().unwrap_or(0);
                let frames = in_file.min(self.mapper.frames_per_file() as usize);
                (frames, shape[1..].iter().product::<usize>())
            }
            None => (1, shape.iter().product::<usize>()),
        };

        for frame in 0..frames {
            let mut slices = spatial.clone();
            if let Some(axis) = time_axis {
                match self.mapper.time_slice(file.timestamp, frame as u32) {
                    Ok(slice) => slices[axis] = slice,
                    Err(e) => {
                        warn!(variable = %variable.name, frame, error = %e, "Frame outside the run");
                        report.frames_failed += 1;
                        continue;
                    }
                }
            }
            let block = match data.slice(frame * frame_len..(frame + 1) * frame_len) {
                Some(block) => block,
                None => {
                    warn!(variable = %variable.name, frame, "Variable data shorter than its shape");
                    report.frames_failed += 1;
                    continue;
                }
            };
            match self.store.write_slice(&array, &slices, &block) {
                Ok(()) => report.frames_written += 1,
                Err(e) => {
                    let failure = IngestionError::WriteFailure {
                        target: format!("{}[frame {}]", array, frame),
                        reason: e.to_string(),
                    };
                    warn!(variable = %variable.name, frame, error = %failure, "Frame write failed");
                    report.frames_failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Write one file: store setup and global metadata when it is the run's
    /// first file, then attributes and frames of every kept variable.
    #[instrument(skip(self, file, dataset), fields(file = %file.display_name()))]
    pub async fn write_file(&self, file: &DatasetFile, dataset: &Dataset) -> Result<WriteReport> {
        let mut report = WriteReport::default();

        if file.is_first_of_run(dataset) {
            self.ensure_arrays_initialized(dataset)?;
            report.metadata_failures += self.write_global_metadata(dataset).await?;
        }

        for variable in self.writable_variables(dataset) {
            if self.target_schema(dataset, variable).is_none() {
                debug!(variable = %variable.name, "Skipping variable without global bounds");
                report.variables_skipped += 1;
                continue;
            }
            report.attribute_failures += self.write_variable_attributes(variable).await?;
            match self.write_frames(file, dataset, variable, &mut report).await {
                Ok(()) => {}
                Err(e @ IngestionError::StoreUnavailable { .. }) => return Err(e),
                Err(e) => {
                    warn!(variable = %variable.name, error = %e, "Variable not written");
                    report.frames_failed += 1;
                }
            }
        }

        info!(
            frames_written = report.frames_written,
            frames_failed = report.frames_failed,
            attribute_failures = report.attribute_failures,
            variables_skipped = report.variables_skipped,
            "File written"
        );
        Ok(report)
    }

    /// Consolidate the run's auxiliary stores, every variable array and
    /// every per-variable attribute store.
    pub fn consolidate(&self) -> Result<()> {
        for kv in self.layout.auxiliary_stores() {
            if self.store.exists(&kv)? {
                self.store.consolidate(&kv)?;
            }
        }

        let variables = self.layout.variables_group();
        if !self.store.exists(&variables)? {
            return Ok(());
        }
        let names = self.store.children(&variables)?;
        for variable in &names {
            self.store.consolidate(&self.layout.variable_array(variable))?;
            let attributes = self.layout.variable_attributes(variable);
            if self.store.exists(&attributes)? {
                self.store.consolidate(&attributes)?;
            }
        }
        info!(variables = names.len(), "Store consolidated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NameList;
    use crate::testing::run_config;
    use netcdf_parser::AttrValue;
    use storage::{MemoryArrayStore, StoreCall};
    use test_utils::{cell_value, VarKind, WrfFile, WrfFileBuilder, DEFAULT_START};

    const END: &str = "2018-01-01_01:00:00";

    fn writer_with(config: RunConfiguration) -> (Arc<MemoryArrayStore>, FrameWriter) {
        let mut config = config;
        config.polling.backoff.initial_delay_ms = 1;
        config.polling.backoff.max_delay_ms = 2;
        config.polling.backoff.max_attempts = 2;
        let store = Arc::new(MemoryArrayStore::new());
        let mapper = Arc::new(CoordinateMapper::from_config(&config).unwrap());
        let writer = FrameWriter::new(store.clone(), mapper, &config).unwrap();
        (store, writer)
    }

    fn writer() -> (Arc<MemoryArrayStore>, FrameWriter) {
        writer_with(run_config(DEFAULT_START, END, 60))
    }

    fn first_file() -> WrfFile {
        WrfFileBuilder::new("/out", DEFAULT_START)
            .grid(11, 7)
            .patch((1, 5), (1, 3))
            .variables(&[
                ("T2", VarKind::Surface),
                ("U", VarKind::StaggeredU),
                ("Times", VarKind::Times),
            ])
            .build()
    }

    async fn write(writer: &FrameWriter, file: &WrfFile) -> WriteReport {
        let ds = file.dataset();
        let descriptor = DatasetFile::parse(&file.path).unwrap();
        writer.write_file(&descriptor, &ds).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_file_initializes_store() {
        let (store, writer) = writer();
        let report = write(&writer, &first_file()).await;

        assert!(writer.is_initialized().await.unwrap());
        assert_eq!(report.frames_written, 2);
        assert_eq!(report.variables_skipped, 1);
        assert!(report.is_clean());

        let schema = store.array_schema("test-run/variables/U").unwrap();
        assert_eq!(
            schema.dimension_names(),
            vec!["Time", "bottom_top", "south_north", "west_east_stag"]
        );
        assert_eq!(schema.shape(), vec![61, 2, 7, 12]);
        // Tiles follow the file's local sizes
        assert_eq!(schema.tiles(), vec![1, 2, 3, 5]);
        assert!(!store.exists("test-run/variables/Times").unwrap());
    }

    #[tokio::test]
    async fn test_global_metadata() {
        let (store, writer) = writer();
        write(&writer, &first_file()).await;

        assert_eq!(
            store.kv_get("test-run/dimensions", "west_east").unwrap(),
            Some("5".to_string())
        );
        assert_eq!(
            store.kv_get("test-run/coords", "XLAT_U").unwrap(),
            Some("XLAT_U".to_string())
        );
        assert_eq!(
            store
                .kv_get("test-run/global_attributes", "SIMULATION_START_DATE")
                .unwrap(),
            Some(DEFAULT_START.to_string())
        );
        assert_eq!(
            store.kv_get("test-run/attributes/T2", "stagger").unwrap(),
            Some("None".to_string())
        );
        assert_eq!(
            store.kv_get("test-run/attributes/U", "units").unwrap(),
            Some("m s-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_patch_lands_at_global_offset() {
        let (store, writer) = writer();
        write(&writer, &first_file()).await;

        let second = WrfFileBuilder::new("/out", "2018-01-01_00:10:00")
            .grid(11, 7)
            .patch((6, 10), (4, 6))
            .frames(1, 10)
            .variables(&[("T2", VarKind::Surface)])
            .build();
        let report = write(&writer, &second).await;
        assert_eq!(report.frames_written, 1);

        let read = store
            .read_slice("test-run/variables/T2", &[10..11, 3..6, 5..10])
            .unwrap()
            .to_f64_vec();
        assert_eq!(read[0], cell_value(10, 0, 3, 5) as f64);
        assert_eq!(read[14], cell_value(10, 0, 5, 9) as f64);

        let first = store
            .read_slice("test-run/variables/T2", &[0..1, 0..1, 0..1])
            .unwrap()
            .to_f64_vec();
        assert_eq!(first[0], cell_value(0, 0, 0, 0) as f64);
    }

    #[tokio::test]
    async fn test_multi_frame_file() {
        let mut config = run_config(DEFAULT_START, END, 60);
        config.domains.get_mut("base").unwrap().frames_per_outfile = Some(3);
        let (store, writer) = writer_with(config);

        let file = WrfFileBuilder::new("/out", DEFAULT_START)
            .grid(11, 7)
            .frames(3, 0)
            .variables(&[("T2", VarKind::Surface), ("HGT", VarKind::Static)])
            .build();
        let report = write(&writer, &file).await;
        assert_eq!(report.frames_written, 4);

        let calls: Vec<_> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::WriteSlice { name, slices } if name.ends_with("T2") => {
                    Some(slices[0].clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![0..1, 1..2, 2..3]);

        let t2 = store
            .read_slice("test-run/variables/T2", &[2..3, 0..1, 0..1])
            .unwrap()
            .to_f64_vec();
        assert_eq!(t2[0], cell_value(2, 0, 0, 0) as f64);
        assert_eq!(store.write_count("test-run/variables/HGT"), 1);
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let (store, writer) = writer();
        let file = first_file();
        write(&writer, &file).await;
        let before = store.array_data("test-run/variables/U").unwrap();

        let report = write(&writer, &file).await;
        assert!(report.is_clean());
        assert_eq!(store.array_data("test-run/variables/U").unwrap(), before);
    }

    #[tokio::test]
    async fn test_attribute_filter() {
        let mut config = run_config(DEFAULT_START, END, 60);
        config.filters.attributes = NameList::Csv("units, TITLE, DX".to_string());
        config.filters.exclude_attributes = NameList::List(vec!["DX".to_string()]);
        let (store, writer) = writer_with(config);

        let file = WrfFileBuilder::new("/out", DEFAULT_START)
            .grid(11, 7)
            .attribute("SECRET", AttrValue::Text("x".to_string()))
            .build();
        write(&writer, &file).await;

        let submitted: Vec<String> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::KvWrite { name, keys }
                    if name.ends_with("global_attributes") || name.contains("/attributes/") =>
                {
                    Some(keys)
                }
                _ => None,
            })
            .flatten()
            .collect();
        assert!(submitted.contains(&"TITLE".to_string()));
        assert!(submitted.contains(&"units".to_string()));
        for rejected in ["SECRET", "DX", "stagger", "FieldType", "SIMULATION_START_DATE"] {
            assert!(!submitted.contains(&rejected.to_string()), "{} was submitted", rejected);
        }
    }

    #[tokio::test]
    async fn test_variable_filter() {
        let mut config = run_config(DEFAULT_START, END, 60);
        config.filters.variables = NameList::Csv("T2".to_string());
        let (store, writer) = writer_with(config);
        write(&writer, &first_file()).await;

        assert!(store.exists("test-run/variables/T2").unwrap());
        assert!(!store.exists("test-run/variables/U").unwrap());
        assert!(!store.exists("test-run/attributes/U").unwrap());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_one_variable() {
        let (store, writer) = writer();
        let file = WrfFileBuilder::new("/out", DEFAULT_START)
            .grid(11, 7)
            .variables(&[
                ("T", VarKind::Volume),
                ("T2", VarKind::Surface),
                ("U", VarKind::StaggeredU),
            ])
            .build();
        store.fail_writes_to("test-run/variables/T2");

        let report = write(&writer, &file).await;
        assert_eq!(report.frames_failed, 1);
        assert_eq!(report.frames_written, 2);
        assert!(!report.is_clean());
        assert_eq!(store.write_count("test-run/variables/U"), 1);
    }

    #[tokio::test]
    async fn test_later_file_waits_for_array() {
        let (store, writer) = writer();
        write(&writer, &first_file()).await;

        store.hide_for("test-run/variables/T2", 1);
        let later = WrfFileBuilder::new("/out", "2018-01-01_00:01:00")
            .grid(11, 7)
            .frames(1, 1)
            .variables(&[("T2", VarKind::Surface)])
            .build();
        let report = write(&writer, &later).await;
        assert_eq!(report.frames_written, 1);
    }

    #[tokio::test]
    async fn test_missing_array_is_store_unavailable() {
        let (_store, writer) = writer();
        let later = WrfFileBuilder::new("/out", "2018-01-01_00:01:00")
            .grid(11, 7)
            .variables(&[("T2", VarKind::Surface)])
            .build();
        let ds = later.dataset();
        let descriptor = DatasetFile::parse(&later.path).unwrap();
        let err = writer.write_file(&descriptor, &ds).await.unwrap_err();
        assert!(matches!(err, IngestionError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_initialization_does_not_recreate() {
        let (store, writer) = writer();
        let ds = first_file().dataset();
        writer.ensure_arrays_initialized(&ds).unwrap();
        store.clear_calls();
        writer.ensure_arrays_initialized(&ds).unwrap();
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_consolidate_covers_every_variable() {
        let (store, writer) = writer();
        write(&writer, &first_file()).await;
        store.clear_calls();
        writer.consolidate().unwrap();

        let consolidated: Vec<String> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Consolidate(name) => Some(name),
                _ => None,
            })
            .collect();
        for name in [
            "test-run/global_attributes",
            "test-run/dimensions",
            "test-run/coords",
            "test-run/variables/T2",
            "test-run/variables/U",
            "test-run/attributes/T2",
            "test-run/attributes/U",
        ] {
            let count = consolidated.iter().filter(|n| *n == name).count();
            assert_eq!(count, 1, "{} consolidated {} times", name, count);
        }
        assert_eq!(consolidated.len(), 7);
    }

    #[tokio::test]
    async fn test_bad_patch_bounds_spare_later_variables() {
        let (store, writer) = writer();
        let file = WrfFileBuilder::new("/out", DEFAULT_START)
            .grid(11, 7)
            .variables(&[("T", VarKind::Volume), ("T2", VarKind::Surface)])
            .attribute("BOTTOM-TOP_PATCH_START_UNSTAG", AttrValue::Int(0))
            .build();

        let report = write(&writer, &file).await;
        assert_eq!(report.frames_failed, 1);
        assert_eq!(report.frames_written, 1);
        assert!(!report.is_clean());
        assert_eq!(store.write_count("test-run/variables/T"), 0);
        assert_eq!(store.write_count("test-run/variables/T2"), 1);
    }
}
