//! Zarr V3 backend on a local (or mounted) filesystem.
//!
//! Layout under the store root:
//! - groups are Zarr groups tagged `kind = "group"`
//! - key-value stores are Zarr groups tagged `kind = "kv"`, entries kept in
//!   the `entries` attribute
//! - arrays are Zarr V3 arrays with one chunk per tile; the [`ArraySchema`]
//!   is kept in the `schema` attribute so global bounds survive a reopen

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

use crate::error::{StorageError, StorageResult};
use crate::schema::{ArrayData, ArraySchema, ElementType};
use crate::store::{check_block, ArrayStore};

const KIND_ATTR: &str = "kind";
const ENTRIES_ATTR: &str = "entries";
const SCHEMA_ATTR: &str = "schema";

fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Group,
    Kv,
    Array,
}

/// Array store persisting to a Zarr V3 hierarchy rooted at a directory.
pub struct ZarrArrayStore {
    root: PathBuf,
    store: Arc<FilesystemStore>,
    kv_lock: Mutex<()>,
}

impl ZarrArrayStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let store = FilesystemStore::new(&root).map_err(backend)?;
        info!(root = %root.display(), "Opened Zarr array store");
        Ok(Self {
            root,
            store: Arc::new(store),
            kv_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node_path(name: &str) -> StorageResult<String> {
        let trimmed = name.trim_matches('/');
        if trimmed.is_empty()
            || trimmed
                .split('/')
                .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(StorageError::Backend(format!("invalid node name '{}'", name)));
        }
        Ok(format!("/{}", trimmed))
    }

    fn metadata_file(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_matches('/')).join("zarr.json")
    }

    /// Node kind from `zarr.json`, or `None` when nothing is stored under `name`.
    fn node_kind(&self, name: &str) -> StorageResult<Option<NodeKind>> {
        Self::node_path(name)?;
        let file = self.metadata_file(name);
        if !file.try_exists()? {
            return Ok(None);
        }
        let metadata: Value = serde_json::from_slice(&std::fs::read(&file)?)?;
        let kind = match metadata.get("node_type").and_then(Value::as_str) {
            Some("array") => NodeKind::Array,
            Some("group") => {
                let tag = metadata
                    .get("attributes")
                    .and_then(|a| a.get(KIND_ATTR))
                    .and_then(Value::as_str);
                if tag == Some("kv") {
                    NodeKind::Kv
                } else {
                    NodeKind::Group
                }
            }
            other => {
                return Err(StorageError::Backend(format!(
                    "unknown node type {:?} for {}",
                    other, name
                )))
            }
        };
        Ok(Some(kind))
    }

    fn require_kind(&self, name: &str, kind: NodeKind, expected: &'static str) -> StorageResult<()> {
        match self.node_kind(name)? {
            None => Err(StorageError::NotFound(name.to_string())),
            Some(k) if k == kind => Ok(()),
            Some(_) => Err(StorageError::WrongKind {
                name: name.to_string(),
                expected,
            }),
        }
    }

    fn ensure_absent(&self, name: &str) -> StorageResult<()> {
        if self.node_kind(name)?.is_some() {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    fn store_group(&self, name: &str, attributes: Map<String, Value>) -> StorageResult<()> {
        let path = Self::node_path(name)?;
        GroupBuilder::new()
            .attributes(attributes)
            .build(self.store.clone(), &path)
            .map_err(backend)?
            .store_metadata()
            .map_err(backend)
    }

    fn open_array(&self, name: &str) -> StorageResult<(Array<FilesystemStore>, ArraySchema)> {
        self.require_kind(name, NodeKind::Array, "array")?;
        let path = Self::node_path(name)?;
        let array = Array::open(self.store.clone(), &path).map_err(backend)?;
        let schema_value = array
            .attributes()
            .get(SCHEMA_ATTR)
            .cloned()
            .ok_or_else(|| StorageError::InvalidSchema {
                name: name.to_string(),
                reason: "missing schema attribute".to_string(),
            })?;
        let schema: ArraySchema = serde_json::from_value(schema_value)?;
        Ok((array, schema))
    }

    fn kv_entries(&self, name: &str) -> StorageResult<Map<String, Value>> {
        self.require_kind(name, NodeKind::Kv, "key-value store")?;
        let path = Self::node_path(name)?;
        let group = Group::open(self.store.clone(), &path).map_err(backend)?;
        Ok(group
            .attributes()
            .get(ENTRIES_ATTR)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }
}

fn data_type(element_type: ElementType) -> (DataType, FillValue) {
    match element_type {
        ElementType::F32 => (DataType::Float32, FillValue::from(f32::NAN)),
        ElementType::F64 => (DataType::Float64, FillValue::from(f64::NAN)),
        ElementType::I32 => (DataType::Int32, FillValue::from(0i32)),
        ElementType::I64 => (DataType::Int64, FillValue::from(0i64)),
        ElementType::U8 => (DataType::UInt8, FillValue::from(0u8)),
    }
}

impl ArrayStore for ZarrArrayStore {
    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.node_kind(name)?.is_some())
    }

    #[instrument(skip(self))]
    fn create_group(&self, name: &str) -> StorageResult<()> {
        self.ensure_absent(name)?;
        let mut attributes = Map::new();
        attributes.insert(KIND_ATTR.to_string(), json!("group"));
        self.store_group(name, attributes)?;
        debug!(name, "Created group");
        Ok(())
    }

    #[instrument(skip(self, schema), fields(element_type = %schema.element_type))]
    fn create_array(&self, name: &str, schema: &ArraySchema) -> StorageResult<()> {
        schema.validate(name)?;
        self.ensure_absent(name)?;
        let path = Self::node_path(name)?;

        let mut attrs = Map::new();
        attrs.insert(SCHEMA_ATTR.to_string(), serde_json::to_value(schema)?);
        attrs.insert("dimension_names".to_string(), json!(schema.dimension_names()));

        let chunk_grid: zarrs::array::ChunkGrid = schema
            .tiles()
            .try_into()
            .map_err(|e| StorageError::InvalidSchema {
                name: name.to_string(),
                reason: format!("{:?}", e),
            })?;

        let (dtype, fill) = data_type(schema.element_type);
        let mut binding = ArrayBuilder::new(schema.shape(), dtype, chunk_grid, fill);
        let builder = binding.attributes(attrs);

        let array = builder.build(self.store.clone(), &path).map_err(backend)?;
        array.store_metadata().map_err(backend)?;

        debug!(name, shape = ?schema.shape(), tiles = ?schema.tiles(), "Created array");
        Ok(())
    }

    fn array_schema(&self, name: &str) -> StorageResult<ArraySchema> {
        self.open_array(name).map(|(_, schema)| schema)
    }

    fn write_slice(&self, name: &str, slices: &[Range<u64>], data: &ArrayData) -> StorageResult<()> {
        let (array, schema) = self.open_array(name)?;
        let (start, shape) = schema.subset(name, slices)?;
        check_block(name, &schema, &shape, data)?;

        let subset = ArraySubset::new_with_start_shape(start, shape).map_err(backend)?;
        match data {
            ArrayData::F32(v) => array.store_array_subset_elements::<f32>(&subset, v),
            ArrayData::F64(v) => array.store_array_subset_elements::<f64>(&subset, v),
            ArrayData::I32(v) => array.store_array_subset_elements::<i32>(&subset, v),
            ArrayData::I64(v) => array.store_array_subset_elements::<i64>(&subset, v),
            ArrayData::U8(v) => array.store_array_subset_elements::<u8>(&subset, v),
        }
        .map_err(backend)
    }

    fn read_slice(&self, name: &str, slices: &[Range<u64>]) -> StorageResult<ArrayData> {
        let (array, schema) = self.open_array(name)?;
        let (start, shape) = schema.subset(name, slices)?;

        let subset = ArraySubset::new_with_start_shape(start, shape).map_err(backend)?;
        let data = match schema.element_type {
            ElementType::F32 => ArrayData::F32(
                array
                    .retrieve_array_subset_elements::<f32>(&subset)
                    .map_err(backend)?,
            ),
            ElementType::F64 => ArrayData::F64(
                array
                    .retrieve_array_subset_elements::<f64>(&subset)
                    .map_err(backend)?,
            ),
            ElementType::I32 => ArrayData::I32(
                array
                    .retrieve_array_subset_elements::<i32>(&subset)
                    .map_err(backend)?,
            ),
            ElementType::I64 => ArrayData::I64(
                array
                    .retrieve_array_subset_elements::<i64>(&subset)
                    .map_err(backend)?,
            ),
            ElementType::U8 => ArrayData::U8(
                array
                    .retrieve_array_subset_elements::<u8>(&subset)
                    .map_err(backend)?,
            ),
        };
        Ok(data)
    }

    #[instrument(skip(self))]
    fn create_kv(&self, name: &str) -> StorageResult<()> {
        self.ensure_absent(name)?;
        let mut attributes = Map::new();
        attributes.insert(KIND_ATTR.to_string(), json!("kv"));
        attributes.insert(ENTRIES_ATTR.to_string(), Value::Object(Map::new()));
        self.store_group(name, attributes)?;
        debug!(name, "Created key-value store");
        Ok(())
    }

    fn kv_write(&self, name: &str, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let _guard = self
            .kv_lock
            .lock()
            .map_err(|_| StorageError::Backend("key-value lock poisoned".to_string()))?;

        let mut current = self.kv_entries(name)?;
        for (key, value) in entries {
            current.insert(key.clone(), Value::String(value.clone()));
        }

        let mut attributes = Map::new();
        attributes.insert(KIND_ATTR.to_string(), json!("kv"));
        attributes.insert(ENTRIES_ATTR.to_string(), Value::Object(current));
        self.store_group(name, attributes)
    }

    fn kv_get(&self, name: &str, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .kv_entries(name)?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn kv_keys(&self, name: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self.kv_entries(name)?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn children(&self, name: &str) -> StorageResult<Vec<String>> {
        self.require_kind(name, NodeKind::Group, "group")?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.root.join(name.trim_matches('/')))? {
            let entry = entry?;
            if entry.path().join("zarr.json").try_exists()? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn consolidate(&self, name: &str) -> StorageResult<()> {
        // Zarr writes whole chunks in place, there are no fragments to merge.
        match self.node_kind(name)? {
            Some(_) => {
                debug!(name, "Consolidated");
                Ok(())
            }
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }
}
