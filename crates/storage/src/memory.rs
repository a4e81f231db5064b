//! In-memory array store for tests.
//!
//! Records every mutating call in order and can inject failures, which lets
//! callers assert on write ordering and exercise retry paths without touching
//! the filesystem.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

use crate::error::{StorageError, StorageResult};
use crate::layout;
use crate::schema::{ArrayData, ArraySchema};
use crate::store::{check_block, ArrayStore};

/// A mutating call observed by [`MemoryArrayStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    CreateGroup(String),
    CreateKv(String),
    CreateArray(String),
    KvWrite { name: String, keys: Vec<String> },
    WriteSlice { name: String, slices: Vec<Range<u64>> },
    Consolidate(String),
}

enum Node {
    Group,
    Kv(BTreeMap<String, String>),
    Array { schema: ArraySchema, data: ArrayData },
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, Node>,
    calls: Vec<StoreCall>,
    failing_writes: HashSet<String>,
    hidden: HashMap<String, usize>,
    failing_exists: usize,
}

#[derive(Default)]
pub struct MemoryArrayStore {
    state: Mutex<State>,
}

fn normalize(name: &str) -> String {
    name.trim_matches('/').to_string()
}

impl MemoryArrayStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }

    /// Make every `write_slice` to `name` fail.
    pub fn fail_writes_to(&self, name: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_writes.insert(normalize(name));
        }
    }

    /// Report `name` as absent for the next `times` calls to `exists`.
    pub fn hide_for(&self, name: &str, times: usize) {
        if let Ok(mut state) = self.lock() {
            state.hidden.insert(normalize(name), times);
        }
    }

    /// Make the next `times` calls to `exists` fail with a backend error.
    pub fn fail_exists_for(&self, times: usize) {
        if let Ok(mut state) = self.lock() {
            state.failing_exists = times;
        }
    }

    /// Mutating calls recorded so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.lock() {
            state.calls.clear();
        }
    }

    /// Number of `write_slice` calls recorded against `name`.
    pub fn write_count(&self, name: &str) -> usize {
        let name = normalize(name);
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::WriteSlice { name: n, .. } if *n == name))
            .count()
    }

    /// Full contents of an array, row-major.
    pub fn array_data(&self, name: &str) -> Option<ArrayData> {
        let state = self.lock().ok()?;
        match state.nodes.get(&normalize(name)) {
            Some(Node::Array { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Every node name currently stored, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|s| s.nodes.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn create(&self, name: &str, node: Node, call: StoreCall) -> StorageResult<()> {
        let mut state = self.lock()?;
        let name = normalize(name);
        if state.nodes.contains_key(&name) {
            return Err(StorageError::AlreadyExists(name));
        }
        state.nodes.insert(name, node);
        state.calls.push(call);
        Ok(())
    }
}

fn wrong_kind(name: &str, expected: &'static str) -> StorageError {
    StorageError::WrongKind {
        name: name.to_string(),
        expected,
    }
}

fn copy_block(dst: &mut ArrayData, shape: &[u64], start: &[u64], block: &[u64], src: &ArrayData) {
    match (dst, src) {
        (ArrayData::F32(d), ArrayData::F32(s)) => layout::scatter(d, shape, start, block, s),
        (ArrayData::F64(d), ArrayData::F64(s)) => layout::scatter(d, shape, start, block, s),
        (ArrayData::I32(d), ArrayData::I32(s)) => layout::scatter(d, shape, start, block, s),
        (ArrayData::I64(d), ArrayData::I64(s)) => layout::scatter(d, shape, start, block, s),
        (ArrayData::U8(d), ArrayData::U8(s)) => layout::scatter(d, shape, start, block, s),
        // Element types are checked before copying.
        _ => {}
    }
}

fn read_block(src: &ArrayData, shape: &[u64], start: &[u64], block: &[u64]) -> ArrayData {
    match src {
        ArrayData::F32(s) => ArrayData::F32(layout::gather(s, shape, start, block)),
        ArrayData::F64(s) => ArrayData::F64(layout::gather(s, shape, start, block)),
        ArrayData::I32(s) => ArrayData::I32(layout::gather(s, shape, start, block)),
        ArrayData::I64(s) => ArrayData::I64(layout::gather(s, shape, start, block)),
        ArrayData::U8(s) => ArrayData::U8(layout::gather(s, shape, start, block)),
    }
}

impl ArrayStore for MemoryArrayStore {
    fn exists(&self, name: &str) -> StorageResult<bool> {
        let mut state = self.lock()?;
        if state.failing_exists > 0 {
            state.failing_exists -= 1;
            return Err(StorageError::Backend(format!("injected exists failure for {}", name)));
        }
        let name = normalize(name);
        if let Some(remaining) = state.hidden.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(state.nodes.contains_key(&name))
    }

    fn create_group(&self, name: &str) -> StorageResult<()> {
        self.create(name, Node::Group, StoreCall::CreateGroup(normalize(name)))
    }

    fn create_array(&self, name: &str, schema: &ArraySchema) -> StorageResult<()> {
        schema.validate(name)?;
        let len: u64 = schema.shape().iter().product();
        let node = Node::Array {
            schema: schema.clone(),
            data: ArrayData::filled(schema.element_type, len as usize),
        };
        self.create(name, node, StoreCall::CreateArray(normalize(name)))
    }

    fn array_schema(&self, name: &str) -> StorageResult<ArraySchema> {
        let state = self.lock()?;
        match state.nodes.get(&normalize(name)) {
            Some(Node::Array { schema, .. }) => Ok(schema.clone()),
            Some(_) => Err(wrong_kind(name, "array")),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn write_slice(&self, name: &str, slices: &[Range<u64>], data: &ArrayData) -> StorageResult<()> {
        let mut state = self.lock()?;
        let key = normalize(name);
        state.calls.push(StoreCall::WriteSlice {
            name: key.clone(),
            slices: slices.to_vec(),
        });
        if state.failing_writes.contains(&key) {
            return Err(StorageError::Backend(format!("injected write failure for {}", key)));
        }

        match state.nodes.get_mut(&key) {
            Some(Node::Array { schema, data: stored }) => {
                let (start, block) = schema.subset(name, slices)?;
                check_block(name, schema, &block, data)?;
                let shape = schema.shape();
                copy_block(stored, &shape, &start, &block, data);
                Ok(())
            }
            Some(_) => Err(wrong_kind(name, "array")),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn read_slice(&self, name: &str, slices: &[Range<u64>]) -> StorageResult<ArrayData> {
        let state = self.lock()?;
        match state.nodes.get(&normalize(name)) {
            Some(Node::Array { schema, data }) => {
                let (start, block) = schema.subset(name, slices)?;
                Ok(read_block(data, &schema.shape(), &start, &block))
            }
            Some(_) => Err(wrong_kind(name, "array")),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn create_kv(&self, name: &str) -> StorageResult<()> {
        self.create(
            name,
            Node::Kv(BTreeMap::new()),
            StoreCall::CreateKv(normalize(name)),
        )
    }

    fn kv_write(&self, name: &str, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let mut state = self.lock()?;
        let key = normalize(name);
        match state.nodes.get_mut(&key) {
            Some(Node::Kv(map)) => {
                map.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(_) => return Err(wrong_kind(name, "key-value store")),
            None => return Err(StorageError::NotFound(name.to_string())),
        }
        state.calls.push(StoreCall::KvWrite {
            name: key,
            keys: entries.keys().cloned().collect(),
        });
        Ok(())
    }

    fn kv_get(&self, name: &str, key: &str) -> StorageResult<Option<String>> {
        let state = self.lock()?;
        match state.nodes.get(&normalize(name)) {
            Some(Node::Kv(map)) => Ok(map.get(key).cloned()),
            Some(_) => Err(wrong_kind(name, "key-value store")),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn kv_keys(&self, name: &str) -> StorageResult<Vec<String>> {
        let state = self.lock()?;
        match state.nodes.get(&normalize(name)) {
            Some(Node::Kv(map)) => Ok(map.keys().cloned().collect()),
            Some(_) => Err(wrong_kind(name, "key-value store")),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn children(&self, name: &str) -> StorageResult<Vec<String>> {
        let state = self.lock()?;
        let key = normalize(name);
        match state.nodes.get(&key) {
            Some(Node::Group) => {}
            Some(_) => return Err(wrong_kind(name, "group")),
            None => return Err(StorageError::NotFound(name.to_string())),
        }
        let prefix = format!("{}/", key);
        let mut names: Vec<String> = state
            .nodes
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn consolidate(&self, name: &str) -> StorageResult<()> {
        let mut state = self.lock()?;
        let key = normalize(name);
        if state.nodes.contains_key(&key) {
            state.calls.push(StoreCall::Consolidate(key));
            Ok(())
        } else {
            Err(StorageError::NotFound(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Dimension, ElementType};

    fn schema() -> ArraySchema {
        ArraySchema::new(
            vec![Dimension::new("Time", 0, 2, 1), Dimension::new("x", 0, 3, 4)],
            "U",
            ElementType::I32,
        )
    }

    #[test]
    fn test_write_and_read_block() {
        let store = MemoryArrayStore::new();
        store.create_array("U", &schema()).unwrap();
        store
            .write_slice("U", &[1..2, 1..3], &ArrayData::I32(vec![7, 8]))
            .unwrap();

        assert_eq!(
            store.read_slice("U", &[1..2, 0..4]).unwrap(),
            ArrayData::I32(vec![0, 7, 8, 0])
        );
        assert_eq!(store.write_count("U"), 1);
    }

    #[test]
    fn test_injected_write_failure_is_recorded() {
        let store = MemoryArrayStore::new();
        store.create_array("U", &schema()).unwrap();
        store.fail_writes_to("U");

        let err = store
            .write_slice("U", &[0..1, 0..4], &ArrayData::I32(vec![1, 2, 3, 4]))
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(store.write_count("U"), 1);
        assert_eq!(store.array_data("U"), Some(ArrayData::I32(vec![0; 12])));
    }

    #[test]
    fn test_hidden_node_reappears() {
        let store = MemoryArrayStore::new();
        store.create_kv("coords").unwrap();
        store.hide_for("coords", 2);

        assert!(!store.exists("coords").unwrap());
        assert!(!store.exists("coords").unwrap());
        assert!(store.exists("coords").unwrap());
    }

    #[test]
    fn test_injected_exists_failures_run_out() {
        let store = MemoryArrayStore::new();
        store.create_group("run").unwrap();
        store.fail_exists_for(2);

        assert!(matches!(store.exists("run"), Err(StorageError::Backend(_))));
        assert!(store.exists("missing").is_err());
        assert!(store.exists("run").unwrap());
        assert!(!store.exists("missing").unwrap());
    }

    #[test]
    fn test_kv_and_kind_checks() {
        let store = MemoryArrayStore::new();
        store.create_group("run").unwrap();
        store.create_kv("run/coords").unwrap();

        let mut entries = BTreeMap::new();
        entries.insert("XLAT".to_string(), "XLAT".to_string());
        store.kv_write("run/coords", &entries).unwrap();

        assert_eq!(store.kv_keys("/run/coords/").unwrap(), vec!["XLAT"]);
        assert_eq!(store.children("run").unwrap(), vec!["coords"]);
        assert!(matches!(store.children("run/coords"), Err(StorageError::WrongKind { .. })));
        assert!(matches!(store.kv_keys("run"), Err(StorageError::WrongKind { .. })));
        assert!(matches!(store.create_kv("run/coords"), Err(StorageError::AlreadyExists(_))));
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::KvWrite {
                name: "run/coords".to_string(),
                keys: vec!["XLAT".to_string()],
            })
        );
    }
}
