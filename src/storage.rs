//! Persisted expansion state.
//!
//! Every favorite owns two kinds of entries in the host's key-value storage:
//!
//! - a root flag under `expansion-_<scope>-<graph>` recording whether the favorite itself is
//!   expanded, stored as `"true"`/`"false"`;
//! - one [ExpansionMap] per expanded level under `expansion-<scope>-<graph>`, where nested scopes
//!   append `-<label>` per level (`Projects-Launch-Tasks`). The map is a flat JSON object from a
//!   child's local key to its expansion flag.
//!
//! Keeping the root flag apart from the descendant map means collapsing a favorite does not
//! forget which of its branches were open. Reads fail open (absent or unreadable state reads as
//! collapsed), writes replace the whole entry.
//!
//! Keys touched while rendering are recorded into a [ReadKeySet]; after a full pass,
//! [ExpansionStateStore::collect_garbage] removes the keys of the current graph nobody read.
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    fs,
    future::Future,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use crate::FavTreeError;

/// Prefix shared by every expansion entry.
pub const EXPANSION_PREFIX: &str = "expansion-";
/// Marker distinguishing root flags from descendant maps.
pub const ROOT_MARKER: char = '_';
/// Joins scope segments and the graph identity.
pub const SCOPE_SEP: char = '-';

/// String-valued key-value storage of the host, scoped per installation.
pub trait Persistence: Send + Sync {
    fn has(&self, key: &str) -> impl Future<Output = Result<bool, FavTreeError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, FavTreeError>> + Send;

    fn set(&self, key: &str, value: String)
        -> impl Future<Output = Result<(), FavTreeError>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), FavTreeError>> + Send;

    fn list_keys(&self) -> impl Future<Output = Result<Vec<String>, FavTreeError>> + Send;
}

/// Identity of the graph currently open in the host.
pub trait HostIdentity: Send + Sync {
    fn current_graph_identity(&self) -> String;
}

impl HostIdentity for String {
    fn current_graph_identity(&self) -> String {
        self.clone()
    }
}

impl HostIdentity for &'static str {
    fn current_graph_identity(&self) -> String {
        self.to_string()
    }
}

/// A graph identity that the host glue updates when the user switches graphs.
#[derive(Debug, Clone, Default)]
pub struct SwitchableGraph(Arc<RwLock<String>>);

impl SwitchableGraph {
    pub fn new(graph: &str) -> SwitchableGraph {
        SwitchableGraph(Arc::new(RwLock::new(graph.to_string())))
    }

    pub fn switch_to(&self, graph: &str) {
        tracing::info!("Switching expansion state to graph '{}'", graph);
        *self.0.write() = graph.to_string();
    }
}

impl HostIdentity for SwitchableGraph {
    fn current_graph_identity(&self) -> String {
        self.0.read().clone()
    }
}

/// A fully qualified storage key for one root flag or one expansion map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpansionKey(String);

impl ExpansionKey {
    /// Key of the "is this favorite expanded" flag.
    pub fn root(scope: &str, graph: &str) -> ExpansionKey {
        ExpansionKey(format!(
            "{EXPANSION_PREFIX}{ROOT_MARKER}{scope}{SCOPE_SEP}{graph}"
        ))
    }

    /// Key of the expansion map holding the flags of `scope`'s children.
    pub fn branch(scope: &str, graph: &str) -> ExpansionKey {
        ExpansionKey(format!("{EXPANSION_PREFIX}{scope}{SCOPE_SEP}{graph}"))
    }

    /// Wrap a raw storage key if it is an expansion key.
    pub fn from_storage(raw: &str) -> Option<ExpansionKey> {
        raw.starts_with(EXPANSION_PREFIX)
            .then(|| ExpansionKey(raw.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.0[EXPANSION_PREFIX.len()..].starts_with(ROOT_MARKER)
    }

    pub fn belongs_to(&self, graph: &str) -> bool {
        self.0
            .strip_suffix(graph)
            .is_some_and(|rest| rest.ends_with(SCOPE_SEP))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExpansionKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage scope of a nested level: the parent scope plus the child's label.
pub fn child_scope(parent: &str, label: &str) -> String {
    format!("{parent}{SCOPE_SEP}{label}")
}

/// Expansion flags of one level, keyed by the children's local keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpansionMap(BTreeMap<String, bool>);

impl ExpansionMap {
    /// Absent entries read as collapsed.
    pub fn get(&self, key: &str) -> bool {
        self.0.get(key).copied().unwrap_or(false)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// A copy of this map with `key` set to `value`.
    pub fn with(&self, key: &str, value: bool) -> ExpansionMap {
        let mut next = self.clone();
        next.0.insert(key.to_string(), value);
        next
    }

    /// A copy of this map with every key in `keys` set to `value`.
    pub fn with_all<'a, I: IntoIterator<Item = &'a str>>(&self, keys: I, value: bool) -> ExpansionMap {
        let mut next = self.clone();
        for key in keys {
            next.0.insert(key.to_string(), value);
        }
        next
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for ExpansionMap {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        ExpansionMap(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Append-only record of the keys read during one resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ReadKeySet(Arc<Mutex<BTreeSet<ExpansionKey>>>);

impl ReadKeySet {
    pub fn record(&self, key: &ExpansionKey) {
        self.0.lock().insert(key.clone());
    }

    pub fn contains(&self, key: &ExpansionKey) -> bool {
        self.0.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn keys(&self) -> BTreeSet<ExpansionKey> {
        self.0.lock().clone()
    }
}

/// In-memory [Persistence], used by tests and short-lived sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage(Arc<RwLock<BTreeMap<String, String>>>);

impl MemoryStorage {
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Current raw value, bypassing the async interface.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.0.read().get(key).cloned()
    }
}

impl Persistence for MemoryStorage {
    async fn has(&self, key: &str) -> Result<bool, FavTreeError> {
        Ok(self.0.read().contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FavTreeError> {
        Ok(self.0.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), FavTreeError> {
        self.0.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), FavTreeError> {
        self.0.write().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, FavTreeError> {
        Ok(self.0.read().keys().cloned().collect())
    }
}

/// [Persistence] backed by a sandbox directory holding one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

const FILE_EXT: &str = ".json";

fn encode_file_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + FILE_EXT.len());
    for ch in key.chars() {
        if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | ' ') {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out.push_str(FILE_EXT);
    out
}

fn decode_file_name(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(FILE_EXT)?;
    let mut bytes = Vec::with_capacity(stem.len());
    let mut iter = stem.bytes();
    while let Some(byte) = iter.next() {
        if byte == b'%' {
            let hi = iter.next()?;
            let lo = iter.next()?;
            let hex_pair = [hi, lo];
            let decoded = hex::decode(hex_pair).ok()?;
            bytes.extend(decoded);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}

impl DirStorage {
    pub fn new(root: PathBuf) -> Result<DirStorage, FavTreeError> {
        fs::create_dir_all(&root)?;
        Ok(DirStorage { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_file_name(key))
    }
}

impl Persistence for DirStorage {
    async fn has(&self, key: &str) -> Result<bool, FavTreeError> {
        Ok(self.path_for(key).is_file())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FavTreeError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FavTreeError::Persistence(format!("read '{key}': {err}"))),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), FavTreeError> {
        fs::write(self.path_for(key), value)
            .map_err(|err| FavTreeError::Persistence(format!("write '{key}': {err}")))
    }

    async fn remove(&self, key: &str) -> Result<(), FavTreeError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FavTreeError::Persistence(format!("remove '{key}': {err}"))),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, FavTreeError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(key) = entry.file_name().to_str().and_then(decode_file_name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Expansion flags of the current graph on top of a [Persistence] backend.
pub struct ExpansionStateStore<P> {
    storage: P,
    host: Arc<dyn HostIdentity>,
}

impl<P: Persistence> ExpansionStateStore<P> {
    pub fn new<H: HostIdentity + 'static>(storage: P, host: H) -> ExpansionStateStore<P> {
        ExpansionStateStore {
            storage,
            host: Arc::new(host),
        }
    }

    pub fn graph(&self) -> String {
        self.host.current_graph_identity()
    }

    pub fn root_key(&self, scope: &str) -> ExpansionKey {
        ExpansionKey::root(scope, &self.graph())
    }

    pub fn branch_key(&self, scope: &str) -> ExpansionKey {
        ExpansionKey::branch(scope, &self.graph())
    }

    pub fn storage(&self) -> &P {
        &self.storage
    }

    async fn read_raw(&self, key: &ExpansionKey) -> Result<Option<String>, FavTreeError> {
        if !self.storage.has(key.as_str()).await? {
            return Ok(None);
        }
        self.storage.get(key.as_str()).await
    }

    /// The stored map, or an empty one when absent or unreadable.
    pub async fn read_map(&self, key: &ExpansionKey, read_keys: Option<&ReadKeySet>) -> ExpansionMap {
        if let Some(read_keys) = read_keys {
            read_keys.record(key);
        }
        match self.read_raw(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!("Discarding unreadable expansion map {}: {}", key, err);
                ExpansionMap::default()
            }),
            Ok(None) => ExpansionMap::default(),
            Err(err) => {
                tracing::warn!("Failed to read expansion map {}: {}", key, err);
                ExpansionMap::default()
            }
        }
    }

    /// The stored root flag, or `false` when absent or unreadable.
    pub async fn read_root_flag(&self, key: &ExpansionKey, read_keys: Option<&ReadKeySet>) -> bool {
        if let Some(read_keys) = read_keys {
            read_keys.record(key);
        }
        match self.read_raw(key).await {
            Ok(Some(raw)) => match raw.trim() {
                "true" => true,
                "false" => false,
                other => {
                    tracing::warn!("Discarding unreadable root flag {}: {:?}", key, other);
                    false
                }
            },
            Ok(None) => false,
            Err(err) => {
                tracing::warn!("Failed to read root flag {}: {}", key, err);
                false
            }
        }
    }

    pub async fn write_map(&self, key: &ExpansionKey, map: &ExpansionMap) -> Result<(), FavTreeError> {
        let encoded = serde_json::to_string(map)?;
        tracing::trace!("write {} = {}", key, encoded);
        self.storage.set(key.as_str(), encoded).await
    }

    pub async fn write_root_flag(&self, key: &ExpansionKey, value: bool) -> Result<(), FavTreeError> {
        tracing::trace!("write {} = {}", key, value);
        self.storage.set(key.as_str(), value.to_string()).await
    }

    /// Every persisted expansion key of the current graph.
    pub async fn list_all_keys(&self) -> Result<Vec<ExpansionKey>, FavTreeError> {
        let graph = self.graph();
        Ok(self
            .storage
            .list_keys()
            .await?
            .iter()
            .filter_map(|raw| ExpansionKey::from_storage(raw))
            .filter(|key| key.belongs_to(&graph))
            .collect())
    }

    pub async fn remove_key(&self, key: &ExpansionKey) -> Result<(), FavTreeError> {
        self.storage.remove(key.as_str()).await
    }

    /// Wait `settle` for in-flight loads to finish touching keys, then delete every key of the
    /// current graph missing from `read_keys`. Returns the removed keys.
    #[tracing::instrument(skip(self, read_keys))]
    pub async fn collect_garbage(
        &self,
        read_keys: &ReadKeySet,
        settle: Duration,
    ) -> Result<Vec<ExpansionKey>, FavTreeError> {
        tokio::time::sleep(settle).await;
        let mut removed = Vec::new();
        for key in self.list_all_keys().await? {
            if read_keys.contains(&key) {
                continue;
            }
            match self.remove_key(&key).await {
                Ok(()) => removed.push(key),
                Err(err) => tracing::warn!("Failed to remove stale expansion key {}: {}", key, err),
            }
        }
        if !removed.is_empty() {
            tracing::debug!("Removed {} stale expansion key(s)", removed.len());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_log::test;

    fn memory_store(graph: &'static str) -> ExpansionStateStore<MemoryStorage> {
        ExpansionStateStore::new(MemoryStorage::default(), graph)
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(ExpansionKey::root("PageA", "g1").as_str(), "expansion-_PageA-g1");
        assert_eq!(ExpansionKey::branch("PageA", "g1").as_str(), "expansion-PageA-g1");
        assert_eq!(
            ExpansionKey::branch(&child_scope(&child_scope("PageA", "x"), "y"), "g1").as_str(),
            "expansion-PageA-x-y-g1"
        );
        assert!(ExpansionKey::root("PageA", "g1").is_root());
        assert!(!ExpansionKey::branch("PageA", "g1").is_root());
        assert!(ExpansionKey::branch("PageA", "g1").belongs_to("g1"));
        assert!(!ExpansionKey::branch("PageA", "g1").belongs_to("1"));
        assert!(!ExpansionKey::branch("PageA", "g1").belongs_to("g2"));
        assert_eq!(ExpansionKey::from_storage("other-key"), None);
    }

    #[test(tokio::test)]
    async fn test_root_flag_defaults_false_and_persists() {
        let store = memory_store("g1");
        let key = store.root_key("PageA");
        let read = ReadKeySet::default();
        assert!(!store.read_root_flag(&key, Some(&read)).await);
        assert!(read.contains(&key));

        store.write_root_flag(&key, true).await.unwrap();
        assert_eq!(store.storage().peek("expansion-_PageA-g1").as_deref(), Some("true"));
        assert!(store.read_root_flag(&key, None).await);
    }

    #[test(tokio::test)]
    async fn test_map_round_trip_and_fail_open() {
        let store = memory_store("g1");
        let key = store.branch_key("PageA");
        assert!(store.read_map(&key, None).await.is_empty());

        let map = ExpansionMap::default().with("a", true).with("b", false);
        store.write_map(&key, &map).await.unwrap();
        assert_eq!(
            store.storage().peek("expansion-PageA-g1").as_deref(),
            Some(r#"{"a":true,"b":false}"#)
        );
        assert_eq!(store.read_map(&key, None).await, map);

        store
            .storage()
            .set(key.as_str(), "not json".to_string())
            .await
            .unwrap();
        assert!(store.read_map(&key, None).await.is_empty());
        store
            .storage()
            .set(store.root_key("PageA").as_str(), "maybe".to_string())
            .await
            .unwrap();
        assert!(!store.read_root_flag(&store.root_key("PageA"), None).await);
    }

    #[test(tokio::test)]
    async fn test_keys_are_scoped_per_graph() {
        let graph = SwitchableGraph::new("g1");
        let store = ExpansionStateStore::new(MemoryStorage::default(), graph.clone());
        store
            .write_root_flag(&store.root_key("PageA"), true)
            .await
            .unwrap();
        graph.switch_to("g2");
        assert!(!store.read_root_flag(&store.root_key("PageA"), None).await);
        assert!(store.list_all_keys().await.unwrap().is_empty());
        graph.switch_to("g1");
        assert_eq!(store.list_all_keys().await.unwrap().len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_gc_removes_only_unread_keys_of_current_graph() {
        let store = memory_store("g1");
        for scope in ["A", "B", "C"] {
            store
                .write_map(&store.branch_key(scope), &ExpansionMap::default())
                .await
                .unwrap();
        }
        let foreign = ExpansionKey::branch("C", "g2");
        store
            .storage()
            .set(foreign.as_str(), "{}".to_string())
            .await
            .unwrap();
        store
            .storage()
            .set("unrelated", "1".to_string())
            .await
            .unwrap();

        let read = ReadKeySet::default();
        store.read_map(&store.branch_key("A"), Some(&read)).await;
        store.read_map(&store.branch_key("B"), Some(&read)).await;

        let removed = store
            .collect_garbage(&read, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(removed, vec![store.branch_key("C")]);
        assert!(store.storage().peek(foreign.as_str()).is_some());
        assert!(store.storage().peek("unrelated").is_some());
        assert_eq!(store.list_all_keys().await.unwrap().len(), 2);
    }

    #[test(tokio::test)]
    async fn test_dir_storage_encodes_keys() {
        let dir = TempDir::new().unwrap();
        let storage = DirStorage::new(dir.path().join("sandbox")).unwrap();
        let key = "expansion-Projects/2024: plan-g1";
        assert!(!storage.has(key).await.unwrap());
        assert_eq!(storage.get(key).await.unwrap(), None);
        storage.set(key, "{}".to_string()).await.unwrap();
        assert!(storage.has(key).await.unwrap());
        assert_eq!(storage.get(key).await.unwrap().as_deref(), Some("{}"));
        assert_eq!(storage.list_keys().await.unwrap(), vec![key.to_string()]);
        storage.remove(key).await.unwrap();
        storage.remove(key).await.unwrap();
        assert!(storage.list_keys().await.unwrap().is_empty());
    }
}
