//! Node store: per-node record files for owned items and held replicas
//!
//! Each record file holds one item per line as `key,value,version`, sorted by
//! key. A file is always rewritten whole and swapped in with a rename, so a
//! reader never observes a partial record.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Result, RingError};
use crate::ring::{Item, Key, NodeId};

/// Which of a node's maps a record file mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Owned,
    Replica,
}

/// Persistence boundary used by a ring node
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Replace the stored records of `kind` with `items`
    async fn persist_all(&self, node_id: NodeId, kind: RecordKind, items: &[Item]) -> Result<()>;

    async fn read_one(&self, node_id: NodeId, kind: RecordKind, key: Key) -> Result<Option<Item>>;

    async fn load_all(&self, node_id: NodeId, kind: RecordKind) -> Result<Vec<Item>>;

    /// Remove every record file of the node
    async fn delete_store(&self, node_id: NodeId) -> Result<()>;
}

/// Encode one item as a record line
pub fn encode_record(item: &Item) -> Result<String> {
    if item.value.contains(',') || item.value.contains('\n') {
        return Err(RingError::Store(format!(
            "value for key {} contains a comma or newline",
            item.key
        )));
    }
    Ok(format!("{},{},{}", item.key, item.value, item.version))
}

/// Decode one record line
pub fn decode_record(line: &str) -> Result<Item> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 3 {
        return Err(RingError::Store(format!("malformed record: {line}")));
    }
    let key = fields[0]
        .parse::<Key>()
        .map_err(|e| RingError::Store(format!("bad key in record {line}: {e}")))?;
    let version = fields[2]
        .parse::<u64>()
        .map_err(|e| RingError::Store(format!("bad version in record {line}: {e}")))?;
    Ok(Item::with_version(key, fields[1].to_string(), version))
}

/// Record files under a data directory
#[derive(Debug)]
pub struct FileNodeStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileNodeStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, node_id: NodeId, kind: RecordKind) -> PathBuf {
        let name = match kind {
            RecordKind::Owned => format!("node-{node_id}.db"),
            RecordKind::Replica => format!("node-{node_id}.replicas.db"),
        };
        self.data_dir.join(name)
    }

    async fn read_file(&self, node_id: NodeId, kind: RecordKind) -> Result<Vec<Item>> {
        let path = self.path_for(node_id, kind);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RingError::Store(format!("{}: {e}", path.display()))),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(decode_record)
            .collect()
    }
}

#[async_trait]
impl NodeStore for FileNodeStore {
    async fn persist_all(&self, node_id: NodeId, kind: RecordKind, items: &[Item]) -> Result<()> {
        let mut sorted: Vec<&Item> = items.iter().collect();
        sorted.sort_by_key(|item| item.key);

        let mut content = String::new();
        for item in sorted {
            content.push_str(&encode_record(item)?);
            content.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        let store_err = |e: std::io::Error| RingError::Store(e.to_string());

        fs::create_dir_all(&self.data_dir).await.map_err(store_err)?;
        let path = self.path_for(node_id, kind);
        let tmp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&tmp_path).await.map_err(store_err)?;
        file.write_all(content.as_bytes()).await.map_err(store_err)?;
        file.sync_all().await.map_err(store_err)?;
        drop(file);
        fs::rename(&tmp_path, &path).await.map_err(store_err)?;

        tracing::debug!(node_id = node_id, ?kind, records = items.len(), "Persisted record file");
        Ok(())
    }

    async fn read_one(&self, node_id: NodeId, kind: RecordKind, key: Key) -> Result<Option<Item>> {
        let items = self.read_file(node_id, kind).await?;
        Ok(items.into_iter().find(|item| item.key == key))
    }

    async fn load_all(&self, node_id: NodeId, kind: RecordKind) -> Result<Vec<Item>> {
        self.read_file(node_id, kind).await
    }

    async fn delete_store(&self, node_id: NodeId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for kind in [RecordKind::Owned, RecordKind::Replica] {
            match fs::remove_file(self.path_for(node_id, kind)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RingError::Store(e.to_string())),
            }
        }
        tracing::debug!(node_id = node_id, "Deleted node store");
        Ok(())
    }
}

/// In-memory store; records are still validated like file records
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    records: RwLock<HashMap<(NodeId, RecordKind), BTreeMap<Key, Item>>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self, node_id: NodeId, kind: RecordKind) -> usize {
        let records = self.records.read().await;
        records.get(&(node_id, kind)).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn persist_all(&self, node_id: NodeId, kind: RecordKind, items: &[Item]) -> Result<()> {
        let mut table = BTreeMap::new();
        for item in items {
            encode_record(item)?;
            table.insert(item.key, item.clone());
        }
        let mut records = self.records.write().await;
        records.insert((node_id, kind), table);
        Ok(())
    }

    async fn read_one(&self, node_id: NodeId, kind: RecordKind, key: Key) -> Result<Option<Item>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(node_id, kind))
            .and_then(|table| table.get(&key).cloned()))
    }

    async fn load_all(&self, node_id: NodeId, kind: RecordKind) -> Result<Vec<Item>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(node_id, kind))
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_store(&self, node_id: NodeId) -> Result<()> {
        let mut records = self.records.write().await;
        records.retain(|(id, _), _| *id != node_id);
        Ok(())
    }
}
