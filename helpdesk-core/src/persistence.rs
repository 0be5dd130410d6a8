//! Durable storage capability
//!
//! The desk writes every message's changes as one batch of JSON documents
//! grouped by namespace. A batch is applied in full or rejected; callers
//! only update in-memory state after the batch succeeds.

use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Document namespaces used by the desk
pub mod ns {
    pub const SESSIONS: &str = "sessions";
    pub const TURNS: &str = "turns";
    pub const FACTS: &str = "facts";
    pub const ESCALATION: &str = "escalation";
    pub const TICKETS: &str = "tickets";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    Put {
        namespace: String,
        key: String,
        value: Value,
    },
    Delete {
        namespace: String,
        key: String,
    },
}

impl WriteOp {
    pub fn put<T: Serialize>(namespace: &str, key: &str, value: &T) -> Result<Self, PersistenceError> {
        Ok(Self::Put {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn delete(namespace: &str, key: &str) -> Self {
        Self::Delete {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Put { namespace, .. } | Self::Delete { namespace, .. } => namespace,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Key-value document store with atomic batch writes
pub trait Persistence: Send + Sync {
    /// Apply all ops or none
    fn write_batch(&self, ops: &[WriteOp]) -> Result<(), PersistenceError>;

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, PersistenceError>;

    /// Every (key, document) in a namespace, sorted by key
    fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, PersistenceError>;
}

/// Volatile in-process store
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    docs: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents across namespaces
    pub fn len(&self) -> usize {
        self.docs
            .lock()
            .map(|docs| docs.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Persistence for MemoryPersistence {
    fn write_batch(&self, ops: &[WriteOp]) -> Result<(), PersistenceError> {
        let mut docs = self.docs.lock().map_err(|_| PersistenceError::LockPoisoned)?;
        for op in ops {
            match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    docs.entry(namespace.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                WriteOp::Delete { namespace, key } => {
                    if let Some(ns) = docs.get_mut(namespace) {
                        ns.remove(key);
                    }
                }
            }
        }
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        let docs = self.docs.lock().map_err(|_| PersistenceError::LockPoisoned)?;
        Ok(docs.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, PersistenceError> {
        let docs = self.docs.lock().map_err(|_| PersistenceError::LockPoisoned)?;
        Ok(docs
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

/// One pretty-printed JSON file per document: `<root>/<namespace>/<key>.json`.
///
/// A batch first writes every document to a temp file; only when all of them
/// are written are they renamed into place. A failed staging step removes
/// the temp files and leaves existing documents untouched.
#[derive(Debug)]
pub struct JsonDirPersistence {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDirPersistence {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(encode_key(namespace))
            .join(format!("{}.json", encode_key(key)))
    }

    fn stage(&self, ops: &[WriteOp]) -> Result<Vec<(PathBuf, PathBuf)>, PersistenceError> {
        let mut staged = Vec::new();
        for op in ops {
            let WriteOp::Put {
                namespace,
                key,
                value,
            } = op
            else {
                continue;
            };
            let target = self.doc_path(namespace, key);
            let tmp = target.with_extension("json.tmp");
            let result = (|| -> Result<(), PersistenceError> {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
                Ok(())
            })();
            if let Err(e) = result {
                for (tmp, _) in &staged {
                    let _ = fs::remove_file(tmp);
                }
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
            staged.push((tmp, target));
        }
        Ok(staged)
    }
}

impl Persistence for JsonDirPersistence {
    fn write_batch(&self, ops: &[WriteOp]) -> Result<(), PersistenceError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned)?;

        let staged = self.stage(ops)?;
        for (tmp, target) in &staged {
            fs::rename(tmp, target)?;
        }
        for op in ops {
            if let WriteOp::Delete { namespace, key } = op {
                match fs::remove_file(self.doc_path(namespace, key)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        debug!(ops = ops.len(), root = %self.root.display(), "Batch written");
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        match fs::read(self.doc_path(namespace, key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>, PersistenceError> {
        let dir = self.root.join(encode_key(namespace));
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(stem) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            let Some(key) = decode_key(stem) else {
                continue;
            };
            let value = serde_json::from_slice(&fs::read(&path)?)?;
            out.push((key, value));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-.]`
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch() -> Vec<WriteOp> {
        vec![
            WriteOp::put(ns::FACTS, "user:u1", &json!({"name": "Shuvo"})).unwrap(),
            WriteOp::put(ns::SESSIONS, "s/1", &json!({"mode": "AI_ACTIVE"})).unwrap(),
        ]
    }

    #[test]
    fn test_key_encoding_round_trip() {
        for key in ["user:u1", "s/1", "plain-key_1.2", "ümlaut key"] {
            let encoded = encode_key(key);
            assert!(!encoded.contains('/'));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
        assert_eq!(decode_key("bad%Z"), None);
    }

    #[test]
    fn test_memory_batch_put_and_delete() {
        let store = MemoryPersistence::new();
        store.write_batch(&batch()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get(ns::FACTS, "user:u1").unwrap(),
            Some(json!({"name": "Shuvo"}))
        );

        store
            .write_batch(&[WriteOp::delete(ns::FACTS, "user:u1")])
            .unwrap();
        assert_eq!(store.get(ns::FACTS, "user:u1").unwrap(), None);
        assert!(store.list(ns::FACTS).unwrap().is_empty());
    }

    #[test]
    fn test_json_dir_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonDirPersistence::open(dir.path()).unwrap();
            store.write_batch(&batch()).unwrap();
        }

        let store = JsonDirPersistence::open(dir.path()).unwrap();
        let sessions = store.list(ns::SESSIONS).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].0, "s/1");
        assert_eq!(
            store.get(ns::FACTS, "user:u1").unwrap(),
            Some(json!({"name": "Shuvo"}))
        );
        assert!(store.list("missing").unwrap().is_empty());
    }

    #[test]
    fn test_json_dir_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirPersistence::open(dir.path()).unwrap();
        store
            .write_batch(&[WriteOp::delete(ns::TURNS, "never-written")])
            .unwrap();
    }

    #[test]
    fn test_json_dir_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirPersistence::open(dir.path()).unwrap();
        store.write_batch(&batch()).unwrap();

        let facts_dir = dir.path().join("facts");
        let names: Vec<String> = fs::read_dir(facts_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["user%3Au1.json"]);
    }
}
