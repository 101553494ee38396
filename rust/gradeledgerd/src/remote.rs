use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::RemoteError;

pub type Document = Map<String, Value>;

/// Generic document-collection API of the remote store.
pub trait RemoteStore {
    fn fetch_all(&mut self, collection: &str) -> Result<Vec<Document>, RemoteError>;

    /// Merge write: top-level fields absent from `document` are left as they are.
    fn upsert(&mut self, collection: &str, id: &str, document: &Value) -> Result<(), RemoteError>;

    fn remove(&mut self, collection: &str, id: &str) -> Result<(), RemoteError>;
}

/// Stores each document as `<root>/<collection>/<id>.json`.
pub struct JsonDirRemote {
    root: PathBuf,
}

impl JsonDirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(file_component(collection))
    }

    fn document_path(&self, collection: &str, id: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.json", file_component(id)))
    }
}

impl RemoteStore for JsonDirRemote {
    fn fetch_all(&mut self, collection: &str) -> Result<Vec<Document>, RemoteError> {
        let dir = self.collection_dir(collection);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let fetch_err = |e: std::io::Error| RemoteError::Fetch {
            collection: collection.to_string(),
            message: e.to_string(),
        };
        let mut paths: Vec<PathBuf> = Vec::new();
        for ent in std::fs::read_dir(&dir).map_err(fetch_err)? {
            let p = ent.map_err(fetch_err)?.path();
            if p.extension().and_then(|s| s.to_str()) == Some("json") {
                paths.push(p);
            }
        }
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for p in paths {
            match read_document(&p) {
                Ok(Some(doc)) => out.push(doc),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %p.to_string_lossy(), error = %e, "skipping unreadable document")
                }
            }
        }
        Ok(out)
    }

    fn upsert(&mut self, collection: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
        let Some(incoming) = document.as_object() else {
            return Err(RemoteError::Write {
                collection: collection.to_string(),
                id: id.to_string(),
                message: "document must be a JSON object".to_string(),
            });
        };
        let dir = self.collection_dir(collection);
        std::fs::create_dir_all(&dir)?;
        let path = self.document_path(collection, id);

        let mut merged = match read_document(&path) {
            Ok(Some(existing)) => existing,
            _ => Document::new(),
        };
        for (k, v) in incoming {
            merged.insert(k.clone(), v.clone());
        }
        merged
            .entry("id".to_string())
            .or_insert_with(|| Value::String(id.to_string()));

        // Write-then-rename so a crash never leaves a half-written document.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(merged))?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, collection: &str, id: &str) -> Result<(), RemoteError> {
        match std::fs::remove_file(self.document_path(collection, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_document(path: &Path) -> Result<Option<Document>, RemoteError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(doc) => Ok(Some(doc)),
        _ => Ok(None),
    }
}

/// Percent-encodes everything outside `[A-Za-z0-9_-]` so ids map to safe file names.
fn file_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    #[derive(Default)]
    pub struct MemoryRemoteState {
        pub collections: BTreeMap<String, BTreeMap<String, Document>>,
        /// Every acknowledged write, in order.
        pub writes: Vec<(String, String)>,
        pub fail_writes: bool,
        pub fail_fetches: bool,
        /// Fail only fetches of this collection.
        pub fail_collection: Option<String>,
        /// Fail only the write with this id.
        pub fail_id: Option<String>,
    }

    #[derive(Clone, Default)]
    pub struct MemoryRemote {
        pub state: Rc<RefCell<MemoryRemoteState>>,
    }

    impl MemoryRemote {
        pub fn writes_to(&self, collection: &str) -> Vec<String> {
            self.state
                .borrow()
                .writes
                .iter()
                .filter(|(c, _)| c == collection)
                .map(|(_, id)| id.clone())
                .collect()
        }

        pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
            self.state
                .borrow()
                .collections
                .get(collection)
                .and_then(|c| c.get(id))
                .cloned()
        }

        pub fn seed(&self, collection: &str, id: &str, document: Value) {
            if let Value::Object(doc) = document {
                self.state
                    .borrow_mut()
                    .collections
                    .entry(collection.to_string())
                    .or_default()
                    .insert(id.to_string(), doc);
            }
        }
    }

    impl RemoteStore for MemoryRemote {
        fn fetch_all(&mut self, collection: &str) -> Result<Vec<Document>, RemoteError> {
            let state = self.state.borrow();
            if state.fail_fetches || state.fail_collection.as_deref() == Some(collection) {
                return Err(RemoteError::Fetch {
                    collection: collection.to_string(),
                    message: "unavailable".to_string(),
                });
            }
            Ok(state
                .collections
                .get(collection)
                .map(|c| c.values().cloned().collect())
                .unwrap_or_default())
        }

        fn upsert(&mut self, collection: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
            let mut state = self.state.borrow_mut();
            if state.fail_writes || state.fail_id.as_deref() == Some(id) {
                return Err(RemoteError::Write {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    message: "unavailable".to_string(),
                });
            }
            let doc = state
                .collections
                .entry(collection.to_string())
                .or_default()
                .entry(id.to_string())
                .or_default();
            if let Some(obj) = document.as_object() {
                for (k, v) in obj {
                    doc.insert(k.clone(), v.clone());
                }
            }
            state.writes.push((collection.to_string(), id.to_string()));
            Ok(())
        }

        fn remove(&mut self, collection: &str, id: &str) -> Result<(), RemoteError> {
            let mut state = self.state.borrow_mut();
            if state.fail_writes {
                return Err(RemoteError::Write {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    message: "unavailable".to_string(),
                });
            }
            if let Some(c) = state.collections.get_mut(collection) {
                c.remove(id);
            }
            Ok(())
        }
    }
}
