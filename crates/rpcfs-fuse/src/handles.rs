//! Open file and directory handles.
//!
//! The kernel gets a locally allocated handle id; the [`FileInfo`] returned
//! by the remote `open`/`opendir`/`create` (carrying the service's own
//! opaque `fh`) is kept here and handed back on every call made through that
//! handle.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::native::FileInfo;

/// Thread-safe map from kernel handle ids to remote handle info.
#[derive(Debug)]
pub struct HandleTable {
    handles: DashMap<u64, FileInfo>,
    /// Starts at 1; 0 is never handed out.
    next_id: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `info` under a fresh id and returns the id.
    pub fn insert(&self, info: FileInfo) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(info);
                return id;
            }
        }
    }

    /// Copy of the info stored under `id`.
    pub fn get(&self, id: u64) -> Option<FileInfo> {
        self.handles.get(&id).map(|r| *r)
    }

    pub fn remove(&self, id: u64) -> Option<FileInfo> {
        self.handles.remove(&id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
