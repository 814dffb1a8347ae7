//! Inode management for the FUSE filesystem.
//!
//! The kernel addresses files by inode number while [`FileOperations`]
//! addresses them by absolute path. [`InodeTable`] keeps both directions of
//! that mapping, plus the kernel's lookup count for each inode so entries can
//! be evicted on `forget`.
//!
//! [`FileOperations`]: crate::FileOperations

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Absolute path below the mount point, `/` for the root.
    pub path: String,
    /// Lookup count for proper `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: String) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(0),
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Acquire)
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count and returns the new value, or `None` if
    /// the count would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            // Kernel forgot more than it looked up; restore and report.
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }
}

/// Thread-safe bidirectional inode ⇄ path map.
#[derive(Debug)]
pub struct InodeTable {
    paths: DashMap<String, u64>,
    inodes: DashMap<u64, InodeEntry>,
    next_ino: AtomicU64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Creates a table containing only the root directory.
    pub fn new() -> Self {
        let table = Self {
            paths: DashMap::new(),
            inodes: DashMap::new(),
            next_ino: AtomicU64::new(ROOT_INODE + 1),
        };
        table.paths.insert("/".to_string(), ROOT_INODE);
        table.inodes.insert(ROOT_INODE, InodeEntry::new("/".to_string()));
        table
    }

    /// Path of `ino`, if known.
    pub fn path(&self, ino: u64) -> Option<String> {
        self.inodes.get(&ino).map(|e| e.path.clone())
    }

    /// Inode currently mapped to `path`, if any.
    pub fn ino(&self, path: &str) -> Option<u64> {
        self.paths.get(path).map(|v| *v)
    }

    /// Returns the inode for `path`, allocating one if needed, and counts a
    /// kernel lookup against it.
    pub fn lookup(&self, path: &str) -> u64 {
        // The path slot stays locked until the count is in, so a concurrent
        // forget cannot evict the inode between the two steps.
        let slot = self
            .paths
            .entry(path.to_string())
            .or_insert_with(|| self.next_ino.fetch_add(1, Ordering::Relaxed));
        let ino = *slot;
        self.inodes
            .entry(ino)
            .or_insert_with(|| InodeEntry::new(path.to_string()))
            .inc_nlookup();
        ino
    }

    /// Drops `count` kernel references to `ino`, evicting it at zero. The
    /// root is never evicted.
    ///
    /// Locks the path map before the inode map, in the same order as
    /// [`lookup`](Self::lookup).
    pub fn forget(&self, ino: u64, count: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let remaining = self.inodes.get(&ino).map(|e| (e.dec_nlookup(count), e.path.clone()));
        let Some((Some(remaining), path)) = remaining else {
            tracing::warn!(ino, count, "forget on unknown inode or lookup count underflow");
            return;
        };
        if remaining > 0 {
            return;
        }

        if let Entry::Occupied(slot) = self.paths.entry(path)
            && *slot.get() == ino
        {
            if self.inodes.remove_if(&ino, |_, e| e.nlookup() == 0).is_some() {
                slot.remove();
            }
            return;
        }
        // Unlinked or renamed away; nothing maps to it by path.
        if let Some((_, entry)) = self.inodes.remove_if(&ino, |_, e| e.nlookup() == 0) {
            self.paths.remove_if(&entry.path, |_, v| *v == ino);
        }
    }

    /// Forgets the path mapping of a removed file. An inode the kernel still
    /// references lives on until it is forgotten; one it never looked up is
    /// dropped now.
    pub fn invalidate_path(&self, path: &str) {
        if let Some((_, ino)) = self.paths.remove(path)
            && ino != ROOT_INODE
        {
            self.inodes.remove_if(&ino, |_, e| e.nlookup() == 0);
        }
    }

    /// Moves `from` and everything below it to `to`. Any inode previously at
    /// `to` loses its path mapping.
    pub fn rename(&self, from: &str, to: &str) {
        self.invalidate_path(to);

        let prefix = format!("{}/", from.trim_end_matches('/'));
        let moved: Vec<(String, u64)> = self
            .paths
            .iter()
            .filter(|e| e.key() == from || e.key().starts_with(&prefix))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        for (old, ino) in moved {
            let new = format!("{to}{}", &old[from.len()..]);
            self.paths.remove_if(&old, |_, v| *v == ino);
            self.paths.insert(new.clone(), ino);
            if let Some(mut entry) = self.inodes.get_mut(&ino) {
                entry.path = new;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}

/// Joins a directory path and an entry name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent directory of an absolute path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_root_present() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INODE).as_deref(), Some("/"));
        assert_eq!(table.ino("/"), Some(ROOT_INODE));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lookup_is_stable() {
        let table = InodeTable::new();
        let a = table.lookup("/a");
        assert_ne!(a, ROOT_INODE);
        assert_eq!(table.lookup("/a"), a);
        assert_ne!(table.lookup("/b"), a);
        assert_eq!(table.path(a).as_deref(), Some("/a"));
    }

    #[test]
    fn test_forget_evicts_at_zero() {
        let table = InodeTable::new();
        let ino = table.lookup("/f");
        table.lookup("/f");

        table.forget(ino, 1);
        assert_eq!(table.path(ino).as_deref(), Some("/f"));

        table.forget(ino, 1);
        assert!(table.path(ino).is_none());
        assert!(table.ino("/f").is_none());
    }

    #[test]
    fn test_forget_underflow_keeps_entry() {
        let table = InodeTable::new();
        let ino = table.lookup("/f");
        table.forget(ino, 5);
        assert_eq!(table.path(ino).as_deref(), Some("/f"));
    }

    #[test]
    fn test_root_never_forgotten() {
        let table = InodeTable::new();
        table.forget(ROOT_INODE, 100);
        assert_eq!(table.path(ROOT_INODE).as_deref(), Some("/"));
    }

    #[test]
    fn test_forget_after_unlink_drops_entry() {
        let table = InodeTable::new();
        let ino = table.lookup("/gone");
        table.invalidate_path("/gone");
        assert_eq!(table.path(ino).as_deref(), Some("/gone"));
        table.forget(ino, 1);
        assert!(table.path(ino).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_forget_keeps_path_reused_by_new_inode() {
        let table = InodeTable::new();
        let old = table.lookup("/f");
        table.invalidate_path("/f");
        let new = table.lookup("/f");
        table.forget(old, 1);
        assert_eq!(table.ino("/f"), Some(new));
        assert_eq!(table.path(new).as_deref(), Some("/f"));
    }

    #[test]
    fn test_rename_moves_descendants() {
        let table = InodeTable::new();
        let dir = table.lookup("/docs");
        let file = table.lookup("/docs/a.txt");
        let sibling = table.lookup("/docs2");

        table.rename("/docs", "/archive");

        assert_eq!(table.path(dir).as_deref(), Some("/archive"));
        assert_eq!(table.path(file).as_deref(), Some("/archive/a.txt"));
        assert_eq!(table.ino("/archive/a.txt"), Some(file));
        assert!(table.ino("/docs").is_none());
        assert_eq!(table.path(sibling).as_deref(), Some("/docs2"));
    }

    #[test]
    fn test_rename_over_existing() {
        let table = InodeTable::new();
        let src = table.lookup("/a");
        let dst = table.lookup("/b");
        table.rename("/a", "/b");
        assert_eq!(table.ino("/b"), Some(src));
        // Replaced inode stays addressable by number until forgotten.
        assert!(table.path(dst).is_some());
    }

    #[test]
    fn test_invalidate_path() {
        let table = InodeTable::new();
        let ino = table.lookup("/gone");
        table.invalidate_path("/gone");
        assert!(table.ino("/gone").is_none());
        assert_ne!(table.lookup("/gone"), ino);
    }

    #[test]
    fn test_concurrent_lookup_same_path() {
        let table = Arc::new(InodeTable::new());
        let inos: Vec<u64> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.lookup("/shared"))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(inos.iter().all(|&i| i == inos[0]));
        assert_eq!(table.inodes.get(&inos[0]).unwrap().nlookup(), 8);
    }

    #[test]
    fn test_lookup_racing_forget_never_returns_evicted_inode() {
        let table = Arc::new(InodeTable::new());

        // The session thread forgets each reference as soon as a worker
        // hands it out; every inode a worker returns must still resolve.
        let (tx, rx) = crossbeam_channel::unbounded::<u64>();
        let forgetter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for ino in rx {
                    table.forget(ino, 1);
                }
            })
        };
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                let tx = tx.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let ino = table.lookup("/hot");
                        assert_eq!(table.path(ino).as_deref(), Some("/hot"));
                        tx.send(ino).unwrap();
                    }
                })
            })
            .collect();
        drop(tx);
        for worker in workers {
            worker.join().unwrap();
        }
        forgetter.join().unwrap();

        assert!(table.ino("/hot").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
        assert_eq!(parent_path("/a/b"), "/a");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(parent_path("/"), "/");
    }
}
