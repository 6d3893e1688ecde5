//! Inode number allocation for the kernel adapter.
//!
//! The provider works on paths; the kernel works on inodes. This table
//! hands out stable inode numbers per path for the lifetime of the mount.
//! Virtual entries are few (entities, not messages), so nothing is evicted.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

pub const ROOT_INODE: u64 = 1;

pub struct InodeTable {
    by_ino: DashMap<u64, String>,
    by_path: DashMap<String, u64>,
    next: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            by_ino: DashMap::new(),
            by_path: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        };
        table.by_ino.insert(ROOT_INODE, "/".to_string());
        table.by_path.insert("/".to_string(), ROOT_INODE);
        table
    }

    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).map(|entry| entry.clone())
    }

    /// Inode for a path, allocating one on first sight.
    pub fn ino_for(&self, path: &str) -> u64 {
        if let Some(existing) = self.by_path.get(path) {
            return *existing;
        }
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        // A racing allocation for the same path may already have won.
        match self.by_path.entry(path.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(slot) => *slot.get(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ino);
                self.by_ino.insert(ino, path.to_string());
                ino
            }
        }
    }

    /// Compose a child path under a parent directory path.
    pub fn child_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    /// Parent directory path, `/` for top-level entries.
    pub fn parent_path(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(pos) => path[..pos].to_string(),
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
