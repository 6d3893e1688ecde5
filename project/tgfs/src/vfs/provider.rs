//! The seam between the FUSE adapter and the data source.
//!
//! The adapter is generic over [`DataProvider`]; production plugs in the
//! Telegram-backed implementation, tests drive the same adapter with a
//! mock-backed one.

use async_trait::async_trait;
use chrono::Utc;

use crate::vfs::error::VfsResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// A synthesised directory entry or stat target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub link_target: String,
}

impl Entry {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
            mode: 0o700,
            mtime: Utc::now().timestamp(),
            link_target: String::new(),
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            mode: 0o400,
            mtime: Utc::now().timestamp(),
            link_target: String::new(),
        }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            name: name.into(),
            kind: EntryKind::Symlink,
            size: target.len() as u64,
            mode: 0o755,
            mtime: Utc::now().timestamp(),
            link_target: target,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Stamp the entry with an entity's last-activity time when one is known.
    pub fn with_mtime(mut self, mtime: i64) -> Self {
        if mtime > 0 {
            self.mtime = mtime;
        }
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

/// Contract between the filesystem surface and a data source.
///
/// Paths are absolute within the mount. All operations may suspend on RPC
/// or disk I/O; none may panic across the boundary.
#[async_trait]
pub trait DataProvider: Send + Sync + 'static {
    /// Entries of a directory, not including `.`/`..`.
    async fn list_directory(&self, path: &str) -> VfsResult<Vec<Entry>>;

    /// Entry metadata for a path, `None` when it does not exist.
    async fn get_entry(&self, path: &str) -> VfsResult<Option<Entry>>;

    /// Read a byte range of a file.
    async fn read_file(&self, path: &str, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Write to a file. `fh` is nonzero for handles returned by
    /// [`create_file`](Self::create_file). Returns the bytes accepted.
    async fn write_file(&self, path: &str, data: &[u8], offset: u64, fh: u64) -> VfsResult<usize>;

    /// Begin an upload; returns the file handle to hand back to the kernel.
    async fn create_file(&self, path: &str) -> VfsResult<u64>;

    /// Close a file. Dispatches the upload when `fh` names a pending one.
    async fn release_file(&self, path: &str, fh: u64) -> VfsResult<()>;

    /// Resize a file. `messages` only accepts truncation to zero.
    async fn truncate_file(&self, path: &str, size: u64) -> VfsResult<()>;

    /// Target of a symlink.
    async fn read_link(&self, path: &str) -> VfsResult<String>;

    /// Whether writes to this path can be accepted at all.
    async fn is_writable(&self, path: &str) -> bool;

    fn filesystem_name(&self) -> String;

    /// Mount point used to absolutise symlink targets.
    fn set_mount_point(&self, mount_point: String);
}
