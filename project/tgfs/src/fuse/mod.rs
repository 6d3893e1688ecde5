//! FUSE adapter: translates kernel requests into [`DataProvider`] calls.
//!
//! The adapter owns the inode ⇄ path table and the errno mapping; all
//! filesystem semantics live behind the provider trait.

pub mod inode;
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs,
    ReplyWrite, ReplyXAttr,
};
use fuse3::raw::{Filesystem, Request};
use fuse3::{Errno, FileType, Result as FuseResult, SetAttr, Timestamp};
use futures_util::stream::{self, BoxStream};
use tracing::debug;

use crate::fuse::inode::InodeTable;
use crate::vfs::error::VfsError;
use crate::vfs::provider::{DataProvider, Entry, EntryKind};

const TTL: Duration = Duration::from_secs(1);

pub struct TgFuse<P: DataProvider> {
    provider: Arc<P>,
    inodes: InodeTable,
}

impl<P: DataProvider> TgFuse<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            inodes: InodeTable::new(),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    fn path_of(&self, ino: u64) -> FuseResult<String> {
        self.inodes
            .path_of(ino)
            .ok_or_else(|| Errno::from(libc::ENOENT))
    }

    fn attr_for(&self, entry: &Entry, ino: u64, req: &Request) -> FileAttr {
        entry_to_attr(entry, ino, req)
    }

    async fn entry_of(&self, path: &str) -> FuseResult<Entry> {
        match self.provider.get_entry(path).await {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => Err(libc::ENOENT.into()),
            Err(err) => Err(errno(&err)),
        }
    }
}

fn errno(err: &VfsError) -> Errno {
    err.errno().into()
}

fn kind_to_fuse(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::File => FileType::RegularFile,
        EntryKind::Symlink => FileType::Symlink,
    }
}

fn entry_to_attr(entry: &Entry, ino: u64, req: &Request) -> FileAttr {
    let mtime = Timestamp::new(entry.mtime, 0);
    let size = match entry.kind {
        EntryKind::Symlink => entry.link_target.len() as u64,
        _ => entry.size,
    };
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        #[cfg(target_os = "macos")]
        crtime: mtime,
        kind: kind_to_fuse(entry.kind),
        perm: entry.mode as u16,
        nlink: if entry.is_directory() { 2 } else { 1 },
        uid: req.uid,
        gid: req.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}

#[allow(refining_impl_trait_reachable)]
impl<P: DataProvider> Filesystem for TgFuse<P> {
    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let max_write = NonZeroU32::new(1024 * 1024).unwrap();
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {}

    type DirEntryStream<'a> = BoxStream<'a, FuseResult<DirectoryEntry>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a> = BoxStream<'a, FuseResult<DirectoryEntryPlus>>
    where
        Self: 'a;

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let parent_path = self.path_of(parent)?;
        let path = InodeTable::child_path(&parent_path, &name.to_string_lossy());
        let entry = self.entry_of(&path).await?;
        let ino = self.inodes.ino_for(&path);
        Ok(ReplyEntry {
            ttl: TTL,
            attr: self.attr_for(&entry, ino, &req),
            generation: 0,
        })
    }

    async fn getattr(
        &self,
        req: Request,
        inode: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(inode)?;
        let entry = self.entry_of(&path).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: self.attr_for(&entry, inode, &req),
        })
    }

    async fn setattr(
        &self,
        req: Request,
        inode: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(inode)?;
        if let Some(size) = set_attr.size {
            self.provider
                .truncate_file(&path, size)
                .await
                .map_err(|err| errno(&err))?;
        }
        // Other attribute changes (mode, owner, times) are accepted and
        // discarded: the remote objects have no such bits.
        let entry = self.entry_of(&path).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: self.attr_for(&entry, inode, &req),
        })
    }

    async fn readlink(&self, _req: Request, inode: u64) -> FuseResult<ReplyData> {
        let path = self.path_of(inode)?;
        let target = self
            .provider
            .read_link(&path)
            .await
            .map_err(|err| errno(&err))?;
        Ok(ReplyData {
            data: Bytes::from(target.into_bytes()),
        })
    }

    async fn open(&self, _req: Request, inode: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(inode)?;
        let entry = self.entry_of(&path).await?;
        if entry.is_directory() {
            return Err(libc::EISDIR.into());
        }
        let access = flags as i32 & libc::O_ACCMODE;
        if access != libc::O_RDONLY && !self.provider.is_writable(&path).await {
            return Err(libc::EACCES.into());
        }
        // Stateless reads and messages writes use fh 0; upload handles are
        // allocated by create.
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        inode: u64,
        _fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let path = self.path_of(inode)?;
        let data = self
            .provider
            .read_file(&path, offset, size)
            .await
            .map_err(|err| errno(&err))?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        inode: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let path = self.path_of(inode)?;
        let written = self
            .provider
            .write_file(&path, data, offset, fh)
            .await
            .map_err(|err| errno(&err))?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let parent_path = self.path_of(parent)?;
        let path = InodeTable::child_path(&parent_path, &name.to_string_lossy());
        let fh = self
            .provider
            .create_file(&path)
            .await
            .map_err(|err| errno(&err))?;
        debug!(path, fh, "created upload target");
        let ino = self.inodes.ino_for(&path);
        let entry = self.entry_of(&path).await?;
        Ok(ReplyCreated {
            ttl: TTL,
            attr: self.attr_for(&entry, ino, &req),
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn release(
        &self,
        _req: Request,
        inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        self.provider
            .release_file(&path, fh)
            .await
            .map_err(|err| errno(&err))
    }

    async fn flush(&self, _req: Request, _inode: u64, _fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(())
    }

    async fn fsync(&self, _req: Request, _inode: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(())
    }

    async fn opendir(&self, _req: Request, inode: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(inode)?;
        let entry = self.entry_of(&path).await?;
        if !entry.is_directory() {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        parent: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<BoxStream<'a, FuseResult<DirectoryEntry>>>> {
        let path = self.path_of(parent)?;
        let children = self
            .provider
            .list_directory(&path)
            .await
            .map_err(|err| errno(&err))?;

        let parent_ino = self.inodes.ino_for(&InodeTable::parent_path(&path));
        let mut all = vec![
            DirectoryEntry {
                inode: parent,
                kind: FileType::Directory,
                name: OsString::from("."),
                offset: 1,
            },
            DirectoryEntry {
                inode: parent_ino,
                kind: FileType::Directory,
                name: OsString::from(".."),
                offset: 2,
            },
        ];
        for (i, child) in children.iter().enumerate() {
            let child_path = InodeTable::child_path(&path, &child.name);
            all.push(DirectoryEntry {
                inode: self.inodes.ino_for(&child_path),
                kind: kind_to_fuse(child.kind),
                name: OsString::from(child.name.clone()),
                offset: i as i64 + 3,
            });
        }

        let entries: Vec<FuseResult<DirectoryEntry>> = all
            .into_iter()
            .filter(|entry| entry.offset > offset)
            .map(Ok)
            .collect();
        let boxed: BoxStream<'a, FuseResult<DirectoryEntry>> =
            Box::pin(stream::iter(entries));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        parent: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<BoxStream<'a, FuseResult<DirectoryEntryPlus>>>> {
        let path = self.path_of(parent)?;
        let self_entry = self.entry_of(&path).await?;
        let children = self
            .provider
            .list_directory(&path)
            .await
            .map_err(|err| errno(&err))?;

        let parent_path = InodeTable::parent_path(&path);
        let parent_ino = self.inodes.ino_for(&parent_path);
        let parent_entry = self.entry_of(&parent_path).await.unwrap_or_else(|_| {
            Entry::directory("")
        });

        let mut all = vec![
            DirectoryEntryPlus {
                inode: parent,
                generation: 0,
                kind: FileType::Directory,
                name: OsString::from("."),
                offset: 1,
                attr: self.attr_for(&self_entry, parent, &req),
                entry_ttl: TTL,
                attr_ttl: TTL,
            },
            DirectoryEntryPlus {
                inode: parent_ino,
                generation: 0,
                kind: FileType::Directory,
                name: OsString::from(".."),
                offset: 2,
                attr: self.attr_for(&parent_entry, parent_ino, &req),
                entry_ttl: TTL,
                attr_ttl: TTL,
            },
        ];
        for (i, child) in children.iter().enumerate() {
            let child_path = InodeTable::child_path(&path, &child.name);
            let ino = self.inodes.ino_for(&child_path);
            all.push(DirectoryEntryPlus {
                inode: ino,
                generation: 0,
                kind: kind_to_fuse(child.kind),
                name: OsString::from(child.name.clone()),
                offset: i as i64 + 3,
                attr: self.attr_for(child, ino, &req),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }

        let entries: Vec<FuseResult<DirectoryEntryPlus>> = all
            .into_iter()
            .filter(|entry| entry.offset as u64 > offset)
            .map(Ok)
            .collect();
        let boxed: BoxStream<'a, FuseResult<DirectoryEntryPlus>> =
            Box::pin(stream::iter(entries));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(&self, _req: Request, _inode: u64, _fh: u64, _flags: u32) -> FuseResult<()> {
        Ok(())
    }

    async fn statfs(&self, _req: Request, _inode: u64) -> FuseResult<ReplyStatFs> {
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: u64::MAX,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        })
    }

    async fn access(&self, _req: Request, _inode: u64, _mask: u32) -> FuseResult<()> {
        Ok(())
    }

    // Extended attributes are accepted and discarded so that cp-like tools
    // do not fail after close.
    async fn setxattr(
        &self,
        _req: Request,
        _inode: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: u32,
        _position: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn getxattr(
        &self,
        _req: Request,
        _inode: u64,
        _name: &OsStr,
        _size: u32,
    ) -> FuseResult<ReplyXAttr> {
        Err(libc::ENODATA.into())
    }

    async fn listxattr(&self, _req: Request, _inode: u64, size: u32) -> FuseResult<ReplyXAttr> {
        if size == 0 {
            Ok(ReplyXAttr::Size(0))
        } else {
            Ok(ReplyXAttr::Data(Bytes::new()))
        }
    }

    async fn removexattr(&self, _req: Request, _inode: u64, _name: &OsStr) -> FuseResult<()> {
        Ok(())
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[u64]) {}
}

#[cfg(all(test, target_os = "linux"))]
mod mount_tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::tg::mock::MockClient;
    use crate::tg::types::User;
    use crate::vfs::telegram::{ProviderConfig, TelegramProvider};
    use std::time::Duration as StdDuration;

    // Linux mount smoke test, enabled with TGFS_FUSE_TEST=1.
    #[tokio::test]
    async fn smoke_mount_and_basic_ops() {
        if std::env::var("TGFS_FUSE_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip fuse mount test: set TGFS_FUSE_TEST=1 to enable");
            return;
        }

        let client = Arc::new(MockClient::new());
        client.add_user(User {
            id: 10,
            username: "alice".into(),
            first_name: "Alice".into(),
            is_contact: true,
            ..Default::default()
        });

        let cache = Arc::new(CacheStore::open_in_memory().await.unwrap());
        let spool = tempfile::tempdir().unwrap();
        let provider = TelegramProvider::new(
            client,
            cache,
            ProviderConfig {
                spool_dir: spool.path().to_path_buf(),
                enable_prefetch: false,
                ..Default::default()
            },
        );
        provider.start().await.unwrap();

        let mnt = tempfile::tempdir().unwrap();
        let handle = match crate::fuse::mount::mount_unprivileged(
            provider.clone(),
            mnt.path(),
            false,
        )
        .await
        {
            Ok(handle) => handle,
            Err(err) => {
                eprintln!("skip fuse test: mount failed: {err}");
                return;
            }
        };

        tokio::time::sleep(StdDuration::from_millis(500)).await;

        let listed: Vec<String> = std::fs::read_dir(mnt.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(listed.iter().any(|name| name == "users"));

        let info = std::fs::read_to_string(mnt.path().join("users/alice/.info")).unwrap();
        assert!(info.contains("@alice"));

        if let Err(err) = handle.unmount().await {
            eprintln!("unmount error: {err}");
        }
        provider.stop().await;
    }
}
