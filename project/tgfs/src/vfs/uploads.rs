//! Pending and completed upload tracking.
//!
//! A `create` allocates a handle and a spool file; writes land in the spool;
//! `release` hands the file to the RPC layer. Released uploads stay visible
//! for a short window because `cp` and friends keep issuing metadata
//! syscalls after close.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::tg::types::SendMode;
use crate::vfs::error::VfsResult;

/// How long a completed upload keeps answering metadata syscalls.
pub const COMPLETED_WINDOW: Duration = Duration::from_secs(30);

/// Extensions accepted for uploads into `media/`.
const MEDIA_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "webp", "gif", "mp4", "mov", "avi", "mkv", "webm",
];

pub fn has_media_extension(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// `.txt`/`.md` uploads into a bare chat directory become text messages.
pub fn has_text_extension(filename: &str) -> bool {
    matches!(extension_of(filename).as_deref(), Some("txt") | Some("md"))
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

pub struct PendingUpload {
    pub fh: u64,
    pub temp_path: PathBuf,
    pub original_filename: String,
    pub virtual_path: String,
    pub chat_id: i64,
    pub mode: SendMode,
    bytes_written: AtomicU64,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl PendingUpload {
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    pub async fn write_at(&self, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        let end = offset + data.len() as u64;
        self.bytes_written.fetch_max(end, Ordering::AcqRel);
        Ok(data.len())
    }

    pub async fn set_len(&self, size: u64) -> VfsResult<()> {
        let file = self.file.lock().await;
        file.set_len(size).await?;
        self.bytes_written.store(size, Ordering::Release);
        Ok(())
    }

    /// Flush and close the spool file handle before the rename + send.
    pub async fn finish_io(&self) -> VfsResult<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct CompletedUpload {
    pub filename: String,
    pub size: u64,
    pub completed_at: Instant,
}

pub struct UploadManager {
    spool_dir: PathBuf,
    next_fh: AtomicU64,
    pending: Mutex<HashMap<u64, Arc<PendingUpload>>>,
    completed: Mutex<HashMap<String, CompletedUpload>>,
}

impl UploadManager {
    pub fn new(spool_dir: PathBuf) -> Self {
        Self {
            spool_dir,
            next_fh: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    /// Open a spool file and register the pending upload. Returns the handle
    /// the kernel will use for subsequent writes.
    pub async fn create(
        &self,
        virtual_path: &str,
        chat_id: i64,
        mode: SendMode,
        original_filename: &str,
    ) -> VfsResult<u64> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;

        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let temp_path = self.spool_dir.join(format!("{fh}_{original_filename}"));
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;

        debug!(fh, path = virtual_path, spool = %temp_path.display(), "upload started");
        let upload = Arc::new(PendingUpload {
            fh,
            temp_path,
            original_filename: original_filename.to_string(),
            virtual_path: virtual_path.to_string(),
            chat_id,
            mode,
            bytes_written: AtomicU64::new(0),
            file: tokio::sync::Mutex::new(file),
        });
        self.pending.lock().unwrap().insert(fh, upload);
        Ok(fh)
    }

    pub fn by_fh(&self, fh: u64) -> Option<Arc<PendingUpload>> {
        self.pending.lock().unwrap().get(&fh).cloned()
    }

    pub fn by_path(&self, virtual_path: &str) -> Option<Arc<PendingUpload>> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .find(|upload| upload.virtual_path == virtual_path)
            .cloned()
    }

    /// Remove and return the pending upload; the caller owns its dispatch.
    pub fn take(&self, fh: u64) -> Option<Arc<PendingUpload>> {
        self.pending.lock().unwrap().remove(&fh)
    }

    /// Pending uploads whose virtual path sits directly under `dir`.
    pub fn pending_under(&self, dir: &str) -> Vec<(String, u64)> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.pending
            .lock()
            .unwrap()
            .values()
            .filter_map(|upload| {
                let rest = upload.virtual_path.strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| (rest.to_string(), upload.bytes_written()))
            })
            .collect()
    }

    /// All in-flight uploads, for the `.uploads` listing.
    pub fn pending_snapshot(&self) -> Vec<(String, u64)> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .map(|upload| {
                (
                    format!("{}_{}", upload.fh, upload.original_filename),
                    upload.bytes_written(),
                )
            })
            .collect()
    }

    pub fn record_completed(&self, virtual_path: &str, filename: &str, size: u64) {
        self.completed.lock().unwrap().insert(
            virtual_path.to_string(),
            CompletedUpload {
                filename: filename.to_string(),
                size,
                completed_at: Instant::now(),
            },
        );
    }

    pub fn completed_by_path(&self, virtual_path: &str) -> Option<CompletedUpload> {
        self.completed.lock().unwrap().get(virtual_path).cloned()
    }

    pub fn completed_under(&self, dir: &str) -> Vec<(String, u64)> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.completed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(path, upload)| {
                let rest = path.strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| (rest.to_string(), upload.size))
            })
            .collect()
    }

    /// Drop completed records older than `window`. Invoked on each release.
    pub fn cleanup_completed(&self, window: Duration) {
        self.completed
            .lock()
            .unwrap()
            .retain(|_, upload| upload.completed_at.elapsed() <= window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, UploadManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = UploadManager::new(dir.path().join("spool"));
        (dir, manager)
    }

    #[test]
    fn media_extension_allow_list() {
        assert!(has_media_extension("pic.JPG"));
        assert!(has_media_extension("clip.webm"));
        assert!(!has_media_extension("notes.txt"));
        assert!(!has_media_extension("archive"));
        assert!(has_text_extension("notes.txt"));
        assert!(has_text_extension("README.md"));
        assert!(!has_text_extension("pic.png"));
    }

    #[tokio::test]
    async fn create_write_and_track_size() {
        let (_tmp, manager) = manager();
        let fh = manager
            .create("/groups/dev/report.pdf", 7, SendMode::Auto, "report.pdf")
            .await
            .unwrap();
        assert!(fh > 0);

        let upload = manager.by_fh(fh).unwrap();
        upload.write_at(0, b"hello").await.unwrap();
        upload.write_at(5, b" world").await.unwrap();
        assert_eq!(upload.bytes_written(), 11);

        // Rewrites below the high-water mark do not shrink the size.
        upload.write_at(0, b"H").await.unwrap();
        assert_eq!(upload.bytes_written(), 11);

        let content = std::fs::read(&upload.temp_path).unwrap();
        assert_eq!(content, b"Hello world");
    }

    #[tokio::test]
    async fn pending_uploads_are_visible_by_path_and_dir() {
        let (_tmp, manager) = manager();
        manager
            .create("/groups/dev/report.pdf", 7, SendMode::Auto, "report.pdf")
            .await
            .unwrap();

        assert!(manager.by_path("/groups/dev/report.pdf").is_some());
        let listed = manager.pending_under("/groups/dev");
        assert_eq!(listed, vec![("report.pdf".to_string(), 0)]);
        assert!(manager.pending_under("/groups/other").is_empty());
        assert_eq!(manager.pending_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn take_removes_pending_and_handles_are_unique() {
        let (_tmp, manager) = manager();
        let a = manager
            .create("/users/a/x.bin", 1, SendMode::Auto, "x.bin")
            .await
            .unwrap();
        let b = manager
            .create("/users/a/y.bin", 1, SendMode::Auto, "y.bin")
            .await
            .unwrap();
        assert_ne!(a, b);

        assert!(manager.take(a).is_some());
        assert!(manager.take(a).is_none());
        assert!(manager.by_fh(b).is_some());
    }

    #[tokio::test]
    async fn truncate_resizes_spool_file() {
        let (_tmp, manager) = manager();
        let fh = manager
            .create("/users/a/x.bin", 1, SendMode::Auto, "x.bin")
            .await
            .unwrap();
        let upload = manager.by_fh(fh).unwrap();
        upload.write_at(0, b"0123456789").await.unwrap();
        upload.set_len(4).await.unwrap();
        assert_eq!(upload.bytes_written(), 4);
        assert_eq!(std::fs::metadata(&upload.temp_path).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn completed_window_expires() {
        let (_tmp, manager) = manager();
        manager.record_completed("/groups/dev/report.pdf", "report.pdf", 10);
        assert!(manager.completed_by_path("/groups/dev/report.pdf").is_some());
        assert_eq!(manager.completed_under("/groups/dev").len(), 1);

        manager.cleanup_completed(Duration::from_secs(60));
        assert!(manager.completed_by_path("/groups/dev/report.pdf").is_some());

        manager.cleanup_completed(Duration::ZERO);
        assert!(manager.completed_by_path("/groups/dev/report.pdf").is_none());
    }
}
