//! The Telegram-backed [`DataProvider`]: routes parsed paths to the entity
//! directory, the message pipeline, the file projection and the upload
//! pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::tg::client::TelegramClient;
use crate::tg::types::{
    Chat, FileListItem, SendMode, User, MAX_FILE_SIZE_REGULAR, MAX_MESSAGE_SIZE,
};
use crate::vfs::entity::{self, EntityDirectory, user_dir_name};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::files;
use crate::vfs::formatter;
use crate::vfs::message_cache::{FormattedCacheConfig, FormattedMessageCache};
use crate::vfs::messages::MessagePipeline;
use crate::vfs::path::{
    self, EntitySection, PathCategory, PathInfo, symlink_target, FILES_DIR, INFO_FILE, MEDIA_DIR,
    MESSAGES_FILE, SELF_SYMLINK, USERS_DIR,
};
use crate::vfs::prefetch::{BackgroundPrefetcher, PrefetchConfig, Priority};
use crate::vfs::provider::{DataProvider, Entry};
use crate::vfs::uploads::{
    self, PendingUpload, UploadManager, COMPLETED_WINDOW,
};

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub formatted: FormattedCacheConfig,
    pub prefetch: PrefetchConfig,
    /// Upload spool directory.
    pub spool_dir: PathBuf,
    pub enable_prefetch: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            formatted: FormattedCacheConfig::default(),
            prefetch: PrefetchConfig::default(),
            spool_dir: std::env::temp_dir().join("tg-fuse").join("uploads"),
            enable_prefetch: true,
        }
    }
}

pub struct TelegramProvider<C: TelegramClient> {
    client: Arc<C>,
    cache: Arc<CacheStore>,
    entities: Arc<EntityDirectory>,
    pipeline: Arc<MessagePipeline<C>>,
    uploads: UploadManager,
    prefetcher: BackgroundPrefetcher<C>,
    config: ProviderConfig,
    mount_point: Mutex<String>,
    started: AtomicBool,
}

impl<C: TelegramClient> TelegramProvider<C> {
    pub fn new(client: Arc<C>, cache: Arc<CacheStore>, config: ProviderConfig) -> Arc<Self> {
        let entities = Arc::new(EntityDirectory::new(cache.clone()));
        let formatted = Arc::new(FormattedMessageCache::new(config.formatted));
        let pipeline = Arc::new(MessagePipeline::new(
            client.clone(),
            cache.clone(),
            formatted,
            entities.clone(),
        ));
        let prefetcher =
            BackgroundPrefetcher::new(pipeline.clone(), cache.clone(), config.prefetch);
        Arc::new(Self {
            client,
            cache,
            entities,
            pipeline,
            uploads: UploadManager::new(config.spool_dir.clone()),
            prefetcher,
            config,
            mount_point: Mutex::new(String::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Register the update callback, start the client, and optionally the
    /// prefetcher.
    pub async fn start(self: &Arc<Self>) -> VfsResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // The callback fires on the client's update task; hop onto the
        // runtime so the handler can use the async cache.
        let pipeline = self.pipeline.clone();
        let handle = Handle::current();
        self.client.set_message_callback(Arc::new(move |message| {
            let pipeline = pipeline.clone();
            handle.spawn(async move {
                pipeline.handle_new_message(message).await;
            });
        }));

        self.client.start().await?;
        if self.config.enable_prefetch {
            self.prefetcher.start();
        }
        info!("telegram provider started");
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.prefetcher.stop().await;
        if let Err(err) = self.client.stop().await {
            warn!(error = %err, "client stop failed");
        }
        info!("telegram provider stopped");
    }

    pub fn prefetcher(&self) -> &BackgroundPrefetcher<C> {
        &self.prefetcher
    }

    // ----- entity resolution -----

    async fn ensure_section(&self, section: EntitySection) {
        match section {
            EntitySection::User => self.entities.ensure_users_loaded(self.client.as_ref()).await,
            EntitySection::Group => {
                self.entities.ensure_groups_loaded(self.client.as_ref()).await
            }
            EntitySection::Channel => {
                self.entities
                    .ensure_channels_loaded(self.client.as_ref())
                    .await
            }
        }
    }

    async fn find_user(&self, dir_name: &str) -> Option<User> {
        self.entities.ensure_users_loaded(self.client.as_ref()).await;
        self.entities.find_user(dir_name)
    }

    async fn find_chat(&self, section: EntitySection, dir_name: &str) -> Option<Chat> {
        self.ensure_section(section).await;
        match section {
            EntitySection::User => None,
            EntitySection::Group => self.entities.find_group(dir_name),
            EntitySection::Channel => self.entities.find_channel(dir_name),
        }
    }

    /// Chat id behind a chat-scoped path. Private chats share the user's id.
    async fn resolve_chat(&self, info: &PathInfo) -> VfsResult<(i64, bool)> {
        let section = info
            .section()
            .ok_or_else(|| VfsError::not_found(info.to_path()))?;
        let name = info
            .entity_name
            .as_deref()
            .ok_or_else(|| VfsError::not_found(info.to_path()))?;
        match section {
            EntitySection::User => {
                let user = self
                    .find_user(name)
                    .await
                    .ok_or_else(|| VfsError::not_found(info.to_path()))?;
                Ok((user.id, true))
            }
            _ => {
                let chat = self
                    .find_chat(section, name)
                    .await
                    .ok_or_else(|| VfsError::not_found(info.to_path()))?;
                Ok((chat.id, chat.can_send))
            }
        }
    }

    /// Mtime for a chat's `messages` file: the stats row when present, the
    /// entity's own last-message time otherwise.
    async fn messages_mtime(&self, chat_id: i64, fallback: i64) -> i64 {
        match self.cache.get_stats(chat_id).await {
            Ok(Some(stats)) if stats.last_message_ts > 0 => stats.last_message_ts,
            _ => fallback,
        }
    }

    // ----- file projection -----

    /// Cached listing with a one-shot fetch when empty: list-files and
    /// list-media run in parallel, are merged and persisted.
    async fn ensure_file_list(&self, chat_id: i64) -> VfsResult<Vec<FileListItem>> {
        let cached = self.cache.file_list(chat_id).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }

        let (files_result, media_result) = tokio::join!(
            self.client.list_files(chat_id),
            self.client.list_media(chat_id)
        );
        let mut merged = files_result?;
        merged.extend(media_result?);
        self.cache.cache_file_items(&merged).await?;
        debug!(chat_id, count = merged.len(), "fetched file list");
        Ok(merged)
    }

    async fn read_remote_file(
        &self,
        chat_id: i64,
        entry_name: &str,
        offset: u64,
        size: u32,
        virtual_path: &str,
    ) -> VfsResult<Vec<u8>> {
        let items = self.ensure_file_list(chat_id).await?;
        let item = files::find_item(&items, entry_name)
            .ok_or_else(|| VfsError::not_found(virtual_path))?;

        let local_path = self.client.download_file(&item.file_id, None).await?;
        let data = tokio::fs::read(&local_path).await?;
        Ok(slice_bytes(&data, offset, size))
    }

    // ----- .info -----

    /// Render a user's `.info`, fetching the full profile and bio on first
    /// read and caching them back.
    async fn user_info_content(&self, dir_name: &str, user: User) -> String {
        let mut user = user;

        if user.phone_number.is_empty() && user.status == crate::tg::types::UserStatus::Unknown {
            match self.client.get_user(user.id).await {
                Ok(Some(mut full)) => {
                    full.last_message_id = user.last_message_id;
                    full.last_message_ts = user.last_message_ts;
                    user = full;
                    self.entities.update_user_details(dir_name, user.clone());
                }
                Ok(None) => {}
                Err(err) => debug!(user = user.id, error = %err, "full user fetch failed"),
            }
        }

        if user.bio.is_empty() {
            match self.client.get_user_bio(user.id).await {
                Ok(bio) if !bio.is_empty() => {
                    user.bio = bio;
                    self.entities.update_user_details(dir_name, user.clone());
                }
                Ok(_) => {}
                Err(err) => debug!(user = user.id, error = %err, "bio fetch failed"),
            }
        }

        entity::user_info(&user)
    }

    // ----- messages write policy -----

    /// Interpret a write against the `messages` file.
    ///
    /// The baseline `C` is the rendered content length; when no rendered
    /// entry exists the persisted `content_size` stands in, so a cold cache
    /// does not make every byte look new. The suffix past `C` is the
    /// candidate message; writes entirely within `C` rewrite known content
    /// and writes starting past `C` are stale, both accepted without a send.
    async fn write_messages(&self, chat_id: i64, data: &[u8], offset: u64) -> VfsResult<usize> {
        let baseline = self.pipeline.write_baseline(chat_id).await;
        let end = offset + data.len() as u64;

        let candidate: Option<&[u8]> = if baseline == 0 {
            Some(data)
        } else if offset == 0 && data.len() as u64 > baseline {
            Some(&data[baseline as usize..])
        } else if offset > baseline {
            None
        } else if end <= baseline {
            None
        } else {
            // Overlapping append: only the bytes past the baseline are new.
            Some(&data[(baseline - offset) as usize..])
        };

        let Some(candidate) = candidate else {
            return Ok(data.len());
        };

        if !formatter::is_valid_text(candidate) {
            return Err(VfsError::binary_data("messages"));
        }

        let text = String::from_utf8_lossy(candidate);
        let trimmed = text.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            return Ok(data.len());
        }

        self.send_text_chunks(chat_id, trimmed).await?;
        Ok(data.len())
    }

    async fn send_text_chunks(&self, chat_id: i64, text: &str) -> VfsResult<()> {
        for chunk in formatter::split_text(text, MAX_MESSAGE_SIZE) {
            self.client.send_text(chat_id, &chunk).await?;
        }
        Ok(())
    }

    // ----- uploads -----

    async fn begin_upload(&self, info: &PathInfo, virtual_path: &str) -> VfsResult<u64> {
        let file_name = info
            .file_name
            .as_deref()
            .ok_or_else(|| VfsError::invalid_input(virtual_path))?;

        let mode = match info.category {
            PathCategory::UserUpload | PathCategory::GroupUpload | PathCategory::ChannelUpload => {
                SendMode::Auto
            }
            PathCategory::UserFile | PathCategory::GroupFile | PathCategory::ChannelFile => {
                SendMode::Document
            }
            PathCategory::UserMedia | PathCategory::GroupMedia | PathCategory::ChannelMedia => {
                if !uploads::has_media_extension(file_name) {
                    return Err(VfsError::invalid_input(virtual_path));
                }
                SendMode::Media
            }
            _ => return Err(VfsError::permission_denied(virtual_path)),
        };

        let (chat_id, can_send) = self.resolve_chat(info).await?;
        if !can_send {
            return Err(VfsError::permission_denied(virtual_path));
        }

        let original = files::strip_timestamp_prefix(file_name);
        self.uploads
            .create(virtual_path, chat_id, mode, original)
            .await
    }

    async fn finish_upload(&self, upload: Arc<PendingUpload>) -> VfsResult<()> {
        // Best-effort sweep of expired completed records on every release.
        self.uploads.cleanup_completed(COMPLETED_WINDOW);

        upload.finish_io().await?;
        let meta = tokio::fs::metadata(&upload.temp_path).await?;
        let size = meta.len();
        if size as i64 > MAX_FILE_SIZE_REGULAR {
            let _ = tokio::fs::remove_file(&upload.temp_path).await;
            return Err(VfsError::file_too_large(upload.virtual_path.as_str()));
        }

        let mut mode = upload.mode;
        if mode == SendMode::Auto {
            if uploads::has_text_extension(&upload.original_filename) {
                let content = tokio::fs::read(&upload.temp_path).await?;
                if formatter::is_valid_text(&content) {
                    let text = String::from_utf8_lossy(&content);
                    let trimmed = text.trim_end_matches(['\n', '\r']);
                    if !trimmed.is_empty() {
                        self.send_text_chunks(upload.chat_id, trimmed).await?;
                    }
                    let _ = tokio::fs::remove_file(&upload.temp_path).await;
                    self.uploads.record_completed(
                        &upload.virtual_path,
                        &upload.original_filename,
                        size,
                    );
                    info!(path = %upload.virtual_path, "text upload sent as message");
                    return Ok(());
                }
            }
            mode = if uploads::has_media_extension(&upload.original_filename) {
                SendMode::Media
            } else {
                SendMode::Document
            };
        }

        // The remote sees the file's name, so shed the handle prefix before
        // the send. The file stays on disk: the client uploads
        // asynchronously and owns the cleanup once the send completes.
        let send_path = self
            .uploads
            .spool_dir()
            .join(&upload.original_filename);
        tokio::fs::rename(&upload.temp_path, &send_path).await?;

        self.client
            .send_file(upload.chat_id, &send_path.to_string_lossy(), mode)
            .await?;
        self.uploads
            .record_completed(&upload.virtual_path, &upload.original_filename, size);
        info!(path = %upload.virtual_path, size, ?mode, "upload submitted");
        Ok(())
    }

    // ----- entry synthesis -----

    fn users_root_target(&self, dir_name: &str) -> String {
        let mount_point = self.mount_point.lock().unwrap().clone();
        symlink_target(&mount_point, &format!("{USERS_DIR}/{dir_name}"))
    }

    fn chat_dir_entries(
        &self,
        virtual_path: &str,
        last_message_ts: i64,
        estimated_messages: u64,
    ) -> Vec<Entry> {
        let mut entries = vec![
            Entry::file(INFO_FILE, 4096).with_mtime(last_message_ts),
            Entry::file(MESSAGES_FILE, estimated_messages)
                .with_mode(0o600)
                .with_mtime(last_message_ts),
            Entry::directory(FILES_DIR).with_mtime(last_message_ts),
            Entry::directory(MEDIA_DIR).with_mtime(last_message_ts),
        ];
        for (name, size) in self.uploads.pending_under(virtual_path) {
            entries.push(Entry::file(name, size).with_mode(0o644));
        }
        for (name, size) in self.uploads.completed_under(virtual_path) {
            entries.push(Entry::file(name, size).with_mode(0o644));
        }
        entries
    }

    /// Pending/completed upload entry for a path, if any.
    fn upload_entry(&self, virtual_path: &str, name: &str) -> Option<Entry> {
        if let Some(upload) = self.uploads.by_path(virtual_path) {
            return Some(Entry::file(name, upload.bytes_written()).with_mode(0o644));
        }
        self.uploads
            .completed_by_path(virtual_path)
            .map(|done| Entry::file(name, done.size).with_mode(0o644))
    }
}

fn slice_bytes(data: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let len = data.len() as u64;
    if offset >= len {
        return Vec::new();
    }
    let end = (offset + size as u64).min(len);
    data[offset as usize..end as usize].to_vec()
}

#[async_trait]
impl<C: TelegramClient> DataProvider for TelegramProvider<C> {
    async fn list_directory(&self, path: &str) -> VfsResult<Vec<Entry>> {
        let info = PathInfo::parse(path);
        match info.category {
            PathCategory::Root => {
                self.entities.ensure_users_loaded(self.client.as_ref()).await;
                self.entities.ensure_me_loaded(self.client.as_ref()).await;

                let mut entries = vec![
                    Entry::directory(USERS_DIR),
                    Entry::directory(path::CONTACTS_DIR),
                    Entry::directory(path::GROUPS_DIR),
                    Entry::directory(path::CHANNELS_DIR),
                ];
                if let Some(me) = self.entities.me() {
                    let target = self.users_root_target(&user_dir_name(&me));
                    entries.push(Entry::symlink(SELF_SYMLINK, target));
                }
                for (name, user) in self.entities.users_snapshot() {
                    if user.is_contact && !user.username.is_empty() {
                        let target = self.users_root_target(&name);
                        entries.push(Entry::symlink(format!("@{}", user.username), target));
                    }
                }
                Ok(entries)
            }

            PathCategory::UsersDir => {
                self.entities.ensure_users_loaded(self.client.as_ref()).await;
                Ok(self
                    .entities
                    .users_snapshot()
                    .into_iter()
                    .map(|(name, user)| {
                        Entry::directory(name).with_mtime(user.last_message_ts)
                    })
                    .collect())
            }

            PathCategory::ContactsDir => {
                self.entities.ensure_users_loaded(self.client.as_ref()).await;
                Ok(self
                    .entities
                    .users_snapshot()
                    .into_iter()
                    .filter(|(_, user)| user.is_contact)
                    .map(|(name, _)| {
                        let target = self.users_root_target(&name);
                        Entry::symlink(name, target)
                    })
                    .collect())
            }

            PathCategory::GroupsDir => {
                self.entities.ensure_groups_loaded(self.client.as_ref()).await;
                Ok(self
                    .entities
                    .groups_snapshot()
                    .into_iter()
                    .map(|(name, chat)| {
                        Entry::directory(name).with_mtime(chat.last_message_ts)
                    })
                    .collect())
            }

            PathCategory::ChannelsDir => {
                self.entities
                    .ensure_channels_loaded(self.client.as_ref())
                    .await;
                Ok(self
                    .entities
                    .channels_snapshot()
                    .into_iter()
                    .map(|(name, chat)| {
                        Entry::directory(name).with_mtime(chat.last_message_ts)
                    })
                    .collect())
            }

            PathCategory::UploadsDir => Ok(self
                .uploads
                .pending_snapshot()
                .into_iter()
                .map(|(name, size)| Entry::file(name, size).with_mode(0o644))
                .collect()),

            PathCategory::UserDir | PathCategory::GroupDir | PathCategory::ChannelDir => {
                let name = info.entity_name.as_deref().unwrap_or_default().to_string();
                let (chat_id, _) = self.resolve_chat(&info).await?;
                let last_ts = match info.category {
                    PathCategory::UserDir => self
                        .entities
                        .find_user(&name)
                        .map(|u| u.last_message_ts)
                        .unwrap_or(0),
                    PathCategory::GroupDir => self
                        .entities
                        .find_group(&name)
                        .map(|c| c.last_message_ts)
                        .unwrap_or(0),
                    _ => self
                        .entities
                        .find_channel(&name)
                        .map(|c| c.last_message_ts)
                        .unwrap_or(0),
                };
                // Listing a chat is a strong signal its messages are next.
                self.prefetcher.queue_chat(chat_id, Priority::High);
                let estimated = self.pipeline.estimate_size(chat_id).await;
                let mtime = self.messages_mtime(chat_id, last_ts).await;
                Ok(self.chat_dir_entries(path, mtime, estimated))
            }

            PathCategory::UserFilesDir
            | PathCategory::GroupFilesDir
            | PathCategory::ChannelFilesDir => {
                let (chat_id, _) = self.resolve_chat(&info).await?;
                let items = self.ensure_file_list(chat_id).await?;
                let mut entries: Vec<Entry> = files::document_items(&items)
                    .into_iter()
                    .map(|item| {
                        Entry::file(files::entry_name(item), item.size.max(0) as u64)
                            .with_mtime(item.ts)
                    })
                    .collect();
                for (name, size) in self.uploads.pending_under(path) {
                    entries.push(Entry::file(name, size).with_mode(0o644));
                }
                for (name, size) in self.uploads.completed_under(path) {
                    entries.push(Entry::file(name, size).with_mode(0o644));
                }
                Ok(entries)
            }

            PathCategory::UserMediaDir
            | PathCategory::GroupMediaDir
            | PathCategory::ChannelMediaDir => {
                let (chat_id, _) = self.resolve_chat(&info).await?;
                let items = self.ensure_file_list(chat_id).await?;
                let mut entries: Vec<Entry> = files::media_items(&items)
                    .into_iter()
                    .map(|item| {
                        Entry::file(files::entry_name(item), item.size.max(0) as u64)
                            .with_mtime(item.ts)
                    })
                    .collect();
                for (name, size) in self.uploads.pending_under(path) {
                    entries.push(Entry::file(name, size).with_mode(0o644));
                }
                for (name, size) in self.uploads.completed_under(path) {
                    entries.push(Entry::file(name, size).with_mode(0o644));
                }
                Ok(entries)
            }

            PathCategory::NotFound => Err(VfsError::not_found(path)),
            _ => Err(VfsError::not_a_directory(path)),
        }
    }

    async fn get_entry(&self, path: &str) -> VfsResult<Option<Entry>> {
        let info = PathInfo::parse(path);
        match info.category {
            PathCategory::Root => Ok(Some(Entry::directory(""))),
            PathCategory::UsersDir => Ok(Some(Entry::directory(USERS_DIR))),
            PathCategory::ContactsDir => Ok(Some(Entry::directory(path::CONTACTS_DIR))),
            PathCategory::GroupsDir => Ok(Some(Entry::directory(path::GROUPS_DIR))),
            PathCategory::ChannelsDir => Ok(Some(Entry::directory(path::CHANNELS_DIR))),
            PathCategory::UploadsDir => Ok(Some(Entry::directory(path::UPLOADS_DIR))),

            PathCategory::SelfSymlink => {
                self.entities.ensure_me_loaded(self.client.as_ref()).await;
                Ok(self.entities.me().map(|me| {
                    let target = self.users_root_target(&user_dir_name(&me));
                    Entry::symlink(SELF_SYMLINK, target)
                }))
            }

            PathCategory::RootSymlink => {
                let username = info.entity_name.as_deref().unwrap_or_default();
                self.entities.ensure_users_loaded(self.client.as_ref()).await;
                Ok(self
                    .entities
                    .contact_by_username(username)
                    .map(|(dir_name, user)| {
                        let target = self.users_root_target(&dir_name);
                        Entry::symlink(format!("@{}", user.username), target)
                    }))
            }

            PathCategory::ContactSymlink => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                Ok(self.find_user(name).await.and_then(|user| {
                    user.is_contact.then(|| {
                        let target = self.users_root_target(name);
                        Entry::symlink(name, target)
                    })
                }))
            }

            PathCategory::UserDir => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                Ok(self
                    .find_user(name)
                    .await
                    .map(|user| Entry::directory(name).with_mtime(user.last_message_ts)))
            }

            PathCategory::GroupDir | PathCategory::ChannelDir => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                let section = info.section().unwrap();
                Ok(self
                    .find_chat(section, name)
                    .await
                    .map(|chat| Entry::directory(name).with_mtime(chat.last_message_ts)))
            }

            PathCategory::UserInfo => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                Ok(self
                    .find_user(name)
                    .await
                    .map(|user| Entry::file(INFO_FILE, 4096).with_mtime(user.last_message_ts)))
            }

            PathCategory::GroupInfo | PathCategory::ChannelInfo => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                let section = info.section().unwrap();
                Ok(self
                    .find_chat(section, name)
                    .await
                    .map(|chat| Entry::file(INFO_FILE, 4096).with_mtime(chat.last_message_ts)))
            }

            PathCategory::UserMessages
            | PathCategory::GroupMessages
            | PathCategory::ChannelMessages => {
                let Ok((chat_id, _)) = self.resolve_chat(&info).await else {
                    return Ok(None);
                };
                let size = self.pipeline.estimate_size(chat_id).await;
                let mtime = self.messages_mtime(chat_id, 0).await;
                Ok(Some(
                    Entry::file(MESSAGES_FILE, size)
                        .with_mode(0o600)
                        .with_mtime(mtime),
                ))
            }

            PathCategory::UserFilesDir
            | PathCategory::GroupFilesDir
            | PathCategory::ChannelFilesDir => {
                let Ok(_) = self.resolve_chat(&info).await else {
                    return Ok(None);
                };
                Ok(Some(Entry::directory(FILES_DIR)))
            }

            PathCategory::UserMediaDir
            | PathCategory::GroupMediaDir
            | PathCategory::ChannelMediaDir => {
                let Ok(_) = self.resolve_chat(&info).await else {
                    return Ok(None);
                };
                Ok(Some(Entry::directory(MEDIA_DIR)))
            }

            PathCategory::UserFile
            | PathCategory::GroupFile
            | PathCategory::ChannelFile
            | PathCategory::UserMedia
            | PathCategory::GroupMedia
            | PathCategory::ChannelMedia => {
                let entry_name = info.file_name.as_deref().unwrap_or_default();
                if let Some(entry) = self.upload_entry(path, entry_name) {
                    return Ok(Some(entry));
                }
                let Ok((chat_id, _)) = self.resolve_chat(&info).await else {
                    return Ok(None);
                };
                let items = self.ensure_file_list(chat_id).await?;
                Ok(files::find_item(&items, entry_name).map(|item| {
                    Entry::file(entry_name, item.size.max(0) as u64).with_mtime(item.ts)
                }))
            }

            PathCategory::UserUpload | PathCategory::GroupUpload | PathCategory::ChannelUpload => {
                let entry_name = info.file_name.as_deref().unwrap_or_default();
                Ok(self.upload_entry(path, entry_name))
            }

            PathCategory::NotFound => Ok(None),
        }
    }

    async fn read_file(&self, path: &str, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let info = PathInfo::parse(path);
        match info.category {
            PathCategory::UserInfo => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                let user = self
                    .find_user(name)
                    .await
                    .ok_or_else(|| VfsError::not_found(path))?;
                let content = self.user_info_content(name, user).await;
                Ok(slice_bytes(content.as_bytes(), offset, size))
            }

            PathCategory::GroupInfo => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                let chat = self
                    .find_chat(EntitySection::Group, name)
                    .await
                    .ok_or_else(|| VfsError::not_found(path))?;
                Ok(slice_bytes(entity::group_info(&chat).as_bytes(), offset, size))
            }

            PathCategory::ChannelInfo => {
                let name = info.entity_name.as_deref().unwrap_or_default();
                let chat = self
                    .find_chat(EntitySection::Channel, name)
                    .await
                    .ok_or_else(|| VfsError::not_found(path))?;
                Ok(slice_bytes(
                    entity::channel_info(&chat).as_bytes(),
                    offset,
                    size,
                ))
            }

            PathCategory::UserMessages
            | PathCategory::GroupMessages
            | PathCategory::ChannelMessages => {
                let (chat_id, _) = self.resolve_chat(&info).await?;
                self.entities.ensure_users_loaded(self.client.as_ref()).await;
                let content = self.pipeline.messages_content(chat_id).await?;
                Ok(slice_bytes(content.as_bytes(), offset, size))
            }

            PathCategory::UserFile
            | PathCategory::GroupFile
            | PathCategory::ChannelFile
            | PathCategory::UserMedia
            | PathCategory::GroupMedia
            | PathCategory::ChannelMedia => {
                // A spooled upload can be read back before release.
                if let Some(upload) = self.uploads.by_path(path) {
                    let data = tokio::fs::read(&upload.temp_path).await?;
                    return Ok(slice_bytes(&data, offset, size));
                }
                let entry_name = info.file_name.as_deref().unwrap_or_default();
                let (chat_id, _) = self.resolve_chat(&info).await?;
                self.read_remote_file(chat_id, entry_name, offset, size, path)
                    .await
            }

            PathCategory::UserUpload | PathCategory::GroupUpload | PathCategory::ChannelUpload => {
                match self.uploads.by_path(path) {
                    Some(upload) => {
                        let data = tokio::fs::read(&upload.temp_path).await?;
                        Ok(slice_bytes(&data, offset, size))
                    }
                    None => Err(VfsError::not_found(path)),
                }
            }

            category if category.is_directory() => Err(VfsError::is_a_directory(path)),
            _ => Err(VfsError::not_found(path)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8], offset: u64, fh: u64) -> VfsResult<usize> {
        if fh != 0
            && let Some(upload) = self.uploads.by_fh(fh)
        {
            return upload.write_at(offset, data).await;
        }

        let info = PathInfo::parse(path);
        if info.category.is_messages() {
            let (chat_id, can_send) = self.resolve_chat(&info).await?;
            if !can_send {
                return Err(VfsError::permission_denied(path));
            }
            return self.write_messages(chat_id, data, offset).await;
        }

        // A write without its create handle still lands in the right spool.
        if let Some(upload) = self.uploads.by_path(path) {
            return upload.write_at(offset, data).await;
        }
        Err(VfsError::permission_denied(path))
    }

    async fn create_file(&self, path: &str) -> VfsResult<u64> {
        let info = PathInfo::parse(path);
        self.begin_upload(&info, path).await
    }

    async fn release_file(&self, path: &str, fh: u64) -> VfsResult<()> {
        let _ = path;
        match self.uploads.take(fh) {
            Some(upload) => self.finish_upload(upload).await,
            None => Ok(()),
        }
    }

    async fn truncate_file(&self, path: &str, size: u64) -> VfsResult<()> {
        let info = PathInfo::parse(path);
        if info.category.is_messages() {
            // Shells truncate before appending; that must not clear history.
            return if size == 0 {
                Ok(())
            } else {
                Err(VfsError::not_permitted(path))
            };
        }
        if let Some(upload) = self.uploads.by_path(path) {
            return upload.set_len(size).await;
        }
        Err(VfsError::permission_denied(path))
    }

    async fn read_link(&self, path: &str) -> VfsResult<String> {
        let entry = self
            .get_entry(path)
            .await?
            .ok_or_else(|| VfsError::not_found(path))?;
        if !entry.is_symlink() {
            return Err(VfsError::invalid_input(path));
        }
        Ok(entry.link_target)
    }

    async fn is_writable(&self, path: &str) -> bool {
        let info = PathInfo::parse(path);
        if info.category.is_messages() {
            return match self.resolve_chat(&info).await {
                Ok((_, can_send)) => can_send,
                Err(_) => false,
            };
        }
        info.category.is_upload_target()
            || info.category.is_file_entry()
            || self.uploads.by_path(path).is_some()
    }

    fn filesystem_name(&self) -> String {
        "tgfs".to_string()
    }

    fn set_mount_point(&self, mount_point: String) {
        *self.mount_point.lock().unwrap() = mount_point;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tg::mock::MockClient;
    use crate::tg::types::{ChatKind, MediaKind, Message, UserStatus};
    use chrono::Utc;

    async fn provider(client: Arc<MockClient>) -> Arc<TelegramProvider<MockClient>> {
        let cache = Arc::new(CacheStore::open_in_memory().await.unwrap());
        let config = ProviderConfig {
            spool_dir: tempfile::tempdir().unwrap().keep().join("spool"),
            enable_prefetch: false,
            formatted: FormattedCacheConfig {
                min_messages: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        TelegramProvider::new(client, cache, config)
    }

    fn alice() -> User {
        User {
            id: 10,
            username: "alice".into(),
            first_name: "Alice".into(),
            is_contact: true,
            status: UserStatus::Recently,
            ..Default::default()
        }
    }

    fn dev_group() -> Chat {
        Chat {
            id: 20,
            kind: ChatKind::Group,
            title: "dev".into(),
            username: String::new(),
            last_message_id: 0,
            last_message_ts: 0,
            can_send: true,
        }
    }

    #[tokio::test]
    async fn root_listing_contains_sections_and_symlinks() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client).await;

        let entries = provider.list_directory("/").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"users"));
        assert!(names.contains(&"contacts"));
        assert!(names.contains(&"groups"));
        assert!(names.contains(&"channels"));
        assert!(names.contains(&"self"));
        assert!(names.contains(&"@alice"));
    }

    #[tokio::test]
    async fn symlinks_resolve_with_and_without_mount_point() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client).await;

        assert_eq!(provider.read_link("/@alice").await.unwrap(), "users/alice");
        provider.set_mount_point("/mnt/tg".into());
        assert_eq!(
            provider.read_link("/contacts/alice").await.unwrap(),
            "/mnt/tg/users/alice"
        );
        assert_eq!(provider.read_link("/self").await.unwrap(), "/mnt/tg/users/me");
    }

    #[tokio::test]
    async fn info_read_lazily_fetches_bio() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        client.set_bio(10, "mathematician");
        let provider = provider(client).await;

        let content = provider
            .read_file("/users/alice/.info", 0, 4096)
            .await
            .unwrap();
        let text = String::from_utf8(content).unwrap();
        assert!(text.contains("Username: @alice"));
        assert!(text.contains("Bio: mathematician"));
        assert!(text.contains("Last seen: recently"));
    }

    #[tokio::test]
    async fn send_text_message_via_messages_file() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client.clone()).await;

        let written = provider
            .write_file("/users/alice/messages", b"hi\n", 0, 0)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(client.sent_texts(), vec![(10, "hi".to_string())]);

        // The echoed outgoing message lands in the next render.
        let content = provider
            .read_file("/users/alice/messages", 0, 65536)
            .await
            .unwrap();
        let text = String::from_utf8(content).unwrap();
        assert!(text.contains("> **You** [just_now] hi"), "got: {text}");
    }

    #[tokio::test]
    async fn binary_write_to_messages_is_rejected() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client.clone()).await;

        let err = provider
            .write_file("/users/alice/messages", b"\x00\x01\x02\x03", 0, 0)
            .await
            .unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
        assert!(client.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn long_message_splits_at_whitespace() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client.clone()).await;

        let word = "word ";
        let text = word.repeat(1200); // 6000 bytes
        let text = text.trim_end().to_string();
        provider
            .write_file("/users/alice/messages", text.as_bytes(), 0, 0)
            .await
            .unwrap();

        let sent = client.sent_texts();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, chunk)| chunk.len() <= 4096));
        assert_eq!(
            format!("{} {}", sent[0].1, sent[1].1),
            text
        );
    }

    #[tokio::test]
    async fn rewrites_and_stale_writes_do_not_send() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client.clone()).await;

        provider
            .pipeline
            .formatted()
            .store(10, "0123456789".into(), 1, 1);

        // Entirely within the baseline: rewrite of known content.
        assert_eq!(
            provider
                .write_file("/users/alice/messages", b"01234", 0, 0)
                .await
                .unwrap(),
            5
        );
        // Starting past the baseline: stale.
        assert_eq!(
            provider
                .write_file("/users/alice/messages", b"zzz", 50, 0)
                .await
                .unwrap(),
            3
        );
        assert!(client.sent_texts().is_empty());

        // Read-then-write: only the suffix is new.
        provider
            .write_file("/users/alice/messages", b"0123456789new stuff\n", 0, 0)
            .await
            .unwrap();
        assert_eq!(client.sent_texts(), vec![(10, "new stuff".to_string())]);
    }

    #[tokio::test]
    async fn truncate_of_messages_follows_the_rules() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client).await;

        provider
            .truncate_file("/users/alice/messages", 0)
            .await
            .unwrap();
        let err = provider
            .truncate_file("/users/alice/messages", 10)
            .await
            .unwrap_err();
        assert_eq!(err.errno(), libc::EPERM);
    }

    #[tokio::test]
    async fn auto_upload_resolves_to_document() {
        let client = Arc::new(MockClient::new());
        client.add_group(dev_group());
        let provider = provider(client.clone()).await;

        let fh = provider
            .create_file("/groups/dev/report.pdf")
            .await
            .unwrap();
        let payload = vec![0x25u8; 10 * 1024]; // '%' bytes, pdf-ish
        provider
            .write_file("/groups/dev/report.pdf", &payload, 0, fh)
            .await
            .unwrap();

        // Visible with the written size between create and release.
        let entry = provider
            .get_entry("/groups/dev/report.pdf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.size, 10 * 1024);
        assert_eq!(entry.mode, 0o644);

        provider
            .release_file("/groups/dev/report.pdf", fh)
            .await
            .unwrap();

        let sent = client.sent_files();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 20);
        assert!(sent[0].1.ends_with("/report.pdf"));
        assert_eq!(sent[0].2, SendMode::Document);
        // The spool file survives for the client's async upload.
        assert!(std::fs::metadata(&sent[0].1).is_ok());

        // Still visible through the completed window.
        assert!(provider
            .get_entry("/groups/dev/report.pdf")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn text_upload_becomes_a_message() {
        let client = Arc::new(MockClient::new());
        client.add_group(dev_group());
        let provider = provider(client.clone()).await;

        let fh = provider.create_file("/groups/dev/note.txt").await.unwrap();
        provider
            .write_file("/groups/dev/note.txt", b"hello from a file\n", 0, fh)
            .await
            .unwrap();
        provider.release_file("/groups/dev/note.txt", fh).await.unwrap();

        assert_eq!(client.sent_texts(), vec![(20, "hello from a file".to_string())]);
        assert!(client.sent_files().is_empty());
    }

    #[tokio::test]
    async fn media_uploads_validate_extensions() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client).await;

        let err = provider
            .create_file("/users/alice/media/notes.txt")
            .await
            .unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);

        let fh = provider
            .create_file("/users/alice/media/pic.png")
            .await
            .unwrap();
        assert!(fh > 0);
    }

    #[tokio::test]
    async fn remote_files_list_and_read_through_download() {
        let now = Utc::now().timestamp();
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        client.add_file_item(FileListItem {
            chat_id: 10,
            message_id: 1,
            filename: "paper.pdf".into(),
            size: 4,
            ts: now,
            kind: MediaKind::Document,
            file_id: "paper-1".into(),
        });
        client.add_file_item(FileListItem {
            chat_id: 10,
            message_id: 2,
            filename: "pic.jpg".into(),
            size: 4,
            ts: now,
            kind: MediaKind::Photo,
            file_id: "pic-1".into(),
        });
        let provider = provider(client).await;

        let docs = provider.list_directory("/users/alice/files").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].name.ends_with("-paper.pdf"));
        let media = provider.list_directory("/users/alice/media").await.unwrap();
        assert_eq!(media.len(), 1);
        assert!(media[0].name.ends_with("-pic.jpg"));

        let path = format!("/users/alice/files/{}", docs[0].name);
        let data = provider.read_file(&path, 0, 4096).await.unwrap();
        assert!(String::from_utf8(data).unwrap().contains("paper-1"));

        // Unknown entries under files/ stay absent.
        assert!(provider
            .get_entry("/users/alice/files/20200101-0000-ghost.pdf")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn messages_stat_size_is_monotonic_across_sends() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        let provider = provider(client.clone()).await;

        let before = provider
            .read_file("/users/alice/messages", 0, 65536)
            .await
            .unwrap()
            .len();
        provider
            .write_file("/users/alice/messages", b"one\n", 0, 0)
            .await
            .unwrap();
        let after = provider
            .read_file("/users/alice/messages", 0, 65536)
            .await
            .unwrap()
            .len();
        assert!(after >= before);
    }

    #[tokio::test]
    async fn uploads_dir_lists_in_flight_spools() {
        let client = Arc::new(MockClient::new());
        client.add_group(dev_group());
        let provider = provider(client).await;

        let fh = provider.create_file("/groups/dev/big.bin").await.unwrap();
        let listed = provider.list_directory("/.uploads").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].name.ends_with("_big.bin"));
        provider.release_file("/groups/dev/big.bin", fh).await.unwrap();
    }

    #[tokio::test]
    async fn writability_reflects_chat_permissions() {
        let client = Arc::new(MockClient::new());
        client.add_user(alice());
        client.add_channel(Chat {
            id: 30,
            kind: ChatKind::Channel,
            title: "news".into(),
            username: "news".into(),
            last_message_id: 0,
            last_message_ts: 0,
            can_send: false,
        });
        let provider = provider(client).await;

        assert!(provider.is_writable("/users/alice/messages").await);
        assert!(!provider.is_writable("/channels/news/messages").await);
        assert!(!provider.is_writable("/users/alice/.info").await);
        assert!(provider.is_writable("/groups/whatever/upload.bin").await);
    }
}
