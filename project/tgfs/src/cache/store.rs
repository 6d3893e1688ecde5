//! SQLite-backed durable cache for users, chats, messages, shared files and
//! per-chat message statistics.
//!
//! The store survives process restarts; everything in it can be re-derived
//! from Telegram, so schema migrations are handled by dropping the file.
//! Writes go through SeaORM upserts keyed on the natural ids, which makes
//! late-arriving duplicates from the update callback idempotent.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::{Index, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Schema,
};
use tracing::{debug, info};

use crate::cache::entities::{ChatStats, Chats, Files, Messages, Users};
use crate::cache::entities::{chat_stats, chats, files, messages, users};
use crate::tg::types::{Chat, ChatKind, ChatMessageStats, FileListItem, Message, User};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

pub struct CacheStore {
    db: DatabaseConnection,
}

impl CacheStore {
    /// Open (or create) the cache database at `path`.
    pub async fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        info!(path = %path.display(), "opening cache database");
        Self::connect(&url).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> CacheResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(url: &str) -> CacheResult<Self> {
        // A single connection keeps SQLite in the single-writer regime the
        // schema expects; readers are serialised by the pool.
        let mut opts = ConnectOptions::new(url.to_string());
        opts.max_connections(1);
        let db = Database::connect(opts).await?;

        db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        db.execute_unprepared("PRAGMA synchronous=NORMAL;").await?;
        db.execute_unprepared("PRAGMA foreign_keys=ON;").await?;

        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> CacheResult<()> {
        let builder = self.db.get_database_backend();
        let schema = Schema::new(builder);

        let stmts = [
            schema.create_table_from_entity(Users).if_not_exists().to_owned(),
            schema.create_table_from_entity(Chats).if_not_exists().to_owned(),
            schema
                .create_table_from_entity(Messages)
                .if_not_exists()
                .to_owned(),
            schema.create_table_from_entity(Files).if_not_exists().to_owned(),
            schema
                .create_table_from_entity(ChatStats)
                .if_not_exists()
                .to_owned(),
        ];
        for stmt in &stmts {
            self.db.execute(builder.build(stmt)).await?;
        }

        let indices = [
            Index::create()
                .if_not_exists()
                .name("idx_users_username")
                .table(Users)
                .col(users::Column::Username)
                .to_owned(),
            Index::create()
                .if_not_exists()
                .name("idx_chats_username")
                .table(Chats)
                .col(chats::Column::Username)
                .to_owned(),
            Index::create()
                .if_not_exists()
                .name("idx_chats_kind")
                .table(Chats)
                .col(chats::Column::Kind)
                .to_owned(),
            Index::create()
                .if_not_exists()
                .name("idx_files_chat_kind")
                .table(Files)
                .col(files::Column::ChatId)
                .col(files::Column::Kind)
                .to_owned(),
        ];
        for stmt in &indices {
            self.db.execute(builder.build(stmt)).await?;
        }

        // DESC ordering and the partial predicate are not expressible through
        // the schema builder, so these two stay as raw statements.
        self.db
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_messages_chat_ts \
                 ON messages(chat_id, ts DESC);",
            )
            .await?;
        self.db
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_messages_media \
                 ON messages(chat_id, media_kind) WHERE media_kind IS NOT NULL;",
            )
            .await?;
        self.db
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_files_chat_ts \
                 ON files(chat_id, ts DESC);",
            )
            .await?;

        debug!("cache schema initialised");
        Ok(())
    }

    // ----- users -----

    pub async fn cache_user(&self, user: &User) -> CacheResult<()> {
        let now = Utc::now().timestamp();
        Users::insert(users::active_model(user, now))
            .on_conflict(
                OnConflict::column(users::Column::Id)
                    .update_columns([
                        users::Column::Username,
                        users::Column::FirstName,
                        users::Column::LastName,
                        users::Column::PhoneNumber,
                        users::Column::Bio,
                        users::Column::IsContact,
                        users::Column::Status,
                        users::Column::LastSeen,
                        users::Column::LastMessageId,
                        users::Column::LastMessageTs,
                        users::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn cache_users(&self, users: &[User]) -> CacheResult<()> {
        for user in users {
            self.cache_user(user).await?;
        }
        Ok(())
    }

    pub async fn get_user(&self, id: i64) -> CacheResult<Option<User>> {
        Ok(Users::find_by_id(id)
            .one(&self.db)
            .await?
            .map(users::Model::into_user))
    }

    pub async fn get_user_by_username(&self, username: &str) -> CacheResult<Option<User>> {
        Ok(Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.db)
            .await?
            .map(users::Model::into_user))
    }

    pub async fn all_users(&self) -> CacheResult<Vec<User>> {
        Ok(Users::find()
            .order_by_asc(users::Column::Username)
            .all(&self.db)
            .await?
            .into_iter()
            .map(users::Model::into_user)
            .collect())
    }

    // ----- chats -----

    pub async fn cache_chat(&self, chat: &Chat) -> CacheResult<()> {
        let now = Utc::now().timestamp();
        Chats::insert(chats::active_model(chat, now))
            .on_conflict(
                OnConflict::column(chats::Column::Id)
                    .update_columns([
                        chats::Column::Kind,
                        chats::Column::Title,
                        chats::Column::Username,
                        chats::Column::LastMessageId,
                        chats::Column::LastMessageTs,
                        chats::Column::CanSend,
                        chats::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn cache_chats(&self, chats: &[Chat]) -> CacheResult<()> {
        for chat in chats {
            self.cache_chat(chat).await?;
        }
        Ok(())
    }

    pub async fn get_chat(&self, id: i64) -> CacheResult<Option<Chat>> {
        Ok(Chats::find_by_id(id)
            .one(&self.db)
            .await?
            .map(chats::Model::into_chat))
    }

    pub async fn get_chat_by_username(&self, username: &str) -> CacheResult<Option<Chat>> {
        Ok(Chats::find()
            .filter(chats::Column::Username.eq(username))
            .one(&self.db)
            .await?
            .map(chats::Model::into_chat))
    }

    pub async fn all_chats(&self) -> CacheResult<Vec<Chat>> {
        Ok(Chats::find()
            .order_by_desc(chats::Column::LastMessageTs)
            .all(&self.db)
            .await?
            .into_iter()
            .map(chats::Model::into_chat)
            .collect())
    }

    /// Chats of the given kinds, most recently active first.
    pub async fn chats_by_kinds(&self, kinds: &[ChatKind]) -> CacheResult<Vec<Chat>> {
        let kind_values: Vec<i32> = kinds.iter().map(|k| k.as_i32()).collect();
        Ok(Chats::find()
            .filter(chats::Column::Kind.is_in(kind_values))
            .order_by_desc(chats::Column::LastMessageTs)
            .all(&self.db)
            .await?
            .into_iter()
            .map(chats::Model::into_chat)
            .collect())
    }

    pub async fn update_chat_status(
        &self,
        chat_id: i64,
        last_message_id: i64,
        last_message_ts: i64,
    ) -> CacheResult<()> {
        if let Some(existing) = Chats::find_by_id(chat_id).one(&self.db).await? {
            let mut chat = existing.into_chat();
            chat.last_message_id = last_message_id;
            chat.last_message_ts = last_message_ts;
            self.cache_chat(&chat).await?;
        }
        Ok(())
    }

    // ----- messages -----

    pub async fn cache_message(&self, message: &Message) -> CacheResult<()> {
        Messages::insert(messages::active_model(message))
            .on_conflict(
                OnConflict::columns([messages::Column::ChatId, messages::Column::Id])
                    .update_columns([
                        messages::Column::SenderId,
                        messages::Column::Ts,
                        messages::Column::Text,
                        messages::Column::Outgoing,
                        messages::Column::MediaKind,
                        messages::Column::MediaFileId,
                        messages::Column::MediaFilename,
                        messages::Column::MediaMimeType,
                        messages::Column::MediaSize,
                        messages::Column::MediaLocalPath,
                        messages::Column::MediaWidth,
                        messages::Column::MediaHeight,
                        messages::Column::MediaDuration,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn cache_messages(&self, msgs: &[Message]) -> CacheResult<()> {
        for message in msgs {
            self.cache_message(message).await?;
        }
        Ok(())
    }

    pub async fn get_message(&self, chat_id: i64, id: i64) -> CacheResult<Option<Message>> {
        Ok(Messages::find_by_id((chat_id, id))
            .one(&self.db)
            .await?
            .map(messages::Model::into_message))
    }

    /// All messages for the chat no older than `max_age`, oldest first.
    pub async fn get_messages_for_display(
        &self,
        chat_id: i64,
        max_age: Duration,
    ) -> CacheResult<Vec<Message>> {
        let cutoff = Utc::now().timestamp() - max_age.as_secs() as i64;
        Ok(Messages::find()
            .filter(messages::Column::ChatId.eq(chat_id))
            .filter(messages::Column::Ts.gte(cutoff))
            .order_by_asc(messages::Column::Ts)
            .all(&self.db)
            .await?
            .into_iter()
            .map(messages::Model::into_message)
            .collect())
    }

    /// Delete this chat's messages older than `cutoff_ts`.
    pub async fn evict_old_messages(&self, chat_id: i64, cutoff_ts: i64) -> CacheResult<u64> {
        let result = Messages::delete_many()
            .filter(messages::Column::ChatId.eq(chat_id))
            .filter(messages::Column::Ts.lt(cutoff_ts))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Delete messages older than `cutoff_ts` across all chats.
    pub async fn cleanup_old_messages(&self, cutoff_ts: i64) -> CacheResult<u64> {
        let result = Messages::delete_many()
            .filter(messages::Column::Ts.lt(cutoff_ts))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    // ----- shared files -----

    pub async fn cache_file_item(&self, item: &FileListItem) -> CacheResult<()> {
        Files::insert(files::active_model(item))
            .on_conflict(
                OnConflict::columns([files::Column::ChatId, files::Column::MessageId])
                    .update_columns([
                        files::Column::Filename,
                        files::Column::Size,
                        files::Column::Ts,
                        files::Column::Kind,
                        files::Column::FileId,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn cache_file_items(&self, items: &[FileListItem]) -> CacheResult<()> {
        for item in items {
            self.cache_file_item(item).await?;
        }
        Ok(())
    }

    /// Cached file listing for a chat, most recent first.
    pub async fn file_list(&self, chat_id: i64) -> CacheResult<Vec<FileListItem>> {
        Ok(Files::find()
            .filter(files::Column::ChatId.eq(chat_id))
            .order_by_desc(files::Column::Ts)
            .all(&self.db)
            .await?
            .into_iter()
            .map(files::Model::into_item)
            .collect())
    }

    // ----- stats -----

    pub async fn get_stats(&self, chat_id: i64) -> CacheResult<Option<ChatMessageStats>> {
        Ok(ChatStats::find_by_id(chat_id)
            .one(&self.db)
            .await?
            .map(chat_stats::Model::into_stats))
    }

    pub async fn update_stats(&self, stats: &ChatMessageStats) -> CacheResult<()> {
        ChatStats::insert(chat_stats::active_model(stats))
            .on_conflict(
                OnConflict::column(chat_stats::Column::ChatId)
                    .update_columns([
                        chat_stats::Column::MessageCount,
                        chat_stats::Column::ContentSize,
                        chat_stats::Column::LastMessageTs,
                        chat_stats::Column::LastFetchTs,
                        chat_stats::Column::OldestMessageTs,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Count one incoming message against the chat's stats row, creating the
    /// row if it does not exist yet.
    pub async fn bump_stats_on_message(&self, chat_id: i64, ts: i64) -> CacheResult<()> {
        let mut stats = self
            .get_stats(chat_id)
            .await?
            .unwrap_or(ChatMessageStats {
                chat_id,
                oldest_message_ts: ts,
                ..Default::default()
            });
        stats.message_count += 1;
        stats.last_message_ts = stats.last_message_ts.max(ts);
        if stats.oldest_message_ts == 0 || ts < stats.oldest_message_ts {
            stats.oldest_message_ts = ts;
        }
        self.update_stats(&stats).await
    }

    // ----- maintenance -----

    /// Forget a chat entirely: its row, messages, files and stats.
    pub async fn invalidate_chat(&self, chat_id: i64) -> CacheResult<()> {
        Messages::delete_many()
            .filter(messages::Column::ChatId.eq(chat_id))
            .exec(&self.db)
            .await?;
        Files::delete_many()
            .filter(files::Column::ChatId.eq(chat_id))
            .exec(&self.db)
            .await?;
        ChatStats::delete_many()
            .filter(chat_stats::Column::ChatId.eq(chat_id))
            .exec(&self.db)
            .await?;
        Chats::delete_by_id(chat_id).exec(&self.db).await?;
        Ok(())
    }

    pub async fn clear_all(&self) -> CacheResult<()> {
        Messages::delete_many().exec(&self.db).await?;
        Files::delete_many().exec(&self.db).await?;
        ChatStats::delete_many().exec(&self.db).await?;
        Chats::delete_many().exec(&self.db).await?;
        Users::delete_many().exec(&self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tg::types::{MediaInfo, MediaKind, UserStatus};

    fn user(id: i64, username: &str, contact: bool, ts: i64) -> User {
        User {
            id,
            username: username.into(),
            first_name: "F".into(),
            last_name: "L".into(),
            is_contact: contact,
            status: UserStatus::Recently,
            last_message_ts: ts,
            ..Default::default()
        }
    }

    fn message(chat_id: i64, id: i64, ts: i64, text: &str) -> Message {
        Message {
            id,
            chat_id,
            sender_id: 5,
            ts,
            text: text.into(),
            media: None,
            outgoing: false,
        }
    }

    #[tokio::test]
    async fn user_round_trip_and_upsert() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let mut u = user(7, "ada", true, 100);
        store.cache_user(&u).await.unwrap();

        u.first_name = "Ada".into();
        store.cache_user(&u).await.unwrap();

        let loaded = store.get_user(7).await.unwrap().unwrap();
        assert_eq!(loaded.first_name, "Ada");
        assert!(loaded.is_contact);

        let by_name = store.get_user_by_username("ada").await.unwrap().unwrap();
        assert_eq!(by_name.id, 7);
        assert_eq!(store.all_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_identity_is_last_writer_wins() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        store.cache_message(&message(1, 10, now, "first")).await.unwrap();
        store.cache_message(&message(1, 10, now, "second")).await.unwrap();

        let rows = store
            .get_messages_for_display(1, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "second");
    }

    #[tokio::test]
    async fn display_query_filters_by_age_and_sorts_ascending() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        store.cache_message(&message(1, 1, now - 10_000, "old")).await.unwrap();
        store.cache_message(&message(1, 2, now - 50, "mid")).await.unwrap();
        store.cache_message(&message(1, 3, now - 5, "new")).await.unwrap();

        let rows = store
            .get_messages_for_display(1, Duration::from_secs(3600))
            .await
            .unwrap();
        let texts: Vec<&str> = rows.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["mid", "new"]);
    }

    #[tokio::test]
    async fn evict_targets_a_single_chat() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        store.cache_message(&message(1, 1, now - 100, "a")).await.unwrap();
        store.cache_message(&message(2, 1, now - 100, "b")).await.unwrap();

        let removed = store.evict_old_messages(1, now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_message(1, 1).await.unwrap().is_none());
        assert!(store.get_message(2, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn media_fields_survive_the_round_trip() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let now = Utc::now().timestamp();
        let mut msg = message(3, 1, now, "");
        msg.media = Some(MediaInfo {
            kind: MediaKind::Photo,
            file_id: "fid".into(),
            filename: "pic.jpg".into(),
            mime_type: "image/jpeg".into(),
            size: 1234,
            local_path: None,
            width: Some(640),
            height: Some(480),
            duration: None,
        });
        store.cache_message(&msg).await.unwrap();

        let loaded = store.get_message(3, 1).await.unwrap().unwrap();
        let media = loaded.media.unwrap();
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.width, Some(640));
        assert_eq!(media.file_id, "fid");
    }

    #[tokio::test]
    async fn chats_by_kinds_orders_by_recency() {
        let store = CacheStore::open_in_memory().await.unwrap();
        for (id, kind, ts) in [
            (1, ChatKind::Group, 100),
            (2, ChatKind::Supergroup, 300),
            (3, ChatKind::Channel, 200),
        ] {
            store
                .cache_chat(&Chat {
                    id,
                    kind,
                    title: format!("c{id}"),
                    username: String::new(),
                    last_message_id: 0,
                    last_message_ts: ts,
                    can_send: true,
                })
                .await
                .unwrap();
        }

        let groups = store
            .chats_by_kinds(&[ChatKind::Group, ChatKind::Supergroup])
            .await
            .unwrap();
        let ids: Vec<i64> = groups.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn stats_upsert_and_bump() {
        let store = CacheStore::open_in_memory().await.unwrap();
        assert!(store.get_stats(9).await.unwrap().is_none());

        store.bump_stats_on_message(9, 50).await.unwrap();
        store.bump_stats_on_message(9, 40).await.unwrap();

        let stats = store.get_stats(9).await.unwrap().unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.last_message_ts, 50);
        assert_eq!(stats.oldest_message_ts, 40);
    }

    #[tokio::test]
    async fn file_items_round_trip() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let item = FileListItem {
            chat_id: 4,
            message_id: 11,
            filename: "notes.pdf".into(),
            size: 2048,
            ts: 123,
            kind: MediaKind::Document,
            file_id: "doc-1".into(),
        };
        store.cache_file_items(std::slice::from_ref(&item)).await.unwrap();
        store.cache_file_item(&item).await.unwrap();

        let listed = store.file_list(4).await.unwrap();
        assert_eq!(listed, vec![item]);
    }

    #[tokio::test]
    async fn invalidate_chat_removes_every_trace() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let now = Utc::now().timestamp();
        store
            .cache_chat(&Chat {
                id: 6,
                kind: ChatKind::Group,
                title: "g".into(),
                username: String::new(),
                last_message_id: 0,
                last_message_ts: 0,
                can_send: true,
            })
            .await
            .unwrap();
        store.cache_message(&message(6, 1, now, "x")).await.unwrap();
        store.bump_stats_on_message(6, now).await.unwrap();

        store.invalidate_chat(6).await.unwrap();
        assert!(store.get_chat(6).await.unwrap().is_none());
        assert!(store.get_stats(6).await.unwrap().is_none());
        assert!(store.get_message(6, 1).await.unwrap().is_none());
    }
}
