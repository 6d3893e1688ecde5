//! Fetch → persist → format → cache pipeline behind the synthetic
//! `messages` file, shared by the read path, the prefetcher and the
//! update callback.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use crate::cache::CacheStore;
use crate::tg::client::TelegramClient;
use crate::tg::types::{ChatMessageStats, Message};
use crate::vfs::entity::EntityDirectory;
use crate::vfs::formatter::{self, DEFAULT_MESSAGES_SIZE};
use crate::vfs::message_cache::FormattedMessageCache;
use crate::vfs::error::VfsResult;

pub struct MessagePipeline<C: TelegramClient> {
    client: Arc<C>,
    cache: Arc<CacheStore>,
    formatted: Arc<FormattedMessageCache>,
    entities: Arc<EntityDirectory>,
}

impl<C: TelegramClient> MessagePipeline<C> {
    pub fn new(
        client: Arc<C>,
        cache: Arc<CacheStore>,
        formatted: Arc<FormattedMessageCache>,
        entities: Arc<EntityDirectory>,
    ) -> Self {
        Self {
            client,
            cache,
            formatted,
            entities,
        }
    }

    pub fn formatted(&self) -> &FormattedMessageCache {
        &self.formatted
    }

    /// Content of the `messages` file for a chat.
    pub async fn messages_content(&self, chat_id: i64) -> VfsResult<String> {
        if let Some(view) = self.formatted.get(chat_id) {
            return Ok(view.content);
        }

        let config = self.formatted.config();
        let mut rows = self
            .cache
            .get_messages_for_display(chat_id, config.max_history_age)
            .await?;
        if rows.len() < config.min_messages {
            self.fetch_and_persist(chat_id).await?;
            rows = self
                .cache
                .get_messages_for_display(chat_id, config.max_history_age)
                .await?;
        }
        self.render_and_store(chat_id, &rows).await
    }

    /// Unconditional fetch + re-render; the prefetcher's unit of work.
    pub async fn refresh_chat(&self, chat_id: i64) -> VfsResult<usize> {
        self.fetch_and_persist(chat_id).await?;
        let rows = self
            .cache
            .get_messages_for_display(chat_id, self.formatted.config().max_history_age)
            .await?;
        self.render_and_store(chat_id, &rows).await?;
        Ok(rows.len())
    }

    async fn fetch_and_persist(&self, chat_id: i64) -> VfsResult<()> {
        let config = self.formatted.config();
        let messages = self
            .client
            .get_messages_until(chat_id, config.min_messages, config.max_history_age)
            .await?;
        debug!(chat_id, count = messages.len(), "fetched chat history");
        self.cache.cache_messages(&messages).await?;

        let cutoff = Utc::now().timestamp() - config.max_history_age.as_secs() as i64;
        self.cache.evict_old_messages(chat_id, cutoff).await?;
        Ok(())
    }

    async fn render_and_store(&self, chat_id: i64, rows: &[Message]) -> VfsResult<String> {
        let content =
            formatter::render_messages(rows, |sender_id, outgoing| {
                self.entities.sender_info(sender_id, outgoing)
            });

        let newest = rows.iter().max_by_key(|m| (m.ts, m.id));
        let oldest = rows.iter().min_by_key(|m| (m.ts, m.id));
        self.cache
            .update_stats(&ChatMessageStats {
                chat_id,
                message_count: rows.len() as i64,
                content_size: content.len() as i64,
                last_message_ts: newest.map(|m| m.ts).unwrap_or(0),
                last_fetch_ts: Utc::now().timestamp(),
                oldest_message_ts: oldest.map(|m| m.ts).unwrap_or(0),
            })
            .await?;

        self.formatted.store(
            chat_id,
            content.clone(),
            rows.len(),
            newest.map(|m| m.id).unwrap_or(0),
        );
        Ok(content)
    }

    /// Size reported by `stat` for the `messages` file. An approximation;
    /// reading returns the actual rendered bytes.
    pub async fn estimate_size(&self, chat_id: i64) -> u64 {
        let cached = self.formatted.content_size(chat_id);
        if cached > 0 {
            return cached as u64;
        }
        match self.cache.get_stats(chat_id).await {
            Ok(Some(stats)) if stats.content_size > 0 => stats.content_size as u64,
            _ => DEFAULT_MESSAGES_SIZE,
        }
    }

    /// Baseline length for the `messages` write policy: the live rendered
    /// size when one exists, else the persisted content size.
    pub async fn write_baseline(&self, chat_id: i64) -> u64 {
        let cached = self.formatted.content_size(chat_id);
        if cached > 0 {
            return cached as u64;
        }
        match self.cache.get_stats(chat_id).await {
            Ok(Some(stats)) if stats.content_size > 0 => stats.content_size as u64,
            _ => 0,
        }
    }

    /// Update-thread entry point: persist the message, bump the chat's
    /// stats, and drop the rendered view so the next read re-renders.
    pub async fn handle_new_message(&self, message: Message) {
        let chat_id = message.chat_id;
        if let Err(err) = self.cache.cache_message(&message).await {
            error!(chat_id, error = %err, "failed to persist pushed message");
        } else if let Err(err) = self
            .cache
            .bump_stats_on_message(chat_id, message.ts)
            .await
        {
            error!(chat_id, error = %err, "failed to bump chat stats");
        }
        if let Err(err) = self
            .cache
            .update_chat_status(chat_id, message.id, message.ts)
            .await
        {
            error!(chat_id, error = %err, "failed to update chat status");
        }
        self.entities.update_last_message(chat_id, message.id, message.ts);
        self.formatted.invalidate(chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tg::mock::MockClient;
    use crate::tg::types::{Chat, ChatKind, User};
    use crate::vfs::message_cache::FormattedCacheConfig;
    use std::time::Duration;

    fn msg(chat_id: i64, id: i64, ts: i64, text: &str) -> Message {
        Message {
            id,
            chat_id,
            sender_id: 2,
            ts,
            text: text.into(),
            media: None,
            outgoing: false,
        }
    }

    async fn pipeline(client: Arc<MockClient>) -> MessagePipeline<MockClient> {
        let cache = Arc::new(CacheStore::open_in_memory().await.unwrap());
        let formatted = Arc::new(FormattedMessageCache::new(FormattedCacheConfig {
            min_messages: 2,
            ..Default::default()
        }));
        let entities = Arc::new(EntityDirectory::new(cache.clone()));
        MessagePipeline::new(client, cache, formatted, entities)
    }

    fn group(id: i64) -> Chat {
        Chat {
            id,
            kind: ChatKind::Group,
            title: format!("g{id}"),
            username: String::new(),
            last_message_id: 0,
            last_message_ts: 0,
            can_send: true,
        }
    }

    #[tokio::test]
    async fn empty_chat_renders_empty_and_writes_stats() {
        let client = Arc::new(MockClient::new());
        client.add_group(group(10));
        let pipeline = pipeline(client.clone()).await;

        let content = pipeline.messages_content(10).await.unwrap();
        assert_eq!(content, "");

        let stats = pipeline.cache.get_stats(10).await.unwrap().unwrap();
        assert_eq!(stats.message_count, 0);
        assert!(stats.last_fetch_ts > 0);

        // Second read is served from the formatted cache.
        assert_eq!(pipeline.messages_content(10).await.unwrap(), "");
        assert!(pipeline.formatted.stats().hit_count >= 1);
    }

    #[tokio::test]
    async fn fetch_persists_into_the_durable_cache() {
        let now = Utc::now().timestamp();
        let client = Arc::new(MockClient::new());
        client.add_group(group(10));
        client.add_messages(10, vec![msg(10, 1, now - 30, "one"), msg(10, 2, now - 20, "two")]);
        let pipeline = pipeline(client.clone()).await;

        let content = pipeline.messages_content(10).await.unwrap();
        assert!(content.contains("one"));
        assert!(content.contains("two"));
        assert!(content.ends_with('\n'));

        let rows = pipeline
            .cache
            .get_messages_for_display(10, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn enough_local_history_skips_the_network() {
        let now = Utc::now().timestamp();
        let client = Arc::new(MockClient::new());
        client.add_group(group(10));
        // The client only knows a message the cache does not have.
        client.add_messages(10, vec![msg(10, 99, now - 5, "remote")]);
        let pipeline = pipeline(client.clone()).await;

        pipeline.cache.cache_message(&msg(10, 1, now - 30, "local a")).await.unwrap();
        pipeline.cache.cache_message(&msg(10, 2, now - 20, "local b")).await.unwrap();

        let content = pipeline.messages_content(10).await.unwrap();
        assert!(content.contains("local a"));
        assert!(!content.contains("remote"));
    }

    #[tokio::test]
    async fn size_estimate_prefers_live_then_stats_then_default() {
        let client = Arc::new(MockClient::new());
        client.add_group(group(10));
        let pipeline = pipeline(client.clone()).await;

        assert_eq!(pipeline.estimate_size(10).await, DEFAULT_MESSAGES_SIZE);

        pipeline
            .cache
            .update_stats(&ChatMessageStats {
                chat_id: 10,
                message_count: 3,
                content_size: 123,
                last_message_ts: 0,
                last_fetch_ts: 0,
                oldest_message_ts: 0,
            })
            .await
            .unwrap();
        assert_eq!(pipeline.estimate_size(10).await, 123);

        pipeline.formatted.store(10, "x".repeat(77), 3, 9);
        assert_eq!(pipeline.estimate_size(10).await, 77);
    }

    #[tokio::test]
    async fn new_message_invalidates_the_rendered_view() {
        let now = Utc::now().timestamp();
        let client = Arc::new(MockClient::new());
        client.add_group(group(10));
        let pipeline = pipeline(client.clone()).await;

        pipeline.formatted.store(10, "stale".into(), 1, 1);
        pipeline.handle_new_message(msg(10, 2, now, "fresh")).await;

        assert!(pipeline.formatted.get(10).is_none());
        assert!(pipeline.cache.get_message(10, 2).await.unwrap().is_some());
        let stats = pipeline.cache.get_stats(10).await.unwrap().unwrap();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.last_message_ts, now);
    }

    #[tokio::test]
    async fn senders_resolve_through_the_entity_directory() {
        let now = Utc::now().timestamp();
        let client = Arc::new(MockClient::new());
        client.add_user(User {
            id: 2,
            username: "ada".into(),
            first_name: "Ada".into(),
            is_contact: true,
            ..Default::default()
        });
        client.add_messages(2, vec![msg(2, 1, now - 10, "hello")]);
        let pipeline = pipeline(client.clone()).await;
        pipeline.entities.ensure_users_loaded(client.as_ref()).await;

        let content = pipeline.messages_content(2).await.unwrap();
        assert!(content.contains("Ada (@ada)"), "content: {content}");
    }
}
