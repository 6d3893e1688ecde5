//! Bounded, time-aware LRU of rendered `messages` content per chat.
//!
//! Entries expire `format_ttl` after they were rendered no matter how often
//! they are read; the LRU bound caps memory. Invalidation happens on every
//! new-message event so the next read re-renders from the durable cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Clone, Copy, Debug)]
pub struct FormattedCacheConfig {
    /// Maximum number of chats kept in memory.
    pub max_chats: usize,
    /// Rendered content is served for at most this long.
    pub format_ttl: Duration,
    /// Messages older than this never enter the rendered view.
    pub max_history_age: Duration,
    /// Target minimum number of messages per chat before rendering.
    pub min_messages: usize,
}

impl Default for FormattedCacheConfig {
    fn default() -> Self {
        Self {
            max_chats: 100,
            format_ttl: Duration::from_secs(3600),
            max_history_age: Duration::from_secs(48 * 3600),
            min_messages: 10,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    content: String,
    message_count: usize,
    newest_message_id: i64,
    formatted_at: Instant,
    last_used: u64,
}

/// A served view of one chat's rendered content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedContent {
    pub content: String,
    pub message_count: usize,
    pub newest_message_id: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub chat_count: usize,
    pub total_content_size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

struct CacheInner {
    entries: HashMap<i64, CacheEntry>,
    tick: u64,
    hit_count: u64,
    miss_count: u64,
}

pub struct FormattedMessageCache {
    config: FormattedCacheConfig,
    inner: Mutex<CacheInner>,
}

impl FormattedMessageCache {
    pub fn new(config: FormattedCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
                hit_count: 0,
                miss_count: 0,
            }),
        }
    }

    pub fn config(&self) -> FormattedCacheConfig {
        self.config
    }

    /// Live content for a chat, touching it to most-recently-used. Expired
    /// entries count as misses and stay in place until the next `store`.
    pub fn get(&self, chat_id: i64) -> Option<CachedContent> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        let live = match inner.entries.get_mut(&chat_id) {
            Some(entry) if entry.formatted_at.elapsed() <= self.config.format_ttl => {
                entry.last_used = tick;
                Some(CachedContent {
                    content: entry.content.clone(),
                    message_count: entry.message_count,
                    newest_message_id: entry.newest_message_id,
                })
            }
            _ => None,
        };

        match live {
            Some(view) => {
                inner.hit_count += 1;
                Some(view)
            }
            None => {
                inner.miss_count += 1;
                None
            }
        }
    }

    /// Insert or replace the rendered content for a chat, evicting the least
    /// recently used entries to stay under `max_chats`.
    pub fn store(&self, chat_id: i64, content: String, message_count: usize, newest_message_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        while !inner.entries.contains_key(&chat_id) && inner.entries.len() >= self.config.max_chats
        {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    inner.entries.remove(&id);
                    debug!(chat_id = id, "formatted cache evicted chat");
                }
                None => break,
            }
        }

        inner.entries.insert(
            chat_id,
            CacheEntry {
                content,
                message_count,
                newest_message_id,
                formatted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn invalidate(&self, chat_id: i64) {
        self.inner.lock().unwrap().entries.remove(&chat_id);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    /// Byte size of the cached content, 0 when absent. Does not touch the
    /// LRU position or the TTL clock.
    pub fn content_size(&self, chat_id: i64) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get(&chat_id)
            .map(|entry| entry.content.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            chat_count: inner.entries.len(),
            total_content_size: inner.entries.values().map(|e| e.content.len()).sum(),
            hit_count: inner.hit_count,
            miss_count: inner.miss_count,
        }
    }
}

impl Default for FormattedMessageCache {
    fn default() -> Self {
        Self::new(FormattedCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(max_chats: usize, ttl: Duration) -> FormattedMessageCache {
        FormattedMessageCache::new(FormattedCacheConfig {
            max_chats,
            format_ttl: ttl,
            ..Default::default()
        })
    }

    #[test]
    fn get_returns_stored_content_and_counts_hits() {
        let cache = cache_with(10, Duration::from_secs(60));
        assert!(cache.get(1).is_none());

        cache.store(1, "> hello\n".into(), 1, 42);
        let view = cache.get(1).unwrap();
        assert_eq!(view.content, "> hello\n");
        assert_eq!(view.newest_message_id, 42);

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[test]
    fn lru_bound_holds_after_any_store_sequence() {
        let cache = cache_with(3, Duration::from_secs(60));
        for id in 0..20 {
            cache.store(id, format!("content {id}"), 1, id);
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn eviction_removes_least_recently_used() {
        let cache = cache_with(2, Duration::from_secs(60));
        cache.store(1, "one".into(), 1, 1);
        cache.store(2, "two".into(), 1, 2);
        cache.get(1);
        cache.store(3, "three".into(), 1, 3);

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn ttl_expiry_turns_hits_into_misses() {
        let cache = cache_with(10, Duration::ZERO);
        cache.store(1, "stale".into(), 1, 1);
        assert!(cache.get(1).is_none());
        // The entry stays in place for content_size until overwritten.
        assert_eq!(cache.content_size(1), 5);
    }

    #[test]
    fn invalidate_removes_entry_entirely() {
        let cache = cache_with(10, Duration::from_secs(60));
        cache.store(1, "content".into(), 1, 1);
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.content_size(1), 0);
    }

    #[test]
    fn content_size_does_not_touch_lru_order() {
        let cache = cache_with(2, Duration::from_secs(60));
        cache.store(1, "one".into(), 1, 1);
        cache.store(2, "two".into(), 1, 2);
        // Reading 1's size must not protect it from eviction.
        assert_eq!(cache.content_size(1), 3);
        cache.get(2);
        cache.store(3, "three".into(), 1, 3);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn store_replaces_in_place_when_full() {
        let cache = cache_with(1, Duration::from_secs(60));
        cache.store(1, "a".into(), 1, 1);
        cache.store(1, "bb".into(), 2, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1).unwrap().content, "bb");
    }
}
