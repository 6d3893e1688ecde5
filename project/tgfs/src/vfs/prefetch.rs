//! Background warming of the message caches.
//!
//! A single worker drains a priority queue, checking each chat's freshness
//! against its stats row before spending a rate-limited API call on it.
//! When the queue idles past the prefetch interval the worker enumerates
//! chats from the durable cache: contacts, then other users, then groups,
//! then channels, each most-recently-active first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::tg::client::TelegramClient;
use crate::tg::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::tg::types::ChatKind;
use crate::vfs::messages::MessagePipeline;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// On-demand request from a syscall path.
    High = 0,
    Normal = 1,
    /// Periodic scan.
    Low = 2,
}

#[derive(Clone, Copy, Debug)]
pub struct PrefetchConfig {
    /// Minimum spacing between API requests.
    pub rate_limit_interval: Duration,
    /// Idle scan period; also the staleness horizon for `needs_fetch`.
    pub prefetch_interval: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            rate_limit_interval: Duration::from_millis(500),
            prefetch_interval: Duration::from_secs(300),
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    priority: Priority,
    seq: i64,
    chat_id: i64,
}

/// Min-heap ordered by (priority, enqueue sequence): higher priority wins,
/// ties pop in enqueue order, so recency-ordered scans stay in order.
pub struct PrefetchQueue {
    heap: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    seq: AtomicI64,
}

impl PrefetchQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicI64::new(0),
        }
    }

    pub fn push(&self, chat_id: i64, priority: Priority) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().unwrap().push(Reverse(QueueEntry {
            priority,
            seq,
            chat_id,
        }));
    }

    pub fn pop(&self) -> Option<i64> {
        self.heap.lock().unwrap().pop().map(|Reverse(e)| e.chat_id)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }
}

impl Default for PrefetchQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Chats worth fetching, in priority order: contacts, non-contact users,
/// groups, channels, each by last activity descending.
pub async fn chats_to_fetch(cache: &CacheStore) -> Vec<i64> {
    let mut out = Vec::new();

    match cache.all_users().await {
        Ok(users) => {
            let mut contacts: Vec<_> = users.iter().filter(|u| u.is_contact).collect();
            let mut others: Vec<_> = users.iter().filter(|u| !u.is_contact).collect();
            contacts.sort_by_key(|u| Reverse(u.last_message_ts));
            others.sort_by_key(|u| Reverse(u.last_message_ts));
            out.extend(contacts.iter().map(|u| u.id));
            out.extend(others.iter().map(|u| u.id));
        }
        Err(err) => warn!(error = %err, "prefetch scan could not list users"),
    }

    match cache
        .chats_by_kinds(&[ChatKind::Group, ChatKind::Supergroup])
        .await
    {
        Ok(groups) => out.extend(groups.iter().map(|c| c.id)),
        Err(err) => warn!(error = %err, "prefetch scan could not list groups"),
    }
    match cache.chats_by_kinds(&[ChatKind::Channel]).await {
        Ok(channels) => out.extend(channels.iter().map(|c| c.id)),
        Err(err) => warn!(error = %err, "prefetch scan could not list channels"),
    }

    out
}

struct PrefetchShared<C: TelegramClient> {
    pipeline: Arc<MessagePipeline<C>>,
    cache: Arc<CacheStore>,
    config: PrefetchConfig,
    limiter: RateLimiter,
    queue: PrefetchQueue,
    notify: Notify,
    running: AtomicBool,
}

impl<C: TelegramClient> PrefetchShared<C> {
    /// A chat needs a fetch when it has no stats row, too few stored
    /// messages, or its last fetch is older than the prefetch interval.
    async fn needs_fetch(&self, chat_id: i64) -> bool {
        let min_messages = self.pipeline.formatted().config().min_messages as i64;
        match self.cache.get_stats(chat_id).await {
            Ok(None) => true,
            Ok(Some(stats)) => {
                stats.message_count < min_messages
                    || Utc::now().timestamp() - stats.last_fetch_ts
                        > self.config.prefetch_interval.as_secs() as i64
            }
            Err(err) => {
                warn!(chat_id, error = %err, "stats lookup failed; fetching anyway");
                true
            }
        }
    }

    async fn run(self: Arc<Self>) {
        debug!("prefetcher loop started");
        while self.running.load(Ordering::Acquire) {
            if self.queue.is_empty() {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(self.config.prefetch_interval) => {
                        if self.queue.is_empty() {
                            let chats = chats_to_fetch(&self.cache).await;
                            debug!(count = chats.len(), "prefetch scan enqueued chats");
                            for chat_id in chats {
                                self.queue.push(chat_id, Priority::Low);
                            }
                        }
                    }
                }
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let Some(chat_id) = self.queue.pop() else {
                continue;
            };
            if !self.needs_fetch(chat_id).await {
                continue;
            }
            self.limiter.acquire().await;
            match self.pipeline.refresh_chat(chat_id).await {
                Ok(count) => debug!(chat_id, count, "prefetched chat"),
                Err(err) => warn!(chat_id, error = %err, "prefetch failed; continuing"),
            }
        }
        debug!("prefetcher loop stopped");
    }
}

pub struct BackgroundPrefetcher<C: TelegramClient> {
    shared: Arc<PrefetchShared<C>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C: TelegramClient> BackgroundPrefetcher<C> {
    pub fn new(
        pipeline: Arc<MessagePipeline<C>>,
        cache: Arc<CacheStore>,
        config: PrefetchConfig,
    ) -> Self {
        let limiter = RateLimiter::new(RateLimiterConfig {
            min_interval: config.rate_limit_interval,
            ..Default::default()
        });
        Self {
            shared: Arc::new(PrefetchShared {
                pipeline,
                cache,
                config,
                limiter,
                queue: PrefetchQueue::new(),
                notify: Notify::new(),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("starting background prefetcher");
        let shared = self.shared.clone();
        *self.worker.lock().unwrap() = Some(tokio::spawn(shared.run()));
    }

    /// Idempotent: wakes the worker, lets it drain out and joins it.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("stopping background prefetcher");
        self.shared.notify.notify_waiters();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Ask for a specific chat ahead of the periodic scan.
    pub fn queue_chat(&self, chat_id: i64, priority: Priority) {
        self.shared.queue.push(chat_id, priority);
        self.shared.notify.notify_waiters();
        debug!(chat_id, ?priority, "queued chat for prefetch");
    }
}
