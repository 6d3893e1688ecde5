// Library crate for tgfs: the filesystem core, generic over the Telegram
// client capability.

pub mod cache;
pub mod config;
pub mod fuse;
pub mod tg;
pub mod vfs;

pub use crate::cache::{CacheError, CacheStore};
pub use crate::config::{AppConfig, DataLayout};
pub use crate::fuse::TgFuse;
pub use crate::fuse::mount::mount_unprivileged;
pub use crate::tg::client::{ClientError, MessageCallback, TelegramClient};
pub use crate::tg::mock::MockClient;
pub use crate::tg::rate_limit::{RateLimiter, RateLimiterConfig};
pub use crate::vfs::error::{VfsError, VfsResult};
pub use crate::vfs::message_cache::{FormattedCacheConfig, FormattedMessageCache};
pub use crate::vfs::path::{PathCategory, PathInfo};
pub use crate::vfs::prefetch::{BackgroundPrefetcher, PrefetchConfig, Priority};
pub use crate::vfs::provider::{DataProvider, Entry, EntryKind};
pub use crate::vfs::telegram::{ProviderConfig, TelegramProvider};
