//! The Telegram RPC capability consumed by the filesystem core.
//!
//! The wire protocol, authentication handshake and marshalling live behind
//! this trait; the core only sees blocking-style async operations plus the
//! update callback delivered from the client's own update task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::tg::types::{AuthState, Chat, FileListItem, Message, SendMode, User};

/// Errors surfaced by the RPC capability.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("chat not found: {0}")]
    ChatNotFound(i64),

    #[error("user not found: {0}")]
    UserNotFound(i64),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("telegram error [{code}]: {message}")]
    Api { code: i32, message: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Callback invoked from the client's update task for every new message.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Operations the core expects from a Telegram client implementation.
///
/// Every call may block its task on network I/O; per-call timeouts are the
/// implementation's responsibility and surface as [`ClientError::Timeout`].
#[async_trait]
pub trait TelegramClient: Send + Sync + 'static {
    // Lifecycle
    async fn start(&self) -> ClientResult<()>;
    async fn stop(&self) -> ClientResult<()>;

    // Authentication
    async fn get_auth_state(&self) -> ClientResult<AuthState>;
    async fn login(&self, phone: &str) -> ClientResult<()>;
    async fn submit_code(&self, code: &str) -> ClientResult<()>;
    async fn submit_password(&self, password: &str) -> ClientResult<()>;
    async fn logout(&self) -> ClientResult<()>;

    // Entity listing
    async fn get_users(&self) -> ClientResult<Vec<User>>;
    async fn get_groups(&self) -> ClientResult<Vec<Chat>>;
    async fn get_channels(&self) -> ClientResult<Vec<Chat>>;
    async fn get_all_chats(&self) -> ClientResult<Vec<Chat>>;

    // Entity lookup
    async fn resolve_username(&self, username: &str) -> ClientResult<Option<Chat>>;
    async fn get_chat(&self, chat_id: i64) -> ClientResult<Option<Chat>>;
    async fn get_user(&self, user_id: i64) -> ClientResult<Option<User>>;
    async fn get_me(&self) -> ClientResult<User>;
    async fn get_user_bio(&self, user_id: i64) -> ClientResult<String>;

    // Messaging
    async fn send_text(&self, chat_id: i64, text: &str) -> ClientResult<Message>;
    async fn get_messages(&self, chat_id: i64, limit: usize) -> ClientResult<Vec<Message>>;

    /// Fetch history until at least `min_messages` are collected or the
    /// oldest message is older than `max_age`, whichever is stricter.
    async fn get_messages_until(
        &self,
        chat_id: i64,
        min_messages: usize,
        max_age: Duration,
    ) -> ClientResult<Vec<Message>>;

    // Files
    async fn send_file(&self, chat_id: i64, path: &str, mode: SendMode) -> ClientResult<Message>;
    async fn list_media(&self, chat_id: i64) -> ClientResult<Vec<FileListItem>>;
    async fn list_files(&self, chat_id: i64) -> ClientResult<Vec<FileListItem>>;

    /// Download a file, returning the local path. Implementations short-circuit
    /// files that are already on disk.
    async fn download_file(&self, file_id: &str, destination: Option<&str>)
    -> ClientResult<String>;

    /// Register the new-message callback. The callback runs on the client's
    /// update task and must not block for long.
    fn set_message_callback(&self, callback: MessageCallback);
}
