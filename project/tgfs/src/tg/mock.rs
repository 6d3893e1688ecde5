//! Scripted in-memory Telegram client.
//!
//! Backs the provider tests and the `--backend mock` mount. State is seeded
//! up front; send operations record their arguments and loop the resulting
//! message back through the registered callback, the same way TDLib echoes
//! an outgoing message as `updateNewMessage`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::tg::client::{ClientError, ClientResult, MessageCallback, TelegramClient};
use crate::tg::types::{
    AuthState, Chat, FileListItem, MediaInfo, Message, SendMode, User, detect_media_kind,
};

#[derive(Default)]
struct MockState {
    me: User,
    users: Vec<User>,
    groups: Vec<Chat>,
    channels: Vec<Chat>,
    chats: HashMap<i64, Chat>,
    messages: HashMap<i64, Vec<Message>>,
    files: HashMap<i64, Vec<FileListItem>>,
    media: HashMap<i64, Vec<FileListItem>>,
    bios: HashMap<i64, String>,
    sent_texts: Vec<(i64, String)>,
    sent_files: Vec<(i64, String, SendMode)>,
}

pub struct MockClient {
    state: Mutex<MockState>,
    callback: Mutex<Option<MessageCallback>>,
    next_message_id: AtomicI64,
    download_dir: PathBuf,
}

impl MockClient {
    pub fn new() -> Self {
        let me = User {
            id: 1,
            username: "me".into(),
            first_name: "Current".into(),
            last_name: "User".into(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(MockState {
                me,
                ..Default::default()
            }),
            callback: Mutex::new(None),
            next_message_id: AtomicI64::new(1_000),
            download_dir: std::env::temp_dir().join("tgfs-mock-downloads"),
        }
    }

    pub fn set_me(&self, me: User) {
        self.state.lock().unwrap().me = me;
    }

    pub fn add_user(&self, user: User) {
        let mut state = self.state.lock().unwrap();
        state.chats.insert(
            user.id,
            Chat {
                id: user.id,
                kind: crate::tg::types::ChatKind::Private,
                title: user.display_name(),
                username: user.username.clone(),
                last_message_id: user.last_message_id,
                last_message_ts: user.last_message_ts,
                can_send: true,
            },
        );
        state.users.push(user);
    }

    pub fn add_group(&self, chat: Chat) {
        let mut state = self.state.lock().unwrap();
        state.chats.insert(chat.id, chat.clone());
        state.groups.push(chat);
    }

    pub fn add_channel(&self, chat: Chat) {
        let mut state = self.state.lock().unwrap();
        state.chats.insert(chat.id, chat.clone());
        state.channels.push(chat);
    }

    pub fn add_messages(&self, chat_id: i64, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .messages
            .entry(chat_id)
            .or_default()
            .extend(messages);
    }

    pub fn add_file_item(&self, item: FileListItem) {
        let mut state = self.state.lock().unwrap();
        let bucket = if item.kind.is_media() {
            state.media.entry(item.chat_id).or_default()
        } else {
            state.files.entry(item.chat_id).or_default()
        };
        bucket.push(item);
    }

    pub fn set_bio(&self, user_id: i64, bio: &str) {
        self.state.lock().unwrap().bios.insert(user_id, bio.to_string());
    }

    /// Texts submitted through `send_text`, in order.
    pub fn sent_texts(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().sent_texts.clone()
    }

    /// Files submitted through `send_file`, in order.
    pub fn sent_files(&self) -> Vec<(i64, String, SendMode)> {
        self.state.lock().unwrap().sent_files.clone()
    }

    /// Push a message through the update callback, as TDLib's update
    /// thread would.
    pub fn emit_message(&self, message: Message) {
        self.state
            .lock()
            .unwrap()
            .messages
            .entry(message.chat_id)
            .or_default()
            .push(message.clone());
        let callback = self.callback.lock().unwrap().clone();
        if let Some(cb) = callback {
            cb(message);
        }
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn record_outgoing(&self, message: &Message) {
        self.state
            .lock()
            .unwrap()
            .messages
            .entry(message.chat_id)
            .or_default()
            .push(message.clone());
        let callback = self.callback.lock().unwrap().clone();
        if let Some(cb) = callback {
            cb(message.clone());
        }
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelegramClient for MockClient {
    async fn start(&self) -> ClientResult<()> {
        Ok(())
    }

    async fn stop(&self) -> ClientResult<()> {
        Ok(())
    }

    async fn get_auth_state(&self) -> ClientResult<AuthState> {
        Ok(AuthState::Ready)
    }

    async fn login(&self, _phone: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn submit_code(&self, _code: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn submit_password(&self, _password: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn logout(&self) -> ClientResult<()> {
        Ok(())
    }

    async fn get_users(&self) -> ClientResult<Vec<User>> {
        Ok(self.state.lock().unwrap().users.clone())
    }

    async fn get_groups(&self) -> ClientResult<Vec<Chat>> {
        Ok(self.state.lock().unwrap().groups.clone())
    }

    async fn get_channels(&self) -> ClientResult<Vec<Chat>> {
        Ok(self.state.lock().unwrap().channels.clone())
    }

    async fn get_all_chats(&self) -> ClientResult<Vec<Chat>> {
        Ok(self.state.lock().unwrap().chats.values().cloned().collect())
    }

    async fn resolve_username(&self, username: &str) -> ClientResult<Option<Chat>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .chats
            .values()
            .find(|chat| chat.username == username)
            .cloned())
    }

    async fn get_chat(&self, chat_id: i64) -> ClientResult<Option<Chat>> {
        Ok(self.state.lock().unwrap().chats.get(&chat_id).cloned())
    }

    async fn get_user(&self, user_id: i64) -> ClientResult<Option<User>> {
        let state = self.state.lock().unwrap();
        if state.me.id == user_id {
            return Ok(Some(state.me.clone()));
        }
        Ok(state.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn get_me(&self) -> ClientResult<User> {
        Ok(self.state.lock().unwrap().me.clone())
    }

    async fn get_user_bio(&self, user_id: i64) -> ClientResult<String> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .bios
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> ClientResult<Message> {
        {
            let state = self.state.lock().unwrap();
            if !state.chats.contains_key(&chat_id) {
                return Err(ClientError::ChatNotFound(chat_id));
            }
        }
        let message = Message {
            id: self.next_id(),
            chat_id,
            sender_id: self.state.lock().unwrap().me.id,
            ts: Utc::now().timestamp(),
            text: text.to_string(),
            media: None,
            outgoing: true,
        };
        self.state
            .lock()
            .unwrap()
            .sent_texts
            .push((chat_id, text.to_string()));
        self.record_outgoing(&message);
        Ok(message)
    }

    async fn get_messages(&self, chat_id: i64, limit: usize) -> ClientResult<Vec<Message>> {
        let state = self.state.lock().unwrap();
        let mut messages = state.messages.get(&chat_id).cloned().unwrap_or_default();
        messages.sort_by_key(|m| std::cmp::Reverse(m.ts));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn get_messages_until(
        &self,
        chat_id: i64,
        min_messages: usize,
        max_age: Duration,
    ) -> ClientResult<Vec<Message>> {
        let cutoff = Utc::now().timestamp() - max_age.as_secs() as i64;
        let state = self.state.lock().unwrap();
        let mut messages = state.messages.get(&chat_id).cloned().unwrap_or_default();
        messages.sort_by_key(|m| std::cmp::Reverse(m.ts));

        let mut out: Vec<Message> = Vec::new();
        for message in messages {
            if message.ts >= cutoff || out.len() < min_messages {
                out.push(message);
            } else {
                break;
            }
        }
        Ok(out)
    }

    async fn send_file(&self, chat_id: i64, path: &str, mode: SendMode) -> ClientResult<Message> {
        {
            let state = self.state.lock().unwrap();
            if !state.chats.contains_key(&chat_id) {
                return Err(ClientError::ChatNotFound(chat_id));
            }
        }
        let filename = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let size = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
        let message = Message {
            id: self.next_id(),
            chat_id,
            sender_id: self.state.lock().unwrap().me.id,
            ts: Utc::now().timestamp(),
            text: String::new(),
            media: Some(MediaInfo {
                kind: detect_media_kind(&filename, ""),
                file_id: format!("mock-file-{}", self.next_id()),
                filename,
                mime_type: String::new(),
                size,
                local_path: Some(path.to_string()),
                width: None,
                height: None,
                duration: None,
            }),
            outgoing: true,
        };
        self.state
            .lock()
            .unwrap()
            .sent_files
            .push((chat_id, path.to_string(), mode));
        self.record_outgoing(&message);
        Ok(message)
    }

    async fn list_media(&self, chat_id: i64) -> ClientResult<Vec<FileListItem>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .media
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_files(&self, chat_id: i64) -> ClientResult<Vec<FileListItem>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .files
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn download_file(
        &self,
        file_id: &str,
        destination: Option<&str>,
    ) -> ClientResult<String> {
        let dest = match destination {
            Some(path) => PathBuf::from(path),
            None => {
                tokio::fs::create_dir_all(&self.download_dir).await?;
                self.download_dir
                    .join(file_id.replace(['/', '\0'], "_"))
            }
        };
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(dest.to_string_lossy().into_owned());
        }
        tokio::fs::write(&dest, format!("mock content for {file_id}\n")).await?;
        Ok(dest.to_string_lossy().into_owned())
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }
}
