//! Telegram domain types shared by the cache, the VFS and the client trait.

use chrono::{Local, TimeZone};

/// Largest file Telegram accepts from a regular account.
pub const MAX_FILE_SIZE_REGULAR: i64 = 2 * 1024 * 1024 * 1024;
/// Largest file Telegram accepts from a premium account.
pub const MAX_FILE_SIZE_PREMIUM: i64 = 4 * 1024 * 1024 * 1024;

/// Longest text message Telegram accepts, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_i32(self) -> i32 {
        match self {
            ChatKind::Private => 0,
            ChatKind::Group => 1,
            ChatKind::Supergroup => 2,
            ChatKind::Channel => 3,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ChatKind::Group,
            2 => ChatKind::Supergroup,
            3 => ChatKind::Channel,
            _ => ChatKind::Private,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
    Sticker,
    VideoNote,
}

impl MediaKind {
    pub fn as_i32(self) -> i32 {
        match self {
            MediaKind::Photo => 0,
            MediaKind::Video => 1,
            MediaKind::Document => 2,
            MediaKind::Audio => 3,
            MediaKind::Voice => 4,
            MediaKind::Animation => 5,
            MediaKind::Sticker => 6,
            MediaKind::VideoNote => 7,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => MediaKind::Photo,
            1 => MediaKind::Video,
            3 => MediaKind::Audio,
            4 => MediaKind::Voice,
            5 => MediaKind::Animation,
            6 => MediaKind::Sticker,
            7 => MediaKind::VideoNote,
            _ => MediaKind::Document,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Animation => "animation",
            MediaKind::Sticker => "sticker",
            MediaKind::VideoNote => "video_note",
        }
    }

    /// Photos, videos and animations live under `media/`.
    pub fn is_media(self) -> bool {
        matches!(self, MediaKind::Photo | MediaKind::Video | MediaKind::Animation)
    }

    /// Everything else lives under `files/`.
    pub fn is_document(self) -> bool {
        !self.is_media()
    }
}

/// How a file should be submitted to Telegram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendMode {
    /// Detect from extension and content at release time.
    Auto,
    /// Compressed photo/video.
    Media,
    /// Original bytes preserved.
    Document,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    WaitPhone,
    WaitCode,
    WaitPassword,
    Ready,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UserStatus {
    #[default]
    Unknown,
    Online,
    Offline,
    Recently,
    LastWeek,
    LastMonth,
}

impl UserStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            UserStatus::Unknown => 0,
            UserStatus::Online => 1,
            UserStatus::Offline => 2,
            UserStatus::Recently => 3,
            UserStatus::LastWeek => 4,
            UserStatus::LastMonth => 5,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => UserStatus::Online,
            2 => UserStatus::Offline,
            3 => UserStatus::Recently,
            4 => UserStatus::LastWeek,
            5 => UserStatus::LastMonth,
            _ => UserStatus::Unknown,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    pub id: i64,
    /// Without the `@` prefix.
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub bio: String,
    pub is_contact: bool,
    pub status: UserStatus,
    /// Unix timestamp, only meaningful when `status` is `Offline`.
    pub last_seen: i64,
    pub last_message_id: i64,
    pub last_message_ts: i64,
}

impl User {
    pub fn has_name(&self) -> bool {
        !self.first_name.is_empty() || !self.last_name.is_empty()
    }

    pub fn display_name(&self) -> String {
        if !self.first_name.is_empty() && !self.last_name.is_empty() {
            format!("{} {}", self.first_name, self.last_name)
        } else if !self.first_name.is_empty() {
            self.first_name.clone()
        } else if !self.last_name.is_empty() {
            self.last_name.clone()
        } else if !self.username.is_empty() {
            format!("@{}", self.username)
        } else {
            format!("User {}", self.id)
        }
    }

    pub fn identifier(&self) -> String {
        if !self.username.is_empty() {
            format!("@{}", self.username)
        } else {
            self.display_name()
        }
    }

    pub fn last_seen_string(&self) -> String {
        match self.status {
            UserStatus::Online => "online".to_string(),
            UserStatus::Recently => "recently".to_string(),
            UserStatus::LastWeek => "within a week".to_string(),
            UserStatus::LastMonth => "within a month".to_string(),
            UserStatus::Offline if self.last_seen > 0 => {
                match Local.timestamp_opt(self.last_seen, 0) {
                    chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
                    _ => "a long time ago".to_string(),
                }
            }
            _ => "a long time ago".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
    pub title: String,
    /// For public groups/channels, without a prefix.
    pub username: String,
    pub last_message_id: i64,
    pub last_message_ts: i64,
    pub can_send: bool,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == ChatKind::Private
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ChatKind::Group | ChatKind::Supergroup)
    }

    pub fn is_channel(&self) -> bool {
        self.kind == ChatKind::Channel
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub file_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub local_path: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<i32>,
}

impl MediaInfo {
    /// Extension with the leading dot, falling back to a kind-typical one.
    pub fn extension(&self) -> String {
        if let Some(pos) = self.filename.rfind('.')
            && pos + 1 < self.filename.len()
        {
            return self.filename[pos..].to_string();
        }
        match self.kind {
            MediaKind::Photo => ".jpg".to_string(),
            MediaKind::Video | MediaKind::VideoNote => ".mp4".to_string(),
            MediaKind::Audio => ".mp3".to_string(),
            MediaKind::Voice => ".ogg".to_string(),
            MediaKind::Animation => ".gif".to_string(),
            MediaKind::Sticker => ".webp".to_string(),
            MediaKind::Document => String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub ts: i64,
    pub text: String,
    pub media: Option<MediaInfo>,
    pub outgoing: bool,
}

impl Message {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

/// One shared document or media item, as listed for a chat.
#[derive(Clone, Debug, PartialEq)]
pub struct FileListItem {
    pub chat_id: i64,
    pub message_id: i64,
    pub filename: String,
    pub size: i64,
    pub ts: i64,
    pub kind: MediaKind,
    pub file_id: String,
}

impl FileListItem {
    pub fn size_string(&self) -> String {
        let units = ["B", "KB", "MB", "GB", "TB"];
        let mut size = self.size as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < units.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        format!("{size:.2} {}", units[unit])
    }
}

/// Per-chat freshness record: mtime source for the `messages` file and
/// staleness signal for the prefetcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChatMessageStats {
    pub chat_id: i64,
    pub message_count: i64,
    pub content_size: i64,
    pub last_message_ts: i64,
    pub last_fetch_ts: i64,
    pub oldest_message_ts: i64,
}

/// Resolved sender identity handed to the formatter.
#[derive(Clone, Debug, Default)]
pub struct SenderInfo {
    pub display_name: String,
    pub username: String,
    pub outgoing: bool,
}

/// Classify a file by MIME type first, then extension, defaulting to document.
pub fn detect_media_kind(filename: &str, mime_type: &str) -> MediaKind {
    let mime = mime_type.to_ascii_lowercase();
    if mime.contains("image") {
        if mime.contains("gif") {
            return MediaKind::Animation;
        }
        return MediaKind::Photo;
    }
    if mime.contains("video") {
        return MediaKind::Video;
    }
    if mime.contains("audio") {
        return MediaKind::Audio;
    }

    let name = filename.to_ascii_lowercase();
    if let Some(pos) = name.rfind('.') {
        match &name[pos..] {
            ".jpg" | ".jpeg" | ".png" | ".webp" => return MediaKind::Photo,
            ".gif" => return MediaKind::Animation,
            ".mp4" | ".mov" | ".avi" | ".mkv" | ".webm" => return MediaKind::Video,
            ".mp3" | ".ogg" | ".wav" | ".m4a" | ".flac" => return MediaKind::Audio,
            _ => {}
        }
    }
    MediaKind::Document
}
