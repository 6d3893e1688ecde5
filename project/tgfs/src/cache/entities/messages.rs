use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::tg::types::{MediaInfo, MediaKind, Message};

/// Message rows are keyed by `(chat_id, id)`; a second observation of the
/// same key replaces the first.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub chat_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub sender_id: i64,
    pub ts: i64,
    #[sea_orm(column_type = "Text")]
    pub text: String,
    pub outgoing: bool,

    pub media_kind: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub media_file_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub media_filename: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub media_mime_type: Option<String>,
    pub media_size: Option<i64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub media_local_path: Option<String>,
    pub media_width: Option<i32>,
    pub media_height: Option<i32>,
    pub media_duration: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_message(self) -> Message {
        let media = self.media_kind.map(|kind| MediaInfo {
            kind: MediaKind::from_i32(kind),
            file_id: self.media_file_id.unwrap_or_default(),
            filename: self.media_filename.unwrap_or_default(),
            mime_type: self.media_mime_type.unwrap_or_default(),
            size: self.media_size.unwrap_or_default(),
            local_path: self.media_local_path,
            width: self.media_width,
            height: self.media_height,
            duration: self.media_duration,
        });
        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            ts: self.ts,
            text: self.text,
            media,
            outgoing: self.outgoing,
        }
    }
}

pub fn active_model(message: &Message) -> ActiveModel {
    let media = message.media.as_ref();
    ActiveModel {
        chat_id: Set(message.chat_id),
        id: Set(message.id),
        sender_id: Set(message.sender_id),
        ts: Set(message.ts),
        text: Set(message.text.clone()),
        outgoing: Set(message.outgoing),
        media_kind: Set(media.map(|m| m.kind.as_i32())),
        media_file_id: Set(media.map(|m| m.file_id.clone())),
        media_filename: Set(media.map(|m| m.filename.clone())),
        media_mime_type: Set(media.map(|m| m.mime_type.clone())),
        media_size: Set(media.map(|m| m.size)),
        media_local_path: Set(media.and_then(|m| m.local_path.clone())),
        media_width: Set(media.and_then(|m| m.width)),
        media_height: Set(media.and_then(|m| m.height)),
        media_duration: Set(media.and_then(|m| m.duration)),
    }
}
