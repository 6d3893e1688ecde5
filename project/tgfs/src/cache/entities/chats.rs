use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::tg::types::{Chat, ChatKind};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "chats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    pub kind: i32,
    #[sea_orm(column_type = "Text")]
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub username: String,
    pub last_message_id: i64,
    pub last_message_ts: i64,
    pub can_send: bool,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_chat(self) -> Chat {
        Chat {
            id: self.id,
            kind: ChatKind::from_i32(self.kind),
            title: self.title,
            username: self.username,
            last_message_id: self.last_message_id,
            last_message_ts: self.last_message_ts,
            can_send: self.can_send,
        }
    }
}

pub fn active_model(chat: &Chat, now: i64) -> ActiveModel {
    ActiveModel {
        id: Set(chat.id),
        kind: Set(chat.kind.as_i32()),
        title: Set(chat.title.clone()),
        username: Set(chat.username.clone()),
        last_message_id: Set(chat.last_message_id),
        last_message_ts: Set(chat.last_message_ts),
        can_send: Set(chat.can_send),
        updated_at: Set(now),
    }
}
