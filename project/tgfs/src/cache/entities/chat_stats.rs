use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::tg::types::ChatMessageStats;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "chat_message_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub chat_id: i64,

    pub message_count: i64,
    pub content_size: i64,
    pub last_message_ts: i64,
    pub last_fetch_ts: i64,
    pub oldest_message_ts: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_stats(self) -> ChatMessageStats {
        ChatMessageStats {
            chat_id: self.chat_id,
            message_count: self.message_count,
            content_size: self.content_size,
            last_message_ts: self.last_message_ts,
            last_fetch_ts: self.last_fetch_ts,
            oldest_message_ts: self.oldest_message_ts,
        }
    }
}

pub fn active_model(stats: &ChatMessageStats) -> ActiveModel {
    ActiveModel {
        chat_id: Set(stats.chat_id),
        message_count: Set(stats.message_count),
        content_size: Set(stats.content_size),
        last_message_ts: Set(stats.last_message_ts),
        last_fetch_ts: Set(stats.last_fetch_ts),
        oldest_message_ts: Set(stats.oldest_message_ts),
    }
}
