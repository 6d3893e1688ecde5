use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::tg::types::{FileListItem, MediaKind};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub chat_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub message_id: i64,

    #[sea_orm(column_type = "Text")]
    pub filename: String,
    pub size: i64,
    pub ts: i64,
    pub kind: i32,
    #[sea_orm(column_type = "Text")]
    pub file_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_item(self) -> FileListItem {
        FileListItem {
            chat_id: self.chat_id,
            message_id: self.message_id,
            filename: self.filename,
            size: self.size,
            ts: self.ts,
            kind: MediaKind::from_i32(self.kind),
            file_id: self.file_id,
        }
    }
}

pub fn active_model(item: &FileListItem) -> ActiveModel {
    ActiveModel {
        chat_id: Set(item.chat_id),
        message_id: Set(item.message_id),
        filename: Set(item.filename.clone()),
        size: Set(item.size),
        ts: Set(item.ts),
        kind: Set(item.kind.as_i32()),
        file_id: Set(item.file_id.clone()),
    }
}
