use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::tg::types::{User, UserStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    #[sea_orm(column_type = "Text")]
    pub username: String,
    #[sea_orm(column_type = "Text")]
    pub first_name: String,
    #[sea_orm(column_type = "Text")]
    pub last_name: String,
    #[sea_orm(column_type = "Text")]
    pub phone_number: String,
    #[sea_orm(column_type = "Text")]
    pub bio: String,

    pub is_contact: bool,
    pub status: i32,
    pub last_seen: i64,
    pub last_message_id: i64,
    pub last_message_ts: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            phone_number: self.phone_number,
            bio: self.bio,
            is_contact: self.is_contact,
            status: UserStatus::from_i32(self.status),
            last_seen: self.last_seen,
            last_message_id: self.last_message_id,
            last_message_ts: self.last_message_ts,
        }
    }
}

pub fn active_model(user: &User, now: i64) -> ActiveModel {
    ActiveModel {
        id: Set(user.id),
        username: Set(user.username.clone()),
        first_name: Set(user.first_name.clone()),
        last_name: Set(user.last_name.clone()),
        phone_number: Set(user.phone_number.clone()),
        bio: Set(user.bio.clone()),
        is_contact: Set(user.is_contact),
        status: Set(user.status.as_i32()),
        last_seen: Set(user.last_seen),
        last_message_id: Set(user.last_message_id),
        last_message_ts: Set(user.last_message_ts),
        updated_at: Set(now),
    }
}
