//! SeaORM entity models for the durable cache tables.

pub mod chat_stats;
pub mod chats;
pub mod files;
pub mod messages;
pub mod users;

pub use chat_stats::Entity as ChatStats;
pub use chats::Entity as Chats;
pub use files::Entity as Files;
pub use messages::Entity as Messages;
pub use users::Entity as Users;
