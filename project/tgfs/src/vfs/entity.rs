//! In-memory directory of users, groups and channels, keyed by their
//! path component. Populated lazily on first touch, written through to the
//! durable cache, and mutated by update events.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::cache::CacheStore;
use crate::tg::client::TelegramClient;
use crate::tg::types::{Chat, SenderInfo, User};
use crate::vfs::path::sanitise_name;

pub struct EntityDirectory {
    cache: Arc<CacheStore>,
    users: Mutex<BTreeMap<String, User>>,
    groups: Mutex<BTreeMap<String, Chat>>,
    channels: Mutex<BTreeMap<String, Chat>>,
    me: Mutex<Option<User>>,
    users_loaded: AtomicBool,
    groups_loaded: AtomicBool,
    channels_loaded: AtomicBool,
}

pub fn user_dir_name(user: &User) -> String {
    if !user.username.is_empty() {
        return user.username.clone();
    }
    if user.has_name() {
        return sanitise_name(&user.display_name());
    }
    user.id.to_string()
}

pub fn chat_dir_name(chat: &Chat) -> String {
    if !chat.username.is_empty() {
        return chat.username.clone();
    }
    if !chat.title.is_empty() {
        return sanitise_name(&chat.title);
    }
    chat.id.to_string()
}

/// Insert under `name`, resolving collisions: the entity with a username
/// keeps the bare name, the other gets a numeric suffix.
fn insert_resolving<T, F: Fn(&T) -> (bool, i64)>(
    map: &mut BTreeMap<String, T>,
    name: String,
    value: T,
    key_of: F,
) {
    if let Some(existing) = map.get(&name) {
        let (existing_has_username, existing_id) = key_of(existing);
        let (new_has_username, new_id) = key_of(&value);
        if new_has_username && !existing_has_username {
            let displaced = map.remove(&name).unwrap();
            map.insert(format!("{name}_{existing_id}"), displaced);
            map.insert(name, value);
        } else {
            map.insert(format!("{name}_{new_id}"), value);
        }
        return;
    }
    map.insert(name, value);
}

impl EntityDirectory {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self {
            cache,
            users: Mutex::new(BTreeMap::new()),
            groups: Mutex::new(BTreeMap::new()),
            channels: Mutex::new(BTreeMap::new()),
            me: Mutex::new(None),
            users_loaded: AtomicBool::new(false),
            groups_loaded: AtomicBool::new(false),
            channels_loaded: AtomicBool::new(false),
        }
    }

    // ----- lazy loading -----

    pub async fn ensure_users_loaded<C: TelegramClient>(&self, client: &C) {
        // Several tasks may race here on first touch; the map rebuild under
        // the mutex is idempotent, so the worst case is a duplicate fetch.
        if !self.users_loaded.load(Ordering::Acquire) {
            self.refresh_users(client).await;
        }
    }

    pub async fn refresh_users<C: TelegramClient>(&self, client: &C) {
        match client.get_users().await {
            Ok(list) => {
                if let Err(err) = self.cache.cache_users(&list).await {
                    error!(error = %err, "failed to persist users");
                }
                let count = list.len();
                {
                    let mut users = self.users.lock().unwrap();
                    users.clear();
                    for user in list {
                        let name = user_dir_name(&user);
                        insert_resolving(&mut users, name, user, |u| {
                            (!u.username.is_empty(), u.id)
                        });
                    }
                }
                if count > 0 {
                    self.users_loaded.store(true, Ordering::Release);
                }
                info!(count, "loaded users from Telegram");
            }
            Err(err) => {
                // Not marked loaded, so the next access retries.
                error!(error = %err, "failed to refresh users");
            }
        }
    }

    pub async fn ensure_groups_loaded<C: TelegramClient>(&self, client: &C) {
        if !self.groups_loaded.load(Ordering::Acquire) {
            self.refresh_groups(client).await;
        }
    }

    pub async fn refresh_groups<C: TelegramClient>(&self, client: &C) {
        match client.get_groups().await {
            Ok(list) => {
                if let Err(err) = self.cache.cache_chats(&list).await {
                    error!(error = %err, "failed to persist groups");
                }
                let count = list.len();
                {
                    let mut groups = self.groups.lock().unwrap();
                    groups.clear();
                    for chat in list {
                        let name = chat_dir_name(&chat);
                        insert_resolving(&mut groups, name, chat, |c| {
                            (!c.username.is_empty(), c.id)
                        });
                    }
                }
                if count > 0 {
                    self.groups_loaded.store(true, Ordering::Release);
                }
                info!(count, "loaded groups from Telegram");
            }
            Err(err) => {
                error!(error = %err, "failed to refresh groups");
            }
        }
    }

    pub async fn ensure_channels_loaded<C: TelegramClient>(&self, client: &C) {
        if !self.channels_loaded.load(Ordering::Acquire) {
            self.refresh_channels(client).await;
        }
    }

    pub async fn refresh_channels<C: TelegramClient>(&self, client: &C) {
        match client.get_channels().await {
            Ok(list) => {
                if let Err(err) = self.cache.cache_chats(&list).await {
                    error!(error = %err, "failed to persist channels");
                }
                let count = list.len();
                {
                    let mut channels = self.channels.lock().unwrap();
                    channels.clear();
                    for chat in list {
                        let name = chat_dir_name(&chat);
                        insert_resolving(&mut channels, name, chat, |c| {
                            (!c.username.is_empty(), c.id)
                        });
                    }
                }
                if count > 0 {
                    self.channels_loaded.store(true, Ordering::Release);
                }
                info!(count, "loaded channels from Telegram");
            }
            Err(err) => {
                error!(error = %err, "failed to refresh channels");
            }
        }
    }

    pub async fn ensure_me_loaded<C: TelegramClient>(&self, client: &C) {
        if self.me.lock().unwrap().is_some() {
            return;
        }
        match client.get_me().await {
            Ok(me) => {
                debug!(name = %me.display_name(), "loaded current user");
                *self.me.lock().unwrap() = Some(me);
            }
            Err(err) => {
                error!(error = %err, "failed to get current user");
            }
        }
    }

    /// Drop everything and reload on next touch.
    pub fn invalidate(&self) {
        self.users.lock().unwrap().clear();
        self.groups.lock().unwrap().clear();
        self.channels.lock().unwrap().clear();
        *self.me.lock().unwrap() = None;
        self.users_loaded.store(false, Ordering::Release);
        self.groups_loaded.store(false, Ordering::Release);
        self.channels_loaded.store(false, Ordering::Release);
    }

    // ----- lookups (owned copies; the maps stay behind the mutex) -----

    pub fn me(&self) -> Option<User> {
        self.me.lock().unwrap().clone()
    }

    pub fn find_user(&self, dir_name: &str) -> Option<User> {
        self.users.lock().unwrap().get(dir_name).cloned()
    }

    pub fn find_group(&self, dir_name: &str) -> Option<Chat> {
        self.groups.lock().unwrap().get(dir_name).cloned()
    }

    pub fn find_channel(&self, dir_name: &str) -> Option<Chat> {
        self.channels.lock().unwrap().get(dir_name).cloned()
    }

    pub fn users_snapshot(&self) -> Vec<(String, User)> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .map(|(name, user)| (name.clone(), user.clone()))
            .collect()
    }

    pub fn groups_snapshot(&self) -> Vec<(String, Chat)> {
        self.groups
            .lock()
            .unwrap()
            .iter()
            .map(|(name, chat)| (name.clone(), chat.clone()))
            .collect()
    }

    pub fn channels_snapshot(&self) -> Vec<(String, Chat)> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .map(|(name, chat)| (name.clone(), chat.clone()))
            .collect()
    }

    /// Find a contact by the username of a root-level `@` symlink.
    pub fn contact_by_username(&self, username: &str) -> Option<(String, User)> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|(_, user)| user.username == username && user.is_contact)
            .map(|(name, user)| (name.clone(), user.clone()))
    }

    pub fn user_by_id(&self, id: i64) -> Option<User> {
        if let Some(me) = self.me.lock().unwrap().as_ref()
            && me.id == id
        {
            return Some(me.clone());
        }
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|user| user.id == id)
            .cloned()
    }

    /// Resolve a sender id for the formatter, degrading to `User <id>`.
    pub fn sender_info(&self, sender_id: i64, outgoing: bool) -> SenderInfo {
        match self.user_by_id(sender_id) {
            Some(user) => SenderInfo {
                display_name: user.display_name(),
                username: user.username,
                outgoing,
            },
            None => SenderInfo {
                display_name: format!("User {sender_id}"),
                username: String::new(),
                outgoing,
            },
        }
    }

    /// Store a freshly fetched full user back into the map (lazy `.info`).
    pub fn update_user_details(&self, dir_name: &str, user: User) {
        if let Some(slot) = self.users.lock().unwrap().get_mut(dir_name) {
            *slot = user;
        }
    }

    /// Apply an `updateUser` event.
    pub fn apply_user_update(&self, user: User) {
        let mut users = self.users.lock().unwrap();
        if let Some((name, _)) = users.iter().find(|(_, u)| u.id == user.id).map(|(n, u)| (n.clone(), u.id)) {
            users.insert(name, user);
        } else {
            let name = user_dir_name(&user);
            insert_resolving(&mut users, name, user, |u| (!u.username.is_empty(), u.id));
        }
    }

    /// Record a chat's newest message against whichever map holds it.
    pub fn update_last_message(&self, chat_id: i64, message_id: i64, ts: i64) {
        {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.values_mut().find(|u| u.id == chat_id) {
                user.last_message_id = message_id;
                user.last_message_ts = ts;
                return;
            }
        }
        {
            let mut groups = self.groups.lock().unwrap();
            if let Some(chat) = groups.values_mut().find(|c| c.id == chat_id) {
                chat.last_message_id = message_id;
                chat.last_message_ts = ts;
                return;
            }
        }
        let mut channels = self.channels.lock().unwrap();
        if let Some(chat) = channels.values_mut().find(|c| c.id == chat_id) {
            chat.last_message_id = message_id;
            chat.last_message_ts = ts;
        }
    }
}

// ----- .info rendering -----

pub fn user_info(user: &User) -> String {
    let mut out = String::new();
    if !user.username.is_empty() {
        out.push_str(&format!("Username: @{}\n", user.username));
    }
    if user.has_name() {
        out.push_str(&format!("Name: {}\n", user.display_name()));
    }
    if !user.bio.is_empty() {
        out.push_str(&format!("Bio: {}\n", user.bio));
    }
    if !user.phone_number.is_empty() {
        out.push_str(&format!("Phone: {}\n", user.phone_number));
    }
    out.push_str(&format!("Last seen: {}\n", user.last_seen_string()));
    out
}

pub fn group_info(chat: &Chat) -> String {
    let mut out = String::new();
    if !chat.title.is_empty() {
        out.push_str(&format!("Title: {}\n", chat.title));
    }
    if !chat.username.is_empty() {
        out.push_str(&format!("Username: @{}\n", chat.username));
    }
    out.push_str(&format!("Type: {}\n", chat.kind.as_str()));
    out
}

pub fn channel_info(chat: &Chat) -> String {
    let mut out = String::new();
    if !chat.title.is_empty() {
        out.push_str(&format!("Title: {}\n", chat.title));
    }
    if !chat.username.is_empty() {
        out.push_str(&format!("Username: @{}\n", chat.username));
    }
    out.push_str("Type: channel\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tg::mock::MockClient;
    use crate::tg::types::{ChatKind, UserStatus};

    fn named_user(id: i64, username: &str, first: &str) -> User {
        User {
            id,
            username: username.into(),
            first_name: first.into(),
            is_contact: true,
            ..Default::default()
        }
    }

    async fn directory() -> EntityDirectory {
        EntityDirectory::new(Arc::new(CacheStore::open_in_memory().await.unwrap()))
    }

    #[test]
    fn dir_names_fall_back_in_order() {
        assert_eq!(user_dir_name(&named_user(1, "ada", "Ada")), "ada");
        assert_eq!(user_dir_name(&named_user(1, "", "Ada")), "Ada");
        let bare = User {
            id: 99,
            ..Default::default()
        };
        assert_eq!(user_dir_name(&bare), "99");

        let chat = Chat {
            id: 5,
            kind: ChatKind::Group,
            title: "Dev 🎉 Chat".into(),
            username: String::new(),
            last_message_id: 0,
            last_message_ts: 0,
            can_send: true,
        };
        assert_eq!(chat_dir_name(&chat), "Dev Chat");
    }

    #[tokio::test]
    async fn collisions_prefer_the_username_holder() {
        let dir = directory().await;
        let client = MockClient::new();
        // A user whose display name equals another user's username.
        client.add_user(named_user(1, "", "ada"));
        client.add_user(named_user(2, "ada", "Ada"));
        dir.ensure_users_loaded(&client).await;

        let holder = dir.find_user("ada").unwrap();
        assert_eq!(holder.id, 2);
        assert!(dir.find_user("ada_1").is_some());
    }

    #[tokio::test]
    async fn empty_fetch_is_retried_on_next_touch() {
        let dir = directory().await;
        let client = MockClient::new();
        dir.ensure_users_loaded(&client).await;
        assert!(dir.users_snapshot().is_empty());

        client.add_user(named_user(1, "ada", "Ada"));
        dir.ensure_users_loaded(&client).await;
        assert_eq!(dir.users_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn loading_writes_through_to_the_cache() {
        let cache = Arc::new(CacheStore::open_in_memory().await.unwrap());
        let dir = EntityDirectory::new(cache.clone());
        let client = MockClient::new();
        client.add_user(named_user(3, "bob", "Bob"));
        dir.ensure_users_loaded(&client).await;

        assert_eq!(cache.get_user(3).await.unwrap().unwrap().username, "bob");
    }

    #[tokio::test]
    async fn sender_info_degrades_gracefully() {
        let dir = directory().await;
        let info = dir.sender_info(777, false);
        assert_eq!(info.display_name, "User 777");
    }

    #[tokio::test]
    async fn last_message_updates_reach_the_right_map() {
        let dir = directory().await;
        let client = MockClient::new();
        client.add_user(named_user(1, "ada", "Ada"));
        dir.ensure_users_loaded(&client).await;

        dir.update_last_message(1, 50, 1234);
        let user = dir.find_user("ada").unwrap();
        assert_eq!(user.last_message_id, 50);
        assert_eq!(user.last_message_ts, 1234);
    }

    #[test]
    fn info_renderers_follow_the_field_order() {
        let user = User {
            id: 1,
            username: "ada".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: "+100".into(),
            bio: "maths".into(),
            status: UserStatus::Recently,
            ..Default::default()
        };
        assert_eq!(
            user_info(&user),
            "Username: @ada\nName: Ada Lovelace\nBio: maths\nPhone: +100\nLast seen: recently\n"
        );

        let group = Chat {
            id: 2,
            kind: ChatKind::Supergroup,
            title: "Dev".into(),
            username: "dev".into(),
            last_message_id: 0,
            last_message_ts: 0,
            can_send: true,
        };
        assert_eq!(group_info(&group), "Title: Dev\nUsername: @dev\nType: supergroup\n");

        let channel = Chat {
            kind: ChatKind::Channel,
            username: String::new(),
            ..group.clone()
        };
        assert_eq!(channel_info(&channel), "Title: Dev\nType: channel\n");
    }
}
