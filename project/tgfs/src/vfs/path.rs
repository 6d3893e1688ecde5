//! Absolute-path router for the virtual filesystem.
//!
//! Every syscall path is parsed into a [`PathInfo`] before any state is
//! consulted. Parsing is pure; resolution against live entities happens in
//! the provider.

pub const USERS_DIR: &str = "users";
pub const CONTACTS_DIR: &str = "contacts";
pub const GROUPS_DIR: &str = "groups";
pub const CHANNELS_DIR: &str = "channels";
pub const INFO_FILE: &str = ".info";
pub const MESSAGES_FILE: &str = "messages";
pub const FILES_DIR: &str = "files";
pub const MEDIA_DIR: &str = "media";
pub const SELF_SYMLINK: &str = "self";
pub const UPLOADS_DIR: &str = ".uploads";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathCategory {
    Root,
    UsersDir,
    ContactsDir,
    GroupsDir,
    ChannelsDir,
    UploadsDir,

    UserDir,
    UserInfo,
    UserMessages,
    UserFilesDir,
    UserFile,
    UserMediaDir,
    UserMedia,
    UserUpload,

    GroupDir,
    GroupInfo,
    GroupMessages,
    GroupFilesDir,
    GroupFile,
    GroupMediaDir,
    GroupMedia,
    GroupUpload,

    ChannelDir,
    ChannelInfo,
    ChannelMessages,
    ChannelFilesDir,
    ChannelFile,
    ChannelMediaDir,
    ChannelMedia,
    ChannelUpload,

    ContactSymlink,
    RootSymlink,
    SelfSymlink,

    NotFound,
}

impl PathCategory {
    pub fn is_directory(self) -> bool {
        matches!(
            self,
            PathCategory::Root
                | PathCategory::UsersDir
                | PathCategory::ContactsDir
                | PathCategory::GroupsDir
                | PathCategory::ChannelsDir
                | PathCategory::UploadsDir
                | PathCategory::UserDir
                | PathCategory::GroupDir
                | PathCategory::ChannelDir
                | PathCategory::UserFilesDir
                | PathCategory::UserMediaDir
                | PathCategory::GroupFilesDir
                | PathCategory::GroupMediaDir
                | PathCategory::ChannelFilesDir
                | PathCategory::ChannelMediaDir
        )
    }

    pub fn is_symlink(self) -> bool {
        matches!(
            self,
            PathCategory::ContactSymlink | PathCategory::RootSymlink | PathCategory::SelfSymlink
        )
    }

    /// The `messages` file of any chat kind.
    pub fn is_messages(self) -> bool {
        matches!(
            self,
            PathCategory::UserMessages | PathCategory::GroupMessages | PathCategory::ChannelMessages
        )
    }

    /// An upload target directly under a chat directory.
    pub fn is_upload_target(self) -> bool {
        matches!(
            self,
            PathCategory::UserUpload | PathCategory::GroupUpload | PathCategory::ChannelUpload
        )
    }

    /// A named entry under `files/` or `media/`.
    pub fn is_file_entry(self) -> bool {
        matches!(
            self,
            PathCategory::UserFile
                | PathCategory::GroupFile
                | PathCategory::ChannelFile
                | PathCategory::UserMedia
                | PathCategory::GroupMedia
                | PathCategory::ChannelMedia
        )
    }
}

/// Which entity family a chat-scoped category belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntitySection {
    User,
    Group,
    Channel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathInfo {
    pub category: PathCategory,
    pub entity_name: Option<String>,
    pub file_name: Option<String>,
}

impl PathInfo {
    fn category_only(category: PathCategory) -> Self {
        Self {
            category,
            entity_name: None,
            file_name: None,
        }
    }

    fn entity(category: PathCategory, name: &str) -> Self {
        Self {
            category,
            entity_name: Some(name.to_string()),
            file_name: None,
        }
    }

    fn entry(category: PathCategory, name: &str, file: &str) -> Self {
        Self {
            category,
            entity_name: Some(name.to_string()),
            file_name: Some(file.to_string()),
        }
    }

    /// The entity section this path belongs to, if any.
    pub fn section(&self) -> Option<EntitySection> {
        use PathCategory::*;
        match self.category {
            UserDir | UserInfo | UserMessages | UserFilesDir | UserFile | UserMediaDir
            | UserMedia | UserUpload => Some(EntitySection::User),
            GroupDir | GroupInfo | GroupMessages | GroupFilesDir | GroupFile | GroupMediaDir
            | GroupMedia | GroupUpload => Some(EntitySection::Group),
            ChannelDir | ChannelInfo | ChannelMessages | ChannelFilesDir | ChannelFile
            | ChannelMediaDir | ChannelMedia | ChannelUpload => Some(EntitySection::Channel),
            _ => None,
        }
    }

    /// Parse an absolute path. Never fails; unknown shapes yield `NotFound`.
    pub fn parse(path: &str) -> Self {
        let mut components: Vec<&str> = Vec::new();
        for comp in path.split('/') {
            match comp {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other),
            }
        }

        if components.is_empty() {
            return Self::category_only(PathCategory::Root);
        }

        if components.len() == 1 {
            let first = components[0];
            if let Some(username) = first.strip_prefix('@')
                && !username.is_empty()
            {
                return Self::entity(PathCategory::RootSymlink, username);
            }
            match first {
                SELF_SYMLINK => return Self::category_only(PathCategory::SelfSymlink),
                UPLOADS_DIR => return Self::category_only(PathCategory::UploadsDir),
                _ => {}
            }
        }

        match components[0] {
            CONTACTS_DIR => match components.len() {
                1 => Self::category_only(PathCategory::ContactsDir),
                2 => Self::entity(PathCategory::ContactSymlink, components[1]),
                _ => Self::category_only(PathCategory::NotFound),
            },
            USERS_DIR => Self::parse_section(EntitySection::User, &components),
            GROUPS_DIR => Self::parse_section(EntitySection::Group, &components),
            CHANNELS_DIR => Self::parse_section(EntitySection::Channel, &components),
            _ => Self::category_only(PathCategory::NotFound),
        }
    }

    fn parse_section(section: EntitySection, components: &[&str]) -> Self {
        use PathCategory::*;
        let (top, dir, info, messages, files_dir, file, media_dir, media, upload) = match section {
            EntitySection::User => (
                UsersDir, UserDir, UserInfo, UserMessages, UserFilesDir, UserFile, UserMediaDir,
                UserMedia, UserUpload,
            ),
            EntitySection::Group => (
                GroupsDir, GroupDir, GroupInfo, GroupMessages, GroupFilesDir, GroupFile,
                GroupMediaDir, GroupMedia, GroupUpload,
            ),
            EntitySection::Channel => (
                ChannelsDir,
                ChannelDir,
                ChannelInfo,
                ChannelMessages,
                ChannelFilesDir,
                ChannelFile,
                ChannelMediaDir,
                ChannelMedia,
                ChannelUpload,
            ),
        };

        match components.len() {
            1 => Self::category_only(top),
            2 => Self::entity(dir, components[1]),
            3 => match components[2] {
                INFO_FILE => Self::entity(info, components[1]),
                MESSAGES_FILE => Self::entity(messages, components[1]),
                FILES_DIR => Self::entity(files_dir, components[1]),
                MEDIA_DIR => Self::entity(media_dir, components[1]),
                other => Self::entry(upload, components[1], other),
            },
            4 => match components[2] {
                FILES_DIR => Self::entry(file, components[1], components[3]),
                MEDIA_DIR => Self::entry(media, components[1], components[3]),
                _ => Self::category_only(NotFound),
            },
            _ => Self::category_only(NotFound),
        }
    }

    /// Rebuild the canonical path for this info. Inverse of [`parse`] for
    /// every recognised category.
    pub fn to_path(&self) -> String {
        use PathCategory::*;
        let name = self.entity_name.as_deref().unwrap_or("");
        let file = self.file_name.as_deref().unwrap_or("");
        match self.category {
            Root => "/".to_string(),
            UsersDir => format!("/{USERS_DIR}"),
            ContactsDir => format!("/{CONTACTS_DIR}"),
            GroupsDir => format!("/{GROUPS_DIR}"),
            ChannelsDir => format!("/{CHANNELS_DIR}"),
            UploadsDir => format!("/{UPLOADS_DIR}"),
            SelfSymlink => format!("/{SELF_SYMLINK}"),
            RootSymlink => format!("/@{name}"),
            ContactSymlink => format!("/{CONTACTS_DIR}/{name}"),
            UserDir => format!("/{USERS_DIR}/{name}"),
            UserInfo => format!("/{USERS_DIR}/{name}/{INFO_FILE}"),
            UserMessages => format!("/{USERS_DIR}/{name}/{MESSAGES_FILE}"),
            UserFilesDir => format!("/{USERS_DIR}/{name}/{FILES_DIR}"),
            UserFile => format!("/{USERS_DIR}/{name}/{FILES_DIR}/{file}"),
            UserMediaDir => format!("/{USERS_DIR}/{name}/{MEDIA_DIR}"),
            UserMedia => format!("/{USERS_DIR}/{name}/{MEDIA_DIR}/{file}"),
            UserUpload => format!("/{USERS_DIR}/{name}/{file}"),
            GroupDir => format!("/{GROUPS_DIR}/{name}"),
            GroupInfo => format!("/{GROUPS_DIR}/{name}/{INFO_FILE}"),
            GroupMessages => format!("/{GROUPS_DIR}/{name}/{MESSAGES_FILE}"),
            GroupFilesDir => format!("/{GROUPS_DIR}/{name}/{FILES_DIR}"),
            GroupFile => format!("/{GROUPS_DIR}/{name}/{FILES_DIR}/{file}"),
            GroupMediaDir => format!("/{GROUPS_DIR}/{name}/{MEDIA_DIR}"),
            GroupMedia => format!("/{GROUPS_DIR}/{name}/{MEDIA_DIR}/{file}"),
            GroupUpload => format!("/{GROUPS_DIR}/{name}/{file}"),
            ChannelDir => format!("/{CHANNELS_DIR}/{name}"),
            ChannelInfo => format!("/{CHANNELS_DIR}/{name}/{INFO_FILE}"),
            ChannelMessages => format!("/{CHANNELS_DIR}/{name}/{MESSAGES_FILE}"),
            ChannelFilesDir => format!("/{CHANNELS_DIR}/{name}/{FILES_DIR}"),
            ChannelFile => format!("/{CHANNELS_DIR}/{name}/{FILES_DIR}/{file}"),
            ChannelMediaDir => format!("/{CHANNELS_DIR}/{name}/{MEDIA_DIR}"),
            ChannelMedia => format!("/{CHANNELS_DIR}/{name}/{MEDIA_DIR}/{file}"),
            ChannelUpload => format!("/{CHANNELS_DIR}/{name}/{file}"),
            NotFound => String::new(),
        }
    }
}

/// Codepoint ranges stripped from directory names. Covers emoticons,
/// pictographs, transport, dingbats, regional indicators, variation
/// selectors and the zero-width joiner.
fn is_emoji(cp: u32) -> bool {
    matches!(cp,
        0x1F600..=0x1F64F
        | 0x1F300..=0x1F5FF
        | 0x1F680..=0x1F6FF
        | 0x1F700..=0x1F77F
        | 0x1F780..=0x1F7FF
        | 0x1F800..=0x1F8FF
        | 0x1F900..=0x1F9FF
        | 0x1FA00..=0x1FA6F
        | 0x1FA70..=0x1FAFF
        | 0x2614..=0x2615
        | 0x2648..=0x2653
        | 0x267F
        | 0x2693
        | 0x26A1
        | 0x26AA..=0x26AB
        | 0x26BD..=0x26BE
        | 0x26C4..=0x26C5
        | 0x26CE
        | 0x26D4
        | 0x26EA
        | 0x26F2..=0x26F3
        | 0x26F5
        | 0x26FA
        | 0x26FD
        | 0x2702
        | 0x2705
        | 0x2708..=0x270D
        | 0x270F
        | 0x2712
        | 0x2714
        | 0x2716
        | 0x271D
        | 0x2721
        | 0x2728
        | 0x2733..=0x2734
        | 0x2744
        | 0x2747
        | 0x274C
        | 0x274E
        | 0x2753..=0x2755
        | 0x2757
        | 0x2763..=0x2764
        | 0x2795..=0x2797
        | 0x27A1
        | 0x27B0
        | 0x27BF
        | 0x231A..=0x231B
        | 0x23E9..=0x23F3
        | 0x23F8..=0x23FA
        | 0x25AA..=0x25AB
        | 0x25B6..=0x25C0
        | 0x25FB..=0x25FE
        | 0x2934..=0x2935
        | 0x2B05..=0x2B07
        | 0x2B1B..=0x2B1C
        | 0x2B50
        | 0x2B55
        | 0x3030
        | 0x303D
        | 0x3297
        | 0x3299
        | 0x1F1E0..=0x1F1FF
        | 0x1F004..=0x1F0CF
        | 0xFE00..=0xFE0F
        | 0x200D
    )
}

/// Turn a human title into a safe, deterministic path component.
/// Idempotent: sanitising a sanitised name is a no-op.
pub fn sanitise_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch == '/' || ch == '\0' {
            out.push('_');
        } else if !is_emoji(ch as u32) {
            out.push(ch);
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    let mut last_was_space = false;
    for ch in out.chars() {
        if ch == ' ' {
            if !last_was_space {
                collapsed.push(ch);
            }
            last_was_space = true;
        } else {
            collapsed.push(ch);
            last_was_space = false;
        }
    }

    let trimmed = collapsed
        .trim_start_matches(' ')
        .trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Compose a symlink target. Relative targets become absolute when a mount
/// point is configured.
pub fn symlink_target(mount_point: &str, relative: &str) -> String {
    if mount_point.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{relative}", mount_point.trim_end_matches('/'))
    }
}
