//! Projection of a chat's shared documents and media as directory entries.
//!
//! Entry names carry the message timestamp so listings sort naturally and
//! duplicated filenames stay distinct: `YYYYMMDD-HHMM-<original_filename>`.

use chrono::{Local, TimeZone};

use crate::tg::types::FileListItem;

/// Length of the `YYYYMMDD-HHMM` prefix, without the joining dash.
const PREFIX_LEN: usize = 13;

/// Directory entry name for a listed file.
pub fn entry_name(item: &FileListItem) -> String {
    let prefix = match Local.timestamp_opt(item.ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y%m%d-%H%M").to_string(),
        _ => "00000000-0000".to_string(),
    };
    format!("{prefix}-{}", item.filename)
}

/// Split an entry name back into its timestamp prefix and original filename.
pub fn parse_entry_name(name: &str) -> Option<(&str, &str)> {
    let bytes = name.as_bytes();
    if bytes.len() < PREFIX_LEN + 2 {
        return None;
    }
    if bytes[8] != b'-' || bytes[PREFIX_LEN] != b'-' {
        return None;
    }
    let digits_ok = bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..PREFIX_LEN].iter().all(u8::is_ascii_digit);
    if !digits_ok {
        return None;
    }
    Some((&name[..PREFIX_LEN], &name[PREFIX_LEN + 1..]))
}

/// Drop a `YYYYMMDD-HHMM-` prefix if present. Used when an upload's target
/// name was copied from a listing.
pub fn strip_timestamp_prefix(name: &str) -> &str {
    match parse_entry_name(name) {
        Some((_, original)) => original,
        None => name,
    }
}

/// Find the listed item a directory entry name refers to: same original
/// filename, same minute.
pub fn find_item<'a>(items: &'a [FileListItem], name: &str) -> Option<&'a FileListItem> {
    let (prefix, filename) = parse_entry_name(name)?;
    items.iter().find(|item| {
        item.filename == filename && entry_name(item).starts_with(prefix)
    })
}

/// Items shown under `files/`: everything that is not viewable media.
pub fn document_items(items: &[FileListItem]) -> Vec<&FileListItem> {
    items.iter().filter(|item| item.kind.is_document()).collect()
}

/// Items shown under `media/`: photos, videos and animations.
pub fn media_items(items: &[FileListItem]) -> Vec<&FileListItem> {
    items.iter().filter(|item| item.kind.is_media()).collect()
}
