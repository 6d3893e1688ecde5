//! Rendering of messages into the synthetic `messages` file, plus the text
//! checks shared with the send path.

use chrono::{Local, TimeZone, Utc};

use crate::tg::types::{MediaInfo, MediaKind, Message, SenderInfo};

/// Stat-time fallback when nothing has been rendered yet.
pub const DEFAULT_MESSAGES_SIZE: u64 = 4096;

/// Rough per-message size used to estimate content length from a count.
pub const AVG_MESSAGE_SIZE: u64 = 80;

fn media_tag(media: &MediaInfo) -> String {
    match media.kind {
        MediaKind::Photo => "[photo]".to_string(),
        MediaKind::Video => "[video]".to_string(),
        MediaKind::Voice => "[voice message]".to_string(),
        MediaKind::Animation => "[animation]".to_string(),
        MediaKind::Sticker => "[sticker]".to_string(),
        MediaKind::VideoNote => "[video note]".to_string(),
        MediaKind::Document => format!("[document: {}]", media.filename),
        MediaKind::Audio => format!("[audio: {}]", media.filename),
    }
}

/// Relative wording for fresh messages, absolute local time otherwise.
fn time_expr(ts: i64) -> String {
    let age = Utc::now().timestamp() - ts;
    if (0..60).contains(&age) {
        return "just_now".to_string();
    }
    if (60..3600).contains(&age) {
        return format!("{} minutes ago", age / 60);
    }
    if (3600..86_400).contains(&age) {
        return format!("{} hours ago", age / 3600);
    }
    match Local.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        _ => ts.to_string(),
    }
}

/// Keep multi-line texts inside the blockquote.
fn continue_blockquote(text: &str) -> String {
    text.replace('\n', "\n> ")
}

/// One message as a markdown blockquote line (no trailing newline).
pub fn format_message(message: &Message, sender: &SenderInfo) -> String {
    let sender_str = if sender.outgoing {
        "You".to_string()
    } else if !sender.username.is_empty() {
        format!("{} (@{})", sender.display_name, sender.username)
    } else {
        sender.display_name.clone()
    };

    let content = match (&message.media, message.text.is_empty()) {
        (Some(media), true) => media_tag(media),
        (Some(media), false) => {
            format!("{} {}", media_tag(media), continue_blockquote(&message.text))
        }
        (None, _) => continue_blockquote(&message.text),
    };

    let mut line = format!("> **{sender_str}** [{}]", time_expr(message.ts));
    if !content.is_empty() {
        line.push(' ');
        line.push_str(&content);
    }
    line
}

/// Render a chat's messages: ascending by timestamp, deduplicated by id
/// (first occurrence wins), joined with newlines and a trailing newline.
pub fn render_messages<F>(messages: &[Message], mut resolve_sender: F) -> String
where
    F: FnMut(i64, bool) -> SenderInfo,
{
    if messages.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<&Message> = messages.iter().collect();
    sorted.sort_by_key(|m| (m.ts, m.id));

    let mut seen = std::collections::HashSet::new();
    let mut lines = Vec::with_capacity(sorted.len());
    for message in sorted {
        if !seen.insert(message.id) {
            continue;
        }
        let sender = resolve_sender(message.sender_id, message.outgoing);
        lines.push(format_message(message, &sender));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn estimate_size(message_count: u64) -> u64 {
    if message_count == 0 {
        DEFAULT_MESSAGES_SIZE
    } else {
        message_count * AVG_MESSAGE_SIZE
    }
}

/// Accept only text-like buffers: no NUL bytes, and at most 5% control
/// characters outside tab/LF/CR (one such byte for inputs under 20 bytes).
pub fn is_valid_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return true;
    }
    let mut non_printable = 0usize;
    for &byte in data {
        if byte == 0 {
            return false;
        }
        if byte < 32 && byte != b'\t' && byte != b'\n' && byte != b'\r' {
            non_printable += 1;
        }
    }
    let threshold = if data.len() < 20 { 1 } else { data.len() / 20 };
    non_printable <= threshold
}

/// Split a message into chunks of at most `max_size` bytes, preferring
/// whitespace boundaries. The separating whitespace is consumed.
pub fn split_text(text: &str, max_size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let bytes = text.as_bytes();
    if bytes.len() <= max_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let remaining = bytes.len() - pos;
        if remaining <= max_size {
            chunks.push(text[pos..].to_string());
            break;
        }

        let chunk_end = pos + max_size;
        let mut split_pos = chunk_end;
        let mut found = false;
        let mut i = chunk_end;
        while i > pos {
            if matches!(bytes[i], b' ' | b'\n' | b'\t') {
                split_pos = i;
                found = true;
                break;
            }
            i -= 1;
        }
        if !found {
            // No whitespace: force the split, staying on a char boundary.
            while split_pos > pos + 1 && !text.is_char_boundary(split_pos) {
                split_pos -= 1;
            }
        }

        chunks.push(text[pos..split_pos].to_string());
        pos = split_pos;
        if pos < bytes.len() && matches!(bytes[pos], b' ' | b'\n' | b'\t') {
            pos += 1;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: i64, ts: i64, text: &str, outgoing: bool) -> Message {
        Message {
            id,
            chat_id: 1,
            sender_id: 2,
            ts,
            text: text.into(),
            media: None,
            outgoing,
        }
    }

    fn sender(name: &str, username: &str, outgoing: bool) -> SenderInfo {
        SenderInfo {
            display_name: name.into(),
            username: username.into(),
            outgoing,
        }
    }

    #[test]
    fn outgoing_messages_render_as_you() {
        let now = Utc::now().timestamp();
        let line = format_message(&msg(1, now, "hi", true), &sender("Me", "me", true));
        assert_eq!(line, "> **You** [just_now] hi");
    }

    #[test]
    fn incoming_sender_includes_username() {
        let now = Utc::now().timestamp();
        let line = format_message(
            &msg(1, now - 120, "hey", false),
            &sender("Ada Lovelace", "ada", false),
        );
        assert_eq!(line, "> **Ada Lovelace (@ada)** [2 minutes ago] hey");
    }

    #[test]
    fn old_messages_use_absolute_time() {
        let line = format_message(
            &msg(1, Utc::now().timestamp() - 200_000, "old", false),
            &sender("Bob", "", false),
        );
        // "> **Bob** [YYYY-MM-DD HH:MM] old"
        assert!(line.starts_with("> **Bob** [2"));
        assert!(line.ends_with("] old"));
    }

    #[test]
    fn newlines_stay_inside_the_blockquote() {
        let now = Utc::now().timestamp();
        let line = format_message(&msg(1, now, "a\nb", true), &sender("", "", true));
        assert_eq!(line, "> **You** [just_now] a\n> b");
    }

    #[test]
    fn media_only_message_renders_its_tag() {
        let now = Utc::now().timestamp();
        let mut message = msg(1, now, "", false);
        message.media = Some(MediaInfo {
            kind: MediaKind::Document,
            file_id: "f".into(),
            filename: "plan.pdf".into(),
            mime_type: String::new(),
            size: 0,
            local_path: None,
            width: None,
            height: None,
            duration: None,
        });
        let line = format_message(&message, &sender("Ann", "", false));
        assert_eq!(line, "> **Ann** [just_now] [document: plan.pdf]");
    }

    #[test]
    fn text_with_media_puts_the_tag_first() {
        let now = Utc::now().timestamp();
        let mut message = msg(1, now, "holiday shots", false);
        message.media = Some(MediaInfo {
            kind: MediaKind::Photo,
            file_id: "f".into(),
            filename: "beach.jpg".into(),
            mime_type: String::new(),
            size: 0,
            local_path: None,
            width: None,
            height: None,
            duration: None,
        });
        let line = format_message(&message, &sender("Ann", "", false));
        assert_eq!(line, "> **Ann** [just_now] [photo] holiday shots");
    }

    #[test]
    fn render_sorts_ascending_and_dedups() {
        let now = Utc::now().timestamp();
        let messages = vec![
            msg(2, now - 10, "second", false),
            msg(1, now - 20, "first", false),
            msg(2, now - 10, "second again", false),
        ];
        let out = render_messages(&messages, |_, outgoing| sender("A", "", outgoing));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn render_of_nothing_is_empty() {
        assert_eq!(render_messages(&[], |_, _| SenderInfo::default()), "");
    }

    #[test]
    fn valid_text_rules() {
        assert!(is_valid_text(b""));
        assert!(is_valid_text(b"hello world\n"));
        assert!(is_valid_text("unicode ünïcode".as_bytes()));
        assert!(!is_valid_text(b"\x00\x01\x02\x03"));
        assert!(!is_valid_text(b"ab\x01cd\x02ef"));
        // One control byte is tolerated in short inputs.
        assert!(is_valid_text(b"ab\x01cdef"));
    }

    #[test]
    fn split_keeps_short_text_whole() {
        assert_eq!(split_text("hello", 4096), vec!["hello".to_string()]);
        assert!(split_text("", 4096).is_empty());
    }

    #[test]
    fn split_prefers_whitespace_boundaries() {
        // 6000 ASCII bytes of 5-char words: a split point exists near 4096.
        let word = "word ";
        let text: String = word.repeat(1200);
        let text = text.trim_end().to_string();
        let chunks = split_text(&text, 4096);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 4096);
            assert!(!chunk.starts_with(' '));
            assert!(!chunk.ends_with(' '));
        }
        // Re-joining on the consumed separator restores the input.
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn split_forces_boundary_when_no_whitespace() {
        let text = "x".repeat(10_000);
        let chunks = split_text(&text, 4096);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 4096);
        assert_eq!(chunks[2].len(), 10_000 - 2 * 4096);
    }

    #[test]
    fn split_respects_char_boundaries() {
        let text = "é".repeat(3000); // 2 bytes each
        let chunks = split_text(&text, 4096);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn size_estimate_defaults_when_empty() {
        assert_eq!(estimate_size(0), DEFAULT_MESSAGES_SIZE);
        assert_eq!(estimate_size(10), 10 * AVG_MESSAGE_SIZE);
    }
}
