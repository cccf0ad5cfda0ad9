use html_escape::encode_text;

use crate::model::Posting;

/// Characters of the description shown in an alert.
const SUMMARY_CHARS: usize = 200;

pub const ONLINE_MESSAGE: &str = "🔴 <b>SYSTEM ONLINE</b>\n\nThe job sniper is now watching your feeds! 🎯";
pub const OFFLINE_MESSAGE: &str = "🔵 <b>SYSTEM OFFLINE</b>\n\nThe job sniper has shut down.";

/// Proposal section of an alert.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftSection {
    Proposal(String),
    /// Drafting failed; carries the note shown instead
    Unavailable(String),
}

/// Telegram HTML alert for one posting.
pub fn format_alert(posting: &Posting, draft: Option<&DraftSection>) -> String {
    let summary: String = posting.description.chars().take(SUMMARY_CHARS).collect();

    let mut message = format!(
        "🎯 <b>NEW JOB ALERT</b>\n\n<b>{title}</b>\n\n🔗 {url}\n\n📅 {published}\n📡 {source}\n\n{summary}...\n",
        title = encode_text(&posting.title),
        url = encode_text(&posting.url),
        published = posting.published_at.format("%Y-%m-%d %H:%M UTC"),
        source = encode_text(&posting.source_label()),
        summary = encode_text(&summary),
    );

    match draft {
        Some(DraftSection::Proposal(text)) => {
            message.push_str("\n✍️ <b>Proposal draft</b>\n\n");
            message.push_str(&encode_text(text));
            message.push('\n');
        }
        Some(DraftSection::Unavailable(note)) => {
            message.push_str("\n⚠️ ");
            message.push_str(&encode_text(note));
            message.push('\n');
        }
        None => {}
    }

    message
}
