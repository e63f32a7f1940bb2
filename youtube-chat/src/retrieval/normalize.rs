//! Validation of raw `liveChatMessage` records into [`ChatMessage`]s.
//!
//! Raw records go through an explicit schema rather than being trusted as-is: unknown type tags,
//! missing author blocks, unparseable timestamps and out-of-range payment tiers are all rejected
//! here. Rejection is per record, so one bad item never costs the rest of its page.

use crate::retrieval::message::{
    ChatAuthorDetails, ChatMessage, ChatMessageSnippet, ChatMessageType, MessageKind,
    SuperChatDetails,
};
use eyre::{Context, OptionExt};
use jiff::Timestamp;
use serde::Deserialize;

/// A `liveChatMessage` resource as the provider sends it.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveChatMessages#resource>
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    #[serde(default)]
    kind: Option<String>,
    snippet: RawSnippet,
    /// Kept optional so a missing block gets its own error rather than serde's generic one.
    #[serde(default)]
    author_details: Option<RawAuthor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnippet {
    #[serde(rename = "type")]
    message_type: String,
    live_chat_id: String,
    /// ISO 8601; parsed after deserialization so the error names the field.
    published_at: String,
    has_display_content: bool,
    /// Absent on deletion tombstones and other events without display content.
    #[serde(default)]
    display_message: Option<String>,
    #[serde(default)]
    super_chat_details: Option<serde_json::Value>,
    #[serde(default)]
    super_sticker_details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuthor {
    channel_id: String,
    channel_url: String,
    display_name: String,
    profile_image_url: String,
    is_verified: bool,
    is_chat_owner: bool,
    is_chat_sponsor: bool,
    is_chat_moderator: bool,
}

/// The payment block shared by `superChatDetails` and `superStickerDetails`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPaidDetails {
    /// Documented as a string, but some responses carry a bare number.
    amount_micros: RawMicros,
    currency: String,
    amount_display_string: String,
    #[serde(default)]
    user_comment: Option<String>,
    tier: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMicros {
    Text(String),
    Number(serde_json::Number),
}

impl RawMicros {
    fn to_micros(&self) -> eyre::Result<u64> {
        match self {
            RawMicros::Text(s) => s
                .trim()
                .parse::<u64>()
                .with_context(|| format!("amountMicros {s:?} is not a non-negative integer")),
            RawMicros::Number(n) => n
                .as_u64()
                .ok_or_else(|| eyre::eyre!("amountMicros {n} is not a non-negative integer")),
        }
    }
}

/// Validates every record in `items`, dropping (and logging) the ones that fail.
pub fn normalize(items: Vec<serde_json::Value>) -> Vec<ChatMessage> {
    let total = items.len();
    let messages: Vec<ChatMessage> = items
        .into_iter()
        .filter_map(|item| {
            let id = item
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned);
            match normalize_message(item) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(
                        mid = id.as_deref().unwrap_or("<none>"),
                        error = format!("{e:#}"),
                        "dropping malformed chat message"
                    );
                    None
                }
            }
        })
        .collect();

    if messages.len() != total {
        tracing::debug!(
            kept = messages.len(),
            dropped = total - messages.len(),
            "normalized partial batch"
        );
    }
    messages
}

/// Validates a single raw record.
pub fn normalize_message(item: serde_json::Value) -> eyre::Result<ChatMessage> {
    let raw: RawMessage =
        serde_json::from_value(item).context("record does not match liveChatMessage schema")?;

    if let Some(kind) = &raw.kind
        && kind != MessageKind::TAG
    {
        eyre::bail!("unexpected resource kind {kind:?}");
    }

    let message_type = ChatMessageType::from_tag(&raw.snippet.message_type)
        .ok_or_else(|| eyre::eyre!("unknown message type {:?}", raw.snippet.message_type))?;

    let published_at: Timestamp = raw
        .snippet
        .published_at
        .parse()
        .with_context(|| format!("publishedAt {:?} is not a timestamp", raw.snippet.published_at))?;

    let display_message = match (raw.snippet.has_display_content, raw.snippet.display_message) {
        (true, Some(text)) => text,
        (true, None) => eyre::bail!("displayMessage missing although hasDisplayContent is set"),
        (false, text) => text.unwrap_or_default(),
    };

    let author = raw
        .author_details
        .ok_or_eyre("record has no authorDetails block")?;

    let super_chat_details = if message_type.is_monetary() {
        let block = match message_type {
            ChatMessageType::SuperChat => raw.snippet.super_chat_details,
            _ => raw.snippet.super_sticker_details,
        };
        block.and_then(|block| match paid_details(message_type, block) {
            Ok(details) => Some(details),
            Err(e) => {
                tracing::warn!(
                    mid = raw.id,
                    error = format!("{e:#}"),
                    "ignoring malformed payment details"
                );
                None
            }
        })
    } else {
        None
    };

    Ok(ChatMessage {
        id: raw.id,
        kind: MessageKind::LiveChatMessage,
        snippet: ChatMessageSnippet {
            message_type,
            live_chat_id: raw.snippet.live_chat_id,
            published_at,
            has_display_content: raw.snippet.has_display_content,
            display_message,
        },
        author_details: ChatAuthorDetails {
            channel_id: author.channel_id,
            channel_url: author.channel_url,
            display_name: author.display_name,
            profile_image_url: author.profile_image_url,
            is_verified: author.is_verified,
            is_chat_owner: author.is_chat_owner,
            is_chat_sponsor: author.is_chat_sponsor,
            is_chat_moderator: author.is_chat_moderator,
        },
        super_chat_details,
    })
}

fn paid_details(
    message_type: ChatMessageType,
    block: serde_json::Value,
) -> eyre::Result<SuperChatDetails> {
    let raw: RawPaidDetails =
        serde_json::from_value(block).context("payment details do not match schema")?;

    let tier = u8::try_from(raw.tier)
        .ok()
        .filter(|t| (SuperChatDetails::MIN_TIER..=SuperChatDetails::MAX_TIER).contains(t))
        .ok_or_else(|| eyre::eyre!("tier {} is outside 1-5", raw.tier))?;

    let user_comment = match message_type {
        ChatMessageType::SuperSticker => String::new(),
        _ => raw.user_comment.unwrap_or_default(),
    };

    Ok(SuperChatDetails {
        amount_micros: raw.amount_micros.to_micros()?,
        currency: raw.currency,
        amount_display_string: raw.amount_display_string,
        user_comment,
        tier,
    })
}
