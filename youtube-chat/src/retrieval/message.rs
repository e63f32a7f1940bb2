//! The normalized chat message model handed to message handlers.
//!
//! These types are produced only by [`crate::retrieval::normalize`], after raw provider records
//! have been validated, so every value here has already passed schema checks.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed resource discriminator carried by every chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "youtube#liveChatMessage")]
    LiveChatMessage,
}

impl MessageKind {
    pub const TAG: &'static str = "youtube#liveChatMessage";
}

/// A single validated live chat message.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveChatMessages#resource>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// The ID that YouTube assigns to uniquely identify the message.
    pub id: String,
    pub kind: MessageKind,
    pub snippet: ChatMessageSnippet,
    pub author_details: ChatAuthorDetails,
    /// Present only for monetary events with well-formed payment details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_chat_details: Option<SuperChatDetails>,
}

/// Basic details about a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageSnippet {
    #[serde(rename = "type")]
    pub message_type: ChatMessageType,
    /// The ID of the live chat that the message belongs to.
    pub live_chat_id: String,
    /// When the message was originally published.
    pub published_at: Timestamp,
    /// Whether the message has content that can be displayed to viewers.
    pub has_display_content: bool,
    /// Display text for the message.
    ///
    /// Empty when `has_display_content` is false.
    pub display_message: String,
}

/// The closed set of message type tags the provider is known to send.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveChatMessages#snippet.type>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatMessageType {
    #[serde(rename = "textMessageEvent")]
    TextMessage,
    #[serde(rename = "superChatEvent")]
    SuperChat,
    #[serde(rename = "superStickerEvent")]
    SuperSticker,
    #[serde(rename = "newSponsorEvent")]
    NewSponsor,
    #[serde(rename = "memberMilestoneChatEvent")]
    MemberMilestone,
    #[serde(rename = "membershipGiftingEvent")]
    MembershipGifting,
    #[serde(rename = "giftMembershipReceivedEvent")]
    GiftMembershipReceived,
    #[serde(rename = "messageDeletedEvent")]
    MessageDeleted,
    #[serde(rename = "messageRetractedEvent")]
    MessageRetracted,
    #[serde(rename = "userBannedEvent")]
    UserBanned,
    #[serde(rename = "chatEndedEvent")]
    ChatEnded,
    #[serde(rename = "sponsorOnlyModeStartedEvent")]
    SponsorOnlyModeStarted,
    #[serde(rename = "sponsorOnlyModeEndedEvent")]
    SponsorOnlyModeEnded,
    #[serde(rename = "pollEvent")]
    Poll,
}

impl ChatMessageType {
    /// Parses a provider type tag, returning `None` for tags outside the known set.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let t = match tag {
            "textMessageEvent" => Self::TextMessage,
            "superChatEvent" => Self::SuperChat,
            "superStickerEvent" => Self::SuperSticker,
            "newSponsorEvent" => Self::NewSponsor,
            "memberMilestoneChatEvent" => Self::MemberMilestone,
            "membershipGiftingEvent" => Self::MembershipGifting,
            "giftMembershipReceivedEvent" => Self::GiftMembershipReceived,
            "messageDeletedEvent" => Self::MessageDeleted,
            "messageRetractedEvent" => Self::MessageRetracted,
            "userBannedEvent" => Self::UserBanned,
            "chatEndedEvent" => Self::ChatEnded,
            "sponsorOnlyModeStartedEvent" => Self::SponsorOnlyModeStarted,
            "sponsorOnlyModeEndedEvent" => Self::SponsorOnlyModeEnded,
            "pollEvent" => Self::Poll,
            _ => return None,
        };
        Some(t)
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::TextMessage => "textMessageEvent",
            Self::SuperChat => "superChatEvent",
            Self::SuperSticker => "superStickerEvent",
            Self::NewSponsor => "newSponsorEvent",
            Self::MemberMilestone => "memberMilestoneChatEvent",
            Self::MembershipGifting => "membershipGiftingEvent",
            Self::GiftMembershipReceived => "giftMembershipReceivedEvent",
            Self::MessageDeleted => "messageDeletedEvent",
            Self::MessageRetracted => "messageRetractedEvent",
            Self::UserBanned => "userBannedEvent",
            Self::ChatEnded => "chatEndedEvent",
            Self::SponsorOnlyModeStarted => "sponsorOnlyModeStartedEvent",
            Self::SponsorOnlyModeEnded => "sponsorOnlyModeEndedEvent",
            Self::Poll => "pollEvent",
        }
    }

    /// Whether messages of this type carry a payment.
    pub fn is_monetary(&self) -> bool {
        matches!(self, Self::SuperChat | Self::SuperSticker)
    }
}

impl fmt::Display for ChatMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Details about the author of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAuthorDetails {
    pub channel_id: String,
    pub channel_url: String,
    pub display_name: String,
    pub profile_image_url: String,
    pub is_verified: bool,
    /// Whether the author owns the live stream.
    pub is_chat_owner: bool,
    /// Whether the author is a channel member.
    pub is_chat_sponsor: bool,
    pub is_chat_moderator: bool,
}

/// Payment details attached to Super Chat and Super Sticker messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperChatDetails {
    /// The purchase amount in millionths of the currency unit.
    pub amount_micros: u64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Localized, ready-to-display amount such as "$5.00".
    pub amount_display_string: String,
    /// The viewer's comment. Always empty for Super Stickers.
    pub user_comment: String,
    /// Tier from 1 to 5; higher tiers are more prominent.
    pub tier: u8,
}

impl SuperChatDetails {
    pub const MIN_TIER: u8 = 1;
    pub const MAX_TIER: u8 = 5;
}
