use teloxide::types::{Message, MessageEntityKind};

use gtb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::InboundMessage,
};

use crate::router::BotIdentity;

/// Convert a Telegram message into the core inbound model.
///
/// Returns `None` for messages without text or without an author (channel
/// posts). The bot counts as addressed when it is @-mentioned, text-mentioned,
/// or when the message replies to one of the bot's own messages.
pub fn to_inbound(msg: &Message, me: &BotIdentity) -> Option<InboundMessage> {
    let text = msg.text()?;
    let author = msg.from()?;

    let entities = msg.parse_entities().unwrap_or_default();
    let mut mentioned = false;
    // A text mention shows the bot's display name, which the core's `@username`
    // stripping cannot see; drop it here so only the message itself is forwarded.
    let mut cleaned = text.to_string();
    for e in &entities {
        match e.kind() {
            MessageEntityKind::Mention => {
                mentioned |= e
                    .text()
                    .trim_start_matches('@')
                    .eq_ignore_ascii_case(&me.username);
            }
            MessageEntityKind::TextMention { user } if user.id == me.id => {
                mentioned = true;
                cleaned = cleaned.replacen(e.text(), "", 1);
            }
            _ => {}
        }
    }
    let replied_to_bot = msg
        .reply_to_message()
        .and_then(|m| m.from())
        .is_some_and(|u| u.id == me.id);

    Some(InboundMessage {
        message: MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        },
        author: UserId(author.id.0 as i64),
        username: author.username.clone(),
        text: cleaned.trim().to_string(),
        is_self: author.id == me.id,
        is_bot_author: author.is_bot,
        mentions_bot: mentioned || replied_to_bot,
        is_private: msg.chat.is_private(),
    })
}
