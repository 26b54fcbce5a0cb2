use crate::domain::{MessageRef, UserId};

/// Cross-messenger incoming message model.
///
/// Telegram-specific fields live in the Telegram adapter; by the time a message
/// reaches the core, the adapter has already answered "who wrote it" and "was
/// the bot addressed".
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub message: MessageRef,
    pub author: UserId,
    pub username: Option<String>,
    pub text: String,
    /// Authored by this bot (its own earlier output).
    pub is_self: bool,
    /// Authored by some other bot account.
    pub is_bot_author: bool,
    /// The bot is mentioned somewhere in the text.
    pub mentions_bot: bool,
    /// One-to-one chat between the user and the bot.
    pub is_private: bool,
}

/// A parsed `/name args` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: String,
}

impl Command {
    /// Parse a command message.
    ///
    /// Telegram may send `/cmd@botname arg1 ...`; the `@botname` suffix is
    /// dropped and the name lowercased. Returns `None` for non-command text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim().to_string();

        let name = first
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if name.is_empty() {
            return None;
        }

        Some(Self { name, args: rest })
    }

    /// The `@botname` a command was explicitly addressed to, if any.
    pub fn addressee(text: &str) -> Option<&str> {
        let first = text.trim().split(char::is_whitespace).next()?;
        let (_, who) = first.split_once('@')?;
        (!who.is_empty()).then_some(who)
    }
}

/// Outgoing "chat action" (typing indicator).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_chat_actions: bool,
    pub max_message_len: usize,
}
