//! Conversation dispatch: one inbound message in, zero or more replies out.
//!
//! The flow for a passive (non-command) message is:
//! resolve (drop our own and other bots' messages) → address check (mention or
//! private chat) → extract (strip the mention, substitute a greeting when
//! nothing is left) → session → remote call → chunked reply, or exactly one
//! error reply when the remote call fails.
//!
//! Commands skip the address check: `/chat`, `/reset`, `/commands`.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use regex::Regex;
use tokio::sync::oneshot;

use crate::{
    chunking::ResponseChunker,
    config::DEFAULT_TYPING_INTERVAL_MS,
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Command, InboundMessage},
    },
    model::ModelError,
    session::SessionStore,
    Result,
};

pub const REPHRASE_PROMPT: &str = "I need to rephrase that. Could you ask your question again?";
pub const CHAT_USAGE: &str = "Usage: /chat [message]";

/// Terminal state of one dispatched message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was sent.
    Ignored,
    /// A model reply (or command response) went out as `chunks` messages.
    Replied { chunks: usize },
    /// The remote call failed; exactly one error reply went out.
    RepliedError,
}

pub struct Dispatcher {
    store: Arc<SessionStore>,
    messenger: Arc<dyn MessagingPort>,
    chunker: ResponseChunker,
    typing_interval: Duration,
    bot_username: String,
    mention: Option<Regex>,
}

impl Dispatcher {
    /// The chunker is clamped to half the messenger's `max_message_len`: Telegram
    /// measures that limit in UTF-16 code units, and one `char` can take two.
    pub fn new(
        store: Arc<SessionStore>,
        messenger: Arc<dyn MessagingPort>,
        chunker: ResponseChunker,
        typing_interval: Duration,
        bot_username: impl Into<String>,
    ) -> Self {
        let bot_username = bot_username.into();
        let platform_limit = messenger.capabilities().max_message_len / 2;
        let chunker = match NonZeroUsize::new(platform_limit) {
            Some(limit) => chunker.clamped(limit),
            None => chunker,
        };
        let typing_interval = if typing_interval.is_zero() {
            Duration::from_millis(DEFAULT_TYPING_INTERVAL_MS)
        } else {
            typing_interval
        };
        let mention = (!bot_username.is_empty())
            .then(|| Regex::new(&format!(r"(?i)@{}\b", regex::escape(&bot_username))).ok())
            .flatten();
        Self {
            store,
            messenger,
            chunker,
            typing_interval,
            bot_username,
            mention,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn chunker(&self) -> ResponseChunker {
        self.chunker
    }

    /// Handle one inbound message end to end.
    ///
    /// Model failures are answered in chat and reported as
    /// [`DispatchOutcome::RepliedError`]; only outbound send failures surface
    /// as `Err`.
    pub async fn handle_message(&self, msg: &InboundMessage) -> Result<DispatchOutcome> {
        if msg.is_self || msg.is_bot_author {
            return Ok(DispatchOutcome::Ignored);
        }

        if let Some(cmd) = Command::parse(&msg.text) {
            if let Some(who) = Command::addressee(&msg.text) {
                if !who.eq_ignore_ascii_case(&self.bot_username) {
                    return Ok(DispatchOutcome::Ignored);
                }
            }
            return self.handle_command(msg, &cmd).await;
        }

        if !(msg.mentions_bot || msg.is_private) {
            return Ok(DispatchOutcome::Ignored);
        }

        let content = self.strip_mention(&msg.text);
        let content = if content.is_empty() {
            self.store.persona().greeting_prompt()
        } else {
            content
        };
        self.converse(msg, &content).await
    }

    pub async fn handle_command(
        &self,
        msg: &InboundMessage,
        cmd: &Command,
    ) -> Result<DispatchOutcome> {
        match cmd.name.as_str() {
            "chat" => {
                if cmd.args.trim().is_empty() {
                    return self.reply_text(msg.message, CHAT_USAGE).await;
                }
                self.converse(msg, cmd.args.trim()).await
            }
            "reset" => {
                let had_session = self.store.exists(msg.author).await;
                self.store.reset(msg.author).await;
                let sessions = self.store.len().await;
                tracing::info!(
                    user = %msg.author,
                    username = msg.username.as_deref().unwrap_or("unknown"),
                    had_session,
                    sessions,
                    "chat session reset"
                );
                let ack = self.store.persona().reset_ack(had_session);
                self.reply_text(msg.message, &ack).await
            }
            "commands" | "help" | "start" => {
                let help = self.store.persona().help_text();
                self.reply_text(msg.message, &help).await
            }
            _ => Ok(DispatchOutcome::Ignored),
        }
    }

    /// Session resolve → remote call → chunked reply (or one error reply).
    async fn converse(&self, msg: &InboundMessage, content: &str) -> Result<DispatchOutcome> {
        let session = self.store.get_or_create(msg.author).await;

        let typing = self.start_typing(msg.message.chat_id);
        let result = session.send(content).await;
        drop(typing);

        match result {
            Ok(text) => {
                let chunks = self.reply_chunked(msg.message, &text).await?;
                if chunks == 0 {
                    tracing::warn!(user = %msg.author, "model returned an empty reply");
                }
                tracing::info!(
                    user = %session.user(),
                    username = msg.username.as_deref().unwrap_or("unknown"),
                    chunks,
                    "replied"
                );
                Ok(DispatchOutcome::Replied { chunks })
            }
            Err(err) => {
                tracing::warn!(user = %session.user(), error = %err, "model call failed");
                let text = self.error_reply(&err);
                self.messenger.reply(msg.message, &text).await?;
                Ok(DispatchOutcome::RepliedError)
            }
        }
    }

    async fn reply_text(&self, to: MessageRef, text: &str) -> Result<DispatchOutcome> {
        let chunks = self.reply_chunked(to, text).await?;
        Ok(DispatchOutcome::Replied { chunks })
    }

    /// Send every chunk of `text`, in order. Stops at the first failed send.
    async fn reply_chunked(&self, to: MessageRef, text: &str) -> Result<usize> {
        let mut sent = 0;
        for chunk in self.chunker.split(text) {
            self.messenger.reply(to, chunk).await?;
            sent += 1;
        }
        Ok(sent)
    }

    fn error_reply(&self, err: &ModelError) -> String {
        let text = match err {
            ModelError::ContentRejected { .. } => REPHRASE_PROMPT.to_string(),
            ModelError::Service(desc) => format!("An error occurred: {desc}"),
        };
        truncate_chars(&text, self.chunker.max_chunk_size())
    }

    fn strip_mention(&self, text: &str) -> String {
        match &self.mention {
            Some(re) => re.replace_all(text, "").trim().to_string(),
            None => text.trim().to_string(),
        }
    }

    fn start_typing(&self, chat_id: ChatId) -> Option<TypingIndicator> {
        if !self.messenger.capabilities().supports_chat_actions {
            return None;
        }
        Some(TypingIndicator::start(
            self.messenger.clone(),
            chat_id,
            self.typing_interval,
        ))
    }
}

/// Keeps a typing indicator alive until dropped.
struct TypingIndicator {
    stop: Option<oneshot::Sender<()>>,
}

impl TypingIndicator {
    fn start(messenger: Arc<dyn MessagingPort>, chat_id: ChatId, every: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = messenger.send_chat_action(chat_id, ChatAction::Typing).await {
                            tracing::debug!(error = %e, "typing indicator failed");
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });
        Self {
            stop: Some(stop_tx),
        }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

/// Cut `s` to at most `max` chars, marking the cut with `...` when there is room.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{MessageId, UserId},
        errors::Error,
        messaging::types::MessagingCapabilities,
        model::{ModelClient, ProviderKind, Turn},
        persona::Persona,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;

    /// Replays scripted results and records every history it was sent.
    #[derive(Default)]
    struct FakeModel {
        script: Mutex<VecDeque<std::result::Result<String, ModelError>>>,
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    impl FakeModel {
        fn scripted(results: Vec<std::result::Result<String, ModelError>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last_prompt(&self) -> Option<String> {
            self.seen
                .lock()
                .unwrap()
                .last()
                .and_then(|h| h.last())
                .map(|t| t.text.clone())
        }
    }

    #[async_trait]
    impl ModelClient for FakeModel {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Fake
        }

        async fn generate(&self, history: &[Turn]) -> std::result::Result<String, ModelError> {
            self.seen.lock().unwrap().push(history.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeMessenger {
        replies: Mutex<Vec<(MessageRef, String)>>,
        fail_sends: bool,
        /// Overrides the advertised message limit (4096 when zero).
        max_message_len: usize,
    }

    impl FakeMessenger {
        fn sent(&self) -> Vec<(MessageRef, String)> {
            self.replies.lock().unwrap().clone()
        }

        fn texts(&self) -> Vec<String> {
            self.sent().into_iter().map(|(_, t)| t).collect()
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_chat_actions: true,
                max_message_len: if self.max_message_len == 0 {
                    4096
                } else {
                    self.max_message_len
                },
            }
        }

        async fn reply(&self, to: MessageRef, text: &str) -> Result<MessageRef> {
            if self.fail_sends {
                return Err(Error::External("telegram error: boom".to_string()));
            }
            let mut replies = self.replies.lock().unwrap();
            replies.push((to, text.to_string()));
            Ok(MessageRef {
                chat_id: to.chat_id,
                message_id: MessageId(1000 + replies.len() as i32),
            })
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        model: Arc<FakeModel>,
        messenger: Arc<FakeMessenger>,
    }

    fn harness_with(model: FakeModel, messenger: FakeMessenger, max_chunk: usize) -> Harness {
        let model = Arc::new(model);
        let messenger = Arc::new(messenger);
        let store = Arc::new(SessionStore::new(Persona::new("Luna"), model.clone()));
        let dispatcher = Dispatcher::new(
            store,
            messenger.clone(),
            ResponseChunker::new(NonZeroUsize::new(max_chunk).unwrap()),
            Duration::from_millis(50),
            "luna_bot",
        );
        Harness {
            dispatcher,
            model,
            messenger,
        }
    }

    fn harness(results: Vec<std::result::Result<String, ModelError>>) -> Harness {
        harness_with(FakeModel::scripted(results), FakeMessenger::default(), 1900)
    }

    fn group_msg(text: &str) -> InboundMessage {
        InboundMessage {
            message: MessageRef {
                chat_id: ChatId(-100),
                message_id: MessageId(10),
            },
            author: UserId(42),
            username: Some("alice".to_string()),
            text: text.to_string(),
            is_self: false,
            is_bot_author: false,
            mentions_bot: text.to_lowercase().contains("@luna_bot"),
            is_private: false,
        }
    }

    fn private_msg(text: &str) -> InboundMessage {
        InboundMessage {
            message: MessageRef {
                chat_id: ChatId(42),
                message_id: MessageId(11),
            },
            is_private: true,
            ..group_msg(text)
        }
    }

    #[tokio::test]
    async fn chat_command_replies_with_model_text() {
        let h = harness(vec![Ok("hi there!".to_string())]);
        let msg = group_msg("/chat hello");

        let out = h.dispatcher.handle_message(&msg).await.unwrap();
        assert_eq!(out, DispatchOutcome::Replied { chunks: 1 });
        assert_eq!(h.messenger.sent(), vec![(msg.message, "hi there!".to_string())]);

        let seen = h.model.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 3);
        assert_eq!(seen[0][..2], Persona::new("Luna").seed()[..]);
        assert_eq!(seen[0][2], Turn::user("hello"));

        let session = h.dispatcher.store().get_or_create(UserId(42)).await;
        assert_eq!(session.turn_count().await, 4);
    }

    #[tokio::test]
    async fn own_and_bot_messages_are_ignored() {
        let h = harness(vec![]);
        let mut mine = group_msg("@luna_bot hello");
        mine.is_self = true;
        let mut other_bot = private_msg("/chat hello");
        other_bot.is_bot_author = true;

        for msg in [mine, other_bot] {
            let out = h.dispatcher.handle_message(&msg).await.unwrap();
            assert_eq!(out, DispatchOutcome::Ignored);
        }
        assert!(h.messenger.sent().is_empty());
        assert_eq!(h.model.calls(), 0);
        assert!(h.dispatcher.store().is_empty().await);
    }

    #[tokio::test]
    async fn unaddressed_group_chatter_is_ignored() {
        let h = harness(vec![]);
        let out = h
            .dispatcher
            .handle_message(&group_msg("just talking among ourselves"))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::Ignored);
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn mention_is_stripped_before_forwarding() {
        let h = harness(vec![Ok("sure".to_string())]);
        h.dispatcher
            .handle_message(&group_msg("@Luna_Bot what's up?"))
            .await
            .unwrap();
        assert_eq!(h.model.last_prompt().as_deref(), Some("what's up?"));
    }

    #[tokio::test]
    async fn bare_mention_sends_greeting_prompt() {
        let h = harness(vec![Ok("hello!".to_string())]);
        let out = h
            .dispatcher
            .handle_message(&group_msg("  @luna_bot  "))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::Replied { chunks: 1 });
        assert_eq!(
            h.model.last_prompt().as_deref(),
            Some("Hey! I'm Luna! How can I help you?")
        );
    }

    #[tokio::test]
    async fn private_messages_need_no_mention() {
        let h = harness(vec![Ok("hey".to_string())]);
        let out = h
            .dispatcher
            .handle_message(&private_msg("how are you"))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::Replied { chunks: 1 });
        assert_eq!(h.model.last_prompt().as_deref(), Some("how are you"));
    }

    #[tokio::test]
    async fn long_reply_is_sent_in_ordered_chunks() {
        let reply = format!("{}{}{}", "a".repeat(1900), "b".repeat(1900), "c".repeat(1200));
        let h = harness(vec![Ok(reply.clone())]);
        let msg = private_msg("tell me everything");

        let out = h.dispatcher.handle_message(&msg).await.unwrap();
        assert_eq!(out, DispatchOutcome::Replied { chunks: 3 });

        let texts = h.messenger.texts();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0], "a".repeat(1900));
        assert_eq!(texts[1], "b".repeat(1900));
        assert_eq!(texts[2], "c".repeat(1200));
        assert_eq!(texts.concat(), reply);
        assert!(h.messenger.sent().iter().all(|(to, _)| *to == msg.message));
    }

    #[tokio::test]
    async fn rejection_sends_one_rephrase_reply_and_keeps_session() {
        let h = harness(vec![
            Ok("first answer".to_string()),
            Err(ModelError::ContentRejected {
                reason: "SAFETY".to_string(),
            }),
        ]);
        let store = h.dispatcher.store().clone();

        h.dispatcher
            .handle_message(&private_msg("hello"))
            .await
            .unwrap();
        let before = store.get_or_create(UserId(42)).await;
        let transcript_before = before.transcript().await;

        let out = h
            .dispatcher
            .handle_message(&private_msg("something rejected"))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::RepliedError);
        assert_eq!(
            h.messenger.texts(),
            vec!["first answer".to_string(), REPHRASE_PROMPT.to_string()]
        );

        let after = store.get_or_create(UserId(42)).await;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.transcript().await, transcript_before);
    }

    #[tokio::test]
    async fn service_error_is_echoed_once() {
        let h = harness(vec![Err(ModelError::Service(
            "gemini request error: timed out".to_string(),
        ))]);
        let out = h
            .dispatcher
            .handle_message(&group_msg("/chat hi"))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::RepliedError);
        assert_eq!(
            h.messenger.texts(),
            vec!["An error occurred: gemini request error: timed out".to_string()]
        );
    }

    #[tokio::test]
    async fn long_error_still_fits_one_chunk() {
        let h = harness_with(
            FakeModel::scripted(vec![Err(ModelError::Service("x".repeat(500)))]),
            FakeMessenger::default(),
            40,
        );
        let out = h
            .dispatcher
            .handle_message(&private_msg("hi"))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::RepliedError);
        let texts = h.messenger.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].chars().count(), 40);
        assert!(texts[0].starts_with("An error occurred: "));
        assert!(texts[0].ends_with("..."));
    }

    #[tokio::test]
    async fn reset_acknowledgment_depends_on_prior_session() {
        let h = harness(vec![Ok("noted".to_string())]);

        h.dispatcher
            .handle_message(&group_msg("/reset"))
            .await
            .unwrap();
        h.dispatcher
            .handle_message(&group_msg("/chat remember me"))
            .await
            .unwrap();
        h.dispatcher
            .handle_message(&group_msg("/reset@luna_bot"))
            .await
            .unwrap();

        let texts = h.messenger.texts();
        assert_eq!(
            texts[0],
            "Hi! I'm Luna. No active chat session found, but I'm ready to chat!"
        );
        assert_eq!(texts[1], "noted");
        assert_eq!(texts[2], "Hi! I'm Luna. Our chat history has been reset!");

        let session = h.dispatcher.store().get_or_create(UserId(42)).await;
        assert_eq!(
            session.transcript().await,
            Persona::new("Luna").seed().to_vec()
        );
    }

    #[tokio::test]
    async fn help_commands_reply_with_usage() {
        let h = harness(vec![]);
        for cmd in ["/commands", "/help", "/start"] {
            let out = h.dispatcher.handle_message(&group_msg(cmd)).await.unwrap();
            assert_eq!(out, DispatchOutcome::Replied { chunks: 1 });
        }
        let texts = h.messenger.texts();
        assert_eq!(texts.len(), 3);
        assert!(texts.iter().all(|t| t == &Persona::new("Luna").help_text()));
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn chat_without_message_gets_usage() {
        let h = harness(vec![]);
        let out = h
            .dispatcher
            .handle_message(&group_msg("/chat   "))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::Replied { chunks: 1 });
        assert_eq!(h.messenger.texts(), vec![CHAT_USAGE.to_string()]);
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn foreign_and_unknown_commands_are_ignored() {
        let h = harness(vec![]);
        for text in ["/chat@other_bot hi", "/reset@other_bot", "/weather paris"] {
            let out = h.dispatcher.handle_message(&group_msg(text)).await.unwrap();
            assert_eq!(out, DispatchOutcome::Ignored, "{text}");
        }
        assert!(h.messenger.sent().is_empty());
        assert!(h.dispatcher.store().is_empty().await);
    }

    #[tokio::test]
    async fn failed_send_surfaces_as_error() {
        let h = harness_with(
            FakeModel::scripted(vec![Ok("a".repeat(30))]),
            FakeMessenger {
                fail_sends: true,
                ..Default::default()
            },
            10,
        );
        let err = h
            .dispatcher
            .handle_message(&private_msg("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::External(_)));
    }

    #[tokio::test]
    async fn oversized_chunk_setting_is_clamped_to_platform_limit() {
        let h = harness_with(
            FakeModel::scripted(vec![Ok("z".repeat(5000))]),
            FakeMessenger::default(),
            10_000,
        );
        assert_eq!(h.dispatcher.chunker().max_chunk_size(), 2048);

        let out = h
            .dispatcher
            .handle_message(&private_msg("write a lot"))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::Replied { chunks: 3 });
        let texts = h.messenger.texts();
        assert!(texts.iter().all(|t| t.chars().count() <= 2048));
        assert_eq!(texts.concat(), "z".repeat(5000));
    }

    #[tokio::test]
    async fn smaller_platform_limit_wins_over_default_chunk_size() {
        let h = harness_with(
            FakeModel::scripted(vec![]),
            FakeMessenger {
                max_message_len: 1000,
                ..Default::default()
            },
            1900,
        );
        assert_eq!(h.dispatcher.chunker().max_chunk_size(), 500);
    }

    #[tokio::test]
    async fn zero_typing_interval_does_not_break_replies() {
        let model = Arc::new(FakeModel::scripted(vec![Ok("hi".to_string())]));
        let messenger = Arc::new(FakeMessenger::default());
        let store = Arc::new(SessionStore::new(Persona::new("Luna"), model));
        let dispatcher = Dispatcher::new(
            store,
            messenger.clone(),
            ResponseChunker::default(),
            Duration::ZERO,
            "luna_bot",
        );
        assert!(!dispatcher.typing_interval.is_zero());

        let out = dispatcher
            .handle_message(&private_msg("hello"))
            .await
            .unwrap();
        assert_eq!(out, DispatchOutcome::Replied { chunks: 1 });
        assert_eq!(messenger.texts(), vec!["hi".to_string()]);
    }

    #[test]
    fn truncate_chars_respects_bound() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 6), "abc...");
        assert_eq!(truncate_chars("abcdef", 2), "ab");
        assert_eq!(truncate_chars("ééééé", 4), "é...");
    }
}
