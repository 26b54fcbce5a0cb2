//! Telegram update handlers.
//!
//! Each handler is a small adapter that turns a Telegram update into the core's
//! message model and hands it to the dispatcher.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use gtb_core::dispatch::DispatchOutcome;

use crate::router::AppState;

mod text;

pub use text::to_inbound;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Only text messages are relayed; stickers, photos, joins etc. fall through.
    let Some(inbound) = to_inbound(&msg, &state.me) else {
        return Ok(());
    };

    match state.dispatcher.handle_message(&inbound).await {
        Ok(DispatchOutcome::Ignored) => {}
        Ok(outcome) => {
            tracing::debug!(user = %inbound.author, chat = inbound.message.chat_id.0, ?outcome, "handled message");
        }
        Err(e) => {
            tracing::error!(user = %inbound.author, error = %e, "failed to deliver reply");
        }
    }

    Ok(())
}
