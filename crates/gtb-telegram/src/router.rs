use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher as TgDispatcher,
    dptree,
    prelude::*,
    types::{BotCommand, UserId as TgUserId},
};

use gtb_core::{
    chunking::ResponseChunker,
    config::Config,
    dispatch::Dispatcher,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    session::SessionStore,
};

use crate::handlers;
use crate::TelegramMessenger;

/// Who the bot is, as learned from `getMe` at startup.
#[derive(Clone, Debug)]
pub struct BotIdentity {
    pub id: TgUserId,
    pub username: String,
}

#[derive(Clone)]
pub struct AppState {
    pub me: BotIdentity,
    pub dispatcher: Arc<Dispatcher>,
}

/// Commands published to Telegram's command menu.
pub fn command_menu() -> Vec<BotCommand> {
    vec![
        BotCommand::new("chat", "Chat with me"),
        BotCommand::new("reset", "Reset your chat history"),
        BotCommand::new("commands", "Show available commands"),
    ]
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<SessionStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Without our own id and username we cannot filter self-messages or detect mentions.
    let me = bot.get_me().await?;
    let identity = BotIdentity {
        id: me.id,
        username: me.username().to_string(),
    };
    tracing::info!(
        bot = %cfg.bot_name,
        username = %identity.username,
        model = %cfg.gemini_model,
        "bot is ready"
    );

    match bot.set_my_commands(command_menu()).await {
        Ok(_) => tracing::info!(count = command_menu().len(), "published command menu"),
        Err(e) => tracing::warn!(error = %e, "failed to publish command menu"),
    }

    // Long replies are several sends in a row; throttle to stay under flood limits.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        store,
        messenger,
        ResponseChunker::new(cfg.chunk_size),
        cfg.typing_interval,
        identity.username.clone(),
    ));

    let state = Arc::new(AppState {
        me: identity,
        dispatcher,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    TgDispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}
