use std::sync::Arc;

use gtb_gemini::GeminiClient;

use gtb_core::{config::Config, persona::Persona, session::SessionStore};

#[tokio::main]
async fn main() -> Result<(), gtb_core::Error> {
    gtb_core::logging::init("gtb")?;

    let cfg = Arc::new(Config::load()?);

    let model = Arc::new(GeminiClient::from_config(&cfg)?);
    tracing::info!(model = model.model(), chunk_size = cfg.chunk_size.get(), "starting");

    // One store for the whole process; sessions vanish on restart.
    let store = Arc::new(SessionStore::new(Persona::new(cfg.bot_name.clone()), model));
    tracing::info!(persona = store.persona().name(), "session store ready");

    gtb_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| gtb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
