/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the dispatch
/// layer can log failures consistently. Remote model failures are *not*
/// represented here; they travel as [`crate::model::ModelError`] because the
/// user-visible reply depends on which kind of failure occurred.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
