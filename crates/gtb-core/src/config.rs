use std::{env, fs, num::NonZeroUsize, path::Path, time::Duration};

use crate::{errors::Error, model::GenerationSettings, Result};

pub const DEFAULT_BOT_NAME: &str = "Luna";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Telegram caps messages at 4096 chars; stay well under it.
pub const DEFAULT_CHUNK_SIZE: usize = 1900;

pub const DEFAULT_TYPING_INTERVAL_MS: u64 = 4000;

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Secrets
    pub telegram_bot_token: String,
    pub gemini_api_key: String,

    // Persona
    pub bot_name: String,

    // Gemini
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub generation: GenerationSettings,
    pub request_timeout: Duration,

    // Replies
    pub chunk_size: NonZeroUsize,
    pub typing_interval: Duration,
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    ///
    /// Values already set in the environment win over `.env` entries.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = required(&get, "TELEGRAM_BOT_TOKEN")?;
        let gemini_api_key = required(&get, "GEMINI_API_KEY")?;

        let bot_name = get("BOT_NAME")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_BOT_NAME.to_string());

        let gemini_model = get("GEMINI_MODEL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        let gemini_api_base = get("GEMINI_API_BASE")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());

        let defaults = GenerationSettings::default();
        let generation = GenerationSettings {
            temperature: parse(get("GEMINI_TEMPERATURE")).unwrap_or(defaults.temperature),
            top_p: parse(get("GEMINI_TOP_P")).unwrap_or(defaults.top_p),
            top_k: parse(get("GEMINI_TOP_K")).unwrap_or(defaults.top_k),
            max_output_tokens: parse(get("GEMINI_MAX_OUTPUT_TOKENS"))
                .unwrap_or(defaults.max_output_tokens),
        };
        let request_timeout =
            Duration::from_secs(parse(get("GEMINI_TIMEOUT_SECS")).unwrap_or(120));

        // Zero is not a usable bound; fall back to the default rather than refusing to start.
        let chunk_size = parse::<usize>(get("CHUNK_SIZE"))
            .and_then(NonZeroUsize::new)
            .or_else(|| NonZeroUsize::new(DEFAULT_CHUNK_SIZE))
            .ok_or_else(|| Error::Config("chunk size must be positive".to_string()))?;
        // A zero period would make the typing timer panic; treat it like an unset value.
        let typing_interval = Duration::from_millis(
            parse::<u64>(get("TYPING_INTERVAL_MS"))
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_TYPING_INTERVAL_MS),
        );

        Ok(Self {
            telegram_bot_token,
            gemini_api_key,
            bot_name,
            gemini_model,
            gemini_api_base,
            generation,
            request_timeout,
            chunk_size,
            typing_interval,
        })
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn parse<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
    v.and_then(|s| s.trim().parse::<T>().ok())
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
