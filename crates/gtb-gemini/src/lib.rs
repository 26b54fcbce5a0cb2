//! Gemini adapter (chat replies).
//!
//! Uses the `generateContent` REST endpoint. Gemini has no server-side chat
//! state, so every call carries the full transcript.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gtb_core::{
    config::Config,
    errors::Error,
    model::{GenerationSettings, ModelClient, ModelError, ProviderKind, Role, Turn},
    Result,
};

#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_key: String,
    api_base: String,
    model: String,
    generation: GenerationSettings,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        generation: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::External(format!("gemini http client build: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            api_base: api_base.into(),
            model: model.into(),
            generation,
            http,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.gemini_api_key.clone(),
            cfg.gemini_api_base.clone(),
            cfg.gemini_model.clone(),
            cfg.generation,
            cfg.request_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        let model = self.model.trim_start_matches("models/");
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn generate(&self, history: &[Turn]) -> std::result::Result<String, ModelError> {
        let body = build_request(history, &self.generation);

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Service(format!("gemini request error: {e}")))?;

        let status = resp.status();
        let raw = resp
            .text()
            .await
            .map_err(|e| ModelError::Service(format!("gemini read error: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<GenerateContentResponse>(&raw)
                .ok()
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or_else(|| raw.chars().take(200).collect());
            tracing::warn!(%status, "gemini api error");
            return Err(ModelError::Service(format!(
                "gemini api error ({status}): {message}"
            )));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&raw)
            .map_err(|e| ModelError::Service(format!("gemini json error: {e}")))?;

        interpret_response(parsed)
    }
}

// ============== Wire types ==============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn build_request<'a>(
    history: &'a [Turn],
    generation: &GenerationSettings,
) -> GenerateContentRequest<'a> {
    let contents = history
        .iter()
        .map(|turn| Content {
            role: match turn.role {
                Role::User => "user",
                Role::Model => "model",
            },
            parts: vec![Part { text: &turn.text }],
        })
        .collect();

    GenerateContentRequest {
        contents,
        generation_config: GenerationConfig {
            temperature: generation.temperature,
            top_p: generation.top_p,
            top_k: generation.top_k,
            max_output_tokens: generation.max_output_tokens,
        },
    }
}

/// Finish reasons that still carry a usable answer.
const ACCEPTED_FINISH_REASONS: &[&str] = &["STOP", "MAX_TOKENS", "FINISH_REASON_UNSPECIFIED"];

fn interpret_response(resp: GenerateContentResponse) -> std::result::Result<String, ModelError> {
    if let Some(err) = resp.error {
        return Err(ModelError::Service(format!("gemini api error: {}", err.message)));
    }

    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::ContentRejected { reason });
    }

    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Err(ModelError::Service(
            "gemini returned no candidates".to_string(),
        ));
    };

    if let Some(reason) = candidate.finish_reason {
        if !ACCEPTED_FINISH_REASONS.contains(&reason.as_str()) {
            return Err(ModelError::ContentRejected { reason });
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ModelError::ContentRejected {
            reason: "empty candidate".to_string(),
        });
    }

    Ok(text)
}
