use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Quota / rate-limit signal from the provider. Retryable.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// The model answered but produced nothing usable. Retryable where the
    /// caller opts into it.
    #[error("empty model response")]
    EmptyResponse,
    /// Retry budget spent.
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("model call failed: {0}")]
    Upstream(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::ResourceExhausted | ModelError::EmptyResponse)
    }
}

/// A text-in, text-out generative model.
///
/// Returns the text of the first part of the first candidate, or an empty
/// string when the model replied without content.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

/// Google Generative Language `generateContent` REST client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Self {
        Self { http: reqwest::Client::new(), cfg }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.cfg.endpoint.trim_end_matches('/'),
            self.cfg.model
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<PartIn<'a>>,
}

#[derive(Serialize)]
struct PartIn<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartOut>,
}

#[derive(Deserialize)]
struct PartOut {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

fn first_text(resp: GenerateResponse) -> String {
    resp.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .map(|p| p.text)
        .unwrap_or_default()
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let body = GenerateRequest {
            contents: vec![Content { role: "user", parts: vec![PartIn { text: prompt }] }],
        };
        let resp = self
            .http
            .post(self.url())
            .query(&[("key", self.cfg.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Upstream(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            debug!("model endpoint returned 429");
            return Err(ModelError::ResourceExhausted);
        }
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&raw) {
                if env.error.status == "RESOURCE_EXHAUSTED" {
                    return Err(ModelError::ResourceExhausted);
                }
                warn!(%status, message = %env.error.message, "model call rejected");
                return Err(ModelError::Upstream(format!("{status}: {}", env.error.message)));
            }
            warn!(%status, "model call rejected");
            return Err(ModelError::Upstream(status.to_string()));
        }

        let parsed = resp
            .json::<GenerateResponse>()
            .await
            .map_err(|e| ModelError::Upstream(e.to_string()))?;
        Ok(first_text(parsed))
    }
}
