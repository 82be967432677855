use std::time::Duration;

use crate::llm::GeminiConfig;
use crate::retry::RetryPolicy;

/// Process configuration, read once at startup from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub classifier_retry: RetryPolicy,
    pub generator_retry: RetryPolicy,
    /// Length of one `respond_time` unit.
    pub respond_time_unit: Duration,
    pub gemini: GeminiConfig,
    pub database_url: Option<String>,
    /// Snapshot file for the in-memory store; `None` keeps state in memory only.
    pub data_dir: Option<String>,
    pub frontend_url: Option<String>,
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let ms = |name: &str, default: u64| Duration::from_millis(var_or(name, default));
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".into()),
            port: var_or("PORT", 8080),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
            token_ttl: chrono::Duration::minutes(var_or("ACCESS_TOKEN_EXPIRE_MINUTES", 60)),
            classifier_retry: RetryPolicy::new(var_or("CLASSIFIER_MAX_ATTEMPTS", 65), ms("CLASSIFIER_RETRY_DELAY_MS", 1000)),
            generator_retry: RetryPolicy::new(var_or("GENERATOR_MAX_ATTEMPTS", 61), ms("GENERATOR_RETRY_DELAY_MS", 1000)),
            respond_time_unit: ms("RESPOND_TIME_UNIT_MS", 1000),
            gemini: GeminiConfig {
                endpoint: std::env::var("GEMINI_ENDPOINT")
                    .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
                model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash-001".into()),
                api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
            },
            database_url: std::env::var("DATABASE_URL").ok(),
            data_dir: std::env::var("BLOG_DATA_DIR").ok(),
            frontend_url: std::env::var("FRONTEND_URL").ok(),
        }
    }

    /// Problems that must stop the process before it serves traffic.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.jwt_secret.is_empty() {
            problems.push("JWT_SECRET must be set".to_string());
        } else if self.jwt_secret.len() < 32 {
            problems.push("JWT_SECRET must be at least 32 characters long".to_string());
        }
        if self.token_ttl <= chrono::Duration::zero() {
            problems.push("ACCESS_TOKEN_EXPIRE_MINUTES must be positive".to_string());
        }
        problems
    }
}
