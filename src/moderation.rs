use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::{ModelError, TextModel};
use crate::retry::{with_retry, RetryPolicy};

const TOXICITY_PROMPT: &str = "Analyze the following text in any language and return 'true' if the text could be offensive or contains harmful language in any way, otherwise return 'false':\n";

/// Interpret a raw classifier answer. Returns `true` when the text must be
/// blocked.
///
/// Only an explicit "false" on the first line lets content through; empty or
/// unparseable output blocks.
pub fn parse_verdict(raw: &str) -> bool {
    let first = raw.trim().lines().next().unwrap_or("").trim().to_lowercase();
    !first.contains("false")
}

#[derive(Clone)]
pub struct ToxicityClassifier {
    model: Arc<dyn TextModel>,
    retry: RetryPolicy,
}

impl ToxicityClassifier {
    pub fn new(model: Arc<dyn TextModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// `Ok(true)` = toxic. Rate limiting is retried within the budget;
    /// anything else from the model is returned as is.
    pub async fn classify(&self, text: &str) -> Result<bool, ModelError> {
        let prompt = format!("{TOXICITY_PROMPT}{text}");
        let (model, prompt) = (&self.model, prompt.as_str());
        let raw = with_retry(&self.retry, move || model.generate(prompt)).await?;
        let blocked = parse_verdict(&raw);
        debug!(blocked, verdict = %raw.trim(), "toxicity verdict");
        Ok(blocked)
    }
}

/// Synchronous pre-commit gate for every piece of user-authored text.
#[derive(Clone)]
pub struct ModerationGateway {
    classifier: ToxicityClassifier,
}

impl ModerationGateway {
    pub fn new(classifier: ToxicityClassifier) -> Self {
        Self { classifier }
    }

    pub async fn screen(&self, text: &str) -> Result<bool, ModelError> {
        let result = self.classifier.classify(text).await;
        let outcome = match &result {
            Ok(true) => "blocked",
            Ok(false) => "allowed",
            Err(ModelError::RateLimited { .. }) => "rate_limited",
            Err(_) => "failed",
        };
        metrics::increment_counter!("moderation_screened_total", "outcome" => outcome);
        if let Err(e) = &result {
            warn!(error = %e, "moderation screening failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted(Mutex<VecDeque<Result<String, ModelError>>>);

    impl Scripted {
        fn new(script: Vec<Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(script.into())))
        }
        fn remaining(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextModel for Scripted {
        async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
            self.0.lock().unwrap().pop_front().unwrap_or(Err(ModelError::ResourceExhausted))
        }
    }

    fn classifier(model: Arc<Scripted>, attempts: u32) -> ToxicityClassifier {
        ToxicityClassifier::new(model, RetryPolicy::new(attempts, Duration::from_millis(1)))
    }

    #[test]
    fn verdict_parsing_fails_closed() {
        assert!(!parse_verdict("false"));
        assert!(!parse_verdict("FALSE\n"));
        assert!(!parse_verdict("  False. The text is harmless."));
        assert!(parse_verdict("true"));
        assert!(parse_verdict(""));
        assert!(parse_verdict("   \n"));
        assert!(parse_verdict("I cannot decide"));
        // only the first line counts
        assert!(parse_verdict("true\nfalse"));
    }

    #[tokio::test]
    async fn retries_through_rate_limiting() {
        let model = Scripted::new(vec![
            Err(ModelError::ResourceExhausted),
            Err(ModelError::ResourceExhausted),
            Ok("false".into()),
        ]);
        let c = classifier(model.clone(), 5);
        assert!(!c.classify("hello there").await.unwrap());
        assert_eq!(model.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_budget_is_rate_limited() {
        let model = Scripted::new(vec![]);
        let gateway = ModerationGateway::new(classifier(model, 3));
        let err = gateway.screen("anything").await.unwrap_err();
        assert!(matches!(err, ModelError::RateLimited { attempts: 3 }));
    }

    #[tokio::test]
    async fn empty_answer_blocks() {
        let model = Scripted::new(vec![Ok(String::new())]);
        let gateway = ModerationGateway::new(classifier(model, 3));
        assert!(gateway.screen("hm").await.unwrap());
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let model = Scripted::new(vec![Err(ModelError::Upstream("500".into())), Ok("false".into())]);
        let c = classifier(model.clone(), 5);
        assert!(matches!(c.classify("x").await, Err(ModelError::Upstream(_))));
        assert_eq!(model.remaining(), 1);
    }
}
