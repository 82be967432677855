#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use blogmod::auth::TokenIssuer;
use blogmod::autorespond::{AutoResponseGenerator, AutoResponseScheduler, JobRunner};
use blogmod::llm::{ModelError, TextModel};
use blogmod::models::*;
use blogmod::moderation::{ModerationGateway, ToxicityClassifier};
use blogmod::repo::inmem::InMemRepo;
use blogmod::repo::{PostRepo, Repo, UserRepo};
use blogmod::retry::RetryPolicy;
use blogmod::BlogService;

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";
/// Texts containing this word are classified as toxic.
pub const TOXIC_WORD: &str = "idiot";
/// Unit used for `respond_time` in tests.
pub const UNIT: Duration = Duration::from_millis(20);

/// Classifier double: answers "True" when the prompt contains [`TOXIC_WORD`].
/// Texts containing "throttle" always come back as quota errors.
pub struct KeywordClassifier;

#[async_trait]
impl TextModel for KeywordClassifier {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        if prompt.contains("throttle") {
            return Err(ModelError::ResourceExhausted);
        }
        Ok(if prompt.contains(TOXIC_WORD) { "True" } else { "False" }.to_string())
    }
}

/// Generator double replaying a fixed script; once the script runs out every
/// call returns `fallback`.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    fallback: Result<String, ModelError>,
    pub calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn replying(text: &str) -> Self {
        Self { script: Mutex::new(VecDeque::new()), fallback: Ok(text.to_string()), calls: AtomicU32::new(0) }
    }

    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(ModelError::ResourceExhausted),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_script(mut self, script: Vec<Result<String, ModelError>>) -> Self {
        self.script = Mutex::new(script.into());
        self
    }
}

#[async_trait]
impl TextModel for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(r) => r,
            None => self.fallback.clone(),
        }
    }
}

pub fn issuer() -> TokenIssuer {
    TokenIssuer::new(SECRET, chrono::Duration::minutes(5))
}

pub fn bearer(user_id: Id) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", issuer().issue(user_id).unwrap()))
}

pub struct Harness {
    pub repo: InMemRepo,
    pub blog: BlogService,
}

/// Wire a service over an in-memory store. Must be called inside a tokio
/// runtime since it starts the auto-response worker.
pub fn harness_with(generator: Arc<dyn TextModel>) -> Harness {
    let repo = InMemRepo::new();
    let shared: Arc<dyn Repo> = Arc::new(repo.clone());
    let fast = RetryPolicy::new(3, Duration::from_millis(1));
    let gateway = ModerationGateway::new(ToxicityClassifier::new(Arc::new(KeywordClassifier), fast));
    let runner = JobRunner::new(shared.clone(), AutoResponseGenerator::new(generator, fast));
    let scheduler = AutoResponseScheduler::spawn(runner);
    let blog = BlogService::new(shared, gateway, scheduler, issuer(), UNIT);
    Harness { repo, blog }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(ScriptedGenerator::replying("Thanks for sharing!")))
}

impl Harness {
    /// Inserted straight into the store to skip password hashing.
    pub async fn user(&self, name: &str) -> User {
        self.repo
            .create_user(NewUserRecord { username: name.into(), hashed_password: "unused".into() })
            .await
            .unwrap()
    }

    pub async fn opted_in_user(&self, name: &str, respond_time: i32) -> User {
        let u = self.user(name).await;
        self.blog
            .update_user(u.id, UpdateUser { auto_respond: Some(true), respond_time: Some(respond_time) })
            .await
            .unwrap()
    }

    pub async fn post_by(&self, author_id: Id) -> Post {
        self.repo
            .create_post(PostDraft {
                title: "Hello".into(),
                text: "First post".into(),
                author_id,
                is_blocked: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    pub async fn top_level(&self, author_id: Id, post_id: Id, text: &str) -> Result<CommentView, blogmod::error::ApiError> {
        self.blog
            .create_comment(author_id, NewComment { text: text.into(), post_id, parent_id: None })
            .await
    }

    pub async fn reply(&self, author_id: Id, post_id: Id, parent_id: Id, text: &str) -> Result<CommentView, blogmod::error::ApiError> {
        self.blog
            .create_comment(author_id, NewComment { text: text.into(), post_id, parent_id: Some(parent_id) })
            .await
    }

    pub async fn settle(&self, units: u32) {
        tokio::time::sleep(UNIT * units + Duration::from_millis(100)).await;
    }

    pub async fn user_by_name(&self, name: &str) -> User {
        self.repo.find_user_by_username(name).await.unwrap()
    }
}

/// Generator double that crashes on every call.
pub struct PanickingGenerator;

#[async_trait]
impl TextModel for PanickingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        panic!("text model crashed");
    }
}
