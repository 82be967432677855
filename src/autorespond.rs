use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::llm::{ModelError, TextModel};
use crate::models::{CommentDraft, Id};
use crate::repo::{Repo, RepoError};
use crate::retry::{with_retry, RetryPolicy};

const REPLY_PROMPT: &str = "Generate a polite and relevant response to the following comment as if a person is responding. If the comment is personal, provide the most popular or general response. Keep the response 2 or 3 sentences:\n\nComment: ";

#[derive(Clone)]
pub struct AutoResponseGenerator {
    model: Arc<dyn TextModel>,
    retry: RetryPolicy,
}

impl AutoResponseGenerator {
    pub fn new(model: Arc<dyn TextModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Produce a short reply to `source`. Empty answers count as unusable
    /// and consume the same retry budget as rate limiting.
    pub async fn generate(&self, source: &str) -> Result<String, ModelError> {
        let prompt = format!("{REPLY_PROMPT}{source}");
        let (model, prompt) = (&self.model, prompt.as_str());
        with_retry(&self.retry, move || async move {
            let raw = model.generate(prompt).await?;
            let text = raw.trim();
            if text.is_empty() {
                Err(ModelError::EmptyResponse)
            } else {
                Ok(text.to_string())
            }
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoResponseJob {
    pub comment_id: Id,
    pub not_before: Instant,
}

/// Lifecycle of one comment's auto-response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Executed { reply_id: Id },
    SkippedMissing,
    FailedGeneration,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("auto-response already scheduled for comment {0}")]
    AlreadyScheduled(Id),
    #[error("auto-response worker is not running")]
    WorkerGone,
}

/// Executes the body of one auto-response job.
#[derive(Clone)]
pub struct JobRunner {
    repo: Arc<dyn Repo>,
    generator: AutoResponseGenerator,
}

impl JobRunner {
    pub fn new(repo: Arc<dyn Repo>, generator: AutoResponseGenerator) -> Self {
        Self { repo, generator }
    }

    pub async fn run(&self, comment_id: Id) -> JobState {
        let source = match self.repo.get_comment(comment_id).await {
            Ok(c) => c,
            Err(RepoError::NotFound(_)) => {
                debug!(comment_id, "source comment gone, skipping auto-response");
                return JobState::SkippedMissing;
            }
            Err(e) => {
                error!(comment_id, error = %e, "failed to load source comment");
                return JobState::FailedGeneration;
            }
        };

        let text = match self.generator.generate(&source.text).await {
            Ok(t) => t,
            Err(e) => {
                warn!(comment_id, error = %e, "auto-response generation failed");
                return JobState::FailedGeneration;
            }
        };

        // Auto-responses bypass moderation.
        let draft = CommentDraft {
            text,
            author_id: source.author_id,
            post_id: source.post_id,
            parent_id: Some(source.id),
            is_blocked: false,
            created_at: Utc::now(),
        };
        match self.repo.create_comment(draft).await {
            Ok(reply) => {
                info!(comment_id, reply_id = reply.id, "auto-response posted");
                JobState::Executed { reply_id: reply.id }
            }
            Err(RepoError::NotFound(_)) => {
                debug!(comment_id, "source comment deleted while generating");
                JobState::SkippedMissing
            }
            Err(e) => {
                error!(comment_id, error = %e, "failed to store auto-response");
                JobState::FailedGeneration
            }
        }
    }
}

/// How many finished jobs keep their terminal state visible through
/// [`AutoResponseScheduler::state`].
pub const DEFAULT_RETAINED_OUTCOMES: usize = 1024;

/// Per-comment job state. Live jobs stay until they finish; finished jobs are
/// kept in arrival order and evicted once more than `retain` have piled up.
struct JobStates {
    states: DashMap<Id, JobState>,
    finished: Mutex<VecDeque<Id>>,
    retain: usize,
}

impl JobStates {
    fn new(retain: usize) -> Self {
        Self { states: DashMap::new(), finished: Mutex::new(VecDeque::new()), retain }
    }

    fn finish(&self, comment_id: Id, outcome: JobState) {
        let label = match outcome {
            JobState::Executed { .. } => "executed",
            JobState::SkippedMissing => "skipped_missing",
            JobState::FailedGeneration => "failed_generation",
            JobState::Scheduled => "scheduled",
        };
        metrics::increment_counter!("autorespond_jobs_total", "outcome" => label);
        self.states.insert(comment_id, outcome);

        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        finished.push_back(comment_id);
        while finished.len() > self.retain {
            if let Some(old) = finished.pop_front() {
                self.states.remove(&old);
            }
        }
    }
}

/// Handle used by request handlers to enqueue auto-responses to top-level
/// comments. A single worker task owns the pending queue, wakes at the
/// earliest deadline and runs each due job on its own task. Jobs are never
/// retried or cancelled.
#[derive(Clone)]
pub struct AutoResponseScheduler {
    tx: mpsc::UnboundedSender<AutoResponseJob>,
    jobs: Arc<JobStates>,
}

impl AutoResponseScheduler {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(runner: JobRunner) -> Self {
        Self::with_retention(runner, DEFAULT_RETAINED_OUTCOMES)
    }

    /// Like [`spawn`](Self::spawn), remembering at most `retain` finished jobs.
    pub fn with_retention(runner: JobRunner, retain: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let jobs = Arc::new(JobStates::new(retain));
        let worker = Worker {
            rx,
            pending: BinaryHeap::new(),
            runner: Arc::new(runner),
            jobs: jobs.clone(),
        };
        tokio::spawn(worker.run());
        Self { tx, jobs }
    }

    /// Enqueue a one-shot job for `comment_id` due after `delay`.
    pub fn schedule(&self, comment_id: Id, delay: Duration) -> Result<(), ScheduleError> {
        match self.jobs.states.entry(comment_id) {
            Entry::Occupied(_) => return Err(ScheduleError::AlreadyScheduled(comment_id)),
            Entry::Vacant(v) => {
                v.insert(JobState::Scheduled);
            }
        }
        let job = AutoResponseJob { comment_id, not_before: Instant::now() + delay };
        if self.tx.send(job).is_err() {
            self.jobs.states.remove(&comment_id);
            return Err(ScheduleError::WorkerGone);
        }
        debug!(comment_id, delay_ms = delay.as_millis() as u64, "auto-response scheduled");
        Ok(())
    }

    /// `None` for comments never scheduled and for finished jobs that have
    /// been evicted.
    pub fn state(&self, comment_id: Id) -> Option<JobState> {
        self.jobs.states.get(&comment_id).map(|s| *s)
    }
}

struct Worker {
    rx: mpsc::UnboundedReceiver<AutoResponseJob>,
    pending: BinaryHeap<Reverse<(Instant, Id)>>,
    runner: Arc<JobRunner>,
    jobs: Arc<JobStates>,
}

impl Worker {
    async fn run(mut self) {
        let mut accepting = true;
        loop {
            let next_due = self.pending.peek().map(|Reverse((at, _))| *at);
            if !accepting && next_due.is_none() {
                break;
            }
            tokio::select! {
                msg = self.rx.recv(), if accepting => match msg {
                    Some(job) => self.pending.push(Reverse((job.not_before, job.comment_id))),
                    None => accepting = false,
                },
                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    self.dispatch_due();
                }
            }
        }
        debug!("auto-response worker stopped");
    }

    fn dispatch_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, comment_id))) = self.pending.peek().copied() {
            if at > now {
                break;
            }
            self.pending.pop();
            let runner = self.runner.clone();
            let jobs = self.jobs.clone();
            tokio::spawn(async move {
                let job = tokio::spawn(async move { runner.run(comment_id).await });
                let outcome = match job.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(comment_id, error = %e, "auto-response job aborted");
                        JobState::FailedGeneration
                    }
                };
                jobs.finish(comment_id, outcome);
            });
        }
    }
}
