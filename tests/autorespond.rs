#![cfg(feature = "inmem-store")]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;

use blogmod::autorespond::{AutoResponseGenerator, AutoResponseScheduler, JobRunner, JobState, ScheduleError};
use blogmod::error::ApiError;
use blogmod::llm::ModelError;
use blogmod::models::CommentDraft;
use blogmod::repo::{CommentRepo, Repo};
use blogmod::retry::RetryPolicy;

use common::*;

#[tokio::test]
async fn top_level_comment_on_opted_in_post_gets_a_reply() {
    let h = harness();
    let owner = h.opted_in_user("owner", 1).await;
    let reader = h.user("reader").await;
    let post = h.post_by(owner.id).await;

    let c = h.top_level(reader.id, post.id, "Nice write-up").await.unwrap();
    assert_eq!(h.blog.scheduler().state(c.comment.id), Some(JobState::Scheduled));

    h.settle(1).await;

    let replies = h.repo.list_replies(c.comment.id).await.unwrap();
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply.text, "Thanks for sharing!");
    assert_eq!(reply.post_id, post.id);
    assert_eq!(reply.author_id, reader.id);
    assert_eq!(reply.parent_id, Some(c.comment.id));
    assert!(!reply.is_blocked);
    assert_eq!(
        h.blog.scheduler().state(c.comment.id),
        Some(JobState::Executed { reply_id: reply.id })
    );
}

#[tokio::test]
async fn opted_out_author_gets_no_reply() {
    let h = harness();
    let owner = h.user("owner").await;
    let post = h.post_by(owner.id).await;

    let c = h.top_level(owner.id, post.id, "hello").await.unwrap();
    h.settle(1).await;

    assert_eq!(h.blog.scheduler().state(c.comment.id), None);
    assert!(h.repo.list_replies(c.comment.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn commenter_settings_do_not_matter() {
    let h = harness();
    let owner = h.user("owner").await;
    let reader = h.opted_in_user("reader", 1).await;
    let post = h.post_by(owner.id).await;

    let c = h.top_level(reader.id, post.id, "hello").await.unwrap();
    assert_eq!(h.blog.scheduler().state(c.comment.id), None);
}

#[tokio::test]
async fn replies_and_blocked_comments_are_never_scheduled() {
    let h = harness();
    let owner = h.opted_in_user("owner", 1).await;
    let post = h.post_by(owner.id).await;

    let root = h.top_level(owner.id, post.id, "root").await.unwrap();
    let reply = h.reply(owner.id, post.id, root.comment.id, "a reply").await.unwrap();
    assert_eq!(h.blog.scheduler().state(reply.comment.id), None);

    let err = h.top_level(owner.id, post.id, &format!("you {TOXIC_WORD}")).await.unwrap_err();
    let id = match err {
        ApiError::ContentBlocked { id, .. } => id,
        other => panic!("expected ContentBlocked, got {other:?}"),
    };
    assert_eq!(h.blog.scheduler().state(id), None);

    h.settle(1).await;
    // only the scheduled job for `root` produced anything
    assert!(h.repo.list_replies(reply.comment.id).await.unwrap().is_empty());
    assert!(h.repo.list_replies(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn source_deleted_before_run_is_a_no_op() {
    let h = harness();
    let owner = h.opted_in_user("owner", 5).await;
    let post = h.post_by(owner.id).await;

    let c = h.top_level(owner.id, post.id, "short lived").await.unwrap();
    h.blog.delete_comment(c.comment.id, owner.id).await.unwrap();

    h.settle(5).await;
    assert_eq!(h.blog.scheduler().state(c.comment.id), Some(JobState::SkippedMissing));
    let remaining = h.blog.get_post(post.id).await.unwrap();
    assert!(remaining.comments.is_empty());
}

#[tokio::test]
async fn exhausted_generator_records_failure_and_writes_nothing() {
    let generator = Arc::new(ScriptedGenerator::failing());
    let h = harness_with(generator.clone());
    let owner = h.opted_in_user("owner", 1).await;
    let post = h.post_by(owner.id).await;

    let c = h.top_level(owner.id, post.id, "anyone there?").await.unwrap();
    h.settle(1).await;

    assert_eq!(h.blog.scheduler().state(c.comment.id), Some(JobState::FailedGeneration));
    // harness retry budget is three attempts
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    assert!(h.repo.list_replies(c.comment.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_generation_is_retried() {
    let generator = Arc::new(
        ScriptedGenerator::replying("Glad you liked it.")
            .with_script(vec![Ok("   ".into()), Err(ModelError::ResourceExhausted)]),
    );
    let h = harness_with(generator.clone());
    let owner = h.opted_in_user("owner", 1).await;
    let post = h.post_by(owner.id).await;

    let c = h.top_level(owner.id, post.id, "great").await.unwrap();
    h.settle(1).await;

    let replies = h.repo.list_replies(c.comment.id).await.unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].text, "Glad you liked it.");
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn one_job_per_comment() {
    let h = harness();
    let owner = h.opted_in_user("owner", 50).await;
    let post = h.post_by(owner.id).await;
    let c = h.top_level(owner.id, post.id, "hi").await.unwrap();

    let again = h.blog.scheduler().schedule(c.comment.id, UNIT);
    assert_eq!(again, Err(ScheduleError::AlreadyScheduled(c.comment.id)));
}

#[tokio::test]
async fn jobs_run_in_deadline_order() {
    let h = harness();
    let slow_owner = h.opted_in_user("slow", 20).await;
    let fast_owner = h.opted_in_user("fast", 1).await;
    let slow_post = h.post_by(slow_owner.id).await;
    let fast_post = h.post_by(fast_owner.id).await;

    let slow = h.top_level(slow_owner.id, slow_post.id, "first in").await.unwrap();
    let fast = h.top_level(fast_owner.id, fast_post.id, "second in").await.unwrap();

    h.settle(2).await;
    assert!(matches!(h.blog.scheduler().state(fast.comment.id), Some(JobState::Executed { .. })));
    assert_eq!(h.blog.scheduler().state(slow.comment.id), Some(JobState::Scheduled));

    h.settle(20).await;
    assert!(matches!(h.blog.scheduler().state(slow.comment.id), Some(JobState::Executed { .. })));
}

#[tokio::test]
async fn panicking_model_records_failure() {
    let h = harness_with(Arc::new(PanickingGenerator));
    let owner = h.opted_in_user("owner", 1).await;
    let post = h.post_by(owner.id).await;

    let c = h.top_level(owner.id, post.id, "still there?").await.unwrap();
    h.settle(1).await;

    assert_eq!(h.blog.scheduler().state(c.comment.id), Some(JobState::FailedGeneration));
    assert!(h.repo.list_replies(c.comment.id).await.unwrap().is_empty());

    // the worker keeps going after a crashed job
    let next = h.top_level(owner.id, post.id, "and now?").await.unwrap();
    h.settle(1).await;
    assert_eq!(h.blog.scheduler().state(next.comment.id), Some(JobState::FailedGeneration));
}

#[tokio::test]
async fn finished_jobs_are_evicted_past_retention() {
    let h = harness();
    let u = h.user("u").await;
    let post = h.post_by(u.id).await;
    let shared: Arc<dyn Repo> = Arc::new(h.repo.clone());
    let generator = AutoResponseGenerator::new(
        Arc::new(ScriptedGenerator::replying("ok")),
        RetryPolicy::new(1, UNIT),
    );
    let scheduler = AutoResponseScheduler::with_retention(JobRunner::new(shared, generator), 2);

    let mut ids = Vec::new();
    for n in 0..3u32 {
        let c = h
            .repo
            .create_comment(CommentDraft {
                text: format!("c{n}"),
                author_id: u.id,
                post_id: post.id,
                parent_id: None,
                is_blocked: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        scheduler.schedule(c.id, UNIT * (2 * n)).unwrap();
        ids.push(c.id);
    }
    h.settle(5).await;

    // every job ran, only the two most recent outcomes are remembered
    for id in &ids {
        assert_eq!(h.repo.list_replies(*id).await.unwrap().len(), 1);
    }
    assert_eq!(scheduler.state(ids[0]), None);
    assert!(matches!(scheduler.state(ids[1]), Some(JobState::Executed { .. })));
    assert!(matches!(scheduler.state(ids[2]), Some(JobState::Executed { .. })));
}
