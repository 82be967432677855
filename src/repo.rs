use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("{0} not found")] NotFound(&'static str),
    #[error("conflict")] Conflict,
    #[error("reply post id does not match the parent comment's post id")] PostMismatch,
    #[error("storage failure: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUserRecord) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn find_user_by_username(&self, username: &str) -> RepoResult<User>;
    async fn update_user_settings(&self, id: Id, upd: UserSettings) -> RepoResult<User>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, draft: PostDraft) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<Post>>;
    async fn update_post(&self, id: Id, changes: PostChanges) -> RepoResult<Post>;
    /// Removes the post together with every comment attached to it.
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
}

/// The comment forest. Each post owns zero or more trees linked through
/// `parent_id`.
#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Commit a moderated comment. Fails with `NotFound` when the post or the
    /// parent is missing and `PostMismatch` when the parent lives on another
    /// post; the check and the insert are atomic.
    async fn create_comment(&self, draft: CommentDraft) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    /// Direct replies of `parent_id`, oldest first.
    async fn list_replies(&self, parent_id: Id) -> RepoResult<Vec<Comment>>;
    /// Comments without a parent, oldest first, paginated.
    async fn list_top_level(&self, filter: CommentFilter) -> RepoResult<Vec<Comment>>;
    async fn update_comment(&self, id: Id, text: String, is_blocked: bool) -> RepoResult<Comment>;
    /// Deletes the comment and its whole reply subtree. Returns how many rows
    /// were removed.
    async fn delete_comment(&self, id: Id) -> RepoResult<u64>;
}

#[async_trait]
pub trait AnalyticsRepo: Send + Sync {
    /// Per-day comment counts for every day in `[from, to]` that has comments.
    async fn comment_breakdown(&self, from: NaiveDate, to: NaiveDate) -> RepoResult<Vec<CommentBreakdown>>;
}

pub trait Repo: UserRepo + PostRepo + CommentRepo + AnalyticsRepo {}

impl<T> Repo for T where T: UserRepo + PostRepo + CommentRepo + AnalyticsRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;
