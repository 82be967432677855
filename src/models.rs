use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

// Never returned by the HTTP layer; Serialize exists for the in-memory snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub hashed_password: String,
    pub auto_respond: bool,
    /// Delay before an auto-response, in scheduler time units.
    pub respond_time: i32,
}

pub const DEFAULT_RESPOND_TIME: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub title: String,
    pub text: String,
    pub author_id: Id,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub text: String,
    pub author_id: Id,
    pub post_id: Id,
    pub parent_id: Option<Id>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A comment with its direct replies attached.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

/// A post with its top-level comments, each carrying direct replies.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<CommentView>,
}

// ---------------- write-side records handed to the store ----------------

#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub username: String,
    pub hashed_password: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserSettings {
    pub auto_respond: Option<bool>,
    pub respond_time: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PostDraft {
    pub title: String,
    pub text: String,
    pub author_id: Id,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostChanges {
    pub title: String,
    pub text: String,
    pub is_blocked: bool,
}

/// Fully moderated comment ready to be committed.
#[derive(Debug, Clone)]
pub struct CommentDraft {
    pub text: String,
    pub author_id: Id,
    pub post_id: Id,
    pub parent_id: Option<Id>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub author_id: Option<Id>,
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CommentFilter {
    pub post_id: Option<Id>,
    pub author_id: Option<Id>,
    pub skip: i64,
    pub limit: i64,
}

// ---------------- request payloads ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub auto_respond: Option<bool>,
    pub respond_time: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub text: String,
    pub post_id: Id,
    pub parent_id: Option<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateComment {
    pub text: Option<String>,
}

// ---------------- responses ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub msg: String,
}

impl MessageResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CommentBreakdown {
    pub date: NaiveDate,
    pub total_comments: i64,
    pub blocked_comments: i64,
}
