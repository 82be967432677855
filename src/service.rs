use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::auth::{hash_password, verify_password, TokenIssuer};
use crate::autorespond::AutoResponseScheduler;
use crate::error::{ApiError, ContentKind};
use crate::models::*;
use crate::moderation::ModerationGateway;
use crate::repo::{Repo, RepoError};

pub type ServiceResult<T> = Result<T, ApiError>;

/// Post and comment orchestration: referential checks, then moderation,
/// then persistence, then auto-response scheduling.
#[derive(Clone)]
pub struct BlogService {
    repo: Arc<dyn Repo>,
    gateway: ModerationGateway,
    scheduler: AutoResponseScheduler,
    tokens: TokenIssuer,
    respond_time_unit: Duration,
}

impl BlogService {
    pub fn new(
        repo: Arc<dyn Repo>,
        gateway: ModerationGateway,
        scheduler: AutoResponseScheduler,
        tokens: TokenIssuer,
        respond_time_unit: Duration,
    ) -> Self {
        Self { repo, gateway, scheduler, tokens, respond_time_unit }
    }

    pub fn scheduler(&self) -> &AutoResponseScheduler {
        &self.scheduler
    }

    // ---------------- users ----------------

    pub async fn register(&self, creds: Credentials) -> ServiceResult<User> {
        if creds.username.trim().is_empty() || creds.password.is_empty() {
            return Err(ApiError::Validation("username and password are required".into()));
        }
        if self.repo.find_user_by_username(&creds.username).await.is_ok() {
            return Err(ApiError::UsernameTaken);
        }
        let password = creds.password;
        let hashed_password = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| {
                error!("password hashing task failed: {e}");
                ApiError::Internal
            })?
            .map_err(|e| {
                error!("password hashing failed: {e}");
                ApiError::Internal
            })?;
        let user = self
            .repo
            .create_user(NewUserRecord { username: creds.username, hashed_password })
            .await?;
        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    pub async fn login(&self, creds: Credentials) -> ServiceResult<String> {
        let user = match self.repo.find_user_by_username(&creds.username).await {
            Ok(u) => u,
            Err(RepoError::NotFound(_)) => return Err(ApiError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        let hash = user.hashed_password.clone();
        let ok = tokio::task::spawn_blocking(move || verify_password(&creds.password, &hash))
            .await
            .map_err(|e| {
                error!("password verification task failed: {e}");
                ApiError::Internal
            })?;
        if !ok {
            return Err(ApiError::InvalidCredentials);
        }
        self.tokens.issue(user.id).map_err(|e| {
            error!("token issuance failed: {e}");
            ApiError::Internal
        })
    }

    /// Validation happens before anything is written.
    pub async fn update_user(&self, user_id: Id, upd: UpdateUser) -> ServiceResult<User> {
        if let Some(t) = upd.respond_time {
            if t <= 0 {
                return Err(ApiError::Validation("respond time must be greater than 0".into()));
            }
        }
        let user = self
            .repo
            .update_user_settings(
                user_id,
                UserSettings { auto_respond: upd.auto_respond, respond_time: upd.respond_time },
            )
            .await?;
        Ok(user)
    }

    // ---------------- posts ----------------

    pub async fn create_post(&self, author_id: Id, new: NewPost) -> ServiceResult<Post> {
        let is_blocked = self.gateway.screen(&post_screen_text(&new.title, &new.text)).await?;
        let post = self
            .repo
            .create_post(PostDraft {
                title: new.title,
                text: new.text,
                author_id,
                is_blocked,
                created_at: Utc::now(),
            })
            .await?;
        if post.is_blocked {
            info!(post_id = post.id, "post blocked by moderation");
            return Err(ApiError::ContentBlocked { kind: ContentKind::Post, id: post.id });
        }
        Ok(post)
    }

    pub async fn list_posts(&self, filter: PostFilter) -> ServiceResult<Vec<Post>> {
        Ok(self.repo.list_posts(filter).await?)
    }

    pub async fn get_post(&self, id: Id) -> ServiceResult<PostView> {
        let post = self.repo.get_post(id).await?;
        let top = self
            .repo
            .list_top_level(CommentFilter { post_id: Some(id), author_id: None, skip: 0, limit: i64::MAX })
            .await?;
        let mut comments = Vec::with_capacity(top.len());
        for c in top {
            comments.push(self.attach_replies(c).await?);
        }
        Ok(PostView { post, comments })
    }

    /// Re-screens title and text on every update, changed or not.
    pub async fn update_post(&self, id: Id, requester: Id, upd: UpdatePost) -> ServiceResult<Post> {
        let existing = self.repo.get_post(id).await?;
        if existing.author_id != requester {
            return Err(ApiError::Forbidden(ContentKind::Post));
        }
        let title = upd.title.unwrap_or(existing.title);
        let text = upd.text.unwrap_or(existing.text);
        let is_blocked = self.gateway.screen(&post_screen_text(&title, &text)).await?;
        let post = self.repo.update_post(id, PostChanges { title, text, is_blocked }).await?;
        if post.is_blocked {
            return Err(ApiError::ContentBlocked { kind: ContentKind::Post, id: post.id });
        }
        Ok(post)
    }

    pub async fn delete_post(&self, id: Id, requester: Id) -> ServiceResult<()> {
        let existing = self.repo.get_post(id).await?;
        if existing.author_id != requester {
            return Err(ApiError::Forbidden(ContentKind::Post));
        }
        self.repo.delete_post(id).await?;
        Ok(())
    }

    // ---------------- comments ----------------

    pub async fn create_comment(&self, author_id: Id, new: NewComment) -> ServiceResult<CommentView> {
        let post = self.repo.get_post(new.post_id).await?;
        if let Some(parent_id) = new.parent_id {
            let parent = self.repo.get_comment(parent_id).await.map_err(|e| match e {
                RepoError::NotFound(_) => ApiError::NotFound("parent comment"),
                other => other.into(),
            })?;
            if parent.post_id != new.post_id {
                return Err(ApiError::PostMismatch);
            }
        }

        let is_blocked = self.gateway.screen(&new.text).await?;
        let comment = self
            .repo
            .create_comment(CommentDraft {
                text: new.text,
                author_id,
                post_id: new.post_id,
                parent_id: new.parent_id,
                is_blocked,
                created_at: Utc::now(),
            })
            .await?;
        if comment.is_blocked {
            info!(comment_id = comment.id, "comment blocked by moderation");
            return Err(ApiError::ContentBlocked { kind: ContentKind::Comment, id: comment.id });
        }

        if comment.is_top_level() {
            self.maybe_schedule_auto_response(&comment, post.author_id).await;
        }
        Ok(CommentView { comment, replies: Vec::new() })
    }

    async fn maybe_schedule_auto_response(&self, comment: &Comment, post_author_id: Id) {
        let owner = match self.repo.get_user(post_author_id).await {
            Ok(u) => u,
            Err(e) => {
                warn!(comment_id = comment.id, error = %e, "post author lookup failed, no auto-response");
                return;
            }
        };
        if !owner.auto_respond {
            return;
        }
        let delay = self.respond_time_unit * owner.respond_time.max(0) as u32;
        if let Err(e) = self.scheduler.schedule(comment.id, delay) {
            error!(comment_id = comment.id, error = %e, "failed to schedule auto-response");
        }
    }

    pub async fn list_comments(&self, filter: CommentFilter) -> ServiceResult<Vec<CommentView>> {
        let top = self.repo.list_top_level(filter).await?;
        let mut out = Vec::with_capacity(top.len());
        for c in top {
            out.push(self.attach_replies(c).await?);
        }
        Ok(out)
    }

    pub async fn get_comment(&self, id: Id) -> ServiceResult<CommentView> {
        let comment = self.repo.get_comment(id).await?;
        self.attach_replies(comment).await
    }

    /// Without new text the stored text is screened again.
    pub async fn update_comment(&self, id: Id, requester: Id, upd: UpdateComment) -> ServiceResult<CommentView> {
        let existing = self.repo.get_comment(id).await?;
        if existing.author_id != requester {
            return Err(ApiError::Forbidden(ContentKind::Comment));
        }
        let text = upd.text.unwrap_or(existing.text);
        let is_blocked = self.gateway.screen(&text).await?;
        let comment = self.repo.update_comment(id, text, is_blocked).await?;
        if comment.is_blocked {
            return Err(ApiError::ContentBlocked { kind: ContentKind::Comment, id: comment.id });
        }
        self.attach_replies(comment).await
    }

    pub async fn delete_comment(&self, id: Id, requester: Id) -> ServiceResult<u64> {
        let existing = self.repo.get_comment(id).await?;
        if existing.author_id != requester {
            return Err(ApiError::Forbidden(ContentKind::Comment));
        }
        let removed = self.repo.delete_comment(id).await?;
        info!(comment_id = id, removed, "comment subtree deleted");
        Ok(removed)
    }

    async fn attach_replies(&self, comment: Comment) -> ServiceResult<CommentView> {
        let replies = self.repo.list_replies(comment.id).await?;
        Ok(CommentView { comment, replies })
    }

    // ---------------- analytics ----------------

    pub async fn comment_breakdown(&self, from: NaiveDate, to: NaiveDate) -> ServiceResult<Vec<CommentBreakdown>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.repo.comment_breakdown(from, to).await?)
    }
}

fn post_screen_text(title: &str, text: &str) -> String {
    format!("{title} {text}")
}
