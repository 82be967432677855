use sqlx::{Pool, Postgres};

use super::*;

fn internal(e: sqlx::Error) -> RepoError {
    RepoError::Internal(e.to_string())
}

fn not_found_or_internal(what: &'static str) -> impl Fn(sqlx::Error) -> RepoError {
    move |e| match e {
        sqlx::Error::RowNotFound => RepoError::NotFound(what),
        other => internal(other),
    }
}

const COMMENT_COLS: &str = "id, text, author_id, post_id, parent_id, is_blocked, created_at";
const POST_COLS: &str = "id, title, text, author_id, is_blocked, created_at";
const USER_COLS: &str = "id, username, hashed_password, auto_respond, respond_time";

/// Postgres store; schema in `migrations/0001_init.sql`.
#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUserRecord) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, hashed_password, auto_respond, respond_time) \
             VALUES ($1, $2, FALSE, $3) ON CONFLICT (username) DO NOTHING RETURNING {USER_COLS}"
        ))
        .bind(&new.username)
        .bind(&new.hashed_password)
        .bind(DEFAULT_RESPOND_TIME)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?
        .ok_or(RepoError::Conflict)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found_or_internal("user"))
    }

    async fn find_user_by_username(&self, username: &str) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found_or_internal("user"))
    }

    async fn update_user_settings(&self, id: Id, upd: UserSettings) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET auto_respond = COALESCE($2, auto_respond), respond_time = COALESCE($3, respond_time) \
             WHERE id = $1 RETURNING {USER_COLS}"
        ))
        .bind(id)
        .bind(upd.auto_respond)
        .bind(upd.respond_time)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_internal("user"))
    }
}

#[async_trait]
impl PostRepo for PgRepo {
    async fn create_post(&self, draft: PostDraft) -> RepoResult<Post> {
        sqlx::query_as::<_, Post>(&format!(
            "INSERT INTO posts (title, text, author_id, is_blocked, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {POST_COLS}"
        ))
        .bind(&draft.title)
        .bind(&draft.text)
        .bind(draft.author_id)
        .bind(draft.is_blocked)
        .bind(draft.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLS} FROM posts WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found_or_internal("post"))
    }

    async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLS} FROM posts WHERE ($1::BIGINT IS NULL OR author_id = $1) \
             ORDER BY id OFFSET $2 LIMIT $3"
        ))
        .bind(filter.author_id)
        .bind(filter.skip.max(0))
        .bind(filter.limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn update_post(&self, id: Id, changes: PostChanges) -> RepoResult<Post> {
        sqlx::query_as::<_, Post>(&format!(
            "UPDATE posts SET title = $2, text = $3, is_blocked = $4 WHERE id = $1 RETURNING {POST_COLS}"
        ))
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.text)
        .bind(changes.is_blocked)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_internal("post"))
    }

    async fn delete_post(&self, id: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        let res = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            // dropping the transaction rolls it back
            return Err(RepoError::NotFound("post"));
        }
        tx.commit().await.map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl CommentRepo for PgRepo {
    async fn create_comment(&self, draft: CommentDraft) -> RepoResult<Comment> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let post: Option<(Id,)> = sqlx::query_as("SELECT id FROM posts WHERE id = $1 FOR SHARE")
            .bind(draft.post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?;
        if post.is_none() {
            return Err(RepoError::NotFound("post"));
        }
        if let Some(parent_id) = draft.parent_id {
            let parent: Option<(Id,)> = sqlx::query_as("SELECT post_id FROM comments WHERE id = $1 FOR SHARE")
                .bind(parent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?;
            match parent {
                None => return Err(RepoError::NotFound("parent comment")),
                Some((post_id,)) if post_id != draft.post_id => return Err(RepoError::PostMismatch),
                Some(_) => {}
            }
        }
        let comment = sqlx::query_as::<_, Comment>(&format!(
            "INSERT INTO comments (text, author_id, post_id, parent_id, is_blocked, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {COMMENT_COLS}"
        ))
        .bind(&draft.text)
        .bind(draft.author_id)
        .bind(draft.post_id)
        .bind(draft.parent_id)
        .bind(draft.is_blocked)
        .bind(draft.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        tx.commit().await.map_err(internal)?;
        Ok(comment)
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!("SELECT {COMMENT_COLS} FROM comments WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found_or_internal("comment"))
    }

    async fn list_replies(&self, parent_id: Id) -> RepoResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLS} FROM comments WHERE parent_id = $1 ORDER BY id"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn list_top_level(&self, filter: CommentFilter) -> RepoResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLS} FROM comments WHERE parent_id IS NULL \
             AND ($1::BIGINT IS NULL OR post_id = $1) AND ($2::BIGINT IS NULL OR author_id = $2) \
             ORDER BY id OFFSET $3 LIMIT $4"
        ))
        .bind(filter.post_id)
        .bind(filter.author_id)
        .bind(filter.skip.max(0))
        .bind(filter.limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn update_comment(&self, id: Id, text: String, is_blocked: bool) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!(
            "UPDATE comments SET text = $2, is_blocked = $3 WHERE id = $1 RETURNING {COMMENT_COLS}"
        ))
        .bind(id)
        .bind(text)
        .bind(is_blocked)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_internal("comment"))
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<u64> {
        // the whole subtree goes in one statement so the parent FK never dangles
        let res = sqlx::query(
            "WITH RECURSIVE subtree AS ( \
                 SELECT id FROM comments WHERE id = $1 \
                 UNION ALL \
                 SELECT c.id FROM comments c JOIN subtree s ON c.parent_id = s.id \
             ) DELETE FROM comments WHERE id IN (SELECT id FROM subtree)",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        match res.rows_affected() {
            0 => Err(RepoError::NotFound("comment")),
            n => Ok(n),
        }
    }
}

#[async_trait]
impl AnalyticsRepo for PgRepo {
    async fn comment_breakdown(&self, from: NaiveDate, to: NaiveDate) -> RepoResult<Vec<CommentBreakdown>> {
        sqlx::query_as::<_, CommentBreakdown>(
            "SELECT (created_at AT TIME ZONE 'UTC')::date AS date, \
                    COUNT(*) AS total_comments, \
                    COUNT(*) FILTER (WHERE is_blocked) AS blocked_comments \
             FROM comments \
             WHERE (created_at AT TIME ZONE 'UTC')::date BETWEEN $1 AND $2 \
             GROUP BY 1 ORDER BY 1",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }
}
