use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::llm::ModelError;
use crate::models::Id;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Post,
    Comment,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContentKind::Post => "post",
            ContentKind::Comment => "comment",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0} not found")] NotFound(&'static str),
    #[error("not authorized to modify this {0}")] Forbidden(ContentKind),
    #[error("post id of the reply does not match the parent comment's post id")] PostMismatch,
    #[error("{0}")] Validation(String),
    /// The row was committed with `is_blocked = true`; the caller still gets a
    /// failure.
    #[error("your {kind} has been blocked because of toxic content")] ContentBlocked { kind: ContentKind, id: Id },
    #[error("quota exceeded, please try again later")] RateLimited,
    #[error("username already registered")] UsernameTaken,
    #[error("invalid username or password")] InvalidCredentials,
    #[error("could not validate credentials")] Unauthenticated,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(what) => ApiError::NotFound(what),
            RepoError::PostMismatch => ApiError::PostMismatch,
            RepoError::Conflict => ApiError::UsernameTaken,
            RepoError::Internal(msg) => {
                error!("storage error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::RateLimited { .. } => ApiError::RateLimited,
            other => {
                error!("model error: {other}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::PostMismatch
            | ApiError::Validation(_)
            | ApiError::ContentBlocked { .. }
            | ApiError::UsernameTaken => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidCredentials | ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut resp = HttpResponse::build(self.status_code());
        if matches!(self, ApiError::InvalidCredentials | ApiError::Unauthenticated) {
            resp.insert_header(("WWW-Authenticate", "Bearer"));
        }
        resp.json(ApiErrorBody { error: self.to_string() })
    }
}
