use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::*;
use crate::service::BlogService;

const DEFAULT_PAGE_SIZE: i64 = 10;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(web::resource("/register").route(web::post().to(register)))
            .service(web::resource("/login").route(web::post().to(login)))
            .service(web::resource("/user").route(web::put().to(update_user))),
    )
    .service(
        web::scope("/api")
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::put().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(
                web::resource("/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(
                web::resource("/comments/{id}")
                    .route(web::get().to(get_comment))
                    .route(web::put().to(update_comment))
                    .route(web::delete().to(delete_comment)),
            )
            .service(web::resource("/analytics/comments").route(web::get().to(comment_breakdown))),
    );
    cfg.route("/metrics", web::get().to(render_metrics));
}

#[derive(Clone)]
pub struct AppState {
    pub blog: Arc<BlogService>,
    /// `None` when no Prometheus recorder was installed (tests).
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PostQuery {
    pub author_id: Option<Id>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CommentQuery {
    pub post_id: Option<Id>,
    pub author_id: Option<Id>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AnalyticsQuery {
    /// First day, inclusive (`YYYY-MM-DD`).
    pub date_from: NaiveDate,
    /// Last day, inclusive (`YYYY-MM-DD`).
    pub date_to: NaiveDate,
}

// ---------------- auth ----------------

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = Credentials,
    responses(
        (status = 200, description = "User registered", body = MessageResponse),
        (status = 400, description = "Username already registered")
    )
)]
pub async fn register(data: web::Data<AppState>, payload: web::Json<Credentials>) -> Result<HttpResponse, ApiError> {
    data.blog.register(payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("User successfully registered")))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Bearer token", body = TokenResponse),
        (status = 401, description = "Invalid username or password")
    )
)]
pub async fn login(data: web::Data<AppState>, payload: web::Json<Credentials>) -> Result<HttpResponse, ApiError> {
    let access_token = data.blog.login(payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(TokenResponse { access_token, token_type: "bearer".into() }))
}

#[utoipa::path(
    put,
    path = "/auth/user",
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Settings updated", body = MessageResponse),
        (status = 400, description = "respond_time must be positive"),
        (status = 404, description = "User not found")
    ),
    security(("bearer" = []))
)]
pub async fn update_user(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    data.blog.update_user(auth.user_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("User updated successfully")))
}

// ---------------- posts ----------------

#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = NewPost,
    responses(
        (status = 200, description = "Post created", body = Post),
        (status = 400, description = "Post blocked by moderation"),
        (status = 429, description = "Moderation quota exhausted")
    ),
    security(("bearer" = []))
)]
pub async fn create_post(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewPost>) -> Result<HttpResponse, ApiError> {
    let post = data.blog.create_post(auth.user_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    get,
    path = "/api/posts",
    params(PostQuery),
    responses((status = 200, description = "List posts", body = [Post]))
)]
pub async fn list_posts(data: web::Data<AppState>, q: web::Query<PostQuery>) -> Result<HttpResponse, ApiError> {
    let q = q.into_inner();
    let filter = PostFilter {
        author_id: q.author_id,
        skip: q.skip.unwrap_or(0),
        limit: q.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    Ok(HttpResponse::Ok().json(data.blog.list_posts(filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post with its comments", body = PostView),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.blog.get_post(path.into_inner()).await?))
}

#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    request_body = UpdatePost,
    responses(
        (status = 200, description = "Post updated", body = Post),
        (status = 400, description = "Post blocked by moderation"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found")
    ),
    security(("bearer" = []))
)]
pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePost>,
) -> Result<HttpResponse, ApiError> {
    let post = data.blog.update_post(path.into_inner(), auth.user_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post and its comments deleted", body = MessageResponse),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Post not found")
    ),
    security(("bearer" = []))
)]
pub async fn delete_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.blog.delete_post(path.into_inner(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Post successfully deleted")))
}

// ---------------- comments ----------------

#[utoipa::path(
    post,
    path = "/api/comments",
    request_body = NewComment,
    responses(
        (status = 200, description = "Comment created", body = CommentView),
        (status = 400, description = "Blocked, or reply does not belong to the post"),
        (status = 404, description = "Post or parent comment not found"),
        (status = 429, description = "Moderation quota exhausted")
    ),
    security(("bearer" = []))
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let comment = data.blog.create_comment(auth.user_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/comments",
    params(CommentQuery),
    responses((status = 200, description = "Top-level comments with direct replies", body = [CommentView]))
)]
pub async fn list_comments(data: web::Data<AppState>, q: web::Query<CommentQuery>) -> Result<HttpResponse, ApiError> {
    let q = q.into_inner();
    let filter = CommentFilter {
        post_id: q.post_id,
        author_id: q.author_id,
        skip: q.skip.unwrap_or(0),
        limit: q.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    Ok(HttpResponse::Ok().json(data.blog.list_comments(filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment with direct replies", body = CommentView),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn get_comment(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.blog.get_comment(path.into_inner()).await?))
}

#[utoipa::path(
    put,
    path = "/api/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    request_body = UpdateComment,
    responses(
        (status = 200, description = "Comment updated", body = CommentView),
        (status = 400, description = "Comment blocked by moderation"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Comment not found")
    ),
    security(("bearer" = []))
)]
pub async fn update_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateComment>,
) -> Result<HttpResponse, ApiError> {
    let comment = data.blog.update_comment(path.into_inner(), auth.user_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    delete,
    path = "/api/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment and its replies deleted", body = MessageResponse),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Comment not found")
    ),
    security(("bearer" = []))
)]
pub async fn delete_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.blog.delete_comment(path.into_inner(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Comment successfully deleted")))
}

// ---------------- analytics ----------------

#[utoipa::path(
    get,
    path = "/api/analytics/comments",
    params(AnalyticsQuery),
    responses((status = 200, description = "Per-day comment counts, ascending", body = [CommentBreakdown]))
)]
pub async fn comment_breakdown(data: web::Data<AppState>, q: web::Query<AnalyticsQuery>) -> Result<HttpResponse, ApiError> {
    let rows = data.blog.comment_breakdown(q.date_from, q.date_to).await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn render_metrics(data: web::Data<AppState>) -> HttpResponse {
    match &data.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
