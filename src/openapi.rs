use crate::models::{
    Comment, CommentBreakdown, CommentView, Credentials, MessageResponse, NewComment, NewPost, Post, PostView,
    TokenResponse, UpdateComment, UpdatePost, UpdateUser,
};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::update_user,
        crate::routes::create_post,
        crate::routes::list_posts,
        crate::routes::get_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::create_comment,
        crate::routes::list_comments,
        crate::routes::get_comment,
        crate::routes::update_comment,
        crate::routes::delete_comment,
        crate::routes::comment_breakdown,
    ),
    components(schemas(
        Post, PostView, NewPost, UpdatePost,
        Comment, CommentView, NewComment, UpdateComment,
        Credentials, UpdateUser, TokenResponse, MessageResponse, CommentBreakdown
    )),
    modifiers(&BearerScheme),
    tags(
        (name = "posts", description = "Post operations"),
        (name = "comments", description = "Comment operations"),
        (name = "auth", description = "Registration, login and user settings"),
    )
)]
pub struct ApiDoc;

struct BearerScheme;

impl Modify for BearerScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}
