use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use lectern_common::{
    model::{
        Id,
        comment::{
            ApprovalToggle, Comment, CommentInput, CommentMarker, CommentThread, SubmittedComment,
            approval_message, build_threads, submission_notice,
        },
        like::LikeToggle,
        post::PostMarker,
    },
    validation::WriteMode,
};
use lectern_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_post_comments)
        .typed_post(create_comment)
        .typed_get(get_comment)
        .typed_put(replace_comment)
        .typed_patch(patch_comment)
        .typed_delete(delete_comment)
        .typed_post(toggle_like)
        .typed_post(toggle_approval)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments", rejection(ServerError))]
struct PostCommentsPath {
    id: Id<PostMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}", rejection(ServerError))]
struct CommentPath {
    id: Id<CommentMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}/like", rejection(ServerError))]
struct CommentLikePath {
    id: Id<CommentMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}/approve", rejection(ServerError))]
struct CommentApprovePath {
    id: Id<CommentMarker>,
}

async fn ensure_post_exists(db: &DbClient, id: Id<PostMarker>) -> Result<()> {
    match db.fetch_post(id).await? {
        Some(_) => Ok(()),
        None => Err(ServerError::PostByIdNotFound(id)),
    }
}

/// The comment, if `viewer` may see it. Hidden comments are reported as missing.
async fn fetch_visible_comment(
    db: &DbClient,
    id: Id<CommentMarker>,
    viewer: Option<&AuthenticatedUser>,
) -> Result<Comment> {
    db.fetch_comment(id)
        .await?
        .filter(|comment| comment.is_visible_to(viewer.map(AuthenticatedUser::user)))
        .ok_or(ServerError::CommentByIdNotFound(id))
}

async fn list_post_comments(
    PostCommentsPath { id }: PostCommentsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<CommentThread>>> {
    ensure_post_exists(&db, id).await?;
    let comments = db.list_approved_comments(id).await?;

    Ok(Json(build_threads(comments)))
}

async fn create_comment(
    PostCommentsPath { id }: PostCommentsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<CommentInput>,
) -> Result<Created<SubmittedComment>> {
    ensure_post_exists(&db, id).await?;

    let comment = input.validate_new(user.user())?;
    let comment = db.create_comment(id, user.user_id(), &comment).await?;

    info!(
        comment_id = %comment.id,
        post_id = %id,
        user_id = %user.user_id(),
        approved = comment.approved,
        "Comment submitted"
    );
    Ok(Created(SubmittedComment {
        notice: submission_notice(comment.approved),
        comment,
    }))
}

async fn get_comment(
    CommentPath { id }: CommentPath,
    State(db): State<Arc<DbClient>>,
    viewer: Option<AuthenticatedUser>,
) -> Result<Json<Comment>> {
    let comment = fetch_visible_comment(&db, id, viewer.as_ref()).await?;

    Ok(Json(comment))
}

/// The author, staff and superusers may edit a comment. Only its content can change.
async fn update_comment(
    id: Id<CommentMarker>,
    db: &DbClient,
    user: &AuthenticatedUser,
    input: CommentInput,
    mode: WriteMode,
) -> Result<Json<Comment>> {
    let comment = fetch_visible_comment(db, id, Some(user)).await?;
    user.require(comment.can_be_modified_by(user.user()))?;

    let changes = input.validate(mode)?;
    let comment = db
        .update_comment(id, &changes)
        .await?
        .ok_or(ServerError::CommentByIdNotFound(id))?;

    info!(comment_id = %id, user_id = %user.user_id(), "Comment updated");
    Ok(Json(comment))
}

async fn replace_comment(
    CommentPath { id }: CommentPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<CommentInput>,
) -> Result<Json<Comment>> {
    update_comment(id, &db, &user, input, WriteMode::Full).await
}

async fn patch_comment(
    CommentPath { id }: CommentPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<CommentInput>,
) -> Result<Json<Comment>> {
    update_comment(id, &db, &user, input, WriteMode::Partial).await
}

async fn delete_comment(
    CommentPath { id }: CommentPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    let comment = fetch_visible_comment(&db, id, Some(&user)).await?;
    user.require(comment.can_be_modified_by(user.user()))?;

    if !db.delete_comment(id).await? {
        return Err(ServerError::CommentByIdNotFound(id));
    }

    info!(comment_id = %id, user_id = %user.user_id(), "Comment deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_like(
    CommentLikePath { id }: CommentLikePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<LikeToggle>> {
    fetch_visible_comment(&db, id, Some(&user)).await?;
    let toggle = db.toggle_comment_like(id, user.user_id()).await?;

    info!(comment_id = %id, user_id = %user.user_id(), liked = toggle.liked, "Comment like toggled");
    Ok(Json(toggle))
}

async fn toggle_approval(
    CommentApprovePath { id }: CommentApprovePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<ApprovalToggle>> {
    user.require(user.user().is_privileged())?;

    let approved = db
        .toggle_comment_approval(id)
        .await?
        .ok_or(ServerError::CommentByIdNotFound(id))?;

    info!(comment_id = %id, user_id = %user.user_id(), approved, "Comment approval toggled");
    Ok(Json(ApprovalToggle {
        approved,
        message: approval_message(approved),
    }))
}
