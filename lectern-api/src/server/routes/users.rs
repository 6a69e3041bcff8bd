use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
    query::{PageQuery, Query},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use lectern_common::{
    model::{
        Id,
        auth::hash_password,
        page::Page,
        post::Post,
        user::{Account, AccountInput, CreateUser, PublicAccount, Registration, UserMarker},
    },
    validation::{FieldError, ValidationErrors},
};
use lectern_db::client::{DbClient, PostListing};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const POSTS_PAGE_SIZE: u32 = 5;

const USERNAME_TAKEN: &str = "A user with that username already exists.";
const EMAIL_TAKEN: &str = "This email is already in use. Please use a different email address.";

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(register)
        .typed_get(get_me)
        .typed_patch(update_me)
        .typed_get(get_user)
        .typed_get(list_user_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct UsersPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/me", rejection(ServerError))]
struct MePath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{username}", rejection(ServerError))]
struct UserPath {
    username: String,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{username}/posts", rejection(ServerError))]
struct UserPostsPath {
    username: String,
}

/// Rejects a username or email address that belongs to another account.
async fn check_unique(
    db: &DbClient,
    username: Option<&str>,
    email: Option<&str>,
    except: Option<Id<UserMarker>>,
) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if let Some(username) = username
        && db.username_taken(username, except).await?
    {
        errors.add("username", FieldError::Invalid(USERNAME_TAKEN));
    }
    if let Some(email) = email
        && db.email_taken(email, except).await?
    {
        errors.add("email", FieldError::Invalid(EMAIL_TAKEN));
    }

    Ok(errors.finish(())?)
}

/// Creates an account and its profile. The new user is neither staff nor superuser.
async fn register(
    UsersPath(): UsersPath,
    State(db): State<Arc<DbClient>>,
    Json(registration): Json<Registration>,
) -> Result<Created<Account>> {
    let new_user = registration.validate()?;
    check_unique(&db, Some(&new_user.username), Some(&new_user.email), None).await?;

    let (user, profile) = db
        .create_user(&CreateUser {
            password_hash: hash_password(&new_user.password)?,
            username: new_user.username,
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            is_staff: false,
            is_superuser: false,
        })
        .await?;

    info!(user_id = %user.id, "User registered");
    Ok(Created(Account::new(user, profile)))
}

async fn get_me(
    MePath(): MePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<Account>> {
    let id = user.user_id();
    let (user, profile) = db
        .fetch_account(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(Account::new(user, profile)))
}

/// Account and profile fields change together or not at all.
async fn update_me(
    MePath(): MePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<AccountInput>,
) -> Result<Json<Account>> {
    let id = user.user_id();
    let (user_changes, profile_changes) = input.validate()?;
    check_unique(
        &db,
        user_changes.username.as_deref(),
        user_changes.email.as_deref(),
        Some(id),
    )
    .await?;

    let (user, profile) = db
        .update_account(id, user_changes, profile_changes)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    info!(user_id = %id, "Account updated");
    Ok(Json(Account::new(user, profile)))
}

async fn get_user(
    UserPath { username }: UserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PublicAccount>> {
    let user = db
        .fetch_user_by_username(&username)
        .await?
        .ok_or(ServerError::UserByUsernameNotFound(username))?;

    let (user, profile) = db
        .fetch_account(user.id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(user.id))?;

    Ok(Json(PublicAccount::new(user, profile)))
}

async fn list_user_posts(
    UserPostsPath { username }: UserPostsPath,
    State(db): State<Arc<DbClient>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Post>>> {
    let user = db
        .fetch_user_by_username(&username)
        .await?
        .ok_or(ServerError::UserByUsernameNotFound(username))?;

    let page = db
        .list_posts(PostListing::ByAuthor(user.id), query.request()?, POSTS_PAGE_SIZE)
        .await?;

    Ok(Json(page))
}
