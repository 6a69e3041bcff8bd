use crate::server::{
    Result, ServerConfig, ServerError, ServerRouter,
    auth::{AuthenticatedUser, issue_token},
    json::{Created, Json},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use lectern_common::{
    model::auth::{Credentials, IssuedToken, verify_password},
    validation::{FieldError, ValidationErrors},
};
use lectern_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const INVALID_CREDENTIALS: &str = "Unable to log in with provided credentials.";

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(login)
        .typed_delete(logout)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/auth/tokens", rejection(ServerError))]
struct TokensPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/auth/tokens/current", rejection(ServerError))]
struct CurrentTokenPath();

fn invalid_credentials() -> ServerError {
    ValidationErrors::single("non_field_errors", FieldError::Invalid(INVALID_CREDENTIALS)).into()
}

/// Without `remember_me` the token expires after the configured session lifetime.
async fn login(
    TokensPath(): TokensPath,
    State(db): State<Arc<DbClient>>,
    State(config): State<Arc<ServerConfig>>,
    Json(credentials): Json<Credentials>,
) -> Result<Created<IssuedToken>> {
    let (user, password_hash) = db
        .fetch_login(&credentials.username)
        .await?
        .ok_or_else(invalid_credentials)?;

    if !verify_password(&credentials.password, &password_hash)? {
        return Err(invalid_credentials());
    }

    let expires_after = (!credentials.remember_me).then_some(config.session_ttl);
    let token = issue_token(&db, user.id, expires_after).await?;

    info!(user_id = %user.id, "User logged in");
    Ok(Created(IssuedToken {
        token: token.as_token_str(),
    }))
}

/// Revokes the token the request was made with. Other sessions stay signed in.
async fn logout(
    CurrentTokenPath(): CurrentTokenPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    db.delete_auth(user.token_hash()).await?;

    info!(user_id = %user.user_id(), "User logged out");
    Ok(StatusCode::NO_CONTENT)
}
