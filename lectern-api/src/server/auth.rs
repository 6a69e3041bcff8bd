//! Bearer token authentication.
//!
//! Handlers that need a user take [`AuthenticatedUser`], which rejects the request with 401 when
//! the token is missing or bad. Handlers that only personalize their answer take
//! `Option<AuthenticatedUser>`: no `Authorization` header means anonymous, a bad one is still 401.

use crate::server::{Result, ServerError};
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use lectern_common::{
    model::{
        Id,
        auth::{AuthToken, AuthTokenHash, Authentication},
        user::{User, UserMarker},
    },
    util::PositiveDuration,
};
use lectern_db::client::DbClient;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    user: User,
    token_hash: AuthTokenHash,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn user_id(&self) -> Id<UserMarker> {
        self.user.id
    }

    /// Hash of the token this request was made with.
    #[must_use]
    pub fn token_hash(&self) -> &AuthTokenHash {
        &self.token_hash
    }

    /// Gates an action on `allowed`, which the caller computes from [`Self::user`].
    pub fn require(&self, allowed: bool) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(ServerError::Forbidden)
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_token: AuthToken = <AuthorizationHeader as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let token_hash = request_token.hash()?;

        let db = Arc::<DbClient>::from_ref(state);
        let authentication = db
            .fetch_auth(&token_hash)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        if authentication.user != request_token.user_id {
            return Err(ServerError::InvalidToken);
        }
        if authentication.is_expired_at(OffsetDateTime::now_utc()) {
            db.delete_auth(&token_hash).await?;
            debug!(user_id = %authentication.user, "Removed expired auth token");
            return Err(ServerError::InvalidToken);
        }

        let user = db
            .fetch_user(authentication.user)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        Ok(Self { user, token_hash })
    }
}

impl<S> OptionalFromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }

        <Self as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

/// Creates and stores a new token for `user`. Without `expires_after` it never expires.
pub async fn issue_token(
    db: &DbClient,
    user: Id<UserMarker>,
    expires_after: Option<PositiveDuration>,
) -> Result<AuthToken> {
    let token = AuthToken::generate_random(user);
    let authentication = Authentication {
        user,
        token_hash: token.hash()?,
        created_at: OffsetDateTime::now_utc(),
        expires_after,
    };
    db.create_auth(&authentication).await?;

    info!(user_id = %user, expiring = expires_after.is_some(), "Issued auth token");
    Ok(token)
}

#[cfg(test)]
mod tests {
    use crate::server::tests::TestApp;
    use axum::http::StatusCode;
    use lectern_common::{
        model::auth::{AuthToken, Authentication},
        util::PositiveDuration,
    };
    use time::{Duration, OffsetDateTime};

    #[tokio::test]
    async fn expired_tokens_are_removed() {
        let app = TestApp::new().await;
        let (user, _) = app.user("ada", false, false).await;

        let token = AuthToken::generate_random(user.id);
        let token_hash = token.hash().unwrap();
        app.db
            .create_auth(&Authentication {
                user: user.id,
                token_hash: token_hash.clone(),
                created_at: OffsetDateTime::now_utc() - Duration::hours(2),
                expires_after: PositiveDuration::new(Duration::hours(1)),
            })
            .await
            .unwrap();
        assert!(app.db.fetch_auth(&token_hash).await.unwrap().is_some());

        let response = app.get("/users/me", Some(&token.as_token_str())).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(app.db.fetch_auth(&token_hash).await.unwrap().is_none());
    }
}
