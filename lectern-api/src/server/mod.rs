use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use json::Json;
use lectern_common::{
    model::{
        Id,
        auth::{AuthTokenDecodeError, AuthTokenHashError, PasswordHashError},
        author::AuthorMarker,
        book::BookMarker,
        comment::{CommentMarker, MAX_REPLY_DEPTH},
        page::InvalidPageError,
        post::PostMarker,
        user::UserMarker,
    },
    util::PositiveDuration,
    validation::{FieldError, ValidationErrors},
};
use lectern_db::client::{DbClient, DbError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower::Layer;
use tower_http::{
    normalize_path::{NormalizePath, NormalizePathLayer},
    trace::TraceLayer,
};
use tracing::error;

mod auth;
mod json;
mod query;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct ServerConfig {
    /// Lifetime of tokens issued without `remember_me`.
    pub session_ttl: PositiveDuration,
}

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub config: Arc<ServerConfig>,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

/// The complete service: routes, request tracing and trailing slash normalization.
///
/// Paths are normalized before routing, so `/books/` reaches the same handler as `/books`.
pub fn app(state: ServerState) -> NormalizePath<Router> {
    let router = routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    NormalizePathLayer::trim_trailing_slash().layer(router)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("The password could not be hashed or verified: {0}")]
    PasswordHash(#[from] PasswordHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error("Forbidden")]
    Forbidden,
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    InvalidPage(#[from] InvalidPageError),
    #[error("A constraint was violated: {0}")]
    Integrity(String),
    #[error(transparent)]
    Database(DbError),
    #[error("Book with id {0} was not found.")]
    BookByIdNotFound(Id<BookMarker>),
    #[error("Author with id {0} was not found.")]
    AuthorByIdNotFound(Id<AuthorMarker>),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("Comment with id {0} was not found.")]
    CommentByIdNotFound(Id<CommentMarker>),
    #[error("Tag with slug {0:?} was not found.")]
    TagBySlugNotFound(String),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("User {0:?} was not found.")]
    UserByUsernameNotFound(String),
}

impl From<DbError> for ServerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidParent(_) => {
                Self::Validation(ValidationErrors::single("parent_id", FieldError::InvalidParent))
            }
            DbError::ReplyTooDeep(_) => Self::Validation(ValidationErrors::single(
                "parent_id",
                FieldError::ReplyTooDeep {
                    max: MAX_REPLY_DEPTH,
                },
            )),
            DbError::UnknownAuthor(id) => Self::Validation(ValidationErrors::single(
                "author",
                FieldError::DoesNotExist(id.get()),
            )),
            DbError::InvalidPage(err) => Self::InvalidPage(err),
            DbError::Integrity(message) => Self::Integrity(message),
            other => Self::Database(other),
        }
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::InvalidPage(_)
            | ServerError::BookByIdNotFound(_)
            | ServerError::AuthorByIdNotFound(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::CommentByIdNotFound(_)
            | ServerError::TagBySlugNotFound(_)
            | ServerError::UserByIdNotFound(_)
            | ServerError::UserByUsernameNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::InvalidToken => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::QueryRejection(_)
            | ServerError::JsonRejection(_)
            | ServerError::Validation(_)
            | ServerError::Integrity(_) => StatusCode::BAD_REQUEST,
            ServerError::JsonResponse(_)
            | ServerError::Database(_)
            | ServerError::AuthTokenHash(_)
            | ServerError::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the client gets to read. Server side failures and integrity errors stay vague.
    fn public_message(&self) -> String {
        match self {
            ServerError::Validation(_) => "Invalid input.".to_owned(),
            ServerError::Integrity(_) => "The request conflicts with existing data.".to_owned(),
            ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::InvalidToken => {
                "Authentication credentials were missing or invalid.".to_owned()
            }
            _ if self.status().is_server_error() => "Internal server error.".to_owned(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<ValidationErrors>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let message = self.public_message();
        let errors = match self {
            ServerError::Validation(errors) => Some(errors),
            _ => None,
        };
        let error_response = ErrorResponse {
            status: status.as_u16(),
            message,
            errors,
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::server::{ServerConfig, ServerState, app};
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use lectern_common::{
        model::{
            auth::{AuthToken, Authentication},
            user::{CreateUser, User},
        },
        util::PositiveDuration,
    };
    use lectern_db::client::DbClient;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    /// An app over a fresh in-memory database, plus direct access to that database.
    pub struct TestApp {
        pub db: Arc<DbClient>,
        state: ServerState,
    }

    pub struct TestResponse {
        pub status: StatusCode,
        pub body: Value,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let db = Arc::new(DbClient::in_memory().await.unwrap());
            let state = ServerState {
                db_client: Arc::clone(&db),
                config: Arc::new(ServerConfig {
                    session_ttl: PositiveDuration::new(Duration::hours(24)).unwrap(),
                }),
            };
            Self { db, state }
        }

        /// Creates a user directly in the store and returns it with a fresh bearer token.
        pub async fn user(&self, username: &str, is_staff: bool, is_superuser: bool) -> (User, String) {
            let (user, _profile) = self
                .db
                .create_user(&CreateUser {
                    username: username.to_owned(),
                    email: format!("{username}@example.com"),
                    first_name: "Test".to_owned(),
                    last_name: "User".to_owned(),
                    password_hash: "not a real hash".to_owned(),
                    is_staff,
                    is_superuser,
                })
                .await
                .unwrap();

            let token = AuthToken::generate_random(user.id);
            self.db
                .create_auth(&Authentication {
                    user: user.id,
                    token_hash: token.hash().unwrap(),
                    created_at: OffsetDateTime::now_utc(),
                    expires_after: None,
                })
                .await
                .unwrap();

            (user, token.as_token_str())
        }

        pub async fn request(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> TestResponse {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = app(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };

            TestResponse { status, body }
        }

        pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
            self.request(Method::GET, uri, token, None).await
        }

        pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
            self.request(Method::POST, uri, token, Some(body)).await
        }

        pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
            self.request(Method::DELETE, uri, token, None).await
        }
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let app = TestApp::new().await;

        let response = app.get("/nothing-here", None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body["status"], json!(404));
    }

    #[tokio::test]
    async fn bad_tokens_are_unauthorized() {
        let app = TestApp::new().await;

        let garbage = app.get("/users/me", Some("not-a-token")).await;
        assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);

        let forged = AuthToken::generate_random(1.into()).as_token_str();
        let unknown = app.get("/users/me", Some(&forged)).await;
        assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);

        let missing = app.get("/users/me", None).await;
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    }
}
