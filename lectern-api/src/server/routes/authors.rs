use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
    query::{Query, page_request},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use lectern_common::{
    model::{
        Id,
        author::{
            Author, AuthorBooks, AuthorFilter, AuthorInput, AuthorMarker, AuthorSortField,
            AuthorSummary,
        },
        page::Page,
        sort::Ordering,
    },
    validation::WriteMode,
};
use lectern_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const PAGE_SIZE: u32 = 10;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_authors)
        .typed_post(create_author)
        .typed_get(get_author)
        .typed_put(replace_author)
        .typed_patch(patch_author)
        .typed_delete(delete_author)
        .typed_get(get_author_books)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/authors", rejection(ServerError))]
struct AuthorsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/authors/{id}", rejection(ServerError))]
struct AuthorPath {
    id: Id<AuthorMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/authors/{id}/books", rejection(ServerError))]
struct AuthorBooksPath {
    id: Id<AuthorMarker>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct AuthorQuery {
    name: Option<String>,
    search: Option<String>,
    ordering: Option<String>,
    page: Option<String>,
}

async fn list_authors(
    AuthorsPath(): AuthorsPath,
    State(db): State<Arc<DbClient>>,
    Query(query): Query<AuthorQuery>,
) -> Result<Json<Page<AuthorSummary>>> {
    let request = page_request(query.page.as_deref())?;
    let ordering = Ordering::<AuthorSortField>::parse(query.ordering.as_deref());
    let filter = AuthorFilter {
        name: query.name.filter(|name| !name.trim().is_empty()),
        search: query
            .search
            .map(|search| search.trim().to_owned())
            .filter(|search| !search.is_empty()),
    };

    let page = db.list_authors(&filter, &ordering, request, PAGE_SIZE).await?;

    Ok(Json(page))
}

async fn create_author(
    AuthorsPath(): AuthorsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<AuthorInput>,
) -> Result<Created<Author>> {
    let author = input.validate_new()?;
    let author = db.create_author(&author).await?;

    info!(author_id = %author.id, user_id = %user.user_id(), "Author created");
    Ok(Created(author))
}

async fn get_author(
    AuthorPath { id }: AuthorPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Author>> {
    let author = db
        .fetch_author(id)
        .await?
        .ok_or(ServerError::AuthorByIdNotFound(id))?;

    Ok(Json(author))
}

async fn update_author(
    id: Id<AuthorMarker>,
    db: &DbClient,
    user: &AuthenticatedUser,
    input: AuthorInput,
    mode: WriteMode,
) -> Result<Json<Author>> {
    let changes = input.validate(mode)?;
    let author = db
        .update_author(id, &changes)
        .await?
        .ok_or(ServerError::AuthorByIdNotFound(id))?;

    info!(author_id = %id, user_id = %user.user_id(), "Author updated");
    Ok(Json(author))
}

async fn replace_author(
    AuthorPath { id }: AuthorPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<AuthorInput>,
) -> Result<Json<Author>> {
    update_author(id, &db, &user, input, WriteMode::Full).await
}

async fn patch_author(
    AuthorPath { id }: AuthorPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<AuthorInput>,
) -> Result<Json<Author>> {
    update_author(id, &db, &user, input, WriteMode::Partial).await
}

/// Deleting an author deletes their books too.
async fn delete_author(
    AuthorPath { id }: AuthorPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    if !db.delete_author(id).await? {
        return Err(ServerError::AuthorByIdNotFound(id));
    }

    info!(author_id = %id, user_id = %user.user_id(), "Author deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_author_books(
    AuthorBooksPath { id }: AuthorBooksPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<AuthorBooks>> {
    let author = db
        .fetch_author(id)
        .await?
        .ok_or(ServerError::AuthorByIdNotFound(id))?;

    Ok(Json(AuthorBooks::new(author)))
}
