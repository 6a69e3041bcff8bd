use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
    query::{Query, empty_as_none, page_request},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use lectern_common::{
    model::{
        Id,
        book::{Book, BookDetail, BookFilter, BookInput, BookMarker, BookSortField},
        page::Page,
        sort::Ordering,
    },
    validation::WriteMode,
};
use lectern_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

const PAGE_SIZE: u32 = 10;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_books)
        .typed_post(create_book)
        .typed_get(get_book)
        .typed_put(replace_book)
        .typed_patch(patch_book)
        .typed_delete(delete_book)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/books", rejection(ServerError))]
struct BooksPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/books/{id}", rejection(ServerError))]
struct BookPath {
    id: Id<BookMarker>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct BookQuery {
    title: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    author: Option<i64>,
    author_name: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    publication_year: Option<i32>,
    #[serde(default, deserialize_with = "empty_as_none")]
    publication_year_min: Option<i32>,
    #[serde(default, deserialize_with = "empty_as_none")]
    publication_year_max: Option<i32>,
    search: Option<String>,
    ordering: Option<String>,
    page: Option<String>,
}

/// Blank text parameters filter nothing.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl BookQuery {
    fn filter(self) -> BookFilter {
        BookFilter {
            title: non_blank(self.title),
            author: self.author.map(Id::new),
            author_name: non_blank(self.author_name),
            publication_year: self.publication_year,
            publication_year_min: self.publication_year_min,
            publication_year_max: self.publication_year_max,
            search: non_blank(self.search).map(|search| search.trim().to_owned()),
        }
    }
}

fn current_year() -> i32 {
    OffsetDateTime::now_utc().year()
}

async fn list_books(
    BooksPath(): BooksPath,
    State(db): State<Arc<DbClient>>,
    Query(query): Query<BookQuery>,
) -> Result<Json<Page<Book>>> {
    let request = page_request(query.page.as_deref())?;
    let ordering = Ordering::<BookSortField>::parse(query.ordering.as_deref());
    let filter = query.filter();

    let page = db.list_books(&filter, &ordering, request, PAGE_SIZE).await?;

    Ok(Json(page))
}

async fn create_book(
    BooksPath(): BooksPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<BookInput>,
) -> Result<Created<Book>> {
    let book = input.validate_new(current_year())?;
    let book = db.create_book(&book).await?;

    info!(book_id = %book.id, user_id = %user.user_id(), "Book created");
    Ok(Created(book))
}

async fn get_book(
    BookPath { id }: BookPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<BookDetail>> {
    let book = db
        .fetch_book(id)
        .await?
        .ok_or(ServerError::BookByIdNotFound(id))?;

    let related = db.fetch_related_books(&book).await?;
    if related.is_empty() {
        return Ok(Json(BookDetail::new(book, related, "")));
    }

    let author = db
        .fetch_author(book.author)
        .await?
        .ok_or(ServerError::AuthorByIdNotFound(book.author))?;

    Ok(Json(BookDetail::new(book, related, &author.name)))
}

async fn update_book(
    id: Id<BookMarker>,
    db: &DbClient,
    user: &AuthenticatedUser,
    input: BookInput,
    mode: WriteMode,
) -> Result<Json<Book>> {
    let changes = input.validate(mode, current_year())?;
    let book = db
        .update_book(id, &changes)
        .await?
        .ok_or(ServerError::BookByIdNotFound(id))?;

    info!(book_id = %id, user_id = %user.user_id(), "Book updated");
    Ok(Json(book))
}

async fn replace_book(
    BookPath { id }: BookPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<BookInput>,
) -> Result<Json<Book>> {
    update_book(id, &db, &user, input, WriteMode::Full).await
}

async fn patch_book(
    BookPath { id }: BookPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<BookInput>,
) -> Result<Json<Book>> {
    update_book(id, &db, &user, input, WriteMode::Partial).await
}

async fn delete_book(
    BookPath { id }: BookPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    if !db.delete_book(id).await? {
        return Err(ServerError::BookByIdNotFound(id));
    }

    info!(book_id = %id, user_id = %user.user_id(), "Book deleted");
    Ok(StatusCode::NO_CONTENT)
}
