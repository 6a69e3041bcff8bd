use crate::{
    client::{DbClient, DbError, Result, checked_count, contains_pattern, now, push_page},
    record::{AuthorRecord, BookRecord},
};
use lectern_common::model::{
    Id,
    author::{Author, AuthorChanges, AuthorFilter, AuthorMarker, AuthorSortField, AuthorSummary, NewAuthor},
    book::{Book, BookChanges, BookFilter, BookMarker, BookSortField, NewBook, RELATED_BOOKS_LIMIT},
    page::{Page, PageRequest},
    sort::{Direction, Ordering, Sort, SortField},
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::info;

const AUTHOR_COLUMNS: &str = "
    authors.id,
    authors.name,
    (SELECT COUNT(*) FROM books WHERE books.author_id = authors.id) AS books_count,
    authors.created_at,
    authors.updated_at";

const BOOK_COLUMNS: &str = "
    books.id,
    books.title,
    books.publication_year,
    books.author_id,
    books.created_at,
    books.updated_at";

fn direction_sql(direction: Direction) -> &'static str {
    match direction {
        Direction::Ascending => "ASC",
        Direction::Descending => "DESC",
    }
}

/// `ORDER BY` for the requested sorts, with the row id as the final tiebreaker.
fn push_order_by<Field: SortField>(
    query: &mut QueryBuilder<'_, Sqlite>,
    ordering: &Ordering<Field>,
    column: impl Fn(Field) -> &'static str,
    id_column: &str,
) {
    let mut separated = query.separated(", ");
    separated.push_unseparated(" ORDER BY ");
    for Sort { field, direction } in ordering.sorts() {
        separated.push(format!("{} {}", column(*field), direction_sql(*direction)));
    }
    let tiebreak = ordering
        .sorts()
        .first()
        .map_or(Direction::Ascending, |sort| sort.direction);
    separated.push(format!("{id_column} {}", direction_sql(tiebreak)));
}

fn book_column(field: BookSortField) -> &'static str {
    match field {
        BookSortField::Id => "books.id",
        BookSortField::Title => "books.title",
        BookSortField::PublicationYear => "books.publication_year",
        BookSortField::CreatedAt => "books.created_at",
        BookSortField::UpdatedAt => "books.updated_at",
        BookSortField::AuthorName => "authors.name",
        BookSortField::AuthorId => "books.author_id",
    }
}

fn author_column(field: AuthorSortField) -> &'static str {
    match field {
        AuthorSortField::Id => "authors.id",
        AuthorSortField::Name => "authors.name",
        AuthorSortField::CreatedAt => "authors.created_at",
        AuthorSortField::UpdatedAt => "authors.updated_at",
    }
}

fn push_book_filters<'args>(query: &mut QueryBuilder<'args, Sqlite>, filter: &'args BookFilter) {
    if let Some(title) = &filter.title {
        query.push(" AND books.title = ").push_bind(title);
    }
    if let Some(author) = filter.author {
        query.push(" AND books.author_id = ").push_bind(author.get());
    }
    if let Some(author_name) = &filter.author_name {
        query
            .push(" AND authors.name LIKE ")
            .push_bind(contains_pattern(author_name))
            .push(" ESCAPE '\\'");
    }
    if let Some(year) = filter.publication_year {
        query.push(" AND books.publication_year = ").push_bind(year);
    }
    if let Some(min) = filter.publication_year_min {
        query.push(" AND books.publication_year >= ").push_bind(min);
    }
    if let Some(max) = filter.publication_year_max {
        query.push(" AND books.publication_year <= ").push_bind(max);
    }
    if let Some(search) = &filter.search {
        let pattern = contains_pattern(search);
        query
            .push(" AND (books.title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR authors.name LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

fn push_author_filters<'args>(query: &mut QueryBuilder<'args, Sqlite>, filter: &'args AuthorFilter) {
    if let Some(name) = &filter.name {
        query.push(" AND authors.name = ").push_bind(name);
    }
    if let Some(search) = &filter.search {
        query
            .push(" AND authors.name LIKE ")
            .push_bind(contains_pattern(search))
            .push(" ESCAPE '\\'");
    }
}

async fn author_exists(conn: &mut SqliteConnection, id: Id<AuthorMarker>) -> Result<bool> {
    let exists = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM authors WHERE id = ?)")
        .bind(id.get())
        .fetch_one(&mut *conn)
        .await?;

    Ok(exists)
}

async fn fetch_book_by_id(conn: &mut SqliteConnection, id: Id<BookMarker>) -> Result<Option<Book>> {
    let record: Option<BookRecord> =
        sqlx::query_as(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE books.id = ?"))
            .bind(id.get())
            .fetch_optional(&mut *conn)
            .await?;

    Ok(record.map(Book::from))
}

async fn fetch_author_by_id(
    conn: &mut SqliteConnection,
    id: Id<AuthorMarker>,
) -> Result<Option<Author>> {
    let record: Option<AuthorRecord> = sqlx::query_as(&format!(
        "SELECT {AUTHOR_COLUMNS} FROM authors WHERE authors.id = ?"
    ))
    .bind(id.get())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(record) = record else {
        return Ok(None);
    };

    let books: Vec<BookRecord> = sqlx::query_as(&format!(
        "SELECT {BOOK_COLUMNS} FROM books WHERE books.author_id = ? ORDER BY books.id"
    ))
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(Author {
        id: record.id.into(),
        name: record.name,
        books: books.into_iter().map(Book::from).collect(),
        books_count: record.books_count,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }))
}

impl DbClient {
    pub async fn list_authors(
        &self,
        filter: &AuthorFilter,
        ordering: &Ordering<AuthorSortField>,
        request: PageRequest,
        page_size: u32,
    ) -> Result<Page<AuthorSummary>> {
        let mut conn = self.pool.acquire().await?;

        let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM authors WHERE 1 = 1");
        push_author_filters(&mut count_query, filter);
        let count = checked_count(&mut conn, count_query, request, page_size).await?;

        let mut query =
            QueryBuilder::new(format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE 1 = 1"));
        push_author_filters(&mut query, filter);
        push_order_by(&mut query, ordering, author_column, "authors.id");
        push_page(&mut query, request, page_size);

        let records: Vec<AuthorRecord> = query.build_query_as().fetch_all(&mut *conn).await?;
        let authors = records.into_iter().map(AuthorSummary::from).collect();

        Ok(Page::new(authors, count, request, page_size))
    }

    /// The full author, books nested in id order.
    pub async fn fetch_author(&self, id: Id<AuthorMarker>) -> Result<Option<Author>> {
        let mut conn = self.pool.acquire().await?;
        fetch_author_by_id(&mut conn, id).await
    }

    pub async fn create_author(&self, author: &NewAuthor) -> Result<Author> {
        let now = now();

        let record: AuthorRecord = sqlx::query_as(
            "
            INSERT INTO authors (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING id, name, 0 AS books_count, created_at, updated_at
            ",
        )
        .bind(&author.name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        info!(author_id = record.id, "Created author");
        Ok(Author {
            id: record.id.into(),
            name: record.name,
            books: Vec::new(),
            books_count: record.books_count,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub async fn update_author(
        &self,
        id: Id<AuthorMarker>,
        changes: &AuthorChanges,
    ) -> Result<Option<Author>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "
            UPDATE authors
            SET name = COALESCE(?, name), updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(changes.name.as_deref())
        .bind(now())
        .bind(id.get())
        .execute(&mut *tx)
        .await?;

        let author = fetch_author_by_id(&mut tx, id).await?;
        tx.commit().await?;

        Ok(author)
    }

    /// Deletes the author and, through the foreign key, all of their books.
    pub async fn delete_author(&self, id: Id<AuthorMarker>) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM authors WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            info!(author_id = %id, "Deleted author");
        }
        Ok(deleted > 0)
    }

    pub async fn list_books(
        &self,
        filter: &BookFilter,
        ordering: &Ordering<BookSortField>,
        request: PageRequest,
        page_size: u32,
    ) -> Result<Page<Book>> {
        let mut conn = self.pool.acquire().await?;
        let from = "FROM books JOIN authors ON authors.id = books.author_id WHERE 1 = 1";

        let mut count_query = QueryBuilder::new(format!("SELECT COUNT(*) {from}"));
        push_book_filters(&mut count_query, filter);
        let count = checked_count(&mut conn, count_query, request, page_size).await?;

        let mut query = QueryBuilder::new(format!("SELECT {BOOK_COLUMNS} {from}"));
        push_book_filters(&mut query, filter);
        push_order_by(&mut query, ordering, book_column, "books.id");
        push_page(&mut query, request, page_size);

        let records: Vec<BookRecord> = query.build_query_as().fetch_all(&mut *conn).await?;
        let books = records.into_iter().map(Book::from).collect();

        Ok(Page::new(books, count, request, page_size))
    }

    pub async fn fetch_book(&self, id: Id<BookMarker>) -> Result<Option<Book>> {
        let mut conn = self.pool.acquire().await?;
        fetch_book_by_id(&mut conn, id).await
    }

    /// Up to five other books by the same author, in id order.
    pub async fn fetch_related_books(&self, book: &Book) -> Result<Vec<Book>> {
        let records: Vec<BookRecord> = sqlx::query_as(&format!(
            "
            SELECT {BOOK_COLUMNS}
            FROM books
            WHERE books.author_id = ? AND books.id != ?
            ORDER BY books.id
            LIMIT ?
            "
        ))
        .bind(book.author.get())
        .bind(book.id.get())
        .bind(RELATED_BOOKS_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Book::from).collect())
    }

    pub async fn create_book(&self, book: &NewBook) -> Result<Book> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        if !author_exists(&mut tx, book.author).await? {
            return Err(DbError::UnknownAuthor(book.author));
        }

        let record: BookRecord = sqlx::query_as(&format!(
            "
            INSERT INTO books (title, publication_year, author_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING {BOOK_COLUMNS}
            "
        ))
        .bind(&book.title)
        .bind(book.publication_year)
        .bind(book.author.get())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(book_id = record.id, author_id = record.author_id, "Created book");
        Ok(record.into())
    }

    pub async fn update_book(
        &self,
        id: Id<BookMarker>,
        changes: &BookChanges,
    ) -> Result<Option<Book>> {
        let mut tx = self.pool.begin().await?;

        if let Some(author) = changes.author
            && !author_exists(&mut tx, author).await?
        {
            return Err(DbError::UnknownAuthor(author));
        }

        let record: Option<BookRecord> = sqlx::query_as(&format!(
            "
            UPDATE books
            SET
                title = COALESCE(?, title),
                publication_year = COALESCE(?, publication_year),
                author_id = COALESCE(?, author_id),
                updated_at = ?
            WHERE id = ?
            RETURNING {BOOK_COLUMNS}
            "
        ))
        .bind(changes.title.as_deref())
        .bind(changes.publication_year)
        .bind(changes.author.map(Id::get))
        .bind(now())
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record.map(Book::from))
    }

    pub async fn delete_book(&self, id: Id<BookMarker>) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }
}
