//! Access to the SQLite store.
//!
//! Every method that writes more than one row runs in a single transaction. Helpers that need to
//! run inside a caller's transaction take a `&mut SqliteConnection` instead of `&self`.

mod blog;
mod comments;
mod library;
mod users;

pub use blog::PostListing;

use lectern_common::model::{
    Id, ModelValidationError,
    author::AuthorMarker,
    comment::CommentMarker,
    like::LikeToggle,
    page::{InvalidPageError, PageRequest},
    user::UserMarker,
};
use sqlx::{
    QueryBuilder, Sqlite, SqliteConnection, SqlitePool,
    error::ErrorKind,
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::str::FromStr;
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error("Running migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error("A constraint was violated: {0}")]
    Integrity(String),
    #[error("Parent comment {0} does not exist on this post")]
    InvalidParent(Id<CommentMarker>),
    #[error("Parent comment {0} is already at the maximum reply depth")]
    ReplyTooDeep(Id<CommentMarker>),
    #[error("Author {0} does not exist")]
    UnknownAuthor(Id<AuthorMarker>),
    #[error(transparent)]
    InvalidPage(#[from] InvalidPageError),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error()
            && matches!(
                db_err.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            )
        {
            return Self::Integrity(db_err.message().to_owned());
        }

        Self::Sqlx(err)
    }
}

#[derive(Clone, Debug)]
pub struct DbClient {
    pool: SqlitePool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `database_url` and brings its schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Self::migrated(pool).await
    }

    /// A fresh private database that lives as long as the client.
    ///
    /// The pool holds exactly one connection that is never recycled, since every connection to
    /// `:memory:` sees its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!().run(&pool).await?;
        debug!("Database migrations applied");

        Ok(Self::new(pool))
    }
}

/// Timestamps are stored in UTC at whole-second precision, which keeps their text form in
/// chronological order.
pub(crate) fn storage_time(time: OffsetDateTime) -> OffsetDateTime {
    let time = time.to_offset(UtcOffset::UTC);
    time.replace_nanosecond(0).unwrap_or(time)
}

pub(crate) fn now() -> OffsetDateTime {
    storage_time(OffsetDateTime::now_utc())
}

/// Wraps `value` for `LIKE ? ESCAPE '\'` so that it only matches as a literal substring.
pub(crate) fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Counts the rows `count_query` yields, rejecting pages past the last one.
pub(crate) async fn checked_count(
    conn: &mut SqliteConnection,
    mut count_query: QueryBuilder<'_, Sqlite>,
    request: PageRequest,
    page_size: u32,
) -> Result<i64> {
    let count: i64 = count_query.build_query_scalar().fetch_one(&mut *conn).await?;
    request.check(count, page_size)?;

    Ok(count)
}

pub(crate) fn push_page(query: &mut QueryBuilder<'_, Sqlite>, request: PageRequest, page_size: u32) {
    query
        .push(" LIMIT ")
        .push_bind(i64::from(page_size))
        .push(" OFFSET ")
        .push_bind(request.offset(page_size));
}

/// The like sets of posts and comments are join tables of the same shape.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub(crate) enum LikeTable {
    Post,
    Comment,
}

impl LikeTable {
    fn table(self) -> &'static str {
        match self {
            Self::Post => "post_likes",
            Self::Comment => "comment_likes",
        }
    }

    fn target_column(self) -> &'static str {
        match self {
            Self::Post => "post_id",
            Self::Comment => "comment_id",
        }
    }
}

impl DbClient {
    /// Flips whether `user` likes `target`.
    ///
    /// The delete decides: if it removed a row the user had liked the target, otherwise the like
    /// is inserted. The primary key of the join table keeps concurrent toggles from adding twice.
    pub(crate) async fn toggle_like(
        &self,
        likes: LikeTable,
        target: i64,
        user: Id<UserMarker>,
    ) -> Result<LikeToggle> {
        let table = likes.table();
        let column = likes.target_column();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(&format!(
            "DELETE FROM {table} WHERE {column} = ? AND user_id = ?"
        ))
        .bind(target)
        .bind(user.get())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let liked = removed == 0;
        if liked {
            sqlx::query(&format!(
                "INSERT INTO {table} ({column}, user_id) VALUES (?, ?) ON CONFLICT DO NOTHING"
            ))
            .bind(target)
            .bind(user.get())
            .execute(&mut *tx)
            .await?;
        }

        let like_count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?"))
                .bind(target)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(LikeToggle { liked, like_count })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::client::{DbClient, contains_pattern};
    use lectern_common::model::user::{CreateUser, User};

    pub async fn client() -> DbClient {
        DbClient::in_memory().await.unwrap()
    }

    pub async fn user(db: &DbClient, username: &str, is_staff: bool) -> User {
        let (user, _profile) = db
            .create_user(&CreateUser {
                username: username.to_owned(),
                email: format!("{username}@example.com"),
                first_name: "Test".to_owned(),
                last_name: "User".to_owned(),
                password_hash: "not a real hash".to_owned(),
                is_staff,
                is_superuser: false,
            })
            .await
            .unwrap();
        user
    }

    #[test]
    fn patterns_escape_wildcards() {
        assert_eq!(contains_pattern("rust"), "%rust%");
        assert_eq!(contains_pattern("100%_\\"), "%100\\%\\_\\\\%");
    }
}
