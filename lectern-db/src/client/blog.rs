use crate::{
    client::{
        DbClient, LikeTable, Result, checked_count, contains_pattern, now, push_page, storage_time,
    },
    record::{PostRecord, PostTagRecord, TagRecord},
};
use lectern_common::{
    model::{
        Id,
        like::LikeToggle,
        page::{Page, PageRequest},
        post::{NewPost, Post, PostChanges, PostMarker, RELATED_POSTS_LIMIT},
        tag::{Tag, TagMarker},
        user::UserMarker,
    },
    slug::{candidate, slugify_or},
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::info;

const POST_COLUMNS: &str = "
    posts.id,
    posts.title,
    posts.slug,
    posts.content,
    posts.image,
    posts.published_date,
    posts.created_date,
    posts.updated_date,
    posts.author_id,
    users.username AS author_username,
    (SELECT COUNT(*) FROM post_likes WHERE post_likes.post_id = posts.id) AS like_count";

const POST_FROM: &str = "FROM posts JOIN users ON users.id = posts.author_id";

/// Which posts a listing shows. Every listing is newest first by publication date.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum PostListing<'a> {
    /// Posts published at or before the given instant.
    Published(OffsetDateTime),
    /// Posts whose title, content or any tag name contains the query, ignoring case.
    Search(&'a str),
    Tagged(Id<TagMarker>),
    ByAuthor(Id<UserMarker>),
}

impl<'a> PostListing<'a> {
    fn push_filter(self, query: &mut QueryBuilder<'a, Sqlite>) {
        match self {
            Self::Published(now) => {
                query
                    .push(" WHERE posts.published_date <= ")
                    .push_bind(storage_time(now));
            }
            Self::Search(term) => {
                let pattern = contains_pattern(term);
                query
                    .push(" WHERE (posts.title LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\' OR posts.content LIKE ")
                    .push_bind(pattern.clone())
                    .push(
                        " ESCAPE '\\' OR EXISTS (
                            SELECT 1 FROM post_tags JOIN tags ON tags.id = post_tags.tag_id
                            WHERE post_tags.post_id = posts.id AND tags.name LIKE ",
                    )
                    .push_bind(pattern)
                    .push(" ESCAPE '\\'))");
            }
            Self::Tagged(tag) => {
                query
                    .push(
                        " WHERE EXISTS (
                            SELECT 1 FROM post_tags
                            WHERE post_tags.post_id = posts.id AND post_tags.tag_id = ",
                    )
                    .push_bind(tag.get())
                    .push(")");
            }
            Self::ByAuthor(author) => {
                query.push(" WHERE posts.author_id = ").push_bind(author.get());
            }
        }
    }
}

async fn load_tags(conn: &mut SqliteConnection, post_ids: &[i64]) -> Result<HashMap<i64, Vec<Tag>>> {
    let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
    if post_ids.is_empty() {
        return Ok(tags);
    }

    let mut query = QueryBuilder::<Sqlite>::new(
        "
        SELECT post_tags.post_id, tags.id, tags.name, tags.slug
        FROM post_tags JOIN tags ON tags.id = post_tags.tag_id
        WHERE post_tags.post_id IN (",
    );
    let mut separated = query.separated(", ");
    for id in post_ids {
        separated.push_bind(*id);
    }
    query.push(") ORDER BY tags.name, tags.id");

    let records: Vec<PostTagRecord> = query.build_query_as().fetch_all(&mut *conn).await?;
    for record in records {
        tags.entry(record.post_id)
            .or_default()
            .push(record.tag.into());
    }

    Ok(tags)
}

async fn with_tags(conn: &mut SqliteConnection, records: Vec<PostRecord>) -> Result<Vec<Post>> {
    let ids: Vec<i64> = records.iter().map(|record| record.id).collect();
    let mut tags = load_tags(conn, &ids).await?;

    let posts = records
        .into_iter()
        .map(|record| {
            let post_tags = tags.remove(&record.id).unwrap_or_default();
            record.into_post(post_tags)
        })
        .collect();
    Ok(posts)
}

async fn fetch_post_by_id(conn: &mut SqliteConnection, id: Id<PostMarker>) -> Result<Option<Post>> {
    let record: Option<PostRecord> =
        sqlx::query_as(&format!("SELECT {POST_COLUMNS} {POST_FROM} WHERE posts.id = ?"))
            .bind(id.get())
            .fetch_optional(&mut *conn)
            .await?;

    let Some(record) = record else {
        return Ok(None);
    };
    Ok(with_tags(conn, vec![record]).await?.pop())
}

/// The first of `base`, `base-1`, `base-2`, ... that no row of `table` uses as its slug yet.
async fn unique_slug(conn: &mut SqliteConnection, table: &'static str, base: &str) -> Result<String> {
    let mut attempt = 0;
    loop {
        let slug = candidate(base, attempt);
        let taken: bool =
            sqlx::query_scalar(&format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE slug = ?)"))
                .bind(&slug)
                .fetch_one(&mut *conn)
                .await?;
        if !taken {
            return Ok(slug);
        }
        attempt += 1;
    }
}

/// Replaces the tags of a post, creating tags that don't exist yet.
async fn set_post_tags(
    conn: &mut SqliteConnection,
    post_id: i64,
    names: &[String],
    now: OffsetDateTime,
) -> Result<()> {
    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(post_id)
        .execute(&mut *conn)
        .await?;

    for name in names {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

        let tag_id = match existing {
            Some(id) => id,
            None => {
                let slug = unique_slug(conn, "tags", &slugify_or(name, "tag")).await?;
                sqlx::query_scalar(
                    "
                    INSERT INTO tags (name, slug, created_at, updated_at)
                    VALUES (?, ?, ?, ?)
                    RETURNING id
                    ",
                )
                .bind(name)
                .bind(&slug)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *conn)
                .await?
            }
        };

        sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(post_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

impl DbClient {
    pub async fn list_posts(
        &self,
        listing: PostListing<'_>,
        request: PageRequest,
        page_size: u32,
    ) -> Result<Page<Post>> {
        let mut conn = self.pool.acquire().await?;

        let mut count_query = QueryBuilder::new(format!("SELECT COUNT(*) {POST_FROM}"));
        listing.push_filter(&mut count_query);
        let count = checked_count(&mut conn, count_query, request, page_size).await?;

        let mut query = QueryBuilder::new(format!("SELECT {POST_COLUMNS} {POST_FROM}"));
        listing.push_filter(&mut query);
        query.push(" ORDER BY posts.published_date DESC, posts.id DESC");
        push_page(&mut query, request, page_size);

        let records: Vec<PostRecord> = query.build_query_as().fetch_all(&mut *conn).await?;
        let posts = with_tags(&mut conn, records).await?;

        Ok(Page::new(posts, count, request, page_size))
    }

    pub async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        let mut conn = self.pool.acquire().await?;
        fetch_post_by_id(&mut conn, id).await
    }

    /// Up to three other posts by the same author, newest first.
    pub async fn fetch_related_posts(&self, post: &Post) -> Result<Vec<Post>> {
        let mut conn = self.pool.acquire().await?;

        let records: Vec<PostRecord> = sqlx::query_as(&format!(
            "
            SELECT {POST_COLUMNS} {POST_FROM}
            WHERE posts.author_id = ? AND posts.id != ?
            ORDER BY posts.published_date DESC, posts.id DESC
            LIMIT ?
            "
        ))
        .bind(post.author.id.get())
        .bind(post.id.get())
        .bind(RELATED_POSTS_LIMIT)
        .fetch_all(&mut *conn)
        .await?;

        with_tags(&mut conn, records).await
    }

    /// Creates a post with a slug derived from its title, unique among all posts.
    pub async fn create_post(&self, author: Id<UserMarker>, post: &NewPost) -> Result<Post> {
        let now = now();
        let published_date = post.published_date.map_or(now, storage_time);
        let mut tx = self.pool.begin().await?;

        let slug = unique_slug(&mut tx, "posts", &slugify_or(&post.title, "post")).await?;
        let id: i64 = sqlx::query_scalar(
            "
            INSERT INTO posts (
                title, slug, content, image, published_date, created_date, updated_date, author_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(&post.title)
        .bind(&slug)
        .bind(&post.content)
        .bind(post.image.as_deref())
        .bind(published_date)
        .bind(now)
        .bind(now)
        .bind(author.get())
        .fetch_one(&mut *tx)
        .await?;

        set_post_tags(&mut tx, id, &post.tags, now).await?;
        let created = fetch_post_by_id(&mut tx, id.into())
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        tx.commit().await?;

        info!(post_id = id, %slug, author_id = %author, "Created post");
        Ok(created)
    }

    /// Updates the given fields. The slug stays what it was at creation.
    pub async fn update_post(&self, id: Id<PostMarker>, changes: &PostChanges) -> Result<Option<Post>> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "
            UPDATE posts
            SET
                title = COALESCE(?, title),
                content = COALESCE(?, content),
                image = CASE WHEN ? THEN ? ELSE image END,
                published_date = COALESCE(?, published_date),
                updated_date = ?
            WHERE id = ?
            ",
        )
        .bind(changes.title.as_deref())
        .bind(changes.content.as_deref())
        .bind(changes.image.is_some())
        .bind(changes.image.as_ref().and_then(Option::as_deref))
        .bind(changes.published_date.map(storage_time))
        .bind(now)
        .bind(id.get())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        if let Some(tags) = &changes.tags {
            set_post_tags(&mut tx, id.get(), tags, now).await?;
        }

        let post = fetch_post_by_id(&mut tx, id).await?;
        tx.commit().await?;

        Ok(post)
    }

    /// Deletes the post with its comments, likes and tag links.
    pub async fn delete_post(&self, id: Id<PostMarker>) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            info!(post_id = %id, "Deleted post");
        }
        Ok(deleted > 0)
    }

    pub async fn is_post_liked(&self, post: Id<PostMarker>, user: Id<UserMarker>) -> Result<bool> {
        let liked = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM post_likes WHERE post_id = ? AND user_id = ?)",
        )
        .bind(post.get())
        .bind(user.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(liked)
    }

    pub async fn toggle_post_like(
        &self,
        post: Id<PostMarker>,
        user: Id<UserMarker>,
    ) -> Result<LikeToggle> {
        self.toggle_like(LikeTable::Post, post.get(), user).await
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        let records: Vec<TagRecord> =
            sqlx::query_as("SELECT id, name, slug FROM tags ORDER BY name, id")
                .fetch_all(&self.pool)
                .await?;

        Ok(records.into_iter().map(Tag::from).collect())
    }

    pub async fn fetch_tag_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        let record: Option<TagRecord> =
            sqlx::query_as("SELECT id, name, slug FROM tags WHERE slug = ?")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record.map(Tag::from))
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{
        DbClient,
        blog::PostListing,
        tests::{client, user},
    };
    use lectern_common::model::{
        Id,
        page::PageRequest,
        post::{NewPost, Post, PostChanges},
        user::UserMarker,
    };
    use tempfile::tempdir;
    use time::{Duration, OffsetDateTime};

    async fn post(db: &DbClient, author: Id<UserMarker>, title: &str, tags: &[&str]) -> Post {
        db.create_post(
            author,
            &NewPost {
                title: title.to_owned(),
                content: "Long enough content for a post, well past fifty characters.".to_owned(),
                image: None,
                published_date: None,
                tags: tags.iter().map(|&tag| tag.to_owned()).collect(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn colliding_titles_get_numbered_slugs() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;

        let first = post(&db, ada.id, "Hello World!", &[]).await;
        let second = post(&db, ada.id, "Hello, world", &[]).await;
        let third = post(&db, ada.id, "hello world", &[]).await;
        let symbols = post(&db, ada.id, "?!?!?!?!?!", &[]).await;

        assert_eq!(first.slug, "hello-world");
        assert_eq!(second.slug, "hello-world-1");
        assert_eq!(third.slug, "hello-world-2");
        assert_eq!(symbols.slug, "post");

        let renamed = db
            .update_post(
                first.id,
                &PostChanges {
                    title: Some("A different title".to_owned()),
                    ..PostChanges::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.slug, "hello-world");

        let illustrated = db
            .update_post(
                first.id,
                &PostChanges {
                    image: Some(Some("posts/cover.png".to_owned())),
                    ..PostChanges::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(illustrated.image.as_deref(), Some("posts/cover.png"));
        assert_eq!(illustrated.title, "A different title");

        let cleared = db
            .update_post(
                first.id,
                &PostChanges {
                    image: Some(None),
                    ..PostChanges::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleared.image, None);
    }

    #[tokio::test]
    async fn tags_are_shared_and_replaced() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;

        let first = post(&db, ada.id, "Notes on engines", &["rust", "engines"]).await;
        let second = post(&db, ada.id, "More about engines", &["rust"]).await;
        let names: Vec<_> = first.tags.iter().map(|tag| tag.name.as_str()).collect();
        assert_eq!(names, ["engines", "rust"]);
        assert_eq!(second.tags[0].id, first.tags[1].id);

        let updated = db
            .update_post(
                first.id,
                &PostChanges {
                    tags: Some(vec!["poetry".to_owned()]),
                    ..PostChanges::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.tags.len(), 1);
        assert_eq!(updated.tags[0].slug, "poetry");
        assert_eq!(db.list_tags().await.unwrap().len(), 3);

        let rust = db.fetch_tag_by_slug("rust").await.unwrap().unwrap();
        let tagged = db
            .list_posts(PostListing::Tagged(rust.id), PageRequest::default(), 10)
            .await
            .unwrap();
        assert_eq!(tagged.count, 1);
        assert_eq!(tagged.results[0].id, second.id);
    }

    #[tokio::test]
    async fn liking_twice_restores_the_count() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;
        let charles = user(&db, "charles", false).await;
        let engines = post(&db, ada.id, "Notes on engines", &[]).await;

        let liked = db.toggle_post_like(engines.id, charles.id).await.unwrap();
        assert!(liked.liked);
        assert_eq!(liked.like_count, 1);
        assert!(db.is_post_liked(engines.id, charles.id).await.unwrap());

        let unliked = db.toggle_post_like(engines.id, charles.id).await.unwrap();
        assert!(!unliked.liked);
        assert_eq!(unliked.like_count, 0);
        assert!(!db.is_post_liked(engines.id, charles.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_toggles_stay_consistent() {
        // A file database, so toggles really run on separate pooled connections.
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("likes.db").display());
        let db = DbClient::connect(&url).await.unwrap();
        let ada = user(&db, "ada", false).await;
        let charles = user(&db, "charles", false).await;
        let engines = post(&db, ada.id, "Notes on engines", &[]).await;

        let toggles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.toggle_post_like(engines.id, charles.id).await })
            })
            .collect();

        let mut likes = 0;
        for toggle in toggles {
            let toggle = toggle.await.unwrap().unwrap();
            assert_eq!(toggle.like_count, i64::from(toggle.liked));
            if toggle.liked {
                likes += 1;
            }
        }

        // Serialized toggles alternate, so an even number of them ends unliked.
        assert_eq!(likes, 4);
        assert!(!db.is_post_liked(engines.id, charles.id).await.unwrap());
        assert_eq!(db.fetch_post(engines.id).await.unwrap().unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn listings() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;
        let charles = user(&db, "charles", false).await;

        let engines = post(&db, ada.id, "Notes on engines", &["Mathematics"]).await;
        let poetry = post(&db, ada.id, "Poetical science", &[]).await;
        let differences = post(&db, charles.id, "Difference tables", &[]).await;
        let scheduled = db
            .create_post(
                charles.id,
                &NewPost {
                    title: "Published next week".to_owned(),
                    content: "Long enough content for a post, well past fifty characters."
                        .to_owned(),
                    image: None,
                    published_date: Some(OffsetDateTime::now_utc() + Duration::weeks(1)),
                    tags: Vec::new(),
                },
            )
            .await
            .unwrap();

        let published = db
            .list_posts(
                PostListing::Published(OffsetDateTime::now_utc()),
                PageRequest::default(),
                5,
            )
            .await
            .unwrap();
        let ids: Vec<_> = published.results.iter().map(|post| post.id).collect();
        assert_eq!(ids, [differences.id, poetry.id, engines.id]);

        let search = db
            .list_posts(PostListing::Search("MATHEMATICS"), PageRequest::default(), 10)
            .await
            .unwrap();
        assert_eq!(search.count, 1);
        assert_eq!(search.results[0].id, engines.id);

        let by_charles = db
            .list_posts(PostListing::ByAuthor(charles.id), PageRequest::default(), 5)
            .await
            .unwrap();
        assert_eq!(by_charles.results[0].id, scheduled.id);

        let related = db.fetch_related_posts(&engines).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, poetry.id);
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_posts() {
        let db = client().await;
        let ada = user(&db, "ada", false).await;
        let engines = post(&db, ada.id, "Notes on engines", &[]).await;

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(ada.id.get())
            .execute(&db.pool)
            .await
            .unwrap();
        assert_eq!(db.fetch_post(engines.id).await.unwrap(), None);
    }
}
