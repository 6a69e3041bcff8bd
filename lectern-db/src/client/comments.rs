use crate::{
    client::{DbClient, DbError, LikeTable, Result, now},
    record::CommentRecord,
};
use lectern_common::model::{
    Id,
    comment::{Comment, CommentChanges, CommentMarker, MAX_REPLY_DEPTH, NewComment},
    like::LikeToggle,
    post::PostMarker,
    user::UserMarker,
};
use sqlx::SqliteConnection;
use tracing::info;

const COMMENT_COLUMNS: &str = "
    comments.id,
    comments.post_id,
    comments.author_id,
    users.username AS author_username,
    comments.content,
    comments.created_at,
    comments.updated_at,
    comments.approved,
    comments.parent_id,
    (SELECT COUNT(*) FROM comment_likes WHERE comment_likes.comment_id = comments.id) AS like_count";

const COMMENT_FROM: &str = "FROM comments JOIN users ON users.id = comments.author_id";

async fn fetch_comment_by_id(
    conn: &mut SqliteConnection,
    id: Id<CommentMarker>,
) -> Result<Option<Comment>> {
    let record: Option<CommentRecord> = sqlx::query_as(&format!(
        "SELECT {COMMENT_COLUMNS} {COMMENT_FROM} WHERE comments.id = ?"
    ))
    .bind(id.get())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(record.map(Comment::from))
}

impl DbClient {
    /// The approved comments of a post, replies included, newest first.
    pub async fn list_approved_comments(&self, post: Id<PostMarker>) -> Result<Vec<Comment>> {
        let records: Vec<CommentRecord> = sqlx::query_as(&format!(
            "
            SELECT {COMMENT_COLUMNS} {COMMENT_FROM}
            WHERE comments.post_id = ? AND comments.approved
            ORDER BY comments.created_at DESC, comments.id DESC
            "
        ))
        .bind(post.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Comment::from).collect())
    }

    pub async fn fetch_comment(&self, id: Id<CommentMarker>) -> Result<Option<Comment>> {
        let mut conn = self.pool.acquire().await?;
        fetch_comment_by_id(&mut conn, id).await
    }

    /// Adds a comment to `post`.
    ///
    /// A parent must be a comment on the same post, otherwise this fails with
    /// [`DbError::InvalidParent`] and nothing is written. A reply deeper than
    /// [`MAX_REPLY_DEPTH`] fails with [`DbError::ReplyTooDeep`].
    pub async fn create_comment(
        &self,
        post: Id<PostMarker>,
        author: Id<UserMarker>,
        comment: &NewComment,
    ) -> Result<Comment> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        if let Some(parent) = comment.parent {
            // Length of the chain from the parent up to its top-level comment, which is the
            // depth the new reply lands at. Zero means the parent is not on this post.
            let depth: i64 = sqlx::query_scalar(
                "
                WITH RECURSIVE chain (id, parent_id) AS (
                    SELECT id, parent_id FROM comments WHERE id = ? AND post_id = ?
                    UNION ALL
                    SELECT comments.id, comments.parent_id
                    FROM comments JOIN chain ON comments.id = chain.parent_id
                )
                SELECT COUNT(*) FROM chain
                ",
            )
            .bind(parent.get())
            .bind(post.get())
            .fetch_one(&mut *tx)
            .await?;

            if depth == 0 {
                return Err(DbError::InvalidParent(parent));
            }
            if usize::try_from(depth).unwrap_or(usize::MAX) > MAX_REPLY_DEPTH {
                return Err(DbError::ReplyTooDeep(parent));
            }
        }

        let id: i64 = sqlx::query_scalar(
            "
            INSERT INTO comments (post_id, author_id, content, created_at, updated_at, approved, parent_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(post.get())
        .bind(author.get())
        .bind(&comment.content)
        .bind(now)
        .bind(now)
        .bind(comment.approved)
        .bind(comment.parent.map(Id::get))
        .fetch_one(&mut *tx)
        .await?;

        let created = fetch_comment_by_id(&mut tx, id.into())
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        tx.commit().await?;

        info!(
            comment_id = id,
            post_id = %post,
            author_id = %author,
            approved = comment.approved,
            "Created comment"
        );
        Ok(created)
    }

    /// Replaces the content. Neither the post nor the parent of a comment ever change.
    pub async fn update_comment(
        &self,
        id: Id<CommentMarker>,
        changes: &CommentChanges,
    ) -> Result<Option<Comment>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE comments SET content = COALESCE(?, content), updated_at = ? WHERE id = ?",
        )
        .bind(changes.content.as_deref())
        .bind(now())
        .bind(id.get())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }

        let comment = fetch_comment_by_id(&mut tx, id).await?;
        tx.commit().await?;

        Ok(comment)
    }

    /// Deletes the comment together with every reply below it.
    pub async fn delete_comment(&self, id: Id<CommentMarker>) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            info!(comment_id = %id, "Deleted comment");
        }
        Ok(deleted > 0)
    }

    pub async fn toggle_comment_like(
        &self,
        comment: Id<CommentMarker>,
        user: Id<UserMarker>,
    ) -> Result<LikeToggle> {
        self.toggle_like(LikeTable::Comment, comment.get(), user).await
    }

    /// Flips the approval flag of one comment and returns its new value. Replies keep theirs.
    pub async fn toggle_comment_approval(&self, id: Id<CommentMarker>) -> Result<Option<bool>> {
        let approved = sqlx::query_scalar(
            "
            UPDATE comments
            SET approved = NOT approved, updated_at = ?
            WHERE id = ?
            RETURNING approved
            ",
        )
        .bind(now())
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(approved)
    }
}
