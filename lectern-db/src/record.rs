use lectern_common::model::{
    ModelValidationError,
    auth::Authentication,
    author::AuthorSummary,
    book::Book,
    comment::Comment,
    post::Post,
    tag::Tag,
    user::{Profile, User, UserSummary},
};
use time::{Date, Duration, OffsetDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct LoginRecord {
    #[sqlx(flatten)]
    pub user: UserRecord,
    pub password_hash: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct ProfileRecord {
    pub user_id: i64,
    pub bio: String,
    pub location: String,
    pub birth_date: Option<Date>,
    pub profile_pic: String,
    pub website: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_id: i64,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct AuthorRecord {
    pub id: i64,
    pub name: String,
    pub books_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct BookRecord {
    pub id: i64,
    pub title: String,
    pub publication_year: i32,
    pub author_id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A post row joined with its author's name and like count. Tags are loaded separately.
#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct PostRecord {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub image: Option<String>,
    pub published_date: OffsetDateTime,
    pub created_date: OffsetDateTime,
    pub updated_date: OffsetDateTime,
    pub author_id: i64,
    pub author_username: String,
    pub like_count: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct TagRecord {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct PostTagRecord {
    pub post_id: i64,
    #[sqlx(flatten)]
    pub tag: TagRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, sqlx::FromRow)]
pub(crate) struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub approved: bool,
    pub parent_id: Option<i64>,
    pub like_count: i64,
}

impl From<UserRecord> for User {
    fn from(value: UserRecord) -> Self {
        Self {
            id: value.id.into(),
            username: value.username,
            email: value.email,
            first_name: value.first_name,
            last_name: value.last_name,
            is_staff: value.is_staff,
            is_superuser: value.is_superuser,
            date_joined: value.date_joined,
        }
    }
}

impl From<ProfileRecord> for Profile {
    fn from(value: ProfileRecord) -> Self {
        Self {
            user_id: value.user_id.into(),
            bio: value.bio,
            location: value.location,
            birth_date: value.birth_date,
            profile_pic: value.profile_pic,
            website: value.website,
        }
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user_id.into(),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at,
            expires_after: value
                .expires_after_seconds
                .map(|seconds| Duration::seconds(seconds).try_into())
                .transpose()?,
        })
    }
}

impl From<AuthorRecord> for AuthorSummary {
    fn from(value: AuthorRecord) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            books_count: value.books_count,
        }
    }
}

impl From<BookRecord> for Book {
    fn from(value: BookRecord) -> Self {
        Self {
            id: value.id.into(),
            title: value.title,
            publication_year: value.publication_year,
            author: value.author_id.into(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<TagRecord> for Tag {
    fn from(value: TagRecord) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            slug: value.slug,
        }
    }
}

impl PostRecord {
    pub fn into_post(self, tags: Vec<Tag>) -> Post {
        Post {
            id: self.id.into(),
            title: self.title,
            slug: self.slug,
            content: self.content,
            image: self.image,
            published_date: self.published_date,
            created_date: self.created_date,
            updated_date: self.updated_date,
            author: UserSummary {
                id: self.author_id.into(),
                username: self.author_username,
            },
            tags,
            like_count: self.like_count,
        }
    }
}

impl From<CommentRecord> for Comment {
    fn from(value: CommentRecord) -> Self {
        Self {
            id: value.id.into(),
            post_id: value.post_id.into(),
            author: UserSummary {
                id: value.author_id.into(),
                username: value.author_username,
            },
            content: value.content,
            created_at: value.created_at,
            updated_at: value.updated_at,
            approved: value.approved,
            parent_id: value.parent_id.map(Into::into),
            like_count: value.like_count,
        }
    }
}
