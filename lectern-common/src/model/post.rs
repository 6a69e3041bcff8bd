use crate::{
    model::{
        Id,
        comment::CommentThread,
        tag::{Tag, validate_tag_names},
        user::{User, UserSummary},
    },
    util::nullable,
    validation::{FieldError, ValidationErrors, WriteMode, validate_length, validate_text},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const POST_TITLE_MIN_LEN: usize = 10;
pub const POST_TITLE_MAX_LEN: usize = 200;
pub const POST_CONTENT_MIN_LEN: usize = 50;
pub const POST_IMAGE_MAX_LEN: usize = 100;
pub const SEARCH_QUERY_MAX_LEN: usize = 100;
pub const RELATED_POSTS_LIMIT: i64 = 3;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_date: OffsetDateTime,
    pub author: UserSummary,
    pub tags: Vec<Tag>,
    pub like_count: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct PostDetail {
    pub post: Post,
    pub is_liked: bool,
    pub total_likes: i64,
    pub related_posts: Vec<Post>,
    pub comments: Vec<CommentThread>,
    pub comment_count: usize,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct PostInput {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub image: Option<Option<String>>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_date: Option<OffsetDateTime>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    /// Defaults to the time of creation.
    pub published_date: Option<OffsetDateTime>,
    pub tags: Vec<String>,
}

/// Absent fields stay as they are. The slug is never regenerated.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    /// `Some(None)` removes the image.
    pub image: Option<Option<String>>,
    pub published_date: Option<OffsetDateTime>,
    pub tags: Option<Vec<String>>,
}

impl Post {
    #[must_use]
    pub fn can_be_modified_by(&self, user: &User) -> bool {
        self.author.id == user.id || user.is_superuser
    }
}

pub fn validate_post_title(title: &str) -> Result<String, FieldError> {
    validate_text(title, POST_TITLE_MIN_LEN, POST_TITLE_MAX_LEN)
}

pub fn validate_post_content(content: &str) -> Result<String, FieldError> {
    let content = validate_text(content, 1, usize::MAX)?;
    if validate_length(&content, POST_CONTENT_MIN_LEN, usize::MAX).is_err() {
        return Err(FieldError::Invalid(
            "Content is too short. Please provide more details.",
        ));
    }
    Ok(content)
}

fn validate_image(image: String) -> Result<String, FieldError> {
    validate_text(&image, 1, POST_IMAGE_MAX_LEN)
}

/// The `q` of a post search: required, trimmed, at most 100 characters.
pub fn validate_search_query(raw: Option<String>) -> Result<String, ValidationErrors> {
    let query = raw.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(ValidationErrors::single(
            "q",
            FieldError::Invalid("Please enter a search term."),
        ));
    }
    validate_length(query, 1, SEARCH_QUERY_MAX_LEN)
        .map_err(|err| ValidationErrors::single("q", err))?;

    Ok(query.to_owned())
}

impl PostInput {
    pub fn validate_new(self) -> Result<NewPost, ValidationErrors> {
        let (errors, changes) = self.check_fields(WriteMode::Full);
        let (Some(title), Some(content)) = (changes.title, changes.content) else {
            return Err(errors);
        };

        errors.finish(NewPost {
            title,
            content,
            image: changes.image.flatten(),
            published_date: changes.published_date,
            tags: changes.tags.unwrap_or_default(),
        })
    }

    pub fn validate(self, mode: WriteMode) -> Result<PostChanges, ValidationErrors> {
        let (errors, changes) = self.check_fields(mode);
        errors.finish(changes)
    }

    /// Title and content are required in full writes; image, date and tags never are.
    fn check_fields(self, mode: WriteMode) -> (ValidationErrors, PostChanges) {
        let mut errors = ValidationErrors::new();

        let title = errors.field("title", mode, self.title, |title| {
            validate_post_title(&title)
        });
        let content = errors.field("content", mode, self.content, |content| {
            validate_post_content(&content)
        });
        let image = match self.image {
            Some(Some(image)) => errors
                .field("image", WriteMode::Partial, Some(image), validate_image)
                .map(Some),
            cleared => cleared,
        };
        let tags = errors.field("tags", WriteMode::Partial, self.tags, validate_tag_names);

        let changes = PostChanges {
            title,
            content,
            image,
            published_date: self.published_date,
            tags,
        };
        (errors, changes)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        post::{Post, PostInput, validate_search_query},
        user::{User, UserSummary},
    };
    use crate::validation::{FieldError, LengthError, WriteMode};
    use time::OffsetDateTime;

    fn content() -> String {
        "A body that is comfortably longer than the fifty character minimum.".to_owned()
    }

    #[test]
    fn new_post() {
        let post = PostInput {
            title: Some("Writing Rust services".to_owned()),
            content: Some(content()),
            tags: Some(vec!["rust".to_owned(), "web".to_owned(), "rust".to_owned()]),
            ..PostInput::default()
        }
        .validate_new()
        .unwrap();

        assert_eq!(post.tags, ["rust", "web"]);
        assert_eq!(post.image, None);
    }

    #[test]
    fn title_and_content_limits() {
        let errors = PostInput {
            title: Some("Too short".to_owned()),
            content: Some("Also short".to_owned()),
            ..PostInput::default()
        }
        .validate_new()
        .unwrap_err();

        assert_eq!(
            errors.get("title"),
            &[FieldError::Length(LengthError::TooShort { min: 10 })]
        );
        assert_eq!(
            errors.get("content"),
            &[FieldError::Invalid(
                "Content is too short. Please provide more details."
            )]
        );
    }

    #[test]
    fn partial_changes() {
        let changes = PostInput {
            image: Some(Some("posts/cover.png".to_owned())),
            ..PostInput::default()
        }
        .validate(WriteMode::Partial)
        .unwrap();
        assert_eq!(changes.title, None);
        assert_eq!(changes.image, Some(Some("posts/cover.png".to_owned())));

        let absent: PostInput = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.validate(WriteMode::Partial).unwrap().image, None);
        let cleared: PostInput = serde_json::from_str(r#"{"image": null}"#).unwrap();
        assert_eq!(cleared.validate(WriteMode::Partial).unwrap().image, Some(None));

        assert!(PostInput::default().validate(WriteMode::Full).is_err());
    }

    #[test]
    fn search_query() {
        assert_eq!(validate_search_query(Some(" rust ".to_owned())), Ok("rust".to_owned()));
        assert!(validate_search_query(Some("   ".to_owned())).is_err());
        assert!(validate_search_query(None).is_err());
        assert!(validate_search_query(Some("q".repeat(101))).is_err());
    }

    fn user(id: i64, is_staff: bool, is_superuser: bool) -> User {
        User {
            id: Id::new(id),
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            first_name: String::new(),
            last_name: String::new(),
            is_staff,
            is_superuser,
            date_joined: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn only_author_or_superuser_modifies() {
        let post = Post {
            id: Id::new(1),
            title: "Writing Rust services".to_owned(),
            slug: "writing-rust-services".to_owned(),
            content: content(),
            image: None,
            published_date: OffsetDateTime::UNIX_EPOCH,
            created_date: OffsetDateTime::UNIX_EPOCH,
            updated_date: OffsetDateTime::UNIX_EPOCH,
            author: UserSummary {
                id: Id::new(1),
                username: "user1".to_owned(),
            },
            tags: Vec::new(),
            like_count: 0,
        };

        assert!(post.can_be_modified_by(&user(1, false, false)));
        assert!(post.can_be_modified_by(&user(2, false, true)));
        assert!(!post.can_be_modified_by(&user(3, true, false)));
    }
}
