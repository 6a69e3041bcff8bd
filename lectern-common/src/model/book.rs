use crate::{
    model::{
        Id,
        author::AuthorMarker,
        sort::{Direction, Sort, SortField},
    },
    validation::{FieldError, RangeError, ValidationErrors, WriteMode, validate_text},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;

pub const BOOK_TITLE_MAX_LEN: usize = 255;
pub const MIN_PUBLICATION_YEAR: i32 = 1000;
pub const RELATED_BOOKS_LIMIT: i64 = 5;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct BookMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Book {
    pub id: Id<BookMarker>,
    pub title: String,
    pub publication_year: i32,
    pub author: Id<AuthorMarker>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct RelatedBooks {
    pub message: String,
    pub books: Vec<Book>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct BookDetail {
    #[serde(flatten)]
    pub book: Book,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_books: Option<RelatedBooks>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct BookInput {
    pub title: Option<String>,
    pub publication_year: Option<i32>,
    pub author: Option<Id<AuthorMarker>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewBook {
    pub title: String,
    pub publication_year: i32,
    pub author: Id<AuthorMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct BookChanges {
    pub title: Option<String>,
    pub publication_year: Option<i32>,
    pub author: Option<Id<AuthorMarker>>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct BookFilter {
    pub title: Option<String>,
    pub author: Option<Id<AuthorMarker>>,
    pub author_name: Option<String>,
    pub publication_year: Option<i32>,
    pub publication_year_min: Option<i32>,
    pub publication_year_max: Option<i32>,
    /// Substring of the title or the author's name.
    pub search: Option<String>,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum BookSortField {
    Id,
    Title,
    PublicationYear,
    CreatedAt,
    UpdatedAt,
    AuthorName,
    AuthorId,
}

impl FromStr for BookSortField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "id" => Self::Id,
            "title" => Self::Title,
            "publication_year" => Self::PublicationYear,
            "created_at" => Self::CreatedAt,
            "updated_at" => Self::UpdatedAt,
            "author__name" => Self::AuthorName,
            "author__id" => Self::AuthorId,
            _ => return Err(()),
        })
    }
}

impl SortField for BookSortField {
    const DEFAULT: Sort<Self> = Sort {
        field: Self::CreatedAt,
        direction: Direction::Descending,
    };
}

pub fn validate_publication_year(year: i32, current_year: i32) -> Result<i32, RangeError> {
    if year > current_year {
        Err(RangeError::InFuture { current_year })
    } else if year < MIN_PUBLICATION_YEAR {
        Err(RangeError::BeforeMinimum {
            min: MIN_PUBLICATION_YEAR,
        })
    } else {
        Ok(year)
    }
}

pub fn validate_book_title(title: &str) -> Result<String, FieldError> {
    validate_text(title, 1, BOOK_TITLE_MAX_LEN)
}

impl BookInput {
    pub fn validate_new(self, current_year: i32) -> Result<NewBook, ValidationErrors> {
        let (errors, changes) = self.check_fields(WriteMode::Full, current_year);
        let (Some(title), Some(publication_year), Some(author)) =
            (changes.title, changes.publication_year, changes.author)
        else {
            return Err(errors);
        };

        let book = errors.finish(NewBook {
            title,
            publication_year,
            author,
        })?;
        book.validate_object()?;

        Ok(book)
    }

    pub fn validate(
        self,
        mode: WriteMode,
        current_year: i32,
    ) -> Result<BookChanges, ValidationErrors> {
        let (errors, changes) = self.check_fields(mode, current_year);
        let changes = errors.finish(changes)?;

        Ok(changes)
    }

    /// Field checks, in order: title, publication year, author presence.
    ///
    /// Whether the author exists is checked against the store by the caller.
    fn check_fields(self, mode: WriteMode, current_year: i32) -> (ValidationErrors, BookChanges) {
        let mut errors = ValidationErrors::new();

        let title = errors.field("title", mode, self.title, |title| {
            validate_book_title(&title)
        });
        let publication_year =
            errors.field("publication_year", mode, self.publication_year, |year| {
                validate_publication_year(year, current_year).map_err(FieldError::from)
            });
        let author = errors.field("author", mode, self.author, Ok);

        let changes = BookChanges {
            title,
            publication_year,
            author,
        };
        (errors, changes)
    }
}

impl BookDetail {
    /// `related` are other books by the same author, named `author_name`.
    #[must_use]
    pub fn new(book: Book, related: Vec<Book>, author_name: &str) -> Self {
        let related_books = (!related.is_empty()).then(|| RelatedBooks {
            message: format!("Other books by {author_name}"),
            books: related,
        });

        Self {
            book,
            related_books,
        }
    }
}

impl NewBook {
    /// Cross-field hook. There are no rules that combine fields, so it never rejects.
    pub fn validate_object(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        book::{BookInput, validate_publication_year},
    };
    use crate::validation::{FieldError, RangeError, WriteMode};

    const CURRENT_YEAR: i32 = 2025;

    #[test]
    fn publication_year_bounds() {
        assert_eq!(validate_publication_year(1000, CURRENT_YEAR), Ok(1000));
        assert_eq!(validate_publication_year(2025, CURRENT_YEAR), Ok(2025));
        assert_eq!(
            validate_publication_year(2026, CURRENT_YEAR),
            Err(RangeError::InFuture { current_year: 2025 })
        );
        assert_eq!(
            validate_publication_year(999, CURRENT_YEAR),
            Err(RangeError::BeforeMinimum { min: 1000 })
        );
    }

    #[test]
    fn every_invalid_field_is_reported() {
        let errors = BookInput {
            title: Some("   ".to_owned()),
            publication_year: Some(3000),
            author: None,
        }
        .validate(WriteMode::Full, CURRENT_YEAR)
        .unwrap_err();

        assert_eq!(errors.get("title"), &[FieldError::Blank]);
        assert_eq!(
            errors.get("publication_year"),
            &[FieldError::Range(RangeError::InFuture { current_year: 2025 })]
        );
        assert_eq!(errors.get("author"), &[FieldError::Required]);
    }

    #[test]
    fn partial_update_only_checks_present_fields() {
        let changes = BookInput {
            publication_year: Some(1999),
            ..BookInput::default()
        }
        .validate(WriteMode::Partial, CURRENT_YEAR)
        .unwrap();

        assert_eq!(changes.title, None);
        assert_eq!(changes.publication_year, Some(1999));
    }

    #[test]
    fn new_book() {
        let book = BookInput {
            title: Some(" Dune ".to_owned()),
            publication_year: Some(1965),
            author: Some(Id::new(3)),
        }
        .validate_new(CURRENT_YEAR)
        .unwrap();

        assert_eq!(book.title, "Dune");
        assert_eq!(book.author, Id::new(3));
    }
}
