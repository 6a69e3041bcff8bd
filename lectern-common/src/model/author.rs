use crate::{
    model::{
        Id,
        book::Book,
        sort::{Direction, Sort, SortField},
    },
    util::char_len,
    validation::{FieldError, LengthError, ValidationErrors, WriteMode},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;

pub const AUTHOR_NAME_MIN_LEN: usize = 2;
pub const AUTHOR_NAME_MAX_LEN: usize = 200;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AuthorMarker;

/// Full representation: the author with every book nested.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Author {
    pub id: Id<AuthorMarker>,
    pub name: String,
    pub books: Vec<Book>,
    pub books_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// List representation, without the nested books.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct AuthorSummary {
    pub id: Id<AuthorMarker>,
    pub name: String,
    pub books_count: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct AuthorBooksMetadata {
    pub total_books: i64,
    pub publication_years: Vec<i32>,
    pub latest_book: Option<String>,
}

/// `GET /authors/{id}/books`: the full author plus a summary of their bibliography.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct AuthorBooks {
    pub message: String,
    pub metadata: AuthorBooksMetadata,
    pub data: Author,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub struct AuthorInput {
    pub name: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewAuthor {
    pub name: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct AuthorChanges {
    pub name: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct AuthorFilter {
    pub name: Option<String>,
    pub search: Option<String>,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum AuthorSortField {
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
}

impl FromStr for AuthorSortField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "id" => Self::Id,
            "name" => Self::Name,
            "created_at" => Self::CreatedAt,
            "updated_at" => Self::UpdatedAt,
            _ => return Err(()),
        })
    }
}

impl SortField for AuthorSortField {
    const DEFAULT: Sort<Self> = Sort {
        field: Self::Name,
        direction: Direction::Ascending,
    };
}

/// Trims the name and checks what is left. The trimmed value is the one that gets stored.
pub fn validate_name(raw: &str) -> Result<String, FieldError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(FieldError::EmptyName);
    }

    let len = char_len(name);
    if len < AUTHOR_NAME_MIN_LEN {
        return Err(LengthError::TooShort {
            min: AUTHOR_NAME_MIN_LEN,
        }
        .into());
    }
    if len > AUTHOR_NAME_MAX_LEN {
        return Err(LengthError::TooLong {
            max: AUTHOR_NAME_MAX_LEN,
        }
        .into());
    }

    Ok(name.to_owned())
}

impl AuthorInput {
    pub fn validate_new(self) -> Result<NewAuthor, ValidationErrors> {
        let changes = self.validate(WriteMode::Full)?;
        match changes.name {
            Some(name) => Ok(NewAuthor { name }),
            None => Err(ValidationErrors::single("name", FieldError::Required)),
        }
    }

    pub fn validate(self, mode: WriteMode) -> Result<AuthorChanges, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = errors.field("name", mode, self.name, |name| validate_name(&name));

        errors.finish(AuthorChanges { name })
    }
}

impl AuthorBooks {
    #[must_use]
    pub fn new(author: Author) -> Self {
        Self {
            message: format!("Retrieved books for author: {}", author.name),
            metadata: AuthorBooksMetadata::from_books(&author.books),
            data: author,
        }
    }
}

impl AuthorBooksMetadata {
    /// Summarizes `books`, which must be every book of one author.
    #[must_use]
    pub fn from_books(books: &[Book]) -> Self {
        let mut publication_years: Vec<i32> =
            books.iter().map(|book| book.publication_year).collect();
        publication_years.sort_unstable();
        publication_years.dedup();

        let latest_book = books
            .iter()
            .max_by_key(|book| (book.publication_year, std::cmp::Reverse(book.id)))
            .map(|book| book.title.clone());

        Self {
            total_books: books.len().try_into().unwrap_or(i64::MAX),
            publication_years,
            latest_book,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        author::{AuthorBooksMetadata, AuthorInput, validate_name},
        book::Book,
    };
    use crate::validation::{FieldError, LengthError, WriteMode};
    use time::OffsetDateTime;

    #[test]
    fn names_are_trimmed() {
        assert_eq!(validate_name("  Ursula K. Le Guin \n"), Ok("Ursula K. Le Guin".to_owned()));
    }

    #[test]
    fn name_rules() {
        assert_eq!(validate_name("   "), Err(FieldError::EmptyName));
        assert_eq!(
            validate_name(" X "),
            Err(FieldError::Length(LengthError::TooShort { min: 2 }))
        );
        assert_eq!(
            validate_name(&"n".repeat(201)),
            Err(FieldError::Length(LengthError::TooLong { max: 200 }))
        );
        assert!(validate_name(&"n".repeat(200)).is_ok());
    }

    #[test]
    fn partial_input_may_omit_name() {
        let changes = AuthorInput::default().validate(WriteMode::Partial).unwrap();
        assert_eq!(changes.name, None);

        let errors = AuthorInput::default().validate_new().unwrap_err();
        assert_eq!(errors.get("name"), &[FieldError::Required]);
    }

    fn book(id: i64, title: &str, publication_year: i32) -> Book {
        Book {
            id: Id::new(id),
            title: title.to_owned(),
            publication_year,
            author: Id::new(1),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn metadata() {
        let books = [
            book(1, "A Wizard of Earthsea", 1968),
            book(2, "The Left Hand of Darkness", 1969),
            book(3, "The Tombs of Atuan", 1970),
            book(4, "The Farthest Shore", 1972),
            book(5, "The Lathe of Heaven", 1971),
            book(6, "Tehanu", 1972),
        ];
        let metadata = AuthorBooksMetadata::from_books(&books);

        assert_eq!(metadata.total_books, 6);
        assert_eq!(metadata.publication_years, [1968, 1969, 1970, 1971, 1972]);
        assert_eq!(metadata.latest_book.as_deref(), Some("The Farthest Shore"));

        let empty = AuthorBooksMetadata::from_books(&[]);
        assert_eq!(empty.total_books, 0);
        assert_eq!(empty.latest_book, None);
    }
}
