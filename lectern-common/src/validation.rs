//! Field-scoped validation errors and the small helpers every input pipeline is built from.
//!
//! Each entity input runs a fixed sequence of field checks, collecting every failure into a
//! [`ValidationErrors`] instead of stopping at the first one.

use crate::util::char_len;
use serde::{Serialize, Serializer, ser::SerializeMap};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum LengthError {
    #[error("Ensure this field has at least {min} characters.")]
    TooShort { min: usize },
    #[error("Ensure this field has no more than {max} characters.")]
    TooLong { max: usize },
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum RangeError {
    #[error("Publication year cannot be in the future. Current year is {current_year}.")]
    InFuture { current_year: i32 },
    #[error("Publication year must be at least {min}.")]
    BeforeMinimum { min: i32 },
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum FieldError {
    #[error("This field is required.")]
    Required,
    #[error("This field may not be blank.")]
    Blank,
    #[error(transparent)]
    Length(#[from] LengthError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("Author name cannot be empty or just whitespace.")]
    EmptyName,
    #[error("Comment cannot be empty.")]
    EmptyComment,
    #[error("Invalid reply. The parent comment does not exist.")]
    InvalidParent,
    #[error("Replies can be nested at most {max} levels deep.")]
    ReplyTooDeep { max: usize },
    #[error("Invalid pk \"{0}\" - object does not exist.")]
    DoesNotExist(i64),
    #[error("{0}")]
    Invalid(&'static str),
}

/// Whether absent fields are an error (`Full`, used by create and PUT) or mean "unchanged" (`Partial`, PATCH).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum WriteMode {
    Full,
    Partial,
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ValidationErrors(BTreeMap<&'static str, Vec<FieldError>>);

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(field: &'static str, error: impl Into<FieldError>) -> Self {
        let mut errors = Self::new();
        errors.add(field, error);
        errors
    }

    pub fn add(&mut self, field: &'static str, error: impl Into<FieldError>) {
        self.0.entry(field).or_default().push(error.into());
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, errors) in other.0 {
            self.0.entry(field).or_default().extend(errors);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> &[FieldError] {
        self.0.get(field).map_or(&[], Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }

    /// Records the error of a failed check and yields the checked value otherwise.
    pub fn check<T>(
        &mut self,
        field: &'static str,
        result: Result<T, impl Into<FieldError>>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.add(field, error);
                None
            }
        }
    }

    /// Runs `validate` over a possibly absent input field.
    ///
    /// Absent fields are reported as [`FieldError::Required`] in [`WriteMode::Full`] and skipped
    /// in [`WriteMode::Partial`].
    pub fn field<T, U>(
        &mut self,
        field: &'static str,
        mode: WriteMode,
        value: Option<T>,
        validate: impl FnOnce(T) -> Result<U, FieldError>,
    ) -> Option<U> {
        match value {
            Some(value) => self.check(field, validate(value)),
            None => {
                if mode == WriteMode::Full {
                    self.add(field, FieldError::Required);
                }
                None
            }
        }
    }

    pub fn finish<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid fields:")?;
        for (field, errors) in &self.0 {
            for error in errors {
                write!(f, " {field}: {error}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl Serialize for ValidationErrors {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, errors) in &self.0 {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            map.serialize_entry(field, &messages)?;
        }
        map.end()
    }
}

pub fn validate_length(value: &str, min: usize, max: usize) -> Result<(), LengthError> {
    let len = char_len(value);
    if len < min {
        Err(LengthError::TooShort { min })
    } else if len > max {
        Err(LengthError::TooLong { max })
    } else {
        Ok(())
    }
}

/// Trims the value and rejects it when nothing is left, then applies the length bounds.
pub fn validate_text(value: &str, min: usize, max: usize) -> Result<String, FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldError::Blank);
    }
    validate_length(trimmed, min, max)?;
    Ok(trimmed.to_owned())
}

/// Like [`validate_text`], but an empty value is allowed.
pub fn validate_optional_text(value: &str, max: usize) -> Result<String, FieldError> {
    let trimmed = value.trim();
    validate_length(trimmed, 0, max)?;
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use crate::validation::{
        FieldError, LengthError, ValidationErrors, WriteMode, validate_length, validate_text,
    };

    #[test]
    fn length_bounds_are_inclusive() {
        assert_eq!(validate_length("abcde", 5, 10), Ok(()));
        assert_eq!(validate_length("abcdefghij", 5, 10), Ok(()));
        assert_eq!(
            validate_length("abcd", 5, 10),
            Err(LengthError::TooShort { min: 5 })
        );
        assert_eq!(
            validate_length("abcdefghijk", 5, 10),
            Err(LengthError::TooLong { max: 10 })
        );
        // Counted in characters, not bytes.
        assert_eq!(validate_length("ééééé", 5, 5), Ok(()));
    }

    #[test]
    fn text_is_trimmed() {
        assert_eq!(validate_text("  hello  ", 2, 10), Ok("hello".to_owned()));
        assert_eq!(validate_text("   ", 2, 10), Err(FieldError::Blank));
    }

    #[test]
    fn field_respects_write_mode() {
        let mut errors = ValidationErrors::new();
        let missing: Option<String> = None;
        assert_eq!(
            errors.field("title", WriteMode::Partial, missing.clone(), Ok),
            None
        );
        assert!(errors.is_empty());

        assert_eq!(errors.field("title", WriteMode::Full, missing, Ok), None);
        assert_eq!(errors.get("title"), &[FieldError::Required]);
    }

    #[test]
    fn errors_serialize_as_message_lists() {
        let mut errors = ValidationErrors::single("title", FieldError::Blank);
        errors.add("title", LengthError::TooShort { min: 10 });
        errors.add("content", FieldError::Required);

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "content": ["This field is required."],
                "title": [
                    "This field may not be blank.",
                    "Ensure this field has at least 10 characters."
                ],
            })
        );
    }
}
