use crate::{
    model::Id,
    validation::{FieldError, LengthError, validate_text},
};
use serde::{Deserialize, Serialize};

pub const TAG_NAME_MIN_LEN: usize = 2;
pub const TAG_NAME_MAX_LEN: usize = 50;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct TagMarker;

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
pub struct Tag {
    pub id: Id<TagMarker>,
    pub name: String,
    pub slug: String,
}

pub fn validate_tag_name(raw: &str) -> Result<String, FieldError> {
    validate_text(raw, TAG_NAME_MIN_LEN, TAG_NAME_MAX_LEN).map_err(|err| match err {
        FieldError::Length(LengthError::TooShort { .. }) => {
            FieldError::Invalid("Tag must be at least 2 characters long")
        }
        other => other,
    })
}

/// Validates every name and drops repeats, keeping the first occurrence.
pub fn validate_tag_names(raw: Vec<String>) -> Result<Vec<String>, FieldError> {
    let mut names: Vec<String> = Vec::with_capacity(raw.len());
    for name in raw {
        let name = validate_tag_name(&name)?;
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use crate::model::tag::validate_tag_names;
    use crate::validation::FieldError;

    #[test]
    fn names_are_checked_and_deduplicated() {
        let names = validate_tag_names(vec![
            " rust ".to_owned(),
            "web".to_owned(),
            "rust".to_owned(),
        ]);
        assert_eq!(names, Ok(vec!["rust".to_owned(), "web".to_owned()]));

        assert_eq!(
            validate_tag_names(vec!["ok".to_owned(), "x".to_owned()]),
            Err(FieldError::Invalid("Tag must be at least 2 characters long"))
        );
    }
}
