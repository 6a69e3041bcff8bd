//! `?ordering=` parsing: a comma separated list of field names, each optionally prefixed with `-`.

use std::str::FromStr;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Sort<Field> {
    pub field: Field,
    pub direction: Direction,
}

pub trait SortField: FromStr + Copy {
    const DEFAULT: Sort<Self>;
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Ordering<Field>(Vec<Sort<Field>>);

impl<Field: SortField> Ordering<Field> {
    /// Unknown field names are dropped. If nothing usable is left the default ordering applies.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let sorts: Vec<_> = raw
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter_map(|term| {
                let (direction, name) = match term.strip_prefix('-') {
                    Some(name) => (Direction::Descending, name),
                    None => (Direction::Ascending, term),
                };
                let field = name.parse().ok()?;
                Some(Sort { field, direction })
            })
            .collect();

        if sorts.is_empty() {
            Self::default()
        } else {
            Self(sorts)
        }
    }

    #[must_use]
    pub fn sorts(&self) -> &[Sort<Field>] {
        &self.0
    }
}

impl<Field: SortField> Default for Ordering<Field> {
    fn default() -> Self {
        Self(vec![Field::DEFAULT])
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        book::BookSortField,
        sort::{Direction, Ordering, Sort},
    };

    #[test]
    fn parses_terms() {
        let ordering = Ordering::<BookSortField>::parse(Some("title,-publication_year"));
        assert_eq!(
            ordering.sorts(),
            [
                Sort {
                    field: BookSortField::Title,
                    direction: Direction::Ascending
                },
                Sort {
                    field: BookSortField::PublicationYear,
                    direction: Direction::Descending
                },
            ]
        );
    }

    #[test]
    fn unknown_terms_fall_back_to_default() {
        let default = Ordering::<BookSortField>::default();
        assert_eq!(Ordering::parse(Some("password")), default);
        assert_eq!(Ordering::parse(Some("")), default);
        assert_eq!(Ordering::parse(None), default);
        assert_eq!(
            Ordering::<BookSortField>::parse(Some("nope,-author__name")).sorts(),
            [Sort {
                field: BookSortField::AuthorName,
                direction: Direction::Descending
            }]
        );
    }
}
