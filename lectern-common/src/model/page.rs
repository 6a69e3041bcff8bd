use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Invalid page.")]
pub struct InvalidPageError(pub u32);

/// A 1-based page number as requested through `?page=`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct PageRequest(u32);

impl Default for PageRequest {
    fn default() -> Self {
        Self(1)
    }
}

impl FromStr for PageRequest {
    type Err = InvalidPageError;

    /// Anything that is not a positive number is an invalid page, like a page past the end.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let page = s.trim().parse().map_err(|_| InvalidPageError(0))?;
        Self::new(page)
    }
}

impl PageRequest {
    pub fn new(page: u32) -> Result<Self, InvalidPageError> {
        if page == 0 {
            Err(InvalidPageError(page))
        } else {
            Ok(Self(page))
        }
    }

    #[must_use]
    pub fn number(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn offset(self, page_size: u32) -> i64 {
        i64::from(self.0.saturating_sub(1)) * i64::from(page_size)
    }

    /// Page 1 always exists; any later page must hold at least one item.
    pub fn check(self, count: i64, page_size: u32) -> Result<(), InvalidPageError> {
        if self.0 == 1 || self.offset(page_size) < count {
            Ok(())
        } else {
            Err(InvalidPageError(self.0))
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: i64,
    pub page: u32,
    pub num_pages: u32,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(results: Vec<T>, count: i64, request: PageRequest, page_size: u32) -> Self {
        let items = u64::try_from(count).unwrap_or_default().max(1);
        let num_pages = u32::try_from(items.div_ceil(u64::from(page_size))).unwrap_or(u32::MAX);
        let page = request.number();

        Self {
            count,
            page,
            num_pages,
            next: (page < num_pages).then_some(page + 1),
            previous: (page > 1).then(|| page - 1),
            results,
        }
    }
}
