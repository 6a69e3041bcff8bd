use crate::server::ServerError;
use axum::extract::{FromRequestParts, Query as AxumQuery};
use lectern_common::model::page::{InvalidPageError, PageRequest};
use serde::{Deserialize, Deserializer, de};
use std::{fmt::Display, str::FromStr};

#[derive(FromRequestParts, Debug, Clone, Copy, Default)]
#[from_request(via(AxumQuery), rejection(ServerError))]
pub struct Query<T>(pub T);

/// `?page=` on its own, for listings without further parameters.
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    pub fn request(&self) -> Result<PageRequest, InvalidPageError> {
        page_request(self.page.as_deref())
    }
}

/// A missing page is the first one.
pub fn page_request(raw: Option<&str>) -> Result<PageRequest, InvalidPageError> {
    raw.map_or(Ok(PageRequest::default()), str::parse)
}

/// Parses a query parameter, treating `?name=` the same as a missing parameter.
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(de::Error::custom),
    }
}
