use crate::server::{
    Result, ServerError, ServerRouter,
    json::Json,
    query::{PageQuery, Query},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use lectern_common::model::{page::Page, post::Post, tag::Tag};
use lectern_db::client::{DbClient, PostListing};
use serde::Deserialize;
use std::sync::Arc;

const PAGE_SIZE: u32 = 10;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_tags)
        .typed_get(list_tagged_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tags", rejection(ServerError))]
struct TagsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/tags/{slug}/posts", rejection(ServerError))]
struct TaggedPostsPath {
    slug: String,
}

async fn list_tags(TagsPath(): TagsPath, State(db): State<Arc<DbClient>>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(db.list_tags().await?))
}

async fn list_tagged_posts(
    TaggedPostsPath { slug }: TaggedPostsPath,
    State(db): State<Arc<DbClient>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Post>>> {
    let tag = db
        .fetch_tag_by_slug(&slug)
        .await?
        .ok_or(ServerError::TagBySlugNotFound(slug))?;

    let page = db
        .list_posts(PostListing::Tagged(tag.id), query.request()?, PAGE_SIZE)
        .await?;

    Ok(Json(page))
}
