use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json},
    query::{PageQuery, Query, page_request},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use lectern_common::{
    model::{
        Id,
        comment::build_threads,
        like::LikeToggle,
        page::Page,
        post::{Post, PostDetail, PostInput, PostMarker, validate_search_query},
    },
    validation::WriteMode,
};
use lectern_db::client::{DbClient, PostListing};
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

const HOME_PAGE_SIZE: u32 = 5;
const SEARCH_PAGE_SIZE: u32 = 10;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_posts)
        .typed_post(create_post)
        .typed_get(search_posts)
        .typed_get(get_post)
        .typed_put(replace_post)
        .typed_patch(patch_post)
        .typed_delete(delete_post)
        .typed_post(toggle_like)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct PostsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/search", rejection(ServerError))]
struct SearchPostsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/like", rejection(ServerError))]
struct PostLikePath {
    id: Id<PostMarker>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    page: Option<String>,
}

/// Published posts only: a post with a future date shows up here once that date has passed.
async fn list_posts(
    PostsPath(): PostsPath,
    State(db): State<Arc<DbClient>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Post>>> {
    let listing = PostListing::Published(OffsetDateTime::now_utc());
    let page = db
        .list_posts(listing, query.request()?, HOME_PAGE_SIZE)
        .await?;

    Ok(Json(page))
}

async fn create_post(
    PostsPath(): PostsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<PostInput>,
) -> Result<Created<Post>> {
    let post = input.validate_new()?;
    let post = db.create_post(user.user_id(), &post).await?;

    info!(post_id = %post.id, user_id = %user.user_id(), "Post created");
    Ok(Created(post))
}

async fn search_posts(
    SearchPostsPath(): SearchPostsPath,
    State(db): State<Arc<DbClient>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Page<Post>>> {
    let term = validate_search_query(query.q)?;
    let request = page_request(query.page.as_deref())?;

    let page = db
        .list_posts(PostListing::Search(&term), request, SEARCH_PAGE_SIZE)
        .await?;

    Ok(Json(page))
}

async fn fetch_post(db: &DbClient, id: Id<PostMarker>) -> Result<Post> {
    db.fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))
}

async fn get_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    viewer: Option<AuthenticatedUser>,
) -> Result<Json<PostDetail>> {
    let post = fetch_post(&db, id).await?;

    let is_liked = match &viewer {
        Some(viewer) => db.is_post_liked(id, viewer.user_id()).await?,
        None => false,
    };
    let related_posts = db.fetch_related_posts(&post).await?;
    // Every approved comment counts, including replies hidden under an unapproved parent.
    let approved = db.list_approved_comments(id).await?;
    let comment_count = approved.len();
    let comments = build_threads(approved);

    Ok(Json(PostDetail {
        is_liked,
        total_likes: post.like_count,
        related_posts,
        comment_count,
        comments,
        post,
    }))
}

/// Only the author of a post or a superuser may change it. That is checked before the input is.
async fn update_post(
    id: Id<PostMarker>,
    db: &DbClient,
    user: &AuthenticatedUser,
    input: PostInput,
    mode: WriteMode,
) -> Result<Json<Post>> {
    let post = fetch_post(db, id).await?;
    user.require(post.can_be_modified_by(user.user()))?;

    let changes = input.validate(mode)?;
    let post = db
        .update_post(id, &changes)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    info!(post_id = %id, user_id = %user.user_id(), "Post updated");
    Ok(Json(post))
}

async fn replace_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<PostInput>,
) -> Result<Json<Post>> {
    update_post(id, &db, &user, input, WriteMode::Full).await
}

async fn patch_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(input): Json<PostInput>,
) -> Result<Json<Post>> {
    update_post(id, &db, &user, input, WriteMode::Partial).await
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    let post = fetch_post(&db, id).await?;
    user.require(post.can_be_modified_by(user.user()))?;

    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }

    info!(post_id = %id, user_id = %user.user_id(), "Post deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_like(
    PostLikePath { id }: PostLikePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<LikeToggle>> {
    fetch_post(&db, id).await?;
    let toggle = db.toggle_post_like(id, user.user_id()).await?;

    info!(post_id = %id, user_id = %user.user_id(), liked = toggle.liked, "Post like toggled");
    Ok(Json(toggle))
}

#[cfg(test)]
mod tests {
    use crate::server::tests::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::{Value, json};

    const CONTENT: &str = "A post body that is comfortably longer than fifty characters.";

    async fn create(app: &TestApp, token: &str, body: Value) -> Value {
        let response = app.post("/posts", Some(token), body).await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body
    }

    fn titles(body: &Value) -> Vec<&str> {
        body["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|post| post["title"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn create_derives_unique_slugs_and_tags() {
        let app = TestApp::new().await;
        let (_, token) = app.user("ada", false, false).await;

        let first = create(
            &app,
            &token,
            json!({ "title": "Hello World Again", "content": CONTENT, "tags": ["Rust", "Rust", "Web"] }),
        )
        .await;
        assert_eq!(first["slug"], json!("hello-world-again"));
        assert_eq!(first["tags"].as_array().unwrap().len(), 2);
        assert_eq!(first["author"]["username"], json!("ada"));

        let second = create(
            &app,
            &token,
            json!({ "title": "Hello World Again", "content": CONTENT }),
        )
        .await;
        assert_eq!(second["slug"], json!("hello-world-again-1"));

        let short = app
            .post(
                "/posts",
                Some(&token),
                json!({ "title": "Short", "content": "Too short." }),
            )
            .await;
        assert_eq!(short.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            short.body["errors"]["content"],
            json!(["Content is too short. Please provide more details."])
        );
        assert!(short.body["errors"]["title"].is_array());
    }

    #[tokio::test]
    async fn home_shows_published_posts_newest_first() {
        let app = TestApp::new().await;
        let (_, token) = app.user("ada", false, false).await;
        create(
            &app,
            &token,
            json!({ "title": "An older post", "content": CONTENT, "published_date": "2020-01-01T00:00:00Z" }),
        )
        .await;
        create(
            &app,
            &token,
            json!({ "title": "A newer post", "content": CONTENT, "published_date": "2021-01-01T00:00:00Z" }),
        )
        .await;
        create(
            &app,
            &token,
            json!({ "title": "A post from the future", "content": CONTENT, "published_date": "2999-01-01T00:00:00Z" }),
        )
        .await;

        let response = app.get("/posts", None).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(titles(&response.body), ["A newer post", "An older post"]);
    }

    #[tokio::test]
    async fn search_matches_title_content_and_tags() {
        let app = TestApp::new().await;
        let (_, token) = app.user("ada", false, false).await;
        create(
            &app,
            &token,
            json!({ "title": "Borrowing in practice", "content": CONTENT, "tags": ["Ownership"] }),
        )
        .await;
        create(
            &app,
            &token,
            json!({ "title": "Gardening notes here", "content": CONTENT }),
        )
        .await;

        let by_tag = app.get("/posts/search?q=ownership", None).await;
        assert_eq!(titles(&by_tag.body), ["Borrowing in practice"]);

        let by_title = app.get("/posts/search?q=GARDEN", None).await;
        assert_eq!(titles(&by_title.body), ["Gardening notes here"]);

        let blank = app.get("/posts/search?q=%20", None).await;
        assert_eq!(blank.status, StatusCode::BAD_REQUEST);
        assert_eq!(blank.body["errors"]["q"], json!(["Please enter a search term."]));
    }

    #[tokio::test]
    async fn only_the_author_or_a_superuser_may_edit() {
        let app = TestApp::new().await;
        let (_, author) = app.user("ada", false, false).await;
        let (_, stranger) = app.user("charles", true, false).await;
        let (_, admin) = app.user("admin", false, true).await;
        let post = create(&app, &author, json!({ "title": "Notes on engines", "content": CONTENT })).await;
        let uri = format!("/posts/{}", post["id"]);

        // Staff alone is not enough, and permission is checked before the body is validated.
        let forbidden = app
            .request(Method::PATCH, &uri, Some(&stranger), Some(json!({ "title": "x" })))
            .await;
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert_eq!(forbidden.body["message"], json!("Forbidden"));

        let edited = app
            .request(
                Method::PATCH,
                &uri,
                Some(&admin),
                Some(json!({ "title": "Notes on the analytical engine" })),
            )
            .await;
        assert_eq!(edited.status, StatusCode::OK);
        assert_eq!(edited.body["slug"], json!("notes-on-engines"));

        let deleted = app.delete(&uri, Some(&author)).await;
        assert_eq!(deleted.status, StatusCode::NO_CONTENT);
        assert_eq!(app.get(&uri, None).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn likes_toggle_and_show_in_detail() {
        let app = TestApp::new().await;
        let (_, token) = app.user("ada", false, false).await;
        let post = create(&app, &token, json!({ "title": "Notes on engines", "content": CONTENT })).await;
        let id = post["id"].as_i64().unwrap();
        let like_uri = format!("/posts/{id}/like");

        let liked = app.post(&like_uri, Some(&token), json!({})).await;
        assert_eq!(liked.body, json!({ "liked": true, "like_count": 1 }));

        let detail = app.get(&format!("/posts/{id}"), Some(&token)).await;
        assert_eq!(detail.body["is_liked"], json!(true));
        assert_eq!(detail.body["total_likes"], json!(1));
        let anonymous = app.get(&format!("/posts/{id}"), None).await;
        assert_eq!(anonymous.body["is_liked"], json!(false));

        let unliked = app.post(&like_uri, Some(&token), json!({})).await;
        assert_eq!(unliked.body, json!({ "liked": false, "like_count": 0 }));

        let missing = app.post("/posts/999/like", Some(&token), json!({})).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn detail_includes_related_posts() {
        let app = TestApp::new().await;
        let (_, token) = app.user("ada", false, false).await;
        let first = create(&app, &token, json!({ "title": "Notes on engines", "content": CONTENT })).await;
        for title in ["Second post here", "Third post here", "Fourth post here", "Fifth post here"] {
            create(&app, &token, json!({ "title": title, "content": CONTENT })).await;
        }

        let detail = app.get(&format!("/posts/{}", first["id"]), None).await;
        let related = detail.body["related_posts"].as_array().unwrap();
        assert_eq!(related.len(), 3);
        assert!(related.iter().all(|post| post["id"] != first["id"]));
        assert_eq!(detail.body["comments"], json!([]));
        assert_eq!(detail.body["comment_count"], json!(0));
    }
}
