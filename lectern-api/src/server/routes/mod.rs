use crate::server::ServerRouter;
use axum::Router;

mod authors;
mod books;
mod comments;
mod posts;
mod tags;
mod tokens;
mod users;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(books::routes())
        .merge(authors::routes())
        .merge(posts::routes())
        .merge(comments::routes())
        .merge(tags::routes())
        .merge(users::routes())
        .merge(tokens::routes())
}
