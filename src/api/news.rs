use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, Json, Path, Query, SharedState, parse_choice};
use crate::auth::CurrentUser;
use crate::db;
use crate::models::{ArticleCategory, BookmarkToggle};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const DIGEST_DAYS: i64 = 7;
const TRENDING_LIMIT: i64 = 10;
const SEARCH_LIMIT: i64 = 20;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/news/articles", get(list_articles))
        .route("/api/news/articles/{id}", get(get_article))
        .route("/api/news/articles/{id}/bookmark", post(toggle_bookmark))
        .route("/api/news/bookmarks", get(list_bookmarks))
        .route("/api/news/digest", get(digest))
        .route("/api/news/trending", get(trending))
        .route("/api/news/search", get(search))
}

#[derive(Debug, Deserialize)]
pub struct ArticleListParams {
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

async fn list_articles(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Query(params): Query<ArticleListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let category = params
        .category
        .as_deref()
        .map(|c| parse_choice::<ArticleCategory>("category", c))
        .transpose()?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);
    let articles = state
        .db
        .call(move |db| db.list_articles(category, limit, offset))
        .await?;
    Ok(Json(articles))
}

async fn get_article(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.view_article(id, user.id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Article {} not found", id)))
}

async fn toggle_bookmark(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .db
        .call(move |db| db.toggle_bookmark(user.id, id))
        .await?;
    let response = match outcome {
        BookmarkToggle::Added => (
            StatusCode::CREATED,
            Json(json!({"message": "Article bookmarked", "bookmarked": true})),
        ),
        BookmarkToggle::Removed => (
            StatusCode::OK,
            Json(json!({"message": "Article unbookmarked", "bookmarked": false})),
        ),
    };
    Ok(response)
}

async fn list_bookmarks(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let bookmarks = state.db.call(move |db| db.list_bookmarks(user.id)).await?;
    Ok(Json(bookmarks))
}

async fn digest(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let since = (Utc::now() - Duration::days(DIGEST_DAYS))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let articles = state.db.call(move |db| db.news_digest(&since)).await?;
    Ok(Json(articles))
}

async fn trending(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let topics = state
        .db
        .call(|db| db.trending_topics(TRENDING_LIMIT))
        .await?;
    Ok(Json(topics))
}

async fn search(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.q.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Search query is required".into()));
    }
    let topic = query.to_lowercase();
    let today = db::today().format("%Y-%m-%d").to_string();
    let results = state
        .db
        .call(move |db| {
            let results = db.search_articles(&query, SEARCH_LIMIT)?;
            db.record_search(&topic, &today)?;
            Ok(results)
        })
        .await?;
    Ok(Json(results))
}
