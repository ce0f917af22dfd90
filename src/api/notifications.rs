use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, Json, Path, Query, SharedState};
use crate::auth::CurrentUser;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/templates", get(list_templates))
        .route(
            "/api/notifications/{id}",
            get(get_notification).delete(delete_notification),
        )
        .route("/api/notifications/{id}/read", post(mark_read))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub unread: bool,
}

async fn list_notifications(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let notifications = state
        .db
        .call(move |db| db.list_notifications(user.id, params.unread))
        .await?;
    Ok(Json(notifications))
}

async fn get_notification(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.get_notification(user.id, id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))
}

async fn mark_read(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.mark_notification_read(user.id, id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))
}

async fn delete_notification(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_notification(user.id, id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Notification {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .db
        .call(move |db| db.mark_all_notifications_read(user.id))
        .await?;
    Ok(Json(json!({
        "message": "All notifications marked as read",
        "count": count,
    })))
}

async fn unread_count(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .db
        .call(move |db| db.unread_notification_count(user.id))
        .await?;
    Ok(Json(json!({"unread_count": count})))
}

async fn list_templates(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let templates = state
        .db
        .call(|db| db.list_notification_templates())
        .await?;
    Ok(Json(templates))
}
