//! JSON REST API. One submodule per app, each contributing its routes to
//! [`api_router`].

pub mod carbon;
pub mod chatbot;
pub mod climate;
pub mod gamification;
pub mod news;
pub mod notifications;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        FromRequest, FromRequestParts,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::DbHandle;
use crate::errors::EcoError;
use crate::services::TextGenerator;
use crate::services::news_curation::NewsCurator;
use crate::ws::WsSender;

/// Capacity of the WebSocket broadcast channel.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Shared application state for all handlers.
pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: WsSender,
    /// Text generator for chat and curation; `None` means canned replies.
    pub generator: Option<Arc<dyn TextGenerator>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        let (ws_tx, _) = broadcast::channel(WS_CHANNEL_CAPACITY);
        Self {
            db,
            ws_tx,
            generator,
        }
    }

    pub fn curator(&self) -> NewsCurator {
        NewsCurator::new(self.generator.clone())
    }
}

// ── Error type ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

/// Domain errors pick their status; everything else is logged and hidden
/// behind a 500.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<EcoError>() {
            Some(e @ (EcoError::NotFound { .. } | EcoError::Missing(_))) => {
                ApiError::NotFound(e.to_string())
            }
            Some(e @ (EcoError::Validation(_) | EcoError::Conflict(_))) => {
                ApiError::BadRequest(e.to_string())
            }
            Some(e @ EcoError::Forbidden(_)) => ApiError::Forbidden(e.to_string()),
            Some(e @ EcoError::Unauthorized) => ApiError::Unauthorized(e.to_string()),
            _ => {
                tracing::error!(error = %format!("{:#}", err), "request failed");
                ApiError::Internal("Internal server error".into())
            }
        }
    }
}

impl From<EcoError> for ApiError {
    fn from(err: EcoError) -> Self {
        anyhow::Error::from(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Extractors ────────────────────────────────────────────────────────

/// JSON body extractor and response whose rejections render as [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        let Self(value) = self;
        axum::Json(value).into_response()
    }
}

/// Query string extractor with [`ApiError`] rejections.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Query<T>(pub T);

/// Path parameter extractor with [`ApiError`] rejections.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct Path<T>(pub T);

/// Parse a string-backed enum from request input, naming the field on error.
pub fn parse_choice<T>(field: &str, raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| ApiError::BadRequest(format!("{}: {}", field, e)))
}

/// Reject a missing required field.
pub fn required<T>(field: &str, value: Option<T>) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::BadRequest(format!("{}: This field is required.", field)))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(users::routes())
        .merge(carbon::routes())
        .merge(gamification::routes())
        .merge(news::routes())
        .merge(notifications::routes())
        .merge(chatbot::routes())
        .merge(climate::routes())
}

async fn health() -> &'static str {
    "ok"
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "EcoSphere API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "users": "/api/users/",
            "carbon": "/api/carbon/",
            "gamification": "/api/gamification/",
            "news": "/api/news/",
            "notifications": "/api/notifications/",
            "chatbot": "/api/chatbot/",
            "climate": "/api/climate/",
            "websocket": "/ws/notifications",
        }
    }))
}

// ── Test support ──────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) fn test_state() -> SharedState {
    let db = crate::db::EcoDb::new_in_memory().expect("in-memory db");
    Arc::new(AppState::new(DbHandle::new(db), None))
}


#[cfg(test)]
mod tests {
    use super::test_support::TestApp;
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_domain_errors_map_to_status() {
        let cases: Vec<(anyhow::Error, StatusCode)> = vec![
            (EcoError::not_found("Carbon entry", 1).into(), StatusCode::NOT_FOUND),
            (EcoError::Missing("Active challenge".into()).into(), StatusCode::NOT_FOUND),
            (EcoError::validation("bad").into(), StatusCode::BAD_REQUEST),
            (EcoError::Conflict("dup".into()).into(), StatusCode::BAD_REQUEST),
            (EcoError::Forbidden("no".into()).into(), StatusCode::FORBIDDEN),
            (EcoError::Unauthorized.into(), StatusCode::UNAUTHORIZED),
            (anyhow::anyhow!("disk on fire"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let resp = ApiError::from(err).into_response();
            assert_eq!(resp.status(), status);
        }
    }

    #[test]
    fn test_context_wrapped_domain_error_keeps_message() {
        use anyhow::Context;
        let err: anyhow::Result<()> =
            Err(EcoError::not_found("Article", 9)).context("while bookmarking");
        match ApiError::from(err.unwrap_err()) {
            ApiError::NotFound(msg) => assert_eq!(msg, "Article 9 not found"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_choice_names_field() {
        let err = parse_choice::<crate::models::CarbonCategory>("category", "FOOD").unwrap_err();
        match err {
            ApiError::BadRequest(msg) => assert!(msg.starts_with("category: ")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_and_index_are_public() {
        let app = TestApp::new();
        let (status, body) = app.request(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::Value::String("ok".into()));

        let (status, body) = app.request(Method::GET, "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["endpoints"]["carbon"], "/api/carbon/");
    }

    #[tokio::test]
    async fn test_extractor_rejections_render_json_errors() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", crate::models::UserRole::Individual, "");

        let (status, body) = app
            .post(
                "/api/carbon/entries",
                &token,
                serde_json::json!({
                    "category": "TRANSPORTATION",
                    "subcategory": "CAR",
                    "value": "ten",
                    "date": "2024-05-01",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("value"));

        let (status, body) = app.get("/api/news/articles?limit=abc", &token).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("query"));

        let (status, body) = app.get("/api/carbon/entries/abc", &token).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("abc"));
    }

    #[tokio::test]
    async fn test_malformed_json_body_is_bad_request() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", crate::models::UserRole::Individual, "");
        let (status, bytes, _) = app
            .raw(
                Method::POST,
                "/api/carbon/entries",
                Some(&token),
                Some(serde_json::Value::String("not an object".into())),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let app = TestApp::new();
        let (status, body) = app
            .request(Method::GET, "/api/users/profile", None, None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = app
            .request(Method::GET, "/api/users/profile", Some("eco_bogus"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
