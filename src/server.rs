use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, http::HeaderValue, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState, SharedState};
use crate::config::{AiSection, EcoToml};
use crate::db::{DbHandle, EcoDb};
use crate::jobs;
use crate::services::{GeminiClient, TextGenerator};
use crate::ws;

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub cors_origins: Vec<String>,
    pub dev_mode: bool,
    pub scheduler: bool,
    pub ai: AiSection,
}

impl ServerConfig {
    pub fn from_toml(config: &EcoToml) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            cors_origins: config.server.cors_origins.clone(),
            dev_mode: false,
            scheduler: config.scheduler.enabled,
            ai: config.ai.clone(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_toml(&EcoToml::default())
    }
}

/// Build the full application router: REST API, notification socket,
/// request tracing and CORS.
pub fn build_router(state: SharedState, cors_origins: &[String]) -> Router {
    api::api_router()
        .route("/ws/notifications", get(ws::ws_handler))
        .route("/ws/notifications/", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
}

/// Any origin when the list is empty, otherwise exactly the listed ones.
/// Unparseable origins are skipped with a warning.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// The text generator behind chat and curation, when a key is configured.
pub fn build_generator(ai: &AiSection) -> Result<Option<Arc<dyn TextGenerator>>> {
    let Some(key) = ai.api_key() else {
        return Ok(None);
    };
    let client = GeminiClient::new(key, ai.model.clone(), ai.timeout_secs)
        .context("Failed to build Gemini client")?;
    Ok(Some(Arc::new(client)))
}

/// Open the database and assemble shared state.
pub fn build_state(db_path: &std::path::Path, ai: &AiSection) -> Result<SharedState> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = EcoDb::new(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let generator = build_generator(ai)?;
    if generator.is_none() {
        tracing::info!("no Gemini API key configured; using canned replies");
    }
    Ok(Arc::new(AppState::new(DbHandle::new(db), generator)))
}

/// Start the server and, unless disabled, the job scheduler. Returns after
/// Ctrl-C once in-flight requests finish.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config.db_path, &config.ai)?;

    let scheduler = if config.scheduler {
        jobs::spawn_scheduler(state.clone())
    } else {
        tracing::info!("job scheduler disabled");
        Vec::new()
    };

    // Dev mode listens on every interface and accepts any origin.
    let origins: &[String] = if config.dev_mode {
        &[]
    } else {
        &config.cors_origins
    };
    let app = build_router(state, origins);

    let host = if config.dev_mode {
        "0.0.0.0"
    } else {
        config.host.as_str()
    };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("EcoSphere API running at http://{}", local_addr);
    tracing::info!(%local_addr, dev_mode = config.dev_mode, "server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    for task in scheduler {
        task.abort();
    }
    served?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C; shutting down");
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_state;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(origins: &[String]) -> Router {
        build_router(test_state(), origins)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router(&[]);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_index_lists_endpoints() {
        let app = test_router(&[]);
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["name"], "EcoSphere API");
        assert_eq!(json["endpoints"]["carbon"], "/api/carbon/");
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let app = test_router(&[]);
        let req = Request::builder()
            .uri("/api/users/profile")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_socket_rejects_missing_token_before_upgrade() {
        for uri in ["/ws/notifications", "/ws/notifications/?token=bogus"] {
            let app = test_router(&[]);
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_cors_allows_only_listed_origin() {
        let origins = vec!["http://localhost:3000".to_string()];
        let preflight = |origin: &str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/health")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap()
        };

        let resp = test_router(&origins)
            .oneshot(preflight("http://localhost:3000"))
            .await
            .unwrap();
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );

        let resp = test_router(&origins)
            .oneshot(preflight("http://evil.example"))
            .await
            .unwrap();
        assert!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[test]
    fn test_generator_needs_real_key() {
        let mut ai = AiSection::default();
        assert!(build_generator(&ai).unwrap().is_none());
        ai.gemini_api_key = Some("your-gemini-api-key-here".into());
        assert!(build_generator(&ai).unwrap().is_none());
        ai.gemini_api_key = Some("k".into());
        assert!(build_generator(&ai).unwrap().is_some());
    }

    #[test]
    fn test_build_state_creates_db_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("eco.db");
        let state = build_state(&path, &AiSection::default()).unwrap();
        assert!(path.exists());
        assert!(state.generator.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let cfg = EcoToml::parse("[server]\nport = 9001\n[scheduler]\nenabled = false\n").unwrap();
        let server = ServerConfig::from_toml(&cfg);
        assert_eq!(server.port, 9001);
        assert!(!server.scheduler);
        assert!(!server.dev_mode);
    }
}
