use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ApiError, Json, Path, Query, SharedState};
use crate::auth::CurrentUser;
use crate::db::{self, ChatExchange};
use crate::errors::EcoError;
use crate::models::{ChatMessage, ChatSession};
use crate::services::chatbot::{self, ReplySource, UserContext};

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/chatbot/message", post(send_message))
        .route("/api/chatbot/history", get(history))
        .route("/api/chatbot/sessions", get(list_sessions))
        .route(
            "/api/chatbot/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/chatbot/config", get(list_configs))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
    pub session_id: String,
    pub source: ReplySource,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

fn session_not_found() -> ApiError {
    ApiError::NotFound("Session not found".into())
}

async fn send_message(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = req.message.unwrap_or_default();
    if message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is required".into()));
    }

    // Resolve the session and gather prompt context in one trip.
    let user_id = user.id;
    let requested = req.session_id.clone();
    let (existing, config, monthly_carbon_kg) = state
        .db
        .call(move |db| {
            let existing = match requested.as_deref() {
                Some(sid) => Some(
                    db.get_chat_session(user_id, sid)?
                        .ok_or_else(|| EcoError::Missing("Session".into()))?,
                ),
                None => None,
            };
            let config = db.active_chatbot_config()?;
            let stats = db.user_stats(user_id, db::today())?;
            Ok((existing, config, stats.monthly_carbon_total))
        })
        .await?;

    let ctx = UserContext {
        monthly_carbon_kg,
        location: user.location.clone(),
        role: user.role,
    };
    let reply = chatbot::generate_reply(
        state.generator.as_deref(),
        config.as_ref(),
        &ctx,
        &message,
    )
    .await;
    tracing::debug!(
        user_id,
        source = ?reply.source,
        tokens = reply.tokens_used,
        "chat reply generated"
    );

    let source = reply.source;
    let exchange = ChatExchange {
        user_tokens: chatbot::count_tokens(&message),
        user_content: message,
        reply: reply.content,
        reply_tokens: reply.tokens_used,
        response_time: reply.response_time,
    };
    let (session_id, user_message, assistant_message) = state
        .db
        .call(move |db| {
            match existing {
                Some(session) => {
                    let (user_message, assistant_message) =
                        db.record_chat_exchange(user_id, &session.session_id, &exchange)?;
                    Ok((session.session_id, user_message, assistant_message))
                }
                None => {
                    let sid = uuid::Uuid::new_v4().to_string();
                    let title = chatbot::session_title(&exchange.user_content);
                    let (user_message, assistant_message) =
                        db.start_chat_session(user_id, &sid, &title, &exchange)?;
                    Ok((sid, user_message, assistant_message))
                }
            }
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            user_message,
            assistant_message,
            session_id,
            source,
        }),
    ))
}

async fn history(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .db
        .call(move |db| {
            if let Some(sid) = params.session_id.as_deref()
                && db.get_chat_session(user.id, sid)?.is_none()
            {
                return Ok(None);
            }
            db.list_chat_messages(user.id, params.session_id.as_deref())
                .map(Some)
        })
        .await?
        .ok_or_else(session_not_found)?;
    Ok(Json(json!({"messages": messages})))
}

async fn list_sessions(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state
        .db
        .call(move |db| db.list_chat_sessions(user.id))
        .await?;
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .db
        .call(move |db| {
            let Some(session) = db.get_chat_session_by_id(user.id, id)? else {
                return Ok(None);
            };
            let messages = db.list_chat_messages(user.id, Some(&session.session_id))?;
            Ok(Some(SessionDetail { session, messages }))
        })
        .await?
        .ok_or_else(session_not_found)?;
    Ok(Json(detail))
}

async fn delete_session(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_chat_session(user.id, id))
        .await?;
    if !deleted {
        return Err(session_not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_configs(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let configs = state.db.call(|db| db.list_chatbot_configs()).await?;
    Ok(Json(json!({"configs": configs})))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use super::super::AppState;
    use super::*;
    use crate::db::{DbHandle, EcoDb};
    use crate::models::UserRole;
    use crate::services::{GenerateOptions, TextGenerator};
    use async_trait::async_trait;
    use axum::http::Method;
    use std::sync::{Arc, Mutex};

    struct ScriptedGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _options: GenerateOptions) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("Try cycling to work twice a week".to_string())
        }
    }

    #[tokio::test]
    async fn test_message_without_session_uses_fallback() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");

        let (status, _) = app
            .post("/api/chatbot/message", &token, json!({"message": "   "}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post(
                "/api/chatbot/message",
                &token,
                json!({"message": "How do I lower my carbon footprint?"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["source"], "fallback");
        assert_eq!(body["user_message"]["role"], "USER");
        assert_eq!(body["assistant_message"]["role"], "ASSISTANT");
        let session_id = body["session_id"].as_str().unwrap().to_string();
        assert_eq!(session_id.len(), 36);

        let (_, body) = app
            .post(
                "/api/chatbot/message",
                &token,
                json!({"message": "help", "session_id": session_id}),
            )
            .await;
        assert_eq!(body["session_id"], session_id.as_str());

        let (_, sessions) = app.get("/api/chatbot/sessions", &token).await;
        assert_eq!(sessions.as_array().unwrap().len(), 1);
        assert_eq!(sessions[0]["message_count"], 4);
        assert_eq!(sessions[0]["title"], "How do I lower my carbon footprint?");

        let (_, history) = app
            .get(&format!("/api/chatbot/history?session_id={}", session_id), &token)
            .await;
        let messages = history["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["content"], "How do I lower my carbon footprint?");
    }

    #[tokio::test]
    async fn test_foreign_session_is_not_found() {
        let app = TestApp::new();
        let (_, alice) = app.user("alice", UserRole::Individual, "");
        let (_, bob) = app.user("bob", UserRole::Individual, "");
        let (_, body) = app
            .post("/api/chatbot/message", &alice, json!({"message": "hello"}))
            .await;
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = app
            .post(
                "/api/chatbot/message",
                &bob,
                json!({"message": "hi", "session_id": session_id}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");

        let (status, _) = app
            .get(&format!("/api/chatbot/history?session_id={}", session_id), &bob)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, sessions) = app.get("/api/chatbot/sessions", &alice).await;
        let uri = format!("/api/chatbot/sessions/{}", sessions[0]["id"]);
        let (status, _) = app.get(&uri, &bob).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, detail) = app.get(&uri, &alice).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["messages"].as_array().unwrap().len(), 2);
        assert_eq!(detail["session_id"], session_id.as_str());

        let (status, _) = app.request(Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, history) = app.get("/api/chatbot/history", &alice).await;
        assert_eq!(history["messages"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_generator_reply_carries_user_context() {
        let generator = Arc::new(ScriptedGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let db = DbHandle::new(EcoDb::new_in_memory().unwrap());
        let dyn_generator: Arc<dyn TextGenerator> = generator.clone();
        let state = Arc::new(AppState::new(db, Some(dyn_generator)));
        let router = crate::server::build_router(state.clone(), &[]);
        let app = TestApp { state, router };
        let (_, token) = app.user("alice", UserRole::Ngo, "Oslo, NO");

        let (status, body) = app
            .post("/api/chatbot/message", &token, json!({"message": "ideas?"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["source"], "gemini");
        assert_eq!(body["assistant_message"]["content"], "Try cycling to work twice a week");
        assert_eq!(body["assistant_message"]["tokens_used"], 7);

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("User's location: Oslo, NO"));
        assert!(prompts[0].contains("User role: NGO"));
        assert!(prompts[0].ends_with("User: ideas?"));
    }

    #[tokio::test]
    async fn test_config_lists_active() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        app.state
            .db
            .lock_sync()
            .unwrap()
            .upsert_chatbot_config("default", "Be helpful", 500, 0.7)
            .unwrap();
        let (_, body) = app.get("/api/chatbot/config", &token).await;
        assert_eq!(body["configs"][0]["name"], "default");
    }
}
