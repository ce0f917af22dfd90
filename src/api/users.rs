use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;

use super::{ApiError, Json, Path, Query, SharedState, required};
use crate::auth::CurrentUser;
use crate::db::{self, LeaderboardScope, ProfileUpdate};
use crate::models::{NewNotification, NotificationType};
use crate::notify;

const DEFAULT_LEADERBOARD_LIMIT: i64 = 50;
const MAX_LEADERBOARD_LIMIT: i64 = 100;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/users/profile", get(get_profile).patch(update_profile))
        .route("/api/users/stats", get(stats))
        .route("/api/users/leaderboard", get(leaderboard))
        .route("/api/users/friends", get(list_friends).post(send_friend_request))
        .route(
            "/api/users/friends/{id}",
            put(respond_friend_request).delete(remove_friend),
        )
}

// ── Request payload types ─────────────────────────────────────────────

/// Editable profile fields. Username and email are not accepted here.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub email_notifications: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FriendRequest {
    pub friend_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FriendActionRequest {
    pub action: Option<String>,
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn get_profile(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(user)
}

async fn update_profile(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(avatar) = req.avatar.as_deref()
        && !avatar.is_empty()
        && !(avatar.starts_with("http://") || avatar.starts_with("https://") || avatar.starts_with('/'))
    {
        return Err(ApiError::BadRequest("avatar: Enter a valid URL.".into()));
    }
    let update = ProfileUpdate {
        first_name: req.first_name,
        last_name: req.last_name,
        location: req.location,
        bio: req.bio,
        avatar: req.avatar,
        notifications_enabled: req.notifications_enabled,
        email_notifications: req.email_notifications,
    };
    let updated = state
        .db
        .call(move |db| db.update_profile(user.id, &update))
        .await?;
    Ok(Json(updated))
}

async fn stats(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .db
        .call(move |db| db.user_stats(user.id, db::today()))
        .await?;
    Ok(Json(stats))
}

async fn leaderboard(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<LeaderboardParams>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = match params.kind.as_deref().unwrap_or("global") {
        "friends" => LeaderboardScope::Friends,
        "city" => match user.city() {
            Some(city) => LeaderboardScope::City(city.to_string()),
            None => LeaderboardScope::Global,
        },
        _ => LeaderboardScope::Global,
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    let entries = state
        .db
        .call(move |db| db.leaderboard(&scope, user.id, limit))
        .await?;
    Ok(Json(entries))
}

async fn list_friends(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let friends = state.db.call(move |db| db.list_friendships(user.id)).await?;
    Ok(Json(friends))
}

async fn send_friend_request(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<FriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let friend_id = required("friend_id", req.friend_id)?;
    let tx = state.ws_tx.clone();
    let friendship = state
        .db
        .call(move |db| {
            let friendship = db.create_friend_request(user.id, friend_id)?;
            let fallback = NewNotification::new(
                friend_id,
                NotificationType::FriendRequest,
                "New friend request",
                format!("{} sent you a friend request.", user.username),
            )
            .icon("👋")
            .action_url("/friends")
            .reference(friendship.id);
            notify::notify_templated(
                db,
                &tx,
                "friend_request",
                &[("username", user.username.clone())],
                fallback,
            )?;
            Ok(friendship)
        })
        .await?;
    tracing::info!(user_id = friendship.user_id, friend_id, "friend request sent");
    Ok((StatusCode::CREATED, Json(friendship)))
}

async fn respond_friend_request(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<FriendActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let action = req.action.unwrap_or_default();
    let friendship = state
        .db
        .call(move |db| db.respond_friend_request(user.id, id, &action))
        .await?;
    Ok(Json(friendship))
}

async fn remove_friend(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_friendship(user.id, id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Friendship {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use crate::models::UserRole;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_profile_get_and_patch() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        let (status, body) = app.get("/api/users/profile", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
        assert_eq!(body["login_streak"], 1);

        let (status, body) = app
            .request(
                Method::PATCH,
                "/api/users/profile",
                Some(&token),
                Some(json!({"location": "Austin, TX", "bio": "hi", "username": "mallory"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["location"], "Austin, TX");
        assert_eq!(body["username"], "alice");

        let (status, _) = app
            .request(
                Method::PATCH,
                "/api/users/profile",
                Some(&token),
                Some(json!({"avatar": "not a url"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_friend_request_lifecycle() {
        let app = TestApp::new();
        let (alice, alice_token) = app.user("alice", UserRole::Individual, "");
        let (bob, bob_token) = app.user("bob", UserRole::Individual, "");

        let (status, _) = app.post("/api/users/friends", &alice_token, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app
            .post("/api/users/friends", &alice_token, json!({"friend_id": 999}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .post("/api/users/friends", &alice_token, json!({"friend_id": alice.id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post("/api/users/friends", &alice_token, json!({"friend_id": bob.id}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "PENDING");
        let fid = body["id"].as_i64().unwrap();

        // Either direction counts as existing.
        let (status, body) = app
            .post("/api/users/friends", &bob_token, json!({"friend_id": alice.id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Friendship already exists");

        // Bob was notified.
        let (_, body) = app.get("/api/notifications/unread-count", &bob_token).await;
        assert_eq!(body["unread_count"], 1);

        // Only the recipient may respond.
        let uri = format!("/api/users/friends/{}", fid);
        let (status, _) = app
            .request(Method::PUT, &uri, Some(&alice_token), Some(json!({"action": "accept"})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .request(Method::PUT, &uri, Some(&bob_token), Some(json!({"action": "maybe"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = app
            .request(Method::PUT, &uri, Some(&bob_token), Some(json!({"action": "accept"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ACCEPTED");

        let (_, body) = app.get("/api/users/stats", &alice_token).await;
        assert_eq!(body["friends_count"], 1);

        let (status, _) = app.request(Method::DELETE, &uri, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.request(Method::DELETE, &uri, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_leaderboard_scopes() {
        let app = TestApp::new();
        let (alice, token) = app.user("alice", UserRole::Individual, "Paris, FR");
        let (bob, _) = app.user("bob", UserRole::Individual, "paris");
        let (carol, _) = app.user("carol", UserRole::Individual, "Lima");
        {
            let db = app.state.db.lock_sync().unwrap();
            use crate::models::PointSource;
            db.award_points(bob.id, 30, PointSource::Bonus, "b", None).unwrap();
            db.award_points(carol.id, 50, PointSource::Bonus, "c", None).unwrap();
            db.award_points(alice.id, 10, PointSource::Bonus, "a", None).unwrap();
        }

        let (status, body) = app.get("/api/users/leaderboard", &token).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["username"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["carol", "bob", "alice"]);

        let (_, body) = app.get("/api/users/leaderboard?type=city", &token).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["username"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["bob", "alice"]);

        let (_, body) = app.get("/api/users/leaderboard?type=friends", &token).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["rank"], 1);
    }
}
