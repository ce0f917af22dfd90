use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Deserialize;

use super::{ApiError, Json, Path, Query, SharedState, parse_choice, required};
use crate::achievements;
use crate::auth::CurrentUser;
use crate::db::{self, LeaderboardScope};
use crate::models::{
    ChallengeType, NewChallenge, NewNotification, NotificationPriority, NotificationType,
};
use crate::notify;
use crate::ws::{self, WsEvent};

const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
const MAX_LEADERBOARD_LIMIT: i64 = 100;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/gamification/challenges",
            get(list_challenges).post(create_challenge),
        )
        .route("/api/gamification/challenges/{id}", get(get_challenge))
        .route("/api/gamification/challenges/{id}/join", post(join_challenge))
        .route(
            "/api/gamification/challenges/{id}/progress",
            post(update_progress),
        )
        .route("/api/gamification/my-challenges", get(my_challenges))
        .route("/api/gamification/achievements", get(list_achievements))
        .route("/api/gamification/my-achievements", get(my_achievements))
        .route("/api/gamification/points", get(list_points))
        .route("/api/gamification/points/summary", get(points_summary))
        .route("/api/gamification/leaderboard", get(leaderboard))
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateChallengeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub challenge_type: Option<String>,
    pub points_reward: Option<i64>,
    pub duration_days: Option<i64>,
    pub target_value: Option<f64>,
    #[serde(default)]
    pub target_unit: String,
    #[serde(default)]
    pub category: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub max_participants: Option<i64>,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, RFC 3339 or a bare date (midnight UTC).
fn parse_timestamp(field: &str, raw: &str) -> Result<NaiveDateTime, ApiError> {
    let raw = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ApiError::BadRequest(format!("{}: Datetime has wrong format.", field)))
}

fn validate_challenge(req: CreateChallengeRequest, creator_id: i64) -> Result<NewChallenge, ApiError> {
    let name = required("name", req.name.filter(|n| !n.trim().is_empty()))?;
    let description = required("description", req.description)?;
    let challenge_type: ChallengeType =
        parse_choice("challenge_type", &required("challenge_type", req.challenge_type)?)?;
    let points_reward = required("points_reward", req.points_reward)?;
    let duration_days = required("duration_days", req.duration_days)?;
    if points_reward < 0 {
        return Err(ApiError::BadRequest(
            "points_reward: Ensure this value is greater than or equal to 0.".into(),
        ));
    }
    if duration_days < 1 {
        return Err(ApiError::BadRequest(
            "duration_days: Ensure this value is greater than or equal to 1.".into(),
        ));
    }

    let start = match req.start_date.as_deref() {
        Some(raw) => parse_timestamp("start_date", raw)?,
        None => chrono::Utc::now().naive_utc(),
    };
    let end = match req.end_date.as_deref() {
        Some(raw) => parse_timestamp("end_date", raw)?,
        None => TimeDelta::try_days(duration_days)
            .and_then(|span| start.checked_add_signed(span))
            .ok_or_else(|| {
                ApiError::BadRequest("duration_days: Duration is too large.".into())
            })?,
    };
    if end < start {
        return Err(ApiError::BadRequest(
            "end_date: End date must not be before the start date.".into(),
        ));
    }

    Ok(NewChallenge {
        name,
        description,
        challenge_type,
        points_reward,
        duration_days,
        target_value: req.target_value,
        target_unit: req.target_unit,
        category: req.category,
        creator_id: Some(creator_id),
        start_date: start.format(TIMESTAMP_FORMAT).to_string(),
        end_date: end.format(TIMESTAMP_FORMAT).to_string(),
        max_participants: req.max_participants,
        is_featured: req.is_featured,
    })
}

// ── Challenges ────────────────────────────────────────────────────────

async fn list_challenges(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let now = db::now_timestamp();
    let challenges = state
        .db
        .call(move |db| db.list_active_challenges(&now))
        .await?;
    Ok(Json(challenges))
}

async fn get_challenge(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.get_challenge(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Challenge {} not found", id)))
}

async fn create_challenge(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !user.role.can_create_challenges() {
        return Err(ApiError::Forbidden(
            "Only NGOs and admins can create challenges".into(),
        ));
    }
    let new = validate_challenge(req, user.id)?;
    let challenge = state.db.call(move |db| db.create_challenge(&new)).await?;
    tracing::info!(challenge_id = challenge.id, creator = user.id, "challenge created");
    Ok((StatusCode::CREATED, Json(challenge)))
}

async fn join_challenge(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let now = db::now_timestamp();
    let participation = state
        .db
        .call(move |db| db.join_challenge(user.id, id, &now))
        .await?;
    Ok((StatusCode::CREATED, Json(participation)))
}

async fn update_progress(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let value = required("progress_value", req.progress_value)?;
    if !value.is_finite() || value < 0.0 {
        return Err(ApiError::BadRequest(
            "progress_value: Ensure this value is greater than or equal to 0.".into(),
        ));
    }
    let tx = state.ws_tx.clone();
    let participation = state
        .db
        .call(move |db| {
            let outcome = db.update_challenge_progress(user.id, id, value)?;
            let participation = outcome.participation;
            let name = participation
                .challenge
                .as_ref()
                .map(|c| c.name.clone())
                .unwrap_or_default();

            ws::send_to_user(
                &tx,
                user.id,
                &WsEvent::ChallengeUpdate {
                    challenge_id: id,
                    challenge_name: name.clone(),
                    progress: participation.progress_percentage,
                    status: participation.status.to_string(),
                },
            );

            if outcome.completed {
                tracing::info!(user_id = user.id, challenge_id = id, points = outcome.points_awarded, "challenge completed");
                let fallback = NewNotification::new(
                    user.id,
                    NotificationType::Challenge,
                    format!("Challenge Completed: {}", name),
                    format!(
                        "You completed \"{}\" and earned {} points.",
                        name, outcome.points_awarded
                    ),
                )
                .priority(NotificationPriority::High)
                .icon("🎯")
                .action_url("/challenges")
                .reference(id);
                notify::notify_templated(
                    db,
                    &tx,
                    "challenge_completed",
                    &[
                        ("challenge_name", name.clone()),
                        ("points", outcome.points_awarded.to_string()),
                    ],
                    fallback,
                )?;
                achievements::check_achievements(db, &tx, user.id)?;
            }
            Ok(participation)
        })
        .await?;
    Ok(Json(participation))
}

async fn my_challenges(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let participations = state
        .db
        .call(move |db| db.list_user_challenges(user.id))
        .await?;
    Ok(Json(participations))
}

// ── Achievements & points ─────────────────────────────────────────────

async fn list_achievements(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let achievements = state
        .db
        .call(move |db| db.list_achievements_for(user.id))
        .await?;
    Ok(Json(achievements))
}

async fn my_achievements(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let earned = state
        .db
        .call(move |db| db.list_user_achievements(user.id))
        .await?;
    Ok(Json(earned))
}

async fn list_points(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let points = state.db.call(move |db| db.list_points(user.id)).await?;
    Ok(Json(points))
}

async fn points_summary(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.db.call(move |db| db.points_summary(user.id)).await?;
    Ok(Json(summary))
}

async fn leaderboard(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    let entries = state
        .db
        .call(move |db| db.leaderboard(&LeaderboardScope::Global, user.id, limit))
        .await?;
    Ok(Json(entries))
}
