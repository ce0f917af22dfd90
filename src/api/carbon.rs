use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use chrono::{Datelike, NaiveDate, TimeDelta};
use serde::Deserialize;

use super::{ApiError, Json, Path, Query, SharedState, parse_choice, required};
use crate::achievements;
use crate::auth::CurrentUser;
use crate::db;
use crate::emissions;
use crate::models::{
    CarbonCategory, CarbonEntryFilter, NewCarbonEntry, NewCarbonGoal, Subcategory,
};
use crate::report;

/// Days covered by an export when no range is given.
const DEFAULT_EXPORT_DAYS: i64 = 365;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/carbon/entries", get(list_entries).post(create_entry))
        .route(
            "/api/carbon/entries/{id}",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .route("/api/carbon/goals", get(list_goals).post(create_goal))
        .route(
            "/api/carbon/goals/{id}",
            get(get_goal).put(update_goal).delete(delete_goal),
        )
        .route("/api/carbon/summary", get(summary))
        .route("/api/carbon/comparison", get(comparison))
        .route("/api/carbon/export", get(export_report))
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub date: Option<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct EntryListParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GoalRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub target_reduction: Option<f64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!(
            "{}: Date has wrong format. Use one of these formats instead: YYYY-MM-DD.",
            field
        ))
    })
}

/// Start of the default export window ending at `end`.
fn default_export_start(end: NaiveDate) -> Result<NaiveDate, ApiError> {
    TimeDelta::try_days(DEFAULT_EXPORT_DAYS)
        .and_then(|window| end.checked_sub_signed(window))
        .ok_or_else(|| ApiError::BadRequest("end_date: Date is out of range.".into()))
}

/// Check an entry payload and fill in the default unit.
fn validate_entry(req: EntryRequest) -> Result<NewCarbonEntry, ApiError> {
    let category: CarbonCategory = parse_choice("category", &required("category", req.category)?)?;
    let subcategory: Subcategory =
        parse_choice("subcategory", &required("subcategory", req.subcategory)?)?;
    if subcategory.category() != category {
        return Err(ApiError::BadRequest(format!(
            "subcategory: {} is not a {} activity.",
            subcategory, category
        )));
    }
    let value = required("value", req.value)?;
    if !value.is_finite() || value < 0.0 {
        return Err(ApiError::BadRequest(
            "value: Ensure this value is greater than or equal to 0.".into(),
        ));
    }
    let date = parse_date("date", &required("date", req.date)?)?;
    let unit = match req.unit {
        Some(unit) if !unit.trim().is_empty() => unit,
        _ => emissions::factor_for(subcategory).unit.to_string(),
    };
    Ok(NewCarbonEntry {
        category,
        subcategory,
        value,
        unit,
        date: date.format("%Y-%m-%d").to_string(),
        notes: req.notes,
    })
}

fn validate_goal(req: GoalRequest) -> Result<NewCarbonGoal, ApiError> {
    let title = required("title", req.title.filter(|t| !t.trim().is_empty()))?;
    let description = required("description", req.description)?;
    let target_reduction = required("target_reduction", req.target_reduction)?;
    if !target_reduction.is_finite() || target_reduction <= 0.0 {
        return Err(ApiError::BadRequest(
            "target_reduction: Ensure this value is greater than 0.".into(),
        ));
    }
    let start = parse_date("start_date", &required("start_date", req.start_date)?)?;
    let end = parse_date("end_date", &required("end_date", req.end_date)?)?;
    if end < start {
        return Err(ApiError::BadRequest(
            "end_date: End date must not be before the start date.".into(),
        ));
    }
    Ok(NewCarbonGoal {
        title,
        description,
        target_reduction,
        start_date: start.format("%Y-%m-%d").to_string(),
        end_date: end.format("%Y-%m-%d").to_string(),
        is_active: req.is_active.unwrap_or(true),
    })
}

// ── Entries ───────────────────────────────────────────────────────────

async fn list_entries(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<EntryListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = CarbonEntryFilter {
        start_date: params.start_date,
        end_date: params.end_date,
        category: params
            .category
            .as_deref()
            .map(|c| parse_choice::<CarbonCategory>("category", c))
            .transpose()?,
    };
    let entries = state
        .db
        .call(move |db| db.list_carbon_entries(user.id, &filter))
        .await?;
    Ok(Json(entries))
}

async fn create_entry(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<EntryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = validate_entry(req)?;
    let tx = state.ws_tx.clone();
    let entry = state
        .db
        .call(move |db| {
            let entry = db.create_carbon_entry(user.id, &new)?;
            achievements::check_achievements(db, &tx, user.id)?;
            Ok(entry)
        })
        .await?;
    tracing::debug!(entry_id = entry.id, co2 = entry.co2_calculated, "carbon entry created");
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_entry(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.get_carbon_entry(user.id, id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Carbon entry {} not found", id)))
}

async fn update_entry(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<EntryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = validate_entry(req)?;
    let entry = state
        .db
        .call(move |db| db.update_carbon_entry(user.id, id, &new))
        .await?;
    Ok(Json(entry))
}

async fn delete_entry(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_carbon_entry(user.id, id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Carbon entry {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Goals ─────────────────────────────────────────────────────────────

async fn list_goals(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let goals = state.db.call(move |db| db.list_carbon_goals(user.id)).await?;
    Ok(Json(goals))
}

async fn create_goal(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<GoalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = validate_goal(req)?;
    let goal = state
        .db
        .call(move |db| db.create_carbon_goal(user.id, &new))
        .await?;
    Ok((StatusCode::CREATED, Json(goal)))
}

async fn get_goal(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.get_carbon_goal(user.id, id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Carbon goal {} not found", id)))
}

async fn update_goal(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<GoalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = validate_goal(req)?;
    let goal = state
        .db
        .call(move |db| db.update_carbon_goal(user.id, id, &new))
        .await?;
    Ok(Json(goal))
}

async fn delete_goal(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_carbon_goal(user.id, id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Carbon goal {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Aggregates ────────────────────────────────────────────────────────

async fn summary(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<SummaryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let today = db::today();
    let year = params.year.unwrap_or_else(|| today.year());
    let month = params.month.unwrap_or_else(|| today.month());
    if !(1..=12).contains(&month) {
        return Err(ApiError::BadRequest("month: Must be between 1 and 12.".into()));
    }
    let summary = state
        .db
        .call(move |db| db.carbon_summary(user.id, year, month, today))
        .await?;
    Ok(Json(summary))
}

async fn comparison(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let comparison = state
        .db
        .call(move |db| db.carbon_comparison(user.id, db::today()))
        .await?;
    Ok(Json(comparison))
}

async fn export_report(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ExportParams>,
) -> Result<impl IntoResponse, ApiError> {
    let today = db::today();
    let end = match params.end_date.as_deref() {
        Some(raw) => parse_date("end_date", raw)?,
        None => today,
    };
    let start = match params.start_date.as_deref() {
        Some(raw) => parse_date("start_date", raw)?,
        None => default_export_start(end)?,
    };
    let start_date = start.format("%Y-%m-%d").to_string();
    let end_date = end.format("%Y-%m-%d").to_string();

    let filter = CarbonEntryFilter {
        start_date: Some(start_date.clone()),
        end_date: Some(end_date.clone()),
        category: None,
    };
    let user_id = user.id;
    let entries = state
        .db
        .call(move |db| db.list_carbon_entries(user_id, &filter))
        .await?;

    let pdf = report::carbon_report(&user, &entries, &start_date, &end_date);
    let disposition = format!(
        "attachment; filename=\"ecosphere-carbon-report-{}.pdf\"",
        user.username
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use super::*;
    use crate::models::UserRole;
    use axum::http::Method;
    use serde_json::json;

    fn car_entry(value: f64, date: &str) -> serde_json::Value {
        json!({
            "category": "TRANSPORTATION",
            "subcategory": "CAR",
            "value": value,
            "date": date,
        })
    }

    #[test]
    fn test_validate_entry_defaults_unit() {
        let req: EntryRequest = serde_json::from_value(json!({
            "category": "DOMESTIC",
            "subcategory": "ELECTRICITY",
            "value": 100.0,
            "date": "2024-03-01",
        }))
        .unwrap();
        let entry = validate_entry(req).unwrap();
        assert_eq!(entry.unit, "kWh");
        assert_eq!(entry.notes, "");
    }

    #[test]
    fn test_validate_entry_rejects_mismatched_subcategory() {
        let req: EntryRequest = serde_json::from_value(json!({
            "category": "DOMESTIC",
            "subcategory": "FLIGHT",
            "value": 1.0,
            "date": "2024-03-01",
        }))
        .unwrap();
        assert!(matches!(validate_entry(req), Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_entry_validation_errors() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");

        let mut missing_value = car_entry(1.0, "2024-03-01");
        missing_value.as_object_mut().unwrap().remove("value");
        let (status, body) = app.post("/api/carbon/entries", &token, missing_value).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "value: This field is required.");

        let (status, _) = app
            .post("/api/carbon/entries", &token, car_entry(-1.0, "2024-03-01"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app
            .post("/api/carbon/entries", &token, car_entry(1.0, "03/01/2024"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app
            .post(
                "/api/carbon/entries",
                &token,
                json!({"category": "FOOD", "subcategory": "CAR", "value": 1, "date": "2024-03-01"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entry_crud_is_scoped_to_owner() {
        let app = TestApp::new();
        let (_, alice) = app.user("alice", UserRole::Individual, "");
        let (_, bob) = app.user("bob", UserRole::Individual, "");

        let (status, body) = app
            .post("/api/carbon/entries", &alice, car_entry(100.0, "2024-03-01"))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["co2_calculated"], 20.0);
        assert_eq!(body["unit"], "km");
        let uri = format!("/api/carbon/entries/{}", body["id"]);

        let (status, _) = app.get(&uri, &bob).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = app.get("/api/carbon/entries", &bob).await;
        assert_eq!(body.as_array().unwrap().len(), 0);

        let (status, body) = app
            .request(Method::PUT, &uri, Some(&alice), Some(car_entry(50.0, "2024-03-02")))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["co2_calculated"], 10.0);
        let (status, _) = app
            .request(Method::PUT, &uri, Some(&bob), Some(car_entry(50.0, "2024-03-02")))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.request(Method::DELETE, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.request(Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_entry_list_filters_and_order() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        app.post("/api/carbon/entries", &token, car_entry(1.0, "2024-01-10")).await;
        app.post("/api/carbon/entries", &token, car_entry(2.0, "2024-03-10")).await;
        app.post(
            "/api/carbon/entries",
            &token,
            json!({"category": "DOMESTIC", "subcategory": "WASTE", "value": 3, "date": "2024-02-10"}),
        )
        .await;

        let (_, body) = app.get("/api/carbon/entries", &token).await;
        let dates: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["date"].as_str().unwrap())
            .collect();
        assert_eq!(dates, vec!["2024-03-10", "2024-02-10", "2024-01-10"]);

        let (_, body) = app
            .get("/api/carbon/entries?category=TRANSPORTATION&start_date=2024-02-01", &token)
            .await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["date"], "2024-03-10");

        let (status, _) = app.get("/api/carbon/entries?category=FOOD", &token).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_first_entry_unlocks_entries_achievement() {
        let app = TestApp::new();
        let (alice, token) = app.user("alice", UserRole::Individual, "");
        {
            let db = app.state.db.lock_sync().unwrap();
            db.create_achievement(&crate::models::NewAchievement {
                name: "First Step".into(),
                description: "Log your first entry".into(),
                badge_icon: "👣".into(),
                points_required: 0,
                criteria_type: crate::models::CriteriaType::Entries,
                criteria_value: 1.0,
                category: "carbon".into(),
                is_hidden: false,
            })
            .unwrap();
        }
        app.post("/api/carbon/entries", &token, car_entry(5.0, "2024-03-01")).await;
        let earned = app
            .state
            .db
            .lock_sync()
            .unwrap()
            .list_user_achievements(alice.id)
            .unwrap();
        assert_eq!(earned.len(), 1);
        assert_eq!(earned[0].achievement.name, "First Step");
    }

    #[tokio::test]
    async fn test_goal_validation_and_progress() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        let goal = json!({
            "title": "Drive less",
            "description": "Halve car use",
            "target_reduction": 200.0,
            "start_date": "2024-01-01",
            "end_date": "2024-06-30",
        });
        let (status, body) = app.post("/api/carbon/goals", &token, goal.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["progress_percentage"], 0.0);
        assert_eq!(body["is_active"], true);

        let mut backwards = goal.clone();
        backwards["end_date"] = json!("2023-12-31");
        let (status, _) = app.post("/api/carbon/goals", &token, backwards).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut zero = goal.clone();
        zero["target_reduction"] = json!(0);
        let (status, _) = app.post("/api/carbon/goals", &token, zero).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = app.get("/api/carbon/goals", &token).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_and_comparison() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        let today = db::today().format("%Y-%m-%d").to_string();
        app.post("/api/carbon/entries", &token, car_entry(100.0, &today)).await;

        let (status, body) = app.get("/api/carbon/summary", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monthly_total"], 20.0);
        assert_eq!(body["total_entries"], 1);
        assert_eq!(body["category_breakdown"]["TRANSPORTATION"], 20.0);
        assert_eq!(body["category_breakdown"]["DOMESTIC"], 0.0);

        let (status, _) = app.get("/api/carbon/summary?month=13", &token).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = app.get("/api/carbon/comparison", &token).await;
        assert_eq!(body["national_average"], 4000.0);
        assert_eq!(body["comparison_data"].as_array().unwrap().len(), 12);
    }

    #[test]
    fn test_default_export_start_stays_in_range() {
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(
            default_export_start(end).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        match default_export_start(NaiveDate::MIN) {
            Err(ApiError::BadRequest(msg)) => assert!(msg.starts_with("end_date: ")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_export_returns_pdf_attachment() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        let today = db::today().format("%Y-%m-%d").to_string();
        app.post("/api/carbon/entries", &token, car_entry(10.0, &today)).await;

        let (status, bytes, headers) = app
            .raw(Method::GET, "/api/carbon/export", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"ecosphere-carbon-report-alice.pdf\""
        );
        assert!(bytes.starts_with(b"%PDF-"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Total Entries: 1"));
        assert!(text.trim_end().ends_with("%%EOF"));
    }
}
