use axum::{
    Router,
    extract::State,
    response::IntoResponse,
    routing::get,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, Json, Query, SharedState, parse_choice};
use crate::auth::CurrentUser;
use crate::db;
use crate::models::{ClimateDataType, StatType};
use crate::services::climate;

const DEFAULT_DATA_LIMIT: i64 = 100;
const MAX_DATA_LIMIT: i64 = 1000;
const DEFAULT_TREND_DAYS: i64 = 30;
const MAX_TREND_DAYS: i64 = 3650;
const DEFAULT_HISTORY_MONTHS: u32 = 12;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/climate/data", get(list_data))
        .route("/api/climate/alerts", get(list_alerts))
        .route("/api/climate/statistics", get(list_statistics))
        .route("/api/climate/stats", get(stats))
        .route("/api/climate/trends", get(trends))
        .route("/api/climate/historical", get(historical))
}

#[derive(Debug, Deserialize)]
pub struct DataParams {
    pub data_type: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub stat_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrendParams {
    pub data_type: Option<String>,
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoricalParams {
    pub data_type: Option<String>,
    pub months: Option<u32>,
}

async fn list_data(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Query(params): Query<DataParams>,
) -> Result<impl IntoResponse, ApiError> {
    let data_type = params
        .data_type
        .as_deref()
        .map(|t| parse_choice::<ClimateDataType>("data_type", t))
        .transpose()?;
    let limit = params.limit.unwrap_or(DEFAULT_DATA_LIMIT).clamp(1, MAX_DATA_LIMIT);
    let data = state
        .db
        .call(move |db| db.list_climate_data(data_type, limit))
        .await?;
    Ok(Json(data))
}

async fn list_alerts(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let alerts = state.db.call(|db| db.list_active_alerts()).await?;
    Ok(Json(alerts))
}

async fn list_statistics(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Query(params): Query<StatisticsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let stat_type = params
        .stat_type
        .as_deref()
        .map(|t| parse_choice::<StatType>("stat_type", t))
        .transpose()?;
    let stats = state
        .db
        .call(move |db| db.list_climate_statistics(stat_type))
        .await?;
    Ok(Json(stats))
}

async fn stats(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let (by_type, active_alerts) = state
        .db
        .call(|db| Ok((db.climate_stats()?, db.list_active_alerts()?.len())))
        .await?;
    Ok(Json(json!({
        "data_types": by_type,
        "active_alerts": active_alerts,
    })))
}

async fn trends(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Query(params): Query<TrendParams>,
) -> Result<impl IntoResponse, ApiError> {
    let data_type = match params.data_type.as_deref() {
        Some(raw) => parse_choice::<ClimateDataType>("data_type", raw)?,
        None => ClimateDataType::Co2Levels,
    };
    let days = params.days.unwrap_or(DEFAULT_TREND_DAYS).clamp(1, MAX_TREND_DAYS);
    let since = (db::today() - Duration::days(days))
        .format("%Y-%m-%d")
        .to_string();
    let trend = state
        .db
        .call(move |db| db.climate_trend(data_type, &since, days))
        .await?;
    Ok(Json(trend))
}

async fn historical(
    CurrentUser(_user): CurrentUser,
    Query(params): Query<HistoricalParams>,
) -> impl IntoResponse {
    let data_type = params.data_type.unwrap_or_else(|| "co2".to_string());
    let months = params
        .months
        .unwrap_or(DEFAULT_HISTORY_MONTHS)
        .clamp(1, climate::MAX_HISTORY_MONTHS);
    let data = climate::historical_trends(&data_type, months);
    Json(json!({
        "data_type": data_type,
        "months": months,
        "data": data,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use super::*;
    use crate::models::{AlertSeverity, AlertType, NewClimateAlert, UserRole};
    use axum::http::StatusCode;

    fn day(offset: i64) -> String {
        (db::today() - Duration::days(offset))
            .format("%Y-%m-%d")
            .to_string()
    }

    #[tokio::test]
    async fn test_data_listing_and_filter() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        {
            let db = app.state.db.lock_sync().unwrap();
            db.upsert_climate_data(ClimateDataType::Co2Levels, 419.0, "ppm", &day(2), "test").unwrap();
            db.upsert_climate_data(ClimateDataType::Co2Levels, 420.0, "ppm", &day(1), "test").unwrap();
            db.upsert_climate_data(ClimateDataType::SeaLevel, 3.3, "mm", &day(1), "test").unwrap();
        }
        let (_, body) = app.get("/api/climate/data?data_type=CO2_LEVELS", &token).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["value"], 420.0);

        let (_, body) = app.get("/api/climate/data?limit=1", &token).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = app.get("/api/climate/data?data_type=RAIN", &token).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_and_trends() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        {
            let db = app.state.db.lock_sync().unwrap();
            for (offset, value) in [(20, 418.0), (10, 419.0), (1, 421.5)] {
                db.upsert_climate_data(ClimateDataType::Co2Levels, value, "ppm", &day(offset), "test")
                    .unwrap();
            }
            db.create_alert_if_new(
                &NewClimateAlert {
                    title: "Heat".into(),
                    description: "Hot".into(),
                    alert_type: AlertType::Temperature,
                    severity: AlertSeverity::Critical,
                    location: "Everywhere".into(),
                    source: "test".into(),
                    external_id: "heat".into(),
                },
                &day(0),
            )
            .unwrap();
        }

        let (_, body) = app.get("/api/climate/stats", &token).await;
        assert_eq!(body["active_alerts"], 1);
        assert_eq!(body["data_types"][0]["latest_value"], 421.5);
        assert_eq!(body["data_types"][0]["count"], 3);

        let (_, body) = app.get("/api/climate/trends", &token).await;
        assert_eq!(body["current"], 421.5);
        assert_eq!(body["change"], 3.5);
        assert_eq!(body["data_points"], 3);
        assert_eq!(body["period_days"], 30);

        let (_, body) = app.get("/api/climate/trends?days=5", &token).await;
        assert_eq!(body["data_points"], 1);
        assert_eq!(body["change"], 0.0);

        let (_, body) = app.get("/api/climate/alerts", &token).await;
        assert_eq!(body[0]["severity"], "CRITICAL");
    }

    #[tokio::test]
    async fn test_statistics_filter() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        {
            let db = app.state.db.lock_sync().unwrap();
            for (stat, value, unit) in climate::fetch_climate_statistics().statistics() {
                db.upsert_climate_statistic(stat, value, unit, "daily", &day(0)).unwrap();
            }
        }
        let (_, body) = app.get("/api/climate/statistics", &token).await;
        assert_eq!(body.as_array().unwrap().len(), 4);
        let (_, body) = app.get("/api/climate/statistics?stat_type=GLOBAL_CO2", &token).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["value"], 420.5);
    }

    #[tokio::test]
    async fn test_historical_series() {
        let app = TestApp::new();
        let (_, token) = app.user("alice", UserRole::Individual, "");
        let (_, body) = app.get("/api/climate/historical", &token).await;
        assert_eq!(body["months"], 12);
        assert_eq!(body["data"].as_array().unwrap().len(), 12);
        assert_eq!(body["data"][0]["value"], 415.0);

        let (_, body) = app
            .get("/api/climate/historical?data_type=temperature&months=500", &token)
            .await;
        assert_eq!(body["months"], 60);
        assert_eq!(body["data"][0]["unit"], "°C");
    }
}
