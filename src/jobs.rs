//! Periodic maintenance jobs.
//!
//! Each job runs on its own tokio interval once the server starts. Failures
//! are logged and the job waits for its next tick; there is no retry.
//! `ecosphere run-job <name>` runs a single job on demand.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::achievements;
use crate::api::SharedState;
use crate::db;
use crate::models::{
    AlertSeverity, NewArticle, NewNotification, NotificationPriority, NotificationType,
};
use crate::notify;
use crate::services::climate;
use crate::services::news_curation::builtin_feed;
use crate::ws::{self, WsEvent};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SUMMARY_WINDOW_DAYS: i64 = 7;
const NOTIFICATION_RETENTION_DAYS: i64 = 30;
const CLIMATE_DATA_RETENTION_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    WeeklySummary,
    FetchNews,
    UpdateClimateData,
    CheckAchievements,
    CleanupOldData,
    ClimateAlerts,
}

impl Job {
    pub const ALL: [Job; 6] = [
        Job::WeeklySummary,
        Job::FetchNews,
        Job::UpdateClimateData,
        Job::CheckAchievements,
        Job::CleanupOldData,
        Job::ClimateAlerts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Job::WeeklySummary => "weekly_summary",
            Job::FetchNews => "fetch_news",
            Job::UpdateClimateData => "update_climate_data",
            Job::CheckAchievements => "check_achievements",
            Job::CleanupOldData => "cleanup_old_data",
            Job::ClimateAlerts => "climate_alerts",
        }
    }

    pub fn interval(&self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;
        Duration::from_secs(match self {
            Job::WeeklySummary => 7 * DAY,
            Job::FetchNews => 6 * HOUR,
            Job::UpdateClimateData => HOUR,
            Job::CheckAchievements => DAY,
            Job::CleanupOldData => 7 * DAY,
            Job::ClimateAlerts => 30 * MINUTE,
        })
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Job {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Job::ALL.iter().find(|job| job.name() == s) {
            Some(job) => Ok(*job),
            None => bail!(
                "Unknown job '{}'. Available jobs: {}",
                s,
                job_names().join(", ")
            ),
        }
    }
}

pub fn job_names() -> Vec<&'static str> {
    Job::ALL.iter().map(Job::name).collect()
}

/// Run one job to completion and return a one-line report.
pub async fn run_job(state: &SharedState, job: Job) -> Result<String> {
    match job {
        Job::WeeklySummary => weekly_summary(state).await,
        Job::FetchNews => fetch_news(state).await,
        Job::UpdateClimateData => update_climate_data(state).await,
        Job::CheckAchievements => check_achievements(state).await,
        Job::CleanupOldData => cleanup_old_data(state).await,
        Job::ClimateAlerts => climate_alerts(state).await,
    }
}

/// Run a job, logging the outcome instead of returning it.
pub async fn run_logged(state: &SharedState, job: Job) {
    tracing::info!(job = %job, "job started");
    match run_job(state, job).await {
        Ok(report) => tracing::info!(job = %job, %report, "job finished"),
        Err(e) => tracing::error!(job = %job, error = %format!("{:#}", e), "job failed"),
    }
}

/// Start one task per job. Each first fires one interval after startup.
/// Abort the handles to stop them.
pub fn spawn_scheduler(state: SharedState) -> Vec<JoinHandle<()>> {
    Job::ALL
        .into_iter()
        .map(|job| {
            let state = state.clone();
            tokio::spawn(async move {
                let period = job.interval();
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    run_logged(&state, job).await;
                }
            })
        })
        .collect()
}

fn timestamp_days_ago(days: i64) -> String {
    (Utc::now() - ChronoDuration::days(days))
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

fn weekly_summary_content(
    total_co2: f64,
    entries: i64,
    challenges: i64,
    achievements: i64,
    points: i64,
) -> String {
    format!(
        "Weekly EcoSphere Summary:\n\n\
         • Carbon tracked: {:.1} kg CO2 ({} entries)\n\
         • Challenges completed: {}\n\
         • Achievements earned: {}\n\
         • Current points: {}\n\n\
         Keep up the great work! 🌱",
        total_co2, entries, challenges, achievements, points
    )
}

async fn weekly_summary(state: &SharedState) -> Result<String> {
    let since = timestamp_days_ago(SUMMARY_WINDOW_DAYS);
    let tx = state.ws_tx.clone();
    let sent = state
        .db
        .call(move |db| {
            let users = db.list_active_users()?;
            for user in &users {
                let (entries, total_co2) = db.carbon_created_since(user.id, &since)?;
                let challenges = db.challenges_completed_since(user.id, &since)?;
                let earned = db.achievements_earned_since(user.id, &since)?;
                let values = [
                    ("username", user.username.clone()),
                    ("total_co2", format!("{:.1}", total_co2)),
                    ("entries_count", entries.to_string()),
                    ("challenges_completed", challenges.to_string()),
                    ("achievements_earned", earned.to_string()),
                    ("total_points", user.total_points.to_string()),
                ];
                let fallback = NewNotification::new(
                    user.id,
                    NotificationType::WeeklySummary,
                    "Weekly EcoSphere Summary",
                    weekly_summary_content(total_co2, entries, challenges, earned, user.total_points),
                )
                .icon("📊")
                .action_url("/dashboard");
                notify::notify_templated(db, &tx, "weekly_summary", &values, fallback)?;
            }
            Ok(users.len())
        })
        .await?;
    Ok(format!("weekly summary sent to {} users", sent))
}

async fn fetch_news(state: &SharedState) -> Result<String> {
    let feed = builtin_feed(Utc::now());
    let total = feed.len();
    let curator = state.curator();
    let mut created = 0;
    for item in feed {
        let url = item.url.to_string();
        if state.db.call(move |db| db.article_url_exists(&url)).await? {
            continue;
        }
        let summary = curator.summarize(item.title, item.content).await;
        let category = curator.categorize(item.title, item.content).await;
        let article = NewArticle {
            title: item.title.to_string(),
            content: item.content.to_string(),
            summary,
            url: item.url.to_string(),
            source: item.source.to_string(),
            author: String::new(),
            category,
            published_date: item.published_date.format(TIMESTAMP_FORMAT).to_string(),
            image_url: None,
            is_featured: false,
        };
        let stored = state.db.call(move |db| db.create_article(&article)).await?;
        tracing::debug!(article_id = stored.id, category = %stored.category, "article curated");
        created += 1;
    }
    Ok(format!("processed {} articles, {} new", total, created))
}

async fn update_climate_data(state: &SharedState) -> Result<String> {
    let snapshot = climate::fetch_climate_statistics();
    let today = db::today().format("%Y-%m-%d").to_string();
    let updated = state
        .db
        .call(move |db| {
            let stats = snapshot.statistics();
            for (stat_type, value, unit) in stats {
                db.upsert_climate_statistic(stat_type, value, unit, "daily", &today)?;
            }
            Ok(stats.len())
        })
        .await?;
    Ok(format!("updated {} climate statistics", updated))
}

async fn check_achievements(state: &SharedState) -> Result<String> {
    let tx = state.ws_tx.clone();
    let (users, unlocked) = state
        .db
        .call(move |db| {
            let users = db.list_active_users()?;
            let mut unlocked = 0;
            for user in &users {
                unlocked += achievements::check_achievements(db, &tx, user.id)?.len();
            }
            Ok((users.len(), unlocked))
        })
        .await?;
    Ok(format!("checked {} users, {} achievements unlocked", users, unlocked))
}

async fn cleanup_old_data(state: &SharedState) -> Result<String> {
    let notification_cutoff = timestamp_days_ago(NOTIFICATION_RETENTION_DAYS);
    let climate_cutoff = (db::today() - ChronoDuration::days(CLIMATE_DATA_RETENTION_DAYS))
        .format("%Y-%m-%d")
        .to_string();
    let (notifications, climate_rows) = state
        .db
        .call(move |db| {
            Ok((
                db.delete_read_notifications_before(&notification_cutoff)?,
                db.delete_climate_data_before(&climate_cutoff)?,
            ))
        })
        .await?;
    Ok(format!(
        "cleaned up {} old notifications and {} old climate data points",
        notifications, climate_rows
    ))
}

fn alert_priority(severity: AlertSeverity) -> NotificationPriority {
    match severity {
        AlertSeverity::Low => NotificationPriority::Low,
        AlertSeverity::Medium => NotificationPriority::Medium,
        AlertSeverity::High => NotificationPriority::High,
        AlertSeverity::Critical => NotificationPriority::Urgent,
    }
}

async fn climate_alerts(state: &SharedState) -> Result<String> {
    let today = db::today().format("%Y-%m-%d").to_string();
    let tx = state.ws_tx.clone();
    let (created, notified) = state
        .db
        .call(move |db| {
            let mut created = 0;
            let mut notified = 0;
            for candidate in climate::builtin_alerts() {
                // Already raised today.
                let Some(alert) = db.create_alert_if_new(&candidate, &today)? else {
                    continue;
                };
                created += 1;
                let values = [
                    ("title", alert.title.clone()),
                    ("description", alert.description.clone()),
                    ("location", alert.location.clone()),
                    ("severity", alert.severity.to_string()),
                ];
                for user in db.list_active_users()? {
                    let fallback = NewNotification::new(
                        user.id,
                        NotificationType::ClimateAlert,
                        alert.title.clone(),
                        alert.description.clone(),
                    )
                    .priority(alert_priority(alert.severity))
                    .icon("⚠️")
                    .action_url("/climate")
                    .reference(alert.id);
                    notify::notify_templated(db, &tx, "climate_alert", &values, fallback)?;
                    notified += 1;
                }
                ws::broadcast_all(&tx, &WsEvent::from_alert(&alert));
            }
            Ok((created, notified))
        })
        .await?;
    Ok(format!("{} new alerts, {} notifications sent", created, notified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_state;
    use crate::models::{ClimateDataType, NewCarbonEntry, Subcategory, UserRole};

    fn add_user(state: &SharedState, name: &str) -> i64 {
        let db = state.db.lock_sync().unwrap();
        db.create_user(name, &format!("{}@example.com", name), UserRole::Individual, "")
            .unwrap()
            .id
    }

    #[test]
    fn test_job_names_round_trip() {
        assert_eq!(job_names().len(), 6);
        for job in Job::ALL {
            assert_eq!(job.name().parse::<Job>().unwrap(), job);
        }
        let err = "reindex".parse::<Job>().unwrap_err().to_string();
        assert!(err.contains("Unknown job 'reindex'"));
        assert!(err.contains("climate_alerts"));
    }

    #[test]
    fn test_intervals() {
        assert_eq!(Job::ClimateAlerts.interval(), Duration::from_secs(1800));
        assert_eq!(Job::FetchNews.interval(), Duration::from_secs(6 * 3600));
        assert_eq!(Job::WeeklySummary.interval(), Duration::from_secs(7 * 86400));
    }

    #[tokio::test]
    async fn test_weekly_summary_counts_recent_entries() {
        let state = test_state();
        let alice = add_user(&state, "alice");
        add_user(&state, "bob");
        {
            let db = state.db.lock_sync().unwrap();
            db.create_carbon_entry(
                alice,
                &NewCarbonEntry {
                    category: Subcategory::Car.category(),
                    subcategory: Subcategory::Car,
                    value: 10.0,
                    unit: "km".into(),
                    date: db::today().format("%Y-%m-%d").to_string(),
                    notes: String::new(),
                },
            )
            .unwrap();
        }

        let report = run_job(&state, Job::WeeklySummary).await.unwrap();
        assert_eq!(report, "weekly summary sent to 2 users");

        let db = state.db.lock_sync().unwrap();
        let notes = db.list_notifications(alice, false).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].notification_type, NotificationType::WeeklySummary);
        assert!(notes[0].content.contains("kg CO2 (1 entries)"));
        assert!(notes[0].content.contains("Current points: 0"));
    }

    #[tokio::test]
    async fn test_fetch_news_skips_known_urls() {
        let state = test_state();
        let first = run_job(&state, Job::FetchNews).await.unwrap();
        assert_eq!(first, "processed 3 articles, 3 new");
        let second = run_job(&state, Job::FetchNews).await.unwrap();
        assert_eq!(second, "processed 3 articles, 0 new");

        let db = state.db.lock_sync().unwrap();
        let articles = db.list_articles(None, 10, 0).unwrap();
        assert_eq!(articles.len(), 3);
        assert!(articles.iter().all(|a| !a.summary.is_empty()));
    }

    #[tokio::test]
    async fn test_update_climate_data_is_idempotent_per_day() {
        let state = test_state();
        run_job(&state, Job::UpdateClimateData).await.unwrap();
        run_job(&state, Job::UpdateClimateData).await.unwrap();
        let db = state.db.lock_sync().unwrap();
        let stats = db.list_climate_statistics(None).unwrap();
        assert_eq!(stats.len(), 4);
        assert!(stats.iter().all(|s| s.period == "daily"));
    }

    #[tokio::test]
    async fn test_climate_alert_raised_once_per_day() {
        let state = test_state();
        let alice = add_user(&state, "alice");
        let mut rx = state.ws_tx.subscribe();

        let report = run_job(&state, Job::ClimateAlerts).await.unwrap();
        assert_eq!(report, "1 new alerts, 1 notifications sent");
        let report = run_job(&state, Job::ClimateAlerts).await.unwrap();
        assert_eq!(report, "0 new alerts, 0 notifications sent");

        // Personal notification first, then the broadcast alert.
        let personal = rx.try_recv().unwrap();
        assert_eq!(personal.user_id, Some(alice));
        let broadcast = rx.try_recv().unwrap();
        assert_eq!(broadcast.user_id, None);
        assert!(broadcast.payload.contains("\"climate_alert\""));

        let db = state.db.lock_sync().unwrap();
        let notes = db.list_notifications(alice, false).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].priority, NotificationPriority::High);
        assert_eq!(notes[0].title, "High Air Quality Alert");
        assert_eq!(db.list_active_alerts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_drops_old_climate_data() {
        let state = test_state();
        {
            let db = state.db.lock_sync().unwrap();
            let old = (db::today() - ChronoDuration::days(400))
                .format("%Y-%m-%d")
                .to_string();
            let recent = db::today().format("%Y-%m-%d").to_string();
            db.upsert_climate_data(ClimateDataType::SeaLevel, 3.0, "mm", &old, "test").unwrap();
            db.upsert_climate_data(ClimateDataType::SeaLevel, 3.4, "mm", &recent, "test").unwrap();
        }
        let report = run_job(&state, Job::CleanupOldData).await.unwrap();
        assert_eq!(report, "cleaned up 0 old notifications and 1 old climate data points");
        let db = state.db.lock_sync().unwrap();
        assert_eq!(db.list_climate_data(None, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_check_achievements_job_runs_for_everyone() {
        let state = test_state();
        add_user(&state, "alice");
        let report = run_job(&state, Job::CheckAchievements).await.unwrap();
        assert_eq!(report, "checked 1 users, 0 achievements unlocked");
    }
}
