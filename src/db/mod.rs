//! SQLite persistence for every EcoSphere app.
//!
//! `EcoDb` owns a single `rusqlite::Connection`. Queries are grouped by app
//! in the submodules, each adding an `impl EcoDb` block:
//!
//! | Module | Tables |
//! |---|---|
//! | `users` | users, api_tokens, friendships |
//! | `carbon` | carbon_entries, carbon_goals |
//! | `gamification` | challenges, user_challenges, achievements, user_achievements, user_points |
//! | `news` | news_articles, article_bookmarks, trending_topics |
//! | `notifications` | notifications, notification_templates |
//! | `chatbot` | chat_sessions, chat_messages, chatbot_configs |
//! | `climate` | climate_data, climate_alerts, climate_statistics |

mod carbon;
mod chatbot;
mod climate;
mod gamification;
mod news;
mod notifications;
mod users;

pub use carbon::{GLOBAL_AVERAGE_KG, NATIONAL_AVERAGE_KG};
pub use chatbot::ChatExchange;
pub use users::{LeaderboardScope, ProfileUpdate, next_login_streak};

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite::types::Type;

use crate::errors::EcoError;

/// Async-safe handle to the database.
///
/// Wraps `EcoDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<EcoDb>>,
}

impl DbHandle {
    pub fn new(db: EcoDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&EcoDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| EcoError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup, CLI
    /// maintenance commands and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, EcoDb>> {
        self.inner
            .lock()
            .map_err(|_| EcoError::LockPoisoned.into())
    }
}

pub struct EcoDb {
    conn: Connection,
}

impl EcoDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL DEFAULT '',
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    role TEXT NOT NULL DEFAULT 'INDIVIDUAL',
                    location TEXT NOT NULL DEFAULT '',
                    bio TEXT NOT NULL DEFAULT '',
                    avatar TEXT,
                    notifications_enabled INTEGER NOT NULL DEFAULT 1,
                    email_notifications INTEGER NOT NULL DEFAULT 1,
                    total_points INTEGER NOT NULL DEFAULT 0,
                    login_streak INTEGER NOT NULL DEFAULT 0,
                    last_login_date TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    date_joined TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS api_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    token_hash TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    last_used_at TEXT
                );

                CREATE TABLE IF NOT EXISTS friendships (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    friend_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(user_id, friend_id)
                );

                CREATE TABLE IF NOT EXISTS carbon_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    category TEXT NOT NULL,
                    subcategory TEXT NOT NULL,
                    value REAL NOT NULL,
                    unit TEXT NOT NULL,
                    co2_calculated REAL NOT NULL,
                    date TEXT NOT NULL,
                    notes TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS carbon_goals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    target_reduction REAL NOT NULL,
                    current_reduction REAL NOT NULL DEFAULT 0,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS challenges (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    challenge_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'ACTIVE',
                    points_reward INTEGER NOT NULL DEFAULT 0,
                    duration_days INTEGER NOT NULL,
                    target_value REAL,
                    target_unit TEXT NOT NULL DEFAULT '',
                    category TEXT NOT NULL DEFAULT '',
                    creator_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    max_participants INTEGER,
                    is_featured INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS user_challenges (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    challenge_id INTEGER NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
                    status TEXT NOT NULL DEFAULT 'JOINED',
                    progress_value REAL NOT NULL DEFAULT 0,
                    progress_percentage REAL NOT NULL DEFAULT 0,
                    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
                    completed_at TEXT,
                    UNIQUE(user_id, challenge_id)
                );

                CREATE TABLE IF NOT EXISTS achievements (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL,
                    badge_icon TEXT NOT NULL DEFAULT '',
                    points_required INTEGER NOT NULL DEFAULT 0,
                    criteria_type TEXT NOT NULL,
                    criteria_value REAL NOT NULL,
                    category TEXT NOT NULL DEFAULT '',
                    is_hidden INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS user_achievements (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    achievement_id INTEGER NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
                    earned_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(user_id, achievement_id)
                );

                CREATE TABLE IF NOT EXISTS user_points (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    points INTEGER NOT NULL,
                    source TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    reference_id INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS news_articles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    summary TEXT NOT NULL DEFAULT '',
                    url TEXT NOT NULL UNIQUE,
                    source TEXT NOT NULL DEFAULT '',
                    author TEXT NOT NULL DEFAULT '',
                    category TEXT NOT NULL DEFAULT 'GLOBAL',
                    published_date TEXT NOT NULL,
                    image_url TEXT,
                    view_count INTEGER NOT NULL DEFAULT 0,
                    bookmark_count INTEGER NOT NULL DEFAULT 0,
                    is_featured INTEGER NOT NULL DEFAULT 0,
                    is_trending INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS article_bookmarks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    article_id INTEGER NOT NULL REFERENCES news_articles(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(user_id, article_id)
                );

                CREATE TABLE IF NOT EXISTS trending_topics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    topic TEXT NOT NULL,
                    search_count INTEGER NOT NULL DEFAULT 0,
                    trend_score REAL NOT NULL DEFAULT 0,
                    date TEXT NOT NULL,
                    UNIQUE(topic, date)
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipient_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    notification_type TEXT NOT NULL,
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    icon TEXT NOT NULL DEFAULT '',
                    action_url TEXT NOT NULL DEFAULT '',
                    is_read INTEGER NOT NULL DEFAULT 0,
                    read_at TEXT,
                    reference_id INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS notification_templates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    notification_type TEXT NOT NULL,
                    title_template TEXT NOT NULL,
                    content_template TEXT NOT NULL,
                    icon TEXT NOT NULL DEFAULT '',
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    is_active INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS chat_sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    session_id TEXT NOT NULL UNIQUE,
                    title TEXT NOT NULL DEFAULT '',
                    message_count INTEGER NOT NULL DEFAULT 0,
                    total_tokens INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    last_activity TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    session_id TEXT NOT NULL REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tokens_used INTEGER NOT NULL DEFAULT 0,
                    response_time REAL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS chatbot_configs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    system_prompt TEXT NOT NULL,
                    max_tokens INTEGER NOT NULL DEFAULT 1000,
                    temperature REAL NOT NULL DEFAULT 0.7,
                    include_carbon_data INTEGER NOT NULL DEFAULT 1,
                    include_location INTEGER NOT NULL DEFAULT 1,
                    include_news INTEGER NOT NULL DEFAULT 1,
                    is_active INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS climate_data (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    data_type TEXT NOT NULL,
                    value REAL NOT NULL,
                    unit TEXT NOT NULL,
                    location TEXT NOT NULL DEFAULT 'Global',
                    latitude REAL,
                    longitude REAL,
                    date TEXT NOT NULL,
                    source TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(data_type, date)
                );

                CREATE TABLE IF NOT EXISTS climate_alerts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    alert_type TEXT NOT NULL,
                    severity TEXT NOT NULL,
                    location TEXT NOT NULL,
                    latitude REAL,
                    longitude REAL,
                    start_date TEXT NOT NULL DEFAULT (datetime('now')),
                    end_date TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    source TEXT NOT NULL DEFAULT '',
                    external_id TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS climate_statistics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    stat_type TEXT NOT NULL,
                    value REAL NOT NULL,
                    unit TEXT NOT NULL,
                    period TEXT NOT NULL,
                    date TEXT NOT NULL,
                    previous_value REAL,
                    change_percentage REAL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(stat_type, period, date)
                );

                CREATE INDEX IF NOT EXISTS idx_carbon_entries_user_date ON carbon_entries(user_id, date);
                CREATE INDEX IF NOT EXISTS idx_user_points_user ON user_points(user_id);
                CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, is_read);
                CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id);
                CREATE INDEX IF NOT EXISTS idx_news_articles_published ON news_articles(published_date);
                CREATE INDEX IF NOT EXISTS idx_climate_alerts_external ON climate_alerts(external_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}

// ── Row helpers ───────────────────────────────────────────────────────

/// Decode a string-backed enum column, surfacing bad values as a
/// conversion error rather than a panic.
fn parse_enum<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    T::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &'static str,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.with_context(|| format!("Failed to read {} row", what))?);
    }
    Ok(out)
}

/// Current UTC time in SQLite's `datetime('now')` format.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_in_memory_runs_migrations() {
        let db = EcoDb::new_in_memory().unwrap();
        let count: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 21);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = EcoDb::new_in_memory().unwrap();
        db.run_migrations().unwrap();
    }

    #[test]
    fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eco.db");
        {
            let db = EcoDb::new(&path).unwrap();
            db.create_user("persisted", "p@example.com", crate::models::UserRole::Individual, "")
                .unwrap();
        }
        let db = EcoDb::new(&path).unwrap();
        assert!(db.get_user_by_username("persisted").unwrap().is_some());
    }

    #[test]
    fn test_parse_enum_reports_bad_values() {
        let err = parse_enum::<crate::models::UserRole>(3, "ROOT".into()).unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(3, Type::Text, _)));
    }

    #[tokio::test]
    async fn test_handle_call_runs_on_blocking_pool() {
        let handle = DbHandle::new(EcoDb::new_in_memory().unwrap());
        let user = handle
            .call(|db| db.create_user("async", "a@example.com", crate::models::UserRole::Ngo, ""))
            .await
            .unwrap();
        assert_eq!(user.username, "async");
        assert!(handle.lock_sync().unwrap().get_user(user.id).unwrap().is_some());
    }
}
