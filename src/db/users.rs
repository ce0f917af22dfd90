use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{OptionalExtension, Row, params};

use super::{EcoDb, collect, parse_enum};
use crate::errors::EcoError;
use crate::models::*;

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.first_name, u.last_name, u.role, \
     u.location, u.bio, u.avatar, u.notifications_enabled, u.email_notifications, \
     u.total_points, u.login_streak, u.last_login_date, u.is_active, u.date_joined";

const FRIENDSHIP_SELECT: &str = "SELECT f.id, f.user_id, a.username, f.friend_id, b.username, \
     f.status, f.created_at, f.updated_at
     FROM friendships f
     JOIN users a ON a.id = f.user_id
     JOIN users b ON b.id = f.friend_id";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        role: parse_enum(5, row.get(5)?)?,
        location: row.get(6)?,
        bio: row.get(7)?,
        avatar: row.get(8)?,
        notifications_enabled: row.get(9)?,
        email_notifications: row.get(10)?,
        total_points: row.get(11)?,
        login_streak: row.get(12)?,
        last_login_date: row.get(13)?,
        is_active: row.get(14)?,
        date_joined: row.get(15)?,
    })
}

fn row_to_friendship(row: &Row<'_>) -> rusqlite::Result<Friendship> {
    Ok(Friendship {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_username: row.get(2)?,
        friend_id: row.get(3)?,
        friend_username: row.get(4)?,
        status: parse_enum(5, row.get(5)?)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Editable subset of a user's profile. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub email_notifications: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderboardScope {
    Global,
    Friends,
    City(String),
}

/// Streak after a visit on `today`, given the previous visit date.
pub fn next_login_streak(last_login: Option<NaiveDate>, streak: i64, today: NaiveDate) -> i64 {
    match last_login {
        None => 1,
        Some(last) if last == today => streak.max(1),
        Some(last) if today.pred_opt() == Some(last) => streak + 1,
        Some(_) => 1,
    }
}

impl EcoDb {
    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        role: UserRole,
        location: &str,
    ) -> Result<User> {
        if self.get_user_by_username(username)?.is_some() {
            return Err(EcoError::Conflict(format!("User '{}' already exists", username)).into());
        }
        self.conn
            .execute(
                "INSERT INTO users (username, email, role, location) VALUES (?1, ?2, ?3, ?4)",
                params![username, email, role.as_str(), location],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()
            .context("Failed to query user by username")
    }

    pub fn list_active_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u WHERE u.is_active = 1 ORDER BY u.id"
            ))
            .context("Failed to prepare list_active_users")?;
        let rows = stmt
            .query_map([], row_to_user)
            .context("Failed to query users")?;
        collect(rows, "user")
    }

    pub fn update_profile(&self, id: i64, update: &ProfileUpdate) -> Result<User> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET
                    first_name = COALESCE(?2, first_name),
                    last_name = COALESCE(?3, last_name),
                    location = COALESCE(?4, location),
                    bio = COALESCE(?5, bio),
                    avatar = COALESCE(?6, avatar),
                    notifications_enabled = COALESCE(?7, notifications_enabled),
                    email_notifications = COALESCE(?8, email_notifications)
                 WHERE id = ?1",
                params![
                    id,
                    update.first_name,
                    update.last_name,
                    update.location,
                    update.bio,
                    update.avatar,
                    update.notifications_enabled,
                    update.email_notifications,
                ],
            )
            .context("Failed to update profile")?;
        if changed == 0 {
            return Err(EcoError::not_found("User", id).into());
        }
        self.get_user(id)?.context("User not found after update")
    }

    /// Record a visit on `today` and return the refreshed user.
    pub fn update_login_streak(&self, user_id: i64, today: NaiveDate) -> Result<User> {
        let user = self
            .get_user(user_id)?
            .ok_or_else(|| EcoError::not_found("User", user_id))?;
        let last = user
            .last_login_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        if last == Some(today) {
            return Ok(user);
        }
        let streak = next_login_streak(last, user.login_streak, today);
        self.conn
            .execute(
                "UPDATE users SET login_streak = ?2, last_login_date = ?3 WHERE id = ?1",
                params![user_id, streak, today.format("%Y-%m-%d").to_string()],
            )
            .context("Failed to update login streak")?;
        self.get_user(user_id)?
            .context("User not found after streak update")
    }

    /// Directly set the streak counters (seeding only).
    pub fn set_login_streak(&self, user_id: i64, streak: i64, last_login: NaiveDate) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET login_streak = ?2, last_login_date = ?3 WHERE id = ?1",
                params![user_id, streak, last_login.format("%Y-%m-%d").to_string()],
            )
            .context("Failed to set login streak")?;
        Ok(())
    }

    // ── API tokens ────────────────────────────────────────────────────

    pub fn create_api_token(&self, user_id: i64, token_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO api_tokens (user_id, token_hash) VALUES (?1, ?2)",
                params![user_id, token_hash],
            )
            .context("Failed to insert api token")?;
        Ok(())
    }

    /// Active user owning the token with this digest, if any.
    pub fn user_for_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM api_tokens t
                     JOIN users u ON u.id = t.user_id
                     WHERE t.token_hash = ?1 AND u.is_active = 1"
                ),
                params![token_hash],
                row_to_user,
            )
            .optional()
            .context("Failed to look up api token")?;
        if user.is_some() {
            self.conn
                .execute(
                    "UPDATE api_tokens SET last_used_at = datetime('now') WHERE token_hash = ?1",
                    params![token_hash],
                )
                .context("Failed to touch api token")?;
        }
        Ok(user)
    }

    // ── Friendships ───────────────────────────────────────────────────

    pub fn create_friend_request(&self, user_id: i64, friend_id: i64) -> Result<Friendship> {
        if self.get_user(friend_id)?.is_none() {
            return Err(EcoError::not_found("User", friend_id).into());
        }
        if user_id == friend_id {
            return Err(EcoError::validation("Cannot send friend request to yourself").into());
        }
        let exists: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM friendships
                 WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
                params![user_id, friend_id],
                |row| row.get(0),
            )
            .context("Failed to check existing friendship")?;
        if exists > 0 {
            return Err(EcoError::Conflict("Friendship already exists".into()).into());
        }
        self.conn
            .execute(
                "INSERT INTO friendships (user_id, friend_id, status) VALUES (?1, ?2, 'PENDING')",
                params![user_id, friend_id],
            )
            .context("Failed to insert friendship")?;
        let id = self.conn.last_insert_rowid();
        self.get_friendship(id)?
            .context("Friendship not found after insert")
    }

    pub fn get_friendship(&self, id: i64) -> Result<Option<Friendship>> {
        self.conn
            .query_row(
                &format!("{FRIENDSHIP_SELECT} WHERE f.id = ?1"),
                params![id],
                row_to_friendship,
            )
            .optional()
            .context("Failed to query friendship")
    }

    /// Friendships the user takes part in, in either direction.
    pub fn list_friendships(&self, user_id: i64) -> Result<Vec<Friendship>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{FRIENDSHIP_SELECT} WHERE f.user_id = ?1 OR f.friend_id = ?1
                 ORDER BY f.created_at DESC, f.id DESC"
            ))
            .context("Failed to prepare list_friendships")?;
        let rows = stmt
            .query_map(params![user_id], row_to_friendship)
            .context("Failed to query friendships")?;
        collect(rows, "friendship")
    }

    /// Accept or reject a pending request addressed to `user_id`.
    pub fn respond_friend_request(
        &self,
        user_id: i64,
        friendship_id: i64,
        action: &str,
    ) -> Result<Friendship> {
        let pending = self
            .get_friendship(friendship_id)?
            .filter(|f| f.friend_id == user_id && f.status == FriendshipStatus::Pending)
            .ok_or_else(|| EcoError::not_found("Friendship", friendship_id))?;
        let status = match action {
            "accept" => FriendshipStatus::Accepted,
            "reject" => FriendshipStatus::Blocked,
            _ => return Err(EcoError::validation("Invalid action").into()),
        };
        self.conn
            .execute(
                "UPDATE friendships SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
                params![pending.id, status.as_str()],
            )
            .context("Failed to update friendship")?;
        self.get_friendship(pending.id)?
            .context("Friendship not found after update")
    }

    pub fn delete_friendship(&self, user_id: i64, friendship_id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM friendships WHERE id = ?1 AND (user_id = ?2 OR friend_id = ?2)",
                params![friendship_id, user_id],
            )
            .context("Failed to delete friendship")?;
        Ok(changed > 0)
    }

    // ── Aggregates ────────────────────────────────────────────────────

    pub fn user_stats(&self, user_id: i64, today: NaiveDate) -> Result<UserStats> {
        let month = today.format("%Y-%m").to_string();
        let year = today.format("%Y").to_string();
        self.conn
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM carbon_entries WHERE user_id = ?1),
                    (SELECT COALESCE(SUM(co2_calculated), 0) FROM carbon_entries
                        WHERE user_id = ?1 AND substr(date, 1, 7) = ?2),
                    (SELECT COALESCE(SUM(co2_calculated), 0) FROM carbon_entries
                        WHERE user_id = ?1 AND substr(date, 1, 4) = ?3),
                    (SELECT COUNT(*) FROM user_challenges
                        WHERE user_id = ?1 AND status = 'COMPLETED'),
                    (SELECT COUNT(*) FROM user_achievements WHERE user_id = ?1),
                    (SELECT COUNT(*) FROM friendships
                        WHERE status = 'ACCEPTED' AND (user_id = ?1 OR friend_id = ?1))",
                params![user_id, month, year],
                |row| {
                    Ok(UserStats {
                        total_carbon_entries: row.get(0)?,
                        monthly_carbon_total: row.get(1)?,
                        yearly_carbon_total: row.get(2)?,
                        challenges_completed: row.get(3)?,
                        achievements_earned: row.get(4)?,
                        friends_count: row.get(5)?,
                    })
                },
            )
            .context("Failed to compute user stats")
    }

    /// Users ranked by total points, best first.
    pub fn leaderboard(
        &self,
        scope: &LeaderboardScope,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>> {
        let (filter, arg) = match scope {
            LeaderboardScope::Global => ("1 = 1", rusqlite::types::Value::Integer(user_id)),
            LeaderboardScope::Friends => (
                "u.id = ?1 OR u.id IN (
                    SELECT friend_id FROM friendships WHERE user_id = ?1 AND status = 'ACCEPTED'
                    UNION
                    SELECT user_id FROM friendships WHERE friend_id = ?1 AND status = 'ACCEPTED')",
                rusqlite::types::Value::Integer(user_id),
            ),
            LeaderboardScope::City(city) => (
                "instr(LOWER(u.location), LOWER(?1)) > 0",
                rusqlite::types::Value::Text(city.clone()),
            ),
        };
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT u.id, u.username, u.location, u.total_points, u.login_streak
                 FROM users u
                 WHERE u.is_active = 1 AND ({filter})
                 ORDER BY u.total_points DESC, u.id ASC
                 LIMIT ?2"
            ))
            .context("Failed to prepare leaderboard")?;
        let rows = stmt
            .query_map(params![arg, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .context("Failed to query leaderboard")?;
        let ranked = collect(rows, "leaderboard")?
            .into_iter()
            .enumerate()
            .map(|(i, (id, username, location, total_points, login_streak))| {
                LeaderboardEntry {
                    rank: i as i64 + 1,
                    user_id: id,
                    username,
                    location,
                    total_points,
                    login_streak,
                }
            })
            .collect();
        Ok(ranked)
    }
}
