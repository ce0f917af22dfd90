use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{EcoDb, collect, parse_enum};
use crate::errors::EcoError;
use crate::models::*;

const CHALLENGE_COLUMNS: &str = "c.id, c.name, c.description, c.challenge_type, c.status, \
     c.points_reward, c.duration_days, c.target_value, c.target_unit, c.category, c.creator_id, \
     c.start_date, c.end_date, c.max_participants, c.is_featured, \
     (SELECT COUNT(*) FROM user_challenges p WHERE p.challenge_id = c.id), c.created_at";

const PARTICIPATION_COLUMNS: &str = "uc.id, uc.user_id, uc.challenge_id, uc.status, \
     uc.progress_value, uc.progress_percentage, uc.joined_at, uc.completed_at";

const ACHIEVEMENT_COLUMNS: &str = "a.id, a.name, a.description, a.badge_icon, a.points_required, \
     a.criteria_type, a.criteria_value, a.category, a.is_hidden, a.created_at";

const POINTS_COLUMNS: &str = "id, user_id, points, source, description, reference_id, created_at";

fn row_to_challenge(row: &Row<'_>) -> rusqlite::Result<Challenge> {
    Ok(Challenge {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        challenge_type: parse_enum(3, row.get(3)?)?,
        status: parse_enum(4, row.get(4)?)?,
        points_reward: row.get(5)?,
        duration_days: row.get(6)?,
        target_value: row.get(7)?,
        target_unit: row.get(8)?,
        category: row.get(9)?,
        creator_id: row.get(10)?,
        start_date: row.get(11)?,
        end_date: row.get(12)?,
        max_participants: row.get(13)?,
        is_featured: row.get(14)?,
        participant_count: row.get(15)?,
        created_at: row.get(16)?,
    })
}

fn row_to_participation(row: &Row<'_>) -> rusqlite::Result<UserChallenge> {
    Ok(UserChallenge {
        id: row.get(0)?,
        user_id: row.get(1)?,
        challenge_id: row.get(2)?,
        status: parse_enum(3, row.get(3)?)?,
        progress_value: row.get(4)?,
        progress_percentage: row.get(5)?,
        joined_at: row.get(6)?,
        completed_at: row.get(7)?,
        challenge: None,
    })
}

/// Reads an achievement starting at column `base`.
fn achievement_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Achievement> {
    Ok(Achievement {
        id: row.get(base)?,
        name: row.get(base + 1)?,
        description: row.get(base + 2)?,
        badge_icon: row.get(base + 3)?,
        points_required: row.get(base + 4)?,
        criteria_type: row.get(base + 5)?,
        criteria_value: row.get(base + 6)?,
        category: row.get(base + 7)?,
        is_hidden: row.get(base + 8)?,
        created_at: row.get(base + 9)?,
    })
}

fn row_to_points(row: &Row<'_>) -> rusqlite::Result<PointsEntry> {
    Ok(PointsEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        points: row.get(2)?,
        source: parse_enum(3, row.get(3)?)?,
        description: row.get(4)?,
        reference_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Append a ledger row and move the user's running total with it. The
/// total never drops below zero. Callers own the surrounding transaction.
fn insert_points(
    conn: &Connection,
    user_id: i64,
    points: i64,
    source: PointSource,
    description: &str,
    reference_id: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO user_points (user_id, points, source, description, reference_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, points, source.as_str(), description, reference_id],
    )
    .context("Failed to insert points entry")?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "UPDATE users SET total_points = MAX(0, total_points + ?2) WHERE id = ?1",
        params![user_id, points],
    )
    .context("Failed to update total points")?;
    Ok(id)
}

impl EcoDb {
    // ── Challenges ────────────────────────────────────────────────────

    pub fn create_challenge(&self, challenge: &NewChallenge) -> Result<Challenge> {
        self.conn
            .execute(
                "INSERT INTO challenges
                    (name, description, challenge_type, points_reward, duration_days, target_value,
                     target_unit, category, creator_id, start_date, end_date, max_participants,
                     is_featured)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    challenge.name,
                    challenge.description,
                    challenge.challenge_type.as_str(),
                    challenge.points_reward,
                    challenge.duration_days,
                    challenge.target_value,
                    challenge.target_unit,
                    challenge.category,
                    challenge.creator_id,
                    challenge.start_date,
                    challenge.end_date,
                    challenge.max_participants,
                    challenge.is_featured,
                ],
            )
            .context("Failed to insert challenge")?;
        let id = self.conn.last_insert_rowid();
        self.get_challenge(id)?
            .context("Challenge not found after insert")
    }

    pub fn get_challenge(&self, id: i64) -> Result<Option<Challenge>> {
        self.conn
            .query_row(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges c WHERE c.id = ?1"),
                params![id],
                row_to_challenge,
            )
            .optional()
            .context("Failed to query challenge")
    }

    pub fn get_challenge_by_name(&self, name: &str) -> Result<Option<Challenge>> {
        self.conn
            .query_row(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges c WHERE c.name = ?1"),
                params![name],
                row_to_challenge,
            )
            .optional()
            .context("Failed to query challenge by name")
    }

    /// Challenges whose status is ACTIVE and whose window contains `now`.
    pub fn list_active_challenges(&self, now: &str) -> Result<Vec<Challenge>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHALLENGE_COLUMNS} FROM challenges c
                 WHERE c.status = 'ACTIVE' AND c.start_date <= ?1 AND c.end_date >= ?1
                 ORDER BY c.created_at DESC, c.id DESC"
            ))
            .context("Failed to prepare list_active_challenges")?;
        let rows = stmt
            .query_map(params![now], row_to_challenge)
            .context("Failed to query challenges")?;
        collect(rows, "challenge")
    }

    pub fn join_challenge(&self, user_id: i64, challenge_id: i64, now: &str) -> Result<UserChallenge> {
        let challenge = self
            .get_challenge(challenge_id)?
            .filter(|c| {
                c.status == ChallengeStatus::Active
                    && c.start_date.as_str() <= now
                    && c.end_date.as_str() >= now
            })
            .ok_or_else(|| EcoError::Missing("Active challenge".into()))?;

        if self.get_participation(user_id, challenge_id)?.is_some() {
            return Err(EcoError::Conflict("Already joined this challenge".into()).into());
        }
        if let Some(max) = challenge.max_participants {
            if challenge.participant_count >= max {
                return Err(EcoError::Conflict("Challenge is full".into()).into());
            }
        }

        self.conn
            .execute(
                "INSERT INTO user_challenges (user_id, challenge_id, status) VALUES (?1, ?2, 'JOINED')",
                params![user_id, challenge_id],
            )
            .context("Failed to insert challenge participation")?;
        self.get_participation(user_id, challenge_id)?
            .context("Participation not found after insert")
    }

    pub fn get_participation(&self, user_id: i64, challenge_id: i64) -> Result<Option<UserChallenge>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {PARTICIPATION_COLUMNS} FROM user_challenges uc
                     WHERE uc.user_id = ?1 AND uc.challenge_id = ?2"
                ),
                params![user_id, challenge_id],
                row_to_participation,
            )
            .optional()
            .context("Failed to query challenge participation")
    }

    /// Record a progress value. Reaching the target completes the challenge
    /// and credits its reward, all in one transaction.
    pub fn update_challenge_progress(
        &self,
        user_id: i64,
        challenge_id: i64,
        progress_value: f64,
    ) -> Result<ProgressOutcome> {
        let participation = self
            .get_participation(user_id, challenge_id)?
            .filter(|p| {
                matches!(p.status, ParticipationStatus::Joined | ParticipationStatus::InProgress)
            })
            .ok_or_else(|| EcoError::Missing("Active challenge participation".into()))?;
        let challenge = self
            .get_challenge(challenge_id)?
            .ok_or_else(|| EcoError::not_found("Challenge", challenge_id))?;

        let percentage = match challenge.target_value {
            Some(target) if target > 0.0 => progress_percentage(progress_value, target),
            _ => participation.progress_percentage,
        };
        let completed = percentage >= 100.0;
        let status = if completed {
            ParticipationStatus::Completed
        } else {
            ParticipationStatus::InProgress
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin progress transaction")?;
        tx.execute(
            "UPDATE user_challenges SET
                progress_value = ?2, progress_percentage = ?3, status = ?4,
                completed_at = CASE WHEN ?5 THEN datetime('now') ELSE completed_at END
             WHERE id = ?1",
            params![participation.id, progress_value, percentage, status.as_str(), completed],
        )
        .context("Failed to update challenge progress")?;
        let points_awarded = if completed && challenge.points_reward > 0 {
            insert_points(
                &tx,
                user_id,
                challenge.points_reward,
                PointSource::ChallengeCompletion,
                &format!("Completed challenge: {}", challenge.name),
                Some(challenge.id),
            )?;
            challenge.points_reward
        } else {
            0
        };
        tx.commit().context("Failed to commit progress update")?;

        let mut participation = self
            .get_participation(user_id, challenge_id)?
            .context("Participation not found after update")?;
        participation.challenge = Some(challenge);
        Ok(ProgressOutcome {
            participation,
            completed,
            points_awarded,
        })
    }

    /// The user's participations with the challenge attached, newest first.
    pub fn list_user_challenges(&self, user_id: i64) -> Result<Vec<UserChallenge>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PARTICIPATION_COLUMNS} FROM user_challenges uc
                 WHERE uc.user_id = ?1 ORDER BY uc.joined_at DESC, uc.id DESC"
            ))
            .context("Failed to prepare list_user_challenges")?;
        let rows = stmt
            .query_map(params![user_id], row_to_participation)
            .context("Failed to query user challenges")?;
        let mut participations = collect(rows, "user challenge")?;
        for p in &mut participations {
            p.challenge = self.get_challenge(p.challenge_id)?;
        }
        Ok(participations)
    }

    pub fn challenges_completed_since(&self, user_id: i64, since: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM user_challenges
                 WHERE user_id = ?1 AND status = 'COMPLETED' AND completed_at >= ?2",
                params![user_id, since],
                |row| row.get(0),
            )
            .context("Failed to count completed challenges")
    }

    // ── Achievements ──────────────────────────────────────────────────

    pub fn create_achievement(&self, achievement: &NewAchievement) -> Result<Achievement> {
        self.conn
            .execute(
                "INSERT INTO achievements
                    (name, description, badge_icon, points_required, criteria_type,
                     criteria_value, category, is_hidden)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    achievement.name,
                    achievement.description,
                    achievement.badge_icon,
                    achievement.points_required,
                    achievement.criteria_type.as_str(),
                    achievement.criteria_value,
                    achievement.category,
                    achievement.is_hidden,
                ],
            )
            .context("Failed to insert achievement")?;
        let id = self.conn.last_insert_rowid();
        self.get_achievement(id)?
            .context("Achievement not found after insert")
    }

    pub fn get_achievement(&self, id: i64) -> Result<Option<Achievement>> {
        self.conn
            .query_row(
                &format!("SELECT {ACHIEVEMENT_COLUMNS} FROM achievements a WHERE a.id = ?1"),
                params![id],
                |row| achievement_at(row, 0),
            )
            .optional()
            .context("Failed to query achievement")
    }

    pub fn achievement_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM achievements WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .context("Failed to check achievement")?;
        Ok(count > 0)
    }

    pub fn list_all_achievements(&self) -> Result<Vec<Achievement>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ACHIEVEMENT_COLUMNS} FROM achievements a ORDER BY a.points_required, a.id"
            ))
            .context("Failed to prepare list_all_achievements")?;
        let rows = stmt
            .query_map([], |row| achievement_at(row, 0))
            .context("Failed to query achievements")?;
        collect(rows, "achievement")
    }

    /// Achievements visible to the user: every public one plus hidden ones
    /// they have already earned.
    pub fn list_achievements_for(&self, user_id: i64) -> Result<Vec<Achievement>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ACHIEVEMENT_COLUMNS} FROM achievements a
                 WHERE a.is_hidden = 0 OR EXISTS (
                    SELECT 1 FROM user_achievements ua
                    WHERE ua.achievement_id = a.id AND ua.user_id = ?1)
                 ORDER BY a.points_required, a.id"
            ))
            .context("Failed to prepare list_achievements_for")?;
        let rows = stmt
            .query_map(params![user_id], |row| achievement_at(row, 0))
            .context("Failed to query achievements")?;
        collect(rows, "achievement")
    }

    pub fn list_user_achievements(&self, user_id: i64) -> Result<Vec<UserAchievement>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT ua.id, ua.user_id, ua.earned_at, {ACHIEVEMENT_COLUMNS}
                 FROM user_achievements ua JOIN achievements a ON a.id = ua.achievement_id
                 WHERE ua.user_id = ?1 ORDER BY ua.earned_at DESC, ua.id DESC"
            ))
            .context("Failed to prepare list_user_achievements")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(UserAchievement {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    earned_at: row.get(2)?,
                    achievement: achievement_at(row, 3)?,
                })
            })
            .context("Failed to query user achievements")?;
        collect(rows, "user achievement")
    }

    /// Grant an achievement. Returns `None` if the user already had it.
    pub fn unlock_achievement(&self, user_id: i64, achievement_id: i64) -> Result<Option<UserAchievement>> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO user_achievements (user_id, achievement_id) VALUES (?1, ?2)",
                params![user_id, achievement_id],
            )
            .context("Failed to insert user achievement")?;
        if inserted == 0 {
            return Ok(None);
        }
        let id = self.conn.last_insert_rowid();
        let unlocked = self
            .list_user_achievements(user_id)?
            .into_iter()
            .find(|ua| ua.id == id);
        Ok(unlocked)
    }

    pub fn achievements_earned_since(&self, user_id: i64, since: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM user_achievements WHERE user_id = ?1 AND earned_at >= ?2",
                params![user_id, since],
                |row| row.get(0),
            )
            .context("Failed to count earned achievements")
    }

    // ── Points ledger ─────────────────────────────────────────────────

    pub fn award_points(
        &self,
        user_id: i64,
        points: i64,
        source: PointSource,
        description: &str,
        reference_id: Option<i64>,
    ) -> Result<PointsEntry> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin points transaction")?;
        let id = insert_points(&tx, user_id, points, source, description, reference_id)?;
        tx.commit().context("Failed to commit points")?;
        self.conn
            .query_row(
                &format!("SELECT {POINTS_COLUMNS} FROM user_points WHERE id = ?1"),
                params![id],
                row_to_points,
            )
            .context("Points entry not found after insert")
    }

    pub fn list_points(&self, user_id: i64) -> Result<Vec<PointsEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {POINTS_COLUMNS} FROM user_points WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))
            .context("Failed to prepare list_points")?;
        let rows = stmt
            .query_map(params![user_id], row_to_points)
            .context("Failed to query points")?;
        collect(rows, "points")
    }

    pub fn points_summary(&self, user_id: i64) -> Result<PointsSummary> {
        let user = self
            .get_user(user_id)?
            .ok_or_else(|| EcoError::not_found("User", user_id))?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source, SUM(points) FROM user_points WHERE user_id = ?1 GROUP BY source",
            )
            .context("Failed to prepare points_summary")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query points by source")?;
        let by_source: BTreeMap<String, i64> = collect(rows, "points source")?.into_iter().collect();
        Ok(PointsSummary {
            total_points: user.total_points,
            by_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2024-06-15 12:00:00";

    fn challenge(name: &str, target: Option<f64>, max: Option<i64>) -> NewChallenge {
        NewChallenge {
            name: name.into(),
            description: "Leave the car at home".into(),
            challenge_type: ChallengeType::Weekly,
            points_reward: 50,
            duration_days: 7,
            target_value: target,
            target_unit: "km".into(),
            category: "transport".into(),
            creator_id: None,
            start_date: "2024-06-10 00:00:00".into(),
            end_date: "2024-06-17 00:00:00".into(),
            max_participants: max,
            is_featured: false,
        }
    }

    fn setup() -> (EcoDb, i64) {
        let db = EcoDb::new_in_memory().unwrap();
        let user = db.create_user("player", "", UserRole::Individual, "").unwrap();
        (db, user.id)
    }

    #[test]
    fn test_active_window() {
        let (db, _) = setup();
        db.create_challenge(&challenge("current", Some(10.0), None)).unwrap();
        let mut old = challenge("old", Some(10.0), None);
        old.end_date = "2024-06-01 00:00:00".into();
        db.create_challenge(&old).unwrap();
        let active = db.list_active_challenges(NOW).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "current");
    }

    #[test]
    fn test_join_rules() {
        let (db, uid) = setup();
        let c = db.create_challenge(&challenge("c", Some(10.0), Some(1))).unwrap();
        let joined = db.join_challenge(uid, c.id, NOW).unwrap();
        assert_eq!(joined.status, ParticipationStatus::Joined);

        let err = db.join_challenge(uid, c.id, NOW).unwrap_err();
        assert!(matches!(err.downcast_ref::<EcoError>(), Some(EcoError::Conflict(m)) if m.contains("Already")));

        let other = db.create_user("other", "", UserRole::Individual, "").unwrap();
        let err = db.join_challenge(other.id, c.id, NOW).unwrap_err();
        assert!(matches!(err.downcast_ref::<EcoError>(), Some(EcoError::Conflict(m)) if m.contains("full")));

        let err = db.join_challenge(uid, c.id, "2025-01-01 00:00:00").unwrap_err();
        assert!(matches!(err.downcast_ref::<EcoError>(), Some(EcoError::Missing(_))));
    }

    #[test]
    fn test_progress_completes_and_credits_once() {
        let (db, uid) = setup();
        let c = db.create_challenge(&challenge("c", Some(20.0), None)).unwrap();
        db.join_challenge(uid, c.id, NOW).unwrap();

        let partial = db.update_challenge_progress(uid, c.id, 5.0).unwrap();
        assert!(!partial.completed);
        assert_eq!(partial.participation.status, ParticipationStatus::InProgress);
        assert_eq!(partial.participation.progress_percentage, 25.0);

        let done = db.update_challenge_progress(uid, c.id, 30.0).unwrap();
        assert!(done.completed);
        assert_eq!(done.points_awarded, 50);
        assert_eq!(done.participation.progress_percentage, 100.0);
        assert!(done.participation.completed_at.is_some());
        assert_eq!(db.get_user(uid).unwrap().unwrap().total_points, 50);

        // Completed participations no longer accept progress.
        let err = db.update_challenge_progress(uid, c.id, 40.0).unwrap_err();
        assert!(matches!(err.downcast_ref::<EcoError>(), Some(EcoError::Missing(_))));
        assert_eq!(db.list_points(uid).unwrap().len(), 1);
    }

    #[test]
    fn test_progress_without_participation_is_missing() {
        let (db, uid) = setup();
        let c = db.create_challenge(&challenge("c", Some(20.0), None)).unwrap();
        assert!(db.update_challenge_progress(uid, c.id, 1.0).is_err());
    }

    #[test]
    fn test_user_challenges_include_challenge() {
        let (db, uid) = setup();
        let c = db.create_challenge(&challenge("c", None, None)).unwrap();
        db.join_challenge(uid, c.id, NOW).unwrap();
        let mine = db.list_user_challenges(uid).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].challenge.as_ref().unwrap().participant_count, 1);
    }

    #[test]
    fn test_points_ledger_never_goes_negative() {
        let (db, uid) = setup();
        db.award_points(uid, 30, PointSource::Bonus, "welcome", None).unwrap();
        db.award_points(uid, -100, PointSource::Bonus, "penalty", None).unwrap();
        assert_eq!(db.get_user(uid).unwrap().unwrap().total_points, 0);
        let summary = db.points_summary(uid).unwrap();
        assert_eq!(summary.by_source["BONUS"], -70);
    }

    #[test]
    fn test_unlock_is_idempotent_and_hidden_filtering() {
        let (db, uid) = setup();
        let secret = db
            .create_achievement(&NewAchievement {
                name: "Secret".into(),
                description: "Hidden".into(),
                badge_icon: "🤫".into(),
                points_required: 0,
                criteria_type: CriteriaType::Entries,
                criteria_value: 1.0,
                category: "special".into(),
                is_hidden: true,
            })
            .unwrap();
        assert!(db.list_achievements_for(uid).unwrap().is_empty());
        assert!(db.unlock_achievement(uid, secret.id).unwrap().is_some());
        assert!(db.unlock_achievement(uid, secret.id).unwrap().is_none());
        assert_eq!(db.list_achievements_for(uid).unwrap().len(), 1);
        assert_eq!(db.list_user_achievements(uid).unwrap().len(), 1);
    }
}
