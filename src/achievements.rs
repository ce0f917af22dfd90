//! Achievement engine: a linear scan of every achievement against the
//! user's current progress.

use anyhow::Result;

use crate::db::EcoDb;
use crate::models::{
    Achievement, CriteriaType, NewNotification, NotificationPriority, NotificationType,
};
use crate::notify;
use crate::ws::{self, WsEvent, WsSender};

/// Figures the criteria are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserProgress {
    pub total_points: i64,
    pub total_co2: f64,
    pub login_streak: i64,
    pub entry_count: i64,
}

impl UserProgress {
    pub fn load(db: &EcoDb, user_id: i64) -> Result<Option<Self>> {
        let Some(user) = db.get_user(user_id)? else {
            return Ok(None);
        };
        let (entry_count, total_co2) = db.carbon_totals(user_id)?;
        Ok(Some(Self {
            total_points: user.total_points,
            total_co2,
            login_streak: user.login_streak,
            entry_count,
        }))
    }
}

/// Unknown criteria never unlock.
pub fn criteria_met(criteria_type: &str, threshold: f64, progress: &UserProgress) -> bool {
    let Ok(criteria) = criteria_type.parse::<CriteriaType>() else {
        return false;
    };
    match criteria {
        CriteriaType::Points => progress.total_points as f64 >= threshold,
        CriteriaType::CarbonReduction => progress.total_co2 >= threshold,
        CriteriaType::Streak => progress.login_streak as f64 >= threshold,
        CriteriaType::Entries => progress.entry_count as f64 >= threshold,
    }
}

/// Unlock every achievement the user now qualifies for. Returns the ones
/// unlocked by this call; running it again returns nothing new.
pub fn check_achievements(db: &EcoDb, tx: &WsSender, user_id: i64) -> Result<Vec<Achievement>> {
    let Some(progress) = UserProgress::load(db, user_id)? else {
        return Ok(Vec::new());
    };
    let mut unlocked = Vec::new();
    for achievement in db.list_all_achievements()? {
        if !criteria_met(&achievement.criteria_type, achievement.criteria_value, &progress) {
            continue;
        }
        if db.unlock_achievement(user_id, achievement.id)?.is_none() {
            continue;
        }
        tracing::info!(user_id, achievement = %achievement.name, "achievement unlocked");
        notify::notify(
            db,
            tx,
            NewNotification::new(
                user_id,
                NotificationType::Achievement,
                format!("Achievement Unlocked: {}", achievement.name),
                format!(
                    "Congratulations! You've earned the \"{}\" achievement.",
                    achievement.name
                ),
            )
            .priority(NotificationPriority::High)
            .icon("🏆")
            .action_url("/achievements")
            .reference(achievement.id),
        )?;
        ws::send_to_user(
            tx,
            user_id,
            &WsEvent::AchievementUnlocked {
                achievement_id: achievement.id,
                name: achievement.name.clone(),
                description: achievement.description.clone(),
                badge_icon: achievement.badge_icon.clone(),
                points: achievement.points_required,
            },
        );
        unlocked.push(achievement);
    }
    Ok(unlocked)
}
