//! Demo data for a fresh database.
//!
//! Every step is idempotent: rows are matched by their natural key
//! (username, challenge/achievement name, article URL, data type + date,
//! template name) and left alone when present. Sample carbon entries are
//! only added for users created by this run.

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::auth;
use crate::db::{self, EcoDb, ProfileUpdate};
use crate::models::{
    ArticleCategory, ChallengeType, ClimateDataType, CriteriaType, NewAchievement, NewArticle,
    NewCarbonEntry, NewChallenge, NotificationPriority, NotificationType, PointSource, StatType,
    Subcategory, UserRole,
};
use crate::services::chatbot::DEFAULT_SYSTEM_PROMPT;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What a seed run added. Tokens are only ever shown here.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub users: Vec<(String, String)>,
    pub challenges: usize,
    pub achievements: usize,
    pub articles: usize,
    pub climate_points: usize,
    pub carbon_entries: usize,
    pub templates: usize,
}

struct DemoUser {
    username: &'static str,
    email: &'static str,
    role: UserRole,
    location: &'static str,
    bio: &'static str,
    points: i64,
    streak: i64,
}

const DEMO_USERS: &[DemoUser] = &[
    DemoUser {
        username: "demo_user",
        email: "demo@ecosphere.com",
        role: UserRole::Individual,
        location: "San Francisco, CA",
        bio: "Environmental enthusiast",
        points: 150,
        streak: 5,
    },
    DemoUser {
        username: "eco_warrior",
        email: "warrior@ecosphere.com",
        role: UserRole::Individual,
        location: "New York, NY",
        bio: "Climate activist",
        points: 300,
        streak: 12,
    },
    DemoUser {
        username: "green_ngo",
        email: "ngo@ecosphere.com",
        role: UserRole::Ngo,
        location: "Seattle, WA",
        bio: "Environmental NGO",
        points: 500,
        streak: 8,
    },
    DemoUser {
        username: "admin_user",
        email: "admin@ecosphere.com",
        role: UserRole::Admin,
        location: "Boston, MA",
        bio: "Platform administrator",
        points: 1000,
        streak: 30,
    },
];

pub fn seed(db: &EcoDb) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let new_individuals = seed_users(db, &mut report)?;
    report.challenges = seed_challenges(db)?;
    report.achievements = seed_achievements(db)?;
    report.articles = seed_articles(db)?;
    report.climate_points = seed_climate(db)?;
    for user_id in new_individuals {
        report.carbon_entries += seed_carbon_entries(db, user_id)?;
    }
    db.upsert_chatbot_config("default", DEFAULT_SYSTEM_PROMPT, 500, 0.7)?;
    report.templates = seed_templates(db)?;
    tracing::info!(?report, "seed complete");
    Ok(report)
}

/// Returns the ids of newly created individual users.
fn seed_users(db: &EcoDb, report: &mut SeedReport) -> Result<Vec<i64>> {
    let today = db::today();
    let mut individuals = Vec::new();
    for demo in DEMO_USERS {
        if db.get_user_by_username(demo.username)?.is_some() {
            continue;
        }
        let user = db.create_user(demo.username, demo.email, demo.role, demo.location)?;
        db.update_profile(
            user.id,
            &ProfileUpdate {
                bio: Some(demo.bio.to_string()),
                ..Default::default()
            },
        )?;
        db.award_points(user.id, demo.points, PointSource::Bonus, "Welcome bonus", None)?;
        db.set_login_streak(user.id, demo.streak, today)?;
        let token = auth::issue_token(db, user.id)?;
        if demo.role == UserRole::Individual {
            individuals.push(user.id);
        }
        report.users.push((user.username, token));
    }
    Ok(individuals)
}

fn seed_challenges(db: &EcoDb) -> Result<usize> {
    let now = Utc::now();
    let start = now.format(TIMESTAMP_FORMAT).to_string();
    let challenges = [
        (
            "Weekly Public Transport Challenge",
            "Use public transportation for at least 5 trips this week",
            ChallengeType::Weekly,
            50,
            7,
            5.0,
            "trips",
            "Transportation",
        ),
        (
            "Monthly Energy Reduction",
            "Reduce your electricity consumption by 20% this month",
            ChallengeType::Monthly,
            100,
            30,
            20.0,
            "%",
            "Energy",
        ),
        (
            "Community Tree Planting",
            "Plant 3 trees and upload verification photos",
            ChallengeType::Community,
            75,
            14,
            3.0,
            "trees",
            "Nature",
        ),
        (
            "Zero Waste Week",
            "Generate less than 1kg of waste this week",
            ChallengeType::Weekly,
            60,
            7,
            1.0,
            "kg",
            "Waste",
        ),
    ];
    let mut created = 0;
    for (name, description, challenge_type, points, days, target, unit, category) in challenges {
        if db.get_challenge_by_name(name)?.is_some() {
            continue;
        }
        db.create_challenge(&NewChallenge {
            name: name.to_string(),
            description: description.to_string(),
            challenge_type,
            points_reward: points,
            duration_days: days,
            target_value: Some(target),
            target_unit: unit.to_string(),
            category: category.to_string(),
            creator_id: None,
            start_date: start.clone(),
            end_date: (now + Duration::days(days)).format(TIMESTAMP_FORMAT).to_string(),
            max_participants: None,
            is_featured: false,
        })?;
        created += 1;
    }
    Ok(created)
}

fn seed_achievements(db: &EcoDb) -> Result<usize> {
    let achievements = [
        ("Green Warrior", "Reduce 100kg of CO2 emissions", "🌱", 100, CriteriaType::CarbonReduction, 100.0, "Carbon Reduction"),
        ("Transit Hero", "Use public transport for 30 consecutive days", "🚌", 200, CriteriaType::Streak, 30.0, "Transportation"),
        ("Plant Pioneer", "Plant 10 trees", "🌳", 150, CriteriaType::Entries, 10.0, "Nature"),
        ("EcoSphere Champion", "Reach top 10 in global leaderboard", "🏆", 500, CriteriaType::Points, 500.0, "Achievement"),
        ("Consistent Tracker", "Log carbon entries for 7 consecutive days", "📊", 75, CriteriaType::Streak, 7.0, "Tracking"),
    ];
    let mut created = 0;
    for (name, description, icon, points, criteria_type, criteria_value, category) in achievements {
        if db.achievement_exists(name)? {
            continue;
        }
        db.create_achievement(&NewAchievement {
            name: name.to_string(),
            description: description.to_string(),
            badge_icon: icon.to_string(),
            points_required: points,
            criteria_type,
            criteria_value,
            category: category.to_string(),
            is_hidden: false,
        })?;
        created += 1;
    }
    Ok(created)
}

fn seed_articles(db: &EcoDb) -> Result<usize> {
    let now = Utc::now();
    let articles = [
        (
            "Global CO2 Levels Reach New Record High",
            "Scientists report that atmospheric CO2 concentrations have reached 420.5 ppm, the highest level in human history. This represents a significant increase from pre-industrial levels of 280 ppm and highlights the urgent need for climate action.",
            "Atmospheric carbon dioxide levels have reached a new record high of 420.5 parts per million (ppm), according to the latest measurements from the Mauna Loa Observatory. This represents the highest concentration of CO2 in the atmosphere in human history, surpassing the previous record set just last year. The increase continues a decades-long trend of rising greenhouse gas concentrations that are driving global climate change.",
            "Climate Science Journal",
            "https://example.com/co2-record",
            ArticleCategory::Science,
            2,
        ),
        (
            "Renewable Energy Surpasses Coal in Global Electricity Generation",
            "For the first time in history, renewable energy sources have generated more electricity globally than coal-fired power plants. Solar and wind power lead the transition, marking a significant milestone in the clean energy revolution.",
            "Renewable energy sources have achieved a historic milestone by generating more electricity globally than coal-fired power plants for the first time. Solar and wind power are leading this transition, with solar capacity increasing by 22% and wind capacity by 12% compared to the previous year. This shift represents a major step forward in the global transition to clean energy.",
            "Energy Report",
            "https://example.com/renewable-milestone",
            ArticleCategory::Solutions,
            5,
        ),
        (
            "Arctic Ice Extent Shows Continued Decline",
            "Satellite data reveals that Arctic sea ice extent has reached its second-lowest level on record, continuing a decades-long trend of decline due to global warming. The loss of ice has significant implications for global climate patterns.",
            "New satellite data from the National Snow and Ice Data Center shows that Arctic sea ice extent has reached its second-lowest level on record. The ice cover measured 3.74 million square kilometers, continuing a decades-long trend of decline attributed to rising global temperatures. The loss of Arctic ice has far-reaching implications for global climate patterns and local ecosystems.",
            "Polar Research Institute",
            "https://example.com/arctic-ice",
            ArticleCategory::Science,
            8,
        ),
    ];
    let mut created = 0;
    for (title, summary, content, source, url, category, hours_ago) in articles {
        if db.article_url_exists(url)? {
            continue;
        }
        db.create_article(&NewArticle {
            title: title.to_string(),
            content: content.to_string(),
            summary: summary.to_string(),
            url: url.to_string(),
            source: source.to_string(),
            author: String::new(),
            category,
            published_date: (now - Duration::hours(hours_ago))
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            image_url: None,
            is_featured: false,
        })?;
        created += 1;
    }
    Ok(created)
}

/// Twelve monthly CO2 and temperature points plus today's headline
/// statistics. Values alternate slightly around the trend.
fn seed_climate(db: &EcoDb) -> Result<usize> {
    let today = db::today();
    let mut written = 0;
    for i in 0..12i64 {
        let date = (today - Duration::days(i * 30)).format("%Y-%m-%d").to_string();
        let wobble = if i % 2 == 0 { 0.1 } else { -0.1 };
        let n = i as f64;
        db.upsert_climate_data(
            ClimateDataType::Co2Levels,
            415.0 + n * 0.5 + wobble,
            "ppm",
            &date,
            "Mauna Loa Observatory",
        )?;
        db.upsert_climate_data(
            ClimateDataType::TemperatureAnomaly,
            0.8 + n * 0.05 + wobble / 2.0,
            "°C",
            &date,
            "NOAA",
        )?;
        written += 2;
    }
    let today = today.format("%Y-%m-%d").to_string();
    db.upsert_climate_statistic(StatType::GlobalCo2, 420.5, "ppm", "daily", &today)?;
    db.upsert_climate_statistic(StatType::GlobalTemp, 1.2, "°C", "daily", &today)?;
    Ok(written)
}

fn seed_carbon_entries(db: &EcoDb, user_id: i64) -> Result<usize> {
    let today = db::today();
    let entries = [
        (Subcategory::Electricity, 300.0, 12, "Monthly electricity usage"),
        (Subcategory::Car, 200.0, 5, "Daily commute"),
        (Subcategory::Water, 1500.0, 20, "Monthly water usage"),
    ];
    for (subcategory, value, days_ago, notes) in entries {
        db.create_carbon_entry(
            user_id,
            &NewCarbonEntry {
                category: subcategory.category(),
                subcategory,
                value,
                unit: crate::emissions::factor_for(subcategory).unit.to_string(),
                date: (today - Duration::days(days_ago)).format("%Y-%m-%d").to_string(),
                notes: notes.to_string(),
            },
        )?;
    }
    Ok(entries.len())
}

fn seed_templates(db: &EcoDb) -> Result<usize> {
    let templates = [
        (
            "friend_request",
            NotificationType::FriendRequest,
            "New friend request",
            "{username} sent you a friend request.",
            "👋",
            NotificationPriority::Medium,
        ),
        (
            "challenge_completed",
            NotificationType::Challenge,
            "Challenge Completed: {challenge_name}",
            "You completed \"{challenge_name}\" and earned {points} points!",
            "🎯",
            NotificationPriority::High,
        ),
        (
            "weekly_summary",
            NotificationType::WeeklySummary,
            "Weekly EcoSphere Summary",
            "Carbon tracked: {total_co2} kg CO2 ({entries_count} entries). Challenges completed: {challenges_completed}. Achievements earned: {achievements_earned}. Current points: {total_points}. Keep up the great work! 🌱",
            "📊",
            NotificationPriority::Medium,
        ),
        (
            "climate_alert",
            NotificationType::ClimateAlert,
            "{title}",
            "{description} ({location})",
            "⚠️",
            NotificationPriority::High,
        ),
    ];
    for (name, kind, title, content, icon, priority) in templates {
        db.upsert_notification_template(name, kind, title, content, icon, priority)?;
    }
    Ok(templates.len())
}
