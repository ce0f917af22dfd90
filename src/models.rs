use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declares a closed set of string-backed values. Each variant serializes,
/// displays and is stored in SQLite as the given literal.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!("\"{}\" is not a valid choice.", s)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ── Users ─────────────────────────────────────────────────────────────

string_enum!(UserRole {
    Individual => "INDIVIDUAL",
    Ngo => "NGO",
    Admin => "ADMIN",
});

impl UserRole {
    /// NGOs and admins may publish challenges.
    pub fn can_create_challenges(&self) -> bool {
        matches!(self, Self::Ngo | Self::Admin)
    }
}

string_enum!(FriendshipStatus {
    Pending => "PENDING",
    Accepted => "ACCEPTED",
    Blocked => "BLOCKED",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub location: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub notifications_enabled: bool,
    pub email_notifications: bool,
    pub total_points: i64,
    pub login_streak: i64,
    pub last_login_date: Option<String>,
    pub is_active: bool,
    pub date_joined: String,
}

impl User {
    /// City component of the location ("San Francisco, CA" -> "San Francisco").
    pub fn city(&self) -> Option<&str> {
        let city = self.location.split(',').next()?.trim();
        if city.is_empty() { None } else { Some(city) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friendship {
    pub id: i64,
    pub user_id: i64,
    pub user_username: String,
    pub friend_id: i64,
    pub friend_username: String,
    pub status: FriendshipStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub total_carbon_entries: i64,
    pub monthly_carbon_total: f64,
    pub yearly_carbon_total: f64,
    pub challenges_completed: i64,
    pub achievements_earned: i64,
    pub friends_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: i64,
    pub username: String,
    pub location: String,
    pub total_points: i64,
    pub login_streak: i64,
}

// ── Carbon tracking ───────────────────────────────────────────────────

string_enum!(CarbonCategory {
    Domestic => "DOMESTIC",
    Transportation => "TRANSPORTATION",
});

string_enum!(Subcategory {
    Electricity => "ELECTRICITY",
    Water => "WATER",
    NaturalGas => "NATURAL_GAS",
    Waste => "WASTE",
    Car => "CAR",
    Motorcycle => "MOTORCYCLE",
    PublicTransit => "PUBLIC_TRANSIT",
    Flight => "FLIGHT",
});

impl Subcategory {
    pub fn category(&self) -> CarbonCategory {
        match self {
            Self::Electricity | Self::Water | Self::NaturalGas | Self::Waste => {
                CarbonCategory::Domestic
            }
            Self::Car | Self::Motorcycle | Self::PublicTransit | Self::Flight => {
                CarbonCategory::Transportation
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonEntry {
    pub id: i64,
    pub user_id: i64,
    pub category: CarbonCategory,
    pub subcategory: Subcategory,
    pub value: f64,
    pub unit: String,
    pub co2_calculated: f64,
    pub date: String,
    pub notes: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Validated input for creating or replacing a carbon entry.
#[derive(Debug, Clone)]
pub struct NewCarbonEntry {
    pub category: CarbonCategory,
    pub subcategory: Subcategory,
    pub value: f64,
    pub unit: String,
    pub date: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default)]
pub struct CarbonEntryFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<CarbonCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonGoal {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub target_reduction: f64,
    pub current_reduction: f64,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
    pub progress_percentage: f64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewCarbonGoal {
    pub title: String,
    pub description: String,
    pub target_reduction: f64,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
}

/// Share of a goal reached, capped at 100. A zero target reports 0.
pub fn progress_percentage(current: f64, target: f64) -> f64 {
    if target == 0.0 {
        return 0.0;
    }
    (current / target * 100.0).min(100.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonSummary {
    pub monthly_total: f64,
    pub yearly_total: f64,
    pub total_entries: i64,
    pub average_daily: f64,
    pub category_breakdown: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthComparison {
    pub month: u32,
    pub user: f64,
    pub national: f64,
    pub global: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarbonComparison {
    pub user_average: f64,
    pub national_average: f64,
    pub global_average: f64,
    pub reduction_percentage: f64,
    pub comparison_data: Vec<MonthComparison>,
}

// ── Gamification ──────────────────────────────────────────────────────

string_enum!(ChallengeType {
    Weekly => "WEEKLY",
    Monthly => "MONTHLY",
    Community => "COMMUNITY",
    Custom => "CUSTOM",
});

string_enum!(ChallengeStatus {
    Active => "ACTIVE",
    Completed => "COMPLETED",
    Expired => "EXPIRED",
    Cancelled => "CANCELLED",
});

string_enum!(ParticipationStatus {
    Joined => "JOINED",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

string_enum!(PointSource {
    CarbonReduction => "CARBON_REDUCTION",
    ChallengeCompletion => "CHALLENGE_COMPLETION",
    LoginStreak => "LOGIN_STREAK",
    Achievement => "ACHIEVEMENT",
    Bonus => "BONUS",
});

string_enum!(CriteriaType {
    Points => "points",
    CarbonReduction => "carbon_reduction",
    Streak => "streak",
    Entries => "entries",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub challenge_type: ChallengeType,
    pub status: ChallengeStatus,
    pub points_reward: i64,
    pub duration_days: i64,
    pub target_value: Option<f64>,
    pub target_unit: String,
    pub category: String,
    pub creator_id: Option<i64>,
    pub start_date: String,
    pub end_date: String,
    pub max_participants: Option<i64>,
    pub is_featured: bool,
    pub participant_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub name: String,
    pub description: String,
    pub challenge_type: ChallengeType,
    pub points_reward: i64,
    pub duration_days: i64,
    pub target_value: Option<f64>,
    pub target_unit: String,
    pub category: String,
    pub creator_id: Option<i64>,
    pub start_date: String,
    pub end_date: String,
    pub max_participants: Option<i64>,
    pub is_featured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserChallenge {
    pub id: i64,
    pub user_id: i64,
    pub challenge_id: i64,
    pub status: ParticipationStatus,
    pub progress_value: f64,
    pub progress_percentage: f64,
    pub joined_at: String,
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub badge_icon: String,
    pub points_required: i64,
    pub criteria_type: String,
    pub criteria_value: f64,
    pub category: String,
    pub is_hidden: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewAchievement {
    pub name: String,
    pub description: String,
    pub badge_icon: String,
    pub points_required: i64,
    pub criteria_type: CriteriaType,
    pub criteria_value: f64,
    pub category: String,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAchievement {
    pub id: i64,
    pub user_id: i64,
    pub achievement: Achievement,
    pub earned_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsEntry {
    pub id: i64,
    pub user_id: i64,
    pub points: i64,
    pub source: PointSource,
    pub description: String,
    pub reference_id: Option<i64>,
    pub created_at: String,
}

/// Result of recording progress on a joined challenge.
#[derive(Debug, Clone)]
pub struct ProgressOutcome {
    pub participation: UserChallenge,
    /// Set when this update moved the participation to COMPLETED.
    pub completed: bool,
    pub points_awarded: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsSummary {
    pub total_points: i64,
    pub by_source: BTreeMap<String, i64>,
}

// ── News ──────────────────────────────────────────────────────────────

string_enum!(ArticleCategory {
    Policy => "POLICY",
    Science => "SCIENCE",
    Disasters => "DISASTERS",
    Solutions => "SOLUTIONS",
    Local => "LOCAL",
    Global => "GLOBAL",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub url: String,
    pub source: String,
    pub author: String,
    pub category: ArticleCategory,
    pub published_date: String,
    pub image_url: Option<String>,
    pub view_count: i64,
    pub bookmark_count: i64,
    pub is_featured: bool,
    pub is_trending: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_bookmarked: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub url: String,
    pub source: String,
    pub author: String,
    pub category: ArticleCategory,
    pub published_date: String,
    pub image_url: Option<String>,
    pub is_featured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleBookmark {
    pub id: i64,
    pub user_id: i64,
    pub article: NewsArticle,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkToggle {
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingTopic {
    pub id: i64,
    pub topic: String,
    pub search_count: i64,
    pub trend_score: f64,
    pub date: String,
}

// ── Notifications ─────────────────────────────────────────────────────

string_enum!(NotificationType {
    Achievement => "ACHIEVEMENT",
    Challenge => "CHALLENGE",
    FriendRequest => "FRIEND_REQUEST",
    ClimateAlert => "CLIMATE_ALERT",
    WeeklySummary => "WEEKLY_SUMMARY",
    System => "SYSTEM",
    News => "NEWS",
});

string_enum!(NotificationPriority {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Urgent => "URGENT",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub content: String,
    pub icon: String,
    pub action_url: String,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub reference_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub content: String,
    pub icon: String,
    pub action_url: String,
    pub reference_id: Option<i64>,
}

impl NewNotification {
    pub fn new(
        recipient_id: i64,
        notification_type: NotificationType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            notification_type,
            priority: NotificationPriority::Medium,
            title: title.into(),
            content: content.into(),
            icon: String::new(),
            action_url: String::new(),
            reference_id: None,
        }
    }

    pub fn priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = url.into();
        self
    }

    pub fn reference(mut self, id: i64) -> Self {
        self.reference_id = Some(id);
        self
    }

    pub fn reference_opt(mut self, id: Option<i64>) -> Self {
        self.reference_id = id;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub id: i64,
    pub name: String,
    pub notification_type: NotificationType,
    pub title_template: String,
    pub content_template: String,
    pub icon: String,
    pub priority: NotificationPriority,
    pub is_active: bool,
}

// ── Chatbot ───────────────────────────────────────────────────────────

string_enum!(ChatRole {
    User => "USER",
    Assistant => "ASSISTANT",
    System => "SYSTEM",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub title: String,
    pub message_count: i64,
    pub total_tokens: i64,
    pub is_active: bool,
    pub created_at: String,
    pub last_activity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub tokens_used: i64,
    pub response_time: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatbotConfig {
    pub id: i64,
    pub name: String,
    pub system_prompt: String,
    pub max_tokens: i64,
    pub temperature: f64,
    pub include_carbon_data: bool,
    pub include_location: bool,
    pub include_news: bool,
    pub is_active: bool,
}

// ── Climate ───────────────────────────────────────────────────────────

string_enum!(ClimateDataType {
    Co2Levels => "CO2_LEVELS",
    TemperatureAnomaly => "TEMPERATURE_ANOMALY",
    SeaLevel => "SEA_LEVEL",
    ArcticIce => "ARCTIC_ICE",
    GreenhouseGases => "GREENHOUSE_GASES",
});

string_enum!(AlertSeverity {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

string_enum!(AlertType {
    Temperature => "TEMPERATURE",
    Precipitation => "PRECIPITATION",
    AirQuality => "AIR_QUALITY",
    SeaLevel => "SEA_LEVEL",
    ExtremeWeather => "EXTREME_WEATHER",
});

string_enum!(StatType {
    GlobalCo2 => "GLOBAL_CO2",
    GlobalTemp => "GLOBAL_TEMP",
    ArcticIceExtent => "ARCTIC_ICE_EXTENT",
    SeaLevelRise => "SEA_LEVEL_RISE",
    RenewableEnergy => "RENEWABLE_ENERGY",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateData {
    pub id: i64,
    pub data_type: ClimateDataType,
    pub value: f64,
    pub unit: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub date: String,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateAlert {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub start_date: String,
    pub end_date: Option<String>,
    pub is_active: bool,
    pub source: String,
    pub external_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewClimateAlert {
    pub title: String,
    pub description: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub location: String,
    pub source: String,
    pub external_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateStatistic {
    pub id: i64,
    pub stat_type: StatType,
    pub value: f64,
    pub unit: String,
    pub period: String,
    pub date: String,
    pub previous_value: Option<f64>,
    pub change_percentage: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateTypeStats {
    pub data_type: ClimateDataType,
    pub latest_value: f64,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateTrend {
    pub data_type: ClimateDataType,
    pub current: Option<f64>,
    pub change: f64,
    pub data_points: i64,
    pub period_days: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips_through_str() {
        for status in FriendshipStatus::ALL {
            assert_eq!(FriendshipStatus::from_str(status.as_str()).unwrap(), *status);
        }
        assert_eq!(Subcategory::from_str("PUBLIC_TRANSIT").unwrap(), Subcategory::PublicTransit);
        assert_eq!(CriteriaType::from_str("carbon_reduction").unwrap(), CriteriaType::CarbonReduction);
    }

    #[test]
    fn test_enum_rejects_unknown_values() {
        let err = CarbonCategory::from_str("FOOD").unwrap_err();
        assert!(err.contains("FOOD"));
        assert!(UserRole::from_str("individual").is_err());
    }

    #[test]
    fn test_enum_serializes_as_stored_literal() {
        let json = serde_json::to_string(&NotificationType::FriendRequest).unwrap();
        assert_eq!(json, "\"FRIEND_REQUEST\"");
        let parsed: AlertSeverity = serde_json::from_str("\"CRITICAL\"").unwrap();
        assert_eq!(parsed, AlertSeverity::Critical);
    }

    #[test]
    fn test_subcategory_belongs_to_one_category() {
        assert_eq!(Subcategory::Water.category(), CarbonCategory::Domestic);
        assert_eq!(Subcategory::Flight.category(), CarbonCategory::Transportation);
        let domestic = Subcategory::ALL
            .iter()
            .filter(|s| s.category() == CarbonCategory::Domestic)
            .count();
        assert_eq!(domestic, 4);
    }

    #[test]
    fn test_progress_percentage_caps_and_handles_zero() {
        assert_eq!(progress_percentage(50.0, 200.0), 25.0);
        assert_eq!(progress_percentage(500.0, 200.0), 100.0);
        assert_eq!(progress_percentage(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_user_city_takes_first_location_part() {
        let mut user = User {
            id: 1,
            username: "demo".into(),
            email: "demo@example.com".into(),
            first_name: String::new(),
            last_name: String::new(),
            role: UserRole::Individual,
            location: "San Francisco, CA".into(),
            bio: String::new(),
            avatar: None,
            notifications_enabled: true,
            email_notifications: true,
            total_points: 0,
            login_streak: 0,
            last_login_date: None,
            is_active: true,
            date_joined: "2024-01-01 00:00:00".into(),
        };
        assert_eq!(user.city(), Some("San Francisco"));
        user.location = String::new();
        assert_eq!(user.city(), None);
    }

    #[test]
    fn test_role_permissions() {
        assert!(UserRole::Ngo.can_create_challenges());
        assert!(UserRole::Admin.can_create_challenges());
        assert!(!UserRole::Individual.can_create_challenges());
    }

    #[test]
    fn test_user_challenge_omits_missing_nested_challenge() {
        let uc = UserChallenge {
            id: 1,
            user_id: 2,
            challenge_id: 3,
            status: ParticipationStatus::Joined,
            progress_value: 0.0,
            progress_percentage: 0.0,
            joined_at: "2024-01-01 00:00:00".into(),
            completed_at: None,
            challenge: None,
        };
        let json = serde_json::to_value(&uc).unwrap();
        assert!(json.get("challenge").is_none());
        assert_eq!(json["status"], "JOINED");
    }
}
