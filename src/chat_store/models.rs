use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One user's activity on one local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyActivityRecord {
    pub username: String,
    pub date: NaiveDate,
    pub message_count: u64,
    pub word_count: u64,
    /// Unix epoch milliseconds.
    pub first_message_time: Option<i64>,
    pub last_message_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakRecord {
    pub username: String,
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_active_date: Option<NaiveDate>,
    /// None whenever `current_streak` is 0.
    pub streak_start_date: Option<NaiveDate>,
    pub total_active_days: u32,
    pub updated_at: DateTime<Utc>,
}

/// Aggregated text features for one user, as stored in `message_analysis_cache`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentStats {
    pub username: String,
    pub total_messages: u64,
    pub total_words: u64,
    pub emoji_percentage: f64,
    pub caps_percentage: f64,
    pub question_percentage: f64,
    pub exclamation_percentage: f64,
    pub total_emojis: u64,
    pub total_links: u64,
    pub total_mentions: u64,
    pub total_questions: u64,
    pub total_exclamations: u64,
    pub shouting_messages: u64,
    pub longest_message_length: u64,
    pub shortest_message_length: u64,
    pub average_message_length: f64,
    pub vocabulary_size: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementTier {
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl AchievementTier {
    pub const ALL: [AchievementTier; 4] = [
        AchievementTier::Bronze,
        AchievementTier::Silver,
        AchievementTier::Gold,
        AchievementTier::Diamond,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementTier::Bronze => "bronze",
            AchievementTier::Silver => "silver",
            AchievementTier::Gold => "gold",
            AchievementTier::Diamond => "diamond",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AchievementTier::Bronze => "Bronze",
            AchievementTier::Silver => "Silver",
            AchievementTier::Gold => "Gold",
            AchievementTier::Diamond => "Diamond",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bronze" => Some(AchievementTier::Bronze),
            "silver" => Some(AchievementTier::Silver),
            "gold" => Some(AchievementTier::Gold),
            "diamond" => Some(AchievementTier::Diamond),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierThresholds {
    pub bronze: i64,
    pub silver: i64,
    pub gold: i64,
    pub diamond: i64,
}

impl TierThresholds {
    pub fn threshold(&self, tier: AchievementTier) -> i64 {
        match tier {
            AchievementTier::Bronze => self.bronze,
            AchievementTier::Silver => self.silver,
            AchievementTier::Gold => self.gold,
            AchievementTier::Diamond => self.diamond,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementDefinition {
    pub achievement_type: String,
    pub display_name: String,
    /// Key of the metric the thresholds are compared against.
    pub metric: String,
    pub thresholds: TierThresholds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementAward {
    pub id: i64,
    pub username: String,
    pub achievement_type: String,
    pub level: AchievementTier,
    pub achieved_at: DateTime<Utc>,
    pub details: Option<String>,
}

/// Row count and freshness of one derived table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub table: &'static str,
    pub record_count: u64,
    pub last_updated: Option<String>,
}
