//! SQLite schema definitions for the chat database.
//!
//! `messages` is owned by the chat transport; every other table is derived
//! by the analytics jobs and can be rebuilt from it.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};
use anyhow::Result;
use rusqlite::{params, Connection};

// =============================================================================
// Version 1 - Message log and derived analytics
// =============================================================================

pub const MESSAGES_TABLE_V1: Table = Table {
    name: "messages",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("username", &SqlType::Text, non_null = true),
        sqlite_column!("body", &SqlType::Text, non_null = true),
        // Unix epoch milliseconds.
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "word_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    primary_key: &[],
    indices: &[
        ("idx_messages_username_timestamp", "username, timestamp"),
        ("idx_messages_timestamp", "timestamp"),
    ],
    unique_constraints: &[],
};

pub const USER_DAILY_ACTIVITY_TABLE_V1: Table = Table {
    name: "user_daily_activity",
    columns: &[
        sqlite_column!("username", &SqlType::Text, non_null = true),
        // YYYY-MM-DD in the configured timezone.
        sqlite_column!("date", &SqlType::Text, non_null = true),
        sqlite_column!(
            "message_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "word_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("first_message_time", &SqlType::Integer),
        sqlite_column!("last_message_time", &SqlType::Integer),
    ],
    primary_key: &["username", "date"],
    indices: &[("idx_user_daily_activity_date", "date")],
    unique_constraints: &[],
};

pub const USER_CHAT_STREAKS_TABLE_V1: Table = Table {
    name: "user_chat_streaks",
    columns: &[
        sqlite_column!("username", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "current_streak",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "best_streak",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_active_date", &SqlType::Text),
        sqlite_column!("streak_start_date", &SqlType::Text),
        sqlite_column!(
            "total_active_days",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    primary_key: &[],
    indices: &[],
    unique_constraints: &[],
};

pub const MESSAGE_ANALYSIS_CACHE_TABLE_V1: Table = Table {
    name: "message_analysis_cache",
    columns: &[
        sqlite_column!("username", &SqlType::Text, is_primary_key = true),
        sqlite_column!("total_messages", &SqlType::Integer, non_null = true),
        sqlite_column!("total_words", &SqlType::Integer, non_null = true),
        sqlite_column!("emoji_percentage", &SqlType::Real, non_null = true),
        sqlite_column!("caps_percentage", &SqlType::Real, non_null = true),
        sqlite_column!("question_percentage", &SqlType::Real, non_null = true),
        sqlite_column!("exclamation_percentage", &SqlType::Real, non_null = true),
        sqlite_column!("total_emojis", &SqlType::Integer, non_null = true),
        sqlite_column!("total_links", &SqlType::Integer, non_null = true),
        sqlite_column!("total_mentions", &SqlType::Integer, non_null = true),
        sqlite_column!("total_questions", &SqlType::Integer, non_null = true),
        sqlite_column!("total_exclamations", &SqlType::Integer, non_null = true),
        sqlite_column!("shouting_messages", &SqlType::Integer, non_null = true),
        sqlite_column!("longest_message_length", &SqlType::Integer, non_null = true),
        sqlite_column!("shortest_message_length", &SqlType::Integer, non_null = true),
        sqlite_column!("average_message_length", &SqlType::Real, non_null = true),
        sqlite_column!("vocabulary_size", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    primary_key: &[],
    indices: &[],
    unique_constraints: &[],
};

pub const USER_VOCABULARY_TABLE_V1: Table = Table {
    name: "user_vocabulary",
    columns: &[
        sqlite_column!("username", &SqlType::Text, non_null = true),
        sqlite_column!("word", &SqlType::Text, non_null = true),
    ],
    primary_key: &["username", "word"],
    indices: &[],
    unique_constraints: &[],
};

pub const ACHIEVEMENT_DEFINITIONS_TABLE_V1: Table = Table {
    name: "achievement_definitions",
    columns: &[
        sqlite_column!("achievement_type", &SqlType::Text, is_primary_key = true),
        sqlite_column!("display_name", &SqlType::Text, non_null = true),
        sqlite_column!("metric", &SqlType::Text, non_null = true),
        sqlite_column!("bronze_threshold", &SqlType::Integer, non_null = true),
        sqlite_column!("silver_threshold", &SqlType::Integer, non_null = true),
        sqlite_column!("gold_threshold", &SqlType::Integer, non_null = true),
        sqlite_column!("diamond_threshold", &SqlType::Integer, non_null = true),
    ],
    primary_key: &[],
    indices: &[],
    unique_constraints: &[],
};

pub const CHAT_ACHIEVEMENTS_TABLE_V1: Table = Table {
    name: "chat_achievements",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("username", &SqlType::Text, non_null = true),
        sqlite_column!("achievement_type", &SqlType::Text, non_null = true),
        sqlite_column!("achievement_level", &SqlType::Text, non_null = true),
        sqlite_column!("achieved_at", &SqlType::Text, non_null = true),
        sqlite_column!("details", &SqlType::Text),
    ],
    primary_key: &[],
    indices: &[("idx_chat_achievements_username", "username")],
    unique_constraints: &[&["username", "achievement_type", "achievement_level"]],
};

/// (type, display name, metric, bronze, silver, gold, diamond)
type DefaultDefinition = (&'static str, &'static str, &'static str, i64, i64, i64, i64);

const DEFAULT_ACHIEVEMENT_DEFINITIONS: &[DefaultDefinition] = &[
    ("chatterbox", "Chatterbox", "message_count", 100, 1_000, 5_000, 25_000),
    ("wordsmith", "Wordsmith", "word_count", 1_000, 10_000, 50_000, 250_000),
    ("dedicated", "Dedicated", "streak_length", 3, 7, 30, 100),
    ("regular", "Regular", "active_days", 7, 30, 100, 365),
    ("night_owl", "Night Owl", "night_owl", 10, 50, 200, 1_000),
    ("early_bird", "Early Bird", "early_bird", 10, 50, 200, 1_000),
    ("emoji_enthusiast", "Emoji Enthusiast", "emoji_count", 50, 250, 1_000, 5_000),
    ("loud_and_proud", "Loud and Proud", "caps_count", 10, 50, 200, 1_000),
    ("curious_mind", "Curious Mind", "question_count", 25, 100, 500, 2_000),
    ("link_sharer", "Link Sharer", "link_count", 10, 50, 250, 1_000),
    ("lexicon", "Lexicon", "vocabulary_size", 200, 500, 1_000, 2_500),
    ("novelist", "Novelist", "longest_message", 100, 200, 350, 500),
];

/// Seeds `achievement_definitions` on a freshly created database.
pub fn seed_achievement_definitions(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO achievement_definitions
         (achievement_type, display_name, metric, bronze_threshold, silver_threshold,
          gold_threshold, diamond_threshold)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (kind, display_name, metric, bronze, silver, gold, diamond) in
        DEFAULT_ACHIEVEMENT_DEFINITIONS
    {
        stmt.execute(params![kind, display_name, metric, bronze, silver, gold, diamond])?;
    }
    Ok(())
}

pub static CHAT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        MESSAGES_TABLE_V1,
        USER_DAILY_ACTIVITY_TABLE_V1,
        USER_CHAT_STREAKS_TABLE_V1,
        MESSAGE_ANALYSIS_CACHE_TABLE_V1,
        USER_VOCABULARY_TABLE_V1,
        ACHIEVEMENT_DEFINITIONS_TABLE_V1,
        CHAT_ACHIEVEMENTS_TABLE_V1,
    ],
    migration: None,
}];
