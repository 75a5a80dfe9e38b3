use super::models::*;
use super::schema::{seed_achievement_definitions, CHAT_VERSIONED_SCHEMAS};
use crate::sqlite_persistence::open_versioned_database;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use unicode_segmentation::UnicodeSegmentation;

/// Derived tables reported by [`SqliteChatStore::cache_status`], with the
/// column that tells when each was last written.
const STATUS_TABLES: &[(&str, &str)] = &[
    ("user_daily_activity", "date"),
    ("user_chat_streaks", "updated_at"),
    ("message_analysis_cache", "updated_at"),
    ("chat_achievements", "achieved_at"),
];

/// The chat database: the message log plus every table the analytics jobs derive from it.
///
/// All access goes through one connection guarded by a mutex. Each primitive
/// locks for a single statement; [`SqliteChatStore::transaction`] locks for the
/// duration of the closure.
#[derive(Clone)]
pub struct SqliteChatStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChatStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_database(
            db_path.as_ref(),
            CHAT_VERSIONED_SCHEMAS,
            "chat",
            Some(seed_achievement_definitions),
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    // =========================================================================
    // Query primitives
    // =========================================================================

    /// First row of `sql`, if any.
    pub fn get<T, F>(&self, sql: &str, params: &[&dyn ToSql], map_row: F) -> Result<Option<T>>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        let value = conn.query_row(sql, params, map_row).optional()?;
        Ok(value)
    }

    /// Every row of `sql`.
    pub fn all<T, F>(&self, sql: &str, params: &[&dyn ToSql], map_row: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Execute a single statement, returning the number of changed rows.
    pub fn run(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(sql, params)?)
    }

    /// Run `f` inside one transaction. The transaction commits when `f` returns
    /// `Ok` and rolls back otherwise.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // =========================================================================
    // Message log
    // =========================================================================

    /// Append a message the way the chat transport does, with its word count
    /// precomputed. Returns the message id.
    pub fn insert_message(&self, username: &str, body: &str, timestamp_ms: i64) -> Result<i64> {
        let word_count = body.unicode_words().count() as i64;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (username, body, timestamp, word_count) VALUES (?1, ?2, ?3, ?4)",
            params![username, body, timestamp_ms, word_count],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn message_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // =========================================================================
    // Derived data readers
    // =========================================================================

    /// A user's daily activity, most recent day first.
    pub fn get_daily_activity(&self, username: &str) -> Result<Vec<DailyActivityRecord>> {
        self.all(
            "SELECT username, date, message_count, word_count, first_message_time, last_message_time
             FROM user_daily_activity WHERE username = ?1 ORDER BY date DESC",
            &[&username],
            row_to_daily_activity,
        )
    }

    pub fn get_streak(&self, username: &str) -> Result<Option<StreakRecord>> {
        self.get(
            "SELECT username, current_streak, best_streak, last_active_date, streak_start_date,
                    total_active_days, updated_at
             FROM user_chat_streaks WHERE username = ?1",
            &[&username],
            row_to_streak,
        )
    }

    pub fn get_content_stats(&self, username: &str) -> Result<Option<ContentStats>> {
        self.get(
            "SELECT username, total_messages, total_words, emoji_percentage, caps_percentage,
                    question_percentage, exclamation_percentage, total_emojis, total_links,
                    total_mentions, total_questions, total_exclamations, shouting_messages,
                    longest_message_length, shortest_message_length, average_message_length,
                    vocabulary_size, updated_at
             FROM message_analysis_cache WHERE username = ?1",
            &[&username],
            row_to_content_stats,
        )
    }

    /// The persisted vocabulary sample, in first-seen order.
    pub fn get_vocabulary(&self, username: &str) -> Result<Vec<String>> {
        self.all(
            "SELECT word FROM user_vocabulary WHERE username = ?1 ORDER BY rowid",
            &[&username],
            |row| row.get(0),
        )
    }

    pub fn get_achievements(&self, username: &str) -> Result<Vec<AchievementAward>> {
        self.all(
            "SELECT id, username, achievement_type, achievement_level, achieved_at, details
             FROM chat_achievements WHERE username = ?1 ORDER BY id",
            &[&username],
            row_to_award,
        )
    }

    pub fn get_achievement_definitions(&self) -> Result<Vec<AchievementDefinition>> {
        self.all(
            "SELECT achievement_type, display_name, metric, bronze_threshold, silver_threshold,
                    gold_threshold, diamond_threshold
             FROM achievement_definitions ORDER BY achievement_type",
            &[],
            |row| {
                Ok(AchievementDefinition {
                    achievement_type: row.get(0)?,
                    display_name: row.get(1)?,
                    metric: row.get(2)?,
                    thresholds: TierThresholds {
                        bronze: row.get(3)?,
                        silver: row.get(4)?,
                        gold: row.get(5)?,
                        diamond: row.get(6)?,
                    },
                })
            },
        )
    }

    /// Insert or replace an achievement definition.
    pub fn upsert_achievement_definition(&self, definition: &AchievementDefinition) -> Result<()> {
        let t = &definition.thresholds;
        self.run(
            "INSERT INTO achievement_definitions
             (achievement_type, display_name, metric, bronze_threshold, silver_threshold,
              gold_threshold, diamond_threshold)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(achievement_type) DO UPDATE SET
                display_name = ?2, metric = ?3, bronze_threshold = ?4, silver_threshold = ?5,
                gold_threshold = ?6, diamond_threshold = ?7",
            &[
                &definition.achievement_type,
                &definition.display_name,
                &definition.metric,
                &t.bronze,
                &t.silver,
                &t.gold,
                &t.diamond,
            ],
        )?;
        Ok(())
    }

    /// Record count and last update of each derived table.
    pub fn cache_status(&self) -> Result<Vec<TableStatus>> {
        let conn = self.conn.lock().unwrap();
        let mut statuses = Vec::with_capacity(STATUS_TABLES.len());
        for &(table, updated_column) in STATUS_TABLES {
            let (count, last_updated): (i64, Option<String>) = conn.query_row(
                &format!("SELECT COUNT(*), MAX({updated_column}) FROM {table}"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            statuses.push(TableStatus {
                table,
                record_count: count as u64,
                last_updated,
            });
        }
        Ok(statuses)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a `YYYY-MM-DD` column.
pub fn read_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

pub fn read_optional_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn read_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn read_count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn row_to_daily_activity(row: &Row<'_>) -> rusqlite::Result<DailyActivityRecord> {
    Ok(DailyActivityRecord {
        username: row.get(0)?,
        date: read_date(row, 1)?,
        message_count: read_count(row, 2)?,
        word_count: read_count(row, 3)?,
        first_message_time: row.get(4)?,
        last_message_time: row.get(5)?,
    })
}

fn row_to_streak(row: &Row<'_>) -> rusqlite::Result<StreakRecord> {
    Ok(StreakRecord {
        username: row.get(0)?,
        current_streak: read_count(row, 1)? as u32,
        best_streak: read_count(row, 2)? as u32,
        last_active_date: read_optional_date(row, 3)?,
        streak_start_date: read_optional_date(row, 4)?,
        total_active_days: read_count(row, 5)? as u32,
        updated_at: read_datetime(row, 6)?,
    })
}

fn row_to_content_stats(row: &Row<'_>) -> rusqlite::Result<ContentStats> {
    Ok(ContentStats {
        username: row.get(0)?,
        total_messages: read_count(row, 1)?,
        total_words: read_count(row, 2)?,
        emoji_percentage: row.get(3)?,
        caps_percentage: row.get(4)?,
        question_percentage: row.get(5)?,
        exclamation_percentage: row.get(6)?,
        total_emojis: read_count(row, 7)?,
        total_links: read_count(row, 8)?,
        total_mentions: read_count(row, 9)?,
        total_questions: read_count(row, 10)?,
        total_exclamations: read_count(row, 11)?,
        shouting_messages: read_count(row, 12)?,
        longest_message_length: read_count(row, 13)?,
        shortest_message_length: read_count(row, 14)?,
        average_message_length: row.get(15)?,
        vocabulary_size: read_count(row, 16)?,
        updated_at: read_datetime(row, 17)?,
    })
}

fn row_to_award(row: &Row<'_>) -> rusqlite::Result<AchievementAward> {
    let level: String = row.get(3)?;
    let level = AchievementTier::parse(&level).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, format!("achievement_level={level}"), Type::Text)
    })?;
    Ok(AchievementAward {
        id: row.get(0)?,
        username: row.get(1)?,
        achievement_type: row.get(2)?,
        level,
        achieved_at: read_datetime(row, 4)?,
        details: row.get(5)?,
    })
}
