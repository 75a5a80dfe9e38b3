//! Tiered chat achievements.
//!
//! Definitions live in `achievement_definitions`. Each run grants every
//! (type, tier) a user has reached and does not hold yet; awards are never
//! revoked.

use crate::background_jobs::{BatchJob, JobContext, JobError};
use crate::chat_store::{AchievementDefinition, AchievementTier, SqliteChatStore};
use rusqlite::{params, ToSql};
use tracing::{debug, info, warn};

/// Source value an achievement's thresholds are compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchievementMetric {
    MessageCount,
    WordCount,
    StreakLength,
    ActiveDays,
    /// Messages sent between 00:00 and 04:59 local time.
    NightOwl,
    /// Messages sent between 05:00 and 07:59 local time.
    EarlyBird,
    EmojiCount,
    CapsCount,
    QuestionCount,
    LinkCount,
    VocabularySize,
    LongestMessage,
}

impl AchievementMetric {
    pub const ALL: [AchievementMetric; 12] = [
        AchievementMetric::MessageCount,
        AchievementMetric::WordCount,
        AchievementMetric::StreakLength,
        AchievementMetric::ActiveDays,
        AchievementMetric::NightOwl,
        AchievementMetric::EarlyBird,
        AchievementMetric::EmojiCount,
        AchievementMetric::CapsCount,
        AchievementMetric::QuestionCount,
        AchievementMetric::LinkCount,
        AchievementMetric::VocabularySize,
        AchievementMetric::LongestMessage,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            AchievementMetric::MessageCount => "message_count",
            AchievementMetric::WordCount => "word_count",
            AchievementMetric::StreakLength => "streak_length",
            AchievementMetric::ActiveDays => "active_days",
            AchievementMetric::NightOwl => "night_owl",
            AchievementMetric::EarlyBird => "early_bird",
            AchievementMetric::EmojiCount => "emoji_count",
            AchievementMetric::CapsCount => "caps_count",
            AchievementMetric::QuestionCount => "question_count",
            AchievementMetric::LinkCount => "link_count",
            AchievementMetric::VocabularySize => "vocabulary_size",
            AchievementMetric::LongestMessage => "longest_message",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }

    /// Unit used in award details, as in "Reached 150 messages".
    fn unit(&self) -> &'static str {
        match self {
            AchievementMetric::MessageCount => "messages",
            AchievementMetric::WordCount => "words",
            AchievementMetric::StreakLength => "consecutive days",
            AchievementMetric::ActiveDays => "active days",
            AchievementMetric::NightOwl => "late-night messages",
            AchievementMetric::EarlyBird => "early-morning messages",
            AchievementMetric::EmojiCount => "emojis",
            AchievementMetric::CapsCount => "shouted messages",
            AchievementMetric::QuestionCount => "questions",
            AchievementMetric::LinkCount => "links",
            AchievementMetric::VocabularySize => "distinct words",
            AchievementMetric::LongestMessage => "characters in one message",
        }
    }

    /// Local hour range for time-of-day metrics.
    fn hour_range(&self) -> Option<(u32, u32)> {
        match self {
            AchievementMetric::NightOwl => Some((0, 4)),
            AchievementMetric::EarlyBird => Some((5, 7)),
            _ => None,
        }
    }

    /// Query yielding `(username, value)` per user. Time-of-day metrics take
    /// the timezone offset in seconds as parameter `?4`.
    fn source_sql(&self) -> String {
        let cached = |column: &str| {
            format!("SELECT username, {column} AS value FROM message_analysis_cache")
        };
        match self {
            AchievementMetric::MessageCount => cached("total_messages"),
            AchievementMetric::WordCount => cached("total_words"),
            AchievementMetric::EmojiCount => cached("total_emojis"),
            AchievementMetric::CapsCount => cached("shouting_messages"),
            AchievementMetric::QuestionCount => cached("total_questions"),
            AchievementMetric::LinkCount => cached("total_links"),
            AchievementMetric::VocabularySize => cached("vocabulary_size"),
            AchievementMetric::LongestMessage => cached("longest_message_length"),
            AchievementMetric::StreakLength => {
                "SELECT username, best_streak AS value FROM user_chat_streaks".to_string()
            }
            AchievementMetric::ActiveDays => {
                "SELECT username, total_active_days AS value FROM user_chat_streaks".to_string()
            }
            AchievementMetric::NightOwl | AchievementMetric::EarlyBird => {
                let (from, to) = self.hour_range().unwrap_or((0, 0));
                format!(
                    "SELECT username, COUNT(*) AS value FROM messages
                     WHERE CAST(strftime('%H', timestamp / 1000 + ?4, 'unixepoch') AS INTEGER)
                           BETWEEN {from} AND {to}
                     GROUP BY username"
                )
            }
        }
    }
}

/// Detail string stored with an award.
pub fn award_details(metric: AchievementMetric, value: i64, tier: AchievementTier) -> String {
    format!("Reached {} {} ({})", value, metric.unit(), tier.label())
}

pub struct ChatAchievementJob;

impl ChatAchievementJob {
    pub fn new() -> Self {
        Self
    }

    /// Users at or above `threshold` on `metric` who do not yet hold the award.
    fn qualifying_users(
        store: &SqliteChatStore,
        definition: &AchievementDefinition,
        metric: AchievementMetric,
        tier: AchievementTier,
        timezone_offset_secs: i64,
    ) -> anyhow::Result<Vec<(String, i64)>> {
        let sql = format!(
            "SELECT m.username, m.value FROM ({}) AS m
             WHERE m.value >= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM chat_achievements a
                   WHERE a.username = m.username
                     AND a.achievement_type = ?2
                     AND a.achievement_level = ?3)
             ORDER BY m.username",
            metric.source_sql()
        );
        let threshold = definition.thresholds.threshold(tier);
        let level = tier.as_str();
        let mut params: Vec<&dyn ToSql> = vec![&threshold, &definition.achievement_type, &level];
        if metric.hour_range().is_some() {
            params.push(&timezone_offset_secs);
        }
        store.all(&sql, &params, |row| Ok((row.get(0)?, row.get(1)?)))
    }

    fn award_tier(
        &self,
        ctx: &JobContext,
        definition: &AchievementDefinition,
        metric: AchievementMetric,
        tier: AchievementTier,
    ) -> Result<usize, JobError> {
        let store = &ctx.chat_store;
        let qualifying =
            Self::qualifying_users(store, definition, metric, tier, ctx.timezone_offset_secs())?;
        if qualifying.is_empty() {
            return Ok(0);
        }

        let achieved_at = SqliteChatStore::format_datetime(&ctx.clock.now());
        let inserted = store.transaction(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO chat_achievements
                 (username, achievement_type, achievement_level, achieved_at, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut inserted = 0;
            for (username, value) in &qualifying {
                inserted += stmt.execute(params![
                    username,
                    definition.achievement_type,
                    tier.as_str(),
                    achieved_at,
                    award_details(metric, *value, tier),
                ])?;
            }
            Ok(inserted)
        })?;

        debug!(
            "Awarded {} {} to {} users",
            definition.achievement_type,
            tier.as_str(),
            inserted
        );
        Ok(inserted)
    }
}

impl Default for ChatAchievementJob {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchJob for ChatAchievementJob {
    fn id(&self) -> &'static str {
        "chat_achievements"
    }

    fn name(&self) -> &'static str {
        "Chat Achievement Calculator"
    }

    fn description(&self) -> &'static str {
        "Grant tiered achievements to users who reached new thresholds"
    }

    fn execute(&self, ctx: &JobContext) -> Result<usize, JobError> {
        let definitions = ctx.chat_store.get_achievement_definitions()?;
        let mut awarded = 0;

        for definition in &definitions {
            let Some(metric) = AchievementMetric::parse(&definition.metric) else {
                warn!(
                    "Skipping achievement {}: unknown metric '{}'",
                    definition.achievement_type, definition.metric
                );
                continue;
            };
            for tier in AchievementTier::ALL {
                awarded += self.award_tier(ctx, definition, metric, tier)?;
            }
        }

        info!(
            "Granted {} new achievements across {} definitions",
            awarded,
            definitions.len()
        );
        Ok(awarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::jobs::test_support::{utc, TestEnv};
    use crate::chat_store::TierThresholds;

    fn only_definition(env: &TestEnv, kind: &str, metric: &str, thresholds: TierThresholds) {
        env.store.run("DELETE FROM achievement_definitions", &[]).unwrap();
        env.store
            .upsert_achievement_definition(&AchievementDefinition {
                achievement_type: kind.to_string(),
                display_name: kind.to_string(),
                metric: metric.to_string(),
                thresholds,
            })
            .unwrap();
    }

    fn seed_message_count(env: &TestEnv, username: &str, total_messages: i64) {
        env.store
            .run(
                "INSERT INTO message_analysis_cache
                 (username, total_messages, total_words, emoji_percentage, caps_percentage,
                  question_percentage, exclamation_percentage, total_emojis, total_links,
                  total_mentions, total_questions, total_exclamations, shouting_messages,
                  longest_message_length, shortest_message_length, average_message_length,
                  vocabulary_size, updated_at)
                 VALUES (?1, ?2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, '2024-01-01T00:00:00+00:00')",
                &[&username, &total_messages],
            )
            .unwrap();
    }

    const CHATTERBOX: TierThresholds = TierThresholds {
        bronze: 100,
        silver: 1_000,
        gold: 5_000,
        diamond: 25_000,
    };

    #[test]
    fn test_metric_keys_roundtrip() {
        for metric in AchievementMetric::ALL {
            assert_eq!(AchievementMetric::parse(metric.key()), Some(metric));
        }
        assert_eq!(AchievementMetric::parse("bogus"), None);
    }

    #[test]
    fn test_award_details() {
        assert_eq!(
            award_details(AchievementMetric::MessageCount, 150, AchievementTier::Bronze),
            "Reached 150 messages (Bronze)"
        );
    }

    #[test]
    fn test_awards_reached_tier_once() {
        let env = TestEnv::new(utc(2024, 1, 10, 12, 0), 0);
        only_definition(&env, "chatterbox", "message_count", CHATTERBOX);
        seed_message_count(&env, "alice", 150);
        seed_message_count(&env, "bob", 20);

        let job = ChatAchievementJob::new();
        assert_eq!(job.execute(&env.ctx).unwrap(), 1);

        let awards = env.store.get_achievements("alice").unwrap();
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].achievement_type, "chatterbox");
        assert_eq!(awards[0].level, AchievementTier::Bronze);
        assert_eq!(
            awards[0].details.as_deref(),
            Some("Reached 150 messages (Bronze)")
        );
        assert_eq!(awards[0].achieved_at, utc(2024, 1, 10, 12, 0));
        assert!(env.store.get_achievements("bob").unwrap().is_empty());

        // Re-running grants nothing new.
        env.clock.set(utc(2024, 1, 11, 12, 0));
        assert_eq!(job.execute(&env.ctx).unwrap(), 0);
        let again = env.store.get_achievements("alice").unwrap();
        assert_eq!(again, awards);
    }

    #[test]
    fn test_higher_value_earns_every_lower_tier() {
        let env = TestEnv::new(utc(2024, 1, 10, 12, 0), 0);
        only_definition(&env, "chatterbox", "message_count", CHATTERBOX);
        seed_message_count(&env, "alice", 6_000);

        assert_eq!(ChatAchievementJob::new().execute(&env.ctx).unwrap(), 3);
        let levels: Vec<_> = env
            .store
            .get_achievements("alice")
            .unwrap()
            .into_iter()
            .map(|a| a.level)
            .collect();
        assert_eq!(
            levels,
            vec![
                AchievementTier::Bronze,
                AchievementTier::Silver,
                AchievementTier::Gold
            ]
        );
    }

    #[test]
    fn test_unknown_metric_is_skipped() {
        let env = TestEnv::new(utc(2024, 1, 10, 12, 0), 0);
        only_definition(&env, "mystery", "bogus_metric", CHATTERBOX);
        seed_message_count(&env, "alice", 30_000);

        assert_eq!(ChatAchievementJob::new().execute(&env.ctx).unwrap(), 0);
    }

    #[test]
    fn test_night_owl_uses_local_time() {
        // 23:30 UTC is 02:30 at UTC+3.
        let env = TestEnv::new(utc(2024, 1, 10, 12, 0), 3);
        only_definition(
            &env,
            "night_owl",
            "night_owl",
            TierThresholds {
                bronze: 2,
                silver: 3,
                gold: 4,
                diamond: 5,
            },
        );
        env.say("alice", "still up", utc(2024, 1, 1, 23, 30));
        env.say("alice", "can't sleep", utc(2024, 1, 2, 23, 45));
        env.say("bob", "afternoon", utc(2024, 1, 2, 12, 0));
        env.say("bob", "evening", utc(2024, 1, 2, 17, 0));

        assert_eq!(ChatAchievementJob::new().execute(&env.ctx).unwrap(), 1);
        let awards = env.store.get_achievements("alice").unwrap();
        assert_eq!(awards[0].level, AchievementTier::Bronze);
        assert_eq!(
            awards[0].details.as_deref(),
            Some("Reached 2 late-night messages (Bronze)")
        );
        assert!(env.store.get_achievements("bob").unwrap().is_empty());
    }

    #[test]
    fn test_streak_metric_reads_best_streak() {
        let env = TestEnv::new(utc(2024, 1, 10, 12, 0), 0);
        only_definition(
            &env,
            "dedicated",
            "streak_length",
            TierThresholds {
                bronze: 3,
                silver: 7,
                gold: 30,
                diamond: 100,
            },
        );
        env.store
            .run(
                "INSERT INTO user_chat_streaks
                 (username, current_streak, best_streak, total_active_days, updated_at)
                 VALUES ('bob', 1, 3, 4, '2024-01-10T00:00:00+00:00')",
                &[],
            )
            .unwrap();

        assert_eq!(ChatAchievementJob::new().execute(&env.ctx).unwrap(), 1);
        assert_eq!(
            env.store.get_achievements("bob").unwrap()[0].details.as_deref(),
            Some("Reached 3 consecutive days (Bronze)")
        );
    }
}
