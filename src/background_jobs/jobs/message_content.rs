//! Text-feature analytics over each user's full message history.

use crate::background_jobs::{process_batch, BatchJob, JobContext, JobError};
use crate::chat_store::{ContentStats, SqliteChatStore};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::params;
use std::collections::HashSet;
use tracing::info;
use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_VOCABULARY_LIMIT: usize = 500;

/// A message counts as shouting above this share of uppercase letters...
const SHOUTING_UPPERCASE_RATIO: f64 = 0.8;
/// ...provided it has more than this many letters.
const SHOUTING_MIN_LETTERS: usize = 5;

lazy_static! {
    static ref EMOJI_RE: Regex = Regex::new(r"\p{Extended_Pictographic}").expect("Invalid regex");
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").expect("Invalid regex");
    static ref MENTION_RE: Regex = Regex::new(r"@\w+").expect("Invalid regex");
}

/// Features extracted from a single message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageFeatures {
    pub emojis: usize,
    pub links: usize,
    pub mentions: usize,
    /// Lowercased words, links excluded.
    pub words: Vec<String>,
    pub is_shouting: bool,
    pub questions: usize,
    pub exclamations: usize,
    /// Length in characters.
    pub length: usize,
}

pub fn analyze_message(body: &str) -> MessageFeatures {
    let links = URL_RE.find_iter(body).count();
    let without_links = URL_RE.replace_all(body, " ");
    let words = without_links
        .unicode_words()
        .map(|w| w.to_lowercase())
        .collect();

    let letters = body.chars().filter(|c| c.is_alphabetic()).count();
    let uppercase = body.chars().filter(|c| c.is_uppercase()).count();
    let is_shouting = letters > SHOUTING_MIN_LETTERS
        && uppercase as f64 > letters as f64 * SHOUTING_UPPERCASE_RATIO;

    MessageFeatures {
        emojis: EMOJI_RE.find_iter(body).count(),
        links,
        mentions: MENTION_RE.find_iter(body).count(),
        words,
        is_shouting,
        questions: body.matches('?').count(),
        exclamations: body.matches('!').count(),
        length: body.chars().count(),
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 10_000.0 / total as f64).round() / 100.0
}

/// Running totals for one user.
#[derive(Debug, Default)]
struct ContentAccumulator {
    messages: u64,
    words: u64,
    chars: u64,
    emojis: u64,
    links: u64,
    mentions: u64,
    questions: u64,
    exclamations: u64,
    messages_with_emoji: u64,
    messages_with_question: u64,
    messages_with_exclamation: u64,
    shouting_messages: u64,
    longest: u64,
    shortest: Option<u64>,
    seen_words: HashSet<String>,
    /// Distinct words in first-seen order.
    vocabulary: Vec<String>,
}

impl ContentAccumulator {
    fn add(&mut self, features: MessageFeatures) {
        let length = features.length as u64;
        self.messages += 1;
        self.words += features.words.len() as u64;
        self.chars += length;
        self.emojis += features.emojis as u64;
        self.links += features.links as u64;
        self.mentions += features.mentions as u64;
        self.questions += features.questions as u64;
        self.exclamations += features.exclamations as u64;
        self.messages_with_emoji += (features.emojis > 0) as u64;
        self.messages_with_question += (features.questions > 0) as u64;
        self.messages_with_exclamation += (features.exclamations > 0) as u64;
        self.shouting_messages += features.is_shouting as u64;
        self.longest = self.longest.max(length);
        self.shortest = Some(self.shortest.map_or(length, |s| s.min(length)));

        for word in features.words {
            if self.seen_words.insert(word.clone()) {
                self.vocabulary.push(word);
            }
        }
    }

    fn finish(self, username: &str, updated_at: DateTime<Utc>) -> (ContentStats, Vec<String>) {
        let average = if self.messages == 0 {
            0.0
        } else {
            ((self.chars as f64 / self.messages as f64) * 100.0).round() / 100.0
        };
        let stats = ContentStats {
            username: username.to_string(),
            total_messages: self.messages,
            total_words: self.words,
            emoji_percentage: percentage(self.messages_with_emoji, self.messages),
            caps_percentage: percentage(self.shouting_messages, self.messages),
            question_percentage: percentage(self.messages_with_question, self.messages),
            exclamation_percentage: percentage(self.messages_with_exclamation, self.messages),
            total_emojis: self.emojis,
            total_links: self.links,
            total_mentions: self.mentions,
            total_questions: self.questions,
            total_exclamations: self.exclamations,
            shouting_messages: self.shouting_messages,
            longest_message_length: self.longest,
            shortest_message_length: self.shortest.unwrap_or(0),
            average_message_length: average,
            vocabulary_size: self.vocabulary.len() as u64,
            updated_at,
        };
        (stats, self.vocabulary)
    }
}

pub struct MessageContentJob {
    batch_size: usize,
    vocabulary_limit: usize,
}

impl MessageContentJob {
    pub fn new(batch_size: usize, vocabulary_limit: usize) -> Self {
        Self {
            batch_size,
            vocabulary_limit,
        }
    }
}

impl Default for MessageContentJob {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_VOCABULARY_LIMIT)
    }
}

impl BatchJob for MessageContentJob {
    fn id(&self) -> &'static str {
        "message_content"
    }

    fn name(&self) -> &'static str {
        "Message Content Analyzer"
    }

    fn description(&self) -> &'static str {
        "Recompute per-user text statistics and vocabulary from the full message history"
    }

    fn execute(&self, ctx: &JobContext) -> Result<usize, JobError> {
        let now = ctx.clock.now();

        let outcome = process_batch(
            &ctx.chat_store,
            "SELECT DISTINCT username FROM messages ORDER BY username",
            &[],
            self.batch_size,
            ctx.batch_throttle,
            |row| row.get::<_, String>(0),
            |tx, username| {
                let mut accumulator = ContentAccumulator::default();
                {
                    let mut stmt = tx.prepare_cached(
                        "SELECT body FROM messages WHERE username = ?1 ORDER BY timestamp, id",
                    )?;
                    let mut rows = stmt.query([username])?;
                    while let Some(row) = rows.next()? {
                        let body: String = row.get(0)?;
                        accumulator.add(analyze_message(&body));
                    }
                }
                if accumulator.messages == 0 {
                    return Ok(());
                }

                let (stats, vocabulary) = accumulator.finish(username, now);
                tx.execute(
                    "INSERT INTO message_analysis_cache
                     (username, total_messages, total_words, emoji_percentage, caps_percentage,
                      question_percentage, exclamation_percentage, total_emojis, total_links,
                      total_mentions, total_questions, total_exclamations, shouting_messages,
                      longest_message_length, shortest_message_length, average_message_length,
                      vocabulary_size, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                     ON CONFLICT(username) DO UPDATE SET
                        total_messages = excluded.total_messages,
                        total_words = excluded.total_words,
                        emoji_percentage = excluded.emoji_percentage,
                        caps_percentage = excluded.caps_percentage,
                        question_percentage = excluded.question_percentage,
                        exclamation_percentage = excluded.exclamation_percentage,
                        total_emojis = excluded.total_emojis,
                        total_links = excluded.total_links,
                        total_mentions = excluded.total_mentions,
                        total_questions = excluded.total_questions,
                        total_exclamations = excluded.total_exclamations,
                        shouting_messages = excluded.shouting_messages,
                        longest_message_length = excluded.longest_message_length,
                        shortest_message_length = excluded.shortest_message_length,
                        average_message_length = excluded.average_message_length,
                        vocabulary_size = excluded.vocabulary_size,
                        updated_at = excluded.updated_at",
                    params![
                        stats.username,
                        stats.total_messages as i64,
                        stats.total_words as i64,
                        stats.emoji_percentage,
                        stats.caps_percentage,
                        stats.question_percentage,
                        stats.exclamation_percentage,
                        stats.total_emojis as i64,
                        stats.total_links as i64,
                        stats.total_mentions as i64,
                        stats.total_questions as i64,
                        stats.total_exclamations as i64,
                        stats.shouting_messages as i64,
                        stats.longest_message_length as i64,
                        stats.shortest_message_length as i64,
                        stats.average_message_length,
                        stats.vocabulary_size as i64,
                        SqliteChatStore::format_datetime(&stats.updated_at),
                    ],
                )?;

                tx.execute(
                    "DELETE FROM user_vocabulary WHERE username = ?1",
                    [username],
                )?;
                let mut insert_word = tx.prepare_cached(
                    "INSERT INTO user_vocabulary (username, word) VALUES (?1, ?2)",
                )?;
                for word in vocabulary.iter().take(self.vocabulary_limit) {
                    insert_word.execute(params![username, word])?;
                }
                Ok(())
            },
        )?;

        info!(
            "Analyzed message content for {} users in {} transactions",
            outcome.total_processed, outcome.transactions
        );
        Ok(outcome.total_processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::jobs::test_support::{utc, TestEnv};

    #[test]
    fn test_analyze_counts_features() {
        let features =
            analyze_message("Hey @bob, did you see https://example.com/clip?t=10 ?? 😂😂 wow!");
        assert_eq!(features.emojis, 2);
        assert_eq!(features.links, 1);
        assert_eq!(features.mentions, 1);
        assert_eq!(features.questions, 3);
        assert_eq!(features.exclamations, 1);
        assert!(!features.is_shouting);
        assert_eq!(
            features.words,
            vec!["hey", "bob", "did", "you", "see", "wow"]
        );
    }

    #[test]
    fn test_shouting_requires_enough_letters_and_uppercase() {
        assert!(analyze_message("THIS IS AMAZING").is_shouting);
        assert!(analyze_message("WHAT A GoAL").is_shouting);
        assert!(!analyze_message("LOL OK").is_shouting);
        assert!(!analyze_message("OMG!!!").is_shouting);
        assert!(!analyze_message("This Is Not Shouting").is_shouting);
    }

    #[test]
    fn test_length_is_in_characters() {
        assert_eq!(analyze_message("héllo").length, 5);
        assert_eq!(analyze_message("").length, 0);
    }

    #[test]
    fn test_accumulator_aggregates() {
        let mut acc = ContentAccumulator::default();
        acc.add(analyze_message("Hello world!"));
        acc.add(analyze_message("hello again?"));
        acc.add(analyze_message("GOODBYE WORLD"));
        acc.add(analyze_message("🎉"));

        let (stats, vocabulary) = acc.finish("alice", utc(2024, 1, 1, 0, 0));
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.total_words, 6);
        assert_eq!(stats.shouting_messages, 1);
        assert_eq!(stats.caps_percentage, 25.0);
        assert_eq!(stats.question_percentage, 25.0);
        assert_eq!(stats.exclamation_percentage, 25.0);
        assert_eq!(stats.emoji_percentage, 25.0);
        assert_eq!(stats.longest_message_length, 13);
        assert_eq!(stats.shortest_message_length, 1);
        assert_eq!(stats.average_message_length, 9.5);
        assert_eq!(vocabulary, vec!["hello", "world", "again", "goodbye"]);
        assert_eq!(stats.vocabulary_size, 4);
    }

    #[test]
    fn test_job_persists_stats_and_capped_vocabulary() {
        let env = TestEnv::new(utc(2024, 2, 1, 12, 0), 0);
        env.say("alice", "one two three", utc(2024, 1, 1, 10, 0));
        env.say("alice", "four five one", utc(2024, 1, 2, 10, 0));
        env.say("bob", "hi", utc(2024, 1, 2, 11, 0));

        let processed = MessageContentJob::new(1, 3).execute(&env.ctx).unwrap();
        assert_eq!(processed, 2);

        let alice = env.store.get_content_stats("alice").unwrap().unwrap();
        assert_eq!(alice.total_messages, 2);
        assert_eq!(alice.total_words, 6);
        assert_eq!(alice.vocabulary_size, 5);
        assert_eq!(alice.updated_at, utc(2024, 2, 1, 12, 0));
        assert_eq!(
            env.store.get_vocabulary("alice").unwrap(),
            vec!["one", "two", "three"]
        );

        let bob = env.store.get_content_stats("bob").unwrap().unwrap();
        assert_eq!(bob.total_messages, 1);
    }

    #[test]
    fn test_rerun_replaces_vocabulary() {
        let env = TestEnv::new(utc(2024, 2, 1, 12, 0), 0);
        env.say("alice", "alpha", utc(2024, 1, 1, 10, 0));
        MessageContentJob::default().execute(&env.ctx).unwrap();

        env.say("alice", "beta", utc(2024, 1, 1, 11, 0));
        MessageContentJob::default().execute(&env.ctx).unwrap();

        assert_eq!(
            env.store.get_vocabulary("alice").unwrap(),
            vec!["alpha", "beta"]
        );
        let alice = env.store.get_content_stats("alice").unwrap().unwrap();
        assert_eq!(alice.total_messages, 2);
    }
}
