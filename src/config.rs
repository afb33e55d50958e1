//! Application-level configuration loading: room limits, timeouts, default
//! rules and the built-in deck catalogue.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    dao::models::{DeckEntity, QuestionEntity},
    state::{connectivity::LivenessPolicy, room::Rules, scheduler::DelayPolicy},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ROOM_BACK_CONFIG_PATH";

/// A deck and its questions, as seeded into the store at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckSeed {
    /// Deck header.
    pub deck: DeckEntity,
    /// Questions in display order.
    pub questions: Vec<QuestionEntity>,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Seats per room.
    pub max_participants: usize,
    /// Heartbeat age after which a participant shows as disconnected.
    pub connected_timeout_ms: i64,
    /// Heartbeat age after which a participant is removed.
    pub offline_grace_ms: i64,
    /// Lifetime granted to a room with active participants, renewed per mutation.
    pub room_ttl_ms: i64,
    /// Lifetime granted to a room nobody sits in.
    pub empty_room_ttl_ms: i64,
    /// Characters per join code.
    pub join_code_length: usize,
    /// Bounds for pending-action delays.
    pub pending_delay: DelayPolicy,
    /// Rules used when `create` does not override them.
    pub default_rules: Rules,
    /// Upper bound of a single mutation, storage included.
    pub mutation_timeout: Duration,
    /// Version conflicts tolerated before a write is reported as conflicting.
    pub max_write_retries: u32,
    /// Decks seeded into the store when it is installed.
    pub decks: Vec<DeckSeed>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        decks = app_config.decks.len(),
                        max_participants = app_config.max_participants,
                        "loaded room configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Liveness thresholds used by the connectivity monitor.
    pub fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy {
            connected_timeout_ms: self.connected_timeout_ms,
            offline_grace_ms: self.offline_grace_ms,
        }
    }

    /// Expiry to stamp on a room after a mutation, given how many seats are taken.
    pub fn expiry_for(&self, now: i64, active_participants: usize) -> i64 {
        if active_participants > 0 {
            now + self.room_ttl_ms
        } else {
            now + self.empty_room_ttl_ms
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    max_participants: usize,
    connected_timeout_ms: i64,
    offline_grace_ms: i64,
    room_ttl_ms: i64,
    empty_room_ttl_ms: i64,
    join_code_length: usize,
    pending_delay: RawDelay,
    default_rules: RawRules,
    mutation_timeout_ms: u64,
    max_write_retries: u32,
    decks: Option<Vec<RawDeck>>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            max_participants: 10,
            connected_timeout_ms: 30_000,
            offline_grace_ms: 120_000,
            room_ttl_ms: 6 * 60 * 60 * 1_000,
            empty_room_ttl_ms: 10 * 60 * 1_000,
            join_code_length: 6,
            pending_delay: RawDelay::default(),
            default_rules: RawRules::default(),
            mutation_timeout_ms: 5_000,
            max_write_retries: 3,
            decks: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let (min_ms, max_ms) = if value.pending_delay.min_ms <= value.pending_delay.max_ms {
            (value.pending_delay.min_ms, value.pending_delay.max_ms)
        } else {
            (value.pending_delay.max_ms, value.pending_delay.min_ms)
        };
        let decks = value
            .decks
            .map(|decks| decks.into_iter().map(Into::into).collect())
            .unwrap_or_else(default_decks);

        Self {
            max_participants: value.max_participants.max(1),
            connected_timeout_ms: value.connected_timeout_ms,
            offline_grace_ms: value.offline_grace_ms.max(value.connected_timeout_ms),
            room_ttl_ms: value.room_ttl_ms,
            empty_room_ttl_ms: value.empty_room_ttl_ms,
            join_code_length: value.join_code_length.clamp(4, 12),
            pending_delay: DelayPolicy {
                min_ms,
                max_ms,
                default_ms: value.pending_delay.default_ms.clamp(min_ms, max_ms),
            },
            default_rules: value.default_rules.into(),
            mutation_timeout: Duration::from_millis(value.mutation_timeout_ms),
            max_write_retries: value.max_write_retries,
            decks,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDelay {
    min_ms: i64,
    max_ms: i64,
    default_ms: i64,
}

impl Default for RawDelay {
    fn default() -> Self {
        let policy = DelayPolicy::default();
        Self {
            min_ms: policy.min_ms,
            max_ms: policy.max_ms,
            default_ms: policy.default_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRules {
    rounds: u32,
    read_seconds: u32,
    answer_seconds: u32,
    grace_seconds: u32,
    reveal_seconds: u32,
    leaderboard_seconds: u32,
}

impl Default for RawRules {
    fn default() -> Self {
        let rules = Rules::default();
        Self {
            rounds: rules.rounds,
            read_seconds: rules.read_seconds,
            answer_seconds: rules.answer_seconds,
            grace_seconds: rules.grace_seconds,
            reveal_seconds: rules.reveal_seconds,
            leaderboard_seconds: rules.leaderboard_seconds,
        }
    }
}

impl From<RawRules> for Rules {
    fn from(value: RawRules) -> Self {
        Self {
            rounds: value.rounds.max(1),
            read_seconds: value.read_seconds,
            answer_seconds: value.answer_seconds.max(1),
            grace_seconds: value.grace_seconds,
            reveal_seconds: value.reveal_seconds,
            leaderboard_seconds: value.leaderboard_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a deck inside the configuration file.
struct RawDeck {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    id: String,
    prompt: String,
    choices: Vec<String>,
    correct_index: u32,
}

impl From<RawDeck> for DeckSeed {
    fn from(value: RawDeck) -> Self {
        let questions = value
            .questions
            .into_iter()
            .filter(|question| (question.correct_index as usize) < question.choices.len())
            .map(|question| QuestionEntity {
                id: question.id,
                deck_id: value.id.clone(),
                prompt: question.prompt,
                choices: question.choices,
                correct_index: question.correct_index,
            })
            .collect();

        Self {
            deck: DeckEntity {
                id: value.id,
                title: value.title,
                description: value.description,
            },
            questions,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in deck shipped with the binary.
fn default_decks() -> Vec<DeckSeed> {
    let questions: [(&str, &str, [&str; 4], u32); 6] = [
        (
            "q-largest-planet",
            "Which planet is the largest in the solar system?",
            ["Saturn", "Jupiter", "Neptune", "Earth"],
            1,
        ),
        (
            "q-water-boils",
            "At sea level, water boils at how many degrees Celsius?",
            ["90", "95", "100", "110"],
            2,
        ),
        (
            "q-primes",
            "Which of these numbers is prime?",
            ["21", "27", "33", "31"],
            3,
        ),
        (
            "q-octopus-hearts",
            "How many hearts does an octopus have?",
            ["Three", "One", "Two", "Four"],
            0,
        ),
        (
            "q-light-speed",
            "Roughly how long does sunlight take to reach Earth?",
            ["8 seconds", "8 minutes", "8 hours", "8 days"],
            1,
        ),
        (
            "q-rust-release",
            "In which year was Rust 1.0 released?",
            ["2010", "2012", "2015", "2018"],
            2,
        ),
    ];

    vec![DeckSeed {
        deck: DeckEntity {
            id: "general".into(),
            title: "General knowledge".into(),
            description: Some("A short warm-up deck".into()),
        },
        questions: questions
            .into_iter()
            .map(|(id, prompt, choices, correct_index)| QuestionEntity {
                id: id.into(),
                deck_id: "general".into(),
                prompt: prompt.into(),
                choices: choices.into_iter().map(Into::into).collect(),
                correct_index,
            })
            .collect(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.max_participants, 10);
        assert_eq!(config.connected_timeout_ms, 30_000);
        assert_eq!(config.offline_grace_ms, 120_000);
        assert_eq!(config.join_code_length, 6);
        assert_eq!(config.pending_delay, DelayPolicy::default());
        assert_eq!(config.mutation_timeout, Duration::from_secs(5));
        assert_eq!(config.decks.len(), 1);
        assert!(!config.decks[0].questions.is_empty());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "max_participants": 4,
                "pending_delay": { "min_ms": 9000, "max_ms": 1000 },
                "decks": [{
                    "id": "d",
                    "title": "Deck",
                    "questions": [
                        { "id": "a", "prompt": "?", "choices": ["x", "y"], "correct_index": 1 },
                        { "id": "b", "prompt": "?", "choices": ["x"], "correct_index": 3 }
                    ]
                }]
            }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.max_participants, 4);
        assert_eq!(config.offline_grace_ms, 120_000);
        assert_eq!(config.pending_delay.min_ms, 1_000);
        assert_eq!(config.pending_delay.max_ms, 9_000);
        assert_eq!(config.pending_delay.default_ms, 3_000);
        // Questions whose answer is out of range are dropped.
        assert_eq!(config.decks[0].questions.len(), 1);
        assert_eq!(config.decks[0].questions[0].deck_id, "d");
    }

    #[test]
    fn expiry_depends_on_occupancy() {
        let config = AppConfig::default();
        assert_eq!(config.expiry_for(0, 2), config.room_ttl_ms);
        assert_eq!(config.expiry_for(0, 0), config.empty_room_ttl_ms);
    }
}
