//! Runtime configuration
//!
//! Hard limits live in [`crate::constants`]; everything a deployment may
//! tune lives here. A [`Config`] is read from JSON, with every field
//! optional, and validated before use.

use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants, ids::OperatorId};

type ValidationResult = garde::Result;

fn validate_round_duration(val: &Duration) -> ValidationResult {
    let range = constants::round::MIN_DURATION..=constants::round::MAX_DURATION;
    if range.contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "round_duration is outside of the bounds [{},{}]",
            range.start(),
            range.end()
        )))
    }
}

/// Errors raised while loading a [`Config`]
#[derive(Error, Debug)]
pub enum Error {
    /// The file could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid configuration JSON
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(#[from] garde::Report),
}

/// Tunable settings of the quiz core
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// How long each question stays open
    #[garde(custom(|v, _| validate_round_duration(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub round_duration: Duration,
    /// Who may create, start, skip and stop quizzes
    #[garde(skip)]
    pub operators: BTreeSet<OperatorId>,
    /// Where stored quizzes are kept
    #[garde(skip)]
    pub bank_path: PathBuf,
    /// Where the score ledger is kept
    #[garde(skip)]
    pub ledger_path: PathBuf,
    /// Ranking rows shown in quiz results
    #[garde(range(min = 1, max = 100))]
    pub results_limit: usize,
    /// Rows shown in the global leaderboard
    #[garde(range(min = 1, max = 100))]
    pub leaderboard_limit: usize,
    /// Past quizzes listed in personal statistics
    #[garde(range(min = 1, max = 50))]
    pub recent_history: usize,
    /// Whether each accepted answer is announced in the conversation
    #[garde(skip)]
    pub announce_answers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(constants::round::DEFAULT_DURATION),
            operators: BTreeSet::new(),
            bank_path: PathBuf::from("data/quizzes.json"),
            ledger_path: PathBuf::from("data/quiz_scores.json"),
            results_limit: constants::display::RESULTS_LIMIT,
            leaderboard_limit: constants::display::LEADERBOARD_LIMIT,
            recent_history: constants::display::RECENT_HISTORY,
            announce_answers: true,
        }
    }
}

impl Config {
    /// Parses and validates configuration JSON
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed JSON and [`Error::Invalid`]
    /// for out of range values.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise the same
    /// errors as [`Config::from_json`].
    pub async fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Adds an operator to the allow-list
    #[must_use]
    pub fn with_operator(mut self, operator: impl Into<OperatorId>) -> Self {
        self.operators.insert(operator.into());
        self
    }

    /// Whether `operator` may run operator commands
    pub fn is_operator(&self, operator: &OperatorId) -> bool {
        self.operators.contains(operator)
    }
}
