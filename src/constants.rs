//! Configuration constants for the quiz system
//!
//! This module contains the limits and defaults used throughout the crate
//! to validate authored quizzes and runtime configuration, and to bound
//! how much text a rendered result may contain.

/// Quiz authoring constants
pub mod quiz {
    /// Maximum number of questions allowed in a single quiz
    pub const MAX_QUESTION_COUNT: usize = 100;
    /// Maximum length of a quiz title in bytes
    pub const MAX_TITLE_LENGTH: usize = 200;
}

/// Question authoring constants
pub mod question {
    /// Maximum length of a question prompt in bytes
    pub const MAX_PROMPT_LENGTH: usize = 500;
    /// Minimum number of options presented for a question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of options presented for a question
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of a single option in bytes
    pub const MAX_OPTION_LENGTH: usize = 200;
}

/// Round timing constants
pub mod round {
    use std::time::Duration;

    /// How close to a round's expiry an override without a question index
    /// still counts as aimed at the expired round
    pub const OVERRIDE_GRACE: Duration = Duration::from_secs(1);
    /// Default time in seconds a question stays open
    pub const DEFAULT_DURATION: u64 = 60;
    /// Minimum time limit in seconds for a round
    pub const MIN_DURATION: u64 = 5;
    /// Maximum time limit in seconds for a round
    pub const MAX_DURATION: u64 = 240;
}

/// Output limits
pub mod display {
    /// Number of ranked participants shown in quiz results
    pub const RESULTS_LIMIT: usize = 10;
    /// Number of entries shown in the global leaderboard
    pub const LEADERBOARD_LIMIT: usize = 10;
    /// Number of past quizzes shown in personal statistics
    pub const RECENT_HISTORY: usize = 5;
    /// Maximum length of a participant display name in characters
    pub const MAX_NAME_LENGTH: usize = 64;
}
