//! Identifiers used throughout the quiz system
//!
//! Conversations, participants and operators come from the outer transport
//! and are opaque to the core, so they are modelled as string newtypes.
//! Quiz identifiers are generated here and are meant to be typed back by an
//! operator, so they combine the creation time with a short octal suffix.

use std::{convert::Infallible, fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            derive_more::Display,
            derive_more::From,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Returns the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// The conversation a quiz session runs in (one session at a time)
    ConversationId
);

opaque_id!(
    /// A participant answering questions
    ParticipantId
);

opaque_id!(
    /// An operator controlling quizzes
    OperatorId
);

/// Upper bound (exclusive) of the random suffix, three octal digits
const SUFFIX_LIMIT: u16 = 0o1_000;

/// A unique identifier for a stored quiz
///
/// Generated identifiers look like `quiz_20241012_143022_017`: the creation
/// time followed by a three digit octal suffix so that two quizzes created
/// within the same second do not collide. Any other non-empty string is
/// accepted when parsing, which lets hand-written quiz files pick readable
/// identifiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuizId(String);

impl QuizId {
    /// Creates a new identifier for a quiz created at `created_at`
    pub fn generate(created_at: DateTime<Utc>) -> Self {
        Self(format!(
            "quiz_{}_{:03o}",
            created_at.format("%Y%m%d_%H%M%S"),
            fastrand::u16(0..SUFFIX_LIMIT)
        ))
    }

    /// Appends a counter, for when every random suffix of a second is taken
    ///
    /// `quiz_20241012_143022_017` becomes `quiz_20241012_143022_017_64`.
    pub fn numbered(&self, counter: usize) -> Self {
        Self(format!("{}_{counter}", self.0))
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for QuizId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned when parsing an empty quiz identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("quiz id cannot be empty")]
pub struct EmptyQuizId;

impl FromStr for QuizId {
    type Err = EmptyQuizId;

    /// Parses a quiz id, trimming surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns [`EmptyQuizId`] if nothing is left after trimming.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            Err(EmptyQuizId)
        } else {
            Ok(Self(trimmed.to_owned()))
        }
    }
}

impl TryFrom<String> for QuizId {
    type Error = EmptyQuizId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QuizId> for String {
    fn from(value: QuizId) -> Self {
        value.0
    }
}

impl FromStr for ConversationId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_quiz_id_generate_format() {
        let created_at = Utc.with_ymd_and_hms(2024, 10, 12, 14, 30, 22).unwrap();
        let id = QuizId::generate(created_at);

        assert!(id.as_str().starts_with("quiz_20241012_143022_"));
        let suffix = id.as_str().rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 3);
        assert!(u16::from_str_radix(suffix, 8).is_ok());
    }

    #[test]
    fn test_quiz_id_numbered() {
        let id: QuizId = "quiz_20241012_143022_017".parse().unwrap();
        assert_eq!(id.numbered(64).as_str(), "quiz_20241012_143022_017_64");
    }

    #[test]
    fn test_quiz_id_from_str_trims() {
        let id: QuizId = "  sample_russian_basics \n".parse().unwrap();
        assert_eq!(id.as_str(), "sample_russian_basics");
    }

    #[test]
    fn test_quiz_id_from_str_empty() {
        assert_eq!("   ".parse::<QuizId>(), Err(EmptyQuizId));
    }

    #[test]
    fn test_quiz_id_serde_as_string() {
        let id: QuizId = "quiz_1".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"quiz_1\"");

        let parsed: QuizId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        assert!(serde_json::from_str::<QuizId>("\"\"").is_err());
    }

    #[test]
    fn test_opaque_ids_are_transparent() {
        let participant = ParticipantId::from(12_345_i64);
        assert_eq!(participant.as_str(), "12345");
        assert_eq!(serde_json::to_string(&participant).unwrap(), "\"12345\"");

        let conversation: ConversationId = "-1001234567890".parse().unwrap();
        assert_eq!(conversation.to_string(), "-1001234567890");

        let operator = OperatorId::from(String::from("admin"));
        assert_eq!(operator, OperatorId::from("admin"));
    }
}
