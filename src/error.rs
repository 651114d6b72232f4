//! Error types surfaced by the quiz core
//!
//! Two families exist. [`UserError`] is reported straight back to whoever
//! triggered the action and never changes state. [`PersistenceFailure`] is a
//! degraded-mode condition: gameplay continues and only the operator hears
//! about it.

use serde::Serialize;
use thiserror::Error;

use crate::ids::QuizId;

/// Recoverable errors caused by the acting participant or operator
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    /// There is no quiz running in this conversation
    #[error("no active quiz in this conversation")]
    NoActiveQuiz,
    /// The quiz has already finished
    #[error("the quiz has already finished")]
    QuizFinished,
    /// The participant already answered the current question
    #[error("you already answered this question")]
    AlreadyAnswered,
    /// The selected option does not exist on the current question
    #[error("option {option} does not exist, the question has {count} options")]
    InvalidOption {
        /// The option that was selected
        option: usize,
        /// How many options the current question has
        count: usize,
    },
    /// A quiz is already running in this conversation
    #[error("a quiz is already running in this conversation")]
    AlreadyActive,
    /// No quiz with the given id exists
    #[error("quiz {0} not found")]
    UnknownQuiz(QuizId),
    /// The quiz being created is malformed
    #[error("invalid quiz: {0}")]
    InvalidQuiz(String),
    /// The actor is not allowed to run operator commands
    #[error("only operators can control quizzes")]
    NotOperator,
}

/// A durable write or read of persisted state failed
#[derive(Error, Debug)]
pub enum PersistenceFailure {
    /// The backing store could not be read or written
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
    /// The snapshot could not be encoded or decoded
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
