//! Inbound events and the replies sent back to whoever caused them

use serde::{Deserialize, Serialize};

use crate::{
    bank::Question,
    ids::{ConversationId, OperatorId, ParticipantId, QuizId},
};

/// Something a participant or operator did in a conversation
#[derive(Debug, Clone, Deserialize)]
pub enum UserAction {
    /// A participant picked an option for the open question
    Answer {
        /// Where the quiz runs
        conversation: ConversationId,
        /// Who answered
        participant: ParticipantId,
        /// Name carried by the transport, used when the roster has none
        display_name: String,
        /// Zero-based option index
        option: usize,
    },
    /// An operator controls quizzes
    Command {
        /// Where the command was issued
        conversation: ConversationId,
        /// Who issued it
        operator: OperatorId,
        /// What to do
        command: OperatorCommand,
    },
    /// A participant asks for information
    Query {
        /// Where the question was asked
        conversation: ConversationId,
        /// Who asked
        participant: ParticipantId,
        /// What they want to see
        query: Query,
    },
}

impl UserAction {
    /// The conversation the action happened in
    pub fn conversation(&self) -> &ConversationId {
        match self {
            Self::Answer { conversation, .. }
            | Self::Command { conversation, .. }
            | Self::Query { conversation, .. } => conversation,
        }
    }
}

/// Operator-only commands
#[derive(Debug, Clone, Deserialize)]
pub enum OperatorCommand {
    /// Adds a quiz to the bank
    CreateQuiz {
        /// Quiz title
        title: String,
        /// Ordered questions
        questions: Vec<Question>,
    },
    /// Starts a stored quiz in the conversation
    Start {
        /// Which quiz
        quiz: QuizId,
    },
    /// Closes the open round early
    ForceAdvance {
        /// The question the operator was looking at; when given, the
        /// command does nothing if that round already closed
        #[serde(default)]
        from_question: Option<usize>,
    },
    /// Ends the quiz immediately
    ForceFinish,
}

/// Read-only requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Query {
    /// Global standings
    Leaderboard,
    /// The asker's own history
    MyStats,
    /// Every stored quiz
    ListQuizzes,
}

/// What the actor is told about their action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Reply {
    /// A quiz was stored
    QuizCreated(QuizId),
    /// The quiz is running and its first question was posted
    Started {
        /// Which quiz
        quiz: QuizId,
        /// How many questions it has
        question_count: usize,
    },
    /// The answer was recorded
    Answered {
        /// Zero-based question index the answer counted for
        index: usize,
        /// Whether it was right
        correct: bool,
    },
    /// The next question is open
    Advanced {
        /// Its zero-based index
        index: usize,
    },
    /// The quiz finished and results were posted
    Finished,
    /// The round the operator meant was already closed
    AlreadyAdvanced,
    /// Text to show the actor
    Text(String),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_answer() {
        let json = r#"{"Answer":{
            "conversation":"-100","participant":"42","display_name":"Ann","option":2
        }}"#;
        let action: UserAction = serde_json::from_str(json).unwrap();

        assert_eq!(action.conversation(), &ConversationId::from("-100"));
        assert!(matches!(
            action,
            UserAction::Answer { option: 2, ref display_name, .. } if display_name == "Ann"
        ));
    }

    #[test]
    fn test_deserialize_force_advance_without_index() {
        let command: OperatorCommand =
            serde_json::from_str(r#"{"ForceAdvance":{}}"#).unwrap();
        assert!(matches!(
            command,
            OperatorCommand::ForceAdvance {
                from_question: None
            }
        ));

        let command: OperatorCommand =
            serde_json::from_str(r#"{"ForceAdvance":{"from_question":3}}"#).unwrap();
        assert!(matches!(
            command,
            OperatorCommand::ForceAdvance {
                from_question: Some(3)
            }
        ));
    }

    #[test]
    fn test_deserialize_create_quiz() {
        let command: OperatorCommand = serde_json::from_str(
            r#"{"CreateQuiz":{"title":"Capitals","questions":[
                {"prompt":"Capital of France?","options":["Paris","Rome"],"correct_option_index":0}
            ]}}"#,
        )
        .unwrap();

        let OperatorCommand::CreateQuiz { title, questions } = command else {
            panic!("expected CreateQuiz");
        };
        assert_eq!(title, "Capitals");
        assert_eq!(questions[0].correct_option(), Some("Paris"));
    }

    #[test]
    fn test_deserialize_query() {
        let action: UserAction = serde_json::from_str(
            r#"{"Query":{"conversation":"c","participant":"p","query":"MyStats"}}"#,
        )
        .unwrap();
        assert!(matches!(action, UserAction::Query { query: Query::MyStats, .. }));
    }
}
