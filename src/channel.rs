//! Outbound messaging seam
//!
//! The quiz core never talks to a chat platform directly. Everything it wants
//! shown to a conversation or an operator goes through a [`MessageChannel`],
//! and display names can optionally be looked up through a [`Roster`].
//! Delivery is best effort: a dropped render leaves the core consistent.

use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    bank::Question,
    ids::{ConversationId, OperatorId, ParticipantId, QuizId},
    results::QuizResults,
};

/// Opaque handle to a message the transport posted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, derive_more::Display, derive_more::From)]
#[serde(transparent)]
pub struct MessageRef(String);

impl From<&str> for MessageRef {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Short system messages shown alongside questions and results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Notice {
    /// A quiz was started in the conversation
    QuizStarted {
        /// Quiz title
        title: String,
        /// Number of questions
        question_count: usize,
        /// Time allowed per question
        round_duration: Duration,
    },
    /// A participant's answer was recorded
    AnswerRecorded {
        /// Name of whoever answered
        display_name: String,
        /// Zero-based question index the answer counted for
        index: usize,
        /// Whether the answer was right
        correct: bool,
    },
    /// A round closed because its time ran out
    TimeUp {
        /// Zero-based index of the closed question
        index: usize,
    },
    /// An operator closed a round early
    Skipped {
        /// Zero-based index of the closed question
        index: usize,
    },
    /// An operator ended the quiz early
    Stopped {
        /// Zero-based index of the question that was open
        index: usize,
    },
    /// Final scores could not be written to disk
    ScoresNotSaved {
        /// The quiz whose scores are only kept in memory
        quiz: QuizId,
        /// What went wrong
        reason: String,
    },
    /// A newly created quiz could not be written to disk
    QuizNotSaved {
        /// The quiz that is only kept in memory
        quiz: QuizId,
        /// What went wrong
        reason: String,
    },
}

impl Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuizStarted {
                title,
                question_count,
                round_duration,
            } => write!(
                f,
                "🎯 Quiz started: {title}\n📝 {}\n⏱ {} per question",
                pluralizer::pluralize("question", *question_count as isize, true),
                pluralizer::pluralize("second", round_duration.as_secs() as isize, true),
            ),
            Self::AnswerRecorded {
                display_name,
                index,
                correct: true,
            } => write!(f, "✅ {display_name} answered question {} correctly", index + 1),
            Self::AnswerRecorded {
                display_name,
                index,
                correct: false,
            } => write!(f, "❌ {display_name} answered question {} incorrectly", index + 1),
            Self::TimeUp { index } => write!(f, "⏰ Time's up for question {}!", index + 1),
            Self::Skipped { index } => {
                write!(f, "⏭ Question {} was closed by the quiz master", index + 1)
            }
            Self::Stopped { index } => write!(
                f,
                "🛑 The quiz was ended by the quiz master at question {}",
                index + 1
            ),
            Self::ScoresNotSaved { quiz, reason } => write!(
                f,
                "⚠ Scores for {quiz} could not be saved ({reason}); they are kept until restart"
            ),
            Self::QuizNotSaved { quiz, reason } => write!(
                f,
                "⚠ Quiz {quiz} could not be saved ({reason}); it is available until restart"
            ),
        }
    }
}

/// Transport used to show quiz progress
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Posts a question with its options
    ///
    /// Returns a handle to the posted message, or `None` if it could not be
    /// delivered.
    ///
    /// # Arguments
    ///
    /// * `conversation` - Where to post
    /// * `question` - The question to show
    /// * `index` - Zero-based question index
    /// * `total` - Number of questions in the quiz
    /// * `round_duration` - How long the round stays open
    async fn render_question(
        &self,
        conversation: &ConversationId,
        question: &Question,
        index: usize,
        total: usize,
        round_duration: Duration,
    ) -> Option<MessageRef>;

    /// Posts the final results of a quiz
    async fn render_results(&self, conversation: &ConversationId, results: &QuizResults);

    /// Posts a short system message
    async fn render_system_notice(&self, conversation: &ConversationId, notice: &Notice);

    /// Tells an operator about something that went wrong
    async fn notify_operator(&self, operator: &OperatorId, notice: &Notice);
}

/// Source of participant display names
pub trait Roster: Send + Sync {
    /// The registered name of `participant`, if known
    fn display_name(&self, participant: &ParticipantId) -> Option<String>;
}

/// A roster that knows nobody
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoster;

impl Roster for NoRoster {
    fn display_name(&self, _participant: &ParticipantId) -> Option<String> {
        None
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    /// Everything a [`MockChannel`] was asked to show
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Sent {
        Question {
            conversation: ConversationId,
            index: usize,
            total: usize,
        },
        Results {
            conversation: ConversationId,
            results: QuizResults,
        },
        Notice {
            conversation: ConversationId,
            notice: Notice,
        },
        Operator {
            operator: OperatorId,
            notice: Notice,
        },
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockChannel {
        sent: Arc<Mutex<VecDeque<Sent>>>,
    }

    impl MockChannel {
        pub(crate) fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().iter().cloned().collect()
        }

        pub(crate) fn questions(&self, conversation: &ConversationId) -> Vec<usize> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Question {
                        conversation: c,
                        index,
                        ..
                    } if &c == conversation => Some(index),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn results(&self, conversation: &ConversationId) -> Vec<QuizResults> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Results {
                        conversation: c,
                        results,
                    } if &c == conversation => Some(results),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn notices(&self, conversation: &ConversationId) -> Vec<Notice> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Notice {
                        conversation: c,
                        notice,
                    } if &c == conversation => Some(notice),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn operator_notices(&self) -> Vec<Notice> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Operator { notice, .. } => Some(notice),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, sent: Sent) {
            self.sent.lock().unwrap().push_back(sent);
        }
    }

    #[async_trait]
    impl MessageChannel for MockChannel {
        async fn render_question(
            &self,
            conversation: &ConversationId,
            _question: &Question,
            index: usize,
            total: usize,
            _round_duration: Duration,
        ) -> Option<MessageRef> {
            self.push(Sent::Question {
                conversation: conversation.clone(),
                index,
                total,
            });
            Some(MessageRef::from(format!("{conversation}/{index}")))
        }

        async fn render_results(&self, conversation: &ConversationId, results: &QuizResults) {
            self.push(Sent::Results {
                conversation: conversation.clone(),
                results: results.clone(),
            });
        }

        async fn render_system_notice(&self, conversation: &ConversationId, notice: &Notice) {
            self.push(Sent::Notice {
                conversation: conversation.clone(),
                notice: notice.clone(),
            });
        }

        async fn notify_operator(&self, operator: &OperatorId, notice: &Notice) {
            self.push(Sent::Operator {
                operator: operator.clone(),
                notice: notice.clone(),
            });
        }
    }

    #[test]
    fn test_notice_text() {
        let started = Notice::QuizStarted {
            title: "Capitals".to_owned(),
            question_count: 3,
            round_duration: Duration::from_secs(60),
        };
        assert_eq!(
            started.to_string(),
            "🎯 Quiz started: Capitals\n📝 3 questions\n⏱ 60 seconds per question"
        );

        assert_eq!(
            Notice::TimeUp { index: 0 }.to_string(),
            "⏰ Time's up for question 1!"
        );
        assert_eq!(
            Notice::AnswerRecorded {
                display_name: "Ann".to_owned(),
                index: 1,
                correct: false
            }
            .to_string(),
            "❌ Ann answered question 2 incorrectly"
        );
    }

    #[test]
    fn test_no_roster() {
        assert_eq!(NoRoster.display_name(&ParticipantId::from("p1")), None);
    }
}
