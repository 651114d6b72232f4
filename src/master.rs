//! Quiz orchestration
//!
//! [`QuizMaster`] receives every [`UserAction`] and drives sessions through
//! their rounds. Round transitions come from two places, an expiring
//! [`RoundTimer`] and an operator override, and both go through the
//! session's index-guarded [`QuizSession::advance`] while holding that
//! session's lock. Whichever arrives first closes the round; the other one
//! finds a different index and does nothing.
//!
//! When the last round closes the session commits its scores to the
//! ledger, posts the results and leaves the session table, still under its
//! own lock, so no answer can slip in between.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::Utc;
use rustrict::CensorStr;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    action::{OperatorCommand, Query, Reply, UserAction},
    bank::{Question, QuestionBank, QuizDraft},
    channel::{MessageChannel, Notice, NoRoster, Roster},
    config::Config,
    constants,
    error::UserError,
    ids::{ConversationId, OperatorId, ParticipantId, QuizId},
    ledger::ScoreLedger,
    results::{self, QuizResults},
    session::{Advance, QuizSession},
    store::JsonFile,
    table::{SessionTable, SharedSession},
    timer::RoundTimer,
};

/// Routes quiz actions and owns every running session
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct QuizMaster {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QuizMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizMaster")
            .field("sessions", &self.inner.sessions.len())
            .field("bank", &self.inner.bank)
            .field("ledger", &self.inner.ledger)
            .finish_non_exhaustive()
    }
}

struct Inner {
    config: Config,
    bank: QuestionBank,
    ledger: ScoreLedger,
    sessions: SessionTable,
    channel: Arc<dyn MessageChannel>,
    roster: Arc<dyn Roster>,
}

/// What closed a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Operator,
}

impl QuizMaster {
    /// Creates an orchestrator over already loaded state
    ///
    /// # Arguments
    ///
    /// * `config` - Validated runtime settings
    /// * `bank` - Stored quizzes
    /// * `ledger` - Cumulative scores
    /// * `channel` - Where questions, notices and results are posted
    /// * `roster` - Optional source of display names
    pub fn new(
        config: Config,
        bank: QuestionBank,
        ledger: ScoreLedger,
        channel: Arc<dyn MessageChannel>,
        roster: Arc<dyn Roster>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                bank,
                ledger,
                sessions: SessionTable::default(),
                channel,
                roster,
            }),
        }
    }

    /// Loads the bank and ledger from the files named in `config`
    ///
    /// Missing or corrupt files start empty; nothing here fails.
    pub async fn open(config: Config, channel: Arc<dyn MessageChannel>) -> Self {
        let bank = QuestionBank::load(Arc::new(JsonFile::new(&config.bank_path))).await;
        let ledger = ScoreLedger::load(Arc::new(JsonFile::new(&config.ledger_path))).await;
        Self::new(config, bank, ledger, channel, Arc::new(NoRoster))
    }

    /// Handles one inbound action and tells the actor what happened
    ///
    /// # Errors
    ///
    /// Returns a [`UserError`] when the action was rejected. Rejected
    /// actions never change any state.
    #[instrument(skip_all, fields(conversation = %action.conversation()))]
    pub async fn handle(&self, action: UserAction) -> Result<Reply, UserError> {
        let result = match action {
            UserAction::Answer {
                conversation,
                participant,
                display_name,
                option,
            } => {
                self.submit_answer(&conversation, participant, &display_name, option)
                    .await
            }
            UserAction::Command {
                conversation,
                operator,
                command,
            } => match command {
                OperatorCommand::CreateQuiz { title, questions } => {
                    self.create_quiz(&operator, title, questions).await
                }
                OperatorCommand::Start { quiz } => {
                    self.start(&conversation, &operator, &quiz).await
                }
                OperatorCommand::ForceAdvance { from_question } => {
                    self.force_advance(&conversation, &operator, from_question)
                        .await
                }
                OperatorCommand::ForceFinish => self.force_finish(&conversation, &operator).await,
            },
            UserAction::Query {
                participant, query, ..
            } => Ok(self.query(&participant, query)),
        };

        if let Err(e) = &result {
            debug!(error = %e, "action rejected");
        }
        result
    }

    /// Records an answer for the open question in `conversation`
    ///
    /// # Errors
    ///
    /// * [`UserError::NoActiveQuiz`] - nothing is running in the conversation
    /// * [`UserError::QuizFinished`] - the quiz finished but is still wrapping up
    /// * [`UserError::AlreadyAnswered`] - the participant already answered this round
    /// * [`UserError::InvalidOption`] - the option does not exist
    pub async fn submit_answer(
        &self,
        conversation: &ConversationId,
        participant: ParticipantId,
        display_name: &str,
        option: usize,
    ) -> Result<Reply, UserError> {
        let shared = self
            .inner
            .sessions
            .get(conversation)
            .ok_or(UserError::NoActiveQuiz)?;

        let display_name = self.inner.display_name(&participant, display_name);
        let accepted = {
            let mut session = shared.lock().await;
            session.submit_answer(participant.clone(), &display_name, option, Utc::now())?
        };
        debug!(%participant, index = accepted.index, correct = accepted.correct, "answer accepted");

        if self.inner.config.announce_answers {
            let notice = Notice::AnswerRecorded {
                display_name,
                index: accepted.index,
                correct: accepted.correct,
            };
            self.inner
                .channel
                .render_system_notice(conversation, &notice)
                .await;
        }

        Ok(Reply::Answered {
            index: accepted.index,
            correct: accepted.correct,
        })
    }

    /// Validates and stores a new quiz
    ///
    /// A quiz that cannot be written to disk stays usable until restart and
    /// the operator is told.
    ///
    /// # Errors
    ///
    /// [`UserError::NotOperator`] or [`UserError::InvalidQuiz`].
    pub async fn create_quiz(
        &self,
        operator: &OperatorId,
        title: String,
        questions: Vec<Question>,
    ) -> Result<Reply, UserError> {
        self.inner.ensure_operator(operator)?;

        let quiz = self.inner.bank.create(
            QuizDraft::new(title, questions),
            operator.clone(),
            Utc::now(),
        )?;

        if let Err(e) = self.inner.bank.persist().await {
            warn!(quiz = %quiz.id, error = %e, "failed to persist question bank");
            let notice = Notice::QuizNotSaved {
                quiz: quiz.id.clone(),
                reason: e.to_string(),
            };
            self.inner.channel.notify_operator(operator, &notice).await;
        }

        Ok(Reply::QuizCreated(quiz.id.clone()))
    }

    /// Starts a stored quiz in `conversation`
    ///
    /// # Errors
    ///
    /// * [`UserError::NotOperator`] - the actor is not an operator
    /// * [`UserError::UnknownQuiz`] - no such quiz
    /// * [`UserError::AlreadyActive`] - a quiz is already running here
    pub async fn start(
        &self,
        conversation: &ConversationId,
        operator: &OperatorId,
        quiz: &QuizId,
    ) -> Result<Reply, UserError> {
        self.inner.ensure_operator(operator)?;
        let quiz = self.inner.bank.get(quiz)?;

        let shared = Arc::new(tokio::sync::Mutex::new(QuizSession::new(
            conversation.clone(),
            Arc::clone(&quiz),
            operator.clone(),
            Utc::now(),
        )));
        let mut session = shared.lock().await;
        self.inner.sessions.try_insert(
            conversation.clone(),
            Arc::clone(&shared),
            session.round_cursor(),
        )?;

        info!(quiz = %quiz.id, %operator, questions = quiz.len(), "quiz started");
        let notice = Notice::QuizStarted {
            title: quiz.title.clone(),
            question_count: quiz.len(),
            round_duration: self.inner.config.round_duration,
        };
        self.inner
            .channel
            .render_system_notice(conversation, &notice)
            .await;
        self.inner.open_round(&shared, &mut session).await;

        Ok(Reply::Started {
            quiz: quiz.id.clone(),
            question_count: quiz.len(),
        })
    }

    /// Closes the open round early
    ///
    /// With `from_question` the override only closes that round, so an
    /// override racing the round's timer never skips two questions.
    /// Without it the override closes the round that was open when the call
    /// arrived, read before waiting for the session. An override arriving
    /// together with the round's expiry counts as aimed at the expired
    /// round and does nothing.
    ///
    /// # Errors
    ///
    /// * [`UserError::NotOperator`] - the actor is not an operator
    /// * [`UserError::NoActiveQuiz`] - nothing is running here
    /// * [`UserError::QuizFinished`] - the quiz already finished
    pub async fn force_advance(
        &self,
        conversation: &ConversationId,
        operator: &OperatorId,
        from_question: Option<usize>,
    ) -> Result<Reply, UserError> {
        let arrived = Instant::now();
        self.inner.ensure_operator(operator)?;
        let (shared, seen) = self
            .inner
            .sessions
            .get_with_round(conversation)
            .ok_or(UserError::NoActiveQuiz)?;

        let mut session = shared.lock().await;
        if !session.is_active() {
            return Err(UserError::QuizFinished);
        }
        let expected = from_question.unwrap_or_else(|| {
            session.override_target(seen, arrived, constants::round::OVERRIDE_GRACE)
        });

        let reply = self
            .inner
            .close_round(&shared, &mut session, expected, Trigger::Operator)
            .await;
        Ok(reply)
    }

    /// Ends the quiz now, skipping every remaining question
    ///
    /// # Errors
    ///
    /// * [`UserError::NotOperator`] - the actor is not an operator
    /// * [`UserError::NoActiveQuiz`] - nothing is running here
    /// * [`UserError::QuizFinished`] - the quiz already finished
    pub async fn force_finish(
        &self,
        conversation: &ConversationId,
        operator: &OperatorId,
    ) -> Result<Reply, UserError> {
        self.inner.ensure_operator(operator)?;
        let shared = self
            .inner
            .sessions
            .get(conversation)
            .ok_or(UserError::NoActiveQuiz)?;

        let mut session = shared.lock().await;
        let index = session.current_index();
        if !session.force_finish() {
            return Err(UserError::QuizFinished);
        }

        info!(%operator, index, "quiz stopped by operator");
        self.inner
            .channel
            .render_system_notice(conversation, &Notice::Stopped { index })
            .await;
        self.inner.finish(&shared, &mut session).await;

        Ok(Reply::Finished)
    }

    /// Answers a read-only request
    pub fn query(&self, participant: &ParticipantId, query: Query) -> Reply {
        let config = &self.inner.config;
        let text = match query {
            Query::Leaderboard => {
                results::leaderboard_text(&self.inner.ledger.top(config.leaderboard_limit))
            }
            Query::MyStats => results::stats_text(
                self.inner.ledger.entry(participant).as_ref(),
                config.recent_history,
            ),
            Query::ListQuizzes => results::quiz_list_text(&self.inner.bank.list()),
        };
        Reply::Text(text)
    }

    /// The quiz currently running in `conversation`
    pub fn session(&self, conversation: &ConversationId) -> Option<SharedSession> {
        self.inner.sessions.get(conversation)
    }

    /// Stored quizzes
    pub fn bank(&self) -> &QuestionBank {
        &self.inner.bank
    }

    /// Cumulative scores
    pub fn ledger(&self) -> &ScoreLedger {
        &self.inner.ledger
    }

    /// Settings in use
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    fn ensure_operator(&self, operator: &OperatorId) -> Result<(), UserError> {
        if self.config.is_operator(operator) {
            Ok(())
        } else {
            warn!(%operator, "operator command from non-operator");
            Err(UserError::NotOperator)
        }
    }

    fn display_name(&self, participant: &ParticipantId, carried: &str) -> String {
        let name = self
            .roster
            .display_name(participant)
            .unwrap_or_else(|| carried.to_owned());
        let name = rustrict::trim_whitespace(&name);

        if name.is_empty() || name.is_inappropriate() {
            participant.to_string()
        } else {
            name.chars()
                .take(constants::display::MAX_NAME_LENGTH)
                .collect()
        }
    }

    /// Posts the open question and arms its timer
    async fn open_round(self: &Arc<Self>, shared: &SharedSession, session: &mut QuizSession) {
        let index = session.current_index();
        let total = session.quiz().len();
        let Some(question) = session.current_question() else {
            return;
        };

        let message = self
            .channel
            .render_question(
                session.conversation(),
                question,
                index,
                total,
                self.config.round_duration,
            )
            .await;
        if message.is_none() {
            warn!(conversation = %session.conversation(), index, "question was not delivered");
        }
        session.set_question_message(message);

        let inner = Arc::downgrade(self);
        let target = Arc::downgrade(shared);
        session.arm_timer(RoundTimer::arm(
            index,
            self.config.round_duration,
            move || async move {
                if let (Some(inner), Some(target)) = (inner.upgrade(), target.upgrade()) {
                    inner.expire_round(target, index).await;
                }
            },
        ));
        debug!(conversation = %session.conversation(), index, "round opened");
    }

    /// Timer callback for the round at `index`
    fn expire_round(
        self: Arc<Self>,
        shared: SharedSession,
        index: usize,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut session = shared.lock().await;
            self.close_round(&shared, &mut session, index, Trigger::Timer)
                .await;
        })
    }

    /// Closes the round at `expected` if it is still open, then opens the
    /// next one or finishes the quiz
    async fn close_round(
        self: &Arc<Self>,
        shared: &SharedSession,
        session: &mut QuizSession,
        expected: usize,
        trigger: Trigger,
    ) -> Reply {
        let conversation = session.conversation().clone();
        let next = match session.advance(expected) {
            Advance::Stale => {
                debug!(%conversation, expected, ?trigger, "round already closed");
                return Reply::AlreadyAdvanced;
            }
            Advance::Next(index) => Some(index),
            Advance::Finished => None,
        };

        if trigger == Trigger::Timer {
            session.record_expiry(expected, Instant::now());
        }
        info!(%conversation, index = expected, ?trigger, "round closed");
        let notice = match trigger {
            Trigger::Timer => Notice::TimeUp { index: expected },
            Trigger::Operator => Notice::Skipped { index: expected },
        };
        self.channel
            .render_system_notice(&conversation, &notice)
            .await;

        if let Some(index) = next {
            self.open_round(shared, session).await;
            Reply::Advanced { index }
        } else {
            self.finish(shared, session).await;
            Reply::Finished
        }
    }

    /// Commits scores, posts results and retires a finished session
    async fn finish(&self, shared: &SharedSession, session: &mut QuizSession) {
        let conversation = session.conversation().clone();
        let quiz = Arc::clone(session.quiz());
        let scores = session.final_scores();
        let results = QuizResults::from_session(session, self.config.results_limit);
        let finished_at = session.finished_at().unwrap_or_else(Utc::now);

        if let Err(e) = self
            .ledger
            .commit(&quiz.id, quiz.len(), &scores, finished_at)
            .await
        {
            let notice = Notice::ScoresNotSaved {
                quiz: quiz.id.clone(),
                reason: e.to_string(),
            };
            self.channel
                .notify_operator(session.started_by(), &notice)
                .await;
        }

        self.channel.render_results(&conversation, &results).await;
        self.sessions.remove(&conversation, shared);
        info!(%conversation, quiz = %quiz.id, participants = scores.len(), "quiz finished");
    }
}
