//! Quiz session state machine
//!
//! A [`QuizSession`] is the in-progress run of one quiz in one conversation.
//! It moves through `Active(0)`, `Active(1)`, ... and ends in `Finished`.
//! Every transition goes through [`QuizSession::advance`], which is tagged
//! with the question index the caller expects to close: a caller that lost
//! the race (a timer firing after an operator already moved on, or a second
//! override) sees a different index and changes nothing.
//!
//! The session itself never awaits. Callers hold its lock while deciding
//! and applying a transition, so the check and the mutation form one step.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    bank::{Question, Quiz},
    channel::MessageRef,
    error::UserError,
    ids::{ConversationId, OperatorId, ParticipantId},
    ledger::FinalScore,
    timer::RoundTimer,
};

/// Whether the session still accepts answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// A question is open
    Active,
    /// Every question has been closed
    Finished,
}

/// One accepted answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerRecord {
    /// The selected option
    pub option: usize,
    /// Whether it was the correct option
    pub correct: bool,
    /// When it was accepted
    pub answered_at: DateTime<Utc>,
    /// Position among all answers accepted by the session
    pub sequence: u64,
}

/// A participant's progress in the running quiz
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    /// Name shown in results
    pub display_name: String,
    /// Correct answers so far
    pub score: u64,
    /// Accepted answers keyed by question index
    pub answers: BTreeMap<usize, AnswerRecord>,
}

impl Participant {
    fn new(display_name: String) -> Self {
        Self {
            display_name,
            score: 0,
            answers: BTreeMap::new(),
        }
    }

    /// Time and sequence of the earliest correct answer
    pub fn first_correct(&self) -> Option<(DateTime<Utc>, u64)> {
        self.answers
            .values()
            .filter(|record| record.correct)
            .map(|record| (record.answered_at, record.sequence))
            .min()
    }

    /// Time and sequence of the earliest answer of any kind
    pub fn first_answer(&self) -> Option<(DateTime<Utc>, u64)> {
        self.answers
            .values()
            .map(|record| (record.answered_at, record.sequence))
            .min()
    }
}

/// A successfully recorded answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Accepted {
    /// The question index the answer was scored against
    pub index: usize,
    /// Whether the answer was correct
    pub correct: bool,
}

/// Outcome of [`QuizSession::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The round had already been closed through another path, or the
    /// session is finished; nothing changed
    Stale,
    /// The next question, at this index, is now open
    Next(usize),
    /// The last question was closed and the session is finished
    Finished,
}

/// The running quiz in one conversation
pub struct QuizSession {
    conversation: ConversationId,
    quiz: Arc<Quiz>,
    current_index: usize,
    participants: HashMap<ParticipantId, Participant>,
    answered_this_round: HashSet<ParticipantId>,
    timer: Option<RoundTimer>,
    status: Status,
    started_by: OperatorId,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    question_message: Option<MessageRef>,
    next_sequence: u64,
    round: Arc<AtomicUsize>,
    last_expiry: Option<(usize, Instant)>,
}

impl Debug for QuizSession {
    /// Avoids printing every participant and answer
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizSession")
            .field("conversation", &self.conversation)
            .field("quiz", &self.quiz.id)
            .field("current_index", &self.current_index)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl QuizSession {
    /// Creates a session positioned on the first question
    ///
    /// Rendering the question and arming its timer is left to the caller.
    ///
    /// # Arguments
    ///
    /// * `conversation` - Where the quiz runs
    /// * `quiz` - The quiz being played, shared and never modified
    /// * `started_by` - The operator who started it
    /// * `started_at` - Start time, used for duration reporting
    pub fn new(
        conversation: ConversationId,
        quiz: Arc<Quiz>,
        started_by: OperatorId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation,
            quiz,
            current_index: 0,
            participants: HashMap::new(),
            answered_this_round: HashSet::new(),
            timer: None,
            status: Status::Active,
            started_by,
            started_at,
            finished_at: None,
            question_message: None,
            next_sequence: 0,
            round: Arc::new(AtomicUsize::new(0)),
            last_expiry: None,
        }
    }

    /// Records an answer for the current question
    ///
    /// The answer is scored against whichever question is open right now,
    /// even if the participant was looking at an earlier one. Answering
    /// never closes the round.
    ///
    /// # Errors
    ///
    /// * [`UserError::QuizFinished`] - the session is finished
    /// * [`UserError::AlreadyAnswered`] - the participant already answered this round
    /// * [`UserError::InvalidOption`] - `option` is not an option of the current question
    pub fn submit_answer(
        &mut self,
        participant: ParticipantId,
        display_name: &str,
        option: usize,
        answered_at: DateTime<Utc>,
    ) -> Result<Accepted, UserError> {
        let Some(question) = self.current_question().filter(|_| self.is_active()) else {
            return Err(UserError::QuizFinished);
        };

        if self.answered_this_round.contains(&participant) {
            return Err(UserError::AlreadyAnswered);
        }

        let count = question.options.len();
        if option >= count {
            return Err(UserError::InvalidOption { option, count });
        }

        let index = self.current_index;
        let correct = question.is_correct(option);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let entry = self
            .participants
            .entry(participant.clone())
            .or_insert_with(|| Participant::new(display_name.to_owned()));
        display_name.clone_into(&mut entry.display_name);
        entry.answers.insert(
            index,
            AnswerRecord {
                option,
                correct,
                answered_at,
                sequence,
            },
        );
        if correct {
            entry.score += 1;
        }
        self.answered_this_round.insert(participant);

        Ok(Accepted { index, correct })
    }

    /// Closes the round at `expected` and opens the next one
    ///
    /// Does nothing unless the session is active and `expected` is the
    /// current question index. On success any live timer is cancelled,
    /// the per-round answer set is cleared and the index moves forward.
    pub fn advance(&mut self, expected: usize) -> Advance {
        if !self.is_active() || self.current_index != expected {
            debug!(
                conversation = %self.conversation,
                expected,
                current = self.current_index,
                "stale advance ignored"
            );
            return Advance::Stale;
        }

        self.cancel_timer();
        self.answered_this_round.clear();
        self.current_index += 1;
        self.round.store(self.current_index, Ordering::Release);

        if self.current_index >= self.quiz.len() {
            self.status = Status::Finished;
            self.finished_at = Some(Utc::now());
            Advance::Finished
        } else {
            Advance::Next(self.current_index)
        }
    }

    /// Closes every remaining round at once
    ///
    /// Returns `false` and changes nothing if the session already finished.
    pub fn force_finish(&mut self) -> bool {
        loop {
            match self.advance(self.current_index) {
                Advance::Next(_) => {}
                Advance::Finished => return true,
                Advance::Stale => return false,
            }
        }
    }

    /// A live view of the current index that can be read without the
    /// session's lock
    pub fn round_cursor(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.round)
    }

    /// Notes that the round at `index` was closed by its timer at `at`
    pub fn record_expiry(&mut self, index: usize, at: Instant) {
        self.last_expiry = Some((index, at));
    }

    /// The round an override without an explicit index should close
    ///
    /// `seen` is the index that was open when the override arrived. An
    /// override arriving within `grace` of the timer closing the round
    /// before `seen` was aimed at that expired round, so it targets it and
    /// [`QuizSession::advance`] turns it into a no-op.
    pub fn override_target(&self, seen: usize, arrived: Instant, grace: Duration) -> usize {
        match self.last_expiry {
            Some((index, expired)) if index + 1 == seen => {
                let gap = arrived
                    .saturating_duration_since(expired)
                    .max(expired.saturating_duration_since(arrived));
                if gap <= grace { index } else { seen }
            }
            _ => seen,
        }
    }

    /// Installs the timer for the current round, cancelling any previous one
    pub fn arm_timer(&mut self, timer: RoundTimer) {
        if let Some(mut previous) = self.timer.replace(timer) {
            previous.cancel();
        }
    }

    /// Cancels the current round's timer, if any
    pub fn cancel_timer(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// The live timer, if one is armed
    pub fn timer(&self) -> Option<&RoundTimer> {
        self.timer.as_ref()
    }

    /// Remembers the transport's handle for the rendered question
    pub fn set_question_message(&mut self, message: Option<MessageRef>) {
        self.question_message = message;
    }

    /// The transport's handle for the last rendered question
    pub fn question_message(&self) -> Option<&MessageRef> {
        self.question_message.as_ref()
    }

    /// Final scores for every participant, in order of first answer
    pub fn final_scores(&self) -> Vec<FinalScore> {
        self.participants
            .iter()
            .sorted_by_key(|(id, participant)| (participant.first_answer(), (*id).clone()))
            .map(|(id, participant)| FinalScore {
                participant: id.clone(),
                display_name: participant.display_name.clone(),
                score: participant.score,
            })
            .collect()
    }

    /// Whether a question is open
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.status
    }

    /// Index of the open question; equals the question count once finished
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// The open question, `None` once finished
    pub fn current_question(&self) -> Option<&Question> {
        self.quiz.question(self.current_index)
    }

    /// The quiz being played
    pub fn quiz(&self) -> &Arc<Quiz> {
        &self.quiz
    }

    /// Where the quiz runs
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Everyone who answered at least once
    pub fn participants(&self) -> &HashMap<ParticipantId, Participant> {
        &self.participants
    }

    /// Whether `participant` already answered the open question
    pub fn has_answered(&self, participant: &ParticipantId) -> bool {
        self.answered_this_round.contains(participant)
    }

    /// The operator who started the quiz
    pub fn started_by(&self) -> &OperatorId {
        &self.started_by
    }

    /// When the quiz started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the quiz finished, if it has
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    use super::*;
    use crate::bank::tests::sample_questions;

    pub(crate) fn sample_quiz(count: usize) -> Arc<Quiz> {
        Arc::new(Quiz {
            id: "quiz_test".parse().unwrap(),
            title: "Test Quiz".to_owned(),
            questions: sample_questions(count),
            creator: OperatorId::from("op"),
            created_at: Utc::now(),
        })
    }

    pub(crate) fn sample_session(count: usize) -> QuizSession {
        QuizSession::new(
            ConversationId::from("c1"),
            sample_quiz(count),
            OperatorId::from("op"),
            Utc::now(),
        )
    }

    fn answer(
        session: &mut QuizSession,
        participant: &str,
        option: usize,
    ) -> Result<Accepted, UserError> {
        session.submit_answer(
            ParticipantId::from(participant),
            participant,
            option,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_session_is_active_at_zero() {
        let session = sample_session(3);
        assert!(session.is_active());
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.current_question().unwrap().prompt, "Question 1");
        assert!(session.participants().is_empty());
    }

    #[test]
    fn test_submit_answer_scores_correct() {
        let mut session = sample_session(3);

        let accepted = answer(&mut session, "p1", 0).unwrap();
        assert_eq!(
            accepted,
            Accepted {
                index: 0,
                correct: true
            }
        );

        let participant = &session.participants()[&ParticipantId::from("p1")];
        assert_eq!(participant.score, 1);
        assert_eq!(participant.answers.len(), 1);
        assert!(session.has_answered(&ParticipantId::from("p1")));
    }

    #[test]
    fn test_submit_answer_twice_is_rejected() {
        let mut session = sample_session(3);

        assert!(answer(&mut session, "p1", 1).is_ok());
        assert_eq!(answer(&mut session, "p1", 0), Err(UserError::AlreadyAnswered));

        let participant = &session.participants()[&ParticipantId::from("p1")];
        assert_eq!(participant.answers.len(), 1);
        assert_eq!(participant.score, 0);
    }

    #[test]
    fn test_submit_answer_invalid_option() {
        let mut session = sample_session(3);

        assert_eq!(
            answer(&mut session, "p1", 4),
            Err(UserError::InvalidOption {
                option: 4,
                count: 4
            })
        );
        assert!(session.participants().is_empty());
        assert!(answer(&mut session, "p1", 0).is_ok());
    }

    #[test]
    fn test_advance_clears_round_and_moves_forward() {
        let mut session = sample_session(3);
        answer(&mut session, "p1", 0).unwrap();

        assert_eq!(session.advance(0), Advance::Next(1));
        assert_eq!(session.current_index(), 1);
        assert!(!session.has_answered(&ParticipantId::from("p1")));

        let accepted = answer(&mut session, "p1", 1).unwrap();
        assert_eq!(
            accepted,
            Accepted {
                index: 1,
                correct: true
            }
        );
    }

    #[test]
    fn test_advance_with_stale_index_is_noop() {
        let mut session = sample_session(3);

        assert_eq!(session.advance(0), Advance::Next(1));
        assert_eq!(session.advance(0), Advance::Stale);
        assert_eq!(session.current_index(), 1);
        assert_eq!(session.advance(2), Advance::Stale);
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn test_round_cursor_follows_advance() {
        let mut session = sample_session(3);
        let cursor = session.round_cursor();
        assert_eq!(cursor.load(Ordering::Acquire), 0);

        session.advance(0);
        assert_eq!(cursor.load(Ordering::Acquire), 1);
        session.advance(0);
        assert_eq!(cursor.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_override_target_after_expiry() {
        let grace = Duration::from_secs(1);
        let expired = Instant::now();
        let mut session = sample_session(3);
        assert_eq!(session.override_target(0, expired, grace), 0);

        session.advance(0);
        session.record_expiry(0, expired);

        // Arrived together with the expiry: aimed at the closed round
        assert_eq!(session.override_target(1, expired, grace), 0);
        assert_eq!(session.advance(0), Advance::Stale);
        // Seen before the timer moved on
        assert_eq!(session.override_target(0, expired, grace), 0);
        // Well after the next round opened
        let later = expired + Duration::from_secs(10);
        assert_eq!(session.override_target(1, later, grace), 1);
    }

    #[test]
    fn test_advance_to_finished() {
        let mut session = sample_session(2);

        assert_eq!(session.advance(0), Advance::Next(1));
        assert_eq!(session.advance(1), Advance::Finished);
        assert_eq!(session.status(), Status::Finished);
        assert_eq!(session.current_index(), 2);
        assert!(session.current_question().is_none());
        assert!(session.finished_at().is_some());

        assert_eq!(session.advance(2), Advance::Stale);
        assert_eq!(session.current_index(), 2);
    }

    #[test]
    fn test_answer_after_finish_is_rejected() {
        let mut session = sample_session(1);
        assert_eq!(session.advance(0), Advance::Finished);

        assert_eq!(answer(&mut session, "p2", 0), Err(UserError::QuizFinished));
    }

    #[test]
    fn test_late_answer_scores_against_current_question() {
        let mut session = sample_session(3);
        session.advance(0);

        // p2 meant question 1 (correct option 0) but question 2 is open now
        let accepted = answer(&mut session, "p2", 0).unwrap();
        assert_eq!(
            accepted,
            Accepted {
                index: 1,
                correct: false
            }
        );
    }

    #[test]
    fn test_force_finish() {
        let mut session = sample_session(5);
        session.advance(0);

        assert!(session.force_finish());
        assert_eq!(session.status(), Status::Finished);
        assert_eq!(session.current_index(), 5);

        assert!(!session.force_finish());
        assert_eq!(session.current_index(), 5);
    }

    #[test]
    fn test_index_never_decreases() {
        let mut session = sample_session(4);
        let mut last = session.current_index();

        for expected in [0, 0, 1, 0, 3, 2, 1, 2, 3, 3] {
            session.advance(expected);
            assert!(session.current_index() >= last);
            last = session.current_index();
        }
        assert_eq!(session.status(), Status::Finished);
    }

    #[test]
    fn test_final_scores_order_by_first_answer() {
        let mut session = sample_session(2);
        answer(&mut session, "first", 1).unwrap();
        answer(&mut session, "second", 0).unwrap();
        session.force_finish();

        let scores = session.final_scores();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].participant, ParticipantId::from("first"));
        assert_eq!(scores[0].score, 0);
        assert_eq!(scores[1].score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_cancels_live_timer() {
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let mut session = sample_session(3);

        session.arm_timer(RoundTimer::arm(0, Duration::from_secs(60), move || async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert_eq!(session.timer().unwrap().index(), 0);

        session.advance(0);
        assert!(session.timer().is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
