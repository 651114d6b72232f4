//! Cross-quiz score ledger
//!
//! The ledger keeps every participant's cumulative score and the history of
//! quizzes they took part in. It is loaded once at startup and written out
//! in full after each finished quiz.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{error, info, warn};

use crate::{
    error::PersistenceFailure,
    ids::{ParticipantId, QuizId},
    store::{self, Store},
};

/// How many times a commit tries to write the snapshot
const COMMIT_ATTEMPTS: usize = 2;

/// One finished quiz in a participant's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The quiz that was played
    pub quiz_id: QuizId,
    /// Correct answers in that quiz
    pub score: u64,
    /// Number of questions the quiz had
    pub question_count: usize,
    /// When the quiz finished
    pub timestamp: DateTime<Utc>,
}

/// Cumulative record for one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Most recent display name seen for the participant
    pub display_name: String,
    /// Sum of all quiz scores
    pub total_score: u64,
    /// Number of quizzes taken part in
    pub total_quizzes: u64,
    /// Finished quizzes, oldest first
    pub history: Vec<HistoryEntry>,
}

impl LedgerEntry {
    fn new(display_name: String) -> Self {
        Self {
            display_name,
            total_score: 0,
            total_quizzes: 0,
            history: Vec::new(),
        }
    }

    /// Average score per quiz, `None` before the first quiz
    pub fn average_score(&self) -> Option<f64> {
        (self.total_quizzes > 0).then(|| self.total_score as f64 / self.total_quizzes as f64)
    }

    /// The last `count` history entries, oldest first
    pub fn recent(&self, count: usize) -> &[HistoryEntry] {
        &self.history[self.history.len().saturating_sub(count)..]
    }
}

/// A participant's score from one finished quiz, ready to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalScore {
    /// Who scored
    pub participant: ParticipantId,
    /// Name shown for them during the quiz
    pub display_name: String,
    /// Correct answers
    pub score: u64,
}

/// Serialization helper for [`Standings`]
///
/// Entries are read as an ordered list of pairs so that the order in which
/// participants first entered the ledger survives a reload.
#[serde_with::serde_as]
#[derive(Deserialize)]
#[serde(transparent)]
struct StandingsSerde(#[serde_as(as = "serde_with::Map<_, _>")] Vec<(ParticipantId, LedgerEntry)>);

/// In-memory snapshot of the ledger
///
/// Entries are kept in insertion order, which is the tie-breaker when two
/// participants have the same total.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(from = "StandingsSerde")]
pub struct Standings {
    entries: Vec<(ParticipantId, LedgerEntry)>,
    positions: HashMap<ParticipantId, usize>,
}

impl From<StandingsSerde> for Standings {
    /// Rebuilds the position index, keeping the last record of a repeated id
    fn from(serde: StandingsSerde) -> Self {
        let mut standings = Standings::default();
        for (participant, entry) in serde.0 {
            match standings.positions.get(&participant) {
                Some(&position) => standings.entries[position].1 = entry,
                None => {
                    standings
                        .positions
                        .insert(participant.clone(), standings.entries.len());
                    standings.entries.push((participant, entry));
                }
            }
        }
        standings
    }
}

impl Serialize for Standings {
    /// Serializes as a flat map from participant id to entry
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.entries.iter().map(|(id, entry)| (id, entry)))
    }
}

impl Standings {
    /// Looks up a participant's record
    pub fn entry(&self, participant: &ParticipantId) -> Option<&LedgerEntry> {
        self.positions
            .get(participant)
            .map(|&position| &self.entries[position].1)
    }

    /// Number of participants in the ledger
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no participants
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `n` best participants by total score
    ///
    /// Ties keep insertion order, so whoever entered the ledger first
    /// ranks higher.
    pub fn top(&self, n: usize) -> Vec<(ParticipantId, LedgerEntry)> {
        self.entries
            .iter()
            .sorted_by(|(_, a), (_, b)| b.total_score.cmp(&a.total_score))
            .take(n)
            .cloned()
            .collect()
    }

    /// Adds one finished quiz to every listed participant
    pub fn merge(
        &mut self,
        quiz_id: &QuizId,
        question_count: usize,
        scores: &[FinalScore],
        timestamp: DateTime<Utc>,
    ) {
        for final_score in scores {
            let position = match self.positions.get(&final_score.participant) {
                Some(&position) => position,
                None => {
                    let position = self.entries.len();
                    self.positions
                        .insert(final_score.participant.clone(), position);
                    self.entries.push((
                        final_score.participant.clone(),
                        LedgerEntry::new(final_score.display_name.clone()),
                    ));
                    position
                }
            };

            let entry = &mut self.entries[position].1;
            entry.display_name.clone_from(&final_score.display_name);
            entry.total_score += final_score.score;
            entry.total_quizzes += 1;
            entry.history.push(HistoryEntry {
                quiz_id: quiz_id.clone(),
                score: final_score.score,
                question_count,
                timestamp,
            });
        }
    }
}

/// Durable score ledger shared by every session
pub struct ScoreLedger {
    standings: RwLock<Standings>,
    store: Arc<dyn Store>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ScoreLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreLedger")
            .field("participants", &self.read().len())
            .finish_non_exhaustive()
    }
}

impl ScoreLedger {
    /// Loads the ledger from `store`
    ///
    /// A missing or corrupt store produces an empty ledger. The failure is
    /// logged and gameplay continues.
    pub async fn load(store: Arc<dyn Store>) -> Self {
        let standings: Standings = store::load_or_default(store.as_ref(), "score ledger").await;
        info!(participants = standings.len(), "score ledger loaded");

        Self {
            standings: RwLock::new(standings),
            store,
            commit_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Merges a finished quiz into the ledger and persists it
    ///
    /// Commits are serialized. The in-memory merge always happens; a failed
    /// write is retried once and then reported, without reverting the merge.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceFailure`] if the snapshot could not be written
    /// after the retry.
    pub async fn commit(
        &self,
        quiz_id: &QuizId,
        question_count: usize,
        scores: &[FinalScore],
        timestamp: DateTime<Utc>,
    ) -> Result<(), PersistenceFailure> {
        let _guard = self.commit_lock.lock().await;

        if scores.is_empty() {
            info!(quiz = %quiz_id, "nothing to commit, quiz had no participants");
            return Ok(());
        }

        let snapshot = {
            let mut standings = self.write();
            standings.merge(quiz_id, question_count, scores, timestamp);
            standings.clone()
        };

        let mut attempt = 1;
        loop {
            match store::save(self.store.as_ref(), &snapshot).await {
                Ok(()) => {
                    info!(quiz = %quiz_id, participants = scores.len(), "scores committed");
                    return Ok(());
                }
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    warn!(
                        quiz = %quiz_id,
                        attempt,
                        error = %e,
                        "failed to persist scores, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    error!(quiz = %quiz_id, error = %e, "failed to persist scores");
                    return Err(e);
                }
            }
        }
    }

    /// The `n` best participants, see [`Standings::top`]
    pub fn top(&self, n: usize) -> Vec<(ParticipantId, LedgerEntry)> {
        self.read().top(n)
    }

    /// A participant's record
    pub fn entry(&self, participant: &ParticipantId) -> Option<LedgerEntry> {
        self.read().entry(participant).cloned()
    }

    /// Number of participants in the ledger
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Standings> {
        self.standings
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Standings> {
        self.standings
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn score(participant: &str, name: &str, score: u64) -> FinalScore {
        FinalScore {
            participant: ParticipantId::from(participant),
            display_name: name.to_owned(),
            score,
        }
    }

    fn quiz(id: &str) -> QuizId {
        id.parse().unwrap()
    }

    #[test]
    fn test_merge_accumulates() {
        let mut standings = Standings::default();
        let now = Utc::now();

        standings.merge(&quiz("q1"), 3, &[score("p1", "Ana", 2)], now);
        standings.merge(&quiz("q2"), 5, &[score("p1", "Ana K", 4)], now);

        let entry = standings.entry(&ParticipantId::from("p1")).unwrap();
        assert_eq!(entry.total_score, 6);
        assert_eq!(entry.total_quizzes, 2);
        assert_eq!(entry.display_name, "Ana K");
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[1].question_count, 5);
        assert_eq!(entry.average_score(), Some(3.0));
    }

    #[test]
    fn test_top_ties_keep_insertion_order() {
        let mut standings = Standings::default();
        let now = Utc::now();

        standings.merge(
            &quiz("q1"),
            3,
            &[score("first", "First", 2), score("second", "Second", 2), score("third", "Third", 3)],
            now,
        );

        let top = standings.top(10);
        let order = top.iter().map(|(id, _)| id.as_str()).collect_vec();
        assert_eq!(order, vec!["third", "first", "second"]);

        assert_eq!(standings.top(1).len(), 1);
    }

    #[test]
    fn test_recent_history() {
        let mut standings = Standings::default();
        for i in 0..7 {
            standings.merge(&quiz(&format!("q{i}")), 3, &[score("p1", "Ana", 1)], Utc::now());
        }

        let entry = standings.entry(&ParticipantId::from("p1")).unwrap();
        let recent = entry.recent(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].quiz_id, quiz("q2"));
        assert_eq!(recent[4].quiz_id, quiz("q6"));
    }

    #[tokio::test]
    async fn test_commit_then_load_round_trip() {
        let store = MemoryStore::default();
        let ledger = ScoreLedger::load(Arc::new(store.clone())).await;

        ledger
            .commit(&quiz("q1"), 3, &[score("p1", "Ana", 1), score("p2", "Budi", 1)], Utc::now())
            .await
            .unwrap();
        ledger
            .commit(&quiz("q2"), 4, &[score("p2", "Budi", 3)], Utc::now())
            .await
            .unwrap();

        let reloaded = ScoreLedger::load(Arc::new(store)).await;
        for participant in ["p1", "p2"] {
            let id = ParticipantId::from(participant);
            let before = ledger.entry(&id).unwrap();
            let after = reloaded.entry(&id).unwrap();
            assert_eq!(before.total_score, after.total_score);
            assert_eq!(before.history.len(), after.history.len());
            assert_eq!(before, after);
        }
        assert_eq!(ledger.top(10), reloaded.top(10));
    }

    #[tokio::test]
    async fn test_persisted_shape() {
        let store = MemoryStore::default();
        let ledger = ScoreLedger::load(Arc::new(store.clone())).await;
        ledger
            .commit(&quiz("q1"), 3, &[score("p1", "Ana", 1)], Utc::now())
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_slice(&store.snapshot().unwrap()).unwrap();
        let entry = &json["p1"];
        assert_eq!(entry["display_name"], "Ana");
        assert_eq!(entry["total_score"], 1);
        assert_eq!(entry["total_quizzes"], 1);
        assert_eq!(entry["history"][0]["quiz_id"], "q1");
        assert_eq!(entry["history"][0]["question_count"], 3);
        assert!(entry["history"][0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_load_corrupt_store_is_empty() {
        let ledger = ScoreLedger::load(Arc::new(MemoryStore::with_snapshot("[1, 2"))).await;
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_commit_retries_once() {
        let store = MemoryStore::default();
        store.fail_next_writes(1, std::io::ErrorKind::Other);
        let ledger = ScoreLedger::load(Arc::new(store.clone())).await;

        ledger
            .commit(&quiz("q1"), 3, &[score("p1", "Ana", 2)], Utc::now())
            .await
            .unwrap();

        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_memory_state() {
        let store = MemoryStore::default();
        store.fail_next_writes(2, std::io::ErrorKind::Other);
        let ledger = ScoreLedger::load(Arc::new(store.clone())).await;

        let result = ledger
            .commit(&quiz("q1"), 3, &[score("p1", "Ana", 2)], Utc::now())
            .await;

        assert!(matches!(result, Err(PersistenceFailure::Io(_))));
        assert_eq!(store.writes(), 0);
        assert_eq!(ledger.entry(&ParticipantId::from("p1")).unwrap().total_score, 2);
    }

    #[tokio::test]
    async fn test_commit_without_scores_skips_write() {
        let store = MemoryStore::default();
        let ledger = ScoreLedger::load(Arc::new(store.clone())).await;

        ledger.commit(&quiz("q1"), 3, &[], Utc::now()).await.unwrap();
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_deserialize_repeated_id_keeps_last() {
        let json = r#"{
            "p1": {"display_name": "Old", "total_score": 1, "total_quizzes": 1, "history": []},
            "p2": {"display_name": "Budi", "total_score": 1, "total_quizzes": 1, "history": []},
            "p1": {"display_name": "New", "total_score": 2, "total_quizzes": 2, "history": []}
        }"#;
        let standings: Standings = serde_json::from_str(json).unwrap();

        assert_eq!(standings.len(), 2);
        assert_eq!(standings.entry(&ParticipantId::from("p1")).unwrap().display_name, "New");
        assert_eq!(standings.top(2)[0].0, ParticipantId::from("p1"));
    }
}
