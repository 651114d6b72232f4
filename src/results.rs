//! Final results, rankings and the text shown for them
//!
//! Everything here is a pure function of a finished session or of ledger
//! records. Display names pass through the profanity censor before they are
//! rendered.

use std::{cmp::Reverse, fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rustrict::CensorStr;
use serde::Serialize;

use crate::{
    TruncatedVec,
    bank::Quiz,
    ids::{ParticipantId, QuizId},
    ledger::LedgerEntry,
    session::{Participant, QuizSession},
};

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];

fn place(position: usize) -> String {
    MEDALS
        .get(position)
        .map_or_else(|| format!("{}.", position + 1), |medal| (*medal).to_owned())
}

/// One row of the final ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedParticipant {
    /// Who
    pub participant: ParticipantId,
    /// Name as shown during the quiz
    pub display_name: String,
    /// Correct answers
    pub score: u64,
}

/// Aggregate numbers for a finished quiz
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Number of questions in the quiz
    pub question_count: usize,
    /// Number of participants who answered at least once
    pub participant_count: usize,
    /// Mean score over participants, `None` without participants
    pub average_score: Option<f64>,
}

/// How one question went
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionReview {
    /// Zero-based question index
    pub index: usize,
    /// Answers received while the question was open
    pub answered: usize,
    /// How many of those were correct
    pub correct: usize,
}

/// Everything shown when a quiz finishes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizResults {
    /// The quiz that was played
    pub quiz: QuizId,
    /// Its title
    pub title: String,
    /// Best participants first, truncated for display
    pub ranking: TruncatedVec<RankedParticipant>,
    /// Aggregate numbers
    pub summary: Summary,
    /// Per-question answer counts
    pub review: Vec<QuestionReview>,
}

/// Orders participants for the final ranking
///
/// Higher scores come first. Equal scores are ordered by the earliest
/// correct answer, then by the earliest answer of any kind, then by id, so
/// the order is total and repeatable.
pub fn rank<'a, I>(participants: I) -> Vec<(&'a ParticipantId, &'a Participant)>
where
    I: IntoIterator<Item = (&'a ParticipantId, &'a Participant)>,
{
    participants
        .into_iter()
        .sorted_by_key(|(id, participant)| {
            (
                Reverse(participant.score),
                participant.first_correct(),
                participant.first_answer(),
                *id,
            )
        })
        .collect()
}

impl QuizResults {
    /// Builds the results of a session
    ///
    /// # Arguments
    ///
    /// * `session` - The session, normally finished
    /// * `limit` - How many ranking rows to keep for display
    pub fn from_session(session: &QuizSession, limit: usize) -> Self {
        let quiz = session.quiz();
        let participants = session.participants();

        let ranked = rank(participants);
        let ranking = TruncatedVec::new(
            ranked.into_iter().map(|(id, participant)| RankedParticipant {
                participant: id.clone(),
                display_name: participant.display_name.clone(),
                score: participant.score,
            }),
            limit,
            participants.len(),
        );

        let average_score = (!participants.is_empty()).then(|| {
            participants.values().map(|p| p.score).sum::<u64>() as f64 / participants.len() as f64
        });

        let review = (0..quiz.len())
            .map(|index| {
                let records = participants
                    .values()
                    .filter_map(|p| p.answers.get(&index))
                    .collect_vec();
                QuestionReview {
                    index,
                    answered: records.len(),
                    correct: records.iter().filter(|record| record.correct).count(),
                }
            })
            .collect();

        Self {
            quiz: quiz.id.clone(),
            title: quiz.title.clone(),
            ranking,
            summary: Summary {
                question_count: quiz.len(),
                participant_count: participants.len(),
                average_score,
            },
            review,
        }
    }
}

impl Display for QuizResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Summary {
            question_count,
            participant_count,
            average_score,
        } = &self.summary;

        writeln!(f, "🏁 Quiz finished: {}", self.title)?;
        writeln!(
            f,
            "📝 {}, 👥 {}",
            pluralizer::pluralize("question", *question_count as isize, true),
            pluralizer::pluralize("participant", *participant_count as isize, true),
        )?;

        if self.ranking.items().is_empty() {
            return write!(f, "\nNobody answered this time.");
        }

        writeln!(f)?;
        for (position, row) in self.ranking.items().iter().enumerate() {
            writeln!(
                f,
                "{} {}: {}/{question_count}",
                place(position),
                row.display_name.censor(),
                row.score
            )?;
        }
        let hidden = self.ranking.hidden_count();
        if hidden > 0 {
            writeln!(f, "...and {hidden} more")?;
        }

        writeln!(f)?;
        for review in &self.review {
            writeln!(
                f,
                "Q{}: {}/{} correct",
                review.index + 1,
                review.correct,
                review.answered
            )?;
        }

        if let Some(average) = average_score {
            write!(f, "\n📊 Average score: {average:.1}/{question_count}")?;
        }
        Ok(())
    }
}

/// Text of the global leaderboard
pub fn leaderboard_text(top: &[(ParticipantId, LedgerEntry)]) -> String {
    if top.is_empty() {
        return "🏆 No scores yet. Take a quiz to get on the board!".to_owned();
    }

    let rows = top
        .iter()
        .enumerate()
        .map(|(position, (_, entry))| {
            format!(
                "{} {}: {} ({})",
                place(position),
                entry.display_name.censor(),
                pluralizer::pluralize("point", entry.total_score as isize, true),
                pluralizer::pluralize("quiz", entry.total_quizzes as isize, true),
            )
        })
        .join("\n");

    format!("🏆 Global leaderboard\n\n{rows}")
}

/// Text of a participant's personal statistics
///
/// # Arguments
///
/// * `entry` - The participant's ledger record, `None` if they never played
/// * `recent` - How many of the latest quizzes to list
pub fn stats_text(entry: Option<&LedgerEntry>, recent: usize) -> String {
    let Some(entry) = entry else {
        return "📊 You haven't taken any quizzes yet.".to_owned();
    };

    let mut text = format!(
        "📊 Quiz stats for {}\nTotal score: {}\nQuizzes taken: {}",
        entry.display_name.censor(),
        entry.total_score,
        entry.total_quizzes
    );
    if let Some(average) = entry.average_score() {
        text.push_str(&format!("\nAverage score: {average:.1}"));
    }

    let history = entry.recent(recent);
    if !history.is_empty() {
        text.push_str("\n\nRecent quizzes:");
        for item in history.iter().rev() {
            text.push_str(&format!(
                "\n• {}: {}/{} ({})",
                item.quiz_id,
                item.score,
                item.question_count,
                format_day(item.timestamp)
            ));
        }
    }
    text
}

fn format_day(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

/// Text listing every available quiz
pub fn quiz_list_text(quizzes: &[Arc<Quiz>]) -> String {
    if quizzes.is_empty() {
        return "📚 No quizzes available yet.".to_owned();
    }

    let rows = quizzes
        .iter()
        .map(|quiz| {
            format!(
                "• {} ({}): {}",
                quiz.title,
                quiz.id,
                pluralizer::pluralize("question", quiz.len() as isize, true)
            )
        })
        .join("\n");

    format!("📚 Available quizzes\n\n{rows}")
}
