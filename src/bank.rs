//! Stored quizzes
//!
//! The question bank holds every quiz an operator has authored. A quiz is
//! immutable once stored: sessions share it through an [`Arc`] and never
//! write to it, so lookups only take a short read lock.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Utc};
use garde::Validate;
use itertools::Itertools;
use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{PersistenceFailure, UserError},
    ids::{OperatorId, QuizId},
    store::{self, Store},
};

/// Random ids tried before falling back to numbered ones
const RANDOM_ID_ATTEMPTS: usize = 64;

/// A single multiple choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The text asked to participants
    #[garde(length(min = 1, max = crate::constants::question::MAX_PROMPT_LENGTH))]
    pub prompt: String,
    /// Options presented to participants, in display order
    #[garde(
        length(
            min = crate::constants::question::MIN_OPTION_COUNT,
            max = crate::constants::question::MAX_OPTION_COUNT
        ),
        inner(length(min = 1, max = crate::constants::question::MAX_OPTION_LENGTH))
    )]
    pub options: Vec<String>,
    /// Index into `options` of the correct answer
    #[garde(skip)]
    pub correct_option_index: usize,
}

impl Question {
    /// Creates a question
    pub fn new<S: Into<String>>(
        prompt: impl Into<String>,
        options: impl IntoIterator<Item = S>,
        correct_option_index: usize,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            options: options.into_iter().map(Into::into).collect(),
            correct_option_index,
        }
    }

    /// Whether `option` is the correct answer
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct_option_index
    }

    /// The text of the correct option
    pub fn correct_option(&self) -> Option<&str> {
        self.options
            .get(self.correct_option_index)
            .map(String::as_str)
    }

    fn trimmed(self) -> Self {
        Self {
            prompt: rustrict::trim_whitespace(&self.prompt).to_owned(),
            options: self
                .options
                .iter()
                .map(|option| rustrict::trim_whitespace(option).to_owned())
                .collect(),
            correct_option_index: self.correct_option_index,
        }
    }
}

/// Operator input for a new quiz, validated before it is stored
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuizDraft {
    /// Title shown when the quiz starts and in listings
    #[garde(length(min = 1, max = crate::constants::quiz::MAX_TITLE_LENGTH))]
    pub title: String,
    /// Questions in the order they will be asked
    #[garde(length(min = 1, max = crate::constants::quiz::MAX_QUESTION_COUNT), dive)]
    pub questions: Vec<Question>,
}

impl QuizDraft {
    /// Creates a draft from a title and questions
    pub fn new(title: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            title: title.into(),
            questions,
        }
    }

    /// Normalizes whitespace and validates the draft
    ///
    /// # Errors
    ///
    /// Returns [`UserError::InvalidQuiz`] when the draft has no questions,
    /// a question has fewer than two options or an out of range correct
    /// option, any text is empty or too long, or the title is inappropriate.
    pub fn checked(self) -> Result<Self, UserError> {
        let draft = Self {
            title: rustrict::trim_whitespace(&self.title).to_owned(),
            questions: self.questions.into_iter().map(Question::trimmed).collect(),
        };

        draft
            .validate()
            .map_err(|report| UserError::InvalidQuiz(report.to_string()))?;

        if draft.title.is_inappropriate() {
            return Err(UserError::InvalidQuiz("title is inappropriate".to_owned()));
        }

        if let Some((index, question)) = draft
            .questions
            .iter()
            .find_position(|q| q.correct_option().is_none())
        {
            return Err(UserError::InvalidQuiz(format!(
                "question {} marks option {} as correct but only has {} options",
                index + 1,
                question.correct_option_index + 1,
                question.options.len()
            )));
        }

        Ok(draft)
    }
}

/// A stored quiz
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quiz {
    /// Identifier operators use to start the quiz
    pub id: QuizId,
    /// Title of the quiz
    pub title: String,
    /// Questions in the order they are asked
    pub questions: Vec<Question>,
    /// The operator who created it
    pub creator: OperatorId,
    /// When it was created
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    /// Number of questions in the quiz
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the quiz has no questions (never true for a stored quiz)
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// The question at `index`
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

/// Persisted form of a quiz, keyed by its id in [`BankSnapshot`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredQuiz {
    title: String,
    creator_id: OperatorId,
    created_at: DateTime<Utc>,
    questions: Vec<Question>,
}

/// Persisted form of the whole bank
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct BankSnapshot(BTreeMap<QuizId, StoredQuiz>);

/// All quizzes available to operators
pub struct QuestionBank {
    quizzes: RwLock<HashMap<QuizId, Arc<Quiz>>>,
    store: Arc<dyn Store>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for QuestionBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionBank")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl QuestionBank {
    /// Loads the bank from `store`
    ///
    /// A missing or unreadable store produces an empty bank; the failure is
    /// logged and never propagated.
    pub async fn load(store: Arc<dyn Store>) -> Self {
        let BankSnapshot(stored) = store::load_or_default(store.as_ref(), "question bank").await;

        let quizzes: HashMap<_, _> = stored
            .into_iter()
            .filter_map(|(id, quiz)| {
                let StoredQuiz {
                    title,
                    creator_id,
                    created_at,
                    questions,
                } = quiz;
                match (QuizDraft { title, questions }).checked() {
                    Ok(QuizDraft { title, questions }) => Some((
                        id.clone(),
                        Arc::new(Quiz {
                            id,
                            title,
                            questions,
                            creator: creator_id,
                            created_at,
                        }),
                    )),
                    Err(e) => {
                        warn!(quiz = %id, error = %e, "skipping invalid stored quiz");
                        None
                    }
                }
            })
            .collect();

        info!(count = quizzes.len(), "question bank loaded");

        Self {
            quizzes: RwLock::new(quizzes),
            store,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Validates and stores a new quiz under a freshly generated id
    ///
    /// The quiz is available immediately; call [`QuestionBank::persist`]
    /// to make it durable.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::InvalidQuiz`] if the draft is malformed.
    pub fn create(
        &self,
        draft: QuizDraft,
        creator: OperatorId,
        created_at: DateTime<Utc>,
    ) -> Result<Arc<Quiz>, UserError> {
        let QuizDraft { title, questions } = draft.checked()?;

        let mut quizzes = self.write();
        let mut id = QuizId::generate(created_at);
        let mut attempt = 0;
        while quizzes.contains_key(&id) {
            attempt += 1;
            id = QuizId::generate(created_at);
            if attempt >= RANDOM_ID_ATTEMPTS {
                id = id.numbered(attempt);
            }
        }

        let quiz = Arc::new(Quiz {
            id: id.clone(),
            title,
            questions,
            creator,
            created_at,
        });
        quizzes.insert(id, Arc::clone(&quiz));

        info!(quiz = %quiz.id, questions = quiz.len(), "quiz created");
        Ok(quiz)
    }

    /// Looks up a quiz
    ///
    /// # Errors
    ///
    /// Returns [`UserError::UnknownQuiz`] if no quiz has this id.
    pub fn get(&self, id: &QuizId) -> Result<Arc<Quiz>, UserError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| UserError::UnknownQuiz(id.clone()))
    }

    /// All quizzes, oldest first
    pub fn list(&self) -> Vec<Arc<Quiz>> {
        self.read()
            .values()
            .cloned()
            .sorted_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .collect()
    }

    /// Number of stored quizzes
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the bank holds no quizzes
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Writes every stored quiz to the backing store
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceFailure`] if the snapshot cannot be written.
    pub async fn persist(&self) -> Result<(), PersistenceFailure> {
        let _guard = self.persist_lock.lock().await;

        let snapshot = BankSnapshot(
            self.read()
                .values()
                .map(|quiz| {
                    (
                        quiz.id.clone(),
                        StoredQuiz {
                            title: quiz.title.clone(),
                            creator_id: quiz.creator.clone(),
                            created_at: quiz.created_at,
                            questions: quiz.questions.clone(),
                        },
                    )
                })
                .collect(),
        );

        store::save(self.store.as_ref(), &snapshot).await
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<QuizId, Arc<Quiz>>> {
        self.quizzes
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<QuizId, Arc<Quiz>>> {
        self.quizzes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
