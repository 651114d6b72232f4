//! Conversation to session mapping
//!
//! The map itself sits behind a plain mutex that is only held for lookups
//! and inserts, never across an `.await`. Each session sits behind its own
//! async mutex, so a session can render or commit while others keep going.
//! Next to each session the table keeps its round cursor, which tells an
//! arriving command which round was open before it waits for that lock.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing::debug;

use crate::{error::UserError, ids::ConversationId, session::QuizSession};

/// A session shared between the table, event handlers and timer callbacks
pub type SharedSession = Arc<tokio::sync::Mutex<QuizSession>>;

#[derive(Debug)]
struct Entry {
    session: SharedSession,
    round: Arc<AtomicUsize>,
}

/// At most one live session per conversation
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<ConversationId, Entry>>,
}

impl SessionTable {
    /// Registers `session` for `conversation`
    ///
    /// # Errors
    ///
    /// Returns [`UserError::AlreadyActive`] if the conversation already has
    /// a session; the existing one is left untouched.
    pub fn try_create(
        &self,
        conversation: ConversationId,
        session: QuizSession,
    ) -> Result<SharedSession, UserError> {
        let round = session.round_cursor();
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        self.try_insert(conversation, Arc::clone(&shared), round)?;
        Ok(shared)
    }

    /// Registers an already shared session for `conversation`
    ///
    /// Lets the caller lock the session before anyone else can see it.
    /// `round` is the session's [`QuizSession::round_cursor`].
    ///
    /// # Errors
    ///
    /// Returns [`UserError::AlreadyActive`] if the conversation already has
    /// a session.
    pub fn try_insert(
        &self,
        conversation: ConversationId,
        session: SharedSession,
        round: Arc<AtomicUsize>,
    ) -> Result<(), UserError> {
        let mut sessions = self.lock();
        if sessions.contains_key(&conversation) {
            return Err(UserError::AlreadyActive);
        }

        debug!(%conversation, "session registered");
        sessions.insert(conversation, Entry { session, round });
        Ok(())
    }

    /// The session running in `conversation`
    pub fn get(&self, conversation: &ConversationId) -> Option<SharedSession> {
        self.lock()
            .get(conversation)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// The session running in `conversation` and the index of its open
    /// round, read without waiting for the session's lock
    pub fn get_with_round(&self, conversation: &ConversationId) -> Option<(SharedSession, usize)> {
        self.lock().get(conversation).map(|entry| {
            (
                Arc::clone(&entry.session),
                entry.round.load(Ordering::Acquire),
            )
        })
    }

    /// Drops the session for `conversation`, but only if it is still `session`
    ///
    /// A newer session started in the same conversation is left alone.
    pub fn remove(&self, conversation: &ConversationId, session: &SharedSession) -> bool {
        let mut sessions = self.lock();
        match sessions.get(conversation) {
            Some(current) if Arc::ptr_eq(&current.session, session) => {
                sessions.remove(conversation);
                debug!(%conversation, "session removed");
                true
            }
            _ => false,
        }
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
