//! # Classquiz
//!
//! The quiz core of a classroom chat bot. Operators author multiple choice
//! quizzes and start them in a conversation; participants answer while each
//! question's round is open. Rounds close when their timer runs out or an
//! operator skips ahead, and finished quizzes add to a persistent
//! cross-quiz leaderboard.
//!
//! The chat platform itself stays outside: events come in as
//! [`action::UserAction`]s and everything shown goes out through a
//! [`channel::MessageChannel`]. [`master::QuizMaster`] ties it together.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::missing_panics_doc)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::Serialize;

pub mod constants;

pub mod action;
pub mod bank;
pub mod channel;
pub mod config;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod master;
pub mod results;
pub mod session;
pub mod store;
pub mod table;
pub mod timer;

pub use action::{OperatorCommand, Query, Reply, UserAction};
pub use channel::{MessageChannel, MessageRef, Notice, Roster};
pub use config::Config;
pub use error::{PersistenceFailure, UserError};
pub use master::QuizMaster;

/// A list cut down for display that still remembers how long it was
///
/// Used for rankings: results show the top few participants and mention
/// how many more there were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The exact total count of items
    exact_count: usize,
    /// The first items, up to the limit
    items: Vec<T>,
}

impl<T> TruncatedVec<T> {
    /// Keeps up to `limit` items of `list`
    ///
    /// # Arguments
    ///
    /// * `list` - Items in display order
    /// * `limit` - Maximum number of items kept
    /// * `exact_count` - Total number of items, which may exceed `limit`
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Total number of items before truncation
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// The kept items
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// How many items were cut off
    pub fn hidden_count(&self) -> usize {
        self.exact_count.saturating_sub(self.items.len())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_vec_new() {
        let truncated = TruncatedVec::new(["ann", "bob", "cid", "dee"].into_iter(), 3, 4);

        assert_eq!(truncated.exact_count(), 4);
        assert_eq!(truncated.items(), &["ann", "bob", "cid"]);
        assert_eq!(truncated.hidden_count(), 1);
    }

    #[test]
    fn test_truncated_vec_limit_larger_than_items() {
        let truncated = TruncatedVec::new([1, 2].into_iter(), 10, 2);

        assert_eq!(truncated.items(), &[1, 2]);
        assert_eq!(truncated.hidden_count(), 0);
    }

    #[test]
    fn test_truncated_vec_default_is_empty() {
        let truncated = TruncatedVec::<String>::default();

        assert_eq!(truncated.exact_count(), 0);
        assert!(truncated.items().is_empty());
    }

    #[test]
    fn test_truncated_vec_serializes_count() {
        let truncated = TruncatedVec::new([7].into_iter(), 1, 4);
        let json = serde_json::to_value(&truncated).unwrap();

        assert_eq!(json["exact_count"], 4);
        assert_eq!(json["items"][0], 7);
    }
}
