//! Polling Module
//!
//! Provides the poll model and the concurrent store that owns every poll.
//! All state lives in memory and is discarded on exit.

pub mod engine;
pub mod poll;

pub use engine::{create_store, ClosedPoll, PollError, PollStore, PollStoreStats, VoteReceipt};
pub use poll::{Poll, PollTally, TallyEntry, MIN_OPTIONS};
