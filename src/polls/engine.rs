//! Poll Store
//!
//! Owns every poll in the process and serializes all lifecycle operations
//! behind a single lock, so check-then-mutate sequences are atomic.

use super::poll::{Poll, PollTally};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Poll operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("poll '{poll_id}' not found")]
    NotFound { poll_id: String },

    #[error("poll '{poll_id}' not found or already closed")]
    NotFoundOrInactive { poll_id: String },

    #[error("option {option} is out of range 1..={available}")]
    InvalidOption { option: usize, available: usize },

    #[error("only the creator of poll '{poll_id}' may do this")]
    Unauthorized { poll_id: String },

    #[error("a poll needs at least two options, got {count}")]
    TooFewOptions { count: usize },
}

/// Confirmation of an accepted vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub poll_id: String,
    pub option: usize,
    pub label: String,
}

/// Identity of a poll that was just closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPoll {
    pub poll_id: String,
    pub title: String,
}

/// In-memory poll store
#[derive(Debug)]
pub struct PollStore {
    /// Polls by ID
    polls: RwLock<HashMap<String, Poll>>,
    /// Source of poll IDs; never reused within the process
    next_id: AtomicU64,
}

impl Default for PollStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PollStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            polls: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> String {
        format!("poll-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a new active poll and return a snapshot of it
    pub fn create(
        &self,
        title: impl Into<String>,
        options: Vec<String>,
        created_by: impl Into<String>,
    ) -> Result<Poll, PollError> {
        let poll = Poll::new(self.allocate_id(), title, options, created_by)?;

        let mut polls = self.polls.write();
        polls.insert(poll.id().to_string(), poll.clone());

        tracing::info!(poll_id = %poll.id(), options = poll.options().len(), "poll created");
        Ok(poll)
    }

    /// Cast one vote for a 1-indexed option
    pub fn vote(&self, poll_id: &str, option: usize) -> Result<VoteReceipt, PollError> {
        let mut polls = self.polls.write();
        let poll = polls
            .get_mut(poll_id)
            .ok_or_else(|| PollError::NotFoundOrInactive {
                poll_id: poll_id.to_string(),
            })?;

        let label = poll.record_vote(option)?;

        tracing::debug!(poll_id, option, "vote recorded");
        Ok(VoteReceipt {
            poll_id: poll_id.to_string(),
            option,
            label,
        })
    }

    /// Current tally, whether or not the poll is still active
    pub fn results(&self, poll_id: &str) -> Result<PollTally, PollError> {
        let polls = self.polls.read();
        polls
            .get(poll_id)
            .map(Poll::tally)
            .ok_or_else(|| PollError::NotFound {
                poll_id: poll_id.to_string(),
            })
    }

    /// Close a poll; only its creator may do so
    pub fn close(&self, poll_id: &str, requester: &str) -> Result<ClosedPoll, PollError> {
        let mut polls = self.polls.write();
        let poll = polls.get_mut(poll_id).ok_or_else(|| PollError::NotFound {
            poll_id: poll_id.to_string(),
        })?;

        if poll.created_by() != requester {
            return Err(PollError::Unauthorized {
                poll_id: poll_id.to_string(),
            });
        }

        poll.close();

        tracing::info!(poll_id, "poll closed");
        Ok(ClosedPoll {
            poll_id: poll_id.to_string(),
            title: poll.title().to_string(),
        })
    }

    /// Remove a poll regardless of who asks
    pub fn delete(&self, poll_id: &str) -> Result<(), PollError> {
        let mut polls = self.polls.write();
        match polls.remove(poll_id) {
            Some(_) => {
                tracing::info!(poll_id, "poll deleted");
                Ok(())
            }
            None => Err(PollError::NotFound {
                poll_id: poll_id.to_string(),
            }),
        }
    }

    /// Remove a poll only if `requester` created it
    pub fn delete_as(&self, poll_id: &str, requester: &str) -> Result<(), PollError> {
        let mut polls = self.polls.write();
        let poll = polls.get(poll_id).ok_or_else(|| PollError::NotFound {
            poll_id: poll_id.to_string(),
        })?;

        if poll.created_by() != requester {
            return Err(PollError::Unauthorized {
                poll_id: poll_id.to_string(),
            });
        }

        polls.remove(poll_id);
        tracing::info!(poll_id, "poll deleted by creator");
        Ok(())
    }

    /// Snapshot of a poll
    pub fn get(&self, poll_id: &str) -> Option<Poll> {
        self.polls.read().get(poll_id).cloned()
    }

    /// Get store statistics
    pub fn stats(&self) -> PollStoreStats {
        let polls = self.polls.read();

        PollStoreStats {
            total_polls: polls.len(),
            active_polls: polls.values().filter(|p| p.is_active()).count(),
            total_votes: polls.values().map(Poll::total_votes).sum(),
        }
    }
}

/// Statistics for the poll store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStoreStats {
    /// Polls currently held
    pub total_polls: usize,
    /// Polls still accepting votes
    pub active_polls: usize,
    /// Votes across all held polls
    pub total_votes: u64,
}

/// Create a shared poll store
pub fn create_store() -> Arc<PollStore> {
    Arc::new(PollStore::new())
}
