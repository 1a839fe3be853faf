//! Poll Model
//!
//! A titled question with an ordered list of options and per-option counts.
//! Options are 1-indexed everywhere outside this module.

use std::collections::HashMap;

use super::engine::PollError;

/// Minimum number of options a poll must carry
pub const MIN_OPTIONS: usize = 2;

/// A single poll
///
/// Fields are private: a poll changes only through [`Poll::record_vote`] and
/// [`Poll::close`], which the store calls under its lock.
#[derive(Debug, Clone)]
pub struct Poll {
    id: String,
    title: String,
    options: Vec<String>,
    votes: HashMap<usize, u64>,
    created_by: String,
    active: bool,
}

impl Poll {
    /// Create a new active poll with no votes.
    pub(crate) fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        options: Vec<String>,
        created_by: impl Into<String>,
    ) -> Result<Self, PollError> {
        if options.len() < MIN_OPTIONS {
            return Err(PollError::TooFewOptions {
                count: options.len(),
            });
        }

        Ok(Self {
            id: id.into(),
            title: title.into(),
            options,
            votes: HashMap::new(),
            created_by: created_by.into(),
            active: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Label of a 1-indexed option
    pub fn option_label(&self, option: usize) -> Option<&str> {
        option
            .checked_sub(1)
            .and_then(|i| self.options.get(i))
            .map(String::as_str)
    }

    /// Current count for a 1-indexed option (0 if never voted)
    pub fn count(&self, option: usize) -> u64 {
        self.votes.get(&option).copied().unwrap_or(0)
    }

    /// Sum of all counts
    pub fn total_votes(&self) -> u64 {
        self.votes.values().sum()
    }

    /// Record one vote for a 1-indexed option.
    ///
    /// Inactive polls report `NotFoundOrInactive` before the range check.
    pub(crate) fn record_vote(&mut self, option: usize) -> Result<String, PollError> {
        if !self.active {
            return Err(PollError::NotFoundOrInactive {
                poll_id: self.id.clone(),
            });
        }

        let label = self
            .option_label(option)
            .map(str::to_string)
            .ok_or(PollError::InvalidOption {
                option,
                available: self.options.len(),
            })?;

        *self.votes.entry(option).or_insert(0) += 1;
        Ok(label)
    }

    /// Deactivate the poll. Never reverts.
    pub(crate) fn close(&mut self) {
        self.active = false;
    }

    /// Snapshot of the current counts, in option order
    pub fn tally(&self) -> PollTally {
        PollTally {
            poll_id: self.id.clone(),
            title: self.title.clone(),
            active: self.active,
            entries: self
                .options
                .iter()
                .enumerate()
                .map(|(i, label)| TallyEntry {
                    option: i + 1,
                    label: label.clone(),
                    count: self.count(i + 1),
                })
                .collect(),
        }
    }
}

/// Results of a poll at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTally {
    pub poll_id: String,
    pub title: String,
    pub active: bool,
    pub entries: Vec<TallyEntry>,
}

impl PollTally {
    /// Total votes across all options
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }
}

/// One option's line in a tally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyEntry {
    /// 1-indexed option number
    pub option: usize,
    pub label: String,
    pub count: u64,
}
