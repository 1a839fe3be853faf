//! Reply texts sent back to the channel.

use crate::commands::{CommandParser, ParseError};
use crate::polls::{ClosedPoll, Poll, PollError, PollTally, VoteReceipt};
use std::fmt::Write;

const NOT_FOUND: &str = "Poll with this ID was not found.";
const NOT_FOUND_OR_CLOSED: &str = "Poll with this ID was not found or is already closed.";
const INVALID_OPTION: &str = "Error! Invalid option number.";
const TOO_FEW_OPTIONS: &str = "Error! At least two options are required.";
const NOT_CREATOR: &str = "You are not the creator of this poll.";

pub fn created(poll: &Poll) -> String {
    let mut reply = format!(
        "Poll '{}' created! ID: {}\nOptions:\n",
        poll.title(),
        poll.id()
    );
    for (i, option) in poll.options().iter().enumerate() {
        let _ = writeln!(reply, "{}. {}", i + 1, option);
    }
    reply
}

pub fn voted(receipt: &VoteReceipt) -> String {
    format!("You voted for option {}: {}", receipt.option, receipt.label)
}

pub fn results(tally: &PollTally) -> String {
    let status = if tally.active { "" } else { ", closed" };
    let mut reply = format!(
        "Results for poll '{}' (ID: {}{}):\n",
        tally.title, tally.poll_id, status
    );
    for entry in &tally.entries {
        let noun = if entry.count == 1 { "vote" } else { "votes" };
        let _ = writeln!(
            reply,
            "{}. {}: {} {}",
            entry.option, entry.label, entry.count, noun
        );
    }
    reply
}

pub fn closed(closed: &ClosedPoll) -> String {
    format!("Poll '{}' (ID: {}) is closed.", closed.title, closed.poll_id)
}

pub fn deleted(poll_id: &str) -> String {
    format!("Poll with ID {poll_id} deleted.")
}

/// Reply for a parse failure; `None` for messages that get no answer
pub fn parse_error(parser: &CommandParser, error: &ParseError) -> Option<String> {
    match error {
        ParseError::NotACommand => None,
        ParseError::Malformed { verb } => Some(format!("Error! Format: {}", parser.usage(*verb))),
        ParseError::TooFewOptions => Some(TOO_FEW_OPTIONS.to_string()),
        ParseError::InvalidOption => Some(INVALID_OPTION.to_string()),
    }
}

pub fn poll_error(error: &PollError) -> String {
    match error {
        PollError::NotFound { .. } => NOT_FOUND,
        PollError::NotFoundOrInactive { .. } => NOT_FOUND_OR_CLOSED,
        PollError::InvalidOption { .. } => INVALID_OPTION,
        PollError::Unauthorized { .. } => NOT_CREATOR,
        PollError::TooFewOptions { .. } => TOO_FEW_OPTIONS,
    }
    .to_string()
}
