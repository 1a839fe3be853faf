//! Command Parser
//!
//! Turns raw chat text into a [`Command`].
//!
//! A command is the bot mention, a verb keyword, then arguments wrapped in
//! double quotes:
//!
//! ```text
//! @vote-bot create  "Lunch?" "Pizza" "Sushi"
//! @vote-bot vote    "poll-1" "2"
//! @vote-bot results "poll-1"
//! @vote-bot close   "poll-1"
//! @vote-bot delete  "poll-1"
//! ```
//!
//! Arguments are extracted by splitting the whole text on `"` and picking
//! fragments by position. There is no escaping: a quote inside an argument
//! is a delimiter. The fragment-count thresholds below are part of the chat
//! protocol and must not be loosened.

use std::fmt;
use thiserror::Error;

/// Mention token used when none is configured
pub const DEFAULT_MENTION: &str = "@vote-bot";

/// Fragments required before a create command is considered well formed
const CREATE_MIN_FRAGMENTS: usize = 3;
/// Fragments required for a vote (`id` at 1, option number at 3)
const VOTE_MIN_FRAGMENTS: usize = 4;
/// Fragments required for results, close and delete
const POLL_ID_MIN_FRAGMENTS: usize = 3;

/// Command verb keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Vote,
    Results,
    Close,
    Delete,
}

impl Verb {
    /// All verbs, in matching order
    pub const ALL: [Verb; 5] = [
        Verb::Create,
        Verb::Vote,
        Verb::Results,
        Verb::Close,
        Verb::Delete,
    ];

    /// Keyword that follows the mention
    pub fn keyword(self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Vote => "vote",
            Verb::Results => "results",
            Verb::Close => "close",
            Verb::Delete => "delete",
        }
    }

    /// Quoted-argument template shown in format errors
    fn arguments(self) -> &'static str {
        match self {
            Verb::Create => "\"Question\" \"Option1\" \"Option2\" ...",
            Verb::Vote => "\"ID\" \"option_number\"",
            Verb::Results | Verb::Close | Verb::Delete => "\"ID\"",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create {
        question: String,
        options: Vec<String>,
    },
    Vote {
        poll_id: String,
        option: usize,
    },
    Results {
        poll_id: String,
    },
    Close {
        poll_id: String,
    },
    Delete {
        poll_id: String,
    },
}

impl Command {
    pub fn verb(&self) -> Verb {
        match self {
            Command::Create { .. } => Verb::Create,
            Command::Vote { .. } => Verb::Vote,
            Command::Results { .. } => Verb::Results,
            Command::Close { .. } => Verb::Close,
            Command::Delete { .. } => Verb::Delete,
        }
    }
}

/// Why a message did not produce a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not addressed to the bot, or an unknown verb. Never answered.
    #[error("message is not a bot command")]
    NotACommand,

    /// Too few quote-delimited fragments for the verb
    #[error("malformed {verb} command")]
    Malformed { verb: Verb },

    /// A create command left fewer than two non-empty options
    #[error("a poll needs at least two options")]
    TooFewOptions,

    /// The option number of a vote is not a positive integer
    #[error("invalid option number")]
    InvalidOption,
}

impl ParseError {
    /// Whether the author should get a reply for this error
    pub fn is_reportable(&self) -> bool {
        !matches!(self, ParseError::NotACommand)
    }
}

/// Parser bound to one mention token
#[derive(Debug, Clone)]
pub struct CommandParser {
    mention: String,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(DEFAULT_MENTION)
    }
}

impl CommandParser {
    /// Create a parser for the given mention token
    pub fn new(mention: impl Into<String>) -> Self {
        Self {
            mention: mention.into(),
        }
    }

    /// Usage line for a verb, e.g. `@vote-bot close "ID"`
    pub fn usage(&self, verb: Verb) -> String {
        format!("{} {} {}", self.mention, verb.keyword(), verb.arguments())
    }

    /// Find which verb the text starts with
    fn match_verb(&self, text: &str) -> Option<Verb> {
        let rest = text.strip_prefix(self.mention.as_str())?.strip_prefix(' ')?;
        Verb::ALL
            .into_iter()
            .find(|verb| rest.starts_with(verb.keyword()))
    }

    /// Parse raw message text
    pub fn parse(&self, text: &str) -> Result<Command, ParseError> {
        let verb = self.match_verb(text).ok_or(ParseError::NotACommand)?;
        let fragments: Vec<&str> = text.split('"').collect();

        match verb {
            Verb::Create => parse_create(&fragments),
            Verb::Vote => parse_vote(&fragments),
            Verb::Results => poll_id(&fragments, verb).map(|poll_id| Command::Results { poll_id }),
            Verb::Close => poll_id(&fragments, verb).map(|poll_id| Command::Close { poll_id }),
            Verb::Delete => poll_id(&fragments, verb).map(|poll_id| Command::Delete { poll_id }),
        }
    }
}

fn parse_create(fragments: &[&str]) -> Result<Command, ParseError> {
    if fragments.len() < CREATE_MIN_FRAGMENTS {
        return Err(ParseError::Malformed { verb: Verb::Create });
    }

    let question = fragments[1].to_string();
    let options: Vec<String> = fragments[2..]
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    if options.len() < crate::polls::MIN_OPTIONS {
        return Err(ParseError::TooFewOptions);
    }

    Ok(Command::Create { question, options })
}

fn parse_vote(fragments: &[&str]) -> Result<Command, ParseError> {
    if fragments.len() < VOTE_MIN_FRAGMENTS {
        return Err(ParseError::Malformed { verb: Verb::Vote });
    }

    let option = fragments[3]
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 1)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or(ParseError::InvalidOption)?;

    Ok(Command::Vote {
        poll_id: fragments[1].to_string(),
        option,
    })
}

fn poll_id(fragments: &[&str], verb: Verb) -> Result<String, ParseError> {
    if fragments.len() < POLL_ID_MIN_FRAGMENTS {
        return Err(ParseError::Malformed { verb });
    }
    Ok(fragments[1].to_string())
}
