//! vote-bot library
//!
//! A Mattermost bot that runs polls in a single channel: it listens on the
//! websocket event stream, parses mention commands, keeps polls in memory
//! and replies in thread.

pub mod bot;
pub mod channels;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod polls;
pub mod supervisor;
pub mod tracing;
