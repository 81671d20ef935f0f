//! Bot runtime: command parsing, per-user lanes, and the main loop.

pub mod bot_loop;
pub mod commands;
pub mod lanes;

pub use bot_loop::{BetaBot, MessageHandler};
pub use commands::{Command, CommandParser};
pub use lanes::{LaneHandler, Lanes};
