//! Beta Bot, a chat bot that walks users through a beta sign-up form.

pub mod beta;
pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod help;
pub mod store;
