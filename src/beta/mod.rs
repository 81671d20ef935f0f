//! Beta sign-up flow — a stepped conversation that collects one application
//! per user.
//!
//! The user answers a fixed sequence of questions (buttons or free text).
//! `FlowController` loads the user's record from the `ApplicationStore`, lets
//! the `StepEngine` apply the answer, saves the result, and renders the next
//! prompt. A completed application is handed to the persistence layer on
//! Submit.

pub mod engine;
pub mod flow;
pub mod model;
pub mod prompts;
pub mod store;

pub use engine::{Answer, Outcome, Step, StepEngine, Transition};
pub use flow::{FlowController, FlowResponse, InboundEvent};
pub use model::{ApplicationRecord, Model, Provider};
pub use prompts::{Button, Prompt};
pub use store::{ApplicationStore, InMemoryApplicationStore};
