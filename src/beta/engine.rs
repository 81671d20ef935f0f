//! Step engine — the sign-up state machine.
//!
//! The current step is derived from the record itself: the first unset field
//! in canonical order is the question being asked. Only two answers are read
//! by literal value rather than by field emptiness: "No" to the API-key
//! question (which ends the flow) and Submit/Reset on the summary.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::model::{ApplicationRecord, Model, Provider};

/// Button value for a "Yes" answer.
pub const YES: &str = "yes";
/// Button value for a "No" answer.
pub const NO: &str = "no";
/// Button value that submits the summary.
pub const SUBMIT: &str = "submit";
/// Button value that discards the application and starts over.
pub const RESET: &str = "reset";

/// One stage of the sign-up flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ApiKey,
    Provider,
    Model,
    Email,
    Name,
    Contact,
    Summary,
    /// Terminal: the applicant answered "No" to the API-key question.
    NoApiKey,
    /// Terminal: the application was accepted for submission.
    Submitted,
}

impl Step {
    /// The step a record is waiting on.
    ///
    /// Never returns [`Step::Submitted`]; that step only exists as a render
    /// target for the submission that just happened.
    pub fn for_record(record: &ApplicationRecord) -> Step {
        match record.has_api_key {
            None => return Step::ApiKey,
            Some(false) => return Step::NoApiKey,
            Some(true) => {}
        }
        if record.provider.is_none() {
            Step::Provider
        } else if record.model.is_none() {
            Step::Model
        } else if record.email.is_empty() {
            Step::Email
        } else if record.contact_name.is_empty() {
            Step::Name
        } else if record.contact_method.is_empty() {
            Step::Contact
        } else {
            Step::Summary
        }
    }

    /// Whether the step ends the active flow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoApiKey | Self::Submitted)
    }

    /// Whether the step expects a button tap (as opposed to free text).
    pub fn expects_choice(&self) -> bool {
        matches!(
            self,
            Self::ApiKey | Self::Provider | Self::Model | Self::Summary
        )
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ApiKey => "api_key",
            Self::Provider => "provider",
            Self::Model => "model",
            Self::Email => "email",
            Self::Name => "name",
            Self::Contact => "contact",
            Self::Summary => "summary",
            Self::NoApiKey => "no_api_key",
            Self::Submitted => "submitted",
        };
        write!(f, "{s}")
    }
}

/// An answer from the applicant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Explicit start command: restart the flow from the first question.
    Start,
    /// Free text typed by the user.
    Text(String),
    /// Value of a tapped button.
    Choice(String),
}

/// What a transition means for the caller beyond the next prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep collecting; save the record.
    Continue,
    /// The record was started over; save it.
    Restarted,
    /// The record is complete and stamped; hand it to persistence.
    Submit,
}

/// Result of applying one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub record: ApplicationRecord,
    /// Step to render next.
    pub step: Step,
    pub outcome: Outcome,
}

/// Applies answers to records.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepEngine;

impl StepEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `answer` to `record`.
    ///
    /// Returns `None` when the answer does not fit the step the record is
    /// waiting on (e.g. a stale button tap or text sent while buttons are
    /// shown). Invalid free text yields the same step again with an
    /// unchanged record.
    pub fn advance(&self, record: &ApplicationRecord, answer: &Answer) -> Option<Transition> {
        let current = Step::for_record(record);

        let (text, choice) = match answer {
            Answer::Start => return Some(restart(record)),
            Answer::Text(text) => (Some(text.trim()), None),
            Answer::Choice(value) => (None, Some(value.trim().to_ascii_lowercase())),
        };

        let mut next = record.clone();
        match (current, text, choice.as_deref()) {
            (Step::ApiKey, _, Some(YES)) => next.has_api_key = Some(true),
            (Step::ApiKey, _, Some(NO)) => next.has_api_key = Some(false),
            (Step::Provider, _, Some(value)) => next.provider = Some(Provider::from_value(value)?),
            (Step::Model, _, Some(value)) => next.model = Some(Model::from_value(value)?),
            (Step::Email, Some(text), _) => {
                if looks_like_email(text) {
                    next.email = text.to_string();
                }
            }
            (Step::Name, Some(text), _) => next.contact_name = text.to_string(),
            (Step::Contact, Some(text), _) => next.contact_method = text.to_string(),
            (Step::Summary, _, Some(SUBMIT)) => {
                next.created_at = Some(Utc::now());
                return Some(Transition {
                    record: next,
                    step: Step::Submitted,
                    outcome: Outcome::Submit,
                });
            }
            (Step::Summary, _, Some(RESET)) => return Some(restart(record)),
            _ => return None,
        }

        Some(Transition {
            step: Step::for_record(&next),
            record: next,
            outcome: Outcome::Continue,
        })
    }
}

fn restart(record: &ApplicationRecord) -> Transition {
    Transition {
        record: record.reset(),
        step: Step::ApiKey,
        outcome: Outcome::Restarted,
    }
}

/// Minimal acceptance test for the email step.
fn looks_like_email(text: &str) -> bool {
    text.contains('@')
}
