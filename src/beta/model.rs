//! Application record and the option enums it is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which vendor the applicant's API key is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Azure,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Azure, Provider::OpenAi];

    /// Button value carried in the choice event.
    pub fn value(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::OpenAi => "openai",
        }
    }

    /// Human-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Azure => "Azure",
            Self::OpenAi => "OpenAI",
        }
    }

    /// Parse a button value (case-insensitive).
    pub fn from_value(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.value().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which model family the applicant has access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    #[serde(rename = "gpt3.5")]
    Gpt35,
    #[serde(rename = "gpt4")]
    Gpt4,
    #[serde(rename = "gpt4-32k")]
    Gpt4_32k,
}

impl Model {
    pub const ALL: [Model; 3] = [Model::Gpt35, Model::Gpt4, Model::Gpt4_32k];

    pub fn value(&self) -> &'static str {
        match self {
            Self::Gpt35 => "gpt3.5",
            Self::Gpt4 => "gpt4",
            Self::Gpt4_32k => "gpt4-32k",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Gpt35 => "GPT-3.5",
            Self::Gpt4 => "GPT-4",
            Self::Gpt4_32k => "GPT-4-32k",
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.value().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A user's in-progress beta application.
///
/// The record's fill state is the state of the sign-up flow: the first unset
/// field (in canonical order) decides which question is asked next. Empty
/// strings and `None` both mean "unset".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationRecord {
    /// Transport identity of the applicant. Store key; never changes.
    pub user_id: i64,
    /// Chat the flow replies in (private chat or the group it started from).
    pub chat_context: i64,
    pub display_name: String,
    /// `None` until answered; `Some(false)` ends the flow.
    pub has_api_key: Option<bool>,
    pub provider: Option<Provider>,
    pub model: Option<Model>,
    pub email: String,
    pub contact_name: String,
    pub contact_method: String,
    /// Stamped once, when the record is accepted for submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ApplicationRecord {
    /// A fresh record with only the identity fields populated.
    pub fn new(user_id: i64, chat_context: i64, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_context,
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Same identity, every collected field cleared.
    pub fn reset(&self) -> Self {
        Self::new(self.user_id, self.chat_context, self.display_name.clone())
    }

    /// Whether every collected field is set (eligible for submission).
    pub fn is_complete(&self) -> bool {
        self.has_api_key == Some(true)
            && self.provider.is_some()
            && self.model.is_some()
            && !self.email.is_empty()
            && !self.contact_name.is_empty()
            && !self.contact_method.is_empty()
    }

    /// Number of collected fields that are set, counting a "No" answer.
    pub fn filled_count(&self) -> usize {
        [
            self.has_api_key.is_some(),
            self.provider.is_some(),
            self.model.is_some(),
            !self.email.is_empty(),
            !self.contact_name.is_empty(),
            !self.contact_method.is_empty(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}
