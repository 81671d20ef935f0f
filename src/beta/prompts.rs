//! Prompt text and button layouts for each step.

use serde::{Deserialize, Serialize};

use super::engine::{NO, RESET, SUBMIT, Step, YES};
use super::model::{ApplicationRecord, Model, Provider};

/// A tappable option. `value` comes back as the choice event's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub value: String,
}

impl Button {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Description of one outbound message. Rows of buttons, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<Vec<Button>>>,
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: None,
        }
    }

    pub fn with_row(text: impl Into<String>, row: Vec<Button>) -> Self {
        Self {
            text: text.into(),
            buttons: Some(vec![row]),
        }
    }
}

pub const API_KEY_QUESTION: &str = "Do you have an API Key?";
pub const PROVIDER_QUESTION: &str = "Do you have Azure or OpenAI API key?";
pub const MODEL_QUESTION: &str = "What model do you have access to?";
pub const EMAIL_QUESTION: &str = "What is your email?";
pub const NAME_QUESTION: &str = "What is your name?";
pub const CONTACT_QUESTION: &str = "What is the best time and method of contacting you?";
pub const NO_API_KEY_MESSAGE: &str =
    "Please obtain an API key. Send /beta to start again once you have one.";
pub const SUBMITTED_MESSAGE: &str = "Thanks! Your application has been submitted.";
pub const SUBMIT_FAILED_MESSAGE: &str =
    "Sorry, your application could not be saved. Please tap Submit to try again.";

/// Render the message for `step`. Only `Summary` reads the record.
pub fn render(step: Step, record: &ApplicationRecord) -> Prompt {
    match step {
        Step::ApiKey => Prompt::with_row(
            API_KEY_QUESTION,
            vec![Button::new("Yes", YES), Button::new("No", NO)],
        ),
        Step::Provider => Prompt::with_row(
            PROVIDER_QUESTION,
            Provider::ALL
                .iter()
                .map(|p| Button::new(p.label(), p.value()))
                .collect(),
        ),
        Step::Model => Prompt::with_row(
            MODEL_QUESTION,
            Model::ALL
                .iter()
                .map(|m| Button::new(m.label(), m.value()))
                .collect(),
        ),
        Step::Email => Prompt::text(EMAIL_QUESTION),
        Step::Name => Prompt::text(NAME_QUESTION),
        Step::Contact => Prompt::text(CONTACT_QUESTION),
        Step::Summary => Prompt::with_row(
            summary_text(record),
            vec![Button::new("Submit", SUBMIT), Button::new("Reset", RESET)],
        ),
        Step::NoApiKey => Prompt::text(NO_API_KEY_MESSAGE),
        Step::Submitted => Prompt::text(SUBMITTED_MESSAGE),
    }
}

/// Re-render the step `record` is waiting on after a failed submission,
/// with an apology in front so the Submit button stays available.
pub fn submit_failed(record: &ApplicationRecord) -> Prompt {
    let prompt = render(Step::for_record(record), record);
    Prompt {
        text: format!("{SUBMIT_FAILED_MESSAGE}\n\n{}", prompt.text),
        buttons: prompt.buttons,
    }
}

fn summary_text(record: &ApplicationRecord) -> String {
    let api_key = match record.has_api_key {
        Some(true) => "Yes",
        Some(false) => "No",
        None => "-",
    };
    let provider = record.provider.map(|p| p.label()).unwrap_or("-");
    let model = record.model.map(|m| m.label()).unwrap_or("-");

    format!(
        "Please review your information:\n\n\
         API Key: {api_key}\n\
         Provider: {provider}\n\
         Model: {model}\n\
         Email: {}\n\
         Name: {}\n\
         Contact: {}",
        record.email, record.contact_name, record.contact_method
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(prompt: &Prompt) -> Vec<String> {
        prompt
            .buttons
            .iter()
            .flatten()
            .flatten()
            .map(|b| b.value.clone())
            .collect()
    }

    fn complete() -> ApplicationRecord {
        ApplicationRecord {
            has_api_key: Some(true),
            provider: Some(Provider::Azure),
            model: Some(Model::Gpt4),
            email: "a@b.com".into(),
            contact_name: "Jane".into(),
            contact_method: "mornings by email".into(),
            ..ApplicationRecord::new(1, 1, "jane")
        }
    }

    #[test]
    fn api_key_offers_yes_no() {
        let p = render(Step::ApiKey, &ApplicationRecord::default());
        assert_eq!(p.text, API_KEY_QUESTION);
        assert_eq!(values(&p), ["yes", "no"]);
    }

    #[test]
    fn provider_and_model_buttons() {
        let r = ApplicationRecord::default();
        assert_eq!(values(&render(Step::Provider, &r)), ["azure", "openai"]);
        assert_eq!(
            values(&render(Step::Model, &r)),
            ["gpt3.5", "gpt4", "gpt4-32k"]
        );
    }

    #[test]
    fn free_text_steps_have_no_buttons() {
        let r = ApplicationRecord::default();
        for step in [Step::Email, Step::Name, Step::Contact, Step::NoApiKey, Step::Submitted] {
            assert!(render(step, &r).buttons.is_none(), "{step} should be plain text");
        }
    }

    #[test]
    fn summary_lists_every_collected_value() {
        let p = render(Step::Summary, &complete());
        for needle in ["Yes", "Azure", "GPT-4", "a@b.com", "Jane", "mornings by email"] {
            assert!(p.text.contains(needle), "summary missing {needle}: {}", p.text);
        }
        assert_eq!(values(&p), ["submit", "reset"]);
    }

    #[test]
    fn only_summary_depends_on_record() {
        let a = ApplicationRecord::default();
        let b = complete();
        for step in [Step::ApiKey, Step::Provider, Step::Model, Step::Email, Step::NoApiKey] {
            assert_eq!(render(step, &a), render(step, &b));
        }
        assert_ne!(render(Step::Summary, &a), render(Step::Summary, &b));
    }

    #[test]
    fn submit_failure_keeps_summary_buttons() {
        let p = submit_failed(&complete());
        assert!(p.text.starts_with(SUBMIT_FAILED_MESSAGE));
        assert!(p.text.contains("a@b.com"));
        assert_eq!(values(&p), ["submit", "reset"]);
    }

    #[test]
    fn prompt_serde_skips_missing_buttons() {
        let json = serde_json::to_value(Prompt::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hi"}));
    }
}
