//! Integration tests for the beta sign-up flow.
//!
//! Drive the public `FlowController` with an in-memory store and either a
//! stub sink or an in-memory libSQL database, and check what the user sees
//! and what ends up stored.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use beta_bot::beta::prompts::{self, API_KEY_QUESTION, NO_API_KEY_MESSAGE, PROVIDER_QUESTION};
use beta_bot::beta::{
    Answer, ApplicationRecord, ApplicationStore, FlowController, FlowResponse, InMemoryApplicationStore,
    InboundEvent, Model, Outcome, Provider, Step,
};
use beta_bot::error::{DatabaseError, FlowError};
use beta_bot::store::{ApplicationSink, Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER: i64 = 1001;
const CHAT: i64 = 2002;

/// Stub sink that records submissions and can be told to fail.
#[derive(Default)]
struct StubSink {
    submitted: Mutex<Vec<ApplicationRecord>>,
    failing: Mutex<bool>,
}

impl StubSink {
    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn submitted(&self) -> Vec<ApplicationRecord> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApplicationSink for StubSink {
    async fn submit_application(&self, record: &ApplicationRecord) -> Result<(), DatabaseError> {
        if *self.failing.lock().unwrap() {
            return Err(DatabaseError::Pool("connection refused".into()));
        }
        self.submitted.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct Harness {
    flow: FlowController,
    store: Arc<InMemoryApplicationStore>,
    sink: Arc<StubSink>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryApplicationStore::new());
        let sink = Arc::new(StubSink::default());
        let flow = FlowController::new(store.clone(), sink.clone());
        Self { flow, store, sink }
    }

    async fn send(&self, answer: Answer) -> Option<FlowResponse> {
        self.flow
            .handle(&InboundEvent::new(USER, CHAT, "jane_d", answer))
            .await
            .unwrap()
    }

    async fn tap(&self, value: &str) -> Option<FlowResponse> {
        self.send(Answer::Choice(value.into())).await
    }

    async fn say(&self, text: &str) -> Option<FlowResponse> {
        self.send(Answer::Text(text.into())).await
    }

    async fn record(&self) -> ApplicationRecord {
        self.store.load(USER).await
    }

    /// Walk the happy path up to the summary.
    async fn fill_to_summary(&self) -> FlowResponse {
        self.send(Answer::Start).await.unwrap();
        self.tap("yes").await.unwrap();
        self.tap("azure").await.unwrap();
        self.tap("gpt4").await.unwrap();
        self.say("a@b.com").await.unwrap();
        self.say("Jane").await.unwrap();
        self.say("mornings by email").await.unwrap()
    }
}

fn button_values(resp: &FlowResponse) -> Vec<String> {
    resp.prompt
        .buttons
        .iter()
        .flatten()
        .flatten()
        .map(|b| b.value.clone())
        .collect()
}

// ── User journeys ──────────────────────────────────────────────────────

#[tokio::test]
async fn start_offers_api_key_question() {
    let h = Harness::new();
    let resp = h.send(Answer::Start).await.unwrap();

    assert_eq!(resp.step, Step::ApiKey);
    assert_eq!(resp.prompt.text, API_KEY_QUESTION);
    assert_eq!(button_values(&resp), ["yes", "no"]);
    assert_eq!(resp.chat_context, CHAT);
}

#[tokio::test]
async fn yes_offers_providers() {
    let h = Harness::new();
    h.send(Answer::Start).await;
    let resp = h.tap("yes").await.unwrap();

    assert_eq!(resp.prompt.text, PROVIDER_QUESTION);
    assert_eq!(button_values(&resp), ["azure", "openai"]);
    assert_eq!(h.record().await.has_api_key, Some(true));
}

#[tokio::test]
async fn no_ends_the_flow() {
    let h = Harness::new();
    h.send(Answer::Start).await;
    let resp = h.tap("no").await.unwrap();

    assert_eq!(resp.step, Step::NoApiKey);
    assert_eq!(resp.prompt.text, NO_API_KEY_MESSAGE);
    assert!(resp.prompt.buttons.is_none());
    assert_eq!(h.record().await.has_api_key, Some(false));

    // Nothing advances it afterwards.
    for answer in [
        Answer::Choice("azure".into()),
        Answer::Choice("gpt4".into()),
        Answer::Choice("yes".into()),
        Answer::Choice("submit".into()),
        Answer::Text("a@b.com".into()),
        Answer::Text("Jane".into()),
    ] {
        assert!(h.send(answer).await.is_none());
        let record = h.record().await;
        assert_eq!(record.has_api_key, Some(false));
        assert_eq!(record.filled_count(), 1);
    }
    assert!(h.sink.submitted().is_empty());
}

#[tokio::test]
async fn happy_path_submits_and_clears() {
    let h = Harness::new();
    let summary = h.fill_to_summary().await;

    assert_eq!(summary.step, Step::Summary);
    for value in ["Yes", "Azure", "GPT-4", "a@b.com", "Jane", "mornings by email"] {
        assert!(
            summary.prompt.text.contains(value),
            "summary should show {value}: {}",
            summary.prompt.text
        );
    }
    assert_eq!(button_values(&summary), ["submit", "reset"]);

    let done = h.tap("submit").await.unwrap();
    assert_eq!(done.outcome, Outcome::Submit);
    assert_eq!(done.step, Step::Submitted);

    let submitted = h.sink.submitted();
    assert_eq!(submitted.len(), 1);
    let app = &submitted[0];
    assert_eq!(app.user_id, USER);
    assert_eq!(app.chat_context, CHAT);
    assert_eq!(app.display_name, "jane_d");
    assert_eq!(app.provider, Some(Provider::Azure));
    assert_eq!(app.model, Some(Model::Gpt4));
    assert!(app.created_at.is_some());

    assert_eq!(h.store.len().await, 0);
    assert_eq!(h.record().await.filled_count(), 0);
}

#[tokio::test]
async fn reset_at_summary_starts_over() {
    let h = Harness::new();
    h.fill_to_summary().await;

    let resp = h.tap("reset").await.unwrap();
    assert_eq!(resp.outcome, Outcome::Restarted);
    assert_eq!(resp.prompt.text, API_KEY_QUESTION);

    let record = h.record().await;
    assert_eq!(record, ApplicationRecord::new(USER, CHAT, "jane_d"));
    assert!(h.sink.submitted().is_empty());
}

// ── Properties as concrete cases ────────────────────────────────────

#[tokio::test]
async fn failed_submit_keeps_completed_record() {
    let h = Harness::new();
    h.fill_to_summary().await;
    let before = h.record().await;
    assert!(before.is_complete());

    h.sink.set_failing(true);
    let err = h
        .flow
        .handle(&InboundEvent::new(USER, CHAT, "jane_d", Answer::Choice("submit".into())))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::SubmissionFailed { user_id: USER, .. }));
    assert_eq!(h.record().await, before);

    // The user can retry from the same summary.
    h.sink.set_failing(false);
    let resp = h.tap("submit").await.unwrap();
    assert_eq!(resp.outcome, Outcome::Submit);
    assert_eq!(h.sink.submitted().len(), 1);
}

#[tokio::test]
async fn start_command_escapes_no_api_key() {
    let h = Harness::new();
    h.send(Answer::Start).await;
    h.tap("no").await;

    let resp = h.send(Answer::Start).await.unwrap();
    assert_eq!(resp.step, Step::ApiKey);
    assert_eq!(h.record().await.has_api_key, None);
}

#[tokio::test]
async fn invalid_email_reprompts_silently() {
    let h = Harness::new();
    h.send(Answer::Start).await;
    h.tap("yes").await;
    h.tap("openai").await;
    h.tap("gpt3.5").await;

    let resp = h.say("not an email").await.unwrap();
    assert_eq!(resp.prompt.text, prompts::EMAIL_QUESTION);
    assert!(h.record().await.email.is_empty());

    let resp = h.say("jane@example.com").await.unwrap();
    assert_eq!(resp.prompt.text, prompts::NAME_QUESTION);
}

#[tokio::test]
async fn stale_button_taps_are_ignored() {
    let h = Harness::new();
    h.send(Answer::Start).await;
    h.tap("yes").await;
    h.tap("azure").await;
    let before = h.record().await;

    // Provider button tapped again from the old message.
    assert!(h.tap("openai").await.is_none());
    // Text while buttons are shown.
    assert!(h.say("gpt4").await.is_none());
    assert_eq!(h.record().await, before);
}

#[tokio::test]
async fn button_values_match_case_insensitively() {
    let h = Harness::new();
    h.send(Answer::Start).await;
    h.tap(" YES ").await.unwrap();
    h.tap("OpenAI").await.unwrap();
    let resp = h.tap("GPT4-32K").await.unwrap();
    assert_eq!(resp.step, Step::Email);
    assert_eq!(h.record().await.model, Some(Model::Gpt4_32k));
}

// ── Concurrency ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_users_progress_independently() {
    let store = Arc::new(InMemoryApplicationStore::with_shards(8));
    let sink = Arc::new(StubSink::default());
    let flow = Arc::new(FlowController::new(store.clone(), sink.clone()));

    let mut tasks = Vec::new();
    for user in 0..50_i64 {
        let flow = Arc::clone(&flow);
        tasks.push(tokio::spawn(async move {
            let answers = [
                Answer::Start,
                Answer::Choice("yes".into()),
                Answer::Choice(if user % 2 == 0 { "azure" } else { "openai" }.into()),
                Answer::Choice("gpt4".into()),
                Answer::Text(format!("user{user}@example.com")),
                Answer::Text(format!("User {user}")),
                Answer::Text("any time".into()),
                Answer::Choice("submit".into()),
            ];
            for answer in answers {
                flow.handle(&InboundEvent::new(user, user, format!("u{user}"), answer))
                    .await
                    .unwrap();
            }
        }));
    }

    timeout(TEST_TIMEOUT, async {
        for t in tasks {
            t.await.unwrap();
        }
    })
    .await
    .expect("users did not finish in time");

    let submitted = sink.submitted();
    assert_eq!(submitted.len(), 50);
    for app in &submitted {
        assert_eq!(app.email, format!("user{}@example.com", app.user_id));
        let expected = if app.user_id % 2 == 0 {
            Provider::Azure
        } else {
            Provider::OpenAi
        };
        assert_eq!(app.provider, Some(expected));
    }
    assert_eq!(store.len().await, 0);
}

// ── End to end with libSQL ──────────────────────────────────────────

#[tokio::test]
async fn submitted_application_lands_in_libsql() {
    let backend = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let store = Arc::new(InMemoryApplicationStore::new());
    let flow = FlowController::new(store.clone(), backend.clone());

    let answers = [
        Answer::Start,
        Answer::Choice("yes".into()),
        Answer::Choice("openai".into()),
        Answer::Choice("gpt3.5".into()),
        Answer::Text("a@b.com".into()),
        Answer::Text("Jane".into()),
        Answer::Text("mornings by email".into()),
        Answer::Choice("submit".into()),
    ];
    for answer in answers {
        flow.handle(&InboundEvent::new(USER, CHAT, "jane_d", answer))
            .await
            .unwrap();
    }

    let stored = backend.list_applications(USER).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].provider, Some(Provider::OpenAi));
    assert_eq!(stored[0].model, Some(Model::Gpt35));
    assert_eq!(stored[0].contact_method, "mornings by email");
    assert_eq!(store.len().await, 0);
}
