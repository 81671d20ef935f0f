//! FlowController: load, advance, save, render.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::FlowError;
use crate::store::ApplicationSink;

use super::engine::{Answer, Outcome, Step, StepEngine};
use super::prompts::{self, Prompt};
use super::store::ApplicationStore;

/// One inbound answer, already stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: i64,
    /// Chat to reply in.
    pub chat_context: i64,
    pub display_name: String,
    pub answer: Answer,
}

impl InboundEvent {
    pub fn new(
        user_id: i64,
        chat_context: i64,
        display_name: impl Into<String>,
        answer: Answer,
    ) -> Self {
        Self {
            user_id,
            chat_context,
            display_name: display_name.into(),
            answer,
        }
    }
}

/// What the transport should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResponse {
    pub chat_context: i64,
    pub step: Step,
    pub prompt: Prompt,
    pub outcome: Outcome,
}

/// Drives one user's record through the sign-up steps.
///
/// Holds no lock of its own. Callers must not run two events for the same
/// user concurrently; events for different users may run in parallel.
pub struct FlowController {
    store: Arc<dyn ApplicationStore>,
    sink: Arc<dyn ApplicationSink>,
    engine: StepEngine,
}

impl FlowController {
    pub fn new(store: Arc<dyn ApplicationStore>, sink: Arc<dyn ApplicationSink>) -> Self {
        Self {
            store,
            sink,
            engine: StepEngine::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ApplicationStore> {
        &self.store
    }

    /// Process one event.
    ///
    /// `Ok(None)` means the event did not fit the current step and was
    /// ignored; nothing was written. On a failed submission the stored record
    /// is left exactly as it was before the Submit tap.
    pub async fn handle(&self, event: &InboundEvent) -> Result<Option<FlowResponse>, FlowError> {
        let user_id = event.user_id;
        let mut record = self.store.load(user_id).await;
        record.chat_context = event.chat_context;
        if !event.display_name.is_empty() {
            record.display_name.clone_from(&event.display_name);
        }

        let Some(transition) = self.engine.advance(&record, &event.answer) else {
            let step = Step::for_record(&record);
            debug!(
                user_id,
                step = %step,
                expects_choice = step.expects_choice(),
                answer = ?event.answer,
                "Ignoring answer that does not fit the current step"
            );
            return Ok(None);
        };

        match transition.outcome {
            Outcome::Submit => {
                if let Err(e) = self.sink.submit_application(&transition.record).await {
                    error!(user_id, error = %e, "Failed to persist beta application");
                    return Err(FlowError::SubmissionFailed { user_id, source: e });
                }
                self.store.clear(user_id).await;
                info!(user_id, "Beta application submitted");
            }
            Outcome::Restarted => {
                self.store.save(user_id, transition.record.clone()).await;
                info!(user_id, "Beta application started");
            }
            Outcome::Continue => {
                debug!(user_id, step = %transition.step, "Advanced beta application");
                self.store.save(user_id, transition.record.clone()).await;
            }
        }

        let prompt = prompts::render(transition.step, &transition.record);
        Ok(Some(FlowResponse {
            chat_context: transition.record.chat_context,
            step: transition.step,
            prompt,
            outcome: transition.outcome,
        }))
    }
}
