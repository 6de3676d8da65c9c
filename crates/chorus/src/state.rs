//! Cycle state and the per-stage result it is built from.
//!
//! `CycleState` is a value: every transition produces a fresh snapshot via
//! [`CycleState::advance`] or [`CycleState::finish`] and never mutates the
//! previous one. A single run owns its state exclusively.

use choir_core::memory::RetrievedItem;
use choir_core::message::Message;
use serde::{Deserialize, Serialize};

use crate::effect::Effect;
use crate::error::{ErrorKind, StageError};
use crate::stage::Stage;

/// The most recent failure observed during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

/// Snapshot of one in-flight cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleState {
    pub thread_id: String,
    pub prompt: String,
    pub current_stage: Stage,
    /// Outputs of every completed stage, tagged with `step` metadata.
    pub accumulated_messages: Vec<Message>,
    /// Items retrieved in the current pass; cleared when a new pass starts.
    pub retrieved_context: Option<Vec<RetrievedItem>>,
    pub latest_output: Option<serde_json::Value>,
    pub error: Option<ErrorRecord>,
    /// 1-based pass counter; incremented on every Update → Action loop.
    pub iteration: u32,
}

impl CycleState {
    /// Initial state: Action, empty context, first pass.
    pub fn new(thread_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            prompt: prompt.into(),
            current_stage: Stage::Action,
            accumulated_messages: Vec::new(),
            retrieved_context: None,
            latest_output: None,
            error: None,
            iteration: 1,
        }
    }

    /// Borrowed view handed to a stage executor.
    pub fn stage_input(&self) -> StageInput<'_> {
        StageInput {
            thread_id: &self.thread_id,
            prompt: &self.prompt,
            accumulated_messages: &self.accumulated_messages,
            retrieved_context: self.retrieved_context.as_deref(),
            iteration: self.iteration,
        }
    }

    /// Retrieved context as it stands once `result` is applied.
    pub fn priors_after(&self, result: &StageResult) -> Vec<RetrievedItem> {
        result
            .auxiliary_items
            .as_ref()
            .or(self.retrieved_context.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Fold a stage result in and move to `next`.
    ///
    /// Looping back to Action starts a new pass: the iteration counter is
    /// bumped and retrieved context is dropped, since Experience re-fetches
    /// it. Accumulated messages always carry forward.
    pub fn advance(&self, result: &StageResult, next: Stage) -> CycleState {
        let mut state = self.record(result);
        if next == Stage::Action {
            state.iteration += 1;
            state.retrieved_context = None;
        }
        state.current_stage = next;
        state
    }

    /// Fold in the result of the terminal stage; the stage does not change.
    pub fn finish(&self, result: &StageResult) -> CycleState {
        self.record(result)
    }

    fn record(&self, result: &StageResult) -> CycleState {
        let mut state = self.clone();
        state.accumulated_messages.push(
            Message::assistant(&result.text)
                .with_metadata("step", result.stage.as_str())
                .with_metadata("iteration", self.iteration),
        );
        if let Some(items) = &result.auxiliary_items {
            state.retrieved_context = Some(items.clone());
        }
        state.latest_output = Some(result.content.clone());
        if let Some(error) = result.last_error() {
            state.error = Some(error);
        }
        state
    }
}

/// What a stage executor sees.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub thread_id: &'a str,
    pub prompt: &'a str,
    pub accumulated_messages: &'a [Message],
    pub retrieved_context: Option<&'a [RetrievedItem]>,
    pub iteration: u32,
}

/// The outcome of one stage invocation.
///
/// Consumed immediately by the controller. `content` is the payload shown to
/// clients; `text` is what later stages see in their accumulated context.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: Stage,
    pub content: serde_json::Value,
    pub text: String,
    pub confidence: Option<f32>,
    pub loop_decision: Option<bool>,
    pub auxiliary_items: Option<Vec<RetrievedItem>>,
    /// Effects raised while the stage ran, emitted before its `stage_output`.
    pub effects: Vec<Effect>,
}

impl StageResult {
    pub fn new(stage: Stage, content: serde_json::Value, text: impl Into<String>) -> Self {
        Self {
            stage,
            content,
            text: text.into(),
            confidence: None,
            loop_decision: None,
            auxiliary_items: None,
            effects: Vec::new(),
        }
    }

    /// A plain-text result whose payload is the text itself.
    pub fn from_text(stage: Stage, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(stage, serde_json::Value::String(text.clone()), text)
    }

    /// A degraded result: the stage's sentinel text plus an `error` effect.
    pub fn degraded(stage: Stage, sentinel: &str, error: &StageError) -> Self {
        Self::from_text(stage, sentinel).with_error(error)
    }

    pub fn with_confidence(mut self, confidence: Option<f32>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_loop_decision(mut self, decision: bool) -> Self {
        self.loop_decision = Some(decision);
        self
    }

    pub fn with_items(mut self, items: Vec<RetrievedItem>) -> Self {
        self.auxiliary_items = Some(items);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_error(self, error: &StageError) -> Self {
        let stage = self.stage;
        self.with_effect(Effect::from_error(stage, error))
    }

    /// The last `error` effect this stage raised.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.effects.iter().rev().find_map(|e| match e {
            Effect::Error {
                step,
                kind,
                message,
            } => Some(ErrorRecord {
                step: *step,
                kind: *kind,
                message: message.clone(),
            }),
            _ => None,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.last_error().is_some()
    }
}
