//! Effects: recorded, not-yet-executed outcomes of a cycle run.
//!
//! The cycle never touches the network or a store on its own behalf. Every
//! externally observable consequence is appended to an [`EffectCollector`]
//! and handed back to the caller, who decides how to execute it.
//!
//! Wire shape (one JSON object per effect, tagged by `type`):
//! - `stage_output`: a stage finished; carries its output and priors
//! - `retrieval_result`: items the Experience stage retrieved
//! - `persist_message`: a conversation record the caller should store
//! - `error`: something degraded; the cycle continued
//! - `terminal_response`: the final answer, emitted exactly once

use choir_core::memory::RetrievedItem;
use choir_core::message::Role;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::{ErrorKind, StageError};
use crate::stage::Stage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Output of one stage invocation.
    StageOutput {
        step: Stage,
        content: serde_json::Value,
        #[serde(default)]
        priors: Vec<RetrievedItem>,
    },

    /// Items retrieved for the Experience stage (possibly empty).
    RetrievalResult {
        step: Stage,
        items: Vec<RetrievedItem>,
    },

    /// A message the caller should embed and store.
    PersistMessage {
        thread_id: String,
        role: Role,
        content: String,
        step: Stage,
    },

    /// A degraded stage or a guard firing.
    Error {
        step: Stage,
        kind: ErrorKind,
        message: String,
    },

    /// The final user-facing answer.
    TerminalResponse {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        iterations: u32,
    },
}

/// Discriminant of an [`Effect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    StageOutput,
    RetrievalResult,
    PersistMessage,
    Error,
    TerminalResponse,
}

impl Effect {
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::StageOutput { .. } => EffectKind::StageOutput,
            Self::RetrievalResult { .. } => EffectKind::RetrievalResult,
            Self::PersistMessage { .. } => EffectKind::PersistMessage,
            Self::Error { .. } => EffectKind::Error,
            Self::TerminalResponse { .. } => EffectKind::TerminalResponse,
        }
    }

    /// Build an `error` effect from a stage failure.
    pub fn from_error(step: Stage, error: &StageError) -> Self {
        Self::Error {
            step,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// The stage this effect belongs to, if any.
    pub fn step(&self) -> Option<Stage> {
        match self {
            Self::StageOutput { step, .. }
            | Self::RetrievalResult { step, .. }
            | Self::PersistMessage { step, .. }
            | Self::Error { step, .. } => Some(*step),
            Self::TerminalResponse { .. } => None,
        }
    }
}

/// Append-only, emission-ordered effect log for one cycle run.
///
/// Optionally tees every effect into an unbounded channel so a transport can
/// forward them progressively. A closed channel is dropped silently; the log
/// itself is always complete.
#[derive(Debug, Default)]
pub struct EffectCollector {
    effects: Vec<Effect>,
    tee: Option<UnboundedSender<Effect>>,
}

impl EffectCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collector that also forwards each effect to `sender`.
    pub fn with_sender(sender: UnboundedSender<Effect>) -> Self {
        Self {
            effects: Vec::new(),
            tee: Some(sender),
        }
    }

    pub fn emit(&mut self, effect: Effect) {
        if let Some(tx) = &self.tee
            && tx.send(effect.clone()).is_err()
        {
            debug!("Effect receiver dropped, continuing without streaming");
            self.tee = None;
        }
        self.effects.push(effect);
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Number of effects of the given kind.
    pub fn count(&self, kind: EffectKind) -> usize {
        self.effects.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}
