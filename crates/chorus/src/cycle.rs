//! The cycle controller.
//!
//! Drives a [`CycleState`] from Action to Yield: runs the current stage,
//! emits its effects, picks the next stage (including the Update → Action
//! back-edge) and builds the next state snapshot. Stage failures never abort
//! a run; only an empty prompt or a broken transition does.

use std::sync::Arc;

use choir_core::memory::VectorStore;
use choir_core::provider::Provider;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::effect::{Effect, EffectCollector};
use crate::error::{CycleError, ErrorKind};
use crate::retrieval::EmbeddingClient;
use crate::stage::{Stage, next_stage};
use crate::stages::{self, StageContext};
use crate::state::{CycleState, StageResult};
use crate::structured::GenerationSettings;

/// External collaborators, injected at construction.
#[derive(Clone)]
pub struct ChorusServices {
    pub generator: Arc<dyn Provider>,
    pub embeddings: EmbeddingClient,
    pub store: Arc<dyn VectorStore>,
}

impl ChorusServices {
    pub fn new(
        generator: Arc<dyn Provider>,
        embeddings: EmbeddingClient,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            generator,
            embeddings,
            store,
        }
    }
}

/// Tunables for a cycle run.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub generation: GenerationSettings,
    /// Maximum number of passes; an Update asking to loop on the last pass
    /// is overridden and the cycle yields.
    pub max_loops: u32,
    /// Top-K for Experience retrieval.
    pub search_limit: usize,
    /// Collection searched by Experience.
    pub collection: String,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            max_loops: 5,
            search_limit: 80,
            collection: "choir".into(),
        }
    }
}

impl CycleSettings {
    pub fn from_config(config: &choir_config::AppConfig) -> Self {
        Self {
            generation: GenerationSettings {
                model: config.chat_model.clone(),
                temperature: config.temperature,
                max_tokens: Some(config.max_tokens),
            },
            max_loops: config.chorus.max_loops,
            search_limit: config.chorus.search_limit,
            collection: config.vector_store.messages_collection.clone(),
        }
    }

    pub fn with_max_loops(mut self, max_loops: u32) -> Self {
        self.max_loops = max_loops;
        self
    }

    /// Hard ceiling on stage executions for one run.
    fn stage_budget(&self) -> usize {
        self.max_loops.max(1) as usize * 5 + 1
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub state: CycleState,
    pub effects: Vec<Effect>,
    pub iterations: u32,
    pub stages_executed: usize,
}

impl CycleOutcome {
    /// Content of the terminal response.
    pub fn final_response(&self) -> Option<&str> {
        self.effects.iter().find_map(|e| match e {
            Effect::TerminalResponse { content, .. } => Some(content.as_str()),
            _ => None,
        })
    }
}

/// The Chorus Cycle controller.
///
/// Holds no per-run state: concurrent runs on one instance share only the
/// injected service clients.
pub struct ChorusCycle {
    services: ChorusServices,
    settings: CycleSettings,
}

impl ChorusCycle {
    pub fn new(services: ChorusServices, settings: CycleSettings) -> Self {
        Self { services, settings }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one cycle and return the final state plus every effect.
    pub async fn run(&self, thread_id: &str, prompt: &str) -> Result<CycleOutcome, CycleError> {
        self.drive(thread_id, prompt, EffectCollector::new()).await
    }

    /// Like [`run`](Self::run), additionally forwarding each effect to
    /// `sender` as soon as it is emitted.
    pub async fn run_streaming(
        &self,
        thread_id: &str,
        prompt: &str,
        sender: UnboundedSender<Effect>,
    ) -> Result<CycleOutcome, CycleError> {
        self.drive(thread_id, prompt, EffectCollector::with_sender(sender))
            .await
    }

    async fn drive(
        &self,
        thread_id: &str,
        prompt: &str,
        mut effects: EffectCollector,
    ) -> Result<CycleOutcome, CycleError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(CycleError::ValidationFailure("prompt is empty".into()));
        }

        info!(
            thread_id,
            max_loops = self.settings.max_loops,
            "Starting chorus cycle"
        );

        let ctx = StageContext {
            generator: self.services.generator.as_ref(),
            embeddings: &self.services.embeddings,
            store: self.services.store.as_ref(),
            settings: &self.settings,
        };

        let budget = self.settings.stage_budget();
        let mut state = CycleState::new(thread_id, prompt);
        let mut stages_executed = 0usize;

        loop {
            let stage = state.current_stage;
            stages_executed += 1;
            if stages_executed > budget {
                return Err(CycleError::StateInvariantViolation(format!(
                    "{stages_executed} stages executed, budget is {budget}"
                )));
            }

            debug!(stage = %stage, iteration = state.iteration, "Executing stage");
            let result = stages::execute(stage, &ctx, state.stage_input()).await;
            if result.stage != stage {
                return Err(CycleError::StateInvariantViolation(format!(
                    "{stage} executor returned a {} result",
                    result.stage
                )));
            }
            if result.is_degraded() {
                warn!(stage = %stage, iteration = state.iteration, "Stage degraded");
            }

            for effect in &result.effects {
                effects.emit(effect.clone());
            }
            effects.emit(Effect::StageOutput {
                step: stage,
                content: result.content.clone(),
                priors: state.priors_after(&result),
            });

            match self.next(&state, &result, &mut effects) {
                Some(next) => {
                    if !stage.can_transition_to(next) {
                        return Err(CycleError::StateInvariantViolation(format!(
                            "illegal transition {stage} -> {next}"
                        )));
                    }
                    if next == Stage::Action {
                        info!(iteration = state.iteration, "Looping back to action");
                    }
                    state = state.advance(&result, next);
                }
                None => {
                    effects.emit(Effect::TerminalResponse {
                        content: result.text.clone(),
                        confidence: result.confidence,
                        iterations: state.iteration,
                    });
                    state = state.finish(&result);
                    break;
                }
            }
        }

        info!(
            thread_id,
            iterations = state.iteration,
            stages = stages_executed,
            effects = effects.len(),
            "Chorus cycle complete"
        );

        Ok(CycleOutcome {
            iterations: state.iteration,
            state,
            effects: effects.into_effects(),
            stages_executed,
        })
    }

    /// Next stage, applying the max-loop guard on top of [`next_stage`].
    fn next(
        &self,
        state: &CycleState,
        result: &StageResult,
        effects: &mut EffectCollector,
    ) -> Option<Stage> {
        let next = next_stage(state.current_stage, result.loop_decision)?;
        if next == Stage::Action && state.iteration >= self.settings.max_loops {
            warn!(
                iteration = state.iteration,
                max_loops = self.settings.max_loops,
                "Loop limit reached, forcing yield"
            );
            effects.emit(Effect::Error {
                step: Stage::Update,
                kind: ErrorKind::LoopLimitReached,
                message: format!(
                    "Update requested another pass after {} of {} allowed; yielding",
                    state.iteration, self.settings.max_loops
                ),
            });
            return Some(Stage::Yield);
        }
        Some(next)
    }
}
