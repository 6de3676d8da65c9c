//! The Chorus Cycle: the heart of Choir.
//!
//! A prompt passes through six stages, each a call to the generation
//! service with a stage-specific instruction and response schema:
//!
//! 1. **Action**: answer immediately, with beginner's mind
//! 2. **Experience**: embed the prompt, retrieve similar prior items, refine
//! 3. **Intention**: separate explicit from implicit intent
//! 4. **Observation**: look for gaps and biases; record the analysis
//! 5. **Update**: loop back to Action or move on
//! 6. **Yield**: synthesise the final answer
//!
//! The controller never performs side effects itself. Everything observable
//! (stage outputs, retrievals, persistence requests, errors, the terminal
//! answer) is returned as an ordered list of [`Effect`]s for the caller to
//! execute.

pub mod cycle;
pub mod effect;
pub mod error;
pub mod retrieval;
pub mod stage;
pub mod stages;
pub mod state;
pub mod structured;

#[cfg(test)]
mod test_helpers;

pub use cycle::{ChorusCycle, ChorusServices, CycleOutcome, CycleSettings};
pub use effect::{Effect, EffectCollector, EffectKind};
pub use error::{CycleError, ErrorKind, StageError};
pub use retrieval::{Embedding, EmbeddingClient, average_vectors, chunk_text};
pub use stage::{Stage, next_stage};
pub use state::{CycleState, ErrorRecord, StageInput, StageResult};
pub use structured::{GenerationSettings, Structured, generate_structured};
