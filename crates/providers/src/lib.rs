//! Generation / embedding provider implementations for Choir.
//!
//! All providers implement the `choir_core::Provider` trait.
//! [`factory::build_from_config`] selects and configures the backend.

pub mod factory;
pub mod openai_compat;

pub use factory::build_from_config;
pub use openai_compat::OpenAiCompatProvider;
