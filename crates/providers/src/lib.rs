//! LLM access for Pegasus: the provider-agnostic [`LanguageModel`]
//! trait, wire adapters, OAuth credential storage, and the tiered model
//! registry.

pub mod anthropic;
pub mod oauth;
pub mod openai_compat;
pub mod registry;
pub mod traits;

pub use registry::ModelRegistry;
pub use traits::{GenerateRequest, GenerateResponse, LanguageModel};
