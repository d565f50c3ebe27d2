//! Structured-generation LLM providers for FieldSage.
//!
//! All providers implement the `fieldsage_core::Provider` trait and stream
//! the schema-constrained JSON document as text fragments.
//! The router selects the correct provider based on configuration.

pub mod anthropic;
pub mod openai_compat;
pub mod router;
mod sse;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::ProviderRouter;
