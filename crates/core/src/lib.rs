//! # FieldSage Core
//!
//! Domain types, traits, and error definitions for the FieldSage answer
//! engine.
//!
//! The model provider is defined as a trait here and the valid output shapes
//! are declared here once. Implementations live in their respective crates,
//! which all depend inward on core.

pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod schema;

// Re-export key types at crate root for ergonomics
pub use context::{AnswerRequest, FieldContext, ProjectContext};
pub use error::{Error, ProviderError, Result, SchemaViolation};
pub use message::{ChatMessage, MessageType};
pub use provider::{GenerationChunk, GenerationRequest, GenerationStream, Provider, Usage};
pub use schema::{
    AnswerResult, Assumption, AssumptionSource, OutputSchema, PartialAnswer, PartialAssumption,
    SchemaKind, resolve_schema,
};
