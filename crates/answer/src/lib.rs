//! Answer pipeline for FieldSage.
//!
//! Turns an [`AnswerRequest`](fieldsage_core::AnswerRequest) into a stream of
//! schema-validated answer updates:
//!
//! - [`assembler`] renders the deterministic prompt
//! - [`history`] windows the conversation
//! - [`completion`] drives one structured generation and validates snapshots
//! - [`transport`] adapts updates to plain-text or event delivery
//! - [`engine`] wires it all together

pub mod assembler;
pub mod completion;
pub mod engine;
pub mod history;
pub mod partial_json;
pub mod transport;

pub use assembler::{Prompt, build_prompt};
pub use completion::{AnswerStream, AnswerUpdate, CompletionClient, GenerationSettings};
pub use engine::AnswerEngine;
pub use history::{render_history, render_history_window};
pub use partial_json::parse_partial;
pub use transport::{TextBody, TransportEvent, to_event_stream, to_response_stream};
