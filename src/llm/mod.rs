//! Inference endpoint integration.
//!
//! Provides an OpenAI-compatible multimodal client and the prompt texts
//! used by each evaluation variant.

mod client;
mod prompts;

pub use client::{
    ContentPart, ImageUrl, InferenceBackend, InferenceRequest, LlmClient, Message, MessageContent,
    Role,
};
pub use prompts::Prompts;
