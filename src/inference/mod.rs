//! Chat client for OpenAI-compatible completion APIs.
//!
//! This module handles all communication with the model provider:
//! - Streaming and non-streaming chat completions
//! - SSE stream parsing with native tool call accumulation
//! - Tool call argument decoding and repair
//! - Model fallback chain
//!
//! The provider is interchangeable via config; anything that speaks the
//! Chat Completions API works.

pub mod client;
pub mod errors;
pub mod streaming;
pub mod tool_call_parser;
pub mod types;

pub use client::{ChatClient, ChunkStream};
pub use errors::InferenceError;
pub use types::{ChatMessage, Role, StreamChunk, ToolCall, ToolDefinition};
