//! Agent Core: everything between a user message and an assistant reply.
//!
//! Submodules:
//! - `extractor`: tool calls recovered from model text (JSON encodings)
//! - `watcher`: natural-language tool intents in streamed text
//! - `dedup`: at most one dispatch per call identity per turn
//! - `turn`: per-turn state shared by detection and dispatch
//! - `reassembler`: tool results folded back into the conversation
//! - `conversation`: conversations and the in-memory session store
//! - `orchestrator`: the chat service running whole turns
//! - `errors`: agent-level error types

pub mod conversation;
pub mod dedup;
pub mod errors;
pub mod extractor;
pub mod orchestrator;
pub mod reassembler;
pub mod turn;
pub mod watcher;

pub use conversation::{Conversation, Session, SessionLimits, SessionStore};
pub use dedup::DedupGuard;
pub use errors::AgentError;
pub use extractor::{extract, Extraction, ExtractionOutcome};
pub use orchestrator::{ChatService, TurnEvent, TurnOutcome};
pub use turn::TurnContext;
pub use watcher::{detect_intent, detect_intents, Phase, StreamingWatcher};
