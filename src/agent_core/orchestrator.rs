//! Chat service: one user message in, one assistant reply out.
//!
//! A turn is: first completion (with tools) → extract calls → parallel
//! dispatch of admitted calls → follow-up completion (without tools). When
//! the follow-up fails the reply is a plain rendering of the tool results.
//!
//! The streaming variant dispatches calls as soon as they are recognized in
//! the stream, so tools run while the model is still talking.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::conversation::{Session, SessionLimits, SessionStore};
use super::errors::AgentError;
use super::extractor::{extract, ExtractionOutcome};
use super::reassembler::{build_follow_up, render_results_fallback, tool_exchange};
use super::watcher::{detect_intents, Phase, StreamingWatcher};
use crate::inference::types::{ChatMessage, StreamChunk, ToolCall};
use crate::inference::ChatClient;
use crate::tokens::fit_to_budget;
use crate::tools::{ToolDispatcher, ToolError, ToolResult};

/// Buffered events per streaming turn before the producer waits.
const EVENT_BUFFER: usize = 64;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Result of a non-streaming turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// The reply was rendered locally because the follow-up completion failed.
    pub degraded: bool,
}

/// Progress of a streaming turn, delivered to the client as SSE.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Session { session_id: String },
    /// Text to append to the visible assistant message.
    Token { text: String },
    /// The visible assistant message changed in place (a tool-call encoding
    /// was removed); replaces everything shown so far.
    Replace { text: String },
    ToolCall { call: ToolCall },
    ToolResult { result: ToolResult },
    Final {
        session_id: String,
        reply: String,
        degraded: bool,
    },
    Error { message: String },
}

impl TurnEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Token { .. } => "token",
            Self::Replace { .. } => "replace",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }
}

// ─── ChatService ────────────────────────────────────────────────────────────

pub struct ChatService {
    client: ChatClient,
    dispatcher: ToolDispatcher,
    sessions: SessionStore,
    watcher: StreamingWatcher,
}

impl ChatService {
    pub fn new(
        client: ChatClient,
        dispatcher: ToolDispatcher,
        system_prompt: &str,
        natural_language_intents: bool,
    ) -> Self {
        Self {
            client,
            dispatcher,
            sessions: SessionStore::new(system_prompt),
            watcher: StreamingWatcher::new(natural_language_intents),
        }
    }

    pub fn with_session_limits(mut self, limits: SessionLimits) -> Self {
        self.sessions.set_limits(limits);
        self
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn prompt(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        fit_to_budget(messages, self.client.prompt_budget())
    }

    // ─── Non-streaming turn ─────────────────────────────────────────────

    pub async fn run_turn(&self, session_id: Option<&str>, message: &str) -> Result<TurnOutcome, AgentError> {
        let message = non_empty(message)?;
        let (_, shared) = self.sessions.get_or_create(session_id)?;
        let mut guard = shared.lock().await;
        let session = &mut *guard;

        let turn = session.turn.begin_turn();
        tracing::info!(session_id = %session.id, turn, "turn started");

        let tools = self.dispatcher.definitions();
        let first = self
            .client
            .chat_completion(&self.prompt(&with_user(session, message)), Some(&tools))
            .await?;
        session.conversation.push(ChatMessage::user(message));

        let text = first.token.unwrap_or_default();
        let extraction = extract(&text, first.tool_calls.as_deref());
        let mut candidates = extraction.calls().to_vec();
        if candidates.is_empty() && self.watcher.is_enabled() {
            candidates = detect_intents(&extraction.display_text, Phase::Complete);
        }
        let calls: Vec<ToolCall> = candidates
            .into_iter()
            .filter(|call| session.turn.admit(call))
            .collect();

        if calls.is_empty() {
            session
                .conversation
                .push(ChatMessage::assistant(&extraction.display_text));
            return Ok(TurnOutcome {
                session_id: session.id.clone(),
                reply: extraction.display_text,
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
                degraded: false,
            });
        }

        let results = join_all(calls.iter().map(|call| self.dispatcher.dispatch(call))).await;
        let (reply, degraded) = self
            .follow_up(session, &extraction.display_text, &calls, &results)
            .await;

        Ok(TurnOutcome {
            session_id: session.id.clone(),
            reply,
            tool_calls: calls,
            tool_results: results,
            degraded,
        })
    }

    /// Request the final answer and record the tool round in the session.
    async fn follow_up(
        &self,
        session: &mut Session,
        display_text: &str,
        calls: &[ToolCall],
        results: &[ToolResult],
    ) -> (String, bool) {
        let messages = build_follow_up(session.conversation.messages(), display_text, calls, results);

        let (reply, degraded) = match self.client.chat_completion(&self.prompt(&messages), None).await {
            Ok(chunk) => {
                let text = final_text(chunk);
                if text.is_empty() {
                    tracing::warn!(session_id = %session.id, "follow-up completion was empty");
                    (render_results_fallback(results), true)
                } else {
                    (text, false)
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "follow-up completion failed");
                (render_results_fallback(results), true)
            }
        };

        session
            .conversation
            .extend(tool_exchange(display_text, calls, results));
        session.conversation.push(ChatMessage::assistant(&reply));
        (reply, degraded)
    }

    // ─── Streaming turn ─────────────────────────────────────────────────

    /// Start a streaming turn. Events arrive on the returned receiver; the
    /// turn keeps running if the receiver is dropped.
    pub fn run_turn_streaming(
        self: &Arc<Self>,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<(String, mpsc::Receiver<TurnEvent>), AgentError> {
        let message = non_empty(message)?.to_string();
        let (session_id, shared) = self.sessions.get_or_create(session_id)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let mut session = shared.lock().await;
            let events = Events { tx };
            events
                .send(TurnEvent::Session {
                    session_id: session.id.clone(),
                })
                .await;
            if let Err(e) = service.stream_turn(&mut session, &message, &events).await {
                tracing::warn!(session_id = %session.id, error = %e, "streaming turn failed");
                events
                    .send(TurnEvent::Error {
                        message: e.user_message(),
                    })
                    .await;
            }
        });

        Ok((session_id, rx))
    }

    async fn stream_turn(&self, session: &mut Session, message: &str, events: &Events) -> Result<(), AgentError> {
        let turn = session.turn.begin_turn();
        tracing::info!(session_id = %session.id, turn, "streaming turn started");

        let tools = self.dispatcher.definitions();
        let mut stream = self
            .client
            .chat_completion_stream(&self.prompt(&with_user(session, message)), Some(&tools))
            .await?;

        let message_id = format!("msg_{}", Uuid::new_v4());
        let mut accumulated = String::new();
        let mut shown = String::new();
        let mut inflight = InFlight::new(self.dispatcher.clone());

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) if accumulated.is_empty() && inflight.is_empty() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "stream ended early");
                    break;
                }
            };

            if let Some(calls) = chunk.tool_calls {
                for call in calls {
                    if session.turn.admit(&call) {
                        inflight.start(call, events).await;
                    }
                }
            }

            let Some(token) = chunk.token.filter(|t| !t.is_empty()) else {
                continue;
            };
            accumulated.push_str(&token);

            let extraction = extract(&accumulated, None);
            if let ExtractionOutcome::Found(calls) = &extraction.outcome {
                for call in calls {
                    if session.turn.admit(call) {
                        inflight.start(call.clone(), events).await;
                    }
                }
            }
            show(&mut shown, extraction.display_text, events).await;

            for call in self
                .watcher
                .scan_delta(&mut session.turn, &message_id, &shown)
            {
                inflight.start(call, events).await;
            }
        }

        // The model answered; the user message is now part of the record.
        session.conversation.push(ChatMessage::user(message));

        let extraction = extract(&accumulated, None);
        for call in extraction.calls() {
            if session.turn.admit(call) {
                inflight.start(call.clone(), events).await;
            }
        }
        show(&mut shown, extraction.display_text, events).await;
        for call in self.watcher.finish(&mut session.turn, &message_id, &shown) {
            inflight.start(call, events).await;
        }

        if inflight.is_empty() {
            session.conversation.push(ChatMessage::assistant(&shown));
            events
                .send(TurnEvent::Final {
                    session_id: session.id.clone(),
                    reply: shown,
                    degraded: false,
                })
                .await;
            return Ok(());
        }

        let (calls, results) = inflight.finish(events).await;
        let (reply, degraded) = self.follow_up(session, &shown, &calls, &results).await;
        events
            .send(TurnEvent::Final {
                session_id: session.id.clone(),
                reply,
                degraded,
            })
            .await;
        Ok(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn non_empty(message: &str) -> Result<&str, AgentError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AgentError::EmptyMessage);
    }
    Ok(message)
}

/// The session's messages plus the not yet recorded user message.
fn with_user(session: &Session, message: &str) -> Vec<ChatMessage> {
    let mut messages = session.conversation.messages().to_vec();
    messages.push(ChatMessage::user(message));
    messages
}

/// Visible text of a follow-up reply, with any stray call encodings removed.
fn final_text(chunk: StreamChunk) -> String {
    let text = chunk.token.unwrap_or_default();
    extract(&text, None).display_text.trim().to_string()
}

struct Events {
    tx: mpsc::Sender<TurnEvent>,
}

impl Events {
    /// Deliver an event. A departed client is not an error.
    async fn send(&self, event: TurnEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("turn event dropped, client disconnected");
        }
    }
}

/// Bring the client's view in line with `display`.
async fn show(shown: &mut String, display: String, events: &Events) {
    if display == *shown {
        return;
    }
    match display.strip_prefix(shown.as_str()) {
        Some(suffix) => {
            events
                .send(TurnEvent::Token {
                    text: suffix.to_string(),
                })
                .await;
        }
        None => {
            events
                .send(TurnEvent::Replace {
                    text: display.clone(),
                })
                .await;
        }
    }
    *shown = display;
}

/// Tool calls dispatched during a streaming turn.
struct InFlight {
    dispatcher: ToolDispatcher,
    calls: Vec<ToolCall>,
    tasks: JoinSet<ToolResult>,
}

impl InFlight {
    fn new(dispatcher: ToolDispatcher) -> Self {
        Self {
            dispatcher,
            calls: Vec::new(),
            tasks: JoinSet::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    async fn start(&mut self, call: ToolCall, events: &Events) {
        events.send(TurnEvent::ToolCall { call: call.clone() }).await;
        let dispatcher = self.dispatcher.clone();
        let task_call = call.clone();
        self.tasks
            .spawn(async move { dispatcher.dispatch(&task_call).await });
        self.calls.push(call);
    }

    /// Wait for every call; results come back in dispatch order.
    async fn finish(mut self, events: &Events) -> (Vec<ToolCall>, Vec<ToolResult>) {
        let mut finished: Vec<ToolResult> = Vec::with_capacity(self.calls.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => {
                    events
                        .send(TurnEvent::ToolResult {
                            result: result.clone(),
                        })
                        .await;
                    finished.push(result);
                }
                Err(e) => tracing::warn!(error = %e, "tool task did not complete"),
            }
        }

        let mut results = Vec::with_capacity(self.calls.len());
        for call in &self.calls {
            match finished.iter().position(|r| r.tool_call_id == call.id) {
                Some(i) => results.push(finished.swap_remove(i)),
                None => {
                    let err = ToolError::execution("tool task aborted");
                    let result = ToolResult::failed(call, &call.name, &err, Duration::ZERO);
                    events
                        .send(TurnEvent::ToolResult {
                            result: result.clone(),
                        })
                        .await;
                    results.push(result);
                }
            }
        }
        (self.calls, results)
    }
}
