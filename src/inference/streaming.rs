//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), parses each chunk as JSON, and accumulates native tool
//! call fragments across deltas. Text-embedded tool calls are left in the
//! token stream; the intent extractor deals with those.

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::errors::InferenceError;
use super::tool_call_parser::parse_native_json_tool_call;
use super::types::{ChatCompletionChunk, StreamChunk, ToolCall};
use crate::upstream::UpstreamError;

// ─── SSE line parser ─────────────────────────────────────────────────────────

/// Parse raw SSE bytes into `StreamChunk`s.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>> {
    parse_sse_bytes(response.bytes_stream())
}

/// Parse any byte stream of SSE events into `StreamChunk`s.
pub fn parse_sse_bytes<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        (byte_stream, StreamState::default(), String::new(), false),
        |(mut byte_stream, mut state, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(event_end) = find_event_end(&buffer) {
                    let event = buffer[..event_end.0].to_string();
                    buffer.drain(..event_end.0 + event_end.1);

                    match state.process_event(&event) {
                        Ok(Some(chunk)) => {
                            return Some((Ok(chunk), (byte_stream, state, buffer, false)))
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (byte_stream, state, buffer, false))),
                    }
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.decode_into(bytes.as_ref(), &mut buffer);
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, state, buffer, true),
                        ));
                    }
                    None => {
                        if !state.partial_utf8.is_empty() {
                            buffer.push_str(&String::from_utf8_lossy(&state.partial_utf8));
                            state.partial_utf8.clear();
                        }
                        let rest = std::mem::take(&mut buffer);
                        let result = if rest.trim().is_empty() {
                            state.finalize()
                        } else {
                            match state.process_event(rest.trim()) {
                                Ok(None) => state.finalize(),
                                other => other,
                            }
                        };
                        return match result {
                            Ok(Some(chunk)) => Some((Ok(chunk), (byte_stream, state, buffer, true))),
                            Ok(None) => None,
                            Err(e) => Some((Err(e), (byte_stream, state, buffer, true))),
                        };
                    }
                }
            }
        },
    )
}

/// Locate the end of the first complete SSE event: `(offset, separator_len)`.
fn find_event_end(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|i| (i, 2));
    let crlf = buffer.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

// ─── Stream State ────────────────────────────────────────────────────────────

/// In-progress native tool call, keyed by its delta index.
#[derive(Debug, Default)]
struct PendingToolCall {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct StreamState {
    pending_tool_calls: Vec<PendingToolCall>,
    finished: bool,
    /// Trailing bytes of a multi-byte character cut by a read boundary.
    partial_utf8: Vec<u8>,
}

impl StreamState {
    /// Append `bytes` to `buffer` as text, holding back an incomplete UTF-8
    /// sequence at the end until the next read completes it.
    fn decode_into(&mut self, bytes: &[u8], buffer: &mut String) {
        self.partial_utf8.extend_from_slice(bytes);
        let mut rest: &[u8] = &self.partial_utf8;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    buffer.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.partial_utf8 = rest.to_vec();
    }

    /// Process a single SSE event string (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) -> Result<Option<StreamChunk>, InferenceError> {
        let mut data_content = String::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                let data = data.trim();
                if data == "[DONE]" {
                    return self.finalize();
                }
                data_content.push_str(data);
            }
        }

        if data_content.is_empty() {
            return Ok(None);
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(&data_content).map_err(|e| {
            InferenceError::Upstream(UpstreamError::malformed(
                "llm",
                format!("failed to parse SSE chunk: {e}"),
            ))
        })?;

        self.process_chunk(chunk)
    }

    fn process_chunk(
        &mut self,
        chunk: ChatCompletionChunk,
    ) -> Result<Option<StreamChunk>, InferenceError> {
        let choice = match chunk.choices.into_iter().next() {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut result = StreamChunk {
            token: choice.delta.content.filter(|c| !c.is_empty()),
            tool_calls: None,
            finish_reason: choice.finish_reason,
        };

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let index = tc.index.unwrap_or(0);
            let (name, args) = tc
                .function
                .map(|f| (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()))
                .unwrap_or_default();

            match self.pending_tool_calls.iter_mut().find(|p| p.index == index) {
                Some(pending) => {
                    pending.name.push_str(&name);
                    pending.arguments.push_str(&args);
                    if tc.id.is_some() {
                        pending.id = tc.id;
                    }
                }
                None => self.pending_tool_calls.push(PendingToolCall {
                    index,
                    id: tc.id,
                    name,
                    arguments: args,
                }),
            }
        }

        if result.finish_reason.is_some() && !self.pending_tool_calls.is_empty() {
            let calls = self.finalize_native_tool_calls();
            if !calls.is_empty() {
                result.tool_calls = Some(calls);
                result.finish_reason = Some("tool_calls".into());
            }
        }
        if result.finish_reason.is_some() {
            self.finished = true;
        }

        if result.token.is_none() && result.tool_calls.is_none() && result.finish_reason.is_none()
        {
            return Ok(None);
        }
        Ok(Some(result))
    }

    fn finalize_native_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending_tool_calls)
            .into_iter()
            .filter_map(|p| parse_or_drop(p.id.as_deref(), &p.name, &p.arguments))
            .collect()
    }

    /// Finalize the stream: emit any native tool calls still pending.
    fn finalize(&mut self) -> Result<Option<StreamChunk>, InferenceError> {
        if !self.pending_tool_calls.is_empty() {
            let calls = self.finalize_native_tool_calls();
            if !calls.is_empty() {
                self.finished = true;
                return Ok(Some(StreamChunk {
                    token: None,
                    tool_calls: Some(calls),
                    finish_reason: Some("tool_calls".into()),
                }));
            }
        }
        if !self.finished {
            self.finished = true;
            return Ok(Some(StreamChunk {
                token: None,
                tool_calls: None,
                finish_reason: Some("stop".into()),
            }));
        }
        Ok(None)
    }
}

/// Decode one native call, or log and drop it so the rest of the reply
/// survives.
fn parse_or_drop(id: Option<&str>, name: &str, arguments: &str) -> Option<ToolCall> {
    match parse_native_json_tool_call(id, name, arguments) {
        Ok(call) => Some(call),
        Err(e) => {
            tracing::debug!(tool = %name, error = %e, "dropping malformed native tool call");
            None
        }
    }
}

// ─── Non-streaming ───────────────────────────────────────────────────────────

/// Parse a non-streaming response body into content and native tool calls.
pub fn parse_non_streaming_response(body: &str) -> Result<StreamChunk, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        choices: Vec<NonStreamChoice>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        content: Option<String>,
        tool_calls: Option<Vec<NonStreamToolCall>>,
    }

    #[derive(Deserialize)]
    struct NonStreamToolCall {
        id: Option<String>,
        function: NonStreamFunction,
    }

    #[derive(Deserialize)]
    struct NonStreamFunction {
        name: String,
        arguments: String,
    }

    let resp: NonStreamResponse = serde_json::from_str(body).map_err(|e| {
        UpstreamError::malformed("llm", format!("failed to parse completion: {e}"))
    })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| UpstreamError::malformed("llm", "empty choices array"))?;

    let content = choice.message.content.filter(|c| !c.is_empty());

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| parse_or_drop(tc.id.as_deref(), &tc.function.name, &tc.function.arguments))
        .collect();

    let finish_reason = if tool_calls.is_empty() {
        choice.finish_reason
    } else {
        Some("tool_calls".into())
    };

    Ok(StreamChunk {
        token: content,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
