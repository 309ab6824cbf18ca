//! Streaming Intent Watcher: natural-language tool intents in assistant text.
//!
//! Some models announce a tool instead of calling it ("I'll search for the
//! capital of France."). Detection is a pure function over text; the
//! [`StreamingWatcher`] adds incremental scanning over streamed deltas and
//! routes every hit through the turn's Dedup Guard.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use super::turn::TurnContext;
use crate::inference::types::ToolCall;
use crate::tools::ToolName;

/// Whether the text may still grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Mid-stream: a phrase counts only once its terminator has arrived.
    Streaming,
    /// Final text: end of text also terminates a phrase.
    Complete,
}

/// Queries that carry no information on their own.
const VAGUE_QUERIES: &[&str] = &[
    "it", "that", "this", "them", "those", "more", "you", "information", "more information",
    "details", "more details", "the answer", "an answer",
];

/// Function names and constants allowed inside a detected math phrase.
const MATH_WORDS: &[&str] = &[
    "sqrt", "abs", "sin", "cos", "tan", "asin", "acos", "atan", "ln", "log", "log10", "log2",
    "exp", "floor", "ceil", "round", "min", "max", "pow", "pi", "e",
];

/// Words that may sit between a calculate verb and the expression.
const MATH_FILLER: &[&str] = &[
    "the", "value", "result", "of", "what", "is", "how", "much", "that", "this",
];

const MAX_QUERY_CHARS: usize = 300;

#[derive(Debug, Clone, Copy)]
enum Intent {
    Search,
    Calculate,
    Grounded,
}

struct Trigger {
    intent: Intent,
    pattern: Regex,
}

/// Phrase argument, then a terminator: sentence punctuation followed by
/// whitespace or end of text, a newline, or end of text. Mid-stream only
/// punctuation already followed by whitespace, or a newline, counts.
const ARG_AND_TERMINATOR: &str = r"(?P<arg>[^\n]+?)(?P<term>[.!?](?:\s|$)|\n|$)";

fn triggers() -> &'static [Trigger] {
    static TRIGGERS: OnceLock<Vec<Trigger>> = OnceLock::new();
    TRIGGERS.get_or_init(|| {
        let specs = [
            (
                Intent::Search,
                r"(?i)\b(?:search(?:ing)?\s+(?:the\s+web\s+|online\s+|the\s+internet\s+)?for|look(?:ing)?\s+up|(?-i:googl(?:e|ing)))\s+",
            ),
            (
                Intent::Calculate,
                r"(?i)\b(?:calculat(?:e|ing)|comput(?:e|ing)|evaluat(?:e|ing))\s+",
            ),
            (
                Intent::Grounded,
                r"(?i)\bfind(?:ing)?\s+(?:sources|citations|references)\s+(?:for|on|about)\s+",
            ),
        ];
        specs
            .into_iter()
            .filter_map(|(intent, prefix)| {
                match Regex::new(&format!("{prefix}{ARG_AND_TERMINATOR}")) {
                    Ok(pattern) => Some(Trigger { intent, pattern }),
                    Err(e) => {
                        tracing::warn!(error = %e, "invalid intent trigger pattern");
                        None
                    }
                }
            })
            .collect()
    })
}

/// All intents in `text`, in order of appearance, without duplicates.
pub fn detect_intents(text: &str, phase: Phase) -> Vec<ToolCall> {
    let mut hits: Vec<(usize, ToolCall)> = Vec::new();

    for trigger in triggers() {
        for caps in trigger.pattern.captures_iter(text) {
            let (Some(whole), Some(arg), Some(term)) = (caps.get(0), caps.name("arg"), caps.name("term"))
            else {
                continue;
            };
            if phase == Phase::Streaming && !is_settled(text, term) {
                continue;
            }
            if let Some(call) = build_call(trigger.intent, arg.as_str()) {
                hits.push((whole.start(), call));
            }
        }
    }

    hits.sort_by_key(|(pos, _)| *pos);
    let mut calls: Vec<ToolCall> = Vec::new();
    for (_, call) in hits {
        if !calls
            .iter()
            .any(|c| c.name == call.name && c.arguments == call.arguments)
        {
            calls.push(call);
        }
    }
    calls
}

/// A terminator that more streamed text cannot extend: "3." may still
/// become "3.5", "3. " cannot.
fn is_settled(text: &str, term: regex::Match<'_>) -> bool {
    term.end() < text.len() || term.as_str().ends_with(char::is_whitespace)
}

/// First intent in a finished text.
pub fn detect_intent(text: &str) -> Option<ToolCall> {
    detect_intents(text, Phase::Complete).into_iter().next()
}

fn build_call(intent: Intent, raw: &str) -> Option<ToolCall> {
    match intent {
        Intent::Search => {
            let query = normalize_query(raw)?;
            Some(ToolCall::new(
                ToolName::WebSearch.as_str(),
                json!({ "query": query }),
            ))
        }
        Intent::Grounded => {
            let query = normalize_query(raw)?;
            Some(ToolCall::new(
                ToolName::GroundedAnswer.as_str(),
                json!({ "query": query, "include_citations": true }),
            ))
        }
        Intent::Calculate => {
            let expression = math_phrase(raw)?;
            Some(ToolCall::new(
                ToolName::Calculator.as_str(),
                json!({ "expression": expression, "operation": "evaluate" }),
            ))
        }
    }
}

/// Trim, drop wrapping quotes and trailing punctuation, collapse whitespace.
pub fn normalize_query(raw: &str) -> Option<String> {
    const QUOTES: &[char] = &['"', '\'', '`', '“', '”', '‘', '’', '«', '»'];
    const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', '…'];

    let mut s = raw.trim();
    loop {
        let next = s
            .trim_end_matches(TRAILING)
            .trim_matches(QUOTES)
            .trim();
        if next == s {
            break;
        }
        s = next;
    }

    let query = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = query.to_lowercase();
    if query.is_empty() || query.chars().count() > MAX_QUERY_CHARS || VAGUE_QUERIES.contains(&lower.as_str()) {
        return None;
    }
    Some(query)
}

/// The arithmetic part of a "calculate ..." phrase, or `None` without a digit.
fn math_phrase(raw: &str) -> Option<String> {
    let mut words = raw.split_whitespace().peekable();
    while words
        .peek()
        .is_some_and(|w| MATH_FILLER.contains(&w.to_lowercase().as_str()))
    {
        words.next();
    }

    let mut kept = Vec::new();
    for word in words {
        if is_math_word(word) {
            kept.push(word);
        } else {
            break;
        }
    }

    let expression = kept
        .join(" ")
        .trim_end_matches(['.', ',', ';', ':', '!', '?', '='])
        .trim()
        .to_string();
    expression
        .chars()
        .any(|c| c.is_ascii_digit())
        .then_some(expression)
}

fn is_math_word(word: &str) -> bool {
    const SYMBOLS: &str = "0123456789+-*/^%().,=×÷−";
    let mut rest = word;
    while !rest.is_empty() {
        let alpha_len = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphabetic())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if alpha_len > 0 {
            let ident = &rest[..alpha_len];
            let ident_end = rest[alpha_len..]
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map(|(i, _)| alpha_len + i)
                .unwrap_or(rest.len());
            let with_digits = &rest[..ident_end];
            if !(MATH_WORDS.contains(&ident.to_lowercase().as_str())
                || MATH_WORDS.contains(&with_digits.to_lowercase().as_str())
                || ident.len() == 1)
            {
                return false;
            }
            rest = &rest[ident_end..];
            continue;
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        if !SYMBOLS.contains(c) {
            return false;
        }
        rest = &rest[c.len_utf8()..];
    }
    true
}

// ─── StreamingWatcher ───────────────────────────────────────────────────────

/// Incremental intent scanning for one streamed assistant message.
#[derive(Debug, Clone, Copy)]
pub struct StreamingWatcher {
    enabled: bool,
}

impl StreamingWatcher {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Scan the text added since the last call and return newly admitted calls.
    pub fn scan_delta(&self, turn: &mut TurnContext, message_id: &str, accumulated: &str) -> Vec<ToolCall> {
        if !self.enabled {
            return Vec::new();
        }
        let previous = turn.scanned_len(message_id).min(accumulated.len());
        let start = sentence_start(accumulated, previous);
        let calls = detect_intents(&accumulated[start..], Phase::Streaming);
        turn.record_scanned(message_id, accumulated.len());
        admit_all(turn, calls)
    }

    /// Rescan the whole finished message.
    pub fn finish(&self, turn: &mut TurnContext, message_id: &str, accumulated: &str) -> Vec<ToolCall> {
        if !self.enabled {
            return Vec::new();
        }
        let calls = detect_intents(accumulated, Phase::Complete);
        turn.record_scanned(message_id, accumulated.len());
        admit_all(turn, calls)
    }
}

fn admit_all(turn: &mut TurnContext, calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls.into_iter().filter(|call| turn.admit(call)).collect()
}

/// Start of the sentence containing byte `pos`: just past the last settled
/// terminator before it. Punctuation counts only when whitespace follows it
/// within `text[..pos]`.
fn sentence_start(text: &str, pos: usize) -> usize {
    let bytes = &text.as_bytes()[..pos];
    (0..bytes.len())
        .rev()
        .find(|&i| match bytes[i] {
            b'\n' => true,
            b'.' | b'!' | b'?' => bytes.get(i + 1).is_some_and(|b| b.is_ascii_whitespace()),
            _ => false,
        })
        .map(|i| i + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_of(call: &ToolCall) -> &str {
        call.arguments["query"].as_str().unwrap()
    }

    #[test]
    fn test_search_phrases() {
        for (text, expected) in [
            ("I'll search for the capital of France.", "the capital of France"),
            ("Let me search the web for rust async traits!", "rust async traits"),
            ("Searching online for \"tokio 1.40 release notes\".", "tokio 1.40 release notes"),
            ("I'm looking up the weather in Oslo\nthen I'll answer", "the weather in Oslo"),
            ("let me google best pizza in Naples?", "best pizza in Naples"),
        ] {
            let call = detect_intent(text).unwrap_or_else(|| panic!("no intent in {text}"));
            assert_eq!(call.name, "web_search");
            assert_eq!(query_of(&call), expected, "{text}");
        }
    }

    #[test]
    fn test_capitalized_google_is_a_noun() {
        assert!(detect_intent("Google released a new model.").is_none());
    }

    #[test]
    fn test_calculate_phrase_requires_digit() {
        let call = detect_intent("Let me calculate 12 * (3 + 4) for you.").unwrap();
        assert_eq!(call.name, "calculator");
        assert_eq!(call.arguments["expression"], "12 * (3 + 4)");
        assert_eq!(call.arguments["operation"], "evaluate");

        let call = detect_intent("I'll compute the value of sqrt(16) + 2.").unwrap();
        assert_eq!(call.arguments["expression"], "sqrt(16) + 2");

        assert!(detect_intent("I'll calculate the total for you.").is_none());
    }

    #[test]
    fn test_grounded_phrase() {
        let call = detect_intent("I will find sources for the 2024 Nobel Prize in Physics.").unwrap();
        assert_eq!(call.name, "grounded_answer");
        assert_eq!(query_of(&call), "the 2024 Nobel Prize in Physics");
        assert_eq!(call.arguments["include_citations"], true);
    }

    #[test]
    fn test_vague_query_ignored() {
        assert!(detect_intent("I'll look up that.").is_none());
    }

    #[test]
    fn test_streaming_phase_waits_for_terminator() {
        let text = "I'll search for the capital of France";
        assert!(detect_intents(text, Phase::Streaming).is_empty());
        assert_eq!(detect_intents(text, Phase::Complete).len(), 1);
        assert_eq!(detect_intents(&format!("{text}. One"), Phase::Streaming).len(), 1);
    }

    #[test]
    fn test_decimal_point_is_not_a_terminator() {
        let calls = detect_intents("Let me calculate 3.5 * 2 and", Phase::Streaming);
        assert!(calls.is_empty());
        let call = detect_intent("Let me calculate 3.5 * 2").unwrap();
        assert_eq!(call.arguments["expression"], "3.5 * 2");
    }

    #[test]
    fn test_decimal_split_across_deltas_dispatches_full_number() {
        let watcher = StreamingWatcher::new(true);
        let mut turn = TurnContext::new();
        turn.begin_turn();

        let mut text = String::new();
        let mut calls = Vec::new();
        for delta in ["Let me calculate 3", ".", "5 * 2. Done."] {
            text.push_str(delta);
            calls.extend(watcher.scan_delta(&mut turn, "m1", &text));
        }
        calls.extend(watcher.finish(&mut turn, "m1", &text));

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["expression"], "3.5 * 2");
        assert_eq!(turn.dispatched_count(), 1);
    }

    #[test]
    fn test_version_number_split_across_deltas() {
        let watcher = StreamingWatcher::new(true);
        let mut turn = TurnContext::new();
        turn.begin_turn();

        let mut text = String::new();
        let mut calls = Vec::new();
        for delta in ["I'll search for tokio 1", ".", "40 release notes", ". One moment."] {
            text.push_str(delta);
            calls.extend(watcher.scan_delta(&mut turn, "m1", &text));
        }
        assert_eq!(calls.len(), 1);
        assert_eq!(query_of(&calls[0]), "tokio 1.40 release notes");
        assert!(watcher.finish(&mut turn, "m1", &text).is_empty());
    }

    #[test]
    fn test_trailing_period_waits_for_whitespace() {
        assert!(detect_intents("Let me calculate 3.", Phase::Streaming).is_empty());
        assert_eq!(detect_intents("Let me calculate 3. ", Phase::Streaming).len(), 1);
        assert_eq!(detect_intents("Let me calculate 3.", Phase::Complete).len(), 1);
    }

    #[test]
    fn test_streaming_and_complete_share_identity() {
        let streamed = detect_intents("I'll search for \"Rust\". One moment.", Phase::Streaming);
        let finished = detect_intents("I'll search for Rust", Phase::Complete);
        assert_eq!(streamed[0].arguments, finished[0].arguments);
    }

    #[test]
    fn test_multiple_intents_in_order() {
        let calls = detect_intents(
            "First I'll calculate 2 + 2. Then I'll search for rust books.",
            Phase::Complete,
        );
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["calculator", "web_search"]);
    }

    #[test]
    fn test_watcher_dispatches_once_across_deltas() {
        let watcher = StreamingWatcher::new(true);
        let mut turn = TurnContext::new();
        turn.begin_turn();

        let mut text = String::from("I'll search for the capital of France");
        assert!(watcher.scan_delta(&mut turn, "m1", &text).is_empty());

        text.push_str(". One moment.");
        let calls = watcher.scan_delta(&mut turn, "m1", &text);
        assert_eq!(calls.len(), 1);
        assert_eq!(query_of(&calls[0]), "the capital of France");

        text.push_str(" Still thinking.");
        assert!(watcher.scan_delta(&mut turn, "m1", &text).is_empty());
        assert!(watcher.finish(&mut turn, "m1", &text).is_empty());
        assert_eq!(turn.dispatched_count(), 1);
    }

    #[test]
    fn test_watcher_finish_catches_unterminated_tail() {
        let watcher = StreamingWatcher::new(true);
        let mut turn = TurnContext::new();
        let text = "Okay. I'll look up tide tables for Brest";
        assert!(watcher.scan_delta(&mut turn, "m1", text).is_empty());
        let calls = watcher.finish(&mut turn, "m1", text);
        assert_eq!(query_of(&calls[0]), "tide tables for Brest");
    }

    #[test]
    fn test_disabled_watcher_detects_nothing() {
        let watcher = StreamingWatcher::new(false);
        let mut turn = TurnContext::new();
        assert!(watcher
            .finish(&mut turn, "m1", "I'll search for rust.")
            .is_empty());
    }
}
