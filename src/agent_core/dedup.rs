//! Dedup Guard: at most one dispatch per call identity per assistant turn.
//!
//! A call's identity is its canonical tool name plus its arguments serialized
//! with object keys sorted at every level, hashed with SHA-256. Two encodings
//! of the same request (native call, JSON in the text, a natural-language
//! phrase) therefore collide.

use std::collections::HashSet;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::inference::types::ToolCall;
use crate::tools::ToolName;

#[derive(Debug, Default)]
pub struct DedupGuard {
    seen: HashSet<String>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the call's identity. Returns false if it was already dispatched.
    pub fn admit(&mut self, call: &ToolCall) -> bool {
        let identity = call_identity(call);
        if self.seen.insert(identity) {
            return true;
        }
        tracing::info!(tool = %call.name, call_id = %call.id, "duplicate tool call suppressed");
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Hex SHA-256 of `name \0 canonical_json(arguments)`.
pub fn call_identity(call: &ToolCall) -> String {
    let name = ToolName::parse(&call.name)
        .map(|t| t.as_str().to_string())
        .unwrap_or_else(|| call.name.trim().to_string());

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(&call.arguments).as_bytes());
    let hash = hasher.finalize();
    format!("{hash:x}")
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
