//! Grounded answers: questions answered by a citation-returning chat API.
//!
//! Speaks the Perplexity flavour of the chat completions API, which adds a
//! top-level `citations` URL array and `[n]` markers in the answer text.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use super::errors::ToolError;
use super::validation::GroundedArgs;
use crate::config::GroundedConfig;
use crate::upstream::UpstreamError;

const PROVIDER: &str = "grounded";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_ENTITIES: usize = 20;

const SYSTEM_PROMPT: &str = "Answer precisely and concisely. Support each claim with \
numbered citations like [1] that refer to your sources.";

/// Words that start a sentence and should not open an entity.
const LEADING_STOPWORDS: &[&str] = &[
    "The", "A", "An", "In", "On", "At", "According", "However", "While", "When", "This",
    "That", "These", "Those", "It", "As", "For", "By", "From", "After", "Before",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct AnswerResponse {
    choices: Vec<AnswerChoice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct AnswerChoice {
    message: AnswerMessage,
}

#[derive(Deserialize)]
struct AnswerMessage {
    #[serde(default)]
    content: Option<String>,
}

/// The `grounded_answer` tool.
#[derive(Clone)]
pub struct GroundedAnswer {
    http: HttpClient,
    config: GroundedConfig,
}

impl GroundedAnswer {
    pub fn from_config(config: &GroundedConfig) -> Self {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default grounded HTTP client");
                HttpClient::new()
            });
        Self {
            http,
            config: GroundedConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config.clone()
            },
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    pub async fn answer(&self, args: &GroundedArgs) -> Result<Json, ToolError> {
        if !self.is_configured() {
            return Err(ToolError::execution(
                "grounded answers are not configured (missing tools.grounded.api_key)",
            ));
        }

        let model = if args.research_mode {
            &self.config.research_model
        } else {
            &self.config.model
        };
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let url = format!("{}/chat/completions", self.config.base_url);

        tracing::info!(model = %model, research = args.research_mode, "grounded answer request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": args.query},
                ],
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(PROVIDER, &e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(PROVIDER, status.as_u16(), &body).into());
        }
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(PROVIDER, &e, timeout))?;

        let parsed: AnswerResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::malformed(PROVIDER, e.to_string()))?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| UpstreamError::malformed(PROVIDER, "response has no answer text"))?;

        let mut out = json!({
            "query": args.query,
            "model": parsed.model.unwrap_or_else(|| model.clone()),
        });

        if args.include_citations {
            out["answer"] = json!(answer);
            out["sources"] = json!(build_sources(&answer, &parsed.citations));
            out["citations"] = json!(parsed.citations);
        } else {
            out["answer"] = json!(strip_citation_markers(&answer));
        }
        if args.extract_entities {
            out["entities"] = json!(extract_entities(&answer));
        }

        Ok(out)
    }
}

fn citation_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"\[(\d{1,3})\]").ok())
        .as_ref()
}

/// Sources in order of first mention, resolved against the citation list.
pub fn build_sources(answer: &str, citations: &[String]) -> Vec<Source> {
    let Some(marker) = citation_marker() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    marker
        .captures_iter(answer)
        .filter_map(|cap| cap[1].parse::<usize>().ok())
        .filter(|&n| n > 0 && seen.insert(n))
        .map(|index| Source {
            index,
            url: citations.get(index - 1).cloned(),
        })
        .collect()
}

pub fn strip_citation_markers(answer: &str) -> String {
    match citation_marker() {
        Some(marker) => marker.replace_all(answer, "").replace(" .", ".").trim().to_string(),
        None => answer.to_string(),
    }
}

/// Capitalized multi-word phrases (`New York City`, `Marie Curie`).
pub fn extract_entities(text: &str) -> Vec<String> {
    static ENTITY: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = ENTITY
        .get_or_init(|| Regex::new(r"\b[A-Z][a-zA-Z'\-]+(?:\s+[A-Z][a-zA-Z'\-]+)+\b").ok())
        .as_ref()
    else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    for m in pattern.find_iter(text) {
        let mut words: Vec<&str> = m.as_str().split_whitespace().collect();
        while words.first().is_some_and(|w| LEADING_STOPWORDS.contains(w)) {
            words.remove(0);
        }
        if words.len() < 2 {
            continue;
        }
        let entity = words.join(" ");
        if seen.insert(entity.clone()) {
            entities.push(entity);
            if entities.len() >= MAX_ENTITIES {
                break;
            }
        }
    }
    entities
}
