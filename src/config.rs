//! Application configuration loading.
//!
//! Reads `toolchat.yaml` and resolves `${VAR}` / `${VAR:-default}`
//! environment references before parsing, so secrets stay out of the file.
//! Every field has a default; a missing config file yields a usable
//! (if tool-less) configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// File name searched for when `TOOLCHAT_CONFIG` is not set.
pub const CONFIG_FILE_NAME: &str = "toolchat.yaml";

/// Environment variable that points directly at the config file.
pub const CONFIG_ENV_VAR: &str = "TOOLCHAT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
    /// Sessions kept in memory before the least recently used is evicted.
    pub max_sessions: usize,
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            cors_origins: Vec::new(),
            max_sessions: 1000,
            session_idle_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub filter: String,
    pub format: LogFormat,
    /// When set, logs go to this file (rotated on startup) instead of stdout.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "toolchat=info,warn".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// The OpenAI-compatible chat completion provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Models tried in order when the primary is unavailable.
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Token budget for the request history (system prompt included).
    pub context_window: u32,
    pub request_timeout_secs: u64,
    pub stream_timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            fallback_models: Vec::new(),
            temperature: 0.7,
            max_tokens: 2048,
            context_window: 32_000,
            request_timeout_secs: 60,
            stream_timeout_secs: 180,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. You can use tools: \
web_search for current information, calculator for arithmetic and linear equations, \
run_code for small JavaScript or Python snippets, and grounded_answer for answers \
with cited sources. Call a tool when it helps; otherwise answer directly.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-call timeout for search, calculator and code execution.
    pub timeout_secs: u64,
    pub search: SearchConfig,
    pub grounded: GroundedConfig,
    pub code: CodeConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            search: SearchConfig::default(),
            grounded: GroundedConfig::default(),
            code: CodeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Providers in the order they are tried.
    pub providers: Vec<SearchProviderConfig>,
    pub default_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_results: 5,
        }
    }
}

/// One search backend. Entries without credentials are skipped at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchProviderConfig {
    Brave {
        api_key: String,
        #[serde(default = "default_brave_url")]
        base_url: String,
    },
    Tavily {
        api_key: String,
        #[serde(default = "default_tavily_url")]
        base_url: String,
    },
    Searxng { base_url: String },
}

fn default_brave_url() -> String {
    "https://api.search.brave.com".to_string()
}

fn default_tavily_url() -> String {
    "https://api.tavily.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroundedConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Model used when `research_mode` is requested.
    pub research_model: String,
    pub timeout_secs: u64,
}

impl Default for GroundedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.perplexity.ai".to_string(),
            api_key: String::new(),
            model: "sonar".to_string(),
            research_model: "sonar-pro".to_string(),
            timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    pub languages: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            languages: vec!["javascript".to_string(), "python".to_string()],
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Scan streamed assistant text for "search for …" style intents.
    pub natural_language_intents: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            natural_language_intents: true,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file: `TOOLCHAT_CONFIG`, then upward from `start`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse configuration text (after environment interpolation).
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let mut config: AppConfig = if interpolated.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?
    };

    config.logging.file = config
        .logging
        .file
        .map(|p| PathBuf::from(expand_tilde(&p.to_string_lossy())));
    config.llm.base_url = config.llm.base_url.trim_end_matches('/').to_string();

    validate(&config)?;
    Ok(config)
}

/// Load from the discovered path, or fall back to defaults.
pub fn load_or_default(start: &Path) -> Result<(AppConfig, Option<PathBuf>), ConfigError> {
    match find_config_path(start) {
        Some(path) => Ok((load_config(&path)?, Some(path))),
        None => Ok((AppConfig::default(), None)),
    }
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.llm.model.trim().is_empty() {
        return Err(ConfigError::Invalid {
            reason: "llm.model must not be empty".into(),
        });
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return Err(ConfigError::Invalid {
            reason: format!(
                "llm.temperature must be within 0.0..=2.0, got {}",
                config.llm.temperature
            ),
        });
    }
    if !(1..=10).contains(&config.tools.search.default_results) {
        return Err(ConfigError::Invalid {
            reason: "tools.search.default_results must be within 1..=10".into(),
        });
    }
    if config.server.max_sessions == 0 || config.server.session_idle_secs == 0 {
        return Err(ConfigError::Invalid {
            reason: "server.max_sessions and server.session_idle_secs must be greater than zero".into(),
        });
    }
    if config.tools.timeout_secs == 0 || config.tools.grounded.timeout_secs == 0 {
        return Err(ConfigError::Invalid {
            reason: "tool timeouts must be greater than zero".into(),
        });
    }
    Ok(())
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TOOLCHAT_TEST_MISSING__");
        let result = interpolate_env_vars("${__TOOLCHAT_TEST_MISSING__:-fallback}");
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__TOOLCHAT_TEST_KEY__", "sk-test");
        let result = interpolate_env_vars("key: ${__TOOLCHAT_TEST_KEY__}");
        assert_eq!(result, "key: sk-test");
        std::env::remove_var("__TOOLCHAT_TEST_KEY__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with $ but no braces";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/logs/toolchat.log");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/logs/toolchat.log"));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.tools.search.default_results, 5);
        assert!(config.streaming.natural_language_intents);
        assert_eq!(config.tools.code.languages, vec!["javascript", "python"]);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  bind: "0.0.0.0:9000"
logging:
  format: json
llm:
  base_url: "http://localhost:11434/v1/"
  api_key: "abc"
  model: "llama3"
  fallback_models: ["mistral"]
tools:
  timeout_secs: 5
  search:
    providers:
      - kind: brave
        api_key: "brave-key"
      - kind: searxng
        base_url: "http://localhost:8888"
    default_results: 3
  grounded:
    api_key: "pplx"
streaming:
  natural_language_intents: false
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
        assert_eq!(config.llm.fallback_models, vec!["mistral"]);
        assert_eq!(config.tools.search.providers.len(), 2);
        match &config.tools.search.providers[0] {
            SearchProviderConfig::Brave { api_key, base_url } => {
                assert_eq!(api_key, "brave-key");
                assert_eq!(base_url, "https://api.search.brave.com");
            }
            other => panic!("unexpected provider: {other:?}"),
        }
        assert_eq!(config.tools.grounded.model, "sonar");
        assert!(!config.streaming.natural_language_intents);
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../toolchat.example.yaml")).unwrap();
        assert_eq!(config.tools.search.providers.len(), 3);
        assert_eq!(config.tools.code.languages, vec!["javascript", "python"]);
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_invalid_temperature_rejected() {
        let result = parse_config("llm:\n  temperature: 5.0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_session_limits_must_be_positive() {
        let config = parse_config("server:\n  max_sessions: 50\n").unwrap();
        assert_eq!(config.server.max_sessions, 50);
        assert_eq!(config.server.session_idle_secs, 3600);
        let result = parse_config("server:\n  max_sessions: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_unknown_provider_kind_rejected() {
        let yaml = "tools:\n  search:\n    providers:\n      - kind: bing\n";
        assert!(matches!(parse_config(yaml), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "llm:\n  model: \"test-model\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.llm.model, "test-model");
    }

    #[test]
    fn test_find_config_path_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);
        let found = find_config_path(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("/nonexistent/toolchat.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
