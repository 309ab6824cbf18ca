//! Web search across configured providers.
//!
//! Providers are tried in configuration order; the first success wins. When
//! every provider fails (or none is configured) the tool still succeeds with
//! a degraded result pointing at a DuckDuckGo query, so the conversation
//! keeps moving.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use super::validation::SearchArgs;
use crate::config::{SearchConfig, SearchProviderConfig};
use crate::upstream::UpstreamError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const DUCKDUCKGO_URL: &str = "https://duckduckgo.com/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Provider that produced the entry.
    pub source: String,
}

// ─── Providers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Provider {
    Brave { api_key: String, base_url: String },
    Tavily { api_key: String, base_url: String },
    Searxng { base_url: String },
}

impl Provider {
    /// `None` for entries missing the credential or URL they need.
    fn from_config(config: &SearchProviderConfig) -> Option<Self> {
        let trim = |s: &str| s.trim().trim_end_matches('/').to_string();
        match config {
            SearchProviderConfig::Brave { api_key, base_url } if !api_key.trim().is_empty() => {
                Some(Self::Brave {
                    api_key: api_key.trim().to_string(),
                    base_url: trim(base_url),
                })
            }
            SearchProviderConfig::Tavily { api_key, base_url } if !api_key.trim().is_empty() => {
                Some(Self::Tavily {
                    api_key: api_key.trim().to_string(),
                    base_url: trim(base_url),
                })
            }
            SearchProviderConfig::Searxng { base_url } if !base_url.trim().is_empty() => {
                Some(Self::Searxng {
                    base_url: trim(base_url),
                })
            }
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Brave { .. } => "brave",
            Self::Tavily { .. } => "tavily",
            Self::Searxng { .. } => "searxng",
        }
    }

    async fn search(
        &self,
        http: &HttpClient,
        query: &str,
        count: u32,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, UpstreamError> {
        let provider = self.name();
        let count_param = count.to_string();
        let request = match self {
            Self::Brave { api_key, base_url } => http
                .get(format!("{base_url}/res/v1/web/search"))
                .query(&[("q", query), ("count", count_param.as_str())])
                .header("Accept", "application/json")
                .header("X-Subscription-Token", api_key),
            Self::Tavily { api_key, base_url } => http
                .post(format!("{base_url}/search"))
                .bearer_auth(api_key)
                .json(&json!({
                    "api_key": api_key,
                    "query": query,
                    "max_results": count,
                    "search_depth": "basic",
                })),
            Self::Searxng { base_url } => http
                .get(format!("{base_url}/search"))
                .query(&[("q", query), ("format", "json")]),
        };

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(provider, &e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(provider, status.as_u16(), &body));
        }
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(provider, &e, timeout))?;

        let mut results = match self {
            Self::Brave { .. } => parse_brave(&body),
            Self::Tavily { .. } => parse_tavily(&body),
            Self::Searxng { .. } => parse_searxng(&body),
        }
        .map_err(|e| UpstreamError::malformed(provider, e.to_string()))?;

        results.truncate(count as usize);
        Ok(results)
    }
}

// ─── Response shapes ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

/// Shared by Tavily and SearXNG: `results[].{title,url,content}`.
#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    results: Vec<ContentResult>,
}

#[derive(Deserialize)]
struct ContentResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

fn parse_brave(body: &str) -> Result<Vec<SearchResult>, serde_json::Error> {
    let resp: BraveResponse = serde_json::from_str(body)?;
    Ok(resp
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .map(|r| SearchResult {
            title: strip_html(&r.title),
            url: r.url,
            snippet: strip_html(&r.description),
            source: "brave".into(),
        })
        .collect())
}

fn parse_tavily(body: &str) -> Result<Vec<SearchResult>, serde_json::Error> {
    parse_content(body, "tavily")
}

fn parse_searxng(body: &str) -> Result<Vec<SearchResult>, serde_json::Error> {
    parse_content(body, "searxng")
}

fn parse_content(body: &str, source: &str) -> Result<Vec<SearchResult>, serde_json::Error> {
    let resp: ContentResponse = serde_json::from_str(body)?;
    Ok(resp
        .results
        .into_iter()
        .map(|r| SearchResult {
            title: strip_html(&r.title),
            url: r.url,
            snippet: strip_html(&r.content),
            source: source.to_string(),
        })
        .collect())
}

fn strip_html(text: &str) -> String {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    let stripped = match TAGS.get_or_init(|| Regex::new(r"<[^>]*>").ok()) {
        Some(tags) => tags.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    decode_entities(&stripped).trim().to_string()
}

/// Decode named and numeric character references in one pass, so `&amp;lt;`
/// stays `&lt;`. Unknown references are left as written.
fn decode_entities(text: &str) -> String {
    static ENTITIES: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(entities) = ENTITIES
        .get_or_init(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").ok())
        .as_ref()
    else {
        return text.to_string();
    };
    entities
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = match body {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => body
                    .strip_prefix("#x")
                    .or_else(|| body.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| body.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ─── WebSearch ───────────────────────────────────────────────────────────────

/// The `web_search` tool.
#[derive(Clone)]
pub struct WebSearch {
    http: HttpClient,
    providers: Vec<Provider>,
    timeout: Duration,
}

impl WebSearch {
    pub fn from_config(config: &SearchConfig, timeout: Duration) -> Self {
        let providers: Vec<Provider> = config
            .providers
            .iter()
            .filter_map(|p| {
                let provider = Provider::from_config(p);
                if provider.is_none() {
                    let kind = match p {
                        SearchProviderConfig::Brave { .. } => "brave",
                        SearchProviderConfig::Tavily { .. } => "tavily",
                        SearchProviderConfig::Searxng { .. } => "searxng",
                    };
                    tracing::warn!(provider = kind, "search provider missing credentials, skipped");
                }
                provider
            })
            .collect();

        tracing::info!(
            providers = ?providers.iter().map(Provider::name).collect::<Vec<_>>(),
            "web search configured"
        );

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default search HTTP client");
                HttpClient::new()
            });

        Self {
            http,
            providers,
            timeout,
        }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(Provider::name).collect()
    }

    /// Search with fallback. Never fails: exhaustion yields a degraded result.
    pub async fn search(&self, args: &SearchArgs) -> Json {
        let mut errors = Vec::new();

        for provider in &self.providers {
            match provider
                .search(&self.http, &args.query, args.num_results, self.timeout)
                .await
            {
                Ok(results) => {
                    tracing::info!(
                        provider = provider.name(),
                        count = results.len(),
                        "search succeeded"
                    );
                    return json!({
                        "query": args.query,
                        "provider": provider.name(),
                        "degraded": false,
                        "results": results,
                    });
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "search provider failed");
                    errors.push(json!({
                        "provider": provider.name(),
                        "error_kind": e.kind(),
                        "error": e.user_message(),
                    }));
                }
            }
        }

        tracing::warn!(query = %args.query, "no search provider available, returning degraded result");
        json!({
            "query": args.query,
            "provider": "fallback",
            "degraded": true,
            "results": [degraded_result(&args.query)],
            "errors": errors,
        })
    }
}

fn degraded_result(query: &str) -> SearchResult {
    let url = reqwest::Url::parse_with_params(DUCKDUCKGO_URL, &[("q", query)])
        .map(|u| u.to_string())
        .unwrap_or_else(|_| DUCKDUCKGO_URL.to_string());
    SearchResult {
        title: format!("Search results for \"{query}\""),
        url,
        snippet: "Live search is unavailable right now; open this link to see current results."
            .into(),
        source: "duckduckgo".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Json as AxumJson, Router};
    use std::collections::HashMap;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn args(query: &str, n: u32) -> SearchArgs {
        SearchArgs {
            query: query.into(),
            num_results: n,
        }
    }

    #[test]
    fn test_parse_brave_strips_markup() {
        let body = r#"{"web":{"results":[
            {"title":"The <strong>Rust</strong> Book","url":"https://doc.rust-lang.org/book/","description":"Learn &amp; <strong>build</strong>"}
        ]}}"#;
        let results = parse_brave(body).unwrap();
        assert_eq!(results[0].title, "The Rust Book");
        assert_eq!(results[0].snippet, "Learn & build");
        assert_eq!(results[0].source, "brave");
    }

    #[test]
    fn test_strip_html_decodes_entities() {
        assert_eq!(
            strip_html("Vec&lt;T&gt;&nbsp;vs &#x27;slices&#39; &#8212; &quot;ok&quot; <b>&amp;</b>"),
            "Vec<T> vs 'slices' \u{2014} \"ok\" &"
        );
        assert_eq!(strip_html("&amp;lt;b&amp;gt;"), "&lt;b&gt;");
        assert_eq!(strip_html("AT&T &bogus; &#xZZ;"), "AT&T &bogus; &#xZZ;");
    }

    #[test]
    fn test_parse_brave_without_web_section() {
        assert!(parse_brave("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_tavily() {
        let body = r#"{"results":[{"title":"Paris","url":"https://en.wikipedia.org/wiki/Paris","content":"Capital of France"}]}"#;
        let results = parse_tavily(body).unwrap();
        assert_eq!(results[0].snippet, "Capital of France");
        assert_eq!(results[0].source, "tavily");
    }

    #[test]
    fn test_providers_without_credentials_skipped() {
        let config = SearchConfig {
            providers: vec![
                SearchProviderConfig::Brave {
                    api_key: " ".into(),
                    base_url: "https://api.search.brave.com".into(),
                },
                SearchProviderConfig::Searxng {
                    base_url: "http://localhost:8888/".into(),
                },
            ],
            default_results: 5,
        };
        let search = WebSearch::from_config(&config, Duration::from_secs(1));
        assert_eq!(search.provider_names(), vec!["searxng"]);
    }

    #[tokio::test]
    async fn test_degraded_when_unconfigured() {
        let search = WebSearch::from_config(&SearchConfig::default(), Duration::from_secs(1));
        let out = search.search(&args("rust async", 5)).await;
        assert_eq!(out["degraded"], true);
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0]["url"],
            "https://duckduckgo.com/?q=rust+async"
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let failing = spawn(Router::new().route(
            "/res/v1/web/search",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        ))
        .await;
        let searxng = spawn(Router::new().route(
            "/search",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("format").map(String::as_str), Some("json"));
                AxumJson(json!({"results": [
                    {"title": "one", "url": "https://a.example", "content": "first"},
                    {"title": "two", "url": "https://b.example", "content": "second"},
                    {"title": "three", "url": "https://c.example", "content": "third"}
                ]}))
            }),
        ))
        .await;

        let config = SearchConfig {
            providers: vec![
                SearchProviderConfig::Brave {
                    api_key: "key".into(),
                    base_url: failing,
                },
                SearchProviderConfig::Searxng { base_url: searxng },
            ],
            default_results: 5,
        };
        let search = WebSearch::from_config(&config, Duration::from_secs(2));
        let out = search.search(&args("rust", 2)).await;
        assert_eq!(out["provider"], "searxng");
        assert_eq!(out["degraded"], false);
        assert_eq!(out["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_all_providers_failing_is_degraded_with_errors() {
        let failing = spawn(Router::new().route(
            "/search",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let config = SearchConfig {
            providers: vec![SearchProviderConfig::Searxng { base_url: failing }],
            default_results: 5,
        };
        let search = WebSearch::from_config(&config, Duration::from_secs(2));
        let out = search.search(&args("rust", 3)).await;
        assert_eq!(out["degraded"], true);
        assert_eq!(out["errors"][0]["provider"], "searxng");
        assert_eq!(out["errors"][0]["error_kind"], "http");
    }
}
