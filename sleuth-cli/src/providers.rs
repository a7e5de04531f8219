//! HTTP adapters for the research pipeline's collaborators.
//!
//! - [`OpenAiCompatibleGenerator`]: planner and report writer backed by any
//!   OpenAI-compatible chat completions API.
//! - [`DuckDuckGoSearch`]: search provider using DuckDuckGo instant answers.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::{Value, json};
use sleuth_core::collaborators::{GeneratedText, Planner, ReportGenerator, SearchProvider};
use sleuth_core::config::LlmConfig;
use sleuth_core::error::CollaboratorError;
use std::time::Duration;
use tracing::debug;

const PLANNER_PROMPT: &str = "You are a helpful research assistant. Given a query, come up with a set of web searches \
to perform to best answer the query. Output between 5 and 10 terms to query for. \
Make sure the search terms are diverse and cover different aspects of the query. \
For each search term, provide a clear reason why this search is important.\n\n\
IMPORTANT: Your response must be in the following JSON format:\n\
```json\n\
{\"searches\": [{\"query\": \"search term 1\", \"reason\": \"reason for search 1\"}, \
{\"query\": \"search term 2\", \"reason\": \"reason for search 2\"}]}\n\
```\n\
Ensure your response can be parsed as valid JSON.";

const WRITER_PROMPT: &str = "You are a research report writer. Create a comprehensive, well-structured report \
based on the search results provided.\n\n\
Follow these guidelines:\n\
1. Extract the key information from the search results\n\
2. Organize it into a coherent, logical structure\n\
3. Cite the sources you rely on\n\
4. Format the report using markdown\n\
5. Note any gaps or limitations in the available information\n\n\
Your output must be in the following JSON format:\n\
```json\n\
{\n\
    \"short_summary\": \"A brief 1-2 sentence summary of the report\",\n\
    \"markdown_report\": \"The full report in markdown format\",\n\
    \"follow_up_questions\": [\"3-5 questions for further research\"]\n\
}\n\
```\n\
Make sure your JSON is properly formatted and valid.";

const LLM_SERVICE: &str = "OpenAI-compatible API";

/// Chat-completions client used for both planning and report writing.
pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    use_streaming: bool,
}

impl OpenAiCompatibleGenerator {
    /// Create a generator from configuration.
    ///
    /// Reads the API key from the environment variable named by
    /// `config.api_key_env`. Local servers do not need a key.
    pub fn new(config: &LlmConfig) -> Result<Self, CollaboratorError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                if is_local(&config.base_url) {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| CollaboratorError::Auth {
                service: format!("{LLM_SERVICE} (env var '{}' not set)", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a generator with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Other {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.effective_model().to_string(),
            timeout_secs: config.request_timeout_secs,
            use_streaming: config.use_streaming,
        })
    }

    /// Send one system + user exchange and return the raw response body.
    async fn send(&self, system: &str, user: &str, stream: bool) -> Result<String, CollaboratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": stream,
        });

        debug!(url = %url, model = %self.model, stream, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !status.is_success() {
            return Err(map_http_error(status, &response_body));
        }
        Ok(response_body)
    }

    fn map_request_error(&self, error: reqwest::Error) -> CollaboratorError {
        if error.is_timeout() {
            CollaboratorError::Timeout {
                service: LLM_SERVICE.to_string(),
                timeout_secs: self.timeout_secs,
            }
        } else {
            CollaboratorError::Connection {
                service: LLM_SERVICE.to_string(),
                message: error.to_string(),
            }
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, CollaboratorError> {
        let body = self.send(system, user, false).await?;
        let json: Value = serde_json::from_str(&body).map_err(|e| CollaboratorError::InvalidResponse {
            service: LLM_SERVICE.to_string(),
            message: format!("Invalid JSON: {e}"),
        })?;
        message_content(&json)
    }
}

fn is_local(base_url: &str) -> bool {
    base_url.contains("localhost") || base_url.contains("127.0.0.1")
}

/// Map an HTTP status code to the appropriate collaborator error.
fn map_http_error(status: reqwest::StatusCode, body: &str) -> CollaboratorError {
    match status.as_u16() {
        401 | 403 => {
            debug!(body = %body, "Authentication failed ({})", status);
            CollaboratorError::Auth {
                service: LLM_SERVICE.to_string(),
            }
        }
        429 => CollaboratorError::RateLimited {
            service: LLM_SERVICE.to_string(),
        },
        code if code >= 500 => CollaboratorError::Connection {
            service: LLM_SERVICE.to_string(),
            message: format!("Server error ({status}): {body}"),
        },
        _ => CollaboratorError::InvalidResponse {
            service: LLM_SERVICE.to_string(),
            message: format!("HTTP {status}: {body}"),
        },
    }
}

/// Text of the first choice in a non-streaming response.
fn message_content(body: &Value) -> Result<String, CollaboratorError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::to_string)
        .ok_or_else(|| CollaboratorError::InvalidResponse {
            service: LLM_SERVICE.to_string(),
            message: "No message content in response".to_string(),
        })
}

/// Parse a single SSE data line. Returns the parsed JSON if valid.
fn parse_sse_line(line: &str) -> Option<Value> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

/// Content deltas of a server-sent-events body, in order.
fn sse_chunks(body: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if line == "data: [DONE]" {
            break;
        }
        if let Some(content) = parse_sse_line(line)
            .as_ref()
            .and_then(|data| data.get("choices"))
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("delta"))
            .and_then(|delta| delta.get("content"))
            .and_then(|content| content.as_str())
            && !content.is_empty()
        {
            chunks.push(content.to_string());
        }
    }
    chunks
}

#[async_trait]
impl Planner for OpenAiCompatibleGenerator {
    async fn plan(&self, topic: &str) -> Result<String, CollaboratorError> {
        self.complete(PLANNER_PROMPT, topic).await
    }
}

#[async_trait]
impl ReportGenerator for OpenAiCompatibleGenerator {
    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedText, CollaboratorError> {
        if !self.use_streaming {
            return self.complete(WRITER_PROMPT, prompt).await.map(GeneratedText::Text);
        }
        let body = self.send(WRITER_PROMPT, prompt, true).await?;
        let chunks: Vec<Result<String, CollaboratorError>> =
            sse_chunks(&body).into_iter().map(Ok).collect();
        Ok(GeneratedText::Stream(stream::iter(chunks).boxed()))
    }
}

/// Search provider backed by the DuckDuckGo instant answer API.
///
/// Privacy-first: no API key, queries go directly to DuckDuckGo.
pub struct DuckDuckGoSearch {
    client: Client,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(max_results: usize) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Sleuth/0.1")
            .build()
            .map_err(|e| CollaboratorError::Other {
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            max_results: max_results.max(1),
        })
    }

    /// Render an instant-answer response as plain text.
    fn format_results(&self, query: &str, body: &Value) -> String {
        let mut results = Vec::new();

        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
            && !abstract_text.is_empty()
        {
            let source = body
                .get("AbstractSource")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown");
            let url = body.get("AbstractURL").and_then(|v| v.as_str()).unwrap_or("");
            results.push(format!("[{source}] {abstract_text}\n  URL: {url}"));
        }

        for key in ["RelatedTopics", "Results"] {
            let Some(entries) = body.get(key).and_then(|v| v.as_array()) else {
                continue;
            };
            for entry in entries
                .iter()
                .take(self.max_results.saturating_sub(results.len()))
            {
                if let Some(text) = entry.get("Text").and_then(|v| v.as_str()) {
                    let url = entry.get("FirstURL").and_then(|v| v.as_str()).unwrap_or("");
                    results.push(format!("- {text}\n  URL: {url}"));
                }
            }
        }

        if results.is_empty() {
            format!("[No instant answers found for '{query}']")
        } else {
            format!("Search results for \"{query}\":\n\n{}", results.join("\n\n"))
        }
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str) -> Result<String, CollaboratorError> {
        let url = format!(
            "https://api.duckduckgo.com/?q={}&format=json&no_html=1&skip_disambig=1",
            urlencoding::encode(query)
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = CollaboratorError::Connection {
                    service: "DuckDuckGo".to_string(),
                    message: format!("Search request failed: {e}"),
                };
                debug!(error = %error, "Search request failed");
                return Ok(inline_failure(query, &error));
            }
        };

        let status = response.status();
        if !status.is_success() {
            // Ordinary failures stay inline so the rest of the plan proceeds.
            return Ok(format!("[Search for '{query}' failed: HTTP {status}]"));
        }

        match response.json::<Value>().await {
            Ok(body) => Ok(self.format_results(query, &body)),
            Err(e) => {
                let error = CollaboratorError::InvalidResponse {
                    service: "DuckDuckGo".to_string(),
                    message: format!("Failed to parse search response: {e}"),
                };
                debug!(error = %error, "Search response was not usable");
                Ok(inline_failure(query, &error))
            }
        }
    }
}

/// Bracketed result for a search that failed; names only the error category.
fn inline_failure(query: &str, error: &CollaboratorError) -> String {
    format!("[Search for '{query}' failed: {}]", error.category())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_config() -> LlmConfig {
        LlmConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            api_key_env: "SLEUTH_TEST_NONEXISTENT_KEY".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_message_content() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "{\"searches\": []}"}}]});
        assert_eq!(message_content(&body).unwrap(), "{\"searches\": []}");
        assert!(matches!(
            message_content(&json!({"choices": []})),
            Err(CollaboratorError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_sse_chunks_in_order() {
        let body = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                    : keep-alive\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"short\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"_summary\\\"\"}}]}\n\n\
                    data: [DONE]\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n";
        assert_eq!(sse_chunks(body), vec!["{\"short", "_summary\""]);
    }

    #[test]
    fn test_parse_sse_line() {
        assert!(parse_sse_line("data: [DONE]").is_none());
        assert!(parse_sse_line("event: ping").is_none());
        assert!(parse_sse_line("data: {\"a\": 1}").is_some());
    }

    #[test]
    fn test_search_failure_stays_inline() {
        let error = CollaboratorError::Connection {
            service: "DuckDuckGo".to_string(),
            message: "Search request failed: error sending request for url (https://api.duckduckgo.com/?q=q)".to_string(),
        };
        let text = inline_failure("q", &error);
        assert_eq!(text, "[Search for 'q' failed: ConnectionError]");
        assert!(!text.contains("https://"));

        let error = CollaboratorError::InvalidResponse {
            service: "DuckDuckGo".to_string(),
            message: "expected value at line 1 column 1".to_string(),
        };
        assert_eq!(inline_failure("q", &error), "[Search for 'q' failed: InvalidResponseError]");
    }

    #[test]
    fn test_http_error_mapping() {
        let err = map_http_error(reqwest::StatusCode::UNAUTHORIZED, "bad key sk-secret");
        assert_eq!(err.category(), "AuthenticationError");
        assert!(!err.to_string().contains("sk-secret"));

        let err = map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err.category(), "RateLimitError");

        let err = map_http_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(err.category(), "ConnectionError");

        let err = map_http_error(reqwest::StatusCode::BAD_REQUEST, "nope");
        assert_eq!(err.category(), "InvalidResponseError");
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let generator = OpenAiCompatibleGenerator::new(&test_config()).unwrap();
        assert_eq!(generator.base_url, "http://localhost:11434/v1");
        assert_eq!(ReportGenerator::model(&generator), Some("gpt-3.5-turbo"));
    }

    #[test]
    fn test_remote_provider_requires_key() {
        let config = LlmConfig {
            api_key_env: "SLEUTH_TEST_NONEXISTENT_KEY".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            OpenAiCompatibleGenerator::new(&config),
            Err(CollaboratorError::Auth { .. })
        ));
    }

    #[test]
    fn test_format_results() {
        let search = DuckDuckGoSearch::new(3).unwrap();
        let body = json!({
            "AbstractText": "Rust is a language.",
            "AbstractSource": "Wikipedia",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "RelatedTopics": [
                {"Text": "Cargo", "FirstURL": "https://doc.rust-lang.org/cargo"},
                {"Text": "Crates", "FirstURL": "https://crates.io"},
                {"Text": "Clippy", "FirstURL": "https://github.com/rust-lang/rust-clippy"}
            ]
        });
        let text = search.format_results("rust", &body);
        assert!(text.starts_with("Search results for \"rust\":"));
        assert!(text.contains("[Wikipedia] Rust is a language."));
        assert!(text.contains("- Crates"));
        assert!(!text.contains("Clippy"));

        assert_eq!(
            search.format_results("nothing", &json!({})),
            "[No instant answers found for 'nothing']"
        );
    }
}
