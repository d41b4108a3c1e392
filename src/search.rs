use crate::error::{ChatError, ChatResult};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub(crate) struct SearchConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) max_results: u32,
    pub(crate) timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
}

/// Thin client over the Tavily search API.
pub(crate) struct TavilyClient {
    http: Client,
    api_key: String,
    base_url: String,
    max_results: u32,
}

impl TavilyClient {
    pub(crate) fn new(config: SearchConfig) -> ChatResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            api_key: config.api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_results: config.max_results,
        })
    }

    /// Returns the provider's result document untouched.
    pub(crate) async fn search(&self, query: &str) -> ChatResult<serde_json::Value> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::InvalidToolInput {
                tool: "web_search".to_string(),
                message: "query must not be empty".to_string(),
            });
        }

        debug!(query = %query, "web search");

        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&SearchRequest {
                query,
                max_results: self.max_results,
            })
            .send()
            .await
            .map_err(|e| ChatError::SearchUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "search provider rejected request");
            return Err(ChatError::SearchUnavailable(format!("{} - {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| ChatError::SearchUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: String) -> TavilyClient {
        TavilyClient::new(SearchConfig {
            api_key: "tvly-test".to_string(),
            base_url,
            max_results: 3,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_query_and_returns_document() {
        let server = MockServer::start().await;
        let document = json!({
            "query": "rust async",
            "results": [{"title": "Async book", "url": "https://rust-lang.github.io/async-book/", "content": "..."}]
        });
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer tvly-test"))
            .and(body_json(json!({"query": "rust async", "max_results": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(document.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(server.uri()).search("  rust async ").await.unwrap();
        assert_eq!(result, document);
    }

    #[tokio::test]
    async fn provider_failure_is_search_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client(server.uri()).search("anything").await.unwrap_err();
        assert!(matches!(err, ChatError::SearchUnavailable(ref m) if m.contains("bad key")));
    }

    #[tokio::test]
    async fn unreachable_provider_is_search_unavailable() {
        // Nothing listens on port 9 locally.
        let err = client("http://127.0.0.1:9".to_string())
            .search("anything")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::SearchUnavailable(_)));
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(server.uri()).search("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidToolInput { .. }));
    }
}
