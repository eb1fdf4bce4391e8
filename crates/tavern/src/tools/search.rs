use std::time::Duration;

use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tavern_core::tool::{Error as ToolError, Tool, ToolResult};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_RESULTS: usize = 5;
const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize, JsonSchema)]
pub struct SearchParameters {
    #[schemars(description = "The search query, e.g. \"grapple rules 5e\".")]
    query: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

/// A tool that searches the web with Tavily.
pub struct SearchTool {
    parameter_schema: Value,
    client: Client,
    api_key: String,
    endpoint: String,
}

impl SearchTool {
    /// Creates a new search tool with a Tavily API key.
    #[inline]
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            parameter_schema: super::parameter_schema::<SearchParameters>(),
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: TAVILY_ENDPOINT.to_owned(),
        }
    }

    /// Sends queries to `endpoint` instead of the Tavily API.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn format_results(results: Vec<SearchResult>) -> String {
    if results.is_empty() {
        return "No results found.".to_owned();
    }
    results
        .into_iter()
        .take(MAX_RESULTS)
        .enumerate()
        .map(|(idx, result)| {
            format!(
                "{}. {} ({})\n{}",
                idx + 1,
                result.title,
                result.url,
                result.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl Tool for SearchTool {
    type Input = SearchParameters;

    fn name(&self) -> &str {
        "search_the_web"
    }

    fn description(&self) -> &str {
        r#"
Searches the internet and returns up to 5 results with titles, links and snippets.
Use it for rules or lore you are unsure about."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let query = input.query.trim().to_owned();
        let req = (!query.is_empty()).then(|| {
            self.client
                .post(&self.endpoint)
                .timeout(TIMEOUT)
                .bearer_auth(&self.api_key)
                .json(&SearchRequest {
                    query: &query,
                    max_results: MAX_RESULTS,
                })
        });

        async move {
            let Some(req) = req else {
                return Err(ToolError::invalid_input().with_reason("the query is empty"));
            };
            debug!("searching the web for {query:?}");
            let resp = req
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(|err| {
                    ToolError::execution_error().with_reason(format!("search failed: {err}"))
                })?;
            let body: SearchResponse = resp.json().await.map_err(|err| {
                ToolError::execution_error()
                    .with_reason(format!("malformed search response: {err}"))
            })?;
            Ok(format_results(body.results))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    async fn fake_tavily(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(headers["authorization"], "Bearer tvly-test");
        assert_eq!(body["max_results"], 5);
        let results: Vec<_> = (1..=7)
            .map(|i| {
                json!({
                    "title": format!("Result {i}"),
                    "url": format!("https://example.com/{i}"),
                    "content": format!("About {}.", body["query"].as_str().unwrap()),
                })
            })
            .collect();
        Json(json!({ "results": results }))
    }

    #[tokio::test]
    async fn test_search() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/search", post(fake_tavily));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let tool = SearchTool::new("tvly-test").with_endpoint(format!("http://{addr}/search"));
        let input = serde_json::from_value(json!({ "query": "owlbear" })).unwrap();
        let output = tool.execute(input).await.unwrap();
        assert!(output.starts_with("1. Result 1 (https://example.com/1)\nAbout owlbear."));
        assert!(output.contains("5. Result 5"));
        assert!(!output.contains("6. Result 6"));
    }

    #[tokio::test]
    async fn test_empty_query() {
        let input = serde_json::from_value(json!({ "query": "" })).unwrap();
        let err = SearchTool::new("tvly-test").execute(input).await.unwrap_err();
        assert_eq!(err.kind(), tavern_core::tool::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_no_results() {
        assert_eq!(format_results(vec![]), "No results found.");
    }
}
