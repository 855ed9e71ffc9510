//! HTTP-backed collaborators for an OpenAI-compatible backend.
//!
//! Reasoning goes to `{base}/chat/completions`, embeddings to
//! `{base}/embeddings`. Data tools are served by a separate endpoint that
//! takes a JSON [`ToolRequest`] at `{tools}/{kind}` and answers with text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tradeflow_core::{
    Completion, EmbeddingClient, MemoryBackendFailure, OutputShape, Prompt, ReasoningClient,
    ReasoningFailure, Services, ToolClient, ToolFailure, ToolRequest,
};

pub const BACKEND_URL_ENV: &str = "TRADEFLOW_BACKEND_URL";
pub const API_KEY_ENV: &str = "TRADEFLOW_API_KEY";
pub const TOOLS_URL_ENV: &str = "TRADEFLOW_TOOLS_URL";

/// Connection settings shared by every provider.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub tools_url: String,
    pub quick_model: String,
    pub deep_model: String,
    pub embedding_model: String,
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Build all four services against this backend.
    pub fn services(&self) -> anyhow::Result<Services> {
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?;
        let quick: Arc<dyn ReasoningClient> =
            Arc::new(ChatReasoning::new(client.clone(), self, &self.quick_model));
        let deep: Arc<dyn ReasoningClient> =
            Arc::new(ChatReasoning::new(client.clone(), self, &self.deep_model));
        Ok(Services {
            quick,
            deep,
            tools: Arc::new(HttpTools {
                client: client.clone(),
                base_url: trim_base(&self.tools_url),
            }),
            embedder: Arc::new(HttpEmbedder {
                client,
                base_url: trim_base(&self.base_url),
                api_key: self.api_key.clone(),
                model: self.embedding_model.clone(),
            }),
        })
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn authorize(request: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.header("Authorization", format!("Bearer {key}")),
        None => request,
    }
}

// ---------------------------------------------------------------------------
// Reasoning
// ---------------------------------------------------------------------------

pub struct ChatReasoning {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatReasoning {
    pub fn new(client: reqwest::Client, config: &BackendConfig, model: &str) -> Self {
        Self {
            client,
            base_url: trim_base(&config.base_url),
            api_key: config.api_key.clone(),
            model: model.to_string(),
        }
    }
}

/// Request body for a chat completion. Structured prompts ask for a JSON
/// object and list the required fields in the system message.
pub fn chat_payload(model: &str, prompt: &Prompt, shape: Option<&OutputShape>) -> Value {
    let mut system = prompt.system.clone();
    if let Some(shape) = shape {
        system.push_str("\n\nRespond with a single JSON object with these string fields:");
        for field in &shape.fields {
            system.push_str(&format!("\n- {}: {}", field.name, field.description));
        }
    }
    let mut payload = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": prompt.user},
        ],
    });
    if shape.is_some() {
        payload["response_format"] = json!({"type": "json_object"});
    }
    payload
}

/// Pull the answer out of a chat completion response.
pub fn parse_chat_response(
    data: &Value,
    shape: Option<&OutputShape>,
) -> Result<Completion, ReasoningFailure> {
    let content = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ReasoningFailure::MalformedOutput("no message content in response".into()))?;

    match shape {
        None => Ok(Completion::Text(content.to_string())),
        Some(_) => {
            let value: Value = serde_json::from_str(strip_fence(content)).map_err(|e| {
                ReasoningFailure::MalformedOutput(format!("structured answer is not JSON: {e}"))
            })?;
            Ok(Completion::Structured(value))
        }
    }
}

/// Some backends wrap JSON answers in a markdown code fence.
fn strip_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn classify_status(status: reqwest::StatusCode, body: String) -> ReasoningFailure {
    match status.as_u16() {
        401 | 403 => ReasoningFailure::Rejected(body),
        429 => ReasoningFailure::RateLimited,
        s if s >= 500 => ReasoningFailure::Unavailable(format!("{status}: {body}")),
        _ => ReasoningFailure::Rejected(format!("{status}: {body}")),
    }
}

#[async_trait]
impl ReasoningClient for ChatReasoning {
    async fn complete(
        &self,
        prompt: &Prompt,
        shape: Option<&OutputShape>,
    ) -> Result<Completion, ReasoningFailure> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self
            .client
            .post(&url)
            .json(&chat_payload(&self.model, prompt, shape));

        let response = authorize(request, self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| ReasoningFailure::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ReasoningFailure::MalformedOutput(e.to_string()))?;
        parse_chat_response(&data, shape)
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

pub fn parse_embedding_response(data: &Value) -> Result<Vec<f32>, MemoryBackendFailure> {
    let values = data
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|d| d.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| MemoryBackendFailure::Embedding("no embedding in response".into()))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| MemoryBackendFailure::Embedding("non-numeric embedding value".into()))
        })
        .collect()
}

#[async_trait]
impl EmbeddingClient for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryBackendFailure> {
        let url = format!("{}/embeddings", self.base_url);
        let request = self
            .client
            .post(&url)
            .json(&json!({"model": self.model, "input": text}));

        let response = authorize(request, self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| MemoryBackendFailure::Embedding(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryBackendFailure::Embedding(format!("{status}: {body}")));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| MemoryBackendFailure::Embedding(e.to_string()))?;
        parse_embedding_response(&data)
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

pub struct HttpTools {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl ToolClient for HttpTools {
    async fn call(&self, request: &ToolRequest) -> Result<String, ToolFailure> {
        let url = format!("{}/{}", self.base_url, request.kind);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ToolFailure::new(request.kind.as_str(), e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolFailure::new(request.kind.as_str(), e.to_string()))?;
        if !status.is_success() {
            return Err(ToolFailure::new(
                request.kind.as_str(),
                format!("{status}: {body}"),
            ));
        }
        if body.trim().is_empty() {
            return Err(ToolFailure::new(request.kind.as_str(), "empty response"));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradeflow_core::NodeId;

    fn shape() -> OutputShape {
        OutputShape::new("news_report", &[("headline_summary", "top stories")])
    }

    #[test]
    fn test_structured_payload_requests_json_object() {
        let prompt = Prompt::new(NodeId::Trader, "You trade.", "000001");
        let payload = chat_payload("deep-model", &prompt, Some(&shape()));
        assert_eq!(payload["response_format"]["type"], "json_object");
        let system = payload["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("- headline_summary: top stories"));

        let plain = chat_payload("deep-model", &prompt, None);
        assert!(plain.get("response_format").is_none());
        assert_eq!(plain["messages"][1]["content"], "000001");
    }

    #[test]
    fn test_parse_chat_response_text_and_structured() {
        let data = json!({"choices": [{"message": {"content": "HOLD for now"}}]});
        assert_eq!(
            parse_chat_response(&data, None).unwrap(),
            Completion::Text("HOLD for now".into())
        );

        let fenced = json!({"choices": [{"message": {
            "content": "```json\n{\"headline_summary\": \"calm\"}\n```"
        }}]});
        assert_eq!(
            parse_chat_response(&fenced, Some(&shape())).unwrap(),
            Completion::Structured(json!({"headline_summary": "calm"}))
        );
    }

    #[test]
    fn test_parse_chat_response_malformed() {
        let err = parse_chat_response(&json!({"choices": []}), None).unwrap_err();
        assert!(matches!(err, ReasoningFailure::MalformedOutput(_)));

        let prose = json!({"choices": [{"message": {"content": "not json"}}]});
        let err = parse_chat_response(&prose, Some(&shape())).unwrap_err();
        assert!(matches!(err, ReasoningFailure::MalformedOutput(_)));
    }

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            ReasoningFailure::Rejected(_)
        ));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ReasoningFailure::RateLimited
        );
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
    }

    #[test]
    fn test_parse_embedding_response() {
        let data = json!({"data": [{"embedding": [0.5, -1.0, 2]}]});
        assert_eq!(parse_embedding_response(&data).unwrap(), vec![0.5, -1.0, 2.0]);
        assert!(parse_embedding_response(&json!({"data": []})).is_err());
    }
}
