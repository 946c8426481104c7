//! HTTP backends for the supported inference providers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use geist_shared::{CapabilityError, GeistError, Result};

use crate::{CompletionRequest, ModelBackend, USER_AGENT};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output token cap sent to providers that require one.
const MAX_OUTPUT_TOKENS: u32 = 4_096;

/// Longest slice of an error body quoted in messages.
const ERROR_BODY_PREVIEW: usize = 200;

/// Build a reqwest client with appropriate settings.
fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| GeistError::config(format!("failed to build HTTP client: {e}")))
}

/// Join `path` onto the base URL, keeping any base path prefix.
pub(crate) fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Rate limits, request timeouts and server errors are worth retrying.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Send a request and decode a JSON body, classifying every failure.
async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    url: &str,
) -> std::result::Result<T, CapabilityError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            CapabilityError::transient(format!("{url}: {e}"))
        } else {
            CapabilityError::fatal(format!("{url}: {e}"))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
        let message = format!("{url}: HTTP {status}: {preview}");
        return Err(if is_transient_status(status) {
            CapabilityError::transient(message)
        } else {
            CapabilityError::fatal(message)
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| CapabilityError::transient(format!("{url}: failed to read body: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| CapabilityError::fatal(format!("{url}: malformed response body: {e}")))
}

/// Chat message shared by the Ollama and OpenAI-style APIs.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn chat_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system_text() {
        messages.push(ChatMessage {
            role: "system".into(),
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user".into(),
        content: request.prompt.clone(),
    });
    messages
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Ollama native chat API (`POST /api/chat`, non-streaming).
pub struct OllamaBackend {
    client: Client,
    base: Url,
    model: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}

impl OllamaBackend {
    pub fn new(base: Url, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base,
            model,
        })
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CapabilityError> {
        let url = endpoint(&self.base, "api/chat");
        let body = OllamaRequest {
            model: &self.model,
            messages: chat_messages(request),
            stream: false,
            options: request.temperature.map(|temperature| OllamaOptions { temperature }),
        };
        let response: OllamaResponse = send_json(self.client.post(&url).json(&body), &url).await?;
        Ok(response.message.content)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// Any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleBackend {
    client: Client,
    base: Url,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

impl OpenAiCompatibleBackend {
    pub fn new(base: Url, model: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base,
            model,
            api_key,
        })
    }

    /// Bases that already end in `/v1` (OpenRouter, proxies) get no second prefix.
    fn completions_url(&self) -> String {
        if self.base.path().trim_end_matches('/').ends_with("/v1") {
            endpoint(&self.base, "chat/completions")
        } else {
            endpoint(&self.base, "v1/chat/completions")
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CapabilityError> {
        let url = self.completions_url();
        let body = OpenAiRequest {
            model: &self.model,
            messages: chat_messages(request),
            temperature: request.temperature,
        };
        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response: OpenAiResponse = send_json(builder, &url).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CapabilityError::fatal(format!("{url}: response has no choices")))
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

/// Anthropic messages API (`POST /v1/messages`).
pub struct AnthropicBackend {
    client: Client,
    base: Url,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicBackend {
    pub fn new(base: Url, model: String, api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CapabilityError> {
        let url = endpoint(&self.base, "v1/messages");
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            system: request.system_text(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
        };
        let builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response: AnthropicResponse = send_json(builder, &url).await?;
        let text: Vec<String> = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(CapabilityError::fatal(format!("{url}: response has no text blocks")));
        }
        Ok(text.join(""))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{CapabilityClient, RetryPolicy};

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.into(),
            system: vec!["Be terse.".into()],
            temperature: None,
        }
    }

    fn base(server: &MockServer) -> Url {
        Url::parse(&server.uri()).unwrap()
    }

    #[test]
    fn endpoint_joining() {
        let b = Url::parse("http://localhost:11434").unwrap();
        assert_eq!(endpoint(&b, "api/chat"), "http://localhost:11434/api/chat");
        let b = Url::parse("https://openrouter.ai/api/v1/").unwrap();
        assert_eq!(endpoint(&b, "/chat/completions"), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn ollama_chat_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen2.5:7b-instruct",
                "stream": false,
                "messages": [{"role": "system", "content": "Be terse."}, {"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "qwen2.5:7b-instruct",
                "message": {"role": "assistant", "content": "hi there"},
                "done": true
            })))
            .mount(&server)
            .await;

        let backend =
            OllamaBackend::new(base(&server), "qwen2.5:7b-instruct".into(), Duration::from_secs(5)).unwrap();
        let text = backend.complete(&request("hello")).await.unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn openai_compatible_sends_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "answer"}}]
            })))
            .mount(&server)
            .await;

        let backend = OpenAiCompatibleBackend::new(
            base(&server),
            "gpt-4o-mini".into(),
            Some("sk-test".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(backend.complete(&request("q")).await.unwrap(), "answer");
    }

    #[tokio::test]
    async fn anthropic_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({"system": "Be terse."})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "part one, "}, {"type": "text", "text": "part two"}]
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            base(&server),
            "claude-3-5-haiku-latest".into(),
            "key".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(backend.complete(&request("q")).await.unwrap(), "part one, part two");
    }

    #[tokio::test]
    async fn rate_limit_is_retried_by_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "recovered"}
            })))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(base(&server), "m".into(), Duration::from_secs(5)).unwrap();
        let client = CapabilityClient::new(
            Arc::new(backend),
            RetryPolicy::immediate(3),
            Duration::from_secs(5),
        );
        assert_eq!(client.complete("q", &[]).await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn auth_failure_is_fatal_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            OpenAiCompatibleBackend::new(base(&server), "m".into(), None, Duration::from_secs(5)).unwrap();
        let client = CapabilityClient::new(
            Arc::new(backend),
            RetryPolicy::immediate(3),
            Duration::from_secs(5),
        );
        let err = client.complete("q", &[]).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message.contains("401"));
    }

    #[tokio::test]
    async fn malformed_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(base(&server), "m".into(), Duration::from_secs(5)).unwrap();
        let err = backend.complete(&request("q")).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message.contains("malformed"));
    }
}
