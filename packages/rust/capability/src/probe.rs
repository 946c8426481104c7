//! Endpoint reachability check used by `poltergeist doctor`.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use geist_shared::{GeistError, ModelConfig, Provider, Result};

use crate::USER_AGENT;
use crate::backends::endpoint;

/// Probes are short; a live server answers well inside this.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of probing the configured endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub reachable: bool,
    /// Status line or transport error.
    pub detail: String,
    /// Whether the bound model is installed; only known for Ollama.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_present: Option<bool>,
    /// Models the endpoint reports as installed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub installed: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

/// Check that the configured endpoint answers.
///
/// Configuration errors are returned; network failures are reported in the
/// [`ProbeReport`] instead.
#[instrument(skip_all, fields(binding = %model.binding))]
pub async fn probe(model: &ModelConfig) -> Result<ProbeReport> {
    let binding = model.parsed_binding()?;
    let base = model.base_url()?;
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| GeistError::config(format!("failed to build HTTP client: {e}")))?;

    let url = match binding.provider {
        Provider::Ollama => endpoint(&base, "api/tags"),
        Provider::Anthropic | Provider::OpenAiCompatible => base.to_string(),
    };
    debug!(%url, "probing endpoint");

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            return Ok(ProbeReport {
                reachable: false,
                detail: format!("{url}: {e}"),
                model_present: None,
                installed: Vec::new(),
            });
        }
    };

    let status = response.status();
    let mut report = ProbeReport {
        reachable: true,
        detail: format!("{url}: HTTP {status}"),
        model_present: None,
        installed: Vec::new(),
    };

    if binding.provider == Provider::Ollama && status.is_success() {
        match response.json::<OllamaTags>().await {
            Ok(tags) => {
                report.installed = tags.models.into_iter().map(|m| m.name).collect();
                report.model_present = Some(report.installed.iter().any(|name| {
                    name == &binding.model || name.strip_suffix(":latest") == Some(binding.model.as_str())
                }));
            }
            Err(e) => report.detail = format!("{url}: unreadable model list: {e}"),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn ollama_config(server: &MockServer, model: &str) -> ModelConfig {
        ModelConfig {
            binding: format!("ollama/{model}"),
            api_base: server.uri(),
            ..ModelConfig::default()
        }
    }

    #[tokio::test]
    async fn ollama_probe_lists_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "qwen2.5:7b-instruct"}, {"name": "llama3:latest"}]
            })))
            .mount(&server)
            .await;

        let report = probe(&ollama_config(&server, "qwen2.5:7b-instruct")).await.unwrap();
        assert!(report.reachable);
        assert_eq!(report.model_present, Some(true));
        assert_eq!(report.installed.len(), 2);

        let report = probe(&ollama_config(&server, "llama3")).await.unwrap();
        assert_eq!(report.model_present, Some(true));

        let report = probe(&ollama_config(&server, "mistral")).await.unwrap();
        assert_eq!(report.model_present, Some(false));
    }

    #[tokio::test]
    async fn openai_probe_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let model = ModelConfig {
            binding: "openai/gpt-4o-mini".into(),
            api_base: server.uri(),
            ..ModelConfig::default()
        };
        let report = probe(&model).await.unwrap();
        assert!(report.reachable);
        assert!(report.detail.contains("404"));
        assert_eq!(report.model_present, None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported() {
        let model = ModelConfig {
            api_base: "http://127.0.0.1:9".into(),
            ..ModelConfig::default()
        };
        let report = probe(&model).await.unwrap();
        assert!(!report.reachable);
    }
}
