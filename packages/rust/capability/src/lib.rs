//! Narrow client for the generative text-completion capability.
//!
//! A [`ModelBackend`] performs exactly one attempt against an inference
//! endpoint. [`CapabilityClient`] wraps a backend with a per-call timeout
//! and bounded, jittered exponential backoff for transient failures.
//! The model's answer is treated as opaque text.

mod backends;
mod probe;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use geist_shared::{CapabilityError, GeistError, ModelConfig, Provider, Result};

pub use backends::{AnthropicBackend, OllamaBackend, OpenAiCompatibleBackend};
pub use probe::{ProbeReport, probe};

/// User-Agent string for capability requests.
pub(crate) const USER_AGENT: &str = concat!("Geist/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// One completion request as seen by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// User-turn prompt.
    pub prompt: String,
    /// Behavioral directives, joined into the system instructions.
    pub system: Vec<String>,
    /// Sampling temperature, provider default when unset.
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// System instructions as a single block, or `None` when there are none.
    pub fn system_text(&self) -> Option<String> {
        if self.system.is_empty() {
            None
        } else {
            Some(self.system.join("\n"))
        }
    }
}

/// A single-attempt completion endpoint.
///
/// Implementations classify failures as transient or fatal; they never retry.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short name for logs (e.g. `ollama`).
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, CapabilityError>;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first. At least 1.
    pub max_attempts: u32,
    /// Backoff window before the second attempt.
    pub base_delay: Duration,
    /// Cap on any single backoff window.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests, local stubs).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn from_config(model: &ModelConfig) -> Self {
        Self {
            max_attempts: model.max_retry_attempts.max(1),
            base_delay: Duration::from_millis(model.retry_base_delay_ms),
            max_delay: Duration::from_millis(model.retry_max_delay_ms),
        }
    }

    /// Upper bound of the backoff window after `failed_attempts` failures.
    pub fn window(&self, failed_attempts: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let shift = failed_attempts.saturating_sub(1).min(20);
        let window_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
        Duration::from_millis(u64::try_from(window_ms).unwrap_or(u64::MAX))
    }

    /// Jittered delay, uniform over the upper half of the window.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let window = self.window(failed_attempts);
        if window.is_zero() {
            return window;
        }
        let half = window / 2;
        let jitter_ms = rand::rng().random_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter_ms)
    }
}

// ---------------------------------------------------------------------------
// CapabilityClient
// ---------------------------------------------------------------------------

/// Shared, cloneable entry point for completions.
///
/// Safe for concurrent use; backoff is applied per call, not globally.
#[derive(Clone)]
pub struct CapabilityClient {
    backend: Arc<dyn ModelBackend>,
    policy: RetryPolicy,
    call_timeout: Duration,
    temperature: Option<f32>,
}

impl std::fmt::Debug for CapabilityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityClient")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl CapabilityClient {
    pub fn new(backend: Arc<dyn ModelBackend>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            call_timeout,
            temperature: None,
        }
    }

    /// Build the backend named by the model binding.
    pub fn from_config(model: &ModelConfig) -> Result<Self> {
        let binding = model.parsed_binding()?;
        let base = model.base_url()?;
        let timeout = Duration::from_secs(model.timeout_secs.max(1));

        let backend: Arc<dyn ModelBackend> = match binding.provider {
            Provider::Ollama => Arc::new(OllamaBackend::new(base, binding.model, timeout)?),
            Provider::Anthropic => {
                let key = model.api_key().ok_or_else(|| {
                    GeistError::config("anthropic binding requires an API key in model.api_key_env")
                })?;
                Arc::new(AnthropicBackend::new(base, binding.model, key, timeout)?)
            }
            Provider::OpenAiCompatible => Arc::new(OpenAiCompatibleBackend::new(
                base,
                binding.model,
                model.api_key(),
                timeout,
            )?),
        };

        info!(backend = backend.name(), binding = %model.binding, "capability client ready");

        let mut client = Self::new(backend, RetryPolicy::from_config(model), timeout);
        client.temperature = model.temperature;
        Ok(client)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Complete `prompt` under the given role constraints.
    ///
    /// Transient failures are retried up to the policy's attempt bound;
    /// fatal failures return immediately.
    pub async fn complete(
        &self,
        prompt: &str,
        role_constraints: &[String],
    ) -> std::result::Result<String, CapabilityError> {
        let request = CompletionRequest {
            prompt: prompt.to_string(),
            system: role_constraints.to_vec(),
            temperature: self.temperature,
        };
        let prompt_chars = prompt.chars().count();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.call_timeout, self.backend.complete(&request)).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::transient(format!(
                    "call timed out after {}s",
                    self.call_timeout.as_secs_f32()
                ))),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(text) => {
                    info!(
                        backend = self.backend.name(),
                        prompt_chars,
                        response_chars = text.len(),
                        attempt,
                        elapsed_ms,
                        "capability call complete"
                    );
                    return Ok(text);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        backend = self.backend.name(),
                        prompt_chars,
                        attempt,
                        elapsed_ms,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient capability error, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        backend = self.backend.name(),
                        prompt_chars,
                        attempt,
                        elapsed_ms,
                        error = %err,
                        "capability call failed"
                    );
                    if err.is_transient() {
                        debug!(max_attempts, "retry budget exhausted");
                        return Err(CapabilityError::transient(format!(
                            "{} (gave up after {attempt} attempt(s))",
                            err.message
                        )));
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Backend replaying a fixed script of outcomes.
    struct ScriptedBackend {
        script: Mutex<VecDeque<std::result::Result<String, CapabilityError>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<std::result::Result<String, CapabilityError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> std::result::Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default".into()))
        }
    }

    /// Backend that never answers.
    struct HangingBackend;

    #[async_trait]
    impl ModelBackend for HangingBackend {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<String, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
    }

    fn client(backend: Arc<dyn ModelBackend>, attempts: u32) -> CapabilityClient {
        CapabilityClient::new(backend, RetryPolicy::immediate(attempts), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let backend = ScriptedBackend::new(vec![
            Err(CapabilityError::transient("HTTP 429")),
            Err(CapabilityError::transient("HTTP 503")),
            Ok("answer".into()),
        ]);
        let text = client(backend.clone(), 3).complete("hi", &[]).await.unwrap();
        assert_eq!(text, "answer");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_attempt_budget() {
        let backend = ScriptedBackend::new(vec![
            Err(CapabilityError::transient("HTTP 429")),
            Err(CapabilityError::transient("HTTP 429")),
            Err(CapabilityError::transient("HTTP 429")),
            Ok("too late".into()),
        ]);
        let err = client(backend.clone(), 3).complete("hi", &[]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.message.contains("3 attempt"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let backend = ScriptedBackend::new(vec![
            Err(CapabilityError::fatal("HTTP 401")),
            Ok("never".into()),
        ]);
        let err = client(backend.clone(), 3).complete("hi", &[]).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn constraints_become_system_instructions() {
        let backend = ScriptedBackend::new(vec![Ok("ok".into())]);
        client(backend.clone(), 1)
            .complete("prompt", &["Be brief.".into(), "No speculation.".into()])
            .await
            .unwrap();
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].prompt, "prompt");
        assert_eq!(
            seen[0].system_text().as_deref(),
            Some("Be brief.\nNo speculation.")
        );
    }

    #[tokio::test]
    async fn timeouts_count_as_transient() {
        let client = CapabilityClient::new(
            Arc::new(HangingBackend),
            RetryPolicy::immediate(2),
            Duration::from_millis(50),
        );
        let err = client.complete("hi", &[]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn backoff_windows_grow_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.window(1), Duration::from_millis(100));
        assert_eq!(policy.window(2), Duration::from_millis(200));
        assert_eq!(policy.window(3), Duration::from_millis(350));
        assert_eq!(policy.window(10), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(10),
        };
        for _ in 0..50 {
            let d = policy.delay(2);
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(800));
        }
        assert_eq!(RetryPolicy::immediate(3).delay(2), Duration::ZERO);
    }

    #[test]
    fn from_config_builds_ollama_backend() {
        let client = CapabilityClient::from_config(&ModelConfig::default()).unwrap();
        assert_eq!(client.policy().max_attempts, 3);
        assert!(format!("{client:?}").contains("ollama"));
    }
}
