//! Generation backend implementations
//!
//! Backends are modeled as a capability set: every variant implements
//! streaming generation; embeddings and multimodal input are optional
//! capabilities a variant may advertise. The pool stores backends behind
//! `Arc<dyn GenerationBackend>` and consumers never see the concrete type.

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use voice_router_core::{
    CancellationToken, FinishReason, GenerateRequest, GenerationResult, ReasoningMode,
    StreamChunk, TokenStream,
};

use crate::quant::Quantization;
use crate::LlmError;

/// A loaded generation backend
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    /// Generate a complete response
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, LlmError>;

    /// Generate a streaming response
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError>;

    /// Release backend resources; called by the pool on eviction
    async fn unload(&self) {}

    /// Optional capability: embeddings
    fn supports_embedding(&self) -> bool {
        false
    }

    /// Optional capability: multimodal input
    fn supports_multimodal(&self) -> bool {
        false
    }

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Creates backends on behalf of the pool; loading runs on the pool's
/// dedicated executor so it never blocks pipeline tasks.
#[async_trait]
pub trait BackendFactory: Send + Sync + 'static {
    async fn load(
        &self,
        name: &str,
        quant: Quantization,
        context_window: u32,
    ) -> Result<Arc<dyn GenerationBackend>, LlmError>;
}

// =============================================================================
// HTTP backend (Ollama-style NDJSON streaming)
// =============================================================================

/// Configuration for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Model name/ID at the serving endpoint
    pub model: String,
    /// API endpoint
    pub endpoint: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Temperature
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub initial_backoff: Duration,
    /// Keep the model resident between calls ("5m", "1h", "-1", "0")
    pub keep_alive: String,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            model: "tier-fast".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            keep_alive: "5m".to_string(),
        }
    }
}

/// HTTP generation backend speaking an Ollama-style chat API
pub struct HttpBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, request: &GenerateRequest, stream: bool) -> ApiChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: request.system.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ApiChatRequest {
            model: self.config.model.clone(),
            messages,
            stream,
            options: Some(ApiOptions {
                temperature: Some(request.temperature),
                num_predict: Some(request.max_tokens.min(self.config.max_tokens) as i32),
            }),
            keep_alive: Some(self.config.keep_alive.clone()),
            think: Some(request.reasoning == ReasoningMode::On),
        }
    }

    async fn execute(&self, body: &ApiChatRequest) -> Result<ApiChatResponse, LlmError> {
        let response = self.client.post(self.chat_url()).json(body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {error}")));
            }
            return Err(LlmError::Api(error));
        }
        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let body = self.build_request(&request, false);

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            if attempt > 0 {
                tracing::warn!(
                    model = %self.config.model,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Generation request failed, retrying"
                );
                tokio::time::sleep(jittered(backoff)).await;
                backoff *= 2;
            }

            match cancel.run_until_cancelled(self.execute(&body)).await {
                None => return Err(LlmError::Cancelled),
                Some(Ok(result)) => {
                    return Ok(GenerationResult {
                        text: result.message.content,
                        tokens: result.eval_count.unwrap_or(0) as usize,
                        time_to_first_token_ms: result.prompt_eval_duration.unwrap_or(0)
                            / 1_000_000,
                        total_time_ms: start.elapsed().as_millis() as u64,
                        finish_reason: if result.done {
                            FinishReason::Stop
                        } else {
                            FinishReason::Length
                        },
                    });
                }
                Some(Err(e)) if e.is_retryable() => last_error = Some(e),
                Some(Err(e)) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("max retries exceeded".to_string())))
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        let body = self.build_request(&request, true);

        let response = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(error));
        }

        let mut byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            'outer: while let Some(chunk) = byte_stream.next().await {
                if cancel.is_cancelled() {
                    break;
                }
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(LlmError::from(e).into());
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // NDJSON: one JSON object per line.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    if let Ok(parsed) = serde_json::from_str::<ApiStreamChunk>(&line) {
                        let done = parsed.done;
                        yield Ok(StreamChunk {
                            delta: parsed.message.content,
                            is_final: done,
                        });
                        if done {
                            break 'outer;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

// HTTP API types
#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    message: ApiMessage,
    done: bool,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    message: ApiMessage,
    done: bool,
}

/// Factory creating `HttpBackend`s against one endpoint
pub struct HttpFactory {
    endpoint: String,
    timeout: Duration,
}

impl HttpFactory {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl BackendFactory for HttpFactory {
    async fn load(
        &self,
        name: &str,
        quant: Quantization,
        context_window: u32,
    ) -> Result<Arc<dyn GenerationBackend>, LlmError> {
        tracing::info!(model = name, %quant, context_window, "Loading HTTP backend");
        let backend = HttpBackend::new(HttpBackendConfig {
            model: name.to_string(),
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            ..Default::default()
        })?;
        Ok(Arc::new(backend))
    }
}

// =============================================================================
// Stub backend (tests, offline development)
// =============================================================================

/// Deterministic backend with configurable latency and scripted output
pub struct StubBackend {
    name: String,
    /// Wall time before the first chunk
    pub latency: Duration,
    /// Scripted response text; streamed word by word
    pub reply: String,
    /// Fail this many generate calls before succeeding
    fail_remaining: AtomicU32,
}

impl StubBackend {
    pub fn new(name: impl Into<String>, latency: Duration, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency,
            reply: reply.into(),
            fail_remaining: AtomicU32::new(0),
        }
    }

    /// Make the next `n` generate calls fail with a generation error
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl GenerationBackend for StubBackend {
    async fn generate(
        &self,
        _request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, LlmError> {
        if self.take_failure() {
            return Err(LlmError::Generation("stub failure".to_string()));
        }
        let start = Instant::now();
        if cancel
            .run_until_cancelled(tokio::time::sleep(self.latency))
            .await
            .is_none()
        {
            return Err(LlmError::Cancelled);
        }
        Ok(GenerationResult {
            text: self.reply.clone(),
            tokens: self.reply.split_whitespace().count(),
            time_to_first_token_ms: self.latency.as_millis() as u64,
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        _request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        if self.take_failure() {
            return Err(LlmError::Generation("stub failure".to_string()));
        }
        let latency = self.latency;
        let words: Vec<String> = self
            .reply
            .split_inclusive(' ')
            .map(|w| w.to_string())
            .collect();

        let stream = async_stream::stream! {
            if cancel
                .run_until_cancelled(tokio::time::sleep(latency))
                .await
                .is_none()
            {
                return;
            }
            let count = words.len();
            for (idx, word) in words.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    return;
                }
                yield Ok(StreamChunk {
                    delta: word,
                    is_final: idx + 1 == count,
                });
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory producing stub backends; individual names can be made to fail
/// loading to exercise the fallback chain.
#[derive(Default)]
pub struct StubFactory {
    /// Latency applied to every created backend
    pub latency: Duration,
    /// Reply text for every created backend
    pub reply: String,
    fail_loads: parking_lot::Mutex<std::collections::HashSet<String>>,
    loads: AtomicU32,
}

impl StubFactory {
    pub fn new(latency: Duration, reply: impl Into<String>) -> Self {
        Self {
            latency,
            reply: reply.into(),
            fail_loads: parking_lot::Mutex::new(std::collections::HashSet::new()),
            loads: AtomicU32::new(0),
        }
    }

    /// Every subsequent load of `name` fails
    pub fn fail_loads_of(&self, name: &str) {
        self.fail_loads.lock().insert(name.to_string());
    }

    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for StubFactory {
    async fn load(
        &self,
        name: &str,
        _quant: Quantization,
        _context_window: u32,
    ) -> Result<Arc<dyn GenerationBackend>, LlmError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.lock().contains(name) {
            return Err(LlmError::Load {
                name: name.to_string(),
                message: "stub load failure".to_string(),
            });
        }
        Ok(Arc::new(StubBackend::new(
            name,
            self.latency,
            self.reply.clone(),
        )))
    }
}

/// Jittered backoff helper shared by retrying callers
pub(crate) fn jittered(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    base.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_http_config_default() {
        let config = HttpBackendConfig::default();
        assert_eq!(config.keep_alive, "5m");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_api_request_serialization() {
        let backend = HttpBackend::new(HttpBackendConfig::default()).unwrap();
        let req = backend.build_request(
            &GenerateRequest::new("hola").with_reasoning(ReasoningMode::On),
            true,
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("keep_alive"));
        assert!(json.contains("\"think\":true"));
        assert!(json.contains("hola"));
    }

    #[tokio::test]
    async fn test_stub_generates_script() {
        let stub = StubBackend::new("test", Duration::from_millis(5), "hola mundo");
        let result = stub
            .generate(GenerateRequest::new("x"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.text, "hola mundo");
        assert_eq!(result.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_stub_stream_marks_final_chunk() {
        let stub = StubBackend::new("test", Duration::from_millis(1), "uno dos tres");
        let mut stream = stub
            .generate_stream(GenerateRequest::new("x"), CancellationToken::new())
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks.len(), 3);
        assert!(chunks.last().unwrap().is_final);
        let text: String = chunks.iter().map(|c| c.delta.as_str()).collect();
        assert_eq!(text, "uno dos tres");
    }

    #[tokio::test]
    async fn test_stub_cancellation_truncates_stream() {
        let stub = StubBackend::new("test", Duration::from_millis(50), "uno dos tres");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stream = stub
            .generate_stream(GenerateRequest::new("x"), cancel)
            .await
            .unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stub_failure_budget() {
        let stub = StubBackend::new("test", Duration::from_millis(1), "ok");
        stub.fail_next(1);
        let first = stub
            .generate(GenerateRequest::new("x"), CancellationToken::new())
            .await;
        assert!(first.is_err());
        let second = stub
            .generate(GenerateRequest::new("x"), CancellationToken::new())
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_stub_factory_fail_loads() {
        let factory = StubFactory::new(Duration::ZERO, "ok");
        factory.fail_loads_of("broken");
        assert!(factory
            .load("broken", Quantization::Q4, 512)
            .await
            .is_err());
        assert!(factory.load("fine", Quantization::Q4, 512).await.is_ok());
        assert_eq!(factory.load_count(), 2);
    }
}
