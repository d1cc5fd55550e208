use std::env;
use std::fmt;
use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::types::{ApiError, GenerateRequest, GenerateResponse};

const ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const FALLBACK_MODEL: &str = "gemini-2.5-flash";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_SNIPPET_BYTES: usize = 200;

const RETRY: RetryPolicy = RetryPolicy {
    attempts: 3,
    initial: Duration::from_secs(1),
};

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle not configured: set GEMINI_API_KEY (keys at https://aistudio.google.com/apikey)")]
    ApiKeyNotSet,

    #[error("oracle rate limited, retry later")]
    RateLimited,

    #[error("oracle quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("oracle API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("oracle returned no text")]
    EmptyResponse,

    #[error("oracle request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl OracleError {
    /// Rate limits and server-side failures are worth another attempt.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            OracleError::RateLimited | OracleError::Api { code: 500..=599, .. }
        )
    }
}

/// Text generation, used for reranking and summaries.
pub trait TextOracle {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, OracleError>;
}

impl<T: TextOracle> TextOracle for &T {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, OracleError> {
        (**self).generate(prompt, max_tokens, temperature).await
    }
}

/// Exponential backoff with equal jitter: each delay is drawn from
/// `[base / 2, base)` where `base = initial * 2^attempt`.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    initial: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_millis() as u64 * 2u64.pow(attempt);
        let half = base / 2;
        Duration::from_millis(half + fastrand::u64(..half.max(1)))
    }
}

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    endpoint: String,
    retry: RetryPolicy,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Reads `GEMINI_API_KEY` (required) and `GEMINI_MODEL` (optional).
    pub fn from_env(http: Client) -> Result<Self, OracleError> {
        let api_key = env_value("GEMINI_API_KEY").ok_or(OracleError::ApiKeyNotSet)?;
        let model = env_value("GEMINI_MODEL").unwrap_or_else(|| FALLBACK_MODEL.to_string());
        Ok(Self {
            http,
            api_key,
            model,
            endpoint: ENDPOINT.to_string(),
            retry: RETRY,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            api_key: "test-key".to_string(),
            model: FALLBACK_MODEL.to_string(),
            endpoint: base_url.to_string(),
            retry: RetryPolicy {
                attempts: 3,
                initial: Duration::from_millis(2),
            },
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, OracleError> {
        let url = format!("{}/{}:generateContent", self.endpoint, self.model);
        debug_assert!(
            url.starts_with("https://") || cfg!(test),
            "API key must only travel over HTTPS"
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header(USER_AGENT, crate::USER_AGENT)
            .timeout(CALL_TIMEOUT)
            .json(&GenerateRequest::user_prompt(prompt, max_tokens, temperature))
            .send()
            .await?;
        let status = response.status();
        let raw = response.text().await?;

        let body = interpret(status, &raw)?;
        debug!(model = %self.model, "oracle generation complete");
        body.text().ok_or_else(|| {
            warn!(
                finish_reason = body.finish_reason().unwrap_or("unknown"),
                "oracle returned no text"
            );
            OracleError::EmptyResponse
        })
    }
}

impl TextOracle for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, OracleError> {
        let mut attempt = 0;
        loop {
            match self.call(prompt, max_tokens, temperature).await {
                Err(e) if e.is_transient() && attempt + 1 < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient oracle error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

fn env_value(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Turn one HTTP exchange into a parsed body or a classified error.
///
/// An `error` object wins over the status code, including on 200 responses.
fn interpret(status: StatusCode, raw: &str) -> Result<GenerateResponse, OracleError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("oracle rate limited");
        return Err(OracleError::RateLimited);
    }

    let parsed = serde_json::from_str::<GenerateResponse>(raw);
    if let Ok(GenerateResponse {
        error: Some(api_error),
        ..
    }) = &parsed
    {
        let classified = classify(api_error);
        warn!(%status, error = %classified, "oracle API error");
        return Err(classified);
    }

    if !status.is_success() {
        let end = raw.floor_char_boundary(ERROR_SNIPPET_BYTES);
        warn!(%status, "oracle API error without a structured body");
        return Err(OracleError::Api {
            code: status.as_u16(),
            message: format!("HTTP {status}: {}", &raw[..end]),
        });
    }

    parsed.map_err(|e| OracleError::Api {
        code: status.as_u16(),
        message: format!("unreadable response body: {e}"),
    })
}

fn classify(err: &ApiError) -> OracleError {
    let message = match (&err.status, &err.message) {
        (Some(status), Some(message)) => format!("{status}: {message}"),
        (None, Some(message)) => message.clone(),
        (Some(status), None) => status.clone(),
        (None, None) => "no error message".to_string(),
    };
    match err.code {
        Some(429) => OracleError::RateLimited,
        Some(403) => OracleError::QuotaExhausted(message),
        Some(code) => OracleError::Api { code, message },
        None => OracleError::Api { code: 0, message },
    }
}


#[cfg(test)]
mod http_tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/gemini-2.5-flash:generateContent";

    fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
        }))
    }

    async fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::with_base_url(Client::new(), &server.uri())
    }

    #[tokio::test]
    async fn sends_prompt_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({"generationConfig": {"maxOutputTokens": 500}})))
            .respond_with(reply("Duty free under HS 8471.30."))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .await
            .generate("summarize", 500, 0.1)
            .await
            .unwrap();
        assert_eq!(text, "Duty free under HS 8471.30.");
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(reply("[]"))
            .mount(&server)
            .await;

        let text = client_for(&server).await.generate("x", 10, 0.0).await.unwrap();
        assert_eq!(text, "[]");
        let requests = server.received_requests().await.unwrap_or_default();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn rate_limit_gives_up_after_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server).await.generate("x", 10, 0.0).await.unwrap_err();
        assert!(matches!(err, OracleError::RateLimited), "got {err:?}");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Invalid argument", "status": "INVALID_ARGUMENT"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        match client_for(&server).await.generate("x", 10, 0.0).await {
            Err(OracleError::Api { code: 400, message }) => {
                assert_eq!(message, "INVALID_ARGUMENT: Invalid argument");
            }
            other => panic!("expected Api(400), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_candidates_are_an_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).await.generate("x", 10, 0.0).await.unwrap_err();
        assert!(matches!(err, OracleError::EmptyResponse));
    }
}
