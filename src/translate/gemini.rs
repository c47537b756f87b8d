//! Gemini `generateContent` transport.
//! Connection pooling via reqwest, a minimum spacing between calls, a hard
//! per-call timeout and classification of every failure. Retrying is the
//! caller's business (see `retry`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{TranslateError, TranslationRequest, Transport};
use crate::config::ApiConfig;

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
    /// Earliest instant the next request may start.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
    timeout: Duration,
}

impl GeminiClient {
    /// Fails with a configuration error when no key is set, before any
    /// network activity.
    pub fn new(api: &ApiConfig) -> Result<Self, TranslateError> {
        let api_key = api.api_key()?.to_string();

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TranslateError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            url: format!(
                "{}/{}:generateContent",
                api.endpoint.trim_end_matches('/'),
                api.model
            ),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: api.min_interval(),
            timeout: api.timeout(),
        })
    }

    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    async fn call(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TranslateError::Network(e.to_string()))?;
        extract_text(&body)
    }
}

#[async_trait]
impl Transport for GeminiClient {
    async fn send(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError> {
        tokio::select! {
            _ = self.rate_limit_wait() => {}
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
        }
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        let start = Instant::now();
        let outcome = tokio::select! {
            r = tokio::time::timeout(self.timeout, self.call(request)) => r,
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(text)) => {
                debug!(elapsed_ms, chars = text.len(), "remote_call_ok");
                Ok(text)
            }
            Ok(Err(err)) => {
                warn!(elapsed_ms, error = %err, "remote_call_failed");
                Err(err)
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "remote_call_timeout");
                Err(TranslateError::Network(format!(
                    "request timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

fn request_body(request: &TranslationRequest) -> serde_json::Value {
    let params = request.params.clamped();
    json!({
        "contents": [{ "parts": [{ "text": request.prompt }] }],
        "generationConfig": {
            "temperature": params.temperature,
            "topP": params.top_p,
            "topK": params.top_k,
            "maxOutputTokens": params.max_output_tokens,
        }
    })
}

/// Map a non-success HTTP status (plus body wording) onto the error taxonomy.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> TranslateError {
    let message: String = body.chars().take(200).collect();
    let quota_wording = body.contains("RESOURCE_EXHAUSTED") || body.to_lowercase().contains("quota");

    if status == StatusCode::TOO_MANY_REQUESTS || quota_wording {
        TranslateError::RateLimited {
            message: if message.is_empty() {
                status.to_string()
            } else {
                message
            },
            retry_after,
        }
    } else if status.is_server_error() {
        TranslateError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        TranslateError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

// --- Response types ---

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Text of the first part of the first candidate.
pub fn extract_text(body: &str) -> Result<String, TranslateError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| TranslateError::MalformedResponse(format!("invalid JSON: {e}")))?;
    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| TranslateError::MalformedResponse("missing candidates[0].content.parts[0].text".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::GenerationParams;

    #[test]
    fn extracts_first_candidate_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"سلام"},{"text":"x"}]}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "سلام");
    }

    #[test]
    fn missing_payload_is_malformed() {
        for body in [
            r#"{}"#,
            r#"{"candidates":[]}"#,
            r#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
            r#"{"candidates":[{"content":{"parts":[]}}]}"#,
            "not json",
        ] {
            assert!(
                matches!(extract_text(body), Err(TranslateError::MalformedResponse(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)), ""),
            TranslateError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#),
            TranslateError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None, "try later"),
            TranslateError::Server { status: 503, .. }
        ));
        let rejected = classify_status(StatusCode::FORBIDDEN, None, "bad key");
        assert!(matches!(rejected, TranslateError::Rejected { status: 403, .. }));
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn body_carries_clamped_generation_config() {
        let request = TranslationRequest {
            prompt: "1. Hello".into(),
            params: GenerationParams {
                temperature: 0.0,
                top_p: 0.5,
                top_k: 99,
                max_output_tokens: 2048,
            },
        };
        let body = request_body(&request);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "1. Hello");
        let cfg = &body["generationConfig"];
        assert!((cfg["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(cfg["topK"], 40);
        assert_eq!(cfg["maxOutputTokens"], 2048);
    }

    /// Accepts one connection and never answers it.
    async fn silent_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        format!("http://{addr}/models")
    }

    fn silent_client(endpoint: String, timeout_secs: u64) -> GeminiClient {
        GeminiClient::new(&ApiConfig {
            key: Some("k".into()),
            endpoint,
            timeout_secs,
            min_interval_ms: 0,
            ..ApiConfig::default()
        })
        .unwrap()
    }

    fn hello() -> TranslationRequest {
        TranslationRequest {
            prompt: "1. Hello".into(),
            params: GenerationParams::default(),
        }
    }

    #[tokio::test]
    async fn stalled_call_times_out_as_network_failure() {
        let client = silent_client(silent_endpoint().await, 1);
        let started = Instant::now();

        let result = client.send(&hello(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(TranslateError::Network(ref m)) if m.contains("timed out")));
        assert!(result.unwrap_err().is_retryable());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancel_interrupts_call_in_flight() {
        let client = silent_client(silent_endpoint().await, 30);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let started = Instant::now();

        let result = client.send(&hello(), &cancel).await;

        assert!(matches!(result, Err(TranslateError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn client_requires_key() {
        let api = ApiConfig::default();
        assert!(matches!(GeminiClient::new(&api), Err(TranslateError::Configuration(_))));

        let api = ApiConfig {
            key: Some("k".into()),
            endpoint: "https://example.invalid/models/".into(),
            ..ApiConfig::default()
        };
        let client = GeminiClient::new(&api).unwrap();
        assert_eq!(
            client.url,
            "https://example.invalid/models/gemini-2.0-flash-exp:generateContent"
        );
    }
}
