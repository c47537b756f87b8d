//! Translation layer: remote transport, retry policy, prompt/response handling,
//! translation memory and context assembly.

pub mod context;
pub mod gemini;
pub mod memory;
pub mod normalize;
pub mod prompt;
pub mod response;
pub mod retry;
pub mod similarity;
pub mod store;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Sampling parameters forwarded to the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

impl GenerationParams {
    /// Clamp every knob into the range the service accepts.
    pub fn clamped(self) -> Self {
        Self {
            temperature: self.temperature.clamp(0.1, 1.0),
            top_p: self.top_p.clamp(0.1, 1.0),
            top_k: self.top_k.clamp(1, 40),
            max_output_tokens: self.max_output_tokens.max(1),
        }
    }
}

/// One remote call: a prompt plus generation parameters.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

/// Coarse failure classes driving the retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Network,
    RateLimit,
    Server,
    Malformed,
    Cancelled,
    Fatal,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request rejected {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("translation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TranslateError {
    pub fn class(&self) -> FailureClass {
        match self {
            TranslateError::Network(_) => FailureClass::Network,
            TranslateError::RateLimited { .. } => FailureClass::RateLimit,
            TranslateError::Server { .. } => FailureClass::Server,
            TranslateError::MalformedResponse(_) => FailureClass::Malformed,
            TranslateError::Cancelled => FailureClass::Cancelled,
            TranslateError::Rejected { .. }
            | TranslateError::Configuration(_)
            | TranslateError::Store(_)
            | TranslateError::InvalidInput(_) => FailureClass::Fatal,
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            FailureClass::Network | FailureClass::RateLimit | FailureClass::Server
        )
    }
}

impl From<rusqlite::Error> for TranslateError {
    fn from(e: rusqlite::Error) -> Self {
        TranslateError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for TranslateError {
    fn from(e: serde_json::Error) -> Self {
        TranslateError::Store(e.to_string())
    }
}

/// Remote translation backend. Returns the raw response text of one call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(TranslateError::Network("down".into()).is_retryable());
        assert!(TranslateError::RateLimited {
            message: "429".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(TranslateError::Server {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!TranslateError::MalformedResponse("no text".into()).is_retryable());
        assert!(!TranslateError::Cancelled.is_retryable());
        assert!(!TranslateError::Configuration("no key".into()).is_retryable());
        assert_eq!(
            TranslateError::Rejected {
                status: 403,
                message: String::new()
            }
            .class(),
            FailureClass::Fatal
        );
    }

    #[test]
    fn generation_params_are_clamped() {
        let p = GenerationParams {
            temperature: 3.0,
            top_p: 0.0,
            top_k: 100,
            max_output_tokens: 0,
        }
        .clamped();
        assert_eq!(p.temperature, 1.0);
        assert_eq!(p.top_p, 0.1);
        assert_eq!(p.top_k, 40);
        assert_eq!(p.max_output_tokens, 1);
    }
}
