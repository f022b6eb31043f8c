//! Retry with exponential backoff, and error classification.
//!
//! Transient failures (429, 5xx, dropped connections) are retried with
//! backoff. Context-window overflows are never retried here: they are
//! recovered by shrinking the conversation, which is the job of
//! [`crate::agent::execution`].

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = fail on the first error).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Whether to shave a deterministic jitter off each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        if !self.jitter {
            return Duration::from_secs_f64(capped);
        }
        // Deterministic jitter factors, cycled by attempt.
        let factor = [0.75, 0.90, 0.60, 0.85][(attempt % 4) as usize];
        Duration::from_secs_f64(capped * factor)
    }
}

/// Phrases providers use when the prompt exceeds the context window.
const OVERFLOW_INDICATORS: &[&str] = &[
    "token limit",
    "context length",
    "maximum context",
    "too many tokens",
    "context window",
];

/// Whether an error string reports a context-window overflow.
pub fn is_context_overflow(error: &str) -> bool {
    let lower = error.to_lowercase();
    OVERFLOW_INDICATORS.iter().any(|p| lower.contains(p))
}

/// Prefix of errors for provider bodies that could not be decoded.
pub const MALFORMED_RESPONSE: &str = "failed to parse response";

/// Whether an error reports an undecodable provider body.
pub fn is_malformed_response(error: &str) -> bool {
    error.starts_with(MALFORMED_RESPONSE)
}

/// The status code of an `HTTP {code}` error, if the error carries one.
pub fn http_status(error: &str) -> Option<u16> {
    let (_, rest) = error.split_once("HTTP ")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Whether an error string indicates a transient (retryable) failure.
///
/// A status code decides on its own: 408, 429 and 5xx are transient.
pub fn is_transient_error(error: &str) -> bool {
    if let Some(code) = http_status(error) {
        return matches!(code, 408 | 429 | 500..=599);
    }
    let lower = error.to_lowercase();
    [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "broken pipe",
        "network",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Whether an error is a permanent (non-retryable) failure.
///
/// A status code decides on its own: other 4xx codes are permanent.
pub fn is_permanent_error(error: &str) -> bool {
    if let Some(code) = http_status(error) {
        return (400..500).contains(&code) && !matches!(code, 408 | 429);
    }
    let lower = error.to_lowercase();
    ["invalid", "bad request", "unauthorized"]
        .iter()
        .any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::with_retries(10)
        };
        assert!(config.delay_for_attempt(1) > config.delay_for_attempt(0));
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn jitter_never_lengthens_delay() {
        let jittered = RetryConfig::with_retries(3);
        let plain = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(3)
        };
        for attempt in 0..4 {
            assert!(jittered.delay_for_attempt(attempt) <= plain.delay_for_attempt(attempt));
        }
    }

    #[test]
    fn overflow_phrases_detected_case_insensitively() {
        assert!(is_context_overflow(
            "This model's Maximum Context length is 8192 tokens"
        ));
        assert!(is_context_overflow("prompt is too many tokens for model"));
        assert!(is_context_overflow("input exceeds the context window"));
        assert!(!is_context_overflow("OpenRouter API HTTP 429: rate limited"));
    }

    #[test]
    fn transient_and_permanent_errors() {
        assert!(is_transient_error("OpenRouter API HTTP 502: bad gateway"));
        assert!(is_transient_error("request failed: connection reset"));
        assert!(!is_transient_error("OpenRouter API HTTP 400: bad request"));
        assert!(is_permanent_error("OpenRouter API HTTP 401: unauthorized"));
    }

    #[test]
    fn status_code_wins_over_message_words() {
        let upstream = "OpenRouter API HTTP 503 Service Unavailable: invalid upstream response";
        assert_eq!(http_status(upstream), Some(503));
        assert!(is_transient_error(upstream));
        assert!(!is_permanent_error(upstream));

        let rejected = "OpenRouter API HTTP 400 Bad Request: connection timeout param";
        assert!(!is_transient_error(rejected));
        assert!(is_permanent_error(rejected));

        assert_eq!(http_status("request failed: broken pipe"), None);
        assert!(is_permanent_error("invalid api key"));
    }

    #[test]
    fn undecodable_bodies_detected() {
        assert!(is_malformed_response(&format!(
            "{MALFORMED_RESPONSE}: expected value at line 1 column 1"
        )));
        assert!(!is_malformed_response("OpenRouter API HTTP 502: bad gateway"));
    }
}
