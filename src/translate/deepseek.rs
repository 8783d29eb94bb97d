//! DeepSeek API translation client.
//! Connection pooling via reqwest, simple token-bucket rate limiting,
//! retry on 429 / 5xx / timeout, placeholder protection around each request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::normalize::PlaceholderProtector;
use super::{TranslateError, TranslateRequest, Translator};
use crate::config::TranslatorSettings;

/// DeepSeek chat/completions client.
pub struct DeepSeekClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    protector: PlaceholderProtector,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
    /// Longest 429 back-off honored before giving up on the field.
    max_retry_wait: Duration,
}

impl DeepSeekClient {
    /// Build a client. A missing key is not an error here; the pipeline
    /// reports it as a configuration error before the first batch.
    pub fn new(settings: &TranslatorSettings, api_key: Option<String>) -> Result<Self, TranslateError> {
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::ApiError(e.to_string()))?;

        let protector =
            PlaceholderProtector::new().map_err(|e| TranslateError::InvalidInput(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            protector,
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(settings.min_interval_ms),
            max_retry_wait: timeout,
        })
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max 3); a wait beyond the request
    /// timeout is not honored, the call fails as rate limited instead.
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(
        &self,
        api_key: &str,
        body: &ChatRequest<'_>,
    ) -> Result<reqwest::Response, TranslateError> {
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let wait = retry_after_wait(
                        resp.headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok()),
                        attempt,
                    );
                    if attempt >= max_429_retries || wait > self.max_retry_wait {
                        return Err(TranslateError::RateLimited {
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(TranslateError::ApiError(format!(
                            "server error: {}",
                            resp.status()
                        )));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(TranslateError::ApiError(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(TranslateError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(TranslateError::ApiError(e.to_string())),
            }
        }
    }
}

impl Translator for DeepSeekClient {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| TranslateError::NotConfigured("API key missing".into()))?;
        if request.source_text.trim().is_empty() {
            return Err(TranslateError::InvalidInput("empty source text".into()));
        }

        self.rate_limit_wait().await;

        let (protected, placeholders) = self.protector.protect(&request.source_text);
        let user_prompt = build_user_prompt(&protected, request)?;
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            max_tokens: estimate_max_tokens(&protected),
            temperature: 0.1,
            stream: false,
        };

        let start = Instant::now();
        let response = self.send_with_retry(api_key, &body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::ApiError(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TranslateError::ApiError("empty completion".into()))?;

        let (restored, missing) = self.protector.restore(&content, &placeholders);
        if missing > 0 {
            warn!(missing, target = %request.target_lang, "provider dropped placeholders");
        }
        debug!(
            target = %request.target_lang,
            tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "translated"
        );
        Ok(restored)
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Back-off for a 429: the provider's Retry-After seconds, else 1s/2s/4s.
fn retry_after_wait(header: Option<&str>, attempt: u32) -> Duration {
    header
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(1 << attempt.min(6)))
}

// --- Prompt construction ---

const SYSTEM_PROMPT: &str = "You translate e-commerce product catalog text. \
Output only the translation, nothing else. Keep <<PHn>> tags unchanged.";

/// Compact user prompt: {"t":"text","s":"src","l":"lang"}
fn build_user_prompt(text: &str, request: &TranslateRequest) -> Result<String, TranslateError> {
    #[derive(Serialize)]
    struct Prompt<'a> {
        t: &'a str,
        s: &'a str,
        l: &'a str,
    }
    serde_json::to_string(&Prompt {
        t: text,
        s: &request.source_lang,
        l: &request.target_lang,
    })
    .map_err(|e| TranslateError::InvalidInput(e.to_string()))
}

/// Estimate max_tokens: (input_tokens * 1.5 + 32), clamped to [64, 2048].
/// Descriptions run longer than UI strings and Cyrillic tokenizes densely.
fn estimate_max_tokens(text: &str) -> u32 {
    let estimated_input_tokens = text.chars().count() as f64 / 2.5;
    let max = (estimated_input_tokens * 1.5 + 32.0) as u32;
    max.clamp(64, 2048)
}

// --- Wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_valid_json() {
        let req = TranslateRequest::new("Стол \"Лофт\"", "ru", "en");
        let prompt = build_user_prompt(&req.source_text, &req).unwrap();
        let value: serde_json::Value = serde_json::from_str(&prompt).unwrap();
        assert_eq!(value["t"], "Стол \"Лофт\"");
        assert_eq!(value["l"], "en");
    }

    #[test]
    fn retry_after_header_wins_over_backoff() {
        assert_eq!(retry_after_wait(Some("7"), 0), Duration::from_secs(7));
        assert_eq!(retry_after_wait(Some("soon"), 2), Duration::from_secs(4));
        assert_eq!(retry_after_wait(None, 1), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn long_retry_after_fails_fast() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 429 Too Many Requests\r\nRetry-After: 3600\r\n\
                          Content-Length: 0\r\nConnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let settings = TranslatorSettings {
            base_url: format!("http://{addr}"),
            timeout_secs: 5,
            min_interval_ms: 0,
            ..TranslatorSettings::default()
        };
        let client = DeepSeekClient::new(&settings, Some("sk-test".into())).unwrap();
        let started = Instant::now();
        let err = client
            .translate(&TranslateRequest::new("Стол", "ru", "en"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, TranslateError::RateLimited { retry_after_ms: 3_600_000 }),
            "got {err:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn max_tokens_is_clamped() {
        assert_eq!(estimate_max_tokens("a"), 64);
        assert_eq!(estimate_max_tokens(&"x".repeat(100_000)), 2048);
    }

    #[test]
    fn missing_key_means_not_configured() {
        let settings = TranslatorSettings::default();
        let client = DeepSeekClient::new(&settings, None).unwrap();
        assert!(!client.is_configured());
        let client = DeepSeekClient::new(&settings, Some("sk-test".into())).unwrap();
        assert!(client.is_configured());
    }

    #[tokio::test]
    async fn translate_without_key_fails_fast() {
        let client = DeepSeekClient::new(&TranslatorSettings::default(), None).unwrap();
        let err = client
            .translate(&TranslateRequest::new("Стол", "ru", "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::NotConfigured(_)));
    }
}
