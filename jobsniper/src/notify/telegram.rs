use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::Notifier;
use crate::error::DeliveryError;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Telegram Bot API client bound to a single chat.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    timeout: Duration,
    max_attempts: u8,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            timeout: Duration::from_secs(30),
            max_attempts: 2,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts after the first one for network errors, 5xx and 429.
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn map_send_error(&self, e: reqwest::Error) -> DeliveryError {
        if e.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Network(e.without_url())
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        if message.trim().is_empty() {
            warn!("Attempted to send empty message. Skipping.");
            return Err(DeliveryError::EmptyMessage);
        }

        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(self.endpoint("sendMessage"))
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let retryable = match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    let body: ApiResponse = rsp.json().await.unwrap_or_default();
                    if status.is_success() && body.ok {
                        info!("Message sent to Telegram");
                        return Ok(());
                    }
                    match classify(status, body) {
                        err @ DeliveryError::Unavailable(_) => err,
                        err => return Err(err),
                    }
                }
                Err(e) => self.map_send_error(e),
            };

            if attempt >= self.max_attempts {
                return Err(retryable);
            }
            warn!("Telegram delivery attempt {} failed: {}, retrying", attempt, retryable);
            tokio::time::sleep(retry_backoff(attempt)).await;
        }
    }

    async fn verify(&self) -> Result<(), DeliveryError> {
        let rsp = self
            .client
            .get(self.endpoint("getMe"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let status = rsp.status();
        let body: ApiResponse = rsp.json().await.unwrap_or_default();
        if status.is_success() && body.ok {
            return Ok(());
        }
        Err(match classify(status, body) {
            DeliveryError::Rejected(reason) => DeliveryError::Rejected(format!("getMe failed with {}", reason)),
            DeliveryError::Unavailable(reason) => DeliveryError::Unavailable(format!("getMe failed with {}", reason)),
            other => other,
        })
    }
}

/// 5xx and 429 are worth another try; anything else (including `ok: false` on a 2xx) is a
/// rejection of this request or of our credentials.
fn classify(status: StatusCode, body: ApiResponse) -> DeliveryError {
    let reason = format!(
        "HTTP {}: {}",
        status.as_u16(),
        body.description.unwrap_or_else(|| "no description".to_string())
    );
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        DeliveryError::Unavailable(reason)
    } else {
        DeliveryError::Rejected(reason)
    }
}

/// 500 ms, 1 s, 2 s, ... capped at 30 s.
fn retry_backoff(attempt: u8) -> Duration {
    let factor = 2u32.saturating_pow(u32::from(attempt.saturating_sub(1)));
    Duration::from_millis(500).saturating_mul(factor).min(MAX_BACKOFF)
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
}
