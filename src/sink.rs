use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::config::TelegramConfig;
use crate::error::{DeliveryError, Error, Result};
use crate::types::Notification;

/// Longest changelog excerpt included in a message, in characters.
const MAX_CHANGELOG_CHARS: usize = 300;

/// Where notifications are delivered.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> std::result::Result<(), DeliveryError>;
}

/// Sink that accepts everything and sends nothing, for dry runs and tests.
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn deliver(&self, _notification: &Notification) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }
}

/// Posts notifications to a Telegram channel through the Bot API.
pub struct TelegramSink {
    config: TelegramConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

impl TelegramSink {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if Url::parse(&config.api_base_url).is_err() {
            return Err(Error::InvalidBaseUrl(config.api_base_url.clone()));
        }
        if config.bot_token.trim().is_empty() {
            return Err(Error::MissingCredential("Telegram bot token"));
        }
        if config.chat_id.trim().is_empty() {
            return Err(Error::MissingCredential("Telegram channel"));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Client)?;

        Ok(Self { config, client })
    }

    fn payload(&self, notification: &Notification) -> serde_json::Value {
        json!({
            "chat_id": self.config.chat_id,
            "text": format_message(notification),
            "parse_mode": "HTML",
            "disable_web_page_preview": self.config.disable_web_page_preview,
            "reply_markup": {
                "inline_keyboard": [[{ "text": "⬇️ View release", "url": notification.link }]]
            }
        })
    }

    async fn send_once(&self, payload: &serde_json::Value) -> std::result::Result<(), DeliveryError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.bot_token
        );

        let response = self.client.post(&url).json(payload).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let parsed: Option<TelegramResponse> = serde_json::from_str(&body).ok();
        if status.is_success() && parsed.as_ref().is_some_and(|r| r.ok) {
            return Ok(());
        }

        if status.as_u16() == 429 {
            let retry_after = parsed
                .as_ref()
                .and_then(|r| r.parameters.as_ref())
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            return Err(DeliveryError::RateLimited { retry_after });
        }

        let description = parsed
            .and_then(|r| r.description)
            .unwrap_or(body);
        Err(DeliveryError::Api {
            status: status.as_u16(),
            description,
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, notification: &Notification) -> std::result::Result<(), DeliveryError> {
        let payload = self.payload(notification);

        let result = match self.send_once(&payload).await {
            Err(DeliveryError::RateLimited { retry_after })
                if Duration::from_secs(retry_after) <= self.config.max_retry_after =>
            {
                warn!(
                    repo = %notification.repository,
                    tag = %notification.release_tag,
                    retry_after,
                    "Telegram rate limit hit, retrying once"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                self.send_once(&payload).await
            }
            other => other,
        };
        result?;

        debug!(
            repo = %notification.repository,
            tag = %notification.release_tag,
            "Notification delivered"
        );
        Ok(())
    }
}

/// Renders the HTML message body for a notification.
pub fn format_message(notification: &Notification) -> String {
    let repo_name = notification.repository.name();
    let mut msg = format!(
        "🆕 <b>{}</b> just published a new release!\n🔖 <b>{}</b>",
        escape_html(repo_name),
        escape_html(&notification.release_tag)
    );

    if let Some(published_at) = notification.published_at {
        msg.push_str(&format!(" <code>({})</code>", published_at.format("%Y-%m-%d")));
    }
    if notification.prerelease {
        msg.push_str(" <i>prerelease</i>");
    }
    msg.push('\n');

    if let Some(name) = notification.name.as_deref().filter(|n| !n.trim().is_empty()) {
        msg.push_str(&format!("\n🚀 <b>Release name:</b> {}\n", escape_html(name)));
    }

    if let Some(body) = notification.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        msg.push_str(&format!(
            "\n📝 <b>Changelog:</b>\n{}\n",
            escape_html(&truncate_chars(body, MAX_CHANGELOG_CHARS))
        ));
    }

    msg.push_str(&format!(
        "\n<a href=\"{}\">{}</a>",
        escape_html(&notification.link),
        escape_html(notification.repository.as_str())
    ));
    msg
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
