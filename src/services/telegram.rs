use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// The outbound half of a chat bot.
pub trait MessageSender: Send + Sync {
    /// Send `text` to `destination`. Ordinary failures are logged and
    /// reported as `false`.
    fn send<'a>(&'a self, destination: &'a str, text: &'a str) -> BoxFuture<'a, bool>;

    /// Who the credential belongs to; used for connectivity checks.
    fn identity(&self) -> BoxFuture<'_, Result<String>>;
}

/// Builds a sender for the credential found in the current settings.
pub trait SenderFactory: Send + Sync {
    fn sender(&self, credential: &str) -> Arc<dyn MessageSender>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    #[allow(dead_code)]
    id: i64,
    first_name: String,
    username: Option<String>,
}

/// Request URLs carry the bot token, so they never reach an error message.
fn redact(e: reqwest::Error) -> AppError {
    AppError::Http(e.without_url())
}

pub struct TelegramBot {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramBot {
    pub fn new(client: Client, api_base: &str, token: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .send()
            .await
            .map_err(redact)?;

        let status = response.status();
        let body: ApiResponse<serde_json::Value> = response.json().await.map_err(redact)?;
        if !status.is_success() || !body.ok {
            return Err(AppError::Telegram(format!(
                "sendMessage failed ({}): {}",
                status,
                body.description.unwrap_or_default()
            )));
        }
        Ok(())
    }

    pub async fn get_me(&self) -> Result<String> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(redact)?;
        let status = response.status();
        let body: ApiResponse<BotUser> = response.json().await.map_err(redact)?;

        match body.result {
            Some(user) if body.ok => Ok(user
                .username
                .map(|name| format!("@{}", name))
                .unwrap_or(user.first_name)),
            _ => Err(AppError::Telegram(format!(
                "getMe failed ({}): {}",
                status,
                body.description.unwrap_or_default()
            ))),
        }
    }
}

impl MessageSender for TelegramBot {
    fn send<'a>(&'a self, destination: &'a str, text: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.send_message(destination, text).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Delivery to {} failed: {}", destination, e);
                    false
                }
            }
        })
    }

    fn identity(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(self.get_me())
    }
}

/// Shares one HTTP client across the senders it hands out.
pub struct TelegramSenderFactory {
    client: Client,
    api_base: String,
}

impl TelegramSenderFactory {
    pub fn new(api_base: &str, timeout: Duration, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| AppError::Config(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.to_string(),
        })
    }
}

impl SenderFactory for TelegramSenderFactory {
    fn sender(&self, credential: &str) -> Arc<dyn MessageSender> {
        Arc::new(TelegramBot::new(self.client.clone(), &self.api_base, credential))
    }
}
