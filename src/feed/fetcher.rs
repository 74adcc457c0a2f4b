use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, Proxy};

use crate::config::Config;
use crate::error::{AppError, FetchError, Result};
use crate::models::NewPost;

use super::parser::parse_posts;
use super::retry::{linear_backoff, retry_with_backoff};

pub const MAX_FETCH_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_secs(2);

/// Anything that can produce the current batch of candidate posts.
pub trait FeedSource: Send + Sync {
    fn fetch_posts(&self) -> BoxFuture<'_, Result<Vec<NewPost>>>;
}

pub struct FeedFetcher {
    client: Client,
    url: String,
    summary_max_chars: usize,
    backoff_step: Duration,
}

impl FeedFetcher {
    pub fn new(
        url: &str,
        timeout: Duration,
        user_agent: &str,
        proxy: Option<&str>,
        summary_max_chars: usize,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent);

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
            url: url.to_string(),
            summary_max_chars,
            backoff_step: BACKOFF_STEP,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.feed_url,
            config.request_timeout(),
            &config.user_agent,
            config.proxy.as_deref(),
            config.summary_max_chars,
        )
    }

    #[cfg(test)]
    fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    /// One fetch + parse attempt, no retries.
    async fn fetch_once(&self) -> Result<Vec<NewPost>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(FetchError::from)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()).into());
        }

        let body = response.text().await.map_err(FetchError::from)?;
        parse_posts(&body, self.summary_max_chars)
    }

    /// Fetch and parse, retrying the whole sequence with linear back-off.
    pub async fn fetch(&self) -> Result<Vec<NewPost>> {
        let posts = retry_with_backoff(
            MAX_FETCH_ATTEMPTS,
            linear_backoff(self.backoff_step),
            || self.fetch_once(),
        )
        .await?;
        tracing::debug!("Fetched {} posts from {}", posts.len(), self.url);
        Ok(posts)
    }
}

impl FeedSource for FeedFetcher {
    fn fetch_posts(&self) -> BoxFuture<'_, Result<Vec<NewPost>>> {
        Box::pin(self.fetch())
    }
}
