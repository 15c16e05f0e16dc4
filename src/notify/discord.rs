use super::Notifier;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

/// Discord webhook sender. Success is `204 No Content`; anything else is
/// logged and dropped (no retries).
#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    async fn post(&self, content: &str) -> Result<()> {
        let rsp = self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(&WebhookMessage { content })
            .send()
            .await
            .context("Discord webhook request failed")?;

        let status = rsp.status();
        if status != StatusCode::NO_CONTENT {
            let body = rsp.text().await.unwrap_or_default();
            bail!("Discord webhook HTTP {status}: {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn deliver(&self, message: &str) {
        if let Err(e) = self.post(message).await {
            tracing::warn!(target: "notify", error = %format!("{e:#}"), "failed to send Discord message");
        }
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}
