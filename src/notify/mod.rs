// src/notify/mod.rs
//! Operator notifications. Delivery is best-effort: every method returns `()`
//! and implementations log their own failures.

pub mod discord;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::config::Settings;

pub use discord::DiscordNotifier;

/// Discord's per-message character limit.
pub const MESSAGE_LIMIT: usize = 2000;
/// Leaves room for the surrounding code fence.
pub const CODE_BLOCK_LIMIT: usize = 1990;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message that already fits the channel limit.
    async fn deliver(&self, message: &str);

    /// Send `text`, split into consecutive `MESSAGE_LIMIT`-sized chunks.
    async fn send(&self, text: &str) {
        for chunk in chunk_text(text, MESSAGE_LIMIT) {
            self.deliver(&chunk).await;
        }
    }

    /// Send `text` as fenced code, one fence per `CODE_BLOCK_LIMIT` chunk.
    async fn send_code_block(&self, text: &str) {
        for chunk in chunk_text(text, CODE_BLOCK_LIMIT) {
            self.send(&format!("```{chunk}```")).await;
        }
    }
}

/// Split on character (not byte) boundaries into pieces of exactly `limit`
/// characters, the last one possibly shorter. Text within the limit, empty
/// text included, is a single chunk.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == limit {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() || out.is_empty() {
        out.push(current);
    }
    out
}

/// Used when no webhook is configured: messages only reach the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, message: &str) {
        tracing::info!(target: "notify", %message, "notification (no webhook configured)");
    }
}

// --- Test helper ---
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn deliver(&self, message: &str) {
        if let Ok(mut v) = self.messages.lock() {
            v.push(message.to_string());
        }
    }
}

/// Discord when a webhook is configured, log-only otherwise.
pub fn from_settings(settings: &Settings) -> Arc<dyn Notifier> {
    match settings.webhook_url.as_deref() {
        Some(url) => Arc::new(
            DiscordNotifier::new(url.to_string()).with_timeout(settings.webhook_timeout_secs),
        ),
        None => {
            tracing::debug!("Discord disabled (no webhook_url)");
            Arc::new(LogNotifier)
        }
    }
}
