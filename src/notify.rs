//! Outbound chat notifications.
//!
//! Notifications are best-effort. Callers never see a failure; the effects
//! worker logs and drops it.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Something that can deliver a one-line text message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Posts `{"text": ...}` to a chat webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("webhook returned {}", status);
        }
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps every message it is asked to send. Handy in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records the message and then reports a failure.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text.to_string());
        }
        if self.fail {
            bail!("notification channel unavailable");
        }
        Ok(())
    }
}

/// Build the notifier for an optional webhook URL.
pub fn notifier_for(webhook_url: Option<&str>, timeout: Duration) -> Result<Arc<dyn Notifier>> {
    match webhook_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url, timeout)?)),
        None => Ok(Arc::new(NoopNotifier)),
    }
}
