//! Side-effect dispatch.
//!
//! Actions enqueue audit rows and notifications here instead of awaiting
//! them inline. A dedicated worker drains the queue; its failures are logged
//! and never reach the action that produced the effect.

use crate::db::Database;
use crate::notify::Notifier;
use crate::types::NewAgentLog;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A deferred side effect.
#[derive(Debug)]
pub enum Effect {
    /// Append a row to an agent's audit log.
    Audit(NewAgentLog),
    /// Post a chat notification.
    Notify(String),
    /// Acknowledge once everything queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for enqueueing effects.
#[derive(Clone)]
pub struct EffectSender {
    tx: mpsc::UnboundedSender<Effect>,
}

impl EffectSender {
    /// Enqueue an effect. Never fails the caller; if the worker is gone the
    /// effect is dropped with a warning.
    pub fn send(&self, effect: Effect) {
        if let Err(e) = self.tx.send(effect) {
            warn!("Effect worker stopped, dropping {:?}", e.0);
        }
    }

    pub fn audit(&self, entry: NewAgentLog) {
        self.send(Effect::Audit(entry));
    }

    pub fn notify(&self, text: impl Into<String>) {
        self.send(Effect::Notify(text.into()));
    }

    /// Wait until every effect queued so far has been processed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Effect::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// A sender whose effects go nowhere, plus the receiver to inspect them.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Effect>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Spawn the effects worker on the current tokio runtime.
///
/// The worker exits once every `EffectSender` has been dropped.
pub fn spawn_effect_worker(
    db: Database,
    notifier: Arc<dyn Notifier>,
) -> (EffectSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Effect>();

    let handle = tokio::spawn(async move {
        while let Some(effect) = rx.recv().await {
            handle_effect(&db, notifier.as_ref(), effect).await;
        }
        debug!("Effect worker shut down");
    });

    (EffectSender { tx }, handle)
}

async fn handle_effect(db: &Database, notifier: &dyn Notifier, effect: Effect) {
    match effect {
        Effect::Audit(entry) => {
            // Blocking SQLite write; keep it off the async executor threads.
            let db = db.clone();
            let agent_id = entry.agent_id.clone();
            let result =
                tokio::task::spawn_blocking(move || db.append_agent_log(&entry)).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(agent_id = %agent_id, error = %e, "Failed to write audit log"),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "Audit log task panicked"),
            }
        }
        Effect::Notify(text) => {
            if let Err(e) = notifier.send(&text).await {
                warn!(error = %e, "Notification failed");
            }
        }
        Effect::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::types::LogLevel;

    #[tokio::test]
    async fn test_worker_writes_audit_and_survives_notify_failure() {
        let db = Database::open_in_memory().unwrap();
        let agent = db.create_agent("u1", "Agent", None, "openai", None).unwrap();
        let notifier = Arc::new(RecordingNotifier::failing());

        let (effects, handle) = spawn_effect_worker(db.clone(), notifier.clone());
        effects.notify("first");
        effects.audit(NewAgentLog::new(&agent.id, LogLevel::Info, "hello"));
        effects.flush().await;

        let logs = db.list_agent_logs(&agent.id, None).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "hello");
        assert_eq!(notifier.sent(), vec!["first".to_string()]);

        drop(effects);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_audit_for_unknown_agent_is_dropped() {
        let db = Database::open_in_memory().unwrap();
        let (effects, _handle) = spawn_effect_worker(db.clone(), Arc::new(RecordingNotifier::new()));

        // Foreign key violation; the worker logs it and keeps going.
        effects.audit(NewAgentLog::new("missing", LogLevel::Info, "orphan"));
        effects.notify("still delivered");
        effects.flush().await;
    }

    #[test]
    fn test_send_after_worker_gone_does_not_panic() {
        let (effects, rx) = EffectSender::detached();
        drop(rx);
        effects.notify("nobody listening");
    }
}
