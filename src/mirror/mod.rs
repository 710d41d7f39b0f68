pub mod cursor;
pub mod forward;
pub mod mentions;
pub mod topics;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Pacing;
use crate::mirror::cursor::CursorStore;
use crate::mirror::forward::Forwarder;
use crate::mirror::topics::TopicMap;
use crate::platform::{ChatError, ChatMessage, ChatService};

/// The mirroring engine. Two discovery paths feed it (the live update
/// handler and the periodic reconciliation sweep) and both funnel every
/// candidate message through the same cursor gate, which is the sole
/// deduplication mechanism.
pub struct MirrorEngine {
    chat: Arc<dyn ChatService>,
    topics: TopicMap,
    cursors: CursorStore,
    forwarder: Forwarder,
    pacing: Pacing,
}

impl MirrorEngine {
    pub fn new(chat: Arc<dyn ChatService>, topics: TopicMap, pacing: Pacing) -> Self {
        let forwarder = Forwarder::new(chat.clone(), topics.clone(), pacing.max_send_attempts);
        Self {
            chat,
            topics,
            cursors: CursorStore::new(),
            forwarder,
            pacing,
        }
    }

    /// Seed every mapped topic's cursor from the most recent messages so
    /// only traffic newer than startup gets mirrored. A failing topic is
    /// logged and starts at 0; it never blocks the others.
    pub async fn init_cursors(&self) {
        info!("Initializing per-topic cursors...");
        for topic in self.topics.sources() {
            match self
                .chat
                .recent_messages(topic, self.pacing.init_fetch_limit)
                .await
            {
                Ok(messages) => {
                    let last = messages
                        .iter()
                        .filter(|m| !m.service)
                        .map(|m| m.id)
                        .max()
                        .unwrap_or(0);
                    self.cursors.prime(topic, last).await;
                    info!("  Topic {topic}: cursor starts at {last}");
                }
                Err(err) => {
                    error!("Failed to initialize cursor for topic {topic}: {err}");
                    self.cursors.prime(topic, 0).await;
                }
            }
        }
        info!("Cursor initialization complete");
    }

    /// Live-path entry point, invoked for every new source-chat message.
    /// Never errors: a bad message must not take the subscription down.
    pub async fn handle_live(&self, msg: &ChatMessage) {
        let Some(topic) = msg.source_topic() else {
            return;
        };
        if self.topics.resolve(topic).is_none() {
            debug!("message {} from unmapped topic {topic}, ignoring", msg.id);
            return;
        }
        info!("new message {} in topic {topic}", msg.id);
        self.deliver(msg, topic).await;
    }

    /// The dedup gate: reserve the id, forward, then advance the cursor on
    /// success or free the reservation on failure so a later sweep can
    /// retry the message.
    async fn deliver(&self, msg: &ChatMessage, source_topic: i64) -> bool {
        if !self.cursors.claim(source_topic, msg.id).await {
            debug!(
                "message {} in topic {source_topic} already delivered or in flight",
                msg.id
            );
            return false;
        }
        let delivered = self.forwarder.forward(msg, source_topic).await;
        if delivered {
            self.cursors.commit(source_topic, msg.id).await;
        } else {
            self.cursors.release(source_topic, msg.id).await;
        }
        delivered
    }

    /// Reconciliation loop: periodically re-scan every mapped topic for
    /// messages the live path missed. Runs until the process exits.
    pub async fn run_sweeps(&self) {
        info!(
            "Reconciliation sweeps running every {}s",
            self.pacing.sweep_interval_secs
        );
        loop {
            let pause = match self.sweep().await {
                Ok(()) => self.pacing.sweep_interval_secs,
                Err(err) => {
                    error!(
                        "Sweep failed: {err}; backing off {}s",
                        self.pacing.sweep_backoff_secs
                    );
                    self.pacing.sweep_backoff_secs
                }
            };
            sleep(Duration::from_secs(pause)).await;
        }
    }

    /// One pass over every mapped topic. A single topic's failure logs,
    /// backs off briefly and moves on; the sweep as a whole only fails
    /// when every topic scan failed (connection-level outage).
    async fn sweep(&self) -> anyhow::Result<()> {
        let topics = self.topics.sources();
        let mut failures = 0usize;
        for &topic in &topics {
            if let Err(err) = self.sweep_topic(topic).await {
                error!("Failed to scan topic {topic}: {err}");
                failures += 1;
                sleep(Duration::from_secs(self.pacing.topic_backoff_secs)).await;
            }
        }
        if failures > 0 && failures == topics.len() {
            anyhow::bail!("all {failures} topic scans failed");
        }
        Ok(())
    }

    /// Scan one topic: everything newer than the cursor, oldest first,
    /// with a pacing delay between forwards to avoid bursts.
    async fn sweep_topic(&self, topic: i64) -> Result<(), ChatError> {
        let last = self.cursors.get(topic).await;
        let recent = self
            .chat
            .recent_messages(topic, self.pacing.sweep_fetch_limit)
            .await?;

        let mut missed: Vec<&ChatMessage> = recent
            .iter()
            .filter(|m| !m.service && m.id > last)
            .collect();
        missed.sort_by_key(|m| m.id);

        for msg in missed {
            self.deliver(msg, topic).await;
            sleep(Duration::from_secs(self.pacing.message_delay_secs)).await;
        }
        Ok(())
    }
}
