use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::mirror::mentions::strip_mentions;
use crate::mirror::topics::TopicMap;
use crate::platform::{ChatError, ChatMessage, ChatService, MediaPayload};

/// Decides how a message is mirrored and performs the send, including
/// rate-limit recovery. Stateless apart from its collaborators; cursor
/// bookkeeping is the caller's job.
pub struct Forwarder {
    chat: Arc<dyn ChatService>,
    topics: TopicMap,
    /// Cap on send attempts per message. `None` retries for as long as
    /// the server keeps asking to wait.
    max_send_attempts: Option<u32>,
}

#[derive(Clone, Copy)]
enum Outgoing<'a> {
    Text(&'a str),
    Media { caption: Option<&'a str> },
}

impl Forwarder {
    pub fn new(
        chat: Arc<dyn ChatService>,
        topics: TopicMap,
        max_send_attempts: Option<u32>,
    ) -> Self {
        Self {
            chat,
            topics,
            max_send_attempts,
        }
    }

    /// Mirror one message into its destination topic. Returns whether a
    /// message was actually delivered; every failure is handled here and
    /// never propagates, so one bad message cannot stall discovery.
    pub async fn forward(&self, msg: &ChatMessage, source_topic: i64) -> bool {
        if msg.service {
            return false;
        }

        let Some(dest_topic) = self.topics.resolve(source_topic) else {
            warn!("no destination mapped for source topic {source_topic}");
            return false;
        };

        let cleaned = strip_mentions(&msg.text, &msg.entities);
        let has_text = !cleaned.trim().is_empty();

        let delivered = if msg.media == Some(MediaPayload::Attachment) {
            let caption = if has_text { Some(cleaned.as_str()) } else { None };
            self.send_with_retry(msg, dest_topic, Outgoing::Media { caption })
                .await
        } else if has_text {
            // Plain text, or a link whose preview the destination chat
            // re-expands on its own.
            self.send_with_retry(msg, dest_topic, Outgoing::Text(&cleaned))
                .await
        } else if msg.media == Some(MediaPayload::WebPreview) {
            info!(
                "skipping preview-only message {} in topic {source_topic}",
                msg.id
            );
            return false;
        } else {
            info!("skipping empty message {} in topic {source_topic}", msg.id);
            return false;
        };

        if delivered {
            info!(
                "forwarded message {}: topic {source_topic} -> {dest_topic}",
                msg.id
            );
        }
        delivered
    }

    /// The send step. A rate-limit signal suspends for exactly the
    /// server-specified wait and retries; every other failure is
    /// classified, logged and abandoned.
    async fn send_with_retry(
        &self,
        msg: &ChatMessage,
        dest_topic: i64,
        outgoing: Outgoing<'_>,
    ) -> bool {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let result = match outgoing {
                Outgoing::Text(text) => self.chat.send_text(text, dest_topic).await,
                Outgoing::Media { caption } => {
                    self.chat.send_media(msg, caption, dest_topic).await
                }
            };
            match result {
                Ok(()) => return true,
                Err(ChatError::RateLimited(wait)) => {
                    if let Some(cap) = self.max_send_attempts {
                        if attempts >= cap {
                            error!(
                                "giving up on message {} after {attempts} rate-limited attempts",
                                msg.id
                            );
                            return false;
                        }
                    }
                    warn!(
                        "rate limited, waiting {}s before retrying message {}",
                        wait.as_secs(),
                        msg.id
                    );
                    sleep(wait).await;
                }
                Err(err) => {
                    log_send_failure(msg, dest_topic, &err);
                    return false;
                }
            }
        }
    }
}

fn log_send_failure(msg: &ChatMessage, dest_topic: i64, err: &ChatError) {
    let reason = err.to_string();
    if reason.contains("TOPIC_CLOSED") {
        warn!("destination topic {dest_topic} is closed, cannot post");
    } else if reason.contains("TOPIC_NOT_MODIFIED") {
        warn!("destination topic {dest_topic} rejected the post, likely missing permissions");
    } else if reason.contains("PEER_ID_INVALID") {
        error!("invalid chat or topic id: {reason}");
    } else if reason.contains("MESSAGE_ID_INVALID") {
        warn!("invalid message id {}", msg.id);
    } else {
        error!("failed to forward message {}: {reason}", msg.id);
    }
}
