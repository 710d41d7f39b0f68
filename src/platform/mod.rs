pub mod telegram;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A message received from the source chat, in platform-agnostic form
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Message id, monotonically increasing within the chat
    pub id: i64,
    /// Body text (or media caption)
    pub text: String,
    /// Formatting annotations over `text`, in character offsets
    pub entities: Vec<TextEntity>,
    /// Media attached to the message, if any
    pub media: Option<MediaPayload>,
    /// Reply/thread linkage, if the message belongs to a topic
    pub reply: Option<ReplyInfo>,
    /// Synthetic chat event (join/pin/...) carrying no user content
    pub service: bool,
}

/// A text annotation span. Offsets and lengths count characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// `@username` reference; the only kind the mirror acts on
    Mention,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPayload {
    /// A copyable attachment (photo, video, document, ...)
    Attachment,
    /// Link-preview pseudo-media generated from a URL in the text.
    /// The destination chat re-expands the preview on its own.
    WebPreview,
}

/// Reply metadata as the wire service reports it. Forum topics surface in
/// more than one shape, so both the thread-top id and the direct reply
/// target are kept.
#[derive(Debug, Clone, Copy)]
pub struct ReplyInfo {
    pub top_thread_id: Option<i64>,
    pub reply_to_id: Option<i64>,
}

impl ChatMessage {
    /// The topic this message belongs to: the top-of-thread id when the
    /// service reports one, otherwise the direct reply target. `None`
    /// means the message is not topic-scoped and is ignored upstream.
    pub fn source_topic(&self) -> Option<i64> {
        let reply = self.reply.as_ref()?;
        reply.top_thread_id.or(reply.reply_to_id)
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// The service asks to pause for the given duration before retrying
    #[error("rate limited, retry in {0:?}")]
    RateLimited(Duration),
    /// The service rejected the request with a machine-readable reason
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// The chat service seam. The engine only ever talks to this trait; the
/// production implementation lives in [`telegram`].
#[async_trait]
pub trait ChatService: Send + Sync {
    /// The most recent messages in a source topic, most recent first
    async fn recent_messages(
        &self,
        topic_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    /// Send a plain text message into a destination topic
    async fn send_text(&self, text: &str, dest_topic: i64) -> Result<(), ChatError>;

    /// Re-send a message's media into a destination topic, optionally with
    /// a replacement caption
    async fn send_media(
        &self,
        message: &ChatMessage,
        caption: Option<&str>,
        dest_topic: i64,
    ) -> Result<(), ChatError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Text {
            text: String,
            topic: i64,
        },
        Media {
            message_id: i64,
            caption: Option<String>,
            topic: i64,
        },
    }

    /// In-memory stand-in for the chat service: scripted histories,
    /// scripted send failures, and a log of everything sent.
    #[derive(Default)]
    pub struct MockChat {
        history: Mutex<HashMap<i64, Vec<ChatMessage>>>,
        broken_topics: Mutex<HashSet<i64>>,
        send_errors: Mutex<VecDeque<ChatError>>,
        sent: Mutex<Vec<Sent>>,
        pub send_attempts: AtomicUsize,
    }

    impl MockChat {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a topic's history, most recent first
        pub async fn seed_history(&self, topic: i64, messages: Vec<ChatMessage>) {
            self.history.lock().await.insert(topic, messages);
        }

        /// Make history fetches for a topic fail
        pub async fn break_topic(&self, topic: i64) {
            self.broken_topics.lock().await.insert(topic);
        }

        /// Queue an error for the next send call; later sends succeed once
        /// the queue drains
        pub async fn fail_next_send(&self, err: ChatError) {
            self.send_errors.lock().await.push_back(err);
        }

        pub async fn sent(&self) -> Vec<Sent> {
            self.sent.lock().await.clone()
        }

        async fn record(&self, entry: Sent) -> Result<(), ChatError> {
            self.send_attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.send_errors.lock().await.pop_front() {
                return Err(err);
            }
            self.sent.lock().await.push(entry);
            Ok(())
        }
    }

    #[async_trait]
    impl ChatService for MockChat {
        async fn recent_messages(
            &self,
            topic_id: i64,
            limit: usize,
        ) -> Result<Vec<ChatMessage>, ChatError> {
            if self.broken_topics.lock().await.contains(&topic_id) {
                return Err(ChatError::Rejected("HISTORY_FETCH_FAILED".to_string()));
            }
            let history = self.history.lock().await;
            Ok(history
                .get(&topic_id)
                .map(|msgs| msgs.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        }

        async fn send_text(&self, text: &str, dest_topic: i64) -> Result<(), ChatError> {
            self.record(Sent::Text {
                text: text.to_string(),
                topic: dest_topic,
            })
            .await
        }

        async fn send_media(
            &self,
            message: &ChatMessage,
            caption: Option<&str>,
            dest_topic: i64,
        ) -> Result<(), ChatError> {
            self.record(Sent::Media {
                message_id: message.id,
                caption: caption.map(str::to_string),
                topic: dest_topic,
            })
            .await
        }
    }

    /// Plain text message inside a topic
    pub fn text_message(id: i64, topic: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            text: text.to_string(),
            entities: Vec::new(),
            media: None,
            reply: Some(ReplyInfo {
                top_thread_id: Some(topic),
                reply_to_id: None,
            }),
            service: false,
        }
    }

    pub fn service_message(id: i64, topic: i64) -> ChatMessage {
        ChatMessage {
            service: true,
            ..text_message(id, topic, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_message(reply: Option<ReplyInfo>) -> ChatMessage {
        ChatMessage {
            id: 1,
            text: String::new(),
            entities: Vec::new(),
            media: None,
            reply,
            service: false,
        }
    }

    #[test]
    fn test_topic_from_thread_top() {
        let msg = topic_message(Some(ReplyInfo {
            top_thread_id: Some(42),
            reply_to_id: Some(7),
        }));
        assert_eq!(msg.source_topic(), Some(42));
    }

    #[test]
    fn test_topic_falls_back_to_reply_target() {
        let msg = topic_message(Some(ReplyInfo {
            top_thread_id: None,
            reply_to_id: Some(7),
        }));
        assert_eq!(msg.source_topic(), Some(7));
    }

    #[test]
    fn test_no_reply_metadata_means_no_topic() {
        assert_eq!(topic_message(None).source_topic(), None);
        let empty = topic_message(Some(ReplyInfo {
            top_thread_id: None,
            reply_to_id: None,
        }));
        assert_eq!(empty.source_topic(), None);
    }
}
