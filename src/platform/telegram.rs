use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, MediaKind, MessageEntity, MessageEntityKind, MessageId, MessageKind, ThreadId,
};
use teloxide::RequestError;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::mirror::MirrorEngine;
use crate::platform::{
    ChatError, ChatMessage, ChatService, EntityKind, MediaPayload, ReplyInfo, TextEntity,
};

/// Messages kept per topic for the reconciliation sweep to re-examine
const RECENT_CACHE_CAP: usize = 64;

/// Bot API implementation of [`ChatService`]. Holds the bot handle and
/// both chat ids explicitly; nothing here is global state.
pub struct TelegramChat {
    bot: Bot,
    source_chat: ChatId,
    target_chat: ChatId,
    /// Update-fed per-topic buffers, oldest first. The Bot API exposes no
    /// history fetch, so `recent_messages` serves from here: the
    /// dispatcher records every source-chat message before the live path
    /// runs, and the sweep becomes a retry pass over anything the live
    /// path observed but failed to deliver.
    recent: Mutex<HashMap<i64, VecDeque<ChatMessage>>>,
}

impl TelegramChat {
    pub fn new(bot: Bot, source_chat: ChatId, target_chat: ChatId) -> Self {
        Self {
            bot,
            source_chat,
            target_chat,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Display title of a chat, for startup logging
    pub async fn chat_title(&self, chat: ChatId) -> Result<String> {
        let info = self
            .bot
            .get_chat(chat)
            .await
            .with_context(|| format!("Failed to resolve chat {chat}"))?;
        Ok(info.title().unwrap_or("<untitled>").to_string())
    }

    /// Record a source-chat message so later sweeps can re-examine it
    pub async fn observe(&self, topic: i64, msg: ChatMessage) {
        let mut recent = self.recent.lock().await;
        let buffer = recent.entry(topic).or_default();
        buffer.push_back(msg);
        if buffer.len() > RECENT_CACHE_CAP {
            buffer.pop_front();
        }
    }
}

#[async_trait]
impl ChatService for TelegramChat {
    async fn recent_messages(
        &self,
        topic_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let recent = self.recent.lock().await;
        Ok(recent
            .get(&topic_id)
            .map(|buffer| buffer.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_text(&self, text: &str, dest_topic: i64) -> Result<(), ChatError> {
        self.bot
            .send_message(self.target_chat, text)
            .message_thread_id(ThreadId(MessageId(dest_topic as i32)))
            .await
            .map(|_| ())
            .map_err(map_request_error)
    }

    async fn send_media(
        &self,
        message: &ChatMessage,
        caption: Option<&str>,
        dest_topic: i64,
    ) -> Result<(), ChatError> {
        // copyMessage re-sends the media without the "forwarded from"
        // header; passing a caption replaces the original one.
        let request = self
            .bot
            .copy_message(
                self.target_chat,
                self.source_chat,
                MessageId(message.id as i32),
            )
            .message_thread_id(ThreadId(MessageId(dest_topic as i32)));
        let result = match caption {
            Some(caption) => request.caption(caption).await,
            None => request.await,
        };
        result.map(|_| ()).map_err(map_request_error)
    }
}

fn map_request_error(err: RequestError) -> ChatError {
    match err {
        RequestError::RetryAfter(wait) => ChatError::RateLimited(wait.duration()),
        RequestError::Api(api) => ChatError::Rejected(api.to_string()),
        other => ChatError::Transport(other.into()),
    }
}

/// Convert a wire message into the platform-agnostic model
pub(crate) fn convert_message(msg: &Message) -> ChatMessage {
    let text = msg
        .text()
        .or_else(|| msg.caption())
        .unwrap_or("")
        .to_string();
    let raw_entities = msg
        .entities()
        .or_else(|| msg.caption_entities())
        .unwrap_or(&[]);
    let entities = convert_entities(&text, raw_entities);

    let (media, service) = match &msg.kind {
        MessageKind::Common(common) => (detect_media(&common.media_kind), false),
        _ => (None, true),
    };

    ChatMessage {
        id: i64::from(msg.id.0),
        text,
        entities,
        media,
        reply: reply_info(msg),
        service,
    }
}

fn detect_media(media_kind: &MediaKind) -> Option<MediaPayload> {
    match media_kind {
        MediaKind::Text(media) => media
            .link_preview_options
            .as_ref()
            .map(|_| MediaPayload::WebPreview),
        _ => Some(MediaPayload::Attachment),
    }
}

fn reply_info(msg: &Message) -> Option<ReplyInfo> {
    let top_thread_id = msg.thread_id.map(|thread| i64::from(thread.0 .0));
    let reply_to_id = msg.reply_to_message().map(|reply| i64::from(reply.id.0));
    if top_thread_id.is_none() && reply_to_id.is_none() {
        return None;
    }
    Some(ReplyInfo {
        top_thread_id,
        reply_to_id,
    })
}

/// The wire reports entity offsets in UTF-16 code units; the engine works
/// in character offsets. Spans that don't land on a character boundary
/// (malformed input) are dropped.
fn convert_entities(text: &str, raw: &[MessageEntity]) -> Vec<TextEntity> {
    raw.iter()
        .filter_map(|entity| {
            let start = utf16_to_char_offset(text, entity.offset)?;
            let end = utf16_to_char_offset(text, entity.offset + entity.length)?;
            let kind = match entity.kind {
                MessageEntityKind::Mention => EntityKind::Mention,
                _ => EntityKind::Other,
            };
            Some(TextEntity {
                kind,
                offset: start,
                length: end - start,
            })
        })
        .collect()
}

fn utf16_to_char_offset(text: &str, utf16_offset: usize) -> Option<usize> {
    let mut units = 0usize;
    let mut chars = 0usize;
    for ch in text.chars() {
        if units >= utf16_offset {
            return (units == utf16_offset).then_some(chars);
        }
        units += ch.len_utf16();
        chars += 1;
    }
    (units == utf16_offset).then_some(chars)
}

/// Run the live-update dispatcher over the source chat. Blocks until the
/// process is interrupted.
pub async fn run_dispatcher(
    bot: Bot,
    source_chat: ChatId,
    chat: Arc<TelegramChat>,
    engine: Arc<MirrorEngine>,
) {
    info!("Listening for new messages in chat {source_chat}");

    let handler = Update::filter_message()
        .filter(move |msg: Message| msg.chat.id == source_chat)
        .endpoint(handle_update);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![chat, engine])
        .default_handler(|upd| async move {
            debug!("unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_update(
    msg: Message,
    chat: Arc<TelegramChat>,
    engine: Arc<MirrorEngine>,
) -> ResponseResult<()> {
    let converted = convert_message(&msg);
    // Buffer first so a sweep can retry anything the live path fails on
    if let Some(topic) = converted.source_topic() {
        chat.observe(topic, converted.clone()).await;
    }
    engine.handle_live(&converted).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::text_message;

    #[test]
    fn test_utf16_offsets_match_chars_for_ascii() {
        assert_eq!(utf16_to_char_offset("hello @alice", 6), Some(6));
        assert_eq!(utf16_to_char_offset("hello @alice", 12), Some(12));
    }

    #[test]
    fn test_utf16_offsets_past_non_bmp_char() {
        // the emoji occupies two UTF-16 code units but one char
        let text = "😀 @bob";
        assert_eq!(utf16_to_char_offset(text, 3), Some(2));
        assert_eq!(utf16_to_char_offset(text, 7), Some(6));
    }

    #[test]
    fn test_utf16_offset_inside_surrogate_pair_rejected() {
        assert_eq!(utf16_to_char_offset("😀", 1), None);
        assert_eq!(utf16_to_char_offset("😀", 2), Some(1));
    }

    #[test]
    fn test_utf16_offset_beyond_end_rejected() {
        assert_eq!(utf16_to_char_offset("abc", 4), None);
    }

    #[test]
    fn test_convert_entities_maps_mention_kind() {
        let text = "😀 @bob hi";
        let raw = vec![
            MessageEntity {
                kind: MessageEntityKind::Mention,
                offset: 3,
                length: 4,
            },
            MessageEntity {
                kind: MessageEntityKind::Bold,
                offset: 8,
                length: 2,
            },
        ];
        let entities = convert_entities(text, &raw);
        assert_eq!(
            entities,
            vec![
                TextEntity {
                    kind: EntityKind::Mention,
                    offset: 2,
                    length: 4,
                },
                TextEntity {
                    kind: EntityKind::Other,
                    offset: 7,
                    length: 2,
                },
            ]
        );
    }

    fn test_chat() -> TelegramChat {
        TelegramChat::new(
            Bot::new("0:TEST"),
            ChatId(-1001),
            ChatId(-1002),
        )
    }

    #[tokio::test]
    async fn test_recent_messages_most_recent_first() {
        let chat = test_chat();
        for id in 1..=5 {
            chat.observe(7, text_message(id, 7, "m")).await;
        }
        let recent = chat.recent_messages(7, 3).await.unwrap();
        let ids: Vec<i64> = recent.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_recent_buffer_is_bounded() {
        let chat = test_chat();
        for id in 1..=(RECENT_CACHE_CAP as i64 + 10) {
            chat.observe(7, text_message(id, 7, "m")).await;
        }
        let recent = chat
            .recent_messages(7, RECENT_CACHE_CAP + 10)
            .await
            .unwrap();
        assert_eq!(recent.len(), RECENT_CACHE_CAP);
        // the oldest entries were evicted
        assert_eq!(recent.last().unwrap().id, 11);
    }

    #[tokio::test]
    async fn test_unknown_topic_has_no_recent_messages() {
        let chat = test_chat();
        assert!(chat.recent_messages(99, 10).await.unwrap().is_empty());
    }
}
