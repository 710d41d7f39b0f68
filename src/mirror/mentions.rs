use crate::platform::{EntityKind, TextEntity};

/// Remove every mention span from `text`, preserving all other characters
/// in order. Spans are applied in descending offset order so that removing
/// one never invalidates the offsets of spans still pending to its left.
/// Offsets count characters, so multibyte text cannot be split mid-codepoint.
pub fn strip_mentions(text: &str, entities: &[TextEntity]) -> String {
    if text.is_empty() || entities.is_empty() {
        return text.to_string();
    }

    let mut mentions: Vec<&TextEntity> = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Mention)
        .collect();
    if mentions.is_empty() {
        return text.to_string();
    }
    mentions.sort_by(|a, b| b.offset.cmp(&a.offset));

    let mut chars: Vec<char> = text.chars().collect();
    for span in mentions {
        let start = span.offset.min(chars.len());
        let end = (span.offset + span.length).min(chars.len());
        chars.drain(start..end);
    }
    chars.into_iter().collect()
}
