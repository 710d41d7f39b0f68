use std::collections::HashMap;

use anyhow::{bail, Result};

/// Immutable source-topic → destination-topic mapping. Built once at
/// startup; duplicate source keys are a configuration bug (the shadowed
/// entry would be silently unreachable), so construction rejects them.
#[derive(Debug, Clone)]
pub struct TopicMap {
    map: HashMap<i64, i64>,
}

impl TopicMap {
    pub fn new(pairs: &[(i64, i64)]) -> Result<Self> {
        let mut map = HashMap::with_capacity(pairs.len());
        for &(source, dest) in pairs {
            if map.insert(source, dest).is_some() {
                bail!("duplicate source topic {source} in topic table");
            }
        }
        Ok(Self { map })
    }

    /// Destination topic for a source topic, if one is mapped
    pub fn resolve(&self, source_topic: i64) -> Option<i64> {
        self.map.get(&source_topic).copied()
    }

    /// All mapped source topics, in stable ascending order
    pub fn sources(&self) -> Vec<i64> {
        let mut sources: Vec<i64> = self.map.keys().copied().collect();
        sources.sort_unstable();
        sources
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mapped_and_unmapped() {
        let topics = TopicMap::new(&[(7, 15), (10, 4)]).unwrap();
        assert_eq!(topics.resolve(7), Some(15));
        assert_eq!(topics.resolve(10), Some(4));
        assert_eq!(topics.resolve(99), None);
    }

    #[test]
    fn test_duplicate_source_key_rejected() {
        let err = TopicMap::new(&[(7, 2), (10, 4), (7, 15)]).unwrap_err();
        assert!(err.to_string().contains("duplicate source topic 7"));
    }

    #[test]
    fn test_sources_sorted() {
        let topics = TopicMap::new(&[(20, 1), (5, 2), (9, 3)]).unwrap();
        assert_eq!(topics.sources(), vec![5, 9, 20]);
    }

    #[test]
    fn test_shipped_table_is_valid() {
        let topics = TopicMap::new(crate::config::TOPIC_TABLE).unwrap();
        assert_eq!(topics.len(), crate::config::TOPIC_TABLE.len());
        // the one historically shadowed key keeps its reachable value
        assert_eq!(topics.resolve(7), Some(15));
    }
}
