//! Subscription filter registry.

use heapless::Vec;

use super::traits::TopicCollector;
use crate::topics::{MAX_TOPIC_LEN, Topic};

/// Owns copies of the filters a module registered.
///
/// ```ignore
/// let mut registry = TopicRegistry::<8>::new();
/// module.register(&mut registry);
/// let filters: heapless::Vec<&str, 8> = registry.iter().collect();
/// client.subscribe(&filters, QoS::AtLeastOnce).await?;
/// ```
#[derive(Default)]
pub struct TopicRegistry<const MAX_TOPICS: usize> {
    topics: Vec<Topic, MAX_TOPICS>,
}

impl<const MAX_TOPICS: usize> TopicRegistry<MAX_TOPICS> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `topic` in. Duplicates are accepted once.
    pub fn add_topic(&mut self, topic: &str) -> bool {
        if topic.len() > MAX_TOPIC_LEN {
            warn!("registry: filter too long, skipped");
            return false;
        }
        if self.iter().any(|known| known == topic) {
            return true;
        }
        let Ok(owned) = Topic::try_from(topic) else {
            return false;
        };
        if self.topics.push(owned).is_err() {
            warn!("registry: full, filter skipped");
            return false;
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl<const MAX_TOPICS: usize> TopicCollector for TopicRegistry<MAX_TOPICS> {
    fn add(&mut self, topic: &str) -> bool {
        self.add_topic(topic)
    }
}
