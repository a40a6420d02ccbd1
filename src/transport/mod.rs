// SPDX-License-Identifier: GPL-3.0-only

//! Publish/subscribe transport
//!
//! The node only needs topic publish and topic subscribe. Subscriptions are
//! RAII handles: dropping one stops delivery to its callback.

pub mod local;
pub mod messages;

pub use local::LocalBus;
pub use messages::{
    Header, ImageEncoding, ImageMessage, MeshMessage, Message, PointCloudMessage,
    StampedTransform, TransformMessage,
};

use crate::errors::{TransportError, TransportResult};
use std::fmt;

/// Callback invoked on a transport delivery thread
pub type MessageCallback = Box<dyn FnMut(Message) + Send + 'static>;

pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, message: Message) -> TransportResult<()>;

    /// Deliver messages on `topic` to `callback`, buffering at most `queue_depth`
    fn subscribe(
        &self,
        topic: &str,
        queue_depth: usize,
        callback: MessageCallback,
    ) -> TransportResult<Subscription>;
}

/// Active subscription; unsubscribes on drop
pub struct Subscription {
    topic: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic: topic.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Topics are absolute, slash-separated names
pub fn validate_topic(topic: &str) -> TransportResult<()> {
    let valid = topic.len() > 1
        && topic.starts_with('/')
        && !topic.ends_with('/')
        && !topic.contains("//")
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(TransportError::InvalidTopic(topic.to_string()))
    }
}
