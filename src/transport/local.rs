// SPDX-License-Identifier: GPL-3.0-only

//! In-process transport
//!
//! Each subscription owns a bounded queue and a delivery thread. A full
//! queue drops the incoming message rather than blocking the publisher.

use super::{Message, MessageCallback, Subscription, Transport, validate_topic};
use crate::errors::{TransportError, TransportResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, trace};

struct Subscriber {
    id: u64,
    sender: SyncSender<Message>,
}

type Registry = HashMap<String, Vec<Subscriber>>;

#[derive(Clone, Default)]
pub struct LocalBus {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }
}

impl Transport for LocalBus {
    fn publish(&self, topic: &str, message: Message) -> TransportResult<()> {
        validate_topic(topic)?;
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = registry.get_mut(topic) else {
            trace!(topic, "No subscribers");
            return Ok(());
        };

        subscribers.retain(|sub| match sub.sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(topic, subscriber = sub.id, "Queue full, message dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        Ok(())
    }

    fn subscribe(
        &self,
        topic: &str,
        queue_depth: usize,
        mut callback: MessageCallback,
    ) -> TransportResult<Subscription> {
        validate_topic(topic)?;
        if queue_depth == 0 {
            return Err(TransportError::SubscribeFailed(format!(
                "{}: queue depth must be non-zero",
                topic
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::sync_channel::<Message>(queue_depth);

        let thread_topic = topic.to_string();
        thread::Builder::new()
            .name(format!("deliver{}", topic.replace('/', "-")))
            .spawn(move || {
                debug!(topic = %thread_topic, subscriber = id, "Delivery thread started");
                for message in receiver {
                    callback(message);
                }
                debug!(topic = %thread_topic, subscriber = id, "Delivery thread exiting");
            })
            .map_err(|e| TransportError::SubscribeFailed(format!("{}: {}", topic, e)))?;

        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        let registry = Arc::clone(&self.registry);
        let cancel_topic = topic.to_string();
        Ok(Subscription::new(topic, move || {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(subscribers) = registry.get_mut(&cancel_topic) {
                // Dropping the sender ends the delivery thread
                subscribers.retain(|sub| sub.id != id);
                if subscribers.is_empty() {
                    registry.remove(&cancel_topic);
                }
            }
        }))
    }
}
