//! In-process message buses with acknowledge/negative-acknowledge
//! delivery semantics.
//!
//! Two independent logical buses carry the pipeline's queues: the
//! private bus holds "scan" (consumed here) and "send" (produced here),
//! the public bus holds "complete". A consumed message stays in flight
//! until it is acked (permanently removed) or nacked (returned for
//! arbitrary-future redelivery); a delivery dropped without either is
//! also redelivered, so a crashed worker never loses work.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named logical bus owning a set of queues.
///
/// Cloning a `Bus` models opening another connection to the same
/// broker: all clones see the same queues and messages.
#[derive(Clone)]
pub struct Bus {
    name: Arc<str>,
    queues: Arc<Mutex<HashMap<String, Arc<QueueInner>>>>,
}

impl Bus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Declare-or-attach a queue on this bus.
    pub fn queue(&self, name: &str) -> MessageQueue {
        let inner = Arc::clone(
            lock(&self.queues)
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(QueueInner::default())),
        );
        MessageQueue {
            bus: Arc::clone(&self.name),
            name: Arc::from(name),
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct QueueInner {
    ready: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl QueueInner {
    fn requeue(&self, payload: Vec<u8>) {
        lock(&self.ready).push_back(payload);
        self.notify.notify_one();
    }
}

/// Handle to one named queue. Cloneable; all clones share the messages.
#[derive(Clone)]
pub struct MessageQueue {
    bus: Arc<str>,
    name: Arc<str>,
    inner: Arc<QueueInner>,
}

impl MessageQueue {
    /// Enqueue a message. Published messages are always new, independent
    /// deliveries, unaffected by the ack state of any consumed message.
    pub fn publish(&self, payload: Vec<u8>) {
        lock(&self.inner.ready).push_back(payload);
        self.inner.notify.notify_one();
    }

    /// Await the next message.
    ///
    /// The returned delivery must be resolved with [`Delivery::ack`] or
    /// [`Delivery::nack`]; dropping it unresolved requeues the message.
    pub async fn consume(&self) -> Delivery {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(delivery) = self.take() {
                return delivery;
            }
            notified.await;
        }
    }

    /// Take the next message if one is ready, without waiting.
    pub fn try_pop(&self) -> Option<Delivery> {
        self.take()
    }

    fn take(&self) -> Option<Delivery> {
        let mut ready = lock(&self.inner.ready);
        let payload = ready.pop_front()?;
        // A permit may have been coalesced while nobody was waiting;
        // hand it on if more messages are ready.
        if !ready.is_empty() {
            self.inner.notify.notify_one();
        }
        drop(ready);
        Some(Delivery {
            payload,
            queue: Arc::clone(&self.inner),
            resolved: false,
        })
    }

    /// Number of messages currently ready for delivery (in-flight
    /// deliveries are not counted).
    pub fn len(&self) -> usize {
        lock(&self.inner.ready).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bus_name(&self) -> &str {
        &self.bus
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One in-flight message consumed from a queue.
pub struct Delivery {
    payload: Vec<u8>,
    queue: Arc<QueueInner>,
    resolved: bool,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Permanently remove the message from its queue.
    pub fn ack(mut self) {
        self.resolved = true;
    }

    /// Return the message for an arbitrary-future redelivery attempt.
    pub fn nack(self) {
        // Dropping unresolved requeues.
    }

    /// Return the message for redelivery no sooner than `delay` from
    /// now. Paces retry loops on queues that would otherwise redeliver
    /// immediately.
    pub fn nack_after(mut self, delay: Duration) {
        self.resolved = true;
        let queue = Arc::clone(&self.queue);
        let payload = std::mem::take(&mut self.payload);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.requeue(payload);
        });
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.resolved {
            self.queue.requeue(std::mem::take(&mut self.payload));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_then_consume_preserves_order() {
        let bus = Bus::new("private");
        let queue = bus.queue("scan");
        queue.publish(b"first".to_vec());
        queue.publish(b"second".to_vec());

        let first = queue.consume().await;
        assert_eq!(first.payload(), b"first");
        first.ack();

        let second = queue.consume().await;
        assert_eq!(second.payload(), b"second");
        second.ack();

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn ack_removes_the_message_permanently() {
        let bus = Bus::new("private");
        let queue = bus.queue("scan");
        queue.publish(b"msg".to_vec());

        queue.consume().await.ack();
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn nack_redelivers_the_message() {
        let bus = Bus::new("private");
        let queue = bus.queue("scan");
        queue.publish(b"msg".to_vec());

        queue.consume().await.nack();

        let redelivered = queue.consume().await;
        assert_eq!(redelivered.payload(), b"msg");
        redelivered.ack();
    }

    #[tokio::test(start_paused = true)]
    async fn nack_after_holds_the_message_for_the_delay() {
        let bus = Bus::new("private");
        let queue = bus.queue("scan");
        queue.publish(b"msg".to_vec());

        queue.consume().await.nack_after(Duration::from_secs(1));
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn dropped_unresolved_delivery_is_redelivered() {
        let bus = Bus::new("private");
        let queue = bus.queue("scan");
        queue.publish(b"msg".to_vec());

        {
            let _delivery = queue.consume().await;
            // Simulates a worker crash between consume and ack.
        }

        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn consumer_wakes_on_later_publish() {
        let bus = Bus::new("private");
        let queue = bus.queue("scan");

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let delivery = queue.consume().await;
                let payload = delivery.payload().to_vec();
                delivery.ack();
                payload
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.publish(b"late".to_vec());

        let payload = consumer.await.unwrap();
        assert_eq!(payload, b"late");
    }

    #[tokio::test]
    async fn bus_clones_share_queues_but_buses_are_independent() {
        let private = Bus::new("private");
        let public = Bus::new("public");

        private.queue("scan").publish(b"work".to_vec());
        assert_eq!(private.clone().queue("scan").len(), 1);
        assert!(public.queue("scan").is_empty());
    }
}
