//! Typed event source with explicit subscribe/unsubscribe.

use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Handle returned by [`EventSource::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct Subscribers<E> {
    next_id: u64,
    senders: BTreeMap<u64, mpsc::UnboundedSender<E>>,
    closed: bool,
}

/// Fan-out of events to every live subscriber, in subscription order.
#[derive(Debug)]
pub struct EventSource<E> {
    inner: Mutex<Subscribers<E>>,
}

impl<E> Default for EventSource<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Subscribers {
                next_id: 0,
                senders: BTreeMap::new(),
                closed: false,
            }),
        }
    }
}

impl<E: Clone> EventSource<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. After [`EventSource::close`] the returned
    /// receiver is already closed.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        if !inner.closed {
            inner.senders.insert(id, tx);
        }
        (SubscriptionId(id), rx)
    }

    /// Drop a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.senders.remove(&id.0).is_some()
    }

    /// Deliver `event` to every subscriber, pruning those whose receiver is gone.
    pub fn emit(&self, event: E) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .senders
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Tear down every subscription; later subscribers get a closed receiver.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        inner.senders.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .senders
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let source = EventSource::new();
        let (_, mut a) = source.subscribe();
        let (_, mut b) = source.subscribe();

        source.emit(1u32);

        assert_eq!(a.try_recv().unwrap(), 1);
        assert_eq!(b.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let source = EventSource::new();
        let (id, mut rx) = source.subscribe();

        assert!(source.unsubscribe(id));
        assert!(!source.unsubscribe(id));
        source.emit(5u32);

        // Sender dropped on unsubscribe, so the channel reports closed
        assert!(rx.try_recv().is_err());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let source = EventSource::new();
        let (_, rx) = source.subscribe();
        drop(rx);

        source.emit(1u32);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_every_stream() {
        let source = EventSource::new();
        let (_, mut rx) = source.subscribe();
        source.emit("before");
        source.close();

        assert_eq!(rx.recv().await, Some("before"));
        assert_eq!(rx.recv().await, None);

        let (_, mut late) = source.subscribe();
        assert_eq!(late.recv().await, None);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let source: EventSource<u8> = EventSource::new();
        let (a, _ra) = source.subscribe();
        let (b, _rb) = source.subscribe();
        assert_ne!(a, b);
    }
}
