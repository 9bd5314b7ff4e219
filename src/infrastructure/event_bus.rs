use crate::domain::events::EngineEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Fan-out of typed engine events to subscribers.
///
/// Every subscriber owns an independent bounded mailbox: a slow subscriber
/// drops its own oldest events (counted in `subscriber_lag`) and never
/// blocks the publisher or other subscribers. Per-subscriber delivery
/// order equals emission order.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    lag: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            lag: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all current subscribers. An event with no
    /// subscribers is dropped silently.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event from this point on.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            lag: Arc::clone(&self.lag),
        }
    }

    /// Await the first event matching `pred`, then drop the subscription.
    /// Returns `None` when the bus closes first.
    pub async fn once<F>(&self, pred: F) -> Option<EngineEvent>
    where
        F: Fn(&EngineEvent) -> bool,
    {
        let mut stream = self.subscribe();
        while let Some(event) = stream.next().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Total events dropped across all subscribers due to slow consumption.
    pub fn subscriber_lag(&self) -> u64 {
        self.lag.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            lag: Arc::clone(&self.lag),
        }
    }
}

/// One subscriber's mailbox.
pub struct EventStream {
    rx: broadcast::Receiver<EngineEvent>,
    lag: Arc<AtomicU64>,
}

impl EventStream {
    /// Next event in emission order; `None` once the bus is closed and the
    /// mailbox is drained. Overflow skips the oldest events and counts
    /// them as lag.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.lag.fetch_add(n, Ordering::SeqCst);
                    warn!("EventBus: subscriber lagged, dropped {} event(s)", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.lag.fetch_add(n, Ordering::SeqCst);
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventMeta;

    fn meta(id: &str) -> EventMeta {
        EventMeta {
            id: id.to_string(),
            timestamp: 0,
            backtest: true,
            symbol: "BTCUSDT".to_string(),
            strategy_name: "hold".to_string(),
            exchange_name: "mock".to_string(),
        }
    }

    fn info(id: &str) -> EngineEvent {
        EngineEvent::ErrorInfo {
            meta: meta(id),
            message: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(info("e1"));
        assert_eq!(a.next().await.unwrap().meta().id, "e1");
        assert_eq!(b.next().await.unwrap().meta().id, "e1");
    }

    #[tokio::test]
    async fn test_delivery_order_matches_emission_order() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();
        for i in 0..10 {
            bus.publish(info(&format!("e{}", i)));
        }
        for i in 0..10 {
            assert_eq!(stream.next().await.unwrap().meta().id, format!("e{}", i));
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_counts_lag() {
        let bus = EventBus::with_capacity(4);
        let mut slow = bus.subscribe();
        for i in 0..10 {
            bus.publish(info(&format!("e{}", i)));
        }
        // The oldest events are gone; the stream resumes at the survivors.
        let first = slow.next().await.unwrap();
        assert_eq!(first.meta().id, "e6");
        assert!(bus.subscriber_lag() >= 6);
    }

    #[tokio::test]
    async fn test_once_resolves_on_match() {
        let bus = EventBus::new();
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.once(|e| matches!(e, EngineEvent::Done { .. })).await
            })
        };
        tokio::task::yield_now().await;
        bus.publish(info("noise"));
        bus.publish(EngineEvent::Done {
            meta: meta("d1"),
            aborted: false,
        });
        let matched = waiter.await.unwrap().unwrap();
        assert_eq!(matched.meta().id, "d1");
    }
}
