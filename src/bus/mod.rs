//! In-memory fan-out of decoded records to every live subscriber.
//!
//! Delivery is best-effort: [`Distributor::emit`] makes exactly one
//! non-blocking attempt per inbox and a full inbox misses that record.
//! Producers never wait on consumers.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::Record;

/// Default inbox capacity: a single slot.
pub const DEFAULT_INBOX_CAPACITY: usize = 1;

/// Distributor events reported to an attached metrics callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// A record was handed to `emit`.
    Emitted,
    /// One member's inbox was full and missed a record.
    Dropped,
    /// Membership changed; carries the new member count.
    Members(usize),
}

/// Callback type for recording distributor metrics.
pub type MetricsCallback = Box<dyn Fn(BusEvent) + Send + Sync>;

/// Capability needed by record producers.
pub trait Publish: Send + Sync {
    /// Deliver `record` to every current subscriber without blocking.
    fn emit(&self, record: Record);
}

/// Capability needed by record consumers.
pub trait Subscribe: Send + Sync {
    /// Register a new inbox.
    fn subscribe(&self) -> Subscription;

    /// Remove `sub` from membership. Buffered records are discarded and
    /// subsequent reads return `None`.
    fn unsubscribe(&self, sub: &mut Subscription);
}

/// Receiving end of one subscriber inbox.
///
/// Once the owning distributor is closed, reads return `None` even if
/// records are still buffered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Record>,
    closed: CancellationToken,
}

impl Subscription {
    /// Identifier unique within the owning distributor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next record. `None` means end-of-stream.
    pub async fn recv(&mut self) -> Option<Record> {
        let next = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            next = self.rx.recv() => next,
        };

        if next.is_none() || self.closed.is_cancelled() {
            self.shut();
            return None;
        }
        next
    }

    /// Take a buffered record without waiting.
    pub fn try_recv(&mut self) -> Option<Record> {
        if self.closed.is_cancelled() {
            self.shut();
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Close the inbox and discard anything still buffered.
    fn shut(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

struct Members {
    next_id: u64,
    inboxes: HashMap<u64, mpsc::Sender<Record>>,
    closed: bool,
}

/// Publish/subscribe hub for [`Record`]s.
///
/// One exclusive lock covers membership changes and the emit loop.
/// Subscriber counts are expected in the tens.
pub struct Distributor {
    capacity: usize,
    members: Mutex<Members>,
    /// Cancelled by `close`; every subscription holds a clone.
    closed: CancellationToken,
    metrics: Option<MetricsCallback>,
}

impl Distributor {
    /// Create a distributor whose inboxes hold `capacity` records.
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            members: Mutex::new(Members {
                next_id: 0,
                inboxes: HashMap::new(),
                closed: false,
            }),
            closed: CancellationToken::new(),
            metrics: None,
        }
    }

    /// Set a metrics callback for emit, drop and membership events.
    pub fn with_metrics(mut self, cb: MetricsCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    fn record(&self, event: BusEvent) {
        if let Some(ref cb) = self.metrics {
            cb(event);
        }
    }

    /// Register a new inbox. After [`close`](Self::close) the returned
    /// handle is already at end-of-stream.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut members = self.members.lock();
        let id = members.next_id;
        members.next_id += 1;

        let closed = self.closed.clone();

        if members.closed {
            drop(tx);
            return Subscription { id, rx, closed };
        }

        members.inboxes.insert(id, tx);
        let count = members.inboxes.len();
        drop(members);

        debug!(id, count, "subscriber added");
        self.record(BusEvent::Members(count));

        Subscription { id, rx, closed }
    }

    /// Remove `sub` from membership and close its inbox.
    pub fn unsubscribe(&self, sub: &mut Subscription) {
        let removed = {
            let mut members = self.members.lock();
            members
                .inboxes
                .remove(&sub.id)
                .map(|_| members.inboxes.len())
        };

        sub.shut();

        if let Some(count) = removed {
            debug!(id = sub.id, count, "subscriber removed");
            self.record(BusEvent::Members(count));
        }
    }

    /// Attempt one non-blocking delivery of `record` to every inbox.
    pub fn emit(&self, record: Record) {
        let mut dropped = 0usize;
        let mut pruned = false;

        {
            let mut members = self.members.lock();
            if members.closed {
                return;
            }

            members.inboxes.retain(|_, tx| match tx.try_send(record) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    pruned = true;
                    false
                }
            });

            if pruned {
                let count = members.inboxes.len();
                drop(members);
                self.record(BusEvent::Members(count));
            }
        }

        self.record(BusEvent::Emitted);
        for _ in 0..dropped {
            self.record(BusEvent::Dropped);
        }
    }

    /// Close every inbox. Records still buffered are discarded and later
    /// `emit` calls are no-ops.
    pub fn close(&self) {
        let mut members = self.members.lock();
        if members.closed {
            return;
        }
        members.closed = true;
        self.closed.cancel();
        let count = members.inboxes.len();
        members.inboxes.clear();
        drop(members);

        debug!(count, "distributor closed");
        self.record(BusEvent::Members(0));
    }

    /// Number of registered inboxes.
    pub fn len(&self) -> usize {
        self.members.lock().inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.members.lock().closed
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new(DEFAULT_INBOX_CAPACITY)
    }
}

impl Publish for Distributor {
    fn emit(&self, record: Record) {
        Distributor::emit(self, record);
    }
}

impl Subscribe for Distributor {
    fn subscribe(&self) -> Subscription {
        Distributor::subscribe(self)
    }

    fn unsubscribe(&self, sub: &mut Subscription) {
        Distributor::unsubscribe(self, sub);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use chrono::{TimeZone, Utc};

    fn record(temperature: f32) -> Record {
        Record {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            temperature,
            humidity: 40.0,
            pressure: 760.0,
            voltage: 3300.0,
        }
    }

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let bus = Distributor::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_ne!(a.id(), b.id());
        assert_eq!(bus.len(), 2);

        bus.emit(record(1.0));

        assert_eq!(a.recv().await.unwrap().temperature, 1.0);
        assert_eq!(b.recv().await.unwrap().temperature, 1.0);
    }

    #[tokio::test]
    async fn test_full_inbox_drops_without_blocking() {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drops);
        let bus = Distributor::new(1).with_metrics(Box::new(move |ev: BusEvent| {
            if ev == BusEvent::Dropped {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }));

        let mut idle = bus.subscribe();
        let _others: Vec<_> = (0..32).map(|_| bus.subscribe()).collect();

        let start = Instant::now();
        for i in 0..1000 {
            bus.emit(record(i as f32));
        }
        assert!(start.elapsed() < Duration::from_secs(1));

        // Only the first record fit in the single slot.
        assert_eq!(idle.try_recv().unwrap().temperature, 0.0);
        assert!(idle.try_recv().is_none());
        assert_eq!(drops.load(Ordering::Relaxed), 33 * 999);
    }

    #[tokio::test]
    async fn test_per_subscriber_order() {
        let bus = Distributor::new(16);
        let mut sub = bus.subscribe();

        for i in 0..10 {
            bus.emit(record(i as f32));
        }

        for i in 0..10 {
            assert_eq!(sub.recv().await.unwrap().temperature, i as f32);
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let bus = Distributor::new(4);
        let mut sub = bus.subscribe();
        bus.emit(record(1.0));

        bus.unsubscribe(&mut sub);

        assert!(sub.recv().await.is_none());
        assert_eq!(bus.len(), 0);

        bus.emit(record(2.0));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_leaves_others() {
        let bus = Distributor::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.unsubscribe(&mut a);
        bus.emit(record(7.0));

        assert_eq!(b.recv().await.unwrap().temperature, 7.0);
        assert!(a.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_ends_all_streams() {
        let bus = Distributor::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.close();
        bus.emit(record(1.0));

        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert!(bus.is_closed());
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_close_discards_buffered_records() {
        let bus = Distributor::new(4);
        let mut waiting = bus.subscribe();
        let mut polled = bus.subscribe();

        bus.emit(record(9.0));
        bus.emit(record(10.0));
        bus.close();

        assert!(waiting.recv().await.is_none());
        assert!(polled.try_recv().is_none());
        assert!(polled.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_recv() {
        let bus = Arc::new(Distributor::new(1));
        let mut sub = bus.subscribe();

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        bus.close();

        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_after_close() {
        let bus = Distributor::new(4);
        bus.close();

        let mut sub = bus.subscribe();
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = Distributor::new(1);
        let sub = bus.subscribe();
        let _keep = bus.subscribe();
        drop(sub);

        bus.emit(record(1.0));
        assert_eq!(bus.len(), 1);
    }

    #[tokio::test]
    async fn test_waiting_receiver_wakes() {
        let bus = Arc::new(Distributor::new(1));
        let mut sub = bus.subscribe();

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        bus.emit(record(5.0));

        let got = waiter.await.unwrap();
        assert_eq!(got.unwrap().temperature, 5.0);
    }

    #[tokio::test]
    async fn test_membership_metrics() {
        let last = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = Arc::clone(&last);
        let bus = Distributor::new(1).with_metrics(Box::new(move |ev: BusEvent| {
            if let BusEvent::Members(n) = ev {
                seen.store(n, Ordering::Relaxed);
            }
        }));

        let mut a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(last.load(Ordering::Relaxed), 2);

        bus.unsubscribe(&mut a);
        assert_eq!(last.load(Ordering::Relaxed), 1);

        bus.close();
        assert_eq!(last.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_zero_capacity_raised() {
        let bus = Distributor::new(0);
        let mut sub = bus.subscribe();
        bus.emit(record(1.0));
        assert!(sub.try_recv().is_some());
    }
}
