// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Subscriber registry and change-record fan-out
//!
//! Every subscriber owns a bounded channel. Publishing never waits: a
//! subscriber whose buffer is full, or whose receiver is gone, is dropped
//! from the registry so one stalled viewer cannot hold up the others.

use dashmap::DashMap;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{ChangeRecord, SubscriptionFilter};
use crate::error::WatchError;

/// Per-subscriber buffer depth used when none is configured
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

pub type SubscriptionId = u64;

struct Subscriber {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<ChangeRecord>,
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

struct HubInner {
    subscribers: DashMap<SubscriptionId, Subscriber>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Thread-safe handle to the broadcast hub
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Attach a viewer. Records published from now on that match `filter` are delivered.
    pub fn register(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        debug!(
            subscription = id,
            cluster = %filter.cluster,
            namespace = ?filter.namespace,
            workload = ?filter.workload,
            "Subscriber registered"
        );
        self.inner.subscribers.insert(id, Subscriber { filter, tx });
        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    /// Detach a viewer. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriptionId) {
        if self.inner.subscribers.remove(&id).is_some() {
            debug!(subscription = id, "Subscriber unregistered");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Deliver `record` to every matching subscriber without blocking
    pub fn publish(&self, record: &ChangeRecord) -> PublishReport {
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        for entry in self.inner.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.filter.matches(&record.key) {
                continue;
            }
            match subscriber.tx.try_send(record.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let err = WatchError::Delivery {
                        subscription: *entry.key(),
                    };
                    warn!(error = %err, "Subscriber buffer full, disconnecting");
                    failed.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    failed.push(*entry.key());
                }
            }
        }

        // Removal happens after iteration; removing while holding a shard guard would deadlock
        for id in failed {
            self.unregister(id);
            report.dropped += 1;
        }

        report
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// A live stream of change records for one viewer
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<ChangeRecord>,
    hub: BroadcastHub,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next record, or None once the hub has dropped this subscriber
    pub async fn recv(&mut self) -> Option<ChangeRecord> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeRecord> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = ChangeRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::types::ObjectKey;
    use futures::StreamExt;

    fn record(workload: &str, message: &str) -> ChangeRecord {
        ChangeRecord {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            key: ObjectKey::new("prod", "default", workload),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_register_and_drop_unregisters() {
        let hub = BroadcastHub::default();
        let sub = hub.register(SubscriptionFilter::new("prod", Some("default"), None));
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_unregister_idempotent() {
        let hub = BroadcastHub::default();
        let sub = hub.register(SubscriptionFilter::new("prod", None, None));
        hub.unregister(sub.id());
        hub.unregister(sub.id());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_workload_filters() {
        let hub = BroadcastHub::default();
        let mut sub_a = hub.register(SubscriptionFilter::new("prod", Some("default"), Some("A")));
        let mut sub_b = hub.register(SubscriptionFilter::new("prod", Some("default"), Some("B")));
        let mut sub_all = hub.register(SubscriptionFilter::new("prod", Some("default"), None));

        let report = hub.publish(&record("A", "Replicas changed: 2"));
        assert_eq!(report, PublishReport { delivered: 2, dropped: 0 });

        assert_eq!(sub_a.try_recv().map(|r| r.key.name), Some("A".to_string()));
        assert!(sub_b.try_recv().is_none());
        assert_eq!(sub_all.try_recv().map(|r| r.key.name), Some("A".to_string()));
    }

    #[test]
    fn test_late_subscriber_sees_only_new_records() {
        let hub = BroadcastHub::default();
        hub.publish(&record("web", "first"));
        let mut sub = hub.register(SubscriptionFilter::new("prod", None, None));
        hub.publish(&record("web", "second"));
        assert_eq!(sub.try_recv().map(|r| r.message), Some("second".to_string()));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_full_subscriber_dropped_without_affecting_others() {
        let hub = BroadcastHub::new(2);
        let _stalled = hub.register(SubscriptionFilter::new("prod", None, None));
        let mut healthy = hub.register(SubscriptionFilter::new("prod", None, None));

        for i in 0..2 {
            let report = hub.publish(&record("web", &format!("m{}", i)));
            assert_eq!(report.delivered, 2);
            assert_eq!(healthy.try_recv().map(|r| r.message), Some(format!("m{}", i)));
        }

        // Stalled buffer is full now
        let report = hub.publish(&record("web", "m2"));
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(healthy.try_recv().map(|r| r.message), Some("m2".to_string()));
    }

    #[tokio::test]
    async fn test_stream_preserves_order() {
        let hub = BroadcastHub::default();
        let sub = hub.register(SubscriptionFilter::new("prod", Some("default"), Some("web")));
        for i in 0..5 {
            hub.publish(&record("web", &format!("m{}", i)));
        }
        let messages: Vec<String> = sub.take(5).map(|r| r.message).collect().await;
        assert_eq!(messages, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_recv_ends_after_drop_from_hub() {
        let hub = BroadcastHub::new(1);
        let mut sub = hub.register(SubscriptionFilter::new("prod", None, None));
        hub.publish(&record("web", "kept"));
        hub.publish(&record("web", "overflow"));
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(sub.recv().await.map(|r| r.message), Some("kept".to_string()));
        assert!(sub.recv().await.is_none());
    }
}
