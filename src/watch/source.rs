// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cluster event source
//!
//! Two producers feed the work queue for one cluster:
//! - the watch loop, which records every delivered object in the
//!   [`ObjectStore`] and enqueues its key
//! - the periodic resync, which re-enqueues every known key
//!
//! A re-list after reconnect is handled like any other batch of updates.
//! Keys that were known before the re-list but are missing from it are
//! marked vanished, so deletes missed while disconnected still reach the
//! reconcilers.

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{ClusterBackend, ClusterConnector, WatchEvent, WatchStream};
use super::cache::ObjectStore;
use super::queue::{QueueConfig, WorkQueue};
use super::status::StatusHandle;
use super::types::ObjectKey;
use crate::error::WatchError;

/// Base delay for reconnect backoff (doubles each failure)
const CONNECT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Reconnect backoff ceiling
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct SourceSettings {
    /// How often every known key is re-enqueued
    pub resync_interval: Duration,
    /// Consecutive connection failures before the cluster is reported stale
    pub stale_after_failures: u32,
    pub reconnect: QueueConfig,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            stale_after_failures: 5,
            reconnect: QueueConfig {
                base_delay: CONNECT_BASE_DELAY,
                max_delay: CONNECT_MAX_DELAY,
            },
        }
    }
}

/// Build the queue key for a delivered object
pub fn object_key(cluster: &str, deployment: &Deployment) -> Option<ObjectKey> {
    let name = deployment.metadata.name.as_deref()?;
    let namespace = deployment.metadata.namespace.as_deref().unwrap_or("default");
    Some(ObjectKey::new(cluster, namespace, name))
}

/// Consecutive-failure bookkeeping for one cluster
struct Health {
    consecutive_failures: u32,
    stale: bool,
}

/// Watches one cluster and feeds its work queue
pub struct EventSource {
    cluster: String,
    namespace: Option<String>,
    connector: Arc<dyn ClusterConnector>,
    store: Arc<ObjectStore>,
    queue: WorkQueue<ObjectKey>,
    status: StatusHandle,
    settings: SourceSettings,
    health: Health,
}

impl EventSource {
    pub fn new(
        cluster: &str,
        namespace: Option<&str>,
        connector: Arc<dyn ClusterConnector>,
        store: Arc<ObjectStore>,
        queue: WorkQueue<ObjectKey>,
        status: StatusHandle,
        settings: SourceSettings,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            namespace: namespace.map(String::from),
            connector,
            store,
            queue,
            status,
            settings,
            health: Health {
                consecutive_failures: 0,
                stale: false,
            },
        }
    }

    /// Run until cancelled, reconnecting whenever the stream ends
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let Some(backend) = self.connect(&cancel).await else {
                return;
            };
            let stream = backend.watch_workloads(self.namespace.as_deref());
            self.consume(stream, &cancel).await;

            if cancel.is_cancelled() {
                return;
            }
            warn!(cluster = %self.cluster, "Watch stream ended, reconnecting");
        }
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Option<Arc<dyn ClusterBackend>> {
        loop {
            self.status.connecting(&self.cluster);
            let start = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.connector.connect(&self.cluster) => result,
            };

            match result {
                Ok(backend) => {
                    self.status
                        .connected(&self.cluster, start.elapsed().as_millis() as u64);
                    info!(cluster = %self.cluster, namespace = ?self.namespace, "Watching workloads");
                    return Some(backend);
                }
                Err(e) => {
                    self.record_failure(&e);
                    let delay = self
                        .settings
                        .reconnect
                        .backoff(self.health.consecutive_failures);
                    warn!(
                        cluster = %self.cluster,
                        attempt = self.health.consecutive_failures,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Connect failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn consume(&mut self, mut stream: WatchStream, cancel: &CancellationToken) {
        let mut relist: Option<HashSet<ObjectKey>> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };

            match next {
                None => return,
                Some(Ok(event)) => {
                    self.record_success();
                    self.handle(event, &mut relist);
                }
                // The stream backs off and re-lists on its own
                Some(Err(e)) => self.record_failure(&e),
            }
        }
    }

    fn handle(&self, event: WatchEvent, relist: &mut Option<HashSet<ObjectKey>>) {
        match event {
            WatchEvent::Applied(obj) => {
                if let Some(key) = self.key_for(&obj) {
                    self.store.apply(key.clone(), obj);
                    self.queue.add(key);
                }
            }
            WatchEvent::Deleted(obj) => {
                if let Some(key) = self.key_for(&obj) {
                    self.store.mark_deleted(key.clone());
                    self.queue.add(key);
                }
            }
            WatchEvent::RelistStarted => {
                debug!(cluster = %self.cluster, "Re-list started");
                *relist = Some(HashSet::new());
            }
            WatchEvent::Relisted(obj) => {
                if let Some(key) = self.key_for(&obj) {
                    if let Some(seen) = relist.as_mut() {
                        seen.insert(key.clone());
                    }
                    self.store.apply(key.clone(), obj);
                    self.queue.add(key);
                }
            }
            WatchEvent::RelistDone => {
                let Some(seen) = relist.take() else {
                    return;
                };
                let vanished = self.store.mark_vanished_except(&seen);
                if !vanished.is_empty() {
                    info!(
                        cluster = %self.cluster,
                        count = vanished.len(),
                        "Workloads missing after re-list"
                    );
                }
                for key in vanished {
                    self.queue.add(key);
                }
                self.status.synced(&self.cluster, seen.len());
                debug!(cluster = %self.cluster, objects = seen.len(), "Re-list complete");
            }
        }
    }

    fn key_for(&self, obj: &Deployment) -> Option<ObjectKey> {
        let key = object_key(&self.cluster, obj);
        if key.is_none() {
            warn!(cluster = %self.cluster, "Ignoring workload event without a name");
        }
        key
    }

    fn record_failure(&mut self, err: &WatchError) {
        self.health.consecutive_failures = self.health.consecutive_failures.saturating_add(1);
        debug!(
            cluster = %self.cluster,
            failures = self.health.consecutive_failures,
            error = %err,
            "Watch connection error"
        );
        if !self.health.stale && self.health.consecutive_failures >= self.settings.stale_after_failures
        {
            self.health.stale = true;
            warn!(
                cluster = %self.cluster,
                failures = self.health.consecutive_failures,
                "Cluster data is stale"
            );
            self.status
                .stale(&self.cluster, self.health.consecutive_failures, &err.to_string());
        }
    }

    fn record_success(&mut self) {
        self.health.consecutive_failures = 0;
        if self.health.stale {
            self.health.stale = false;
            info!(cluster = %self.cluster, "Cluster watch recovered");
            self.status.recovered(&self.cluster);
        }
    }
}

/// Periodically re-enqueue every known workload
pub async fn run_resync(
    store: Arc<ObjectStore>,
    queue: WorkQueue<ObjectKey>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let keys = store.present_keys();
                debug!(count = keys.len(), "Periodic resync");
                for key in keys {
                    queue.add(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::cache::LatestObject;
    use crate::watch::diff::fixtures::deployment;
    use crate::watch::status::{WatchStatus, create_status_handle};
    use crate::watch::testing::FakeCluster;

    fn source(cluster: &FakeCluster, settings: SourceSettings) -> (EventSource, Arc<ObjectStore>, WorkQueue<ObjectKey>, StatusHandle) {
        let store = Arc::new(ObjectStore::new());
        let queue = WorkQueue::new(QueueConfig::default());
        let status = create_status_handle();
        let src = EventSource::new(
            "prod",
            None,
            cluster.connector(),
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&status),
            settings,
        );
        (src, store, queue, status)
    }

    #[test]
    fn test_object_key_requires_name() {
        let d = deployment("web", 1, "nginx");
        assert_eq!(
            object_key("prod", &d),
            Some(ObjectKey::new("prod", "default", "web"))
        );
        let mut unnamed = d;
        unnamed.metadata.name = None;
        assert_eq!(object_key("prod", &unnamed), None);
    }

    #[tokio::test]
    async fn test_events_land_in_store_and_queue() {
        let cluster = FakeCluster::new();
        let (src, store, queue, _) = source(&cluster, SourceSettings::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(src.run(cancel.clone()));

        cluster.send(WatchEvent::Applied(deployment("web", 1, "nginx")));
        cluster.send(WatchEvent::Applied(deployment("web", 2, "nginx")));
        cluster.send(WatchEvent::Applied(deployment("api", 1, "api:v1")));
        cluster.settle().await;

        // Two events for web collapse into one queue entry
        assert_eq!(queue.len(), 2);
        let web = ObjectKey::new("prod", "default", "web");
        match store.get(&web) {
            Some(LatestObject::Present(d)) => {
                assert_eq!(d.spec.as_ref().and_then(|s| s.replicas), Some(2))
            }
            other => panic!("unexpected store entry: {:?}", other),
        }

        cluster.send(WatchEvent::Deleted(deployment("api", 1, "api:v1")));
        cluster.settle().await;
        assert!(matches!(
            store.get(&ObjectKey::new("prod", "default", "api")),
            Some(LatestObject::Deleted)
        ));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_relist_marks_missing_keys_vanished() {
        let cluster = FakeCluster::new();
        let (src, store, _queue, status) = source(&cluster, SourceSettings::default());
        let mut status_rx = status.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(src.run(cancel.clone()));

        cluster.send(WatchEvent::Applied(deployment("web", 1, "nginx")));
        cluster.send(WatchEvent::Applied(deployment("api", 1, "api:v1")));
        cluster.send(WatchEvent::RelistStarted);
        cluster.send(WatchEvent::Relisted(deployment("web", 1, "nginx")));
        cluster.send(WatchEvent::RelistDone);
        cluster.settle().await;

        assert!(matches!(
            store.get(&ObjectKey::new("prod", "default", "api")),
            Some(LatestObject::Vanished)
        ));
        assert!(matches!(
            store.get(&ObjectKey::new("prod", "default", "web")),
            Some(LatestObject::Present(_))
        ));

        let updates: Vec<_> = std::iter::from_fn(|| status_rx.try_recv().ok()).collect();
        assert!(updates.contains(&WatchStatus::Synced {
            cluster: "prod".to_string(),
            objects: 1
        }));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_errors_escalate_then_recover() {
        let cluster = FakeCluster::new();
        let settings = SourceSettings {
            stale_after_failures: 2,
            ..Default::default()
        };
        let (src, _store, _queue, status) = source(&cluster, settings);
        let mut status_rx = status.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(src.run(cancel.clone()));

        cluster.fail("watch dropped");
        cluster.fail("watch dropped");
        cluster.fail("watch dropped");
        cluster.send(WatchEvent::Applied(deployment("web", 1, "nginx")));
        cluster.settle().await;

        let updates: Vec<_> = std::iter::from_fn(|| status_rx.try_recv().ok()).collect();
        let stale: Vec<_> = updates
            .iter()
            .filter(|u| matches!(u, WatchStatus::Stale { .. }))
            .collect();
        assert_eq!(stale.len(), 1);
        assert!(updates.contains(&WatchStatus::Recovered {
            cluster: "prod".to_string()
        }));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_until_reachable() {
        let cluster = FakeCluster::new();
        cluster.set_reachable(false);
        let (src, _store, queue, status) = source(&cluster, SourceSettings::default());
        let mut status_rx = status.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(src.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cluster.connect_attempts() >= 2);

        cluster.set_reachable(true);
        cluster.send(WatchEvent::Applied(deployment("web", 1, "nginx")));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(queue.len(), 1);

        let updates: Vec<_> = std::iter::from_fn(|| status_rx.try_recv().ok()).collect();
        assert!(updates.iter().any(|u| matches!(u, WatchStatus::Connected { .. })));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_reenqueues_present_keys() {
        let store = Arc::new(ObjectStore::new());
        let queue = WorkQueue::new(QueueConfig::default());
        store.apply(ObjectKey::new("prod", "default", "web"), deployment("web", 1, "nginx"));
        store.mark_deleted(ObjectKey::new("prod", "default", "gone"));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_resync(
            Arc::clone(&store),
            queue.clone(),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.len(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(ObjectKey::new("prod", "default", "web")));

        cancel.cancel();
        task.await.unwrap();
    }
}
