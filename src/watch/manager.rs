// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Watch lifecycle across clusters
//!
//! Each watched cluster owns its own cache, object store, work queue and
//! tasks. Nothing is shared between clusters except the broadcast hub and
//! the status channel, so one cluster can be stopped without touching the
//! others.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::ClusterConnector;
use super::cache::{ObjectStore, SnapshotCache};
use super::hub::{BroadcastHub, DEFAULT_SUBSCRIBER_BUFFER, Subscription};
use super::instances;
use super::queue::{QueueConfig, WorkQueue};
use super::reconcile::{Reconciler, run_worker};
use super::source::{EventSource, SourceSettings, run_resync};
use super::status::{StatusHandle, WatchStatus, create_status_handle};
use super::types::{Instance, ObjectKey, ObjectSnapshot, SubscriptionFilter};
use crate::error::{Result, WatchError};

/// Tunables for every cluster watch started by a manager
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Reconcile workers per cluster
    pub workers: usize,
    pub source: SourceSettings,
    pub queue: QueueConfig,
    pub subscriber_buffer: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            source: SourceSettings::default(),
            queue: QueueConfig::default(),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Everything owned by one cluster's watch
struct ClusterWatch {
    namespace: Option<String>,
    cache: Arc<SnapshotCache>,
    store: Arc<ObjectStore>,
    queue: WorkQueue<ObjectKey>,
    cancel: CancellationToken,
    producers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ClusterWatch {
    /// Stop producers, let workers finish what they hold, then drop state
    async fn shutdown(self, cluster: &str) {
        self.cancel.cancel();
        for handle in self.producers {
            if let Err(e) = handle.await {
                warn!(cluster = %cluster, error = %e, "Watch producer task failed");
            }
        }

        self.queue.shut_down();
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(cluster = %cluster, error = %e, "Reconcile worker task failed");
            }
        }

        self.cache.clear();
        self.store.clear();
    }
}

/// Entry point for watching clusters and consuming their change records
pub struct WatchManager {
    connector: Arc<dyn ClusterConnector>,
    settings: WatchSettings,
    hub: BroadcastHub,
    status: StatusHandle,
    watches: RwLock<HashMap<String, ClusterWatch>>,
}

impl WatchManager {
    pub fn new(connector: Arc<dyn ClusterConnector>, settings: WatchSettings) -> Self {
        Self {
            connector,
            settings,
            hub: BroadcastHub::new(settings.subscriber_buffer),
            status: create_status_handle(),
            watches: RwLock::new(HashMap::new()),
        }
    }

    /// Begin watching workloads in `cluster`; `None` watches every namespace
    pub async fn start_watch(&self, cluster: &str, namespace: Option<&str>) -> Result<()> {
        let mut watches = self.watches.write().await;
        if watches.contains_key(cluster) {
            return Err(WatchError::AlreadyWatching(cluster.to_string()));
        }

        let cache = Arc::new(SnapshotCache::new());
        let store = Arc::new(ObjectStore::new());
        let queue = WorkQueue::new(self.settings.queue);
        let cancel = CancellationToken::new();

        let source = EventSource::new(
            cluster,
            namespace,
            Arc::clone(&self.connector),
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&self.status),
            self.settings.source,
        );
        let producers = vec![
            tokio::spawn(source.run(cancel.clone())),
            tokio::spawn(run_resync(
                Arc::clone(&store),
                queue.clone(),
                self.settings.source.resync_interval,
                cancel.clone(),
            )),
        ];

        let reconciler = Arc::new(Reconciler::new(
            cluster,
            Arc::clone(&store),
            Arc::clone(&cache),
            self.hub.clone(),
            Arc::clone(&self.connector),
        ));
        let workers = (0..self.settings.workers.max(1))
            .map(|id| tokio::spawn(run_worker(id, queue.clone(), Arc::clone(&reconciler))))
            .collect();

        info!(
            cluster = %cluster,
            namespace = ?namespace,
            workers = self.settings.workers.max(1),
            "Watch started"
        );
        watches.insert(
            cluster.to_string(),
            ClusterWatch {
                namespace: namespace.map(String::from),
                cache,
                store,
                queue,
                cancel,
                producers,
                workers,
            },
        );
        Ok(())
    }

    /// Stop watching `cluster` and discard its cached state
    pub async fn stop_watch(&self, cluster: &str) -> Result<()> {
        let watch = self
            .watches
            .write()
            .await
            .remove(cluster)
            .ok_or_else(|| WatchError::NotFound(cluster.to_string()))?;

        debug!(cluster = %cluster, namespace = ?watch.namespace, "Stopping watch");
        watch.shutdown(cluster).await;
        self.status.stopped(cluster);
        info!(cluster = %cluster, "Watch stopped");
        Ok(())
    }

    /// Stop every watch
    pub async fn shutdown(&self) {
        let watches: Vec<_> = self.watches.write().await.drain().collect();
        for (cluster, watch) in watches {
            watch.shutdown(&cluster).await;
            self.status.stopped(&cluster);
        }
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.hub.register(filter)
    }

    /// Current instances of a workload, looked up live
    pub async fn list_instances(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<Instance>> {
        let backend = self.connector.connect(cluster).await?;
        instances::list_instances(backend.as_ref(), &ObjectKey::new(cluster, namespace, name)).await
    }

    /// Clusters currently watched, sorted
    pub async fn watched_clusters(&self) -> Vec<String> {
        let mut clusters: Vec<_> = self.watches.read().await.keys().cloned().collect();
        clusters.sort();
        clusters
    }

    /// Last reconciled state of a workload
    pub async fn snapshot(&self, key: &ObjectKey) -> Option<ObjectSnapshot> {
        self.watches
            .read()
            .await
            .get(&key.cluster)
            .and_then(|w| w.cache.get(key))
    }

    /// Keys with a cached snapshot in `cluster`, sorted
    pub async fn workloads(&self, cluster: &str) -> Vec<ObjectKey> {
        let mut keys = self
            .watches
            .read()
            .await
            .get(cluster)
            .map(|w| w.cache.keys())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn status(&self) -> broadcast::Receiver<WatchStatus> {
        self.status.subscribe()
    }
}
