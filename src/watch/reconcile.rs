// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-key reconciliation and the worker loop that drives it
//!
//! A worker takes a key from the queue, compares the latest delivered object
//! with the cached snapshot, publishes the resulting change records and
//! updates the cache. Since the queue hands a key to one worker at a time, no
//! two passes for the same key ever touch the cache concurrently.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::backend::{ClusterBackend, ClusterConnector};
use super::cache::{LatestObject, ObjectStore, SnapshotCache};
use super::diff;
use super::hub::BroadcastHub;
use super::queue::WorkQueue;
use super::types::{ChangeRecord, ObjectKey};
use crate::error::{Result, WatchError};

/// What one reconciliation pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Records were emitted (possibly none for a no-op update)
    Updated(usize),
    Removed,
    /// Malformed object; cache left untouched
    Skipped,
    /// Nothing known about the key
    Unknown,
}

/// Reconciles keys of one cluster
pub struct Reconciler {
    cluster: String,
    store: Arc<ObjectStore>,
    cache: Arc<SnapshotCache>,
    hub: BroadcastHub,
    connector: Arc<dyn ClusterConnector>,
    /// Backend for live delete confirmation, connected on first use
    backend: OnceCell<Arc<dyn ClusterBackend>>,
}

impl Reconciler {
    pub fn new(
        cluster: &str,
        store: Arc<ObjectStore>,
        cache: Arc<SnapshotCache>,
        hub: BroadcastHub,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            store,
            cache,
            hub,
            connector,
            backend: OnceCell::new(),
        }
    }

    /// Run one pass for `key`
    ///
    /// Returns a retryable error only when an inferred delete could not be
    /// confirmed against the cluster.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        match self.store.get(key) {
            Some(LatestObject::Present(obj)) => Ok(self.apply(key, &obj)),
            Some(LatestObject::Deleted) => Ok(self.remove(key)),
            Some(LatestObject::Vanished) => self.confirm_vanished(key).await,
            None if self.cache.contains(key) => Ok(self.remove(key)),
            None => Ok(Outcome::Unknown),
        }
    }

    fn apply(&self, key: &ObjectKey, obj: &Deployment) -> Outcome {
        let snapshot = match diff::project(key, obj) {
            Ok(s) => s,
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping malformed workload");
                return Outcome::Skipped;
            }
        };

        let now = Utc::now();
        let records = match self.cache.get(key) {
            None => vec![diff::initiated(key, &snapshot, now)],
            Some(prev) => diff::diff(key, &prev, &snapshot, now),
        };

        self.cache.put(key.clone(), snapshot);
        self.publish(&records);
        Outcome::Updated(records.len())
    }

    fn remove(&self, key: &ObjectKey) -> Outcome {
        if self.cache.contains(key) {
            // Record goes out before the entry disappears
            self.publish(&[diff::removed(key, Utc::now())]);
            self.cache.remove(key);
        }
        self.store.forget_tombstone(key);
        Outcome::Removed
    }

    /// The key was missing from a re-list; check the cluster before dropping it
    async fn confirm_vanished(&self, key: &ObjectKey) -> Result<Outcome> {
        let backend = self.backend().await?;
        let live = match backend.get_workload(&key.namespace, &key.name).await {
            Ok(live) => live,
            Err(WatchError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        match live {
            Some(obj) if self.store.restore_if_vanished(key, obj.clone()) => {
                debug!(key = %key, "Workload still exists after re-list");
                Ok(self.apply(key, &obj))
            }
            None if matches!(self.store.get(key), Some(LatestObject::Vanished)) => {
                Ok(self.remove(key))
            }
            // The event source delivered something newer during the lookup
            _ => match self.store.get(key) {
                Some(LatestObject::Present(obj)) => {
                    debug!(key = %key, "Newer event arrived while confirming re-list");
                    Ok(self.apply(key, &obj))
                }
                _ => Ok(self.remove(key)),
            },
        }
    }

    async fn backend(&self) -> Result<Arc<dyn ClusterBackend>> {
        self.backend
            .get_or_try_init(|| self.connector.connect(&self.cluster))
            .await
            .cloned()
    }

    fn publish(&self, records: &[ChangeRecord]) {
        for record in records {
            let report = self.hub.publish(record);
            debug!(
                key = %record.key,
                message = %record.message,
                delivered = report.delivered,
                dropped = report.dropped,
                "Published change"
            );
        }
    }
}

/// Pull keys until the queue shuts down
pub async fn run_worker(id: usize, queue: WorkQueue<ObjectKey>, reconciler: Arc<Reconciler>) {
    debug!(worker = id, "Reconcile worker started");
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(outcome) => {
                debug!(worker = id, key = %key, outcome = ?outcome, "Reconciled");
                queue.forget(&key);
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    worker = id,
                    key = %key,
                    attempt = queue.num_requeues(&key) + 1,
                    error = %e,
                    "Reconcile failed, requeueing"
                );
                queue.add_rate_limited(key.clone());
            }
            Err(e) => {
                warn!(worker = id, key = %key, error = %e, "Reconcile failed");
                queue.forget(&key);
            }
        }
        queue.done(&key);
    }
    info!(worker = id, "Reconcile worker stopped");
}
