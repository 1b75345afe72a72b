// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cluster-facing interfaces consumed by the pipeline
//!
//! The pipeline never talks to the Kubernetes API directly. It asks a
//! [`ClusterConnector`] for a [`ClusterBackend`] per cluster, which provides
//! the workload watch stream and the live lookups used by the instance
//! correlator and delete confirmation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;

use crate::error::Result;

/// One notification from a workload watch
///
/// A (re)connect produces `RelistStarted`, one `Relisted` per existing object,
/// then `RelistDone`. Incremental changes arrive as `Applied` or `Deleted`.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Applied(Deployment),
    Deleted(Deployment),
    RelistStarted,
    Relisted(Deployment),
    RelistDone,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Access to one cluster's workloads and pods
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Long-lived workload watch; `None` watches every namespace
    fn watch_workloads(&self, namespace: Option<&str>) -> WatchStream;

    /// Fetch one workload live. `Ok(None)` if it does not exist.
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// List pods matching a label selector query
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;
}

/// Resolves a canonical cluster identifier to a usable backend
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Fails with [`WatchError::Connection`](crate::error::WatchError::Connection)
    /// when the cluster cannot be reached or its credentials cannot be loaded
    async fn connect(&self, cluster: &str) -> Result<Arc<dyn ClusterBackend>>;
}
