// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::backend::KubeBackend;
use super::contexts::resolve_contexts;
use crate::error::WatchError;
use crate::watch::{ClusterBackend, ClusterConnector};

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
///
/// Watch requests are long-polls bounded by the server-side timeout, so this
/// only has to cover a stalled connection.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection pool for multiple Kubernetes clusters
/// Caches clients by context name
pub struct K8sClientPool {
    kubeconfig: Kubeconfig,
    clients: Arc<RwLock<HashMap<String, Client>>>,
}

impl K8sClientPool {
    /// Load the kubeconfig without connecting (fast, no network I/O)
    pub fn new() -> Result<Self> {
        let kubeconfig = Kubeconfig::read()?;
        Ok(Self {
            kubeconfig,
            clients: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn list_contexts(&self) -> Vec<String> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn current_context(&self) -> Result<String> {
        self.kubeconfig
            .current_context
            .clone()
            .ok_or_else(|| anyhow!("No context specified and no current context in kubeconfig"))
    }

    /// Resolve a context argument (names, globs, comma-separated)
    /// Falls back to the kubeconfig current context when nothing is given
    pub fn resolve(&self, spec: Option<&str>) -> Result<Vec<String>> {
        match spec {
            Some(spec) => resolve_contexts(spec, &self.list_contexts()),
            None => Ok(vec![self.current_context()?]),
        }
    }

    async fn get_or_create_client(&self, context: &str) -> crate::error::Result<Client> {
        // Check if we already have a client
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(context) {
                return Ok(client.clone());
            }
        }

        if !self.kubeconfig.contexts.iter().any(|c| c.name == context) {
            return Err(WatchError::connection(
                context,
                "context not found in kubeconfig",
            ));
        }

        let start = std::time::Instant::now();
        let mut config = Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| WatchError::connection(context, format!("failed to load kubeconfig: {}", e)))?;

        // Set timeouts for reliability
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let client = Client::try_from(config)
            .map_err(|e| WatchError::connection(context, format!("failed to create client: {}", e)))?;

        info!(
            context = %context,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Created cluster client"
        );

        let mut clients = self.clients.write().await;
        Ok(clients
            .entry(context.to_string())
            .or_insert(client)
            .clone())
    }
}

#[async_trait]
impl ClusterConnector for K8sClientPool {
    async fn connect(&self, cluster: &str) -> crate::error::Result<Arc<dyn ClusterBackend>> {
        let client = self.get_or_create_client(cluster).await?;
        debug!(context = %cluster, "Cluster backend ready");
        Ok(Arc::new(KubeBackend::new(cluster, client)))
    }
}
