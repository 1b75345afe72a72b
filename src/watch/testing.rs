// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory cluster used by the pipeline tests

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};

use super::backend::{ClusterBackend, ClusterConnector, WatchEvent, WatchStream};
use crate::error::{Result, WatchError};

type EventItem = Result<WatchEvent>;

struct FakeState {
    tx: mpsc::UnboundedSender<EventItem>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<EventItem>>>,
    sent: AtomicUsize,
    consumed: Arc<AtomicUsize>,
    reachable: AtomicBool,
    connect_attempts: AtomicUsize,
    lookups: AtomicUsize,
    lookup_gate: Mutex<Option<Arc<Notify>>>,
    workloads: Mutex<HashMap<(String, String), Deployment>>,
    pods: Mutex<Vec<Pod>>,
}

/// A fake cluster: scripted watch events plus live workloads and pods
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(FakeState {
                tx,
                rx: Mutex::new(Some(rx)),
                sent: AtomicUsize::new(0),
                consumed: Arc::new(AtomicUsize::new(0)),
                reachable: AtomicBool::new(true),
                connect_attempts: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
                lookup_gate: Mutex::new(None),
                workloads: Mutex::new(HashMap::new()),
                pods: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn connector(&self) -> Arc<dyn ClusterConnector> {
        Arc::new(self.clone())
    }

    /// Push a raw watch event
    pub fn send(&self, event: WatchEvent) {
        self.state.sent.fetch_add(1, Ordering::SeqCst);
        self.state.tx.send(Ok(event)).unwrap();
    }

    /// Push a watch stream error
    pub fn fail(&self, message: &str) {
        self.state.sent.fetch_add(1, Ordering::SeqCst);
        self.state
            .tx
            .send(Err(WatchError::connection("fake", message)))
            .unwrap();
    }

    /// Create or update a workload and emit the matching watch event
    pub fn apply(&self, deployment: Deployment) {
        self.state
            .workloads
            .lock()
            .unwrap()
            .insert(workload_id(&deployment), deployment.clone());
        self.send(WatchEvent::Applied(deployment));
    }

    /// Delete a workload and emit the matching watch event
    pub fn delete(&self, deployment: Deployment) {
        self.state
            .workloads
            .lock()
            .unwrap()
            .remove(&workload_id(&deployment));
        self.send(WatchEvent::Deleted(deployment));
    }

    /// Change a workload without emitting an event (as if the event was lost)
    pub fn apply_silently(&self, deployment: Deployment) {
        self.state
            .workloads
            .lock()
            .unwrap()
            .insert(workload_id(&deployment), deployment);
    }

    /// Remove a workload without emitting an event
    pub fn delete_silently(&self, deployment: &Deployment) {
        self.state
            .workloads
            .lock()
            .unwrap()
            .remove(&workload_id(deployment));
    }

    pub fn add_pod(&self, name: &str, namespace: &str, labels: &[(&str, &str)], containers: &[&str]) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|c| Container {
                        name: c.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                node_name: Some("node-1".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        };
        self.state.pods.lock().unwrap().push(pod);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Make every later `get_workload` wait for a permit on the returned gate
    pub fn hold_lookups(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.lookup_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Number of `get_workload` calls made so far, held or not
    pub fn lookups(&self) -> usize {
        self.state.lookups.load(Ordering::SeqCst)
    }

    /// Wait until every sent event has been pulled from the watch stream
    pub async fn settle(&self) {
        for _ in 0..10_000 {
            if self.state.consumed.load(Ordering::SeqCst) >= self.state.sent.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WatchError::connection("fake", "connection refused"))
        }
    }
}

fn workload_id(deployment: &Deployment) -> (String, String) {
    (
        deployment
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        deployment.metadata.name.clone().unwrap_or_default(),
    )
}

/// Equality-only selector evaluation, enough for matchLabels fixtures
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => labels.and_then(|l| l.get(k)).is_some_and(|actual| actual == v),
        None => false,
    })
}

#[async_trait]
impl ClusterBackend for FakeCluster {
    fn watch_workloads(&self, _namespace: Option<&str>) -> WatchStream {
        let rx = self.state.rx.lock().unwrap().take();
        let consumed = Arc::clone(&self.state.consumed);
        match rx {
            Some(rx) => Box::pin(futures::stream::unfold(rx, move |mut rx| {
                let consumed = Arc::clone(&consumed);
                async move {
                    let item = rx.recv().await?;
                    consumed.fetch_add(1, Ordering::SeqCst);
                    Some((item, rx))
                }
            })),
            None => Box::pin(futures::stream::pending::<EventItem>()),
        }
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        self.state.lookups.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.lookup_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_reachable()?;
        Ok(self
            .state
            .workloads
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        self.check_reachable()?;
        Ok(self
            .state
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| selector_matches(label_selector, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ClusterConnector for FakeCluster {
    async fn connect(&self, cluster: &str) -> Result<Arc<dyn ClusterBackend>> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(WatchError::connection(cluster, "connection refused"));
        }
        Ok(Arc::new(self.clone()))
    }
}
