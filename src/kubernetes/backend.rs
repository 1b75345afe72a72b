// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes API backend for one cluster context

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, WatchError};
use crate::watch::{ClusterBackend, WatchEvent, WatchStream};

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

pub struct KubeBackend {
    context: String,
    client: Client,
}

impl KubeBackend {
    pub fn new(context: &str, client: Client) -> Self {
        Self {
            context: context.to_string(),
            client,
        }
    }

    fn deployments(&self, namespace: Option<&str>) -> Api<Deployment> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Run a request, retrying transient failures with exponential backoff
    async fn with_retry<T, F, Fut>(&self, op: &str, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = kube::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable_error(&e) && attempt + 1 < MAX_RETRIES => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        op = %op,
                        context = %self.context,
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(op = %op, context = %self.context, error = %e, "Request failed");
                    return Err(WatchError::from_kube(&self.context, e));
                }
            }
        }
    }
}

/// Network errors and API 429/503/504 are worth retrying
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::HyperError(_) => true,
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}

fn to_watch_event(event: watcher::Event<Deployment>) -> WatchEvent {
    match event {
        watcher::Event::Apply(obj) => WatchEvent::Applied(obj),
        watcher::Event::Delete(obj) => WatchEvent::Deleted(obj),
        watcher::Event::Init => WatchEvent::RelistStarted,
        watcher::Event::InitApply(obj) => WatchEvent::Relisted(obj),
        watcher::Event::InitDone => WatchEvent::RelistDone,
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    fn watch_workloads(&self, namespace: Option<&str>) -> WatchStream {
        let context = self.context.clone();
        watcher(self.deployments(namespace), watcher::Config::default())
            .default_backoff()
            .map(move |item| {
                item.map(to_watch_event)
                    .map_err(|e| WatchError::connection(&context, e))
            })
            .boxed()
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api = self.deployments(Some(namespace));
        self.with_retry("get_workload", || api.get_opt(name)).await
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut pods = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = ListParams::default().labels(label_selector).limit(PAGE_SIZE);
            if let Some(ref token) = continue_token {
                params = params.continue_token(token);
            }

            let page = self.with_retry("list_pods", || api.list(&params)).await?;
            pods.extend(page.items);

            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        debug!(
            context = %self.context,
            namespace = %namespace,
            selector = %label_selector,
            count = pods.len(),
            "Listed pods"
        );
        Ok(pods)
    }
}
