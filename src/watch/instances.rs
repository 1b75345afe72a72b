// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resolve the running instances (pods) behind a workload

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use super::backend::ClusterBackend;
use super::selector::LabelSelectorQuery;
use super::types::{Instance, ObjectKey};
use crate::error::{Result, WatchError};

/// List the pods selected by a workload, sorted by name
///
/// The workload is fetched live so the selector is current even for
/// clusters that are not being watched.
pub async fn list_instances(backend: &dyn ClusterBackend, key: &ObjectKey) -> Result<Vec<Instance>> {
    let workload = backend
        .get_workload(&key.namespace, &key.name)
        .await?
        .ok_or_else(|| WatchError::NotFound(key.to_string()))?;

    let selector = workload
        .spec
        .as_ref()
        .map(|spec| &spec.selector)
        .ok_or_else(|| WatchError::malformed(key, "missing spec"))?;
    let query = LabelSelectorQuery::from_selector(selector)?;

    let pods = backend.list_pods(&key.namespace, query.as_str()).await?;
    debug!(key = %key, selector = %query, pods = pods.len(), "Resolved instances");

    let mut instances: Vec<Instance> = pods.iter().filter_map(to_instance).collect();
    instances.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(instances)
}

fn to_instance(pod: &Pod) -> Option<Instance> {
    let name = pod.metadata.name.clone()?;
    let spec = pod.spec.as_ref();
    Some(Instance {
        name,
        container_names: spec
            .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default(),
        phase: pod.status.as_ref().and_then(|s| s.phase.clone()),
        node_name: spec.and_then(|s| s.node_name.clone()),
    })
}
