// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Snapshot projection and field-level diffing
//!
//! A Deployment is reduced to an [`ObjectSnapshot`] holding only the fields a
//! viewer cares about. Two snapshots are compared per field group, and each
//! group that differs yields one [`ChangeRecord`]:
//!
//! | Group              | Message                                   |
//! |--------------------|-------------------------------------------|
//! | replica count      | `Replicas changed: 3`                     |
//! | container image    | `Image changed: nginx:1.20`               |
//! | available replicas | `Available replicas changed: 2`           |
//! | conditions         | `Conditions changed: Available=True, ...` |

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;

use super::types::{ChangeRecord, ConditionSnapshot, ContainerImage, ObjectKey, ObjectSnapshot};
use crate::error::{Result, WatchError};

/// Replica count the API server assumes when spec.replicas is unset
const DEFAULT_REPLICAS: i32 = 1;

/// Format a reconciliation time the way records carry it
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Project a Deployment into its comparable snapshot
pub fn project(key: &ObjectKey, deployment: &Deployment) -> Result<ObjectSnapshot> {
    if deployment.metadata.name.is_none() {
        return Err(WatchError::malformed(key, "missing metadata.name"));
    }

    let spec = deployment
        .spec
        .as_ref()
        .ok_or_else(|| WatchError::malformed(key, "missing spec"))?;

    let pod_spec = spec
        .template
        .spec
        .as_ref()
        .ok_or_else(|| WatchError::malformed(key, "missing spec.template.spec"))?;

    if pod_spec.containers.is_empty() {
        return Err(WatchError::malformed(key, "pod template has no containers"));
    }

    let container_images = pod_spec
        .containers
        .iter()
        .map(|c| ContainerImage {
            name: c.name.clone(),
            image: c.image.clone().unwrap_or_default(),
        })
        .collect();

    let status = deployment.status.as_ref();
    let conditions = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .map(|c| ConditionSnapshot {
                    type_: c.type_.clone(),
                    status: c.status.clone(),
                    last_transition_time: c.last_transition_time.as_ref().and_then(time_string),
                    message: c.message.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ObjectSnapshot {
        replicas: spec.replicas.unwrap_or(DEFAULT_REPLICAS),
        container_images,
        available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        conditions,
        resource_version: deployment
            .metadata
            .resource_version
            .clone()
            .unwrap_or_default(),
    })
}

/// Render an API timestamp through its own serializer (RFC3339)
fn time_string<T: serde::Serialize>(time: &T) -> Option<String> {
    serde_json::to_value(time)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
}

fn record(key: &ObjectKey, now: DateTime<Utc>, message: String) -> ChangeRecord {
    ChangeRecord {
        timestamp: format_timestamp(now),
        key: key.clone(),
        message,
    }
}

/// Summary record for a workload seen for the first time
pub fn initiated(key: &ObjectKey, snapshot: &ObjectSnapshot, now: DateTime<Utc>) -> ChangeRecord {
    record(
        key,
        now,
        format!(
            "Workload {} initiated with replicas: {}, image: {}",
            key.name,
            snapshot.replicas,
            snapshot.primary_image().unwrap_or("<none>")
        ),
    )
}

/// Record for a deleted workload
pub fn removed(key: &ObjectKey, now: DateTime<Utc>) -> ChangeRecord {
    record(key, now, format!("Workload {} deleted", key.name))
}

/// Compare two snapshots, one record per differing field group
pub fn diff(
    key: &ObjectKey,
    prev: &ObjectSnapshot,
    curr: &ObjectSnapshot,
    now: DateTime<Utc>,
) -> Vec<ChangeRecord> {
    let mut records = Vec::new();

    if prev.replicas != curr.replicas {
        records.push(record(
            key,
            now,
            format!("Replicas changed: {}", curr.replicas),
        ));
    }

    let single_container = curr.container_images.len() == 1;
    for container in &curr.container_images {
        let before = prev
            .container_images
            .iter()
            .find(|c| c.name == container.name);
        let message = match before {
            None => format!("Container added: {} ({})", container.name, container.image),
            Some(c) if c.image == container.image => continue,
            Some(_) if single_container => format!("Image changed: {}", container.image),
            Some(_) => format!(
                "Image changed: {} (container {})",
                container.image, container.name
            ),
        };
        records.push(record(key, now, message));
    }
    for container in &prev.container_images {
        if !curr.container_images.iter().any(|c| c.name == container.name) {
            records.push(record(
                key,
                now,
                format!("Container removed: {}", container.name),
            ));
        }
    }

    if prev.available_replicas != curr.available_replicas {
        records.push(record(
            key,
            now,
            format!("Available replicas changed: {}", curr.available_replicas),
        ));
    }

    if prev.conditions != curr.conditions {
        records.push(record(
            key,
            now,
            format!("Conditions changed: {}", summarize_conditions(&curr.conditions)),
        ));
    }

    records
}

fn summarize_conditions(conditions: &[ConditionSnapshot]) -> String {
    if conditions.is_empty() {
        return "none".to_string();
    }
    conditions
        .iter()
        .map(|c| format!("{}={}", c.type_, c.status))
        .collect::<Vec<_>>()
        .join(", ")
}
