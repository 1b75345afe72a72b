// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Core data types shared by the watch pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one watched workload: (cluster, namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(cluster: &str, namespace: &str, name: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}

/// A container name and the image it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
}

/// Comparable projection of one status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSnapshot {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub last_transition_time: Option<String>,
    pub message: Option<String>,
}

/// Minimal comparable projection of a workload's spec and status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    pub replicas: i32,
    /// Containers in pod template order
    pub container_images: Vec<ContainerImage>,
    pub available_replicas: i32,
    pub conditions: Vec<ConditionSnapshot>,
    pub resource_version: String,
}

impl ObjectSnapshot {
    /// Compare every observable field group, ignoring resourceVersion
    pub fn same_state(&self, other: &ObjectSnapshot) -> bool {
        self.replicas == other.replicas
            && self.images_by_name() == other.images_by_name()
            && self.available_replicas == other.available_replicas
            && self.conditions == other.conditions
    }

    /// Container images keyed by container name, so template order does not matter
    fn images_by_name(&self) -> BTreeMap<&str, &str> {
        self.container_images
            .iter()
            .map(|c| (c.name.as_str(), c.image.as_str()))
            .collect()
    }

    /// The first container of the pod template
    pub fn primary_image(&self) -> Option<&str> {
        self.container_images.first().map(|c| c.image.as_str())
    }
}

/// One human-readable fact about a workload transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// RFC3339 reconciliation time
    pub timestamp: String,
    #[serde(rename = "objectKey")]
    pub key: ObjectKey,
    pub message: String,
}

/// Which change records a subscriber wants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub cluster: String,
    /// None = every namespace in the cluster
    #[serde(default)]
    pub namespace: Option<String>,
    /// None = every workload in the namespace
    #[serde(default)]
    pub workload: Option<String>,
}

impl SubscriptionFilter {
    pub fn new(cluster: &str, namespace: Option<&str>, workload: Option<&str>) -> Self {
        Self {
            cluster: cluster.to_string(),
            namespace: namespace.map(String::from),
            workload: workload.map(String::from),
        }
    }

    pub fn matches(&self, key: &ObjectKey) -> bool {
        self.cluster == key.cluster
            && self.namespace.as_ref().is_none_or(|ns| *ns == key.namespace)
            && self.workload.as_ref().is_none_or(|w| *w == key.name)
    }
}

/// A running pod selected by a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub container_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}
