// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory state for one watched cluster
//!
//! Two tables keyed by [`ObjectKey`]:
//! - [`SnapshotCache`]: last reconciled snapshot per workload ("previous state")
//! - [`ObjectStore`]: latest object delivered by the event source ("current state")
//!
//! Both are sharded maps, so inserts and removals for different keys do not
//! contend. Exclusive access to a single key comes from the work queue: a key
//! is only handed to one worker at a time.

use dashmap::DashMap;
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::HashSet;
use std::sync::Arc;

use super::types::{ObjectKey, ObjectSnapshot};

/// Last-known snapshot per workload
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: DashMap<ObjectKey, ObjectSnapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<ObjectSnapshot> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Insert or overwrite the snapshot for a key
    pub fn put(&self, key: ObjectKey, snapshot: ObjectSnapshot) {
        self.entries.insert(key, snapshot);
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<ObjectSnapshot> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// What the event source last said about a key
#[derive(Debug, Clone)]
pub enum LatestObject {
    Present(Arc<Deployment>),
    /// Explicit delete event
    Deleted,
    /// Missing from a full re-list; the delete event itself was never seen
    Vanished,
}

/// Latest object per key as delivered by the event source
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: DashMap<ObjectKey, LatestObject>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, key: ObjectKey, object: Deployment) {
        self.objects
            .insert(key, LatestObject::Present(Arc::new(object)));
    }

    pub fn mark_deleted(&self, key: ObjectKey) {
        self.objects.insert(key, LatestObject::Deleted);
    }

    /// Mark every present key not in `seen` as vanished, returning those keys
    pub fn mark_vanished_except(&self, seen: &HashSet<ObjectKey>) -> Vec<ObjectKey> {
        let mut vanished = Vec::new();
        for mut entry in self.objects.iter_mut() {
            if matches!(entry.value(), LatestObject::Present(_)) && !seen.contains(entry.key()) {
                *entry.value_mut() = LatestObject::Vanished;
                vanished.push(entry.key().clone());
            }
        }
        vanished
    }

    /// Put a live object back for a vanished key
    ///
    /// Returns false, leaving the entry alone, if the event source has
    /// replaced the `Vanished` marker since.
    pub fn restore_if_vanished(&self, key: &ObjectKey, object: Deployment) -> bool {
        match self.objects.get_mut(key) {
            Some(mut entry) if matches!(entry.value(), LatestObject::Vanished) => {
                *entry.value_mut() = LatestObject::Present(Arc::new(object));
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<LatestObject> {
        self.objects.get(key).map(|e| e.value().clone())
    }

    /// Drop a tombstone once the delete has been reconciled
    ///
    /// Leaves the entry alone if the object came back in the meantime.
    pub fn forget_tombstone(&self, key: &ObjectKey) {
        self.objects
            .remove_if(key, |_, v| !matches!(v, LatestObject::Present(_)));
    }

    /// Keys whose object currently exists
    pub fn present_keys(&self) -> Vec<ObjectKey> {
        self.objects
            .iter()
            .filter(|e| matches!(e.value(), LatestObject::Present(_)))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn clear(&self) {
        self.objects.clear();
    }
}
