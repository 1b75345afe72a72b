// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Workload watch pipeline: event source, work queue, reconcilers and fan-out

pub mod backend;
pub mod cache;
pub mod diff;
pub mod hub;
pub mod instances;
pub mod manager;
pub mod queue;
pub mod reconcile;
pub mod selector;
pub mod source;
pub mod status;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{ClusterBackend, ClusterConnector, WatchEvent, WatchStream};
pub use hub::{BroadcastHub, PublishReport, Subscription};
pub use manager::{WatchManager, WatchSettings};
pub use queue::QueueConfig;
pub use source::SourceSettings;
pub use status::{WatchStatus, WatchStatusReporter};
pub use types::{ChangeRecord, Instance, ObjectKey, ObjectSnapshot, SubscriptionFilter};
