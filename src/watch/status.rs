// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Watch health reporting
//!
//! Lets the owning process follow each cluster's watch: connection progress,
//! initial sync, and persistent connection failures that make that cluster's
//! data stale.

use std::sync::Arc;
use tokio::sync::broadcast;

/// Watch status message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchStatus {
    /// Connecting to a cluster
    Connecting { cluster: String },
    /// Watch stream established
    Connected { cluster: String, elapsed_ms: u64 },
    /// A full list completed
    Synced { cluster: String, objects: usize },
    /// Repeated connection failures, cached data may be out of date
    Stale {
        cluster: String,
        consecutive_failures: u32,
        error: String,
    },
    /// Watch healthy again after being stale
    Recovered { cluster: String },
    /// Watch stopped
    Stopped { cluster: String },
}

impl WatchStatus {
    pub fn cluster(&self) -> &str {
        match self {
            Self::Connecting { cluster }
            | Self::Connected { cluster, .. }
            | Self::Synced { cluster, .. }
            | Self::Stale { cluster, .. }
            | Self::Recovered { cluster }
            | Self::Stopped { cluster } => cluster,
        }
    }
}

/// Broadcasts status updates to any number of listeners
pub struct WatchStatusReporter {
    sender: broadcast::Sender<WatchStatus>,
}

impl WatchStatusReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> broadcast::Receiver<WatchStatus> {
        self.sender.subscribe()
    }

    pub fn connecting(&self, cluster: &str) {
        let _ = self.sender.send(WatchStatus::Connecting {
            cluster: cluster.to_string(),
        });
    }

    pub fn connected(&self, cluster: &str, elapsed_ms: u64) {
        let _ = self.sender.send(WatchStatus::Connected {
            cluster: cluster.to_string(),
            elapsed_ms,
        });
    }

    pub fn synced(&self, cluster: &str, objects: usize) {
        let _ = self.sender.send(WatchStatus::Synced {
            cluster: cluster.to_string(),
            objects,
        });
    }

    pub fn stale(&self, cluster: &str, consecutive_failures: u32, error: &str) {
        let _ = self.sender.send(WatchStatus::Stale {
            cluster: cluster.to_string(),
            consecutive_failures,
            error: error.to_string(),
        });
    }

    pub fn recovered(&self, cluster: &str) {
        let _ = self.sender.send(WatchStatus::Recovered {
            cluster: cluster.to_string(),
        });
    }

    pub fn stopped(&self, cluster: &str) {
        let _ = self.sender.send(WatchStatus::Stopped {
            cluster: cluster.to_string(),
        });
    }
}

impl Default for WatchStatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to the status reporter
pub type StatusHandle = Arc<WatchStatusReporter>;

pub fn create_status_handle() -> StatusHandle {
    Arc::new(WatchStatusReporter::new())
}
