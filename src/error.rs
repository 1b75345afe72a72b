// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for the watch pipeline
//!
//! Connection failures are retried and only escalated when they persist.
//! Malformed objects and delivery failures stay local to one key or one
//! subscriber. NotFound is what query callers see for missing workloads.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// Cluster unreachable or watch stream dropped
    #[error("cluster '{cluster}' unreachable: {message}")]
    Connection { cluster: String, message: String },

    /// Object could not be projected into a snapshot
    #[error("malformed object {key}: {reason}")]
    MalformedObject { key: String, reason: String },

    /// Subscriber could not accept a record
    #[error("delivery to subscription {subscription} failed")]
    Delivery { subscription: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster '{0}' is already being watched")]
    AlreadyWatching(String),

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),
}

impl WatchError {
    pub fn connection(cluster: &str, message: impl ToString) -> Self {
        Self::Connection {
            cluster: cluster.to_string(),
            message: message.to_string(),
        }
    }

    pub fn malformed(key: impl ToString, reason: impl ToString) -> Self {
        Self::MalformedObject {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Transient failures worth another attempt after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Classify a kube API error for the given cluster
    ///
    /// 404 becomes NotFound, everything else is treated as a connection
    /// problem with that cluster.
    pub fn from_kube(cluster: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(api_err) if api_err.code == 404 => {
                Self::NotFound(format!("{} ({})", api_err.message, cluster))
            }
            _ => Self::connection(cluster, err),
        }
    }
}

/// Result type for watch pipeline operations
pub type Result<T> = std::result::Result<T, WatchError>;
