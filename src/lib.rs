// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Live workload change streams for Kubernetes clusters
//!
//! [`watch::WatchManager`] watches workloads per cluster, reconciles every
//! change against a local snapshot cache and fans the resulting change
//! records out to subscribers. [`kubernetes::K8sClientPool`] connects it to
//! real clusters through kubeconfig contexts.

pub mod error;
pub mod kubernetes;
pub mod watch;
