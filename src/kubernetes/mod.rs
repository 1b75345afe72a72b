// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod backend;
mod client;
mod contexts;

pub use backend::KubeBackend;
pub use client::K8sClientPool;
pub use contexts::resolve_contexts;
