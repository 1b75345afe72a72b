// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration persistence for k8swatch
//!
//! All k8swatch data is stored under ~/.k8swatch/:
//! - ~/.k8swatch/config.json - user configuration
//! - ~/.k8swatch/log/ - rolling log files

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use k8swatch::watch::{QueueConfig, SourceSettings, WatchSettings};

/// Get the base k8swatch directory (~/.k8swatch/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".k8swatch"))
        .context("Could not determine home directory")
}

/// k8swatch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Contexts watched when no --context is given
    pub selected_contexts: Vec<String>,
    /// Reconcile workers per cluster
    pub workers: usize,
    pub resync_interval_secs: u64,
    /// Records buffered per subscriber before it is disconnected
    pub subscriber_buffer: usize,
    /// Consecutive connection failures before a cluster is reported stale
    pub stale_after_failures: u32,
    pub queue_base_delay_ms: u64,
    pub queue_max_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            selected_contexts: Vec::new(),
            workers: 2,
            resync_interval_secs: 300,
            subscriber_buffer: 256,
            stale_after_failures: 5,
            queue_base_delay_ms: 5,
            queue_max_delay_secs: 1000,
        }
    }
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get the config file path (~/.k8swatch/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    /// Update selected contexts and save
    pub fn set_selected_contexts(&mut self, contexts: Vec<String>) -> Result<()> {
        self.selected_contexts = contexts;
        self.save()
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.workers > 0, "workers must be at least 1");
        ensure!(self.resync_interval_secs > 0, "resync_interval_secs must be positive");
        ensure!(self.subscriber_buffer > 0, "subscriber_buffer must be at least 1");
        ensure!(
            self.queue_base_delay_ms <= self.queue_max_delay_secs.saturating_mul(1000),
            "queue_base_delay_ms exceeds queue_max_delay_secs"
        );
        Ok(())
    }

    /// Pipeline settings derived from this config
    pub fn watch_settings(&self) -> WatchSettings {
        let defaults = WatchSettings::default();
        WatchSettings {
            workers: self.workers,
            source: SourceSettings {
                resync_interval: Duration::from_secs(self.resync_interval_secs),
                stale_after_failures: self.stale_after_failures,
                ..defaults.source
            },
            queue: QueueConfig {
                base_delay: Duration::from_millis(self.queue_base_delay_ms),
                max_delay: Duration::from_secs(self.queue_max_delay_secs),
            },
            subscriber_buffer: self.subscriber_buffer,
        }
    }
}
