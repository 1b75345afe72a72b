// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "k8swatch")]
#[command(author, version, about = "Watch Kubernetes workloads and stream their changes")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Kubernetes context(s) to watch. Supports comma-separated list and glob patterns.
    /// Examples: -c prod, -c "prod,staging", -c "prod-*"
    #[arg(short, long, value_name = "CONTEXT", global = true)]
    pub context: Option<String>,

    /// Namespace to watch (all namespaces when omitted)
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream workload changes (default)
    Watch {
        /// Only show changes for this workload
        #[arg(short, long)]
        workload: Option<String>,

        /// Remember the resolved contexts as the default for later runs
        #[arg(long)]
        save: bool,
    },

    /// List the running instances of a workload
    Instances {
        /// Workload name
        workload: String,
    },

    /// Start daemon mode (newline-delimited JSON change stream over TCP)
    Daemon {
        /// Port to listen on
        #[arg(short, long, default_value = "15480")]
        port: u16,

        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
