// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
pub mod config;
mod daemon;

use anyhow::{Result, anyhow};
use clap::Parser;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

use cli::output::{format_instances, format_record, format_status};
use cli::{Args, Command, OutputFormat};
use daemon::StreamServer;
use k8swatch::kubernetes::K8sClientPool;
use k8swatch::watch::{ClusterConnector, SubscriptionFilter, WatchManager};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool, to_stderr: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    // Create log directory
    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // File appender with size-based rotation:
    // - Max 10MB per file
    // - Keep up to 5 files (total max ~50MB)
    // - Also rotate daily
    let log_path = log_dir.join("k8swatch.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024); // 10MB

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "k8swatch=debug" } else { "k8swatch=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // File layer (always enabled)
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if to_stderr {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();

    // Always log to file (~/.k8swatch/log/k8swatch.log); -v also logs to
    // stderr, stdout carries only the change stream
    init_logging(args.verbose, args.verbose);

    let mut config = config::Config::load()?;
    let pool = Arc::new(K8sClientPool::new()?);

    // --context wins; otherwise saved contexts, then the kubeconfig default
    let saved = (!config.selected_contexts.is_empty()).then(|| config.selected_contexts.join(","));
    let contexts = pool.resolve(args.context.as_deref().or(saved.as_deref()))?;
    tracing::info!(contexts = ?contexts, namespace = ?args.namespace, "Resolved contexts");

    match &args.command {
        None => run_watch(&args, &config, pool, &contexts, None).await,
        Some(Command::Watch { workload, save }) => {
            if *save {
                config.set_selected_contexts(contexts.clone())?;
            }
            run_watch(&args, &config, pool, &contexts, workload.as_deref()).await
        }
        Some(Command::Instances { workload }) => {
            run_instances(&args, &config, pool, &contexts, workload).await
        }
        Some(Command::Daemon { port, bind }) => {
            let manager = build_manager(&config, pool);
            start_watches(&args, &manager, &contexts).await?;
            let shutdown = shutdown_on_ctrl_c();
            let server = StreamServer::new(*port, bind.clone(), Arc::clone(&manager));
            let result = server.run(shutdown).await;
            manager.shutdown().await;
            result
        }
    }
}

fn build_manager(config: &config::Config, pool: Arc<K8sClientPool>) -> Arc<WatchManager> {
    let connector: Arc<dyn ClusterConnector> = pool;
    Arc::new(WatchManager::new(connector, config.watch_settings()))
}

async fn start_watches(args: &Args, manager: &WatchManager, contexts: &[String]) -> Result<()> {
    for ctx in contexts {
        manager.start_watch(ctx, args.namespace.as_deref()).await?;
    }
    Ok(())
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
        trigger.cancel();
    });
    token
}

async fn run_watch(
    args: &Args,
    config: &config::Config,
    pool: Arc<K8sClientPool>,
    contexts: &[String],
    workload: Option<&str>,
) -> Result<()> {
    let manager = build_manager(config, pool);
    let mut status = manager.status();

    // Subscribe before any source starts
    let subscriptions: Vec<_> = contexts
        .iter()
        .map(|ctx| {
            manager.subscribe(SubscriptionFilter::new(
                ctx,
                args.namespace.as_deref(),
                workload,
            ))
        })
        .collect();
    start_watches(args, &manager, contexts).await?;

    let mut records = futures::stream::select_all(subscriptions);
    let shutdown = shutdown_on_ctrl_c();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            record = records.next() => match record {
                Some(record) => println!("{}", format_record(&record, args.output)),
                None => {
                    eprintln!("Output fell behind the change stream, exiting");
                    break;
                }
            },
            update = status.recv() => match update {
                Ok(update) => {
                    if let Some(line) = format_status(&update, args.output, args.verbose) {
                        eprintln!("{}", line);
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "Status updates lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn run_instances(
    args: &Args,
    config: &config::Config,
    pool: Arc<K8sClientPool>,
    contexts: &[String],
    workload: &str,
) -> Result<()> {
    let manager = build_manager(config, pool);
    let namespace = args.namespace.as_deref().unwrap_or("default");

    for ctx in contexts {
        let instances = manager.list_instances(ctx, namespace, workload).await?;
        if contexts.len() > 1 && args.output == OutputFormat::Text {
            println!("# {}", ctx);
        }
        println!("{}", format_instances(&instances, args.output));
    }
    Ok(())
}
