// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Change stream server
//!
//! Protocol: the client sends one JSON line with a subscription filter
//! (`{"cluster": "...", "namespace": "...", "workload": "..."}`), the server
//! answers with `{"subscribed": <id>}` or `{"error": "..."}` and then writes
//! one JSON change record per line until either side goes away.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use k8swatch::watch::{Subscription, SubscriptionFilter, WatchManager};

/// How long a new client has to send its subscription request
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A client that cannot take a line within this time is disconnected
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Newline-delimited JSON change stream server for k8swatch
pub struct StreamServer {
    port: u16,
    bind_address: String,
    manager: Arc<WatchManager>,
}

impl StreamServer {
    pub fn new(port: u16, bind_address: String, manager: Arc<WatchManager>) -> Self {
        Self {
            port,
            bind_address,
            manager,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let server_addr = format!("{}:{}", self.bind_address, self.port);
        let listener = TcpListener::bind(&server_addr)
            .await
            .with_context(|| format!("Failed to bind {}", server_addr))?;

        tracing::info!("Change stream server listening on {}", server_addr);
        println!("k8swatch daemon listening on {}", server_addr);
        println!(
            "Subscribe with: echo '{{\"cluster\":\"<context>\"}}' | nc {} {}",
            self.bind_address, self.port
        );

        loop {
            let (socket, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            let manager = Arc::clone(&self.manager);

            tracing::debug!("New connection from {}", peer_addr);

            tokio::spawn(async move {
                let watched = manager.watched_clusters().await;
                if let Err(e) = serve_client(socket, &watched, |f| manager.subscribe(f)).await {
                    tracing::error!("Connection error from {}: {}", peer_addr, e);
                }
                tracing::debug!("Connection from {} closed", peer_addr);
            });
        }

        Ok(())
    }
}

async fn serve_client<S, F>(stream: S, watched: &[String], subscribe: F) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(SubscriptionFilter) -> Subscription,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    let request = timeout(HANDSHAKE_TIMEOUT, lines.next_line())
        .await
        .map_err(|_| anyhow!("No subscription request within {:?}", HANDSHAKE_TIMEOUT))?
        .context("Failed to read subscription request")?;
    let Some(request) = request else {
        return Ok(());
    };

    let filter: SubscriptionFilter = match serde_json::from_str(&request) {
        Ok(filter) => filter,
        Err(e) => {
            let reply = json!({ "error": format!("invalid subscription request: {}", e) });
            return write_line(&mut writer, &reply).await;
        }
    };
    if !watched.contains(&filter.cluster) {
        let reply = json!({ "error": format!("cluster '{}' is not watched", filter.cluster) });
        return write_line(&mut writer, &reply).await;
    }

    let mut subscription = subscribe(filter);
    write_line(&mut writer, &json!({ "subscribed": subscription.id() })).await?;

    loop {
        tokio::select! {
            record = subscription.recv() => match record {
                Some(record) => write_line(&mut writer, &record).await?,
                None => {
                    tracing::warn!(
                        subscription = subscription.id(),
                        "Subscriber fell behind and was disconnected"
                    );
                    break;
                }
            },
            // Anything after the request is ignored; EOF ends the session
            line = lines.next_line() => match line {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            },
        }
    }

    Ok(())
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = serde_json::to_vec(value).context("Failed to serialize message")?;
    buf.push(b'\n');
    timeout(WRITE_TIMEOUT, async {
        writer.write_all(&buf).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| anyhow!("Write timed out after {:?}", WRITE_TIMEOUT))?
    .context("Failed to write to client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8swatch::watch::{BroadcastHub, ChangeRecord, ObjectKey};
    use tokio::io::DuplexStream;
    use tokio::io::{Lines, ReadHalf, WriteHalf};

    type Client = (Lines<BufReader<ReadHalf<DuplexStream>>>, WriteHalf<DuplexStream>);

    fn record(workload: &str) -> ChangeRecord {
        ChangeRecord {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            key: ObjectKey::new("prod", "default", workload),
            message: "Replicas changed: 2".to_string(),
        }
    }

    fn connect(hub: &BroadcastHub) -> (Client, tokio::task::JoinHandle<Result<()>>) {
        let (client, server) = tokio::io::duplex(4096);
        let hub = hub.clone();
        let task = tokio::spawn(async move {
            serve_client(server, &["prod".to_string()], move |f| hub.register(f)).await
        });
        let (r, w) = tokio::io::split(client);
        ((BufReader::new(r).lines(), w), task)
    }

    #[tokio::test]
    async fn test_streams_matching_records() {
        let hub = BroadcastHub::default();
        let ((mut lines, mut w), task) = connect(&hub);

        w.write_all(b"{\"cluster\":\"prod\",\"workload\":\"web\"}\n")
            .await
            .unwrap();
        let ack = lines.next_line().await.unwrap().unwrap();
        assert!(ack.contains("subscribed"));

        hub.publish(&record("api"));
        hub.publish(&record("web"));
        let line = lines.next_line().await.unwrap().unwrap();
        let received: ChangeRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(received.key.name, "web");

        drop(lines);
        drop(w);
        task.await.unwrap().unwrap();
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_unwatched_cluster() {
        let hub = BroadcastHub::default();
        let ((mut lines, mut w), task) = connect(&hub);

        w.write_all(b"{\"cluster\":\"staging\"}\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.contains("not watched"));
        task.await.unwrap().unwrap();
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_malformed_request() {
        let hub = BroadcastHub::default();
        let ((mut lines, mut w), task) = connect(&hub);

        w.write_all(b"subscribe please\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.contains("invalid subscription request"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_client_hangup_before_request() {
        let hub = BroadcastHub::default();
        let ((lines, w), task) = connect(&hub);
        drop(lines);
        drop(w);
        task.await.unwrap().unwrap();
    }
}
