//! Model registry client and background connection-liveness monitor.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stream::build_http_client;
use crate::types::ModelInfo;

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Queries the inference server for available models and liveness.
pub struct RegistryClient {
    client: Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
        let client = build_http_client(connect_timeout).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// List the models the server advertises.
    pub async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            debug!(error = %e, url = %url, "Model listing request failed");
            anyhow::anyhow!(
                "Failed to connect to the inference server. Make sure it is running at {}",
                self.base_url
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Model listing failed with HTTP {}", status);
        }

        let data: ModelsResponse = response.json().await?;
        Ok(data.models)
    }

    /// Status-only liveness probe. Never errors; unreachable means `false`.
    pub async fn check_connection(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Fixed-interval background liveness poll with an explicit stop.
///
/// Publishes the latest probe result over a `watch` channel; consumers
/// subscribe instead of polling themselves. Stopping (or dropping) the
/// monitor cancels the task, so no orphaned timers survive teardown.
pub struct ConnectionMonitor {
    cancel: CancellationToken,
    rx: watch::Receiver<bool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ConnectionMonitor {
    pub fn start(registry: Arc<RegistryClient>, poll_interval: Duration) -> Self {
        let (tx, rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Connection monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let up = registry.check_connection().await;
                        if *tx.borrow() != up {
                            if up {
                                info!("Inference server is reachable");
                            } else {
                                warn!("Inference server is unreachable");
                            }
                        }
                        if tx.send(up).is_err() {
                            // Every consumer is gone; nothing left to inform.
                            break;
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            rx,
            handle: Some(handle),
        }
    }

    /// Latest probe result.
    pub fn is_connected(&self) -> bool {
        *self.rx.borrow()
    }

    /// Subscribe to liveness changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Stop the poll loop and wait for the task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a fresh local port, then close.
    async fn one_shot_http_server(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn list_models_parses_registry_response() {
        let base = one_shot_http_server(
            r#"{"models":[{"name":"llama3","size":4661224676},{"name":"qwen2.5-coder"}]}"#,
        )
        .await;
        let registry = RegistryClient::new(&base, Duration::from_secs(1)).unwrap();
        let models = registry.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3");
        assert_eq!(models[0].size, Some(4661224676));
        assert_eq!(models[1].size, None);
    }

    #[tokio::test]
    async fn list_models_unreachable_gives_actionable_error() {
        let registry =
            RegistryClient::new("http://127.0.0.1:1", Duration::from_millis(300)).unwrap();
        let err = registry.list_models().await.unwrap_err();
        assert!(err.to_string().contains("Make sure it is running"));
    }

    #[tokio::test]
    async fn check_connection_false_when_down() {
        let registry =
            RegistryClient::new("http://127.0.0.1:1", Duration::from_millis(300)).unwrap();
        assert!(!registry.check_connection().await);
    }

    #[tokio::test]
    async fn monitor_stops_cleanly() {
        let registry = Arc::new(
            RegistryClient::new("http://127.0.0.1:1", Duration::from_millis(100)).unwrap(),
        );
        let monitor = ConnectionMonitor::start(registry, Duration::from_millis(20));
        let mut rx = monitor.subscribe();
        // First probe fails against the dead endpoint.
        rx.changed().await.unwrap();
        assert!(!monitor.is_connected());
        // stop() must join the task, not leak it.
        monitor.stop().await;
    }
}
