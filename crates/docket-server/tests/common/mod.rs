//! Common test utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use docket_feed::{DecodedFrame, FeedConfig, LifecycleManager, decode_frames};
use docket_server::{Server, ServerConfig};
use docket_store::{PortalStore, standard_detectors};

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// Token for tenant `acme`.
    pub token: String,
    /// HTTP client configured for this server.
    pub client: Client,
    /// Store the detectors read from.
    pub store: Arc<PortalStore>,
    /// Feed behind the server, for inspecting open sessions.
    pub feed: LifecycleManager,
    /// Handle to the server task.
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with fast timers: 50ms polls, 300ms heartbeat.
    pub async fn start() -> Result<Self> {
        Self::start_with(
            FeedConfig::default()
                .with_poll_interval(Duration::from_millis(50))
                .with_heartbeat_interval(Duration::from_millis(300)),
        )
        .await
    }

    /// Start a server with the given feed configuration.
    pub async fn start_with(feed_config: FeedConfig) -> Result<Self> {
        let token = "acme-token".to_string();
        let addr = find_available_port().await?;

        let store = Arc::new(PortalStore::open_in_memory()?);
        let feed = LifecycleManager::new(standard_detectors(Arc::clone(&store)), feed_config);

        let config = ServerConfig::new()
            .with_bind_address(addr)
            .with_tenant("acme", token.clone())
            .with_tenant("globex", "globex-token")
            .with_rate_limiting(false)
            .with_request_logging(false);

        let server = Server::new(config, feed.clone());
        let handle = tokio::spawn(async move {
            let _ = server.run_on(addr).await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            token,
            client,
            store,
            feed,
            _handle: handle,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get an authenticated request builder.
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .bearer_auth(&self.token)
    }

    /// Open a change stream with the given token.
    pub async fn open_stream(&self, token: &str) -> Result<EventReader> {
        let response = self
            .client
            .get(format!("{}/api/v1/stream", self.base_url()))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(EventReader::new(response))
    }
}

/// Reads SSE frames from a streaming response.
pub struct EventReader {
    pub response_headers: reqwest::header::HeaderMap,
    body: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: String,
    pending: std::collections::VecDeque<DecodedFrame>,
}

impl EventReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response_headers: response.headers().clone(),
            body: response.bytes_stream().boxed(),
            buffer: String::new(),
            pending: Default::default(),
        }
    }

    /// Next frame, waiting at most `wait`.
    pub async fn next_frame(&mut self, wait: Duration) -> Result<Option<DecodedFrame>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }

            let chunk = match tokio::time::timeout_at(deadline, self.body.next()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Ok(None),
                Ok(Some(chunk)) => chunk?,
            };
            self.buffer.push_str(std::str::from_utf8(&chunk)?);

            let (frames, consumed) = decode_frames(&self.buffer)?;
            self.buffer.drain(..consumed);
            self.pending.extend(frames);
        }
    }

    /// Next frame that is not a heartbeat.
    pub async fn next_change(&mut self, wait: Duration) -> Result<Option<DecodedFrame>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_frame(remaining).await? {
                Some(frame) if frame.event == "heartbeat" => continue,
                other => return Ok(other),
            }
        }
    }
}

/// Poll `check` until it returns true or `wait` elapses.
pub async fn eventually(wait: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Find an available port for the test server.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
