//! Client for the local API a machine exposes on the home network.

use log::{debug, error, info, warn};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::constants::{DEFAULT_PORT, WEBSOCKET_RETRY_DELAY};
use crate::error::{Error, RequestFailure, Result};
use crate::stream::{
    Connection, Connector, MessageSink, StreamError, StreamMessage, WebSocketConnector,
};

/// Talks to one machine over its local HTTP and websocket API.
///
/// The client is `Sync`: share it behind an `Arc` to call
/// [`terminate`](LocalClient::terminate) or [`get_config`](LocalClient::get_config)
/// while [`websocket_connect`](LocalClient::websocket_connect) runs on another task.
pub struct LocalClient<C = WebSocketConnector> {
    host: String,
    local_port: u16,
    local_bearer: String,
    client: reqwest::Client,
    connector: C,
    retry_delay: Duration,
    websocket_connected: AtomicBool,
    terminating: AtomicBool,
}

const CONNECT_RETRY_MIN: Duration = Duration::from_secs(2);
const CONNECT_RETRY_MAX: Duration = Duration::from_secs(90);

/// How a single streaming session ended.
#[derive(Debug)]
enum SessionEnd {
    Terminated,
    Closed,
    Failed(StreamError),
}

impl LocalClient<WebSocketConnector> {
    pub fn new(host: impl Into<String>, local_bearer: impl Into<String>) -> Self {
        Self::with_connector(host, local_bearer, WebSocketConnector)
    }
}

impl<C: Connector> LocalClient<C> {
    /// Build a client that opens its streams through `connector`.
    pub fn with_connector(
        host: impl Into<String>,
        local_bearer: impl Into<String>,
        connector: C,
    ) -> Self {
        Self {
            host: host.into(),
            local_port: DEFAULT_PORT,
            local_bearer: local_bearer.into(),
            client: reqwest::Client::new(),
            connector,
            retry_delay: WEBSOCKET_RETRY_DELAY,
            websocket_connected: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Use a caller-owned HTTP client, e.g. one shared with other machines.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Delay before reconnecting after the machine closes the stream.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.local_port
    }

    /// Whether a streaming session is currently open.
    pub fn is_connected(&self) -> bool {
        self.websocket_connected.load(Ordering::SeqCst)
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Ask a running subscription to stop. It exits on the next message or
    /// disconnect and never reconnects afterwards.
    pub fn terminate(&self) {
        if !self.terminating.swap(true, Ordering::SeqCst) {
            debug!("Termination requested for {}", self.host);
        }
    }

    fn config_url(&self) -> String {
        format!("http://{}:{}/api/v1/config", self.host, self.local_port)
    }

    fn streaming_url(&self) -> String {
        format!("ws://{}:{}/api/v1/streaming", self.host, self.local_port)
    }

    /// Get the current configuration of the machine.
    pub async fn get_config(&self) -> Result<serde_json::Value> {
        let url = self.config_url();
        debug!("Fetching config from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.local_bearer)
            .send()
            .await
            .map_err(RequestFailure::Transport)?;

        let status = response.status();
        if status.is_success() {
            let config = response
                .json::<serde_json::Value>()
                .await
                .map_err(RequestFailure::Body)?;
            return Ok(config);
        }
        if status == StatusCode::FORBIDDEN {
            return Err(Error::AuthenticationFailed(
                "Local API returned 403.".to_string(),
            ));
        }
        error!("Querying local API failed with statuscode: {}", status);
        Err(RequestFailure::Status(status).into())
    }

    /// Subscribe to the machine's live updates.
    ///
    /// Reconnects until [`terminate`](LocalClient::terminate) is called or the
    /// future is dropped. After the machine closes the stream the client waits
    /// the retry delay before reconnecting; after a protocol error it
    /// reconnects straight away. Failed connection attempts back off from
    /// two seconds (or the retry delay, if shorter) up to 90 seconds.
    /// Messages are handed to `sink` in order, and errors it returns are only
    /// logged.
    ///
    /// With `use_sigterm_handler`, SIGTERM closes the open stream, which is
    /// then handled like any other close.
    pub async fn websocket_connect(
        &self,
        mut sink: Option<&mut dyn MessageSink>,
        use_sigterm_handler: bool,
    ) {
        let url = self.streaming_url();
        let mut shutdown: Option<ShutdownSignal> = None;
        let mut connect_backoff = self.retry_delay.min(CONNECT_RETRY_MIN);

        loop {
            if self.is_terminating() {
                return;
            }

            let mut connection = match self.connector.connect(&url, &self.local_bearer).await {
                Ok(connection) => connection,
                Err(e) => {
                    if matches!(e, StreamError::Rejected(403)) {
                        warn!(
                            "Local websocket rejected the bearer token, retrying in {:?}",
                            connect_backoff
                        );
                    } else {
                        warn!(
                            "Could not connect to websocket, retrying in {:?}: {}",
                            connect_backoff, e
                        );
                    }
                    tokio::time::sleep(connect_backoff).await;
                    connect_backoff = std::cmp::min(connect_backoff * 2, CONNECT_RETRY_MAX);
                    continue;
                }
            };
            connect_backoff = self.retry_delay.min(CONNECT_RETRY_MIN);

            if use_sigterm_handler && shutdown.is_none() {
                shutdown = ShutdownSignal::install();
            }
            self.websocket_connected.store(true, Ordering::SeqCst);
            debug!("Websocket connected to {}", url);

            let end = self
                .consume(&mut connection, sink.as_deref_mut(), shutdown.as_mut())
                .await;
            self.websocket_connected.store(false, Ordering::SeqCst);

            match end {
                SessionEnd::Terminated => return,
                SessionEnd::Closed => {
                    if self.is_terminating() {
                        return;
                    }
                    debug!(
                        "Websocket disconnected, reconnecting in {:?}",
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                SessionEnd::Failed(e) => {
                    warn!("Exception during websocket connection: {}", e);
                }
            }
        }
    }

    async fn consume(
        &self,
        connection: &mut C::Connection,
        mut sink: Option<&mut (dyn MessageSink + '_)>,
        mut shutdown: Option<&mut ShutdownSignal>,
    ) -> SessionEnd {
        loop {
            let next = match shutdown.as_deref_mut() {
                Some(signal) => tokio::select! {
                    next = connection.next_message() => Some(next),
                    () = signal.recv() => None,
                },
                None => Some(connection.next_message().await),
            };

            let Some(next) = next else {
                info!("Received SIGTERM, closing websocket");
                connection.close().await;
                return SessionEnd::Closed;
            };

            match next {
                Some(Ok(message)) => {
                    if self.is_terminating() {
                        return SessionEnd::Terminated;
                    }
                    if let Some(sink) = sink.as_deref_mut() {
                        deliver(sink, message);
                    }
                }
                Some(Err(StreamError::Closed)) | None => return SessionEnd::Closed,
                Some(Err(e)) => return SessionEnd::Failed(e),
            }
        }
    }
}

fn deliver(sink: &mut dyn MessageSink, message: StreamMessage) {
    if let Err(e) = sink.accept(message) {
        error!("Error during callback: {:#}", e);
    }
}

/// SIGTERM listener used to close the open stream.
struct ShutdownSignal {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    #[cfg(unix)]
    fn install() -> Option<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(signal) => Some(Self { signal }),
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn install() -> Option<Self> {
        debug!("SIGTERM handling is only available on unix");
        None
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if self.signal.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}
