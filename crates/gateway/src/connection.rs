use std::{
    fmt,
    net::SocketAddr,
    time::{Duration, Instant},
};

use {
    helm_protocol::RequestFrame,
    serde::{Serialize, de::DeserializeOwned},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    outgoing::OutgoingMethod,
    pending::{PendingResponses, ResponseFuture},
};

// ── Identity ────────────────────────────────────────────────────────────────

/// Process-unique connection handle, assigned in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP accepted, TLS and HTTP upgrade not yet done.
    Connecting,
    Authenticating,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The upgrade request has been received.
    Handshaken,
    Authenticated,
    Rejected,
    /// Either side asked to close, or the server is shutting down.
    CloseRequested,
    /// The socket is gone.
    Released,
}

impl ConnectionState {
    pub fn on(self, event: ConnectionEvent) -> Result<Self> {
        use {ConnectionEvent as E, ConnectionState as S};
        let next = match (self, event) {
            (S::Connecting, E::Handshaken) => S::Authenticating,
            (S::Authenticating, E::Authenticated) => S::Open,
            (S::Authenticating, E::Rejected) => S::Closed,
            (S::Open | S::Closing, E::CloseRequested) => S::Closing,
            (S::Closed, _) => return Err(Error::IllegalTransition { from: self, event }),
            (_, E::Released) => S::Closed,
            _ => return Err(Error::IllegalTransition { from: self, event }),
        };
        Ok(next)
    }

    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

// ── Handle ──────────────────────────────────────────────────────────────────

/// Server-side handle to one open management connection.
///
/// Frames are queued on a bounded channel and written by the connection's
/// write task, so sends from any task are serialized.
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    sender: mpsc::Sender<String>,
    pending: PendingResponses,
    request_timeout: Duration,
    connected_at: Instant,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        sender: mpsc::Sender<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            id,
            remote_addr,
            sender,
            pending: PendingResponses::new(),
            request_timeout,
            connected_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn pending(&self) -> &PendingResponses {
        &self.pending
    }

    /// Queue a raw text frame.
    pub async fn send_text(&self, frame: String) -> Result<()> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| Error::Transport(format!("connection {} is closed", self.id)))
    }

    async fn send_frame(&self, frame: &RequestFrame) -> Result<()> {
        self.send_text(serde_json::to_string(frame)?).await
    }

    /// Send a notification without params.
    pub async fn notify<R>(&self, method: &OutgoingMethod<(), R>) -> Result<()>
    where
        R: Serialize + DeserializeOwned,
    {
        let frame = RequestFrame::notification(method.name().to_string(), Vec::new());
        self.send_frame(&frame).await
    }

    /// Send a notification carrying `params`.
    pub async fn notify_with<P, R>(&self, method: &OutgoingMethod<P, R>, params: &P) -> Result<()>
    where
        P: Serialize + DeserializeOwned,
        R: Serialize + DeserializeOwned,
    {
        let frame =
            RequestFrame::notification(method.name().to_string(), vec![method.encode_params(params)?]);
        self.send_frame(&frame).await
    }

    /// Call a parameterless method on the client.
    pub async fn request<R>(&self, method: &OutgoingMethod<(), R>) -> Result<ResponseFuture<R>>
    where
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        self.send_request(method, Vec::new()).await
    }

    /// Call a method on the client with `params`.
    pub async fn request_with<P, R>(
        &self,
        method: &OutgoingMethod<P, R>,
        params: &P,
    ) -> Result<ResponseFuture<R>>
    where
        P: Serialize + DeserializeOwned + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        let params = vec![method.encode_params(params)?];
        self.send_request(method, params).await
    }

    async fn send_request<P, R>(
        &self,
        method: &OutgoingMethod<P, R>,
        params: Vec<serde_json::Value>,
    ) -> Result<ResponseFuture<R>>
    where
        P: Serialize + DeserializeOwned + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        if !method.kind().expects_result() {
            return Err(Error::Protocol(format!(
                "{} does not return a result",
                method.name()
            )));
        }
        let deadline = Instant::now() + self.request_timeout;
        let (id, response) = self.pending.register(method, deadline);
        let frame = RequestFrame::call(id, method.name().to_string(), params);
        if let Err(e) = self.send_frame(&frame).await {
            self.pending.cancel(id, Error::Transport(e.to_string()));
            return Err(e);
        }
        debug!(conn_id = %self.id, request_id = id, method = %method.name(), "sent request");
        Ok(response)
    }

    /// Time out overdue calls. Returns how many expired.
    pub fn process_timeouts(&self, now: Instant) -> usize {
        self.pending.sweep(now)
    }

    /// Ask the connection's tasks to close the socket.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
