use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    helm_protocol::{MAX_PAYLOAD_BYTES, OUTBOUND_BUFFER, REQUEST_TIMEOUT_MS},
    serde::{Serialize, de::DeserializeOwned},
    tokio::sync::{RwLock, broadcast, mpsc},
    tokio_util::task::TaskTracker,
    tracing::{debug, warn},
};

use crate::{
    auth::BearerAuth,
    connection::{Connection, ConnectionId},
    dispatch::Dispatcher,
    outgoing::OutgoingMethod,
};

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub request_timeout: Duration,
    pub max_payload_bytes: usize,
    pub outbound_buffer: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            outbound_buffer: OUTBOUND_BUFFER,
        }
    }
}

/// Everything the HTTP handlers share: the dispatcher, the auth check and the
/// set of open connections.
pub struct ServerState<C> {
    pub dispatcher: Arc<Dispatcher<C>>,
    pub auth: BearerAuth,
    pub limits: ConnectionLimits,
    pub version: String,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    opened: broadcast::Sender<ConnectionId>,
    tasks: TaskTracker,
}

impl<C> ServerState<C> {
    pub fn new(dispatcher: Arc<Dispatcher<C>>, auth: BearerAuth, limits: ConnectionLimits) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            auth,
            limits,
            version: env!("CARGO_PKG_VERSION").to_string(),
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            opened: broadcast::channel(64).0,
            tasks: TaskTracker::new(),
        })
    }

    /// Tracks socket and connection tasks. Closed once the server stops
    /// accepting.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Create and register a connection. The receiver feeds its write task.
    pub async fn open_connection(
        &self,
        remote_addr: SocketAddr,
    ) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.limits.outbound_buffer);
        let conn = Arc::new(Connection::new(id, remote_addr, tx, self.limits.request_timeout));
        {
            let mut connections = self.connections.write().await;
            connections.insert(id, Arc::clone(&conn));
            // Shutdown closes the tracker before sweeping, so a connection
            // registered after the sweep sees it here.
            if self.tasks.is_closed() {
                conn.close();
            }
        }
        let _ = self.opened.send(id);
        (conn, rx)
    }

    /// Ids of connections as they open. Frames sent to a connection right
    /// away are queued until its write task starts.
    pub fn subscribe_opened(&self) -> broadcast::Receiver<ConnectionId> {
        self.opened.subscribe()
    }

    pub async fn remove_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(&id)
    }

    pub async fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Snapshot of the open connections, ordered by id.
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        let mut conns: Vec<_> = self.connections.read().await.values().cloned().collect();
        conns.sort_by_key(|conn| conn.id());
        conns
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Time out overdue server-initiated calls on every connection.
    pub async fn process_timeouts(&self) -> usize {
        let now = Instant::now();
        let expired: usize = self
            .connections()
            .await
            .iter()
            .map(|conn| conn.process_timeouts(now))
            .sum();
        if expired > 0 {
            debug!(expired, "processed request timeouts");
        }
        expired
    }

    /// Send a parameterless notification to every open connection.
    pub async fn broadcast<R>(&self, method: &OutgoingMethod<(), R>) -> usize
    where
        R: Serialize + DeserializeOwned,
    {
        let mut sent = 0;
        for conn in self.connections().await {
            match conn.notify(method).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(conn_id = %conn.id(), method = %method.name(), error = %e, "broadcast failed"),
            }
        }
        sent
    }

    /// Send a notification with `params` to every open connection.
    pub async fn broadcast_notification<P, R>(
        &self,
        method: &OutgoingMethod<P, R>,
        params: &P,
    ) -> usize
    where
        P: Serialize + DeserializeOwned,
        R: Serialize + DeserializeOwned,
    {
        let mut sent = 0;
        for conn in self.connections().await {
            match conn.notify_with(method, params).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(conn_id = %conn.id(), method = %method.name(), error = %e, "broadcast failed"),
            }
        }
        sent
    }

    /// Ask every connection to close. Their tasks fail outstanding calls and
    /// unregister themselves.
    pub async fn close_all(&self) -> usize {
        let conns = self.connections().await;
        for conn in &conns {
            conn.close();
        }
        conns.len()
    }
}
