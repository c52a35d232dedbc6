use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{ConnectInfo, Extension, State, WebSocketUpgrade},
        http::HeaderMap,
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    helm_protocol::SUBPROTOCOL,
    hyper_util::{
        rt::{TokioExecutor, TokioIo},
        server::conn::auto,
        service::TowerToHyperService,
    },
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_rustls::TlsAcceptor,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, info, warn},
};

use crate::{
    auth::{AuthOutcome, unauthorized},
    connection::{ConnectionEvent, ConnectionState},
    error::Result,
    state::ServerState,
    ws::handle_connection,
};

// ── Shared app state ─────────────────────────────────────────────────────────

struct AppState<C> {
    server: Arc<ServerState<C>>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the HTTP router: the WebSocket endpoint at `/` and `GET /health`.
pub fn build_router<C: Send + Sync + 'static>(state: Arc<ServerState<C>>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade_handler::<C>))
        .route("/health", get(health_handler::<C>))
        .with_state(AppState { server: state })
}

async fn health_handler<C: Send + Sync + 'static>(
    State(state): State<AppState<C>>,
) -> impl IntoResponse {
    let count = state.server.connection_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.server.version,
        "protocol": SUBPROTOCOL,
        "connections": count,
    }))
}

async fn ws_upgrade_handler<C: Send + Sync + 'static>(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState<C>>,
) -> Response {
    let outcome = state.server.auth.authenticate(&headers);
    let lifecycle = match upgrade_lifecycle(&outcome) {
        Ok(next) => next,
        Err(e) => return unauthorized(&e.to_string()),
    };
    match outcome {
        AuthOutcome::Rejected(reason) => {
            debug!(remote = %addr, reason, ?lifecycle, "authentication rejected");
            unauthorized(reason)
        },
        AuthOutcome::Accepted { echo_subprotocol } => {
            let ws = if echo_subprotocol {
                ws.protocols([SUBPROTOCOL])
            } else {
                ws
            };
            let server = state.server;
            // Held until the upgraded connection ends so shutdown can drain it.
            let task = server.tasks().token();
            ws.max_message_size(server.limits.max_payload_bytes)
                .on_upgrade(move |socket| async move {
                    let _task = task;
                    handle_connection(socket, server, addr, lifecycle).await;
                })
        },
    }
}

/// Walk a fresh upgrade request through the handshake and its auth outcome.
fn upgrade_lifecycle(outcome: &AuthOutcome) -> Result<ConnectionState> {
    let event = match outcome {
        AuthOutcome::Accepted { .. } => ConnectionEvent::Authenticated,
        AuthOutcome::Rejected(_) => ConnectionEvent::Rejected,
    };
    ConnectionState::Connecting
        .on(ConnectionEvent::Handshaken)?
        .on(event)
}

// ── Server ───────────────────────────────────────────────────────────────────

pub struct ServerOptions {
    /// Serve `wss://` when set.
    pub tls: Option<Arc<rustls::ServerConfig>>,
    pub tick_interval: Duration,
}

/// A running management server.
pub struct ManagementServer<C> {
    state: Arc<ServerState<C>>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
}

impl<C: Send + Sync + 'static> ManagementServer<C> {
    /// Bind `addr` and start accepting connections.
    pub async fn listen(
        addr: SocketAddr,
        state: Arc<ServerState<C>>,
        options: ServerOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let acceptor = options.tls.map(TlsAcceptor::from);
        let scheme = if acceptor.is_some() { "wss" } else { "ws" };

        let accept_task = tokio::spawn(accept_loop(
            listener,
            build_router(Arc::clone(&state)),
            acceptor,
            shutdown.clone(),
            state.tasks().clone(),
        ));
        let tick_task = tokio::spawn(tick_loop(
            Arc::clone(&state),
            options.tick_interval,
            shutdown.clone(),
        ));

        info!("management server listening on {scheme}://{local_addr}");
        Ok(Self {
            state,
            local_addr,
            shutdown,
            accept_task,
            tick_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState<C>> {
        &self.state
    }

    /// Time out overdue server-initiated calls now, without waiting for the
    /// next tick.
    pub async fn process_timeouts(&self) -> usize {
        self.state.process_timeouts().await
    }

    /// Stop the server.
    ///
    /// Stops accepting, waits for the accept loop to exit and closes every
    /// connection, which fails their pending calls. Connections that finish
    /// their handshake after this point are closed as soon as they register.
    /// With `drain` set, also waits for the connection tasks to finish.
    pub async fn shutdown(self, drain: bool) {
        info!("stopping management server");
        self.shutdown.cancel();
        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }
        let _ = self.tick_task.await;

        // Close the tracker first: registrations racing close_all see it.
        let tasks = self.state.tasks();
        tasks.close();
        let closed = self.state.close_all().await;
        debug!(closed, "closed management connections");
        if drain {
            tasks.wait().await;
        }
        info!("management server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    acceptor: Option<TlsAcceptor>,
    shutdown: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                },
            },
            () = shutdown.cancelled() => break,
        };
        connections.spawn(serve_connection(
            stream,
            remote,
            router.clone(),
            acceptor.clone(),
            shutdown.clone(),
        ));
    }
    debug!("accept loop stopped");
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote: SocketAddr,
    router: Router,
    acceptor: Option<TlsAcceptor>,
    shutdown: CancellationToken,
) {
    let service = TowerToHyperService::new(router.layer(Extension(ConnectInfo(remote))));
    let served = match acceptor {
        Some(acceptor) => {
            let tls = tokio::select! {
                tls = acceptor.accept(stream) => tls,
                () = shutdown.cancelled() => return,
            };
            match tls {
                Ok(tls) => drive(TokioIo::new(tls), service, shutdown).await,
                Err(e) => {
                    debug!(%remote, error = %e, "TLS handshake failed");
                    return;
                },
            }
        },
        None => drive(TokioIo::new(stream), service, shutdown).await,
    };
    if let Err(e) = served {
        debug!(%remote, error = %e, "connection ended with error");
    }
}

/// Serve HTTP on one socket, allowing the WebSocket upgrade. On shutdown the
/// connection is asked to finish its in-flight request and stop.
async fn drive<I>(
    io: I,
    service: TowerToHyperService<Router>,
    shutdown: CancellationToken,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);
    tokio::select! {
        served = conn.as_mut() => served,
        () = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        },
    }
}

async fn tick_loop<C>(state: Arc<ServerState<C>>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                state.process_timeouts().await;
            },
            () = shutdown.cancelled() => break,
        }
    }
}
