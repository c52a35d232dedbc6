mod methods;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    clap::Parser,
    helm_config::HelmConfig,
    helm_gateway::{
        BearerAuth, ConnectionLimits, ManagementServer, OutgoingMethod, ServerOptions,
        ServerState, load_server_config, main_thread,
    },
    rand::{Rng, distr::Alphanumeric},
    secrecy::Secret,
    tokio::sync::broadcast::error::RecvError,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    tracing_subscriber::EnvFilter,
};

use crate::methods::{App, build_dispatcher};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Remote management server speaking JSON-RPC 2.0 over WebSocket.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Path to a helm.toml. Defaults to ./helm.toml, then the platform
    /// config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the config file and HELM_BIND.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on, overriding the config file and HELM_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = helm_config::discover_and_load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;
    let addr = config.socket_addr()?;
    let token = resolve_token(&config);

    let (main_handle, main_queue) = main_thread();
    std::thread::Builder::new()
        .name("helm-main".into())
        .spawn(move || main_queue.blocking_run())
        .context("failed to start main thread")?;

    let (dispatcher, notifications) = build_dispatcher(Arc::new(App::new()))?;
    let dispatcher = Arc::new(dispatcher.with_main_thread(main_handle));
    let state = ServerState::new(
        dispatcher,
        BearerAuth::new(token, config.auth.allowed_origins.clone()),
        ConnectionLimits {
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
            max_payload_bytes: config.server.max_payload_bytes,
            ..ConnectionLimits::default()
        },
    );

    let tls = match &config.tls {
        Some(tls) => Some(
            load_server_config(&tls.cert_path, &tls.key_path)
                .context("failed to load TLS certificate")?,
        ),
        None => None,
    };
    let server = ManagementServer::listen(addr, Arc::clone(&state), ServerOptions {
        tls,
        tick_interval: Duration::from_millis(config.server.tick_interval_ms),
    })
    .await
    .with_context(|| format!("failed to listen on {addr}"))?;

    let background = CancellationToken::new();
    let announcer = tokio::spawn(announce_new_connections(
        Arc::clone(&state),
        notifications.started,
        background.clone(),
    ));
    let pinger = tokio::spawn(ping_clients(
        Arc::clone(&state),
        notifications.ping,
        background.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    background.cancel();
    let _ = tokio::join!(announcer, pinger);
    let told = state
        .broadcast_notification(&notifications.stopping, &"shutdown".to_string())
        .await;
    debug!(connections = told, "sent stopping notification");
    server.shutdown(true).await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// The configured token, or a fresh random one printed once so an operator
/// can connect.
fn resolve_token(config: &HelmConfig) -> Secret<String> {
    if let Some(token) = config.token() {
        return token.clone();
    }
    let generated: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    println!("No auth token configured. Generated one for this run:\n\n  {generated}\n");
    warn!("using a generated auth token; set HELM_TOKEN or auth.token to keep it stable");
    Secret::new(generated)
}

/// Send `server/started` to each connection as it opens.
async fn announce_new_connections(
    state: Arc<ServerState<App>>,
    started: OutgoingMethod<(), ()>,
    cancel: CancellationToken,
) {
    let mut opened = state.subscribe_opened();
    loop {
        let conn_id = tokio::select! {
            opened = opened.recv() => match opened {
                Ok(conn_id) => conn_id,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed connection announcements");
                    continue;
                },
                Err(RecvError::Closed) => break,
            },
            () = cancel.cancelled() => break,
        };
        let Some(conn) = state.connection(conn_id).await else {
            continue;
        };
        if let Err(e) = conn.notify(&started).await {
            debug!(%conn_id, error = %e, "failed to announce");
        }
    }
}

/// Call `client/ping` on every connection at a fixed interval.
async fn ping_clients(
    state: Arc<ServerState<App>>,
    ping: OutgoingMethod<(), String>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(PING_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {},
            () = cancel.cancelled() => break,
        }
        for conn in state.connections().await {
            let conn_id = conn.id();
            match conn.request(&ping).await {
                Ok(response) => {
                    tokio::spawn(async move {
                        match response.await {
                            Ok(pong) => debug!(%conn_id, %pong, "client answered ping"),
                            Err(e) => warn!(%conn_id, error = %e, "client did not answer ping"),
                        }
                    });
                },
                Err(e) => debug!(%conn_id, error = %e, "failed to ping"),
            }
        }
    }
}
