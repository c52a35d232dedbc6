//! Methods the `helm` binary exposes out of the box.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    helm_gateway::{
        ConnectionId, Context, Dispatcher, IncomingMethod, IncomingRegistry, OutgoingMethod,
        OutgoingRegistry, SchemaRegistry,
    },
    helm_schema::{Schema, boolean, integer, string},
    serde::{Deserialize, Serialize},
    tracing::info,
};

/// State the demo handlers operate on.
pub struct App {
    started: Instant,
    saves: AtomicU64,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            saves: AtomicU64::new(0),
        }
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Status {
    pub version: String,
    pub uptime_secs: u64,
    pub saves: u64,
}

/// Outgoing methods the binary sends on its own.
pub struct Notifications {
    pub started: OutgoingMethod<(), ()>,
    pub stopping: OutgoingMethod<String, ()>,
    pub ping: OutgoingMethod<(), String>,
}

/// Register the demo method set and build a dispatcher over it.
pub fn build_dispatcher(app: Arc<App>) -> anyhow::Result<(Dispatcher<App>, Notifications)> {
    let mut schemas = SchemaRegistry::new();
    let status_schema = schemas.describe(
        "status",
        &Schema::<Status>::object()
            .with_property("version", &string())
            .with_property("uptime_secs", &integer())
            .with_property("saves", &integer()),
    )?;

    let mut incoming = IncomingRegistry::new();
    IncomingMethod::parameterized("echo", |_: &Context<'_, App>, msg: String, _| Ok(msg))
        .description("Return the message unchanged")
        .param("msg", string())
        .result("msg", string())
        .no_main_thread()
        .register(&mut incoming)?;
    IncomingMethod::parameterless("server/status", |ctx: &Context<'_, App>, _| {
        let app = ctx.app();
        Ok(Status {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: app.started.elapsed().as_secs(),
            saves: app.saves(),
        })
    })
    .description("Report server version, uptime and save count")
    .result("status", status_schema)
    .register(&mut incoming)?;
    IncomingMethod::parameterized("server/save", save)
        .description("Persist server state")
        .param("flush", boolean())
        .result("saved", boolean())
        .register(&mut incoming)?;

    let mut outgoing = OutgoingRegistry::new();
    let notifications = Notifications {
        started: OutgoingMethod::notification("server/started")
            .description("Sent once a connection is ready")
            .register(&mut outgoing)?,
        stopping: OutgoingMethod::notification("server/stopping")
            .description("Sent before the server shuts down")
            .param("reason", string())
            .register(&mut outgoing)?,
        ping: OutgoingMethod::request("client/ping")
            .description("Liveness check answered by the client")
            .result("pong", string())
            .register(&mut outgoing)?,
    };

    let dispatcher = Dispatcher::new(app, incoming, outgoing, schemas)?;
    Ok((dispatcher, notifications))
}

fn save(ctx: &Context<'_, App>, flush: bool, remote: ConnectionId) -> helm_gateway::Result<bool> {
    let saves = ctx.app().saves.fetch_add(1, Ordering::Relaxed) + 1;
    info!(%remote, flush, saves, "saving server state");
    Ok(true)
}
