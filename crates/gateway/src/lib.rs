//! Management JSON-RPC server over WebSocket.
//!
//! Lifecycle:
//! 1. Register incoming methods ([`IncomingRegistry`]), outgoing methods
//!    ([`OutgoingRegistry`]) and named schemas ([`SchemaRegistry`]).
//! 2. Build a [`Dispatcher`] over them and wrap it in a [`ServerState`].
//! 3. [`ManagementServer::listen`] accepts connections, authenticates the
//!    upgrade, and runs one read loop and one write task per connection.
//! 4. Calls are dispatched to handlers, optionally on the embedder's main
//!    thread; the server can push notifications and call client methods,
//!    whose responses are tracked until answered or timed out.

pub mod auth;
pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod incoming;
pub mod main_thread;
pub mod outgoing;
pub mod pending;
pub mod server;
pub mod state;
pub mod tls;
pub mod ws;

pub use {
    auth::{AuthOutcome, BearerAuth},
    connection::{Connection, ConnectionEvent, ConnectionId, ConnectionState},
    discovery::{RPC_DISCOVER, build_discovery_document},
    dispatch::{Context, Dispatcher},
    error::{Error, Result},
    helm_schema::SchemaRegistry,
    incoming::{Attributes, IncomingMethod, IncomingMethodBuilder, IncomingRegistry},
    main_thread::{MainThread, MainThreadHandle, main_thread},
    outgoing::{OutgoingKind, OutgoingMethod, OutgoingMethodBuilder, OutgoingRegistry},
    pending::{PendingResponses, ResponseFuture},
    server::{ManagementServer, ServerOptions, build_router},
    state::{ConnectionLimits, ServerState},
    tls::load_server_config,
};
