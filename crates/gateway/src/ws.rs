use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    helm_protocol::{ErrorObject, Id, Inbound, JSONRPC_VERSION, ResponseFrame, error_codes},
    serde_json::{Value, json},
    tracing::{debug, error, info, warn},
};

use crate::{
    connection::{Connection, ConnectionEvent, ConnectionState},
    error::Error,
    state::ServerState,
};

/// Drive one authenticated WebSocket until either side closes it.
pub async fn handle_connection<C: Send + Sync + 'static>(
    socket: WebSocket,
    state: Arc<ServerState<C>>,
    remote_addr: SocketAddr,
    lifecycle: ConnectionState,
) {
    let (conn, mut outbound) = state.open_connection(remote_addr).await;
    let conn_id = conn.id();
    info!(%conn_id, "management connection opened for {remote_addr}");

    let (mut sink, mut stream) = socket.split();

    // Write task: the only place frames hit the socket.
    let shutdown = conn.shutdown_token().clone();
    let write_task = tokio::spawn(async move {
        let mut writable = true;
        loop {
            tokio::select! {
                biased;
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        debug!(%conn_id, "write failed, closing");
                        writable = false;
                        break;
                    }
                },
                () = shutdown.cancelled() => break,
            }
        }
        // Frames queued before the close still go out, in order.
        while writable && let Ok(frame) = outbound.try_recv() {
            writable = sink.send(Message::Text(frame.into())).await.is_ok();
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    });

    // Read loop.
    let shutdown = conn.shutdown_token().clone();
    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            () = shutdown.cancelled() => break,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(%conn_id, error = %e, "transport error");
                break;
            },
            None => break,
        };
        match msg {
            Message::Text(text) => {
                let Some(reply) = handle_text(&state, &conn, text.as_str()).await else {
                    continue;
                };
                if let Err(e) = conn.send_text(reply).await {
                    debug!(%conn_id, error = %e, "reply dropped");
                    break;
                }
            },
            Message::Binary(_) => debug!(%conn_id, "ignoring binary frame"),
            Message::Close(_) => {
                debug!(%conn_id, "client closed connection");
                break;
            },
            Message::Ping(_) | Message::Pong(_) => {},
        }
    }

    let lifecycle = advance(lifecycle, ConnectionEvent::CloseRequested, &conn);
    conn.close();
    state.remove_connection(conn_id).await;
    conn.pending().fail_all("connection closed");
    let _ = write_task.await;
    advance(lifecycle, ConnectionEvent::Released, &conn);
    info!(
        %conn_id,
        open_secs = conn.connected_at().elapsed().as_secs(),
        "management connection closed for {remote_addr}"
    );
}

fn advance(state: ConnectionState, event: ConnectionEvent, conn: &Connection) -> ConnectionState {
    match state.on(event) {
        Ok(next) => next,
        Err(e) => {
            warn!(conn_id = %conn.id(), error = %e, "unexpected connection event");
            state
        },
    }
}

/// Handle one text frame. Returns the frame to send back, if any.
pub(crate) async fn handle_text<C: Send + Sync + 'static>(
    state: &Arc<ServerState<C>>,
    conn: &Connection,
    text: &str,
) -> Option<String> {
    let response = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(frame)) => handle_frame(state, conn, Inbound::classify(&frame)).await?,
        Ok(Value::Array(_)) => ResponseFrame::err(
            Id::Null,
            ErrorObject::invalid_request("Batch requests are not supported"),
        ),
        Ok(_) => ResponseFrame::err(
            Id::Null,
            ErrorObject::invalid_request("Expected a JSON object"),
        ),
        Err(e) => ResponseFrame::err(Id::Null, ErrorObject::parse_error(e.to_string())),
    };
    match serde_json::to_string(&response) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            error!(conn_id = %conn.id(), error = %e, "failed to encode response");
            Some(encode_failure(&response.id))
        },
    }
}

/// INTERNAL_ERROR reply for a response that could not be serialized. Built
/// from plain JSON values only, so it always encodes.
fn encode_failure(id: &Id) -> String {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.to_value(),
        "error": {
            "code": error_codes::INTERNAL_ERROR,
            "message": "Internal error",
            "data": "Failed to encode response",
        },
    })
    .to_string()
}

async fn handle_frame<C: Send + Sync + 'static>(
    state: &Arc<ServerState<C>>,
    conn: &Connection,
    inbound: Inbound,
) -> Option<ResponseFrame> {
    let conn_id = conn.id();
    match inbound {
        Inbound::Request { id, method, params } => {
            let outcome = state.dispatcher.dispatch(&method, params, conn_id).await;
            if let Err(e) = &outcome {
                log_call_error(conn, &method, e);
            }
            let id = id?;
            Some(match outcome {
                Ok(result) => ResponseFrame::ok(id, result),
                Err(e) => ResponseFrame::err(id, e.to_error_object()),
            })
        },
        Inbound::Response { id, result } => {
            match id.as_u64() {
                Some(request_id) if conn.pending().resolve(request_id, result.clone()) => {},
                Some(request_id) => {
                    warn!(%conn_id, request_id, %result, "received unknown response");
                },
                None => {
                    warn!(%conn_id, %id, %result, "received response with an id we did not request");
                },
            }
            None
        },
        Inbound::Error { id, error } => {
            error!(%conn_id, id = ?id, %error, "received error from client");
            if let Some(request_id) = id.as_ref().and_then(Value::as_u64) {
                let object = serde_json::from_value::<ErrorObject>(error.clone())
                    .unwrap_or_else(|_| ErrorObject::internal(error.to_string()));
                conn.pending().reject(request_id, object);
            }
            None
        },
        Inbound::Invalid { id, reason } => Some(ResponseFrame::err(
            Id::from_value(&id).unwrap_or(Id::Null),
            ErrorObject::invalid_request(reason),
        )),
    }
}

fn log_call_error(conn: &Connection, method: &str, err: &Error) {
    let conn_id = conn.id();
    match err {
        Error::MethodNotFound(_) | Error::InvalidRequest(_) => {
            debug!(%conn_id, method, error = %err, "rejected call");
        },
        Error::Protocol(_) | Error::ParamDecode(_) => {
            debug!(%conn_id, method, error = %err, "invalid parameter invocation");
        },
        Error::Handler(_) => warn!(%conn_id, method, error = %err, "handler failed"),
        _ => error!(%conn_id, method, error = %err, "error handling call"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        crate::{
            auth::BearerAuth,
            dispatch::Dispatcher,
            incoming::{IncomingMethod, IncomingRegistry},
            outgoing::{OutgoingMethod, OutgoingRegistry},
            state::ConnectionLimits,
        },
        helm_schema::{SchemaRegistry, string},
        secrecy::Secret,
        serde_json::json,
    };

    async fn setup() -> (Arc<ServerState<()>>, Arc<Connection>) {
        let mut incoming = IncomingRegistry::new();
        IncomingMethod::parameterized("echo", |_, msg: String, _| Ok(msg))
            .param("msg", string())
            .result("msg", string())
            .register(&mut incoming)
            .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(()),
            incoming,
            OutgoingRegistry::new(),
            SchemaRegistry::new(),
        )
        .unwrap();
        let state = ServerState::new(
            Arc::new(dispatcher),
            BearerAuth::new(Secret::new("t".to_string()), Vec::<String>::new()),
            ConnectionLimits::default(),
        );
        let (conn, _rx) = state.open_connection("127.0.0.1:1".parse().unwrap()).await;
        (state, conn)
    }

    async fn reply(text: &str) -> Option<Value> {
        let (state, conn) = setup().await;
        handle_text(&state, &conn, text)
            .await
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[tokio::test]
    async fn call_gets_result() {
        let out = reply(r#"{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}"#)
            .await
            .unwrap();
        assert_eq!(out, json!({"jsonrpc":"2.0","id":1,"result":"hi"}));
    }

    #[tokio::test]
    async fn string_ids_are_echoed() {
        let out = reply(r#"{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":"abc"}"#)
            .await
            .unwrap();
        assert_eq!(out["id"], "abc");
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        assert!(reply(r#"{"jsonrpc":"2.0","method":"echo","params":["hi"]}"#).await.is_none());
        assert!(reply(r#"{"jsonrpc":"2.0","method":"nope"}"#).await.is_none());
    }

    #[tokio::test]
    async fn parse_error_has_null_id() {
        let out = reply("{not json").await.unwrap();
        assert_eq!(out["id"], Value::Null);
        assert_eq!(out["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn batches_are_rejected() {
        let out = reply(r#"[{"jsonrpc":"2.0","method":"echo","params":["a"],"id":1}]"#)
            .await
            .unwrap();
        assert_eq!(out["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn bad_id_type_is_invalid_request() {
        let out = reply(r#"{"jsonrpc":"2.0","method":"echo","params":["a"],"id":{"x":1}}"#)
            .await
            .unwrap();
        assert_eq!(out["error"]["code"], -32600);
        assert_eq!(
            out["error"]["data"],
            "Invalid request id - only String, Number and NULL supported"
        );
    }

    #[tokio::test]
    async fn unknown_method_reply() {
        let out = reply(r#"{"jsonrpc":"2.0","method":"nope","id":3}"#).await.unwrap();
        assert_eq!(out["id"], 3);
        assert_eq!(out["error"]["code"], -32601);
        assert_eq!(out["error"]["data"], "Method not found: helm:nope");
    }

    #[tokio::test]
    async fn responses_complete_pending_calls() {
        let (state, conn) = setup().await;
        let ping = OutgoingMethod::request("client/ping")
            .result("pong", string())
            .register(&mut OutgoingRegistry::new())
            .unwrap();
        let (id, response) = conn
            .pending()
            .register(&ping, std::time::Instant::now() + std::time::Duration::from_secs(5));

        let frame = json!({"jsonrpc":"2.0","id":id,"result":"pong"}).to_string();
        assert!(handle_text(&state, &conn, &frame).await.is_none());
        assert_eq!(response.await.unwrap(), "pong");

        // A second answer for the same id is logged and dropped.
        assert!(handle_text(&state, &conn, &frame).await.is_none());
    }

    #[tokio::test]
    async fn error_frames_reject_pending_calls() {
        let (state, conn) = setup().await;
        let ping = OutgoingMethod::request("client/ping")
            .result("pong", string())
            .register(&mut OutgoingRegistry::new())
            .unwrap();
        let (id, response) = conn
            .pending()
            .register(&ping, std::time::Instant::now() + std::time::Duration::from_secs(5));

        let frame = json!({"jsonrpc":"2.0","id":id,"error":{"code":-32601,"message":"Method not found"}})
            .to_string();
        assert!(handle_text(&state, &conn, &frame).await.is_none());
        match response.await {
            Err(Error::Remote(object)) => assert_eq!(object.code, -32601),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn encode_failure_keeps_the_request_id() {
        let out: Value = serde_json::from_str(&encode_failure(&Id::from(9))).unwrap();
        assert_eq!(out["jsonrpc"], "2.0");
        assert_eq!(out["id"], 9);
        assert_eq!(out["error"]["code"], -32603);
        assert_eq!(out["error"]["data"], "Failed to encode response");

        let out: Value =
            serde_json::from_str(&encode_failure(&Id::String("abc".into()))).unwrap();
        assert_eq!(out["id"], "abc");
        assert!(out.get("result").is_none());
    }
}
