use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
    time::Instant,
};

use {
    dashmap::DashMap,
    helm_protocol::ErrorObject,
    helm_schema::MethodName,
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
    tokio::sync::oneshot,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    outgoing::OutgoingMethod,
};

type Completer = Box<dyn FnOnce(Result<Value>) + Send + Sync>;

/// A server-initiated call waiting for the client to answer.
pub struct PendingResponse {
    method: MethodName,
    deadline: Instant,
    complete: Completer,
}

impl PendingResponse {
    pub fn method(&self) -> &MethodName {
        &self.method
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Per-connection table of in-flight server-initiated calls.
///
/// Every entry is completed exactly once: whichever of resolve, reject, sweep
/// or fail_all removes it from the map first wins.
pub struct PendingResponses {
    entries: DashMap<u64, PendingResponse>,
    next_id: AtomicU64,
}

impl Default for PendingResponses {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id and start waiting for its response.
    pub fn register<P, R>(
        &self,
        method: &OutgoingMethod<P, R>,
        deadline: Instant,
    ) -> (u64, ResponseFuture<R>)
    where
        P: Serialize + DeserializeOwned + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let decoder = method.clone();
        let complete: Completer = Box::new(move |outcome| {
            let _ = tx.send(outcome.and_then(|raw| decoder.decode_result(raw)));
        });
        self.entries.insert(id, PendingResponse {
            method: method.name().clone(),
            deadline,
            complete,
        });
        (id, ResponseFuture { rx })
    }

    fn complete(&self, id: u64, outcome: Result<Value>) -> bool {
        match self.entries.remove(&id) {
            Some((_, pending)) => {
                (pending.complete)(outcome);
                true
            },
            None => false,
        }
    }

    /// Complete a call with the client's result. Returns false for unknown ids.
    pub fn resolve(&self, id: u64, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    /// Complete a call with an error the client sent back.
    pub fn reject(&self, id: u64, error: ErrorObject) -> bool {
        self.complete(id, Err(Error::Remote(error)))
    }

    /// Fail a single call, e.g. when its request frame could not be sent.
    pub fn cancel(&self, id: u64, error: Error) -> bool {
        self.complete(id, Err(error))
    }

    /// Time out every call whose deadline is before `now`.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline < now)
            .map(|entry| *entry.key())
            .collect();

        let mut count = 0;
        for id in expired {
            if let Some((_, pending)) = self.entries.remove(&id) {
                warn!(request_id = id, method = %pending.method, "RPC call timed out");
                let method = pending.method.to_string();
                (pending.complete)(Err(Error::Timeout { method }));
                count += 1;
            }
        }
        count
    }

    /// Fail every outstanding call. Used when the connection goes away.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut count = 0;
        for id in ids {
            if self.complete(id, Err(Error::Transport(reason.to_string()))) {
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, reason, "failed pending responses");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves once the client answers, the call times out or the connection
/// closes.
pub struct ResponseFuture<R> {
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> Future for ResponseFuture<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Error::Transport("response channel closed".into())))
        })
    }
}
