//! The unit of work submitted to a client, and its result plumbing.
//!
//! A [`Call`] is produced by a payload codec layer above this crate: it
//! knows its method name, how to serialize its request body, whether its
//! originator still cares (its [`CallContext`]), and where its single
//! result must eventually land (its [`ResultSink`]). The client treats the
//! body as opaque bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::RpcError;

/// Outcome of one call: the raw response payload, or the error that ended
/// it. Exactly one of these is ever delivered per accepted call.
pub type CallResult = std::result::Result<Bytes, RpcError>;

/// A call submitted to the client.
///
/// Implementations live in the payload codec layer. The client invokes
/// `serialize` at most once, on the writer task, after checking the
/// context; `result_sink` may be used from either of the client's tasks.
pub trait Call: Send + Sync + std::fmt::Debug {
    /// Method name sent in the request header.
    fn name(&self) -> &str;

    /// Produce the serialized request body. A failure here is local to
    /// this call and does not affect the connection.
    fn serialize(&self) -> std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync>>;

    /// Cancellation and deadline state of the originator.
    fn context(&self) -> &CallContext;

    /// Where the call's one result is delivered.
    fn result_sink(&self) -> &ResultSink;
}

/// Boxed call, as carried through the client's queue and pending table.
pub type BoxCall = Box<dyn Call>;

/// Cancellation token attached to a call.
///
/// Clones share state, so the originator can keep one handle and cancel
/// after submission. A call observed as expired at send time is silently
/// dropped; the originator is responsible for noticing its own
/// cancellation. Cancellation after the call was written has no effect.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug, Default)]
struct ContextInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never expires on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// Cancel the call. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel` has been invoked.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Whether the call is cancelled or past its deadline.
    pub fn is_expired(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }
}

/// Single-slot sink for a call's result.
///
/// Backed by a oneshot channel behind a take-once latch: the first
/// delivery consumes the sender, so a second value can never be sent.
#[derive(Debug)]
pub struct ResultSink {
    slot: Mutex<Option<oneshot::Sender<CallResult>>>,
}

impl ResultSink {
    /// Create a sink and the receiver its one result will arrive on.
    pub fn channel() -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver the result. Returns `false` if a result was already
    /// delivered or the receiver is gone.
    pub fn deliver(&self, result: CallResult) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

/// The simplest possible call: a method name and an already-serialized
/// body. Useful for layers that do their own encoding, and in tests.
#[derive(Debug)]
pub struct RawCall {
    name: String,
    body: Bytes,
    context: CallContext,
    sink: ResultSink,
}

impl RawCall {
    /// Create a call and the receiver for its result.
    pub fn new(name: impl Into<String>, body: Bytes) -> (Self, oneshot::Receiver<CallResult>) {
        Self::with_context(name, body, CallContext::new())
    }

    /// Create a call with an explicit context.
    pub fn with_context(
        name: impl Into<String>,
        body: Bytes,
        context: CallContext,
    ) -> (Self, oneshot::Receiver<CallResult>) {
        let (sink, rx) = ResultSink::channel();
        (
            Self {
                name: name.into(),
                body,
                context,
                sink,
            },
            rx,
        )
    }
}

impl Call for RawCall {
    fn name(&self) -> &str {
        &self.name
    }

    fn serialize(&self) -> std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.body.clone())
    }

    fn context(&self) -> &CallContext {
        &self.context
    }

    fn result_sink(&self) -> &ResultSink {
        &self.sink
    }
}
