//! The connection client: lifecycle, write pump, read pump, shutdown.
//!
//! One [`RpcClient`] owns one duplex connection to a region server or the
//! master. Any number of producers submit calls; two long-lived tasks do
//! all the I/O:
//!
//! ```text
//! producer ─┐
//! producer ─┼─► bounded queue ─► write loop ─► connection
//! producer ─┘                        │              │
//!                                    ▼              ▼
//!                              pending table ◄── read loop ─► result sinks
//! ```
//!
//! The write loop drains the queue, batches calls, assigns ids, frames and
//! writes them, and is the only component that inserts into the pending
//! table; the read loop and the terminal sweep only remove. A single watch
//! channel broadcasts the terminal transition, and [`Shared::fail`] is the
//! sole code path that makes it: invoked by [`RpcClient::close`], by any
//! write failure, by any read failure, and by protocol violations. Once it
//! runs, every queued and in-flight call is completed with
//! [`RpcError::Unrecoverable`], so an accepted call never goes unanswered.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant};

use crate::call::BoxCall;
use crate::error::{Result, RpcError};
use crate::pending::PendingCalls;
use crate::protocol::{self, RequestHeader, ServiceKind};

/// Default capacity of the inbound queue and maximum batch size.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Default maximum time the write loop waits to grow a batch.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

/// Pacing parameters for one client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the inbound call queue, and the largest batch the
    /// write loop sends in one go. Producers block once the queue is full.
    pub queue_size: usize,
    /// Longest the write loop waits for more calls after the first one of
    /// a batch arrives. A write-side batching knob only, never a per-call
    /// deadline.
    pub flush_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// State shared between the client handle and its pump tasks.
struct Shared {
    pending: PendingCalls,
    done: watch::Sender<bool>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: PendingCalls::new(),
            done: watch::channel(false).0,
        }
    }

    /// Non-blocking terminal check.
    fn is_dead(&self) -> bool {
        *self.done.borrow()
    }

    /// Make the client terminal. Idempotent and safe from any task
    /// concurrently; only the first caller's error is recorded. Flips the
    /// done signal, then completes every call that was awaiting a
    /// response with the terminal error.
    fn fail(&self, err: RpcError) {
        let Some(swept) = self.pending.fail_once(err.clone()) else {
            return;
        };
        tracing::error!(error = %err, "client is terminal");
        self.done.send_replace(true);
        let failure = err.unrecoverable();
        for call in swept {
            call.result_sink().deliver(Err(failure.clone()));
        }
    }
}

/// RPC client multiplexing concurrent calls over one connection.
///
/// Cheap to clone; all clones drive the same connection. Dropping every
/// clone closes the queue: the write loop flushes what it already
/// accepted and the connection winds down.
#[derive(Clone)]
pub struct RpcClient {
    rpcs: mpsc::Sender<BoxCall>,
    shared: Arc<Shared>,
    kind: ServiceKind,
}

impl RpcClient {
    /// Connect to `addr`, announce the service, and start the pumps.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        kind: ServiceKind,
        config: ClientConfig,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream, kind, config).await
    }

    /// Take ownership of an established duplex stream, announce the
    /// service, and start the pumps. The preamble is written before this
    /// returns; the server sends nothing back for it.
    pub async fn from_stream<S>(stream: S, kind: ServiceKind, config: ClientConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        write_frame(&mut write_half, &protocol::hello_frame(kind)).await?;

        let (rpcs, rx) = mpsc::channel(config.queue_size.max(1));
        let shared = Arc::new(Shared::new());

        tokio::spawn(write_loop(write_half, rx, Arc::clone(&shared), config));
        tokio::spawn(read_loop(read_half, Arc::clone(&shared)));
        tracing::debug!(service = kind.service_name(), "client started");

        Ok(Self { rpcs, shared, kind })
    }

    /// Which service this client talks to.
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Whether the client has reached its terminal state. Advisory: a
    /// `false` may be stale by the time the caller acts on it.
    pub fn is_dead(&self) -> bool {
        self.shared.is_dead()
    }

    /// The error that made the client terminal, once it is dead.
    pub fn terminal_error(&self) -> Option<RpcError> {
        self.shared.pending.terminal_error()
    }

    /// Submit a call.
    ///
    /// Safe from any number of tasks concurrently. Blocks only while the
    /// inbound queue is full. If the client is already dead, or dies
    /// while the call is waiting to be accepted, the call's sink
    /// receives [`RpcError::Unrecoverable`] wrapping
    /// [`RpcError::ClientDead`] instead.
    pub async fn queue_rpc(&self, call: BoxCall) {
        if self.shared.is_dead() {
            reject(call);
            return;
        }
        // Losing the race against shutdown hands the call back; no state
        // is shared with the closed queue.
        if let Err(mpsc::error::SendError(call)) = self.rpcs.send(call).await {
            reject(call);
        }
    }

    /// Shut the client down. Every queued and in-flight call receives
    /// [`RpcError::Unrecoverable`]. Idempotent.
    pub fn close(&self) {
        self.shared.fail(RpcError::ClientDead);
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("kind", &self.kind)
            .field("dead", &self.is_dead())
            .field("in_flight", &self.shared.pending.len())
            .finish()
    }
}

/// Complete a call that will never be written.
fn reject(call: BoxCall) {
    call.result_sink()
        .deliver(Err(RpcError::ClientDead.unrecoverable()));
}

/// A call paired with the id the server will echo back.
struct OutboundRpc {
    id: u32,
    call: BoxCall,
}

/// Single consumer of the inbound queue.
///
/// Accumulates a batch until it is full, the flush interval expires, the
/// queue closes, or the client dies; assigns ids in arrival order; sends
/// the batch; repeats. On the terminal transition every call this task
/// still holds (batched but unwritten, or still queued) is completed
/// with an unrecoverable error, so nothing is dropped on the floor.
async fn write_loop<W>(
    mut conn: W,
    mut rpcs: mpsc::Receiver<BoxCall>,
    shared: Arc<Shared>,
    config: ClientConfig,
) where
    W: AsyncWrite + Unpin,
{
    let mut done = shared.done.subscribe();
    let batch_limit = config.queue_size.max(1);
    let mut next_id: u32 = 0;
    let mut queue_open = true;

    while queue_open && !shared.is_dead() {
        let first = tokio::select! {
            _ = done.wait_for(|&dead| dead) => break,
            call = rpcs.recv() => match call {
                Some(call) => call,
                None => break,
            },
        };

        let mut batch = Vec::with_capacity(batch_limit);
        batch.push(OutboundRpc {
            id: next_id,
            call: first,
        });
        next_id = next_id.wrapping_add(1);

        let flush_at = Instant::now() + config.flush_interval;
        while batch.len() < batch_limit {
            tokio::select! {
                _ = done.wait_for(|&dead| dead) => break,
                _ = time::sleep_until(flush_at) => break,
                call = rpcs.recv() => match call {
                    Some(call) => {
                        batch.push(OutboundRpc { id: next_id, call });
                        next_id = next_id.wrapping_add(1);
                    }
                    None => {
                        queue_open = false;
                        break;
                    }
                },
            }
        }

        for call in send_batch(&mut conn, batch, &shared).await {
            reject(call);
        }
    }

    // Close the queue so blocked producers fail over instead of waiting
    // on a consumer that is gone, then complete whatever is still
    // buffered: once terminal it can never be written.
    rpcs.close();
    if shared.is_dead() {
        while let Ok(call) = rpcs.try_recv() {
            reject(call);
        }
    }
    let _ = conn.shutdown().await;
    tracing::debug!("write loop exited");
}

/// Send one batch in id order.
///
/// Per call: an expired context drops the call without a result (its
/// originator observes the cancellation itself); a serialize failure
/// delivers that error and the batch continues; everything else is
/// installed in the pending table and then written. A write failure kills
/// the whole client. Returns the calls that were neither written nor
/// completed; the caller owes each of them a result.
async fn send_batch<W>(conn: &mut W, batch: Vec<OutboundRpc>, shared: &Shared) -> Vec<BoxCall>
where
    W: AsyncWrite + Unpin,
{
    let mut rpcs = batch.into_iter();
    while let Some(OutboundRpc { id, call }) = rpcs.next() {
        if call.context().is_expired() {
            tracing::debug!(id, "dropping call with expired context");
            continue;
        }
        if shared.is_dead() {
            let mut residual = vec![call];
            residual.extend(rpcs.map(|rpc| rpc.call));
            return residual;
        }

        let body = match call.serialize() {
            Ok(body) => body,
            Err(cause) => {
                call.result_sink()
                    .deliver(Err(RpcError::Serialize(cause.to_string())));
                continue;
            }
        };
        let frame = protocol::request_frame(&RequestHeader::new(id, call.name()), &body);

        // Install before writing so the response can never race ahead of
        // the table entry.
        if let Err((call, _)) = shared.pending.insert(id, call) {
            let mut residual = vec![call];
            residual.extend(rpcs.map(|rpc| rpc.call));
            return residual;
        }
        if let Err(err) = write_frame(conn, &frame).await {
            // The failing call is already in the pending table; the
            // terminal sweep completes it along with everything else.
            shared.fail(err);
            return rpcs.map(|rpc| rpc.call).collect();
        }
    }
    Vec::new()
}

/// Single consumer of the connection's read side.
///
/// Reads one length-prefixed response at a time, matches it to its
/// pending call by id, and delivers the payload or the server-side
/// exception. Any read error, malformed frame, or response for an unknown
/// id is terminal for the whole client.
async fn read_loop<R>(mut conn: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut done = shared.done.subscribe();
    loop {
        let mut len = [0u8; 4];
        tokio::select! {
            _ = done.wait_for(|&dead| dead) => return,
            res = conn.read_exact(&mut len) => {
                if let Err(err) = res {
                    shared.fail(RpcError::Read(err.to_string()));
                    return;
                }
            }
        }

        let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
        tokio::select! {
            _ = done.wait_for(|&dead| dead) => return,
            res = conn.read_exact(&mut frame) => {
                if let Err(err) = res {
                    shared.fail(RpcError::Read(err.to_string()));
                    return;
                }
            }
        }

        let (header, body) = match protocol::parse_response(frame.into()) {
            Ok(parts) => parts,
            Err(err) => {
                shared.fail(err);
                return;
            }
        };

        let Some(call) = shared.pending.remove(header.call_id) else {
            // A response for a call we never sent (or one answered
            // twice): the correlation state can no longer be trusted.
            shared.fail(RpcError::Protocol(format!(
                "got a response for an unknown call id {}",
                header.call_id
            )));
            return;
        };

        let result = match header.exception {
            Some(exception) => {
                tracing::warn!(
                    id = header.call_id,
                    class = %exception.class,
                    "call failed on the server"
                );
                Err(RpcError::RemoteException {
                    class: exception.class,
                    stack_trace: exception.stack_trace,
                })
            }
            None => Ok(body),
        };
        call.result_sink().deliver(result);
    }
}

/// Write one buffer in full. The underlying error propagates; the
/// connection accepting fewer bytes than offered is
/// [`RpcError::ShortWrite`]. No partial-write retry: any failure here
/// means the connection is unusable.
async fn write_frame<W>(conn: &mut W, buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = conn.write(buf).await?;
    if written < buf.len() {
        return Err(RpcError::ShortWrite);
    }
    conn.flush().await?;
    Ok(())
}
