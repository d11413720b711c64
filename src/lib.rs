//! # regionrpc
//!
//! Multiplexing RPC client for the HBase region server wire protocol.
//!
//! One [`RpcClient`] owns one long-lived TCP connection to a region
//! server or the master. Any number of tasks submit [`Call`]s
//! concurrently; the client batches them into framed writes, correlates
//! the out-of-order responses by call id, and delivers exactly one result
//! per accepted call. That holds even when the connection dies: every
//! outstanding call observes [`RpcError::Unrecoverable`] and an outer
//! layer decides whether to reconnect.
//!
//! Out of scope here: region discovery, payload encoding (a [`Call`] is
//! an opaque capability producing its own serialized body), TLS/auth
//! negotiation, and retry policy.
//!
//! ## Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use regionrpc::{ClientConfig, RawCall, RpcClient, ServiceKind};
//!
//! #[tokio::main]
//! async fn main() -> regionrpc::Result<()> {
//!     let client = RpcClient::connect(
//!         "regionserver:16020",
//!         ServiceKind::Region,
//!         ClientConfig::default(),
//!     )
//!     .await?;
//!
//!     let (call, response) = RawCall::new("Get", Bytes::from_static(b"..."));
//!     client.queue_rpc(Box::new(call)).await;
//!     let payload = response.await.expect("client delivers exactly one result")?;
//!     println!("{} response bytes", payload.len());
//!     Ok(())
//! }
//! ```

pub mod call;
pub mod error;
pub mod protocol;

mod client;
mod pending;

pub use call::{BoxCall, Call, CallContext, CallResult, RawCall, ResultSink};
pub use client::{ClientConfig, RpcClient, DEFAULT_FLUSH_INTERVAL, DEFAULT_QUEUE_SIZE};
pub use error::{Result, RpcError};
pub use protocol::ServiceKind;
