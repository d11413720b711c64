//! Table of calls written to the wire and awaiting their responses.
//!
//! One mutex guards both the id→call map and the terminal error slot, so
//! an insert can never race past the terminal sweep: once the client is
//! dead, inserts hand the call straight back with the terminal error.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::call::BoxCall;
use crate::error::RpcError;

#[derive(Default)]
struct Inner {
    sent: HashMap<u32, BoxCall>,
    dead: Option<RpcError>,
}

/// Correlation table from call id to in-flight call.
#[derive(Default)]
pub(crate) struct PendingCalls {
    inner: Mutex<Inner>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a call under its id. Once the table is terminal the call is
    /// handed back together with the terminal error.
    pub(crate) fn insert(&self, id: u32, call: BoxCall) -> Result<(), (BoxCall, RpcError)> {
        let mut inner = self.lock();
        if let Some(err) = &inner.dead {
            return Err((call, err.clone()));
        }
        inner.sent.insert(id, call);
        Ok(())
    }

    /// Remove and return the call with the given id, if present.
    pub(crate) fn remove(&self, id: u32) -> Option<BoxCall> {
        self.lock().sent.remove(&id)
    }

    /// Number of calls awaiting a response.
    pub(crate) fn len(&self) -> usize {
        self.lock().sent.len()
    }

    /// The terminal error, once recorded.
    pub(crate) fn terminal_error(&self) -> Option<RpcError> {
        self.lock().dead.clone()
    }

    /// Record the terminal error and drain the table, exactly once.
    /// Returns `None` on every invocation after the first; the first
    /// caller owns the drained calls and must complete them.
    pub(crate) fn fail_once(&self, err: RpcError) -> Option<Vec<BoxCall>> {
        let mut inner = self.lock();
        if inner.dead.is_some() {
            return None;
        }
        inner.dead = Some(err);
        Some(inner.sent.drain().map(|(_, call)| call).collect())
    }
}
