//! Outstanding requests of a client channel

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::service::ServiceResponse;
use crate::status::{Error, Result};
use crate::sync::{AsyncResult, ReadOperation, WriteOperation};

/// A request waiting for its response
#[derive(Debug)]
pub struct PendingRequest {
    /// Request id from the sequence header
    pub request_id: u32,

    /// Progress of the request onto the wire
    pub write: Arc<WriteOperation>,

    /// Progress of the response
    pub read: ReadOperation<ServiceResponse>,

    /// Submission time
    pub submitted_at: Instant,
}

impl PendingRequest {
    /// Track the request with this id
    pub fn new(request_id: u32) -> Self {
        Self {
            request_id,
            write: Arc::new(WriteOperation::new()),
            read: ReadOperation::new(),
            submitted_at: Instant::now(),
        }
    }

    /// Result handed to the caller
    pub(crate) fn result(&self) -> &AsyncResult<ServiceResponse> {
        self.read.result()
    }
}

#[derive(Debug, Default)]
struct Table {
    requests: HashMap<u32, Arc<PendingRequest>>,
    closed: bool,
}

/// Requests by id
///
/// Every entry leaves the table exactly once: completed, timed out or
/// failed. Once closed the table rejects new entries until reopened.
#[derive(Debug, Default)]
pub struct PendingTable {
    table: Mutex<Table>,
}

impl PendingTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request; `BadSecureChannelClosed` if the table is closed
    pub fn insert(&self, request: Arc<PendingRequest>) -> Result<()> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(Error::channel_closed("channel is not open"));
        }
        table.requests.insert(request.request_id, request);
        Ok(())
    }

    /// Take a request out of the table
    pub fn remove(&self, request_id: u32) -> Option<Arc<PendingRequest>> {
        self.table.lock().requests.remove(&request_id)
    }

    /// Remove and resolve a request; false if it was no longer pending
    pub fn complete(&self, request_id: u32, outcome: Result<ServiceResponse>) -> bool {
        let Some(request) = self.remove(request_id) else {
            return false;
        };
        match outcome {
            Ok(response) => request.read.attempt_complete(response),
            Err(e) => {
                request.write.fail();
                request.read.attempt_fail(e)
            }
        }
    }

    /// Fail requests submitted `timeout` or longer ago with `BadTimeout`
    pub fn expire(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<_> = {
            let mut table = self.table.lock();
            let ids: Vec<u32> = table
                .requests
                .values()
                .filter(|r| now.duration_since(r.submitted_at) >= timeout)
                .map(|r| r.request_id)
                .collect();
            ids.into_iter()
                .filter_map(|id| table.requests.remove(&id))
                .collect()
        };
        // Resolved outside the lock; listeners may submit again
        for request in &expired {
            log::debug!("Request {} timed out", request.request_id);
            request.read.attempt_fail(Error::timeout(format!(
                "request {} got no response within {} ms",
                request.request_id,
                timeout.as_millis()
            )));
        }
        expired.len()
    }

    /// Reject new entries and fail every pending one with `error`
    pub fn close(&self, error: &Error) -> usize {
        let drained: Vec<_> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.requests.drain().map(|(_, r)| r).collect()
        };
        for request in &drained {
            request.write.fail();
            request.read.attempt_fail(error.clone());
        }
        drained.len()
    }

    /// Accept entries again
    pub fn reopen(&self) {
        self.table.lock().closed = false;
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.table.lock().requests.len()
    }

    /// True when nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.table.lock().requests.is_empty()
    }
}
