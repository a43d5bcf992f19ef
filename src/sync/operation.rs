//! Per-message operations
//!
//! A request in flight is a [`WriteOperation`] (getting the message onto the
//! wire) paired with a [`ReadOperation`] (getting the response back).

use super::async_result::AsyncResult;
use super::state::{ReadState, StateMachine, WriteState};
use crate::status::{Error, Result};

/// Write side of a request
#[derive(Debug, Default)]
pub struct WriteOperation {
    state: StateMachine<WriteState>,
}

impl WriteOperation {
    /// A write in the `Ready` state, not yet queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> WriteState {
        self.state.current()
    }

    /// Ready -> Queued
    pub fn queue(&self) -> Result<()> {
        self.state.transition(WriteState::Queued).map(|_| ())
    }

    /// Queued -> Writing; false if the write was canceled or failed first
    pub fn begin(&self) -> bool {
        self.state
            .transition_from(WriteState::Queued, WriteState::Writing)
    }

    /// Writing -> Written
    pub fn written(&self) -> Result<()> {
        self.state.transition(WriteState::Written).map(|_| ())
    }

    /// Move to Error from any non-terminal state
    pub fn fail(&self) -> bool {
        self.state.try_transition(WriteState::Error)
    }

    /// Withdraw the message; only possible before the write starts
    pub fn cancel(&self) -> bool {
        self.state.try_transition(WriteState::Canceled)
    }
}

/// Read side of a request, resolving an [`AsyncResult`]
#[derive(Debug)]
pub struct ReadOperation<T> {
    state: StateMachine<ReadState>,
    result: AsyncResult<T>,
}

impl<T: Clone + Send + 'static> ReadOperation<T> {
    /// A read waiting for its response
    pub fn new() -> Self {
        Self {
            state: StateMachine::new(),
            result: AsyncResult::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> ReadState {
        self.state.current()
    }

    /// Result handed to the caller
    ///
    /// Completion must go through this operation to keep the read state in step.
    pub(crate) fn result(&self) -> &AsyncResult<T> {
        &self.result
    }

    /// Complete with the response; `BadInternalError` if already terminal
    pub fn complete(&self, value: T) -> Result<()> {
        self.state.transition(ReadState::Complete)?;
        self.result.set_complete(value)
    }

    /// Fail the read; `BadInternalError` if already terminal
    pub fn fail(&self, error: Error) -> Result<()> {
        self.state.transition(ReadState::Error)?;
        self.result.set_error(error)
    }

    /// Complete unless already terminal
    pub fn attempt_complete(&self, value: T) -> bool {
        self.state.try_transition(ReadState::Complete) && self.result.attempt_complete(value)
    }

    /// Fail unless already terminal
    pub fn attempt_fail(&self, error: Error) -> bool {
        self.state.try_transition(ReadState::Error) && self.result.attempt_error(error)
    }
}

impl<T: Clone + Send + 'static> Default for ReadOperation<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;
    use crate::sync::ResultStatus;

    #[test]
    fn test_write_canceled_before_start() {
        let write = WriteOperation::new();
        write.queue().unwrap();
        assert!(write.cancel());
        assert!(!write.begin());
        assert_eq!(write.state(), WriteState::Canceled);
    }

    #[test]
    fn test_write_cannot_cancel_once_writing() {
        let write = WriteOperation::new();
        write.queue().unwrap();
        assert!(write.begin());
        assert!(!write.cancel());
        write.written().unwrap();
        assert!(!write.fail());
        assert_eq!(write.state(), WriteState::Written);
    }

    #[test]
    fn test_read_strict_and_attempt() {
        let read = ReadOperation::<u32>::new();
        read.complete(4).unwrap();
        assert_eq!(
            read.fail(Error::timeout("late")).unwrap_err().status(),
            StatusCode::BadInternalError
        );
        assert!(!read.attempt_fail(Error::timeout("late")));
        assert_eq!(read.result().status(), ResultStatus::Succeed);
        assert_eq!(read.result().get_result(), Some(4));
    }

    #[test]
    fn test_read_state_tracks_result() {
        let read = ReadOperation::<u32>::new();
        let waiter = read.result().clone();
        assert_eq!(read.state(), ReadState::Waiting);
        assert_eq!(waiter.status(), ResultStatus::Waiting);

        assert!(read.attempt_complete(9));
        assert_eq!(read.state(), ReadState::Complete);
        assert_eq!(waiter.get_result(), Some(9));
        assert!(!read.attempt_fail(Error::timeout("late")));
        assert_eq!(waiter.status(), ResultStatus::Succeed);
    }

    #[test]
    fn test_read_failure_reaches_result() {
        let read = ReadOperation::<u32>::new();
        assert!(read.attempt_fail(Error::channel_closed("closed")));
        assert!(!read.attempt_complete(1));
        assert_eq!(read.state(), ReadState::Error);
        assert_eq!(
            read.result().get_error().unwrap().status(),
            StatusCode::BadSecureChannelClosed
        );
    }
}
