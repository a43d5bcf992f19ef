//! Single assignment results
//!
//! An [`AsyncResult`] is completed exactly once, by whichever party wins, and
//! can be consumed in four ways:
//!
//! - polled with [`get_result`](AsyncResult::get_result) / [`get_error`](AsyncResult::get_error),
//! - blocked on with [`wait_for_result`](AsyncResult::wait_for_result),
//! - awaited with [`wait`](AsyncResult::wait),
//! - observed through a single [listener](AsyncResult::set_listener).
//!
//! Clones share the same slot.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::status::{Error, Result, StatusCode};

/// Completion status of an [`AsyncResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// Not completed yet
    Waiting,

    /// Completed with a value
    Succeed,

    /// Completed with an error
    Failed,
}

/// Callback invoked once with the completed result
pub type Listener<T> = Box<dyn FnOnce(&AsyncResult<T>) + Send>;

struct Slot<T> {
    outcome: Option<Result<T>>,
    listener: Option<Listener<T>>,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
    notify: Notify,
}

/// Thread safe single assignment container
pub struct AsyncResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> AsyncResult<T> {
    /// Create a result in the `Waiting` state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    outcome: None,
                    listener: None,
                }),
                done: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a result that already succeeded
    pub fn completed(value: T) -> Self {
        let result = Self::new();
        result.attempt_complete(value);
        result
    }

    /// Create a result that already failed
    pub fn failed(error: Error) -> Self {
        let result = Self::new();
        result.attempt_error(error);
        result
    }

    /// Current status
    pub fn status(&self) -> ResultStatus {
        match &self.inner.slot.lock().outcome {
            None => ResultStatus::Waiting,
            Some(Ok(_)) => ResultStatus::Succeed,
            Some(Err(_)) => ResultStatus::Failed,
        }
    }

    /// True once the result is terminal
    pub fn is_done(&self) -> bool {
        self.status() != ResultStatus::Waiting
    }

    /// The value, if the result succeeded
    pub fn get_result(&self) -> Option<T> {
        match &self.inner.slot.lock().outcome {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The error, if the result failed
    pub fn get_error(&self) -> Option<Error> {
        match &self.inner.slot.lock().outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    fn outcome(&self) -> Option<Result<T>> {
        self.inner.slot.lock().outcome.clone()
    }

    /// Complete with a value; fails with `BadInternalError` if already terminal
    pub fn set_complete(&self, value: T) -> Result<()> {
        if self.finish(Ok(value)) {
            Ok(())
        } else {
            Err(Error::internal("result already completed"))
        }
    }

    /// Complete with an error; fails with `BadInternalError` if already terminal
    pub fn set_error(&self, error: Error) -> Result<()> {
        if self.finish(Err(error)) {
            Ok(())
        } else {
            Err(Error::internal("result already completed"))
        }
    }

    /// Complete with a value unless already terminal; returns whether this call won
    pub fn attempt_complete(&self, value: T) -> bool {
        self.finish(Ok(value))
    }

    /// Complete with an error unless already terminal; returns whether this call won
    pub fn attempt_error(&self, error: Error) -> bool {
        self.finish(Err(error))
    }

    fn finish(&self, outcome: Result<T>) -> bool {
        let listener = {
            let mut slot = self.inner.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome);
            slot.listener.take()
        };
        self.inner.done.notify_all();
        self.inner.notify.notify_waiters();
        // Invoked outside the lock so the listener can read the result
        if let Some(listener) = listener {
            listener(self);
        }
        true
    }

    /// Install, replace or clear the listener
    ///
    /// If the result is already terminal the listener runs immediately on the
    /// calling thread; otherwise it runs on the thread that completes the result.
    pub fn set_listener(&self, listener: Option<Listener<T>>) {
        let run_now = {
            let mut slot = self.inner.slot.lock();
            if slot.outcome.is_some() {
                slot.listener = None;
                listener
            } else {
                slot.listener = listener;
                None
            }
        };
        if let Some(listener) = run_now {
            listener(self);
        }
    }

    /// Block until terminal
    pub fn wait_for_result(&self) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            self.inner.done.wait(&mut slot);
        }
    }

    /// Block until terminal or until `timeout` elapses
    ///
    /// A timeout fails the wait with `BadTimeout` and leaves the result untouched.
    pub fn wait_for_result_timeout(&self, timeout: Duration) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        if slot.outcome.is_none() {
            // Spurious wakeups are handled by wait_while_for
            self.inner
                .done
                .wait_while_for(&mut slot, |slot| slot.outcome.is_none(), timeout);
        }
        match &slot.outcome {
            Some(outcome) => outcome.clone(),
            None => Err(Error::timeout(format!(
                "no result within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Await the result for at most `timeout`
    ///
    /// A zero timeout still returns a result that is already terminal.
    pub async fn wait(&self, timeout: Duration) -> Result<T> {
        let completion = async {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(outcome) = self.outcome() {
                    return outcome;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(timeout, completion).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::new(
                StatusCode::BadTimeout,
                format!("no result within {} ms", timeout.as_millis()),
            )),
        }
    }

    /// Derive a result that completes when this one does
    ///
    /// `f` converts a value; an error returned by `f` fails the derived result.
    pub fn map<U, F>(&self, f: F) -> AsyncResult<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let mapped = AsyncResult::new();
        let target = mapped.clone();
        self.set_listener(Some(Box::new(move |source: &AsyncResult<T>| {
            let outcome = match source.outcome() {
                Some(Ok(value)) => f(value),
                Some(Err(e)) => Err(e),
                None => Err(Error::internal("listener invoked before completion")),
            };
            target.finish(outcome);
        })));
        mapped
    }
}

impl<T: Clone + Send + 'static> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        let status = match &slot.outcome {
            None => ResultStatus::Waiting,
            Some(Ok(_)) => ResultStatus::Succeed,
            Some(Err(_)) => ResultStatus::Failed,
        };
        f.debug_struct("AsyncResult")
            .field("status", &status)
            .field("listener", &slot.listener.is_some())
            .finish()
    }
}
