//! Lifecycle state machines
//!
//! Every lifecycle in the channel (a message write, a response read and the
//! channel itself) is a small enum with an explicit transition table. The
//! [`StateMachine`] wrapper enforces the table and rejects anything else with
//! `BadInternalError`.

use std::fmt;

use parking_lot::Mutex;

use crate::status::{Error, Result};

/// A state enum with an explicit transition table
pub trait Lifecycle: Copy + Eq + fmt::Debug + Send + 'static {
    /// State a new machine starts in
    const INITIAL: Self;

    /// True if `self -> to` is a legal edge
    fn can_transition(self, to: Self) -> bool;

    /// True if no edge leaves this state
    fn is_terminal(self) -> bool {
        false
    }
}

/// A thread safe instance of a [`Lifecycle`]
pub struct StateMachine<S: Lifecycle> {
    state: Mutex<S>,
}

impl<S: Lifecycle> StateMachine<S> {
    /// Create a machine in the initial state
    pub fn new() -> Self {
        Self {
            state: Mutex::new(S::INITIAL),
        }
    }

    /// Current state
    pub fn current(&self) -> S {
        *self.state.lock()
    }

    /// Move to `to`, returning the previous state
    pub fn transition(&self, to: S) -> Result<S> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition(to) {
            return Err(Error::internal(format!(
                "illegal transition {:?} -> {:?}",
                from, to
            )));
        }
        *state = to;
        Ok(from)
    }

    /// Move to `to` only if the machine is currently in `from`
    ///
    /// Returns false without changing anything otherwise.
    pub fn transition_from(&self, from: S, to: S) -> bool {
        let mut state = self.state.lock();
        if *state != from || !from.can_transition(to) {
            return false;
        }
        *state = to;
        true
    }

    /// Move to `to` if that is legal from the current state
    pub fn try_transition(&self, to: S) -> bool {
        self.transition(to).is_ok()
    }
}

impl<S: Lifecycle> Default for StateMachine<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Lifecycle> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateMachine({:?})", self.current())
    }
}

/// Lifecycle of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteState {
    /// Created, not yet queued
    Ready,

    /// Waiting in the write queue
    Queued,

    /// Being protected and written
    Writing,

    /// Fully handed to the transport
    Written,

    /// Failed before or during the write
    Error,

    /// Withdrawn before the write started
    Canceled,
}

impl Lifecycle for WriteState {
    const INITIAL: Self = Self::Ready;

    fn can_transition(self, to: Self) -> bool {
        use WriteState::*;
        matches!(
            (self, to),
            (Ready, Queued)
                | (Ready, Canceled)
                | (Ready, Error)
                | (Queued, Writing)
                | (Queued, Canceled)
                | (Queued, Error)
                | (Writing, Written)
                | (Writing, Error)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Written | Self::Error | Self::Canceled)
    }
}

/// Lifecycle of the response to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadState {
    /// No response yet
    Waiting,

    /// Response received
    Complete,

    /// Failed, timed out or canceled
    Error,
}

impl Lifecycle for ReadState {
    const INITIAL: Self = Self::Waiting;

    fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Waiting, Self::Complete) | (Self::Waiting, Self::Error)
        )
    }

    fn is_terminal(self) -> bool {
        self != Self::Waiting
    }
}

/// Lifecycle of a secure channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No transport, no token
    Closed,

    /// Connecting or reconnecting and negotiating a token
    Opening,

    /// Token active, messages flow
    Open,

    /// Draining and sending the close message
    Closing,
}

impl ChannelState {
    /// True in the states where queued messages may still be written
    pub fn is_open_for_write(self) -> bool {
        matches!(self, Self::Open | Self::Closing)
    }

    /// True in the states where no response can be read
    pub fn is_closed_for_read(self) -> bool {
        matches!(self, Self::Closed | Self::Opening)
    }
}

impl Lifecycle for ChannelState {
    const INITIAL: Self = Self::Closed;

    fn can_transition(self, to: Self) -> bool {
        use ChannelState::*;
        matches!(
            (self, to),
            (Closed, Opening)
                | (Opening, Open)
                | (Opening, Closed)
                | (Opening, Closing)
                | (Open, Opening)
                | (Open, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
