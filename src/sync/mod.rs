//! Concurrency primitives shared by the channel and its callers
//!
//! - [`AsyncResult`]: single assignment result with polling, blocking,
//!   awaiting and listener consumption.
//! - [`StateMachine`]: a [`Lifecycle`] enum guarded by an explicit transition table.
//! - [`WriteOperation`] / [`ReadOperation`]: the two halves of a request in flight.

pub mod async_result;
pub mod operation;
pub mod state;

pub use async_result::{AsyncResult, Listener, ResultStatus};
pub use operation::{ReadOperation, WriteOperation};
pub use state::{ChannelState, Lifecycle, ReadState, StateMachine, WriteState};
