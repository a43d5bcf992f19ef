//! Sequence numbers
//!
//! Each direction of a channel numbers its chunks from 1. Numbers strictly
//! increase and wrap back to 1 after [`MAX_SEQUENCE_NUMBER`].

use crate::status::{Error, Result, StatusCode};

/// Last sequence number before wrapping
pub const MAX_SEQUENCE_NUMBER: u32 = 4_294_966_271;

/// A wrapped number must be below this value, and the previous one above
/// `MAX_SEQUENCE_NUMBER - WRAP_WINDOW`
const WRAP_WINDOW: u32 = 1024;

/// Generator for outgoing sequence numbers
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u32,
}

impl SequenceCounter {
    /// A counter whose first number is 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Start from an arbitrary value
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Take the next number
    pub fn next(&mut self) -> u32 {
        let current = self.next;
        self.next = if current >= MAX_SEQUENCE_NUMBER {
            1
        } else {
            current + 1
        };
        current
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks incoming sequence numbers
#[derive(Debug, Clone, Default)]
pub struct SequenceValidator {
    last: Option<u32>,
}

impl SequenceValidator {
    /// A validator that has seen no number yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `number` if it follows the last accepted one
    ///
    /// Gaps are tolerated; replays and reordering fail with
    /// `BadSequenceNumberInvalid`.
    pub fn check(&mut self, number: u32) -> Result<()> {
        let valid = number != 0
            && number <= MAX_SEQUENCE_NUMBER
            && match self.last {
                None => true,
                Some(last) => {
                    number > last
                        || (last > MAX_SEQUENCE_NUMBER - WRAP_WINDOW && number < WRAP_WINDOW)
                }
            };
        if !valid {
            return Err(Error::new(
                StatusCode::BadSequenceNumberInvalid,
                format!(
                    "sequence number {} does not follow {:?}",
                    number, self.last
                ),
            ));
        }
        self.last = Some(number);
        Ok(())
    }

    /// Last accepted number
    pub fn last(&self) -> Option<u32> {
        self.last
    }
}
