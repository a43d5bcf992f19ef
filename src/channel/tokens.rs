//! The tokens of a channel
//!
//! The newest token protects everything a side sends from now on. Older
//! tokens remain usable for verification until their own lifetime elapses.

use std::sync::Arc;

use crate::crypto::SecurityToken;
use crate::status::{Error, Result, StatusCode};

/// Current token plus the superseded ones that have not expired
///
/// Cloning is cheap; readers take a snapshot instead of holding a lock while
/// verifying.
#[derive(Debug, Clone)]
pub struct TokenSet {
    current: Arc<SecurityToken>,
    previous: Vec<Arc<SecurityToken>>,
}

impl TokenSet {
    /// A set holding only the first token of a channel
    pub fn new(token: SecurityToken) -> Self {
        Self {
            current: Arc::new(token),
            previous: Vec::new(),
        }
    }

    /// Token used for new outgoing messages
    pub fn current(&self) -> Arc<SecurityToken> {
        Arc::clone(&self.current)
    }

    /// Make `token` current, keeping the old one for verification
    pub fn activate(&mut self, token: SecurityToken) -> Arc<SecurityToken> {
        let token = Arc::new(token);
        let old = std::mem::replace(&mut self.current, Arc::clone(&token));
        self.previous.push(old);
        self.prune();
        token
    }

    /// Drop superseded tokens whose lifetime elapsed
    pub fn prune(&mut self) {
        self.previous.retain(|t| !t.is_expired());
    }

    /// Find a token that may still verify messages
    ///
    /// Unknown and expired ids fail with `BadSecureChannelTokenUnknown`.
    pub fn find(&self, token_id: u32) -> Result<Arc<SecurityToken>> {
        let token = std::iter::once(&self.current)
            .chain(self.previous.iter())
            .find(|t| t.token_id() == token_id)
            .ok_or_else(|| {
                Error::new(
                    StatusCode::BadSecureChannelTokenUnknown,
                    format!("unknown token {}", token_id),
                )
            })?;
        if token.is_expired() {
            return Err(Error::new(
                StatusCode::BadSecureChannelTokenUnknown,
                format!("token {} expired", token_id),
            ));
        }
        Ok(Arc::clone(token))
    }

    /// Ids of all retained tokens, newest first
    pub fn token_ids(&self) -> Vec<u32> {
        std::iter::once(&self.current)
            .chain(self.previous.iter().rev())
            .map(|t| t.token_id())
            .collect()
    }
}
