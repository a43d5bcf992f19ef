//! Security modes
//!
//! The mode pairs a policy with the protection applied to every message.

use std::fmt;

use crate::crypto::SecurityPolicy;
use crate::status::{Error, Result, StatusCode};

/// Message security mode as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum MessageSecurityMode {
    /// No signing, no encryption
    None = 1,

    /// Messages are signed
    Sign = 2,

    /// Messages are signed and encrypted
    SignAndEncrypt = 3,
}

impl MessageSecurityMode {
    /// Decode the wire value
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::None),
            2 => Ok(Self::Sign),
            3 => Ok(Self::SignAndEncrypt),
            other => Err(Error::new(
                StatusCode::BadSecurityModeRejected,
                format!("invalid message security mode {}", other),
            )),
        }
    }

    /// True if messages are signed
    pub fn signs(self) -> bool {
        self != Self::None
    }

    /// True if messages are encrypted
    pub fn encrypts(self) -> bool {
        self == Self::SignAndEncrypt
    }
}

impl Default for MessageSecurityMode {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        };
        f.write_str(name)
    }
}

/// A policy together with its signing and encryption requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityMode {
    policy: SecurityPolicy,
    sign: bool,
    encrypt: bool,
}

impl SecurityMode {
    /// Combine a policy with a wire mode
    ///
    /// The None policy only admits [`MessageSecurityMode::None`]; every other
    /// policy requires at least signing. Violations fail with
    /// `BadSecurityModeRejected`.
    pub fn new(policy: SecurityPolicy, mode: MessageSecurityMode) -> Result<Self> {
        Self::with_flags(policy, mode.signs(), mode.encrypts())
    }

    /// Combine a policy with explicit flags
    pub fn with_flags(policy: SecurityPolicy, sign: bool, encrypt: bool) -> Result<Self> {
        if encrypt && !sign {
            return Err(Error::new(
                StatusCode::BadSecurityModeRejected,
                "encryption requires signing",
            ));
        }
        if policy.is_none() == sign {
            return Err(Error::new(
                StatusCode::BadSecurityModeRejected,
                format!(
                    "policy {} cannot be used with sign={} encrypt={}",
                    policy.uri, sign, encrypt
                ),
            ));
        }
        Ok(Self {
            policy,
            sign,
            encrypt,
        })
    }

    /// The unsecured mode
    pub fn none() -> Self {
        Self {
            policy: SecurityPolicy::none(),
            sign: false,
            encrypt: false,
        }
    }

    /// Negotiated policy
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// True if messages must be signed
    pub fn signing_required(&self) -> bool {
        self.sign
    }

    /// True if messages must be encrypted
    pub fn encryption_required(&self) -> bool {
        self.encrypt
    }

    /// The wire representation of the flags
    pub fn message_mode(&self) -> MessageSecurityMode {
        match (self.sign, self.encrypt) {
            (true, true) => MessageSecurityMode::SignAndEncrypt,
            (true, false) => MessageSecurityMode::Sign,
            _ => MessageSecurityMode::None,
        }
    }
}
