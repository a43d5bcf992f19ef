//! Per-channel security configuration

use chrono::Utc;

use super::mode::SecurityMode;
use crate::crypto::{Certificate, KeyPair};
use crate::status::{Error, Result, StatusCode};

/// Security binding of one channel
///
/// Holds the negotiated mode, the local identity and the peer certificate.
/// A configuration that signs always has both.
#[derive(Debug, Clone)]
pub struct SecurityConfiguration {
    mode: SecurityMode,
    local: Option<KeyPair>,
    remote: Option<Certificate>,
}

impl SecurityConfiguration {
    /// Validate and build a configuration
    ///
    /// Fails with `BadCertificateInvalid` when a signing mode lacks the local
    /// key pair or the remote certificate, `BadSecurityPolicyRejected` when a
    /// key length is outside the policy bounds, and
    /// `BadCertificateTimeInvalid` when the remote certificate is not valid now.
    pub fn new(
        mode: SecurityMode,
        local: Option<KeyPair>,
        remote: Option<Certificate>,
    ) -> Result<Self> {
        if mode.signing_required() {
            let (local, remote) = match (&local, &remote) {
                (Some(local), Some(remote)) => (local, remote),
                (None, _) => {
                    return Err(Error::new(
                        StatusCode::BadCertificateInvalid,
                        "signing requires a local certificate and private key",
                    ))
                }
                (_, None) => {
                    return Err(Error::new(
                        StatusCode::BadCertificateInvalid,
                        "signing requires the remote certificate",
                    ))
                }
            };
            let policy = mode.policy();
            policy.check_key_length(local.private_key.bit_length())?;
            policy.check_key_length(remote.public_key().bit_length())?;
            remote.check_time_valid(Utc::now())?;
        }
        Ok(Self {
            mode,
            local,
            remote,
        })
    }

    /// Configuration of an unsecured channel
    pub fn none() -> Self {
        Self {
            mode: SecurityMode::none(),
            local: None,
            remote: None,
        }
    }

    /// Negotiated mode
    pub fn mode(&self) -> &SecurityMode {
        &self.mode
    }

    /// Local certificate and private key
    pub fn local(&self) -> Option<&KeyPair> {
        self.local.as_ref()
    }

    /// Peer certificate
    pub fn remote(&self) -> Option<&Certificate> {
        self.remote.as_ref()
    }

    /// Local identity, required by every signing mode
    pub(crate) fn require_local(&self) -> Result<&KeyPair> {
        self.local.as_ref().ok_or_else(|| {
            Error::new(StatusCode::BadCertificateInvalid, "no local key pair configured")
        })
    }

    /// Peer certificate, required by every signing mode
    pub(crate) fn require_remote(&self) -> Result<&Certificate> {
        self.remote.as_ref().ok_or_else(|| {
            Error::new(StatusCode::BadCertificateInvalid, "no remote certificate configured")
        })
    }
}
