//! Channel configuration
//!
//! Plain values with `Default`; with the `serde` feature they can be read
//! from any serde format the application uses.

use std::time::Duration;

use crate::crypto::{ProviderRegistry, POLICY_URI_NONE};
use crate::security::MessageSecurityMode;

/// Default operation timeout
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default requested token lifetime
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Default maximum chunk size in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Client channel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChannelSettings {
    /// Security policy URI requested from the server
    pub policy_uri: String,

    /// Message security mode requested from the server
    pub security_mode: MessageSecurityMode,

    /// Token lifetime requested on open and renew
    pub requested_lifetime: Duration,

    /// Bound on waiting for a response
    pub operation_timeout: Duration,

    /// Largest chunk sent or accepted
    pub max_message_size: usize,

    /// Name of the crypto provider
    pub provider: String,

    /// Reconnect after a transport loss when requests are outstanding
    pub reconnect: bool,

    /// Period of the pending table sweep
    pub housekeeping_interval: Duration,

    /// Bound on writing the close message
    pub close_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            policy_uri: POLICY_URI_NONE.to_string(),
            security_mode: MessageSecurityMode::None,
            requested_lifetime: DEFAULT_TOKEN_LIFETIME,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            provider: ProviderRegistry::DEFAULT.to_string(),
            reconnect: true,
            housekeeping_interval: Duration::from_secs(1),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// A policy and mode a server endpoint accepts
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SecurityModeBinding {
    /// Security policy URI
    pub policy_uri: String,

    /// Message security mode
    pub mode: MessageSecurityMode,
}

impl SecurityModeBinding {
    pub fn new(policy_uri: impl Into<String>, mode: MessageSecurityMode) -> Self {
        Self {
            policy_uri: policy_uri.into(),
            mode,
        }
    }
}

/// Address of an endpoint and the security it accepts
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointBinding {
    /// Endpoint URL
    pub url: String,

    /// Accepted policy and mode combinations
    pub modes: Vec<SecurityModeBinding>,
}

impl EndpointBinding {
    /// True if any binding names the policy
    pub fn accepts_policy(&self, policy_uri: &str) -> bool {
        self.modes.iter().any(|m| m.policy_uri == policy_uri)
    }

    /// True if the exact policy and mode pair is bound
    pub fn accepts(&self, policy_uri: &str, mode: MessageSecurityMode) -> bool {
        self.modes
            .iter()
            .any(|m| m.policy_uri == policy_uri && m.mode == mode)
    }
}

impl Default for EndpointBinding {
    fn default() -> Self {
        Self {
            url: "opc.tcp://localhost:4840".to_string(),
            modes: vec![SecurityModeBinding::new(
                POLICY_URI_NONE,
                MessageSecurityMode::None,
            )],
        }
    }
}

/// Server channel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerSettings {
    /// Endpoint served by the channel
    pub endpoint: EndpointBinding,

    /// Lower bound of revised token lifetimes
    pub min_token_lifetime: Duration,

    /// Upper bound of revised token lifetimes
    pub max_token_lifetime: Duration,

    /// Largest chunk sent or accepted
    pub max_message_size: usize,

    /// Name of the crypto provider
    pub provider: String,
}

impl ServerSettings {
    /// Clamp a requested lifetime to the configured bounds
    pub fn revise_lifetime(&self, requested: Duration) -> Duration {
        requested
            .max(self.min_token_lifetime)
            .min(self.max_token_lifetime)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            endpoint: EndpointBinding::default(),
            min_token_lifetime: Duration::from_secs(10),
            max_token_lifetime: DEFAULT_TOKEN_LIFETIME,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            provider: ProviderRegistry::DEFAULT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::POLICY_URI_BASIC128RSA15;

    #[test]
    fn test_defaults() {
        let settings = ChannelSettings::default();
        assert_eq!(settings.operation_timeout, Duration::from_secs(120));
        assert_eq!(settings.provider, "rustcrypto");
        assert!(settings.reconnect);
    }

    #[test]
    fn test_lifetime_clamped() {
        let settings = ServerSettings::default();
        assert_eq!(
            settings.revise_lifetime(Duration::from_secs(1)),
            Duration::from_secs(10)
        );
        assert_eq!(
            settings.revise_lifetime(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
        assert_eq!(
            settings.revise_lifetime(Duration::from_secs(86_400)),
            DEFAULT_TOKEN_LIFETIME
        );
    }

    #[test]
    fn test_endpoint_binding() {
        let endpoint = EndpointBinding {
            url: "opc.tcp://plant:4840".to_string(),
            modes: vec![SecurityModeBinding::new(
                POLICY_URI_BASIC128RSA15,
                MessageSecurityMode::SignAndEncrypt,
            )],
        };
        assert!(endpoint.accepts_policy(POLICY_URI_BASIC128RSA15));
        assert!(!endpoint.accepts_policy(POLICY_URI_NONE));
        assert!(!endpoint.accepts(POLICY_URI_BASIC128RSA15, MessageSecurityMode::Sign));
    }
}
