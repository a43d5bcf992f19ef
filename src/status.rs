//! Status codes and the crate error type
//!
//! Every failure in the secure channel engine is reported as a [`StatusCode`]
//! from a closed enumeration. The numeric values are the ones defined by
//! OPC UA Part 6 so they can be written on the wire unchanged.

use std::fmt;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// OPC UA status codes used by the secure channel layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    /// Operation succeeded
    Good = 0x0000_0000,
    /// An unexpected error occurred
    BadUnexpectedError = 0x8001_0000,
    /// An internal error occurred as a result of a programming or configuration error
    BadInternalError = 0x8002_0000,
    /// A low level communication error occurred
    BadCommunicationError = 0x8005_0000,
    /// Encoding halted because of invalid data in the objects being serialized
    BadEncodingError = 0x8006_0000,
    /// Decoding halted because of invalid data in the stream
    BadDecodingError = 0x8007_0000,
    /// The message encoding/decoding limits imposed by the stack have been exceeded
    BadEncodingLimitsExceeded = 0x8008_0000,
    /// An unrecognized response was received from the server
    BadUnknownResponse = 0x8009_0000,
    /// The operation timed out
    BadTimeout = 0x800A_0000,
    /// The server does not support the requested service
    BadServiceUnsupported = 0x800B_0000,
    /// The certificate provided as a parameter is not valid
    BadCertificateInvalid = 0x8012_0000,
    /// An error occurred verifying security
    BadSecurityChecksFailed = 0x8013_0000,
    /// The certificate has expired or is not yet valid
    BadCertificateTimeInvalid = 0x8014_0000,
    /// The certificate is not trusted
    BadCertificateUntrusted = 0x801A_0000,
    /// The specified secure channel is no longer valid
    BadSecureChannelIdInvalid = 0x8022_0000,
    /// The nonce does appear to be not a random value or it is not the correct length
    BadNonceInvalid = 0x8024_0000,
    /// The request was cancelled by the client
    BadRequestCancelledByClient = 0x802C_0000,
    /// The security token request type is not valid
    BadRequestTypeInvalid = 0x8053_0000,
    /// The security mode does not meet the requirements set by the server
    BadSecurityModeRejected = 0x8054_0000,
    /// The security policy does not meet the requirements set by the server
    BadSecurityPolicyRejected = 0x8055_0000,
    /// The type of the message specified in the header invalid
    BadTcpMessageTypeInvalid = 0x807E_0000,
    /// The size of the message chunk specified in the header is too large
    BadTcpMessageTooLarge = 0x8080_0000,
    /// The secure channel has been closed
    BadSecureChannelClosed = 0x8086_0000,
    /// The token has expired or is not recognized
    BadSecureChannelTokenUnknown = 0x8087_0000,
    /// The sequence number is not valid
    BadSequenceNumberInvalid = 0x8088_0000,
    /// The network connection has been closed
    BadConnectionClosed = 0x80AE_0000,
    /// The operation cannot be completed because the object is closed,
    /// uninitialized or in some other invalid state
    BadInvalidState = 0x80AF_0000,
    /// The request message size exceeds limits set by the server
    BadRequestTooLarge = 0x80B8_0000,
    /// The response message size exceeds limits set by the client
    BadResponseTooLarge = 0x80B9_0000,
}

impl StatusCode {
    /// Convert from the wire value, returns None for codes outside the enumeration
    pub fn from_u32(value: u32) -> Option<Self> {
        let code = match value {
            0x0000_0000 => Self::Good,
            0x8001_0000 => Self::BadUnexpectedError,
            0x8002_0000 => Self::BadInternalError,
            0x8005_0000 => Self::BadCommunicationError,
            0x8006_0000 => Self::BadEncodingError,
            0x8007_0000 => Self::BadDecodingError,
            0x8008_0000 => Self::BadEncodingLimitsExceeded,
            0x8009_0000 => Self::BadUnknownResponse,
            0x800A_0000 => Self::BadTimeout,
            0x800B_0000 => Self::BadServiceUnsupported,
            0x8012_0000 => Self::BadCertificateInvalid,
            0x8013_0000 => Self::BadSecurityChecksFailed,
            0x8014_0000 => Self::BadCertificateTimeInvalid,
            0x801A_0000 => Self::BadCertificateUntrusted,
            0x8022_0000 => Self::BadSecureChannelIdInvalid,
            0x8024_0000 => Self::BadNonceInvalid,
            0x802C_0000 => Self::BadRequestCancelledByClient,
            0x8053_0000 => Self::BadRequestTypeInvalid,
            0x8054_0000 => Self::BadSecurityModeRejected,
            0x8055_0000 => Self::BadSecurityPolicyRejected,
            0x807E_0000 => Self::BadTcpMessageTypeInvalid,
            0x8080_0000 => Self::BadTcpMessageTooLarge,
            0x8086_0000 => Self::BadSecureChannelClosed,
            0x8087_0000 => Self::BadSecureChannelTokenUnknown,
            0x8088_0000 => Self::BadSequenceNumberInvalid,
            0x80AE_0000 => Self::BadConnectionClosed,
            0x80AF_0000 => Self::BadInvalidState,
            0x80B8_0000 => Self::BadRequestTooLarge,
            0x80B9_0000 => Self::BadResponseTooLarge,
            _ => return None,
        };
        Some(code)
    }

    /// The wire value of this code
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// True if the severity bits mark the code as bad
    pub fn is_bad(self) -> bool {
        self.bits() & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:08X})", self, self.bits())
    }
}

/// Secure channel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A failure of the channel, the transport or the security layer
    #[error("{status}: {message}")]
    Status {
        /// Status code classifying the failure
        status: StatusCode,
        /// Human readable context
        message: String,
    },

    /// The server answered the request with a service fault
    #[error("service fault {status}: {reason}")]
    ServiceFault {
        /// Service result carried by the fault
        status: StatusCode,
        /// Diagnostic text supplied by the server
        reason: String,
    },
}

impl Error {
    /// Create an error with the given status code and context
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create a `BadInternalError`, used for lifecycle misuse and broken invariants
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadInternalError, message)
    }

    /// Create a `BadDecodingError`
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadDecodingError, message)
    }

    /// Create a `BadSecurityChecksFailed`
    pub fn security_checks_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadSecurityChecksFailed, message)
    }

    /// Create a `BadSecureChannelClosed`
    pub fn channel_closed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadSecureChannelClosed, message)
    }

    /// Create a `BadTimeout`
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadTimeout, message)
    }

    /// The status code carried by this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } | Self::ServiceFault { status, .. } => *status,
        }
    }

    /// True if the error came from a service fault rather than the channel
    pub fn is_service_fault(&self) -> bool {
        matches!(self, Self::ServiceFault { .. })
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Self::new(status, "")
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let status = match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => StatusCode::BadConnectionClosed,
            ErrorKind::TimedOut => StatusCode::BadTimeout,
            _ => StatusCode::BadCommunicationError,
        };
        Self::new(status, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_round_trip() {
        for code in [
            StatusCode::Good,
            StatusCode::BadTimeout,
            StatusCode::BadSecurityChecksFailed,
            StatusCode::BadSecureChannelClosed,
            StatusCode::BadSecurityPolicyRejected,
            StatusCode::BadCertificateTimeInvalid,
            StatusCode::BadInternalError,
        ] {
            assert_eq!(StatusCode::from_u32(code.bits()), Some(code));
        }
        assert_eq!(StatusCode::from_u32(0x8FFF_0000), None);
    }

    #[test]
    fn test_severity() {
        assert!(!StatusCode::Good.is_bad());
        assert!(StatusCode::BadTimeout.is_bad());
    }

    #[test]
    fn test_error_display() {
        let e = Error::timeout("waited 5s");
        assert_eq!(e.status(), StatusCode::BadTimeout);
        assert_eq!(e.to_string(), "BadTimeout (0x800A0000): waited 5s");

        let fault = Error::ServiceFault {
            status: StatusCode::BadServiceUnsupported,
            reason: "no".into(),
        };
        assert!(fault.is_service_fault());
        assert_eq!(fault.status(), StatusCode::BadServiceUnsupported);
    }

    #[test]
    fn test_io_error_mapping() {
        let e: Error = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(e.status(), StatusCode::BadConnectionClosed);
    }
}
