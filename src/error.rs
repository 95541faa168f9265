//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use num_enum::TryFromPrimitive;

include!(concat!(env!("OUT_DIR"), "/ua.rs"));

pub(crate) fn sdk_version() -> &'static str {
    SDK_VERSION
}

pub(crate) fn user_agent() -> &'static str {
    USER_AGENT
}

/// The error type returned by all fallible operations in this library.
#[derive(Debug, Clone)]
pub struct TunnelError {
    pub code: TunnelErrorCode,
    pub message: String,
}

impl std::error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::fmt::Display for TunnelError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "code={:?} message=\"{}\"", self.code, self.message)
    }
}

impl TunnelError {
    pub fn new(code: TunnelErrorCode, msg: &str) -> TunnelError {
        TunnelError {
            code,
            message: msg.to_string(),
        }
    }

    /// Build an error from an integer code as returned by the service.
    pub fn from_int(icode: i32, msg: &str) -> TunnelError {
        if let Ok(code) = TunnelErrorCode::try_from(icode) {
            return TunnelError {
                code,
                message: msg.to_string(),
            };
        }
        TunnelError {
            code: TunnelErrorCode::UnknownError,
            message: format!("Invalid integer error code {}: {}", icode, msg),
        }
    }

    /// Returns true if the error is a transient I/O condition.
    ///
    /// A retryable error still terminates the current channel pipeline; the
    /// orchestrator is expected to re-dial the channel on a later heartbeat.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            TunnelErrorCode::RequestTimeout
                | TunnelErrorCode::ServerError
                | TunnelErrorCode::ServiceUnavailable
                | TunnelErrorCode::ServerBusy
        )
    }

    /// Returns true if the error came from decoding wire bytes.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self.code,
            TunnelErrorCode::BadProtocolMessage | TunnelErrorCode::ChecksumMismatch
        )
    }
}

macro_rules! ia_error {
    ($($t:tt)*) => {{
        let m = format!($($t)*);
        TunnelError {
            code: crate::error::TunnelErrorCode::IllegalArgument,
            message: format!("{} ({})", m, crate::error::sdk_version()),
        }
    }};
}

pub(crate) use ia_error;

macro_rules! ia_err {
    ($($t:tt)*) => {{
        let m = format!($($t)*);
        Err(TunnelError {
            code: crate::error::TunnelErrorCode::IllegalArgument,
            message: format!("{} ({})", m, crate::error::sdk_version()),
        })
    }};
}

pub(crate) use ia_err;

// Shorthand for wire-format errors raised while decoding
macro_rules! bad_protocol {
    ($($t:tt)*) => {{
        TunnelError {
            code: crate::error::TunnelErrorCode::BadProtocolMessage,
            message: format!($($t)*),
        }
    }};
}

pub(crate) use bad_protocol;

impl From<base64::DecodeError> for TunnelError {
    fn from(e: base64::DecodeError) -> Self {
        TunnelError {
            code: TunnelErrorCode::InvalidToken,
            message: format!("token is not valid base64: {}", e),
        }
    }
}

impl From<serde_json::Error> for TunnelError {
    fn from(e: serde_json::Error) -> Self {
        ia_error!("invalid json configuration: {}", e.to_string())
    }
}

impl From<std::io::Error> for TunnelError {
    fn from(e: std::io::Error) -> Self {
        ia_error!("i/o error: {}", e.to_string())
    }
}

impl From<tokio::task::JoinError> for TunnelError {
    fn from(e: tokio::task::JoinError) -> Self {
        TunnelError {
            code: TunnelErrorCode::IllegalState,
            message: format!("background task failed: {}", e),
        }
    }
}

// TunnelErrorCode represents the error code.
// Error codes are divided into categories as follows:
//
// 1. Error codes for user-generated errors, range from 1 to 50(exclusive).
// These include illegal arguments, malformed tokens, etc.
//
// 2. Error codes for wire decoding, range from 50 to 100(exclusive).
//
// 3. Error codes for server issues, range from 100 to 150(exclusive).
//
// 3.1 Retryable server issues, range from 100 to 125(exclusive), that represent
// internal problems, presumably temporary.
//
// 3.2 Other server issues, begin from 125.
//
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(i32)]
pub enum TunnelErrorCode {
    /// NoError represents there is no error.
    NoError = 0,

    /// IllegalArgument error represents the application provided an illegal
    /// argument for the operation, including invalid configuration values.
    IllegalArgument = 4,

    /// ResourceNotFound error represents the operation attempted to access a
    /// tunnel or channel that does not exist.
    ResourceNotFound = 14,

    /// InvalidToken error represents a resumption token that could not be parsed.
    InvalidToken = 30,

    /// ProcessorError represents an error returned by the application's
    /// record processing callback.
    ProcessorError = 31,

    /// BadProtocolMessage error represents malformed bytes in a record batch
    /// or a token envelope.
    BadProtocolMessage = 50,

    /// ChecksumMismatch error represents a row or cell whose stored checksum
    /// does not match its contents.
    ChecksumMismatch = 51,

    /// RequestTimeout error represents a remote call that did not complete in time.
    RequestTimeout = 100,

    /// ServerError represents an internal, presumably temporary, server problem.
    ServerError = 101,

    /// ServiceUnavailable error represents the service is currently unavailable.
    ServiceUnavailable = 102,

    /// ServerBusy represents the server throttled the request.
    ServerBusy = 103,

    /// UnknownError represents an unknown error has occurred on the server.
    UnknownError = 125,

    /// IllegalState error represents an illegal state, such as an operation
    /// on a closed component.
    IllegalState = 126,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_int_maps_known_codes() {
        let e = TunnelError::from_int(102, "try later");
        assert_eq!(e.code, TunnelErrorCode::ServiceUnavailable);
        assert!(e.is_retryable());
        assert!(!e.is_decode_error());

        let e = TunnelError::from_int(999, "what");
        assert_eq!(e.code, TunnelErrorCode::UnknownError);
        assert!(e.message.contains("999"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn argument_errors_carry_version() {
        let e = ia_error!("bad value {}", 3);
        assert_eq!(e.code, TunnelErrorCode::IllegalArgument);
        assert!(e.message.starts_with("bad value 3 ("));
        assert!(e.message.contains(sdk_version()));
    }
}
