//! Failures crossing the broker as data.
//!
//! A local error cannot be serialized as-is, so the response envelope carries
//! an [`ErrorSlot`] instead: a success flag and a message. The conversion is
//! deliberately lossy. Type, source chain and identity stay on the side that
//! produced the failure; the other side only learns that it happened and what
//! its message was.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used by a receiver that has no handler for an operation.
///
/// Only the message crosses the broker, so a handler whose own error reads
/// exactly `"not implemented"` is indistinguishable from a missing handler:
/// the caller sees [`RpcError::NotImplemented`](crate::RpcError::NotImplemented),
/// not `RemoteOperationFailed`. Handlers should phrase their errors
/// differently.
pub const NOT_IMPLEMENTED_MESSAGE: &str = "not implemented";

/// Wire form of an optional failure.
///
/// `is_success == true` implies an empty `message`; readers ignore the message
/// of a successful slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSlot {
    pub is_success: bool,
    #[serde(default)]
    pub message: String,
}

impl ErrorSlot {
    pub fn success() -> Self {
        Self {
            is_success: true,
            message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            message: message.into(),
        }
    }

    /// Outcome sent for an operation the receiver cannot dispatch.
    pub fn not_implemented() -> Self {
        Self::failure(NOT_IMPLEMENTED_MESSAGE)
    }

    /// Convert a local outcome into its wire form.
    pub fn to_wire<E: Display + ?Sized>(error: Option<&E>) -> Self {
        // ---
        match error {
            Some(err) => Self::failure(err.to_string()),
            None => Self::success(),
        }
    }

    /// Recover the failure carried by this slot, if any.
    pub fn from_wire(&self) -> Option<RemoteError> {
        // ---
        if self.is_success {
            return None;
        }
        Some(RemoteError {
            message: self.message.clone(),
        })
    }
}

impl Default for ErrorSlot {
    fn default() -> Self {
        Self::success()
    }
}

/// A failure reported by the other side of the broker.
///
/// Only the message is known. Compare messages, never error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the remote side reported that it has no handler.
    pub fn is_not_implemented(&self) -> bool {
        self.message == NOT_IMPLEMENTED_MESSAGE
    }
}
