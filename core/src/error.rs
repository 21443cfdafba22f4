//! Error types for inference-bridge.
//!
//! Errors never cross the C boundary. Each one is logged, stored as the
//! calling thread's last error, and reduced to a [`Status`] code.

use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::path::PathBuf;
use thiserror::Error;

use crate::inference::SlotKind;

/// Result type alias for inference-bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Status codes returned across the C boundary.
///
/// Only the sign is part of the contract: zero is success, anything negative
/// is a failure.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    InvalidHandle = -1,
    InvalidIndex = -2,
    InvalidBuffer = -3,
    Engine = -4,
    Internal = -5,
    InvalidConfig = -6,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Errors that can occur while driving an inference session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Handle is the sentinel or names no live session.
    #[error("Invalid session handle: {0}")]
    InvalidHandle(i64),

    /// Slot index outside the session's declared slots.
    #[error("Invalid {kind} slot index {index} (session has {count})")]
    InvalidIndex {
        kind: SlotKind,
        index: i32,
        count: usize,
    },

    /// Caller-supplied buffer or length violates the copy preconditions.
    #[error("Invalid buffer: {0}")]
    Buffer(String),

    /// Model bytes could not be parsed.
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    /// Execution engine could not be constructed.
    #[error("Engine construction failed: {0}")]
    EngineBuild(String),

    /// Slot buffers could not be allocated.
    #[error("Tensor allocation failed: {0}")]
    Allocation(String),

    /// Forward pass failed.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A panic was caught at the boundary.
    #[error("Internal fault: {0}")]
    Panic(String),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl BridgeError {
    /// Create a buffer precondition error.
    pub fn buffer(msg: impl Into<String>) -> Self {
        Self::Buffer(msg.into())
    }

    /// Create a model load error.
    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create an engine construction error.
    pub fn engine_build(msg: impl Into<String>) -> Self {
        Self::EngineBuild(msg.into())
    }

    /// Create a tensor allocation error.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Create an inference error.
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Status code reported for this error at the boundary.
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidHandle(_) => Status::InvalidHandle,
            Self::InvalidIndex { .. } => Status::InvalidIndex,
            Self::Buffer(_) => Status::InvalidBuffer,
            Self::ModelLoad(_)
            | Self::EngineBuild(_)
            | Self::Allocation(_)
            | Self::Inference(_) => Status::Engine,
            Self::Panic(_) => Status::Internal,
            Self::Config(_) | Self::Yaml(_) | Self::Io(_) | Self::FileNotFound(_) => {
                Status::InvalidConfig
            }
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store `err` as the calling thread's last error.
pub(crate) fn set_last_error(err: &BridgeError) {
    // Interior NULs cannot be represented in a C string.
    let message = err.to_string().replace('\0', " ");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = CString::new(message).ok());
}

/// Forget the calling thread's last error.
pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// The calling thread's last error message, if any.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|msg| msg.to_string_lossy().into_owned())
    })
}

/// Pointer to the calling thread's last error, or null.
///
/// Valid until the next bridge call on the same thread.
pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |msg| msg.as_ptr())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::model_load("not a model");
        assert_eq!(format!("{}", err), "Model loading failed: not a model");

        let err = BridgeError::InvalidIndex {
            kind: SlotKind::Output,
            index: 3,
            count: 1,
        };
        assert_eq!(
            format!("{}", err),
            "Invalid output slot index 3 (session has 1)"
        );

        let err = BridgeError::FileNotFound(PathBuf::from("/etc/bridge.yaml"));
        assert_eq!(format!("{}", err), "File not found: /etc/bridge.yaml");
    }

    #[test]
    fn test_status_codes_are_negative_on_failure() {
        let errors = [
            BridgeError::InvalidHandle(0),
            BridgeError::buffer("short"),
            BridgeError::inference("boom"),
            BridgeError::Panic("oops".into()),
            BridgeError::config("bad"),
        ];
        for err in &errors {
            assert!(err.status().code() < 0, "{err} should map to a failure");
        }
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(BridgeError::InvalidHandle(7).status(), Status::InvalidHandle);
    }

    #[test]
    fn test_last_error_roundtrip() {
        clear_last_error();
        assert!(last_error_message().is_none());
        assert!(last_error_ptr().is_null());

        set_last_error(&BridgeError::inference("nul\0inside"));
        assert_eq!(
            last_error_message().as_deref(),
            Some("Inference failed: nul inside")
        );
        assert!(!last_error_ptr().is_null());

        clear_last_error();
        assert!(last_error_message().is_none());
    }
}
