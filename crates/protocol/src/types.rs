//! USB error and transfer status types
//!
//! These mirror the libusb error and transfer-status vocabulary so that
//! every backend reports failures the same way and numeric codes stay
//! meaningful as process exit statuses.

use thiserror::Error;

/// USB error
///
/// Backend-independent USB failure. [`UsbError::code`] yields the
/// libusb-compatible negative error number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    #[error("input/output error")]
    Io,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("access denied (insufficient permissions)")]
    Access,
    #[error("no such device (it may have been disconnected)")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("operation timed out")]
    Timeout,
    #[error("overflow")]
    Overflow,
    /// Endpoint stalled
    #[error("pipe error (endpoint stalled)")]
    Pipe,
    #[error("system call interrupted")]
    Interrupted,
    #[error("insufficient memory")]
    NoMem,
    #[error("operation not supported")]
    NotSupported,
    #[error("{message}")]
    Other { message: String },
}

impl UsbError {
    /// Negative libusb-style error code
    pub fn code(&self) -> i32 {
        match self {
            UsbError::Io => -1,
            UsbError::InvalidParam => -2,
            UsbError::Access => -3,
            UsbError::NoDevice => -4,
            UsbError::NotFound => -5,
            UsbError::Busy => -6,
            UsbError::Timeout => -7,
            UsbError::Overflow => -8,
            UsbError::Pipe => -9,
            UsbError::Interrupted => -10,
            UsbError::NoMem => -11,
            UsbError::NotSupported => -12,
            UsbError::Other { .. } => -99,
        }
    }
}

/// Completion status of an asynchronous transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer completed and carries payload
    Completed,
    /// Transfer was cancelled before it completed
    Cancelled,
    /// Transfer finished unsuccessfully
    Failed(UsbError),
}

impl TransferStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_libusb() {
        assert_eq!(UsbError::Io.code(), -1);
        assert_eq!(UsbError::NotFound.code(), -5);
        assert_eq!(UsbError::Timeout.code(), -7);
        assert_eq!(UsbError::Pipe.code(), -9);
        assert_eq!(UsbError::NoMem.code(), -11);
        assert_eq!(
            UsbError::Other {
                message: "x".to_string()
            }
            .code(),
            -99
        );
    }

    #[test]
    fn test_codes_are_negative() {
        let all = [
            UsbError::Io,
            UsbError::InvalidParam,
            UsbError::Access,
            UsbError::NoDevice,
            UsbError::NotFound,
            UsbError::Busy,
            UsbError::Timeout,
            UsbError::Overflow,
            UsbError::Pipe,
            UsbError::Interrupted,
            UsbError::NoMem,
            UsbError::NotSupported,
        ];
        for err in all {
            assert!(err.code() < 0, "{:?} should map to a negative code", err);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(UsbError::Pipe.to_string(), "pipe error (endpoint stalled)");
        let other = UsbError::Other {
            message: "bad descriptor".to_string(),
        };
        assert_eq!(other.to_string(), "bad descriptor");

        let boxed: Box<dyn std::error::Error> = Box::new(UsbError::NoDevice);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_transfer_status() {
        assert!(TransferStatus::Completed.is_completed());
        assert!(!TransferStatus::Cancelled.is_completed());
        assert!(!TransferStatus::Failed(UsbError::Pipe).is_completed());
    }
}
