//! GPIO runtime errors

use protocol::{ProtocolError, UsbError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    /// No device with the configured identifiers is attached
    #[error("Device {vendor_id:04x}:{product_id:04x} not found")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to claim interface {interface}: {source}")]
    ClaimFailed {
        interface: u8,
        #[source]
        source: UsbError,
    },

    #[error("Failed to allocate {length}-byte interrupt transfer")]
    AllocationFailed { length: usize },

    #[error("Failed to submit interrupt transfer: {0}")]
    SubmitFailed(UsbError),

    #[error("Transfer failed: {0}")]
    TransferFailed(UsbError),

    #[error(transparent)]
    InvalidPin(ProtocolError),

    #[error(transparent)]
    InvalidLayout(ProtocolError),

    /// Teardown attempted while another component still holds the handle
    #[error("Device handle is still in use")]
    HandleInUse,

    #[error("Failed to spawn poll thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),
}

impl GpioError {
    /// Negative libusb-style code, used for the process exit status
    pub fn code(&self) -> i32 {
        match self {
            GpioError::NotFound { .. } => UsbError::NotFound.code(),
            GpioError::ClaimFailed { source, .. } => source.code(),
            GpioError::AllocationFailed { .. } => UsbError::NoMem.code(),
            GpioError::SubmitFailed(e) | GpioError::TransferFailed(e) | GpioError::Usb(e) => {
                e.code()
            }
            GpioError::InvalidPin(_) | GpioError::InvalidLayout(_) => {
                UsbError::InvalidParam.code()
            }
            GpioError::HandleInUse => UsbError::Busy.code(),
            GpioError::Spawn(_) => UsbError::Io.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GpioError>;
