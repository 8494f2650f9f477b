//! Transport contract over the USB stack
//!
//! The GPIO runtime never talks to a USB library directly. A backend
//! implements [`UsbBus`] to locate a device and [`Transport`] for everything
//! done with the opened handle.
//!
//! Asynchronous interrupt reads follow the libusb model: a read is submitted,
//! and its completion is delivered later from inside [`Transport::handle_events`]
//! on whichever thread drains events. Completion callbacks may resubmit, but
//! must not drain events themselves.

use protocol::{TransferStatus, UsbError};
use std::time::Duration;

/// Outcome of one asynchronous interrupt transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCompletion {
    /// Endpoint the transfer was submitted on
    pub endpoint: u8,
    /// Completion status
    pub status: TransferStatus,
    /// Bytes received (empty unless completed)
    pub data: Vec<u8>,
}

impl TransferCompletion {
    pub fn completed(endpoint: u8, data: Vec<u8>) -> Self {
        Self {
            endpoint,
            status: TransferStatus::Completed,
            data,
        }
    }

    pub fn cancelled(endpoint: u8) -> Self {
        Self {
            endpoint,
            status: TransferStatus::Cancelled,
            data: Vec::new(),
        }
    }

    pub fn failed(endpoint: u8, error: UsbError) -> Self {
        Self {
            endpoint,
            status: TransferStatus::Failed(error),
            data: Vec::new(),
        }
    }
}

/// Operations on an opened USB device handle
///
/// Methods taking `&mut self` change interface ownership and are only called
/// while the handle is exclusively owned. Everything else may be called
/// concurrently from the poll thread and the control loop; the backend must
/// serialize device I/O internally.
pub trait Transport: Send + Sync + 'static {
    /// Whether a kernel driver is bound to `interface`
    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError>;

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError>;

    fn attach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Synchronous host-to-device control transfer, returns bytes written
    ///
    /// A zero `timeout` waits forever.
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Synchronous device-to-host control transfer, returns bytes read
    ///
    /// A zero `timeout` waits forever.
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Submit an asynchronous interrupt IN read of `length` bytes
    fn submit_interrupt(&self, endpoint: u8, length: usize) -> Result<(), UsbError>;

    /// Request cancellation of the outstanding read on `endpoint`
    ///
    /// The cancelled completion is delivered through `handle_events`.
    fn cancel_interrupt(&self, endpoint: u8) -> Result<(), UsbError>;

    /// Block up to `timeout` processing pending events
    ///
    /// Every transfer that finishes during the call is passed to
    /// `on_complete` before returning.
    fn handle_events(
        &self,
        timeout: Duration,
        on_complete: &mut dyn FnMut(TransferCompletion),
    ) -> Result<(), UsbError>;
}

/// Device lookup by identifier
pub trait UsbBus {
    type Device: Transport;

    /// Open the first device matching `vendor_id:product_id`
    ///
    /// `Ok(None)` means no such device is attached.
    fn open_device(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<Self::Device>, UsbError>;
}
