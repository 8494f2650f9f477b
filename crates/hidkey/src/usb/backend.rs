//! rusb transport backend
//!
//! rusb exposes libusb's synchronous API only, so the asynchronous interrupt
//! read is modelled on top of it: `submit_interrupt` records the pending read
//! and `handle_events` performs it with the drain timeout, reporting the
//! completion to the caller exactly like a libusb callback would fire from
//! `libusb_handle_events_timeout`. A read that times out stays pending.

use common::{TransferCompletion, Transport, UsbBus};
use protocol::UsbError;
use rusb::{Context, DeviceHandle, UsbContext};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Summary of an attached device, for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub class: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// USB bus backed by a libusb context
pub struct RusbBus {
    context: Context,
}

impl RusbBus {
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }

    /// Enumerate all attached devices
    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let mut summaries = Vec::new();
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    warn!("Failed to read device descriptor: {}", e);
                    continue;
                }
            };

            // String descriptors need an open handle; missing permissions are fine
            let (manufacturer, product) = match device.open() {
                Ok(handle) => (
                    handle.read_manufacturer_string_ascii(&descriptor).ok(),
                    handle.read_product_string_ascii(&descriptor).ok(),
                ),
                Err(_) => (None, None),
            };

            summaries.push(DeviceSummary {
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                bus_number: device.bus_number(),
                device_address: device.address(),
                class: descriptor.class_code(),
                manufacturer,
                product,
            });
        }

        Ok(summaries)
    }
}

impl UsbBus for RusbBus {
    type Device = RusbDevice;

    fn open_device(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<Self::Device>, UsbError> {
        Ok(self
            .context
            .open_device_with_vid_pid(vendor_id, product_id)
            .map(RusbDevice::new))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRead {
    endpoint: u8,
    length: usize,
    cancelled: bool,
}

/// What the next event drain has to do
#[derive(Debug, PartialEq, Eq)]
enum NextRead {
    Idle,
    Cancelled(TransferCompletion),
    Read(PendingRead),
}

/// Bookkeeping for the single emulated interrupt read
///
/// Kept apart from the handle so submission, cancellation and completion
/// can be exercised without a device.
#[derive(Debug, Default)]
struct PendingSlot {
    read: Mutex<Option<PendingRead>>,
}

impl PendingSlot {
    fn lock(&self) -> MutexGuard<'_, Option<PendingRead>> {
        self.read.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, endpoint: u8, length: usize) -> Result<(), UsbError> {
        if endpoint & 0x80 == 0 {
            return Err(UsbError::InvalidParam);
        }
        let mut pending = self.lock();
        if pending.is_some() {
            return Err(UsbError::Busy);
        }
        *pending = Some(PendingRead {
            endpoint,
            length,
            cancelled: false,
        });
        Ok(())
    }

    fn cancel(&self, endpoint: u8) -> Result<(), UsbError> {
        match self.lock().as_mut() {
            Some(read) if read.endpoint == endpoint => {
                read.cancelled = true;
                Ok(())
            }
            _ => Err(UsbError::NotFound),
        }
    }

    /// A read cancelled before it was performed completes without I/O
    fn next(&self) -> NextRead {
        let mut pending = self.lock();
        match *pending {
            None => NextRead::Idle,
            Some(read) if read.cancelled => {
                pending.take();
                NextRead::Cancelled(TransferCompletion::cancelled(read.endpoint))
            }
            Some(read) => NextRead::Read(read),
        }
    }

    /// Settle the outcome of a performed read
    ///
    /// A timeout leaves the read pending. A cancel that raced the read wins
    /// over its data.
    fn complete(
        &self,
        endpoint: u8,
        outcome: Result<Vec<u8>, UsbError>,
    ) -> Option<TransferCompletion> {
        let data = match outcome {
            Err(UsbError::Timeout) => return None,
            Err(e) => {
                self.lock().take()?;
                return Some(TransferCompletion::failed(endpoint, e));
            }
            Ok(data) => data,
        };

        match self.lock().take()? {
            read if read.cancelled => Some(TransferCompletion::cancelled(read.endpoint)),
            read => Some(TransferCompletion::completed(read.endpoint, data)),
        }
    }
}

/// Opened device handle
pub struct RusbDevice {
    handle: DeviceHandle<Context>,
    pending: PendingSlot,
}

impl RusbDevice {
    fn new(handle: DeviceHandle<Context>) -> Self {
        Self {
            handle,
            pending: PendingSlot::default(),
        }
    }
}

impl Transport for RusbDevice {
    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError> {
        self.handle
            .kernel_driver_active(interface)
            .map_err(map_rusb_error)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .detach_kernel_driver(interface)
            .map_err(map_rusb_error)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .attach_kernel_driver(interface)
            .map_err(map_rusb_error)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
            .map_err(map_rusb_error)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn submit_interrupt(&self, endpoint: u8, length: usize) -> Result<(), UsbError> {
        self.pending.submit(endpoint, length)?;
        trace!("Interrupt read submitted on endpoint {:#x}", endpoint);
        Ok(())
    }

    fn cancel_interrupt(&self, endpoint: u8) -> Result<(), UsbError> {
        self.pending.cancel(endpoint)
    }

    fn handle_events(
        &self,
        timeout: Duration,
        on_complete: &mut dyn FnMut(TransferCompletion),
    ) -> Result<(), UsbError> {
        let read = match self.pending.next() {
            NextRead::Idle => {
                // Nothing of ours in flight; still service libusb's own events
                return self
                    .handle
                    .context()
                    .handle_events(Some(timeout))
                    .map_err(map_rusb_error);
            }
            NextRead::Cancelled(completion) => {
                on_complete(completion);
                return Ok(());
            }
            NextRead::Read(read) => read,
        };

        let mut buffer = vec![0u8; read.length];
        let outcome = match self.handle.read_interrupt(read.endpoint, &mut buffer, timeout) {
            Ok(len) => {
                buffer.truncate(len);
                Ok(buffer)
            }
            Err(e) => {
                if e != rusb::Error::Timeout {
                    debug!("Interrupt read on endpoint {:#x} failed: {}", read.endpoint, e);
                }
                Err(map_rusb_error(e))
            }
        };

        // The slot lock is released before the callback so it can resubmit
        if let Some(completion) = self.pending.complete(read.endpoint, outcome) {
            on_complete(completion);
        }
        Ok(())
    }
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::Interrupted => UsbError::Interrupted,
        rusb::Error::NoMem => UsbError::NoMem,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
