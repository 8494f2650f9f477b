//! Device session
//!
//! Owns the opened handle, the interface claims and the record of kernel
//! drivers we detached. Other components get `Arc` clones of the handle;
//! teardown needs the handle back exclusively, so it cannot run while the
//! poll thread or the pin controller still holds a clone.

use crate::error::{GpioError, Result};
use common::{Transport, UsbBus};
use protocol::report::{HID_SET_IDLE, REPORT_ID, REQUEST_TYPE_CLASS_OUT, idle_value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DeviceSession<T: Transport> {
    device: Arc<T>,
    vendor_id: u16,
    product_id: u16,
    /// Interfaces we claimed, released on close
    claimed: Vec<u8>,
    /// Interfaces whose kernel driver we detached, reattached on close
    detached: Vec<u8>,
    closed: bool,
}

impl<T: Transport> DeviceSession<T> {
    /// Open the first device matching `vendor_id:product_id`
    ///
    /// Kernel drivers bound to any of `detach_interfaces` are detached so the
    /// interfaces can be claimed by this process.
    pub fn open<B>(
        bus: &B,
        vendor_id: u16,
        product_id: u16,
        detach_interfaces: &[u8],
    ) -> Result<Self>
    where
        B: UsbBus<Device = T>,
    {
        let mut device = bus
            .open_device(vendor_id, product_id)?
            .ok_or(GpioError::NotFound {
                vendor_id,
                product_id,
            })?;

        info!("Opened HID keyboard {:04x}:{:04x}", vendor_id, product_id);

        let mut detached = Vec::new();
        for &interface in detach_interfaces {
            match device.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!("Detaching kernel driver for interface {}", interface);
                    match device.detach_kernel_driver(interface) {
                        Ok(()) => detached.push(interface),
                        // Claiming will fail next and report it
                        Err(e) => warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        ),
                    }
                }
                Ok(false) => {
                    debug!("No kernel driver active on interface {}", interface);
                }
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface, e
                    );
                }
            }
        }

        Ok(Self {
            device: Arc::new(device),
            vendor_id,
            product_id,
            claimed: Vec::new(),
            detached,
            closed: false,
        })
    }

    /// Claim `interface`; must succeed before any pin operation
    pub fn claim(&mut self, interface: u8) -> Result<()> {
        if self.claimed.contains(&interface) {
            return Ok(());
        }
        let device = Arc::get_mut(&mut self.device).ok_or(GpioError::HandleInUse)?;
        device
            .claim_interface(interface)
            .map_err(|source| GpioError::ClaimFailed { interface, source })?;

        debug!("Claimed interface {}", interface);
        self.claimed.push(interface);
        Ok(())
    }

    /// Send HID SET_IDLE so the device only reports on change (rate 0)
    pub fn set_idle(&self, interface: u8, rate: u8, timeout: Duration) -> Result<()> {
        self.device
            .write_control(
                REQUEST_TYPE_CLASS_OUT,
                HID_SET_IDLE,
                idle_value(rate, REPORT_ID),
                u16::from(interface),
                &[],
                timeout,
            )
            .map_err(GpioError::TransferFailed)?;
        debug!("Set idle rate {} on interface {}", rate, interface);
        Ok(())
    }

    /// Shared handle for the pipeline, poll loop and pin controller
    pub fn device(&self) -> Arc<T> {
        self.device.clone()
    }

    pub fn ids(&self) -> (u16, u16) {
        (self.vendor_id, self.product_id)
    }

    pub fn claimed_interfaces(&self) -> &[u8] {
        &self.claimed
    }

    /// Release claims, give detached interfaces back to the kernel, close
    ///
    /// Safe to call when claiming failed part way.
    pub fn release_and_close(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let device = Arc::get_mut(&mut self.device).ok_or(GpioError::HandleInUse)?;

        for interface in self.claimed.drain(..) {
            if let Err(e) = device.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }

        for interface in self.detached.drain(..) {
            match device.attach_kernel_driver(interface) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", interface),
                Err(e) => debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                ),
            }
        }

        self.closed = true;
        debug!(
            "Closed device {:04x}:{:04x}",
            self.vendor_id, self.product_id
        );
        Ok(())
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Device session dropped without teardown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{StubBus, StubTransport};
    use protocol::UsbError;

    const VID: u16 = 0x045e;
    const PID: u16 = 0x0750;

    #[test]
    fn test_open_detaches_kernel_drivers() {
        let (bus, state) = StubBus::with_device(VID, PID);
        let session = DeviceSession::open(&bus, VID, PID, &[0, 1]).unwrap();

        assert_eq!(state.detached(), vec![0, 1]);
        assert!(state.kernel_drivers().is_empty());
        assert_eq!(session.ids(), (VID, PID));
        session.release_and_close().unwrap();

        // Keyboard handed back to the kernel
        let mut drivers = state.kernel_drivers();
        drivers.sort();
        assert_eq!(drivers, vec![0, 1]);
    }

    #[test]
    fn test_open_skips_interfaces_without_driver() {
        let (bus, state) = StubBus::with_device(VID, PID);
        state.set_kernel_drivers(vec![1]);
        let _session = DeviceSession::open(&bus, VID, PID, &[0, 1]).unwrap();
        assert_eq!(state.detached(), vec![1]);
    }

    #[test]
    fn test_open_not_found() {
        let bus = StubBus::empty();
        let result: Result<DeviceSession<StubTransport>> =
            DeviceSession::open(&bus, VID, PID, &[0, 1]);
        assert!(matches!(
            result,
            Err(GpioError::NotFound {
                vendor_id: VID,
                product_id: PID
            })
        ));
    }

    #[test]
    fn test_open_bus_error() {
        let (bus, _state) = StubBus::with_device(VID, PID);
        bus.fail_next_open(UsbError::Access);
        let result = DeviceSession::open(&bus, VID, PID, &[0]);
        assert!(matches!(result, Err(GpioError::Usb(UsbError::Access))));
    }

    #[test]
    fn test_claim_and_release() {
        let (bus, state) = StubBus::with_device(VID, PID);
        let mut session = DeviceSession::open(&bus, VID, PID, &[0, 1]).unwrap();
        session.claim(0).unwrap();
        session.claim(0).unwrap();
        assert_eq!(state.claimed(), vec![0]);
        assert_eq!(session.claimed_interfaces(), &[0]);

        session.release_and_close().unwrap();
        assert!(state.claimed().is_empty());
        assert!(state.released());
        assert!(state.closed());
    }

    #[test]
    fn test_claim_failure() {
        let (bus, state) = StubBus::with_device(VID, PID);
        state.set_claim_error(Some(UsbError::Busy));
        let mut session = DeviceSession::open(&bus, VID, PID, &[0, 1]).unwrap();

        let err = session.claim(0).unwrap_err();
        assert!(matches!(
            err,
            GpioError::ClaimFailed {
                interface: 0,
                source: UsbError::Busy
            }
        ));

        // Teardown after a failed claim is still clean
        session.release_and_close().unwrap();
        assert!(!state.released());
        assert!(state.closed());
    }

    #[test]
    fn test_release_refused_while_handle_shared() {
        let (bus, state) = StubBus::with_device(VID, PID);
        let mut session = DeviceSession::open(&bus, VID, PID, &[0]).unwrap();
        session.claim(0).unwrap();

        let shared = session.device();
        assert!(matches!(session.claim(1), Err(GpioError::HandleInUse)));
        assert!(matches!(
            session.release_and_close(),
            Err(GpioError::HandleInUse)
        ));
        assert!(!state.released());
        assert!(!state.closed());

        drop(shared);
        assert!(state.closed());
    }

    #[test]
    fn test_set_idle_request() {
        let (bus, state) = StubBus::with_device(VID, PID);
        let session = DeviceSession::open(&bus, VID, PID, &[0]).unwrap();
        session.set_idle(0, 0, Duration::ZERO).unwrap();

        let requests = state.control_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_type, 0x21);
        assert_eq!(requests[0].request, 0x0a);
        assert_eq!(requests[0].value, 0x0000);
        assert!(requests[0].data.is_empty());
    }
}
