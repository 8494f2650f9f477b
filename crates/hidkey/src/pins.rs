//! Pin controller
//!
//! `set_pin` drives one LED bit through a SET_REPORT control transfer;
//! `get_pin` reads one modifier bit either from the interrupt-fed cache or
//! through a GET_REPORT control transfer, depending on the input mode.
//!
//! Both calls block for their settle delay before touching the device and
//! must never be called from a transfer completion.

use crate::error::{GpioError, Result};
use crate::usb::input::InputState;
use common::Transport;
use protocol::report::{
    HID_GET_REPORT, HID_SET_REPORT, REPORT_ID, REPORT_TYPE_INPUT, REPORT_TYPE_OUTPUT,
    REQUEST_TYPE_CLASS_IN, REQUEST_TYPE_CLASS_OUT, report_value,
};
use protocol::{
    INPUT_REPORT_LEN, InputMode, MODIFIER_BYTE, OUTPUT_REPORT_LEN, PinLayout, Polarity,
    apply_output, read_input,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Delays and timeouts around control transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinTiming {
    /// Sleep before every SET_REPORT
    pub output_settle: Duration,
    /// Sleep before every input read
    pub input_settle: Duration,
    /// Control transfer timeout, zero waits forever
    pub control_timeout: Duration,
}

impl PinTiming {
    pub fn for_mode(mode: InputMode) -> Self {
        Self {
            output_settle: Duration::from_micros(500),
            input_settle: default_input_settle(mode),
            control_timeout: Duration::ZERO,
        }
    }

    /// No delays, for tests and simulated devices
    pub fn immediate() -> Self {
        Self {
            output_settle: Duration::ZERO,
            input_settle: Duration::ZERO,
            control_timeout: Duration::ZERO,
        }
    }
}

impl Default for PinTiming {
    fn default() -> Self {
        Self::for_mode(InputMode::default())
    }
}

/// Input settle delay used when none is configured
pub fn default_input_settle(mode: InputMode) -> Duration {
    match mode {
        InputMode::Cached => Duration::from_millis(50),
        InputMode::Polled => Duration::from_millis(40),
    }
}

/// Where input reads come from
#[derive(Debug, Clone)]
pub enum InputSource {
    Cached(Arc<InputState>),
    Polled,
}

impl InputSource {
    pub fn mode(&self) -> InputMode {
        match self {
            InputSource::Cached(_) => InputMode::Cached,
            InputSource::Polled => InputMode::Polled,
        }
    }
}

pub struct PinController<T: Transport> {
    device: Arc<T>,
    interface: u8,
    layout: PinLayout,
    polarity: Polarity,
    input: InputSource,
    timing: PinTiming,
    /// Last output report successfully sent
    output: Mutex<u8>,
}

impl<T: Transport> PinController<T> {
    pub fn new(
        device: Arc<T>,
        interface: u8,
        layout: PinLayout,
        polarity: Polarity,
        input: InputSource,
        timing: PinTiming,
    ) -> Result<Self> {
        layout.validate().map_err(GpioError::InvalidLayout)?;
        Ok(Self {
            device,
            interface,
            layout,
            polarity,
            input,
            timing,
            output: Mutex::new(0),
        })
    }

    fn output(&self) -> MutexGuard<'_, u8> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive output `pin` to `value`, returning the bytes transferred
    ///
    /// The cached output byte only changes when the transfer succeeds.
    pub fn set_pin(&self, pin: u8, value: bool) -> Result<usize> {
        let bit = self.layout.output_bit(pin).map_err(GpioError::InvalidPin)?;

        // Held across the transfer so concurrent writers cannot lose bits
        let mut output = self.output();
        let next = apply_output(*output, bit, value, self.polarity.output_invert);
        let report: [u8; OUTPUT_REPORT_LEN] = [next];

        if !self.timing.output_settle.is_zero() {
            thread::sleep(self.timing.output_settle);
        }

        let written = self
            .device
            .write_control(
                REQUEST_TYPE_CLASS_OUT,
                HID_SET_REPORT,
                report_value(REPORT_TYPE_OUTPUT, REPORT_ID),
                u16::from(self.interface),
                &report,
                self.timing.control_timeout,
            )
            .map_err(GpioError::TransferFailed)?;

        *output = next;
        debug!(
            "set_pin({}, {}) -> report {:#010b} ({} bytes)",
            pin, value, next, written
        );
        Ok(written)
    }

    /// Read input `pin`
    pub fn get_pin(&self, pin: u8) -> Result<bool> {
        let bit = self.layout.input_bit(pin).map_err(GpioError::InvalidPin)?;

        if !self.timing.input_settle.is_zero() {
            thread::sleep(self.timing.input_settle);
        }

        let modifiers = match &self.input {
            InputSource::Cached(state) => state.load(),
            InputSource::Polled => self.read_input_report()?,
        };

        let value = read_input(modifiers, bit, self.polarity.input_invert);
        debug!(
            "get_pin({}) = {} (modifiers {:#010b}, {})",
            pin,
            value,
            modifiers,
            self.input.mode()
        );
        Ok(value)
    }

    fn read_input_report(&self) -> Result<u8> {
        let mut report = [0u8; INPUT_REPORT_LEN];
        let len = self
            .device
            .read_control(
                REQUEST_TYPE_CLASS_IN,
                HID_GET_REPORT,
                report_value(REPORT_TYPE_INPUT, REPORT_ID),
                u16::from(self.interface),
                &mut report,
                self.timing.control_timeout,
            )
            .map_err(GpioError::TransferFailed)?;

        if len <= MODIFIER_BYTE {
            debug!("Short input report ({} bytes)", len);
        }
        Ok(report[MODIFIER_BYTE])
    }

    /// Last output report successfully sent
    pub fn output_state(&self) -> u8 {
        *self.output()
    }

    pub fn layout(&self) -> PinLayout {
        self.layout
    }

    pub fn input_mode(&self) -> InputMode {
        self.input.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{StubState, StubTransport};
    use protocol::UsbError;

    fn controller(input: InputSource) -> (PinController<StubTransport>, Arc<StubState>) {
        let (transport, state) = StubTransport::new();
        let pins = PinController::new(
            Arc::new(transport),
            0,
            PinLayout::default(),
            Polarity::default(),
            input,
            PinTiming::immediate(),
        )
        .unwrap();
        (pins, state)
    }

    #[test]
    fn test_set_pin_request() {
        let (pins, state) = controller(InputSource::Polled);
        assert_eq!(pins.set_pin(2, true).unwrap(), 1);

        let requests = state.control_requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.request_type, 0x21);
        assert_eq!(req.request, 0x09);
        assert_eq!(req.value, 0x0200);
        assert_eq!(req.index, 0);
        assert_eq!(req.data.len(), OUTPUT_REPORT_LEN);
        assert_eq!(req.data, vec![0b0000_0010]);
        assert_eq!(req.timeout, Duration::ZERO);
        assert_eq!(pins.output_state(), 0b0000_0010);
    }

    #[test]
    fn test_set_pin_preserves_other_bits() {
        let (pins, state) = controller(InputSource::Polled);
        pins.set_pin(1, true).unwrap();
        pins.set_pin(3, true).unwrap();
        pins.set_pin(1, false).unwrap();

        let payloads: Vec<u8> = state
            .control_requests()
            .iter()
            .map(|r| r.data[0])
            .collect();
        assert_eq!(payloads, vec![0b001, 0b101, 0b100]);
    }

    #[test]
    fn test_get_pin_polled_request() {
        let (pins, state) = controller(InputSource::Polled);
        state.set_input_report([0b0000_0010, 0, 0x04, 0, 0, 0, 0, 0]);

        assert!(!pins.get_pin(4).unwrap());
        assert!(pins.get_pin(5).unwrap());

        let requests = state.control_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].request_type, 0xa1);
        assert_eq!(requests[0].request, 0x01);
        assert_eq!(requests[0].value, 0x0100);
    }

    #[test]
    fn test_get_pin_cached_does_no_io() {
        let input = Arc::new(InputState::new());
        let (pins, state) = controller(InputSource::Cached(input.clone()));

        input.store(0b0000_1000);
        assert!(pins.get_pin(7).unwrap());
        assert!(!pins.get_pin(4).unwrap());
        assert_eq!(state.io_count(), 0);
        assert_eq!(pins.input_mode(), InputMode::Cached);
    }

    #[test]
    fn test_invalid_pins_rejected() {
        let (pins, state) = controller(InputSource::Polled);
        assert!(matches!(pins.set_pin(0, true), Err(GpioError::InvalidPin(_))));
        assert!(matches!(pins.set_pin(4, true), Err(GpioError::InvalidPin(_))));
        assert!(matches!(pins.get_pin(3), Err(GpioError::InvalidPin(_))));
        assert!(matches!(pins.get_pin(8), Err(GpioError::InvalidPin(_))));
        assert_eq!(state.io_count(), 0);
    }

    #[test]
    fn test_failed_set_keeps_state() {
        let (pins, state) = controller(InputSource::Polled);
        pins.set_pin(1, true).unwrap();

        state.set_control_error(Some(UsbError::Pipe));
        let err = pins.set_pin(2, true).unwrap_err();
        assert!(matches!(err, GpioError::TransferFailed(UsbError::Pipe)));
        assert_eq!(err.code(), -9);
        assert_eq!(pins.output_state(), 0b0000_0001);
    }

    #[test]
    fn test_invalid_layout() {
        let (transport, _state) = StubTransport::new();
        let result = PinController::new(
            Arc::new(transport),
            0,
            PinLayout {
                outputs: 0,
                inputs: 4,
            },
            Polarity::default(),
            InputSource::Polled,
            PinTiming::immediate(),
        );
        assert!(matches!(result, Err(GpioError::InvalidLayout(_))));
    }

    #[test]
    fn test_default_timing() {
        let polled = PinTiming::for_mode(InputMode::Polled);
        assert_eq!(polled.output_settle, Duration::from_micros(500));
        assert_eq!(polled.input_settle, Duration::from_millis(40));
        assert_eq!(
            PinTiming::for_mode(InputMode::Cached).input_settle,
            Duration::from_millis(50)
        );
    }
}
