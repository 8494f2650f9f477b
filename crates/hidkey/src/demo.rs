//! Demonstration control loop
//!
//! Walks a single lit LED across the output pins and, optionally, logs every
//! input pin change. Runs until the exit signal is set; a failed pin
//! operation is escalated to a fatal exit carrying the error code.

use crate::config::DemoSettings;
use crate::error::Result;
use crate::gpio::HidGpio;
use common::{ExitReason, Transport};
use std::time::Duration;
use tracing::{debug, error, info};

/// Chase pattern parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoOptions {
    pub step: Duration,
    pub watch_inputs: bool,
}

impl From<&DemoSettings> for DemoOptions {
    fn from(settings: &DemoSettings) -> Self {
        Self {
            step: settings.step(),
            watch_inputs: settings.watch_inputs,
        }
    }
}

/// Run the chase until shutdown, returning the exit reason
pub fn run<T: Transport>(gpio: &HidGpio<T>, options: DemoOptions) -> ExitReason {
    let exit = gpio.exit_signal();
    let Some(layout) = gpio.layout() else {
        return exit.reason().unwrap_or(ExitReason::Requested);
    };

    let outputs: Vec<u8> = layout.output_pins().collect();
    let inputs: Vec<u8> = layout.input_pins().collect();
    let mut last_inputs: Vec<Option<bool>> = vec![None; inputs.len()];

    info!(
        "Chasing across {} outputs every {:?}",
        outputs.len(),
        options.step
    );

    let mut current = 0usize;
    loop {
        if let Some(reason) = exit.reason() {
            return reason;
        }

        let previous = (current + outputs.len() - 1) % outputs.len();
        if let Err(e) = step(gpio, outputs[previous], outputs[current]) {
            error!("Pin operation failed: {}", e);
            exit.signal(ExitReason::fatal(e.code()));
            break;
        }

        if options.watch_inputs
            && let Err(e) = watch(gpio, &inputs, &mut last_inputs)
        {
            error!("Input read failed: {}", e);
            exit.signal(ExitReason::fatal(e.code()));
            break;
        }

        if let Some(reason) = exit.wait_timeout(options.step) {
            return reason;
        }
        current = (current + 1) % outputs.len();
    }

    exit.reason().unwrap_or(ExitReason::Requested)
}

fn step<T: Transport>(gpio: &HidGpio<T>, off: u8, on: u8) -> Result<()> {
    gpio.set_pin(off, false)?;
    gpio.set_pin(on, true)?;
    debug!("Output {} on", on);
    Ok(())
}

fn watch<T: Transport>(
    gpio: &HidGpio<T>,
    inputs: &[u8],
    last: &mut [Option<bool>],
) -> Result<()> {
    for (pin, previous) in inputs.iter().zip(last.iter_mut()) {
        let value = gpio.get_pin(*pin)?;
        if *previous != Some(value) {
            info!("Input {} = {}", pin, u8::from(value));
            *previous = Some(value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, GpioOptions};
    use crate::pins::PinTiming;
    use common::ExitSignal;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, StubBus, wait_for};
    use protocol::{InputMode, UsbError};
    use std::sync::Arc;
    use std::thread;

    fn options() -> GpioOptions {
        GpioOptions {
            input_mode: InputMode::Polled,
            timing: PinTiming::immediate(),
            poll_interval: Duration::from_millis(20),
            ..GpioOptions::default()
        }
    }

    #[test]
    fn test_chase_sequence() {
        let (bus, state) = StubBus::with_device(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID);
        let exit = Arc::new(ExitSignal::new());
        let gpio = HidGpio::open(&bus, &options(), exit.clone()).unwrap();

        let demo = DemoOptions {
            step: Duration::from_millis(10),
            watch_inputs: false,
        };
        let stopper = exit.clone();
        let state_probe = state.clone();
        let watcher = thread::spawn(move || {
            wait_for(DEFAULT_TEST_TIMEOUT, || state_probe.control_requests().len() >= 6);
            stopper.signal(ExitReason::Requested);
        });

        assert_eq!(run(&gpio, demo), ExitReason::Requested);
        watcher.join().unwrap();

        // set(3,0) set(1,1); set(1,0) set(2,1); set(2,0) set(3,1)
        let payloads: Vec<u8> = state
            .control_requests()
            .iter()
            .take(6)
            .map(|r| r.data[0])
            .collect();
        assert_eq!(payloads, vec![0b000, 0b001, 0b000, 0b010, 0b000, 0b100]);
        gpio.shutdown();
    }

    #[test]
    fn test_failed_pin_is_fatal() {
        let (bus, state) = StubBus::with_device(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID);
        state.set_control_error(Some(UsbError::NoDevice));
        let exit = Arc::new(ExitSignal::new());
        let gpio = HidGpio::open(&bus, &options(), exit.clone()).unwrap();

        let reason = run(
            &gpio,
            DemoOptions {
                step: Duration::from_secs(10),
                watch_inputs: true,
            },
        );
        assert_eq!(reason, ExitReason::Fatal(-4));
        assert_eq!(gpio.shutdown(), ExitReason::Fatal(-4));
    }

    #[test]
    fn test_stops_when_already_signalled() {
        let (bus, state) = StubBus::with_device(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID);
        let exit = Arc::new(ExitSignal::new());
        let gpio = HidGpio::open(&bus, &options(), exit.clone()).unwrap();
        exit.signal(ExitReason::Requested);

        let reason = run(&gpio, DemoOptions::from(&DemoSettings::default()));
        assert_eq!(reason, ExitReason::Requested);
        assert!(state.control_requests().is_empty());
    }
}
