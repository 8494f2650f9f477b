//! Runtime lifecycle tests
//!
//! Exercise the poll thread, the interrupt pipeline and teardown ordering
//! together through `HidGpio` on a stub bus.
//!
//! Run with: `cargo test -p hidkey --test runtime_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, StubBus, StubState, StubTransport, wait_for};
use common::{ExitReason, ExitSignal, TRANSFER_FAILED};
use hidkey::gpio::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};
use hidkey::{GpioError, GpioOptions, HidGpio, PinTiming, PipelineState};
use protocol::{InputMode, PinLayout, TransferStatus, UsbError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn options(mode: InputMode) -> GpioOptions {
    GpioOptions {
        input_mode: mode,
        timing: PinTiming::immediate(),
        poll_interval: POLL_INTERVAL,
        ..GpioOptions::default()
    }
}

fn start(opts: &GpioOptions) -> (HidGpio<StubTransport>, Arc<StubState>, Arc<ExitSignal>) {
    let (bus, state) = StubBus::with_device(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID);
    let exit = Arc::new(ExitSignal::new());
    let gpio = HidGpio::open(&bus, opts, exit.clone()).expect("device opens");
    (gpio, state, exit)
}

#[test]
fn cached_read_sees_interrupt_payload() {
    let opts = GpioOptions {
        layout: PinLayout::new(3, 8).unwrap(),
        ..options(InputMode::Cached)
    };
    let (gpio, state, _exit) = start(&opts);
    state.set_interrupt_payload(0b0001_0000);

    // Pin 8 is bit 4 with three outputs
    let gpio = Arc::new(gpio);
    let reader = {
        let gpio = gpio.clone();
        thread::spawn(move || wait_for(DEFAULT_TEST_TIMEOUT, || gpio.get_pin(8).unwrap()))
    };
    assert!(reader.join().unwrap());
    assert!(state.completions() >= 1);

    let gpio = Arc::try_unwrap(gpio).ok().expect("reader finished");
    assert_eq!(gpio.shutdown(), ExitReason::Requested);
}

#[test]
fn shutdown_returns_within_one_interval() {
    let (gpio, state, _exit) = start(&options(InputMode::Polled));
    assert!(wait_for(DEFAULT_TEST_TIMEOUT, || state.completions() >= 2));

    let start = Instant::now();
    let reason = gpio.shutdown();
    let elapsed = start.elapsed();

    assert_eq!(reason, ExitReason::Requested);
    assert!(
        elapsed < POLL_INTERVAL + Duration::from_millis(250),
        "shutdown took {:?}",
        elapsed
    );
}

#[test]
fn teardown_never_overlaps_event_draining() {
    for _ in 0..5 {
        let (gpio, state, _exit) = start(&options(InputMode::Cached));
        assert!(wait_for(DEFAULT_TEST_TIMEOUT, || state.event_calls() >= 1));
        gpio.shutdown();

        assert!(state.released());
        assert!(state.closed());
        assert!(!state.teardown_overlapped_events());
    }
}

#[test]
fn external_signal_stops_poll_thread() {
    let (gpio, state, exit) = start(&options(InputMode::Cached));
    exit.signal(ExitReason::Requested);

    // Loop observes the flag after at most one drain
    let calls = state.event_calls();
    thread::sleep(POLL_INTERVAL * 3);
    assert!(state.event_calls() <= calls + 1);
    assert_eq!(gpio.shutdown(), ExitReason::Requested);
}

#[test]
fn transfer_failure_signals_fatal_exit() {
    let (gpio, state, exit) = start(&options(InputMode::Cached));
    state.set_next_status(TransferStatus::Failed(UsbError::Overflow));

    assert_eq!(
        exit.wait_timeout(DEFAULT_TEST_TIMEOUT),
        Some(ExitReason::Fatal(TRANSFER_FAILED))
    );
    assert_eq!(gpio.pipeline_state(), PipelineState::Stopped);

    let reason = gpio.shutdown();
    assert_eq!(reason, ExitReason::Fatal(TRANSFER_FAILED));
    assert_eq!(reason.exit_code(), 2);
    assert!(state.closed());
}

#[test]
fn resubmit_failure_signals_fatal_exit() {
    let (gpio, state, exit) = start(&options(InputMode::Cached));
    state.fail_next_submit(UsbError::NoDevice);

    assert_eq!(
        exit.wait_timeout(DEFAULT_TEST_TIMEOUT),
        Some(ExitReason::Fatal(TRANSFER_FAILED))
    );
    assert_eq!(gpio.shutdown(), ExitReason::Fatal(TRANSFER_FAILED));
}

#[test]
fn drain_error_signals_its_code() {
    let (gpio, state, exit) = start(&options(InputMode::Polled));
    state.fail_next_events(UsbError::Io);

    assert_eq!(
        exit.wait_timeout(DEFAULT_TEST_TIMEOUT),
        Some(ExitReason::Fatal(-1))
    );
    assert_eq!(gpio.shutdown().exit_code(), 1);
}

#[test]
fn pin_failure_does_not_trigger_shutdown() {
    let (gpio, state, exit) = start(&options(InputMode::Polled));
    state.set_control_error(Some(UsbError::Pipe));

    let err = gpio.set_pin(1, true).unwrap_err();
    assert!(matches!(err, GpioError::TransferFailed(UsbError::Pipe)));
    assert_eq!(gpio.output_state(), 0);

    assert_eq!(exit.wait_timeout(POLL_INTERVAL * 2), None);
    assert_eq!(gpio.shutdown(), ExitReason::Requested);
}

#[test]
fn claim_failure_aborts_before_poll_thread() {
    let (bus, state) = StubBus::with_device(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID);
    state.set_claim_error(Some(UsbError::Busy));

    let result = HidGpio::open(&bus, &options(InputMode::Cached), Arc::new(ExitSignal::new()));
    let err = match result {
        Ok(_) => panic!("claim should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, GpioError::ClaimFailed { interface: 0, .. }));
    assert_eq!(err.code(), -6);
    assert_eq!(state.event_calls(), 0);
    assert_eq!(state.submits(), 0);
    assert!(state.closed());
}

#[test]
fn concurrent_pin_operations() {
    let (gpio, state, _exit) = start(&options(InputMode::Cached));
    state.set_interrupt_payload(0b0000_0011);
    let gpio = Arc::new(gpio);

    let writers: Vec<_> = (1..=3u8)
        .map(|pin| {
            let gpio = gpio.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    gpio.set_pin(pin, true).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    // No bit lost between concurrent writers
    assert_eq!(gpio.output_state(), 0b111);
    assert!(wait_for(DEFAULT_TEST_TIMEOUT, || gpio.get_pin(5).unwrap()));

    let gpio = Arc::try_unwrap(gpio).ok().expect("writers finished");
    gpio.shutdown();
}
