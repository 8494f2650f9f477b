//! Test utilities for hidkey-gpio
//!
//! Provides a scriptable in-memory [`Transport`] and [`UsbBus`] plus helpers
//! for tests that involve the poll thread.
//!
//! Compiled for this crate's own tests and, for downstream crates, behind the
//! `test-utils` feature (enable it from `[dev-dependencies]`).
//!
//! # Example
//!
//! ```ignore
//! use common::test_utils::StubTransport;
//! use common::Transport;
//! use std::time::Duration;
//!
//! let (transport, state) = StubTransport::new();
//! state.set_input_report([0x10, 0, 0, 0, 0, 0, 0, 0]);
//!
//! let mut buf = [0u8; 8];
//! let len = transport
//!     .read_control(0xa1, 0x01, 0x0100, 0, &mut buf, Duration::ZERO)
//!     .unwrap();
//! assert_eq!(len, 8);
//! assert_eq!(buf[0], 0x10);
//! assert_eq!(state.control_requests().len(), 1);
//! ```

use crate::transport::{TransferCompletion, Transport, UsbBus};
use protocol::{TransferStatus, UsbError};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between synthetic interrupt completions
pub const DEFAULT_INTERRUPT_PERIOD: Duration = Duration::from_millis(5);

/// One recorded control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload for OUT requests, empty for IN requests
    pub data: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
struct PendingRead {
    endpoint: u8,
    length: usize,
    cancelled: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, inspectable state behind a [`StubTransport`]
///
/// Tests keep an `Arc<StubState>` after the transport itself has been moved
/// into a session, and use it to script behavior and observe I/O.
#[derive(Debug)]
pub struct StubState {
    control_log: Mutex<Vec<ControlRequest>>,
    control_error: Mutex<Option<UsbError>>,
    input_report: Mutex<[u8; 8]>,
    /// Answer GET_REPORT with the last SET_REPORT byte
    echo: AtomicBool,
    last_output: AtomicU8,

    interrupt_payload: AtomicU8,
    interrupt_period: Mutex<Duration>,
    pending: Mutex<Option<PendingRead>>,
    next_status: Mutex<Option<TransferStatus>>,
    submit_error: Mutex<Option<UsbError>>,
    events_error: Mutex<Option<UsbError>>,
    submits: AtomicUsize,
    cancels: AtomicUsize,
    completions: AtomicUsize,
    event_calls: AtomicUsize,

    kernel_drivers: Mutex<Vec<u8>>,
    detached: Mutex<Vec<u8>>,
    claimed: Mutex<Vec<u8>>,
    claim_error: Mutex<Option<UsbError>>,

    in_events: AtomicBool,
    teardown_overlapped_events: AtomicBool,
    released: AtomicBool,
    closed: AtomicBool,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            control_log: Mutex::new(Vec::new()),
            control_error: Mutex::new(None),
            input_report: Mutex::new([0; 8]),
            echo: AtomicBool::new(false),
            last_output: AtomicU8::new(0),
            interrupt_payload: AtomicU8::new(0),
            interrupt_period: Mutex::new(DEFAULT_INTERRUPT_PERIOD),
            pending: Mutex::new(None),
            next_status: Mutex::new(None),
            submit_error: Mutex::new(None),
            events_error: Mutex::new(None),
            submits: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            completions: AtomicUsize::new(0),
            event_calls: AtomicUsize::new(0),
            kernel_drivers: Mutex::new(vec![0, 1]),
            detached: Mutex::new(Vec::new()),
            claimed: Mutex::new(Vec::new()),
            claim_error: Mutex::new(None),
            in_events: AtomicBool::new(false),
            teardown_overlapped_events: AtomicBool::new(false),
            released: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl StubState {
    /// Report returned by GET_REPORT when echo is off
    pub fn set_input_report(&self, report: [u8; 8]) {
        *lock(&self.input_report) = report;
    }

    /// Answer GET_REPORT with the byte last written by SET_REPORT
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::SeqCst);
    }

    /// Fail every control transfer with `error` until cleared
    pub fn set_control_error(&self, error: Option<UsbError>) {
        *lock(&self.control_error) = error;
    }

    /// Byte 0 of every synthetic interrupt report
    pub fn set_interrupt_payload(&self, byte: u8) {
        self.interrupt_payload.store(byte, Ordering::SeqCst);
    }

    pub fn set_interrupt_period(&self, period: Duration) {
        *lock(&self.interrupt_period) = period;
    }

    /// Status of the next interrupt completion (one shot)
    pub fn set_next_status(&self, status: TransferStatus) {
        *lock(&self.next_status) = Some(status);
    }

    /// Fail the next interrupt submission (one shot)
    pub fn fail_next_submit(&self, error: UsbError) {
        *lock(&self.submit_error) = Some(error);
    }

    /// Fail the next event drain (one shot)
    pub fn fail_next_events(&self, error: UsbError) {
        *lock(&self.events_error) = Some(error);
    }

    /// Fail interface claims with `error`
    pub fn set_claim_error(&self, error: Option<UsbError>) {
        *lock(&self.claim_error) = error;
    }

    /// Interfaces that start with a bound kernel driver
    pub fn set_kernel_drivers(&self, interfaces: Vec<u8>) {
        *lock(&self.kernel_drivers) = interfaces;
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        lock(&self.control_log).clone()
    }

    /// Control transfers plus interrupt submissions and cancellations
    pub fn io_count(&self) -> usize {
        lock(&self.control_log).len() + self.submits() + self.cancels()
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn event_calls(&self) -> usize {
        self.event_calls.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    pub fn detached(&self) -> Vec<u8> {
        lock(&self.detached).clone()
    }

    pub fn kernel_drivers(&self) -> Vec<u8> {
        lock(&self.kernel_drivers).clone()
    }

    pub fn claimed(&self) -> Vec<u8> {
        lock(&self.claimed).clone()
    }

    /// An interface was released while an event drain was in progress
    pub fn teardown_overlapped_events(&self) -> bool {
        self.teardown_overlapped_events.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// The transport was dropped
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn note_teardown(&self) {
        if self.in_events.load(Ordering::SeqCst) {
            self.teardown_overlapped_events.store(true, Ordering::SeqCst);
        }
    }

    fn report(&self, length: usize) -> Vec<u8> {
        let mut data = vec![0u8; length];
        if let Some(first) = data.first_mut() {
            *first = self.interrupt_payload.load(Ordering::SeqCst);
        }
        data
    }
}

/// In-memory transport driven by a shared [`StubState`]
///
/// Interrupt reads complete every interrupt period with the configured
/// payload while `handle_events` is being called; with nothing pending,
/// `handle_events` blocks for the whole timeout like an idle event loop.
#[derive(Debug)]
pub struct StubTransport {
    state: Arc<StubState>,
}

impl StubTransport {
    pub fn new() -> (Self, Arc<StubState>) {
        let state = Arc::new(StubState::default());
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }

    fn drain(
        &self,
        timeout: Duration,
        on_complete: &mut dyn FnMut(TransferCompletion),
    ) -> Result<(), UsbError> {
        if let Some(error) = lock(&self.state.events_error).take() {
            return Err(error);
        }

        let pending = *lock(&self.state.pending);
        let Some(pending) = pending else {
            thread::sleep(timeout);
            return Ok(());
        };

        if !pending.cancelled {
            let period = *lock(&self.state.interrupt_period);
            thread::sleep(period.min(timeout));
        }

        // Completion consumes the submission; the callback may resubmit.
        let Some(pending) = lock(&self.state.pending).take() else {
            return Ok(());
        };

        let completion = if pending.cancelled {
            TransferCompletion::cancelled(pending.endpoint)
        } else {
            match lock(&self.state.next_status).take() {
                None | Some(TransferStatus::Completed) => TransferCompletion::completed(
                    pending.endpoint,
                    self.state.report(pending.length),
                ),
                Some(TransferStatus::Cancelled) => TransferCompletion::cancelled(pending.endpoint),
                Some(TransferStatus::Failed(error)) => {
                    TransferCompletion::failed(pending.endpoint, error)
                }
            }
        };

        self.state.completions.fetch_add(1, Ordering::SeqCst);
        on_complete(completion);
        Ok(())
    }

    fn control_error(&self) -> Option<UsbError> {
        lock(&self.state.control_error).clone()
    }
}

impl Drop for StubTransport {
    fn drop(&mut self) {
        self.state.note_teardown();
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

impl Transport for StubTransport {
    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError> {
        Ok(lock(&self.state.kernel_drivers).contains(&interface))
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        let mut drivers = lock(&self.state.kernel_drivers);
        let before = drivers.len();
        drivers.retain(|i| *i != interface);
        if drivers.len() == before {
            return Err(UsbError::NotFound);
        }
        lock(&self.state.detached).push(interface);
        Ok(())
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        self.state.note_teardown();
        let mut drivers = lock(&self.state.kernel_drivers);
        if drivers.contains(&interface) {
            return Err(UsbError::Busy);
        }
        drivers.push(interface);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        if let Some(error) = lock(&self.state.claim_error).clone() {
            return Err(error);
        }
        if lock(&self.state.kernel_drivers).contains(&interface) {
            return Err(UsbError::Busy);
        }
        lock(&self.state.claimed).push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.state.note_teardown();
        let mut claimed = lock(&self.state.claimed);
        let before = claimed.len();
        claimed.retain(|i| *i != interface);
        if claimed.len() == before {
            return Err(UsbError::NotFound);
        }
        self.state.released.store(true, Ordering::SeqCst);
        Ok(())
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
        lock(&self.state.control_log).push(ControlRequest {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
            timeout,
        });
        if let Some(error) = self.control_error() {
            return Err(error);
        }
        if let Some(first) = data.first() {
            self.state.last_output.store(*first, Ordering::SeqCst);
        }
        Ok(data.len())
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
        lock(&self.state.control_log).push(ControlRequest {
            request_type,
            request,
            value,
            index,
            data: Vec::new(),
            timeout,
        });
        if let Some(error) = self.control_error() {
            return Err(error);
        }

        let mut report = *lock(&self.state.input_report);
        if self.state.echo.load(Ordering::SeqCst) {
            report = [0; 8];
            report[0] = self.state.last_output.load(Ordering::SeqCst);
        }

        let len = buf.len().min(report.len());
        buf[..len].copy_from_slice(&report[..len]);
        Ok(len)
    }

    fn submit_interrupt(&self, endpoint: u8, length: usize) -> Result<(), UsbError> {
        if let Some(error) = lock(&self.state.submit_error).take() {
            return Err(error);
        }
        let mut pending = lock(&self.state.pending);
        if pending.is_some() {
            return Err(UsbError::Busy);
        }
        *pending = Some(PendingRead {
            endpoint,
            length,
            cancelled: false,
        });
        self.state.submits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_interrupt(&self, endpoint: u8) -> Result<(), UsbError> {
        let mut pending = lock(&self.state.pending);
        match pending.as_mut() {
            Some(read) if read.endpoint == endpoint => {
                read.cancelled = true;
                self.state.cancels.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(UsbError::NotFound),
        }
    }

    fn handle_events(
        &self,
        timeout: Duration,
        on_complete: &mut dyn FnMut(TransferCompletion),
    ) -> Result<(), UsbError> {
        self.state.event_calls.fetch_add(1, Ordering::SeqCst);
        self.state.in_events.store(true, Ordering::SeqCst);
        let result = self.drain(timeout, on_complete);
        self.state.in_events.store(false, Ordering::SeqCst);
        result
    }
}

/// Bus holding at most one stub device
#[derive(Debug)]
pub struct StubBus {
    vendor_id: u16,
    product_id: u16,
    device: Mutex<Option<StubTransport>>,
    open_error: Mutex<Option<UsbError>>,
}

impl StubBus {
    /// Bus with one device at `vendor_id:product_id`
    pub fn with_device(vendor_id: u16, product_id: u16) -> (Self, Arc<StubState>) {
        let (device, state) = StubTransport::new();
        (
            Self {
                vendor_id,
                product_id,
                device: Mutex::new(Some(device)),
                open_error: Mutex::new(None),
            },
            state,
        )
    }

    /// Bus with nothing attached
    pub fn empty() -> Self {
        Self {
            vendor_id: 0,
            product_id: 0,
            device: Mutex::new(None),
            open_error: Mutex::new(None),
        }
    }

    /// Fail the next open (one shot)
    pub fn fail_next_open(&self, error: UsbError) {
        *lock(&self.open_error) = Some(error);
    }
}

impl UsbBus for StubBus {
    type Device = StubTransport;

    fn open_device(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<Self::Device>, UsbError> {
        if let Some(error) = lock(&self.open_error).take() {
            return Err(error);
        }
        if vendor_id != self.vendor_id || product_id != self.product_id {
            return Ok(None);
        }
        Ok(lock(&self.device).take())
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}
