//! Interrupt pipeline
//!
//! Keeps exactly one interrupt IN read outstanding on the keyboard endpoint.
//! Each successful completion stores the modifier byte into the
//! [`InputState`] and immediately resubmits, so the cache stays fresh without
//! anything outside the completion scheduling reads.
//!
//! ```text
//!   Idle ──arm──► Armed ──completion──► Completing ──resubmit ok──► Armed
//!                   │                        │
//!                cancel                failure / cancelled /
//!                   ▼                  shutting down
//!              (cancelled) ──────────────────┴──────────────► Stopped
//! ```
//!
//! Completions are delivered from the poll thread's event drain; they never
//! drain events themselves.

use crate::error::{GpioError, Result};
use crate::usb::input::InputState;
use common::{ExitReason, ExitSignal, TRANSFER_FAILED, TransferCompletion, Transport};
use protocol::{MODIFIER_BYTE, TransferStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing submitted yet
    Idle,
    /// One read outstanding
    Armed,
    /// Completion being processed
    Completing,
    /// Transfer retired; needs `arm` to restart
    Stopped,
}

/// The single in-flight transfer and its receive buffer
#[derive(Debug)]
struct InterruptTransfer {
    buffer: Vec<u8>,
}

#[derive(Debug)]
struct Inner {
    state: PipelineState,
    transfer: Option<InterruptTransfer>,
    released: u32,
}

impl Inner {
    /// Release the transfer and stop; the transfer is dropped at most once
    fn retire(&mut self) {
        if self.transfer.take().is_some() {
            self.released += 1;
        }
        self.state = PipelineState::Stopped;
    }
}

pub struct InterruptPipeline {
    endpoint: u8,
    length: usize,
    inner: Mutex<Inner>,
    input: Arc<InputState>,
    exit: Arc<ExitSignal>,
}

impl InterruptPipeline {
    pub fn new(endpoint: u8, length: usize, input: Arc<InputState>, exit: Arc<ExitSignal>) -> Self {
        Self {
            endpoint,
            length,
            inner: Mutex::new(Inner {
                state: PipelineState::Idle,
                transfer: None,
                released: 0,
            }),
            input,
            exit,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the transfer and submit the first read
    pub fn arm<T: Transport + ?Sized>(&self, transport: &T) -> Result<()> {
        let mut inner = self.inner();
        match inner.state {
            PipelineState::Idle | PipelineState::Stopped => {}
            state => {
                warn!("Interrupt pipeline already running ({:?})", state);
                return Ok(());
            }
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(self.length)
            .map_err(|_| GpioError::AllocationFailed {
                length: self.length,
            })?;
        buffer.resize(self.length, 0);

        transport
            .submit_interrupt(self.endpoint, self.length)
            .map_err(GpioError::SubmitFailed)?;

        inner.transfer = Some(InterruptTransfer { buffer });
        inner.state = PipelineState::Armed;
        debug!(
            "Interrupt pipeline armed on endpoint {:#x} ({} bytes)",
            self.endpoint, self.length
        );
        Ok(())
    }

    /// Completion handler, called from inside `Transport::handle_events`
    pub fn on_complete<T: Transport + ?Sized>(&self, transport: &T, completion: TransferCompletion) {
        let mut inner = self.inner();
        if inner.state != PipelineState::Armed {
            debug!(
                "Ignoring interrupt completion in state {:?}: {:?}",
                inner.state, completion.status
            );
            return;
        }
        inner.state = PipelineState::Completing;

        match completion.status {
            TransferStatus::Completed => {
                if let Some(transfer) = inner.transfer.as_mut() {
                    let len = completion.data.len().min(transfer.buffer.len());
                    transfer.buffer[..len].copy_from_slice(&completion.data[..len]);
                    if len > MODIFIER_BYTE {
                        let modifiers = transfer.buffer[MODIFIER_BYTE];
                        self.input.store(modifiers);
                        trace!("Interrupt report: modifiers {:#04x}", modifiers);
                    } else {
                        warn!("Empty interrupt report on endpoint {:#x}", self.endpoint);
                    }
                }

                if self.exit.is_set() {
                    debug!("Shutdown in progress, not resubmitting interrupt transfer");
                    inner.retire();
                    return;
                }

                match transport.submit_interrupt(self.endpoint, self.length) {
                    Ok(()) => inner.state = PipelineState::Armed,
                    Err(e) => {
                        error!("Error resubmitting interrupt transfer: {}", e);
                        self.exit.signal(ExitReason::Fatal(TRANSFER_FAILED));
                        inner.retire();
                    }
                }
            }
            TransferStatus::Cancelled if self.exit.is_set() => {
                debug!("Interrupt transfer cancelled");
                inner.retire();
            }
            TransferStatus::Cancelled => {
                error!("Interrupt transfer cancelled unexpectedly");
                self.exit.signal(ExitReason::Fatal(TRANSFER_FAILED));
                inner.retire();
            }
            TransferStatus::Failed(e) => {
                error!("Interrupt transfer failed: {}", e);
                self.exit.signal(ExitReason::Fatal(TRANSFER_FAILED));
                inner.retire();
            }
        }
    }

    /// Request cancellation of the outstanding read
    ///
    /// Returns `true` if a cancellation was requested. The cancelled
    /// completion arrives through the event drain, if it still runs.
    pub fn cancel<T: Transport + ?Sized>(&self, transport: &T) -> bool {
        let inner = self.inner();
        if inner.state != PipelineState::Armed {
            return false;
        }
        match transport.cancel_interrupt(self.endpoint) {
            Ok(()) => true,
            Err(e) => {
                debug!("Could not cancel interrupt transfer: {}", e);
                false
            }
        }
    }

    /// Release the transfer if no completion did
    pub fn retire(&self) {
        self.inner().retire();
    }

    pub fn state(&self) -> PipelineState {
        self.inner().state
    }

    /// How many times a transfer was released (at most once per `arm`)
    pub fn released_transfers(&self) -> u32 {
        self.inner().released
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{StubState, StubTransport};
    use protocol::{INPUT_REPORT_LEN, UsbError};
    use std::time::Duration;

    const EP: u8 = 0x81;

    fn setup() -> (
        StubTransport,
        Arc<StubState>,
        InterruptPipeline,
        Arc<InputState>,
        Arc<ExitSignal>,
    ) {
        let (transport, state) = StubTransport::new();
        state.set_interrupt_period(Duration::from_millis(1));
        let input = Arc::new(InputState::new());
        let exit = Arc::new(ExitSignal::new());
        let pipeline = InterruptPipeline::new(EP, INPUT_REPORT_LEN, input.clone(), exit.clone());
        (transport, state, pipeline, input, exit)
    }

    fn drain(transport: &StubTransport, pipeline: &InterruptPipeline) {
        transport
            .handle_events(Duration::from_millis(50), &mut |c| {
                pipeline.on_complete(transport, c)
            })
            .unwrap();
    }

    #[test]
    fn test_arm_submits_once() {
        let (transport, state, pipeline, _input, _exit) = setup();
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.arm(&transport).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Armed);
        assert_eq!(state.submits(), 1);

        // Arming again does not stack a second read
        pipeline.arm(&transport).unwrap();
        assert_eq!(state.submits(), 1);
    }

    #[test]
    fn test_arm_submit_failure() {
        let (transport, state, pipeline, _input, _exit) = setup();
        state.fail_next_submit(UsbError::NoDevice);

        let err = pipeline.arm(&transport).unwrap_err();
        assert!(matches!(err, GpioError::SubmitFailed(UsbError::NoDevice)));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn test_completion_updates_cache_and_resubmits() {
        let (transport, state, pipeline, input, exit) = setup();
        state.set_interrupt_payload(0b0001_0000);
        pipeline.arm(&transport).unwrap();

        drain(&transport, &pipeline);
        drain(&transport, &pipeline);

        assert_eq!(input.load(), 0b0001_0000);
        assert_eq!(input.updates(), 2);
        assert_eq!(state.submits(), 3);
        assert_eq!(pipeline.state(), PipelineState::Armed);
        assert!(!exit.is_set());
    }

    #[test]
    fn test_failed_completion_is_fatal() {
        let (transport, state, pipeline, input, exit) = setup();
        state.set_interrupt_payload(0xff);
        pipeline.arm(&transport).unwrap();
        state.set_next_status(TransferStatus::Failed(UsbError::Pipe));

        drain(&transport, &pipeline);

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(exit.reason(), Some(ExitReason::Fatal(TRANSFER_FAILED)));
        assert_eq!(pipeline.released_transfers(), 1);
        // No resubmission, no cache write from a failed transfer
        assert_eq!(state.submits(), 1);
        assert_eq!(input.updates(), 0);
        assert!(!state.has_pending());
    }

    #[test]
    fn test_resubmit_failure_is_fatal() {
        let (transport, state, pipeline, input, exit) = setup();
        state.set_interrupt_payload(0x01);
        pipeline.arm(&transport).unwrap();
        state.fail_next_submit(UsbError::Io);

        drain(&transport, &pipeline);

        // The completed payload still reached the cache
        assert_eq!(input.load(), 0x01);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(exit.reason(), Some(ExitReason::Fatal(TRANSFER_FAILED)));
    }

    #[test]
    fn test_cancel_during_shutdown_is_quiet() {
        let (transport, state, pipeline, _input, exit) = setup();
        pipeline.arm(&transport).unwrap();

        exit.signal(ExitReason::Requested);
        assert!(pipeline.cancel(&transport));
        drain(&transport, &pipeline);

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(exit.reason(), Some(ExitReason::Requested));
        assert_eq!(state.cancels(), 1);
        assert_eq!(pipeline.released_transfers(), 1);
    }

    #[test]
    fn test_unexpected_cancel_is_fatal() {
        let (transport, _state, pipeline, _input, exit) = setup();
        pipeline.arm(&transport).unwrap();
        assert!(pipeline.cancel(&transport));

        drain(&transport, &pipeline);

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(exit.reason(), Some(ExitReason::Fatal(TRANSFER_FAILED)));
    }

    #[test]
    fn test_completion_during_shutdown_retires() {
        let (transport, state, pipeline, input, exit) = setup();
        state.set_interrupt_payload(0x08);
        pipeline.arm(&transport).unwrap();
        exit.signal(ExitReason::Requested);

        drain(&transport, &pipeline);

        assert_eq!(input.load(), 0x08);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(state.submits(), 1);
    }

    #[test]
    fn test_retire_releases_once() {
        let (transport, _state, pipeline, _input, _exit) = setup();
        pipeline.arm(&transport).unwrap();

        pipeline.retire();
        pipeline.retire();
        assert_eq!(pipeline.released_transfers(), 1);
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        // Cancel after retire is a no-op
        assert!(!pipeline.cancel(&transport));
    }

    #[test]
    fn test_rearm_after_stop() {
        let (transport, state, pipeline, _input, _exit) = setup();
        pipeline.arm(&transport).unwrap();
        state.set_next_status(TransferStatus::Failed(UsbError::Io));
        drain(&transport, &pipeline);
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        pipeline.arm(&transport).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Armed);
        assert_eq!(state.submits(), 2);
    }
}
