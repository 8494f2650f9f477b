//! I/O poll loop
//!
//! Dedicated thread draining transport events with a bounded timeout.
//! Interrupt completions are delivered from inside the drain call, so this
//! thread is the only one that ever runs pipeline completions.
//!
//! The loop checks the exit flag once per drain, so it returns at most one
//! interval after shutdown is signalled.

use crate::error::{GpioError, Result};
use crate::usb::pipeline::InterruptPipeline;
use common::{ExitReason, ExitSignal, TRANSFER_FAILED, Transport};
use protocol::UsbError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const POLL_THREAD_NAME: &str = "hid-poll";

/// Handle to the running poll thread
///
/// Dropping it signals shutdown and joins, so the thread never outlives the
/// owner of the device handle it borrows.
pub struct PollLoop {
    handle: Option<JoinHandle<()>>,
    exit: Arc<ExitSignal>,
}

impl PollLoop {
    /// Wait for the thread to finish
    ///
    /// The caller must have signalled `exit` (or the loop must have hit a
    /// fatal error), otherwise this blocks indefinitely.
    pub fn join(mut self) {
        self.join_inner();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("Poll thread panicked");
            self.exit.signal(ExitReason::Fatal(TRANSFER_FAILED));
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.exit.signal(ExitReason::Requested);
            self.join_inner();
        }
    }
}

/// Spawn the `hid-poll` thread
pub fn spawn_poll_loop<T: Transport>(
    device: Arc<T>,
    pipeline: Arc<InterruptPipeline>,
    exit: Arc<ExitSignal>,
    interval: Duration,
) -> Result<PollLoop> {
    let thread_exit = exit.clone();
    let handle = std::thread::Builder::new()
        .name(POLL_THREAD_NAME.to_string())
        .spawn(move || run(&*device, &pipeline, &thread_exit, interval))
        .map_err(GpioError::Spawn)?;

    Ok(PollLoop {
        handle: Some(handle),
        exit,
    })
}

fn run<T: Transport>(
    device: &T,
    pipeline: &InterruptPipeline,
    exit: &ExitSignal,
    interval: Duration,
) {
    info!("Poll thread started");

    while !exit.is_set() {
        let result = device.handle_events(interval, &mut |completion| {
            pipeline.on_complete(device, completion)
        });

        match result {
            Ok(()) => {}
            Err(UsbError::Interrupted) => {
                // Signal delivery cut the wait short, the device is fine
                debug!("Event handling interrupted");
            }
            Err(e) => {
                error!("Error handling USB events: {}", e);
                exit.signal(ExitReason::fatal(e.code()));
                break;
            }
        }
    }

    if let Some(ExitReason::Fatal(code)) = exit.reason() {
        warn!("Poll thread stopping on fatal condition ({})", code);
    }
    info!("Poll thread stopped");
}
