//! GPIO runtime
//!
//! [`HidGpio`] acquires the keyboard, arms the interrupt pipeline, starts the
//! poll thread and exposes `set_pin`/`get_pin`. Teardown always runs in the
//! same order, whether through [`HidGpio::shutdown`] or on drop:
//!
//! 1. signal exit
//! 2. cancel the outstanding interrupt read
//! 3. join the poll thread
//! 4. retire the transfer if no completion did
//! 5. release interfaces, reattach kernel drivers, close the handle
//!
//! The session refuses step 5 while any other `Arc` to the handle is alive,
//! so it cannot overlap event draining.

use crate::error::{GpioError, Result};
use crate::pins::{InputSource, PinController, PinTiming};
use crate::usb::{
    DeviceSession, InputState, InterruptPipeline, PipelineState, PollLoop, spawn_poll_loop,
};
use common::{ExitReason, ExitSignal, Transport, UsbBus};
use protocol::report::INFINITE_IDLE;
use protocol::{DEFAULT_INTERRUPT_ENDPOINT, INPUT_REPORT_LEN, InputMode, PinLayout, Polarity};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default keyboard: Microsoft 0x045e:0x0750
pub const DEFAULT_VENDOR_ID: u16 = 0x045e;
pub const DEFAULT_PRODUCT_ID: u16 = 0x0750;

/// Everything needed to bring up a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioOptions {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Interfaces whose kernel driver is detached on open
    pub detach_interfaces: Vec<u8>,
    /// Interface claimed and addressed by report requests
    pub interface: u8,
    pub interrupt_endpoint: u8,
    /// Send SET_IDLE(0) after claiming
    pub infinite_idle: bool,
    pub layout: PinLayout,
    pub polarity: Polarity,
    pub input_mode: InputMode,
    pub timing: PinTiming,
    /// Upper bound of one event drain, and so of shutdown latency
    pub poll_interval: Duration,
}

impl Default for GpioOptions {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            detach_interfaces: vec![0, 1],
            interface: 0,
            interrupt_endpoint: DEFAULT_INTERRUPT_ENDPOINT,
            infinite_idle: false,
            layout: PinLayout::default(),
            polarity: Polarity::default(),
            input_mode: InputMode::default(),
            timing: PinTiming::default(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct HidGpio<T: Transport> {
    // Teardown takes these in declaration order
    poll: Option<PollLoop>,
    pins: Option<PinController<T>>,
    device: Option<Arc<T>>,
    pipeline: Arc<InterruptPipeline>,
    session: Option<DeviceSession<T>>,
    input: Arc<InputState>,
    exit: Arc<ExitSignal>,
}

impl<T: Transport> HidGpio<T> {
    /// Open, claim and start the device described by `options`
    ///
    /// Errors here happen before the poll thread exists; everything acquired
    /// so far is released before returning.
    pub fn open<B>(bus: &B, options: &GpioOptions, exit: Arc<ExitSignal>) -> Result<Self>
    where
        B: UsbBus<Device = T>,
    {
        options.layout.validate().map_err(GpioError::InvalidLayout)?;

        let mut session = DeviceSession::open(
            bus,
            options.vendor_id,
            options.product_id,
            &options.detach_interfaces,
        )?;
        session.claim(options.interface)?;

        if options.infinite_idle
            && let Err(e) = session.set_idle(
                options.interface,
                INFINITE_IDLE,
                options.timing.control_timeout,
            )
        {
            warn!("SET_IDLE not accepted, continuing: {}", e);
        }

        let input = Arc::new(InputState::new());
        let pipeline = Arc::new(InterruptPipeline::new(
            options.interrupt_endpoint,
            INPUT_REPORT_LEN,
            input.clone(),
            exit.clone(),
        ));

        let device = session.device();
        pipeline.arm(&*device)?;

        let poll = match spawn_poll_loop(
            device.clone(),
            pipeline.clone(),
            exit.clone(),
            options.poll_interval,
        ) {
            Ok(poll) => poll,
            Err(e) => {
                pipeline.retire();
                return Err(e);
            }
        };

        let source = match options.input_mode {
            InputMode::Cached => InputSource::Cached(input.clone()),
            InputMode::Polled => InputSource::Polled,
        };
        let pins = PinController::new(
            device.clone(),
            options.interface,
            options.layout,
            options.polarity,
            source,
            options.timing,
        )?;

        info!(
            "GPIO ready on {:04x}:{:04x}: outputs {:?}, inputs {:?}, {} input",
            options.vendor_id,
            options.product_id,
            options.layout.output_pins(),
            options.layout.input_pins(),
            options.input_mode
        );

        Ok(Self {
            poll: Some(poll),
            pins: Some(pins),
            device: Some(device),
            pipeline,
            session: Some(session),
            input,
            exit,
        })
    }

    fn pins(&self) -> Result<&PinController<T>> {
        self.pins.as_ref().ok_or(GpioError::HandleInUse)
    }

    /// Drive output `pin`; see [`PinController::set_pin`]
    pub fn set_pin(&self, pin: u8, value: bool) -> Result<usize> {
        self.pins()?.set_pin(pin, value)
    }

    /// Read input `pin`; see [`PinController::get_pin`]
    pub fn get_pin(&self, pin: u8) -> Result<bool> {
        self.pins()?.get_pin(pin)
    }

    pub fn exit_signal(&self) -> &Arc<ExitSignal> {
        &self.exit
    }

    pub fn input_state(&self) -> &Arc<InputState> {
        &self.input
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Last output report successfully sent
    pub fn output_state(&self) -> u8 {
        self.pins.as_ref().map_or(0, PinController::output_state)
    }

    pub fn layout(&self) -> Option<PinLayout> {
        self.pins.as_ref().map(PinController::layout)
    }

    /// Stop everything and give the device back, returning why we stopped
    ///
    /// A fatal reason recorded earlier takes precedence over the request.
    pub fn shutdown(mut self) -> ExitReason {
        self.teardown();
        self.exit.reason().unwrap_or(ExitReason::Requested)
    }

    fn teardown(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.exit.signal(ExitReason::Requested);

        if let Some(device) = &self.device
            && self.pipeline.cancel(&**device)
        {
            debug!("Interrupt transfer cancellation requested");
        }

        if let Some(poll) = self.poll.take() {
            poll.join();
        }
        self.pipeline.retire();

        self.pins = None;
        self.device = None;

        if let Some(session) = self.session.take()
            && let Err(e) = session.release_and_close()
        {
            warn!("Device teardown incomplete: {}", e);
        }
        info!("GPIO stopped");
    }
}

impl<T: Transport> Drop for HidGpio<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
