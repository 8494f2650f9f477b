//! hidkey-gpio
//!
//! Drives a USB HID keyboard as a small GPIO port: LED output report bits are
//! outputs, modifier byte bits are inputs.
//!
//! # Example
//!
//! ```no_run
//! use common::ExitSignal;
//! use hidkey::{GpioOptions, HidGpio, RusbBus};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RusbBus::new()?;
//! let gpio = HidGpio::open(&bus, &GpioOptions::default(), Arc::new(ExitSignal::new()))?;
//!
//! gpio.set_pin(1, true)?;
//! let pressed = gpio.get_pin(4)?;
//! println!("input 4: {}", pressed);
//!
//! gpio.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod gpio;
pub mod pins;
pub mod usb;

pub use config::Config;
pub use error::{GpioError, Result};
pub use gpio::{GpioOptions, HidGpio};
pub use pins::{InputSource, PinController, PinTiming};
pub use usb::{DeviceSession, InputState, InterruptPipeline, PipelineState, RusbBus, RusbDevice};
