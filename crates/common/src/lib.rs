//! Common utilities for hidkey-gpio
//!
//! This crate provides the pieces shared between the GPIO runtime and its
//! tests: the transport contract the USB backends implement, the shutdown
//! coordinator used across the poll thread and the control loop, error
//! handling, logging setup, and stub transports for testing.

pub mod error;
pub mod logging;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use shutdown::{ExitReason, ExitSignal, TRANSFER_FAILED};
pub use transport::{TransferCompletion, Transport, UsbBus};
