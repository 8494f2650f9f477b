//! Protocol library for hidkey-gpio
//!
//! This crate defines the fixed HID keyboard report layout that hidkey-gpio
//! reuses as a GPIO port, the pure pin-to-bit mapping, and the USB error and
//! transfer status types shared by the transport layer.
//!
//! Outputs travel in the 1-byte LED output report, inputs arrive in the
//! modifier byte (byte 0) of the 8-byte input report.
//!
//! # Example
//!
//! ```
//! use protocol::{PinLayout, apply_output, read_input};
//!
//! let layout = PinLayout::default();
//! let bit = layout.output_bit(1).unwrap();
//!
//! // Drive output pin 1 high without inversion
//! let report = apply_output(0x00, bit, true, false);
//! assert_eq!(report, 0b0000_0001);
//!
//! // Input pin 4 is bit 0 of the modifier byte
//! let bit = layout.input_bit(4).unwrap();
//! assert!(read_input(0b0000_0001, bit, false));
//! ```

pub mod error;
pub mod pins;
pub mod report;
pub mod types;

pub use error::{ProtocolError, Result};
pub use pins::{InputMode, PinKind, PinLayout, Polarity, apply_output, read_input};
pub use report::{
    DEFAULT_INTERRUPT_ENDPOINT, INPUT_REPORT_LEN, MODIFIER_BYTE, OUTPUT_REPORT_LEN,
};
pub use types::{TransferStatus, UsbError};
