//! Logical pin numbering and report bit mapping
//!
//! Pins are numbered from 1. Outputs come first (`1..=outputs`) and map to
//! bits of the LED output report; inputs follow (`outputs+1..=outputs+inputs`)
//! and map to bits of the modifier byte. Both ranges are renumbered from bit 0.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Bits available in one report byte
pub const MAX_PINS_PER_DIRECTION: u8 = 8;

/// Direction and report bit of a classified pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Output { bit: u8 },
    Input { bit: u8 },
}

/// Partition of pin numbers into outputs and inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinLayout {
    /// Number of output pins (LED report bits)
    pub outputs: u8,
    /// Number of input pins (modifier byte bits)
    pub inputs: u8,
}

impl Default for PinLayout {
    /// Three LEDs out, four modifier bits in (pins 4..=7)
    fn default() -> Self {
        Self {
            outputs: 3,
            inputs: 4,
        }
    }
}

impl PinLayout {
    /// Create a validated layout
    pub fn new(outputs: u8, inputs: u8) -> Result<Self> {
        let layout = Self { outputs, inputs };
        layout.validate()?;
        Ok(layout)
    }

    /// Check that both directions fit in one report byte
    pub fn validate(&self) -> Result<()> {
        let fits = |n: u8| (1..=MAX_PINS_PER_DIRECTION).contains(&n);
        if fits(self.outputs) && fits(self.inputs) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidLayout {
                outputs: self.outputs,
                inputs: self.inputs,
                max: MAX_PINS_PER_DIRECTION,
            })
        }
    }

    pub fn output_pins(&self) -> RangeInclusive<u8> {
        1..=self.outputs
    }

    pub fn input_pins(&self) -> RangeInclusive<u8> {
        let first = self.outputs.saturating_add(1);
        first..=self.outputs.saturating_add(self.inputs)
    }

    /// Classify a pin number, `None` if it belongs to neither range
    pub fn classify(&self, pin: u8) -> Option<PinKind> {
        if self.output_pins().contains(&pin) {
            Some(PinKind::Output { bit: pin - 1 })
        } else if self.input_pins().contains(&pin) {
            Some(PinKind::Input {
                bit: pin - self.input_pins().start(),
            })
        } else {
            None
        }
    }

    /// Output report bit for `pin`
    pub fn output_bit(&self, pin: u8) -> Result<u8> {
        match self.classify(pin) {
            Some(PinKind::Output { bit }) => Ok(bit),
            _ => Err(self.invalid(pin, "output", self.output_pins())),
        }
    }

    /// Modifier byte bit for `pin`
    pub fn input_bit(&self, pin: u8) -> Result<u8> {
        match self.classify(pin) {
            Some(PinKind::Input { bit }) => Ok(bit),
            _ => Err(self.invalid(pin, "input", self.input_pins())),
        }
    }

    fn invalid(
        &self,
        pin: u8,
        direction: &'static str,
        range: RangeInclusive<u8>,
    ) -> ProtocolError {
        ProtocolError::InvalidPin {
            pin,
            direction,
            first: *range.start(),
            last: *range.end(),
        }
    }
}

/// Per-direction invert policy
///
/// With inversion disabled a logical 1 is a set report bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Polarity {
    pub output_invert: bool,
    pub input_invert: bool,
}

/// How input pins are read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Read the byte kept fresh by the interrupt pipeline, no I/O per call
    Cached,
    /// Issue a GET_REPORT control transfer per call
    #[default]
    Polled,
}

impl std::fmt::Display for InputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputMode::Cached => write!(f, "cached"),
            InputMode::Polled => write!(f, "polled"),
        }
    }
}

impl std::str::FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cached" | "interrupt" => Ok(InputMode::Cached),
            "polled" | "control" => Ok(InputMode::Polled),
            other => Err(format!(
                "Invalid input mode '{}', expected 'cached' or 'polled'",
                other
            )),
        }
    }
}

/// Apply a logical value for one output bit
///
/// The stored bit is `value XOR invert`; other bits are preserved.
pub fn apply_output(report: u8, bit: u8, value: bool, invert: bool) -> u8 {
    let mask = 1u8 << bit;
    if value ^ invert {
        report | mask
    } else {
        report & !mask
    }
}

/// Logical value of one input bit, `raw XOR invert`
pub fn read_input(report: u8, bit: u8, invert: bool) -> bool {
    let raw = report & (1u8 << bit) != 0;
    raw ^ invert
}
