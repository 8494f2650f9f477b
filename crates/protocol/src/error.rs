//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Pin number is outside the range of the accessor it was passed to
    #[error("Invalid {direction} pin {pin} (valid: {first}..={last})")]
    InvalidPin {
        pin: u8,
        direction: &'static str,
        first: u8,
        last: u8,
    },

    /// Pin layout does not fit into the report bytes
    #[error("Invalid pin layout: {outputs} outputs, {inputs} inputs (each must be 1..={max})")]
    InvalidLayout { outputs: u8, inputs: u8, max: u8 },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
