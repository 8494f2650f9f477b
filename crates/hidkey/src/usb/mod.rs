//! USB subsystem
//!
//! Device acquisition, the interrupt pipeline keeping the input cache
//! current, and the poll thread that drives its completions.
//!
//! All device access goes through [`common::Transport`]; [`backend`] holds
//! the rusb implementation used by the binary.

pub mod backend;
pub mod input;
pub mod pipeline;
pub mod poll;
pub mod session;

pub use backend::{DeviceSummary, RusbBus, RusbDevice};
pub use input::InputState;
pub use pipeline::{InterruptPipeline, PipelineState};
pub use poll::{PollLoop, spawn_poll_loop};
pub use session::DeviceSession;
