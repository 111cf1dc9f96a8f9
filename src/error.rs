use std::time::Duration;

use thiserror::Error;

use crate::buffer::BufferState;

/// Error taxonomy for the acquisition pipeline.
///
/// `Configuration` and `ResourceExhausted` are raised before any capture
/// starts and leave no partial state behind. `Timeout` and `Overrun` abort an
/// in-progress acquisition; the engine still hands back whatever complete
/// records were converted, tagged as partial. `InvalidBufferState`,
/// `NoBufferAvailable` and `AlreadyRunning` indicate a protocol defect in the
/// caller and are never retried here.
#[derive(Debug, Error)]
pub enum DaqError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("pinned memory unavailable: {0}")]
    ResourceExhausted(String),

    #[error("buffer {slot} not filled within {timeout:?}")]
    Timeout { slot: usize, timeout: Duration },

    #[error("device reported data overrun at buffer {0}")]
    Overrun(usize),

    #[error("invalid buffer state transition on slot {slot}: {from:?} -> {to:?}")]
    InvalidBufferState {
        slot: usize,
        from: BufferState,
        to: BufferState,
    },

    #[error("no free buffer available")]
    NoBufferAvailable,

    #[error("acquisition already running")]
    AlreadyRunning,

    #[error("device error: {0}")]
    Device(String),
}
