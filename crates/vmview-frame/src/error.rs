//! Error types for frame construction, mutation and publication.

use thiserror::Error;

use crate::capabilities::Capabilities;

/// A scanout could not be turned into a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("unknown pixel format 0x{0:08x}")]
    UnknownFormat(u32),

    #[error("pixel payload too short: need {needed} bytes, got {got}")]
    ShortPayload { needed: u64, got: usize },

    /// The consumer cannot map shared memory at an offset.
    #[error("shared memory offset {0} is not supported, only 0 is")]
    NonZeroOffset(u32),

    #[error("plane offsets must be sorted ascending, got {0:?}")]
    UnsortedOffsets(Vec<u32>),

    #[error("plane layout mismatch: {planes} planes, {offsets} offsets, {strides} strides")]
    PlaneMismatch {
        planes: usize,
        offsets: usize,
        strides: usize,
    },

    #[error("expected exactly one buffer fd, got {0}")]
    FdCount(usize),

    #[error("scanout requires the {0:?} capability, which is disabled")]
    CapabilityDisabled(Capabilities),
}

/// An update rectangle could not be applied to the current frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("update rectangle has negative component ({x},{y} {width}x{height})")]
    NegativeRect { x: i32, y: i32, width: i32, height: i32 },

    #[error(
        "update rectangle {x},{y} {width}x{height} exceeds frame {frame_width}x{frame_height}"
    )]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("update writes past the end of the frame buffer ({end} > {len})")]
    Overrun { end: u64, len: usize },

    #[error("update payload too short: need {needed} bytes, got {got}")]
    ShortPayload { needed: u64, got: usize },
}

/// The presentation side refused a frame or directive.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
