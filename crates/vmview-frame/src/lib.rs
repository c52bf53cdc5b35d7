//! Frame model for a VM display listener.
//!
//! Turns the scanout/update notification stream of one VM console into
//! ready-to-present frames:
//!
//! - [`FrameBuffer`] holds the pixels of the current frame in one of three
//!   backings (inline bytes, shared memory, dmabuf).
//! - [`Dispatcher`] runs the per-console state machine and publishes every
//!   successful scanout or update to a [`FrameSink`].
//! - [`PresentationDirective`] carries the orientation the sink must apply.
//!
//! Nothing here knows about D-Bus; the transport lives in the binary.

pub mod capabilities;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod framebuffer;
pub mod orientation;
pub mod sink;

pub use capabilities::Capabilities;
pub use dispatcher::{Dispatcher, DispatcherState, MultiPlaneScanout, Outcome};
pub use error::{FrameError, SinkError, UpdateError};
pub use format::{CanonicalFormat, Fourcc};
pub use framebuffer::{
    Consumable, FrameBuffer, FrameDescription, Plane, PlaneFormat, Rect,
};
pub use orientation::{PresentationDirective, directive_for};
pub use sink::FrameSink;
