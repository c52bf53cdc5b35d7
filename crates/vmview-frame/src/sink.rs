//! Boundary towards whatever presents the frames.

use crate::error::SinkError;
use crate::framebuffer::{Consumable, FrameDescription};
use crate::orientation::PresentationDirective;

/// Consumer of finished frames.
///
/// Calls arrive in notification order and may block; the dispatcher does not
/// take the next notification until they return. Borrowed descriptors in a
/// [`Consumable`] stay owned by the frame and must not be closed.
pub trait FrameSink {
    /// Configure orientation ahead of the frames that need it.
    fn apply_directive(&mut self, directive: PresentationDirective) -> Result<(), SinkError>;

    fn publish(
        &mut self,
        description: &FrameDescription,
        buffer: Consumable<'_>,
    ) -> Result<(), SinkError>;
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn apply_directive(&mut self, directive: PresentationDirective) -> Result<(), SinkError> {
        (**self).apply_directive(directive)
    }

    fn publish(
        &mut self,
        description: &FrameDescription,
        buffer: Consumable<'_>,
    ) -> Result<(), SinkError> {
        (**self).publish(description, buffer)
    }
}
