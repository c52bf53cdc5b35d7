//! Per-console notification state machine.
//!
//! Holds at most one [`FrameBuffer`]. Scanouts replace it wholesale, updates
//! patch it in place, `Disable` drops it. Every scanout or update that leaves
//! a frame behind is published to the sink before the call returns, so
//! frames reach the sink in notification order.
//!
//! Calls must be serialized by the owner. The D-Bus listener wraps the
//! dispatcher in a mutex shared by its interface objects.

use std::os::fd::OwnedFd;

use tracing::{debug, info, trace, warn};

use crate::capabilities::Capabilities;
use crate::error::{FrameError, UpdateError};
use crate::framebuffer::{FrameBuffer, Rect};
use crate::orientation::{PresentationDirective, directive_for};
use crate::sink::FrameSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    NoFrame,
    HasFrame,
}

/// What happened to a notification that was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The current frame reached the sink.
    Published,
    /// Out-of-order notification with no frame to apply it to.
    Ignored,
    /// The frame was valid but the sink refused it.
    Dropped,
}

/// Arguments of a multi-plane dmabuf scanout.
#[derive(Debug)]
pub struct MultiPlaneScanout {
    pub fds: Vec<OwnedFd>,
    /// Visible region inside the backing buffer.
    pub region: Rect,
    pub offsets: Vec<u32>,
    pub strides: Vec<u32>,
    pub num_planes: u32,
    pub fourcc: u32,
    pub backing_width: u32,
    pub backing_height: u32,
    pub modifier: u64,
    pub flipped: bool,
}

impl MultiPlaneScanout {
    fn into_frame(self) -> Result<FrameBuffer, FrameError> {
        let [fd]: [OwnedFd; 1] = self
            .fds
            .try_into()
            .map_err(|fds: Vec<OwnedFd>| FrameError::FdCount(fds.len()))?;

        let planes = self.num_planes as usize;
        if planes == 0 || planes > self.offsets.len() || planes > self.strides.len() {
            return Err(FrameError::PlaneMismatch {
                planes,
                offsets: self.offsets.len(),
                strides: self.strides.len(),
            });
        }

        FrameBuffer::shareable_buffer(
            fd,
            self.backing_width,
            self.backing_height,
            &self.offsets[..planes],
            &self.strides[..planes],
            self.fourcc,
            self.modifier,
            self.flipped,
        )
    }
}

pub struct Dispatcher<S> {
    sink: S,
    capabilities: Capabilities,
    frame: Option<FrameBuffer>,
    /// Last directive the sink accepted.
    directive: Option<PresentationDirective>,
}

impl<S: FrameSink> Dispatcher<S> {
    pub fn new(sink: S, capabilities: Capabilities) -> Self {
        Self {
            sink,
            capabilities,
            frame: None,
            directive: None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn state(&self) -> DispatcherState {
        match self.frame {
            Some(_) => DispatcherState::HasFrame,
            None => DispatcherState::NoFrame,
        }
    }

    pub fn frame(&self) -> Option<&FrameBuffer> {
        self.frame.as_ref()
    }

    pub fn directive(&self) -> PresentationDirective {
        self.directive.unwrap_or_default()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Full frame carried inline.
    pub fn scanout(
        &mut self,
        width: u32,
        height: u32,
        stride: u32,
        format_code: u32,
        data: Vec<u8>,
    ) -> Result<Outcome, FrameError> {
        debug!(
            "Scanout: {}x{}, stride {}, format 0x{:08x}, {} bytes",
            width,
            height,
            stride,
            format_code,
            data.len()
        );
        self.replace(FrameBuffer::inline(width, height, stride, format_code, data))
    }

    /// Dirty rectangle with its pixels.
    pub fn update(
        &mut self,
        rect: Rect,
        stride: u32,
        payload: &[u8],
    ) -> Result<Outcome, UpdateError> {
        trace!("Update: {:?}, stride {}, {} bytes", rect, stride, payload.len());
        self.patch(rect, stride, payload)
    }

    pub fn scanout_shared_memory(
        &mut self,
        fd: OwnedFd,
        offset: u32,
        width: u32,
        height: u32,
        stride: u32,
        format_code: u32,
    ) -> Result<Outcome, FrameError> {
        debug!(
            "ScanoutMap: {}x{}, stride {}, format 0x{:08x}, offset {}",
            width, height, stride, format_code, offset
        );
        let frame = self
            .require(Capabilities::SHARED_MEMORY_MAP)
            .and_then(|()| {
                FrameBuffer::shared_memory(fd, offset, width, height, stride, format_code)
            });
        self.replace(frame)
    }

    /// The VM wrote `rect` into the shared region.
    pub fn update_shared_memory(&mut self, rect: Rect) -> Result<Outcome, UpdateError> {
        trace!("UpdateMap: {:?}", rect);
        self.patch(rect, 0, &[])
    }

    /// Single-plane dmabuf scanout.
    #[allow(clippy::too_many_arguments)]
    pub fn scanout_dmabuf(
        &mut self,
        fd: OwnedFd,
        width: u32,
        height: u32,
        stride: u32,
        fourcc: u32,
        modifier: u64,
        flipped: bool,
    ) -> Result<Outcome, FrameError> {
        debug!(
            "ScanoutDMABUF: {}x{}, stride {}, fourcc 0x{:08x}, modifier 0x{:x}, flipped {}",
            width, height, stride, fourcc, modifier, flipped
        );
        self.replace(FrameBuffer::shareable_buffer(
            fd,
            width,
            height,
            &[0],
            &[stride],
            fourcc,
            modifier,
            flipped,
        ))
    }

    pub fn scanout_dmabuf_planes(
        &mut self,
        scanout: MultiPlaneScanout,
    ) -> Result<Outcome, FrameError> {
        debug!(
            "ScanoutDMABUF2: {} fds, region {:?} of {}x{}, {} planes, offsets {:?}, strides {:?}, \
             fourcc 0x{:08x}, modifier 0x{:x}, flipped {}",
            scanout.fds.len(),
            scanout.region,
            scanout.backing_width,
            scanout.backing_height,
            scanout.num_planes,
            scanout.offsets,
            scanout.strides,
            scanout.fourcc,
            scanout.modifier,
            scanout.flipped
        );
        let frame = self
            .require(Capabilities::MULTI_PLANE)
            .and_then(|()| scanout.into_frame());
        self.replace(frame)
    }

    /// The VM rendered `rect` into the dmabuf.
    pub fn update_dmabuf(&mut self, rect: Rect) -> Result<Outcome, UpdateError> {
        trace!("UpdateDMABUF: {:?}", rect);
        self.patch(rect, 0, &[])
    }

    pub fn disable(&mut self) {
        if self.frame.take().is_some() {
            info!("Display disabled, frame dropped");
        } else {
            debug!("Display disabled without a frame");
        }
    }

    fn require(&self, capability: Capabilities) -> Result<(), FrameError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(FrameError::CapabilityDisabled(capability))
        }
    }

    fn replace(&mut self, frame: Result<FrameBuffer, FrameError>) -> Result<Outcome, FrameError> {
        // the old frame goes regardless, a failed scanout leaves nothing to show
        self.frame = None;
        self.frame = Some(frame?);
        Ok(self.publish())
    }

    fn patch(&mut self, rect: Rect, stride: u32, payload: &[u8]) -> Result<Outcome, UpdateError> {
        let Some(frame) = self.frame.as_mut() else {
            debug!("Update before scanout, ignoring");
            return Ok(Outcome::Ignored);
        };
        frame.apply_update(rect, stride, payload)?;
        Ok(self.publish())
    }

    /// Bring the sink's orientation in line with `directive`. Returns false
    /// if the sink refused it.
    fn orient(&mut self, directive: PresentationDirective) -> bool {
        if self.directive == Some(directive) {
            return true;
        }
        match self.sink.apply_directive(directive) {
            Ok(()) => {
                debug!("Orientation set to {}", directive.method());
                self.directive = Some(directive);
                true
            }
            Err(e) => {
                warn!("Failed to apply orientation {}: {}", directive.method(), e);
                self.directive = None;
                false
            }
        }
    }

    fn publish(&mut self) -> Outcome {
        let Some(flipped) = self.frame.as_ref().map(FrameBuffer::flipped) else {
            return Outcome::Ignored;
        };
        // never hand over a frame the sink would present the wrong way up
        if !self.orient(directive_for(flipped)) {
            return Outcome::Dropped;
        }
        let Some(frame) = &self.frame else {
            return Outcome::Ignored;
        };
        let description = frame.describe();
        match self.sink.publish(&description, frame.consumable()) {
            Ok(()) => Outcome::Published,
            Err(e) => {
                warn!("Dropping frame {}: {}", description, e);
                Outcome::Dropped
            }
        }
    }
}
