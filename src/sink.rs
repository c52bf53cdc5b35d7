//! Default frame sink: tracks what would be presented and reports frame rate

use std::time::Duration;
use tracing::{info, trace};
use vmview_frame::{Consumable, FrameDescription, FrameSink, PresentationDirective, SinkError};

use crate::fps::FpsCounter;

/// Sink that accounts for frames without presenting them
pub struct StatsSink {
    fps: FpsCounter,
    directive: PresentationDirective,
    /// Descriptor of the last published frame, to log format changes once
    current_format: Option<String>,
    frames: u64,
}

impl StatsSink {
    pub fn new(report_interval: Duration) -> Self {
        Self {
            fps: FpsCounter::new(report_interval),
            directive: PresentationDirective::default(),
            current_format: None,
            frames: 0,
        }
    }
}

impl FrameSink for StatsSink {
    fn apply_directive(&mut self, directive: PresentationDirective) -> Result<(), SinkError> {
        if directive != self.directive {
            info!("Orientation: {}", directive.method());
        }
        self.directive = directive;
        Ok(())
    }

    fn publish(
        &mut self,
        description: &FrameDescription,
        buffer: Consumable<'_>,
    ) -> Result<(), SinkError> {
        let format = description.to_string();
        if self.current_format.as_deref() != Some(format.as_str()) {
            info!("Stream format: {}", format);
            self.current_format = Some(format);
        }

        let kind = match buffer {
            Consumable::Bytes(_) => "inline",
            Consumable::SharedMemory { .. } => "shm",
            Consumable::DmaBuf { .. } => "dmabuf",
        };
        trace!("Frame {}: {} buffer, {} bytes", self.frames, kind, buffer.size());

        self.frames += 1;
        if let Some(fps) = self.fps.tick() {
            info!("{:.1} fps ({} frames total)", fps, self.frames);
        }
        Ok(())
    }
}
