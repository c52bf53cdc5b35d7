//! Output orientation for the presentation side.

/// How the presentation pipeline must orient the next frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationDirective {
    pub flipped: bool,
}

impl PresentationDirective {
    /// Name of the matching flip method, as video-flip stages spell it.
    pub fn method(&self) -> &'static str {
        if self.flipped {
            "vertical-flip"
        } else {
            "none"
        }
    }
}

pub fn directive_for(flipped: bool) -> PresentationDirective {
    PresentationDirective { flipped }
}
