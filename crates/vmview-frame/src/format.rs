//! Pixman format codes understood by the presentation side.
//!
//! The VM describes inline and shared-memory scanouts with a pixman format
//! code. Only the codes listed here can be presented; anything else is
//! rejected when the frame is created.

/// Canonical (presentation-side) name of a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalFormat(&'static str);

impl CanonicalFormat {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for CanonicalFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

static FORMAT_TABLE: &[(u32, &str)] = &[
    (0x2002_8888, "BGRA"),  // a8r8g8b8
    (0x2002_0888, "BGRx"),  // x8r8g8b8
    (0x2003_8888, "RGBA"),  // a8b8g8r8
    (0x2003_0888, "RGBx"),  // x8b8g8r8
    (0x2008_8888, "ARGB"),  // b8g8r8a8
    (0x2008_0888, "xRGB"),  // b8g8r8x8
    (0x2009_8888, "ABGR"),  // r8g8b8a8
    (0x2009_0888, "xBGR"),  // r8g8b8x8
    (0x1802_0888, "BGR"),   // r8g8b8
    (0x1803_0888, "RGB"),   // b8g8r8
    (0x1002_0565, "BGR16"), // r5g6b5
    (0x1002_1555, "BGR15"), // a1r5g5b5
    (0x1002_0555, "BGR15"), // x1r5g5b5
];

/// Resolve a pixman format code.
pub fn lookup(code: u32) -> Option<CanonicalFormat> {
    FORMAT_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| CanonicalFormat(name))
}

/// A DRM fourcc code, printed as its four little-endian characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl std::fmt::Display for Fourcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0.to_le_bytes() {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '?'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Linear layout; carries no information worth advertising.
pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
/// "No explicit modifier" marker.
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// Drop modifiers the consumer cannot be told about explicitly.
pub fn normalize_modifier(modifier: u64) -> Option<u64> {
    match modifier {
        DRM_FORMAT_MOD_LINEAR | DRM_FORMAT_MOD_INVALID => None,
        m => Some(m),
    }
}
