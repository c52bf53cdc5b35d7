//! Frame storage for one console.
//!
//! A VM hands over pixels in one of three ways: inline bytes carried by the
//! notification itself, a shared-memory fd it keeps writing into, or a dmabuf
//! fd with an explicit plane layout. [`FrameBuffer`] wraps exactly one of
//! those and knows how to describe it and hand it to a consumer without
//! copying.

use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use crate::error::{FrameError, UpdateError};
use crate::format::{self, CanonicalFormat, Fourcc};

/// Container format advertised for dmabuf frames; the real layout travels in
/// the plane format.
pub const DMABUF_CONTAINER_FORMAT: &str = "DMA_DRM";

/// A rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Convert a signed wire rectangle, rejecting negative components.
    pub fn from_wire(x: i32, y: i32, width: i32, height: i32) -> Result<Self, UpdateError> {
        match (
            u32::try_from(x),
            u32::try_from(y),
            u32::try_from(width),
            u32::try_from(height),
        ) {
            (Ok(x), Ok(y), Ok(width), Ok(height)) => Ok(Self { x, y, width, height }),
            _ => Err(UpdateError::NegativeRect { x, y, width, height }),
        }
    }
}

/// One plane of a dmabuf: where it starts and how long its rows are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub offset: u32,
    pub stride: u32,
}

/// Where the pixels of a frame live.
#[derive(Debug)]
pub(crate) enum Backing {
    /// Bytes owned by the client, patched in place on update.
    Inline {
        data: Vec<u8>,
        stride: u32,
        /// `stride / width`; assumes a uniform pixel size.
        bpp: u32,
        format: CanonicalFormat,
    },
    /// Shared memory the VM writes into directly.
    SharedMemory {
        fd: OwnedFd,
        stride: u32,
        size: u64,
        format: CanonicalFormat,
    },
    /// A dmabuf the VM renders into directly.
    ShareableBuffer {
        fd: OwnedFd,
        fourcc: Fourcc,
        modifier: Option<u64>,
        planes: Vec<Plane>,
        size: u64,
        flipped: bool,
    },
}

/// Pixel layout of a dmabuf frame as announced to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneFormat {
    pub fourcc: Fourcc,
    pub modifier: Option<u64>,
}

impl fmt::Display for PlaneFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifier {
            Some(modifier) => write!(f, "{}:0x{:x}", self.fourcc, modifier),
            None => write!(f, "{}", self.fourcc),
        }
    }
}

/// Everything a consumer needs to interpret a published buffer.
///
/// `Display` renders the descriptor string handed to the presentation sink,
/// e.g. `format=BGRx,width=1024,height=768`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescription {
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub plane_format: Option<PlaneFormat>,
    pub planes: Vec<Plane>,
}

impl fmt::Display for FrameDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "format={},width={},height={}", self.format, self.width, self.height)?;
        if let Some(plane_format) = &self.plane_format {
            write!(f, ",plane-format={}", plane_format)?;
        }
        Ok(())
    }
}

/// A zero-copy view of a frame's storage.
///
/// Descriptors are borrowed: whoever wraps them must not close them.
#[derive(Debug, Clone, Copy)]
pub enum Consumable<'a> {
    Bytes(&'a [u8]),
    SharedMemory { fd: BorrowedFd<'a>, size: u64 },
    DmaBuf { fd: BorrowedFd<'a>, size: u64 },
}

impl Consumable<'_> {
    pub fn size(&self) -> u64 {
        match self {
            Consumable::Bytes(bytes) => bytes.len() as u64,
            Consumable::SharedMemory { size, .. } | Consumable::DmaBuf { size, .. } => *size,
        }
    }
}

#[derive(Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    backing: Backing,
}

fn check_dimensions(width: u32, height: u32) -> Result<(), FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroDimension { width, height });
    }
    Ok(())
}

fn resolve_format(code: u32) -> Result<CanonicalFormat, FrameError> {
    format::lookup(code).ok_or(FrameError::UnknownFormat(code))
}

impl FrameBuffer {
    /// Frame carried inline by a `Scanout` notification.
    pub fn inline(
        width: u32,
        height: u32,
        stride: u32,
        format_code: u32,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        check_dimensions(width, height)?;
        let format = resolve_format(format_code)?;

        let needed = u64::from(stride) * u64::from(height);
        if (data.len() as u64) < needed {
            return Err(FrameError::ShortPayload {
                needed,
                got: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            backing: Backing::Inline {
                data,
                stride,
                bpp: stride / width,
                format,
            },
        })
    }

    /// Frame living in a shared-memory region owned by the VM.
    pub fn shared_memory(
        fd: OwnedFd,
        offset: u32,
        width: u32,
        height: u32,
        stride: u32,
        format_code: u32,
    ) -> Result<Self, FrameError> {
        if offset != 0 {
            return Err(FrameError::NonZeroOffset(offset));
        }
        check_dimensions(width, height)?;
        let format = resolve_format(format_code)?;

        Ok(Self {
            width,
            height,
            backing: Backing::SharedMemory {
                fd,
                stride,
                size: u64::from(stride) * u64::from(height),
                format,
            },
        })
    }

    /// Frame living in a dmabuf with one or more planes.
    #[allow(clippy::too_many_arguments)]
    pub fn shareable_buffer(
        fd: OwnedFd,
        width: u32,
        height: u32,
        offsets: &[u32],
        strides: &[u32],
        fourcc: u32,
        modifier: u64,
        flipped: bool,
    ) -> Result<Self, FrameError> {
        check_dimensions(width, height)?;

        if offsets.is_empty() || offsets.len() != strides.len() {
            return Err(FrameError::PlaneMismatch {
                planes: offsets.len(),
                offsets: offsets.len(),
                strides: strides.len(),
            });
        }
        if offsets.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(FrameError::UnsortedOffsets(offsets.to_vec()));
        }

        let planes: Vec<Plane> = offsets
            .iter()
            .zip(strides)
            .map(|(&offset, &stride)| Plane { offset, stride })
            .collect();

        let size = planes
            .last()
            .map(|last| u64::from(last.offset) + u64::from(last.stride) * u64::from(height))
            .unwrap_or_default();

        Ok(Self {
            width,
            height,
            backing: Backing::ShareableBuffer {
                fd,
                fourcc: Fourcc(fourcc),
                modifier: format::normalize_modifier(modifier),
                planes,
                size,
                flipped,
            },
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Rows are stored bottom-to-top. Only dmabuf frames carry this flag.
    pub fn flipped(&self) -> bool {
        match &self.backing {
            Backing::ShareableBuffer { flipped, .. } => *flipped,
            Backing::Inline { .. } | Backing::SharedMemory { .. } => false,
        }
    }

    /// Bytes of storage the consumer may read.
    pub fn size(&self) -> u64 {
        match &self.backing {
            Backing::Inline { data, .. } => data.len() as u64,
            Backing::SharedMemory { size, .. } | Backing::ShareableBuffer { size, .. } => *size,
        }
    }

    pub fn describe(&self) -> FrameDescription {
        match &self.backing {
            Backing::Inline { stride, format, .. } | Backing::SharedMemory { stride, format, .. } => {
                FrameDescription {
                    format: format.name(),
                    width: self.width,
                    height: self.height,
                    plane_format: None,
                    planes: vec![Plane {
                        offset: 0,
                        stride: *stride,
                    }],
                }
            }
            Backing::ShareableBuffer {
                fourcc,
                modifier,
                planes,
                ..
            } => FrameDescription {
                format: DMABUF_CONTAINER_FORMAT,
                width: self.width,
                height: self.height,
                plane_format: Some(PlaneFormat {
                    fourcc: *fourcc,
                    modifier: *modifier,
                }),
                planes: planes.clone(),
            },
        }
    }

    pub fn consumable(&self) -> Consumable<'_> {
        match &self.backing {
            Backing::Inline { data, .. } => Consumable::Bytes(data),
            Backing::SharedMemory { fd, size, .. } => Consumable::SharedMemory {
                fd: fd.as_fd(),
                size: *size,
            },
            Backing::ShareableBuffer { fd, size, .. } => Consumable::DmaBuf {
                fd: fd.as_fd(),
                size: *size,
            },
        }
    }

    fn check_rect(&self, rect: Rect) -> Result<(), UpdateError> {
        let fits_x = u64::from(rect.x) + u64::from(rect.width) <= u64::from(self.width);
        let fits_y = u64::from(rect.y) + u64::from(rect.height) <= u64::from(self.height);
        if fits_x && fits_y {
            Ok(())
        } else {
            Err(UpdateError::OutOfBounds {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                frame_width: self.width,
                frame_height: self.height,
            })
        }
    }

    /// Apply a dirty rectangle.
    ///
    /// Inline frames copy `rect.height` rows of `stride` bytes from `payload`.
    /// Fd-backed frames were already written by the VM, so only the
    /// rectangle is validated and the payload is ignored.
    ///
    /// Nothing is written unless the whole update fits.
    pub fn apply_update(
        &mut self,
        rect: Rect,
        stride: u32,
        payload: &[u8],
    ) -> Result<(), UpdateError> {
        self.check_rect(rect)?;

        let Backing::Inline {
            data,
            stride: row_stride,
            bpp,
            ..
        } = &mut self.backing
        else {
            return Ok(());
        };

        if rect.height == 0 || stride == 0 {
            return Ok(());
        }

        let src_stride = u64::from(stride);
        let needed = src_stride * u64::from(rect.height);
        if (payload.len() as u64) < needed {
            return Err(UpdateError::ShortPayload {
                needed,
                got: payload.len(),
            });
        }

        let (row_stride, bpp) = (u64::from(*row_stride), u64::from(*bpp));
        let row_start =
            |row: u32| row_stride * u64::from(rect.y + row) + u64::from(rect.x) * bpp;

        // rows only move forward, so the last one bounds the whole write
        let end = row_start(rect.height - 1) + src_stride;
        if end > data.len() as u64 {
            return Err(UpdateError::Overrun {
                end,
                len: data.len(),
            });
        }

        let len = stride as usize;
        for row in 0..rect.height {
            let dst = row_start(row) as usize;
            let src = row as usize * len;
            data[dst..dst + len].copy_from_slice(&payload[src..src + len]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BGRX: u32 = 0x2002_0888;
    const XR24: u32 = 0x3432_5258;

    fn null_fd() -> OwnedFd {
        std::fs::File::open("/dev/null").unwrap().into()
    }

    /// 4 bytes per pixel, each byte distinct so misplaced copies show up.
    fn reference_image(width: u32, height: u32) -> Vec<u8> {
        (0..width * height * 4).map(|i| (i % 251) as u8).collect()
    }

    fn extract(image: &[u8], image_stride: u32, rect: Rect) -> Vec<u8> {
        let mut out = Vec::new();
        for row in rect.y..rect.y + rect.height {
            let start = (row * image_stride + rect.x * 4) as usize;
            out.extend_from_slice(&image[start..start + (rect.width * 4) as usize]);
        }
        out
    }

    #[test]
    fn test_inline_describe_and_zero_copy() {
        let data = reference_image(8, 4);
        let ptr = data.as_ptr();
        let frame = FrameBuffer::inline(8, 4, 32, BGRX, data).unwrap();

        let desc = frame.describe();
        assert_eq!((desc.width, desc.height), (8, 4));
        assert_eq!(desc.to_string(), "format=BGRx,width=8,height=4");

        match frame.consumable() {
            Consumable::Bytes(bytes) => {
                assert_eq!(bytes.as_ptr(), ptr);
                assert_eq!(bytes, reference_image(8, 4).as_slice());
            }
            other => panic!("expected inline bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_tiled_updates_rebuild_reference() {
        let (width, height, stride) = (6, 4, 24);
        let reference = reference_image(width, height);
        let mut frame =
            FrameBuffer::inline(width, height, stride, BGRX, vec![0; reference.len()]).unwrap();

        let tiles = [
            Rect::new(0, 0, 4, 2),
            Rect::new(4, 0, 2, 2),
            Rect::new(0, 2, 3, 2),
            Rect::new(3, 2, 3, 2),
        ];
        for tile in tiles {
            let payload = extract(&reference, stride, tile);
            frame.apply_update(tile, tile.width * 4, &payload).unwrap();
        }

        match frame.consumable() {
            Consumable::Bytes(bytes) => assert_eq!(bytes, reference.as_slice()),
            other => panic!("expected inline bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_full_frame_update_matches_fresh_frame() {
        let reference = reference_image(4, 3);
        let mut updated = FrameBuffer::inline(4, 3, 16, BGRX, vec![0xaa; 48]).unwrap();
        updated
            .apply_update(Rect::new(0, 0, 4, 3), 16, &reference)
            .unwrap();
        let fresh = FrameBuffer::inline(4, 3, 16, BGRX, reference).unwrap();

        match (updated.consumable(), fresh.consumable()) {
            (Consumable::Bytes(a), Consumable::Bytes(b)) => assert_eq!(a, b),
            other => panic!("expected inline bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_bounds_update_leaves_frame_untouched() {
        let mut frame = FrameBuffer::inline(4, 4, 16, BGRX, vec![0; 64]).unwrap();
        let err = frame
            .apply_update(Rect::new(3, 3, 2, 1), 8, &[0xff; 8])
            .unwrap_err();
        assert!(matches!(err, UpdateError::OutOfBounds { .. }));

        let err = frame
            .apply_update(Rect::new(0, 0, 2, 2), 8, &[0xff; 8])
            .unwrap_err();
        assert_eq!(err, UpdateError::ShortPayload { needed: 16, got: 8 });

        match frame.consumable() {
            Consumable::Bytes(bytes) => assert!(bytes.iter().all(|&b| b == 0)),
            other => panic!("expected inline bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_rejects_bad_input() {
        assert!(matches!(
            FrameBuffer::inline(0, 4, 0, BGRX, vec![]),
            Err(FrameError::ZeroDimension { .. })
        ));
        assert!(matches!(
            FrameBuffer::inline(2, 2, 8, 0x1234, vec![0; 16]),
            Err(FrameError::UnknownFormat(0x1234))
        ));
        assert!(matches!(
            FrameBuffer::inline(2, 2, 8, BGRX, vec![0; 15]),
            Err(FrameError::ShortPayload { needed: 16, got: 15 })
        ));
    }

    #[test]
    fn test_shared_memory_rejects_offset() {
        let err = FrameBuffer::shared_memory(null_fd(), 4096, 640, 480, 2560, BGRX).unwrap_err();
        assert!(matches!(err, FrameError::NonZeroOffset(4096)));
    }

    #[test]
    fn test_shared_memory_update_is_noop() {
        let mut frame = FrameBuffer::shared_memory(null_fd(), 0, 640, 480, 2560, BGRX).unwrap();
        assert_eq!(frame.size(), 2560 * 480);
        frame.apply_update(Rect::new(10, 10, 20, 20), 0, &[]).unwrap();
        assert_eq!(
            frame.describe().to_string(),
            "format=BGRx,width=640,height=480"
        );
        assert!(matches!(
            frame.consumable(),
            Consumable::SharedMemory { size, .. } if size == 2560 * 480
        ));
    }

    #[test]
    fn test_shareable_buffer_rejects_unsorted_offsets() {
        let err = FrameBuffer::shareable_buffer(
            null_fd(),
            16,
            10,
            &[64, 0],
            &[64, 32],
            XR24,
            0,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::UnsortedOffsets(_)));
    }

    #[test]
    fn test_shareable_buffer_size_from_last_plane() {
        let frame = FrameBuffer::shareable_buffer(
            null_fd(),
            16,
            10,
            &[0, 64],
            &[64, 32],
            XR24,
            0,
            true,
        )
        .unwrap();
        assert_eq!(frame.size(), 384);
        assert!(frame.flipped());

        let desc = frame.describe();
        assert_eq!(desc.planes.len(), 2);
        assert_eq!(desc.to_string(), "format=DMA_DRM,width=16,height=10,plane-format=XR24");
    }

    #[test]
    fn test_shareable_buffer_modifier_in_descriptor() {
        let frame = FrameBuffer::shareable_buffer(
            null_fd(),
            1920,
            1080,
            &[0],
            &[7680],
            XR24,
            0x0100_0000_0000_0002,
            false,
        )
        .unwrap();
        assert_eq!(
            frame.describe().to_string(),
            "format=DMA_DRM,width=1920,height=1080,plane-format=XR24:0x100000000000002"
        );
    }

    #[test]
    fn test_shareable_buffer_plane_mismatch() {
        let err = FrameBuffer::shareable_buffer(null_fd(), 4, 4, &[0, 16], &[16], XR24, 0, false)
            .unwrap_err();
        assert!(matches!(err, FrameError::PlaneMismatch { .. }));
    }

    #[test]
    fn test_rect_from_wire() {
        assert_eq!(Rect::from_wire(1, 2, 3, 4), Ok(Rect::new(1, 2, 3, 4)));
        assert!(matches!(
            Rect::from_wire(-1, 0, 4, 4),
            Err(UpdateError::NegativeRect { x: -1, .. })
        ));
    }
}
