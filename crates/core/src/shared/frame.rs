use std::collections::TryReserveError;
use std::fmt;
use std::sync::Arc;

use image::GrayImage;
use thiserror::Error;

/// Bytes per pixel of every frame flowing through a stage.
pub const FRAME_CHANNELS: usize = 3;

/// Negotiated width and height of the frames a stage accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Raised when working buffers for a negotiated geometry cannot be set up.
#[derive(Error, Debug)]
pub enum NegotiateError {
    #[error("invalid frame geometry {geometry}")]
    InvalidGeometry { geometry: FrameGeometry },
    #[error("failed to reserve working memory for {geometry}: {source}")]
    Allocation {
        geometry: FrameGeometry,
        #[source]
        source: TryReserveError,
    },
}

/// A single video/image frame: contiguous RGB bytes in row-major order.
///
/// Pixel storage is shared between clones. Anything that draws onto a frame
/// goes through [`Frame::make_writable`], which clones the storage first if
/// another handle still references it, so downstream consumers holding the
/// same frame never observe the mutation.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * FRAME_CHANNELS,
            "data length must equal width * height * 3"
        );
        Self {
            data: Arc::new(data),
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height)
    }

    /// True while another handle still references the same pixel storage.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Exclusive access to the pixels, cloning the storage if it is shared.
    pub fn make_writable(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Consumes the frame, avoiding a copy when the storage is unshared.
    pub fn into_data(self) -> Vec<u8> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// Single-channel working copy of the current frame, owned by the stage.
///
/// The plane is sized during geometry negotiation and reused across frames;
/// conversion itself never allocates.
#[derive(Debug)]
pub struct GrayFrame {
    image: GrayImage,
}

impl GrayFrame {
    pub fn new() -> Self {
        Self {
            image: GrayImage::new(0, 0),
        }
    }

    /// Replaces the plane with one matching `geometry`.
    pub fn negotiate(&mut self, geometry: FrameGeometry) -> Result<(), NegotiateError> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(NegotiateError::InvalidGeometry { geometry });
        }
        let len = geometry.pixel_count();
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|source| NegotiateError::Allocation { geometry, source })?;
        data.resize(len, 0);
        self.image = GrayImage::from_raw(geometry.width, geometry.height, data)
            .ok_or(NegotiateError::InvalidGeometry { geometry })?;
        Ok(())
    }

    /// Fills the plane from an RGB frame of the same geometry.
    pub fn convert_from(&mut self, frame: &Frame) {
        debug_assert_eq!(
            self.geometry(),
            frame.geometry(),
            "gray plane must be negotiated to the frame geometry"
        );
        let src = frame.data();
        let dst: &mut [u8] = &mut self.image;
        for (gray, rgb) in dst.iter_mut().zip(src.chunks_exact(FRAME_CHANNELS)) {
            *gray = luminance(rgb[0], rgb[1], rgb[2]);
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.image.width(), self.image.height())
    }

    pub fn data(&self) -> &[u8] {
        &self.image
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }
}

impl Default for GrayFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Rec. 601 luma in 14-bit fixed point, the conversion OpenCV applies for
/// RGB-to-gray.
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((4899 * r as u32 + 9617 * g as u32 + 1868 * b as u32 + 8192) >> 14) as u8
}
