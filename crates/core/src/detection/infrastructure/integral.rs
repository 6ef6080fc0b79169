//! Summed-area tables backing the cascade scan.
//!
//! Both tables use the (height+1) x (width+1) layout with a zero first row
//! and column, so any window sum is four lookups. They are allocated once
//! per negotiated geometry and refilled every frame.

use image::GrayImage;
use ndarray::Array2;

use crate::shared::frame::{FrameGeometry, GrayFrame, NegotiateError};

/// Pixel-sum and squared-pixel-sum tables over the grayscale plane.
///
/// The squared sums feed the per-window variance normalization.
#[derive(Debug)]
pub struct IntegralImage {
    sums: Array2<u64>,
    squares: Array2<u64>,
    width: usize,
    height: usize,
}

impl IntegralImage {
    pub fn with_geometry(geometry: FrameGeometry) -> Result<Self, NegotiateError> {
        let width = geometry.width as usize;
        let height = geometry.height as usize;
        Ok(Self {
            sums: alloc_plane(height + 1, width + 1, geometry)?,
            squares: alloc_plane(height + 1, width + 1, geometry)?,
            width,
            height,
        })
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width as u32, self.height as u32)
    }

    /// Recomputes both tables from the current frame's grayscale plane.
    pub fn fill(&mut self, gray: &GrayFrame) {
        debug_assert_eq!(
            self.geometry(),
            gray.geometry(),
            "integral tables must match the negotiated geometry"
        );
        let data = gray.data();
        for x in 0..=self.width {
            self.sums[[0, x]] = 0;
            self.squares[[0, x]] = 0;
        }
        for y in 1..=self.height {
            self.sums[[y, 0]] = 0;
            self.squares[[y, 0]] = 0;
            let row = &data[(y - 1) * self.width..y * self.width];
            let mut run_sum = 0u64;
            let mut run_square = 0u64;
            for (x, &pixel) in row.iter().enumerate() {
                let value = pixel as u64;
                run_sum += value;
                run_square += value * value;
                self.sums[[y, x + 1]] = self.sums[[y - 1, x + 1]] + run_sum;
                self.squares[[y, x + 1]] = self.squares[[y - 1, x + 1]] + run_square;
            }
        }
    }

    /// Sum of pixels in the half-open window [x0, x1) x [y0, y1).
    pub fn window_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        corner_sum(&self.sums, x0, y0, x1.min(self.width), y1.min(self.height))
    }

    /// Sum of squared pixels in the half-open window [x0, x1) x [y0, y1).
    pub fn window_square_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        corner_sum(
            &self.squares,
            x0,
            y0,
            x1.min(self.width),
            y1.min(self.height),
        )
    }
}

/// Edge-pixel counts over the frame's canny map, for window pruning.
#[derive(Debug)]
pub struct EdgeIntegral {
    counts: Array2<u32>,
    width: usize,
    height: usize,
}

impl EdgeIntegral {
    pub fn with_geometry(geometry: FrameGeometry) -> Result<Self, NegotiateError> {
        let width = geometry.width as usize;
        let height = geometry.height as usize;
        Ok(Self {
            counts: alloc_plane(height + 1, width + 1, geometry)?,
            width,
            height,
        })
    }

    /// Recounts edge pixels (any non-zero canny output) for this frame.
    pub fn fill(&mut self, edges: &GrayImage) {
        debug_assert_eq!(edges.width() as usize, self.width);
        debug_assert_eq!(edges.height() as usize, self.height);
        let data: &[u8] = edges;
        for x in 0..=self.width {
            self.counts[[0, x]] = 0;
        }
        for y in 1..=self.height {
            self.counts[[y, 0]] = 0;
            let row = &data[(y - 1) * self.width..y * self.width];
            let mut run = 0u32;
            for (x, &pixel) in row.iter().enumerate() {
                run += (pixel > 0) as u32;
                self.counts[[y, x + 1]] = self.counts[[y - 1, x + 1]] + run;
            }
        }
    }

    /// Edge pixels inside the half-open window [x0, x1) x [y0, y1).
    pub fn window_count(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u32 {
        corner_sum(
            &self.counts,
            x0,
            y0,
            x1.min(self.width),
            y1.min(self.height),
        )
    }
}

fn corner_sum<T>(table: &Array2<T>, x0: usize, y0: usize, x1: usize, y1: usize) -> T
where
    T: Copy + std::ops::Add<Output = T> + std::ops::Sub<Output = T>,
{
    // Grouped so unsigned intermediates never go negative.
    (table[[y1, x1]] + table[[y0, x0]]) - (table[[y0, x1]] + table[[y1, x0]])
}

fn alloc_plane<T: Clone + Default>(
    rows: usize,
    cols: usize,
    geometry: FrameGeometry,
) -> Result<Array2<T>, NegotiateError> {
    let len = rows
        .checked_mul(cols)
        .ok_or(NegotiateError::InvalidGeometry { geometry })?;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|source| NegotiateError::Allocation { geometry, source })?;
    data.resize(len, T::default());
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|_| NegotiateError::InvalidGeometry { geometry })
}
