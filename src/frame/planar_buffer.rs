//! Planar YUV 4:2:0 frame storage.
//!
//! A `PlanarFrameBuffer` holds one video frame as three separate planes:
//! Y at full resolution, U and V at half width and half height. Buffers are
//! owned by the [`FrameExchange`](super::exchange::FrameExchange) and written
//! in place by the decoder, so the planes are tightly packed (stride equals
//! plane width).

use std::fmt;

use super::exchange::{ExchangeError, ExchangeResult};

/// Pixel layouts a buffer can hold.
///
/// Only I420 exists today. The format is fixed per buffer pair and travels
/// with the frame size so the renderer never has to guess it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit planar Y, U, V with 2x2 chroma subsampling.
    #[default]
    I420,
}

/// One of the three planes of an I420 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    Y,
    U,
    V,
}

impl Plane {
    pub const ALL: [Plane; 3] = [Plane::Y, Plane::U, Plane::V];

    /// Position of the plane in Y, U, V order. Also the sampler slot the
    /// shader reads the plane from.
    pub fn index(self) -> usize {
        match self {
            Plane::Y => 0,
            Plane::U => 1,
            Plane::V => 2,
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Plane::Y => "Y",
            Plane::U => "U",
            Plane::V => "V",
        };
        f.write_str(name)
    }
}

/// Validated frame dimensions.
///
/// Width and height are positive and even so both chroma planes are exactly
/// half the luma size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl FrameSize {
    /// Validates decoder-reported dimensions.
    ///
    /// Decoders report sizes as signed integers, so negative values are
    /// accepted here and rejected with `ConfigurationError`.
    pub fn new(width: i32, height: i32) -> ExchangeResult<Self> {
        if width <= 0 || height <= 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(ExchangeError::ConfigurationError { width, height });
        }

        Ok(Self {
            width: width as u32,
            height: height as u32,
            format: PixelFormat::I420,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Width and height of the given plane in samples.
    pub fn plane_extent(&self, plane: Plane) -> (u32, u32) {
        match plane {
            Plane::Y => (self.width, self.height),
            Plane::U | Plane::V => (self.width / 2, self.height / 2),
        }
    }

    /// Number of bytes the given plane occupies.
    pub fn plane_len(&self, plane: Plane) -> usize {
        let (w, h) = self.plane_extent(plane);
        w as usize * h as usize
    }
}

/// A single I420 frame.
///
/// Freshly allocated buffers are black: Y = 0 and both chroma planes at the
/// neutral value 128.
pub struct PlanarFrameBuffer {
    size: FrameSize,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl fmt::Debug for PlanarFrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanarFrameBuffer")
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .finish()
    }
}

impl PlanarFrameBuffer {
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            y: vec![0u8; size.plane_len(Plane::Y)],
            u: vec![128u8; size.plane_len(Plane::U)],
            v: vec![128u8; size.plane_len(Plane::V)],
        }
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn y(&self) -> &[u8] {
        &self.y
    }

    pub fn u(&self) -> &[u8] {
        &self.u
    }

    pub fn v(&self) -> &[u8] {
        &self.v
    }

    pub fn plane(&self, plane: Plane) -> &[u8] {
        match plane {
            Plane::Y => &self.y,
            Plane::U => &self.u,
            Plane::V => &self.v,
        }
    }

    pub fn plane_mut(&mut self, plane: Plane) -> &mut [u8] {
        match plane {
            Plane::Y => &mut self.y,
            Plane::U => &mut self.u,
            Plane::V => &mut self.v,
        }
    }

    /// Mutable access to all three planes at once, for decoders that write
    /// Y, U and V in a single pass.
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        (&mut self.y, &mut self.u, &mut self.v)
    }

    /// Copies decoder-owned plane data into this buffer.
    ///
    /// Each slice must be exactly the size of the matching plane. Nothing is
    /// written unless all three match.
    pub fn write_planes(&mut self, y: &[u8], u: &[u8], v: &[u8]) -> ExchangeResult {
        for (plane, data) in [(Plane::Y, y), (Plane::U, u), (Plane::V, v)] {
            let expected = self.size.plane_len(plane);
            if data.len() != expected {
                return Err(ExchangeError::PlaneSizeMismatch {
                    plane,
                    expected,
                    actual: data.len(),
                });
            }
        }

        self.y.copy_from_slice(y);
        self.u.copy_from_slice(u);
        self.v.copy_from_slice(v);
        Ok(())
    }
}

/// Color bars used by the synthetic producer: white, then 75% yellow, cyan,
/// green, magenta, red, blue, then black. Saturated colors at 100% would
/// push V outside the 8-bit range of the full-range matrix.
pub(crate) const BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (191, 191, 0),
    (0, 191, 191),
    (0, 191, 0),
    (191, 0, 191),
    (191, 0, 0),
    (0, 0, 191),
    (0, 0, 0),
];

/// Full-range RGB to YUV, the inverse of the renderer's color matrix.
pub(crate) fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 0.492 * (b - y) + 128.0;
    let v = 0.877 * (r - y) + 128.0;
    (
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}

/// Fills `buf` with vertical color bars shifted by `frame_num`, so a running
/// producer shows visible motion without any real decoder attached.
pub fn fill_color_bars(buf: &mut PlanarFrameBuffer, frame_num: u64) {
    let width = buf.width();
    let height = buf.height();
    let bar_width = (width / 8).max(1);
    let shift = frame_num as usize;

    let bar_at = |col: u32| BARS[((col / bar_width) as usize + shift) % BARS.len()];

    let (y_plane, u_plane, v_plane) = buf.planes_mut();

    for row in 0..height {
        let line = &mut y_plane[(row * width) as usize..((row + 1) * width) as usize];
        for (col, sample) in line.iter_mut().enumerate() {
            let (r, g, b) = bar_at(col as u32);
            *sample = rgb_to_yuv(r, g, b).0;
        }
    }

    let chroma_width = width / 2;
    for row in 0..height / 2 {
        let start = (row * chroma_width) as usize;
        for col in 0..chroma_width {
            let (r, g, b) = bar_at(col * 2);
            let (_, u, v) = rgb_to_yuv(r, g, b);
            u_plane[start + col as usize] = u;
            v_plane[start + col as usize] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_validation() {
        assert!(FrameSize::new(1920, 1080).is_ok());
        assert!(FrameSize::new(2, 2).is_ok());

        for (w, h) in [(-1, 10), (0, 10), (10, 0), (3, 4), (4, 3), (-2, -2)] {
            match FrameSize::new(w, h) {
                Err(ExchangeError::ConfigurationError { width, height }) => {
                    assert_eq!((width, height), (w, h));
                }
                other => panic!("expected ConfigurationError for {w}x{h}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_plane_sizes() {
        let size = FrameSize::new(640, 480).unwrap();
        let buf = PlanarFrameBuffer::new(size);

        assert_eq!(buf.y().len(), 640 * 480);
        assert_eq!(buf.u().len(), 320 * 240);
        assert_eq!(buf.v().len(), 320 * 240);
        assert_eq!(size.plane_extent(Plane::U), (320, 240));
        assert_eq!(size.format(), PixelFormat::I420);
    }

    #[test]
    fn test_new_buffer_is_black() {
        let buf = PlanarFrameBuffer::new(FrameSize::new(4, 2).unwrap());
        assert!(buf.y().iter().all(|&b| b == 0));
        assert!(buf.u().iter().all(|&b| b == 128));
        assert!(buf.v().iter().all(|&b| b == 128));
    }

    #[test]
    fn test_write_planes() {
        let mut buf = PlanarFrameBuffer::new(FrameSize::new(4, 2).unwrap());
        let y: Vec<u8> = (1..=8).collect();
        buf.write_planes(&y, &[9, 10], &[11, 12]).unwrap();

        assert_eq!(buf.y(), &y[..]);
        assert_eq!(buf.plane(Plane::U), &[9, 10]);
        assert_eq!(buf.plane(Plane::V), &[11, 12]);
    }

    #[test]
    fn test_write_planes_rejects_wrong_sizes() {
        let mut buf = PlanarFrameBuffer::new(FrameSize::new(4, 2).unwrap());
        let result = buf.write_planes(&[1; 8], &[2; 3], &[3; 2]);

        match result {
            Err(ExchangeError::PlaneSizeMismatch {
                plane,
                expected,
                actual,
            }) => {
                assert_eq!(plane, Plane::U);
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("expected PlaneSizeMismatch, got {other:?}"),
        }

        // Nothing was written
        assert!(buf.y().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_color_bars_shift_with_frame_number() {
        let size = FrameSize::new(16, 2).unwrap();
        let mut first = PlanarFrameBuffer::new(size);
        let mut second = PlanarFrameBuffer::new(size);
        fill_color_bars(&mut first, 0);
        fill_color_bars(&mut second, 1);

        // White bar first, then the pattern moves one bar over
        assert_eq!(first.y()[0], 255);
        assert_eq!(second.y()[0], first.y()[2]);
        assert_ne!(first.y(), second.y());

        // Neutral chroma for white, black is the last bar
        assert_eq!(first.u()[0], 128);
        assert_eq!(first.v()[0], 128);
        assert_eq!(first.y()[15], 0);
    }
}
