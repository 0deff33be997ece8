//! World, view and projection matrices for the video quad.
//!
//! The quad spans [-1, 1] on both axes in world space. The orthographic box
//! is widened (or heightened) so that the quad keeps the source aspect ratio
//! inside the viewport, giving letterbox or pillarbox bars.

use cgmath::{Matrix4, Point3, SquareMatrix, Vector3};

/// cgmath builds OpenGL clip space (z in [-1, 1]); wgpu expects z in [0, 1].
#[rustfmt::skip]
const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Extent of the box when the image fills it on the pinned axis.
const BASE_EXTENT: f32 = 2.0;

const NEAR_PLANE: f32 = 0.0;
const FAR_PLANE: f32 = 2.0;

/// Half-open size of the orthographic box in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewExtent {
    pub width: f32,
    pub height: f32,
}

/// The three transforms uploaded to the shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub world: Matrix4<f32>,
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub extent: ViewExtent,
}

impl Projection {
    /// Size in viewport pixels that the quad covers.
    pub fn image_size(&self, viewport_width: u32, viewport_height: u32) -> (f32, f32) {
        (
            viewport_width as f32 * BASE_EXTENT / self.extent.width,
            viewport_height as f32 * BASE_EXTENT / self.extent.height,
        )
    }
}

fn camera() -> Matrix4<f32> {
    Matrix4::look_at_rh(
        Point3::new(0.0, 0.0, 1.0),
        Point3::new(0.0, 0.0, 0.0),
        Vector3::unit_y(),
    )
}

fn ortho(extent: ViewExtent) -> Matrix4<f32> {
    OPENGL_TO_WGPU_MATRIX
        * cgmath::ortho(
            -extent.width / 2.0,
            extent.width / 2.0,
            -extent.height / 2.0,
            extent.height / 2.0,
            NEAR_PLANE,
            FAR_PLANE,
        )
}

/// Computes the matrices that show a `source_width` x `source_height` image
/// undistorted in a `viewport_width` x `viewport_height` viewport.
///
/// When the viewport is proportionally wider than the source the height is
/// pinned and the width grows, otherwise the width is pinned. Zero sizes are
/// treated as one pixel.
pub fn recompute(
    viewport_width: u32,
    viewport_height: u32,
    source_width: u32,
    source_height: u32,
) -> Projection {
    let viewport_width = viewport_width.max(1) as f32;
    let viewport_height = viewport_height.max(1) as f32;
    let aspect = source_width.max(1) as f32 / source_height.max(1) as f32;

    let extent = if viewport_width / viewport_height > aspect {
        ViewExtent {
            width: viewport_width * BASE_EXTENT / (aspect * viewport_height),
            height: BASE_EXTENT,
        }
    } else {
        ViewExtent {
            width: BASE_EXTENT,
            height: viewport_height * BASE_EXTENT * aspect / viewport_width,
        }
    };

    Projection {
        world: Matrix4::identity(),
        view: camera(),
        projection: ortho(extent),
        extent,
    }
}

/// Matrices used before any frame size is known: the quad fills the viewport.
fn stretched() -> Projection {
    let extent = ViewExtent {
        width: BASE_EXTENT,
        height: BASE_EXTENT,
    };
    Projection {
        world: Matrix4::identity(),
        view: camera(),
        projection: ortho(extent),
        extent,
    }
}

/// Tracks viewport and source sizes and recomputes the matrices whenever
/// either changes.
#[derive(Debug)]
pub struct ProjectionController {
    viewport: (u32, u32),
    source: Option<(u32, u32)>,
    current: Projection,
    dirty: bool,
}

impl ProjectionController {
    pub fn new(viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            viewport: (viewport_width, viewport_height),
            source: None,
            current: stretched(),
            dirty: true,
        }
    }

    /// Records a new viewport size. Zero sizes (minimized windows) are
    /// ignored so the last good matrices stay in place.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("ProjectionController::set_viewport: ignoring {width}x{height}");
            return;
        }
        if self.viewport != (width, height) {
            self.viewport = (width, height);
            self.dirty = true;
        }
    }

    /// Records the size of the frame about to be drawn.
    pub fn set_source(&mut self, width: u32, height: u32) {
        if self.source != Some((width, height)) {
            self.source = Some((width, height));
            self.dirty = true;
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Whether the next `matrices()` call recomputes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns up-to-date matrices, recomputing if the viewport or source
    /// size changed since the last call.
    pub fn matrices(&mut self) -> &Projection {
        if self.dirty {
            let (vw, vh) = self.viewport;
            self.current = match self.source {
                Some((sw, sh)) => recompute(vw, vh, sw, sh),
                None => stretched(),
            };
            self.dirty = false;
            log::debug!(
                "ProjectionController::matrices: viewport {vw}x{vh}, source {:?}, extent {:?}",
                self.source,
                self.current.extent
            );
        }
        &self.current
    }
}
