//! Graphics backend the render contexts draw through.

#[cfg(windows)]
pub mod d2d;

use crate::{geometry::Size, window::WindowId};

/// Creates per-window surfaces.
pub trait Compositor {
    type Surfaces: Surfaces;

    /// Allocate the off-screen drawing surface at `logical` size and the
    /// presentation buffers at `current` size for `window`.
    fn create_surfaces(
        &self,
        window: WindowId,
        logical: Size,
        current: Size,
    ) -> anyhow::Result<Self::Surfaces>;
}

/// Graphics resources owned by one window.
///
/// Dropping releases every resource.
pub trait Surfaces {
    /// Device context backed by the off-screen surface, if currently acquired.
    fn scratch_dc(&self) -> Option<usize>;

    /// Size the presentation buffers were allocated at.
    fn buffer_size(&self) -> Size;

    /// Reallocate presentation buffers. The off-screen surface is untouched.
    ///
    /// [`Surfaces::buffer_size`] must reflect the buffers actually held
    /// afterwards, even on failure.
    fn resize_buffers(&mut self, size: Size) -> anyhow::Result<()>;

    /// Flush pending drawing and release the scratch device context.
    fn release_scratch(&mut self) -> anyhow::Result<()>;

    /// Draw the off-screen surface into the presentation buffer, scaled by `factor`.
    fn draw_scaled(&mut self, factor: (f32, f32)) -> anyhow::Result<()>;

    fn present(&mut self) -> anyhow::Result<()>;

    /// Acquire a fresh scratch device context for the next frame.
    fn acquire_scratch(&mut self) -> anyhow::Result<()>;
}
