use tracing::{debug, trace};

use super::kind::WindowKind;
use crate::{
    geometry::{Rect, Scale, Size},
    renderer::Surfaces,
};

/// Rendering state of one managed window.
///
/// Logical placement is fixed at creation. Current size always equals the
/// size of the presentation buffers held by the surfaces.
pub struct WindowRenderContext<S> {
    kind: WindowKind,
    placement: Rect,
    current: Size,
    surfaces: S,
}

impl<S: Surfaces> WindowRenderContext<S> {
    pub fn new(kind: WindowKind, placement: Rect, surfaces: S) -> Self {
        let current = surfaces.buffer_size();
        Self {
            kind,
            placement,
            current,
            surfaces,
        }
    }

    #[inline]
    pub const fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Position and size the host created the window with.
    #[inline]
    pub const fn placement(&self) -> Rect {
        self.placement
    }

    #[inline]
    pub const fn logical(&self) -> Size {
        self.placement.size()
    }

    #[inline]
    pub const fn current(&self) -> Size {
        self.current
    }

    #[inline]
    pub const fn scale(&self) -> Scale {
        Scale::new(self.placement.size(), self.current)
    }

    #[inline]
    pub fn scratch_dc(&self) -> Option<usize> {
        self.surfaces.scratch_dc()
    }

    /// Reallocate presentation buffers at `size`.
    ///
    /// Returns whether the current size changed. Empty sizes, as reported
    /// for minimized windows, are ignored.
    pub fn resize(&mut self, size: Size) -> anyhow::Result<bool> {
        if size.is_empty() {
            trace!("ignoring empty size {size:?}");
            return Ok(false);
        }

        if size == self.current {
            return Ok(false);
        }

        let res = self.surfaces.resize_buffers(size);
        let previous = self.current;
        self.current = self.surfaces.buffer_size();
        res?;

        debug!("{} window resized {previous:?} -> {:?}", self.kind.name(), self.current);
        Ok(previous != self.current)
    }

    /// Compose the off-screen surface onto the window.
    ///
    /// A fresh scratch device context is acquired even if composing failed.
    pub fn render(&mut self) -> anyhow::Result<()> {
        assert_eq!(
            self.surfaces.buffer_size(),
            self.current,
            "presentation buffers out of sync with window size"
        );

        self.surfaces.release_scratch()?;

        let factor = self.scale().factor();
        let res = self
            .surfaces
            .draw_scaled(factor)
            .and_then(|_| self.surfaces.present());

        let acquired = self.surfaces.acquire_scratch();
        res.and(acquired)
    }
}

impl<S> core::fmt::Debug for WindowRenderContext<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WindowRenderContext")
            .field("kind", &self.kind)
            .field("placement", &self.placement)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
