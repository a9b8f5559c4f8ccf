use nohash_hasher::IntMap;
use tracing::{debug, error, trace, warn};

use super::{WindowId, context::WindowRenderContext, kind::WindowKind};
use crate::{
    error::{EngineError, Result},
    geometry::{self, HitZone, Point, Rect, Scale, Size},
    renderer::Compositor,
};

/// New placement of a child window after the main window was resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLayout {
    pub window: WindowId,
    pub rect: Rect,
}

/// Owns every managed window's render context.
pub struct RenderManager<C: Compositor> {
    compositor: C,
    windows: IntMap<WindowId, WindowRenderContext<C::Surfaces>>,
    main: Option<WindowId>,
}

impl<C: Compositor> RenderManager<C> {
    pub fn new(compositor: C) -> Self {
        Self {
            compositor,
            windows: IntMap::default(),
            main: None,
        }
    }

    #[inline]
    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    #[inline]
    pub fn is_managed(&self, window: WindowId) -> bool {
        self.windows.contains_key(&window)
    }

    #[inline]
    pub fn main(&self) -> Option<WindowId> {
        self.main
    }

    #[inline]
    pub fn kind(&self, window: WindowId) -> Option<WindowKind> {
        self.windows.get(&window).map(WindowRenderContext::kind)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Scale of the main window, identity if there is none.
    pub fn main_scale(&self) -> Scale {
        self.main
            .and_then(|main| self.windows.get(&main))
            .map(WindowRenderContext::scale)
            .unwrap_or_else(|| Scale::new(Size::default(), Size::default()))
    }

    /// Physical placement of a child created at logical `placement`.
    pub fn child_rect(&self, kind: WindowKind, placement: Rect) -> Rect {
        let scale = self.main_scale();
        let rect = if scale.logical.is_empty() || scale.current.is_empty() {
            placement
        } else {
            scale.rect_to_physical(placement)
        };

        rect.inflate(kind.correction())
    }

    /// Start managing `window`.
    ///
    /// Main windows are allocated at `restored` if given, otherwise at their
    /// logical size. Children are laid out from the main window ratio.
    /// Returns the physical placement the window must be moved to.
    ///
    /// On failure the window is left unmanaged.
    #[tracing::instrument(skip(self))]
    pub fn create(
        &mut self,
        window: WindowId,
        kind: WindowKind,
        placement: Rect,
        restored: Option<Size>,
    ) -> Result<Rect> {
        if self.windows.contains_key(&window) {
            warn!("window {window:#x} is already managed");
            self.destroy(window);
        }

        let rect = if kind.is_child() {
            self.child_rect(kind, placement)
        } else {
            let size = restored
                .filter(|size| !size.is_empty())
                .unwrap_or(placement.size());
            Rect::new(placement.x, placement.y, size.width, size.height)
        };

        let surfaces = self
            .compositor
            .create_surfaces(window, placement.size(), rect.size())
            .map_err(|err| {
                error!("cannot create surfaces for {} window: {err:?}", kind.name());
                EngineError::ResourceAllocationFailure(format!("{err:#}"))
            })?;

        self.windows
            .insert(window, WindowRenderContext::new(kind, placement, surfaces));
        if !kind.is_child() {
            self.main = Some(window);
        }

        debug!("managing {} window {window:#x} at {rect:?}", kind.name());
        Ok(rect)
    }

    /// Stop managing `window`, releasing its graphics resources.
    ///
    /// Returns the last current size and the logical size.
    pub fn destroy(&mut self, window: WindowId) -> Option<(Size, Size)> {
        let context = self.windows.remove(&window)?;
        if self.main == Some(window) {
            self.main = None;
        }

        debug!("released {} window {window:#x}", context.kind().name());
        Some((context.current(), context.logical()))
    }

    /// Apply a new client size to `window`.
    ///
    /// When the main window changes size, every child is laid out again and
    /// its buffers resized. The returned layouts must be applied to the
    /// child windows in order.
    pub fn resize(&mut self, window: WindowId, size: Size) -> anyhow::Result<Vec<ChildLayout>> {
        let Some(context) = self.windows.get_mut(&window) else {
            trace!("resize of unmanaged window {window:#x}");
            return Ok(Vec::new());
        };

        let changed = context.resize(size)?;
        if !changed || self.main != Some(window) {
            return Ok(Vec::new());
        }

        Ok(self.layout_children())
    }

    /// Recompute every child placement from the main window ratio.
    pub fn layout_children(&mut self) -> Vec<ChildLayout> {
        let children: Vec<_> = self
            .windows
            .iter()
            .filter(|(_, context)| context.kind().is_child())
            .map(|(window, context)| (*window, context.kind(), context.placement()))
            .collect();

        let mut layouts = Vec::with_capacity(children.len());
        for (window, kind, placement) in children {
            let rect = self.child_rect(kind, placement);

            if let Some(context) = self.windows.get_mut(&window) {
                if let Err(err) = context.resize(rect.size()) {
                    error!("cannot resize {} window {window:#x}: {err:?}", kind.name());
                }
            }

            layouts.push(ChildLayout { window, rect });
        }

        layouts
    }

    /// Clamp an interactive resize of `window` to `requested_width`.
    pub fn sizing(&self, window: WindowId, requested_width: i32) -> Option<Size> {
        let context = self.windows.get(&window)?;
        Some(geometry::clamp_resize(context.logical(), requested_width))
    }

    /// Compose the current frame of `window`.
    ///
    /// Unmanaged windows are ignored.
    pub fn render(&mut self, window: WindowId) -> anyhow::Result<()> {
        match self.windows.get_mut(&window) {
            Some(context) => context.render(),
            None => Ok(()),
        }
    }

    pub fn scale(&self, window: WindowId) -> Option<Scale> {
        self.windows.get(&window).map(WindowRenderContext::scale)
    }

    #[inline]
    pub fn logical_size(&self, window: WindowId) -> Option<Size> {
        self.windows.get(&window).map(WindowRenderContext::logical)
    }

    #[inline]
    pub fn current_size(&self, window: WindowId) -> Option<Size> {
        self.windows.get(&window).map(WindowRenderContext::current)
    }

    /// Physical client point of `window` to logical space.
    pub fn to_logical(&self, window: WindowId, pt: Point) -> Option<Point> {
        Some(self.scale(window)?.to_logical(pt))
    }

    /// Logical client point of `window` to physical space.
    pub fn to_physical(&self, window: WindowId, pt: Point) -> Option<Point> {
        Some(self.scale(window)?.to_physical(pt))
    }

    pub fn hit_test(
        &self,
        window: WindowId,
        pt: Point,
        in_caption: impl FnOnce(Point) -> bool,
    ) -> Option<HitZone> {
        Some(geometry::hit_test(&self.scale(window)?, pt, in_caption))
    }

    /// Device context the host must draw `window` into.
    pub fn scratch_dc(&self, window: WindowId) -> Option<usize> {
        self.windows.get(&window)?.scratch_dc()
    }
}

impl<C: Compositor> core::fmt::Debug for RenderManager<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RenderManager")
            .field("windows", &self.windows)
            .field("main", &self.main)
            .finish_non_exhaustive()
    }
}
