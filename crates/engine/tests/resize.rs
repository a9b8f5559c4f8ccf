use std::{cell::RefCell, rc::Rc};

use reskin::{
    geometry::{Point, Rect, Size},
    renderer::{Compositor, Surfaces},
    window::{WindowId, kind::WindowKind, manager::RenderManager},
};

const MAIN: WindowId = 0x10;
const LOGICAL: Size = Size::new(1024, 552);

/// Records the size of every presented frame.
#[derive(Debug, Default, Clone)]
struct Frames(Rc<RefCell<Vec<(Size, (f32, f32))>>>);

struct FrameCompositor {
    frames: Frames,
}

struct FrameSurfaces {
    size: Size,
    factor: (f32, f32),
    frames: Frames,
}

impl Compositor for FrameCompositor {
    type Surfaces = FrameSurfaces;

    fn create_surfaces(&self, _: WindowId, _: Size, current: Size) -> anyhow::Result<FrameSurfaces> {
        Ok(FrameSurfaces {
            size: current,
            factor: (0.0, 0.0),
            frames: self.frames.clone(),
        })
    }
}

impl Surfaces for FrameSurfaces {
    fn scratch_dc(&self) -> Option<usize> {
        Some(1)
    }

    fn buffer_size(&self) -> Size {
        self.size
    }

    fn resize_buffers(&mut self, size: Size) -> anyhow::Result<()> {
        self.size = size;
        Ok(())
    }

    fn release_scratch(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_scaled(&mut self, factor: (f32, f32)) -> anyhow::Result<()> {
        self.factor = factor;
        Ok(())
    }

    fn present(&mut self) -> anyhow::Result<()> {
        self.frames.0.borrow_mut().push((self.size, self.factor));
        Ok(())
    }

    fn acquire_scratch(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn manager() -> (RenderManager<FrameCompositor>, Frames) {
    let frames = Frames::default();
    let mut manager = RenderManager::new(FrameCompositor {
        frames: frames.clone(),
    });

    let rect = manager
        .create(MAIN, WindowKind::Main, Rect::new(40, 30, 1024, 552), None)
        .unwrap();
    assert_eq!(rect, Rect::new(40, 30, 1024, 552));

    (manager, frames)
}

#[test]
fn resize_to_three_quarters() {
    let (mut manager, frames) = manager();

    let size = manager.sizing(MAIN, 768).unwrap();
    assert_eq!(size, Size::new(768, 414));

    assert!(manager.resize(MAIN, size).unwrap().is_empty());
    assert_eq!(manager.current_size(MAIN), Some(size));
    assert_eq!(manager.logical_size(MAIN), Some(LOGICAL));

    manager.render(MAIN).unwrap();
    assert_eq!(*frames.0.borrow(), [(Size::new(768, 414), (0.75, 0.75))]);

    assert_eq!(
        manager.to_logical(MAIN, Point::new(384, 207)),
        Some(Point::new(512, 276))
    );
    assert_eq!(
        manager.to_physical(MAIN, Point::new(512, 276)),
        Some(Point::new(384, 207))
    );
}

#[test]
fn sizing_stays_within_half_and_full_size() {
    let (manager, _) = manager();

    assert_eq!(manager.sizing(MAIN, 100), Some(Size::new(512, 276)));
    assert_eq!(manager.sizing(MAIN, 4000), Some(LOGICAL));
    assert_eq!(manager.sizing(0x99, 768), None);
}

#[test]
fn frames_follow_every_resize() {
    let (mut manager, frames) = manager();

    for width in [1024, 900, 768, 512] {
        let size = manager.sizing(MAIN, width).unwrap();
        manager.resize(MAIN, size).unwrap();
        manager.render(MAIN).unwrap();
    }

    let sizes: Vec<_> = frames.0.borrow().iter().map(|(size, _)| *size).collect();
    assert_eq!(
        sizes,
        [
            Size::new(1024, 552),
            Size::new(900, 485),
            Size::new(768, 414),
            Size::new(512, 276),
        ]
    );
}
