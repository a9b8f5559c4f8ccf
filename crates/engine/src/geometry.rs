//! Integer geometry between logical and physical window space.
//!
//! All scaling rounds half away from zero, the same way `MulDiv` does, so a
//! value mapped one way and back lands within one pixel of where it started.

use core::fmt::{self, Debug, Formatter};

/// Resize grip edge length in physical pixels.
pub const RESIZE_GRIP: i32 = 10;

/// `value * num / den` rounded half away from zero.
///
/// Returns `value` unchanged if `den` is zero.
pub fn mul_div(value: i32, num: i32, den: i32) -> i32 {
    if den == 0 {
        return value;
    }

    let prod = i64::from(value) * i64::from(num);
    let den = i64::from(den);

    let magnitude = (prod.abs() * 2 + den.abs()) / (den.abs() * 2);
    let res = if (prod < 0) != (den < 0) {
        -magnitude
    } else {
        magnitude
    };

    res.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    #[inline]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Whether both sides lie in `(0, max]`.
    #[inline]
    pub const fn fits_within(self, max: Size) -> bool {
        !self.is_empty() && self.width <= max.width && self.height <= max.height
    }
}

impl Debug for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Unpack signed 16 bit coordinates packed in a message `LPARAM`.
    #[inline]
    pub fn from_lparam(lparam: isize) -> Self {
        let [x, y] = bytemuck::cast::<u32, [i16; 2]>(lparam as u32);
        Self::new(x.into(), y.into())
    }

    /// Pack into message `LPARAM` form.
    #[inline]
    pub fn to_lparam(self) -> isize {
        bytemuck::cast::<[i16; 2], u32>([self.x as i16, self.y as i16]) as i32 as isize
    }
}

/// Window placement relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    #[inline]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Grow by `amount` on every side.
    #[inline]
    pub const fn inflate(self, amount: i32) -> Self {
        Self {
            x: self.x - amount,
            y: self.y - amount,
            width: self.width + amount * 2,
            height: self.height + amount * 2,
        }
    }
}

/// Ratio between a logical and a current size.
///
/// Derived on demand and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub logical: Size,
    pub current: Size,
}

impl Scale {
    #[inline]
    pub const fn new(logical: Size, current: Size) -> Self {
        Self { logical, current }
    }

    #[inline]
    pub fn factor(&self) -> (f32, f32) {
        if self.logical.is_empty() {
            return (1.0, 1.0);
        }

        (
            self.current.width as f32 / self.logical.width as f32,
            self.current.height as f32 / self.logical.height as f32,
        )
    }

    /// Physical point to logical space.
    #[inline]
    pub fn to_logical(&self, pt: Point) -> Point {
        Point::new(
            mul_div(pt.x, self.logical.width, self.current.width),
            mul_div(pt.y, self.logical.height, self.current.height),
        )
    }

    /// Logical point to physical space.
    #[inline]
    pub fn to_physical(&self, pt: Point) -> Point {
        Point::new(
            mul_div(pt.x, self.current.width, self.logical.width),
            mul_div(pt.y, self.current.height, self.logical.height),
        )
    }

    /// Logical rect to physical space, each field scaled independently.
    #[inline]
    pub fn rect_to_physical(&self, rect: Rect) -> Rect {
        let origin = self.to_physical(Point::new(rect.x, rect.y));
        let size = self.to_physical(Point::new(rect.width, rect.height));
        Rect::new(origin.x, origin.y, size.x, size.y)
    }
}

/// Size applied for an interactive resize to `requested_width`.
///
/// Width is clamped to `[logical / 2, logical]` and height follows from the
/// logical aspect ratio. An empty `logical` size is returned unchanged.
pub fn clamp_resize(logical: Size, requested_width: i32) -> Size {
    if logical.is_empty() {
        return logical;
    }

    let width = requested_width.clamp(logical.width / 2, logical.width);
    Size::new(width, mul_div(width, logical.height, logical.width))
}

/// Where a point on a managed window lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitZone {
    ResizeGrip,
    Caption,

    /// Client area, carrying the point in logical space.
    Client(Point),
}

/// Classify a physical client point.
///
/// The grip is measured in physical pixels, the caption band in logical ones.
pub fn hit_test(scale: &Scale, pt: Point, in_caption: impl FnOnce(Point) -> bool) -> HitZone {
    if pt.x > scale.current.width - RESIZE_GRIP && pt.y > scale.current.height - RESIZE_GRIP {
        return HitZone::ResizeGrip;
    }

    let logical = scale.to_logical(pt);
    if in_caption(logical) {
        HitZone::Caption
    } else {
        HitZone::Client(logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_rounds_half_away_from_zero() {
        assert_eq!(mul_div(1, 1, 2), 1);
        assert_eq!(mul_div(-1, 1, 2), -1);
        assert_eq!(mul_div(1, 1, 3), 0);
        assert_eq!(mul_div(2, 1, 3), 1);
        assert_eq!(mul_div(-2, 1, 3), -1);
        assert_eq!(mul_div(5, 3, -2), -8);
        assert_eq!(mul_div(7, 3, 0), 7);
        assert_eq!(mul_div(i32::MAX, 2, 1), i32::MAX);
    }

    #[test]
    fn lparam_packing() {
        let pt = Point::new(-5, 300);
        assert_eq!(Point::from_lparam(pt.to_lparam()), pt);
        assert_eq!(Point::from_lparam(0x0064_0032), Point::new(50, 100));
    }

    #[test]
    fn clamp_keeps_aspect_ratio() {
        let logical = Size::new(1024, 552);
        assert_eq!(clamp_resize(logical, 768), Size::new(768, 414));
        assert_eq!(clamp_resize(logical, 2000), logical);
        assert_eq!(clamp_resize(logical, 10), Size::new(512, 276));
    }

    #[test]
    fn clamp_empty_logical_size() {
        for logical in [Size::new(-4, 552), Size::new(0, 552), Size::new(1024, 0)] {
            assert_eq!(clamp_resize(logical, 768), logical);
            assert_eq!(clamp_resize(logical, -10), logical);
        }
    }

    #[test]
    fn clamp_grid() {
        for logical in [Size::new(1024, 552), Size::new(1645, 835), Size::new(153, 413)] {
            for requested in -10..logical.width * 2 {
                let applied = clamp_resize(logical, requested);
                assert!(applied.width >= logical.width / 2);
                assert!(applied.width <= logical.width);

                let exact = applied.width as f64 * logical.height as f64 / logical.width as f64;
                assert_eq!(applied.height, exact.round() as i32, "{logical:?} {requested}");
            }
        }
    }

    #[test]
    fn round_trip_within_one_pixel() {
        for logical in [Size::new(1024, 552), Size::new(100, 386)] {
            for width in logical.width / 2..=logical.width {
                let current = clamp_resize(logical, width);
                let scale = Scale::new(logical, current);

                for x in 0..current.width {
                    let pt = Point::new(x, x % current.height.max(1));
                    let back = scale.to_physical(scale.to_logical(pt));
                    assert!((back.x - pt.x).abs() <= 1, "{current:?} {pt:?} {back:?}");
                    assert!((back.y - pt.y).abs() <= 1, "{current:?} {pt:?} {back:?}");
                }

                for x in 0..logical.width {
                    let pt = Point::new(x, x % logical.height);
                    let back = scale.to_logical(scale.to_physical(pt));
                    assert!((back.x - pt.x).abs() <= 1, "{current:?} {pt:?} {back:?}");
                    assert!((back.y - pt.y).abs() <= 1, "{current:?} {pt:?} {back:?}");
                }
            }
        }
    }

    #[test]
    fn rect_scaling_and_correction() {
        let scale = Scale::new(Size::new(1024, 552), Size::new(512, 276));
        let rect = scale.rect_to_physical(Rect::new(100, 50, 101, 387));
        assert_eq!(rect, Rect::new(50, 25, 51, 194));
        assert_eq!(rect.inflate(1), Rect::new(49, 24, 53, 196));
    }

    #[test]
    fn hit_zones() {
        let scale = Scale::new(Size::new(1024, 552), Size::new(512, 276));
        let caption = |pt: Point| pt.x > 235 && pt.x < 750 && pt.y < 40;

        assert_eq!(
            hit_test(&scale, Point::new(511, 275), caption),
            HitZone::ResizeGrip
        );
        assert_eq!(
            hit_test(&scale, Point::new(503, 267), caption),
            HitZone::ResizeGrip
        );
        assert_eq!(
            hit_test(&scale, Point::new(502, 275), caption),
            HitZone::Client(Point::new(1004, 550))
        );
        assert_eq!(hit_test(&scale, Point::new(200, 10), caption), HitZone::Caption);
        assert_eq!(
            hit_test(&scale, Point::new(200, 20), caption),
            HitZone::Client(Point::new(400, 40))
        );
    }

    #[test]
    fn scale_factor() {
        let scale = Scale::new(Size::new(1024, 552), Size::new(768, 414));
        assert_eq!(scale.factor(), (0.75, 0.75));
        assert_eq!(Scale::new(Size::default(), Size::new(1, 1)).factor(), (1.0, 1.0));
    }
}
