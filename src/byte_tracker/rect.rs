use nalgebra::Matrix1x4;
use num_traits::Float;
use std::fmt::Debug;

/* ------------------------------------------------------------------------------
 * Type aliases
 * ------------------------------------------------------------------------------ */
pub type Xyah<T> = Matrix1x4<T>;

/* ------------------------------------------------------------------------------
 * Rect struct
 * ------------------------------------------------------------------------------ */

/// Axis-aligned rectangle stored as top-left + width + height.
///
/// The tlbr view is derived on demand, so both representations always
/// describe the same rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Rect<T>
where
    T: Debug + Float,
{
    tlwh: Matrix1x4<T>,
}

impl<T> Rect<T>
where
    T: Debug + Float,
{
    pub fn new(x: T, y: T, width: T, height: T) -> Self {
        let tlwh = Matrix1x4::new(x, y, width, height);
        Self { tlwh }
    }

    /// Build from top-left / bottom-right corners.
    pub fn from_tlbr(x1: T, y1: T, x2: T, y2: T) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Build from center, aspect ratio (w/h) and height.
    pub fn from_xyah(cx: T, cy: T, aspect: T, height: T) -> Self {
        let two = T::from(2).unwrap();
        let width = if aspect <= T::zero() {
            T::zero()
        } else {
            aspect * height
        };
        Self::new(cx - width / two, cy - height / two, width, height)
    }

    #[inline(always)]
    pub fn x(&self) -> T {
        self.tlwh[(0, 0)]
    }

    #[inline(always)]
    pub fn y(&self) -> T {
        self.tlwh[(0, 1)]
    }

    #[inline(always)]
    pub fn width(&self) -> T {
        self.tlwh[(0, 2)]
    }

    #[inline(always)]
    pub fn height(&self) -> T {
        self.tlwh[(0, 3)]
    }

    #[inline(always)]
    pub fn set_x(&mut self, x: T) {
        self.tlwh[(0, 0)] = x;
    }

    #[inline(always)]
    pub fn set_y(&mut self, y: T) {
        self.tlwh[(0, 1)] = y;
    }

    #[inline(always)]
    pub fn set_width(&mut self, width: T) {
        self.tlwh[(0, 2)] = width;
    }

    #[inline(always)]
    pub fn set_height(&mut self, height: T) {
        self.tlwh[(0, 3)] = height;
    }

    /// Rectangle as [x1, y1, x2, y2].
    pub fn get_tlbr(&self) -> [T; 4] {
        [
            self.x(),
            self.y(),
            self.x() + self.width(),
            self.y() + self.height(),
        ]
    }

    /// Rectangle as (center x, center y, aspect ratio, height), the
    /// measurement layout of the constant-velocity Kalman filter.
    pub fn get_xyah(&self) -> Xyah<T> {
        let two = T::from(2).unwrap();
        Matrix1x4::new(
            self.x() + self.width() / two,
            self.y() + self.height() / two,
            self.width() / self.height(),
            self.height(),
        )
    }

    pub fn area(&self) -> T {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= T::zero() || self.height() <= T::zero()
    }

    /// Intersection rectangle; empty (possibly negative-sized) when the
    /// rectangles do not overlap.
    pub fn intersect(&self, other: &Rect<T>) -> Rect<T> {
        let x1 = self.x().max(other.x());
        let y1 = self.y().max(other.y());
        let x2 = (self.x() + self.width()).min(other.x() + other.width());
        let y2 = (self.y() + self.height()).min(other.y() + other.height());
        Rect::from_tlbr(x1, y1, x2, y2)
    }

    /// Intersection over union:
    /// `max(0, min(x2,x2')-max(x1,x1')) * max(0, min(y2,y2')-max(y1,y1'))
    ///  / (areaA + areaB - inter)`.
    pub fn calc_iou(&self, other: &Rect<T>) -> T {
        let iw = (self.x() + self.width())
            .min(other.x() + other.width())
            - self.x().max(other.x());
        if iw <= T::zero() {
            return T::zero();
        }
        let ih = (self.y() + self.height())
            .min(other.y() + other.height())
            - self.y().max(other.y());
        if ih <= T::zero() {
            return T::zero();
        }

        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= T::zero() {
            return T::zero();
        }
        inter / union
    }
}
