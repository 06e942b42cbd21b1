use std::{
    fmt::Debug,
    marker::PhantomData,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use crate::lerp::Lerp;

pub trait CoordinateSystemTransformer<T: CoordinateSystem, U: CoordinateSystem> {
    /// Applies a coordinate system transform to a position.
    fn transform_position(&self, position: Position<T>) -> Position<U>;

    /// Applies a coordinate system transform to an offset.
    fn transform_offset(&self, offset: Offset<T>) -> Offset<U>;
}

/// Definition of a coordinate system.
pub trait CoordinateSystem: Debug + Clone + Copy + PartialEq + Default {}

/// Raw coordinates of the data, as provided by the visuals.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DataSpace;

impl CoordinateSystem for DataSpace {}

/// Data coordinates normalized to `[-1, 1]` by the data bounds.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NdcSpace;

impl CoordinateSystem for NdcSpace {}

/// Normalized coordinates after panning and zooming.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ViewSpace;

impl CoordinateSystem for ViewSpace {}

/// Normalized coordinates of the whole canvas, after subplot placement.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ClipSpace;

impl CoordinateSystem for ClipSpace {}

/// Pixel coordinates of the canvas with the origin at the top left corner.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ScreenSpace;

impl CoordinateSystem for ScreenSpace {}

/// A position in a coordinate system.
#[derive(Clone, Copy, PartialEq)]
pub struct Position<T: CoordinateSystem> {
    pub x: f64,
    pub y: f64,
    _space: PhantomData<T>,
}

impl<T: CoordinateSystem> Position<T> {
    /// Constructs a new position.
    pub fn new((x, y): (f64, f64)) -> Self {
        Self {
            x,
            y,
            _space: PhantomData,
        }
    }

    /// Constructs the zero position.
    pub const fn zero() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            _space: PhantomData,
        }
    }

    /// Extracts the value representation of the position.
    pub fn extract(self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn to_f32(self) -> [f32; 2] {
        [self.x as f32, self.y as f32]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Applies a coordinate system transform to the position.
    pub fn transform<U: CoordinateSystem>(
        self,
        transformer: &impl CoordinateSystemTransformer<T, U>,
    ) -> Position<U> {
        transformer.transform_position(self)
    }

    /// Reinterprets the position in another coordinate system.
    pub(crate) fn cast<U: CoordinateSystem>(self) -> Position<U> {
        Position::new((self.x, self.y))
    }
}

impl<T: CoordinateSystem> Debug for Position<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Position")
            .field("space", &T::default())
            .field("x", &self.x)
            .field("y", &self.y)
            .finish()
    }
}

impl<T: CoordinateSystem> Lerp for Position<T> {
    fn lerp(self, other: Self, t: f64) -> Self {
        Self::new((self.x.lerp(other.x, t), self.y.lerp(other.y, t)))
    }
}

impl<T: CoordinateSystem> Sub for Position<T> {
    type Output = Offset<T>;

    fn sub(self, rhs: Self) -> Self::Output {
        Offset::new((self.x - rhs.x, self.y - rhs.y))
    }
}

impl<T: CoordinateSystem> Add<Offset<T>> for Position<T> {
    type Output = Self;

    fn add(self, rhs: Offset<T>) -> Self::Output {
        Self::new((self.x + rhs.x, self.y + rhs.y))
    }
}

impl<T: CoordinateSystem> AddAssign<Offset<T>> for Position<T> {
    fn add_assign(&mut self, rhs: Offset<T>) {
        *self = *self + rhs;
    }
}

impl<T: CoordinateSystem> Sub<Offset<T>> for Position<T> {
    type Output = Self;

    fn sub(self, rhs: Offset<T>) -> Self::Output {
        Self::new((self.x - rhs.x, self.y - rhs.y))
    }
}

impl<T: CoordinateSystem> SubAssign<Offset<T>> for Position<T> {
    fn sub_assign(&mut self, rhs: Offset<T>) {
        *self = *self - rhs;
    }
}

/// An offset in a coordinate system.
#[derive(Clone, Copy, PartialEq)]
pub struct Offset<T: CoordinateSystem> {
    pub x: f64,
    pub y: f64,
    _space: PhantomData<T>,
}

impl<T: CoordinateSystem> Offset<T> {
    /// Constructs a new offset.
    pub fn new((x, y): (f64, f64)) -> Self {
        Self {
            x,
            y,
            _space: PhantomData,
        }
    }

    pub const fn zero() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            _space: PhantomData,
        }
    }

    /// Extracts the value representation of the offset.
    pub fn extract(self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Applies a coordinate system transform to the offset.
    pub fn transform<U: CoordinateSystem>(
        self,
        transformer: &impl CoordinateSystemTransformer<T, U>,
    ) -> Offset<U> {
        transformer.transform_offset(self)
    }

    /// Reinterprets the offset in another coordinate system.
    pub(crate) fn cast<U: CoordinateSystem>(self) -> Offset<U> {
        Offset::new((self.x, self.y))
    }
}

impl<T: CoordinateSystem> Debug for Offset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offset")
            .field("space", &T::default())
            .field("x", &self.x)
            .field("y", &self.y)
            .finish()
    }
}

impl<T: CoordinateSystem> Add for Offset<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new((self.x + rhs.x, self.y + rhs.y))
    }
}

impl<T: CoordinateSystem> Sub for Offset<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new((self.x - rhs.x, self.y - rhs.y))
    }
}

impl<T: CoordinateSystem> Mul<f64> for Offset<T> {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self::new((self.x * rhs, self.y * rhs))
    }
}

impl<T: CoordinateSystem> Neg for Offset<T> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new((-self.x, -self.y))
    }
}

/// An axis aligned bounding box.
#[derive(Clone, Copy, PartialEq)]
pub struct Aabb<T: CoordinateSystem> {
    start: Position<T>,
    end: Position<T>,
}

impl<T: CoordinateSystem> Aabb<T> {
    /// Constructs a new bounding box spanning the two corners.
    pub fn new(start: Position<T>, end: Position<T>) -> Self {
        Self {
            start: Position::new((start.x.min(end.x), start.y.min(end.y))),
            end: Position::new((start.x.max(end.x), start.y.max(end.y))),
        }
    }

    /// Bounding box of the square `[-1, 1] x [-1, 1]`.
    pub fn unit() -> Self {
        Self::new(Position::new((-1.0, -1.0)), Position::new((1.0, 1.0)))
    }

    /// Smallest bounding box containing all finite points, if any.
    pub fn from_points(points: impl IntoIterator<Item = Position<T>>) -> Option<Self> {
        points
            .into_iter()
            .filter(|p| p.is_finite())
            .fold(None, |acc: Option<Self>, p| match acc {
                Some(aabb) => Some(aabb.extend(p)),
                None => Some(Self::new(p, p)),
            })
    }

    pub fn start(&self) -> Position<T> {
        self.start
    }

    pub fn end(&self) -> Position<T> {
        self.end
    }

    /// Returns the size of the bounding box.
    pub fn size(&self) -> Offset<T> {
        self.end - self.start
    }

    pub fn center(&self) -> Position<T> {
        self.start.lerp(self.end, 0.5)
    }

    /// Checks whether the bounding box has zero extent along any axis.
    pub fn is_degenerate(&self) -> bool {
        let size = self.size();
        size.x == 0.0 || size.y == 0.0
    }

    /// Checks whether a point lies inside the bounding box.
    pub fn contains_point(&self, p: &Position<T>) -> bool {
        (self.start.x..=self.end.x).contains(&p.x) && (self.start.y..=self.end.y).contains(&p.y)
    }

    /// Grows the bounding box to include the point.
    pub fn extend(&self, p: Position<T>) -> Self {
        Self {
            start: Position::new((self.start.x.min(p.x), self.start.y.min(p.y))),
            end: Position::new((self.end.x.max(p.x), self.end.y.max(p.y))),
        }
    }

    pub fn union(&self, rhs: &Self) -> Self {
        self.extend(rhs.start).extend(rhs.end)
    }

    /// Expands every axis narrower than `min_extent` to `min_extent`,
    /// centered on the original box.
    pub fn with_min_extent(&self, min_extent: f64) -> Self {
        let center = self.center();
        let size = self.size();
        let half_x = size.x.max(min_extent) / 2.0;
        let half_y = size.y.max(min_extent) / 2.0;
        Self {
            start: Position::new((center.x - half_x, center.y - half_y)),
            end: Position::new((center.x + half_x, center.y + half_y)),
        }
    }

    /// Applies a coordinate system transform to the bounding box.
    pub fn transform<U: CoordinateSystem>(
        &self,
        transformer: &impl CoordinateSystemTransformer<T, U>,
    ) -> Aabb<U> {
        Aabb::new(
            self.start.transform(transformer),
            self.end.transform(transformer),
        )
    }
}

impl<T: CoordinateSystem> Debug for Aabb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aabb")
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

/// Transformer between pixel and clip coordinates of a canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenClipTransformer {
    width: f64,
    height: f64,
}

impl ScreenClipTransformer {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }
}

impl CoordinateSystemTransformer<ScreenSpace, ClipSpace> for ScreenClipTransformer {
    fn transform_position(&self, position: Position<ScreenSpace>) -> Position<ClipSpace> {
        Position::new((
            2.0 * position.x / self.width - 1.0,
            1.0 - 2.0 * position.y / self.height,
        ))
    }

    fn transform_offset(&self, offset: Offset<ScreenSpace>) -> Offset<ClipSpace> {
        Offset::new((
            2.0 * offset.x / self.width,
            -2.0 * offset.y / self.height,
        ))
    }
}

impl CoordinateSystemTransformer<ClipSpace, ScreenSpace> for ScreenClipTransformer {
    fn transform_position(&self, position: Position<ClipSpace>) -> Position<ScreenSpace> {
        Position::new((
            (position.x + 1.0) / 2.0 * self.width,
            (1.0 - position.y) / 2.0 * self.height,
        ))
    }

    fn transform_offset(&self, offset: Offset<ClipSpace>) -> Offset<ScreenSpace> {
        Offset::new((
            offset.x / 2.0 * self.width,
            -offset.y / 2.0 * self.height,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_normalizes_corners() {
        let aabb = Aabb::<DataSpace>::new(Position::new((3.0, -1.0)), Position::new((1.0, 2.0)));
        assert_eq!(aabb.start().extract(), (1.0, -1.0));
        assert_eq!(aabb.end().extract(), (3.0, 2.0));
        assert!(aabb.contains_point(&Position::new((2.0, 0.0))));
        assert!(!aabb.contains_point(&Position::new((0.0, 0.0))));
    }

    #[test]
    fn from_points_skips_non_finite_values() {
        let points = [
            Position::<DataSpace>::new((f64::NAN, 0.0)),
            Position::new((1.0, 1.0)),
            Position::new((-1.0, 4.0)),
        ];
        let aabb = Aabb::from_points(points).unwrap();
        assert_eq!(aabb.start().extract(), (-1.0, 1.0));
        assert_eq!(aabb.end().extract(), (1.0, 4.0));
        assert!(Aabb::<DataSpace>::from_points([]).is_none());
    }

    #[test]
    fn min_extent_keeps_the_center() {
        let p = Position::<DataSpace>::new((5.0, 2.0));
        let aabb = Aabb::new(p, p);
        assert!(aabb.is_degenerate());

        let expanded = aabb.with_min_extent(1e-6);
        assert!(!expanded.is_degenerate());
        assert_eq!(expanded.center().extract(), (5.0, 2.0));
    }

    #[test]
    fn screen_clip_round_trip() {
        let transformer = ScreenClipTransformer::new(800.0, 600.0);
        let screen = Position::<ScreenSpace>::new((200.0, 150.0));
        let clip: Position<ClipSpace> = screen.transform(&transformer);
        assert_eq!(clip.extract(), (-0.5, 0.5));

        let back: Position<ScreenSpace> = clip.transform(&transformer);
        assert_eq!(back, screen);
    }
}
