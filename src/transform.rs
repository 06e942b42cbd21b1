//! Transform pipeline of a subplot.
//!
//! Positions flow through a fixed chain of nodes:
//!
//! ```text
//! DataSpace --Normalize--> NdcSpace --PanZoom--> ViewSpace --SubplotPlacement--> ClipSpace
//! ```
//!
//! Every node is an axis aligned affine map. The chain caches the composed
//! matrices and recomputes them only after a node parameter actually changed.
use std::cell::Cell;

use crate::{
    coordinates::{
        Aabb, ClipSpace, CoordinateSystem, CoordinateSystemTransformer, DataSpace, NdcSpace,
        Offset, Position, ViewSpace,
    },
    panzoom::PanZoom,
    wgsl::Mat3x3,
};

/// Minimal extent of the data bounds along each axis.
pub const MIN_EXTENT: f64 = 1e-6;

/// A 2D affine map, `p' = A p + t`, stored as the two top rows of a 3x3 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    rows: [[f64; 3]; 2],
}

impl AffineMatrix {
    pub const IDENTITY: Self = Self {
        rows: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    /// Map `p' = p * scale + translate`.
    pub fn scale_translate(scale: (f64, f64), translate: (f64, f64)) -> Self {
        Self {
            rows: [[scale.0, 0.0, translate.0], [0.0, scale.1, translate.1]],
        }
    }

    /// Returns the map applying `self` first and `next` afterwards.
    pub fn then(&self, next: &Self) -> Self {
        let a = &next.rows;
        let b = &self.rows;
        let mut rows = [[0.0; 3]; 2];
        for (r, row) in rows.iter_mut().enumerate() {
            row[0] = a[r][0] * b[0][0] + a[r][1] * b[1][0];
            row[1] = a[r][0] * b[0][1] + a[r][1] * b[1][1];
            row[2] = a[r][0] * b[0][2] + a[r][1] * b[1][2] + a[r][2];
        }
        Self { rows }
    }

    pub fn apply(&self, (x, y): (f64, f64)) -> (f64, f64) {
        let [a, b] = &self.rows;
        (
            a[0] * x + a[1] * y + a[2],
            b[0] * x + b[1] * y + b[2],
        )
    }

    /// Applies the linear part only.
    pub fn apply_vector(&self, (x, y): (f64, f64)) -> (f64, f64) {
        let [a, b] = &self.rows;
        (a[0] * x + a[1] * y, b[0] * x + b[1] * y)
    }

    pub fn inverse(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.rows;
        let det = a * d - b * c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        Some(Self {
            rows: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }

    /// Converts the map to a matrix acting on homogeneous coordinates.
    pub fn to_mat3(&self) -> Mat3x3 {
        let [a, b] = self.rows;
        Mat3x3::from_rows_array([
            [a[0] as f32, a[1] as f32, a[2] as f32],
            [b[0] as f32, b[1] as f32, b[2] as f32],
            [0.0, 0.0, 1.0],
        ])
    }
}

/// A node of the transform chain.
pub trait TransformNode {
    fn matrix(&self) -> AffineMatrix;

    fn inverse_matrix(&self) -> AffineMatrix;
}

fn map_position<T: CoordinateSystem, U: CoordinateSystem>(
    m: &AffineMatrix,
    p: Position<T>,
) -> Position<U> {
    Position::new(m.apply(p.extract()))
}

fn map_offset<T: CoordinateSystem, U: CoordinateSystem>(
    m: &AffineMatrix,
    o: Offset<T>,
) -> Offset<U> {
    Offset::new(m.apply_vector(o.extract()))
}

macro_rules! node_transformer {
    ($node:ty, $from:ty, $to:ty) => {
        impl CoordinateSystemTransformer<$from, $to> for $node {
            fn transform_position(&self, position: Position<$from>) -> Position<$to> {
                map_position(&self.matrix(), position)
            }

            fn transform_offset(&self, offset: Offset<$from>) -> Offset<$to> {
                map_offset(&self.matrix(), offset)
            }
        }

        impl CoordinateSystemTransformer<$to, $from> for $node {
            fn transform_position(&self, position: Position<$to>) -> Position<$from> {
                map_position(&self.inverse_matrix(), position)
            }

            fn transform_offset(&self, offset: Offset<$to>) -> Offset<$from> {
                map_offset(&self.inverse_matrix(), offset)
            }
        }
    };
}

/// Maps the data bounds to `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    bounds: Aabb<DataSpace>,
}

impl Normalize {
    pub fn new(bounds: Aabb<DataSpace>) -> Self {
        Self {
            bounds: Self::sanitize(bounds),
        }
    }

    /// Bounds after the minimal extent was enforced.
    pub fn bounds(&self) -> Aabb<DataSpace> {
        self.bounds
    }

    fn sanitize(bounds: Aabb<DataSpace>) -> Aabb<DataSpace> {
        let (x0, y0) = bounds.start().extract();
        let (x1, y1) = bounds.end().extract();
        if ![x0, y0, x1, y1].iter().all(|v| v.is_finite()) {
            return Aabb::unit();
        }

        // The epsilon grows with the magnitude so that it stays representable.
        let center = bounds.center();
        let magnitude = center.x.abs().max(center.y.abs());
        bounds.with_min_extent(MIN_EXTENT.max(magnitude * 1e-12))
    }
}

impl TransformNode for Normalize {
    fn matrix(&self) -> AffineMatrix {
        let start = self.bounds.start();
        let size = self.bounds.size();
        let (sx, sy) = (2.0 / size.x, 2.0 / size.y);
        AffineMatrix::scale_translate((sx, sy), (-1.0 - start.x * sx, -1.0 - start.y * sy))
    }

    fn inverse_matrix(&self) -> AffineMatrix {
        let start = self.bounds.start();
        let size = self.bounds.size();
        let (sx, sy) = (size.x / 2.0, size.y / 2.0);
        AffineMatrix::scale_translate((sx, sy), (start.x + sx, start.y + sy))
    }
}

node_transformer!(Normalize, DataSpace, NdcSpace);
node_transformer!(PanZoom, NdcSpace, ViewSpace);

/// Places the view of a subplot into a rectangle of the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubplotPlacement {
    rect: Aabb<ClipSpace>,
}

impl SubplotPlacement {
    /// Placement covering the whole canvas.
    pub fn full() -> Self {
        Self { rect: Aabb::unit() }
    }

    pub fn new(rect: Aabb<ClipSpace>) -> Self {
        assert!(
            !rect.is_degenerate(),
            "subplot rectangle must not be degenerate, got {rect:?}"
        );
        Self { rect }
    }

    /// Placement of the cell `(row, col)` of a `rows x cols` grid, with
    /// `margin` clip units of spacing on every side of the cell.
    pub fn grid(shape: (usize, usize), index: (usize, usize), margin: f64) -> Self {
        let (rows, cols) = shape;
        let (row, col) = index;
        assert!(
            row < rows && col < cols,
            "cell {index:?} is outside of the grid {shape:?}"
        );

        let width = 2.0 / cols as f64;
        let height = 2.0 / rows as f64;
        let margin = margin.clamp(0.0, width.min(height) / 4.0);
        let x0 = -1.0 + col as f64 * width + margin;
        let y1 = 1.0 - row as f64 * height - margin;
        Self::new(Aabb::new(
            Position::new((x0, y1 - height + 2.0 * margin)),
            Position::new((x0 + width - 2.0 * margin, y1)),
        ))
    }

    pub fn rect(&self) -> Aabb<ClipSpace> {
        self.rect
    }
}

impl TransformNode for SubplotPlacement {
    fn matrix(&self) -> AffineMatrix {
        let center = self.rect.center();
        let size = self.rect.size();
        AffineMatrix::scale_translate((size.x / 2.0, size.y / 2.0), (center.x, center.y))
    }

    fn inverse_matrix(&self) -> AffineMatrix {
        let center = self.rect.center();
        let size = self.rect.size();
        let (sx, sy) = (2.0 / size.x, 2.0 / size.y);
        AffineMatrix::scale_translate((sx, sy), (-center.x * sx, -center.y * sy))
    }
}

node_transformer!(SubplotPlacement, ViewSpace, ClipSpace);

#[derive(Debug, Clone, Copy)]
struct ComposedTransform {
    forward: AffineMatrix,
    inverse: AffineMatrix,
}

/// Chain of transform nodes shared by all visuals of a subplot.
#[derive(Debug)]
pub struct TransformChain {
    normalize: Normalize,
    panzoom: PanZoom,
    placement: SubplotPlacement,
    cache: Cell<Option<ComposedTransform>>,
    version: u64,
    recomputations: Cell<u64>,
}

impl TransformChain {
    pub fn new(bounds: Aabb<DataSpace>, placement: SubplotPlacement) -> Self {
        Self {
            normalize: Normalize::new(bounds),
            panzoom: PanZoom::new(),
            placement,
            cache: Cell::new(None),
            version: 0,
            recomputations: Cell::new(0),
        }
    }

    pub fn with_panzoom(mut self, panzoom: PanZoom) -> Self {
        self.panzoom = panzoom;
        self
    }

    pub fn normalize(&self) -> &Normalize {
        &self.normalize
    }

    pub fn panzoom(&self) -> &PanZoom {
        &self.panzoom
    }

    pub fn placement(&self) -> &SubplotPlacement {
        &self.placement
    }

    /// Counter incremented by every effective parameter change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of times the composed matrices were recomputed.
    pub fn recomputations(&self) -> u64 {
        self.recomputations.get()
    }

    fn invalidate(&mut self) {
        self.cache.set(None);
        self.version += 1;
    }

    /// Sets the data bounds, returning whether the transform changed.
    pub fn set_data_bounds(&mut self, bounds: Aabb<DataSpace>) -> bool {
        let normalize = Normalize::new(bounds);
        if normalize == self.normalize {
            return false;
        }

        self.normalize = normalize;
        self.invalidate();
        true
    }

    pub fn set_placement(&mut self, placement: SubplotPlacement) -> bool {
        if placement == self.placement {
            return false;
        }

        self.placement = placement;
        self.invalidate();
        true
    }

    /// Mutates the pan and zoom state, returning whether the transform changed.
    pub fn update_panzoom(&mut self, f: impl FnOnce(&mut PanZoom)) -> bool {
        let mut panzoom = self.panzoom;
        f(&mut panzoom);
        if panzoom == self.panzoom {
            return false;
        }

        self.panzoom = panzoom;
        self.invalidate();
        true
    }

    fn composed(&self) -> ComposedTransform {
        if let Some(composed) = self.cache.get() {
            return composed;
        }

        let forward = self
            .normalize
            .matrix()
            .then(&self.panzoom.matrix())
            .then(&self.placement.matrix());
        let inverse = self
            .placement
            .inverse_matrix()
            .then(&self.panzoom.inverse_matrix())
            .then(&self.normalize.inverse_matrix());
        let composed = ComposedTransform { forward, inverse };

        self.cache.set(Some(composed));
        self.recomputations.set(self.recomputations.get() + 1);
        composed
    }

    pub fn forward_matrix(&self) -> AffineMatrix {
        self.composed().forward
    }

    pub fn inverse_matrix(&self) -> AffineMatrix {
        self.composed().inverse
    }

    pub fn forward(&self, p: Position<DataSpace>) -> Position<ClipSpace> {
        map_position(&self.composed().forward, p)
    }

    pub fn inverse(&self, p: Position<ClipSpace>) -> Position<DataSpace> {
        map_position(&self.composed().inverse, p)
    }

    /// Clip position relative to the subplot, before pan and zoom are undone.
    pub fn clip_to_view(&self, p: Position<ClipSpace>) -> Position<ViewSpace> {
        p.transform(&self.placement)
    }

    /// Clip offset relative to the subplot.
    pub fn clip_offset_to_view(&self, o: Offset<ClipSpace>) -> Offset<ViewSpace> {
        o.transform(&self.placement)
    }

    /// Checks whether the clip position lies inside the subplot rectangle.
    pub fn contains(&self, p: Position<ClipSpace>) -> bool {
        self.placement.rect().contains_point(&p)
    }
}

impl CoordinateSystemTransformer<DataSpace, ClipSpace> for TransformChain {
    fn transform_position(&self, position: Position<DataSpace>) -> Position<ClipSpace> {
        self.forward(position)
    }

    fn transform_offset(&self, offset: Offset<DataSpace>) -> Offset<ClipSpace> {
        map_offset(&self.composed().forward, offset)
    }
}

impl CoordinateSystemTransformer<ClipSpace, DataSpace> for TransformChain {
    fn transform_position(&self, position: Position<ClipSpace>) -> Position<DataSpace> {
        self.inverse(position)
    }

    fn transform_offset(&self, offset: Offset<ClipSpace>) -> Offset<DataSpace> {
        map_offset(&self.composed().inverse, offset)
    }
}
