//! Pan and zoom state of a subplot.
//!
//! The node maps normalized data coordinates `p` to `(p + pan) * zoom`.
use crate::{
    action::Key,
    coordinates::{Aabb, NdcSpace, Offset, Position, ViewSpace},
    transform::{AffineMatrix, TransformNode},
};

pub const DEFAULT_ZOOM_MIN: f64 = 1e-5;
pub const DEFAULT_ZOOM_MAX: f64 = 1e5;

const ZOOM_COEFF: f64 = 1.5;
const WHEEL_COEFF: f64 = 0.1;
const KEY_ZOOM_STEP: f64 = 0.05;
const KEY_PAN_STEP: f64 = 0.1;

/// Optional limits of the visible normalized range.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PanZoomConstraints {
    pub xmin: Option<f64>,
    pub xmax: Option<f64>,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
}

impl PanZoomConstraints {
    /// Keeps the view inside the normalized unit square.
    pub fn unit() -> Self {
        Self {
            xmin: Some(-1.0),
            xmax: Some(1.0),
            ymin: Some(-1.0),
            ymax: Some(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanZoom {
    pan: [f64; 2],
    zoom: [f64; 2],
    default_pan: [f64; 2],
    default_zoom: [f64; 2],
    zmin: f64,
    zmax: f64,
    aspect: Option<f64>,
    canvas_aspect: [f64; 2],
    constraints: PanZoomConstraints,
    zoom_to_pointer: bool,
}

impl Default for PanZoom {
    fn default() -> Self {
        Self::new()
    }
}

impl PanZoom {
    pub fn new() -> Self {
        Self {
            pan: [0.0; 2],
            zoom: [1.0; 2],
            default_pan: [0.0; 2],
            default_zoom: [1.0; 2],
            zmin: DEFAULT_ZOOM_MIN,
            zmax: DEFAULT_ZOOM_MAX,
            aspect: None,
            canvas_aspect: [1.0; 2],
            constraints: PanZoomConstraints::default(),
            zoom_to_pointer: true,
        }
    }

    pub fn with_zoom_limits(mut self, zmin: f64, zmax: f64) -> Self {
        assert!(
            zmin > 0.0 && zmin <= zmax,
            "invalid zoom limits [{zmin}, {zmax}]"
        );
        self.zmin = zmin;
        self.zmax = zmax;
        self.set_zoom(self.zoom);
        self
    }

    pub fn with_constraints(mut self, constraints: PanZoomConstraints) -> Self {
        self.constraints = constraints;
        self.set_zoom(self.zoom);
        self
    }

    /// Locks the ratio between the horizontal and vertical zoom.
    pub fn with_aspect(mut self, aspect: f64) -> Self {
        self.aspect = Some(aspect);
        self
    }

    pub fn with_zoom_to_pointer(mut self, enabled: bool) -> Self {
        self.zoom_to_pointer = enabled;
        self
    }

    pub fn pan(&self) -> [f64; 2] {
        self.pan
    }

    pub fn zoom(&self) -> [f64; 2] {
        self.zoom
    }

    pub fn constraints(&self) -> PanZoomConstraints {
        self.constraints
    }

    /// Zoom including the aspect correction of the canvas.
    pub fn effective_zoom(&self) -> [f64; 2] {
        self.zoom_aspect(self.zoom)
    }

    fn zoom_aspect(&self, zoom: [f64; 2]) -> [f64; 2] {
        match self.aspect {
            Some(aspect) => [
                zoom[0] * self.canvas_aspect[0] * aspect,
                zoom[1] * self.canvas_aspect[1] * aspect,
            ],
            None => zoom,
        }
    }

    pub fn set_pan(&mut self, pan: [f64; 2]) {
        self.pan = pan;
        self.constrain_pan();
    }

    pub fn set_zoom(&mut self, zoom: [f64; 2]) {
        self.zoom = zoom.map(|z| z.clamp(self.zmin, self.zmax));
        self.constrain_zoom();
        self.constrain_pan();
    }

    /// Sets pan and zoom at once, the constraints are applied afterwards.
    pub fn set_pan_zoom(&mut self, pan: [f64; 2], zoom: [f64; 2]) {
        self.pan = pan;
        self.set_zoom(zoom);
    }

    fn constrain_zoom(&mut self) {
        let c = self.constraints;
        if let (Some(min), Some(max)) = (c.xmin, c.xmax) {
            if max > min {
                self.zoom[0] = self.zoom[0].max(2.0 / (max - min)).min(self.zmax);
            }
        }
        if let (Some(min), Some(max)) = (c.ymin, c.ymax) {
            if max > min {
                self.zoom[1] = self.zoom[1].max(2.0 / (max - min)).min(self.zmax);
            }
        }
    }

    fn constrain_pan(&mut self) {
        // The visible range along an axis is `[-1 / z - p, 1 / z - p]`.
        fn constrain(pan: f64, zoom: f64, min: Option<f64>, max: Option<f64>) -> f64 {
            let lower = max.map(|max| 1.0 / zoom - max);
            let upper = min.map(|min| -min - 1.0 / zoom);
            match (lower, upper) {
                (Some(lower), Some(upper)) if lower > upper => (lower + upper) / 2.0,
                (lower, upper) => {
                    let pan = lower.map_or(pan, |l| pan.max(l));
                    upper.map_or(pan, |u| pan.min(u))
                }
            }
        }

        let c = self.constraints;
        self.pan[0] = constrain(self.pan[0], self.zoom[0], c.xmin, c.xmax);
        self.pan[1] = constrain(self.pan[1], self.zoom[1], c.ymin, c.ymax);
    }

    /// Pans the view by an offset given in view coordinates.
    pub fn pan_delta(&mut self, d: Offset<ViewSpace>) {
        let [zx, zy] = self.effective_zoom();
        self.set_pan([self.pan[0] + d.x / zx, self.pan[1] + d.y / zy]);
    }

    /// Zooms by `exp(c * coeff * d)`, keeping `pointer` fixed if zooming to the
    /// pointer is enabled.
    pub fn zoom_delta(&mut self, d: (f64, f64), pointer: Position<ViewSpace>, c: f64) {
        let (mut dx, mut dy) = d;
        if self.aspect.is_some() {
            if dx.abs() > dy.abs() {
                dy = dx;
            } else {
                dx = dy;
            }
        }

        let [pan_x, pan_y] = self.pan;
        let old_zoom = self.zoom;
        let new_zoom = [
            old_zoom[0] * (c * ZOOM_COEFF * dx).exp(),
            old_zoom[1] * (c * ZOOM_COEFF * dy).exp(),
        ];
        self.set_zoom(new_zoom);

        if self.zoom_to_pointer {
            let old = self.zoom_aspect(old_zoom);
            let new = self.zoom_aspect(self.zoom);
            self.set_pan([
                pan_x - pointer.x * (1.0 / old[0] - 1.0 / new[0]),
                pan_y - pointer.y * (1.0 / old[1] - 1.0 / new[1]),
            ]);
        }
    }

    /// Zooms with the mouse wheel; positive deltas zoom in.
    pub fn wheel(&mut self, delta: f64, pointer: Position<ViewSpace>) {
        if delta == 0.0 {
            return;
        }

        let d = delta.signum() * WHEEL_COEFF;
        self.zoom_delta((d, d), pointer, 1.0);
    }

    /// Zoom factor used for drag zooming on a canvas of the given width.
    pub fn drag_zoom_coeff(width_px: f64) -> f64 {
        width_px.max(1.0).sqrt() * 0.03
    }

    /// Zooms so that the given normalized box fills the view.
    pub fn set_range(&mut self, bounds: Aabb<NdcSpace>, keep_aspect: bool) {
        let (x0, y0) = bounds.start().extract();
        let (x1, y1) = bounds.end().extract();
        let pan = [-0.5 * (x0 + x1), -0.5 * (y0 + y1)];
        let mut zoom = [2.0 / (x1 - x0), 2.0 / (y1 - y0)].map(|z| {
            if z.is_finite() {
                z
            } else {
                self.zmax
            }
        });
        if keep_aspect {
            let z = zoom[0].min(zoom[1]);
            zoom = [z, z];
        }
        self.set_pan_zoom(pan, zoom);
    }

    /// Normalized box currently visible.
    pub fn range(&self) -> Aabb<NdcSpace> {
        let [px, py] = self.pan;
        let [zx, zy] = self.zoom;
        Aabb::new(
            Position::new((-1.0 / zx - px, -1.0 / zy - py)),
            Position::new((1.0 / zx - px, 1.0 / zy - py)),
        )
    }

    pub fn reset(&mut self) {
        self.set_pan_zoom(self.default_pan, self.default_zoom);
    }

    /// Updates the aspect correction after the canvas was resized.
    pub fn set_canvas_size(&mut self, width: f64, height: f64) {
        let aspect = width / height.max(1.0);
        self.canvas_aspect = if aspect > 1.0 {
            [1.0 / aspect, 1.0]
        } else {
            [1.0, aspect]
        };
        self.set_zoom(self.zoom);
    }

    /// Handles the keyboard shortcuts, returning whether the key was consumed.
    pub fn key(&mut self, key: Key) -> bool {
        let step = [KEY_PAN_STEP / self.zoom[0], KEY_PAN_STEP / self.zoom[1]];
        match key {
            Key::ArrowLeft => self.pan_delta(Offset::new((step[0], 0.0))),
            Key::ArrowRight => self.pan_delta(Offset::new((-step[0], 0.0))),
            Key::ArrowDown => self.pan_delta(Offset::new((0.0, step[1]))),
            Key::ArrowUp => self.pan_delta(Offset::new((0.0, -step[1]))),
            Key::Plus => self.zoom_delta((KEY_ZOOM_STEP, KEY_ZOOM_STEP), Position::zero(), 1.0),
            Key::Minus => {
                self.zoom_delta((-KEY_ZOOM_STEP, -KEY_ZOOM_STEP), Position::zero(), 1.0)
            }
            Key::Char('r' | 'R') => self.reset(),
            _ => return false,
        }

        true
    }
}

impl TransformNode for PanZoom {
    fn matrix(&self) -> AffineMatrix {
        let [zx, zy] = self.effective_zoom();
        AffineMatrix::scale_translate((zx, zy), (self.pan[0] * zx, self.pan[1] * zy))
    }

    fn inverse_matrix(&self) -> AffineMatrix {
        let [zx, zy] = self.effective_zoom();
        AffineMatrix::scale_translate((1.0 / zx, 1.0 / zy), (-self.pan[0], -self.pan[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn assert_close(a: [f64; 2], b: [f64; 2]) {
        assert!(
            (a[0] - b[0]).abs() < 1e-9 && (a[1] - b[1]).abs() < 1e-9,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn zoom_is_clamped() {
        let mut pz = PanZoom::new().with_zoom_limits(0.5, 4.0);
        pz.set_zoom([100.0, 0.01]);
        assert_eq!(pz.zoom(), [4.0, 0.5]);
    }

    #[test]
    fn zooming_keeps_the_pointer_fixed() {
        let mut pz = PanZoom::new();
        let pointer = Position::<ViewSpace>::new((0.5, -0.25));
        let before = pz.inverse_matrix().apply(pointer.extract());

        pz.zoom_delta((0.3, 0.3), pointer, 1.0);
        assert!(pz.zoom()[0] > 1.0);

        let after = pz.inverse_matrix().apply(pointer.extract());
        assert!((before.0 - after.0).abs() < EPS);
        assert!((before.1 - after.1).abs() < EPS);
    }

    #[test]
    fn set_range_round_trips() {
        let mut pz = PanZoom::new();
        let bounds = Aabb::new(Position::new((-0.5, 0.0)), Position::new((0.25, 0.5)));
        pz.set_range(bounds, false);

        let range = pz.range();
        assert_close(
            [range.start().x, range.start().y],
            [bounds.start().x, bounds.start().y],
        );
        assert_close([range.end().x, range.end().y], [bounds.end().x, bounds.end().y]);
    }

    #[test]
    fn constraints_keep_the_view_inside() {
        let mut pz = PanZoom::new().with_constraints(PanZoomConstraints::unit());
        pz.set_zoom([0.1, 0.1]);
        assert_eq!(pz.zoom(), [1.0, 1.0]);

        pz.set_zoom([4.0, 4.0]);
        pz.set_pan([10.0, -10.0]);
        let range = pz.range();
        assert!(range.start().x >= -1.0 - EPS && range.end().x <= 1.0 + EPS);
        assert!(range.start().y >= -1.0 - EPS && range.end().y <= 1.0 + EPS);
    }

    #[test]
    fn keyboard_pans_zooms_and_resets() {
        let mut pz = PanZoom::new();
        assert!(pz.key(Key::ArrowLeft));
        assert!(pz.pan()[0] > 0.0);
        assert!(pz.key(Key::Plus));
        assert!(pz.zoom()[0] > 1.0);
        assert!(!pz.key(Key::Char('x')));

        assert!(pz.key(Key::Char('R')));
        assert_eq!(pz.pan(), [0.0, 0.0]);
        assert_eq!(pz.zoom(), [1.0, 1.0]);
    }

    #[test]
    fn wheel_direction() {
        let mut pz = PanZoom::new();
        pz.wheel(3.0, Position::zero());
        assert!(pz.zoom()[0] > 1.0);
        pz.reset();
        pz.wheel(-3.0, Position::zero());
        assert!(pz.zoom()[0] < 1.0);
    }
}
