//! Free-form polygon selection.
use crate::coordinates::{Aabb, DataSpace, Position};

/// A polygon in data space, implicitly closed between its last and first
/// vertex.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Lasso {
    points: Vec<Position<DataSpace>>,
}

impl Lasso {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: impl IntoIterator<Item = Position<DataSpace>>) -> Self {
        let mut lasso = Self::new();
        for point in points {
            lasso.push(point);
        }
        lasso
    }

    /// Adds a vertex; non-finite positions and repetitions of the last vertex
    /// are ignored.
    pub fn push(&mut self, point: Position<DataSpace>) -> bool {
        if !point.is_finite() || self.points.last() == Some(&point) {
            return false;
        }

        self.points.push(point);
        true
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[Position<DataSpace>] {
        &self.points
    }

    /// A lasso needs at least three vertices to enclose anything.
    pub fn is_closed(&self) -> bool {
        self.points.len() >= 3
    }

    pub fn bounds(&self) -> Option<Aabb<DataSpace>> {
        Aabb::from_points(self.points.iter().copied())
    }

    /// Even-odd test of the point against the polygon.
    pub fn contains(&self, p: Position<DataSpace>) -> bool {
        if !self.is_closed() {
            return false;
        }

        let mut inside = false;
        let mut j = self.points.len() - 1;
        for (i, a) in self.points.iter().enumerate() {
            let b = &self.points[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x {
                    inside = !inside;
                }
            }
            j = i;
        }

        inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Position<DataSpace> {
        Position::new((x, y))
    }

    #[test]
    fn points_inside_a_square_are_hit() {
        let lasso = Lasso::from_points([p(0.0, 0.0), p(2.0, 0.0), p(2.0, 2.0), p(0.0, 2.0)]);
        assert!(lasso.contains(p(1.0, 1.0)));
        assert!(!lasso.contains(p(3.0, 1.0)));
        assert!(!lasso.contains(p(1.0, -0.5)));
    }

    #[test]
    fn concave_polygons_are_handled() {
        // A "U" shape open at the top.
        let lasso = Lasso::from_points([
            p(0.0, 0.0),
            p(3.0, 0.0),
            p(3.0, 3.0),
            p(2.0, 3.0),
            p(2.0, 1.0),
            p(1.0, 1.0),
            p(1.0, 3.0),
            p(0.0, 3.0),
        ]);
        assert!(lasso.contains(p(0.5, 2.0)));
        assert!(lasso.contains(p(2.5, 2.0)));
        assert!(!lasso.contains(p(1.5, 2.0)));
        assert!(lasso.contains(p(1.5, 0.5)));
    }

    #[test]
    fn open_lassos_contain_nothing() {
        let mut lasso = Lasso::new();
        assert!(lasso.push(p(0.0, 0.0)));
        assert!(!lasso.push(p(0.0, 0.0)));
        assert!(!lasso.push(p(f64::NAN, 0.0)));
        assert!(lasso.push(p(1.0, 1.0)));
        assert!(!lasso.contains(p(0.5, 0.5)));
    }
}
