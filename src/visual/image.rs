use std::sync::Arc;

use super::{count, histogram::push_rect, stamp, AttributeLayout, Layout, SourceRef};
use crate::{
    colors::Colormap,
    coordinates::{Aabb, DataSpace, Position},
    error::DataError,
    gpu::{PrimitiveTopology, VertexStepMode},
    wgsl::AttributeType,
};

/// Grid of values drawn as colored cells, row 0 at the top.
#[derive(Debug, Clone)]
pub struct Image {
    values: Arc<[f32]>,
    rows: usize,
    cols: usize,
    extent: Aabb<DataSpace>,
    colormap: Colormap,
    range: Option<(f32, f32)>,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            values: Vec::new().into(),
            rows: 0,
            cols: 0,
            extent: Aabb::unit(),
            colormap: Colormap::default(),
            range: None,
        }
    }
}

impl Image {
    /// Creates an image covering `[0, cols] x [0, rows]`.
    pub fn new(values: impl Into<Arc<[f32]>>, rows: usize, cols: usize) -> Result<Self, DataError> {
        let values = values.into();
        if values.len() != rows * cols {
            return Err(DataError::LengthMismatch {
                what: "image values",
                expected: rows * cols,
                got: values.len(),
            });
        }

        Ok(Self {
            values,
            rows,
            cols,
            extent: Aabb::new(
                Position::zero(),
                Position::new((cols as f64, rows as f64)),
            ),
            ..Default::default()
        })
    }

    pub fn with_extent(mut self, extent: Aabb<DataSpace>) -> Self {
        self.extent = extent;
        self
    }

    pub fn with_colormap(mut self, colormap: Colormap) -> Self {
        self.colormap = colormap;
        self
    }

    /// Maps `[min, max]` onto the colormap instead of the value range.
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn value(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    fn value_range(&self) -> (f32, f32) {
        self.range.unwrap_or_else(|| {
            self.values
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
                    (min.min(v), max.max(v))
                })
        })
    }

    pub fn layout(&self) -> Layout {
        let (x0, y0) = self.extent.start().extract();
        let (x1, y1) = self.extent.end().extract();
        let width = (x1 - x0) / self.cols.max(1) as f64;
        let height = (y1 - y0) / self.rows.max(1) as f64;
        let (min, max) = self.value_range();

        let mut positions = Vec::with_capacity(self.values.len() * 12);
        let mut colors = Vec::with_capacity(self.values.len() * 24);
        for row in 0..self.rows {
            let top = y1 - row as f64 * height;
            for col in 0..self.cols {
                let left = x0 + col as f64 * width;
                push_rect(
                    &mut positions,
                    [left as f32, (top - height) as f32],
                    [(left + width) as f32, top as f32],
                );
                let color = self.colormap.sample(self.value(row, col), min, max);
                colors.extend(color.to_array().repeat(6));
            }
        }

        let geometry = stamp((
            self.rows,
            self.cols,
            [x0, y0, x1, y1].map(f64::to_bits),
        ));
        let shading = stamp((
            geometry,
            self.colormap,
            self.range.map(|(a, b)| (a.to_bits(), b.to_bits())),
        ));
        let vertices = positions.len() / 2;
        Layout {
            attributes: vec![
                AttributeLayout {
                    name: "a_position".into(),
                    ty: AttributeType::Vec2F32,
                    step_mode: VertexStepMode::Vertex,
                    values: positions,
                    source: SourceRef::new(&self.values, geometry),
                },
                AttributeLayout {
                    name: "a_color".into(),
                    ty: AttributeType::Vec4F32,
                    step_mode: VertexStepMode::Vertex,
                    values: colors,
                    source: SourceRef::new(&self.values, shading),
                },
            ],
            indices: None,
            uniforms: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            count: count(vertices),
            instance_count: 1,
        }
    }

    pub fn bounds(&self) -> Option<Aabb<DataSpace>> {
        (!self.values.is_empty()).then_some(self.extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colors::Rgba;

    #[test]
    fn mismatched_shapes_are_rejected() {
        assert_eq!(
            Image::new(vec![0.0; 5], 2, 3).unwrap_err(),
            DataError::LengthMismatch {
                what: "image values",
                expected: 6,
                got: 5
            }
        );
    }

    #[test]
    fn first_row_is_drawn_at_the_top() {
        let image = Image::new(vec![0.0, 1.0], 2, 1)
            .unwrap()
            .with_colormap(Colormap::Gray);
        let layout = image.layout();

        assert_eq!(layout.count, 12);
        let positions = &layout.attribute("a_position").unwrap().values;
        // Lower left corner of the first cell.
        assert_eq!(&positions[..2], &[0.0, 1.0]);
        let colors = &layout.attribute("a_color").unwrap().values;
        assert_eq!(&colors[..4], &Rgba::BLACK.to_array());
        assert_eq!(&colors[24..28], &Rgba::WHITE.to_array());
    }

    #[test]
    fn explicit_ranges_override_the_values() {
        let image = Image::new(vec![0.5], 1, 1)
            .unwrap()
            .with_colormap(Colormap::Gray)
            .with_range(0.0, 0.5);
        let layout = image.layout();
        let colors = &layout.attributes[1].values;
        assert_eq!(&colors[..4], &Rgba::WHITE.to_array());
    }
}
