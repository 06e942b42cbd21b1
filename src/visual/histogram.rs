use std::sync::Arc;

use super::{count, stamp, AttributeLayout, Layout, SourceRef};
use crate::{
    colors::Rgba,
    coordinates::{Aabb, DataSpace, Position},
    gpu::{PrimitiveTopology, VertexStepMode},
    programs::{AttributeSignature, ProgramSignature},
    shader::ShaderSource,
    wgsl::{AttributeType, UniformType},
};

pub const SHADER: ShaderSource =
    ShaderSource::built_in("mesh", include_str!("../shaders/mesh.wgsl"));

/// Signature of the colored triangle meshes of histograms and images.
pub fn signature() -> ProgramSignature {
    ProgramSignature {
        name: "mesh".into(),
        attributes: vec![
            AttributeSignature::vertex("a_position", AttributeType::Vec2F32),
            AttributeSignature::vertex("a_color", AttributeType::Vec4F32),
        ],
        uniforms: vec![("u_transform".into(), UniformType::Mat3x3F32)],
        topology: PrimitiveTopology::TriangleList,
    }
}

/// Pushes the two triangles of an axis aligned rectangle.
pub(super) fn push_rect(positions: &mut Vec<f32>, [x0, y0]: [f32; 2], [x1, y1]: [f32; 2]) {
    positions.extend_from_slice(&[x0, y0, x1, y0, x1, y1, x0, y0, x1, y1, x0, y1]);
}

/// Bars of equal width over `[x_min, x_max]`.
#[derive(Debug, Clone)]
pub struct Histogram {
    pub counts: Arc<[f32]>,
    pub x_min: f64,
    pub x_max: f64,
    pub color: Rgba,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(Vec::new(), 0.0, 1.0)
    }
}

impl Histogram {
    pub fn new(counts: impl Into<Arc<[f32]>>, x_min: f64, x_max: f64) -> Self {
        Self {
            counts: counts.into(),
            x_min,
            x_max,
            color: Rgba::BLACK,
        }
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = color;
        self
    }

    pub fn layout(&self) -> Layout {
        let bins = self.counts.len();
        let width = (self.x_max - self.x_min) / bins.max(1) as f64;

        let mut positions = Vec::with_capacity(bins * 12);
        for (i, value) in self.counts.iter().enumerate() {
            let x0 = (self.x_min + i as f64 * width) as f32;
            let x1 = (self.x_min + (i + 1) as f64 * width) as f32;
            push_rect(&mut positions, [x0, 0.0], [x1, *value]);
        }
        let vertices = positions.len() / 2;
        let colors = self.color.to_array().repeat(vertices);

        let range = stamp((self.x_min.to_bits(), self.x_max.to_bits()));
        let color = stamp((bins, self.color.to_array().map(f32::to_bits)));
        Layout {
            attributes: vec![
                AttributeLayout {
                    name: "a_position".into(),
                    ty: AttributeType::Vec2F32,
                    step_mode: VertexStepMode::Vertex,
                    values: positions,
                    source: SourceRef::new(&self.counts, range),
                },
                AttributeLayout {
                    name: "a_color".into(),
                    ty: AttributeType::Vec4F32,
                    step_mode: VertexStepMode::Vertex,
                    values: colors,
                    source: SourceRef::new(&self.counts, color),
                },
            ],
            indices: None,
            uniforms: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            count: count(vertices),
            instance_count: 1,
        }
    }

    /// `[x_min, x_max] x [0, max count]`.
    pub fn bounds(&self) -> Option<Aabb<DataSpace>> {
        if self.counts.is_empty() {
            return None;
        }

        let max = self
            .counts
            .iter()
            .copied()
            .filter(|c| c.is_finite())
            .fold(0.0f32, f32::max);
        Some(Aabb::new(
            Position::new((self.x_min, 0.0)),
            Position::new((self.x_max, max as f64)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_bin_is_a_quad() {
        let histogram = Histogram::new(vec![1.0, 3.0], 0.0, 4.0);
        let layout = histogram.layout();

        assert_eq!(layout.count, 12);
        let positions = &layout.attribute("a_position").unwrap().values;
        assert_eq!(&positions[..12], &[0.0, 0.0, 2.0, 0.0, 2.0, 1.0, 0.0, 0.0, 2.0, 1.0, 0.0, 1.0]);
        assert_eq!(&positions[16..18], &[4.0, 3.0]);
        assert_eq!(layout.attribute("a_color").unwrap().len(), 12);
    }

    #[test]
    fn bounds_start_at_zero() {
        let histogram = Histogram::new(vec![2.0, 7.0, 1.0], -1.0, 1.0);
        let bounds = histogram.bounds().unwrap();
        assert_eq!(bounds.start(), Position::new((-1.0, 0.0)));
        assert_eq!(bounds.end(), Position::new((1.0, 7.0)));
    }
}
