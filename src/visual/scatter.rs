//! Markers drawn as instanced screen aligned discs.
use std::sync::Arc;

use super::{count, decimate, stamp, AttributeLayout, Layout, SourceRef};
use crate::{
    cluster::SpikeId,
    colors::Rgba,
    coordinates::{Aabb, DataSpace, Position},
    gpu::{PrimitiveTopology, VertexStepMode},
    programs::{AttributeSignature, ProgramSignature},
    shader::ShaderSource,
    wgsl::{AttributeType, UniformType},
};

pub const SHADER: ShaderSource =
    ShaderSource::built_in("marker", include_str!("../shaders/marker.wgsl"));

pub const DEFAULT_MAX_POINTS: usize = 100_000;
pub const DEFAULT_MARKER_SIZE: f32 = 5.0;

pub fn signature() -> ProgramSignature {
    ProgramSignature {
        name: "marker".into(),
        attributes: vec![
            AttributeSignature::instance("a_position", AttributeType::Vec2F32),
            AttributeSignature::instance("a_color", AttributeType::Vec4F32),
            AttributeSignature::instance("a_size", AttributeType::F32),
        ],
        uniforms: vec![
            ("u_transform".into(), UniformType::Mat3x3F32),
            ("u_viewport".into(), UniformType::Vec2F32),
        ],
        topology: PrimitiveTopology::TriangleStrip,
    }
}

/// Point cloud, e.g. spike amplitudes over time or feature projections.
///
/// Colors and sizes hold either one value per point or a single value shared
/// by all points.
#[derive(Debug, Clone)]
pub struct Scatter {
    pub positions: Arc<[[f32; 2]]>,
    pub colors: Arc<[[f32; 4]]>,
    pub sizes: Arc<[f32]>,
    /// Spike of every point, used for lasso selection.
    pub spike_ids: Option<Arc<[SpikeId]>>,
    pub max_points: usize,
}

impl Default for Scatter {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Scatter {
    pub fn new(positions: impl Into<Arc<[[f32; 2]]>>) -> Self {
        Self {
            positions: positions.into(),
            colors: Arc::new([Rgba::BLACK.to_array()]),
            sizes: Arc::new([DEFAULT_MARKER_SIZE]),
            spike_ids: None,
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.colors = Arc::new([color.to_array()]);
        self
    }

    pub fn with_colors(mut self, colors: impl Into<Arc<[[f32; 4]]>>) -> Self {
        self.colors = colors.into();
        self
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.sizes = Arc::new([size]);
        self
    }

    pub fn with_sizes(mut self, sizes: impl Into<Arc<[f32]>>) -> Self {
        self.sizes = sizes.into();
        self
    }

    pub fn with_spike_ids(mut self, spike_ids: impl Into<Arc<[SpikeId]>>) -> Self {
        self.spike_ids = Some(spike_ids.into());
        self
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn layout(&self) -> Layout {
        let n = self.positions.len();
        let kept = decimate::kept_indices(n, self.max_points);
        let config = stamp((n, self.max_points));

        let positions = kept
            .clone()
            .flat_map(|i| self.positions[i])
            .collect::<Vec<_>>();
        let colors = kept
            .clone()
            .flat_map(|i| per_point(&self.colors, i, n, Rgba::BLACK.to_array()))
            .collect();
        let sizes = kept
            .map(|i| per_point(&self.sizes, i, n, DEFAULT_MARKER_SIZE))
            .collect();

        let instances = positions.len() / 2;
        Layout {
            attributes: vec![
                AttributeLayout {
                    name: "a_position".into(),
                    ty: AttributeType::Vec2F32,
                    step_mode: VertexStepMode::Instance,
                    values: positions,
                    source: SourceRef::new(&self.positions, config),
                },
                AttributeLayout {
                    name: "a_color".into(),
                    ty: AttributeType::Vec4F32,
                    step_mode: VertexStepMode::Instance,
                    values: colors,
                    source: SourceRef::new(&self.colors, config),
                },
                AttributeLayout {
                    name: "a_size".into(),
                    ty: AttributeType::F32,
                    step_mode: VertexStepMode::Instance,
                    values: sizes,
                    source: SourceRef::new(&self.sizes, config),
                },
            ],
            indices: None,
            uniforms: Vec::new(),
            topology: PrimitiveTopology::TriangleStrip,
            count: 4,
            instance_count: count(instances),
        }
    }

    pub fn bounds(&self) -> Option<Aabb<DataSpace>> {
        Aabb::from_points(
            self.positions
                .iter()
                .map(|[x, y]| Position::new((*x as f64, *y as f64))),
        )
    }

    /// Spikes of all points, decimated or not, for which `contains` holds.
    pub fn spikes_where(&self, contains: impl Fn(Position<DataSpace>) -> bool) -> Vec<SpikeId> {
        let Some(spike_ids) = &self.spike_ids else {
            return Vec::new();
        };

        self.positions
            .iter()
            .zip(spike_ids.iter())
            .filter(|([x, y], _)| contains(Position::new((*x as f64, *y as f64))))
            .map(|(_, spike)| *spike)
            .collect()
    }
}

/// Value of point `i` from a per point or shared array.
fn per_point<T: Copy>(values: &[T], i: usize, n: usize, default: T) -> T {
    if values.len() == n {
        values[i]
    } else {
        values.first().copied().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_colors_are_broadcast() {
        let scatter = Scatter::new(vec![[0.0, 0.0], [1.0, 2.0]])
            .with_color(Rgba::WHITE)
            .with_size(3.0);
        let layout = scatter.layout();

        assert_eq!(layout.instance_count, 2);
        assert_eq!(layout.count, 4);
        assert_eq!(
            layout.attribute("a_color").unwrap().values,
            [[1.0f32; 4], [1.0; 4]].concat()
        );
        assert_eq!(layout.attribute("a_size").unwrap().values, vec![3.0, 3.0]);
    }

    #[test]
    fn points_are_decimated() {
        let positions = (0..10).map(|i| [i as f32, 0.0]).collect::<Vec<_>>();
        let colors = (0..10).map(|i| [i as f32, 0.0, 0.0, 1.0]).collect::<Vec<_>>();
        let scatter = Scatter::new(positions)
            .with_colors(colors)
            .with_max_points(4);
        let layout = scatter.layout();

        assert_eq!(layout.instance_count, 4);
        let xs = layout.attribute("a_position").unwrap().values.chunks(2).map(|p| p[0]).collect::<Vec<_>>();
        assert_eq!(xs, vec![0.0, 3.0, 6.0, 9.0]);
        let reds = layout.attribute("a_color").unwrap().values.chunks(4).map(|c| c[0]).collect::<Vec<_>>();
        assert_eq!(reds, xs);
    }

    #[test]
    fn layouts_of_unchanged_data_share_their_sources() {
        let scatter = Scatter::new(vec![[0.0, 0.0]]);
        let first = scatter.layout();
        let second = scatter.clone().with_color(Rgba::WHITE).layout();

        let source = |layout: &Layout, name: &str| layout.attribute(name).unwrap().source.clone();
        assert!(source(&first, "a_position").same_as(&source(&second, "a_position")));
        assert!(!source(&first, "a_color").same_as(&source(&second, "a_color")));
    }

    #[test]
    fn lasso_hits_use_every_point() {
        let positions = (0..10).map(|i| [i as f32, i as f32]).collect::<Vec<_>>();
        let spikes = (0..10).map(SpikeId).collect::<Vec<_>>();
        let scatter = Scatter::new(positions)
            .with_spike_ids(spikes)
            .with_max_points(2);

        let hits = scatter.spikes_where(|p| p.x > 6.5);
        assert_eq!(hits, vec![SpikeId(7), SpikeId(8), SpikeId(9)]);
    }

    #[test]
    fn bounds_skip_non_finite_points() {
        let scatter = Scatter::new(vec![[0.0, 1.0], [f32::NAN, 5.0], [2.0, -1.0]]);
        let bounds = scatter.bounds().unwrap();
        assert_eq!(bounds.start(), Position::new((0.0, -1.0)));
        assert_eq!(bounds.end(), Position::new((2.0, 1.0)));
    }
}
