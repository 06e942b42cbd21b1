//! Polylines over regularly sampled signals.
use std::sync::Arc;

use super::{
    count, decimate, stamp, AttributeLayout, IndexLayout, Layout, SourceRef, PRIMITIVE_RESTART,
};
use crate::{
    colors::Rgba,
    coordinates::{Aabb, DataSpace, Position},
    error::DataError,
    gpu::{PrimitiveTopology, VertexStepMode},
    programs::{AttributeSignature, ProgramSignature},
    wgsl::{AttributeType, UniformType},
};

pub const DEFAULT_MAX_VERTICES: usize = 1_000_000;

pub fn signature() -> ProgramSignature {
    ProgramSignature {
        name: "mesh".into(),
        attributes: vec![
            AttributeSignature::vertex("a_position", AttributeType::Vec2F32),
            AttributeSignature::vertex("a_color", AttributeType::Vec4F32),
        ],
        uniforms: vec![("u_transform".into(), UniformType::Mat3x3F32)],
        topology: PrimitiveTopology::LineStrip,
    }
}

/// A signal sampled every `dt` starting at `t0`, drawn at
/// `offset + scale * sample`.
#[derive(Debug, Clone)]
pub struct TraceSegment {
    pub t0: f64,
    pub dt: f64,
    /// Explicit abscissa of every sample, replacing `t0` and `dt`.
    pub times: Option<Arc<[f64]>>,
    pub samples: Arc<[f32]>,
    pub offset: f32,
    pub scale: f32,
    pub color: [f32; 4],
}

impl TraceSegment {
    pub fn new(t0: f64, dt: f64, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            t0,
            dt,
            times: None,
            samples: samples.into(),
            offset: 0.0,
            scale: 1.0,
            color: Rgba::BLACK.to_array(),
        }
    }

    /// A polyline through arbitrary points.
    pub fn polyline(xs: impl Into<Arc<[f64]>>, ys: impl Into<Arc<[f32]>>) -> Result<Self, DataError> {
        let times = xs.into();
        let samples = ys.into();
        if times.len() != samples.len() {
            return Err(DataError::LengthMismatch {
                what: "polyline ordinates",
                expected: times.len(),
                got: samples.len(),
            });
        }

        Ok(Self {
            times: Some(times),
            ..Self::new(0.0, 1.0, samples)
        })
    }

    pub fn with_offset(mut self, offset: f32, scale: f32) -> Self {
        self.offset = offset;
        self.scale = scale;
        self
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = color.to_array();
        self
    }

    fn position(&self, i: usize) -> [f32; 2] {
        let t = match &self.times {
            Some(times) => times[i],
            None => self.t0 + i as f64 * self.dt,
        };
        [
            t as f32,
            self.offset + self.scale * self.samples[i],
        ]
    }
}

/// Set of line strips, e.g. the channels of a raw data view or the
/// waveforms of the selected spikes.
#[derive(Debug, Clone)]
pub struct Trace {
    pub segments: Arc<[TraceSegment]>,
    pub max_vertices: usize,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Trace {
    pub fn new(segments: impl Into<Arc<[TraceSegment]>>) -> Self {
        Self {
            segments: segments.into(),
            max_vertices: DEFAULT_MAX_VERTICES,
        }
    }

    pub fn with_max_vertices(mut self, max_vertices: usize) -> Self {
        self.max_vertices = max_vertices;
        self
    }

    /// Number of samples over all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strides over the concatenated samples; every segment is terminated by
    /// a primitive restart.
    pub fn layout(&self) -> Layout {
        let n = self.len();
        let step = decimate::stride(n, self.max_vertices);

        let mut positions = Vec::new();
        let mut colors = Vec::new();
        let mut indices = Vec::new();
        let mut first = 0;
        for segment in self.segments.iter() {
            let len = segment.samples.len();
            // First sample of the segment whose global index is a multiple of
            // the stride.
            let start = (step - first % step) % step;
            for i in (start..len).step_by(step) {
                indices.push(count(positions.len() / 2));
                positions.extend(segment.position(i));
                colors.extend(segment.color);
            }
            if indices.last().is_some_and(|i| *i != PRIMITIVE_RESTART) {
                indices.push(PRIMITIVE_RESTART);
            }
            first += len;
        }
        if indices.last() == Some(&PRIMITIVE_RESTART) {
            indices.pop();
        }

        let config = stamp((n, self.max_vertices));
        let index_count = count(indices.len());
        Layout {
            attributes: vec![
                AttributeLayout {
                    name: "a_position".into(),
                    ty: AttributeType::Vec2F32,
                    step_mode: VertexStepMode::Vertex,
                    values: positions,
                    source: SourceRef::new(&self.segments, config),
                },
                AttributeLayout {
                    name: "a_color".into(),
                    ty: AttributeType::Vec4F32,
                    step_mode: VertexStepMode::Vertex,
                    values: colors,
                    source: SourceRef::new(&self.segments, config),
                },
            ],
            indices: Some(IndexLayout {
                values: indices,
                source: SourceRef::new(&self.segments, config),
            }),
            uniforms: Vec::new(),
            topology: PrimitiveTopology::LineStrip,
            count: index_count,
            instance_count: 1,
        }
    }

    pub fn bounds(&self) -> Option<Aabb<DataSpace>> {
        Aabb::from_points(self.segments.iter().flat_map(|segment| {
            (0..segment.samples.len()).map(|i| {
                let [x, y] = segment.position(i);
                Position::new((x as f64, y as f64))
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_separated_by_restarts() {
        let trace = Trace::new(vec![
            TraceSegment::new(0.0, 1.0, vec![0.0, 1.0, 2.0]),
            TraceSegment::new(10.0, 0.5, vec![4.0, 5.0]).with_offset(1.0, 2.0),
        ]);
        let layout = trace.layout();

        let indices = &layout.indices.as_ref().unwrap().values;
        assert_eq!(indices, &vec![0, 1, 2, PRIMITIVE_RESTART, 3, 4]);
        assert_eq!(layout.count, 6);
        assert_eq!(
            layout.attribute("a_position").unwrap().values,
            vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 10.0, 9.0, 10.5, 11.0]
        );
    }

    #[test]
    fn decimation_strides_over_all_segments() {
        let trace = Trace::new(vec![
            TraceSegment::new(0.0, 1.0, vec![0.0; 5]),
            TraceSegment::new(5.0, 1.0, vec![0.0; 5]),
        ])
        .with_max_vertices(4);
        let layout = trace.layout();

        // Stride 3 keeps the global samples 0, 3, 6 and 9.
        let xs = layout
            .attribute("a_position")
            .unwrap()
            .values
            .chunks(2)
            .map(|p| p[0])
            .collect::<Vec<_>>();
        assert_eq!(xs, vec![0.0, 3.0, 6.0, 9.0]);
        assert_eq!(
            layout.indices.unwrap().values,
            vec![0, 1, PRIMITIVE_RESTART, 2, 3]
        );
    }

    #[test]
    fn polylines_use_explicit_abscissas() {
        assert!(TraceSegment::polyline(vec![0.0, 1.0], vec![0.0]).is_err());

        let segment = TraceSegment::polyline(vec![3.0, -1.0, 2.0], vec![0.0, 1.0, 0.0]).unwrap();
        let layout = Trace::new(vec![segment]).layout();
        assert_eq!(
            layout.attribute("a_position").unwrap().values,
            vec![3.0, 0.0, -1.0, 1.0, 2.0, 0.0]
        );
    }

    #[test]
    fn bounds_cover_offsets_and_time() {
        let trace = Trace::new(vec![
            TraceSegment::new(1.0, 0.5, vec![-1.0, 3.0]).with_offset(10.0, 1.0)
        ]);
        let bounds = trace.bounds().unwrap();
        assert_eq!(bounds.start(), Position::new((1.0, 9.0)));
        assert_eq!(bounds.end(), Position::new((1.5, 13.0)));
    }
}
