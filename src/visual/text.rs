//! Labels drawn with the built-in dot matrix font.
//!
//! Every lit dot is one instance of a square quad anchored at the data
//! position of its label and offset in screen pixels.
use std::sync::Arc;

use super::{count, font, stamp, AttributeLayout, Layout, SourceRef};
use crate::{
    colors::Rgba,
    coordinates::{Aabb, DataSpace, Position},
    gpu::{PrimitiveTopology, VertexStepMode},
    programs::{AttributeSignature, ProgramSignature},
    shader::ShaderSource,
    wgsl::{AttributeType, UniformType, UniformValue},
};

pub const SHADER: ShaderSource =
    ShaderSource::built_in("glyph", include_str!("../shaders/glyph.wgsl"));

pub const DEFAULT_DOT_SIZE: f32 = 2.0;

pub fn signature() -> ProgramSignature {
    ProgramSignature {
        name: "glyph".into(),
        attributes: vec![
            AttributeSignature::instance("a_position", AttributeType::Vec2F32),
            AttributeSignature::instance("a_offset", AttributeType::Vec2F32),
            AttributeSignature::instance("a_color", AttributeType::Vec4F32),
        ],
        uniforms: vec![
            ("u_transform".into(), UniformType::Mat3x3F32),
            ("u_viewport".into(), UniformType::Vec2F32),
            ("u_dot_size".into(), UniformType::F32),
        ],
        topology: PrimitiveTopology::TriangleStrip,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLabel {
    pub position: [f32; 2],
    pub text: String,
    pub color: Rgba,
}

impl TextLabel {
    pub fn new(position: [f32; 2], text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
            color: Rgba::BLACK,
        }
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = color;
        self
    }

    /// Size of the text block in dots.
    fn size(&self) -> [usize; 2] {
        let lines = self.text.lines().count().max(1);
        let columns = self
            .text
            .lines()
            .map(|l| l.chars().count())
            .max()
            .unwrap_or(0);
        [
            (columns * font::ADVANCE).saturating_sub(1),
            lines * font::LINE_HEIGHT - (font::LINE_HEIGHT - font::GLYPH_HEIGHT),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Text {
    pub labels: Arc<[TextLabel]>,
    /// Size of a dot in pixels.
    pub dot_size: f32,
    /// Position of the anchor inside the text block, `[0, 0]` being its top
    /// left and `[1, 1]` its bottom right corner.
    pub anchor: [f32; 2],
}

impl Default for Text {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Text {
    pub fn new(labels: impl Into<Arc<[TextLabel]>>) -> Self {
        Self {
            labels: labels.into(),
            dot_size: DEFAULT_DOT_SIZE,
            anchor: [0.0, 0.0],
        }
    }

    pub fn with_dot_size(mut self, dot_size: f32) -> Self {
        self.dot_size = dot_size;
        self
    }

    pub fn with_anchor(mut self, anchor: [f32; 2]) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn layout(&self) -> Layout {
        let mut positions = Vec::new();
        let mut offsets = Vec::new();
        let mut colors = Vec::new();

        for label in self.labels.iter() {
            let [width, height] = label.size();
            let origin = [
                -self.anchor[0] * width as f32,
                -self.anchor[1] * height as f32,
            ];

            for (line, text) in label.text.lines().enumerate() {
                for (column, c) in text.chars().enumerate() {
                    for (x, y) in font::dots(font::glyph(c)) {
                        positions.extend(label.position);
                        offsets.extend([
                            origin[0] + (column * font::ADVANCE + x) as f32,
                            origin[1] + (line * font::LINE_HEIGHT + y) as f32,
                        ]);
                        colors.extend(label.color.to_array());
                    }
                }
            }
        }

        let instances = positions.len() / 2;
        let config = stamp(self.anchor.map(f32::to_bits));
        Layout {
            attributes: vec![
                AttributeLayout {
                    name: "a_position".into(),
                    ty: AttributeType::Vec2F32,
                    step_mode: VertexStepMode::Instance,
                    values: positions,
                    source: SourceRef::new(&self.labels, 0),
                },
                AttributeLayout {
                    name: "a_offset".into(),
                    ty: AttributeType::Vec2F32,
                    step_mode: VertexStepMode::Instance,
                    values: offsets,
                    source: SourceRef::new(&self.labels, config),
                },
                AttributeLayout {
                    name: "a_color".into(),
                    ty: AttributeType::Vec4F32,
                    step_mode: VertexStepMode::Instance,
                    values: colors,
                    source: SourceRef::new(&self.labels, 0),
                },
            ],
            indices: None,
            uniforms: vec![("u_dot_size".into(), UniformValue::F32(self.dot_size))],
            topology: PrimitiveTopology::TriangleStrip,
            count: 4,
            instance_count: count(instances),
        }
    }

    /// Bounds of the anchors; the extent of the glyphs depends on the zoom.
    pub fn bounds(&self) -> Option<Aabb<DataSpace>> {
        Aabb::from_points(
            self.labels
                .iter()
                .map(|l| Position::new((l.position[0] as f64, l.position[1] as f64))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dot_is_an_instance() {
        let text = Text::new(vec![TextLabel::new([1.0, 2.0], "-1")]);
        let layout = text.layout();

        let dash = 5;
        let one = font::dots(font::glyph('1')).count();
        assert_eq!(layout.instance_count as usize, dash + one);
        assert_eq!(
            &layout.attribute("a_position").unwrap().values[..2],
            &[1.0, 2.0]
        );
        // The dash occupies the middle row of the first glyph.
        assert_eq!(
            &layout.attribute("a_offset").unwrap().values[..4],
            &[0.0, 3.0, 1.0, 3.0]
        );
    }

    #[test]
    fn anchors_shift_the_block() {
        let text = Text::new(vec![TextLabel::new([0.0, 0.0], "--")]).with_anchor([1.0, 0.0]);
        let layout = text.layout();

        // Two glyphs are 11 dots wide.
        let offsets = &layout.attribute("a_offset").unwrap().values;
        assert_eq!(offsets[0], -11.0);
        assert_eq!(offsets[offsets.len() - 2], -11.0 + 10.0);
    }

    #[test]
    fn multi_line_labels_advance_rows() {
        let text = Text::new(vec![TextLabel::new([0.0, 0.0], "-\n-")]);
        let offsets = text.layout().attribute("a_offset").unwrap().values.clone();
        let rows = offsets.chunks(2).map(|o| o[1]).collect::<Vec<_>>();
        assert_eq!(rows[..5], [3.0; 5]);
        assert_eq!(rows[5..], [12.0; 5]);
    }
}
