//! Visuals turn domain data into buffer layouts and draw calls.
use std::{
    any::Any,
    borrow::Cow,
    collections::{hash_map::DefaultHasher, BTreeMap},
    fmt::Debug,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    coordinates::{Aabb, DataSpace},
    gpu::{PrimitiveTopology, VertexStepMode},
    programs::ProgramSignature,
    shader::ShaderSource,
    wgsl::{AttributeType, UniformValue},
};

pub mod decimate;
mod font;
pub mod histogram;
pub mod image;
pub mod scatter;
pub mod text;
pub mod trace;

pub use histogram::Histogram;
pub use image::Image;
pub use scatter::Scatter;
pub use text::{Text, TextLabel};
pub use trace::{Trace, TraceSegment};

/// Index separating two strips of an indexed strip topology.
pub const PRIMITIVE_RESTART: u32 = u32::MAX;

/// Identity of the data an attribute was derived from.
///
/// Two references are the same if they point to the same allocation and were
/// derived with the same configuration stamp. Values are never compared.
#[derive(Clone)]
pub struct SourceRef {
    addr: usize,
    stamp: u64,
    _data: Arc<dyn Any + Send + Sync>,
}

impl SourceRef {
    pub fn new<T: ?Sized + Send + Sync + 'static>(data: &Arc<T>, stamp: u64) -> Self {
        Self {
            addr: Arc::as_ptr(data) as *const () as usize,
            stamp,
            // Keeps the allocation alive so that its address cannot be reused.
            _data: Arc::new(Arc::clone(data)),
        }
    }

    pub fn same_as(&self, other: &Self) -> bool {
        self.addr == other.addr && self.stamp == other.stamp
    }
}

impl Debug for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRef")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("stamp", &self.stamp)
            .finish()
    }
}

/// Hashes the configuration an attribute depends on.
pub(crate) fn stamp(value: impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct AttributeLayout {
    pub name: Cow<'static, str>,
    pub ty: AttributeType,
    pub step_mode: VertexStepMode,
    pub values: Vec<f32>,
    pub source: SourceRef,
}

impl AttributeLayout {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values.len() / self.ty.components()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IndexLayout {
    pub values: Vec<u32>,
    pub source: SourceRef,
}

/// Everything needed to draw a visual.
#[derive(Debug, Clone)]
pub struct Layout {
    pub attributes: Vec<AttributeLayout>,
    pub indices: Option<IndexLayout>,
    /// Uniforms specific to the visual; the canvas adds the transform and
    /// the viewport.
    pub uniforms: Vec<(Cow<'static, str>, UniformValue)>,
    pub topology: PrimitiveTopology,
    /// Number of vertices, or of indices if there are any.
    pub count: u32,
    pub instance_count: u32,
}

impl Layout {
    pub fn attribute(&self, name: &str) -> Option<&AttributeLayout> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Whether drawing the layout would produce nothing.
    pub fn is_empty(&self) -> bool {
        self.count == 0 || self.instance_count == 0
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).expect("vertex count exceeds u32::MAX")
}

/// A drawable item of a subplot.
#[derive(Debug, Clone)]
pub enum Visual {
    Scatter(Scatter),
    Trace(Trace),
    Histogram(Histogram),
    Text(Text),
    Image(Image),
}

impl Visual {
    pub fn kind(&self) -> &'static str {
        match self {
            Visual::Scatter(_) => "scatter",
            Visual::Trace(_) => "trace",
            Visual::Histogram(_) => "histogram",
            Visual::Text(_) => "text",
            Visual::Image(_) => "image",
        }
    }

    /// Lays out the data of the visual; does not depend on any other state.
    pub fn layout(&self) -> Layout {
        match self {
            Visual::Scatter(v) => v.layout(),
            Visual::Trace(v) => v.layout(),
            Visual::Histogram(v) => v.layout(),
            Visual::Text(v) => v.layout(),
            Visual::Image(v) => v.layout(),
        }
    }

    /// Bounds of the data, `None` if there is nothing to draw.
    pub fn bounds(&self) -> Option<Aabb<DataSpace>> {
        match self {
            Visual::Scatter(v) => v.bounds(),
            Visual::Trace(v) => v.bounds(),
            Visual::Histogram(v) => v.bounds(),
            Visual::Text(v) => v.bounds(),
            Visual::Image(v) => v.bounds(),
        }
    }

    pub fn signature(&self) -> ProgramSignature {
        match self {
            Visual::Scatter(_) => scatter::signature(),
            Visual::Trace(_) => trace::signature(),
            Visual::Histogram(_) | Visual::Image(_) => histogram::signature(),
            Visual::Text(_) => text::signature(),
        }
    }

    pub fn default_shader(&self) -> ShaderSource {
        match self {
            Visual::Scatter(_) => scatter::SHADER,
            Visual::Trace(_) | Visual::Histogram(_) | Visual::Image(_) => histogram::SHADER,
            Visual::Text(_) => text::SHADER,
        }
    }
}

impl From<Scatter> for Visual {
    fn from(value: Scatter) -> Self {
        Visual::Scatter(value)
    }
}

impl From<Trace> for Visual {
    fn from(value: Trace) -> Self {
        Visual::Trace(value)
    }
}

impl From<Histogram> for Visual {
    fn from(value: Histogram) -> Self {
        Visual::Histogram(value)
    }
}

impl From<Text> for Visual {
    fn from(value: Text) -> Self {
        Visual::Text(value)
    }
}

impl From<Image> for Visual {
    fn from(value: Image) -> Self {
        Visual::Image(value)
    }
}

pub type VisualConstructor = fn() -> Visual;

/// Named constructors of visuals.
#[derive(Debug, Clone)]
pub struct VisualRegistry {
    constructors: BTreeMap<Cow<'static, str>, VisualConstructor>,
}

impl Default for VisualRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        registry.register("scatter", || Scatter::default().into());
        registry.register("trace", || Trace::default().into());
        registry.register("histogram", || Histogram::default().into());
        registry.register("text", || Text::default().into());
        registry.register("image", || Image::default().into());
        registry
    }
}

impl VisualRegistry {
    /// Registry containing the constructors of the built-in visuals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor, returning the one previously registered
    /// under the same name.
    pub fn register(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        constructor: VisualConstructor,
    ) -> Option<VisualConstructor> {
        self.constructors.insert(name.into(), constructor)
    }

    pub fn create(&self, name: &str) -> Option<Visual> {
        self.constructors.get(name).map(|constructor| constructor())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(|k| k.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_compare_by_identity() {
        let data: Arc<[f32]> = Arc::from(vec![1.0, 2.0]);
        let same: Arc<[f32]> = Arc::from(vec![1.0, 2.0]);

        let a = SourceRef::new(&data, 0);
        assert!(a.same_as(&SourceRef::new(&data, 0)));
        assert!(!a.same_as(&SourceRef::new(&data, 1)));
        assert!(!a.same_as(&SourceRef::new(&same, 0)));
    }

    #[test]
    fn registry_creates_built_in_visuals() {
        let mut registry = VisualRegistry::new();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["histogram", "image", "scatter", "text", "trace"]
        );
        assert_eq!(registry.create("scatter").map(|v| v.kind()), Some("scatter"));
        assert!(registry.create("waveform").is_none());

        registry.register("waveform", || Trace::default().with_max_vertices(1000).into());
        assert_eq!(registry.create("waveform").map(|v| v.kind()), Some("trace"));
    }

    #[test]
    fn empty_visuals_have_no_bounds() {
        let registry = VisualRegistry::new();
        for name in ["scatter", "trace", "histogram", "text"] {
            let visual = registry.create(name).unwrap();
            assert_eq!(visual.bounds(), None, "{name}");
            assert!(visual.layout().is_empty(), "{name}");
        }
    }
}
