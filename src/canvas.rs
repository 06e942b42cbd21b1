//! The canvas owns the device and composes the visuals of its subplots.
//!
//! Rendering is driven by invalidation: [`Canvas::render`] does nothing unless
//! some event (data update, transform change, resize, ...) was signaled since
//! the previous frame.
use std::{borrow::Cow, collections::BTreeMap};

use tracing::{debug, trace, warn};

use crate::{
    action::{Action, InteractMode, Key, KeyEvent, PointerEvent, WheelEvent},
    buffers::{BufferHandle, BufferSpec, BufferStore},
    cluster::SpikeId,
    colors::Rgba,
    coordinates::{Aabb, DataSpace, Position, ScreenClipTransformer, ScreenSpace},
    error::ShaderCompileError,
    event::Invalidation,
    gpu::{Device, DrawCall, FrameDescriptor, Viewport},
    lasso::Lasso,
    programs::{ProgramHandle, ProgramRegistry, ProgramSignature},
    shader::ShaderSource,
    transform::{SubplotPlacement, TransformChain},
    visual::{Layout, SourceRef, Trace, TraceSegment, Visual},
    wgsl::{AttributeType, Mat3x3, UniformLayout, UniformValue},
};

const LASSO_COLOR: Rgba = Rgba::new(0.9, 0.2, 0.2, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubplotId(usize);

impl SubplotId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VisualId(u64);

/// What [`Canvas::render`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing was invalidated.
    Idle,
    /// The canvas has no area to draw to.
    Suspended,
    Drawn(FrameStats),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub draws: usize,
    /// Visuals not drawn because of a failed program or a missing buffer.
    pub skipped: usize,
    pub uploads: usize,
}

#[derive(Debug)]
struct Subplot {
    chain: TransformChain,
    auto_bounds: bool,
    bounds_dirty: bool,
}

#[derive(Debug)]
struct Binding {
    name: Cow<'static, str>,
    ty: Option<AttributeType>,
    handle: BufferHandle,
    source: Option<SourceRef>,
}

impl Binding {
    fn upload<T: crate::buffers::Scalar>(
        &mut self,
        buffers: &mut BufferStore,
        values: &[T],
        len: usize,
        source: &SourceRef,
    ) {
        if self.source.as_ref().is_some_and(|s| s.same_as(source)) {
            return;
        }

        buffers.update(self.handle, values, 0..len);
        buffers.set_len(self.handle, len);
        self.source = Some(source.clone());
    }
}

/// GPU resources of a visual.
#[derive(Debug)]
struct GpuState {
    attributes: Vec<Binding>,
    indices: Option<Binding>,
    uniforms: BufferHandle,
    uniform_words: Vec<f32>,
    layout_uniforms: Vec<(Cow<'static, str>, UniformValue)>,
    count: u32,
    instance_count: u32,
}

impl GpuState {
    fn allocate(
        buffers: &mut BufferStore,
        kind: &str,
        signature: &ProgramSignature,
        layout: &Layout,
    ) -> Self {
        let attributes = layout
            .attributes
            .iter()
            .map(|a| Binding {
                name: a.name.clone(),
                ty: Some(a.ty),
                handle: buffers.allocate(BufferSpec::vertex(format!("{kind}.{}", a.name), a.ty, 0)),
                source: None,
            })
            .collect();
        let indices = layout.indices.as_ref().map(|_| Binding {
            name: "indices".into(),
            ty: None,
            handle: buffers.allocate(BufferSpec::index(format!("{kind}.indices"), 0)),
            source: None,
        });
        let words = UniformLayout::new(&signature.uniforms).size() / std::mem::size_of::<f32>();

        Self {
            attributes,
            indices,
            uniforms: buffers.allocate(BufferSpec::uniform(format!("{kind}.uniforms"), words)),
            uniform_words: Vec::new(),
            layout_uniforms: Vec::new(),
            count: 0,
            instance_count: 0,
        }
    }

    fn matches(&self, layout: &Layout) -> bool {
        self.attributes.len() == layout.attributes.len()
            && self
                .attributes
                .iter()
                .zip(&layout.attributes)
                .all(|(b, a)| b.name == a.name && b.ty == Some(a.ty))
            && self.indices.is_some() == layout.indices.is_some()
    }

    fn release(self, buffers: &mut BufferStore) {
        for binding in self.attributes.into_iter().chain(self.indices) {
            buffers.release(binding.handle);
        }
        buffers.release(self.uniforms);
    }
}

#[derive(Debug)]
struct VisualSlot {
    subplot: SubplotId,
    visual: Visual,
    signature: ProgramSignature,
    shader: ShaderSource,
    visible: bool,
    overlay: bool,
    layout_dirty: bool,
    program: Option<Result<ProgramHandle, ShaderCompileError>>,
    gpu: Option<GpuState>,
}

impl VisualSlot {
    fn apply_layout(&mut self, buffers: &mut BufferStore) {
        let layout = self.visual.layout();
        if self.gpu.as_ref().is_some_and(|gpu| !gpu.matches(&layout)) {
            if let Some(gpu) = self.gpu.take() {
                gpu.release(buffers);
            }
        }

        let kind = self.visual.kind();
        let signature = &self.signature;
        let gpu = self
            .gpu
            .get_or_insert_with(|| GpuState::allocate(buffers, kind, signature, &layout));

        for (binding, attribute) in gpu.attributes.iter_mut().zip(&layout.attributes) {
            binding.upload(buffers, &attribute.values, attribute.len(), &attribute.source);
        }
        if let (Some(binding), Some(indices)) = (&mut gpu.indices, &layout.indices) {
            binding.upload(buffers, &indices.values, indices.values.len(), &indices.source);
        }
        gpu.layout_uniforms = layout.uniforms;
        gpu.count = layout.count;
        gpu.instance_count = layout.instance_count;
    }
}

fn pack_uniforms(
    layout: &UniformLayout,
    transform: Mat3x3,
    viewport: [f32; 2],
    extra: &[(Cow<'static, str>, UniformValue)],
) -> Vec<f32> {
    let values = layout
        .fields()
        .iter()
        .filter_map(|field| {
            let value = match field.name.as_ref() {
                "u_transform" => Some(UniformValue::Mat3(transform)),
                "u_viewport" => Some(UniformValue::Vec2(viewport)),
                name => extra.iter().find(|(n, _)| n == name).map(|(_, v)| *v),
            };
            value.map(|v| (field.name.as_ref(), v))
        })
        .collect::<Vec<_>>();

    layout.pack(&values)
}

pub struct Canvas<D: Device> {
    device: D,
    buffers: BufferStore,
    programs: ProgramRegistry,
    subplots: Vec<Subplot>,
    visuals: BTreeMap<VisualId, VisualSlot>,
    next_visual: u64,
    width: u32,
    height: u32,
    background: Rgba,
    invalidation: Invalidation,
    mode: InteractMode,
    action: Option<Action>,
    focus: Option<SubplotId>,
    lasso: Option<(SubplotId, Lasso)>,
    lasso_overlay: Option<VisualId>,
}

impl<D: Device> Canvas<D> {
    pub fn new(device: D, width: u32, height: u32) -> Self {
        Self {
            device,
            buffers: BufferStore::new(),
            programs: ProgramRegistry::new(),
            subplots: Vec::new(),
            visuals: BTreeMap::new(),
            next_visual: 0,
            width,
            height,
            background: Rgba::WHITE,
            invalidation: Invalidation::RESIZE,
            mode: InteractMode::default(),
            action: None,
            focus: None,
            lasso: None,
            lasso_overlay: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    pub fn programs(&self) -> &ProgramRegistry {
        &self.programs
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Events signaled since the last frame.
    pub fn invalidation(&self) -> Invalidation {
        self.invalidation
    }

    /// Signals events, returning them for convenience.
    pub fn signal(&mut self, events: Invalidation) -> Invalidation {
        self.invalidation |= events;
        events
    }

    pub fn background(&self) -> Rgba {
        self.background
    }

    pub fn set_background(&mut self, color: Rgba) {
        if color != self.background {
            self.background = color;
            self.signal(Invalidation::BACKGROUND_COLOR_CHANGE);
        }
    }

    fn screen(&self) -> ScreenClipTransformer {
        ScreenClipTransformer::new(self.width as f64, self.height as f64)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }

        self.width = width;
        self.height = height;
        self.signal(Invalidation::RESIZE);
        if width == 0 || height == 0 {
            return;
        }
        for id in 0..self.subplots.len() {
            let viewport = self.subplot_viewport(SubplotId(id));
            self.subplots[id].chain.update_panzoom(|panzoom| {
                panzoom.set_canvas_size(viewport.width as f64, viewport.height as f64)
            });
        }
    }

    /// Adds a subplot whose data bounds follow its visuals.
    pub fn add_subplot(&mut self, placement: SubplotPlacement) -> SubplotId {
        let id = SubplotId(self.subplots.len());
        self.subplots.push(Subplot {
            chain: TransformChain::new(Aabb::unit(), placement),
            auto_bounds: true,
            bounds_dirty: true,
        });
        let viewport = self.subplot_viewport(id);
        self.subplots[id.0].chain.update_panzoom(|panzoom| {
            panzoom.set_canvas_size(viewport.width as f64, viewport.height as f64)
        });
        self.signal(Invalidation::TRANSFORM_CHANGE);
        id
    }

    /// Adds the cells of a `rows x cols` grid in row major order.
    pub fn add_grid(&mut self, shape: (usize, usize), margin: f64) -> Vec<SubplotId> {
        let (rows, cols) = shape;
        (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (row, col)))
            .map(|cell| self.add_subplot(SubplotPlacement::grid(shape, cell, margin)))
            .collect()
    }

    pub fn subplots(&self) -> impl Iterator<Item = SubplotId> {
        (0..self.subplots.len()).map(SubplotId)
    }

    pub fn transform(&self, subplot: SubplotId) -> &TransformChain {
        &self.subplots[subplot.0].chain
    }

    /// Fixes the data bounds of a subplot; `None` makes them follow the
    /// visuals again.
    pub fn set_data_bounds(&mut self, subplot: SubplotId, bounds: Option<Aabb<DataSpace>>) {
        let entry = &mut self.subplots[subplot.0];
        entry.auto_bounds = bounds.is_none();
        entry.bounds_dirty = true;
        if let Some(bounds) = bounds {
            if entry.chain.set_data_bounds(bounds) {
                self.signal(Invalidation::TRANSFORM_CHANGE);
            }
        } else {
            self.signal(Invalidation::TRANSFORM_CHANGE);
        }
    }

    /// Mutates the pan and zoom state of a subplot.
    pub fn update_panzoom(
        &mut self,
        subplot: SubplotId,
        f: impl FnOnce(&mut crate::panzoom::PanZoom),
    ) -> bool {
        let changed = self.subplots[subplot.0].chain.update_panzoom(f);
        if changed {
            self.signal(Invalidation::TRANSFORM_CHANGE);
        }
        changed
    }

    fn insert_visual(
        &mut self,
        subplot: SubplotId,
        visual: Visual,
        shader: Option<ShaderSource>,
        overlay: bool,
    ) -> VisualId {
        assert!(
            subplot.0 < self.subplots.len(),
            "unknown subplot {subplot:?}"
        );

        let id = VisualId(self.next_visual);
        self.next_visual += 1;
        self.visuals.insert(
            id,
            VisualSlot {
                subplot,
                signature: visual.signature(),
                shader: shader.unwrap_or_else(|| visual.default_shader()),
                visual,
                visible: true,
                overlay,
                layout_dirty: true,
                program: None,
                gpu: None,
            },
        );
        self.subplots[subplot.0].bounds_dirty = true;
        self.signal(Invalidation::VISUAL_ADDITION);
        id
    }

    pub fn add_visual(&mut self, subplot: SubplotId, visual: impl Into<Visual>) -> VisualId {
        self.insert_visual(subplot, visual.into(), None, false)
    }

    /// Adds a visual drawn with a custom program.
    ///
    /// A source that fails to compile only disables this visual.
    pub fn add_visual_with_shader(
        &mut self,
        subplot: SubplotId,
        visual: impl Into<Visual>,
        shader: ShaderSource,
    ) -> VisualId {
        self.insert_visual(subplot, visual.into(), Some(shader), false)
    }

    fn slot(&self, id: VisualId) -> &VisualSlot {
        self.visuals
            .get(&id)
            .unwrap_or_else(|| panic!("unknown visual {id:?}"))
    }

    fn slot_mut(&mut self, id: VisualId) -> &mut VisualSlot {
        self.visuals
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown visual {id:?}"))
    }

    pub fn visual(&self, id: VisualId) -> &Visual {
        &self.slot(id).visual
    }

    pub fn contains_visual(&self, id: VisualId) -> bool {
        self.visuals.contains_key(&id)
    }

    /// Replaces the data of a visual; only the attributes whose source changed
    /// are uploaded again.
    pub fn set_visual(&mut self, id: VisualId, visual: impl Into<Visual>) {
        let visual = visual.into();
        let slot = self.slot_mut(id);
        let signature = visual.signature();
        if signature != slot.signature {
            slot.signature = signature;
            if slot.shader.origin == crate::shader::ProgramOrigin::BuiltIn {
                slot.shader = visual.default_shader();
            }
            slot.program = None;
        }
        slot.visual = visual;
        slot.layout_dirty = true;
        let subplot = slot.subplot;
        self.subplots[subplot.0].bounds_dirty = true;
        self.signal(Invalidation::DATA_UPDATE);
    }

    pub fn set_visible(&mut self, id: VisualId, visible: bool) {
        let slot = self.slot_mut(id);
        if slot.visible != visible {
            slot.visible = visible;
            self.signal(Invalidation::VISUAL_CONFIG_CHANGE);
        }
    }

    pub fn remove_visual(&mut self, id: VisualId) -> Visual {
        let slot = self
            .visuals
            .remove(&id)
            .unwrap_or_else(|| panic!("unknown visual {id:?}"));
        if let Some(gpu) = slot.gpu {
            gpu.release(&mut self.buffers);
        }
        self.subplots[slot.subplot.0].bounds_dirty = true;
        self.signal(Invalidation::VISUAL_REMOVAL);
        slot.visual
    }

    /// Visuals of a subplot in drawing order.
    pub fn visuals(&self, subplot: SubplotId) -> impl Iterator<Item = VisualId> + '_ {
        self.visuals
            .iter()
            .filter(move |(_, slot)| slot.subplot == subplot && !slot.overlay)
            .map(|(id, _)| *id)
    }

    /// Compile error of a visual with a broken custom program.
    pub fn program_error(&self, id: VisualId) -> Option<&ShaderCompileError> {
        match &self.slot(id).program {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    /// Pixel rectangle covered by a subplot.
    pub fn subplot_viewport(&self, subplot: SubplotId) -> Viewport {
        let screen = self.screen();
        let rect = self.subplots[subplot.0].chain.placement().rect();
        let rect = Aabb::<ScreenSpace>::new(
            rect.start().transform(&screen),
            rect.end().transform(&screen),
        );
        let size = rect.size();
        Viewport {
            x: rect.start().x as f32,
            y: rect.start().y as f32,
            width: size.x as f32,
            height: size.y as f32,
        }
    }

    /// Topmost subplot under a screen position.
    pub fn subplot_at(&self, position: Position<ScreenSpace>) -> Option<SubplotId> {
        let position = position.transform(&self.screen());
        (0..self.subplots.len())
            .rev()
            .find(|i| self.subplots[*i].chain.contains(position))
            .map(SubplotId)
    }

    pub fn mode(&self) -> InteractMode {
        self.mode
    }

    /// Switches the interaction mode; an interaction in progress is cancelled
    /// before the switch.
    pub fn set_mode(&mut self, mode: InteractMode) -> Invalidation {
        let mut invalidation = self.cancel_action();
        if mode != self.mode {
            self.mode = mode;
            invalidation |= Invalidation::MODE_CHANGE;
        }
        self.signal(invalidation)
    }

    fn cancel_action(&mut self) -> Invalidation {
        let Some(action) = self.action.take() else {
            return Invalidation::NONE;
        };

        let subplot = action.subplot();
        let lasso = action.mode() == InteractMode::Lasso;
        let invalidation = action.cancel(&mut self.subplots[subplot].chain);
        if lasso {
            self.sync_lasso_overlay();
        }
        invalidation
    }

    pub fn pointer_down(&mut self, event: &PointerEvent) -> Invalidation {
        let mut invalidation = self.cancel_action();
        let Some(subplot) = self.subplot_at(event.position) else {
            return self.signal(invalidation);
        };

        self.focus = Some(subplot);
        if self.mode == InteractMode::Lasso && self.lasso.take().is_some() {
            invalidation |= Invalidation::LASSO_CHANGE;
        }
        let screen = self.screen();
        self.action = Some(Action::new(
            self.mode,
            subplot.0,
            event,
            &self.subplots[subplot.0].chain,
            &screen,
        ));
        if self.mode == InteractMode::Lasso {
            self.sync_lasso_overlay();
        }

        self.signal(invalidation)
    }

    pub fn pointer_move(&mut self, event: &PointerEvent) -> Invalidation {
        let screen = self.screen();
        let Some(action) = &mut self.action else {
            return Invalidation::NONE;
        };

        let invalidation = action.update(event, &mut self.subplots[action.subplot()].chain, &screen);
        if invalidation.signaled(Invalidation::LASSO_CHANGE) {
            self.sync_lasso_overlay();
        }
        self.signal(invalidation)
    }

    pub fn pointer_up(&mut self, event: &PointerEvent) -> Invalidation {
        let mut invalidation = self.pointer_move(event);
        if let Some(action) = self.action.take() {
            let subplot = SubplotId(action.subplot());
            let finished = action.finish();
            invalidation |= finished.invalidation;
            if let Some(lasso) = finished.lasso {
                self.lasso = Some((subplot, lasso));
            }
            if finished.invalidation.signaled(Invalidation::LASSO_CHANGE) {
                self.sync_lasso_overlay();
            }
        }

        self.signal(invalidation)
    }

    pub fn wheel(&mut self, event: &WheelEvent) -> Invalidation {
        let Some(subplot) = self.subplot_at(event.position) else {
            return Invalidation::NONE;
        };
        self.focus = Some(subplot);

        let position = event.position.transform(&self.screen());
        let pointer = self.subplots[subplot.0].chain.clip_to_view(position);
        if self.update_panzoom(subplot, |panzoom| panzoom.wheel(event.delta, pointer)) {
            Invalidation::TRANSFORM_CHANGE
        } else {
            Invalidation::NONE
        }
    }

    /// Handles keyboard shortcuts; `Escape` cancels the interaction and
    /// clears the lasso, other keys pan and zoom the focused subplot.
    pub fn key(&mut self, event: &KeyEvent) -> Invalidation {
        if event.key == Key::Escape {
            let mut invalidation = self.cancel_action();
            if self.clear_lasso() {
                invalidation |= Invalidation::LASSO_CHANGE;
            }
            return self.signal(invalidation);
        }

        let Some(subplot) = self.focus.or_else(|| self.subplots().next()) else {
            return Invalidation::NONE;
        };
        if self.update_panzoom(subplot, |panzoom| {
            panzoom.key(event.key);
        }) {
            Invalidation::TRANSFORM_CHANGE
        } else {
            Invalidation::NONE
        }
    }

    /// The completed lasso, if any.
    pub fn lasso(&self) -> Option<(SubplotId, &Lasso)> {
        self.lasso.as_ref().map(|(subplot, lasso)| (*subplot, lasso))
    }

    pub fn clear_lasso(&mut self) -> bool {
        if self.lasso.take().is_none() {
            return false;
        }

        self.sync_lasso_overlay();
        self.signal(Invalidation::LASSO_CHANGE);
        true
    }

    /// Spikes of the scatter visuals of the lasso subplot that lie inside the
    /// lasso, in ascending order.
    pub fn spikes_in_lasso(&self) -> Vec<SpikeId> {
        let Some((subplot, lasso)) = &self.lasso else {
            return Vec::new();
        };

        let mut spikes = self
            .visuals
            .values()
            .filter(|slot| slot.subplot == *subplot && !slot.overlay)
            .filter_map(|slot| match &slot.visual {
                Visual::Scatter(scatter) => Some(scatter),
                _ => None,
            })
            .flat_map(|scatter| scatter.spikes_where(|p| lasso.contains(p)))
            .collect::<Vec<_>>();
        spikes.sort_unstable();
        spikes.dedup();
        spikes
    }

    /// Mirrors the lasso being drawn, or the completed one, in an overlay.
    fn sync_lasso_overlay(&mut self) {
        let current = match &self.action {
            Some(action) => action
                .lasso()
                .map(|lasso| (SubplotId(action.subplot()), lasso)),
            None => None,
        }
        .or_else(|| self.lasso.as_ref().map(|(s, l)| (*s, l)));

        let polyline = current.and_then(|(subplot, lasso)| {
            let points = lasso.points();
            let closed = points.iter().chain(points.first().filter(|_| lasso.is_closed()));
            let xs = closed.clone().map(|p| p.x).collect::<Vec<_>>();
            let ys = closed.map(|p| p.y as f32).collect::<Vec<_>>();
            let segment = TraceSegment::polyline(xs, ys).ok()?.with_color(LASSO_COLOR);
            Some((subplot, Trace::new(vec![segment])))
        });

        match (polyline, self.lasso_overlay) {
            (Some((subplot, trace)), Some(id)) if self.slot(id).subplot == subplot => {
                self.set_visual(id, trace);
            }
            (polyline, overlay) => {
                if let Some(id) = overlay {
                    self.remove_visual(id);
                    self.lasso_overlay = None;
                }
                if let Some((subplot, trace)) = polyline {
                    self.lasso_overlay = Some(self.insert_visual(subplot, trace.into(), None, true));
                }
            }
        }
    }

    fn update_bounds(&mut self) {
        for (index, subplot) in self.subplots.iter_mut().enumerate() {
            if !std::mem::take(&mut subplot.bounds_dirty) || !subplot.auto_bounds {
                continue;
            }

            let bounds = self
                .visuals
                .values()
                .filter(|slot| slot.subplot.0 == index && !slot.overlay)
                .filter_map(|slot| slot.visual.bounds())
                .reduce(|a, b| a.union(&b));
            if let Some(bounds) = bounds {
                if subplot.chain.set_data_bounds(bounds) {
                    self.invalidation |= Invalidation::TRANSFORM_CHANGE;
                }
            }
        }
    }

    /// Draws a frame if anything was invalidated since the last one.
    pub fn render(&mut self) -> FrameOutcome {
        if self.invalidation.is_empty() {
            return FrameOutcome::Idle;
        }
        self.invalidation.clear();
        self.update_bounds();

        for slot in self.visuals.values_mut() {
            if std::mem::take(&mut slot.layout_dirty) {
                slot.apply_layout(&mut self.buffers);
            }
            if slot.program.is_none() {
                slot.program = Some(self.programs.get_or_compile(
                    &mut self.device,
                    &slot.signature,
                    &slot.shader,
                ));
            }
        }

        let viewport = [self.width as f32, self.height as f32];
        for slot in self.visuals.values_mut() {
            let (Some(Ok(program)), Some(gpu)) = (&slot.program, &mut slot.gpu) else {
                continue;
            };
            let layout = &self.programs.program(*program).uniform_layout;
            let transform = self.subplots[slot.subplot.0].chain.forward_matrix().to_mat3();
            let words = pack_uniforms(layout, transform, viewport, &gpu.layout_uniforms);
            if words != gpu.uniform_words {
                self.buffers.update(gpu.uniforms, &words, 0..words.len());
                gpu.uniform_words = words;
            }
        }

        let report = self.buffers.flush(&mut self.device);
        if report.allocations != 0 {
            debug!("{} buffer allocations, {} bytes uploaded", report.allocations, report.bytes);
        }
        let frame = FrameDescriptor {
            clear_color: self.background.to_array(),
            width: self.width,
            height: self.height,
        };
        if !self.device.begin_frame(&frame) {
            return FrameOutcome::Suspended;
        }

        let mut stats = FrameStats {
            uploads: report.uploads,
            ..Default::default()
        };
        for slot in self.visuals.values() {
            if !slot.visible {
                continue;
            }
            let Some(gpu) = &slot.gpu else {
                continue;
            };
            if gpu.count == 0 || gpu.instance_count == 0 {
                continue;
            }
            let Some(Ok(program)) = &slot.program else {
                trace!("{} visual has no program, skipping", slot.visual.kind());
                stats.skipped += 1;
                continue;
            };
            let program = self.programs.program(*program);

            let mut resident = true;
            let mut vertex_buffers = Vec::with_capacity(program.signature.attributes.len());
            for attribute in &program.signature.attributes {
                let Some(binding) = gpu.attributes.iter().find(|b| b.name == attribute.name) else {
                    panic!(
                        "{} visual does not provide attribute {:?}",
                        slot.visual.kind(),
                        attribute.name
                    );
                };
                match self.buffers.binding(binding.handle) {
                    Some(buffer) => vertex_buffers.push(buffer.raw),
                    None => resident = false,
                }
            }
            let index_buffer = match &gpu.indices {
                Some(binding) => match self.buffers.binding(binding.handle) {
                    Some(buffer) => Some(buffer.raw),
                    None => {
                        resident = false;
                        None
                    }
                },
                None => None,
            };
            let (true, Some(uniform_buffer)) = (resident, self.buffers.binding(gpu.uniforms))
            else {
                warn!(
                    "{} visual is missing a gpu buffer, skipping until the next invalidation",
                    slot.visual.kind()
                );
                stats.skipped += 1;
                continue;
            };

            let viewport = self.subplot_viewport(slot.subplot);
            self.device.draw(&DrawCall {
                label: slot.visual.kind(),
                program: program.raw,
                vertex_buffers: &vertex_buffers,
                index_buffer,
                uniform_buffer: uniform_buffer.raw,
                count: gpu.count,
                instance_count: gpu.instance_count,
                viewport,
            });
            stats.draws += 1;
        }
        self.device.end_frame();

        FrameOutcome::Drawn(stats)
    }

    /// Releases every GPU resource and returns the device.
    pub fn into_device(mut self) -> D {
        self.buffers.destroy_all(&mut self.device);
        self.device
    }
}

impl<D: Device + std::fmt::Debug> std::fmt::Debug for Canvas<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("device", &self.device)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("subplots", &self.subplots.len())
            .field("visuals", &self.visuals.len())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action::PointerButton,
        headless::{DeviceCommand, HeadlessDevice},
        visual::Scatter,
    };

    fn canvas() -> (Canvas<HeadlessDevice>, SubplotId) {
        let mut canvas = Canvas::new(HeadlessDevice::new(), 100, 100);
        let subplot = canvas.add_subplot(SubplotPlacement::full());
        canvas.set_data_bounds(subplot, Some(Aabb::unit()));
        (canvas, subplot)
    }

    fn writes(canvas: &mut Canvas<HeadlessDevice>) -> usize {
        canvas
            .device_mut()
            .take_commands()
            .iter()
            .filter(|c| matches!(c, DeviceCommand::WriteBuffer { .. }))
            .count()
    }

    fn drawn(outcome: FrameOutcome) -> FrameStats {
        match outcome {
            FrameOutcome::Drawn(stats) => stats,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn frames_are_only_drawn_when_invalidated() {
        let (mut canvas, subplot) = canvas();
        canvas.add_visual(subplot, Scatter::new(vec![[0.0, 0.0], [0.5, 0.5]]));

        let stats = drawn(canvas.render());
        assert_eq!(stats.draws, 1);
        assert_eq!(canvas.device().frames(), 1);
        assert_eq!(canvas.render(), FrameOutcome::Idle);
        assert_eq!(canvas.device().frames(), 1);

        canvas.set_background(Rgba::BLACK);
        drawn(canvas.render());
        assert_eq!(canvas.device().frames(), 2);
    }

    #[test]
    fn panning_only_rewrites_uniforms() {
        let (mut canvas, subplot) = canvas();
        canvas.add_visual(subplot, Scatter::new(vec![[0.0, 0.0], [0.5, 0.5]]));
        drawn(canvas.render());
        canvas.device_mut().take_commands();

        assert!(canvas.update_panzoom(subplot, |panzoom| panzoom.set_pan([0.25, 0.0])));
        drawn(canvas.render());
        assert_eq!(writes(&mut canvas), 1);
    }

    #[test]
    fn unchanged_attributes_are_not_uploaded_again() {
        let (mut canvas, subplot) = canvas();
        let scatter = Scatter::new(vec![[0.0, 0.0], [0.5, 0.5]]);
        let id = canvas.add_visual(subplot, scatter.clone());
        drawn(canvas.render());
        canvas.device_mut().take_commands();

        // Two updates before a frame are coalesced; only the colors changed.
        canvas.set_visual(id, scatter.clone().with_color(Rgba::WHITE));
        canvas.set_visual(id, scatter.with_color(Rgba::BLACK.with_alpha(0.5)));
        drawn(canvas.render());
        assert_eq!(writes(&mut canvas), 1);
    }

    #[test]
    fn broken_custom_programs_only_disable_their_visual() {
        let (mut canvas, subplot) = canvas();
        let broken = canvas.add_visual_with_shader(
            subplot,
            Scatter::new(vec![[0.0, 0.0]]),
            ShaderSource::dynamic("broken", "fn vertex_main( {"),
        );
        canvas.add_visual(subplot, Scatter::new(vec![[0.5, 0.5]]));

        let stats = drawn(canvas.render());
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.skipped, 1);
        assert!(canvas.program_error(broken).is_some());
    }

    #[test]
    fn failed_allocations_are_retried_on_the_next_frame() {
        let (mut canvas, subplot) = canvas();
        canvas.add_visual(subplot, Scatter::new(vec![[0.0, 0.0]]));
        canvas.device_mut().fail_allocations(1);

        let stats = drawn(canvas.render());
        assert_eq!((stats.draws, stats.skipped), (0, 1));

        canvas.signal(Invalidation::RESOURCE_RETRY);
        let stats = drawn(canvas.render());
        assert_eq!((stats.draws, stats.skipped), (1, 0));
    }

    #[test]
    fn empty_canvases_are_suspended() {
        let (mut canvas, subplot) = canvas();
        canvas.add_visual(subplot, Scatter::new(vec![[0.0, 0.0]]));
        canvas.resize(0, 100);
        assert_eq!(canvas.render(), FrameOutcome::Suspended);

        canvas.resize(50, 100);
        assert_eq!(drawn(canvas.render()).draws, 1);
    }

    #[test]
    fn removed_visuals_release_their_buffers() {
        let (mut canvas, subplot) = canvas();
        let id = canvas.add_visual(subplot, Scatter::new(vec![[0.0, 0.0]]));
        drawn(canvas.render());
        assert_eq!(canvas.device().live_buffers(), 4);

        canvas.remove_visual(id);
        assert_eq!(drawn(canvas.render()).draws, 0);
        assert_eq!(canvas.device().live_buffers(), 0);
    }

    #[test]
    fn switching_modes_cancels_the_interaction() {
        let (mut canvas, subplot) = canvas();
        let initial = *canvas.transform(subplot).panzoom();

        canvas.pointer_down(&PointerEvent::new(50.0, 50.0));
        let moved = canvas.pointer_move(&PointerEvent::new(70.0, 50.0));
        assert!(moved.signaled(Invalidation::TRANSFORM_CHANGE));
        assert_ne!(*canvas.transform(subplot).panzoom(), initial);

        let switched = canvas.set_mode(InteractMode::Lasso);
        assert!(switched.signaled(Invalidation::MODE_CHANGE));
        assert_eq!(*canvas.transform(subplot).panzoom(), initial);

        // The release of the cancelled drag is ignored.
        assert!(canvas.pointer_up(&PointerEvent::new(90.0, 50.0)).is_empty());
        assert_eq!(*canvas.transform(subplot).panzoom(), initial);
    }

    #[test]
    fn lassos_select_the_enclosed_spikes() {
        let (mut canvas, subplot) = canvas();
        canvas.add_visual(
            subplot,
            Scatter::new(vec![[0.0, 0.0], [0.9, 0.9], [-0.1, 0.2]])
                .with_spike_ids(vec![SpikeId(10), SpikeId(11), SpikeId(12)]),
        );
        canvas.set_mode(InteractMode::Lasso);

        let event = |x, y| PointerEvent::new(x, y).with_button(PointerButton::Primary);
        canvas.pointer_down(&event(25.0, 25.0));
        canvas.pointer_move(&event(75.0, 25.0));
        canvas.pointer_move(&event(75.0, 75.0));
        let released = canvas.pointer_up(&event(25.0, 75.0));
        assert!(released.signaled(Invalidation::LASSO_CHANGE));

        assert_eq!(canvas.lasso().map(|(s, _)| s), Some(subplot));
        assert_eq!(canvas.spikes_in_lasso(), vec![SpikeId(10), SpikeId(12)]);
        // The overlay is drawn on top of the scatter.
        assert_eq!(drawn(canvas.render()).draws, 2);

        canvas.key(&KeyEvent::new(Key::Escape));
        assert!(canvas.lasso().is_none());
        assert!(canvas.spikes_in_lasso().is_empty());
        assert_eq!(drawn(canvas.render()).draws, 1);
    }

    #[test]
    fn subplots_are_found_under_the_pointer() {
        let mut canvas = Canvas::new(HeadlessDevice::new(), 200, 100);
        let cells = canvas.add_grid((1, 2), 0.0);
        assert_eq!(canvas.subplot_at(Position::new((10.0, 50.0))), Some(cells[0]));
        assert_eq!(canvas.subplot_at(Position::new((190.0, 50.0))), Some(cells[1]));

        let viewport = canvas.subplot_viewport(cells[1]);
        assert!((viewport.x - 100.0).abs() < 1e-3);
        assert!((viewport.width - 100.0).abs() < 1e-3);
    }

    #[test]
    fn bounds_follow_the_visuals() {
        let mut canvas = Canvas::new(HeadlessDevice::new(), 100, 100);
        let subplot = canvas.add_subplot(SubplotPlacement::full());
        canvas.add_visual(subplot, Scatter::new(vec![[2.0, 4.0], [6.0, 8.0]]));
        drawn(canvas.render());

        let bounds = canvas.transform(subplot).normalize().bounds();
        assert_eq!(bounds.start(), Position::new((2.0, 4.0)));
        assert_eq!(bounds.end(), Position::new((6.0, 8.0)));
    }
}
