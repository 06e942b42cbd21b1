//! WebGPU implementation of [`Device`], drawing into an html canvas.
//!
//! Descriptors are built as plain javascript objects, which keeps the
//! backend independent of the dictionary builders of the `web_sys` version.
use std::collections::HashMap;

use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::{
    error::{ResourceError, ShaderCompileError},
    gpu::{
        BufferDescriptor, Device, DrawCall, FrameDescriptor, PrimitiveTopology, ProgramDescriptor,
        RawBufferId, RawProgramId, VertexStepMode,
    },
    wgsl::AttributeType,
};

/// Custom bindings to avoid using fallible `Reflect` for plain objects.
#[wasm_bindgen]
extern "C" {
    type ObjectExt;

    #[wasm_bindgen(method, indexing_setter)]
    fn set(this: &ObjectExt, key: js_sys::JsString, value: JsValue);
}

fn object(entries: &[(&str, JsValue)]) -> js_sys::Object {
    let object = js_sys::Object::new().unchecked_into::<ObjectExt>();
    for (key, value) in entries {
        object.set((*key).into(), value.clone());
    }
    object.unchecked_into::<js_sys::Object>()
}

fn array(values: impl IntoIterator<Item = impl Into<JsValue>>) -> JsValue {
    js_sys::Array::from_iter(values.into_iter().map(Into::into)).into()
}

fn topology_name(topology: PrimitiveTopology) -> &'static str {
    match topology {
        PrimitiveTopology::PointList => "point-list",
        PrimitiveTopology::LineList => "line-list",
        PrimitiveTopology::LineStrip => "line-strip",
        PrimitiveTopology::TriangleList => "triangle-list",
        PrimitiveTopology::TriangleStrip => "triangle-strip",
    }
}

fn vertex_format_name(format: AttributeType) -> &'static str {
    match format {
        AttributeType::F32 => "float32",
        AttributeType::Vec2F32 => "float32x2",
        AttributeType::Vec3F32 => "float32x3",
        AttributeType::Vec4F32 => "float32x4",
    }
}

fn step_mode_name(step_mode: VertexStepMode) -> &'static str {
    match step_mode {
        VertexStepMode::Vertex => "vertex",
        VertexStepMode::Instance => "instance",
    }
}

fn js_message(value: &JsValue) -> String {
    value
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()))
        .or_else(|| value.as_string())
        .unwrap_or_else(|| format!("{value:?}"))
}

#[derive(Debug)]
struct Program {
    pipeline: web_sys::GpuRenderPipeline,
    layout: web_sys::GpuBindGroupLayout,
}

#[derive(Debug)]
struct Frame {
    encoder: web_sys::GpuCommandEncoder,
    pass: web_sys::GpuRenderPassEncoder,
}

/// A [`web_sys::GpuDevice`] rendering into a canvas.
#[derive(Debug)]
pub struct WebGpuDevice {
    device: web_sys::GpuDevice,
    queue: web_sys::GpuQueue,
    canvas: web_sys::HtmlCanvasElement,
    context: web_sys::GpuCanvasContext,
    format: web_sys::GpuTextureFormat,
    buffers: HashMap<RawBufferId, web_sys::GpuBuffer>,
    programs: HashMap<RawProgramId, Program>,
    bind_groups: HashMap<(RawProgramId, RawBufferId), web_sys::GpuBindGroup>,
    frame: Option<Frame>,
    next_id: u64,
}

impl WebGpuDevice {
    /// Requests a device of the default adapter and configures the canvas.
    pub async fn request(canvas: web_sys::HtmlCanvasElement) -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let gpu = window.navigator().gpu();
        if gpu.is_falsy() {
            return Err("WebGPU is not supported in the current browser".into());
        }

        let adapter = JsFuture::from(gpu.request_adapter()).await?;
        if adapter.is_falsy() {
            return Err("could not request a gpu adapter".into());
        }
        let adapter = adapter.unchecked_into::<web_sys::GpuAdapter>();

        let device = JsFuture::from(adapter.request_device()).await?;
        if device.is_falsy() {
            return Err("could not request a gpu device".into());
        }
        let device = device.unchecked_into::<web_sys::GpuDevice>();

        let context = canvas
            .get_context("webgpu")?
            .ok_or_else(|| JsValue::from_str("the canvas has no webgpu context"))?
            .dyn_into::<web_sys::GpuCanvasContext>()?;
        let format = gpu.get_preferred_canvas_format();
        let configuration = object(&[
            ("device", device.clone().into()),
            ("format", format.into()),
            ("alphaMode", "premultiplied".into()),
        ]);
        context.configure(configuration.unchecked_ref())?;

        Ok(Self {
            queue: device.queue(),
            device,
            canvas,
            context,
            format,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            bind_groups: HashMap::new(),
            frame: None,
            next_id: 0,
        })
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn begin_pass(&self, frame: &FrameDescriptor) -> Result<Frame, JsValue> {
        let view = self.context.get_current_texture()?.create_view()?;
        let [r, g, b, a] = frame.clear_color.map(f64::from);
        let attachment = object(&[
            ("view", view.into()),
            ("loadOp", "clear".into()),
            ("storeOp", "store".into()),
            (
                "clearValue",
                object(&[("r", r.into()), ("g", g.into()), ("b", b.into()), ("a", a.into())]).into(),
            ),
        ]);
        let descriptor = object(&[
            ("label", "frame".into()),
            ("colorAttachments", array([attachment])),
        ]);

        let encoder = self.device.create_command_encoder();
        let pass = encoder.begin_render_pass(descriptor.unchecked_ref())?;
        Ok(Frame { encoder, pass })
    }

    /// Reports the compilation messages of a module once they are available.
    fn log_compilation_info(module: &web_sys::GpuShaderModule, label: String) {
        let info = module.get_compilation_info();
        wasm_bindgen_futures::spawn_local(async move {
            let Ok(info) = JsFuture::from(info).await else {
                return;
            };
            let info = info.unchecked_into::<web_sys::GpuCompilationInfo>();
            for message in info.messages().iter() {
                let message = message.unchecked_into::<web_sys::GpuCompilationMessage>();
                tracing::warn!(
                    "{label}:{}:{}: {}",
                    message.line_num(),
                    message.line_pos(),
                    message.message()
                );
            }
        });
    }
}

impl Device for WebGpuDevice {
    fn max_buffer_size(&self) -> usize {
        self.device.limits().max_buffer_size() as usize
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor<'_>) -> Result<RawBufferId, ResourceError> {
        // WebGPU requires buffer sizes, and writes, to be multiples of 4.
        let size = descriptor.size.max(4).next_multiple_of(4);
        let raw = object(&[
            ("label", descriptor.label.as_ref().into()),
            ("size", (size as f64).into()),
            ("usage", descriptor.usage.bits().into()),
        ]);

        let buffer = self
            .device
            .create_buffer(raw.unchecked_ref())
            .map_err(|err| {
                tracing::warn!("{}: {}", descriptor.label, js_message(&err));
                ResourceError::AllocationFailed {
                    label: descriptor.label.to_string(),
                    size,
                }
            })?;

        let id = RawBufferId(self.next_id());
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: RawBufferId, offset: usize, data: &[u8]) {
        let Some(raw) = self.buffers.get(&buffer) else {
            panic!("write to unknown buffer {buffer:?}");
        };
        let offset = u32::try_from(offset).expect("buffer offsets fit in u32");
        if let Err(err) = self
            .queue
            .write_buffer_with_u32_and_u8_array(raw, offset, data)
        {
            tracing::warn!("write to buffer {buffer:?} failed: {}", js_message(&err));
        }
    }

    fn destroy_buffer(&mut self, buffer: RawBufferId) {
        if let Some(raw) = self.buffers.remove(&buffer) {
            raw.destroy();
        }
        self.bind_groups.retain(|(_, uniforms), _| *uniforms != buffer);
    }

    fn create_program(
        &mut self,
        descriptor: &ProgramDescriptor<'_>,
    ) -> Result<RawProgramId, ShaderCompileError> {
        let module = self.device.create_shader_module(
            object(&[
                ("label", descriptor.label.as_ref().into()),
                ("code", descriptor.source.into()),
            ])
            .unchecked_ref(),
        );
        Self::log_compilation_info(&module, descriptor.label.to_string());

        let buffers = descriptor.vertex_buffers.iter().map(|layout| {
            let attribute = object(&[
                ("format", vertex_format_name(layout.format).into()),
                ("offset", 0.into()),
                ("shaderLocation", layout.location.into()),
            ]);
            object(&[
                ("arrayStride", (layout.format.size() as u32).into()),
                ("stepMode", step_mode_name(layout.step_mode).into()),
                ("attributes", array([attribute])),
            ])
        });
        let vertex = object(&[
            ("module", module.clone().into()),
            ("entryPoint", descriptor.vertex_entry_point.into()),
            ("buffers", array(buffers)),
        ]);

        let blend_component = || {
            object(&[
                ("srcFactor", "src-alpha".into()),
                ("dstFactor", "one-minus-src-alpha".into()),
                ("operation", "add".into()),
            ])
        };
        let target = object(&[
            ("format", self.format.into()),
            (
                "blend",
                object(&[
                    ("color", blend_component().into()),
                    ("alpha", blend_component().into()),
                ])
                .into(),
            ),
        ]);
        let fragment = object(&[
            ("module", module.into()),
            ("entryPoint", descriptor.fragment_entry_point.into()),
            ("targets", array([target])),
        ]);

        let mut primitive = vec![("topology", topology_name(descriptor.topology).into())];
        if descriptor.topology.is_strip() {
            primitive.push(("stripIndexFormat", "uint32".into()));
        }
        let pipeline = object(&[
            ("label", descriptor.label.as_ref().into()),
            ("layout", "auto".into()),
            ("vertex", vertex.into()),
            ("fragment", fragment.into()),
            ("primitive", object(&primitive).into()),
        ]);

        let pipeline = self
            .device
            .create_render_pipeline(pipeline.unchecked_ref())
            .map_err(|err| ShaderCompileError::Backend {
                label: descriptor.label.to_string(),
                message: js_message(&err),
            })?;
        let layout = pipeline.get_bind_group_layout(0);

        let id = RawProgramId(self.next_id());
        self.programs.insert(id, Program { pipeline, layout });
        Ok(id)
    }

    fn begin_frame(&mut self, frame: &FrameDescriptor) -> bool {
        if frame.width == 0 || frame.height == 0 {
            return false;
        }
        if self.canvas.width() != frame.width || self.canvas.height() != frame.height {
            self.canvas.set_width(frame.width);
            self.canvas.set_height(frame.height);
        }

        match self.begin_pass(frame) {
            Ok(pass) => {
                self.frame = Some(pass);
                true
            }
            Err(err) => {
                tracing::warn!("could not begin a frame: {}", js_message(&err));
                false
            }
        }
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        let Some(program) = self.programs.get(&call.program) else {
            panic!("draw with unknown program {:?}", call.program);
        };
        let buffer = |id: &RawBufferId| {
            self.buffers
                .get(id)
                .unwrap_or_else(|| panic!("draw with unknown buffer {id:?}"))
        };

        let bind_group = self
            .bind_groups
            .entry((call.program, call.uniform_buffer))
            .or_insert_with(|| {
                let uniforms = &self.buffers[&call.uniform_buffer];
                let entry = object(&[
                    ("binding", 0.into()),
                    ("resource", object(&[("buffer", uniforms.clone().into())]).into()),
                ]);
                let descriptor = object(&[
                    ("layout", program.layout.clone().into()),
                    ("entries", array([entry])),
                ]);
                self.device.create_bind_group(descriptor.unchecked_ref())
            })
            .clone();

        let Some(frame) = &self.frame else {
            panic!("draw outside of a frame");
        };
        let pass = &frame.pass;
        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, Some(&bind_group));
        for (slot, id) in call.vertex_buffers.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, Some(buffer(id)));
        }

        let viewport = call.viewport;
        pass.set_scissor_rect(
            viewport.x.max(0.0) as u32,
            viewport.y.max(0.0) as u32,
            viewport.width.max(0.0) as u32,
            viewport.height.max(0.0) as u32,
        );

        match call.index_buffer {
            Some(indices) => {
                pass.set_index_buffer(buffer(&indices), web_sys::GpuIndexFormat::Uint32);
                pass.draw_indexed_with_instance_count(call.count, call.instance_count);
            }
            None => pass.draw_with_instance_count(call.count, call.instance_count),
        }
    }

    fn end_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        frame.pass.end();
        self.queue.submit(&array([frame.encoder.finish()]));
    }
}
