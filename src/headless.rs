//! A recording [`Device`] without any GPU behind it.
//!
//! Buffers are mirrored in host memory and every operation is logged, which
//! makes the device suitable for tests and for running the session without a
//! window.
use std::collections::BTreeMap;

use crate::{
    error::{ResourceError, ShaderCompileError},
    gpu::{
        BufferDescriptor, BufferUsage, Device, DrawCall, FrameDescriptor, ProgramDescriptor,
        RawBufferId, RawProgramId, Viewport,
    },
    shader,
};

/// Default buffer size limit, the minimum guaranteed by WebGPU.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 256 << 20;

/// Operation performed on a [`HeadlessDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    CreateBuffer {
        buffer: RawBufferId,
        label: String,
        size: usize,
    },
    WriteBuffer {
        buffer: RawBufferId,
        offset: usize,
        len: usize,
    },
    DestroyBuffer {
        buffer: RawBufferId,
    },
    CreateProgram {
        program: RawProgramId,
        label: String,
    },
    BeginFrame {
        width: u32,
        height: u32,
    },
    Draw(DrawRecord),
    EndFrame,
}

/// A recorded draw call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub label: String,
    pub program: RawProgramId,
    pub vertex_buffers: Vec<RawBufferId>,
    pub index_buffer: Option<RawBufferId>,
    pub uniform_buffer: RawBufferId,
    pub count: u32,
    pub instance_count: u32,
    pub viewport: Viewport,
}

#[derive(Debug)]
struct HeadlessBuffer {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    next_id: u64,
    max_buffer_size: usize,
    failing_allocations: usize,
    buffers: BTreeMap<RawBufferId, HeadlessBuffer>,
    programs: BTreeMap<RawProgramId, String>,
    commands: Vec<DeviceCommand>,
    in_frame: bool,
    frames: u64,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            failing_allocations: 0,
            buffers: BTreeMap::new(),
            programs: BTreeMap::new(),
            commands: Vec::new(),
            in_frame: false,
            frames: 0,
        }
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Makes the next `count` buffer allocations fail.
    pub fn fail_allocations(&mut self, count: usize) {
        self.failing_allocations = count;
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Contents of a live buffer.
    pub fn buffer_data(&self, buffer: RawBufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    pub fn buffer_label(&self, buffer: RawBufferId) -> Option<&str> {
        self.buffers.get(&buffer).map(|b| b.label.as_str())
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn programs(&self) -> usize {
        self.programs.len()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Draw calls recorded since the commands were last taken.
    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> + '_ {
        self.commands.iter().filter_map(|c| match c {
            DeviceCommand::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    /// Number of writes to a buffer recorded since the commands were last taken.
    pub fn writes_to(&self, buffer: RawBufferId) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::WriteBuffer { buffer: b, .. } if *b == buffer))
            .count()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Device for HeadlessDevice {
    fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor<'_>,
    ) -> Result<RawBufferId, ResourceError> {
        if descriptor.size > self.max_buffer_size {
            return Err(ResourceError::ExceedsLimit {
                label: descriptor.label.to_string(),
                size: descriptor.size,
                limit: self.max_buffer_size,
            });
        }
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            return Err(ResourceError::AllocationFailed {
                label: descriptor.label.to_string(),
                size: descriptor.size,
            });
        }

        let buffer = RawBufferId(self.next_id());
        self.buffers.insert(
            buffer,
            HeadlessBuffer {
                label: descriptor.label.to_string(),
                usage: descriptor.usage,
                data: vec![0; descriptor.size],
            },
        );
        self.commands.push(DeviceCommand::CreateBuffer {
            buffer,
            label: descriptor.label.to_string(),
            size: descriptor.size,
        });

        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: RawBufferId, offset: usize, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer) else {
            panic!("write to unknown buffer {buffer:?}");
        };
        assert!(
            target.usage.contains(BufferUsage::COPY_DST),
            "buffer {:?} is not writable",
            target.label
        );
        assert!(
            offset + data.len() <= target.data.len(),
            "write of {} bytes at {offset} overflows buffer {:?} of {} bytes",
            data.len(),
            target.label,
            target.data.len()
        );

        target.data[offset..offset + data.len()].copy_from_slice(data);
        self.commands.push(DeviceCommand::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
    }

    fn destroy_buffer(&mut self, buffer: RawBufferId) {
        if self.buffers.remove(&buffer).is_none() {
            panic!("destroying unknown buffer {buffer:?}");
        }
        self.commands.push(DeviceCommand::DestroyBuffer { buffer });
    }

    fn create_program(
        &mut self,
        descriptor: &ProgramDescriptor<'_>,
    ) -> Result<RawProgramId, ShaderCompileError> {
        let label = descriptor.label.as_ref();
        shader::check_syntax(label, descriptor.source)?;
        let interface = shader::parse_interface(label, descriptor.source)?;

        for (stage, entry_point) in [
            ("vertex", descriptor.vertex_entry_point),
            ("fragment", descriptor.fragment_entry_point),
        ] {
            if !interface.has_entry_point(stage, entry_point) {
                return Err(ShaderCompileError::Backend {
                    label: label.into(),
                    message: format!("entry point {entry_point:?} not found"),
                });
            }
        }
        for layout in descriptor.vertex_buffers {
            let found = interface
                .attributes
                .iter()
                .any(|a| a.location == layout.location && a.ty == layout.format);
            if !found {
                return Err(ShaderCompileError::Backend {
                    label: label.into(),
                    message: format!(
                        "no attribute of type {} at location {}",
                        layout.format.wgsl_name(),
                        layout.location
                    ),
                });
            }
        }

        let program = RawProgramId(self.next_id());
        self.programs.insert(program, label.into());
        self.commands.push(DeviceCommand::CreateProgram {
            program,
            label: label.into(),
        });

        Ok(program)
    }

    fn begin_frame(&mut self, frame: &FrameDescriptor) -> bool {
        assert!(!self.in_frame, "frame started twice");
        if frame.width == 0 || frame.height == 0 {
            return false;
        }

        self.in_frame = true;
        self.commands.push(DeviceCommand::BeginFrame {
            width: frame.width,
            height: frame.height,
        });
        true
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        assert!(self.in_frame, "draw outside of a frame");
        assert!(
            self.programs.contains_key(&call.program),
            "draw with unknown program {:?}",
            call.program
        );
        let buffers = call
            .vertex_buffers
            .iter()
            .chain(call.index_buffer.iter())
            .chain(std::iter::once(&call.uniform_buffer));
        for buffer in buffers {
            assert!(
                self.buffers.contains_key(buffer),
                "draw {:?} references destroyed buffer {buffer:?}",
                call.label
            );
        }

        self.commands.push(DeviceCommand::Draw(DrawRecord {
            label: call.label.into(),
            program: call.program,
            vertex_buffers: call.vertex_buffers.to_vec(),
            index_buffer: call.index_buffer,
            uniform_buffer: call.uniform_buffer,
            count: call.count,
            instance_count: call.instance_count,
            viewport: call.viewport,
        }));
    }

    fn end_frame(&mut self) {
        assert!(self.in_frame, "frame ended without being started");
        self.in_frame = false;
        self.frames += 1;
        self.commands.push(DeviceCommand::EndFrame);
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn descriptor(size: usize) -> BufferDescriptor<'static> {
        BufferDescriptor {
            label: Cow::Borrowed("test"),
            size,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        }
    }

    #[test]
    fn writes_are_mirrored() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(&descriptor(8)).unwrap();
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(device.buffer_data(buffer), Some(&[0, 0, 0, 0, 1, 2, 3, 4][..]));
        assert_eq!(device.writes_to(buffer), 1);

        device.destroy_buffer(buffer);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn allocation_failures_can_be_injected() {
        let mut device = HeadlessDevice::new().with_max_buffer_size(16);
        assert!(matches!(
            device.create_buffer(&descriptor(32)),
            Err(ResourceError::ExceedsLimit { size: 32, .. })
        ));

        device.fail_allocations(1);
        assert!(matches!(
            device.create_buffer(&descriptor(8)),
            Err(ResourceError::AllocationFailed { .. })
        ));
        assert!(device.create_buffer(&descriptor(8)).is_ok());
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn out_of_bounds_writes_panic() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(&descriptor(4)).unwrap();
        device.write_buffer(buffer, 2, &[0; 4]);
    }
}
