//! GPU resident buffers.
//!
//! The store keeps a host mirror of every buffer. Updates only touch the
//! mirror and widen a pending dirty range; [`BufferStore::flush`] uploads the
//! union of all pending ranges of a buffer with a single write.
use std::{borrow::Cow, ops::Range};

use crate::{
    error::ResourceError,
    gpu::{BufferDescriptor, BufferUsage, Device, RawBufferId},
    wgsl::AttributeType,
};

/// Role of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

impl BufferKind {
    fn usage(self) -> BufferUsage {
        let usage = match self {
            BufferKind::Vertex => BufferUsage::VERTEX,
            BufferKind::Index => BufferUsage::INDEX,
            BufferKind::Uniform => BufferUsage::UNIFORM,
        };
        usage | BufferUsage::COPY_DST
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    F32,
    U32,
}

mod private {
    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for u32 {}
}

/// Scalars that can be stored in a buffer.
pub trait Scalar: Copy + private::Sealed {
    const TYPE: ScalarType;

    fn to_le_bytes(self) -> [u8; 4];
}

impl Scalar for f32 {
    const TYPE: ScalarType = ScalarType::F32;

    fn to_le_bytes(self) -> [u8; 4] {
        f32::to_le_bytes(self)
    }
}

impl Scalar for u32 {
    const TYPE: ScalarType = ScalarType::U32;

    fn to_le_bytes(self) -> [u8; 4] {
        u32::to_le_bytes(self)
    }
}

const SCALAR_SIZE: usize = 4;

/// Description of a buffer to allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSpec {
    pub label: Cow<'static, str>,
    pub kind: BufferKind,
    pub scalar: ScalarType,
    /// Number of scalars per element.
    pub stride: usize,
    /// Initial number of elements.
    pub len: usize,
}

impl BufferSpec {
    pub fn vertex(label: impl Into<Cow<'static, str>>, ty: AttributeType, len: usize) -> Self {
        Self {
            label: label.into(),
            kind: BufferKind::Vertex,
            scalar: ScalarType::F32,
            stride: ty.components(),
            len,
        }
    }

    pub fn index(label: impl Into<Cow<'static, str>>, len: usize) -> Self {
        Self {
            label: label.into(),
            kind: BufferKind::Index,
            scalar: ScalarType::U32,
            stride: 1,
            len,
        }
    }

    /// A uniform buffer of `words` 32 bit words.
    pub fn uniform(label: impl Into<Cow<'static, str>>, words: usize) -> Self {
        Self {
            label: label.into(),
            kind: BufferKind::Uniform,
            scalar: ScalarType::F32,
            stride: 1,
            len: words,
        }
    }

    fn element_size(&self) -> usize {
        self.stride * SCALAR_SIZE
    }
}

/// Generational handle of a buffer of a [`BufferStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The buffer had to grow; bindings to it must be refreshed.
    pub reallocated: bool,
}

/// Summary of a [`BufferStore::flush`].
#[derive(Debug, Default)]
pub struct FlushReport {
    pub uploads: usize,
    pub bytes: usize,
    pub allocations: usize,
    pub failures: Vec<(BufferHandle, ResourceError)>,
}

impl FlushReport {
    pub fn failed(&self, handle: BufferHandle) -> bool {
        self.failures.iter().any(|(h, _)| *h == handle)
    }
}

/// GPU buffer backing a live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    pub raw: RawBufferId,
    /// Incremented every time the buffer is reallocated.
    pub generation: u64,
    /// Number of elements.
    pub len: usize,
}

#[derive(Debug)]
struct Entry {
    spec: BufferSpec,
    len: usize,
    capacity: usize,
    shadow: Vec<u8>,
    raw: Option<RawBufferId>,
    raw_capacity: usize,
    dirty: Option<Range<usize>>,
    generation: u64,
}

impl Entry {
    fn is_resident(&self) -> bool {
        self.raw.is_some() && self.raw_capacity >= self.capacity
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
pub struct BufferStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pending_destruction: Vec<RawBufferId>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new zero initialized buffer.
    ///
    /// The GPU resource is created lazily by the next [`flush`](Self::flush);
    /// zero length buffers do not get one until they grow.
    pub fn allocate(&mut self, spec: BufferSpec) -> BufferHandle {
        assert!(spec.stride > 0, "buffer {:?} has a zero stride", spec.label);

        let entry = Entry {
            len: spec.len,
            capacity: spec.len,
            shadow: vec![0; spec.len * spec.element_size()],
            raw: None,
            raw_capacity: 0,
            dirty: None,
            generation: 0,
            spec,
        };

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                BufferHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("too many buffers");
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                BufferHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn entry(&self, handle: BufferHandle) -> &Entry {
        match self.slots.get(handle.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == handle.generation => entry,
            _ => panic!("use of released buffer handle {handle:?}"),
        }
    }

    fn entry_mut(&mut self, handle: BufferHandle) -> &mut Entry {
        match self.slots.get_mut(handle.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == handle.generation => entry,
            _ => panic!("use of released buffer handle {handle:?}"),
        }
    }

    /// Writes `data` to the elements in `range`.
    ///
    /// The buffer grows if `range` extends past its capacity.
    ///
    /// # Panics
    ///
    /// Panics if the handle was released, if the scalar type differs from the
    /// one the buffer was allocated with, if `data` does not hold exactly
    /// `range.len()` elements, or if `range` starts past the capacity.
    pub fn update<T: Scalar>(
        &mut self,
        handle: BufferHandle,
        data: &[T],
        range: Range<usize>,
    ) -> UpdateOutcome {
        let entry = self.entry_mut(handle);
        let label = &entry.spec.label;
        assert_eq!(
            T::TYPE,
            entry.spec.scalar,
            "buffer {label:?} holds {:?} values",
            entry.spec.scalar
        );
        assert!(
            range.start <= range.end && range.start <= entry.capacity,
            "range {range:?} is outside of buffer {label:?} with capacity {}",
            entry.capacity
        );
        assert_eq!(
            data.len(),
            range.len() * entry.spec.stride,
            "buffer {label:?} expects {} scalars per element",
            entry.spec.stride
        );

        let mut reallocated = false;
        if range.end > entry.capacity {
            let capacity = range.end.max(entry.capacity * 2);
            tracing::debug!(
                label = %entry.spec.label,
                from = entry.capacity,
                to = capacity,
                "growing buffer"
            );
            entry.shadow.resize(capacity * entry.spec.element_size(), 0);
            entry.capacity = capacity;
            entry.generation += 1;
            reallocated = true;
        }
        entry.len = entry.len.max(range.end);

        let start = range.start * entry.spec.element_size();
        for (chunk, value) in entry.shadow[start..].chunks_exact_mut(SCALAR_SIZE).zip(data) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }

        if !range.is_empty() {
            entry.dirty = Some(match entry.dirty.take() {
                Some(dirty) => dirty.start.min(range.start)..dirty.end.max(range.end),
                None => range,
            });
        }

        UpdateOutcome { reallocated }
    }

    /// Shrinks or extends the number of used elements without reallocating.
    pub fn set_len(&mut self, handle: BufferHandle, len: usize) {
        let entry = self.entry_mut(handle);
        assert!(
            len <= entry.capacity,
            "length {len} exceeds the capacity {} of buffer {:?}",
            entry.capacity,
            entry.spec.label
        );
        entry.len = len;
        if let Some(dirty) = &mut entry.dirty {
            dirty.end = dirty.end.min(len);
            if dirty.is_empty() {
                entry.dirty = None;
            }
        }
    }

    /// Releases the buffer; its GPU resource is destroyed by the next flush.
    pub fn release(&mut self, handle: BufferHandle) {
        let raw = self.entry(handle).raw;
        let slot = &mut self.slots[handle.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.pending_destruction.extend(raw);
    }

    pub fn is_live(&self, handle: BufferHandle) -> bool {
        matches!(
            self.slots.get(handle.index as usize),
            Some(Slot { generation, entry: Some(_) }) if *generation == handle.generation
        )
    }

    pub fn len(&self, handle: BufferHandle) -> usize {
        self.entry(handle).len
    }

    pub fn capacity(&self, handle: BufferHandle) -> usize {
        self.entry(handle).capacity
    }

    pub fn label(&self, handle: BufferHandle) -> &str {
        &self.entry(handle).spec.label
    }

    /// Range of elements awaiting upload.
    pub fn pending_range(&self, handle: BufferHandle) -> Option<Range<usize>> {
        self.entry(handle).dirty.clone()
    }

    pub fn live_buffers(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// GPU buffer to bind for drawing, if the buffer is resident.
    ///
    /// # Panics
    ///
    /// Panics if the handle was released.
    pub fn binding(&self, handle: BufferHandle) -> Option<BufferBinding> {
        let entry = self.entry(handle);
        if !entry.is_resident() {
            return None;
        }

        entry.raw.map(|raw| BufferBinding {
            raw,
            generation: entry.generation,
            len: entry.len,
        })
    }

    /// Uploads all pending ranges, allocating GPU resources where needed.
    pub fn flush<D: Device + ?Sized>(&mut self, device: &mut D) -> FlushReport {
        let mut report = FlushReport::default();

        for raw in self.pending_destruction.drain(..) {
            device.destroy_buffer(raw);
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let handle = BufferHandle {
                index: index as u32,
                generation: slot.generation,
            };
            let Some(entry) = &mut slot.entry else {
                continue;
            };
            let element_size = entry.spec.element_size();

            if entry.len > 0 && !entry.is_resident() {
                let descriptor = BufferDescriptor {
                    label: Cow::Borrowed(entry.spec.label.as_ref()),
                    size: entry.capacity * element_size,
                    usage: entry.spec.kind.usage(),
                };
                match device.create_buffer(&descriptor) {
                    Ok(raw) => {
                        if let Some(old) = entry.raw.replace(raw) {
                            device.destroy_buffer(old);
                        }
                        entry.raw_capacity = entry.capacity;
                        entry.dirty = Some(0..entry.len);
                        report.allocations += 1;
                    }
                    Err(err) => {
                        tracing::warn!(label = %entry.spec.label, %err, "buffer allocation failed");
                        report.failures.push((handle, err));
                        continue;
                    }
                }
            }

            let (Some(raw), Some(dirty)) = (entry.raw, entry.dirty.take()) else {
                continue;
            };
            let dirty = dirty.start..dirty.end.min(entry.len);
            if dirty.is_empty() {
                continue;
            }

            let bytes = &entry.shadow[dirty.start * element_size..dirty.end * element_size];
            device.write_buffer(raw, dirty.start * element_size, bytes);
            report.uploads += 1;
            report.bytes += bytes.len();
        }

        report
    }

    /// Destroys every GPU resource owned by the store.
    pub fn destroy_all<D: Device + ?Sized>(&mut self, device: &mut D) {
        for raw in self.pending_destruction.drain(..) {
            device.destroy_buffer(raw);
        }
        for slot in &mut self.slots {
            if let Some(raw) = slot.entry.as_mut().and_then(|e| e.raw.take()) {
                device.destroy_buffer(raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::headless::{DeviceCommand, HeadlessDevice};

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn zero_length_buffers_have_no_gpu_resource() {
        let mut device = HeadlessDevice::new();
        let mut store = BufferStore::new();
        let handle = store.allocate(BufferSpec::vertex("empty", AttributeType::F32, 0));

        let report = store.flush(&mut device);
        assert_eq!(report.allocations, 0);
        assert!(store.is_live(handle));
        assert_eq!(store.binding(handle), None);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn overlapping_updates_are_uploaded_once() {
        let mut device = HeadlessDevice::new();
        let mut store = BufferStore::new();
        let handle = store.allocate(BufferSpec::vertex("values", AttributeType::F32, 16));
        store.flush(&mut device);
        device.take_commands();

        store.update(handle, &[1.0f32, 2.0, 3.0], 2..5);
        store.update(handle, &[4.0f32, 5.0], 4..6);
        store.update(handle, &[6.0f32], 9..10);
        assert_eq!(store.pending_range(handle), Some(2..10));

        let report = store.flush(&mut device);
        assert_eq!(report.uploads, 1);
        assert_eq!(
            device.commands(),
            &[DeviceCommand::WriteBuffer {
                buffer: store.binding(handle).unwrap().raw,
                offset: 8,
                len: 32,
            }]
        );

        let raw = store.binding(handle).unwrap().raw;
        let data = device.buffer_data(raw).unwrap();
        assert_eq!(
            &data[8..40],
            &f32_bytes(&[1.0, 2.0, 4.0, 5.0, 0.0, 0.0, 0.0, 6.0])[..]
        );
        assert_eq!(store.pending_range(handle), None);
    }

    #[test]
    fn growing_reallocates_and_reuploads() {
        let mut device = HeadlessDevice::new();
        let mut store = BufferStore::new();
        let handle = store.allocate(BufferSpec::vertex("points", AttributeType::Vec2F32, 2));
        store.update(handle, &[1.0f32, 1.0, 2.0, 2.0], 0..2);
        store.flush(&mut device);
        let before = store.binding(handle).unwrap();

        let outcome = store.update(handle, &[3.0f32, 3.0, 4.0, 4.0, 5.0, 5.0], 2..5);
        assert!(outcome.reallocated);
        assert_eq!(store.capacity(handle), 5);
        assert_eq!(store.binding(handle), None);

        store.flush(&mut device);
        let after = store.binding(handle).unwrap();
        assert_ne!(before.raw, after.raw);
        assert_eq!(after.generation, before.generation + 1);
        assert_eq!(after.len, 5);
        assert_eq!(device.buffer_data(before.raw), None);
        assert_eq!(
            device.buffer_data(after.raw).unwrap(),
            &f32_bytes(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 5.0, 5.0])[..]
        );

        let outcome = store.update(handle, &[0.0f32, 0.0], 0..1);
        assert!(!outcome.reallocated);
    }

    #[test]
    fn failed_allocations_are_retried() {
        let mut device = HeadlessDevice::new();
        let mut store = BufferStore::new();
        let handle = store.allocate(BufferSpec::index("indices", 4));
        store.update(handle, &[0u32, 1, 2, 3], 0..4);

        device.fail_allocations(1);
        let report = store.flush(&mut device);
        assert!(report.failed(handle));
        assert_eq!(store.binding(handle), None);

        let report = store.flush(&mut device);
        assert!(report.failures.is_empty());
        let raw = store.binding(handle).unwrap().raw;
        assert_eq!(device.buffer_data(raw).unwrap().len(), 16);
    }

    #[test]
    fn released_handles_are_not_reused() {
        let mut device = HeadlessDevice::new();
        let mut store = BufferStore::new();
        let first = store.allocate(BufferSpec::uniform("uniforms", 4));
        store.flush(&mut device);
        store.release(first);
        let second = store.allocate(BufferSpec::uniform("uniforms", 4));

        assert_ne!(first, second);
        assert!(!store.is_live(first));
        assert!(store.is_live(second));

        store.flush(&mut device);
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    #[should_panic(expected = "released buffer handle")]
    fn updating_a_released_handle_panics() {
        let mut store = BufferStore::new();
        let handle = store.allocate(BufferSpec::uniform("uniforms", 4));
        store.release(handle);
        store.update(handle, &[0.0f32], 0..1);
    }

    #[test]
    #[should_panic(expected = "holds")]
    fn scalar_type_mismatch_panics() {
        let mut store = BufferStore::new();
        let handle = store.allocate(BufferSpec::index("indices", 4));
        store.update(handle, &[0.0f32], 0..1);
    }

    proptest! {
        #[test]
        fn many_updates_flush_to_their_union(
            updates in prop::collection::vec((0usize..64, 1usize..16), 1..12)
        ) {
            let mut device = HeadlessDevice::new();
            let mut store = BufferStore::new();
            let handle = store.allocate(BufferSpec::vertex("values", AttributeType::F32, 64));
            store.flush(&mut device);
            device.take_commands();

            let mut expected = vec![0.0f32; 64];
            let mut hull: Option<Range<usize>> = None;
            for (i, (start, len)) in updates.iter().enumerate() {
                let end = (start + len).min(64);
                let values = (*start..end).map(|v| (v * 100 + i) as f32).collect::<Vec<_>>();
                expected[*start..end].copy_from_slice(&values);
                store.update(handle, &values, *start..end);
                hull = Some(match hull {
                    Some(h) => h.start.min(*start)..h.end.max(end),
                    None => *start..end,
                });
            }

            let report = store.flush(&mut device);
            let hull = hull.unwrap();
            prop_assert_eq!(report.uploads, 1);
            prop_assert_eq!(report.bytes, hull.len() * 4);

            let raw = store.binding(handle).unwrap().raw;
            prop_assert_eq!(device.buffer_data(raw).unwrap(), &f32_bytes(&expected)[..]);
        }
    }
}
