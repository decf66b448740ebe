//! Dynamic Buffer Ring
//!
//! One persistently mapped GPU buffer fronted by a [`RingWithTabs`]:
//! per-frame transient sub-allocations for vertex, index, uniform, and
//! structured data. Each frame boundary releases the oldest frame window's
//! allocations in a single step, so a region handed out this frame stays
//! untouched until every frame in flight that could reference it has
//! retired.
//!
//! Exhaustion is expected and recoverable: [`DynamicBufferRing::alloc`]
//! returns `None` and the caller flushes early or skips the write. No
//! pointer escapes on failure.

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;

use crate::errors::Result;
use crate::renderer::device::Device;
use crate::renderer::ring::RingWithTabs;
use crate::renderer::{BUFFER_ALLOC_ALIGNMENT, align_up, create_buffer, destroy_buffer};

bitflags::bitflags! {
    /// Usages a [`DynamicBufferRing`] serves; combined into the underlying
    /// buffer's usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferType: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const STRUCTURED = 1 << 3;
    }
}

impl BufferType {
    fn usage_flags(self) -> vk::BufferUsageFlags {
        let mut usage = vk::BufferUsageFlags::empty();
        if self.contains(Self::VERTEX) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(Self::INDEX) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(Self::CONSTANT) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(Self::STRUCTURED) {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        usage
    }
}

/// Frame-windowed transient sub-allocator over one mapped GPU buffer.
pub struct DynamicBufferRing {
    buffer: vk::Buffer,
    allocation: Allocation,
    mem: RingWithTabs,
    total_size: u64,
}

impl DynamicBufferRing {
    /// Creates the buffer (host-visible, persistently mapped) and the ring
    /// tracking `window_count` frame windows over `total_size` bytes.
    pub fn new(
        device: &Device,
        name: &str,
        buffer_type: BufferType,
        window_count: usize,
        total_size: u64,
    ) -> Result<Self> {
        let (buffer, allocation) = create_buffer(
            device,
            &format!("dynamic_ring.{name}"),
            total_size,
            buffer_type.usage_flags(),
            MemoryLocation::CpuToGpu,
        )?;
        debug_assert!(
            allocation.mapped_ptr().is_some(),
            "host-visible ring buffer must be persistently mapped"
        );

        Ok(Self {
            buffer,
            allocation,
            mem: RingWithTabs::new(window_count, total_size as u32),
            total_size,
        })
    }

    /// Allocates `size` bytes (rounded up to [`BUFFER_ALLOC_ALIGNMENT`])
    /// from the current frame window. Returns the mapped write slice and
    /// the region descriptor to bind, or `None` when the ring is exhausted.
    pub fn alloc(&mut self, size: u64) -> Option<(&mut [u8], vk::DescriptorBufferInfo)> {
        let size = align_up(size, BUFFER_ALLOC_ALIGNMENT);
        let offset = u64::from(self.mem.alloc(size as u32)?);

        let info = vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        };
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .expect("ring buffer is persistently mapped");
        let slice = &mut mapped[offset as usize..(offset + size) as usize];
        Some((slice, info))
    }

    /// Allocates and fills a region with one `Pod` value.
    pub fn alloc_value<T: Pod>(&mut self, value: &T) -> Option<vk::DescriptorBufferInfo> {
        let bytes = bytemuck::bytes_of(value);
        let (slice, info) = self.alloc(bytes.len() as u64)?;
        slice[..bytes.len()].copy_from_slice(bytes);
        Some(info)
    }

    /// Allocates and fills a region with a `Pod` slice.
    pub fn alloc_slice<T: Pod>(&mut self, values: &[T]) -> Option<vk::DescriptorBufferInfo> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let (slice, info) = self.alloc(bytes.len() as u64)?;
        slice[..bytes.len()].copy_from_slice(bytes);
        Some(info)
    }

    /// Writes the ring's buffer into a dynamic-uniform descriptor binding;
    /// per-draw offsets are supplied at bind time.
    pub fn write_descriptor(
        &self,
        device: &Device,
        set: vk::DescriptorSet,
        binding: u32,
        range: u64,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&buffer_info);
        unsafe { device.raw().update_descriptor_sets(&[write], &[]) };
    }

    /// Frame boundary: retires the oldest frame window.
    #[inline]
    pub fn on_begin_frame(&mut self) {
        self.mem.on_begin_frame();
    }

    /// Bytes still available in the ring.
    #[inline]
    #[must_use]
    pub fn allocatable_size(&self) -> u64 {
        u64::from(self.mem.allocatable_size())
    }

    #[inline]
    #[must_use]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Destroys the buffer. In-flight frames referencing it must have
    /// retired first.
    pub fn destroy(self, device: &Device) {
        destroy_buffer(device, self.buffer, self.allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_type_usage_mapping() {
        let usage = (BufferType::VERTEX | BufferType::CONSTANT).usage_flags();
        assert!(usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(!usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(!usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
    }
}
