//! Static Buffer Pool
//!
//! Two-buffer upload pattern for long-lived geometry: the CPU writes into a
//! mapped staging buffer, then a one-shot command copies each region into
//! device-local storage, guarded by a pipeline barrier. The pool's linear
//! cursor only grows — it is single-use per lifetime and is never recycled —
//! and the staging buffer can be released once all uploads have executed.

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;

use crate::errors::Result;
use crate::renderer::device::Device;
use crate::renderer::{BUFFER_ALLOC_ALIGNMENT, align_up, create_buffer, destroy_buffer};

/// Device-local buffer fed once through a mapped staging buffer.
pub struct StaticBufferPool {
    device_buffer: vk::Buffer,
    device_allocation: Option<Allocation>,
    staging_buffer: vk::Buffer,
    staging_allocation: Option<Allocation>,
    // Regions allocated since the last `upload_all`.
    pending: Vec<vk::DescriptorBufferInfo>,
    memory_offset: u64,
    total_size: u64,
}

impl StaticBufferPool {
    pub fn new(device: &Device, name: &str, total_size: u64) -> Result<Self> {
        let (device_buffer, device_allocation) = create_buffer(
            device,
            &format!("static_pool.{name}.store"),
            total_size,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;
        let (staging_buffer, staging_allocation) = create_buffer(
            device,
            &format!("static_pool.{name}.staging"),
            total_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        Ok(Self {
            device_buffer,
            device_allocation: Some(device_allocation),
            staging_buffer,
            staging_allocation: Some(staging_allocation),
            pending: Vec::new(),
            memory_offset: 0,
            total_size,
        })
    }

    /// Allocates room for `count` elements of `stride` bytes, aligned to
    /// [`BUFFER_ALLOC_ALIGNMENT`]. Returns the staging write slice and the
    /// region descriptor naming the device-local destination, or `None`
    /// once the fixed capacity is exhausted (the cursor is untouched).
    ///
    /// # Panics
    ///
    /// Panics if called after [`StaticBufferPool::free_staging`].
    pub fn alloc(
        &mut self,
        count: usize,
        stride: usize,
    ) -> Option<(&mut [u8], vk::DescriptorBufferInfo)> {
        let staging = self
            .staging_allocation
            .as_mut()
            .expect("staging buffer already freed");

        let size = align_up((count * stride) as u64, BUFFER_ALLOC_ALIGNMENT);
        if self.memory_offset + size > self.total_size {
            return None;
        }

        let offset = self.memory_offset;
        self.memory_offset += size;

        let info = vk::DescriptorBufferInfo {
            buffer: self.device_buffer,
            offset,
            range: size,
        };
        self.pending.push(info);

        let mapped = staging
            .mapped_slice_mut()
            .expect("staging buffer is persistently mapped");
        let slice = &mut mapped[offset as usize..(offset + size) as usize];
        Some((slice, info))
    }

    /// Allocates and fills a region from a `Pod` slice.
    pub fn alloc_slice<T: Pod>(&mut self, values: &[T]) -> Option<vk::DescriptorBufferInfo> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let (slice, info) = self.alloc(values.len(), size_of::<T>())?;
        slice[..bytes.len()].copy_from_slice(bytes);
        Some(info)
    }

    /// Records a staging → device-local copy of one region.
    ///
    /// # Panics
    ///
    /// Panics if the staging buffer has been freed.
    pub fn upload_region(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        info: &vk::DescriptorBufferInfo,
    ) {
        assert!(self.staging_allocation.is_some(), "staging buffer already freed");
        let region = vk::BufferCopy {
            src_offset: info.offset,
            dst_offset: info.offset,
            size: info.range,
        };
        unsafe {
            device
                .raw()
                .cmd_copy_buffer(cmd, self.staging_buffer, self.device_buffer, &[region]);
        }
    }

    /// Records the copies for every region allocated since the last call,
    /// then a barrier making the writes visible to vertex fetch and index
    /// reads.
    pub fn upload_all(&mut self, device: &Device, cmd: vk::CommandBuffer) {
        if self.pending.is_empty() {
            return;
        }
        let regions: Vec<vk::BufferCopy> = self
            .pending
            .iter()
            .map(|info| vk::BufferCopy {
                src_offset: info.offset,
                dst_offset: info.offset,
                size: info.range,
            })
            .collect();
        self.pending.clear();

        let barriers = [vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.device_buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)];

        unsafe {
            device
                .raw()
                .cmd_copy_buffer(cmd, self.staging_buffer, self.device_buffer, &regions);
            device.raw().cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::DependencyFlags::empty(),
                &[],
                &barriers,
                &[],
            );
        }
    }

    /// Releases the staging buffer. Only valid once every recorded upload
    /// has finished executing; the pool keeps serving the device-local
    /// buffer but can no longer allocate.
    pub fn free_staging(&mut self, device: &Device) {
        if let Some(allocation) = self.staging_allocation.take() {
            destroy_buffer(device, self.staging_buffer, allocation);
            self.staging_buffer = vk::Buffer::null();
        }
    }

    /// Bytes remaining in the pool.
    #[inline]
    #[must_use]
    pub fn allocatable_size(&self) -> u64 {
        self.total_size - self.memory_offset
    }

    #[inline]
    #[must_use]
    pub fn buffer(&self) -> vk::Buffer {
        self.device_buffer
    }

    /// Destroys both buffers. The GPU must be done with them.
    pub fn destroy(mut self, device: &Device) {
        self.free_staging(device);
        if let Some(allocation) = self.device_allocation.take() {
            destroy_buffer(device, self.device_buffer, allocation);
        }
    }
}
