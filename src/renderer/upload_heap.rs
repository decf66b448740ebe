//! Upload Heap
//!
//! Staging arena for asset-time uploads. Callers allocate from a mapped
//! linear cursor, queue [`ImageUploadJob`]s describing the layout
//! transitions around each buffer-to-image copy, and call
//! [`UploadHeap::flush`], which batches everything into one submission on
//! the graphics queue, blocks on a dedicated fence, and rewinds the cursor.
//! The stall is by design: uploads happen at asset-load time, not per frame.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;

use crate::errors::{Result, VkResultExt};
use crate::renderer::device::Device;
use crate::renderer::{align_up, create_buffer, destroy_buffer};

/// One pending buffer-to-image copy with its surrounding barriers.
/// Consumed by the next [`UploadHeap::flush`]; never persisted.
pub struct ImageUploadJob {
    pub region: vk::BufferImageCopy,
    pub pre_barrier: vk::ImageMemoryBarrier<'static>,
    pub post_barrier: vk::ImageMemoryBarrier<'static>,
}

/// Grow-only staging cursor; rewound only by a flush.
#[derive(Debug)]
struct LinearCursor {
    cursor: u64,
    size: u64,
}

impl LinearCursor {
    fn new(size: u64) -> Self {
        Self { cursor: 0, size }
    }

    /// Reserves `size` bytes at `align`. A failed request leaves the cursor
    /// unchanged.
    fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        let align = align.max(1);
        let offset = align_up(self.cursor, align);
        let size = align_up(size, align);
        if offset + size > self.size {
            return None;
        }
        self.cursor = offset + size;
        Some(offset)
    }

    fn allocatable_size(&self, align: u64) -> u64 {
        let offset = align_up(self.cursor, align.max(1));
        self.size.saturating_sub(offset)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Mapped staging buffer with a one-shot command buffer and fence.
pub struct UploadHeap {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    cursor: LinearCursor,
    image_jobs: Vec<ImageUploadJob>,
}

impl UploadHeap {
    /// Creates the staging buffer and leaves the command buffer in the
    /// recording state, ready for copy commands.
    pub fn new(device: &Device, name: &str, size: u64) -> Result<Self> {
        let raw = device.raw();

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_family_index())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { raw.create_command_pool(&pool_info, None) }.vk_err()?;
        device.set_object_name(command_pool, &format!("upload_heap.{name}.pool"));

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { raw.allocate_command_buffers(&alloc_info) }.vk_err()?[0];

        let (buffer, allocation) = create_buffer(
            device,
            &format!("upload_heap.{name}"),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        let fence = unsafe { raw.create_fence(&vk::FenceCreateInfo::default(), None) }.vk_err()?;
        device.set_object_name(fence, &format!("upload_heap.{name}.fence"));

        unsafe {
            raw.begin_command_buffer(command_buffer, &vk::CommandBufferBeginInfo::default())
        }
        .vk_err()?;

        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            buffer,
            allocation: Some(allocation),
            cursor: LinearCursor::new(size),
            image_jobs: Vec::new(),
        })
    }

    /// Reserves `size` bytes at `align`, returning the offset into the
    /// staging buffer, or `None` when the heap is full. A failed request
    /// leaves the cursor unchanged.
    pub fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        self.cursor.alloc(size, align)
    }

    /// Reserves and fills a region, returning its offset. Allocation
    /// failure is logged and reported as `None`.
    pub fn alloc_with_data(&mut self, data: &[u8], align: u64) -> Option<u64> {
        let Some(offset) = self.alloc(data.len() as u64, align) else {
            log::error!(
                "upload heap exhausted: {} bytes requested, {} free",
                data.len(),
                self.allocatable_size(1)
            );
            return None;
        };
        let mapped = self
            .allocation
            .as_mut()
            .expect("upload heap buffer is alive")
            .mapped_slice_mut()
            .expect("upload heap buffer is persistently mapped");
        mapped[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Some(offset)
    }

    /// Queues an image upload for the next flush.
    pub fn add_image_job(&mut self, job: ImageUploadJob) {
        self.image_jobs.push(job);
    }

    /// Submits all recorded copies and queued image jobs in one batch and
    /// blocks until the GPU has executed them, then rewinds the cursor and
    /// re-opens the command buffer. Synchronous by design.
    pub fn flush(&mut self, device: &Device) -> Result<()> {
        let raw = device.raw();

        let pre_barriers: Vec<vk::ImageMemoryBarrier<'_>> =
            self.image_jobs.iter().map(|job| job.pre_barrier).collect();
        let post_barriers: Vec<vk::ImageMemoryBarrier<'_>> =
            self.image_jobs.iter().map(|job| job.post_barrier).collect();

        unsafe {
            if !pre_barriers.is_empty() {
                raw.cmd_pipeline_barrier(
                    self.command_buffer,
                    vk::PipelineStageFlags::HOST,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &pre_barriers,
                );
            }
            for job in &self.image_jobs {
                raw.cmd_copy_buffer_to_image(
                    self.command_buffer,
                    self.buffer,
                    job.pre_barrier.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[job.region],
                );
            }
            if !post_barriers.is_empty() {
                raw.cmd_pipeline_barrier(
                    self.command_buffer,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &post_barriers,
                );
            }
            self.image_jobs.clear();

            raw.end_command_buffer(self.command_buffer).vk_err()?;

            let command_buffers = [self.command_buffer];
            let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
            raw.queue_submit(device.graphics_queue(), &[submit], self.fence)
                .vk_err()?;
            raw.wait_for_fences(&[self.fence], true, u64::MAX).vk_err()?;
            raw.reset_fences(&[self.fence]).vk_err()?;

            raw.begin_command_buffer(self.command_buffer, &vk::CommandBufferBeginInfo::default())
                .vk_err()?;
        }
        self.cursor.reset();
        Ok(())
    }

    /// Bytes available from the current cursor at `align`.
    #[must_use]
    pub fn allocatable_size(&self, align: u64) -> u64 {
        self.cursor.allocatable_size(align)
    }

    /// The staging buffer backing this heap.
    #[inline]
    #[must_use]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    /// The heap's command buffer, open for recording between flushes.
    #[inline]
    #[must_use]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Destroys the heap.
    ///
    /// # Panics
    ///
    /// Panics if image jobs are still pending; they would be silently
    /// dropped otherwise.
    pub fn destroy(mut self, device: &Device) {
        assert!(
            self.image_jobs.is_empty(),
            "upload heap destroyed with pending image jobs"
        );
        let raw = device.raw();
        unsafe {
            raw.destroy_fence(self.fence, None);
            raw.destroy_command_pool(self.command_pool, None);
        }
        if let Some(allocation) = self.allocation.take() {
            destroy_buffer(device, self.buffer, allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_alignment() {
        let mut cursor = LinearCursor::new(1024);
        assert_eq!(cursor.alloc(10, 1), Some(0));
        // Next request at align 64 skips to the next boundary.
        assert_eq!(cursor.alloc(10, 64), Some(64));
        assert_eq!(cursor.alloc(1, 1), Some(128));
    }

    #[test]
    fn test_failed_alloc_leaves_cursor_unchanged() {
        let mut cursor = LinearCursor::new(256);
        cursor.alloc(100, 1);
        let before = cursor.allocatable_size(1);
        assert_eq!(cursor.alloc(200, 1), None);
        assert_eq!(cursor.allocatable_size(1), before);
        assert_eq!(cursor.alloc(512, 64), None);
        assert_eq!(cursor.allocatable_size(1), before);
    }

    #[test]
    fn test_reset_rewinds_to_zero() {
        let mut cursor = LinearCursor::new(128);
        cursor.alloc(128, 1);
        assert_eq!(cursor.alloc(1, 1), None);
        cursor.reset();
        assert_eq!(cursor.alloc(128, 1), Some(0));
    }
}
