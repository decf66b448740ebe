//! Command Buffer Ring
//!
//! One [`FrameSlot`] per frame in flight, each holding a command pool, a
//! fixed set of pre-allocated command buffers, a completion fence, and a
//! render-finished semaphore. [`CommandBufferRing::begin_frame`] blocks on
//! the incoming slot's fence, so a slot's command buffers are only ever
//! re-recorded after the GPU has finished their previous submission.

use ash::vk;

use crate::errors::{Result, VkResultExt};
use crate::renderer::device::Device;

struct FrameSlot {
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    // Next buffer to hand out; reset at each frame boundary.
    cursor: usize,
    executed_fence: vk::Fence,
    render_finished_semaphore: vk::Semaphore,
}

/// Fixed ring of per-frame command recording slots.
pub struct CommandBufferRing {
    slots: Vec<FrameSlot>,
    frame_index: usize,
    buffers_per_frame: u32,
}

impl CommandBufferRing {
    /// Creates `frame_count` slots with `buffers_per_frame` primary command
    /// buffers each, on the graphics family, or the compute family when
    /// `compute` is set. Fences start signaled so the first
    /// [`begin_frame`] does not block.
    ///
    /// [`begin_frame`]: CommandBufferRing::begin_frame
    pub fn new(
        device: &Device,
        frame_count: u32,
        buffers_per_frame: u32,
        compute: bool,
    ) -> Result<Self> {
        let family_index = if compute {
            device.compute_family_index()
        } else {
            device.graphics_family_index()
        };
        let ring_name = if compute { "compute_ring" } else { "graphics_ring" };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family_index)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let semaphore_info = vk::SemaphoreCreateInfo::default();

        let raw = device.raw();
        let mut slots = Vec::with_capacity(frame_count as usize);
        for frame in 0..frame_count {
            let command_pool = unsafe { raw.create_command_pool(&pool_info, None) }.vk_err()?;
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(buffers_per_frame);
            let command_buffers = unsafe { raw.allocate_command_buffers(&alloc_info) }.vk_err()?;
            let executed_fence = unsafe { raw.create_fence(&fence_info, None) }.vk_err()?;
            let render_finished_semaphore =
                unsafe { raw.create_semaphore(&semaphore_info, None) }.vk_err()?;

            device.set_object_name(command_pool, &format!("{ring_name}.frame{frame}.pool"));
            device.set_object_name(executed_fence, &format!("{ring_name}.frame{frame}.fence"));
            device.set_object_name(
                render_finished_semaphore,
                &format!("{ring_name}.frame{frame}.render_finished"),
            );
            for (i, &buffer) in command_buffers.iter().enumerate() {
                device.set_object_name(buffer, &format!("{ring_name}.frame{frame}.cmd{i}"));
            }

            slots.push(FrameSlot {
                command_pool,
                command_buffers,
                cursor: 0,
                executed_fence,
                render_finished_semaphore,
            });
        }

        Ok(Self {
            slots,
            frame_index: 0,
            buffers_per_frame,
        })
    }

    /// Advances to the next frame slot, blocks until the GPU has signaled
    /// the slot's fence, resets the fence, and rewinds the slot's
    /// allocation cursor.
    pub fn begin_frame(&mut self, device: &Device) -> Result<()> {
        self.frame_index = (self.frame_index + 1) % self.slots.len();
        let slot = &mut self.slots[self.frame_index];
        slot.cursor = 0;

        let fences = [slot.executed_fence];
        unsafe {
            device.raw().wait_for_fences(&fences, true, u64::MAX).vk_err()?;
            device.raw().reset_fences(&fences).vk_err()?;
        }
        Ok(())
    }

    /// Hands out the next command buffer of the current slot.
    ///
    /// # Panics
    ///
    /// Exceeding the per-slot allocation limit is a contract violation, not
    /// a runtime condition, and panics.
    pub fn next_command_buffer(&mut self) -> vk::CommandBuffer {
        let slot = &mut self.slots[self.frame_index];
        assert!(
            slot.cursor < slot.command_buffers.len(),
            "frame slot exhausted: {} command buffers per frame",
            self.buffers_per_frame
        );
        let buffer = slot.command_buffers[slot.cursor];
        slot.cursor += 1;
        buffer
    }

    /// The current slot's completion fence, to be passed to the queue
    /// submission that closes the frame.
    #[inline]
    #[must_use]
    pub fn executed_fence(&self) -> vk::Fence {
        self.slots[self.frame_index].executed_fence
    }

    /// The current slot's render-finished semaphore, signaled by the frame
    /// submission and waited on by present.
    #[inline]
    #[must_use]
    pub fn render_finished_semaphore(&self) -> vk::Semaphore {
        self.slots[self.frame_index].render_finished_semaphore
    }

    #[inline]
    #[must_use]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.slots[self.frame_index].command_pool
    }

    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Drains every slot: waits for the queue to go idle, then rewinds all
    /// cursors and the slot index. Used before a resize or shutdown.
    pub fn wait_all(&mut self, device: &Device, queue: vk::Queue) -> Result<()> {
        unsafe { device.raw().queue_wait_idle(queue) }.vk_err()?;
        self.frame_index = 0;
        for slot in &mut self.slots {
            slot.cursor = 0;
        }
        Ok(())
    }

    /// Destroys all slots. The GPU must have been drained first.
    pub fn destroy(self, device: &Device) {
        let raw = device.raw();
        for slot in self.slots {
            unsafe {
                raw.free_command_buffers(slot.command_pool, &slot.command_buffers);
                raw.destroy_command_pool(slot.command_pool, None);
                raw.destroy_fence(slot.executed_fence, None);
                raw.destroy_semaphore(slot.render_finished_semaphore, None);
            }
        }
    }
}
