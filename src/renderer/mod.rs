//! GPU Frame-Resource Layer
//!
//! Everything the render loop needs to safely acquire GPU resources each
//! frame: the device context, the presentable swap chain, per-frame command
//! recording slots, and the transient/persistent memory pools. The layer
//! guarantees that the CPU never touches a resource the GPU is still
//! consuming and that transient memory is recycled deterministically across
//! overlapping frames in flight.
//!
//! Construction order is leaf-to-root: [`device::Device`] first, then
//! [`swapchain::SwapChain`], [`command_ring::CommandBufferRing`], and the
//! buffer pools. Destruction runs in reverse, and `Device::destroy` must run
//! last, after `Device::wait_idle` has drained the GPU.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

use crate::errors::{Result, VkResultExt};

pub mod command_ring;
pub mod device;
pub mod dynamic_buffer;
pub mod ring;
pub mod static_pool;
pub mod swapchain;
pub mod texture;
pub mod upload_heap;

/// Maximum number of frame windows the transient allocators track.
pub const MAX_BACK_BUFFER_COUNT: usize = 4;

/// Sub-allocation alignment for dynamic and static buffer regions, matching
/// the common `minUniformBufferOffsetAlignment` upper bound.
pub const BUFFER_ALLOC_ALIGNMENT: u64 = 256;

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
#[inline]
#[must_use]
pub(crate) const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Creates a buffer bound to freshly allocated memory from the device's
/// allocator.
pub(crate) fn create_buffer(
    device: &device::Device,
    name: &str,
    size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> Result<(vk::Buffer, Allocation)> {
    let create_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.raw().create_buffer(&create_info, None) }.vk_err()?;
    let requirements = unsafe { device.raw().get_buffer_memory_requirements(buffer) };

    let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    })?;

    unsafe {
        device
            .raw()
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
    }
    .vk_err()?;
    device.set_object_name(buffer, name);
    Ok((buffer, allocation))
}

/// Returns a buffer's memory to the allocator and destroys the handle.
pub(crate) fn destroy_buffer(device: &device::Device, buffer: vk::Buffer, allocation: Allocation) {
    if let Err(err) = device.allocator().lock().free(allocation) {
        log::warn!("failed to free buffer allocation: {err}");
    }
    unsafe { device.raw().destroy_buffer(buffer, None) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(300, 256), 512);
        assert_eq!(align_up(511, 256), 512);
    }
}
