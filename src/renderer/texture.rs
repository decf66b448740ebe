//! Texture
//!
//! Allocator-backed image with a capability probe against the adapter's
//! format properties. Pixel data reaches the image through an
//! [`ImageUploadJob`] consumed by the upload heap.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

use crate::errors::{Result, VkResultExt};
use crate::renderer::device::Device;
use crate::renderer::upload_heap::ImageUploadJob;

/// Device-local image plus what the adapter can do with its format.
pub struct Texture {
    image: vk::Image,
    allocation: Option<Allocation>,
    create_info_format: vk::Format,
    extent: vk::Extent3D,
    supports_render_target: bool,
    supports_depth_stencil: bool,
    supports_sampling: bool,
    supports_storage: bool,
}

impl Texture {
    pub fn new(device: &Device, create_info: &vk::ImageCreateInfo, name: &str) -> Result<Self> {
        let image = unsafe { device.raw().create_image(create_info, None) }.vk_err()?;
        let requirements = unsafe { device.raw().get_image_memory_requirements(image) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: gpu_allocator::MemoryLocation::GpuOnly,
            linear: create_info.tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        unsafe {
            device
                .raw()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .vk_err()?;
        device.set_object_name(image, name);

        let format_props = unsafe {
            device
                .instance()
                .get_physical_device_format_properties(device.physical_device(), create_info.format)
        };
        let features = format_props.optimal_tiling_features;

        Ok(Self {
            image,
            allocation: Some(allocation),
            create_info_format: create_info.format,
            extent: create_info.extent,
            supports_render_target: features.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT),
            supports_depth_stencil: features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
            supports_sampling: features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE),
            supports_storage: features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE),
        })
    }

    /// Creates a 2D view over the whole image.
    pub fn create_view(
        &self,
        device: &Device,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.create_info_format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        unsafe { device.raw().create_image_view(&create_info, None) }.vk_err()
    }

    /// Builds the upload job moving `buffer_offset` bytes of staged pixels
    /// into one mip of this image: UNDEFINED → TRANSFER_DST before the
    /// copy, TRANSFER_DST → SHADER_READ_ONLY after it.
    #[must_use]
    pub fn upload_job(&self, mip_level: u32, buffer_offset: u64) -> ImageUploadJob {
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: mip_level,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let mip_extent = vk::Extent3D {
            width: (self.extent.width >> mip_level).max(1),
            height: (self.extent.height >> mip_level).max(1),
            depth: 1,
        };

        ImageUploadJob {
            region: vk::BufferImageCopy::default()
                .buffer_offset(buffer_offset)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(mip_extent),
            pre_barrier: vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.image)
                .subresource_range(subresource_range),
            post_barrier: vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.image)
                .subresource_range(subresource_range),
        }
    }

    #[inline]
    #[must_use]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> vk::Format {
        self.create_info_format
    }

    #[inline]
    #[must_use]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    #[must_use]
    pub fn supports_render_target(&self) -> bool {
        self.supports_render_target
    }

    #[inline]
    #[must_use]
    pub fn supports_depth_stencil(&self) -> bool {
        self.supports_depth_stencil
    }

    #[inline]
    #[must_use]
    pub fn supports_sampling(&self) -> bool {
        self.supports_sampling
    }

    #[inline]
    #[must_use]
    pub fn supports_storage(&self) -> bool {
        self.supports_storage
    }

    /// Destroys the image. The GPU must be done with it.
    pub fn destroy(mut self, device: &Device) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = device.allocator().lock().free(allocation) {
                log::warn!("failed to free image allocation: {err}");
            }
        }
        unsafe { device.raw().destroy_image(self.image, None) };
    }
}
