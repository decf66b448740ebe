//! Swap Chain
//!
//! [`SwapChain`] owns the presentable image chain: the surface format, the
//! render pass and framebuffer per image, and one acquire semaphore per
//! back-buffer slot. It exposes the acquire/present state machine:
//!
//! ```text
//! Created ──resize──▶ (acquire_next ⇄ present) ──resize──▶ … ──destroy──▶
//! ```
//!
//! Window-dependent resources do not exist until the first [`resize`] call;
//! every later `resize` destroys and recreates all of them, and must only
//! run after the device has drained in-flight GPU work that references the
//! old images.
//!
//! [`resize`]: SwapChain::resize

use ash::vk;

use crate::errors::{Result, TalosError, VkResultExt};
use crate::renderer::device::Device;

/// Bounded wait for image acquisition. Exceeding it means the presentation
/// engine is wedged and is treated as fatal.
const ACQUIRE_TIMEOUT_NS: u64 = 5_000_000_000;

/// Surface formats accepted for presentation, in preference order.
const PREFERRED_FORMATS: [vk::Format; 5] = [
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::A2B10G10R10_UNORM_PACK32,
    vk::Format::A2R10G10B10_UNORM_PACK32,
    vk::Format::R16G16B16A16_SFLOAT,
];

/// Result of [`SwapChain::acquire_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// An image was acquired; render into it and present.
    Ready(u32),
    /// The surface no longer matches the swap chain; the caller must issue
    /// a resize before acquiring again.
    NeedsResize,
}

/// Result of [`SwapChain::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Out-of-date or suboptimal surface; the caller must issue a resize.
    NeedsResize,
}

/// Presentable image chain and its acquire/present state machine.
pub struct SwapChain {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    render_pass: vk::RenderPass,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    image_available_semaphores: Vec<vk::Semaphore>,
    extent: vk::Extent2D,
    vsync: bool,
    back_buffer_count: u32,
    // Valid only between acquire and present.
    image_index: u32,
    semaphore_index: usize,
    prev_semaphore_index: usize,
}

impl SwapChain {
    /// Negotiates the surface format and allocates the per-slot acquire
    /// semaphores. The image chain itself is created by the first
    /// [`SwapChain::resize`].
    pub fn new(device: &Device, back_buffer_count: u32) -> Result<Self> {
        let format = Self::choose_surface_format(device)?;
        log::info!("swap chain format {:?} / {:?}", format.format, format.color_space);

        let loader = ash::khr::swapchain::Device::new(device.instance(), device.raw());

        let mut image_available_semaphores = Vec::with_capacity(back_buffer_count as usize);
        for i in 0..back_buffer_count {
            let semaphore = unsafe {
                device
                    .raw()
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
            }
            .vk_err()?;
            device.set_object_name(semaphore, &format!("swapchain.image_available[{i}]"));
            image_available_semaphores.push(semaphore);
        }

        Ok(Self {
            loader,
            swapchain: vk::SwapchainKHR::null(),
            format,
            render_pass: vk::RenderPass::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            image_available_semaphores,
            extent: vk::Extent2D::default(),
            vsync: true,
            back_buffer_count,
            image_index: 0,
            semaphore_index: 0,
            prev_semaphore_index: 0,
        })
    }

    fn choose_surface_format(device: &Device) -> Result<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            device
                .surface_loader()
                .get_physical_device_surface_formats(device.physical_device(), device.surface())
        }
        .vk_err()?;

        formats
            .iter()
            .find(|candidate| PREFERRED_FORMATS.contains(&candidate.format))
            .copied()
            .ok_or(TalosError::NoSurfaceFormat)
    }

    /// Destroys and recreates every window-dependent resource. The caller
    /// must have drained all in-flight GPU work referencing the old images.
    pub fn resize(&mut self, device: &Device, width: u32, height: u32, vsync: bool) -> Result<()> {
        self.destroy_window_dependent_resources(device);
        self.vsync = vsync;

        self.create_render_pass(device)?;

        let capabilities = unsafe {
            device.surface_loader().get_physical_device_surface_capabilities(
                device.physical_device(),
                device.surface(),
            )
        }
        .vk_err()?;

        self.extent = if capabilities.current_extent.width == u32::MAX {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        } else {
            capabilities.current_extent
        };

        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        let composite_alpha = [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::INHERIT,
        ]
        .into_iter()
        .find(|&flag| capabilities.supported_composite_alpha.contains(flag))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

        let present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            vk::PresentModeKHR::IMMEDIATE
        };

        let queue_family_indices = [
            device.graphics_family_index(),
            device.present_family_index(),
        ];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface())
            .min_image_count(self.back_buffer_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(pre_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        if queue_family_indices[0] != queue_family_indices[1] {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices);
        }

        self.swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }.vk_err()?;
        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain) }.vk_err()?;

        self.create_image_views(device)?;
        self.create_framebuffers(device)?;
        self.image_index = 0;
        Ok(())
    }

    fn create_render_pass(&mut self, device: &Device) -> Result<()> {
        let attachments = [vk::AttachmentDescription::default()
            .format(self.format.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

        let color_references = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_references)];

        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        self.render_pass =
            unsafe { device.raw().create_render_pass(&create_info, None) }.vk_err()?;
        device.set_object_name(self.render_pass, "swapchain.render_pass");
        Ok(())
    }

    fn create_image_views(&mut self, device: &Device) -> Result<()> {
        self.image_views = Vec::with_capacity(self.images.len());
        for (i, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.raw().create_image_view(&create_info, None) }.vk_err()?;
            device.set_object_name(view, &format!("swapchain.image_view[{i}]"));
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_framebuffers(&mut self, device: &Device) -> Result<()> {
        self.framebuffers = Vec::with_capacity(self.image_views.len());
        for (i, &view) in self.image_views.iter().enumerate() {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer =
                unsafe { device.raw().create_framebuffer(&create_info, None) }.vk_err()?;
            device.set_object_name(framebuffer, &format!("swapchain.framebuffer[{i}]"));
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Blocks until the presentation engine delivers an image, bounded by
    /// [`ACQUIRE_TIMEOUT_NS`]. The semaphore signaled by this acquisition is
    /// available via [`SwapChain::image_available_semaphore`] and must be
    /// waited on by the submission that renders into the image.
    pub fn acquire_next(&mut self) -> Result<AcquireStatus> {
        let semaphore = self.image_available_semaphores[self.semaphore_index];
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                ACQUIRE_TIMEOUT_NS,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            // A suboptimal acquire still delivers a usable image; the
            // mismatch surfaces again on present.
            Ok((image_index, _suboptimal)) => {
                self.image_index = image_index;
                self.prev_semaphore_index = self.semaphore_index;
                self.semaphore_index = (self.semaphore_index + 1) % self.back_buffer_count as usize;
                Ok(AcquireStatus::Ready(image_index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::NeedsResize),
            Err(vk::Result::TIMEOUT) => Err(TalosError::AcquireTimeout),
            Err(result) => Err(TalosError::Vk {
                result,
                location: std::panic::Location::caller(),
            }),
        }
    }

    /// Queues the current image for presentation, waiting on
    /// `render_finished`. A stale surface is reported as
    /// [`PresentStatus::NeedsResize`]; any other failure is fatal.
    pub fn present(
        &mut self,
        device: &Device,
        render_finished: vk::Semaphore,
    ) -> Result<PresentStatus> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [self.image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(device.present_queue(), &present_info) };
        match result {
            Ok(false) => Ok(PresentStatus::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::NeedsResize),
            Err(result) => Err(TalosError::Vk {
                result,
                location: std::panic::Location::caller(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The semaphore signaled by the most recent acquire.
    #[inline]
    #[must_use]
    pub fn image_available_semaphore(&self) -> vk::Semaphore {
        self.image_available_semaphores[self.prev_semaphore_index]
    }

    /// Index of the acquired image; valid only between acquire and present.
    #[inline]
    #[must_use]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    #[must_use]
    pub fn current_image(&self) -> vk::Image {
        self.images[self.image_index as usize]
    }

    #[inline]
    #[must_use]
    pub fn current_image_view(&self) -> vk::ImageView {
        self.image_views[self.image_index as usize]
    }

    #[inline]
    #[must_use]
    pub fn current_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffers[self.image_index as usize]
    }

    #[inline]
    #[must_use]
    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    #[must_use]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    #[must_use]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    #[must_use]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn destroy_window_dependent_resources(&mut self, device: &Device) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.raw().destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                device.raw().destroy_image_view(view, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.raw().destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }

    /// Destroys the swap chain. The device must have been drained first.
    pub fn destroy(mut self, device: &Device) {
        self.destroy_window_dependent_resources(device);
        unsafe {
            for semaphore in self.image_available_semaphores.drain(..) {
                device.raw().destroy_semaphore(semaphore, None);
            }
        }
    }
}
