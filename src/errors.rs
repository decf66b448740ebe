//! Error Types
//!
//! The crate splits failures into three tiers:
//!
//! - **Fatal** conditions travel as [`TalosError`]: device/surface creation
//!   failures, surface format negotiation failure, and any Vulkan call that
//!   returns an error code outside the explicitly handled recoverable set.
//!   Failed calls carry the originating [`ash::vk::Result`] and the call
//!   site that issued them.
//! - **Expected** conditions are values, not errors: ring exhaustion returns
//!   `None`, surface staleness is reported through
//!   [`crate::renderer::swapchain::AcquireStatus`] /
//!   [`crate::renderer::swapchain::PresentStatus`], and a shader compile
//!   failure yields `Ok(None)` after its diagnostic has been logged.
//! - **Contract violations** (over-allocating a frame slot's command
//!   buffers, exceeding the ring window table) are asserts.

use std::panic::Location;

use ash::vk;
use thiserror::Error;

/// The error type for all fatal failures in the frame-resource pipeline.
#[derive(Error, Debug)]
pub enum TalosError {
    // ========================================================================
    // Device & Surface
    // ========================================================================
    /// Vulkan entry points could not be loaded from the system.
    #[error("Failed to load Vulkan entry points: {0}")]
    EntryLoad(String),

    /// No physical device was enumerated by the instance.
    #[error("No Vulkan-capable adapter found")]
    NoAdapter,

    /// The selected adapter exposes no graphics-capable queue family.
    #[error("Selected adapter has no graphics queue family")]
    NoGraphicsQueue,

    /// None of the preferred surface formats is supported.
    #[error("No suitable swap chain surface format")]
    NoSurfaceFormat,

    /// The presentation engine did not deliver an image within the bounded
    /// acquire wait.
    #[error("Timed out acquiring a swap chain image")]
    AcquireTimeout,

    /// Window handle access failed while creating the surface.
    #[error("Window handle error: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    // ========================================================================
    // GPU API & Memory
    // ========================================================================
    /// A Vulkan call failed with an unexpected result code.
    #[error("Vulkan call failed: {result:?} at {location}")]
    Vk {
        /// The raw result code returned by the call.
        result: vk::Result,
        /// Source location of the failing call.
        location: &'static Location<'static>,
    },

    /// GPU memory allocation failed.
    #[error("GPU allocation error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    /// The external shader compiler could not be loaded at startup.
    /// Individual compile failures are not errors; they surface as a null
    /// module after logging.
    #[error("Shader compiler unavailable: {0}")]
    CompilerUnavailable(String),

    // ========================================================================
    // Host I/O
    // ========================================================================
    /// File I/O error (settings, bytecode cache).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Alias for `Result<T, TalosError>`.
pub type Result<T> = std::result::Result<T, TalosError>;

/// Wraps raw `VkResult` values with the call site that produced them.
pub(crate) trait VkResultExt<T> {
    /// Converts an `Err(vk::Result)` into [`TalosError::Vk`], capturing the
    /// caller's source location.
    fn vk_err(self) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[track_caller]
    fn vk_err(self) -> Result<T> {
        self.map_err(|result| TalosError::Vk {
            result,
            location: Location::caller(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_err_carries_code_and_location() {
        let res: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = res.vk_err().unwrap_err();
        match err {
            TalosError::Vk { result, location } => {
                assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
                assert!(location.file().ends_with("errors.rs"));
            }
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn test_vk_err_passes_values_through() {
        let res: ash::prelude::VkResult<u32> = Ok(7);
        assert_eq!(res.vk_err().unwrap(), 7);
    }
}
