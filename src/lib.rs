#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod renderer;
pub mod settings;
pub mod shader;

pub use errors::{Result, TalosError};
pub use renderer::command_ring::CommandBufferRing;
pub use renderer::device::Device;
pub use renderer::dynamic_buffer::{BufferType, DynamicBufferRing};
pub use renderer::ring::{Ring, RingWithTabs};
pub use renderer::static_pool::StaticBufferPool;
pub use renderer::swapchain::{AcquireStatus, PresentStatus, SwapChain};
pub use renderer::texture::Texture;
pub use renderer::upload_heap::{ImageUploadJob, UploadHeap};
pub use settings::{ProjectSettings, RenderSettings};
pub use shader::defines::DefineList;
pub use shader::manager::ShaderManager;
pub use shader::ShaderStage;
