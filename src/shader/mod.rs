//! Shader Pipeline
//!
//! Compilation and caching of shader modules. [`manager::ShaderManager`]
//! maps a content key — source path, entry point, stage, macro set — to a
//! compiled `vk::ShaderModule`, backed by an on-disk bytecode cache that is
//! invalidated by source modification time. [`compiler::ShaderCompiler`]
//! wraps the external compiler; [`defines::DefineList`] keeps the macro set
//! in canonical order so insertion order never changes a key.

pub mod compiler;
pub mod defines;
pub mod dependency;
pub mod manager;

use ash::vk;

/// Pipeline stage a shader compiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Stable name used in cache keys and diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Hull => "hull",
            Self::Domain => "domain",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    #[must_use]
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    pub(crate) fn to_shaderc(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::Hull => shaderc::ShaderKind::TessControl,
            Self::Domain => shaderc::ShaderKind::TessEvaluation,
            Self::Geometry => shaderc::ShaderKind::Geometry,
            Self::Fragment => shaderc::ShaderKind::Fragment,
            Self::Compute => shaderc::ShaderKind::Compute,
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
