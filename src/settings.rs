//! Project & Renderer Settings
//!
//! [`ProjectSettings`] locates the asset tree and the derived-data cache on
//! disk and round-trips through JSON so tooling can edit it.
//! [`RenderSettings`] configures the frame pipeline at startup (validation,
//! vsync, frames in flight) and is plain in-memory state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Build flavor segment of the shader cache path. Debug and release builds
/// compile with different option sets, so their bytecode never mixes.
pub const BUILD_CONFIG: &str = if cfg!(debug_assertions) {
    "Debug"
} else {
    "Release"
};

/// On-disk project layout: where assets live and where derived data goes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Root of the source asset tree (shader includes resolve inside it).
    pub asset_path: PathBuf,
    /// Root of the derived-data cache.
    pub asset_cache_path: PathBuf,
}

impl ProjectSettings {
    /// Default file name used by [`ProjectSettings::load`] / [`save`].
    ///
    /// [`save`]: ProjectSettings::save
    pub const FILE_NAME: &'static str = "ProjectSettings.json";

    #[must_use]
    pub fn new(asset_path: impl Into<PathBuf>, asset_cache_path: impl Into<PathBuf>) -> Self {
        Self {
            asset_path: asset_path.into(),
            asset_cache_path: asset_cache_path.into(),
        }
    }

    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes settings as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Directory holding compiled shader bytecode for the current build
    /// flavor: `<asset_cache>/Shader/<Debug|Release>`.
    #[must_use]
    pub fn shader_cache_dir(&self) -> PathBuf {
        self.asset_cache_path.join("Shader").join(BUILD_CONFIG)
    }
}

/// Startup configuration for the frame pipeline.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Install the validation layer and debug messenger.
    pub validation: bool,
    /// FIFO presentation when true, immediate otherwise.
    pub vsync: bool,
    /// Back-buffer count; also the number of frame slots in flight.
    pub back_buffer_count: u32,
    /// Pre-allocated command buffers per frame slot.
    pub command_buffers_per_frame: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "talos".to_string(),
            validation: cfg!(debug_assertions),
            vsync: true,
            back_buffer_count: 3,
            command_buffers_per_frame: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_cache_dir_layout() {
        let settings = ProjectSettings::new("/proj/assets", "/proj/cache");
        let dir = settings.shader_cache_dir();
        assert!(dir.starts_with("/proj/cache/Shader"));
        assert!(dir.ends_with(BUILD_CONFIG));
    }

    #[test]
    fn test_default_render_settings() {
        let settings = RenderSettings::default();
        assert_eq!(settings.back_buffer_count, 3);
        assert!(settings.command_buffers_per_frame > 0);
    }
}
