//! Shader Module Cache
//!
//! [`ShaderManager`] maps a content key — canonical source path, entry
//! point, stage, and macro set — to a compiled `vk::ShaderModule`. Lookups
//! go through three levels:
//!
//! 1. the in-memory module map (process lifetime, never evicted);
//! 2. the on-disk bytecode cache, valid while the cache file is newer than
//!    the source's last write;
//! 3. the external compiler. A failed compile logs the diagnostic and
//!    yields `Ok(None)`; callers skip the stage rather than abort.
//!
//! Cache files carry a small format tag (see [`CACHE_MAGIC`]) so bytecode
//! written by an incompatible build reads as a miss instead of poisoning
//! the cache; freshness itself is purely an mtime comparison.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ash::vk;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::errors::{Result, TalosError, VkResultExt};
use crate::renderer::device::Device;
use crate::shader::ShaderStage;
use crate::shader::compiler::ShaderCompiler;
use crate::shader::defines::DefineList;
use crate::shader::dependency::ShaderDependency;

/// Tag at the head of every cache file.
pub const CACHE_MAGIC: [u8; 4] = *b"TLSC";
/// Bumped whenever the artifact layout or compile option set changes in a
/// way that invalidates old bytecode.
pub const CACHE_FORMAT_VERSION: u32 = 1;
/// Cache file extension.
pub const CACHE_EXTENSION: &str = "spir";

const CACHE_HEADER_LEN: usize = CACHE_MAGIC.len() + size_of::<u32>();

/// Deterministic identifier for one (path, entry, stage, defines) request.
/// The macro set contributes in canonical order, so insertion order never
/// changes the key.
#[must_use]
pub fn cache_key(
    path: &Path,
    entry_point: &str,
    stage: ShaderStage,
    defines: &DefineList,
) -> Uuid {
    let key_string = format!(
        "{}_{}_{}_{}",
        path.display(),
        entry_point,
        stage.name(),
        defines.to_string_canonical()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key_string.as_bytes())
}

/// Reads a cache file, validating the header. A wrong or truncated header
/// is a miss, never an error.
#[must_use]
pub fn read_cached_bytecode(cache_path: &Path) -> Option<Vec<u8>> {
    let data = fs::read(cache_path).ok()?;
    let (header, bytecode) = data.split_at_checked(CACHE_HEADER_LEN)?;
    if header[..CACHE_MAGIC.len()] != CACHE_MAGIC {
        return None;
    }
    let version = u32::from_le_bytes(header[CACHE_MAGIC.len()..].try_into().ok()?);
    if version != CACHE_FORMAT_VERSION {
        return None;
    }
    Some(bytecode.to_vec())
}

/// Writes header + bytecode to a cache file.
pub fn write_cached_bytecode(cache_path: &Path, bytecode: &[u8]) -> std::io::Result<()> {
    let mut data = Vec::with_capacity(CACHE_HEADER_LEN + bytecode.len());
    data.extend_from_slice(&CACHE_MAGIC);
    data.extend_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
    data.extend_from_slice(bytecode);
    fs::write(cache_path, data)
}

/// Whether a cache artifact written at `cache_mtime` is still valid for a
/// source last written at `source_mtime`.
#[inline]
#[must_use]
pub fn is_cache_fresh(source_mtime: SystemTime, cache_mtime: SystemTime) -> bool {
    source_mtime <= cache_mtime
}

/// Loads bytecode from `cache_path` if the file exists, carries a valid
/// header, and is newer than `source_mtime`.
#[must_use]
pub fn probe_disk_cache(cache_path: &Path, source_mtime: SystemTime) -> Option<Vec<u8>> {
    let cache_mtime = fs::metadata(cache_path).and_then(|meta| meta.modified()).ok()?;
    if !is_cache_fresh(source_mtime, cache_mtime) {
        return None;
    }
    read_cached_bytecode(cache_path)
}

/// Content-keyed shader module cache.
///
/// Owns every module it hands out for the process lifetime; destroy with
/// [`ShaderManager::destroy`] before the device goes away.
pub struct ShaderManager {
    cache_dir: PathBuf,
    compiler: ShaderCompiler,
    modules: FxHashMap<Uuid, vk::ShaderModule>,
    bytecode: FxHashMap<Uuid, Vec<u8>>,
    dependencies: FxHashMap<PathBuf, ShaderDependency>,
}

impl ShaderManager {
    pub fn new(asset_root: PathBuf, cache_dir: PathBuf) -> Result<Self> {
        let compiler = ShaderCompiler::new(asset_root).map_err(TalosError::CompilerUnavailable)?;
        Ok(Self {
            cache_dir,
            compiler,
            modules: FxHashMap::default(),
            bytecode: FxHashMap::default(),
            dependencies: FxHashMap::default(),
        })
    }

    /// Loads (or reuses) the module for the given request.
    ///
    /// `Ok(None)` means the compile failed; the diagnostic has been logged
    /// and the caller is expected to run without that stage. Everything
    /// else that can go wrong — module creation, cache I/O on the read
    /// path — is fatal.
    pub fn load(
        &mut self,
        device: &Device,
        path: &Path,
        entry_point: &str,
        stage: ShaderStage,
        defines: &DefineList,
    ) -> Result<Option<vk::ShaderModule>> {
        let path = absolute_path(path);
        let key = cache_key(&path, entry_point, stage, defines);

        if let Some(&module) = self.modules.get(&key) {
            return Ok(Some(module));
        }

        let source_mtime = self.dependency(&path).last_write_time();
        let cache_path = self.cache_file_path(key);

        if let Some(bytecode) = probe_disk_cache(&cache_path, source_mtime) {
            log::debug!("shader cache hit for {} ({key})", path.display());
            let module = self.create_module(device, &bytecode)?;
            self.modules.insert(key, module);
            self.bytecode.insert(key, bytecode);
            return Ok(Some(module));
        }

        let bytecode = match self.compiler.compile(&path, entry_point, stage, defines) {
            Ok(bytecode) => bytecode,
            Err(diagnostic) => {
                log::warn!("failed to compile {} [{stage}]: {diagnostic}", path.display());
                return Ok(None);
            }
        };

        // A cache write failure costs a recompile next run, nothing more.
        if let Err(err) = fs::create_dir_all(&self.cache_dir)
            .and_then(|()| write_cached_bytecode(&cache_path, &bytecode))
        {
            log::warn!("cannot write shader cache {}: {err}", cache_path.display());
        }

        let module = self.create_module(device, &bytecode)?;
        self.modules.insert(key, module);
        self.bytecode.insert(key, bytecode);
        Ok(Some(module))
    }

    fn create_module(&self, device: &Device, bytecode: &[u8]) -> Result<vk::ShaderModule> {
        let words = ash::util::read_spv(&mut Cursor::new(bytecode))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        unsafe { device.raw().create_shader_module(&create_info, None) }.vk_err()
    }

    /// The freshness dependency for a source path, interned per absolute
    /// path for the process lifetime.
    pub fn dependency(&mut self, path: &Path) -> &mut ShaderDependency {
        let path = absolute_path(path);
        self.dependencies
            .entry(path.clone())
            .or_insert_with(|| ShaderDependency::new(path))
    }

    /// Raw bytecode of a previously loaded module.
    #[must_use]
    pub fn bytecode(&self, key: Uuid) -> Option<&[u8]> {
        self.bytecode.get(&key).map(Vec::as_slice)
    }

    fn cache_file_path(&self, key: Uuid) -> PathBuf {
        self.cache_dir.join(format!("{key}.{CACHE_EXTENSION}"))
    }

    /// Destroys every cached module. Must run before the device.
    pub fn destroy(&mut self, device: &Device) {
        for (_, module) in self.modules.drain() {
            unsafe { device.raw().destroy_shader_module(module, None) };
        }
        self.bytecode.clear();
        self.dependencies.clear();
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_stable() {
        let defines = DefineList::from(&[("A", 1)][..]);
        let a = cache_key(Path::new("/assets/pbr.hlsl"), "PSMain", ShaderStage::Fragment, &defines);
        let b = cache_key(Path::new("/assets/pbr.hlsl"), "PSMain", ShaderStage::Fragment, &defines);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_ignores_define_order() {
        let mut forward = DefineList::new();
        forward.set("USE_SHADOWS", 1);
        forward.set("MAX_LIGHTS", 8);

        let mut reversed = DefineList::new();
        reversed.set("MAX_LIGHTS", 8);
        reversed.set("USE_SHADOWS", 1);

        let path = Path::new("/assets/forward.hlsl");
        assert_eq!(
            cache_key(path, "main", ShaderStage::Vertex, &forward),
            cache_key(path, "main", ShaderStage::Vertex, &reversed),
        );
    }

    #[test]
    fn test_cache_key_separates_requests() {
        let defines = DefineList::new();
        let path = Path::new("/assets/forward.hlsl");
        let base = cache_key(path, "main", ShaderStage::Vertex, &defines);

        assert_ne!(base, cache_key(path, "main2", ShaderStage::Vertex, &defines));
        assert_ne!(base, cache_key(path, "main", ShaderStage::Fragment, &defines));
        assert_ne!(
            base,
            cache_key(Path::new("/assets/other.hlsl"), "main", ShaderStage::Vertex, &defines)
        );
        let mut with_define = DefineList::new();
        with_define.set("X", 1);
        assert_ne!(base, cache_key(path, "main", ShaderStage::Vertex, &with_define));
    }

    #[test]
    fn test_freshness_comparison() {
        let earlier = SystemTime::UNIX_EPOCH;
        let later = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(10);
        assert!(is_cache_fresh(earlier, later));
        assert!(is_cache_fresh(later, later));
        assert!(!is_cache_fresh(later, earlier));
    }
}
