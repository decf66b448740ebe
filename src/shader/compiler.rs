//! Shader Compiler
//!
//! Wraps the external compiler behind a narrow contract: given a source
//! path, entry point, stage, and macro list it returns either SPIR-V
//! bytecode or the compiler's diagnostic text. Includes resolve through a
//! callback that is jailed to the configured asset root — a resolved path
//! escaping the root rejects the include.

use std::fs;
use std::path::{Path, PathBuf};

use crate::shader::ShaderStage;
use crate::shader::defines::DefineList;

/// How an include was requested: `"quoted"` resolves against the including
/// file's directory, `<bracketed>` against the asset root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    Relative,
    Standard,
}

impl From<shaderc::IncludeType> for IncludeKind {
    fn from(kind: shaderc::IncludeType) -> Self {
        match kind {
            shaderc::IncludeType::Relative => Self::Relative,
            shaderc::IncludeType::Standard => Self::Standard,
        }
    }
}

/// Resolves an include request to an absolute path inside `asset_root`.
///
/// Escapes via `..`, symlinks, or absolute include names are rejected after
/// canonicalization. Kept free of compiler types so the jail has direct
/// unit coverage.
pub fn resolve_include(
    asset_root: &Path,
    requested: &str,
    kind: IncludeKind,
    requesting_source: &Path,
) -> Result<PathBuf, String> {
    let candidate = match kind {
        IncludeKind::Relative => requesting_source
            .parent()
            .unwrap_or(asset_root)
            .join(requested),
        IncludeKind::Standard => asset_root.join(requested),
    };

    let root = asset_root
        .canonicalize()
        .map_err(|e| format!("asset root {} is unreadable: {e}", asset_root.display()))?;
    let resolved = candidate
        .canonicalize()
        .map_err(|e| format!("include {requested} not found: {e}"))?;

    if !resolved.starts_with(&root) {
        return Err(format!(
            "include {requested} resolves outside the asset root ({})",
            resolved.display()
        ));
    }
    Ok(resolved)
}

/// External-compiler collaborator. One instance per [`ShaderManager`];
/// stateless between `compile` calls.
///
/// [`ShaderManager`]: crate::shader::manager::ShaderManager
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    asset_root: PathBuf,
}

impl ShaderCompiler {
    /// The compiler library failing to load is an environment problem and
    /// is reported as a diagnostic string like any other compile failure.
    pub fn new(asset_root: PathBuf) -> Result<Self, String> {
        let compiler =
            shaderc::Compiler::new().ok_or_else(|| "shaderc is not available".to_string())?;
        Ok(Self {
            compiler,
            asset_root,
        })
    }

    /// Compiles `path` for `stage` with the given entry point and macros.
    /// Returns raw SPIR-V on success, the diagnostic text on failure.
    pub fn compile(
        &self,
        path: &Path,
        entry_point: &str,
        stage: ShaderStage,
        defines: &DefineList,
    ) -> Result<Vec<u8>, String> {
        let source = fs::read_to_string(path)
            .map_err(|e| format!("cannot read shader source {}: {e}", path.display()))?;

        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| "shaderc options are not available".to_string())?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_2 as u32,
        );
        if path.extension().is_some_and(|ext| ext == "hlsl") {
            options.set_source_language(shaderc::SourceLanguage::HLSL);
        }
        for (key, value) in defines.iter() {
            options.add_macro_definition(key, Some(&value.to_string()));
        }

        let asset_root = self.asset_root.clone();
        let source_path = path.to_path_buf();
        options.set_include_callback(move |requested, include_type, requester, _depth| {
            let requesting_source = if requester.is_empty() {
                source_path.clone()
            } else {
                PathBuf::from(requester)
            };
            let resolved = resolve_include(
                &asset_root,
                requested,
                include_type.into(),
                &requesting_source,
            )?;
            let content = fs::read_to_string(&resolved)
                .map_err(|e| format!("cannot read include {}: {e}", resolved.display()))?;
            Ok(shaderc::ResolvedInclude {
                resolved_name: resolved.to_string_lossy().into_owned(),
                content,
            })
        });

        let file_name = path.to_string_lossy();
        let artifact = self
            .compiler
            .compile_into_spirv(
                &source,
                stage.to_shaderc(),
                &file_name,
                entry_point,
                Some(&options),
            )
            .map_err(|e| e.to_string())?;

        if artifact.get_num_warnings() > 0 {
            log::warn!(
                "shader {} compiled with warnings: {}",
                path.display(),
                artifact.get_warning_messages()
            );
        }
        Ok(artifact.as_binary_u8().to_vec())
    }

    #[inline]
    #[must_use]
    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup_tree(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("talos_inc_{}_{tag}", std::process::id()));
        fs::create_dir_all(root.join("common")).unwrap();
        let mut file = fs::File::create(root.join("common/lights.glsl")).unwrap();
        file.write_all(b"// lights").unwrap();
        let mut file = fs::File::create(root.join("forward.frag")).unwrap();
        file.write_all(b"// forward").unwrap();
        root
    }

    #[test]
    fn test_relative_include_resolves_beside_source() {
        let root = setup_tree("relative");
        let resolved = resolve_include(
            &root,
            "common/lights.glsl",
            IncludeKind::Relative,
            &root.join("forward.frag"),
        )
        .unwrap();
        assert!(resolved.ends_with("common/lights.glsl"));
    }

    #[test]
    fn test_standard_include_resolves_from_root() {
        let root = setup_tree("standard");
        let resolved = resolve_include(
            &root,
            "common/lights.glsl",
            IncludeKind::Standard,
            &root.join("deep/nested/source.frag"),
        )
        .unwrap();
        assert!(resolved.ends_with("common/lights.glsl"));
    }

    #[test]
    fn test_escape_outside_root_is_rejected() {
        let root = setup_tree("escape");
        let err = resolve_include(
            &root,
            "../../etc/passwd",
            IncludeKind::Relative,
            &root.join("forward.frag"),
        )
        .unwrap_err();
        assert!(err.contains("asset root") || err.contains("not found"), "{err}");
    }

    #[test]
    fn test_missing_include_is_an_error() {
        let root = setup_tree("missing");
        let err = resolve_include(
            &root,
            "no_such_file.glsl",
            IncludeKind::Standard,
            &root.join("forward.frag"),
        )
        .unwrap_err();
        assert!(err.contains("not found"), "{err}");
    }
}
