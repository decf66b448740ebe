//! Settings Tests
//!
//! Tests for ProjectSettings JSON round-trips and the shader cache
//! directory layout.

use std::fs;
use std::path::PathBuf;

use talos::ProjectSettings;
use talos::settings::BUILD_CONFIG;

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("talos_settings_tests_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir.join(name)
}

#[test]
fn settings_round_trip_through_json() {
    let path = temp_path(ProjectSettings::FILE_NAME);
    let settings = ProjectSettings::new("/project/assets", "/project/.cache");
    settings.save(&path).unwrap();

    let loaded = ProjectSettings::load(&path).unwrap();
    assert_eq!(loaded, settings);
}

#[test]
fn loading_missing_settings_is_an_error() {
    let path = temp_path("does_not_exist.json");
    assert!(ProjectSettings::load(&path).is_err());
}

#[test]
fn shader_cache_dir_nests_under_build_config() {
    let settings = ProjectSettings::new("/project/assets", "/project/.cache");
    let expected: PathBuf = ["/project/.cache", "Shader", BUILD_CONFIG].iter().collect();
    assert_eq!(settings.shader_cache_dir(), expected);
}

#[test]
fn malformed_settings_file_is_an_error() {
    let path = temp_path("malformed.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(ProjectSettings::load(&path).is_err());
}
