//! Shader Cache Tests
//!
//! Tests for:
//! - Cache keys: stability, define-order independence, request separation
//! - Disk cache probe: mtime freshness, recompile-after-touch decision,
//!   header tag rejection
//! - DefineList parsing and canonical serialization against the key

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use talos::shader::manager::{
    CACHE_MAGIC, cache_key, is_cache_fresh, probe_disk_cache, read_cached_bytecode,
    write_cached_bytecode,
};
use talos::{DefineList, ShaderStage};

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("talos_cache_tests_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir.join(name)
}

const BYTECODE: &[u8] = &[0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

// ============================================================================
// Cache files
// ============================================================================

#[test]
fn bytecode_round_trips_through_cache_file() {
    let path = temp_path("round_trip.spir");
    write_cached_bytecode(&path, BYTECODE).unwrap();
    assert_eq!(read_cached_bytecode(&path).as_deref(), Some(BYTECODE));
}

#[test]
fn wrong_magic_reads_as_miss() {
    let path = temp_path("bad_magic.spir");
    let mut data = Vec::new();
    data.extend_from_slice(b"NOPE");
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(BYTECODE);
    fs::write(&path, data).unwrap();
    assert_eq!(read_cached_bytecode(&path), None);
}

#[test]
fn wrong_version_reads_as_miss() {
    let path = temp_path("bad_version.spir");
    let mut data = Vec::new();
    data.extend_from_slice(&CACHE_MAGIC);
    data.extend_from_slice(&u32::MAX.to_le_bytes());
    data.extend_from_slice(BYTECODE);
    fs::write(&path, data).unwrap();
    assert_eq!(read_cached_bytecode(&path), None);
}

#[test]
fn truncated_file_reads_as_miss() {
    let path = temp_path("truncated.spir");
    fs::write(&path, b"TL").unwrap();
    assert_eq!(read_cached_bytecode(&path), None);

    let missing = temp_path("never_written.spir");
    assert_eq!(read_cached_bytecode(&missing), None);
}

// ============================================================================
// Freshness
// ============================================================================

#[test]
fn probe_hits_while_source_is_older_than_cache() {
    let path = temp_path("fresh.spir");
    write_cached_bytecode(&path, BYTECODE).unwrap();

    // Source written before the cache file: hit.
    let stale_source = SystemTime::now() - Duration::from_secs(3600);
    assert_eq!(probe_disk_cache(&path, stale_source).as_deref(), Some(BYTECODE));
}

#[test]
fn touching_the_source_past_the_cache_forces_a_recompile_decision() {
    let path = temp_path("touched.spir");
    write_cached_bytecode(&path, BYTECODE).unwrap();

    // Source edited after the cache was written: miss, which is exactly the
    // condition that routes the next load through the compiler.
    let edited_source = SystemTime::now() + Duration::from_secs(3600);
    assert_eq!(probe_disk_cache(&path, edited_source), None);
}

#[test]
fn probe_misses_when_no_cache_file_exists() {
    let path = temp_path("no_such.spir");
    assert_eq!(probe_disk_cache(&path, SystemTime::UNIX_EPOCH), None);
}

#[test]
fn equal_timestamps_count_as_fresh() {
    let stamp = SystemTime::now();
    assert!(is_cache_fresh(stamp, stamp));
}

// ============================================================================
// Keys
// ============================================================================

#[test]
fn identical_requests_share_one_key() {
    let path = PathBuf::from("/assets/shaders/forward.hlsl");

    let mut first = DefineList::new();
    first.set("USE_SHADOW_MAP", 1);
    first.set("LIGHT_COUNT", 4);

    let mut second = DefineList::new();
    second.set("LIGHT_COUNT", 4);
    second.set("USE_SHADOW_MAP", 1);

    // Same request, different define insertion order: one cache entry, and
    // therefore at most one compiler invocation.
    assert_eq!(
        cache_key(&path, "VSMain", ShaderStage::Vertex, &first),
        cache_key(&path, "VSMain", ShaderStage::Vertex, &second),
    );
}

#[test]
fn every_request_dimension_changes_the_key() {
    let path = PathBuf::from("/assets/shaders/forward.hlsl");
    let defines = DefineList::new();
    let base = cache_key(&path, "VSMain", ShaderStage::Vertex, &defines);

    assert_ne!(base, cache_key(&path, "PSMain", ShaderStage::Vertex, &defines));
    assert_ne!(base, cache_key(&path, "VSMain", ShaderStage::Fragment, &defines));
    assert_ne!(
        base,
        cache_key(&PathBuf::from("/assets/shaders/depth.hlsl"), "VSMain", ShaderStage::Vertex, &defines)
    );

    let mut with_define = DefineList::new();
    with_define.enable("ALPHA_TEST");
    assert_ne!(base, cache_key(&path, "VSMain", ShaderStage::Vertex, &with_define));
}

#[test]
fn key_reflects_canonical_define_serialization() {
    let mut defines = DefineList::new();
    defines.set("B", 2);
    defines.set("A", 1);
    assert_eq!(defines.to_string_canonical(), "#A=1#B=2");

    let mut reparsed = DefineList::new();
    reparsed.parse(&defines.to_string_canonical());
    assert_eq!(defines, reparsed);

    let path = PathBuf::from("/assets/shaders/forward.hlsl");
    assert_eq!(
        cache_key(&path, "main", ShaderStage::Compute, &defines),
        cache_key(&path, "main", ShaderStage::Compute, &reparsed),
    );
}
