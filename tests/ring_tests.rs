//! Transient Allocator Tests
//!
//! Tests for:
//! - Ring: bounds invariants, padding arithmetic, head/tail discipline
//! - RingWithTabs: per-window retirement, failure-charges-nothing
//! - The frame-in-flight schedule a DynamicBufferRing runs over a
//!   2,048-byte, 2-window ring with 256-byte-aligned requests

use talos::{Ring, RingWithTabs};

/// 256-byte alignment applied by the dynamic buffer ring.
fn aligned(size: u32) -> u32 {
    (size + 255) & !255
}

// ============================================================================
// Ring
// ============================================================================

#[test]
fn allocated_size_stays_in_bounds_across_random_traffic() {
    let total = 1024;
    let mut ring = Ring::new(total);
    let mut outstanding: Vec<u32> = Vec::new();

    // Deterministic pseudo-random sizes.
    let mut state = 0x2545_f491u32;
    for _ in 0..500 {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let size = state % 200 + 1;

        if state % 3 == 0 && !outstanding.is_empty() {
            let freed = outstanding.remove(0);
            assert!(ring.free(freed));
        } else {
            let padding = ring.padding_to_avoid_crossover(size);
            if padding + size <= ring.allocatable_size() {
                if padding > 0 {
                    ring.alloc(padding);
                }
                assert!(ring.alloc(size).is_some());
                outstanding.push(size + padding);
            }
        }
        assert!(ring.allocated() <= total, "allocated exceeded capacity");
    }
}

#[test]
fn free_never_goes_negative() {
    let mut ring = Ring::new(128);
    assert!(!ring.free(1));
    ring.alloc(64);
    assert!(!ring.free(65));
    assert!(ring.free(64));
    assert_eq!(ring.allocated(), 0);
}

#[test]
fn padding_is_charged_before_the_chunk() {
    let mut ring = Ring::new(1000);
    ring.alloc(900);
    ring.free(900);
    // head = tail = 900; a 200-byte chunk needs 100 bytes of padding.
    assert_eq!(ring.padding_to_avoid_crossover(200), 100);
    assert_eq!(ring.alloc(100), Some(900));
    assert_eq!(ring.alloc(200), Some(0));
}

// ============================================================================
// RingWithTabs
// ============================================================================

#[test]
fn window_zero_bytes_return_after_n_begin_frames() {
    const WINDOWS: usize = 4;
    let mut ring = RingWithTabs::new(WINDOWS, 4096);
    ring.alloc(1000);
    ring.alloc(500);
    let free_before = ring.allocatable_size();

    for frame in 0..WINDOWS {
        if frame == WINDOWS - 1 {
            assert_eq!(ring.allocatable_size(), free_before);
        }
        ring.on_begin_frame();
    }
    assert_eq!(ring.allocatable_size(), 4096);
}

#[test]
fn failed_alloc_leaves_allocatable_size_unchanged() {
    let mut ring = RingWithTabs::new(2, 1024);
    ring.alloc(800);
    let before = ring.allocatable_size();
    assert_eq!(ring.alloc(512), None);
    assert_eq!(ring.allocatable_size(), before);
}

// ============================================================================
// Frame-in-flight schedule (dynamic buffer ring layout)
// ============================================================================

#[test]
fn third_frame_fits_only_after_first_window_retires() {
    // 300-byte requests align to 512; two per frame fill half the ring.
    let chunk = aligned(300);
    assert_eq!(chunk, 512);
    let mut ring = RingWithTabs::new(2, 2048);

    // Frame 1.
    assert!(ring.alloc(chunk).is_some());
    assert!(ring.alloc(chunk).is_some());
    ring.on_begin_frame();

    // Frame 2 fills the ring; frame 1's window is still in flight.
    assert!(ring.alloc(chunk).is_some());
    assert!(ring.alloc(chunk).is_some());
    assert_eq!(ring.alloc(chunk), None, "frame 1's window must still be live");

    // The second frame boundary retires frame 1's window.
    ring.on_begin_frame();
    assert!(ring.alloc(chunk).is_some(), "retired bytes must be reusable");
}
