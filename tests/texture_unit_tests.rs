//! Texture Unit Allocator Tests
//!
//! Tests for:
//! - LRU order against a reference queue over a pseudo-random access pattern
//! - Eviction of the least recently used unit
//! - Locked units surviving eviction within a draw
//! - Exhaustion when every unit is pinned by the current draw
//! - Allocation through `GpuStateCache::bind_texture_to_next_available_unit`

use std::collections::VecDeque;

use slotmap::SlotMap;

use myth_frame::FrameError;
use myth_frame::gpu::{
    Capabilities, GpuStateCache, NativeCall, RecordingApi, TextureDesc, TextureKey, TextureUnitAllocator,
    UnitAssignment,
};

fn texture_keys(n: usize) -> Vec<TextureKey> {
    let mut arena: SlotMap<TextureKey, ()> = SlotMap::with_key();
    (0..n).map(|_| arena.insert(())).collect()
}

/// Small deterministic LCG so the access pattern is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 33) as usize) % bound
    }
}

// ============================================================================
// LRU Order
// ============================================================================

#[test]
fn usage_order_matches_reference_queue() {
    const UNITS: usize = 4;
    let textures = texture_keys(9);
    let mut allocator = TextureUnitAllocator::new(UNITS as u32);
    // Front = most recently used.
    let mut reference: VecDeque<TextureKey> = VecDeque::new();
    let mut rng = Lcg(0x5eed);

    for step in 0..500 {
        let texture = textures[rng.next(textures.len())];
        allocator.begin_draw();
        let assignment = allocator.acquire(texture).unwrap();

        if let Some(position) = reference.iter().position(|key| *key == texture) {
            reference.remove(position);
            assert!(matches!(assignment, UnitAssignment::Resident(_)), "step {step}: expected resident");
        } else if reference.len() == UNITS {
            let evicted = reference.pop_back().unwrap();
            assert!(
                matches!(assignment, UnitAssignment::Evicted { previous, .. } if previous == evicted),
                "step {step}: expected eviction of the least recently used texture"
            );
        } else {
            assert!(matches!(assignment, UnitAssignment::Free(_)), "step {step}: expected a free unit");
        }
        reference.push_front(texture);

        assert_eq!(allocator.usage_order(), reference.iter().copied().collect::<Vec<_>>(), "step {step}");
        assert_eq!(allocator.unit_of(texture), Some(assignment.unit()));
    }
}

#[test]
fn resident_count_never_exceeds_capacity() {
    let textures = texture_keys(12);
    let mut allocator = TextureUnitAllocator::new(3);
    for &texture in &textures {
        allocator.begin_draw();
        allocator.acquire(texture).unwrap();
        assert!(allocator.resident_count() <= 3);
    }
    assert_eq!(allocator.usage_order(), vec![textures[11], textures[10], textures[9]]);
}

// ============================================================================
// Locks & Exhaustion
// ============================================================================

#[test]
fn locked_unit_is_not_evicted() {
    let t = texture_keys(3);
    let mut allocator = TextureUnitAllocator::new(2);
    allocator.acquire(t[0]).unwrap();
    allocator.acquire(t[1]).unwrap();

    allocator.begin_draw();
    // t[0] is least recently used but pinned for this draw.
    allocator.lock(0);
    assert!(allocator.is_locked(0));
    let assignment = allocator.acquire(t[2]).unwrap();
    assert_eq!(assignment, UnitAssignment::Evicted { unit: 1, previous: t[1] });
    assert_eq!(allocator.unit_of(t[0]), Some(0));
}

#[test]
fn all_units_pinned_is_exhaustion() {
    let t = texture_keys(3);
    let mut allocator = TextureUnitAllocator::new(2);
    allocator.acquire(t[0]).unwrap();
    allocator.acquire(t[1]).unwrap();

    let result = allocator.acquire(t[2]);
    assert!(matches!(result, Err(FrameError::TextureUnitsExhausted { units: 2 })));
    // Nothing was displaced by the failed attempt.
    assert_eq!(allocator.usage_order(), vec![t[1], t[0]]);
}

#[test]
fn begin_draw_releases_locks() {
    let t = texture_keys(1);
    let mut allocator = TextureUnitAllocator::new(1);
    allocator.acquire(t[0]).unwrap();
    assert!(allocator.is_locked(0));
    allocator.begin_draw();
    assert!(!allocator.is_locked(0));
}

// ============================================================================
// Through the State Cache
// ============================================================================

#[test]
fn state_cache_reuses_resident_units() {
    let (api, probe) = RecordingApi::with_capabilities(Capabilities {
        max_texture_units: 2,
        ..Capabilities::default()
    });
    let mut gpu = GpuStateCache::new(Box::new(api), None);
    let textures: Vec<_> = (0..3)
        .map(|i| gpu.register_texture(TextureDesc::with_data(format!("t{i}"), 1, 1, vec![0; 4])).unwrap())
        .collect();

    gpu.begin_draw();
    assert_eq!(gpu.bind_texture_to_next_available_unit(textures[0]).unwrap(), Some(0));
    gpu.begin_draw();
    assert_eq!(gpu.bind_texture_to_next_available_unit(textures[1]).unwrap(), Some(1));
    gpu.begin_draw();
    assert_eq!(gpu.bind_texture_to_next_available_unit(textures[0]).unwrap(), Some(0));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::BindTexture(_, Some(_)))), 2);

    // textures[1] is now least recently used.
    gpu.begin_draw();
    assert_eq!(gpu.bind_texture_to_next_available_unit(textures[2]).unwrap(), Some(1));
    assert_eq!(gpu.texture_units().unit_of(textures[1]), None);
}

#[test]
fn state_cache_reports_exhaustion_within_one_draw() {
    let (api, _probe) = RecordingApi::with_capabilities(Capabilities {
        max_texture_units: 2,
        ..Capabilities::default()
    });
    let mut gpu = GpuStateCache::new(Box::new(api), None);
    let textures: Vec<_> = (0..3)
        .map(|i| gpu.register_texture(TextureDesc::with_data(format!("t{i}"), 1, 1, vec![0; 4])).unwrap())
        .collect();

    gpu.begin_draw();
    gpu.bind_texture_to_next_available_unit(textures[0]).unwrap();
    gpu.bind_texture_to_next_available_unit(textures[1]).unwrap();
    let result = gpu.bind_texture_to_next_available_unit(textures[2]);
    assert!(matches!(result, Err(FrameError::TextureUnitsExhausted { units: 2 })));
}
