//! Texture Unit Allocator
//!
//! Assigns textures to hardware texture units and evicts the least recently
//! used resident texture once every unit is occupied.
//!
//! # Layout
//!
//! The usage order is a doubly-linked list threaded through a fixed array of
//! unit slots: each slot stores the `prev`/`next` *unit index* of its
//! neighbours, so no slot ever points at another allocation. An index map
//! gives `TextureKey -> unit` lookups in O(1).
//!
//! ```text
//!   head (most recent)                           tail (least recent)
//!      unit 3  <──>  unit 0  <──>  unit 5  <──>  unit 1
//! ```
//!
//! # Pinning
//!
//! A texture referenced by the draw being prepared must not be evicted by a
//! later sampler of the same draw. Every slot remembers the draw stamp it was
//! last locked under; [`TextureUnitAllocator::begin_draw`] bumps the stamp,
//! which releases all locks at once.

use rustc_hash::FxHashMap;

use super::handles::TextureKey;
use crate::errors::{FrameError, Result};

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct UnitSlot {
    texture: Option<TextureKey>,
    prev: u32,
    next: u32,
    locked_at: u64,
}

impl UnitSlot {
    const EMPTY: Self = Self {
        texture: None,
        prev: NIL,
        next: NIL,
        locked_at: 0,
    };
}

/// Outcome of [`TextureUnitAllocator::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAssignment {
    /// The texture was already resident in this unit.
    Resident(u32),
    /// The texture was placed in a previously empty unit.
    Free(u32),
    /// `previous` was evicted to make room.
    Evicted { unit: u32, previous: TextureKey },
}

impl UnitAssignment {
    #[inline]
    #[must_use]
    pub fn unit(self) -> u32 {
        match self {
            Self::Resident(unit) | Self::Free(unit) | Self::Evicted { unit, .. } => unit,
        }
    }
}

#[derive(Debug)]
pub struct TextureUnitAllocator {
    slots: Vec<UnitSlot>,
    resident: FxHashMap<TextureKey, u32>,
    /// Most recently used unit.
    head: u32,
    /// Least recently used unit.
    tail: u32,
    draw_stamp: u64,
}

impl TextureUnitAllocator {
    #[must_use]
    pub fn new(units: u32) -> Self {
        Self {
            slots: vec![UnitSlot::EMPTY; units as usize],
            resident: FxHashMap::default(),
            head: NIL,
            tail: NIL,
            draw_stamp: 1,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Releases every lock taken for the previous draw.
    pub fn begin_draw(&mut self) {
        self.draw_stamp += 1;
    }

    #[inline]
    #[must_use]
    pub fn unit_of(&self, texture: TextureKey) -> Option<u32> {
        self.resident.get(&texture).copied()
    }

    #[must_use]
    pub fn texture_at(&self, unit: u32) -> Option<TextureKey> {
        self.slots.get(unit as usize).and_then(|slot| slot.texture)
    }

    #[must_use]
    pub fn is_locked(&self, unit: u32) -> bool {
        self.slots
            .get(unit as usize)
            .is_some_and(|slot| slot.locked_at == self.draw_stamp)
    }

    /// Pins `unit` for the rest of the current draw.
    pub fn lock(&mut self, unit: u32) {
        if let Some(slot) = self.slots.get_mut(unit as usize) {
            slot.locked_at = self.draw_stamp;
        }
    }

    /// Finds a unit for `texture`, marks it most recently used and locks it
    /// for the current draw.
    pub fn acquire(&mut self, texture: TextureKey) -> Result<UnitAssignment> {
        if let Some(unit) = self.unit_of(texture) {
            self.touch(unit);
            self.lock(unit);
            return Ok(UnitAssignment::Resident(unit));
        }

        if let Some(unit) = self.first_free_unit() {
            self.occupy(unit, texture);
            return Ok(UnitAssignment::Free(unit));
        }

        let unit = self.eviction_candidate().ok_or(FrameError::TextureUnitsExhausted {
            units: self.capacity(),
        })?;
        let previous = self.vacate(unit).ok_or(FrameError::TextureUnitsExhausted {
            units: self.capacity(),
        })?;
        self.occupy(unit, texture);
        Ok(UnitAssignment::Evicted { unit, previous })
    }

    /// Records an explicit bind of `texture` to `unit` (or clears the unit).
    ///
    /// Returns the texture that was displaced, if any.
    pub fn assign(&mut self, unit: u32, texture: Option<TextureKey>) -> Option<TextureKey> {
        if unit as usize >= self.slots.len() {
            return None;
        }
        if self.texture_at(unit) == texture {
            if texture.is_some() {
                self.touch(unit);
            }
            return None;
        }

        let displaced = self.vacate(unit);
        if let Some(texture) = texture {
            if let Some(other) = self.unit_of(texture) {
                self.vacate(other);
            }
            self.occupy(unit, texture);
        }
        displaced
    }

    /// Forgets `texture` (e.g. it was disposed). Returns the unit it held.
    pub fn release(&mut self, texture: TextureKey) -> Option<u32> {
        let unit = self.unit_of(texture)?;
        self.vacate(unit);
        Some(unit)
    }

    /// Forgets every assignment.
    pub fn reset(&mut self) {
        self.slots.fill(UnitSlot::EMPTY);
        self.resident.clear();
        self.head = NIL;
        self.tail = NIL;
        self.draw_stamp += 1;
    }

    /// Resident textures from most to least recently used.
    #[must_use]
    pub fn usage_order(&self) -> Vec<TextureKey> {
        let mut order = Vec::with_capacity(self.resident.len());
        let mut cursor = self.head;
        while cursor != NIL {
            let slot = &self.slots[cursor as usize];
            if let Some(texture) = slot.texture {
                order.push(texture);
            }
            cursor = slot.next;
        }
        order
    }

    // ─── List maintenance ─────────────────────────────────────────────

    fn first_free_unit(&self) -> Option<u32> {
        self.slots
            .iter()
            .position(|slot| slot.texture.is_none())
            .map(|index| index as u32)
    }

    /// Walks from the least recently used end, skipping pinned units.
    fn eviction_candidate(&self) -> Option<u32> {
        let mut cursor = self.tail;
        while cursor != NIL {
            let slot = &self.slots[cursor as usize];
            if slot.locked_at != self.draw_stamp {
                return Some(cursor);
            }
            cursor = slot.prev;
        }
        None
    }

    fn occupy(&mut self, unit: u32, texture: TextureKey) {
        let slot = &mut self.slots[unit as usize];
        slot.texture = Some(texture);
        slot.locked_at = self.draw_stamp;
        self.resident.insert(texture, unit);
        self.push_front(unit);
    }

    fn vacate(&mut self, unit: u32) -> Option<TextureKey> {
        let texture = self.slots[unit as usize].texture.take()?;
        self.unlink(unit);
        self.resident.remove(&texture);
        Some(texture)
    }

    fn touch(&mut self, unit: u32) {
        if self.head != unit {
            self.unlink(unit);
            self.push_front(unit);
        }
    }

    fn push_front(&mut self, unit: u32) {
        let old_head = self.head;
        {
            let slot = &mut self.slots[unit as usize];
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head == NIL {
            self.tail = unit;
        } else {
            self.slots[old_head as usize].prev = unit;
        }
        self.head = unit;
    }

    fn unlink(&mut self, unit: u32) {
        let UnitSlot { prev, next, .. } = self.slots[unit as usize];
        if prev == NIL {
            if self.head == unit {
                self.head = next;
            }
        } else {
            self.slots[prev as usize].next = next;
        }
        if next == NIL {
            if self.tail == unit {
                self.tail = prev;
            }
        } else {
            self.slots[next as usize].prev = prev;
        }
        let slot = &mut self.slots[unit as usize];
        slot.prev = NIL;
        slot.next = NIL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(n: usize) -> Vec<TextureKey> {
        let mut map: SlotMap<TextureKey, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn fills_free_units_before_evicting() {
        let t = keys(3);
        let mut units = TextureUnitAllocator::new(2);

        assert_eq!(units.acquire(t[0]).unwrap(), UnitAssignment::Free(0));
        assert_eq!(units.acquire(t[1]).unwrap(), UnitAssignment::Free(1));
        units.begin_draw();
        assert_eq!(
            units.acquire(t[2]).unwrap(),
            UnitAssignment::Evicted { unit: 0, previous: t[0] }
        );
    }

    #[test]
    fn resident_texture_moves_to_front() {
        let t = keys(3);
        let mut units = TextureUnitAllocator::new(3);
        for &key in &t {
            units.acquire(key).unwrap();
        }
        assert_eq!(units.usage_order(), vec![t[2], t[1], t[0]]);

        units.begin_draw();
        assert_eq!(units.acquire(t[0]).unwrap(), UnitAssignment::Resident(0));
        assert_eq!(units.usage_order(), vec![t[0], t[2], t[1]]);
    }

    #[test]
    fn locked_units_survive_eviction() {
        let t = keys(3);
        let mut units = TextureUnitAllocator::new(2);
        units.acquire(t[0]).unwrap();
        units.acquire(t[1]).unwrap();

        // Both units are pinned by the same draw.
        assert!(matches!(
            units.acquire(t[2]),
            Err(FrameError::TextureUnitsExhausted { units: 2 })
        ));

        units.begin_draw();
        units.acquire(t[0]).unwrap();
        // t[0] is pinned and more recent; t[1] is the only candidate.
        assert_eq!(
            units.acquire(t[2]).unwrap(),
            UnitAssignment::Evicted { unit: 1, previous: t[1] }
        );
    }

    #[test]
    fn explicit_assignment_moves_texture() {
        let t = keys(2);
        let mut units = TextureUnitAllocator::new(4);
        units.acquire(t[0]).unwrap();

        assert_eq!(units.assign(3, Some(t[0])), None);
        assert_eq!(units.unit_of(t[0]), Some(3));
        assert_eq!(units.texture_at(0), None);

        assert_eq!(units.assign(3, Some(t[1])), Some(t[0]));
        assert_eq!(units.unit_of(t[0]), None);
        assert_eq!(units.resident_count(), 1);
    }

    #[test]
    fn release_and_reset_clear_the_ledger() {
        let t = keys(2);
        let mut units = TextureUnitAllocator::new(2);
        units.acquire(t[0]).unwrap();
        units.acquire(t[1]).unwrap();

        assert_eq!(units.release(t[0]), Some(0));
        assert_eq!(units.usage_order(), vec![t[1]]);

        units.reset();
        assert_eq!(units.resident_count(), 0);
        assert!(units.usage_order().is_empty());
    }
}
