//! Fixed-capacity slot arena with generation-checked handles.
//!
//! Backs sessions, in-flight commands and subscription records. A
//! [`SlotRef`] packs a slot index and the slot's generation into one
//! `u32`, which is what crosses the channel to the peer: it names a slot
//! without being an address, and a value that was released (or never
//! issued) fails the generation check instead of aliasing whatever now
//! lives in the slot.
//!
//! ```text
//!   31            16 15             0
//!  ┌────────────────┬────────────────┐
//!  │   generation   │   index + 1    │     0 is never a valid handle
//!  └────────────────┴────────────────┘
//! ```

use core::num::NonZeroU32;

use crate::error::PoolExhausted;

/// Largest pool the handle layout can address.
pub const MAX_POOL_CAPACITY: usize = 0xFFFF;

/// Generation-checked slot handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef(NonZeroU32);

impl SlotRef {
    fn new(index: usize, generation: u16) -> Self {
        let raw = (u32::from(generation) << 16) | (index as u32 + 1);
        // index + 1 is never zero.
        Self(NonZeroU32::new(raw).unwrap_or(NonZeroU32::MIN))
    }

    /// Reinterpret a value received from a peer. Only rejects the
    /// obviously invalid zero; the pool does the real check.
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw & 0xFFFF == 0 {
            return None;
        }
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }

    pub fn index(self) -> usize {
        (self.0.get() & 0xFFFF) as usize - 1
    }

    pub fn generation(self) -> u16 {
        (self.0.get() >> 16) as u16
    }
}

struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

/// Bounded arena. Allocation never grows it.
pub struct Pool<T> {
    name: &'static str,
    slots: Vec<Slot<T>>,
    live: usize,
}

impl<T> Pool<T> {
    /// `capacity` is clamped to [`MAX_POOL_CAPACITY`].
    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.min(MAX_POOL_CAPACITY);
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        Self {
            name,
            slots,
            live: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Place `value` in the lowest free slot.
    pub fn alloc(&mut self, value: T) -> Result<SlotRef, PoolExhausted> {
        let Some(index) = self.slots.iter().position(|s| s.value.is_none()) else {
            return Err(PoolExhausted(self.name));
        };
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        self.live += 1;
        Ok(SlotRef::new(index, slot.generation))
    }

    fn slot(&self, r: SlotRef) -> Option<&Slot<T>> {
        self.slots
            .get(r.index())
            .filter(|s| s.generation == r.generation() && s.value.is_some())
    }

    pub fn contains(&self, r: SlotRef) -> bool {
        self.slot(r).is_some()
    }

    pub fn get(&self, r: SlotRef) -> Option<&T> {
        self.slot(r).and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, r: SlotRef) -> Option<&mut T> {
        self.slots
            .get_mut(r.index())
            .filter(|s| s.generation == r.generation())
            .and_then(|s| s.value.as_mut())
    }

    /// Take the value out and retire the handle. Returns `None` for a
    /// stale or foreign handle; a slot is released at most once.
    pub fn release(&mut self, r: SlotRef) -> Option<T> {
        let slot = self
            .slots
            .get_mut(r.index())
            .filter(|s| s.generation == r.generation())?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        Some(value)
    }

    /// Release every value matching `pred`, returning them with the
    /// handles they had.
    pub fn release_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<(SlotRef, T)> {
        let mut out = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.as_ref().is_some_and(&mut pred) {
                let r = SlotRef::new(index, slot.generation);
                if let Some(v) = slot.value.take() {
                    slot.generation = slot.generation.wrapping_add(1);
                    self.live -= 1;
                    out.push((r, v));
                }
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotRef, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, s)| {
            s.value
                .as_ref()
                .map(|v| (SlotRef::new(index, s.generation), v))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotRef, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, s)| {
            let generation = s.generation;
            s.value
                .as_mut()
                .map(move |v| (SlotRef::new(index, generation), v))
        })
    }
}
