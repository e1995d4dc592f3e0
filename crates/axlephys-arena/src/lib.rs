//! Fixed-capacity arenas with stable generational handles.
//!
//! Records live in dense backing storage split into an awake prefix
//! `[0 .. active)` and a sleeping suffix `[active .. len)`. The solver walks
//! the awake prefix only. Removal swap-fills from the end of each region; a
//! sparse indirection table keeps external handles valid across the moves,
//! and a bumped generation turns handles to freed records into
//! `Error::StaleHandle` instead of aliasing a reused slot.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

use axlephys_core::error::{Error, Result};

/// Stable reference to a record in an [`Arena`].
///
/// `index` addresses the indirection table, never the dense storage, so the
/// handle survives defragmentation.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    pub fn index(&self) -> u32 { self.index }
    #[inline]
    pub fn generation(&self) -> u32 { self.generation }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self { *self }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}
impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[derive(Clone, Copy)]
struct TableEntry {
    slot: u32,
    generation: u32,
    live: bool,
}

/// Fixed-capacity storage with active-prefix packing.
pub struct Arena<T> {
    slots: Vec<T>,
    /// Dense slot -> indirection-table index, kept in lockstep with `slots`.
    slot_to_table: Vec<u32>,
    table: Vec<TableEntry>,
    free: Vec<u32>,
    active: usize,
    capacity: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            slot_to_table: Vec::with_capacity(capacity),
            table: Vec::with_capacity(capacity),
            free: Vec::new(),
            active: 0,
            capacity,
        }
    }

    /// Number of live records (awake and sleeping).
    #[inline]
    pub fn len(&self) -> usize { self.slots.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    /// Number of awake records, i.e. the length of the solver-visible prefix.
    #[inline]
    pub fn active_count(&self) -> usize { self.active }

    #[inline]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Inserts a record, awake. Fails with `CapacityExceeded` when full.
    pub fn insert(&mut self, value: T) -> Result<Handle<T>> {
        if self.slots.len() == self.capacity {
            return Err(Error::CapacityExceeded);
        }
        let table_index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.table.push(TableEntry { slot: 0, generation: 0, live: false });
                (self.table.len() - 1) as u32
            }
        };
        let slot = self.slots.len();
        self.slots.push(value);
        self.slot_to_table.push(table_index);
        let entry = &mut self.table[table_index as usize];
        entry.slot = slot as u32;
        entry.live = true;
        let generation = entry.generation;
        // New records land at the end of the sleeping suffix; pull the record
        // into the awake prefix.
        let slot = self.swap_slots(slot, self.active);
        debug_assert_eq!(slot, self.active);
        self.active += 1;
        Ok(Handle { index: table_index, generation, _marker: PhantomData })
    }

    /// Inserts a zero-initialised record.
    pub fn alloc(&mut self) -> Result<Handle<T>>
    where
        T: Default,
    {
        self.insert(T::default())
    }

    /// Removes a record, returning it. The last record of the region it
    /// occupied is swapped into the vacated slot.
    pub fn free(&mut self, handle: Handle<T>) -> Result<T> {
        let mut slot = self.resolve(handle)? as usize;
        if slot < self.active {
            slot = self.swap_slots(slot, self.active - 1);
            self.active -= 1;
        }
        let last = self.slots.len() - 1;
        self.swap_slots(slot, last);
        let value = self.slots.pop().expect("live arena slot");
        self.slot_to_table.pop();
        let entry = &mut self.table[handle.index as usize];
        entry.live = false;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(value)
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        let slot = self.resolve(handle)?;
        Ok(&self.slots[slot as usize])
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        let slot = self.resolve(handle)?;
        Ok(&mut self.slots[slot as usize])
    }

    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.resolve(handle).is_ok()
    }

    /// Whether the record sits in the awake prefix.
    pub fn is_active(&self, handle: Handle<T>) -> Result<bool> {
        let slot = self.resolve(handle)?;
        Ok((slot as usize) < self.active)
    }

    /// Moves a record across the awake/sleeping boundary.
    pub fn set_active(&mut self, handle: Handle<T>, awake: bool) -> Result<()> {
        let slot = self.resolve(handle)? as usize;
        if awake && slot >= self.active {
            self.swap_slots(slot, self.active);
            self.active += 1;
        } else if !awake && slot < self.active {
            self.swap_slots(slot, self.active - 1);
            self.active -= 1;
        }
        Ok(())
    }

    /// The awake prefix, each live record exactly once, order unspecified.
    #[inline]
    pub fn iter_active(&self) -> &[T] {
        &self.slots[..self.active]
    }

    #[inline]
    pub fn iter_active_mut(&mut self) -> &mut [T] {
        &mut self.slots[..self.active]
    }

    /// All live records, awake then sleeping.
    #[inline]
    pub fn iter_all(&self) -> &[T] {
        &self.slots
    }

    /// Direct access by dense slot. The caller owns the `< len` invariant;
    /// used by the solver which walks the awake prefix by index.
    #[inline]
    pub fn slot(&self, slot: usize) -> &T {
        &self.slots[slot]
    }

    #[inline]
    pub fn slot_mut(&mut self, slot: usize) -> &mut T {
        &mut self.slots[slot]
    }

    /// Resolves a handle to the dense slot it currently occupies.
    pub fn resolve_slot(&self, handle: Handle<T>) -> Result<usize> {
        self.resolve(handle).map(|slot| slot as usize)
    }

    /// Base pointer of the dense storage. The solver's partitioned passes
    /// write disjoint records through it while the arena structure is frozen.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.slots.as_mut_ptr()
    }

    /// Recovers the stable handle of the record at a dense slot.
    pub fn handle_at_slot(&self, slot: usize) -> Handle<T> {
        let table_index = self.slot_to_table[slot];
        let entry = self.table[table_index as usize];
        Handle { index: table_index, generation: entry.generation, _marker: PhantomData }
    }

    fn resolve(&self, handle: Handle<T>) -> Result<u32> {
        let entry = self
            .table
            .get(handle.index as usize)
            .ok_or(Error::StaleHandle)?;
        if !entry.live || entry.generation != handle.generation {
            return Err(Error::StaleHandle);
        }
        Ok(entry.slot)
    }

    /// Swaps two dense slots, patching the indirection table on both sides.
    /// Returns `b`, the slot the record from `a` now occupies.
    fn swap_slots(&mut self, a: usize, b: usize) -> usize {
        if a != b {
            self.slots.swap(a, b);
            self.slot_to_table.swap(a, b);
            let ta = self.slot_to_table[a];
            let tb = self.slot_to_table[b];
            self.table[ta as usize].slot = a as u32;
            self.table[tb as usize].slot = b as u32;
        }
        b
    }
}
