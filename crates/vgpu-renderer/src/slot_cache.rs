/// Fixed-capacity cache with linear-scan lookup and least-recently-used replacement.
///
/// Slots are filled in order until the cache is full; after that a miss takes over the slot whose
/// age `now - last_used` is largest, the lowest index winning ties. `now` is a logical time supplied
/// by the caller (the processor's cache clock), not wall time.
#[derive(Debug)]
pub struct SlotCache<K, V> {
    slots: Vec<Slot<K, V>>,
    capacity: usize,
}

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    last_used: u64,
}

impl<K: PartialEq, V> SlotCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "slot cache capacity must be > 0");
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn find(&self, key: &K) -> Option<usize> {
        self.slots.iter().position(|slot| slot.key == *key)
    }

    pub fn key(&self, index: usize) -> Option<&K> {
        self.slots.get(index).map(|slot| &slot.key)
    }

    pub fn get(&self, index: usize) -> Option<&V> {
        self.slots.get(index).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut V> {
        self.slots.get_mut(index).map(|slot| &mut slot.value)
    }

    pub fn last_used(&self, index: usize) -> Option<u64> {
        self.slots.get(index).map(|slot| slot.last_used)
    }

    pub fn touch(&mut self, index: usize, now: u64) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.last_used = now;
        }
    }

    /// Index of the least recently used slot, or `None` when the cache is empty.
    pub fn lru_index(&self, now: u64) -> Option<usize> {
        let mut oldest: Option<(usize, u64)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let age = now.wrapping_sub(slot.last_used);
            if oldest.map_or(true, |(_, oldest_age)| age > oldest_age) {
                oldest = Some((index, age));
            }
        }
        oldest.map(|(index, _)| index)
    }

    /// Appends a new slot. The caller must check [`Self::is_full`] first.
    pub fn push(&mut self, key: K, value: V, now: u64) -> usize {
        debug_assert!(!self.is_full(), "push into a full slot cache");
        self.slots.push(Slot {
            key,
            value,
            last_used: now,
        });
        self.slots.len() - 1
    }

    /// Rebinds the slot at `index` to `key`, keeping its value, and returns the previous key.
    pub fn reassign(&mut self, index: usize, key: K, now: u64) -> K {
        let slot = &mut self.slots[index];
        slot.last_used = now;
        std::mem::replace(&mut slot.key, key)
    }

    /// Replaces the slot at `index` entirely and returns its previous key and value.
    pub fn replace(&mut self, index: usize, key: K, value: V, now: u64) -> (K, V) {
        let old = std::mem::replace(
            &mut self.slots[index],
            Slot {
                key,
                value,
                last_used: now,
            },
        );
        (old.key, old.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().map(|slot| (&slot.key, &slot.value))
    }
}
