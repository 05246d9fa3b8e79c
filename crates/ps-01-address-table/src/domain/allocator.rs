//! # Slot Allocators
//!
//! Fixed-capacity index allocators for process slots, owner slots and
//! per-owner allocation ids.
//!
//! | Allocator | Capacity | Reuse order |
//! |-----------|----------|-------------|
//! | `BitmaskAllocator<N>` | N <= 64 | lowest free index |
//! | `RingAllocator` | any | oldest freed index, then fresh |

use std::collections::VecDeque;

/// Common allocator interface.
pub trait IndexAllocator {
    /// Number of slots.
    fn capacity(&self) -> usize;

    /// Slots in use.
    fn allocated(&self) -> usize;

    /// Index the next `allocate` returns, if any.
    fn next_free(&self) -> Option<usize>;

    /// Take the next free index.
    fn allocate(&mut self) -> Option<usize>;

    /// Take a specific index. False if taken or out of range.
    fn allocate_at(&mut self, index: usize) -> bool;

    /// Return an index. False if it was not allocated.
    fn free(&mut self, index: usize) -> bool;

    /// True when `index` is in use.
    fn is_allocated(&self, index: usize) -> bool;

    /// True when nothing is allocated.
    fn is_empty(&self) -> bool {
        self.allocated() == 0
    }

    /// True when every slot is allocated.
    fn is_full(&self) -> bool {
        self.allocated() == self.capacity()
    }
}

// =============================================================================
// BITMASK ALLOCATOR
// =============================================================================

/// Up to 64 slots in a single word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmaskAllocator<const N: usize> {
    bits: u64,
}

impl<const N: usize> BitmaskAllocator<N> {
    const CAPACITY_OK: () = assert!(N > 0 && N <= 64, "bitmask allocator holds 1..=64 slots");

    const MASK: u64 = u64::MAX >> (64 - N);

    /// Create an empty allocator.
    pub fn new() -> Self {
        let () = Self::CAPACITY_OK;
        Self { bits: 0 }
    }
}

impl<const N: usize> Default for BitmaskAllocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IndexAllocator for BitmaskAllocator<N> {
    fn capacity(&self) -> usize {
        N
    }

    fn allocated(&self) -> usize {
        self.bits.count_ones() as usize
    }

    fn next_free(&self) -> Option<usize> {
        let free = !self.bits & Self::MASK;
        (free != 0).then(|| free.trailing_zeros() as usize)
    }

    fn allocate(&mut self) -> Option<usize> {
        let index = self.next_free()?;
        self.bits |= 1 << index;
        Some(index)
    }

    fn allocate_at(&mut self, index: usize) -> bool {
        if index >= N || self.is_allocated(index) {
            return false;
        }
        self.bits |= 1 << index;
        true
    }

    fn free(&mut self, index: usize) -> bool {
        if !self.is_allocated(index) {
            return false;
        }
        self.bits &= !(1 << index);
        true
    }

    fn is_allocated(&self, index: usize) -> bool {
        index < N && self.bits & (1 << index) != 0
    }
}

// =============================================================================
// RING ALLOCATOR
// =============================================================================

/// Any capacity. Fresh indices are handed out lazily, freed ones are
/// recycled oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingAllocator {
    capacity: usize,
    high_water: usize,
    released: VecDeque<usize>,
    in_use: Vec<bool>,
}

impl RingAllocator {
    /// Create an empty allocator with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            high_water: 0,
            released: VecDeque::new(),
            in_use: Vec::new(),
        }
    }

    fn mark(&mut self, index: usize, used: bool) {
        if index >= self.in_use.len() {
            self.in_use.resize(index + 1, false);
        }
        self.in_use[index] = used;
    }
}

impl IndexAllocator for RingAllocator {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn allocated(&self) -> usize {
        self.in_use.iter().filter(|used| **used).count()
    }

    fn next_free(&self) -> Option<usize> {
        if let Some(&index) = self.released.front() {
            return Some(index);
        }
        (self.high_water < self.capacity).then_some(self.high_water)
    }

    fn allocate(&mut self) -> Option<usize> {
        let index = match self.released.pop_front() {
            Some(index) => index,
            None if self.high_water < self.capacity => {
                self.high_water += 1;
                self.high_water - 1
            }
            None => return None,
        };
        self.mark(index, true);
        Some(index)
    }

    fn allocate_at(&mut self, index: usize) -> bool {
        if index >= self.capacity || self.is_allocated(index) {
            return false;
        }
        if index >= self.high_water {
            self.released.extend(self.high_water..index);
            self.high_water = index + 1;
        } else {
            self.released.retain(|&i| i != index);
        }
        self.mark(index, true);
        true
    }

    fn free(&mut self, index: usize) -> bool {
        if !self.is_allocated(index) {
            return false;
        }
        self.mark(index, false);
        self.released.push_back(index);
        true
    }

    fn is_allocated(&self, index: usize) -> bool {
        self.in_use.get(index).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sixteen_slot_allocator_fills_and_drains() {
        let mut allocator = BitmaskAllocator::<16>::new();
        assert!(allocator.is_empty());

        let mut seen = HashSet::new();
        for _ in 0..16 {
            let index = allocator.allocate().unwrap();
            assert!(seen.insert(index), "duplicate index {index}");
        }
        assert!(allocator.is_full());
        assert_eq!(allocator.next_free(), None);
        assert_eq!(allocator.allocate(), None);

        for index in seen {
            assert!(allocator.free(index));
        }
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_bitmask_reuses_lowest() {
        let mut allocator = BitmaskAllocator::<8>::new();
        for _ in 0..4 {
            allocator.allocate();
        }
        allocator.free(1);
        allocator.free(3);
        assert_eq!(allocator.next_free(), Some(1));
        assert!(!allocator.free(1));
        assert!(allocator.allocate_at(3));
        assert!(!allocator.allocate_at(3));
        assert!(!allocator.allocate_at(8));
    }

    #[test]
    fn test_bitmask_default_is_empty_new() {
        let mut allocator = BitmaskAllocator::<4>::default();
        assert_eq!(allocator, BitmaskAllocator::<4>::new());
        assert_eq!(allocator.capacity(), 4);
        for expected in 0..4 {
            assert_eq!(allocator.allocate(), Some(expected));
        }
        assert_eq!(allocator.allocate(), None);
    }

    #[test]
    fn test_bitmask_full_width() {
        let mut allocator = BitmaskAllocator::<64>::new();
        for _ in 0..64 {
            allocator.allocate().unwrap();
        }
        assert!(allocator.is_full());
        assert!(allocator.free(63));
        assert_eq!(allocator.next_free(), Some(63));
    }

    #[test]
    fn test_ring_recycles_oldest_freed() {
        let mut ring = RingAllocator::new(4);
        assert_eq!(ring.allocate(), Some(0));
        assert_eq!(ring.allocate(), Some(1));
        assert_eq!(ring.allocate(), Some(2));
        ring.free(1);
        ring.free(0);
        assert_eq!(ring.allocate(), Some(1));
        assert_eq!(ring.allocate(), Some(0));
        assert_eq!(ring.allocate(), Some(3));
        assert!(ring.is_full());
        assert_eq!(ring.allocate(), None);
    }

    #[test]
    fn test_ring_allocate_at_skips_ahead() {
        let mut ring = RingAllocator::new(8);
        assert!(ring.allocate_at(3));
        assert!(ring.is_allocated(3));
        assert_eq!(ring.allocate(), Some(0));
        assert_eq!(ring.allocate(), Some(1));
        assert_eq!(ring.allocate(), Some(2));
        assert_eq!(ring.allocate(), Some(4));
        assert_eq!(ring.allocated(), 5);
    }

    #[test]
    fn test_ring_random_churn_never_duplicates() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut ring = RingAllocator::new(32);
        let mut live = HashSet::new();
        for _ in 0..1_000 {
            if rng.gen_bool(0.6) {
                if let Some(index) = ring.allocate() {
                    assert!(live.insert(index));
                }
            } else {
                let victim = live.iter().next().copied();
                if let Some(index) = victim {
                    live.remove(&index);
                    assert!(ring.free(index));
                }
            }
            assert_eq!(ring.allocated(), live.len());
        }
    }
}
