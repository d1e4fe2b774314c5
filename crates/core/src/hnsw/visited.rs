//! Epoch-stamped visited marks for graph traversal.
//!
//! A `HashSet<u32>` per search layer is replaced by a flat array of stamps.
//! Starting a new traversal bumps the epoch instead of zeroing the array, so
//! resetting is O(1) except when the u16 epoch wraps.

#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    epoch: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: vec![0; capacity],
            epoch: 1,
        }
    }

    /// Forget every mark. Zeroes the array only when the epoch wraps.
    pub fn clear(&mut self) {
        match self.epoch.checked_add(1) {
            Some(next) => self.epoch = next,
            None => {
                self.stamps.fill(0);
                self.epoch = 1;
            }
        }
    }

    /// Grow to cover handles `0..cap`. Never shrinks.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.stamps.len() {
            self.stamps.resize(cap, 0);
        }
    }

    /// Marks `handle`; returns `true` the first time it is seen this epoch.
    #[inline]
    pub fn insert(&mut self, handle: u32) -> bool {
        let slot = &mut self.stamps[handle as usize];
        if *slot == self.epoch {
            return false;
        }
        *slot = self.epoch;
        true
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_reset_between_traversals() {
        let mut v = VisitedSet::new(8);
        assert!(v.insert(3));
        assert!(!v.insert(3));
        v.clear();
        assert!(v.insert(3));
    }

    #[test]
    fn test_epoch_wrap_zeroes_stamps() {
        let mut v = VisitedSet::new(4);
        v.epoch = u16::MAX;
        assert!(v.insert(2));
        v.clear();
        assert_eq!(v.epoch, 1);
        assert!(v.insert(2));
    }

    #[test]
    fn test_ensure_capacity_grows_only() {
        let mut v = VisitedSet::new(2);
        v.ensure_capacity(10);
        assert!(v.insert(9));
        v.ensure_capacity(1);
        assert_eq!(v.stamps.len(), 10);
    }
}
