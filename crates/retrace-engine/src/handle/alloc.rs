/// Exclusive upper bound on handle values in every category.
///
/// Occupancy and slot arrays are dense, so the bound caps what one
/// caller-supplied handle can make them allocate.
pub const MAX_HANDLES: u32 = 1 << 20;

/// Lowest-free-index allocator for one handle category.
///
/// Occupancy is a dense boolean vector; trailing free entries are trimmed so
/// the vector never grows past the highest live handle. `alloc` is an O(n)
/// scan, which is fine for the resource counts a command log carries.
#[derive(Debug, Clone, Default)]
pub struct HandleAllocator {
    occupied: Vec<bool>,
    live: usize,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lowest unoccupied index and marks it occupied.
    pub fn alloc(&mut self) -> u32 {
        let index = match self.occupied.iter().position(|o| !o) {
            Some(i) => {
                self.occupied[i] = true;
                i
            }
            None => {
                self.occupied.push(true);
                self.occupied.len() - 1
            }
        };
        self.live += 1;
        index as u32
    }

    /// Returns the index `alloc` would hand out next, without occupying it.
    pub fn peek(&self) -> u32 {
        self.occupied
            .iter()
            .position(|o| !o)
            .unwrap_or(self.occupied.len()) as u32
    }

    /// Marks a caller-chosen handle occupied.
    ///
    /// Returns `false` if the handle was already occupied or is not below
    /// [`MAX_HANDLES`].
    pub fn claim(&mut self, handle: u32) -> bool {
        if handle >= MAX_HANDLES {
            return false;
        }
        let i = handle as usize;
        if i >= self.occupied.len() {
            self.occupied.resize(i + 1, false);
        }
        if self.occupied[i] {
            return false;
        }
        self.occupied[i] = true;
        self.live += 1;
        true
    }

    /// Releases a handle.
    ///
    /// Returns `false` if the handle was not occupied (double free or never
    /// allocated); the caller decides how to report it.
    pub fn free(&mut self, handle: u32) -> bool {
        let i = handle as usize;
        match self.occupied.get_mut(i) {
            Some(slot) if *slot => {
                *slot = false;
                self.live -= 1;
                while self.occupied.last() == Some(&false) {
                    self.occupied.pop();
                }
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn is_occupied(&self, handle: u32) -> bool {
        self.occupied.get(handle as usize).copied().unwrap_or(false)
    }

    /// Number of occupied handles.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Iterates occupied handles in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.occupied
            .iter()
            .enumerate()
            .filter(|(_, o)| **o)
            .map(|(i, _)| i as u32)
    }

    pub fn clear(&mut self) {
        self.occupied.clear();
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn alloc_is_sequential_from_zero() {
        let mut a = HandleAllocator::new();
        assert_eq!(a.alloc(), 0);
        assert_eq!(a.alloc(), 1);
        assert_eq!(a.alloc(), 2);
        assert_eq!(a.live_count(), 3);
    }

    #[test]
    fn freed_handle_is_reused_lowest_first() {
        let mut a = HandleAllocator::new();
        for _ in 0..4 {
            a.alloc();
        }
        assert!(a.free(2));
        assert!(a.free(1));
        assert_eq!(a.alloc(), 1);
        assert_eq!(a.alloc(), 2);
        assert_eq!(a.alloc(), 4);
    }

    #[test]
    fn double_free_is_reported() {
        let mut a = HandleAllocator::new();
        let h = a.alloc();
        assert!(a.free(h));
        assert!(!a.free(h));
        assert!(!a.free(99));
        assert_eq!(a.live_count(), 0);
    }

    #[test]
    fn claim_rejects_occupied_handles() {
        let mut a = HandleAllocator::new();
        assert!(a.claim(5));
        assert!(!a.claim(5));
        assert!(a.is_occupied(5));
        assert!(!a.is_occupied(4));
        // Gaps below a claimed handle are still handed out first.
        assert_eq!(a.alloc(), 0);
        assert_eq!(a.peek(), 1);
    }

    #[test]
    fn out_of_range_claims_allocate_nothing() {
        let mut a = HandleAllocator::new();
        assert!(!a.claim(MAX_HANDLES));
        assert!(!a.claim(4_000_000_000));
        assert_eq!(a.live_count(), 0);
        assert_eq!(a.peek(), 0);
        assert!(a.claim(MAX_HANDLES - 1));
        assert_eq!(a.peek(), 0);
    }

    #[test]
    fn trailing_frees_trim_occupancy() {
        let mut a = HandleAllocator::new();
        a.alloc();
        a.alloc();
        a.free(1);
        a.free(0);
        assert_eq!(a.iter().count(), 0);
        assert_eq!(a.peek(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc,
        Free(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Alloc), (0usize..32).prop_map(Op::Free)]
    }

    proptest! {
        #[test]
        fn live_handles_never_collide(ops in proptest::collection::vec(op_strategy(), 1..128)) {
            let mut a = HandleAllocator::new();
            let mut live: Vec<u32> = Vec::new();
            for op in ops {
                match op {
                    Op::Alloc => {
                        let h = a.alloc();
                        prop_assert!(!live.contains(&h));
                        // Lowest free index: every smaller index must be live.
                        for lower in 0..h {
                            prop_assert!(live.contains(&lower));
                        }
                        live.push(h);
                    }
                    Op::Free(pick) => {
                        if live.is_empty() {
                            continue;
                        }
                        let h = live.swap_remove(pick % live.len());
                        prop_assert!(a.free(h));
                    }
                }
                prop_assert_eq!(a.live_count(), live.len());
            }
        }

        #[test]
        fn any_claim_is_bounded(handles in proptest::collection::vec(any::<u32>(), 1..16)) {
            let mut a = HandleAllocator::new();
            for h in handles {
                let fresh = !a.is_occupied(h);
                prop_assert_eq!(a.claim(h), fresh && h < MAX_HANDLES);
                prop_assert!(a.iter().all(|live| live < MAX_HANDLES));
            }
        }
    }
}
