use std::cell::RefCell;
use std::rc::Weak;

use super::result::{AsyncResult, Inner};

trait Pending {
    fn is_pending(&self) -> bool;
    fn cancel(&self);
}

impl<T> Pending for RefCell<Inner<T>> {
    fn is_pending(&self) -> bool {
        self.borrow().is_pending()
    }

    fn cancel(&self) {
        self.borrow_mut().dispose();
    }
}

/// Every async result a context has issued.
///
/// Holds weak references only: a result the caller dropped releases its
/// fence on drop and simply disappears from the registry.
#[derive(Default)]
pub struct PendingRegistry {
    entries: Vec<Weak<dyn Pending>>,
}

impl PendingRegistry {
    pub fn register<T: 'static>(&mut self, result: &AsyncResult<T>) {
        self.prune();
        let weak: Weak<RefCell<Inner<T>>> = std::rc::Rc::downgrade(result.shared());
        self.entries.push(weak);
    }

    /// Results still waiting on their fence.
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|p| p.is_pending())
            .count()
    }

    /// Disposes every result that has not settled. Returns how many.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for entry in self.entries.drain(..) {
            if let Some(p) = entry.upgrade() {
                if p.is_pending() {
                    p.cancel();
                    cancelled += 1;
                }
            }
        }
        cancelled
    }

    fn prune(&mut self) {
        self.entries
            .retain(|e| e.upgrade().is_some_and(|p| p.is_pending()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Fence, FenceStatus};

    struct Never;

    impl Fence for Never {
        fn poll(&mut self) -> FenceStatus {
            FenceStatus::Pending
        }

        fn cancel(&mut self) {}
    }

    struct Instant;

    impl Fence for Instant {
        fn poll(&mut self) -> FenceStatus {
            FenceStatus::Ready(vec![7])
        }

        fn cancel(&mut self) {}
    }

    #[test]
    fn cancel_all_disposes_only_pending_results() {
        let mut registry = PendingRegistry::default();
        let stuck = AsyncResult::new(Box::new(Never), |b| b);
        let done = AsyncResult::new(Box::new(Instant), |b| b);
        registry.register(&stuck);
        registry.register(&done);
        assert!(done.poll());
        assert_eq!(registry.pending_count(), 1);

        assert_eq!(registry.cancel_all(), 1);
        assert!(stuck.is_disposed());
        assert!(done.is_ready());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn dropped_results_are_pruned() {
        let mut registry = PendingRegistry::default();
        {
            let r = AsyncResult::new(Box::new(Never), |b| b);
            registry.register(&r);
        }
        let keep = AsyncResult::new(Box::new(Never), |b| b);
        registry.register(&keep);
        assert_eq!(registry.entries.len(), 1);
    }
}
