use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::device::{Fence, FenceStatus};
use crate::error::{Error, Result};

enum Stage<T> {
    Pending,
    Ready(T),
    Failed(String),
    /// Value handed out through `take`.
    Taken,
    Disposed,
}

pub(super) struct Inner<T> {
    stage: Stage<T>,
    fence: Option<Box<dyn Fence>>,
    finish: Box<dyn Fn(Vec<u8>) -> T>,
}

impl<T> Inner<T> {
    pub(super) fn is_pending(&self) -> bool {
        matches!(self.stage, Stage::Pending)
    }

    /// Cancels the fence and drops any value. Never resolves afterwards.
    pub(super) fn dispose(&mut self) {
        if let Some(mut fence) = self.fence.take() {
            fence.cancel();
        }
        self.stage = Stage::Disposed;
    }

    fn poll(&mut self) -> bool {
        match self.stage {
            Stage::Pending => {}
            Stage::Disposed => return false,
            _ => return true,
        }
        let Some(fence) = self.fence.as_mut() else {
            self.stage = Stage::Failed("no fence".into());
            return true;
        };
        match fence.poll() {
            FenceStatus::Pending => return false,
            FenceStatus::Ready(bytes) => self.stage = Stage::Ready((self.finish)(bytes)),
            FenceStatus::Failed(reason) => {
                log::debug!("async result failed: {reason}");
                self.stage = Stage::Failed(reason);
            }
        }
        self.fence = None;
        true
    }
}

/// A pending device-side result.
///
/// State machine: pending, then ready or failed; disposal from any state is
/// final. Clones share the same state.
pub struct AsyncResult<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.inner.borrow().stage {
            Stage::Pending => "pending",
            Stage::Ready(_) => "ready",
            Stage::Failed(_) => "failed",
            Stage::Taken => "taken",
            Stage::Disposed => "disposed",
        };
        f.debug_struct("AsyncResult").field("stage", &stage).finish()
    }
}

impl<T> AsyncResult<T> {
    /// Wraps a fence; `finish` converts the staged bytes once it signals.
    pub fn new(fence: Box<dyn Fence>, finish: impl Fn(Vec<u8>) -> T + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                stage: Stage::Pending,
                fence: Some(fence),
                finish: Box::new(finish),
            })),
        }
    }

    pub(super) fn shared(&self) -> &Rc<RefCell<Inner<T>>> {
        &self.inner
    }

    /// Checks the fence once. Returns `true` once the result has left the
    /// pending state, `false` while pending or after disposal.
    pub fn poll(&self) -> bool {
        self.inner.borrow_mut().poll()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.borrow().is_pending()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.borrow().stage, Stage::Ready(_) | Stage::Taken)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.inner.borrow().stage, Stage::Failed(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.inner.borrow().stage, Stage::Disposed)
    }

    /// Moves the settled value out.
    ///
    /// `None` while pending, after disposal, or once taken. A failed fence
    /// yields [`Error::AsyncFailed`].
    pub fn take(&self) -> Option<Result<T>> {
        let mut inner = self.inner.borrow_mut();
        match std::mem::replace(&mut inner.stage, Stage::Taken) {
            Stage::Ready(value) => Some(Ok(value)),
            Stage::Failed(reason) => Some(Err(Error::AsyncFailed(reason))),
            other => {
                inner.stage = other;
                None
            }
        }
    }

    /// Abandons the result. A pending fence is cancelled and its staging
    /// storage released.
    pub fn dispose(&self) {
        self.inner.borrow_mut().dispose();
    }

    /// A future that polls until the result settles.
    pub fn wait(&self) -> Wait<'_, T> {
        Wait { result: self }
    }
}

/// Future returned by [`AsyncResult::wait`].
///
/// Each poll checks the fence once and asks to be polled again.
pub struct Wait<'a, T> {
    result: &'a AsyncResult<T>,
}

impl<T> Future for Wait<'_, T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = self.result;
        if result.is_disposed() {
            return Poll::Ready(Err(Error::Disposed));
        }
        if !result.poll() {
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        Poll::Ready(
            result
                .take()
                .unwrap_or_else(|| Err(Error::AsyncFailed("result already taken".into()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        left: u32,
        outcome: Option<FenceStatus>,
        cancelled: Rc<RefCell<bool>>,
    }

    impl Fence for Countdown {
        fn poll(&mut self) -> FenceStatus {
            if self.left > 0 {
                self.left -= 1;
                return FenceStatus::Pending;
            }
            self.outcome
                .take()
                .unwrap_or(FenceStatus::Failed("consumed".into()))
        }

        fn cancel(&mut self) {
            *self.cancelled.borrow_mut() = true;
        }
    }

    fn countdown(left: u32, outcome: FenceStatus) -> (AsyncResult<usize>, Rc<RefCell<bool>>) {
        let cancelled = Rc::new(RefCell::new(false));
        let fence = Countdown {
            left,
            outcome: Some(outcome),
            cancelled: Rc::clone(&cancelled),
        };
        (AsyncResult::new(Box::new(fence), |bytes| bytes.len()), cancelled)
    }

    #[test]
    fn poll_settles_after_fence_latency() {
        let (r, _) = countdown(2, FenceStatus::Ready(vec![0; 12]));
        assert!(!r.poll());
        assert!(!r.poll());
        assert!(r.poll());
        assert!(r.poll(), "settled results keep reporting true");
        assert!(r.is_ready());
        assert_eq!(r.take().unwrap().unwrap(), 12);
        assert!(r.take().is_none());
    }

    #[test]
    fn failed_fence_rejects_through_take() {
        let (r, _) = countdown(0, FenceStatus::Failed("lost".into()));
        assert!(r.poll());
        assert!(r.is_failed());
        assert!(matches!(r.take(), Some(Err(Error::AsyncFailed(m))) if m == "lost"));
    }

    #[test]
    fn dispose_cancels_and_never_resolves() {
        let (r, cancelled) = countdown(5, FenceStatus::Ready(vec![1]));
        r.dispose();
        assert!(*cancelled.borrow());
        assert!(r.is_disposed());
        assert!(!r.poll());
        assert!(r.take().is_none());
    }

    #[test]
    fn wait_drives_the_fence() {
        let (r, _) = countdown(3, FenceStatus::Ready(vec![0; 4]));
        assert_eq!(pollster::block_on(r.wait()).unwrap(), 4);

        let (r, _) = countdown(3, FenceStatus::Ready(vec![]));
        r.dispose();
        assert!(matches!(pollster::block_on(r.wait()), Err(Error::Disposed)));
    }
}
