//! Elapsed-time queries.

use std::time::Duration;

use crate::context::Context;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::poll::AsyncResult;

impl<D: Device> Context<D> {
    fn require_timers(&self) -> Result<()> {
        if !self.limits.extensions.timer_query {
            return Err(Error::Unsupported("timer_query".into()));
        }
        Ok(())
    }

    pub(super) fn start_timer(&mut self) -> Result<()> {
        self.require_timers()?;
        if self.timing {
            return Err(Error::invalid("beginTimer while a timer is running"));
        }
        self.device.begin_timer()?;
        self.timing = true;
        Ok(())
    }

    /// Like a readback, the result is registered so dispose can cancel it.
    pub(super) fn stop_timer(&mut self) -> Result<AsyncResult<Duration>> {
        self.require_timers()?;
        if !self.timing {
            return Err(Error::invalid("endTimer without beginTimer"));
        }
        self.timing = false;
        let fence = self.device.end_timer()?;
        let result = AsyncResult::new(fence, |bytes| {
            let nanos = bytes
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_le_bytes)
                .unwrap_or(0);
            Duration::from_nanos(nanos)
        });
        self.pending.register(&result);
        log::trace!("timer stopped");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Extensions, Limits, SoftDevice, SoftDeviceOptions};
    use crate::exec::ExecutorExt;

    fn context(timer_query: bool) -> Context<SoftDevice> {
        Context::new(SoftDevice::new(SoftDeviceOptions {
            width: 4,
            height: 4,
            fence_latency: 2,
            limits: Limits {
                extensions: Extensions {
                    multi_draw: true,
                    timer_query,
                },
                ..Limits::default()
            },
        }))
    }

    #[test]
    fn timer_resolves_after_fence_latency() {
        let mut ctx = context(true);
        ctx.begin_timer().unwrap();
        ctx.flush().unwrap();
        let elapsed = ctx.end_timer().unwrap();
        assert_eq!(ctx.pending_count(), 1);
        assert!(!elapsed.poll());
        assert!(!elapsed.poll());
        assert!(elapsed.poll());
        assert!(elapsed.take().unwrap().is_ok());
        assert_eq!(ctx.pending_count(), 0);
    }

    #[test]
    fn timers_do_not_nest() {
        let mut ctx = context(true);
        let err = ctx.end_timer().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        ctx.begin_timer().unwrap();
        let err = ctx.begin_timer().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        ctx.end_timer().unwrap();
        ctx.begin_timer().unwrap();
    }

    #[test]
    fn timers_need_the_extension() {
        let mut ctx = context(false);
        let err = ctx.begin_timer().unwrap_err();
        assert!(matches!(&err, Error::Unsupported(e) if e == "timer_query"), "{err}");
        assert!(matches!(ctx.end_timer(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn dispose_cancels_a_pending_timer() {
        let mut ctx = context(true);
        ctx.begin_timer().unwrap();
        let elapsed = ctx.end_timer().unwrap();
        ctx.dispose();
        assert!(!elapsed.poll());
        assert!(!elapsed.is_pending());
        assert!(matches!(ctx.begin_timer(), Err(Error::Disposed)));
    }
}
