use std::time::Duration;

use crate::error::{Error, Result, StatusError};
use crate::exec::{Executor, Outcome};
use crate::poll::{AsyncResult, PixelBuffer};

use super::CommandLog;

/// What a replay produced besides its side effects.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// Readbacks in log order, still to be polled.
    pub reads: Vec<AsyncResult<PixelBuffer>>,
    /// One per `endTimer`, in log order.
    pub timers: Vec<AsyncResult<Duration>>,
    /// Advisory statuses returned by `checkStatus` entries.
    pub statuses: Vec<StatusError>,
    /// Number of commands executed.
    pub commands: usize,
}

/// Executes every command of `log` in order.
///
/// The first failing command stops the replay; the error carries its
/// position and name.
pub fn replay<E: Executor + ?Sized>(log: &CommandLog, executor: &mut E) -> Result<ReplayOutcome> {
    let mut out = ReplayOutcome::default();
    for (index, command) in log.iter().enumerate() {
        let op = command.name();
        let outcome = executor
            .apply(command.clone())
            .map_err(|e| Error::Replay {
                index,
                op,
                source: Box::new(e),
            })?;
        match outcome {
            Outcome::Read(result) => out.reads.push(result),
            Outcome::Elapsed(result) => out.timers.push(result),
            Outcome::Status(Some(status)) => {
                log::warn!("command {index}: device status {status}");
                out.statuses.push(status);
            }
            Outcome::Status(None) | Outcome::Done | Outcome::Created(_) => {}
        }
        out.commands += 1;
    }
    log::debug!(
        "replayed {} commands, {} reads",
        out.commands,
        out.reads.len()
    );
    Ok(out)
}
