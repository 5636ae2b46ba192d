//! Blocking wait over asynchronous runtime jobs.
//!
//! Every client operation issues a job and then blocks the calling thread
//! here until the runtime's worker delivers the terminal status. No node
//! lock is held while waiting. A caller that stops waiting leaves the job
//! to a drain thread, so a handle the job creates later is still released.

use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;
use vix_core::{JobId, NativeHandle, Result, VixError};

use crate::runtime::{JobHandle, JobOp, JobOutcome, JobResult, ManagementRuntime};

/// Converts an asynchronous job into a blocking call.
///
/// With a timeout, an expired wait yields [`VixError::JobTimeout`]; the job
/// is not cancelled and keeps running on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobWaiter {
    timeout: Option<Duration>,
}

impl JobWaiter {
    /// Wait without limit.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Give up waiting after `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout) }
    }

    /// The wait limit, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Block until `job` completes and translate its outcome.
    ///
    /// # Errors
    /// Returns the error class matching the job's failure code,
    /// [`VixError::JobTimeout`] if the wait limit expires,
    /// [`VixError::ClientProgrammer`] if called from inside an async
    /// runtime, or [`VixError::Internal`] if the runtime dropped the job
    /// without completing it.
    pub fn wait_for(&self, job: JobHandle, operation: &'static str) -> Result<JobResult> {
        self.wait_for_with_cleanup(job, operation, drop::<JobResult>)
    }

    /// As [`JobWaiter::wait_for`], but if the caller stops waiting (the wait
    /// times out or is refused) the job is drained on a background thread
    /// and `cleanup` receives its result if it completes successfully.
    /// Jobs that create handles use this to release handles nobody adopted.
    ///
    /// # Errors
    /// As [`JobWaiter::wait_for`].
    pub fn wait_for_with_cleanup<F>(&self, job: JobHandle, operation: &'static str, cleanup: F) -> Result<JobResult>
    where
        F: FnOnce(JobResult) + Send + 'static,
    {
        let (id, delivered, mut rx) = job.into_parts();

        let outcome = match delivered {
            Some(outcome) => Some(outcome),
            None => {
                if tokio::runtime::Handle::try_current().is_ok() {
                    abandon(id, rx, cleanup);
                    return Err(VixError::ClientProgrammer(format!(
                        "{operation} blocks the calling thread and cannot run inside an async runtime"
                    )));
                }
                tracing::debug!(job = %id, operation, "waiting for job");
                match self.receive(&mut rx, operation) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        abandon(id, rx, cleanup);
                        return Err(e);
                    }
                }
            }
        };

        match outcome {
            Some(Ok(result)) => {
                tracing::debug!(job = %id, operation, "job completed");
                Ok(result)
            }
            Some(Err(code)) => {
                tracing::debug!(job = %id, operation, code = %code, "job failed");
                Err(VixError::from_status(operation, code))
            }
            None => Err(VixError::internal(
                operation,
                format!("{id} was dropped by the runtime before completing"),
            )),
        }
    }

    fn receive(&self, rx: &mut oneshot::Receiver<JobOutcome>, operation: &'static str) -> Result<Option<JobOutcome>> {
        let Some(timeout) = self.timeout else {
            return Ok(std::mem::replace(rx, oneshot::channel().1).blocking_recv().ok());
        };

        let timer = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| VixError::internal(operation, format!("cannot start wait timer: {e}")))?;

        match timer.block_on(async { tokio::time::timeout(timeout, &mut *rx).await }) {
            Ok(received) => Ok(received.ok()),
            Err(_) => {
                tracing::warn!(operation, timeout = ?timeout, "gave up waiting for job");
                Err(VixError::JobTimeout { operation, timeout })
            }
        }
    }
}

/// Hand an abandoned job to a drain thread that passes a late success to
/// `cleanup`.
fn abandon<F>(id: JobId, rx: oneshot::Receiver<JobOutcome>, cleanup: F)
where
    F: FnOnce(JobResult) + Send + 'static,
{
    let drain = move || match rx.blocking_recv() {
        Ok(Ok(result)) => {
            tracing::debug!(job = %id, "abandoned job completed; cleaning up");
            cleanup(result);
        }
        Ok(Err(code)) => tracing::debug!(job = %id, code = %code, "abandoned job failed"),
        Err(_) => tracing::debug!(job = %id, "abandoned job dropped by the runtime"),
    };
    if let Err(e) = thread::Builder::new().name("vix-job-drain".to_owned()).spawn(drain) {
        tracing::warn!(job = %id, error = %e, "cannot drain abandoned job; its result is lost");
    }
}

/// Issue `op` against `target` and wait for it.
pub(crate) fn run_job(
    runtime: &dyn ManagementRuntime,
    waiter: JobWaiter,
    target: NativeHandle,
    op: JobOp,
) -> Result<JobResult> {
    let operation = op.name();
    let job = runtime
        .issue_job(target, op)
        .map_err(|code| VixError::from_status(operation, code))?;
    waiter.wait_for(job, operation)
}
