use std::future::Future;

use crate::error::AuditResult;

/// Trait for background workers in the audit engine.
///
/// The generic parameter `H` is the handle type returned when the worker
/// starts and `S` is the state type accessible through the handle.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type returned when worker startup fails.
    type Error;

    /// Starts the worker and returns a handle for monitoring its execution.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle for monitoring a running worker.
pub trait WorkerHandle<S> {
    /// Returns the current state of the worker.
    ///
    /// The state is a snapshot handle independent of the worker's lifetime;
    /// holding it neither keeps the worker alive nor guarantees liveness.
    fn state(&self) -> S;

    /// Waits for the worker to complete and returns the final result.
    fn wait(self) -> impl Future<Output = AuditResult<()>> + Send;
}
