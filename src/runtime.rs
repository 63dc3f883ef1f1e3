use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

/// Spawn a task in the background to run a future.
///
/// Uses the runtime of the calling context when there is one, and the crate's own blocking
/// runtime otherwise; that is what lets a cursor dropped outside of any runtime (for example by
/// the sync API) still kill its server cursor.
pub(crate) fn spawn<F, O>(fut: F) -> JoinHandle<O>
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.spawn(fut),
        Err(_) => crate::sync::TOKIO_RUNTIME.spawn(fut),
    }
}

/// Spawn a task in the background to run a future, discarding its output.
pub(crate) fn execute<F, O>(fut: F)
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    drop(spawn(fut));
}

/// Run a future to completion on the crate's blocking runtime.
///
/// Must not be called from within an async context.
pub(crate) fn block_on<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    crate::sync::TOKIO_RUNTIME.block_on(fut)
}

/// Delay for the specified duration.
pub(crate) async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await
}
