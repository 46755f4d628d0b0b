//! The single sanctioned chokepoint for calling async pipeline code from
//! synchronous callers.
//!
//! No other module should construct a Tokio runtime; every sync-to-async
//! boundary goes through [`run_async_in_sync`].

use std::future::Future;

/// Run `fut` to completion from a synchronous caller, regardless of
/// whether a Tokio runtime is already driving the current thread.
///
/// - If no runtime is active on this thread, a fresh current-thread
///   runtime is built and used to block on `fut`.
/// - If a runtime is already running (so `Handle::current()` would
///   otherwise panic on `block_on`), the future is handed to a dedicated
///   background OS thread that owns its own runtime, and the result is
///   returned synchronously over a one-shot channel.
pub fn run_async_in_sync<F, T>(fut: F) -> T
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Err(_) => tokio::runtime::Runtime::new()
            .expect("failed to build a fallback Tokio runtime")
            .block_on(fut),
        Ok(_) => {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let runtime = tokio::runtime::Runtime::new().expect("failed to build bridge Tokio runtime");
                let result = runtime.block_on(fut);
                let _ = tx.send(result);
            });
            rx.recv().expect("async bridge worker thread panicked before sending a result")
        }
    }
}
