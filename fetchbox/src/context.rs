//! The coordination context.
//!
//! Every [`Request`](crate::Request) and [`Resource`](crate::Resource) state
//! transition, and every observer notification, happens on one thread inside
//! a tokio [`LocalSet`]. That is what lets their state live in plain
//! `Rc<RefCell<_>>` cells without locks. Work that runs elsewhere (the
//! transport, pipeline stages, entity caches) sends its results back through
//! channels that local tasks await.
//!
//! Handles are `!Send`, so the compiler rejects any attempt to touch them
//! from another thread.
//!
//! # Example
//!
//! ```
//! let answer = fetchbox::context::run(async {
//!     // Create a `Service`, load resources, await requests...
//!     42
//! })
//! .unwrap();
//! assert_eq!(answer, 42);
//! ```

use std::future::Future;
use std::io;

use tokio::task::LocalSet;

/// Runs `future` to completion on a fresh single-threaded runtime acting as
/// the coordination context.
///
/// Returns an error only if the runtime cannot be created.
pub fn run<F>(future: F) -> io::Result<F::Output>
where
    F: Future,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(LocalSet::new().block_on(&runtime, future))
}

/// Runs `future` as the coordination context inside an existing runtime.
///
/// The future is driven on the current thread; the runtime keeps serving
/// other tasks (including offloaded work) meanwhile.
pub async fn run_local<F>(future: F) -> F::Output
where
    F: Future,
{
    LocalSet::new().run_until(future).await
}
