//! Runtime-agnostic task spawning (§9: scheduler-independent by design).

use std::future::Future;

pub fn spawn<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    cfg_if::cfg_if! {
        if #[cfg(feature = "async-std-runtime")] {
            async_std::task::spawn(fut);
        } else if #[cfg(feature = "tokio-runtime")] {
            tokio::spawn(fut);
        }
    }
}
