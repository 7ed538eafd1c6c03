//! Timer and task primitives for native and browser targets.

use std::{future::Future, time::Duration};

/// Runs `future` in the background on the ambient executor.
///
/// Returns `false` when no executor is available (a plain synchronous
/// caller on native); the future is dropped in that case.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn spawn_detached<F>(future: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
            true
        }
        Err(_) => false,
    }
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn spawn_detached<F>(future: F) -> bool
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
    true
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(target_arch = "wasm32")]
pub(crate) async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    #[test]
    fn spawn_without_runtime_reports_false() {
        assert!(!spawn_detached(async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_runs_after_sleep() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        assert!(spawn_detached(async move {
            sleep(Duration::from_secs(120)).await;
            flag.store(true, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
