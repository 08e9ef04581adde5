use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::task::AbortHandle;

/// Handle to one scheduled call.
#[derive(Debug, Clone)]
pub struct DebounceHandle {
    timer: AbortHandle,
}

impl DebounceHandle {
    /// Drop the call if its delay has not elapsed yet.
    pub fn cancel(&self) {
        self.timer.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.timer.is_finished()
    }
}

/// Trailing-edge debouncer: each call replaces the previous one still waiting.
///
/// Only the waiting part is cancellable. Once the delay elapses the action runs
/// on its own task, so a later call never aborts work already under way.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    waiting: Arc<Mutex<Option<AbortHandle>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            waiting: Arc::new(Mutex::new(None)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action` after the delay, cancelling any call still waiting.
    pub fn call<F, Fut>(&self, action: F) -> DebounceHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(action());
        })
        .abort_handle();

        let previous = self
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer.clone());
        if let Some(previous) = previous {
            previous.abort();
        }

        DebounceHandle { timer }
    }

    /// Cancel the call still waiting, if any.
    pub fn cancel(&self) {
        let waiting = self
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(waiting) = waiting {
            waiting.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_runs_action_once() {
        let debouncer = Debouncer::new(Duration::from_millis(220));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            debouncer.call(counting(&counter));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_calls_each_run() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let counter = Arc::new(AtomicUsize::new(0));

        debouncer.call(counting(&counter));
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.call(counting(&counter));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_handle_drops_waiting_call() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = debouncer.call(counting(&counter));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        debouncer.call(counting(&counter));
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
