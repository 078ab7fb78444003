//! Single-shot and self-rearming timer backed by one worker thread.
//!
//! A timer holds at most one pending callback. The callback runs on the
//! worker thread with no lock held; returning `Some(delay)` rearms it.
//!
//! [`Timer::cancel`] and expiry are decided under the same lock, so for
//! every scheduled callback exactly one of the two wins: either `cancel`
//! returns `true` and the callback never runs, or the callback runs (or
//! is already running) and `cancel` returns `false`.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::trace;

type Callback = Box<dyn FnMut() -> Option<Duration> + Send>;

struct Armed {
    deadline: Instant,
    callback: Callback,
}

#[derive(Default)]
struct TimerState {
    armed: Option<Armed>,
    firing: bool,
    cancel_rearm: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Timer with its own worker thread.
pub struct Timer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Timer {
    /// Start the worker thread.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("timer-{name}"))
                .spawn(move || run(&shared))?
        };
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Run `callback` after `delay`.
    ///
    /// Returns `false` without scheduling anything if a callback is
    /// already pending.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> bool
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.armed.is_some() || state.shutdown {
            return false;
        }
        state.armed = Some(Armed {
            deadline: Instant::now() + delay,
            callback: Box::new(callback),
        });
        self.shared.wake.notify_one();
        true
    }

    /// Disarm the pending callback.
    ///
    /// Returns `true` only if the callback was still pending and will now
    /// never run. A callback that is already running is not interrupted,
    /// but it will not be rearmed.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.armed.take().is_some() {
            self.shared.wake.notify_one();
            return true;
        }
        if state.firing {
            state.cancel_rearm = true;
        }
        false
    }

    /// True while a callback is pending or running.
    pub fn is_active(&self) -> bool {
        let state = self.shared.state.lock();
        state.armed.is_some() || state.firing
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.armed = None;
            self.shared.wake.notify_all();
        }
        // The owner may be dropped from inside its own callback.
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != std::thread::current().id()
        {
            let _ = worker.join();
        }
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let Some(deadline) = state.armed.as_ref().map(|a| a.deadline) else {
            shared.wake.wait(&mut state);
            continue;
        };
        if Instant::now() < deadline {
            shared.wake.wait_until(&mut state, deadline);
            continue;
        }
        let Some(mut armed) = state.armed.take() else {
            continue;
        };
        state.firing = true;
        state.cancel_rearm = false;
        let rearm = MutexGuard::unlocked(&mut state, || (armed.callback)());
        state.firing = false;

        if let Some(delay) = rearm {
            if !state.cancel_rearm && state.armed.is_none() && !state.shutdown {
                trace!("Rearming timer in {:?}", delay);
                armed.deadline = Instant::now() + delay;
                state.armed = Some(armed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> Option<Duration> + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        (count, move || {
            hits.fetch_add(1, Ordering::SeqCst);
            None
        })
    }

    #[test]
    fn fires_once() {
        let timer = Timer::new("test").unwrap();
        let (count, cb) = counter();
        assert!(timer.schedule(Duration::from_millis(5), cb));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
        assert!(!timer.cancel());
    }

    #[test]
    fn second_schedule_is_refused() {
        let timer = Timer::new("test").unwrap();
        let (_, first) = counter();
        let (_, second) = counter();
        assert!(timer.schedule(Duration::from_secs(10), first));
        assert!(!timer.schedule(Duration::from_secs(10), second));
        assert!(timer.cancel());
    }

    #[test]
    fn cancel_before_expiry_wins() {
        let timer = Timer::new("test").unwrap();
        let (count, cb) = counter();
        timer.schedule(Duration::from_millis(50), cb);
        assert!(timer.cancel());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn periodic_until_cancelled() {
        let timer = Timer::new("test").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        timer.schedule(Duration::from_millis(1), move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Some(Duration::from_millis(1))
        });
        std::thread::sleep(Duration::from_millis(50));
        timer.cancel();
        std::thread::sleep(Duration::from_millis(20));
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert!(!timer.is_active());
    }

    #[test]
    fn drop_discards_pending_callback() {
        let (count, cb) = counter();
        {
            let timer = Timer::new("test").unwrap();
            timer.schedule(Duration::from_secs(10), cb);
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
