//! Blocking primitives shared between a flow's monitor thread and the
//! threads that stop it or wait on it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Flag {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Flag {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn raise(&self) {
        *self.lock() = true;
        self.changed.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Latch
// ---------------------------------------------------------------------------

/// One-shot "has started" signal. Once set it stays set.
#[derive(Clone, Default)]
pub struct Latch(Arc<Flag>);

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.raise();
    }

    pub fn is_set(&self) -> bool {
        *self.0.lock()
    }

    /// Block until the latch is set.
    pub fn wait(&self) {
        let guard = self.0.lock();
        let _guard = self
            .0
            .changed
            .wait_while(guard, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the latch is set or `timeout` elapses. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.0.lock();
        let (guard, _) = self
            .0
            .changed
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Latch").field(&self.is_set()).finish()
    }
}

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

/// Interruptible wait used by scheduled monitors. `stop()` cuts any current
/// or future sleep short.
#[derive(Clone, Default)]
pub struct Sleeper(Arc<Flag>);

impl Sleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `duration`. Returns `false` if the sleeper was stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.0.lock();
        let (guard, _) = self
            .0
            .changed
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }

    pub fn stop(&self) {
        self.0.raise();
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.lock()
    }
}

impl std::fmt::Debug for Sleeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sleeper")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn latch_releases_waiters() {
        let latch = Latch::new();
        let waiter = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!latch.is_set());
        latch.set();
        waiter.join().unwrap();
        assert!(latch.is_set());
    }

    #[test]
    fn latch_wait_timeout_expires() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
        latch.set();
        assert!(latch.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn sleeper_sleeps_full_duration_when_not_stopped() {
        let sleeper = Sleeper::new();
        let start = Instant::now();
        assert!(sleeper.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn zero_sleep_returns_immediately() {
        let sleeper = Sleeper::new();
        assert!(sleeper.sleep(Duration::ZERO));
    }

    #[test]
    fn stop_interrupts_sleep() {
        let sleeper = Sleeper::new();
        let sleeping = {
            let sleeper = sleeper.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let kept_going = sleeper.sleep(Duration::from_secs(30));
                (kept_going, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        sleeper.stop();
        let (kept_going, elapsed) = sleeping.join().unwrap();
        assert!(!kept_going);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn sleep_after_stop_is_immediate() {
        let sleeper = Sleeper::new();
        sleeper.stop();
        assert!(sleeper.is_stopped());
        assert!(!sleeper.sleep(Duration::from_secs(30)));
    }
}
