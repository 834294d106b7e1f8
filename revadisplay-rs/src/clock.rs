/* Time seam used by the backoff ladder. Production sleeps on the real
 * wall clock; tests substitute a fake that just records requested delays
 * so the ~7.75s worst-case backoff schedule doesn't have to run for real. */
use std::time::{Duration, Instant};

pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Records every requested sleep without blocking.
    pub struct FakeClock {
        pub sleeps: Mutex<Vec<Duration>>,
        start: Instant,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                sleeps: Mutex::new(Vec::new()),
                start: Instant::now(),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.start
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }
}
