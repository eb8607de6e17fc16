//! Time sources. All waiting goes through [`Clock`] so tests can run whole
//! phases without sleeping.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

pub trait Clock {
    /// Monotonic time, used for every elapsed measurement and deadline.
    fn now(&self) -> Instant;
    /// Wall time, used only for metrics windows and report timestamps.
    fn wall_now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[cfg(test)]
pub(crate) mod manual {
    use super::Clock;
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    /// Clock that only moves when slept on or advanced explicitly.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        base: Instant,
        base_wall: DateTime<Utc>,
        offset: Rc<Cell<Duration>>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                base_wall: Utc
                    .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
                    .single()
                    .expect("valid base time"),
                offset: Rc::new(Cell::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.offset.set(self.offset.get() + by);
        }

        pub fn elapsed(&self) -> Duration {
            self.offset.get()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + self.offset.get()
        }

        fn wall_now(&self) -> DateTime<Utc> {
            let offset = chrono::Duration::from_std(self.offset.get())
                .unwrap_or_else(|_| chrono::Duration::zero());
            self.base_wall + offset
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }
}
