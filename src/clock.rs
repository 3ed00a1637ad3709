//! Clock Capability
//!
//! Single source for wall-clock reads and backoff jitter. Components never
//! call `Utc::now()` or a RNG directly, which keeps retry timing and
//! timestamp assertions reproducible in tests.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Wall clock plus jitter source
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Uniformly distributed value in `[-1.0, 1.0]` used for backoff jitter
    fn jitter_unit(&self) -> f64;
}

/// Production clock backed by the system time and thread RNG
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn jitter_unit(&self) -> f64 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}
