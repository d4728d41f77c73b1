// Wall-clock source for publish timestamps.
use time::OffsetDateTime;

use crate::core::message::Timestamp;

/// A source of publish timestamps.
pub trait Clock: Send + Sync + 'static {
    /// Current instant in UTC; `nanos` is always within `0..1_000_000_000`.
    fn now(&self) -> Timestamp;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from(OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, SystemClock};

    #[test]
    fn system_clock_nanos_in_range_and_non_decreasing() {
        let clock = SystemClock;
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!((0..1_000_000_000).contains(&next.nanos));
            assert!(next >= prev);
            prev = next;
        }
        assert!(prev.seconds > 1_600_000_000);
    }
}
