//! Time primitives used by the token lifecycle logic
//!
//! Token expiry arithmetic needs signed results: "expired forty seconds ago"
//! is just as interesting as "valid for another hour". The types here are
//! thin signed-second wrappers with a mockable [`Clock`] source.

use std::ops::{Add, Sub};
use std::time::SystemTime;

/// Unix time, in whole seconds since 1970-01-01T00:00:00Z
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct UnixTime(pub i64);

/// A duration in whole seconds
///
/// May be negative, in which case it describes how far in the past an
/// instant lies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct DurationSecs(pub i64);

impl Sub for UnixTime {
    type Output = DurationSecs;

    #[inline]
    fn sub(self, rhs: UnixTime) -> DurationSecs {
        DurationSecs(self.0 - rhs.0)
    }
}

impl Add<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn add(self, rhs: DurationSecs) -> UnixTime {
        UnixTime(self.0 + rhs.0)
    }
}

impl From<SystemTime> for UnixTime {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(since) => UnixTime(since.as_secs() as i64),
            Err(before) => UnixTime(-(before.duration().as_secs() as i64)),
        }
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixTime;
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A test clock which maintains the current time as internal state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestClock(UnixTime);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        self.0
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    #[inline]
    pub const fn new(time: UnixTime) -> Self {
        Self(time)
    }

    /// Increments the clock's current time by `inc` seconds
    pub fn inc(&mut self, inc: i64) {
        (self.0).0 += inc;
    }
}
