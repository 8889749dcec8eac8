//! Logical time values and tags.
//!
//! Times are signed 64-bit nanosecond counts, matching the register width of
//! the PRET-VM (every register and immediate is 64 bits wide).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A logical duration or instant in nanoseconds. Defaults to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeValue(pub i64);

impl TimeValue {
    pub const ZERO: TimeValue = TimeValue(0);
    /// Sentinel for "never" (the smallest representable instant).
    pub const NEVER: TimeValue = TimeValue(i64::MIN);
    /// Sentinel for "forever" (the largest representable instant).
    pub const FOREVER: TimeValue = TimeValue(i64::MAX);

    pub const fn nanos(ns: i64) -> Self {
        TimeValue(ns)
    }

    pub const fn micros(us: i64) -> Self {
        TimeValue(us * 1_000)
    }

    pub const fn millis(ms: i64) -> Self {
        TimeValue(ms * 1_000_000)
    }

    pub const fn secs(s: i64) -> Self {
        TimeValue(s * 1_000_000_000)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_forever(self) -> bool {
        self == Self::FOREVER
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TimeValue::FOREVER => write!(f, "forever"),
            TimeValue::NEVER => write!(f, "never"),
            TimeValue(ns) if ns != 0 && ns % 1_000_000_000 == 0 => write!(f, "{} s", ns / 1_000_000_000),
            TimeValue(ns) if ns != 0 && ns % 1_000_000 == 0 => write!(f, "{} ms", ns / 1_000_000),
            TimeValue(ns) if ns != 0 && ns % 1_000 == 0 => write!(f, "{} us", ns / 1_000),
            TimeValue(ns) => write!(f, "{} ns", ns),
        }
    }
}

/// Parse `"<int> <unit>"`, a bare `"0"`, `"forever"` or `"never"`.
///
/// `never` parses to [`TimeValue::NEVER`]; callers that need a duration
/// decide how to interpret it.
impl FromStr for TimeValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "forever" => return Ok(TimeValue::FOREVER),
            "never" => return Ok(TimeValue::NEVER),
            "0" => return Ok(TimeValue::ZERO),
            _ => {}
        }

        let split = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '-')
            .ok_or_else(|| format!("missing time unit in '{}'", s))?;
        let (digits, unit) = trimmed.split_at(split);
        let magnitude: i64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid time magnitude in '{}'", s))?;
        let scale: i64 = match unit.trim() {
            "ns" | "nsec" | "nsecs" => 1,
            "us" | "usec" | "usecs" => 1_000,
            "ms" | "msec" | "msecs" => 1_000_000,
            "s" | "sec" | "secs" | "second" | "seconds" => 1_000_000_000,
            "min" | "minute" | "minutes" => 60_000_000_000,
            "h" | "hour" | "hours" => 3_600_000_000_000,
            other => return Err(format!("unknown time unit '{}'", other)),
        };
        magnitude
            .checked_mul(scale)
            .map(TimeValue)
            .ok_or_else(|| format!("time value '{}' overflows 64 bits", s))
    }
}

/// A logical timestamp: time value plus microstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub time: TimeValue,
    pub microstep: u32,
}

impl Tag {
    pub fn at(time: TimeValue) -> Self {
        Self { time, microstep: 0 }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.time, self.microstep)
    }
}

/// Least common multiple of two positive durations, `None` on overflow.
pub fn lcm(a: i64, b: i64) -> Option<i64> {
    fn gcd(mut a: i64, mut b: i64) -> i64 {
        while b != 0 {
            let t = a % b;
            a = b;
            b = t;
        }
        a
    }
    if a == 0 || b == 0 {
        return Some(0);
    }
    (a / gcd(a, b)).checked_mul(b)
}
