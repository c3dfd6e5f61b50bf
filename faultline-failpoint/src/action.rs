//! Failpoint actions and their string form.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FailpointError;

/// What an armed failpoint does when a wrapper reaches it.
///
/// Parsed once when the failpoint is armed, never per I/O call.
///
/// | String | Action |
/// |--------|--------|
/// | `off`, `noop` | [`Noop`](Self::Noop) |
/// | `drop`, `return` | [`Drop`](Self::Drop) |
/// | `sleep(100)`, `sleep(100ms)`, `sleep("0.1s")` | [`Sleep`](Self::Sleep) |
///
/// A bare number in `sleep(..)` is milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailpointAction {
    /// Armed, but data passes through.
    Noop,
    /// Wait, then discard the data.
    Sleep(Duration),
    /// Discard the data.
    Drop,
}

impl FailpointAction {
    /// Whether this action discards data.
    pub fn drops(&self) -> bool {
        matches!(self, FailpointAction::Drop | FailpointAction::Sleep(_))
    }

    /// Delay to wait before discarding, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            FailpointAction::Sleep(delay) => Some(*delay),
            _ => None,
        }
    }
}

impl fmt::Display for FailpointAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailpointAction::Noop => f.write_str("off"),
            FailpointAction::Drop => f.write_str("drop"),
            FailpointAction::Sleep(delay) => write!(f, "sleep({}ms)", delay.as_millis()),
        }
    }
}

impl FromStr for FailpointAction {
    type Err = FailpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let invalid = |reason| FailpointError::InvalidAction {
            spec: s.to_string(),
            reason,
        };

        match spec {
            "off" | "noop" => return Ok(FailpointAction::Noop),
            "drop" | "return" => return Ok(FailpointAction::Drop),
            _ => {}
        }

        let arg = spec
            .strip_prefix("sleep(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| invalid("unknown action"))?;
        let arg = arg.trim().trim_matches('"');
        parse_duration(arg)
            .map(FailpointAction::Sleep)
            .ok_or_else(|| invalid("invalid sleep duration"))
    }
}

fn parse_duration(arg: &str) -> Option<Duration> {
    if let Ok(millis) = arg.parse::<u64>() {
        return Some(Duration::from_millis(millis));
    }

    let split = arg
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(arg.len());
    let (number, unit) = arg.split_at(split);
    if let Ok(whole) = number.parse::<u64>() {
        return match unit {
            "us" | "µs" => Some(Duration::from_micros(whole)),
            "ms" => Some(Duration::from_millis(whole)),
            "s" => Some(Duration::from_secs(whole)),
            "m" => Some(Duration::from_secs(whole.checked_mul(60)?)),
            _ => None,
        };
    }
    let value: f64 = number.parse().ok()?;
    let secs = match unit {
        "us" | "µs" => value / 1_000_000.0,
        "ms" => value / 1_000.0,
        "s" => value,
        "m" => value * 60.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs).ok()
}
