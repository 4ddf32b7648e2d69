//! Local time and the named timer registry used to drive handshake, liveness, and relay timers.
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Local time, as milliseconds since the Unix epoch.
///
/// This clock is monotonic: [`LocalTime::now`] never goes backwards.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Ord, PartialOrd, Default, Hash)]
pub struct LocalTime {
    millis: u128,
}

impl LocalTime {
    /// Construct a local time from the current system time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Construct a local time from whole milliseconds since the epoch.
    pub const fn from_millis(millis: u128) -> Self {
        Self { millis }
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(&self) -> u128 {
        self.millis
    }

    /// Get the duration since an earlier point in time. Saturates at zero.
    pub fn duration_since(&self, earlier: LocalTime) -> LocalDuration {
        LocalDuration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl From<SystemTime> for LocalTime {
    fn from(system: SystemTime) -> Self {
        let millis = system
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self { millis }
    }
}

impl std::ops::Sub<LocalTime> for LocalTime {
    type Output = LocalDuration;

    fn sub(self, other: LocalTime) -> LocalDuration {
        LocalDuration(self.millis.saturating_sub(other.millis))
    }
}

impl std::ops::Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis + other.0,
        }
    }
}

/// A duration, measured in milliseconds, as seen by the local clock.
#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq)]
pub struct LocalDuration(u128);

impl LocalDuration {
    /// Construct a duration from whole milliseconds.
    pub const fn from_millis(millis: u128) -> Self {
        Self(millis)
    }

    /// Construct a duration from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self::from_millis(secs as u128 * 1000)
    }

    /// Number of milliseconds in this duration.
    pub const fn as_millis(&self) -> u128 {
        self.0
    }
}

impl std::ops::Mul<u64> for LocalDuration {
    type Output = LocalDuration;

    fn mul(self, other: u64) -> LocalDuration {
        LocalDuration(self.0 * other as u128)
    }
}

impl From<LocalDuration> for std::time::Duration {
    fn from(other: LocalDuration) -> Self {
        std::time::Duration::from_millis(other.0 as u64)
    }
}

impl From<std::time::Duration> for LocalDuration {
    fn from(other: std::time::Duration) -> Self {
        Self::from_millis(other.as_millis())
    }
}

/// Named, one-shot timer registry.
///
/// Timers are identified by a string name (`"version"`, `"verack"`, `"ping_<nonce>"`, ...).
/// Setting a timer under an existing name replaces the prior one, so a late fire of a
/// cancelled timer can never observe stale state: the generation counter attached to each
/// entry is bumped on every `set`, and [`Timers::is_current`] only accepts a wake whose
/// generation still matches what's on record.
#[derive(Debug, Default)]
pub struct Timers {
    entries: HashMap<String, (LocalTime, u64)>,
    generation: u64,
}

impl Timers {
    /// Arm a timer under `name`, firing at `when`. Replaces any existing timer with the
    /// same name and returns the new generation for that name.
    pub fn set(&mut self, name: impl Into<String>, when: LocalTime) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        self.entries.insert(name.into(), (when, generation));
        generation
    }

    /// Cancel the timer with the given name, if any is armed.
    pub fn cancel(&mut self, name: &str) {
        self.entries.remove(name);
    }

    /// Whether a timer with this name and generation is still the current one armed
    /// under that name. Used to ignore late fires after a cancel/replace.
    pub fn is_current(&self, name: &str, generation: u64) -> bool {
        matches!(self.entries.get(name), Some((_, g)) if *g == generation)
    }

    /// Remove and return the name's timer if `now` has reached its deadline.
    pub fn take_expired(&mut self, name: &str, now: LocalTime) -> bool {
        match self.entries.get(name) {
            Some((deadline, _)) if *deadline <= now => {
                self.entries.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Cancel every tracked timer. Used on channel close.
    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    /// The earliest deadline among all armed timers, if any.
    pub fn next_deadline(&self) -> Option<LocalTime> {
        self.entries.values().map(|(when, _)| *when).min()
    }

    /// Number of timers currently armed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_a_timer_under_an_existing_name_replaces_it() {
        let mut timers = Timers::default();
        let now = LocalTime::now();

        let first = timers.set("verack", now + LocalDuration::from_secs(1));
        let second = timers.set("verack", now + LocalDuration::from_secs(2));

        assert_ne!(first, second);
        assert!(!timers.is_current("verack", first));
        assert!(timers.is_current("verack", second));
    }

    #[test]
    fn cancel_all_clears_every_timer() {
        let mut timers = Timers::default();
        let now = LocalTime::now();

        timers.set("version", now);
        timers.set("verack", now);
        timers.cancel_all();

        assert!(timers.is_empty());
    }
}
