//! Persistence lifecycle hooks
//!
//! The repository calls a [`PersistHook`] immediately before it sends an
//! insert or update to the backend, passing an explicit [`OperationKind`].
//! The hook only sees the entity's [`Timestamps`], so it cannot touch the
//! key or business fields.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Mutex;

use crate::entity::Timestamps;

/// Which write is about to happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Row insert
    Insert,
    /// Row update
    Update,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Source of wall-clock time
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current time
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that returns a fixed instant until told otherwise
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Freeze time at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to `now`
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Hook run right before a write is sent to the backend.
///
/// `now` is captured once per repository call, so re-running the hook for the
/// same call stamps the same instant.
pub trait PersistHook: Send + Sync {
    /// Mutate the audit fields for the upcoming write
    fn before_persist(&self, kind: OperationKind, stamps: &mut Timestamps, now: DateTime<Utc>);
}

/// Stamps `created_at` on insert and `updated_at` on update
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampHook;

impl PersistHook for TimestampHook {
    fn before_persist(&self, kind: OperationKind, stamps: &mut Timestamps, now: DateTime<Utc>) {
        match kind {
            OperationKind::Insert => stamps.created_at = Some(now),
            OperationKind::Update => stamps.updated_at = Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_insert_sets_created_only() {
        let mut stamps = Timestamps::default();
        TimestampHook.before_persist(OperationKind::Insert, &mut stamps, at(100));
        assert_eq!(stamps.created_at, Some(at(100)));
        assert_eq!(stamps.updated_at, None);
    }

    #[test]
    fn test_update_sets_updated_only() {
        let mut stamps = Timestamps {
            created_at: Some(at(100)),
            updated_at: None,
        };
        TimestampHook.before_persist(OperationKind::Update, &mut stamps, at(200));
        assert_eq!(stamps.created_at, Some(at(100)));
        assert_eq!(stamps.updated_at, Some(at(200)));
    }

    #[test]
    fn test_same_instant_is_idempotent() {
        let mut stamps = Timestamps::default();
        TimestampHook.before_persist(OperationKind::Update, &mut stamps, at(5));
        let first = stamps;
        TimestampHook.before_persist(OperationKind::Update, &mut stamps, at(5));
        assert_eq!(first, stamps);
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(at(10));
        assert_eq!(clock.now(), at(10));
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), at(15));
        clock.set(at(1));
        assert_eq!(clock.now(), at(1));
    }
}
