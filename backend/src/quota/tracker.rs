use chrono::NaiveDate;
use shared::{QuotaResponse, QuotaValue};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use super::clock::{Clock, SystemClock};
use crate::auth::models::Role;

const SHARD_COUNT: usize = 16;

const ADMIN_USED_MARKER: &str = "NA";
const ADMIN_LIMIT_MARKER: &str = "Unlimited";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRecord {
    pub date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    Deny { limit: u32 },
}

type Shard = Mutex<HashMap<String, QuotaRecord>>;

/// Per-subject daily request counter.
///
/// Subjects are spread over a fixed set of mutex-guarded shards so that the
/// check-and-increment for one subject is atomic without making unrelated
/// subjects wait on each other. Admins are never counted.
pub struct QuotaTracker {
    shards: Vec<Shard>,
    daily_limit: u32,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(daily_limit: u32) -> Self {
        Self::with_clock(daily_limit, Arc::new(SystemClock))
    }

    pub fn with_clock(daily_limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            daily_limit,
            clock,
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    fn shard_for(&self, subject: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        subject.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    pub fn consume(&self, subject: &str, role: Role) -> QuotaDecision {
        if role.is_admin() {
            return QuotaDecision::Allow;
        }

        let today = self.clock.today();
        // Nothing below can panic mid-update, so a poisoned shard is still consistent.
        let mut records = self
            .shard_for(subject)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let record = records
            .entry(subject.to_string())
            .or_insert(QuotaRecord {
                date: today,
                count: 0,
            });

        if record.date != today {
            *record = QuotaRecord {
                date: today,
                count: 0,
            };
        } else if record.count >= self.daily_limit {
            return QuotaDecision::Deny {
                limit: self.daily_limit,
            };
        }

        record.count += 1;
        QuotaDecision::Allow
    }

    pub fn peek(&self, subject: &str, role: Role) -> QuotaResponse {
        if role.is_admin() {
            return QuotaResponse {
                used: QuotaValue::Marker(ADMIN_USED_MARKER.to_string()),
                limit: QuotaValue::Marker(ADMIN_LIMIT_MARKER.to_string()),
            };
        }

        let today = self.clock.today();
        let used = self
            .shard_for(subject)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .filter(|record| record.date == today)
            .map_or(0, |record| record.count);

        QuotaResponse {
            used: QuotaValue::Count(used),
            limit: QuotaValue::Count(self.daily_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::clock::testing::ManualClock;
    use rstest::rstest;
    use std::sync::Barrier;
    use std::thread;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn tracker(limit: u32) -> (QuotaTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(day()));
        (QuotaTracker::with_clock(limit, clock.clone()), clock)
    }

    fn used(tracker: &QuotaTracker, subject: &str) -> QuotaValue {
        tracker.peek(subject, Role::User).used
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(50)]
    fn user_gets_exactly_the_daily_limit(#[case] limit: u32) {
        let (tracker, _) = tracker(limit);
        for _ in 0..limit {
            assert_eq!(tracker.consume("siti", Role::User), QuotaDecision::Allow);
        }
        assert_eq!(
            tracker.consume("siti", Role::User),
            QuotaDecision::Deny { limit }
        );
        assert_eq!(used(&tracker, "siti"), QuotaValue::Count(limit));
    }

    #[test]
    fn denial_does_not_mutate_the_counter() {
        let (tracker, _) = tracker(2);
        tracker.consume("siti", Role::User);
        tracker.consume("siti", Role::User);
        for _ in 0..10 {
            tracker.consume("siti", Role::User);
        }
        assert_eq!(used(&tracker, "siti"), QuotaValue::Count(2));
    }

    #[test]
    fn admin_is_exempt_and_invisible() {
        let (tracker, _) = tracker(1);
        for _ in 0..100 {
            assert_eq!(tracker.consume("root", Role::Admin), QuotaDecision::Allow);
        }
        let usage = tracker.peek("root", Role::Admin);
        assert_eq!(usage.used, QuotaValue::Marker("NA".into()));
        assert_eq!(usage.limit, QuotaValue::Marker("Unlimited".into()));
        // Nothing was recorded for the admin subject.
        assert_eq!(used(&tracker, "root"), QuotaValue::Count(0));
    }

    #[test]
    fn peek_reports_zero_for_unknown_subject() {
        let (tracker, _) = tracker(50);
        let usage = tracker.peek("nobody", Role::User);
        assert_eq!(usage.used, QuotaValue::Count(0));
        assert_eq!(usage.limit, QuotaValue::Count(50));
    }

    #[test]
    fn quota_resets_on_day_rollover() {
        let (tracker, clock) = tracker(3);
        for _ in 0..3 {
            tracker.consume("budi", Role::User);
        }
        assert_eq!(tracker.consume("budi", Role::User), QuotaDecision::Deny { limit: 3 });

        clock.advance_days(1);
        assert_eq!(used(&tracker, "budi"), QuotaValue::Count(0));
        assert_eq!(tracker.consume("budi", Role::User), QuotaDecision::Allow);
        assert_eq!(used(&tracker, "budi"), QuotaValue::Count(1));
    }

    #[test]
    fn subjects_are_counted_independently() {
        let (tracker, _) = tracker(1);
        assert_eq!(tracker.consume("a", Role::User), QuotaDecision::Allow);
        assert_eq!(tracker.consume("b", Role::User), QuotaDecision::Allow);
        assert_eq!(tracker.consume("a", Role::User), QuotaDecision::Deny { limit: 1 });
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(17)]
    fn concurrent_consumers_never_overshoot(#[case] extra: u32) {
        const LIMIT: u32 = 50;
        let (tracker, _) = tracker(LIMIT);
        let callers = (LIMIT + extra) as usize;
        let barrier = Barrier::new(callers);

        let allowed: u32 = thread::scope(|scope| {
            let handles: Vec<_> = (0..callers)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        tracker.consume("racer", Role::User)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| u32::from(h.join().unwrap() == QuotaDecision::Allow))
                .sum()
        });

        assert_eq!(allowed, LIMIT);
        assert_eq!(used(&tracker, "racer"), QuotaValue::Count(LIMIT));
    }

    #[test]
    fn concurrent_consumers_near_the_boundary() {
        let (tracker, _) = tracker(10);
        for _ in 0..8 {
            tracker.consume("edge", Role::User);
        }
        let barrier = Barrier::new(8);
        let allowed: u32 = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        tracker.consume("edge", Role::User)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| u32::from(h.join().unwrap() == QuotaDecision::Allow))
                .sum()
        });
        assert_eq!(allowed, 2);
    }
}
