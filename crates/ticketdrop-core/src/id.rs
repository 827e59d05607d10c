//! Daily-sequenced ticket identifiers.
//!
//! Ids are `YYMMDD` + a 3-digit sequence starting at `001`. The counter for a
//! date is seeded from the highest sequence already stored for that date, so
//! a restart never reissues an id. Allocation is serialized per date: callers
//! for different dates never contend.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::model::{MAX_DAILY_SEQUENCE, TicketId};

/// Where the generator learns the highest sequence already issued for a date.
pub trait SequenceSource: Send + Sync {
    /// Highest stored sequence for `date`, or 0 when none exist.
    fn max_sequence(&self, date: NaiveDate) -> Result<u16, IdError>;
}

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("daily ticket sequence exhausted for {date}")]
    SequenceExhausted { date: NaiveDate },

    #[error("failed to read existing sequences: {0}")]
    Source(String),
}

/// Per-date counter state. `None` until seeded from the source.
type Counter = Arc<Mutex<Option<u16>>>;

/// Issues ticket ids, at most 999 per calendar day.
#[derive(Debug, Default)]
pub struct TicketIdGenerator {
    counters: Mutex<HashMap<NaiveDate, Counter>>,
}

impl TicketIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `date`.
    ///
    /// The outer map lock is held only long enough to find the date's counter;
    /// seeding and incrementing happen under that counter's own lock. Counters
    /// for earlier dates are dropped when a new date starts; a late caller for
    /// one of them reseeds from the source.
    pub fn next(&self, date: NaiveDate, source: &dyn SequenceSource) -> Result<TicketId, IdError> {
        let counter = {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            if !counters.contains_key(&date) {
                counters.retain(|day, _| *day > date);
            }
            Arc::clone(counters.entry(date).or_default())
        };

        let mut last = counter.lock().unwrap_or_else(PoisonError::into_inner);
        let current = match *last {
            Some(seq) => seq,
            None => {
                let seeded = source.max_sequence(date)?;
                tracing::debug!(%date, seeded, "seeded daily ticket sequence");
                seeded
            }
        };

        if current >= MAX_DAILY_SEQUENCE {
            *last = Some(current);
            tracing::warn!(%date, "daily ticket sequence exhausted");
            return Err(IdError::SequenceExhausted { date });
        }

        let next = current + 1;
        *last = Some(next);
        let id = TicketId::new(date, next);
        tracing::info!(ticket = %id, "allocated ticket id");
        Ok(id)
    }

    #[cfg(test)]
    fn tracked_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        dates.sort_unstable();
        dates
    }

    /// Forget cached counters so the next call reseeds from the source.
    ///
    /// Used after another process may have written ids for the same dates.
    pub fn reset(&self) {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    struct Fixed(u16);

    impl SequenceSource for Fixed {
        fn max_sequence(&self, _date: NaiveDate) -> Result<u16, IdError> {
            Ok(self.0)
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    #[test]
    fn first_id_of_the_day_is_001() {
        let ids = TicketIdGenerator::new();
        let id = ids.next(day(1), &Fixed(0)).unwrap();
        assert_eq!(id.as_str(), "260101001");
        assert_eq!(ids.next(day(1), &Fixed(0)).unwrap().as_str(), "260101002");
    }

    #[test]
    fn sequences_reset_per_date() {
        let ids = TicketIdGenerator::new();
        ids.next(day(1), &Fixed(0)).unwrap();
        ids.next(day(1), &Fixed(0)).unwrap();
        assert_eq!(ids.next(day(2), &Fixed(0)).unwrap().as_str(), "260102001");
    }

    #[test]
    fn seeding_resumes_after_stored_maximum() {
        let ids = TicketIdGenerator::new();
        assert_eq!(ids.next(day(1), &Fixed(41)).unwrap().sequence(), 42);
    }

    #[test]
    fn exhaustion_is_reported_and_sticky() {
        let ids = TicketIdGenerator::new();
        assert_eq!(ids.next(day(1), &Fixed(998)).unwrap().sequence(), 999);
        assert!(matches!(
            ids.next(day(1), &Fixed(0)),
            Err(IdError::SequenceExhausted { .. })
        ));
        assert!(matches!(
            ids.next(day(1), &Fixed(0)),
            Err(IdError::SequenceExhausted { .. })
        ));
        assert!(ids.next(day(2), &Fixed(0)).is_ok());
    }

    #[test]
    fn a_new_day_drops_earlier_counters() {
        let ids = TicketIdGenerator::new();
        ids.next(day(1), &Fixed(0)).unwrap();
        ids.next(day(2), &Fixed(0)).unwrap();
        ids.next(day(3), &Fixed(0)).unwrap();
        assert_eq!(ids.tracked_dates(), vec![day(3)]);

        // Day 1 comes back through the source, not the dropped counter.
        assert_eq!(ids.next(day(1), &Fixed(7)).unwrap().sequence(), 8);
        assert_eq!(ids.tracked_dates(), vec![day(1), day(3)]);
    }

    #[test]
    fn reset_reseeds_from_source() {
        let ids = TicketIdGenerator::new();
        ids.next(day(1), &Fixed(0)).unwrap();
        ids.reset();
        assert_eq!(ids.next(day(1), &Fixed(10)).unwrap().sequence(), 11);
    }

    #[test]
    fn concurrent_callers_get_distinct_ids() {
        let ids = Arc::new(TicketIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    (0..25)
                        .map(|_| ids.next(day(1), &Fixed(0)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 200);
        let max = seen.iter().map(TicketId::sequence).max().unwrap();
        assert_eq!(max, 200);
    }
}
