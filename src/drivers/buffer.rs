use std::collections::VecDeque;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::drivers::TriggeringError;

/// Capacity-bounded, time-ordered archive queried by time range.
///
/// Entries only ever arrive at the tail with non-decreasing timestamps; once
/// `max_entries` is exceeded the oldest entry is evicted. Every operation takes
/// the same lock, independent of the pipeline queues.
pub struct TimeSeries<T> {
    entries: Mutex<VecDeque<(SystemTime, T)>>,
    max_entries: usize,
}

impl<T: Clone> TimeSeries<T> {
    pub fn with_capacity(max_entries: usize) -> Result<Self, TriggeringError> {
        if max_entries == 0 {
            return Err(TriggeringError::InvalidCapacity);
        }
        Ok(Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries,
        })
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Appends at the tail, evicting the head when full.
    ///
    /// A timestamp older than the current tail is rejected and leaves the
    /// series untouched.
    pub fn insert(&self, timestamp: SystemTime, value: T) -> Result<(), TriggeringError> {
        let mut entries = self.entries.lock();
        if let Some(&(latest, _)) = entries.back() {
            if timestamp < latest {
                return Err(TriggeringError::OutOfOrder {
                    latest,
                    inserted: timestamp,
                });
            }
        }
        entries.push_back((timestamp, value));
        if entries.len() > self.max_entries {
            entries.pop_front();
        }
        Ok(())
    }

    /// Values stamped within `[start, end)`, oldest first.
    pub fn range(&self, start: SystemTime, end: SystemTime) -> Vec<T> {
        let entries = self.entries.lock();
        entries
            .iter()
            .skip_while(|(ts, _)| *ts < start)
            .take_while(|(ts, _)| *ts < end)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Timestamps of the oldest and newest entries.
    pub fn span(&self) -> Option<(SystemTime, SystemTime)> {
        let entries = self.entries.lock();
        Some((entries.front()?.0, entries.back()?.0))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
    }

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let series = TimeSeries::with_capacity(3).unwrap();
        for i in 0..7u64 {
            series.insert(at(i * 10), i).unwrap();
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.range(at(0), at(1_000)), vec![4, 5, 6]);
        assert_eq!(series.span(), Some((at(40), at(60))));
    }

    #[test]
    fn range_is_half_open() {
        let series = TimeSeries::with_capacity(16).unwrap();
        for i in 0..10u64 {
            series.insert(at(i * 10), i).unwrap();
        }
        assert_eq!(series.range(at(20), at(50)), vec![2, 3, 4]);
        assert_eq!(series.range(at(15), at(21)), vec![2]);
        assert!(series.range(at(95), at(200)).is_empty());
        assert!(series.range(at(50), at(50)).is_empty());
        // Queries never mutate the store.
        assert_eq!(series.len(), 10);
    }

    #[test]
    fn rejects_out_of_order_insert() {
        let series = TimeSeries::with_capacity(4).unwrap();
        series.insert(at(100), "a").unwrap();
        series.insert(at(100), "b").unwrap();
        let err = series.insert(at(99), "c").unwrap_err();
        assert!(matches!(err, TriggeringError::OutOfOrder { .. }));
        assert_eq!(series.range(at(0), at(1_000)), vec!["a", "b"]);
    }

    #[test]
    fn zero_capacity_is_an_error() {
        assert!(matches!(
            TimeSeries::<u8>::with_capacity(0),
            Err(TriggeringError::InvalidCapacity)
        ));
    }
}
