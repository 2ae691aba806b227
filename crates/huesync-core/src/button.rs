// ── Button multi-press aggregation ──
//
// Counts short releases per (device, channel) and turns a burst into a
// single Double..Quintuple code once the aggregation window closes.
// Raw button events are emitted separately and unconditionally; this
// only adds the aggregate.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{ButtonEventCode, ChannelKey};

#[derive(Debug, Clone, Copy)]
struct PressTracker {
    count: u32,
    last: DateTime<Utc>,
}

/// A finished burst ready to be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressAggregate {
    pub key: ChannelKey,
    pub code: ButtonEventCode,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ButtonDebouncer {
    window: Duration,
    reset_gap: Duration,
    trackers: HashMap<ChannelKey, PressTracker>,
}

impl ButtonDebouncer {
    pub fn new(window: Duration, reset_gap: Duration) -> Self {
        Self {
            window,
            reset_gap,
            trackers: HashMap::new(),
        }
    }

    /// The aggregation window to (re)arm after each short release.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// An initial press after a long pause closes the previous burst.
    pub fn on_initial_press(
        &mut self,
        key: &ChannelKey,
        at: DateTime<Utc>,
    ) -> Option<PressAggregate> {
        if self.gap_exceeded(key, at) {
            self.flush(key)
        } else {
            None
        }
    }

    /// Count a short release. A release arriving after the reset gap
    /// first flushes the previous burst. Releases count even without a
    /// preceding initial press.
    pub fn on_short_release(
        &mut self,
        key: &ChannelKey,
        at: DateTime<Utc>,
    ) -> Option<PressAggregate> {
        let flushed = if self.gap_exceeded(key, at) {
            self.flush(key)
        } else {
            None
        };

        let tracker = self.trackers.entry(key.clone()).or_insert(PressTracker {
            count: 0,
            last: at,
        });
        tracker.count += 1;
        tracker.last = at;

        flushed
    }

    /// The window elapsed with no further release.
    pub fn on_window_elapsed(&mut self, key: &ChannelKey) -> Option<PressAggregate> {
        self.flush(key)
    }

    /// Drop every tracker belonging to `device_id`.
    pub fn forget_device(&mut self, device_id: &str) {
        self.trackers.retain(|k, _| k.device_id != device_id);
    }

    fn gap_exceeded(&self, key: &ChannelKey, at: DateTime<Utc>) -> bool {
        self.trackers.get(key).is_some_and(|t| {
            (at - t.last)
                .to_std()
                .is_ok_and(|gap| gap > self.reset_gap)
        })
    }

    fn flush(&mut self, key: &ChannelKey) -> Option<PressAggregate> {
        let tracker = self.trackers.remove(key)?;
        ButtonEventCode::for_press_count(tracker.count).map(|code| PressAggregate {
            key: key.clone(),
            code,
            timestamp: tracker.last,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn debouncer() -> ButtonDebouncer {
        ButtonDebouncer::new(Duration::from_millis(1200), Duration::from_millis(500))
    }

    fn t0() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn four_quick_releases_make_a_quadruple_press() {
        let mut d = debouncer();
        let key = ChannelKey::new("dev", "button");
        for i in 0..4 {
            let at = t0() + TimeDelta::milliseconds(i * 300);
            assert!(d.on_short_release(&key, at).is_none());
        }
        let agg = d.on_window_elapsed(&key).unwrap();
        assert_eq!(agg.code, ButtonEventCode::QuadruplePress);
        assert_eq!(agg.timestamp, t0() + TimeDelta::milliseconds(900));
        assert!(d.on_window_elapsed(&key).is_none());
    }

    #[test]
    fn single_press_adds_nothing() {
        let mut d = debouncer();
        let key = ChannelKey::new("dev", "button");
        d.on_short_release(&key, t0());
        assert!(d.on_window_elapsed(&key).is_none());
    }

    #[test]
    fn long_gap_flushes_previous_burst() {
        let mut d = debouncer();
        let key = ChannelKey::new("dev", "button1");
        d.on_short_release(&key, t0());
        d.on_short_release(&key, t0() + TimeDelta::milliseconds(200));
        let flushed = d
            .on_short_release(&key, t0() + TimeDelta::milliseconds(900))
            .unwrap();
        assert_eq!(flushed.code, ButtonEventCode::DoublePress);
        // The late release starts a new burst of one.
        assert!(d.on_window_elapsed(&key).is_none());
    }

    #[test]
    fn gap_of_exactly_reset_threshold_does_not_flush() {
        let mut d = debouncer();
        let key = ChannelKey::new("dev", "button");
        d.on_short_release(&key, t0());
        assert!(
            d.on_short_release(&key, t0() + TimeDelta::milliseconds(500))
                .is_none()
        );
        assert_eq!(
            d.on_window_elapsed(&key).unwrap().code,
            ButtonEventCode::DoublePress
        );
    }

    #[test]
    fn release_without_initial_press_still_counts() {
        let mut d = debouncer();
        let key = ChannelKey::new("dev", "button");
        d.on_short_release(&key, t0());
        d.on_short_release(&key, t0() + TimeDelta::milliseconds(100));
        assert_eq!(
            d.on_window_elapsed(&key).unwrap().code,
            ButtonEventCode::DoublePress
        );
    }

    #[test]
    fn initial_press_after_pause_flushes() {
        let mut d = debouncer();
        let key = ChannelKey::new("dev", "button");
        d.on_short_release(&key, t0());
        d.on_short_release(&key, t0() + TimeDelta::milliseconds(100));
        d.on_short_release(&key, t0() + TimeDelta::milliseconds(200));
        let agg = d
            .on_initial_press(&key, t0() + TimeDelta::milliseconds(1000))
            .unwrap();
        assert_eq!(agg.code, ButtonEventCode::TriplePress);
    }

    #[test]
    fn channels_are_tracked_independently() {
        let mut d = debouncer();
        let a = ChannelKey::new("dev", "button1");
        let b = ChannelKey::new("dev", "button2");
        d.on_short_release(&a, t0());
        d.on_short_release(&b, t0());
        d.on_short_release(&a, t0() + TimeDelta::milliseconds(100));
        assert_eq!(
            d.on_window_elapsed(&a).unwrap().code,
            ButtonEventCode::DoublePress
        );
        assert!(d.on_window_elapsed(&b).is_none());
    }
}
