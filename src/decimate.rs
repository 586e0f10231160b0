//! Frame decimation.
//!
//! Gates a high-rate frame feed down to at most one frame per interval. The window is
//! measured from the capture instant of the last *emitted* frame, so bursty arrival
//! never pushes emission above the target rate and a late frame re-anchors the window.

use std::time::{Duration, Instant};

use crate::frame::Frame;

/// One decimated frame per second.
pub const DEFAULT_DECIMATION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct FrameDecimator {
    interval: Duration,
    last_emitted: Option<Instant>,
    admitted: u64,
    dropped: u64,
}

impl FrameDecimator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: None,
            admitted: 0,
            dropped: 0,
        }
    }

    /// Returns true when a frame captured at `captured_at` should be emitted.
    ///
    /// The first frame after construction or `reset` is always admitted.
    pub fn admit_at(&mut self, captured_at: Instant) -> bool {
        let due = match self.last_emitted {
            None => true,
            // A capture instant earlier than the anchor (clock jitter between sources)
            // saturates to zero and is dropped.
            Some(last) => captured_at.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_emitted = Some(captured_at);
            self.admitted += 1;
        } else {
            self.dropped += 1;
        }
        due
    }

    /// Take ownership of a frame and either drop it or hand it back for downstream use.
    pub fn offer(&mut self, frame: Frame) -> Option<Frame> {
        if self.admit_at(frame.captured_at) {
            Some(frame)
        } else {
            None
        }
    }

    /// Forget the emission anchor so the next frame is emitted immediately.
    pub fn reset(&mut self) {
        self.last_emitted = None;
        self.admitted = 0;
        self.dropped = 0;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> DecimatorStats {
        DecimatorStats {
            admitted: self.admitted,
            dropped: self.dropped,
        }
    }
}

impl Default for FrameDecimator {
    fn default() -> Self {
        Self::new(DEFAULT_DECIMATION_INTERVAL)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecimatorStats {
    pub admitted: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_frame_is_always_emitted() {
        let mut d = FrameDecimator::default();
        assert!(d.admit_at(Instant::now()));
    }

    #[test]
    fn at_most_one_frame_per_rolling_second() {
        let base = Instant::now();
        let mut d = FrameDecimator::default();
        // 30 fps for 5 seconds.
        let emitted: Vec<u64> = (0..150u64)
            .filter(|i| d.admit_at(base + ms(i * 33)))
            .map(|i| i * 33)
            .collect();

        for pair in emitted.windows(2) {
            assert!(pair[1] - pair[0] >= 1000, "emitted too close: {:?}", pair);
        }
        assert_eq!(emitted.len(), 5);
        assert_eq!(d.stats().admitted + d.stats().dropped, 150);
    }

    #[test]
    fn window_is_anchored_on_last_emitted_frame() {
        let base = Instant::now();
        let mut d = FrameDecimator::default();
        assert!(d.admit_at(base));
        assert!(!d.admit_at(base + ms(999)));
        // Late frame re-anchors the window.
        assert!(d.admit_at(base + ms(1700)));
        assert!(!d.admit_at(base + ms(2500)));
        assert!(d.admit_at(base + ms(2700)));
    }

    #[test]
    fn bursty_arrival_does_not_exceed_rate() {
        let base = Instant::now();
        let mut d = FrameDecimator::default();
        let mut count = 0;
        // A burst of 50 frames within 10ms, every 1.5 seconds.
        for burst in 0..4u64 {
            for k in 0..50u64 {
                if d.admit_at(base + ms(burst * 1500 + k / 5)) {
                    count += 1;
                }
            }
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn reset_re_emits_immediately() {
        let base = Instant::now();
        let mut d = FrameDecimator::default();
        assert!(d.admit_at(base));
        d.reset();
        assert!(d.admit_at(base + ms(10)));
    }

    #[test]
    fn earlier_timestamp_is_dropped() {
        let base = Instant::now() + Duration::from_secs(10);
        let mut d = FrameDecimator::default();
        assert!(d.admit_at(base));
        assert!(!d.admit_at(base - ms(500)));
    }
}
