//! timers and streaming statistics used by the real time loops
//!
//! Everything here works off the micro second clock from
//! [`crate::utils::get_micro_time`] so that the loops never need to own a
//! `std::time::Instant` and tests can drive time by hand.
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// interval timer in microseconds.  Used for the playback tick cadence,
/// device poll cadence and the periodic stats dump.
pub struct MicroTimer {
    last_time: u128,
    interval: u128,
}

impl MicroTimer {
    pub fn build(now: u128, interval: u128) -> MicroTimer {
        MicroTimer {
            last_time: now,
            interval,
        }
    }
    pub fn set_interval(&mut self, interval: u128) -> () {
        self.interval = interval;
    }
    pub fn expired(&self, now: u128) -> bool {
        (self.last_time + self.interval) < now
    }
    pub fn reset(&mut self, now: u128) {
        self.last_time = now;
    }
    /// advance by one interval instead of snapping to now.  Keeps a tick
    /// cadence from drifting when a tick runs late.
    pub fn advance(&mut self) {
        self.last_time += self.interval;
    }
    pub fn since(&self, now: u128) -> u128 {
        now - self.last_time
    }
}

/// running mean/sigma/peak over a sliding window.  The jitter buffer feeds
/// its depth in here so the stats dump can show how the network is behaving.
#[derive(Debug, Deserialize, Serialize)]
pub struct StreamStat {
    peak: f64,
    mean: f64,
    sigma: f64,
    window: u64,
}

impl StreamStat {
    pub fn build(window_size: u64) -> StreamStat {
        StreamStat {
            peak: 0.0,
            mean: 0.0,
            sigma: 0.0,
            window: window_size,
        }
    }
    pub fn clear(&mut self) -> () {
        self.peak = 0.0;
        self.mean = 0.0;
        self.sigma = 0.0;
    }
    pub fn get_peak(&self) -> f64 {
        self.peak
    }
    pub fn get_mean(&self) -> f64 {
        self.mean
    }
    pub fn get_sigma(&self) -> f64 {
        self.sigma
    }

    pub fn add_sample(&mut self, sample: f64) -> () {
        if sample > self.peak {
            self.peak = sample;
        }
        let scale: f64 = (self.window as f64 - 1.0) / self.window as f64;
        self.mean = scale * (self.mean + sample / self.window as f64);
        self.sigma = scale * (self.sigma + (self.mean - sample).abs() / self.window as f64);
    }
}

impl fmt::Display for StreamStat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ peak: {:.2}, mean: {:.2}, sigma: {:.2} }}",
            self.peak, self.mean, self.sigma
        )
    }
}

#[cfg(test)]
mod test_micro_timer {
    use super::*;

    #[test]
    fn expiration() {
        let mut now = 1000;
        let mut mt = MicroTimer::build(now, 100);
        assert!(!mt.expired(now));
        now += 99;
        assert!(!mt.expired(now));
        now += 2;
        assert!(mt.expired(now));
        mt.reset(now);
        assert!(!mt.expired(now));
        assert_eq!(mt.since(now + 10), 10);
    }

    #[test]
    fn reset_clears_backlog() {
        // after a long stall, reset should swallow the missed intervals
        // instead of letting advance() replay them in a burst
        let mut mt = MicroTimer::build(0, 100);
        assert!(mt.expired(10_000));
        mt.reset(10_000);
        assert!(!mt.expired(10_050));
        assert!(mt.expired(10_101));
    }

    #[test]
    fn advance_keeps_cadence() {
        // advancing should step by whole intervals even if we check late
        let mut mt = MicroTimer::build(0, 100);
        assert!(mt.expired(150));
        mt.advance();
        assert!(!mt.expired(150));
        assert!(mt.expired(201));
    }
}

#[cfg(test)]
mod test_stream_stat {
    use super::*;

    #[test]
    fn build() {
        let stat = StreamStat::build(100);
        assert_eq!(stat.get_mean(), 0.0);
    }
    #[test]
    fn add_sample() {
        let mut stat = StreamStat::build(2);
        stat.add_sample(1.0);
        assert_eq!(stat.get_mean(), 0.25);
        stat.add_sample(1.0);
        stat.add_sample(1.0);
        assert!(stat.get_mean() > 0.25);
        assert_eq!(stat.get_peak(), 1.0);
    }
    #[test]
    fn clear() {
        let mut stat = StreamStat::build(10);
        stat.add_sample(5.0);
        stat.clear();
        assert_eq!(stat.get_mean(), 0.0);
        assert_eq!(stat.get_peak(), 0.0);
    }
}
