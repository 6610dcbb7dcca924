//! per direction lifecycle state machine
//!
//! One coordinator per direction.  It owns the mute flag and the lifecycle
//! phase; the capture, receive and playback loops only mutate direction
//! state by reporting events here.  Device churn and jitter resyncs move a
//! direction through Recovering and back without ever touching the socket;
//! only exhausted retries or an unresolvable format mismatch stop it.
use log::{debug, error, info, warn};
use std::fmt;

use crate::common::timing::MicroTimer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    /// capture -> network
    Outbound,
    /// network -> playback
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Starting,
    Streaming,
    Recovering,
    Stopped,
}

pub struct SessionCoordinator {
    direction: Direction,
    phase: Phase,
    last_seen_sequence: u32,
    last_activity: u128,
    muted: bool,
    retries: u32,
    max_retries: u32,
    backoff_base: u128,
    backoff: MicroTimer,
}

impl SessionCoordinator {
    pub fn build(
        direction: Direction,
        max_retries: u32,
        backoff_us: u128,
        now: u128,
    ) -> SessionCoordinator {
        SessionCoordinator {
            direction,
            phase: Phase::Starting,
            last_seen_sequence: 0,
            last_activity: now,
            muted: false,
            retries: 0,
            max_retries,
            backoff_base: backoff_us,
            backoff: MicroTimer::build(now, backoff_us),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
    pub fn direction(&self) -> Direction {
        self.direction
    }
    pub fn is_muted(&self) -> bool {
        self.muted
    }
    pub fn last_seen_sequence(&self) -> u32 {
        self.last_seen_sequence
    }
    pub fn idle_for(&self, now: u128) -> u128 {
        now - self.last_activity.min(now)
    }

    /// devices opened, pipeline running
    pub fn started(&mut self) -> () {
        if self.phase == Phase::Starting {
            info!("{}: streaming", self.direction);
            self.phase = Phase::Streaming;
        }
    }

    /// the default device moved or died under the pipeline
    pub fn device_changed(&mut self, now: u128) -> () {
        if self.phase == Phase::Streaming {
            warn!("{}: device changed, recovering", self.direction);
            self.enter_recovering(now);
        }
    }

    /// the jitter buffer re-anchored; treat as a stream restart
    pub fn resync(&mut self, now: u128) -> () {
        if self.phase == Phase::Streaming {
            info!("{}: resync, recovering", self.direction);
            self.enter_recovering(now);
        }
    }

    /// socket failures persisted past the transient threshold
    pub fn socket_trouble(&mut self, now: u128) -> () {
        if self.phase == Phase::Streaming {
            warn!("{}: persistent socket errors, recovering", self.direction);
            self.enter_recovering(now);
        }
    }

    /// recovery loops call this to pace reopen attempts
    pub fn retry_ready(&self, now: u128) -> bool {
        self.phase == Phase::Recovering && self.backoff.expired(now)
    }

    /// a reopen attempt worked
    pub fn recovered(&mut self) -> () {
        if self.phase == Phase::Recovering {
            info!("{}: recovered, streaming", self.direction);
            self.phase = Phase::Streaming;
            self.retries = 0;
        }
    }

    /// a reopen attempt failed.  Backs off linearly; exhausting the retry
    /// budget stops the direction for good.
    pub fn retry_failed(&mut self, now: u128) -> Phase {
        if self.phase != Phase::Recovering {
            return self.phase;
        }
        self.retries += 1;
        if self.retries > self.max_retries {
            error!(
                "{}: gave up after {} recovery attempts",
                self.direction, self.retries
            );
            self.phase = Phase::Stopped;
        } else {
            debug!(
                "{}: recovery attempt {}/{} failed",
                self.direction, self.retries, self.max_retries
            );
            self.backoff
                .set_interval(self.backoff_base * (self.retries as u128 + 1));
            self.backoff.reset(now);
        }
        self.phase
    }

    /// a failure there is no recovery path for (format mismatch)
    pub fn failed(&mut self, what: &str) -> () {
        error!("{}: stopped: {}", self.direction, what);
        self.phase = Phase::Stopped;
    }

    /// operator or peer teardown.  Terminal until an external restart.
    pub fn teardown(&mut self) -> () {
        if self.phase != Phase::Stopped {
            info!("{}: torn down", self.direction);
            self.phase = Phase::Stopped;
        }
    }

    /// mute is owned here; the packetizer only mirrors it
    pub fn set_muted(&mut self, muted: bool) -> () {
        if self.muted != muted {
            info!(
                "{}: {}",
                self.direction,
                if muted { "muted" } else { "unmuted" }
            );
            self.muted = muted;
        }
    }

    /// note traffic on this direction for idle accounting
    pub fn observe_sequence(&mut self, sequence: u32, now: u128) -> () {
        self.last_seen_sequence = sequence;
        self.last_activity = now;
    }

    fn enter_recovering(&mut self, now: u128) -> () {
        self.phase = Phase::Recovering;
        self.retries = 0;
        self.backoff.set_interval(self.backoff_base);
        self.backoff.reset(now);
    }
}

impl fmt::Display for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ dir: {}, phase: {:?}, muted: {}, last_seq: {} }}",
            self.direction, self.phase, self.muted, self.last_seen_sequence
        )
    }
}
