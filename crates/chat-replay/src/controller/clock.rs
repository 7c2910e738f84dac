//! Playback clocks.
//!
//! The controller never reads wall-clock time directly. Everything is timed
//! against the media position reported by a [`PlaybackClock`], so pausing or
//! seeking the video moves chat in lockstep.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::time::Instant;

/// Source of the current media position.
pub trait PlaybackClock: Send + Sync {
    /// Current playback position in milliseconds.
    fn current_time_ms(&self) -> i64;

    fn is_paused(&self) -> bool;
}

/// A clock the host moves explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    time_ms: AtomicI64,
    paused: AtomicBool,
}

impl ManualClock {
    pub fn new(time_ms: i64) -> Self {
        Self {
            time_ms: AtomicI64::new(time_ms),
            paused: AtomicBool::new(false),
        }
    }

    pub fn set_time(&self, time_ms: i64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.time_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl PlaybackClock for ManualClock {
    fn current_time_ms(&self) -> i64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct RealtimeState {
    /// Position when `running_since` was taken (or the frozen position)
    anchor_ms: i64,
    running_since: Option<Instant>,
    speed: f64,
}

/// A clock that advances with tokio time, scaled by a playback speed.
#[derive(Debug)]
pub struct RealtimeClock {
    state: Mutex<RealtimeState>,
}

impl RealtimeClock {
    /// A running clock starting at `start_ms`.
    pub fn new(start_ms: i64, speed: f64) -> Self {
        Self {
            state: Mutex::new(RealtimeState {
                anchor_ms: start_ms,
                running_since: Some(Instant::now()),
                speed: speed.max(0.0),
            }),
        }
    }

    fn position(state: &RealtimeState) -> i64 {
        match state.running_since {
            Some(since) => {
                let elapsed = since.elapsed().as_secs_f64() * 1000.0 * state.speed;
                state.anchor_ms + elapsed as i64
            }
            None => state.anchor_ms,
        }
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        state.anchor_ms = Self::position(&state);
        state.running_since = None;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    pub fn seek(&self, time_ms: i64) {
        let mut state = self.state.lock();
        state.anchor_ms = time_ms;
        if state.running_since.is_some() {
            state.running_since = Some(Instant::now());
        }
    }

    pub fn set_speed(&self, speed: f64) {
        let mut state = self.state.lock();
        state.anchor_ms = Self::position(&state);
        if state.running_since.is_some() {
            state.running_since = Some(Instant::now());
        }
        state.speed = speed.max(0.0);
    }
}

impl PlaybackClock for RealtimeClock {
    fn current_time_ms(&self) -> i64 {
        Self::position(&self.state.lock())
    }

    fn is_paused(&self) -> bool {
        self.state.lock().running_since.is_none()
    }
}
