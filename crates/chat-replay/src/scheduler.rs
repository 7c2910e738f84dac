//! Danmaku lane scheduler.
//!
//! Bullets cross a viewport of width `W` right to left in a fixed time `D`.
//! A bullet of width `w` starting at `s` moves at `v = (W + w) / D` with its
//! left edge at `x(t) = W - v * (t - s)`, so wider bullets move faster. Two
//! bullets in the same lane must never overlap while both are on screen.
//!
//! For a follower `B` behind a leader `A`, the gap `x_B - (x_A + w_A)` is
//! linear in `t`, so it is enough to check both ends of the shared window:
//!
//! - when `B` enters, `A` must have fully entered: `s_B - s_A >= w_A / v_A`
//! - when `A` leaves, `B` must not have reached the left edge yet:
//!   `s_B - s_A >= D - W / v_B`
//!
//! Lanes are filled greedily: the first lane where the bullet fits at its
//! own timestamp wins, otherwise the lane needing the smallest delay.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

use crate::config::DanmakuConfig;
use crate::error::{ReplayError, Result};

/// Lifecycle of a tracked bullet relative to the playback clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletState {
    /// Waiting for its start time
    Scheduled,
    Animating,
    /// Frozen by a playback pause
    Paused,
    /// Fully crossed the viewport; removed by the next garbage collection
    Expired,
}

/// Where and when a bullet is drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub id: String,
    pub lane: usize,
    /// Playback time the bullet enters the viewport
    pub start_ms: i64,
    pub duration_ms: i64,
    /// `start_ms - now`; negative once the bullet is on screen
    pub delay_ms: i64,
    /// Delay applied on top of the chat offset to avoid a collision
    pub shift_ms: i64,
    pub width: f64,
    /// Left edge at `now`
    pub x: f64,
    /// No collision-free start was available within the shift limit
    pub overlapping: bool,
}

#[derive(Debug, Clone)]
struct Bullet {
    id: String,
    offset_ms: i64,
    shift_ms: i64,
    width: f64,
    overlapping: bool,
}

impl Bullet {
    fn start_ms(&self) -> i64 {
        self.offset_ms + self.shift_ms
    }
}

#[derive(Debug, Clone, Copy)]
struct Geometry {
    viewport_width: f64,
    duration_ms: i64,
}

impl Geometry {
    /// Pixels per millisecond.
    fn velocity(&self, width: f64) -> f64 {
        (self.viewport_width + width) / self.duration_ms as f64
    }

    fn x_at(&self, start_ms: i64, width: f64, time_ms: i64) -> f64 {
        self.viewport_width - self.velocity(width) * (time_ms - start_ms) as f64
    }

    /// Earliest start at or after `start` where a bullet of `width` stays
    /// clear of `other`.
    fn clear_start(&self, other: &Bullet, width: f64, start: i64) -> i64 {
        let duration = self.duration_ms;
        let other_start = other.start_ms();
        if start >= other_start + duration || start + duration <= other_start {
            return start;
        }

        let other_velocity = self.velocity(other.width);
        let velocity = self.velocity(width);
        if start <= other_start {
            // The new bullet leads
            let lead = (other_start - start) as f64;
            if lead >= width / velocity
                && lead >= duration as f64 - self.viewport_width / other_velocity
            {
                return start;
            }
        }

        let follow = (other.width / other_velocity)
            .max(duration as f64 - self.viewport_width / velocity)
            .ceil() as i64;
        start.max(other_start + follow)
    }

    /// Earliest collision-free start in `lane` at or after `offset`.
    fn earliest_start(&self, lane: &VecDeque<Bullet>, width: f64, offset: i64) -> i64 {
        let mut start = offset;
        // Every move jumps past one occupant, so this settles within len + 1 rounds.
        for _ in 0..=lane.len() {
            let next = lane
                .iter()
                .map(|other| self.clear_start(other, width, start))
                .max()
                .unwrap_or(start);
            if next == start {
                break;
            }
            start = next;
        }
        start
    }
}

/// Greedy online lane assignment for scrolling chat.
#[derive(Debug, Clone)]
pub struct DanmakuScheduler {
    config: DanmakuConfig,
    viewport_width: f64,
    lanes: Vec<VecDeque<Bullet>>,
    /// bullet id -> lane
    registry: FxHashMap<String, usize>,
    paused: bool,
}

impl DanmakuScheduler {
    pub fn new(config: DanmakuConfig, viewport_width: f64) -> Self {
        let config = DanmakuConfig {
            lane_count: config.lane_count.max(1),
            duration_ms: config.duration_ms.max(1),
            max_shift_ms: config.max_shift_ms.max(0),
            ..config
        };
        Self {
            lanes: vec![VecDeque::new(); config.lane_count],
            config,
            viewport_width: viewport_width.max(0.0),
            registry: FxHashMap::default(),
            paused: false,
        }
    }

    fn geometry(&self) -> Geometry {
        Geometry {
            viewport_width: self.viewport_width,
            duration_ms: self.config.duration_ms,
        }
    }

    pub fn viewport_width(&self) -> f64 {
        self.viewport_width
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Number of tracked bullets.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains_key(id)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Place a bullet for a chat event appearing at `offset_ms`.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        offset_ms: i64,
        width: f64,
        now_ms: i64,
    ) -> Result<Placement> {
        let id = id.into();
        if self.registry.contains_key(&id) {
            return Err(ReplayError::DuplicateBullet(id));
        }
        let width = width.max(0.0);
        let geometry = self.geometry();

        let mut best: Option<(usize, i64)> = None;
        for (index, lane) in self.lanes.iter().enumerate() {
            let shift = geometry.earliest_start(lane, width, offset_ms) - offset_ms;
            if shift == 0 {
                best = Some((index, 0));
                break;
            }
            if best.is_none_or(|(_, least)| shift < least) {
                best = Some((index, shift));
            }
        }
        let (lane, required) = best.unwrap_or((0, 0));

        let overlapping = required > self.config.max_shift_ms;
        if overlapping {
            debug!(
                "Bullet {} overlaps in lane {}: needs {}ms, limit {}ms",
                id, lane, required, self.config.max_shift_ms
            );
        }
        let bullet = Bullet {
            id: id.clone(),
            offset_ms,
            shift_ms: required.min(self.config.max_shift_ms),
            width,
            overlapping,
        };
        let placement = self.placement(lane, &bullet, now_ms);
        self.lanes[lane].push_back(bullet);
        self.registry.insert(id, lane);
        Ok(placement)
    }

    fn placement(&self, lane: usize, bullet: &Bullet, now_ms: i64) -> Placement {
        let start_ms = bullet.start_ms();
        Placement {
            id: bullet.id.clone(),
            lane,
            start_ms,
            duration_ms: self.config.duration_ms,
            delay_ms: start_ms - now_ms,
            shift_ms: bullet.shift_ms,
            width: bullet.width,
            x: self.geometry().x_at(start_ms, bullet.width, now_ms),
            overlapping: bullet.overlapping,
        }
    }

    /// Drop bullets at the front of each lane that have fully crossed the
    /// viewport. Returns their ids.
    pub fn collect_garbage(&mut self, now_ms: i64) -> Vec<String> {
        let duration = self.config.duration_ms;
        let mut expired = Vec::new();
        for lane in &mut self.lanes {
            while lane
                .front()
                .is_some_and(|bullet| now_ms - bullet.start_ms() > duration)
            {
                if let Some(bullet) = lane.pop_front() {
                    expired.push(bullet.id);
                }
            }
        }
        for id in &expired {
            self.registry.remove(id);
        }
        expired
    }

    /// Freeze every bullet in place.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Evict every bullet regardless of its progress. Returns their ids.
    pub fn seek(&mut self) -> Vec<String> {
        let evicted: Vec<String> = self
            .lanes
            .iter_mut()
            .flat_map(|lane| lane.drain(..))
            .map(|bullet| bullet.id)
            .collect();
        self.registry.clear();
        evicted
    }

    /// Recompute every tracked bullet for a new viewport width, keeping its
    /// lane and original offset.
    pub fn resize(&mut self, viewport_width: f64, now_ms: i64) -> Vec<Placement> {
        self.viewport_width = viewport_width.max(0.0);
        let geometry = self.geometry();
        for index in 0..self.lanes.len() {
            let bullets = std::mem::take(&mut self.lanes[index]);
            for mut bullet in bullets {
                let required =
                    geometry.earliest_start(&self.lanes[index], bullet.width, bullet.offset_ms)
                        - bullet.offset_ms;
                bullet.overlapping = required > self.config.max_shift_ms;
                bullet.shift_ms = required.min(self.config.max_shift_ms);
                self.lanes[index].push_back(bullet);
            }
        }
        self.placements(now_ms)
    }

    pub fn state(&self, id: &str, now_ms: i64) -> Option<BulletState> {
        let lane = *self.registry.get(id)?;
        let bullet = self.lanes[lane].iter().find(|bullet| bullet.id == id)?;
        let start = bullet.start_ms();
        Some(if now_ms < start {
            BulletState::Scheduled
        } else if now_ms - start >= self.config.duration_ms {
            BulletState::Expired
        } else if self.paused {
            BulletState::Paused
        } else {
            BulletState::Animating
        })
    }

    /// Placements of every tracked bullet, lane by lane.
    pub fn placements(&self, now_ms: i64) -> Vec<Placement> {
        self.lanes
            .iter()
            .enumerate()
            .flat_map(|(lane, bullets)| {
                bullets
                    .iter()
                    .map(move |bullet| self.placement(lane, bullet, now_ms))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(lane_count: usize, max_shift_ms: i64) -> DanmakuConfig {
        DanmakuConfig {
            lane_count,
            duration_ms: 8_000,
            max_shift_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_bullet_takes_first_lane() {
        let mut scheduler = DanmakuScheduler::new(config(3, 0), 1_000.0);
        let placement = scheduler.add("a", 5_000, 200.0, 4_000).unwrap();
        assert_eq!(placement.lane, 0);
        assert_eq!(placement.shift_ms, 0);
        assert_eq!(placement.delay_ms, 1_000);
        // one second before entering, 0.15 px/ms to the right of the edge
        assert!((placement.x - 1_150.0).abs() < 1e-9);
        assert!(!placement.overlapping);
    }

    #[test]
    fn test_simultaneous_bullets_spread_over_lanes() {
        let mut scheduler = DanmakuScheduler::new(config(3, 0), 1_000.0);
        let lanes: Vec<usize> = ["a", "b", "c"]
            .iter()
            .map(|id| scheduler.add(*id, 0, 200.0, 0).unwrap().lane)
            .collect();
        assert_eq!(lanes, vec![0, 1, 2]);

        // every lane is busy: placed anyway, on the lane needing the least delay
        let crowded = scheduler.add("d", 0, 200.0, 0).unwrap();
        assert!(crowded.overlapping);
        assert_eq!(crowded.lane, 0);
        assert_eq!(crowded.shift_ms, 0);
    }

    #[test]
    fn test_shift_resolves_collision() {
        let mut scheduler = DanmakuScheduler::new(config(1, 60_000), 1_000.0);
        scheduler.add("a", 0, 200.0, 0).unwrap();
        let b = scheduler.add("b", 0, 200.0, 0).unwrap();
        // (W + w) / D = 0.15 px/ms; 200px take 1333.3ms to enter
        assert_eq!(b.shift_ms, 1_334);
        assert_eq!(b.start_ms, 1_334);
        assert!(!b.overlapping);
    }

    #[test]
    fn test_far_apart_bullets_share_a_lane() {
        let mut scheduler = DanmakuScheduler::new(config(2, 0), 1_000.0);
        scheduler.add("a", 0, 100.0, 0).unwrap();
        let b = scheduler.add("b", 3_000, 100.0, 0).unwrap();
        assert_eq!(b.lane, 0);
        assert_eq!(b.shift_ms, 0);
    }

    #[test]
    fn test_faster_follower_needs_more_room() {
        let mut scheduler = DanmakuScheduler::new(config(2, 0), 1_000.0);
        scheduler.add("short", 0, 50.0, 0).unwrap();
        // A long bullet 1s later would catch the short one before it leaves
        let long = scheduler.add("long", 1_000, 800.0, 0).unwrap();
        assert_eq!(long.lane, 1);
    }

    #[test]
    fn test_duplicate_bullet() {
        let mut scheduler = DanmakuScheduler::new(config(2, 0), 1_000.0);
        scheduler.add("a", 0, 100.0, 0).unwrap();
        assert!(matches!(
            scheduler.add("a", 10, 100.0, 0),
            Err(ReplayError::DuplicateBullet(_))
        ));
        assert!(scheduler.contains("a"));
    }

    #[test]
    fn test_lifecycle_and_garbage_collection() {
        let mut scheduler = DanmakuScheduler::new(config(2, 0), 1_000.0);
        scheduler.add("a", 1_000, 100.0, 0).unwrap();
        assert_eq!(scheduler.state("a", 0), Some(BulletState::Scheduled));
        assert_eq!(scheduler.state("a", 1_000), Some(BulletState::Animating));

        scheduler.pause();
        assert_eq!(scheduler.state("a", 3_000), Some(BulletState::Paused));
        scheduler.resume();
        assert_eq!(scheduler.state("a", 3_000), Some(BulletState::Animating));
        assert_eq!(scheduler.state("a", 9_000), Some(BulletState::Expired));

        assert!(scheduler.collect_garbage(9_000).is_empty());
        assert_eq!(scheduler.collect_garbage(9_001), vec!["a".to_string()]);
        assert_eq!(scheduler.state("a", 9_001), None);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_seek_evicts_everything() {
        let mut scheduler = DanmakuScheduler::new(config(2, 0), 1_000.0);
        scheduler.add("a", 0, 100.0, 0).unwrap();
        scheduler.add("b", 100, 100.0, 0).unwrap();
        let mut evicted = scheduler.seek();
        evicted.sort();
        assert_eq!(evicted, vec!["a".to_string(), "b".to_string()]);
        assert!(scheduler.placements(0).is_empty());
        // ids can be placed again after a seek
        assert!(scheduler.add("a", 50_000, 100.0, 50_000).is_ok());
    }

    #[test]
    fn test_resize_repositions_from_original_offset() {
        let mut scheduler = DanmakuScheduler::new(config(2, 0), 1_000.0);
        let before = scheduler.add("a", 0, 200.0, 0).unwrap();
        let after = scheduler.resize(2_000.0, 4_000);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].start_ms, before.start_ms);
        // halfway through: x = W - (W + w) / 2
        assert!((after[0].x - (2_000.0 - 2_200.0 / 2.0)).abs() < 1e-9);
        assert_eq!(scheduler.viewport_width(), 2_000.0);
    }

    fn assert_clear(
        p: &Placement,
        q: &Placement,
        width: f64,
        duration: i64,
    ) -> std::result::Result<(), TestCaseError> {
        let from = p.start_ms.max(q.start_ms);
        let to = (p.start_ms + duration).min(q.start_ms + duration);
        if from >= to {
            return Ok(());
        }
        let geometry = Geometry {
            viewport_width: width,
            duration_ms: duration,
        };
        let (leader, follower) = if p.start_ms <= q.start_ms { (p, q) } else { (q, p) };
        for step in 0..=20 {
            let t = from + (to - from) * step / 20;
            let lead_tail = geometry.x_at(leader.start_ms, leader.width, t) + leader.width;
            let follow_head = geometry.x_at(follower.start_ms, follower.width, t);
            prop_assert!(
                follow_head + 1e-6 >= lead_tail,
                "{} and {} overlap at {}: {} < {}",
                leader.id, follower.id, t, follow_head, lead_tail
            );
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Bullets sharing a lane never overlap on screen.
        #[test]
        fn prop_no_overlap_within_lane(
            viewport in 300.0f64..1_600.0,
            lane_count in 1usize..4,
            bullets in prop::collection::vec((0i64..30_000, 10.0f64..600.0), 1..30),
        ) {
            let duration = 8_000;
            let mut scheduler = DanmakuScheduler::new(
                DanmakuConfig {
                    lane_count,
                    duration_ms: duration,
                    max_shift_ms: 1_000_000_000,
                    ..Default::default()
                },
                viewport,
            );
            for (i, (offset, width)) in bullets.iter().enumerate() {
                let placement = scheduler.add(format!("b{i}"), *offset, *width, 0).unwrap();
                prop_assert!(!placement.overlapping);
                prop_assert!(placement.start_ms >= *offset);
            }
            let placements = scheduler.placements(0);
            for (i, p) in placements.iter().enumerate() {
                for q in &placements[i + 1..] {
                    if p.lane == q.lane {
                        assert_clear(p, q, viewport, duration)?;
                    }
                }
            }
        }
    }
}
