// crates/jamcut-engine/src/ahead.rs
//
// Gapless-loop pre-scheduling: a second playback unit per clip, prepared
// ahead of the loop point and swapped in atomically at the wrap.
//
// A cold worker takes hundreds of milliseconds to emit its first frame,
// and one worker cannot play the tail of [d−ε, d] while buffering the head
// of [0, ε]. So within SCHEDULE_AHEAD of the loop point the coordinator
// hands this scheduler a fresh unit per playing clip; a prep thread loads
// and seeks it, and at the wrap the ready successor replaces the old unit,
// whose workers go back to the pools.
//
// The entry is inserted before the prep thread starts, so repeated ticks
// over the horizon cannot double-schedule: one successor per clip, ever.

use std::collections::HashMap;

use crossbeam_channel::{bounded, Receiver};
use uuid::Uuid;

use crate::playback::PlaybackUnit;

/// Lookahead before the loop point at which pre-buffering begins.
pub const SCHEDULE_AHEAD_SECS: f64 = 2.0;

/// True on the ticks where the render loop should pre-schedule successors.
pub fn in_schedule_window(playing: bool, looping: bool, duration: f64, time: f64) -> bool {
    playing && looping && duration > 0.0 && time + SCHEDULE_AHEAD_SECS >= duration
}

/// The media time a successor scheduled at `time` must start from.
pub fn successor_start(time: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 0.0;
    }
    (time + SCHEDULE_AHEAD_SECS) % duration
}

enum Prep {
    /// Load+seek running on a prep thread; resolves to (unit, ok).
    Preparing(Receiver<(PlaybackUnit, bool)>),
    Ready(PlaybackUnit),
}

pub struct AheadScheduler {
    entries: HashMap<Uuid, Prep>,
    /// Cancelled-while-preparing units; polled until their threads finish.
    doomed: Vec<Receiver<(PlaybackUnit, bool)>>,
}

impl Default for AheadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl AheadScheduler {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            doomed: Vec::new(),
        }
    }

    /// One successor per clip — both preparing and ready entries count.
    pub fn has_scheduled(&self, clip_id: Uuid) -> bool {
        self.entries.contains_key(&clip_id)
    }

    /// Prepare `unit` as the successor for `clip_id`, positioned at
    /// `media_time`. The unit is NOT connected to the compositor — the old
    /// worker keeps that connection and renders the tail until activation.
    pub fn schedule(&mut self, clip_id: Uuid, mut unit: PlaybackUnit, media_time: f64) {
        if self.entries.contains_key(&clip_id) {
            // Caller bug: the has_scheduled guard should prevent this.
            eprintln!("[ahead] {clip_id} already has a successor");
            let _ = unit;
            return;
        }
        let (tx, rx) = bounded(1);
        self.entries.insert(clip_id, Prep::Preparing(rx));
        std::thread::spawn(move || {
            let ok = unit.load(clip_id).is_ok() && unit.seek(media_time).is_ok();
            let _ = tx.send((unit, ok));
        });
        eprintln!("[ahead] scheduled successor for {clip_id} at {media_time:.3}s");
    }

    /// Drive preparing entries forward. Returns units that must go back to
    /// the pools: failed preps and cancelled-in-flight ones.
    pub fn poll(&mut self) -> Vec<PlaybackUnit> {
        let mut released = Vec::new();

        let ids: Vec<Uuid> = self.entries.keys().copied().collect();
        for clip_id in ids {
            let Some(Prep::Preparing(rx)) = self.entries.get(&clip_id) else {
                continue;
            };
            match rx.try_recv() {
                Ok((unit, true)) => {
                    self.entries.insert(clip_id, Prep::Ready(unit));
                }
                Ok((unit, false)) => {
                    eprintln!("[ahead] successor prep failed for {clip_id}");
                    self.entries.remove(&clip_id);
                    released.push(unit);
                }
                Err(crossbeam_channel::TryRecvError::Empty) => {}
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    self.entries.remove(&clip_id);
                }
            }
        }

        self.doomed.retain(|rx| match rx.try_recv() {
            Ok((unit, _)) => {
                released.push(unit);
                false
            }
            Err(crossbeam_channel::TryRecvError::Empty) => true,
            Err(crossbeam_channel::TryRecvError::Disconnected) => false,
        });

        released
    }

    /// Take the ready successor for `clip_id`. `None` when nothing is
    /// scheduled or the prep has not finished — the caller falls back to an
    /// in-place seek.
    pub fn activate(&mut self, clip_id: Uuid) -> Option<PlaybackUnit> {
        match self.entries.get(&clip_id) {
            Some(Prep::Ready(_)) => match self.entries.remove(&clip_id) {
                Some(Prep::Ready(unit)) => Some(unit),
                _ => None,
            },
            _ => None,
        }
    }

    /// Cancel one clip's successor. Ready units come back immediately;
    /// in-flight preps are collected by later polls.
    pub fn cancel(&mut self, clip_id: Uuid) -> Option<PlaybackUnit> {
        match self.entries.remove(&clip_id) {
            Some(Prep::Ready(unit)) => Some(unit),
            Some(Prep::Preparing(rx)) => {
                self.doomed.push(rx);
                None
            }
            None => None,
        }
    }

    /// Cancel everything (loop turned off, stop, teardown).
    pub fn cancel_all(&mut self) -> Vec<PlaybackUnit> {
        let ids: Vec<Uuid> = self.entries.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.cancel(id)).collect()
    }

    pub fn scheduled_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamcut_core::realtime::EncoderLoad;
    use jamcut_media::{AudioWorker, BlobStore, VideoWorker};

    fn fresh_unit(store: &BlobStore) -> PlaybackUnit {
        PlaybackUnit::new(
            VideoWorker::spawn(store.clone(), EncoderLoad::new()),
            AudioWorker::spawn(store.clone()),
        )
    }

    #[test]
    fn schedule_window_policy() {
        // duration 4.0, ahead 2.0 — the window opens at t = 2.0.
        assert!(!in_schedule_window(true, true, 4.0, 1.99));
        assert!(in_schedule_window(true, true, 4.0, 2.0));
        assert!(in_schedule_window(true, true, 4.0, 2.01));
        assert!(in_schedule_window(true, true, 4.0, 3.9));
        // Requires playing, looping, and a real duration.
        assert!(!in_schedule_window(false, true, 4.0, 3.0));
        assert!(!in_schedule_window(true, false, 4.0, 3.0));
        assert!(!in_schedule_window(true, true, 0.0, 3.0));
    }

    #[test]
    fn successor_start_wraps_past_the_loop_point() {
        assert!((successor_start(2.01, 4.0) - 0.01).abs() < 1e-9);
        assert!((successor_start(3.5, 4.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn one_successor_per_clip_even_across_repeat_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let mut ahead = AheadScheduler::new();
        let clip_id = Uuid::new_v4();

        assert!(!ahead.has_scheduled(clip_id));
        ahead.schedule(clip_id, fresh_unit(&store), 0.01);
        // The guard flips immediately — before the prep thread finishes —
        // so the next tick over the horizon schedules nothing.
        assert!(ahead.has_scheduled(clip_id));
        assert_eq!(ahead.scheduled_count(), 1);
    }

    #[test]
    fn failed_prep_releases_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let mut ahead = AheadScheduler::new();
        let clip_id = Uuid::new_v4(); // no blob stored — load will fail

        ahead.schedule(clip_id, fresh_unit(&store), 0.0);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut released = Vec::new();
        while released.is_empty() && std::time::Instant::now() < deadline {
            released = ahead.poll();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(released.len(), 1);
        assert!(!ahead.has_scheduled(clip_id));
        assert!(ahead.activate(clip_id).is_none());
    }

    #[test]
    fn cancel_while_preparing_is_collected_by_poll() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let mut ahead = AheadScheduler::new();
        let clip_id = Uuid::new_v4();

        ahead.schedule(clip_id, fresh_unit(&store), 0.0);
        assert!(ahead.cancel(clip_id).is_none()); // still preparing
        assert!(!ahead.has_scheduled(clip_id));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut released = Vec::new();
        while released.is_empty() && std::time::Instant::now() < deadline {
            released = ahead.poll();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(released.len(), 1);
    }
}
