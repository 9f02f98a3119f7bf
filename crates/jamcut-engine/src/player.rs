// crates/jamcut-engine/src/player.rs
//
// The player coordinator: owns the clock, the worker pools, the buses, the
// clip entries, the compositor handle, and the ahead scheduler.
//
// The host drives tick() at its animation cadence, like an editor calling
// into the engine once per frame. Each tick: advance the clock, detect the
// loop wrap and swap in pre-scheduled successors, open the pre-buffer
// window near the loop point, dispatch a render, and accumulate the stats
// that have resolved since. Control operations (play/pause/seek/stop/load/clear) run
// on the caller's thread and await worker replies in parallel.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use uuid::Uuid;

use jamcut_core::effects::EffectSourceKind;
use jamcut_core::engine_types::{RecordingResult, RenderStats};
use jamcut_core::helpers::time::format_secs;
use jamcut_core::project::{Clip, EffectValue, Project};
use jamcut_core::realtime::{EncoderLoad, SampleRing};
use jamcut_core::timeline::{compile, compile_fingerprint, CompiledTimeline};

use jamcut_media::probe::probe_blob;
use jamcut_media::source::{AudioSource, FrameSource};
use jamcut_media::{AudioWorker, BlobStore, RecordSpec, Recorder, VideoWorker};

use crate::ahead::{in_schedule_window, successor_start, AheadScheduler};
use crate::bus::AudioOut;
use crate::clock::TransportClock;
use crate::compositor::Compositor;
use crate::playback::{PlaybackUnit, SeekTicket, UnitState};
use crate::pool::{WorkerPool, POOL_CAPACITY};

/// Compositor frame-port depth per clip.
const PORT_CAPACITY: usize = 8;
/// Bounded wait for clips still loading when play() is called.
const PLAY_WAIT_SECS: f64 = 5.0;

struct ClipEntry {
    track_id: Uuid,
    unit: Option<PlaybackUnit>,
    duration: f64,
    speed: f64,
}

pub struct Player {
    store: BlobStore,
    compositor: Compositor,
    audio_out: AudioOut,
    video_pool: WorkerPool<VideoWorker>,
    audio_pool: WorkerPool<AudioWorker>,
    clock: TransportClock,
    clips: HashMap<Uuid, ClipEntry>,
    ahead: AheadScheduler,
    load_flag: EncoderLoad,
    project: Project,
    preview_tracks: Vec<Uuid>,
    timeline: CompiledTimeline,
    last_fingerprint: Option<u64>,
    prev_time: f64,
    session_stats: RenderStats,
    pending_stats: Vec<Receiver<RenderStats>>,
    recorder: Option<(Uuid, Recorder)>,
}

impl Player {
    /// Engine with the default output device (detached when none exists).
    pub fn new(store: BlobStore) -> Self {
        Self::build(store, AudioOut::new())
    }

    /// Detached-audio engine for headless runs and tests.
    pub fn new_detached(store: BlobStore) -> Self {
        Self::build(store, AudioOut::detached())
    }

    fn build(store: BlobStore, audio_out: AudioOut) -> Self {
        let project = Project::default();
        let compositor = Compositor::spawn(project.canvas.width, project.canvas.height);
        let load_flag = EncoderLoad::new();

        let video_store = store.clone();
        let video_flag = load_flag.clone();
        let video_pool = WorkerPool::new(POOL_CAPACITY, move || {
            VideoWorker::spawn(video_store.clone(), video_flag.clone())
        });
        let audio_store = store.clone();
        let audio_pool =
            WorkerPool::new(POOL_CAPACITY, move || AudioWorker::spawn(audio_store.clone()));

        Self {
            store,
            compositor,
            audio_out,
            video_pool,
            audio_pool,
            clock: TransportClock::new(),
            clips: HashMap::new(),
            ahead: AheadScheduler::new(),
            load_flag,
            project,
            preview_tracks: Vec::new(),
            timeline: CompiledTimeline::default(),
            last_fingerprint: None,
            prev_time: 0.0,
            session_stats: RenderStats::default(),
            pending_stats: Vec::new(),
            recorder: None,
        }
    }

    // ── Project input ─────────────────────────────────────────────────────────

    /// Replace the project snapshot; recompiles when content changed.
    pub fn set_project(&mut self, project: Project) {
        let canvas_changed = project.canvas != self.project.canvas;
        self.project = project;
        if canvas_changed {
            self.compositor
                .set_canvas(self.project.canvas.width, self.project.canvas.height);
        }
        self.recompile_if_changed();
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn timeline(&self) -> &CompiledTimeline {
        &self.timeline
    }

    /// Memoized recompilation keyed by a content hash of the inputs.
    fn recompile_if_changed(&mut self) {
        let fp = compile_fingerprint(&self.project, &self.preview_tracks);
        if self.last_fingerprint == Some(fp) {
            return;
        }
        self.timeline = compile(&self.project, &self.preview_tracks);
        self.compositor.set_timeline(self.timeline.clone());
        self.clock.set_duration(self.timeline.duration);
        self.last_fingerprint = Some(fp);
        eprintln!(
            "[player] timeline compiled: {}, {} segments",
            format_secs(self.timeline.duration),
            self.timeline.segments.len()
        );
    }

    // ── Render loop ───────────────────────────────────────────────────────────

    /// One animation tick. The host calls this at its frame cadence.
    pub fn tick(&mut self) {
        for unit in self.ahead.poll() {
            self.release_unit(unit);
        }

        let time = self.clock.tick();
        let playing = self.clock.is_playing();

        if playing && time < self.prev_time {
            // Loop wrap: activate scheduled successors for playing clips.
            let ids: Vec<Uuid> = self
                .clips
                .iter()
                .filter(|(_, e)| e.unit.as_ref().is_some_and(|u| u.is_playing()))
                .map(|(id, _)| *id)
                .collect();
            for clip_id in ids {
                self.activate_scheduled(clip_id, time);
            }
        }

        if in_schedule_window(playing, self.clock.is_looping(), self.clock.duration(), time) {
            self.schedule_successors(time);
        }

        // Dispatch the render and collect whatever stats resolved by now;
        // the loop never blocks on the compositor.
        self.pending_stats.push(self.compositor.render(time));
        let mut resolved = RenderStats::default();
        self.pending_stats.retain(|rx| match rx.try_recv() {
            Ok(stats) => {
                resolved.accumulate(stats);
                false
            }
            Err(crossbeam_channel::TryRecvError::Empty) => true,
            Err(crossbeam_channel::TryRecvError::Disconnected) => false,
        });
        self.session_stats.accumulate(resolved);

        self.prev_time = time;
    }

    /// Convenience loop for hosts without their own frame driver.
    pub fn run_for(&mut self, duration: std::time::Duration) {
        let deadline = std::time::Instant::now() + duration;
        while std::time::Instant::now() < deadline {
            self.tick();
            std::thread::sleep(std::time::Duration::from_millis(16));
        }
    }

    /// Cumulative frame statistics for this session.
    pub fn frame_stats(&self) -> RenderStats {
        self.session_stats
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    pub fn position(&mut self) -> f64 {
        self.clock.tick()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn duration(&self) -> f64 {
        self.clock.duration()
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.clock.set_loop(looping);
        if !looping {
            // Successors are only meaningful while looping.
            for unit in self.ahead.cancel_all() {
                self.release_unit(unit);
            }
        }
    }

    /// Start playback at `time` (or the current position). Waits bounded
    /// for clips still loading, seeks every ready clip, plays them, then
    /// starts the clock.
    pub fn play(&mut self, time: Option<f64>) -> Result<()> {
        let started = std::time::Instant::now();
        while self
            .clips
            .values()
            .any(|e| e.unit.as_ref().is_some_and(|u| u.state() == UnitState::Loading))
        {
            if started.elapsed().as_secs_f64() > PLAY_WAIT_SECS {
                eprintln!("[player] play: gave up waiting for loading clips");
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let t = time.unwrap_or_else(|| self.clock.tick());

        // Seek all clips in parallel, then start them.
        let mut tickets: Vec<(Uuid, SeekTicket)> = Vec::new();
        for (&clip_id, entry) in self.clips.iter_mut() {
            let target = clip_source_time(&self.project, clip_id, t);
            if let Some(unit) = entry.unit.as_mut() {
                match unit.begin_seek(target) {
                    Ok(ticket) => tickets.push((clip_id, ticket)),
                    Err(e) => eprintln!("[player] {clip_id}: seek skipped ({e})"),
                }
            }
        }
        for (clip_id, ticket) in tickets {
            if let Some(unit) = self.clips.get_mut(&clip_id).and_then(|e| e.unit.as_mut()) {
                if let Err(e) = unit.finish_seek(ticket) {
                    eprintln!("[player] {clip_id}: seek failed ({e})");
                }
            }
        }

        for (&clip_id, entry) in self.clips.iter_mut() {
            let target = clip_source_time(&self.project, clip_id, t);
            if let Some(unit) = entry.unit.as_mut() {
                unit.play(target, entry.speed);
            }
        }

        self.clock.play(Some(t));
        self.prev_time = t;
        Ok(())
    }

    /// Idempotent pause.
    pub fn pause(&mut self) {
        if !self.clock.is_playing() {
            return;
        }
        for entry in self.clips.values_mut() {
            if let Some(unit) = entry.unit.as_mut() {
                unit.pause();
            }
        }
        self.clock.pause();
    }

    /// Cancel successors, pause everything, rewind to zero, reset the clock.
    pub fn stop(&mut self) {
        for unit in self.ahead.cancel_all() {
            self.release_unit(unit);
        }
        for entry in self.clips.values_mut() {
            if let Some(unit) = entry.unit.as_mut() {
                unit.pause();
            }
        }
        let ids: Vec<Uuid> = self.clips.keys().copied().collect();
        for clip_id in ids {
            let target = clip_source_time(&self.project, clip_id, 0.0);
            if let Some(unit) = self.clips.get_mut(&clip_id).and_then(|e| e.unit.as_mut()) {
                if let Err(e) = unit.seek(target) {
                    eprintln!("[player] {clip_id}: stop seek failed ({e})");
                }
                unit.mark_ready();
            }
        }
        self.clock.stop();
        self.prev_time = 0.0;
    }

    /// Seek the whole session: pause, parallel-seek every clip, move the
    /// clock, resume when playback was running.
    pub fn seek(&mut self, t: f64) -> Result<()> {
        let was_playing = self.clock.is_playing();
        self.clock.pause();

        let mut tickets: Vec<(Uuid, SeekTicket)> = Vec::new();
        for (&clip_id, entry) in self.clips.iter_mut() {
            let target = clip_source_time(&self.project, clip_id, t);
            if let Some(unit) = entry.unit.as_mut() {
                match unit.begin_seek(target) {
                    Ok(ticket) => tickets.push((clip_id, ticket)),
                    Err(e) => eprintln!("[player] {clip_id}: seek skipped ({e})"),
                }
            }
        }
        for (clip_id, ticket) in tickets {
            if let Some(unit) = self.clips.get_mut(&clip_id).and_then(|e| e.unit.as_mut()) {
                if let Err(e) = unit.finish_seek(ticket) {
                    eprintln!("[player] {clip_id}: seek failed ({e})");
                }
            }
        }

        self.clock.seek(t);
        self.prev_time = t;
        if was_playing {
            self.clock.play(None);
        }
        Ok(())
    }

    // ── Clip lifecycle ────────────────────────────────────────────────────────

    /// Bring `clip_id` up on `track_id`: acquire a worker pair, load the
    /// blob, wire the compositor port and the audio ring, and position the
    /// unit at the clock.
    pub fn load_clip(&mut self, track_id: Uuid, clip_id: Uuid) -> Result<f64> {
        if let Some(entry) = self.clips.get(&clip_id) {
            return Ok(entry.duration); // already resident
        }

        let video = self
            .video_pool
            .acquire()
            .ok_or_else(|| anyhow!("video worker pool exhausted"))?;
        let audio = match self.audio_pool.acquire() {
            Some(w) => w,
            None => {
                self.video_pool.release(video);
                return Err(anyhow!("audio worker pool exhausted"));
            }
        };

        let mut unit = PlaybackUnit::new(video, audio);
        let info = match unit.load(clip_id) {
            Ok(info) => info,
            Err(e) => {
                // Unsupported codec / missing blob: entry removed, workers
                // go straight back to the pools.
                self.release_unit(unit);
                return Err(e).with_context(|| format!("load clip {clip_id}"));
            }
        };

        let (port_tx, port_rx) = bounded(PORT_CAPACITY);
        unit.connect_sink(port_tx);
        self.compositor.connect_port(clip_id, port_rx);

        if info.has_audio {
            let rate = self.audio_out.sample_rate();
            let (writer, reader) = SampleRing::new(2, (rate / 2).max(2)).split();
            unit.set_audio_output(writer, rate);
            let pipeline = self
                .project
                .track(track_id)
                .and_then(|t| t.audio_pipeline.clone());
            self.audio_out
                .add_strip(clip_id, track_id, reader, pipeline.as_ref());
        }

        let speed = find_clip(&self.project, clip_id).map(|c| c.speed).unwrap_or(1.0);
        self.apply_duration_hint(clip_id, info.duration);

        let position = self.clock.tick();
        let target = clip_source_time(&self.project, clip_id, position);
        if let Err(e) = unit.seek(target) {
            eprintln!("[player] {clip_id}: initial seek failed ({e})");
        }

        self.clips.insert(
            clip_id,
            ClipEntry {
                track_id,
                unit: Some(unit),
                duration: info.duration,
                speed,
            },
        );
        eprintln!("[player] clip {clip_id} ready on track {track_id}");
        Ok(info.duration)
    }

    /// Record the probed duration on the project clip so the compiler can
    /// resolve clips whose duration was unspecified.
    fn apply_duration_hint(&mut self, clip_id: Uuid, duration_secs: f64) {
        let hint = self.project.from_secs(duration_secs);
        let mut changed = false;
        for track in self.project.media_tracks.iter_mut() {
            for clip in track.clips.iter_mut() {
                if clip.id == clip_id && clip.duration_hint != Some(hint) {
                    clip.duration_hint = Some(hint);
                    changed = true;
                }
            }
        }
        if changed {
            self.last_fingerprint = None; // hints are serde-skipped; force
            self.recompile_if_changed();
        }
    }

    /// Tear a clip entry down; its workers return to the pools.
    pub fn clear_clip(&mut self, clip_id: Uuid) {
        if let Some(unit) = self.ahead.cancel(clip_id) {
            self.release_unit(unit);
        }
        if let Some(entry) = self.clips.remove(&clip_id) {
            self.compositor.disconnect_port(clip_id);
            self.audio_out.remove_strip(clip_id);
            if let Some(unit) = entry.unit {
                self.release_unit(unit);
            }
        }
    }

    fn release_unit(&mut self, unit: PlaybackUnit) {
        let (video, audio) = unit.destroy();
        self.video_pool.release(video);
        self.audio_pool.release(audio);
    }

    // ── Gapless loop ──────────────────────────────────────────────────────────

    fn schedule_successors(&mut self, time: f64) {
        let wrap_target = successor_start(time, self.clock.duration());
        let ids: Vec<Uuid> = self
            .clips
            .iter()
            .filter(|(id, e)| {
                e.unit.as_ref().is_some_and(|u| u.is_playing())
                    && !self.ahead.has_scheduled(**id)
            })
            .map(|(id, _)| *id)
            .collect();

        for clip_id in ids {
            let Some(video) = self.video_pool.acquire() else {
                eprintln!("[player] no pooled video worker for successor of {clip_id}");
                continue;
            };
            let Some(audio) = self.audio_pool.acquire() else {
                self.video_pool.release(video);
                eprintln!("[player] no pooled audio worker for successor of {clip_id}");
                continue;
            };
            let target = clip_source_time(&self.project, clip_id, wrap_target);
            self.ahead
                .schedule(clip_id, PlaybackUnit::new(video, audio), target);
        }
    }

    /// Loop wrap: swap in the ready successor, or fall back to an in-place
    /// seek when preparation did not finish in time.
    fn activate_scheduled(&mut self, clip_id: Uuid, new_time: f64) {
        let Some(entry) = self.clips.get(&clip_id) else { return };
        let (track_id, speed) = (entry.track_id, entry.speed);
        let target = clip_source_time(&self.project, clip_id, new_time);

        match self.ahead.activate(clip_id) {
            Some(mut successor) => {
                // New port first: connecting it closes the old worker's
                // port, so no stale tail frame lands after this point.
                let (port_tx, port_rx) = bounded(PORT_CAPACITY);
                successor.connect_sink(port_tx);
                self.compositor.connect_port(clip_id, port_rx);

                if successor.loaded().is_some_and(|l| l.has_audio) {
                    let rate = self.audio_out.sample_rate();
                    let (writer, reader) = SampleRing::new(2, (rate / 2).max(2)).split();
                    successor.set_audio_output(writer, rate);
                    let pipeline = self
                        .project
                        .track(track_id)
                        .and_then(|t| t.audio_pipeline.clone());
                    self.audio_out
                        .add_strip(clip_id, track_id, reader, pipeline.as_ref());
                }

                successor.play(target, speed);

                if let Some(entry) = self.clips.get_mut(&clip_id) {
                    if let Some(old) = entry.unit.replace(successor) {
                        self.release_unit(old);
                    }
                }
                eprintln!(
                    "[player] loop handoff for {clip_id} at {}",
                    format_secs(target)
                );
            }
            None => {
                if let Some(unit) = self.clips.get_mut(&clip_id).and_then(|e| e.unit.as_mut()) {
                    eprintln!("[player] successor not ready for {clip_id} — seeking in place");
                    if let Err(e) = unit.seek(target) {
                        eprintln!("[player] {clip_id}: wrap seek failed ({e})");
                    }
                    if !unit.is_playing() {
                        unit.play(target, speed);
                    }
                }
            }
        }
    }

    // ── Audio controls ────────────────────────────────────────────────────────

    pub fn set_volume(&mut self, track_id: Uuid, volume: f32) {
        self.audio_out.set_volume(track_id, volume);
    }

    pub fn set_pan(&mut self, track_id: Uuid, pan: f32) {
        self.audio_out.set_pan(track_id, pan);
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.audio_out.set_master_volume(volume);
    }

    pub fn set_master_pan(&self, pan: f32) {
        self.audio_out.set_master_pan(pan);
    }

    pub fn set_master_tap(&self, tx: Option<crossbeam_channel::Sender<Vec<f32>>>) {
        self.audio_out.set_master_tap(tx);
    }

    // ── Effects ───────────────────────────────────────────────────────────────

    pub fn set_effect_value(
        &self,
        source:       EffectSourceKind,
        source_id:    Uuid,
        effect_index: usize,
        param_key:    &str,
        value:        EffectValue,
    ) {
        self.compositor
            .set_effect_value(source, source_id, effect_index, param_key, value);
    }

    // ── Preview & recording ───────────────────────────────────────────────────

    /// Inject (or remove) a live preview on `track_id`. The stream routes
    /// into the compositor and the timeline recompiles with a synthetic
    /// preview clip on that track.
    pub fn set_preview_source(
        &mut self,
        track_id: Uuid,
        stream: Option<Box<dyn FrameSource>>,
    ) {
        let active = stream.is_some();
        self.compositor.set_preview_stream(track_id, stream);
        let had = self.preview_tracks.contains(&track_id);
        if active && !had {
            self.preview_tracks.push(track_id);
        } else if !active && had {
            self.preview_tracks.retain(|&t| t != track_id);
        }
        self.recompile_if_changed();
    }

    /// Start recording a live source into a fresh blob. Playback of other
    /// clips continues; the scheduler word throttles their delta frames
    /// while the encoder is saturated.
    pub fn start_recording(
        &mut self,
        track_id: Uuid,
        video: Box<dyn FrameSource>,
        audio: Option<Box<dyn AudioSource>>,
        spec: RecordSpec,
    ) -> Result<Uuid> {
        if self.recorder.is_some() {
            return Err(anyhow!("a recording is already running"));
        }
        let clip_id = Uuid::new_v4();
        let recorder = Recorder::start(
            self.store.clone(),
            clip_id,
            video,
            audio,
            spec,
            self.load_flag.clone(),
        );
        self.recorder = Some((track_id, recorder));
        eprintln!("[player] recording started → {clip_id}");
        Ok(clip_id)
    }

    /// Finish the running take: the muxer drains and lands the blob, and a
    /// project clip pointing at it appears on the recorded track.
    pub fn stop_recording(&mut self) -> Result<RecordingResult> {
        let (track_id, recorder) = self
            .recorder
            .take()
            .ok_or_else(|| anyhow!("no recording running"))?;
        let result = recorder.stop()?;

        let duration_secs = probe_blob(&self.store, result.clip_id)
            .map(|p| p.duration)
            .unwrap_or(0.0);
        let start = 0.0;
        let clip = Clip::media(
            result.clip_id,
            start,
            self.project.from_secs(duration_secs),
        );
        match self.project.media_tracks.iter_mut().find(|t| t.id == track_id) {
            Some(track) => track.clips.push(clip),
            None => eprintln!("[player] recorded track {track_id} not in project"),
        }
        self.recompile_if_changed();
        Ok(result)
    }

    /// Export one composed frame at `time` as a captured image.
    pub fn capture_frame(&self, time: f64) -> Result<crate::compositor::CapturedImage> {
        self.compositor.render_and_capture(time)
    }

    #[cfg(test)]
    fn pool_in_use(&self) -> (usize, usize) {
        (self.video_pool.in_use(), self.audio_pool.in_use())
    }
}

/// Map a timeline instant to a clip's source-local media time.
fn clip_source_time(project: &Project, clip_id: Uuid, t: f64) -> f64 {
    let Some(clip) = find_clip(project, clip_id) else { return t.max(0.0) };
    let start = project.to_secs(clip.start);
    (clip.offset + (t - start) * clip.speed).max(clip.offset)
}

fn find_clip(project: &Project, clip_id: Uuid) -> Option<&Clip> {
    project
        .media_tracks
        .iter()
        .flat_map(|t| t.clips.iter())
        .find(|c| c.id == clip_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamcut_core::project::{CanvasSize, Track};

    fn s1_project() -> (Project, Uuid, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut track = Track::new("T");
        let track_id = track.id;
        track.clips.push(Clip::media(a, 0.0, 1000.0));
        track.clips.push(Clip::media(b, 500.0, 1000.0));
        let project = Project {
            canvas: CanvasSize { width: 16, height: 16 },
            media_tracks: vec![track],
            ..Project::default()
        };
        (project, track_id, a, b)
    }

    fn player() -> (Player, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        (Player::new_detached(store), dir)
    }

    #[test]
    fn set_project_compiles_and_sets_clock_duration() {
        let (mut player, _dir) = player();
        let (project, ..) = s1_project();
        player.set_project(project);
        assert!((player.duration() - 1.5).abs() < 1e-9);
        assert_eq!(player.timeline().segments.len(), 2);
    }

    #[test]
    fn recompile_is_memoized_by_content() {
        let (mut player, _dir) = player();
        let (project, ..) = s1_project();
        player.set_project(project.clone());
        let fp = player.last_fingerprint;
        player.set_project(project);
        assert_eq!(player.last_fingerprint, fp);
    }

    #[test]
    fn load_clip_failure_returns_workers_to_pools() {
        let (mut player, _dir) = player();
        let (project, track_id, a, _) = s1_project();
        player.set_project(project);

        // No blob stored for `a` — the load must fail and release the pair.
        assert!(player.load_clip(track_id, a).is_err());
        assert_eq!(player.pool_in_use(), (0, 0));
        assert!(player.clips.is_empty());
    }

    #[test]
    fn ticks_accumulate_dropped_stats_for_frameless_placements() {
        let (mut player, _dir) = player();
        let (project, ..) = s1_project();
        player.set_project(project);

        for _ in 0..5 {
            player.tick();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        // Stats resolve one tick late; run one more to drain.
        player.tick();
        std::thread::sleep(std::time::Duration::from_millis(10));
        player.tick();

        let stats = player.frame_stats();
        assert!(stats.expected > 0);
        assert_eq!(stats.rendered, 0);
        assert_eq!(stats.dropped, stats.expected);
    }

    #[test]
    fn preview_source_recompiles_with_preview_placement() {
        let (mut player, _dir) = player();
        let (project, track_id, ..) = s1_project();
        player.set_project(project);
        let before = player.timeline().clone();

        let source = jamcut_media::TestPatternSource::new(4, 4, 30)
            .unpaced()
            .with_frame_limit(2);
        player.set_preview_source(track_id, Some(Box::new(source)));
        assert_ne!(player.timeline(), &before);
        // Preview spans far beyond the media content.
        assert!(!player.timeline().placements_at(30.0).is_empty());

        player.set_preview_source(track_id, None);
        assert_eq!(player.timeline(), &before);
    }

    #[test]
    fn transport_round_trip_without_clips() {
        let (mut player, _dir) = player();
        let (project, ..) = s1_project();
        player.set_project(project);

        player.play(Some(0.2)).unwrap();
        assert!(player.is_playing());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(player.position() > 0.2);

        player.pause();
        let frozen = player.position();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(player.position(), frozen);
        player.pause(); // idempotent

        player.stop();
        assert_eq!(player.position(), 0.0);
        assert!(!player.is_playing());
    }

    #[test]
    fn loop_toggle_cancels_scheduled_successors() {
        let (mut player, _dir) = player();
        let (project, ..) = s1_project();
        player.set_project(project);
        player.set_loop(true);
        // No playing clips — nothing scheduled, toggle is still safe.
        player.set_loop(false);
        assert_eq!(player.ahead.scheduled_count(), 0);
    }

    #[test]
    fn stop_recording_without_start_is_an_error() {
        let (mut player, _dir) = player();
        assert!(player.stop_recording().is_err());
    }
}
