// crates/jamcut-media/src/audio_worker.rs
//
// Audio playback worker: one thread owning one clip's audio decoder and
// the write side of that clip's sample ring.
//
// The scheduling loop runs only while playing: decoded units wait in a
// pending queue ordered by media time, and each tick flushes the queue
// head-first into the ring — drop what is already behind, stop at the
// buffer-ahead horizon, trim on a partial write when the ring is full.
// Samples reach the ring in monotonic media-time order.

use std::collections::VecDeque;
use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use uuid::Uuid;

use jamcut_core::engine_types::AudioChunk;
use jamcut_core::realtime::RingWriter;

use crate::audio_decode::{resample_linear, resampled_len, AudioDecoder};
use crate::storage::BlobStore;

/// Scheduling tick interval.
const TICK_MS: u64 = 10;
/// Buffer-ahead horizon: the flush stops once the queue head starts past
/// `current + this`.
const AHEAD_SECS: f64 = 0.5;
/// Pending-queue bound; decode-ahead pauses above this.
const MAX_PENDING_CHUNKS: usize = 64;

pub enum AudioCommand {
    Load { clip_id: Uuid, reply: Sender<Result<f64>> },
    /// Output negotiation: ring write-half plus the device rate. Must
    /// arrive before any Play.
    SetOutput { writer: RingWriter, target_rate: u32 },
    /// Drop the ring handle (playback-unit destroy, step two).
    DetachOutput,
    Play { start: f64, speed: f64 },
    Pause,
    Seek { time: f64, reply: Sender<Result<()>> },
    /// Stop the scheduling loop without touching the ring
    /// (playback-unit destroy, step one).
    HaltScheduler,
    /// Export-only: decode the audio unit covering `time`.
    ChunkAt { time: f64, reply: Sender<Result<AudioChunk>> },
    Shutdown,
}

pub struct AudioWorker {
    tx: Sender<AudioCommand>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl AudioWorker {
    pub fn spawn(store: BlobStore) -> Self {
        let (tx, rx) = unbounded();
        let join = std::thread::spawn(move || run(rx, store));
        Self { tx, join: Some(join) }
    }

    pub fn load(&self, clip_id: Uuid) -> Receiver<Result<f64>> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(AudioCommand::Load { clip_id, reply });
        rx
    }

    pub fn set_output(&self, writer: RingWriter, target_rate: u32) {
        let _ = self.tx.send(AudioCommand::SetOutput { writer, target_rate });
    }

    pub fn detach_output(&self) {
        let _ = self.tx.send(AudioCommand::DetachOutput);
    }

    pub fn play(&self, start: f64, speed: f64) {
        let _ = self.tx.send(AudioCommand::Play { start, speed });
    }

    pub fn pause(&self) {
        let _ = self.tx.send(AudioCommand::Pause);
    }

    pub fn seek(&self, time: f64) -> Receiver<Result<()>> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(AudioCommand::Seek { time, reply });
        rx
    }

    pub fn halt_scheduler(&self) {
        let _ = self.tx.send(AudioCommand::HaltScheduler);
    }

    pub fn chunk_at(&self, time: f64) -> Receiver<Result<AudioChunk>> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(AudioCommand::ChunkAt { time, reply });
        rx
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(AudioCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

// ── Worker thread ─────────────────────────────────────────────────────────────

/// One decoded unit, already converted to the output rate. Media times stay
/// in the source domain so horizon/drop checks compare against the clock.
struct PendingChunk {
    media_start: f64,
    media_end:   f64,
    planes: Vec<Vec<f32>>,
}

struct WorkerState {
    store:   BlobStore,
    decoder: Option<AudioDecoder>,
    writer:  Option<RingWriter>,
    target_rate: u32,
    pending: VecDeque<PendingChunk>,
    playing: bool,
    halted:  bool,
    eof:     bool,
    speed:       f64,
    start_media: f64,
    start_wall:  Instant,
    duration: f64,
}

fn run(rx: Receiver<AudioCommand>, store: BlobStore) {
    let mut state = WorkerState {
        store,
        decoder: None,
        writer: None,
        target_rate: 44_100,
        pending: VecDeque::new(),
        playing: false,
        halted: false,
        eof: false,
        speed: 1.0,
        start_media: 0.0,
        start_wall: Instant::now(),
        duration: 0.0,
    };

    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(TICK_MS)) {
            Ok(AudioCommand::Load { clip_id, reply }) => {
                let result = state.load(clip_id);
                let _ = reply.send(result);
            }
            Ok(AudioCommand::SetOutput { writer, target_rate }) => {
                state.writer = Some(writer);
                state.target_rate = target_rate.max(1);
            }
            Ok(AudioCommand::DetachOutput) => {
                if let Some(w) = &state.writer {
                    w.set_playing(false);
                }
                state.writer = None;
            }
            Ok(AudioCommand::Play { start, speed }) => {
                if state.decoder.is_some() {
                    state.start_media = start;
                    state.speed = if speed > 0.0 { speed } else { 1.0 };
                    state.start_wall = Instant::now();
                    state.playing = true;
                    state.halted = false;
                    if let Some(w) = &state.writer {
                        w.set_playing(true);
                    }
                }
            }
            Ok(AudioCommand::Pause) => {
                if state.playing {
                    state.start_media = state.media_time();
                    state.playing = false;
                }
                if let Some(w) = &state.writer {
                    w.set_playing(false);
                }
            }
            Ok(AudioCommand::Seek { time, reply }) => {
                let result = state.seek(time);
                let _ = reply.send(result);
            }
            Ok(AudioCommand::HaltScheduler) => {
                state.halted = true;
                state.playing = false;
            }
            Ok(AudioCommand::ChunkAt { time, reply }) => {
                let result = state.chunk_at(time);
                let _ = reply.send(result);
            }
            Ok(AudioCommand::Shutdown) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }

        if state.playing && !state.halted {
            state.schedule_tick();
        }
    }
}

impl WorkerState {
    fn media_time(&self) -> f64 {
        if self.playing {
            self.start_media + self.start_wall.elapsed().as_secs_f64() * self.speed
        } else {
            self.start_media
        }
    }

    fn load(&mut self, clip_id: Uuid) -> Result<f64> {
        self.playing = false;
        self.halted = false;
        self.eof = false;
        self.pending.clear();
        self.start_media = 0.0;

        let decoder = AudioDecoder::open(&self.store, clip_id)?;
        self.duration = decoder.duration;
        eprintln!("[audio] loaded clip {clip_id} ({:.2}s)", self.duration);
        self.decoder = Some(decoder);
        Ok(self.duration)
    }

    fn decode_ahead(&mut self, current: f64) {
        let target_rate = self.target_rate;
        let speed = self.speed;
        let Some(decoder) = self.decoder.as_mut() else { return };
        while !self.eof && self.pending.len() < MAX_PENDING_CHUNKS {
            let furthest = self
                .pending
                .back()
                .map(|c| c.media_end)
                .unwrap_or(current);
            if furthest > current + AHEAD_SECS {
                break;
            }
            match decoder.decode_next() {
                Some(chunk) => {
                    // Units fully behind the clock are dropped unconverted.
                    if chunk.end_time() <= current {
                        continue;
                    }
                    if let Some(converted) = convert_chunk(chunk, target_rate, speed) {
                        self.pending.push_back(converted);
                    }
                }
                None => {
                    self.eof = true;
                }
            }
        }
    }

    /// One scheduling tick: top up the queue, then flush into the ring.
    fn schedule_tick(&mut self) {
        let current = self.media_time();
        self.decode_ahead(current);

        let Some(writer) = self.writer.as_mut() else { return };
        while let Some(head) = self.pending.front_mut() {
            if head.media_end <= current {
                self.pending.pop_front();
                continue;
            }
            if head.media_start > current + AHEAD_SECS {
                break;
            }
            let frames = head.planes[0].len();
            if frames == 0 {
                self.pending.pop_front();
                continue;
            }
            let refs: Vec<&[f32]> = head.planes.iter().map(|p| p.as_slice()).collect();
            let written = writer.write(&refs, frames);
            if written < frames {
                // Ring full: keep the unconsumed tail at the queue head and
                // let the reader drain before flushing more.
                if written > 0 {
                    let span = head.media_end - head.media_start;
                    head.media_start += span * written as f64 / frames as f64;
                    for plane in head.planes.iter_mut() {
                        plane.drain(..written);
                    }
                }
                break;
            }
            self.pending.pop_front();
        }
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        let target_rate = self.target_rate;
        let speed = self.speed;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(anyhow!("seek before load"));
        };
        self.pending.clear();
        self.eof = false;
        self.start_media = time;
        if let Some(w) = &mut self.writer {
            w.set_playing(false);
            w.clear();
        }
        decoder.seek(time)?;

        // Prime the queue head so the first flushed sample lands at or
        // after the seek target.
        while let Some(chunk) = decoder.decode_next() {
            if chunk.end_time() <= time {
                continue;
            }
            if let Some(mut converted) = convert_chunk(chunk, target_rate, speed) {
                if converted.media_start < time {
                    let span = converted.media_end - converted.media_start;
                    let frames = converted.planes[0].len();
                    if span > 0.0 && frames > 0 {
                        let drop = ((time - converted.media_start) / span
                            * frames as f64) as usize;
                        let drop = drop.min(frames);
                        for plane in converted.planes.iter_mut() {
                            plane.drain(..drop);
                        }
                        converted.media_start = time;
                    }
                }
                if !converted.planes[0].is_empty() {
                    self.pending.push_back(converted);
                }
                break;
            }
        }
        Ok(())
    }

    fn chunk_at(&mut self, time: f64) -> Result<AudioChunk> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(anyhow!("chunk_at before load"));
        };
        decoder.seek(time)?;
        while let Some(chunk) = decoder.decode_next() {
            if chunk.end_time() > time {
                return Ok(chunk);
            }
        }
        Err(anyhow!("no audio decodable at {time:.3}s"))
    }
}

/// Convert a source-rate chunk to the output rate, folding in playback
/// speed. Media times stay in the source domain.
fn convert_chunk(chunk: AudioChunk, target_rate: u32, speed: f64) -> Option<PendingChunk> {
    let frames = chunk.frames();
    if frames == 0 {
        return None;
    }
    let media_start = chunk.media_time;
    let media_end = chunk.end_time();
    let out_len = resampled_len(frames, chunk.rate, target_rate, speed);
    if out_len == 0 {
        return None;
    }
    let planes = chunk
        .planes
        .iter()
        .map(|p| resample_linear(p, out_len))
        .collect();
    Some(PendingChunk { media_start, media_end, planes })
}

