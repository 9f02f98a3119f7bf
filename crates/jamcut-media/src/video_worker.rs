// crates/jamcut-media/src/video_worker.rs
//
// Video playback worker: one thread owning one clip's demuxer + decoder,
// streaming decoded frames to the compositor's per-clip port.
//
// The thread self-ticks via recv_timeout: commands are handled as they
// arrive, and while playing, every tick runs the stream loop — pick the
// frame for the current media time, push it through the sink, trim the
// buffer, then decode ahead. Workers are pooled: Shutdown only happens at
// engine teardown; between uses the next Load resets all state.

use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use uuid::Uuid;

use jamcut_core::engine_types::EngineFrame;
use jamcut_core::realtime::EncoderLoad;

use crate::storage::BlobStore;
use crate::video_decode::{DecodeOutcome, VideoDecoder, QUEUE_SKIP_DEPTH};

/// Worker tick interval while idle-waiting for commands.
const TICK_MS: u64 = 15;
/// How far past the current media time the buffer targets.
const BUFFER_AHEAD_SECS: f64 = 1.0;
/// Decode attempts per buffer-ahead invocation.
const MAX_DECODES_PER_TICK: usize = 10;
/// Decoded frames retained at most.
const MAX_BUFFERED_FRAMES: usize = 30;
/// Frames older than `media_time - this` are trimmed.
const TRIM_BEHIND_SECS: f64 = 0.5;
/// Bound on the decode attempts a seek may spend reaching its target.
const SEEK_DECODE_BUDGET: usize = 1024;

pub enum VideoCommand {
    Load { clip_id: Uuid, reply: Sender<Result<f64>> },
    ConnectSink { sink: Sender<EngineFrame> },
    DisconnectSink,
    Play { start: f64, speed: f64 },
    Pause,
    Seek { time: f64, reply: Sender<Result<()>> },
    /// Export-only: synchronously decode up to `time` and return the frame.
    FrameAt { time: f64, reply: Sender<Result<EngineFrame>> },
    Shutdown,
}

/// Control handle. All methods enqueue; replies come back on per-call
/// channels so the engine can await several workers in parallel.
pub struct VideoWorker {
    tx: Sender<VideoCommand>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl VideoWorker {
    pub fn spawn(store: BlobStore, load_flag: EncoderLoad) -> Self {
        let (tx, rx) = unbounded();
        let join = std::thread::spawn(move || run(rx, store, load_flag));
        Self { tx, join: Some(join) }
    }

    pub fn load(&self, clip_id: Uuid) -> Receiver<Result<f64>> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(VideoCommand::Load { clip_id, reply });
        rx
    }

    pub fn connect_sink(&self, sink: Sender<EngineFrame>) {
        let _ = self.tx.send(VideoCommand::ConnectSink { sink });
    }

    pub fn disconnect_sink(&self) {
        let _ = self.tx.send(VideoCommand::DisconnectSink);
    }

    pub fn play(&self, start: f64, speed: f64) {
        let _ = self.tx.send(VideoCommand::Play { start, speed });
    }

    pub fn pause(&self) {
        let _ = self.tx.send(VideoCommand::Pause);
    }

    pub fn seek(&self, time: f64) -> Receiver<Result<()>> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(VideoCommand::Seek { time, reply });
        rx
    }

    pub fn frame_at(&self, time: f64) -> Receiver<Result<EngineFrame>> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(VideoCommand::FrameAt { time, reply });
        rx
    }
}

impl Drop for VideoWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(VideoCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

// ── Worker thread ─────────────────────────────────────────────────────────────

struct WorkerState {
    store:     BlobStore,
    load_flag: EncoderLoad,
    decoder:   Option<VideoDecoder>,
    /// Decoded frames sorted by timestamp.
    buffered:  Vec<EngineFrame>,
    sink:      Option<Sender<EngineFrame>>,
    playing:     bool,
    speed:       f64,
    start_media: f64,
    start_wall:  Instant,
    last_sent:   Option<f64>,
    duration:    f64,
}

fn run(rx: Receiver<VideoCommand>, store: BlobStore, load_flag: EncoderLoad) {
    let mut state = WorkerState {
        store,
        load_flag,
        decoder: None,
        buffered: Vec::new(),
        sink: None,
        playing: false,
        speed: 1.0,
        start_media: 0.0,
        start_wall: Instant::now(),
        last_sent: None,
        duration: 0.0,
    };

    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(TICK_MS)) {
            Ok(VideoCommand::Load { clip_id, reply }) => {
                let result = state.load(clip_id);
                let _ = reply.send(result);
            }
            Ok(VideoCommand::ConnectSink { sink }) => {
                // Replacing the sender drops the old one — the previous
                // port closes, which is the loop-handoff contract.
                state.sink = Some(sink);
            }
            Ok(VideoCommand::DisconnectSink) => {
                state.sink = None;
            }
            Ok(VideoCommand::Play { start, speed }) => {
                if state.decoder.is_some() {
                    state.start_media = start;
                    state.speed = if speed > 0.0 { speed } else { 1.0 };
                    state.start_wall = Instant::now();
                    state.playing = true;
                }
            }
            Ok(VideoCommand::Pause) => {
                if state.playing {
                    state.start_media = state.media_time();
                    state.playing = false;
                }
            }
            Ok(VideoCommand::Seek { time, reply }) => {
                let result = state.seek(time);
                let _ = reply.send(result);
            }
            Ok(VideoCommand::FrameAt { time, reply }) => {
                let result = state.frame_at(time);
                let _ = reply.send(result);
            }
            Ok(VideoCommand::Shutdown) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }

        if state.playing {
            state.stream_tick();
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
        self.buffered.clear();
        self.last_sent = None;
        self.start_media = 0.0;

        let decoder = match self.decoder.take() {
            Some(prev) => prev.reload(&self.store, clip_id),
            None => VideoDecoder::open(&self.store, clip_id),
        }?;
        self.duration = decoder.duration;
        eprintln!("[video] loaded clip {clip_id} ({:.2}s)", self.duration);
        self.decoder = Some(decoder);
        Ok(self.duration)
    }

    /// One animation tick while playing.
    fn stream_tick(&mut self) {
        let media = self.media_time();

        if self.duration > 0.0 && media >= self.duration {
            self.start_media = self.duration;
            self.playing = false;
            return;
        }

        // Latest buffered frame at or before the current media time; only
        // forward progress is ever sent (frames cross the port in monotonic
        // media-time order).
        let candidate = self
            .buffered
            .iter()
            .rposition(|f| f.timestamp <= media)
            .filter(|&i| {
                self.last_sent
                    .map_or(true, |sent| self.buffered[i].timestamp > sent)
            });
        if let Some(i) = candidate {
            let frame = self.buffered.remove(i);
            self.last_sent = Some(frame.timestamp);
            if let Some(sink) = &self.sink {
                // Dropping on a full port keeps the stream loop realtime;
                // the compositor only ever wants the freshest frame anyway.
                let _ = sink.try_send(frame);
            }
        }

        self.buffered.retain(|f| f.timestamp >= media - TRIM_BEHIND_SECS);
        self.buffer_ahead(media);
    }

    /// Decode toward `media + BUFFER_AHEAD_SECS`. At most
    /// MAX_DECODES_PER_TICK samples per invocation; the buffer is capped at
    /// MAX_BUFFERED_FRAMES. Single-threaded worker — never re-entered.
    fn buffer_ahead(&mut self, media: f64) {
        let Some(decoder) = self.decoder.as_mut() else { return };
        let target = if self.duration > 0.0 {
            (media + BUFFER_AHEAD_SECS).min(self.duration)
        } else {
            media + BUFFER_AHEAD_SECS
        };

        for _ in 0..MAX_DECODES_PER_TICK {
            if self.buffered.len() >= MAX_BUFFERED_FRAMES {
                break;
            }
            let furthest = self
                .buffered
                .last()
                .map(|f| f.timestamp)
                .or(self.last_sent)
                .unwrap_or(media);
            if furthest >= target {
                break;
            }

            let skip_delta = self.load_flag.should_skip_delta_frames()
                || decoder.queue_depth() > QUEUE_SKIP_DEPTH
                || !decoder.is_ready();

            match decoder.decode_next(skip_delta) {
                DecodeOutcome::Frame(frame) => {
                    if frame.timestamp >= media - TRIM_BEHIND_SECS {
                        insert_by_timestamp(&mut self.buffered, frame);
                    }
                }
                DecodeOutcome::NeedsKeyframe { failing_pts } => {
                    if let Err(e) = decoder.seek(failing_pts) {
                        eprintln!("[video] recovery seek failed: {e}");
                    }
                }
                DecodeOutcome::SkippedDelta | DecodeOutcome::TimedOut => {}
                DecodeOutcome::Eof => break,
            }
        }
    }

    /// Clear buffered state, reposition the decoder on the keyframe at or
    /// before `time`, decode up to `time`, and emit the anchor frame.
    fn seek(&mut self, time: f64) -> Result<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(anyhow!("seek before load"));
        };
        self.buffered.clear();
        self.last_sent = None;
        self.start_media = time;
        decoder.seek(time)?;

        let mut anchor: Option<EngineFrame> = None;
        for _ in 0..SEEK_DECODE_BUDGET {
            match decoder.decode_next(false) {
                DecodeOutcome::Frame(frame) => {
                    if frame.timestamp <= time {
                        anchor = Some(frame);
                    } else {
                        self.buffered.push(frame);
                        break;
                    }
                }
                DecodeOutcome::NeedsKeyframe { failing_pts } => {
                    decoder.seek(failing_pts)?;
                }
                DecodeOutcome::SkippedDelta | DecodeOutcome::TimedOut => {}
                DecodeOutcome::Eof => break,
            }
        }

        if let Some(frame) = anchor {
            self.last_sent = Some(frame.timestamp);
            if let Some(sink) = &self.sink {
                let _ = sink.try_send(frame);
            }
        }
        Ok(())
    }

    fn frame_at(&mut self, time: f64) -> Result<EngineFrame> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(anyhow!("frame_at before load"));
        };
        decoder.seek(time)?;
        decoder.decode_until(time)
    }
}

fn insert_by_timestamp(buffered: &mut Vec<EngineFrame>, frame: EngineFrame) {
    let idx = buffered.partition_point(|f| f.timestamp <= frame.timestamp);
    buffered.insert(idx, frame);
}
