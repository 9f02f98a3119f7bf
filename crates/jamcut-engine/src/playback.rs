// crates/jamcut-engine/src/playback.rs
//
// Playback unit: one video worker + one audio worker for one clip, behind
// a single state machine. Operations delegate to both workers in parallel
// — commands are enqueued first, then both replies are awaited — and every
// transition awaits the prior one, which is what gives per-clip ordering
// (load ≺ seek ≺ play ≺ pause …).
//
// Destroy order is contractual: halt the audio scheduler, drop the audio
// output, then release frame resources. The workers themselves survive —
// the caller returns them to their pools and the next load() resets them.

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::Duration;
use uuid::Uuid;

use jamcut_core::engine_types::EngineFrame;
use jamcut_core::realtime::RingWriter;
use jamcut_media::{AudioWorker, VideoWorker};

/// Bound on any one cross-worker await (load, seek).
const OP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Seeking,
}

impl UnitState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle    => "idle",
            Self::Loading => "loading",
            Self::Ready   => "ready",
            Self::Playing => "playing",
            Self::Paused  => "paused",
            Self::Seeking => "seeking",
        }
    }
}

/// Facts that only exist once a clip is loaded. Idle/loading units carry
/// no loaded-clip references at all.
#[derive(Clone, Copy, Debug)]
pub struct LoadedClip {
    pub clip_id:   Uuid,
    pub duration:  f64,
    pub has_video: bool,
    pub has_audio: bool,
}

/// What state a finished seek lands in.
#[derive(Clone, Copy)]
enum ResumeTo {
    Ready,
    Paused,
    Playing,
}

/// In-flight parallel seek across both workers.
pub struct SeekTicket {
    target: f64,
    speed:  f64,
    resume: ResumeTo,
    video_rx: Option<Receiver<Result<()>>>,
    audio_rx: Option<Receiver<Result<()>>>,
}

pub struct PlaybackUnit {
    video: VideoWorker,
    audio: AudioWorker,
    state: UnitState,
    loaded: Option<LoadedClip>,
    speed: f64,
}

impl PlaybackUnit {
    /// Wrap a freshly acquired worker pair. The unit starts idle; nothing
    /// about a clip is known until `load`.
    pub fn new(video: VideoWorker, audio: AudioWorker) -> Self {
        Self {
            video,
            audio,
            state: UnitState::Idle,
            loaded: None,
            speed: 1.0,
        }
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == UnitState::Playing
    }

    pub fn loaded(&self) -> Option<&LoadedClip> {
        self.loaded.as_ref()
    }

    pub fn duration(&self) -> Option<f64> {
        self.loaded.map(|l| l.duration)
    }

    /// Load `clip_id` on both workers in parallel. A clip needs at least
    /// one decodable stream; a missing video or audio stream on its own is
    /// not an error (audio-only stems, silent footage).
    pub fn load(&mut self, clip_id: Uuid) -> Result<LoadedClip> {
        self.state = UnitState::Loading;
        self.loaded = None;

        let video_rx = self.video.load(clip_id);
        let audio_rx = self.audio.load(clip_id);

        let video = await_reply(video_rx, "video load");
        let audio = await_reply(audio_rx, "audio load");

        let (has_video, video_dur) = match video {
            Ok(d) => (true, d),
            Err(e) => {
                eprintln!("[unit] {clip_id}: no video ({e})");
                (false, 0.0)
            }
        };
        let (has_audio, audio_dur) = match audio {
            Ok(d) => (true, d),
            Err(e) => {
                eprintln!("[unit] {clip_id}: no audio ({e})");
                (false, 0.0)
            }
        };

        if !has_video && !has_audio {
            self.state = UnitState::Idle;
            return Err(anyhow!("clip {clip_id} has no decodable stream"));
        }

        let info = LoadedClip {
            clip_id,
            duration: video_dur.max(audio_dur),
            has_video,
            has_audio,
        };
        self.loaded = Some(info);
        self.state = UnitState::Ready;
        Ok(info)
    }

    /// Connect the video worker to a compositor frame port.
    pub fn connect_sink(&self, sink: crossbeam_channel::Sender<EngineFrame>) {
        self.video.connect_sink(sink);
    }

    /// Hand the audio worker its ring write-half and the device rate.
    /// Must precede play — the output negotiation of the load phase.
    pub fn set_audio_output(&self, writer: RingWriter, target_rate: u32) {
        self.audio.set_output(writer, target_rate);
    }

    pub fn play(&mut self, start: f64, speed: f64) {
        if !matches!(self.state, UnitState::Ready | UnitState::Paused) {
            return;
        }
        let Some(info) = self.loaded else { return };
        self.speed = speed;
        if info.has_video {
            self.video.play(start, speed);
        }
        if info.has_audio {
            self.audio.play(start, speed);
        }
        self.state = UnitState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state != UnitState::Playing {
            return;
        }
        self.video.pause();
        self.audio.pause();
        self.state = UnitState::Paused;
    }

    /// Start a parallel seek. Pauses first when playing; `finish_seek`
    /// restarts at the target if it was.
    pub fn begin_seek(&mut self, time: f64) -> Result<SeekTicket> {
        let Some(info) = self.loaded else {
            return Err(anyhow!("seek before load"));
        };
        let resume = match self.state {
            UnitState::Playing => {
                self.video.pause();
                self.audio.pause();
                ResumeTo::Playing
            }
            UnitState::Paused => ResumeTo::Paused,
            _ => ResumeTo::Ready,
        };
        self.state = UnitState::Seeking;

        Ok(SeekTicket {
            target: time,
            speed:  self.speed,
            resume,
            video_rx: info.has_video.then(|| self.video.seek(time)),
            audio_rx: info.has_audio.then(|| self.audio.seek(time)),
        })
    }

    /// Await both workers' seeks, then restore the pre-seek state.
    pub fn finish_seek(&mut self, ticket: SeekTicket) -> Result<()> {
        let mut first_err = None;
        if let Some(rx) = ticket.video_rx {
            if let Err(e) = await_reply(rx, "video seek") {
                first_err.get_or_insert(e);
            }
        }
        if let Some(rx) = ticket.audio_rx {
            if let Err(e) = await_reply(rx, "audio seek") {
                first_err.get_or_insert(e);
            }
        }

        match ticket.resume {
            ResumeTo::Playing => {
                self.state = UnitState::Paused;
                self.play(ticket.target, ticket.speed);
            }
            ResumeTo::Paused => self.state = UnitState::Paused,
            ResumeTo::Ready  => self.state = UnitState::Ready,
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Blocking seek: begin + finish.
    pub fn seek(&mut self, time: f64) -> Result<()> {
        let ticket = self.begin_seek(time)?;
        self.finish_seek(ticket)
    }

    /// Export-only passthrough to the video worker.
    pub fn frame_at(&self, time: f64) -> Receiver<Result<EngineFrame>> {
        self.video.frame_at(time)
    }

    /// Collapse Paused back to Ready — the stop() transition.
    pub fn mark_ready(&mut self) {
        if self.state == UnitState::Paused {
            self.state = UnitState::Ready;
        }
    }

    /// Tear the unit down and surrender its workers for pool return.
    /// Order matters: scheduler halt, audio output, frame resources.
    pub fn destroy(mut self) -> (VideoWorker, AudioWorker) {
        self.audio.halt_scheduler();
        self.audio.detach_output();
        self.video.pause();
        self.video.disconnect_sink();
        self.state = UnitState::Idle;
        self.loaded = None;
        (self.video, self.audio)
    }
}

fn await_reply<T>(rx: Receiver<Result<T>>, what: &str) -> Result<T> {
    match rx.recv_timeout(OP_TIMEOUT) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(anyhow!("{what} timed out")),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{what}: worker gone")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamcut_core::realtime::EncoderLoad;
    use jamcut_media::BlobStore;

    fn unit() -> (PlaybackUnit, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let video = VideoWorker::spawn(store.clone(), EncoderLoad::new());
        let audio = AudioWorker::spawn(store);
        (PlaybackUnit::new(video, audio), dir)
    }

    #[test]
    fn fresh_unit_is_idle_with_no_clip_facts() {
        let (unit, _dir) = unit();
        assert_eq!(unit.state(), UnitState::Idle);
        assert!(unit.loaded().is_none());
        assert!(unit.duration().is_none());
    }

    #[test]
    fn load_of_missing_blob_fails_back_to_idle() {
        let (mut unit, _dir) = unit();
        let err = unit.load(Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("no decodable stream"));
        assert_eq!(unit.state(), UnitState::Idle);
        assert!(unit.loaded().is_none());
    }

    #[test]
    fn play_and_seek_require_a_loaded_clip() {
        let (mut unit, _dir) = unit();
        unit.play(0.0, 1.0);
        assert_eq!(unit.state(), UnitState::Idle);
        assert!(unit.begin_seek(1.0).is_err());
    }

    #[test]
    fn destroy_returns_the_worker_pair() {
        let (unit, _dir) = unit();
        let (_video, _audio) = unit.destroy();
        // Workers drop here — their threads shut down cleanly.
    }
}
