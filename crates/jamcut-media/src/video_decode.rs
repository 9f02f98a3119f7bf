// crates/jamcut-media/src/video_decode.rs
//
// Stateful per-clip video decoder: demux + hardware-path decode + RGBA
// conversion, with mid-stream error recovery.
//
// Recovery contract: when the decoder dies on a sample, we remember the
// failing pts, rebuild the codec context, and surface NeedsKeyframe — the
// caller re-seeks to the keyframe at or before that pts and resumes. A
// decode that exceeds DECODE_TIMEOUT_SECS abandons the sample instead of
// stalling the stream loop.

use std::time::Instant;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use uuid::Uuid;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use jamcut_core::engine_types::EngineFrame;

use crate::demux::{Demuxer, StreamInfo};
use crate::storage::BlobStore;

/// Wall-clock budget for decoding one sample.
pub const DECODE_TIMEOUT_SECS: f64 = 5.0;

/// Result of one decode attempt.
pub enum DecodeOutcome {
    Frame(EngineFrame),
    /// The decoder died mid-stream and has been rebuilt; resume by seeking
    /// to the keyframe at or before `failing_pts` seconds.
    NeedsKeyframe { failing_pts: f64 },
    /// A delta frame was dropped (back-pressure or pre-keyframe).
    SkippedDelta,
    /// The sample blew the decode budget and was abandoned.
    TimedOut,
    Eof,
}

pub struct VideoDecoder {
    pub clip_id: Uuid,
    demuxer: Demuxer,
    decoder: ffmpeg::decoder::video::Video,
    info:    StreamInfo,
    scaler:  SwsContext,
    /// False until the first keyframe decodes — deltas before that are
    /// undecodable and dropped.
    saw_keyframe: bool,
    /// Packets sent since the last received frame (decoder latency from
    /// B-frame reordering). Above QUEUE_SKIP_DEPTH the worker sheds deltas.
    in_flight: usize,
    last_pts: i64,
    pub duration: f64,
}

/// Decoder-queue depth above which delta frames are shed.
pub const QUEUE_SKIP_DEPTH: usize = 3;

fn build_decoder(demuxer: &Demuxer, index: usize) -> Result<ffmpeg::decoder::video::Video> {
    // Second context for decoder params — Parameters borrows from the
    // stream, which borrows the seeking context.
    let ictx = input(demuxer.path()).context("reopen for decoder params")?;
    let stream = ictx
        .stream(index)
        .ok_or_else(|| anyhow!("video stream disappeared"))?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .context("video decoder context")?;
    ctx.decoder().video().context("open video decoder")
}

impl VideoDecoder {
    pub fn open(store: &BlobStore, clip_id: Uuid) -> Result<Self> {
        let demuxer = Demuxer::open(store, clip_id)?;
        let info = demuxer
            .video_info()
            .ok_or_else(|| anyhow!("clip {clip_id} has no video stream"))?;
        let decoder = build_decoder(&demuxer, info.index)?;
        if info.width == 0 || info.height == 0 {
            return Err(anyhow!("clip {clip_id} has no usable video geometry"));
        }
        let scaler = SwsContext::get(
            decoder.format(), decoder.width(), decoder.height(),
            Pixel::RGBA, info.width, info.height, Flags::BILINEAR,
        )
        .context("create RGBA scaler")?;
        let duration = demuxer.duration_secs();

        Ok(Self {
            clip_id,
            demuxer,
            decoder,
            info,
            scaler,
            saw_keyframe: false,
            in_flight: 0,
            last_pts: -1,
            duration,
        })
    }

    /// Load `clip_id` into this decoder, reusing the codec context when the
    /// stream configuration matches the previous clip (reset instead of a
    /// full re-configure — worker recycling depends on this being cheap).
    pub fn reload(self, store: &BlobStore, clip_id: Uuid) -> Result<Self> {
        let demuxer = Demuxer::open(store, clip_id)?;
        let info = demuxer
            .video_info()
            .ok_or_else(|| anyhow!("clip {clip_id} has no video stream"))?;
        let matches = info.width == self.info.width
            && info.height == self.info.height
            && info.tb_num == self.info.tb_num
            && info.tb_den == self.info.tb_den;

        if !matches {
            return Self::open(store, clip_id);
        }

        let mut decoder = self.decoder;
        decoder.flush();
        let duration = demuxer.duration_secs();
        Ok(Self {
            clip_id,
            demuxer,
            decoder,
            info,
            scaler: self.scaler,
            saw_keyframe: false,
            in_flight: 0,
            last_pts: -1,
            duration,
        })
    }

    pub fn frame_interval(&self) -> f64 {
        self.info.frame_interval
    }

    /// Decoder reordering depth — the worker sheds deltas above
    /// [`QUEUE_SKIP_DEPTH`].
    pub fn queue_depth(&self) -> usize {
        self.in_flight
    }

    /// True once a keyframe has decoded since the last seek/reset.
    pub fn is_ready(&self) -> bool {
        self.saw_keyframe
    }

    /// Jump to the keyframe at or before `secs` and reset decode state.
    pub fn seek(&mut self, secs: f64) -> Result<()> {
        self.demuxer.seek_keyframe_before(&self.info, secs)?;
        self.decoder.flush();
        self.saw_keyframe = false;
        self.in_flight = 0;
        self.last_pts = -1;
        Ok(())
    }

    /// Decode one sample. With `skip_delta`, the next non-keyframe packet
    /// is dropped instead of decoded; keyframes always decode.
    pub fn decode_next(&mut self, skip_delta: bool) -> DecodeOutcome {
        let started = Instant::now();
        loop {
            if started.elapsed().as_secs_f64() > DECODE_TIMEOUT_SECS {
                eprintln!("[video] decode timeout ({DECODE_TIMEOUT_SECS}s) — skipping sample");
                return DecodeOutcome::TimedOut;
            }

            let Some(demuxed) = self.demuxer.read_packet() else {
                // Drain the decoder: B-frame codecs hold frames internally.
                let _ = self.decoder.send_eof();
                if let Some(frame) = self.receive_rgba() {
                    return DecodeOutcome::Frame(frame);
                }
                return DecodeOutcome::Eof;
            };
            if demuxed.stream_index != self.info.index {
                continue;
            }

            if !demuxed.is_key && (skip_delta || !self.saw_keyframe) {
                return DecodeOutcome::SkippedDelta;
            }

            let pts = demuxed.packet.pts().unwrap_or(self.last_pts + 1);
            if self.decoder.send_packet(&demuxed.packet).is_err() {
                // Mid-stream decoder failure: rebuild and tell the caller
                // where to resume from.
                let failing_pts = self.info.pts_to_secs(pts).max(0.0);
                eprintln!(
                    "[video] decoder error at {failing_pts:.3}s — reinitializing"
                );
                match build_decoder(&self.demuxer, self.info.index) {
                    Ok(dec) => self.decoder = dec,
                    Err(e) => eprintln!("[video] decoder rebuild failed: {e}"),
                }
                self.saw_keyframe = false;
                self.in_flight = 0;
                return DecodeOutcome::NeedsKeyframe { failing_pts };
            }
            self.in_flight += 1;

            if let Some(frame) = self.receive_rgba() {
                self.saw_keyframe = true;
                return DecodeOutcome::Frame(frame);
            }
            // Decoder wants more input — loop for the next packet.
        }
    }

    /// Export path: decode forward until `target` seconds and return the
    /// frame displayed at that instant (timestamp ≤ target). The attempt
    /// budget keeps a persistently broken stream from looping forever
    /// through recovery seeks.
    pub fn decode_until(&mut self, target: f64) -> Result<EngineFrame> {
        const ATTEMPT_BUDGET: usize = 4096;
        let mut last_good: Option<EngineFrame> = None;
        for _ in 0..ATTEMPT_BUDGET {
            match self.decode_next(false) {
                DecodeOutcome::Frame(frame) => {
                    if frame.timestamp > target {
                        return Ok(last_good.unwrap_or(frame));
                    }
                    let done = frame.end() > target;
                    last_good = Some(frame);
                    if done {
                        return Ok(last_good.unwrap());
                    }
                }
                DecodeOutcome::NeedsKeyframe { failing_pts } => {
                    self.seek(failing_pts)?;
                }
                DecodeOutcome::SkippedDelta | DecodeOutcome::TimedOut => continue,
                DecodeOutcome::Eof => {
                    return last_good
                        .ok_or_else(|| anyhow!("no frame decodable at {target:.3}s"));
                }
            }
        }
        last_good.ok_or_else(|| anyhow!("decode budget exhausted at {target:.3}s"))
    }

    fn receive_rgba(&mut self) -> Option<EngineFrame> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return None;
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        let pts = decoded.pts().unwrap_or(self.last_pts + 1);
        self.last_pts = pts;

        let mut rgba = ffmpeg::util::frame::video::Video::empty();
        if self.scaler.run(&decoded, &mut rgba).is_err() {
            return None;
        }
        // Destripe: copy visible pixels only, not stride padding.
        let stride = rgba.stride(0);
        let raw = rgba.data(0);
        let row_bytes = self.info.width as usize * 4;
        let data: Vec<u8> = (0..self.info.height as usize)
            .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
            .copied()
            .collect();

        Some(EngineFrame {
            clip_id:   self.clip_id,
            timestamp: self.info.pts_to_secs(pts),
            duration:  self.info.frame_interval,
            width:     self.info.width,
            height:    self.info.height,
            data,
        })
    }
}
