// crates/jamcut-media/src/audio_decode.rs
//
// Per-clip audio decoding to planar f32, plus the linear resampler the
// scheduling loop uses to match the output device rate.
//
// Decoded frames are normalized to float-planar stereo at the source
// sample rate (mono sources duplicate their plane); rate conversion is the
// worker's job because the ratio depends on playback speed.

use anyhow::{anyhow, Context as AnyhowContext, Result};
use uuid::Uuid;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;

use jamcut_core::engine_types::AudioChunk;

use crate::demux::{Demuxer, StreamInfo};
use crate::storage::BlobStore;

pub struct AudioDecoder {
    pub clip_id: Uuid,
    demuxer: Demuxer,
    decoder: ffmpeg::decoder::audio::Audio,
    info: StreamInfo,
    /// Lazily created on the first frame that is not already FLTP stereo.
    resampler: Option<resampling::Context>,
    sent_eof: bool,
    pub duration: f64,
}

impl AudioDecoder {
    pub fn open(store: &BlobStore, clip_id: Uuid) -> Result<Self> {
        let demuxer = Demuxer::open(store, clip_id)?;
        let info = demuxer
            .audio_info()
            .ok_or_else(|| anyhow!("clip {clip_id} has no audio stream"))?;

        // Second context for decoder params, as for video.
        let ictx = input(demuxer.path()).context("reopen for audio params")?;
        let stream = ictx
            .stream(info.index)
            .ok_or_else(|| anyhow!("audio stream disappeared"))?;
        let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("audio decoder context")?;
        let decoder = ctx.decoder().audio().context("open audio decoder")?;
        let duration = demuxer.duration_secs();

        Ok(Self {
            clip_id,
            demuxer,
            decoder,
            info,
            resampler: None,
            sent_eof: false,
            duration,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.info.sample_rate.max(1)
    }

    pub fn seek(&mut self, secs: f64) -> Result<()> {
        self.demuxer.seek_keyframe_before(&self.info, secs)?;
        self.decoder.flush();
        self.resampler = None;
        self.sent_eof = false;
        Ok(())
    }

    /// Decode the next audio unit, or `None` at end of stream.
    pub fn decode_next(&mut self) -> Option<AudioChunk> {
        loop {
            if let Some(chunk) = self.receive_chunk() {
                return Some(chunk);
            }
            if self.sent_eof {
                return None;
            }
            match self.demuxer.read_packet() {
                Some(p) if p.stream_index == self.info.index => {
                    // Soft-fail: one bad packet should not kill the stream.
                    let _ = self.decoder.send_packet(&p.packet);
                }
                Some(_) => continue,
                None => {
                    let _ = self.decoder.send_eof();
                    self.sent_eof = true;
                }
            }
        }
    }

    fn receive_chunk(&mut self) -> Option<AudioChunk> {
        let mut raw = ffmpeg::util::frame::audio::Audio::empty();
        if self.decoder.receive_frame(&mut raw).is_err() {
            return None;
        }
        let media_time = raw
            .pts()
            .map(|pts| self.info.pts_to_secs(pts))
            .unwrap_or(0.0);

        let target_fmt = Sample::F32(SampleType::Planar);
        let needs_convert =
            raw.format() != target_fmt || raw.ch_layout().channels() != 2;

        let frame = if needs_convert {
            if self.resampler.is_none() {
                // Mono sources must be declared MONO or the converter
                // misreads the layout.
                let rate = raw.rate();
                let src_layout = if raw.ch_layout().channels() >= 2 {
                    raw.ch_layout()
                } else {
                    ChannelLayout::MONO
                };
                match resampling::Context::get2(
                    raw.format(), src_layout,            rate,
                    target_fmt,   ChannelLayout::STEREO, rate,
                ) {
                    Ok(rs) => self.resampler = Some(rs),
                    Err(e) => {
                        eprintln!("[audio] converter setup failed: {e}");
                        return None;
                    }
                }
            }
            let Some(rs) = self.resampler.as_mut() else { return None };
            let mut converted = ffmpeg::util::frame::audio::Audio::empty();
            if rs.run(&raw, &mut converted).is_err() || converted.samples() == 0 {
                return None;
            }
            converted
        } else {
            raw
        };

        let n = frame.samples();
        if n == 0 {
            return None;
        }
        let mut planes = Vec::with_capacity(2);
        unsafe {
            let l = frame.data(0);
            planes.push(
                std::slice::from_raw_parts(l.as_ptr() as *const f32, n).to_vec(),
            );
            // Stereo frames use plane 1; mono duplicates plane 0.
            let r = if frame.ch_layout().channels() >= 2 {
                frame.data(1)
            } else {
                frame.data(0)
            };
            planes.push(
                std::slice::from_raw_parts(r.as_ptr() as *const f32, n).to_vec(),
            );
        }

        Some(AudioChunk {
            media_time,
            rate: self.sample_rate(),
            planes,
        })
    }
}

// ── Linear resampling ─────────────────────────────────────────────────────────

/// Resample `plane` to exactly `out_len` samples by linear interpolation.
///
/// This is the ring-path resampler: cheap, phase-accurate enough for
/// preview playback, and speed-aware (the caller folds playback rate into
/// `out_len`).
pub fn resample_linear(plane: &[f32], out_len: usize) -> Vec<f32> {
    if plane.is_empty() || out_len == 0 {
        return Vec::new();
    }
    if plane.len() == out_len {
        return plane.to_vec();
    }
    let mut out = Vec::with_capacity(out_len);
    let step = (plane.len() - 1) as f64 / (out_len.max(2) - 1) as f64;
    for i in 0..out_len {
        let pos = i as f64 * step;
        let base = pos as usize;
        let frac = (pos - base as f64) as f32;
        let a = plane[base];
        let b = plane[(base + 1).min(plane.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// Output length for converting `frames` samples from `src_rate` to
/// `dst_rate` at playback `speed`.
pub fn resampled_len(frames: usize, src_rate: u32, dst_rate: u32, speed: f64) -> usize {
    if src_rate == 0 || speed <= 0.0 {
        return 0;
    }
    (frames as f64 * dst_rate as f64 / (src_rate as f64 * speed)).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_lengths_match() {
        let plane = vec![0.0, 0.5, 1.0, 0.5];
        assert_eq!(resample_linear(&plane, 4), plane);
    }

    #[test]
    fn upsampling_interpolates_between_samples() {
        let out = resample_linear(&[0.0, 1.0], 3);
        assert_eq!(out.len(), 3);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn downsampling_keeps_endpoints() {
        let plane: Vec<f32> = (0..100).map(|i| i as f32 / 99.0).collect();
        let out = resample_linear(&plane, 10);
        assert_eq!(out.len(), 10);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[9] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn resampled_len_folds_rate_and_speed() {
        assert_eq!(resampled_len(48_000, 48_000, 44_100, 1.0), 44_100);
        assert_eq!(resampled_len(44_100, 44_100, 44_100, 1.0), 44_100);
        // Double speed consumes source twice as fast → half the output.
        assert_eq!(resampled_len(44_100, 44_100, 44_100, 2.0), 22_050);
    }
}
