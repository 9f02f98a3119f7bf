// crates/jamcut-media/src/demux.rs
//
// Demuxer over a stored blob: track info + packet iteration by
// time/keyframe. Both decoders own one of these; the recorder's muxer
// produces blobs this reads back with identical keyframe/timestamp
// semantics (same container layer underneath).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;

use crate::storage::BlobStore;

/// What a decoder needs to know about one stream.
#[derive(Clone, Copy, Debug)]
pub struct StreamInfo {
    pub index:  usize,
    pub tb_num: i32,
    pub tb_den: i32,
    /// Video only; zero for audio streams.
    pub width:  u32,
    pub height: u32,
    /// Nominal seconds per frame (video) — used for stale detection.
    pub frame_interval: f64,
    /// Audio only; zero for video streams.
    pub sample_rate: u32,
    pub channels:    u32,
}

impl StreamInfo {
    pub fn secs_to_pts(&self, secs: f64) -> i64 {
        (secs * self.tb_den as f64 / self.tb_num as f64) as i64
    }

    pub fn pts_to_secs(&self, pts: i64) -> f64 {
        pts as f64 * self.tb_num as f64 / self.tb_den as f64
    }
}

/// One encoded packet, already tagged with its stream and key flag.
pub struct DemuxedPacket {
    pub stream_index: usize,
    pub packet: ffmpeg::Packet,
    pub is_key: bool,
}

pub struct Demuxer {
    path: PathBuf,
    ictx: ffmpeg::format::context::Input,
    video: Option<StreamInfo>,
    audio: Option<StreamInfo>,
}

impl Demuxer {
    /// Open the blob stored under `clip_id`.
    pub fn open(store: &BlobStore, clip_id: Uuid) -> Result<Self> {
        Self::open_path(&store.resolve(clip_id)?)
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        crate::ensure_ffmpeg();
        let ictx = input(path)
            .with_context(|| format!("demux open {}", path.display()))?;

        let video = ictx.streams().best(Type::Video).map(|s| {
            let tb = s.time_base();
            let rate = s.avg_frame_rate();
            let interval = if rate.numerator() > 0 {
                rate.denominator() as f64 / rate.numerator() as f64
            } else {
                1.0 / 30.0
            };
            let (w, h) = unsafe {
                let p = s.parameters().as_ptr();
                ((*p).width as u32, (*p).height as u32)
            };
            StreamInfo {
                index:  s.index(),
                tb_num: tb.numerator(),
                tb_den: tb.denominator(),
                width:  w,
                height: h,
                frame_interval: interval,
                sample_rate: 0,
                channels:    0,
            }
        });

        let audio = ictx.streams().best(Type::Audio).map(|s| {
            let tb = s.time_base();
            let (rate, channels) = unsafe {
                let p = s.parameters().as_ptr();
                ((*p).sample_rate as u32, (*p).ch_layout.nb_channels as u32)
            };
            StreamInfo {
                index:  s.index(),
                tb_num: tb.numerator(),
                tb_den: tb.denominator(),
                width:  0,
                height: 0,
                frame_interval: 0.0,
                sample_rate: rate,
                channels,
            }
        });

        Ok(Self { path: path.to_path_buf(), ictx, video, audio })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn video_info(&self) -> Option<StreamInfo> {
        self.video
    }

    pub fn audio_info(&self) -> Option<StreamInfo> {
        self.audio
    }

    /// Container duration in seconds, stream duration as fallback.
    pub fn duration_secs(&self) -> f64 {
        let dur = self.ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
        if dur > 0.0 {
            return dur;
        }
        self.video
            .or(self.audio)
            .map(|info| {
                self.ictx
                    .stream(info.index)
                    .map(|s| info.pts_to_secs(s.duration()))
                    .unwrap_or(0.0)
            })
            .unwrap_or(0.0)
            .max(0.0)
    }

    /// Seek so the next packets start at the keyframe at or before `secs`
    /// on `stream`. The caller must reset its decoder afterwards.
    pub fn seek_keyframe_before(&mut self, stream: &StreamInfo, secs: f64) -> Result<()> {
        let ts = stream.secs_to_pts(secs.max(0.0));
        // Backwards-biased seek: land on the keyframe ≤ ts.
        self.ictx
            .seek(ts, ..=ts)
            .map_err(|e| anyhow!("seek to {secs:.3}s: {e}"))
    }

    /// Next packet from any stream, or `None` at end of file. Packets from
    /// one stream come back in monotonic decode order.
    pub fn read_packet(&mut self) -> Option<DemuxedPacket> {
        for result in self.ictx.packets() {
            let Ok((stream, packet)) = result else { continue };
            let is_key = packet.is_key();
            return Some(DemuxedPacket {
                stream_index: stream.index(),
                packet,
                is_key,
            });
        }
        None
    }
}
