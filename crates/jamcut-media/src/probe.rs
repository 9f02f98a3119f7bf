// crates/jamcut-media/src/probe.rs
//
// In-process probing of stored blobs: duration, stream presence, video
// geometry, poster thumbnail. The coordinator probes at load time to fill
// in clip duration hints; import flows use the thumbnail.

use anyhow::{anyhow, Result};
use uuid::Uuid;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use crate::demux::Demuxer;
use crate::storage::BlobStore;

#[derive(Clone, Copy, Debug, Default)]
pub struct ProbeInfo {
    pub duration:   f64,
    pub video_size: Option<(u32, u32)>,
    pub has_audio:  bool,
}

pub fn probe_blob(store: &BlobStore, clip_id: Uuid) -> Result<ProbeInfo> {
    let demuxer = Demuxer::open(store, clip_id)?;
    let info = ProbeInfo {
        duration: demuxer.duration_secs(),
        video_size: demuxer
            .video_info()
            .map(|v| (v.width, v.height))
            .filter(|&(w, h)| w > 0 && h > 0),
        has_audio: demuxer.audio_info().is_some(),
    };
    eprintln!(
        "[probe] {clip_id}: {:.2}s video={:?} audio={}",
        info.duration, info.video_size, info.has_audio
    );
    Ok(info)
}

/// Decode one poster frame (320 px wide, proportional height) from roughly
/// 10 % into the blob. Returns `(width, height, rgba)`.
pub fn poster_thumbnail(store: &BlobStore, clip_id: Uuid) -> Result<(u32, u32, Vec<u8>)> {
    crate::ensure_ffmpeg();
    let path = store.resolve(clip_id)?;
    let mut ictx = input(&path)?;

    let video_stream_idx = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| anyhow!("no video stream in {clip_id}"))?
        .index();

    let (raw_w, raw_h, seek_ts) = {
        let stream = ictx.stream(video_stream_idx).unwrap();
        let (w, h) = unsafe {
            let p = stream.parameters().as_ptr();
            ((*p).width as u32, (*p).height as u32)
        };
        let duration = ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
        let ts = if duration > 2.0 {
            let t = (duration * 0.1).max(1.0);
            let tb = stream.time_base();
            (t * tb.denominator() as f64 / tb.numerator() as f64) as i64
        } else {
            0i64
        };
        (w, h, ts)
    };
    let _ = ictx.seek(seek_ts, ..=seek_ts);

    // Second context for decoder construction (Parameters borrows the stream).
    let ictx2 = input(&path)?;
    let stream2 = ictx2
        .stream(video_stream_idx)
        .ok_or_else(|| anyhow!("stream gone"))?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?;
    let mut decoder = ctx.decoder().video()?;

    let thumb_w: u32 = 320;
    let thumb_h: u32 =
        ((thumb_w as f64 * raw_h as f64 / raw_w.max(1) as f64) as u32).max(2) & !1;

    let mut scaler = SwsContext::get(
        decoder.format(), decoder.width(), decoder.height(),
        Pixel::RGBA, thumb_w, thumb_h, Flags::BILINEAR,
    )?;

    for result in ictx.packets() {
        let Ok((stream, packet)) = result else { continue };
        if stream.index() != video_stream_idx {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgba = ffmpeg::util::frame::video::Video::empty();
            if scaler.run(&decoded, &mut rgba).is_err() {
                continue;
            }
            // Destripe: visible pixels only, not stride padding.
            let stride = rgba.stride(0);
            let raw = rgba.data(0);
            let row_bytes = thumb_w as usize * 4;
            let data: Vec<u8> = (0..thumb_h as usize)
                .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
                .copied()
                .collect();
            eprintln!("[probe] thumbnail {thumb_w}x{thumb_h} ← {clip_id}");
            return Ok((thumb_w, thumb_h, data));
        }
    }
    Err(anyhow!("no frame decodable for thumbnail of {clip_id}"))
}
