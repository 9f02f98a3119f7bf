// crates/jamcut-media/src/record.rs
//
// Recorder pipeline: capture worker → muxer worker → blob store.
//
// The capture worker copies frames out of a live source and forwards them
// with a monotonic presentation offset relative to the first frame; audio
// is forwarded as per-channel f32 planes timed by sample count. The muxer
// worker encodes H.264 + AAC into an MP4, reporting its queue depth to the
// shared encoder-load word on every enqueue, and on stop drains the queue,
// finalizes the container, and lands the blob at the clip id.
//
// Stream layout in the output:
//   Stream 0 — H.264 video (YUV420P, CRF 18, preset fast)
//   Stream 1 — AAC audio  (FLTP stereo, 44100 Hz, 128 kbps)
//
// PTS strategy: video counts output frames in 1/fps; audio counts samples
// in 1/44100. Both start at zero at the head of the take.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use uuid::Uuid;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{output as open_output, Pixel, Sample};
use ffmpeg::software::scaling::{Context as ScaleCtx, Flags as ScaleFlags};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;

use jamcut_core::engine_types::{CapturedAudio, CapturedFrame, RecordingResult};
use jamcut_core::realtime::EncoderLoad;

use crate::audio_decode::{resample_linear, resampled_len};
use crate::source::{AudioSource, FrameSource};
use crate::storage::BlobStore;

/// Output audio sample rate for all recordings.
const AUDIO_RATE: i32 = 44_100;
/// Capture → muxer channel capacity. Its backlog is the "encoder queue
/// depth" the scheduler word observes.
const QUEUE_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug)]
pub struct RecordSpec {
    pub width:  u32,
    pub height: u32,
    pub fps:    u32,
}

enum CaptureMsg {
    Video(CapturedFrame),
    Audio(CapturedAudio),
    Stop,
}

// ── Recorder handle ───────────────────────────────────────────────────────────

/// A running take. `stop()` finalizes the container and returns the blob's
/// clip id plus the frame count.
pub struct Recorder {
    stop: Arc<AtomicBool>,
    capture_join: Option<std::thread::JoinHandle<()>>,
    muxer_join:   Option<std::thread::JoinHandle<()>>,
    result_rx: Receiver<Result<RecordingResult, String>>,
}

impl Recorder {
    pub fn start(
        store:   BlobStore,
        clip_id: Uuid,
        video:   Box<dyn FrameSource>,
        audio:   Option<Box<dyn AudioSource>>,
        spec:    RecordSpec,
        load:    EncoderLoad,
    ) -> Self {
        crate::ensure_ffmpeg();
        let stop = Arc::new(AtomicBool::new(false));
        let (msg_tx, msg_rx) = bounded::<CaptureMsg>(QUEUE_CAPACITY);
        let (result_tx, result_rx) = bounded(1);

        let capture_stop = Arc::clone(&stop);
        let capture_join = std::thread::spawn(move || {
            run_capture(video, audio, msg_tx, capture_stop);
        });

        let muxer_join = std::thread::spawn(move || {
            let result = run_muxer(msg_rx, &store, clip_id, spec, &load);
            // Recording over — release playback decoders either way.
            load.reset();
            let _ = result_tx.send(result);
        });

        Self {
            stop,
            capture_join: Some(capture_join),
            muxer_join:   Some(muxer_join),
            result_rx,
        }
    }

    /// Signal the capture worker, wait for the muxer to drain and finalize,
    /// and return the landed blob's identity.
    pub fn stop(mut self) -> Result<RecordingResult> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.capture_join.take() {
            let _ = join.join();
        }
        if let Some(join) = self.muxer_join.take() {
            let _ = join.join();
        }
        self.result_rx
            .try_recv()
            .map_err(|_| anyhow!("recorder finished without a result"))?
            .map_err(|e| anyhow!("recording failed: {e}"))
    }
}

// ── Capture worker ────────────────────────────────────────────────────────────

fn run_capture(
    mut video: Box<dyn FrameSource>,
    mut audio: Option<Box<dyn AudioSource>>,
    tx:   Sender<CaptureMsg>,
    stop: Arc<AtomicBool>,
) {
    let mut first_frame_at: Option<std::time::Instant> = None;
    let mut audio_samples_sent: u64 = 0;

    'capture: loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let Some(frame) = video.next_frame() else { break };
        let now = std::time::Instant::now();
        let start = *first_frame_at.get_or_insert(now);
        let pts_offset = now.duration_since(start).as_secs_f64();

        // send() blocking on a full channel is the back-pressure the
        // scheduler word exposes to the playback side.
        if tx
            .send(CaptureMsg::Video(CapturedFrame {
                width:  frame.width,
                height: frame.height,
                data:   frame.data,
                pts_offset,
            }))
            .is_err()
        {
            break; // muxer gone
        }

        // Pull audio until its sample clock catches the video offset, so
        // chunk size and frame interval need not divide each other.
        while let Some(src) = audio.as_mut() {
            let rate = src.rate().max(1);
            let audio_time = audio_samples_sent as f64 / rate as f64;
            match src.next_chunk() {
                Some(planes) => {
                    let frames = planes.first().map(|p| p.len()).unwrap_or(0) as u64;
                    audio_samples_sent += frames;
                    if tx
                        .send(CaptureMsg::Audio(CapturedAudio {
                            rate,
                            planes,
                            pts_offset: audio_time,
                        }))
                        .is_err()
                    {
                        break 'capture; // muxer gone
                    }
                }
                None => {
                    audio = None; // audio stream ended early; keep video going
                    break;
                }
            }
            if audio_samples_sent as f64 / rate as f64 >= pts_offset {
                break;
            }
        }
    }

    let _ = tx.send(CaptureMsg::Stop);
    eprintln!("[rec] capture worker done ({audio_samples_sent} audio samples)");
}

// ── Audio FIFO ────────────────────────────────────────────────────────────────

/// Stereo FLTP sample FIFO. The AAC encoder needs exactly frame_size
/// samples per input frame, but captured chunks arrive in arbitrary sizes.
struct AudioFifo {
    left:  Vec<f32>,
    right: Vec<f32>,
}

impl AudioFifo {
    fn new() -> Self {
        Self { left: Vec::new(), right: Vec::new() }
    }

    fn len(&self) -> usize {
        self.left.len()
    }

    /// Append captured planes, resampling to AUDIO_RATE when needed.
    /// Mono chunks are duplicated to both channels.
    fn push(&mut self, chunk: &CapturedAudio) {
        let Some(first) = chunk.planes.first() else { return };
        let frames = first.len();
        if frames == 0 {
            return;
        }
        let out_len = resampled_len(frames, chunk.rate, AUDIO_RATE as u32, 1.0);
        let left = resample_linear(first, out_len);
        let right = match chunk.planes.get(1) {
            Some(p) => resample_linear(p, out_len),
            None => left.clone(),
        };
        self.left.extend_from_slice(&left);
        self.right.extend_from_slice(&right);
    }

    /// Pop one encoder-sized frame. A short tail is zero-padded (used only
    /// for the final flush so no PCM is lost).
    fn pop_frame(&mut self, n: usize, sample_idx: i64) -> AudioFrame {
        let available = self.left.len().min(n);

        let mut frame = AudioFrame::new(
            Sample::F32(SampleType::Planar),
            n,
            ChannelLayoutMask::STEREO,
        );
        frame.set_rate(AUDIO_RATE as u32);
        frame.set_pts(Some(sample_idx));

        unsafe {
            let ldata = frame.data_mut(0);
            let ldst = std::slice::from_raw_parts_mut(ldata.as_mut_ptr() as *mut f32, n);
            ldst[..available].copy_from_slice(&self.left[..available]);
            if available < n {
                ldst[available..].fill(0.0);
            }

            let rdata = frame.data_mut(1);
            let rdst = std::slice::from_raw_parts_mut(rdata.as_mut_ptr() as *mut f32, n);
            rdst[..available].copy_from_slice(&self.right[..available]);
            if available < n {
                rdst[available..].fill(0.0);
            }
        }

        self.left.drain(..available);
        self.right.drain(..available);
        frame
    }
}

// ── Muxer worker ──────────────────────────────────────────────────────────────

struct AudioEncState {
    encoder:        ffmpeg::encoder::Audio,
    out_sample_idx: i64,
    frame_size:     usize,
    fifo:           AudioFifo,
    audio_tb:       Rational,
    ost_audio_tb:   Rational,
}

impl AudioEncState {
    fn drain_fifo(
        &mut self,
        octx:  &mut ffmpeg::format::context::Output,
        flush: bool,
    ) -> Result<(), String> {
        while self.fifo.len() >= self.frame_size || (flush && self.fifo.len() > 0) {
            let frame = self.fifo.pop_frame(self.frame_size, self.out_sample_idx);
            self.out_sample_idx += self.frame_size as i64;

            self.encoder
                .send_frame(&frame)
                .map_err(|e| format!("send audio frame to encoder: {e}"))?;
            self.drain_packets(octx)?;
        }
        Ok(())
    }

    fn drain_packets(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
    ) -> Result<(), String> {
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(1);
            pkt.rescale_ts(self.audio_tb, self.ost_audio_tb);
            pkt.write_interleaved(octx)
                .map_err(|e| format!("write audio packet: {e}"))?;
        }
        Ok(())
    }

    fn flush_encoder(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
    ) -> Result<(), String> {
        self.encoder
            .send_eof()
            .map_err(|e| format!("send EOF to audio encoder: {e}"))?;
        self.drain_packets(octx)
    }
}

fn run_muxer(
    rx:      Receiver<CaptureMsg>,
    store:   &BlobStore,
    clip_id: Uuid,
    spec:    RecordSpec,
    load:    &EncoderLoad,
) -> Result<RecordingResult, String> {
    // Encode to a dotfile path beside the store so the final rename is a
    // same-filesystem move; the `.mp4` suffix picks the container format.
    let tmp_path: PathBuf = store.root().join(format!(".rec-{clip_id}.mp4"));
    let result = mux_take(&rx, &tmp_path, spec, load);

    match result {
        Ok(frame_count) => {
            store
                .adopt(clip_id, &tmp_path)
                .map_err(|e| format!("store recording: {e}"))?;
            eprintln!("[rec] take finished: {frame_count} frames ← {clip_id}");
            Ok(RecordingResult { clip_id, frame_count })
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn mux_take(
    rx:       &Receiver<CaptureMsg>,
    tmp_path: &std::path::Path,
    spec:     RecordSpec,
    load:     &EncoderLoad,
) -> Result<u64, String> {
    // H.264 wants even dimensions.
    let out_w = spec.width.max(2) & !1;
    let out_h = spec.height.max(2) & !1;
    let fps = spec.fps.max(1);

    let mut octx = open_output(&tmp_path)
        .map_err(|e| format!("could not open output '{}': {e}", tmp_path.display()))?;

    // ── Video encoder (stream 0) ──────────────────────────────────────────────
    let out_tb   = Rational::new(1, fps as i32);
    let frame_tb = Rational::new(1, fps as i32);

    let h264 = encoder::find(CodecId::H264)
        .ok_or_else(|| "H.264 encoder not found — is libx264 available?".to_string())?;

    let mut ost_video = octx
        .add_stream(h264)
        .map_err(|e| format!("add video stream: {e}"))?;
    ost_video.set_time_base(out_tb);

    let video_enc_ctx = codec::context::Context::new_with_codec(h264);
    let mut video_enc = video_enc_ctx
        .encoder()
        .video()
        .map_err(|e| format!("create video encoder context: {e}"))?;

    video_enc.set_width(out_w);
    video_enc.set_height(out_h);
    video_enc.set_format(Pixel::YUV420P);
    video_enc.set_time_base(out_tb);
    video_enc.set_frame_rate(Some(Rational::new(fps as i32, 1)));
    video_enc.set_bit_rate(0); // CRF controls quality; bit_rate 0 signals VBR

    let mut opts = ffmpeg::Dictionary::new();
    opts.set("crf", "18");
    opts.set("preset", "fast");

    let mut video_encoder = video_enc
        .open_as_with(h264, opts)
        .map_err(|e| format!("open H.264 encoder: {e}"))?;

    // Square pixels must be set on the OPENED context — codec init resets
    // sample_aspect_ratio, and the muxer copies params from the post-open
    // context below.
    video_encoder.set_aspect_ratio(Rational::new(1, 1));

    unsafe {
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(
            (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
            video_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
        );
        if ret < 0 {
            return Err(format!("avcodec_parameters_from_context (video) failed: {ret}"));
        }
    }

    // ── Audio encoder (stream 1) ──────────────────────────────────────────────
    let audio_tb = Rational::new(1, AUDIO_RATE);

    let aac = encoder::find(CodecId::AAC)
        .ok_or_else(|| "AAC encoder not found".to_string())?;

    let mut ost_audio = octx
        .add_stream(aac)
        .map_err(|e| format!("add audio stream: {e}"))?;
    ost_audio.set_time_base(audio_tb);

    let audio_enc_ctx = codec::context::Context::new_with_codec(aac);
    let mut audio_enc = audio_enc_ctx
        .encoder()
        .audio()
        .map_err(|e| format!("create audio encoder context: {e}"))?;

    audio_enc.set_rate(AUDIO_RATE);
    audio_enc.set_ch_layout(ChannelLayout::STEREO);
    audio_enc.set_format(Sample::F32(SampleType::Planar));
    audio_enc.set_bit_rate(128_000);

    let audio_encoder = audio_enc
        .open_as_with(aac, ffmpeg::Dictionary::new())
        .map_err(|e| format!("open AAC encoder: {e}"))?;

    let audio_frame_size = (audio_encoder.frame_size() as usize).max(1024);
    let ost_audio_tb = octx.stream(1).unwrap().time_base();

    unsafe {
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(
            (**(*octx.as_mut_ptr()).streams.add(1)).codecpar,
            audio_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
        );
        if ret < 0 {
            return Err(format!("avcodec_parameters_from_context (audio) failed: {ret}"));
        }
    }

    octx.write_header()
        .map_err(|e| format!("write output header: {e}"))?;

    let mut audio_state = AudioEncState {
        encoder:        audio_encoder,
        out_sample_idx: 0,
        frame_size:     audio_frame_size,
        fifo:           AudioFifo::new(),
        audio_tb,
        ost_audio_tb,
    };

    // ── Encode loop ───────────────────────────────────────────────────────────
    let ost_video_tb = octx.stream(0).unwrap().time_base();
    let mut scaler: Option<ScaleCtx> = None;
    let mut out_frame_idx: i64 = -1;
    let mut frame_count: u64 = 0;

    loop {
        let msg = match rx.recv() {
            Ok(msg) => msg,
            Err(_) => break, // capture side gone — finalize what we have
        };
        match msg {
            CaptureMsg::Video(frame) => {
                // Depth observed on every enqueue — this is the signal the
                // playback decoders shed delta frames against.
                load.observe_queue_depth(rx.len());

                let mut rgba = VideoFrame::new(Pixel::RGBA, frame.width, frame.height);
                let stride = rgba.stride(0);
                let row = frame.width as usize * 4;
                let dst = rgba.data_mut(0);
                for y in 0..frame.height as usize {
                    let src = &frame.data[y * row..(y + 1) * row];
                    dst[y * stride..y * stride + row].copy_from_slice(src);
                }

                let sc = scaler.get_or_insert_with(|| {
                    ScaleCtx::get(
                        Pixel::RGBA,    frame.width, frame.height,
                        Pixel::YUV420P, out_w,       out_h,
                        ScaleFlags::BILINEAR,
                    )
                    .expect("create swscale context")
                });

                let mut yuv = VideoFrame::empty();
                sc.run(&rgba, &mut yuv)
                    .map_err(|e| format!("scale captured frame: {e}"))?;

                // Quantize the wall-clock offset to the output frame grid,
                // keeping PTS strictly monotonic.
                let mut idx = (frame.pts_offset * fps as f64).round() as i64;
                if idx <= out_frame_idx {
                    idx = out_frame_idx + 1;
                }
                out_frame_idx = idx;
                yuv.set_pts(Some(idx));

                video_encoder
                    .send_frame(&yuv)
                    .map_err(|e| format!("send video frame to encoder: {e}"))?;

                let mut pkt = Packet::empty();
                while video_encoder.receive_packet(&mut pkt).is_ok() {
                    pkt.set_stream(0);
                    pkt.rescale_ts(frame_tb, ost_video_tb);
                    pkt.write_interleaved(&mut octx)
                        .map_err(|e| format!("write video packet: {e}"))?;
                }
                frame_count += 1;
            }
            CaptureMsg::Audio(chunk) => {
                audio_state.fifo.push(&chunk);
                audio_state.drain_fifo(&mut octx, false)?;
            }
            CaptureMsg::Stop => break,
        }
    }

    // ── Flush video encoder ───────────────────────────────────────────────────
    video_encoder
        .send_eof()
        .map_err(|e| format!("send EOF to video encoder: {e}"))?;
    let mut pkt = Packet::empty();
    while video_encoder.receive_packet(&mut pkt).is_ok() {
        pkt.set_stream(0);
        pkt.rescale_ts(frame_tb, ost_video_tb);
        pkt.write_interleaved(&mut octx)
            .map_err(|e| format!("write flush video packet: {e}"))?;
    }

    // ── Flush audio FIFO then encoder ─────────────────────────────────────────
    audio_state.drain_fifo(&mut octx, true)?;
    audio_state.flush_encoder(&mut octx)?;

    octx.write_trailer()
        .map_err(|e| format!("write trailer: {e}"))?;

    Ok(frame_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SineSource, TestPatternSource};

    // The capture worker is ffmpeg-free — its copy/offset behavior is
    // testable without an encoder on the other end.
    #[test]
    fn capture_worker_forwards_frames_with_monotonic_offsets() {
        let (tx, rx) = bounded(64);
        let stop = Arc::new(AtomicBool::new(false));
        let video = Box::new(TestPatternSource::new(8, 8, 30).unpaced().with_frame_limit(5));
        let audio = Box::new(SineSource::new(48_000, 440.0, 128).unpaced().with_chunk_limit(5));

        run_capture(video, Some(audio), tx, stop);

        let mut video_offsets = Vec::new();
        let mut audio_offsets = Vec::new();
        let mut saw_stop = false;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                CaptureMsg::Video(f) => {
                    assert_eq!(f.data.len(), 8 * 8 * 4);
                    video_offsets.push(f.pts_offset);
                }
                CaptureMsg::Audio(a) => {
                    assert_eq!(a.planes.len(), 2);
                    audio_offsets.push(a.pts_offset);
                }
                CaptureMsg::Stop => saw_stop = true,
            }
        }
        assert!(saw_stop);
        assert_eq!(video_offsets.len(), 5);
        assert_eq!(audio_offsets.len(), 5);
        assert!((video_offsets[0] - 0.0).abs() < 1e-9);
        assert!(video_offsets.windows(2).all(|w| w[1] >= w[0]));
        // Audio offsets count samples: chunk n starts at n·128/48000.
        assert!((audio_offsets[1] - 128.0 / 48_000.0).abs() < 1e-9);
        assert!(audio_offsets.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn stop_flag_ends_an_unbounded_capture() {
        let (tx, rx) = bounded(1024);
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        // Paced at 1000 fps so ~20 frames arrive before the stop — far
        // below the channel bound, so the capture loop never blocks.
        let video = Box::new(TestPatternSource::new(4, 4, 1000));

        let join = std::thread::spawn(move || run_capture(video, None, tx, stop2));
        std::thread::sleep(std::time::Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        join.join().unwrap();

        let mut saw_stop = false;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, CaptureMsg::Stop) {
                saw_stop = true;
            }
        }
        assert!(saw_stop);
    }

    #[test]
    fn fifo_pops_fixed_frames_and_pads_the_tail() {
        let mut fifo = AudioFifo::new();
        fifo.push(&CapturedAudio {
            rate: AUDIO_RATE as u32,
            planes: vec![vec![0.5; 1500], vec![0.25; 1500]],
            pts_offset: 0.0,
        });
        assert_eq!(fifo.len(), 1500);

        let frame = fifo.pop_frame(1024, 0);
        assert_eq!(frame.samples(), 1024);
        assert_eq!(fifo.len(), 1500 - 1024);

        // Final short pop zero-pads.
        let frame = fifo.pop_frame(1024, 1024);
        assert_eq!(frame.samples(), 1024);
        assert_eq!(fifo.len(), 0);
    }

    #[test]
    fn fifo_resamples_foreign_rates() {
        let mut fifo = AudioFifo::new();
        fifo.push(&CapturedAudio {
            rate: 22_050,
            planes: vec![vec![0.1; 1000]],
            pts_offset: 0.0,
        });
        // 22050 → 44100 doubles the sample count; mono fans out to stereo.
        assert_eq!(fifo.len(), 2000);
        assert_eq!(fifo.left.len(), fifo.right.len());
    }
}
