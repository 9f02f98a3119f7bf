// crates/jamcut-engine/src/bus.rs
//
// Audio buses: one strip per playing clip, grouped by track, feeding a
// master bus inside the output callback.
//
// The callback reads every strip's ring (lock-free SPSC), applies the
// track's gain/pan chain, sums into the master, applies master gain/pan,
// and optionally taps the mixed buffer out to a channel. Parameters are
// f32 bits in atomics so control-side updates never block the realtime
// thread; the strip list itself is behind a try_lock — a missed lock
// renders one silent buffer rather than stalling the callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use uuid::Uuid;

use jamcut_core::project::Pipeline;
use jamcut_core::realtime::RingReader;

/// Fallback device rate when no output device exists (CI, headless).
const FALLBACK_RATE: u32 = 44_100;

/// f32 stored as bits in an AtomicU32 — cheap shared scalar params.
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// Gain/pan pair shared between the control side and the callback.
pub struct BusParams {
    pub gain: AtomicF32,
    pub pan:  AtomicF32,
}

impl BusParams {
    fn unity() -> Self {
        Self {
            gain: AtomicF32::new(1.0),
            pan:  AtomicF32::new(0.5),
        }
    }
}

/// Equal-power stereo pan gains for `pan` ∈ [0, 1], 0.5 = center.
fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = pan.clamp(0.0, 1.0) * std::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// One clip's ring feeding one track's bus.
struct Strip {
    clip_id:  Uuid,
    reader:   RingReader,
    params:   Arc<BusParams>,
    /// Static gain/pan folded out of the track's audio pipeline.
    chain_gain: f32,
    chain_pan:  f32,
}

struct Shared {
    strips: Mutex<Vec<Strip>>,
    master: BusParams,
    /// Optional tap of the mixed output (interleaved stereo buffers).
    tap: Mutex<Option<Sender<Vec<f32>>>>,
}

/// The engine's audio output. Owns the device stream; without a device it
/// runs detached and `mix_into` can be driven manually.
pub struct AudioOut {
    shared: Arc<Shared>,
    track_params: HashMap<Uuid, Arc<BusParams>>,
    _stream: Option<cpal::Stream>,
    sample_rate: u32,
}

impl AudioOut {
    /// Open the default output device. Falls back to detached mode when no
    /// device is available — playback then runs video-only.
    pub fn new() -> Self {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let shared = Arc::new(Shared {
            strips: Mutex::new(Vec::new()),
            master: BusParams::unity(),
            tap: Mutex::new(None),
        });

        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            eprintln!("[bus] no output device — running detached");
            return Self::detached_with(shared);
        };
        let config: cpal::StreamConfig = match device.default_output_config() {
            Ok(c) => c.into(),
            Err(e) => {
                eprintln!("[bus] no output config ({e}) — running detached");
                return Self::detached_with(shared);
            }
        };
        let sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let cb_shared = Arc::clone(&shared);
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mix_into(&cb_shared, data, channels);
            },
            |err| eprintln!("[bus] stream error: {err}"),
            None,
        );

        match stream {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    eprintln!("[bus] stream start failed: {e}");
                }
                eprintln!("[bus] output open at {sample_rate} Hz");
                Self {
                    shared,
                    track_params: HashMap::new(),
                    _stream: Some(stream),
                    sample_rate,
                }
            }
            Err(e) => {
                eprintln!("[bus] stream build failed ({e}) — running detached");
                Self::detached_with(shared)
            }
        }
    }

    /// Detached output for tests and headless runs: no device, manual mix.
    pub fn detached() -> Self {
        Self::detached_with(Arc::new(Shared {
            strips: Mutex::new(Vec::new()),
            master: BusParams::unity(),
            tap: Mutex::new(None),
        }))
    }

    fn detached_with(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            track_params: HashMap::new(),
            _stream: None,
            sample_rate: FALLBACK_RATE,
        }
    }

    /// The rate audio workers must resample to.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Register a clip's ring under its track bus. The track's pipeline
    /// gain/pan effects are folded in as static multipliers.
    pub fn add_strip(
        &mut self,
        clip_id:  Uuid,
        track_id: Uuid,
        reader:   RingReader,
        pipeline: Option<&Pipeline>,
    ) {
        let params = Arc::clone(
            self.track_params
                .entry(track_id)
                .or_insert_with(|| Arc::new(BusParams::unity())),
        );
        let (chain_gain, chain_pan) = fold_pipeline(pipeline);

        let mut strips = self.shared.strips.lock();
        // One strip per clip: re-adding replaces (loop handoff swaps rings).
        strips.retain(|s| s.clip_id != clip_id);
        strips.push(Strip {
            clip_id,
            reader,
            params,
            chain_gain,
            chain_pan,
        });
    }

    pub fn remove_strip(&mut self, clip_id: Uuid) {
        self.shared.strips.lock().retain(|s| s.clip_id != clip_id);
    }

    pub fn has_track(&self, track_id: Uuid) -> bool {
        self.track_params.contains_key(&track_id)
    }

    pub fn set_volume(&mut self, track_id: Uuid, volume: f32) {
        self.track_params
            .entry(track_id)
            .or_insert_with(|| Arc::new(BusParams::unity()))
            .gain
            .set(volume.max(0.0));
    }

    pub fn set_pan(&mut self, track_id: Uuid, pan: f32) {
        self.track_params
            .entry(track_id)
            .or_insert_with(|| Arc::new(BusParams::unity()))
            .pan
            .set(pan.clamp(0.0, 1.0));
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.shared.master.gain.set(volume.max(0.0));
    }

    pub fn set_master_pan(&self, pan: f32) {
        self.shared.master.pan.set(pan.clamp(0.0, 1.0));
    }

    /// Route a copy of the mixed output to `tx` (`None` disconnects).
    pub fn set_master_tap(&self, tx: Option<Sender<Vec<f32>>>) {
        *self.shared.tap.lock() = tx;
    }

    /// Manually drive the mixer — what the device callback does, exposed
    /// for detached mode.
    pub fn mix_into(&self, out: &mut [f32], channels: usize) {
        mix_into(&self.shared, out, channels);
    }
}

/// Static gain/pan from a track's audio pipeline ("gain" level × …, last
/// "pan" position wins). Other effect kinds are ignored by this renderer.
fn fold_pipeline(pipeline: Option<&Pipeline>) -> (f32, f32) {
    let mut gain = 1.0f32;
    let mut pan = 0.5f32;
    if let Some(p) = pipeline {
        for effect in &p.effects {
            match effect.kind.as_str() {
                "gain" => {
                    if let Some((_, v)) = effect.params.iter().find(|(k, _)| k == "level") {
                        gain *= v.scalar().max(0.0);
                    }
                }
                "pan" => {
                    if let Some((_, v)) = effect.params.iter().find(|(k, _)| k == "position") {
                        pan = v.scalar().clamp(0.0, 1.0);
                    }
                }
                _ => {}
            }
        }
    }
    (gain, pan)
}

fn mix_into(shared: &Shared, out: &mut [f32], channels: usize) {
    out.fill(0.0);
    if channels == 0 {
        return;
    }
    let frames = out.len() / channels;
    if frames == 0 {
        return;
    }

    // Realtime thread: never block on the control side.
    let Some(mut strips) = shared.strips.try_lock() else { return };

    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];

    for strip in strips.iter_mut() {
        let mut l = vec![0.0f32; frames];
        let mut r = vec![0.0f32; frames];
        strip.reader.read(&mut [&mut l, &mut r]);

        let gain = strip.chain_gain * strip.params.gain.get();
        let (cl, cr) = pan_gains(strip.chain_pan);
        let (pl, pr) = pan_gains(strip.params.pan.get());
        let lg = gain * cl * pl;
        let rg = gain * cr * pr;
        for i in 0..frames {
            left[i] += l[i] * lg;
            right[i] += r[i] * rg;
        }
    }
    drop(strips);

    let master_gain = shared.master.gain.get();
    let (ml, mr) = pan_gains(shared.master.pan.get());
    for i in 0..frames {
        let l = left[i] * master_gain * ml;
        let r = right[i] * master_gain * mr;
        out[i * channels] = l;
        if channels > 1 {
            out[i * channels + 1] = r;
        }
    }

    // Same no-blocking rule as the strip list: a contended tap lock means
    // this buffer simply goes untapped.
    if let Some(tap) = shared.tap.try_lock() {
        if let Some(tx) = tap.as_ref() {
            let _ = tx.try_send(out.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamcut_core::project::{Effect, EffectValue};
    use jamcut_core::realtime::SampleRing;

    fn strip_with_samples(out: &mut AudioOut, track_id: Uuid, value: f32) -> Uuid {
        let (mut writer, reader) = SampleRing::new(2, 256).split();
        let samples = [value; 64];
        writer.write(&[&samples, &samples], 64);
        writer.set_playing(true);
        let clip_id = Uuid::new_v4();
        out.add_strip(clip_id, track_id, reader, None);
        // Dropping the writer is fine — the ring is shared and the
        // buffered samples stay readable.
        clip_id
    }

    fn mixed_frame(out: &AudioOut) -> (f32, f32) {
        let mut buf = vec![0.0f32; 32 * 2];
        out.mix_into(&mut buf, 2);
        (buf[0], buf[1])
    }

    #[test]
    fn strip_audio_reaches_the_output() {
        let mut out = AudioOut::detached();
        let track = Uuid::new_v4();
        strip_with_samples(&mut out, track, 0.5);
        let (l, r) = mixed_frame(&out);
        // Center pan twice (strip + master): 0.5 · cos²(π/4) = 0.25.
        assert!((l - 0.25).abs() < 1e-3);
        assert!((r - 0.25).abs() < 1e-3);
    }

    #[test]
    fn track_volume_scales_and_mutes() {
        let mut out = AudioOut::detached();
        let track = Uuid::new_v4();
        strip_with_samples(&mut out, track, 0.5);
        out.set_volume(track, 0.0);
        let (l, r) = mixed_frame(&out);
        assert_eq!((l, r), (0.0, 0.0));
    }

    #[test]
    fn hard_pan_empties_the_far_channel() {
        let mut out = AudioOut::detached();
        let track = Uuid::new_v4();
        strip_with_samples(&mut out, track, 0.5);
        out.set_pan(track, 1.0); // hard right
        let (l, r) = mixed_frame(&out);
        assert!(l.abs() < 1e-6);
        assert!(r > 0.1);
    }

    #[test]
    fn master_volume_caps_everything() {
        let mut out = AudioOut::detached();
        strip_with_samples(&mut out, Uuid::new_v4(), 0.5);
        out.set_master_volume(0.0);
        let (l, r) = mixed_frame(&out);
        assert_eq!((l, r), (0.0, 0.0));
    }

    #[test]
    fn pipeline_gain_folds_into_the_strip() {
        let mut out = AudioOut::detached();
        let (mut writer, reader) = SampleRing::new(2, 256).split();
        let samples = [0.5f32; 64];
        writer.write(&[&samples, &samples], 64);
        writer.set_playing(true);

        let pipeline = Pipeline {
            effects: vec![Effect::new("gain", &[("level", EffectValue::Scalar(0.5))])],
        };
        out.add_strip(Uuid::new_v4(), Uuid::new_v4(), reader, Some(&pipeline));
        let (l, _) = mixed_frame(&out);
        assert!((l - 0.125).abs() < 1e-3); // half of the unpiped case
    }

    #[test]
    fn master_tap_sees_the_mix() {
        let mut out = AudioOut::detached();
        strip_with_samples(&mut out, Uuid::new_v4(), 0.5);
        let (tx, rx) = crossbeam_channel::bounded(4);
        out.set_master_tap(Some(tx));
        let mut buf = vec![0.0f32; 16];
        out.mix_into(&mut buf, 2);
        let tapped = rx.try_recv().unwrap();
        assert_eq!(tapped, buf);
    }

    #[test]
    fn removed_strip_goes_silent() {
        let mut out = AudioOut::detached();
        let track = Uuid::new_v4();
        let clip = strip_with_samples(&mut out, track, 0.5);
        out.remove_strip(clip);
        let (l, r) = mixed_frame(&out);
        assert_eq!((l, r), (0.0, 0.0));
    }
}
