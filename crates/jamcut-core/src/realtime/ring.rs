// crates/jamcut-core/src/realtime/ring.rs
//
// Lock-free single-producer single-consumer sample ring.
//
// Carries decoded audio from a clip's audio worker to the output callback.
// Planar layout: one f32 plane per channel, all planes indexed by the same
// pair of frame pointers. The control plane is four 32-bit atomics:
//
//   [write_ptr, read_ptr, channels, playing]
//
// write_ptr is only ever stored by the writer, read_ptr only by the reader,
// both with Release; each side loads the other's pointer with Acquire. No
// locks, no waits — the output callback runs in a realtime context.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Default ring capacity in frames (~0.5 s at 48 kHz).
pub const DEFAULT_RING_FRAMES: u32 = 24_000;

struct Control {
    write_ptr: AtomicU32,
    read_ptr:  AtomicU32,
    channels:  AtomicU32,
    playing:   AtomicU32,
}

/// Shared ring storage. Constructed once, then split into the two handles.
pub struct SampleRing {
    planes:   Vec<Box<[UnsafeCell<f32>]>>,
    control:  Control,
    capacity: u32,
}

// SAFETY: SPSC discipline. The writer only writes frames in
// [write_ptr, write_ptr + n) after confirming they are free, and publishes
// them with a Release store of write_ptr; the reader mirrors this for
// read_ptr. No frame is ever accessed by both sides at once.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    /// Allocate a ring holding `capacity` frames of `channels` channels.
    ///
    /// One frame of capacity is sacrificed to distinguish full from empty.
    pub fn new(channels: u32, capacity: u32) -> Self {
        let channels = channels.max(1);
        let capacity = capacity.max(2);
        let planes = (0..channels)
            .map(|_| {
                (0..capacity)
                    .map(|_| UnsafeCell::new(0.0f32))
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();
        Self {
            planes,
            control: Control {
                write_ptr: AtomicU32::new(0),
                read_ptr:  AtomicU32::new(0),
                channels:  AtomicU32::new(channels),
                playing:   AtomicU32::new(0),
            },
            capacity,
        }
    }

    pub fn split(self) -> (RingWriter, RingReader) {
        let shared = Arc::new(self);
        (
            RingWriter { inner: Arc::clone(&shared), overruns: 0 },
            RingReader { inner: shared, underruns: 0 },
        )
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn channels(&self) -> u32 {
        self.control.channels.load(Ordering::Relaxed)
    }

    fn occupancy(&self) -> u32 {
        let w = self.control.write_ptr.load(Ordering::Acquire);
        let r = self.control.read_ptr.load(Ordering::Acquire);
        (w + self.capacity - r) % self.capacity
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Producer handle. Exactly one exists per ring; owned by the audio worker.
pub struct RingWriter {
    inner: Arc<SampleRing>,
    /// Writes that found the ring too full to take everything.
    overruns: u64,
}

// SAFETY: the writer is the sole owner of write_ptr and of the frames it
// claims before publishing them.
unsafe impl Send for RingWriter {}

impl RingWriter {
    /// Copy up to `frames` frames from `channels` into the ring.
    ///
    /// `channels` holds one slice per plane; extra source planes are ignored
    /// and missing ones are duplicated from plane 0 (mono fan-out). Returns
    /// the number of frames actually written — less than `frames` when the
    /// ring is nearly full. Never blocks.
    pub fn write(&mut self, channels: &[&[f32]], frames: usize) -> usize {
        if channels.is_empty() || frames == 0 {
            return 0;
        }
        let cap = self.inner.capacity;
        let w = self.inner.control.write_ptr.load(Ordering::Relaxed);
        let r = self.inner.control.read_ptr.load(Ordering::Acquire);
        let free = (cap - 1) - ((w + cap - r) % cap);
        let n = (frames as u32).min(free);
        if n < frames as u32 {
            self.overruns += 1;
        }

        for (plane_idx, plane) in self.inner.planes.iter().enumerate() {
            let src = channels.get(plane_idx).unwrap_or(&channels[0]);
            for i in 0..n {
                let idx = ((w + i) % cap) as usize;
                let sample = src.get(i as usize).copied().unwrap_or(0.0);
                // SAFETY: frames [w, w+n) are free — see occupancy check above.
                unsafe { *plane[idx].get() = sample; }
            }
        }

        self.inner
            .control
            .write_ptr
            .store((w + n) % cap, Ordering::Release);
        n as usize
    }

    /// Number of frames the ring can currently accept.
    pub fn free(&self) -> usize {
        (self.inner.capacity - 1 - self.inner.occupancy()) as usize
    }

    /// Writes that could not take all their frames (ring full).
    pub fn overrun_count(&self) -> u64 {
        self.overruns
    }

    /// Gate the reader's output. While false the reader emits silence and
    /// consumes nothing.
    pub fn set_playing(&self, playing: bool) {
        self.inner
            .control
            .playing
            .store(playing as u32, Ordering::Release);
    }

    /// Reset both pointers. Only safe between play sessions, when the
    /// reader is gated off and the output callback cannot be mid-read.
    pub fn clear(&mut self) {
        self.inner.control.read_ptr.store(0, Ordering::Release);
        self.inner.control.write_ptr.store(0, Ordering::Release);
    }

    pub fn channels(&self) -> u32 {
        self.inner.channels()
    }

    pub fn capacity(&self) -> u32 {
        self.inner.capacity()
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Consumer handle. Exactly one exists per ring; driven by the output
/// callback on the realtime audio thread.
pub struct RingReader {
    inner: Arc<SampleRing>,
    /// Reads that had to pad with silence.
    underruns: u64,
}

// SAFETY: the reader is the sole owner of read_ptr and only reads frames
// the writer has published.
unsafe impl Send for RingReader {}

impl RingReader {
    /// Fill `out` (one slice per channel, all the same length) from the ring.
    ///
    /// Returns the number of frames copied from the ring; the remainder of
    /// every output plane is zero-filled (silence on underrun). When the
    /// ring is not playing, everything is silence and nothing is consumed.
    pub fn read(&mut self, out: &mut [&mut [f32]]) -> usize {
        let frames = out.first().map(|p| p.len()).unwrap_or(0);
        if frames == 0 {
            return 0;
        }
        if self.inner.control.playing.load(Ordering::Acquire) == 0 {
            for plane in out.iter_mut() {
                plane.fill(0.0);
            }
            return 0;
        }

        let cap = self.inner.capacity;
        let r = self.inner.control.read_ptr.load(Ordering::Relaxed);
        let w = self.inner.control.write_ptr.load(Ordering::Acquire);
        let available = (w + cap - r) % cap;
        let n = (frames as u32).min(available);
        if n < frames as u32 {
            self.underruns += 1;
        }

        for (plane_idx, plane_out) in out.iter_mut().enumerate() {
            // A mono ring feeding a stereo callback duplicates plane 0.
            let plane = self
                .inner
                .planes
                .get(plane_idx)
                .unwrap_or(&self.inner.planes[0]);
            for i in 0..n {
                let idx = ((r + i) % cap) as usize;
                // SAFETY: frames [r, r+n) were published by the writer.
                plane_out[i as usize] = unsafe { *plane[idx].get() };
            }
            plane_out[n as usize..].fill(0.0);
        }

        self.inner
            .control
            .read_ptr
            .store((r + n) % cap, Ordering::Release);
        n as usize
    }

    /// Frames currently buffered.
    pub fn available(&self) -> usize {
        self.inner.occupancy() as usize
    }

    /// Reads that ran dry and padded with silence.
    pub fn underrun_count(&self) -> u64 {
        self.underruns
    }

    pub fn is_playing(&self) -> bool {
        self.inner.control.playing.load(Ordering::Acquire) != 0
    }

    pub fn channels(&self) -> u32 {
        self.inner.channels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(frames: u32) -> (RingWriter, RingReader) {
        SampleRing::new(2, frames).split()
    }

    fn read_frames(reader: &mut RingReader, frames: usize) -> (Vec<f32>, Vec<f32>, usize) {
        let mut l = vec![0.0f32; frames];
        let mut r = vec![0.0f32; frames];
        let n = reader.read(&mut [&mut l, &mut r]);
        (l, r, n)
    }

    #[test]
    fn silent_until_playing() {
        let (mut w, mut r) = ring(16);
        let left = [0.5f32; 4];
        let right = [0.25f32; 4];
        assert_eq!(w.write(&[&left, &right], 4), 4);

        let (l, _, n) = read_frames(&mut r, 4);
        assert_eq!(n, 0);
        assert!(l.iter().all(|&v| v == 0.0));

        w.set_playing(true);
        let (l, rr, n) = read_frames(&mut r, 4);
        assert_eq!(n, 4);
        assert!(l.iter().all(|&v| v == 0.5));
        assert!(rr.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn underrun_pads_with_silence() {
        let (mut w, mut r) = ring(16);
        w.set_playing(true);
        let samples = [1.0f32; 3];
        w.write(&[&samples, &samples], 3);

        let (l, _, n) = read_frames(&mut r, 8);
        assert_eq!(n, 3);
        assert!(l[..3].iter().all(|&v| v == 1.0));
        assert!(l[3..].iter().all(|&v| v == 0.0));
        assert_eq!(r.underrun_count(), 1);
    }

    #[test]
    fn full_ring_takes_partial_writes() {
        // Capacity 8 stores at most 7 frames (one-slot gap).
        let (mut w, mut r) = ring(8);
        w.set_playing(true);
        let chunk = [1.0f32; 10];
        assert_eq!(w.write(&[&chunk, &chunk], 10), 7);
        assert_eq!(w.free(), 0);
        assert_eq!(w.write(&[&chunk, &chunk], 1), 0);

        read_frames(&mut r, 4);
        assert_eq!(w.free(), 4);
        assert_eq!(w.write(&[&chunk, &chunk], 10), 4);
        assert_eq!(w.overrun_count(), 3);
    }

    #[test]
    fn read_sequence_is_prefix_of_written_sequence() {
        // Interleave writes and reads across a wrapping ring and check the
        // reader observes exactly the written sequence, in order.
        let (mut w, mut r) = ring(16);
        w.set_playing(true);

        let mut next = 0f32;
        let mut seen = Vec::new();
        for step in 0..200usize {
            let burst = 1 + (step % 5);
            let chunk: Vec<f32> = (0..burst).map(|i| next + i as f32).collect();
            let wrote = w.write(&[&chunk, &chunk], chunk.len());
            next += wrote as f32;

            let mut l = vec![0.0f32; 1 + (step % 7)];
            let mut rr = vec![0.0f32; l.len()];
            let n = r.read(&mut [&mut l, &mut rr]);
            seen.extend_from_slice(&l[..n]);
        }

        for (i, &v) in seen.iter().enumerate() {
            assert_eq!(v, i as f32);
        }
    }

    #[test]
    fn clear_resets_between_sessions() {
        let (mut w, mut r) = ring(8);
        w.set_playing(true);
        let chunk = [1.0f32; 5];
        w.write(&[&chunk, &chunk], 5);
        read_frames(&mut r, 2);

        w.set_playing(false);
        w.clear();
        assert_eq!(r.available(), 0);
        assert_eq!(w.free(), 7);
    }

    #[test]
    fn cross_thread_stream_survives_wraparound() {
        let (mut w, mut r) = ring(64);
        w.set_playing(true);
        const TOTAL: usize = 10_000;

        let writer = std::thread::spawn(move || {
            let mut next = 0usize;
            while next < TOTAL {
                let burst: Vec<f32> = (next..(next + 17).min(TOTAL))
                    .map(|v| v as f32)
                    .collect();
                let wrote = w.write(&[&burst, &burst], burst.len());
                next += wrote;
                if wrote == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut seen = Vec::with_capacity(TOTAL);
        while seen.len() < TOTAL {
            let mut l = vec![0.0f32; 13];
            let mut rr = vec![0.0f32; 13];
            let n = r.read(&mut [&mut l, &mut rr]);
            seen.extend_from_slice(&l[..n]);
            if n == 0 {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();

        for (i, &v) in seen.iter().enumerate() {
            assert_eq!(v, i as f32);
        }
    }
}
