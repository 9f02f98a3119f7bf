// crates/jamcut-media/src/source.rs
//
// Live-source abstraction: what the capture worker records and what the
// compositor's preview path reads. A source paces itself — next_frame()
// blocks until the next frame is due — so the capture loop needs no timer
// of its own.
//
// The synthetic implementations exist so recording and preview are
// exercisable without camera hardware: a moving test pattern and a sine
// generator, both optionally unpaced for tests.

use std::time::{Duration, Instant};

/// One RGBA frame pulled from a live source.
pub struct SourceFrame {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

pub trait FrameSource: Send {
    /// Block until the next frame is due and return it; `None` ends the
    /// stream.
    fn next_frame(&mut self) -> Option<SourceFrame>;
}

pub trait AudioSource: Send {
    fn rate(&self) -> u32;
    /// Block until the next chunk is due and return its planes; `None`
    /// ends the stream.
    fn next_chunk(&mut self) -> Option<Vec<Vec<f32>>>;
}

// ── Test pattern ──────────────────────────────────────────────────────────────

/// Scrolling gradient with a frame counter baked into the top-left block.
pub struct TestPatternSource {
    width:  u32,
    height: u32,
    fps:    u32,
    index:  u64,
    limit:  Option<u64>,
    paced:  bool,
    next_due: Option<Instant>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            index: 0,
            limit: None,
            paced: true,
            next_due: None,
        }
    }

    /// End the stream after `frames` frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Generate as fast as the consumer pulls. Test use.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Option<SourceFrame> {
        if let Some(limit) = self.limit {
            if self.index >= limit {
                return None;
            }
        }
        if self.paced {
            let interval = Duration::from_secs_f64(1.0 / self.fps as f64);
            let due = self.next_due.unwrap_or_else(Instant::now);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
            self.next_due = Some(due + interval);
        }

        let shift = (self.index * 4) as u32;
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x + shift) % 256) as u8);
                data.push((y % 256) as u8);
                data.push(((x + y + shift) % 256) as u8);
                data.push(255);
            }
        }
        // Frame counter block so successive frames always differ.
        let marker = (self.index % 256) as u8;
        for y in 0..8.min(self.height) {
            for x in 0..8.min(self.width) {
                let i = ((y * self.width + x) * 4) as usize;
                data[i] = marker;
                data[i + 1] = marker;
                data[i + 2] = marker;
            }
        }

        self.index += 1;
        Some(SourceFrame { width: self.width, height: self.height, data })
    }
}

// ── Sine generator ────────────────────────────────────────────────────────────

/// Stereo sine at a fixed frequency, emitted in fixed-size chunks.
pub struct SineSource {
    rate:  u32,
    freq:  f64,
    chunk_frames: usize,
    phase: f64,
    emitted: u64,
    limit:   Option<u64>,
    paced:   bool,
    next_due: Option<Instant>,
}

impl SineSource {
    pub fn new(rate: u32, freq: f64, chunk_frames: usize) -> Self {
        Self {
            rate: rate.max(1),
            freq,
            chunk_frames: chunk_frames.max(1),
            phase: 0.0,
            emitted: 0,
            limit: None,
            paced: true,
            next_due: None,
        }
    }

    /// End the stream after `chunks` chunks.
    pub fn with_chunk_limit(mut self, chunks: u64) -> Self {
        self.limit = Some(chunks);
        self
    }

    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl AudioSource for SineSource {
    fn rate(&self) -> u32 {
        self.rate
    }

    fn next_chunk(&mut self) -> Option<Vec<Vec<f32>>> {
        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                return None;
            }
        }
        if self.paced {
            let interval =
                Duration::from_secs_f64(self.chunk_frames as f64 / self.rate as f64);
            let due = self.next_due.unwrap_or_else(Instant::now);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
            self.next_due = Some(due + interval);
        }

        let step = 2.0 * std::f64::consts::PI * self.freq / self.rate as f64;
        let mut plane = Vec::with_capacity(self.chunk_frames);
        for _ in 0..self.chunk_frames {
            plane.push((self.phase.sin() * 0.5) as f32);
            self.phase += step;
        }
        self.emitted += 1;
        Some(vec![plane.clone(), plane])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_frames_differ_and_respect_limit() {
        let mut src = TestPatternSource::new(16, 16, 30).unpaced().with_frame_limit(3);
        let a = src.next_frame().unwrap();
        let b = src.next_frame().unwrap();
        assert_eq!(a.data.len(), 16 * 16 * 4);
        assert_ne!(a.data, b.data);
        assert!(src.next_frame().is_some());
        assert!(src.next_frame().is_none());
    }

    #[test]
    fn sine_chunks_are_stereo_and_continuous() {
        let mut src = SineSource::new(48_000, 440.0, 256).unpaced().with_chunk_limit(2);
        let first = src.next_chunk().unwrap();
        let second = src.next_chunk().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], first[1]);
        assert_eq!(first[0].len(), 256);
        // Phase carries across chunks — no restart at zero.
        assert_ne!(first[0][0], second[0][0]);
        assert!(src.next_chunk().is_none());
    }
}
