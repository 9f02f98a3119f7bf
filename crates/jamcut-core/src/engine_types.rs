// crates/jamcut-core/src/engine_types.rs
//
// Types that flow across channels between the workers and the engine.
// No ffmpeg, no cpal — just plain data.

use uuid::Uuid;

/// A decoded RGBA frame travelling from a video worker to the compositor.
///
/// Frames are explicit resources on the worker side (decoder memory); by
/// the time one crosses the channel it is an owned pixel buffer, so a
/// receiver that drops it has released everything there is to release.
pub struct EngineFrame {
    pub clip_id:   Uuid,
    /// Presentation time in seconds, source-local.
    pub timestamp: f64,
    /// Nominal display duration in seconds (frame interval).
    pub duration:  f64,
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>, // RGBA
}

impl EngineFrame {
    /// End of this frame's display window. A renderer re-showing the same
    /// timestamp past this instant is showing a stale frame.
    pub fn end(&self) -> f64 {
        self.timestamp + self.duration
    }
}

/// One decoded audio unit: planar f32, tagged with its media time.
pub struct AudioChunk {
    /// Media time of the first sample, in seconds.
    pub media_time: f64,
    pub rate:   u32,
    pub planes: Vec<Vec<f32>>,
}

impl AudioChunk {
    pub fn frames(&self) -> usize {
        self.planes.first().map(|p| p.len()).unwrap_or(0)
    }

    /// Media time just past the last sample.
    pub fn end_time(&self) -> f64 {
        self.media_time + self.frames() as f64 / self.rate.max(1) as f64
    }
}

/// Per-render accounting returned by the compositor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Placements the timeline asked for.
    pub expected: u32,
    /// Placements that had a frame and were drawn.
    pub rendered: u32,
    /// Placements skipped because no frame has arrived yet.
    pub dropped: u32,
    /// Frames re-shown past their display window — a fresh frame should
    /// have arrived but did not.
    pub stale: u32,
}

impl RenderStats {
    pub fn accumulate(&mut self, other: RenderStats) {
        self.expected += other.expected;
        self.rendered += other.rendered;
        self.dropped  += other.dropped;
        self.stale    += other.stale;
    }
}

/// A frame captured from a live source, on its way to the muxer.
pub struct CapturedFrame {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>, // RGBA
    /// Presentation offset in seconds relative to the first captured frame.
    pub pts_offset: f64,
}

/// Captured audio on its way to the muxer. Planar, like [`AudioChunk`],
/// but timed relative to the recording start.
pub struct CapturedAudio {
    pub rate:   u32,
    pub planes: Vec<Vec<f32>>,
    pub pts_offset: f64,
}

/// What the recorder hands back when a take finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingResult {
    /// Storage key of the finished blob — also the new project clip's id.
    pub clip_id: Uuid,
    pub frame_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_end_is_timestamp_plus_duration() {
        let f = EngineFrame {
            clip_id: Uuid::new_v4(),
            timestamp: 1.5,
            duration: 0.04,
            width: 2,
            height: 2,
            data: vec![0; 16],
        };
        assert!((f.end() - 1.54).abs() < 1e-9);
    }

    #[test]
    fn chunk_end_time_uses_rate() {
        let c = AudioChunk {
            media_time: 2.0,
            rate: 48_000,
            planes: vec![vec![0.0; 4800], vec![0.0; 4800]],
        };
        assert_eq!(c.frames(), 4800);
        assert!((c.end_time() - 2.1).abs() < 1e-9);
    }

    #[test]
    fn stats_accumulate() {
        let mut total = RenderStats::default();
        total.accumulate(RenderStats { expected: 2, rendered: 1, dropped: 1, stale: 0 });
        total.accumulate(RenderStats { expected: 3, rendered: 3, dropped: 0, stale: 1 });
        assert_eq!(total, RenderStats { expected: 5, rendered: 4, dropped: 1, stale: 1 });
    }
}
