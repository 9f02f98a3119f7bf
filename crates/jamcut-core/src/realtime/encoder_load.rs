// crates/jamcut-core/src/realtime/encoder_load.rs
//
// Cross-worker back-pressure flag: one shared 32-bit word, written by the
// recorder's muxer, read by every video decoder.
//
// The muxer reports its encoder queue depth on every enqueue; decoders ask
// should_skip_delta_frames() before each non-keyframe decode. Hysteresis
// keeps the flag from thrashing around the threshold. Keyframes are never
// skipped regardless of the flag — a decoder must stay recoverable.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const IDLE: u32 = 0;
const BUSY: u32 = 1;

/// Queue depth above which the flag flips to busy.
const ENTER_BUSY_DEPTH: usize = 5;
/// Queue depth below which the flag returns to idle.
const EXIT_BUSY_DEPTH: usize = 2;

/// Cloneable handle to the shared scheduler word.
#[derive(Clone)]
pub struct EncoderLoad {
    word: Arc<AtomicU32>,
}

impl Default for EncoderLoad {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderLoad {
    pub fn new() -> Self {
        Self { word: Arc::new(AtomicU32::new(IDLE)) }
    }

    /// Recorder view: called by the muxer on every enqueue with the current
    /// encoder queue depth.
    pub fn observe_queue_depth(&self, depth: usize) {
        let busy = self.word.load(Ordering::Acquire) == BUSY;
        if !busy && depth > ENTER_BUSY_DEPTH {
            self.word.store(BUSY, Ordering::Release);
        } else if busy && depth < EXIT_BUSY_DEPTH {
            self.word.store(IDLE, Ordering::Release);
        }
    }

    /// Playback view: true while the encoder is saturated. Video decoders
    /// drop their next delta frame when this is set; never keyframes.
    pub fn should_skip_delta_frames(&self) -> bool {
        self.word.load(Ordering::Acquire) == BUSY
    }

    /// Unconditional return to idle. Called when recording stops.
    pub fn reset(&self) {
        self.word.store(IDLE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_flag_sequence() {
        let load = EncoderLoad::new();
        let depths = [1, 3, 6, 7, 4, 2, 1];
        let expected = [false, false, true, true, true, true, false];
        for (depth, want) in depths.iter().zip(expected) {
            load.observe_queue_depth(*depth);
            assert_eq!(
                load.should_skip_delta_frames(),
                want,
                "depth {depth}"
            );
        }
    }

    #[test]
    fn busy_requires_strictly_more_than_enter_threshold() {
        let load = EncoderLoad::new();
        load.observe_queue_depth(5);
        assert!(!load.should_skip_delta_frames());
        load.observe_queue_depth(6);
        assert!(load.should_skip_delta_frames());
        // Depth 2 is not < 2 — stays busy.
        load.observe_queue_depth(2);
        assert!(load.should_skip_delta_frames());
        load.observe_queue_depth(1);
        assert!(!load.should_skip_delta_frames());
    }

    #[test]
    fn reset_clears_busy_immediately() {
        let load = EncoderLoad::new();
        load.observe_queue_depth(10);
        assert!(load.should_skip_delta_frames());
        load.reset();
        assert!(!load.should_skip_delta_frames());
    }

    #[test]
    fn clones_share_the_word() {
        let recorder_view = EncoderLoad::new();
        let playback_view = recorder_view.clone();
        recorder_view.observe_queue_depth(9);
        assert!(playback_view.should_skip_delta_frames());
    }
}
