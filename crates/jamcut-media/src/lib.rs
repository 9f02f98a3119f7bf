// crates/jamcut-media/src/lib.rs

use std::sync::Once;

static FFMPEG_INIT: Once = Once::new();

/// Register ffmpeg's codecs/formats once per process. Every blob-opening
/// entry point calls this; repeat calls are free.
pub fn ensure_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_the_third::init() {
            eprintln!("[media] ffmpeg init failed: {e}");
        }
    });
}

pub mod audio_decode;
pub mod audio_worker;
pub mod demux;
pub mod probe;
pub mod record;
pub mod source;
pub mod storage;
pub mod video_decode;
pub mod video_worker;

pub use audio_worker::AudioWorker;
pub use probe::ProbeInfo;
pub use record::{RecordSpec, Recorder};
pub use source::{AudioSource, FrameSource, SineSource, SourceFrame, TestPatternSource};
pub use storage::{BlobStore, BlobWriter};
pub use video_worker::VideoWorker;
