// crates/jamcut-core/src/lib.rs

pub mod effects;
pub mod engine_types;
pub mod helpers;
pub mod pixel;
pub mod project;
pub mod realtime;
pub mod timeline;

pub use engine_types::{
    AudioChunk, CapturedAudio, CapturedFrame, EngineFrame, RecordingResult, RenderStats,
};
pub use helpers::geometry::Viewport;
pub use project::{CanvasSize, Clip, ClipSource, LayoutMode, Project, Track};
pub use realtime::{EncoderLoad, RingReader, RingWriter, SampleRing};
pub use timeline::{compile, CompiledTimeline, LayoutSegment, Placement, PREVIEW_CLIP_ID};
