// crates/jamcut-core/src/project.rs
// Pure project data — no ffmpeg, no cpal, no runtime handles.
// Serializable via serde. This is the engine's only input contract with the
// editing side: the coordinator reads a snapshot of this and compiles it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::helpers::time::ticks_to_secs;

/// Output surface size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width:  u32,
    pub height: u32,
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// Viewport arrangement a layout clip imposes on its slotted tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// `columns × rows` cells, slots fill row-major.
    Grid,
    /// Every slot gets the full parent viewport (stacked; topmost wins).
    Focus,
    /// First slot full-frame, second slot inset bottom-right.
    Pip,
    /// Horizontal even division across all slots.
    Split,
    /// Any mode this build does not know. Degrades to `Focus` at compile
    /// time so newer project files still render.
    #[serde(other)]
    Unknown,
}

/// What a clip points at.
///
/// `Url` and `Stem` clips both resolve to a media blob stored under the
/// clip's own id — `Url` additionally records where the blob was fetched
/// from. `Layout` clips carry no media; they live on metadata tracks and
/// define viewports for other tracks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClipSource {
    Url {
        url: String,
    },
    Stem,
    Layout {
        mode:    LayoutMode,
        columns: u32,
        rows:    u32,
        /// Track ids occupying the layout's slots, in slot order.
        slots:   Vec<Uuid>,
    },
}

/// One clip on a track.
///
/// `start` and `duration` are in milliseconds for absolute projects and in
/// musical ticks when the project carries `bpm`/`ppq`. The compiler
/// normalizes both to seconds via [`Project::to_secs`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Clip {
    pub id:    Uuid,
    pub start: f64,
    /// Missing duration means "unknown until probed" — the coordinator
    /// fills in a `duration_hint` once the blob has been opened, and the
    /// compiler reads that. The clip's own value is always authoritative
    /// when present.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub source: ClipSource,
    /// Seconds into the source media at which playback of this clip begins.
    #[serde(default)]
    pub offset: f64,
    /// Playback rate. 1.0 = realtime.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Probed media duration in the project's time unit. Runtime-only.
    #[serde(skip)]
    pub duration_hint: Option<f64>,
    /// Per-clip visual effects, applied before the track's pipeline.
    #[serde(default)]
    pub visual_pipeline: Option<Pipeline>,
}

fn default_speed() -> f64 { 1.0 }

impl Clip {
    pub fn media(id: Uuid, start: f64, duration: f64) -> Self {
        Self {
            id,
            start,
            duration:        Some(duration),
            source:          ClipSource::Stem,
            offset:          0.0,
            speed:           1.0,
            duration_hint:   None,
            visual_pipeline: None,
        }
    }

    pub fn layout(
        id:      Uuid,
        start:   f64,
        duration: f64,
        mode:    LayoutMode,
        columns: u32,
        rows:    u32,
        slots:   Vec<Uuid>,
    ) -> Self {
        Self {
            id,
            start,
            duration: Some(duration),
            source: ClipSource::Layout { mode, columns, rows, slots },
            offset: 0.0,
            speed: 1.0,
            duration_hint: None,
            visual_pipeline: None,
        }
    }

    pub fn is_layout(&self) -> bool {
        matches!(self.source, ClipSource::Layout { .. })
    }

    /// Duration in project units, falling back to the probed hint.
    /// `None` when neither is known yet — such clips compile to nothing.
    pub fn resolved_duration(&self) -> Option<f64> {
        self.duration.or(self.duration_hint)
    }
}

/// One parameter of one effect. Values are normalized to [0, 1] scalars or
/// small vectors before they reach the engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EffectValue {
    Scalar(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
}

impl EffectValue {
    /// Clamp every component to [0, 1].
    pub fn normalized(self) -> Self {
        match self {
            Self::Scalar(v)  => Self::Scalar(v.clamp(0.0, 1.0)),
            Self::Vec2(v)    => Self::Vec2(v.map(|c| c.clamp(0.0, 1.0))),
            Self::Vec3(v)    => Self::Vec3(v.map(|c| c.clamp(0.0, 1.0))),
        }
    }

    /// Scalar view; vector values report their first component.
    pub fn scalar(self) -> f32 {
        match self {
            Self::Scalar(v) => v,
            Self::Vec2(v)   => v[0],
            Self::Vec3(v)   => v[0],
        }
    }
}

/// One effect in a pipeline: a kind string the chain compiler understands
/// ("gain", "pan", "brightness", …) plus its parameters in declaration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub kind:   String,
    /// (param_key, value) pairs. Order matters: it is the chain's control
    /// table order and survives into the compiled placement refs.
    #[serde(default)]
    pub params: Vec<(String, EffectValue)>,
}

impl Effect {
    pub fn new(kind: &str, params: &[(&str, EffectValue)]) -> Self {
        Self {
            kind:   kind.to_string(),
            params: params.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

/// Ordered effect list attached to a clip, track, or group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub effects: Vec<Effect>,
}

/// An ordered collection of clips plus its audio/visual pipelines.
/// Tracks are pure configuration — they own no playback state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub id:    Uuid,
    pub name:  String,
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub audio_pipeline:  Option<Pipeline>,
    #[serde(default)]
    pub visual_pipeline: Option<Pipeline>,
    /// Parent group; `None` parents the track to the root group.
    #[serde(default)]
    pub group: Option<Uuid>,
}

impl Track {
    pub fn new(name: &str) -> Self {
        Self {
            id:              Uuid::new_v4(),
            name:            name.to_string(),
            clips:           Vec::new(),
            audio_pipeline:  None,
            visual_pipeline: None,
            group:           None,
        }
    }
}

/// A group of tracks with its own pipelines. The root group (the one with
/// no parent) acts as the master bus. Missing parent references are treated
/// as "parented to root".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    pub id:     Uuid,
    pub name:   String,
    #[serde(default)]
    pub parent: Option<Uuid>,
    #[serde(default)]
    pub audio_pipeline:  Option<Pipeline>,
    #[serde(default)]
    pub visual_pipeline: Option<Pipeline>,
}

/// The whole project. This is a pure input: the engine never mutates it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub canvas: CanvasSize,
    pub media_tracks: Vec<Track>,
    /// Tracks whose clips are layout descriptors, not media.
    #[serde(default)]
    pub metadata_tracks: Vec<Track>,
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Beats per minute × 100 (120 BPM is stored as 12000). Present together
    /// with `ppq` on musical projects; clip times are then in ticks.
    #[serde(default)]
    pub bpm: Option<u32>,
    /// Pulses (ticks) per quarter note.
    #[serde(default)]
    pub ppq: Option<u32>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            canvas:          CanvasSize::default(),
            media_tracks:    Vec::new(),
            metadata_tracks: Vec::new(),
            groups:          Vec::new(),
            bpm:             None,
            ppq:             None,
        }
    }
}

impl Project {
    /// True when clip times are musical ticks rather than milliseconds.
    pub fn is_musical(&self) -> bool {
        self.bpm.is_some() && self.ppq.is_some()
    }

    /// Convert a clip time value (ms or ticks) to seconds.
    pub fn to_secs(&self, value: f64) -> f64 {
        match (self.bpm, self.ppq) {
            (Some(bpm), Some(ppq)) => ticks_to_secs(value, bpm, ppq),
            _ => value / 1000.0,
        }
    }

    /// Convert seconds back to this project's time unit (ms or ticks).
    pub fn from_secs(&self, secs: f64) -> f64 {
        match (self.bpm, self.ppq) {
            (Some(bpm), Some(ppq)) => {
                crate::helpers::time::secs_to_ticks(secs, bpm, ppq)
            }
            _ => secs * 1000.0,
        }
    }

    pub fn track(&self, id: Uuid) -> Option<&Track> {
        self.media_tracks.iter()
            .chain(self.metadata_tracks.iter())
            .find(|t| t.id == id)
    }

    pub fn group(&self, id: Uuid) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// The group with no parent, when one exists. Acts as the master bus.
    pub fn root_group(&self) -> Option<&Group> {
        self.groups.iter().find(|g| g.parent.is_none())
    }

    /// Walk `group → parent → … → root`, yielding each group once.
    /// Cycles and dangling parents terminate the walk (treated as absent).
    pub fn group_chain(&self, start: Option<Uuid>) -> Vec<&Group> {
        let mut chain = Vec::new();
        let mut next = start;
        while let Some(id) = next {
            if chain.iter().any(|g: &&Group| g.id == id) {
                break; // cycle guard
            }
            match self.group(id) {
                Some(g) => {
                    next = g.parent;
                    chain.push(g);
                }
                None => break,
            }
        }
        // Root group closes every chain, even when the walk started at None.
        if let Some(root) = self.root_group() {
            if !chain.iter().any(|g| g.id == root.id) {
                chain.push(root);
            }
        }
        chain
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_times_convert_from_milliseconds() {
        let p = Project::default();
        assert!((p.to_secs(1500.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn musical_times_convert_from_ticks() {
        // 120 BPM stored as 12000, 960 PPQ: 3840 ticks = 4 beats = 2.0 s.
        let p = Project {
            bpm: Some(12_000),
            ppq: Some(960),
            ..Project::default()
        };
        assert!((p.to_secs(3840.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn group_chain_walks_to_root_and_breaks_cycles() {
        let root = Group {
            id: Uuid::new_v4(), name: "root".into(), parent: None,
            audio_pipeline: None, visual_pipeline: None,
        };
        let mid = Group {
            id: Uuid::new_v4(), name: "mid".into(), parent: Some(root.id),
            audio_pipeline: None, visual_pipeline: None,
        };
        let p = Project {
            groups: vec![root.clone(), mid.clone()],
            ..Project::default()
        };
        let chain = p.group_chain(Some(mid.id));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, mid.id);
        assert_eq!(chain[1].id, root.id);

        // A track with no group still cascades through root.
        let chain = p.group_chain(None);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].id, root.id);
    }

    #[test]
    fn project_json_round_trip() {
        let mut track = Track::new("cam A");
        track.clips.push(Clip::media(Uuid::new_v4(), 0.0, 1000.0));
        let p = Project { media_tracks: vec![track], ..Project::default() };
        let json = p.to_json().unwrap();
        let back = Project::from_json(&json).unwrap();
        assert_eq!(back.media_tracks.len(), 1);
        assert_eq!(back.media_tracks[0].clips.len(), 1);
    }

    #[test]
    fn unknown_layout_fields_round_trip() {
        let clip = Clip::layout(
            Uuid::new_v4(), 0.0, 4000.0,
            LayoutMode::Grid, 2, 2,
            vec![Uuid::new_v4(), Uuid::new_v4()],
        );
        let json = serde_json::to_string(&clip).unwrap();
        let back: Clip = serde_json::from_str(&json).unwrap();
        assert!(back.is_layout());
    }
}
