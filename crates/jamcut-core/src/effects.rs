// crates/jamcut-core/src/effects.rs
//
// Effect cascade: the compiler flattens clip → track → group → root effect
// lists into per-placement lookup coordinates, so the compositor can apply
// live parameter updates without re-walking the project.
//
// Key format is contractual: "sourceType:sourceId:effectIndex:paramKey".

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::project::{Clip, Effect, EffectValue, Project, Track};

/// Where an effect was declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectSourceKind {
    Clip,
    Track,
    Group,
}

impl EffectSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clip  => "clip",
            Self::Track => "track",
            Self::Group => "group",
        }
    }
}

/// One parameter's lookup coordinates, addressable from outside the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectRef {
    pub source:       EffectSourceKind,
    pub source_id:    Uuid,
    pub effect_index: usize,
    pub param_key:    String,
}

impl EffectRef {
    /// `"sourceType:sourceId:effectIndex:paramKey"`.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.source.as_str(),
            self.source_id,
            self.effect_index,
            self.param_key
        )
    }
}

/// One parameter's position inside the compositor's compiled chain, plus
/// its compile-time value. `chain_index` addresses the chain's control
/// array directly; the compositor never re-derives it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectParamRef {
    pub chain_index: usize,
    pub param_key:   String,
    /// The full ref key, matching the corresponding [`EffectRef`].
    pub ref_key:     String,
    pub initial:     EffectValue,
}

/// The flattened effect chain of one placement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectCascade {
    /// Chain signature: identical chains (same effect kinds in the same
    /// order) share a compiled chain in the compositor's cache.
    pub effect_id:         u64,
    /// Effect kinds in chain order — what the compositor compiles.
    pub effect_kinds:      Vec<String>,
    /// One key per effect, consecutive duplicates removed.
    pub effect_keys:       Vec<String>,
    /// One entry per parameter, in chain order.
    pub effect_refs:       Vec<EffectRef>,
    pub effect_param_refs: Vec<EffectParamRef>,
}

impl EffectCascade {
    pub fn is_empty(&self) -> bool {
        self.effect_kinds.is_empty()
    }
}

/// Signature over the effect-kind sequence. Parameter values are excluded:
/// two chains differing only in values compile to the same program.
pub fn chain_signature(kinds: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for kind in kinds {
        kind.hash(&mut hasher);
    }
    hasher.finish()
}

/// Compose the visual cascade for one clip: clip effects first, then its
/// track's, then each group's up to the root.
pub fn visual_cascade(project: &Project, track: &Track, clip: &Clip) -> EffectCascade {
    let mut sources: Vec<(EffectSourceKind, Uuid, &[Effect])> = Vec::new();

    if let Some(p) = &clip.visual_pipeline {
        sources.push((EffectSourceKind::Clip, clip.id, p.effects.as_slice()));
    }
    if let Some(p) = &track.visual_pipeline {
        sources.push((EffectSourceKind::Track, track.id, p.effects.as_slice()));
    }
    for group in project.group_chain(track.group) {
        if let Some(p) = &group.visual_pipeline {
            sources.push((EffectSourceKind::Group, group.id, p.effects.as_slice()));
        }
    }

    build_cascade(&sources)
}

fn build_cascade(sources: &[(EffectSourceKind, Uuid, &[Effect])]) -> EffectCascade {
    let mut cascade = EffectCascade::default();
    let mut chain_index = 0usize;

    for (source, source_id, effects) in sources {
        for (effect_index, effect) in effects.iter().enumerate() {
            let effect_key = format!(
                "{}:{}:{}:{}",
                source.as_str(),
                source_id,
                effect_index,
                effect.kind
            );
            // Consecutive-match dedup: repeated identical declarations
            // collapse to one chain entry.
            if cascade.effect_keys.last() == Some(&effect_key) {
                continue;
            }

            for (param_key, value) in &effect.params {
                let eref = EffectRef {
                    source:       *source,
                    source_id:    *source_id,
                    effect_index,
                    param_key:    param_key.clone(),
                };
                cascade.effect_param_refs.push(EffectParamRef {
                    chain_index,
                    param_key: param_key.clone(),
                    ref_key:   eref.key(),
                    initial:   value.normalized(),
                });
                cascade.effect_refs.push(eref);
            }

            cascade.effect_kinds.push(effect.kind.clone());
            cascade.effect_keys.push(effect_key);
            chain_index += 1;
        }
    }

    cascade.effect_id = chain_signature(&cascade.effect_kinds);
    cascade
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Group, Pipeline};

    fn effect(kind: &str, params: &[(&str, f32)]) -> Effect {
        Effect {
            kind: kind.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), EffectValue::Scalar(*v)))
                .collect(),
        }
    }

    fn pipeline(effects: Vec<Effect>) -> Option<Pipeline> {
        Some(Pipeline { effects })
    }

    #[test]
    fn cascade_orders_clip_track_group() {
        let group = Group {
            id: Uuid::new_v4(), name: "root".into(), parent: None,
            audio_pipeline: None,
            visual_pipeline: pipeline(vec![effect("saturation", &[("amount", 0.5)])]),
        };
        let mut track = Track::new("T");
        track.visual_pipeline = pipeline(vec![effect("contrast", &[("amount", 0.3)])]);
        let mut clip = Clip::media(Uuid::new_v4(), 0.0, 1000.0);
        clip.visual_pipeline = pipeline(vec![effect("brightness", &[("amount", 0.8)])]);

        let project = Project { groups: vec![group], ..Project::default() };
        let cascade = visual_cascade(&project, &track, &clip);

        assert_eq!(cascade.effect_kinds, ["brightness", "contrast", "saturation"]);
        assert_eq!(cascade.effect_param_refs.len(), 3);
        assert_eq!(cascade.effect_param_refs[1].chain_index, 1);
        assert!(cascade.effect_keys[0].starts_with("clip:"));
        assert!(cascade.effect_keys[2].starts_with("group:"));
    }

    #[test]
    fn signature_depends_on_kinds_not_values() {
        let a = chain_signature(&["gain".into(), "pan".into()]);
        let b = chain_signature(&["gain".into(), "pan".into()]);
        let c = chain_signature(&["pan".into(), "gain".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn param_values_are_normalized() {
        let mut track = Track::new("T");
        track.visual_pipeline = pipeline(vec![effect("brightness", &[("amount", 1.7)])]);
        let clip = Clip::media(Uuid::new_v4(), 0.0, 1000.0);
        let project = Project::default();

        let cascade = visual_cascade(&project, &track, &clip);
        assert_eq!(
            cascade.effect_param_refs[0].initial,
            EffectValue::Scalar(1.0)
        );
    }

    #[test]
    fn ref_key_format_is_contractual() {
        let id = Uuid::new_v4();
        let eref = EffectRef {
            source: EffectSourceKind::Track,
            source_id: id,
            effect_index: 2,
            param_key: "gain".into(),
        };
        assert_eq!(eref.key(), format!("track:{id}:2:gain"));
    }
}
