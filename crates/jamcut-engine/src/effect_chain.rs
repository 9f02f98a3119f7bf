// crates/jamcut-engine/src/effect_chain.rs
//
// Software effect chains. The compiler hands every placement a chain
// signature plus per-param lookup coordinates; this module turns the kind
// list into an op program (cached by signature in the compositor) and
// resolves a control table per render from the placement's compile-time
// values plus any live overrides.

use std::collections::HashMap;

use jamcut_core::effects::EffectParamRef;
use jamcut_core::pixel;
use jamcut_core::project::EffectValue;

/// Ops this renderer knows. Unknown kinds compile to passthrough — a
/// project written by a newer editor still renders, just without the
/// effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChainOp {
    Brightness,
    Contrast,
    Saturation,
    Opacity,
    Passthrough,
}

impl ChainOp {
    fn from_kind(kind: &str) -> Self {
        match kind {
            "brightness" => Self::Brightness,
            "contrast"   => Self::Contrast,
            "saturation" => Self::Saturation,
            "opacity"    => Self::Opacity,
            _            => Self::Passthrough,
        }
    }

    /// Neutral value when no param is present in the control table.
    fn neutral(&self) -> f32 {
        match self {
            Self::Brightness | Self::Contrast => 0.5,
            Self::Saturation | Self::Opacity  => 1.0,
            Self::Passthrough => 0.0,
        }
    }
}

/// A compiled chain: the op program for one effect-kind sequence.
/// Parameter values are NOT part of the program — chains are shared by
/// every placement with the same signature.
pub struct CompiledChain {
    pub effect_id: u64,
    ops: Vec<ChainOp>,
}

impl CompiledChain {
    pub fn compile(effect_id: u64, kinds: &[String]) -> Self {
        Self {
            effect_id,
            ops: kinds.iter().map(|k| ChainOp::from_kind(k)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run the chain over a frame's pixels. Opacity does not touch the
    /// pixels — it is returned for the compositor to apply as the blit
    /// blend factor.
    pub fn apply(&self, rgba: &mut [u8], controls: &ControlTable) -> f32 {
        let mut opacity = 1.0f32;
        for (index, op) in self.ops.iter().enumerate() {
            let amount = controls.scalar(index, "amount", op.neutral());
            match op {
                ChainOp::Brightness => pixel::apply_brightness(rgba, amount),
                ChainOp::Contrast   => pixel::apply_contrast(rgba, amount),
                ChainOp::Saturation => pixel::apply_saturation(rgba, amount),
                ChainOp::Opacity    => opacity *= pixel::clamp01(amount),
                ChainOp::Passthrough => {}
            }
        }
        opacity
    }
}

/// Per-render parameter values, indexed by `(chain_index, param_key)`.
/// Built from a placement's compile-time refs, with live overrides (keyed
/// by the contractual ref string) taking precedence.
pub struct ControlTable {
    values: Vec<Vec<(String, EffectValue)>>,
}

impl ControlTable {
    pub fn resolve(
        param_refs: &[EffectParamRef],
        overrides:  &HashMap<String, EffectValue>,
        chain_len:  usize,
    ) -> Self {
        let mut values: Vec<Vec<(String, EffectValue)>> = vec![Vec::new(); chain_len];
        for pref in param_refs {
            if pref.chain_index >= chain_len {
                continue;
            }
            let value = overrides
                .get(&pref.ref_key)
                .copied()
                .unwrap_or(pref.initial)
                .normalized();
            values[pref.chain_index].push((pref.param_key.clone(), value));
        }
        Self { values }
    }

    pub fn scalar(&self, chain_index: usize, param_key: &str, default: f32) -> f32 {
        self.values
            .get(chain_index)
            .and_then(|slot| slot.iter().find(|(k, _)| k == param_key))
            .map(|(_, v)| v.scalar())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(chain_index: usize, key: &str, value: f32) -> EffectParamRef {
        EffectParamRef {
            chain_index,
            param_key: key.into(),
            ref_key: format!("track:test:{chain_index}:{key}"),
            initial: EffectValue::Scalar(value),
        }
    }

    #[test]
    fn brightness_zero_blacks_out_pixels() {
        let chain = CompiledChain::compile(1, &["brightness".into()]);
        let refs = [param(0, "amount", 0.0)];
        let controls = ControlTable::resolve(&refs, &HashMap::new(), chain.len());

        let mut rgba = vec![200u8, 100, 50, 255];
        let opacity = chain.apply(&mut rgba, &controls);
        assert_eq!(&rgba[..3], &[0, 0, 0]);
        assert_eq!(opacity, 1.0);
    }

    #[test]
    fn opacity_is_reported_not_applied() {
        let chain = CompiledChain::compile(2, &["opacity".into()]);
        let refs = [param(0, "amount", 0.25)];
        let controls = ControlTable::resolve(&refs, &HashMap::new(), chain.len());

        let mut rgba = vec![200u8, 100, 50, 255];
        let opacity = chain.apply(&mut rgba, &controls);
        assert_eq!(&rgba[..3], &[200, 100, 50]);
        assert!((opacity - 0.25).abs() < 1e-6);
    }

    #[test]
    fn overrides_beat_compile_time_values() {
        let chain = CompiledChain::compile(3, &["brightness".into()]);
        let refs = [param(0, "amount", 0.5)];
        let mut overrides = HashMap::new();
        overrides.insert(refs[0].ref_key.clone(), EffectValue::Scalar(0.0));
        let controls = ControlTable::resolve(&refs, &overrides, chain.len());

        let mut rgba = vec![200u8, 100, 50, 255];
        chain.apply(&mut rgba, &controls);
        assert_eq!(&rgba[..3], &[0, 0, 0]);
    }

    #[test]
    fn unknown_kinds_pass_through() {
        let chain = CompiledChain::compile(4, &["chroma-warp".into()]);
        let controls = ControlTable::resolve(&[], &HashMap::new(), chain.len());
        let mut rgba = vec![10u8, 20, 30, 255];
        let opacity = chain.apply(&mut rgba, &controls);
        assert_eq!(rgba, vec![10, 20, 30, 255]);
        assert_eq!(opacity, 1.0);
    }
}
