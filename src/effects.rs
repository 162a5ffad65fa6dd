//! Per-voice effect sub-graphs
//!
//! Builds the short reusable chains a voice can carry: a nonlinear shaping
//! stage, a feedback delay, or a convolution reverb. Distortion and delay
//! are serial inserts; reverb is a parallel dry/wet split whose branches sum
//! back at the voice gain.

use std::f32::consts::PI;

use crate::buffer::AudioBuffer;
use crate::graph::{AudioGraph, NodeId, NodeKind, ParamTag};
use crate::types::{DelayParams, DistortionParams, EffectKind, ReverbParams, SourceParams};

/// Handle to a voice's effect sub-graph.
#[derive(Debug, Clone)]
pub enum EffectChain {
    None,
    Distortion {
        shaper: NodeId,
    },
    /// delay -> feedback -> delay is a genuine signal cycle; the graph
    /// resolves it with one sample of implicit delay on the back edge.
    Delay {
        delay: NodeId,
        feedback: NodeId,
    },
    Reverb {
        convolver: NodeId,
        wet: NodeId,
        dry: NodeId,
    },
}

impl EffectChain {
    pub fn kind(&self) -> EffectKind {
        match self {
            EffectChain::None => EffectKind::None,
            EffectChain::Distortion { .. } => EffectKind::Distortion,
            EffectChain::Delay { .. } => EffectKind::Delay,
            EffectChain::Reverb { .. } => EffectKind::Reverb,
        }
    }

    /// Every node this chain owns, for teardown.
    pub fn node_ids(&self) -> Vec<NodeId> {
        match *self {
            EffectChain::None => vec![],
            EffectChain::Distortion { shaper } => vec![shaper],
            EffectChain::Delay { delay, feedback } => vec![delay, feedback],
            EffectChain::Reverb {
                convolver,
                wet,
                dry,
            } => vec![convolver, wet, dry],
        }
    }
}

/// Build the sub-graph for `kind`. Nodes are created but not yet wired to
/// the voice; [`wire`] does that.
pub fn build(graph: &mut AudioGraph, kind: EffectKind, impulse: &AudioBuffer) -> EffectChain {
    match kind {
        EffectKind::None => EffectChain::None,
        EffectKind::Distortion => {
            let shaper = graph.add_node(NodeKind::wave_shaper(distortion_curve(
                DistortionParams::default().amount,
            )));
            EffectChain::Distortion { shaper }
        }
        EffectKind::Delay => {
            let defaults = DelayParams::default();
            let delay = graph.add_node(NodeKind::delay(1.0, graph.sample_rate()));
            let feedback = graph.add_node(NodeKind::gain(defaults.feedback));
            if let Some(p) = graph.param_mut(delay, ParamTag::DelayTime) {
                p.set_value_at(defaults.time, 0.0);
            }
            graph.connect(delay, feedback);
            graph.connect(feedback, delay);
            EffectChain::Delay { delay, feedback }
        }
        EffectKind::Reverb => {
            let convolver = graph.add_node(NodeKind::convolver(impulse));
            let defaults = ReverbParams::default();
            let wet = graph.add_node(NodeKind::gain(defaults.mix));
            let dry = graph.add_node(NodeKind::gain(1.0 - defaults.mix));
            graph.connect(wet, convolver);
            EffectChain::Reverb {
                convolver,
                wet,
                dry,
            }
        }
    }
}

/// Wire `upstream` through the chain into `voice_gain`. An empty chain is a
/// pass-through.
pub fn wire(graph: &mut AudioGraph, chain: &EffectChain, upstream: NodeId, voice_gain: NodeId) {
    match *chain {
        EffectChain::None => graph.connect(upstream, voice_gain),
        EffectChain::Distortion { shaper } => {
            graph.connect(upstream, shaper);
            graph.connect(shaper, voice_gain);
        }
        EffectChain::Delay { delay, feedback } => {
            // Serial insert tapped after the feedback gain: only the
            // regenerating repeats reach the voice gain.
            graph.connect(upstream, delay);
            graph.connect(feedback, voice_gain);
        }
        EffectChain::Reverb {
            convolver,
            wet,
            dry,
        } => {
            graph.connect(upstream, dry);
            graph.connect(upstream, wet);
            graph.connect(dry, voice_gain);
            graph.connect(convolver, voice_gain);
        }
    }
}

/// Re-apply the chain's parameters from the source's current settings, with
/// smoothed writes.
pub fn apply_params(graph: &mut AudioGraph, chain: &EffectChain, params: &SourceParams, now: f64) {
    match *chain {
        EffectChain::None => {}
        EffectChain::Distortion { shaper } => {
            let amount = params.distortion.unwrap_or_default().amount;
            graph.set_curve(shaper, distortion_curve(amount));
        }
        EffectChain::Delay { delay, feedback } => {
            let p = params.delay.unwrap_or_default();
            if let Some(time) = graph.param_mut(delay, ParamTag::DelayTime) {
                time.set_target(p.time, now, 0.02);
            }
            if let Some(gain) = graph.param_mut(feedback, ParamTag::Gain) {
                gain.set_target(p.feedback, now, 0.02);
            }
        }
        EffectChain::Reverb { wet, dry, .. } => {
            let mix = params.reverb.unwrap_or_default().mix;
            if let Some(g) = graph.param_mut(wet, ParamTag::Gain) {
                g.set_target(mix, now, 0.02);
            }
            if let Some(g) = graph.param_mut(dry, ParamTag::Gain) {
                g.set_target(1.0 - mix, now, 0.02);
            }
        }
    }
}

/// The shaping transfer curve: `k = amount * 100`,
/// `f(x) = (pi + k) * x / (pi + k * |x|)`.
pub fn distortion_curve(amount: f32) -> Vec<f32> {
    let k = (amount * 100.0).max(0.01);
    (0..256)
        .map(|i| {
            let x = i as f32 * 2.0 / 256.0 - 1.0;
            (PI + k) * x / (PI + k * x.abs())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer;

    #[test]
    fn distortion_curve_is_odd_and_bounded() {
        let curve = distortion_curve(0.5);
        assert_eq!(curve.len(), 256);
        for (i, v) in curve.iter().enumerate() {
            assert!(v.abs() <= 1.01, "curve[{}] out of range: {}", i, v);
        }
        // Antisymmetric about the midpoint.
        assert!((curve[0] + curve[255]).abs() < 0.02);
        // More amount means a harder knee.
        let soft = distortion_curve(0.1);
        let hard = distortion_curve(1.0);
        assert!(hard[200].abs() > soft[200].abs());
    }

    #[test]
    fn delay_chain_contains_its_feedback_cycle() {
        let mut graph = AudioGraph::new(44100.0);
        let chain = build(&mut graph, EffectKind::Delay, &buffer::AudioBuffer::new(44100.0, vec![]));
        let (delay, feedback) = match chain {
            EffectChain::Delay { delay, feedback } => (delay, feedback),
            _ => panic!("expected delay chain"),
        };
        let has_forward = graph
            .connections()
            .iter()
            .any(|c| c.from == delay && c.to == crate::graph::ConnectTarget::Input(feedback));
        let has_back = graph
            .connections()
            .iter()
            .any(|c| c.from == feedback && c.to == crate::graph::ConnectTarget::Input(delay));
        assert!(has_forward && has_back, "delay loop must be present as edges");
    }

    #[test]
    fn empty_chain_passes_through() {
        let mut graph = AudioGraph::new(44100.0);
        let src = graph.add_node(NodeKind::constant(0.25));
        let gain = graph.add_node(NodeKind::gain(1.0));
        let chain = EffectChain::None;
        wire(&mut graph, &chain, src, gain);
        graph.connect(gain, graph.destination());
        graph.start_node(src, 0.0);
        let mut block = vec![0.0; 8];
        graph.render(&mut block);
        assert!((block[4] - 0.25f32.tanh()).abs() < 1e-4);
    }
}
