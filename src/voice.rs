//! Voice construction
//!
//! A voice is one live signal path: generator -> filter -> (tremolo tap) ->
//! effect sub-graph -> voice gain -> master mix. Voices carry the signature
//! `(kind, waveform, effect)` the reconciler matches against; anything else
//! about a voice can be re-parameterized in place, but a signature mismatch
//! means retire-and-rebuild.

use std::sync::Arc;

use crate::buffer::NoiseBuffers;
use crate::effects::{self, EffectChain};
use crate::graph::{AudioGraph, FilterKind, NodeId, NodeKind, ParamTag};
use crate::granular::GrainScheduler;
use crate::lfo::Lfo;
use crate::types::{
    BufferStore, EngineRules, LfoTarget, NoiseColor, SourceDescriptor, SourceKind, Waveform,
};

/// The reuse-matching triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSignature {
    pub kind: SourceKind,
    pub waveform: Waveform,
    pub effect: crate::types::EffectKind,
}

/// The FM modulator pair patched into a carrier's frequency.
#[derive(Debug, Clone, Copy)]
pub struct FmModulator {
    pub osc: NodeId,
    pub gain: NodeId,
}

/// Lookahead state for a rhythmic-pulse source's blip train.
#[derive(Debug, Clone, Copy)]
pub struct PulseScheduler {
    pub next_time: f64,
    pub interval: f64,
    /// Blip pitch, fixed at twice the base frequency when (re)armed.
    pub frequency: f32,
}

/// One live synthesis voice.
#[derive(Debug)]
pub struct Voice {
    pub generator: NodeId,
    pub filter: NodeId,
    pub gain: NodeId,
    pub effect: EffectChain,
    pub signature: VoiceSignature,
    pub modulator: Option<FmModulator>,
    pub lfo: Option<Lfo>,
    pub tremolo: Option<NodeId>,
    pub granular: Option<GrainScheduler>,
    pub pulse: Option<PulseScheduler>,
    /// Where the smoothed voice gain is headed.
    pub target_gain: f32,
}

impl Voice {
    /// Every node this voice owns, for teardown.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = vec![self.generator, self.filter, self.gain];
        if let Some(t) = self.tremolo {
            ids.push(t);
        }
        if let Some(m) = self.modulator {
            ids.push(m.osc);
            ids.push(m.gain);
        }
        if let Some(l) = self.lfo {
            ids.push(l.osc);
            ids.push(l.depth);
        }
        ids.extend(self.effect.node_ids());
        ids
    }
}

/// The kind a source actually realizes as: sample and granular sources whose
/// buffer has not resolved yet degrade to plain oscillator behavior.
pub fn effective_kind(source: &SourceDescriptor, buffers: &BufferStore) -> SourceKind {
    match source.kind {
        SourceKind::Sample | SourceKind::Granular => {
            let resolved = source
                .buffer_ref
                .as_deref()
                .map_or(false, |r| buffers.contains_key(r));
            if resolved {
                source.kind
            } else {
                SourceKind::Oscillator
            }
        }
        kind => kind,
    }
}

/// Signature the given source induces under the current rules.
pub fn signature_of(
    source: &SourceDescriptor,
    rules: &EngineRules,
    buffers: &BufferStore,
) -> VoiceSignature {
    VoiceSignature {
        kind: effective_kind(source, buffers),
        waveform: rules.waveform,
        effect: source.effect,
    }
}

/// Everything a voice build needs besides the source itself.
pub struct VoiceContext<'a> {
    pub buffers: &'a BufferStore,
    pub noise: &'a NoiseBuffers,
    pub pulse_table: &'a Arc<Vec<f32>>,
    pub impulse: &'a crate::buffer::AudioBuffer,
    /// Shared unit-DC source the tremolo taps sit on.
    pub shared_dc: NodeId,
    /// Master mix input the voice gain feeds.
    pub master: NodeId,
}

/// Construct, wire and start a voice for `source`.
pub fn build_voice(
    graph: &mut AudioGraph,
    source: &SourceDescriptor,
    rules: &EngineRules,
    ctx: &VoiceContext<'_>,
    now: f64,
) -> Voice {
    let kind = effective_kind(source, ctx.buffers);

    // Generator per kind. The granular generator is a bare gain stage the
    // grain scheduler feeds; everything else is a continuous source.
    let mut modulator = None;
    let generator = match kind {
        SourceKind::Granular => graph.add_node(NodeKind::gain(1.0)),
        SourceKind::Sample => {
            let buffer = source
                .buffer_ref
                .as_deref()
                .and_then(|r| ctx.buffers.get(r))
                .cloned();
            graph.add_node(NodeKind::buffer_source(buffer, true))
        }
        SourceKind::Noise(color) => {
            let buffer = match color {
                NoiseColor::White => ctx.noise.white.clone(),
                NoiseColor::Pink => ctx.noise.pink.clone(),
                NoiseColor::Brown => ctx.noise.brown.clone(),
            };
            graph.add_node(NodeKind::buffer_source(Some(buffer), true))
        }
        SourceKind::Oscillator | SourceKind::RhythmicPulse => {
            let osc = graph.add_node(NodeKind::oscillator_with_table(
                rules.waveform,
                rules.base_frequency,
                ctx.pulse_table.clone(),
            ));
            if rules.waveform == Waveform::Fm {
                let mod_osc = graph.add_node(NodeKind::oscillator(
                    Waveform::Sine,
                    rules.base_frequency,
                ));
                let mod_gain = graph.add_node(NodeKind::gain(0.0));
                graph.connect(mod_osc, mod_gain);
                graph.connect_param(mod_gain, osc, ParamTag::Frequency);
                modulator = Some(FmModulator {
                    osc: mod_osc,
                    gain: mod_gain,
                });
            }
            osc
        }
    };

    // LFO pair, and a tremolo tap when it modulates volume.
    let mut lfo = None;
    let mut tremolo = None;
    if rules.lfo.target != LfoTarget::None {
        let lfo_osc = graph.add_node(NodeKind::oscillator_with_table(
            rules.lfo.waveform,
            rules.lfo.rate,
            ctx.pulse_table.clone(),
        ));
        let depth = graph.add_node(NodeKind::gain(0.0));
        graph.connect(lfo_osc, depth);
        lfo = Some(Lfo {
            osc: lfo_osc,
            depth,
        });

        if rules.lfo.target == LfoTarget::Volume {
            // Unity DC plus the LFO swing on the tap's gain.
            let tap = graph.add_node(NodeKind::gain(0.0));
            graph.connect_param(ctx.shared_dc, tap, ParamTag::Gain);
            graph.connect_param(depth, tap, ParamTag::Gain);
            tremolo = Some(tap);
        }
    }

    let filter = graph.add_node(NodeKind::filter(FilterKind::LowPass, 20_000.0, 1.0));
    let gain = graph.add_node(NodeKind::gain(0.0));
    let effect = effects::build(graph, source.effect, ctx.impulse);

    graph.connect(generator, filter);
    let last = match tremolo {
        Some(tap) => {
            graph.connect(filter, tap);
            tap
        }
        None => filter,
    };
    effects::wire(graph, &effect, last, gain);
    graph.connect(gain, ctx.master);

    graph.start_node(generator, now);
    if let Some(m) = modulator {
        graph.start_node(m.osc, now);
    }
    if let Some(l) = lfo {
        graph.start_node(l.osc, now);
    }

    Voice {
        generator,
        filter,
        gain,
        effect,
        signature: VoiceSignature {
            kind,
            waveform: rules.waveform,
            effect: source.effect,
        },
        modulator,
        lfo,
        tremolo,
        granular: None,
        pulse: None,
        target_gain: 0.0,
    }
}
