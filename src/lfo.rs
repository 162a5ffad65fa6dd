//! Per-voice LFO routing
//!
//! One modulation oscillator per voice, wired through a depth gain. Where
//! the depth lands depends on the configured target: pitch detune (cents),
//! filter cutoff (Hz), or a tremolo gain stage. The mapped source value can
//! override either the rate or the depth, never both. Routes that no
//! longer match the active target are torn down on every pass so a target
//! change leaves no stale modulation path behind.

use crate::graph::{AudioGraph, NodeId, ParamTag};
use crate::mapping::{self, Scaling};
use crate::types::{EngineRules, LfoModulationTarget, LfoTarget};

/// Handles to one voice's modulation oscillator and depth stage.
#[derive(Debug, Clone, Copy)]
pub struct Lfo {
    pub osc: NodeId,
    pub depth: NodeId,
}

/// Re-route and re-parameterize the LFO for the current tick.
pub fn route(
    graph: &mut AudioGraph,
    lfo: Lfo,
    generator: NodeId,
    filter: NodeId,
    value: f32,
    rules: &EngineRules,
    now: f64,
) {
    let rate = match rules.lfo_modulation_target {
        LfoModulationTarget::Rate => mapping::map_value_to_param(value, 0.1, 20.0, Scaling::Linear),
        LfoModulationTarget::Depth => rules.lfo.rate,
    };
    let depth = match rules.lfo_modulation_target {
        LfoModulationTarget::Depth => mapping::map_value_to_param(value, 0.0, 1.0, Scaling::Linear),
        LfoModulationTarget::Rate => rules.lfo.depth,
    };

    if let Some(p) = graph.param_mut(lfo.osc, ParamTag::Frequency) {
        p.set_target(rate, now, 0.02);
    }

    let depth_amount = match rules.lfo.target {
        // Depth in cents of vibrato.
        LfoTarget::Pitch => depth * 1200.0,
        // Depth as a swing around half the current cutoff.
        LfoTarget::Filter => {
            let cutoff = graph
                .param(filter, ParamTag::Frequency)
                .map_or(20_000.0, |p| p.value());
            depth * (cutoff / 2.0)
        }
        LfoTarget::Volume => depth,
        LfoTarget::None => 0.0,
    };
    if let Some(p) = graph.param_mut(lfo.depth, ParamTag::Gain) {
        p.set_target(depth_amount, now, 0.02);
    }

    // Exclusive routing: attach the matching destination, tear down the rest.
    // (The tremolo tap for the volume target is wired once at voice build.)
    match rules.lfo.target {
        LfoTarget::Pitch => {
            graph.connect_param(lfo.depth, generator, ParamTag::Detune);
            graph.disconnect_param(lfo.depth, filter, ParamTag::Frequency);
        }
        LfoTarget::Filter => {
            graph.connect_param(lfo.depth, filter, ParamTag::Frequency);
            graph.disconnect_param(lfo.depth, generator, ParamTag::Detune);
        }
        LfoTarget::Volume | LfoTarget::None => {
            graph.disconnect_param(lfo.depth, generator, ParamTag::Detune);
            graph.disconnect_param(lfo.depth, filter, ParamTag::Frequency);
        }
    }
}

/// Silence the modulation path (used while dragging).
pub fn disable(graph: &mut AudioGraph, lfo: Lfo, now: f64) {
    if let Some(p) = graph.param_mut(lfo.depth, ParamTag::Gain) {
        p.set_target(0.0, now, 0.01);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConnectTarget, NodeKind};
    use crate::types::{LfoParams, Waveform};

    fn setup() -> (AudioGraph, Lfo, NodeId, NodeId) {
        let mut graph = AudioGraph::new(44100.0);
        let osc = graph.add_node(NodeKind::oscillator(Waveform::Sine, 2.0));
        let depth = graph.add_node(NodeKind::gain(0.0));
        graph.connect(osc, depth);
        let generator = graph.add_node(NodeKind::oscillator(Waveform::Sine, 220.0));
        let filter = graph.add_node(NodeKind::filter(
            crate::graph::FilterKind::LowPass,
            20_000.0,
            1.0,
        ));
        (graph, Lfo { osc, depth }, generator, filter)
    }

    fn rules_with_target(target: LfoTarget) -> EngineRules {
        EngineRules {
            lfo: LfoParams {
                target,
                ..LfoParams::default()
            },
            ..EngineRules::default()
        }
    }

    #[test]
    fn pitch_target_attaches_detune_only() {
        let (mut graph, lfo, generator, filter) = setup();
        route(&mut graph, lfo, generator, filter, 100.0, &rules_with_target(LfoTarget::Pitch), 0.0);
        let has_detune = graph
            .connections()
            .iter()
            .any(|c| c.to == ConnectTarget::Param(generator, ParamTag::Detune));
        let has_filter = graph
            .connections()
            .iter()
            .any(|c| c.to == ConnectTarget::Param(filter, ParamTag::Frequency));
        assert!(has_detune && !has_filter);
    }

    #[test]
    fn target_switch_tears_down_stale_route() {
        let (mut graph, lfo, generator, filter) = setup();
        route(&mut graph, lfo, generator, filter, 100.0, &rules_with_target(LfoTarget::Pitch), 0.0);
        route(&mut graph, lfo, generator, filter, 100.0, &rules_with_target(LfoTarget::Filter), 0.1);
        let has_detune = graph
            .connections()
            .iter()
            .any(|c| c.to == ConnectTarget::Param(generator, ParamTag::Detune));
        let has_filter = graph
            .connections()
            .iter()
            .any(|c| c.to == ConnectTarget::Param(filter, ParamTag::Frequency));
        assert!(!has_detune && has_filter);
    }

    #[test]
    fn repeated_routing_does_not_duplicate_edges() {
        let (mut graph, lfo, generator, filter) = setup();
        for i in 0..5 {
            route(
                &mut graph,
                lfo,
                generator,
                filter,
                100.0,
                &rules_with_target(LfoTarget::Pitch),
                i as f64 * 0.1,
            );
        }
        let detune_edges = graph
            .connections()
            .iter()
            .filter(|c| c.to == ConnectTarget::Param(generator, ParamTag::Detune))
            .count();
        assert_eq!(detune_edges, 1);
    }
}
