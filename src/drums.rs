//! Procedural one-shot percussion
//!
//! Builds each hit as a tiny node group scheduled at an exact audio-clock
//! time and wired straight into the master bus, bypassing the voice pool.
//! Every function returns the [`Transient`] handle the caller reaps once the
//! hit has rung out.
//!
//! Recipes: kick is a pitch-swept sine, snare is high-passed noise over a
//! short triangle body, hat is a band-passed noise burst, harmonic bass is a
//! filter-swept saw two octaves under the base frequency.

use std::sync::Arc;

use crate::buffer::AudioBuffer;
use crate::graph::{AudioGraph, FilterKind, NodeId, NodeKind, ParamTag, Transient};
use crate::types::{DrumKind, Waveform};

/// Schedule one drum hit at `time`. `volume` arrives already scaled by the
/// master gain.
pub fn schedule_drum(
    graph: &mut AudioGraph,
    bus: NodeId,
    white_noise: &Arc<AudioBuffer>,
    drum: DrumKind,
    time: f64,
    volume: f32,
) -> Transient {
    match drum {
        DrumKind::Kick => kick(graph, bus, time, volume),
        DrumKind::Snare => snare(graph, bus, white_noise, time, volume),
        DrumKind::Hat => hat(graph, bus, white_noise, time, volume),
    }
}

fn kick(graph: &mut AudioGraph, bus: NodeId, time: f64, volume: f32) -> Transient {
    let osc = graph.add_node(NodeKind::oscillator(Waveform::Sine, 150.0));
    if let Some(freq) = graph.param_mut(osc, ParamTag::Frequency) {
        freq.set_value_at(150.0, time);
        freq.exponential_ramp_to(0.01, time + 0.15);
    }
    let gain = graph.add_node(NodeKind::gain(0.0));
    if let Some(g) = graph.param_mut(gain, ParamTag::Gain) {
        g.set_value_at(volume, time);
        g.exponential_ramp_to(0.001 * volume, time + 0.2);
    }
    graph.connect(osc, gain);
    graph.connect(gain, bus);
    graph.start_node(osc, time);
    graph.stop_node(osc, time + 0.25);
    Transient {
        nodes: vec![osc, gain],
        end_time: time + 0.3,
    }
}

fn snare(
    graph: &mut AudioGraph,
    bus: NodeId,
    white_noise: &Arc<AudioBuffer>,
    time: f64,
    volume: f32,
) -> Transient {
    // Noise rattle through a high-pass.
    let noise = graph.add_node(NodeKind::buffer_source(Some(white_noise.clone()), false));
    let filter = graph.add_node(NodeKind::filter(FilterKind::HighPass, 1500.0, 1.0));
    let noise_env = graph.add_node(NodeKind::gain(0.0));
    if let Some(g) = graph.param_mut(noise_env, ParamTag::Gain) {
        g.set_value_at(0.8 * volume, time);
        g.exponential_ramp_to(0.01 * volume, time + 0.2);
    }
    graph.connect(noise, filter);
    graph.connect(filter, noise_env);
    graph.connect(noise_env, bus);
    graph.start_node(noise, time);
    graph.stop_node(noise, time + 0.2);

    // Short tonal body.
    let body = graph.add_node(NodeKind::oscillator(Waveform::Triangle, 180.0));
    let body_env = graph.add_node(NodeKind::gain(0.0));
    if let Some(g) = graph.param_mut(body_env, ParamTag::Gain) {
        g.set_value_at(0.7 * volume, time);
        g.exponential_ramp_to(0.01 * volume, time + 0.1);
    }
    graph.connect(body, body_env);
    graph.connect(body_env, bus);
    graph.start_node(body, time);
    graph.stop_node(body, time + 0.1);

    Transient {
        nodes: vec![noise, filter, noise_env, body, body_env],
        end_time: time + 0.25,
    }
}

fn hat(
    graph: &mut AudioGraph,
    bus: NodeId,
    white_noise: &Arc<AudioBuffer>,
    time: f64,
    volume: f32,
) -> Transient {
    let noise = graph.add_node(NodeKind::buffer_source(Some(white_noise.clone()), false));
    let filter = graph.add_node(NodeKind::filter(FilterKind::BandPass, 10000.0, 1.5));
    let env = graph.add_node(NodeKind::gain(0.0));
    if let Some(g) = graph.param_mut(env, ParamTag::Gain) {
        g.set_value_at(0.7 * volume, time);
        g.exponential_ramp_to(0.01 * volume, time + 0.08);
    }
    graph.connect(noise, filter);
    graph.connect(filter, env);
    graph.connect(env, bus);
    graph.start_node(noise, time);
    graph.stop_node(noise, time + 0.1);

    Transient {
        nodes: vec![noise, filter, env],
        end_time: time + 0.15,
    }
}

/// Sub-bass hit fired alongside a kick: the scale root two octaves down,
/// through a closing low-pass.
pub fn schedule_harmonic_bass(
    graph: &mut AudioGraph,
    bus: NodeId,
    time: f64,
    volume: f32,
    base_frequency: f32,
) -> Transient {
    let osc = graph.add_node(NodeKind::oscillator(Waveform::Sawtooth, base_frequency / 4.0));
    let filter = graph.add_node(NodeKind::filter(FilterKind::LowPass, 800.0, 1.0));
    if let Some(f) = graph.param_mut(filter, ParamTag::Frequency) {
        f.set_value_at(800.0, time);
        f.exponential_ramp_to(200.0, time + 0.15);
    }
    let gain = graph.add_node(NodeKind::gain(0.0));
    if let Some(g) = graph.param_mut(gain, ParamTag::Gain) {
        g.set_value_at(0.0, time);
        g.linear_ramp_to(volume * 0.5, time + 0.02);
        g.exponential_ramp_to(0.001, time + 0.25);
    }
    graph.connect(osc, filter);
    graph.connect(filter, gain);
    graph.connect(gain, bus);
    graph.start_node(osc, time);
    graph.stop_node(osc, time + 0.3);

    Transient {
        nodes: vec![osc, filter, gain],
        end_time: time + 0.35,
    }
}

/// The blip a rhythmic-pulse source fires: a short sine at twice the base
/// frequency with a fast exponential decay.
pub fn schedule_pulse_blip(
    graph: &mut AudioGraph,
    bus: NodeId,
    time: f64,
    frequency: f32,
    volume: f32,
) -> Transient {
    let osc = graph.add_node(NodeKind::oscillator(Waveform::Sine, frequency));
    let gain = graph.add_node(NodeKind::gain(0.0));
    if let Some(g) = graph.param_mut(gain, ParamTag::Gain) {
        g.set_value_at(volume, time);
        g.exponential_ramp_to(0.001, time + 0.1);
    }
    graph.connect(osc, gain);
    graph.connect(gain, bus);
    graph.start_node(osc, time);
    graph.stop_node(osc, time + 0.1);

    Transient {
        nodes: vec![osc, gain],
        end_time: time + 0.15,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer;

    #[test]
    fn kick_renders_energy_at_its_scheduled_time() {
        let mut graph = AudioGraph::new(44100.0);
        let bus = graph.add_node(NodeKind::gain(1.0));
        graph.connect(bus, graph.destination());
        let hit = kick(&mut graph, bus, 0.05, 0.8);
        assert_eq!(hit.nodes.len(), 2);

        let mut before = vec![0.0f32; 2205]; // first 50 ms
        graph.render(&mut before);
        assert!(before.iter().all(|s| s.abs() < 1e-6), "silent before the hit");

        let mut during = vec![0.0f32; 4410];
        graph.render(&mut during);
        let energy: f32 = during.iter().map(|s| s * s).sum();
        assert!(energy > 0.0, "kick must sound at its scheduled time");
    }

    #[test]
    fn snare_builds_both_layers() {
        let mut graph = AudioGraph::new(44100.0);
        let bus = graph.add_node(NodeKind::gain(1.0));
        let white = std::sync::Arc::new(buffer::white_noise(44100.0, 4410));
        let hit = snare(&mut graph, bus, &white, 0.0, 0.7);
        assert_eq!(hit.nodes.len(), 5);
        assert!(hit.end_time > 0.2);
    }
}
