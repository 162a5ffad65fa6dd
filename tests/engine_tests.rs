//! Engine-level scenarios: pool reconciliation, lifecycle, rhythm.

use std::collections::HashMap;

use auralis::engine::Engine;
use auralis::types::{
    BlendMode, BufferStore, EngineRules, NoiseColor, RhythmMapping, RhythmSettings,
    SourceDescriptor, SourceKind, Waveform,
};

fn no_buffers() -> BufferStore {
    HashMap::new()
}

fn no_blends() -> HashMap<String, BlendMode> {
    HashMap::new()
}

fn osc_sources(values: &[f32]) -> Vec<SourceDescriptor> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| SourceDescriptor::new(format!("s{}", i), v, SourceKind::Oscillator))
        .collect()
}

#[test]
fn voice_count_never_exceeds_polyphony() {
    let mut engine = Engine::new(44100.0);
    for (count, cap) in [(5usize, 3usize), (2, 10), (10, 1), (0, 4)] {
        let rules = EngineRules {
            max_polyphony: cap,
            ..EngineRules::default()
        };
        let sources = osc_sources(&vec![100.0; count]);
        engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
        assert!(
            engine.active_voice_count() <= count.min(cap.max(1)),
            "count {} cap {} gave {}",
            count,
            cap,
            engine.active_voice_count()
        );
    }
}

#[test]
fn two_sources_give_two_oscillator_voices() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules {
        max_polyphony: 10,
        ..EngineRules::default()
    };
    let sources = vec![
        SourceDescriptor::new("a", 100.0, SourceKind::Oscillator),
        SourceDescriptor::new("b", 50.0, SourceKind::Oscillator),
    ];
    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.active_voice_count(), 2);
    for sig in engine.voice_signatures() {
        assert_eq!(sig.kind, SourceKind::Oscillator);
        assert_eq!(sig.waveform, Waveform::Sine);
    }
}

#[test]
fn stop_immediate_twice_is_harmless() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    engine.update(
        &osc_sources(&[100.0, 60.0, 30.0]),
        &rules,
        &no_buffers(),
        &no_blends(),
        false,
        None,
    );
    engine.start();
    engine.stop(true);
    engine.stop(true);
    assert_eq!(engine.active_voice_count(), 0);
}

#[test]
fn waveform_change_rebuilds_every_mismatched_voice() {
    let mut engine = Engine::new(44100.0);
    let mut rules = EngineRules::default();
    let sources = osc_sources(&[100.0, 50.0]);

    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.rebuild_count(), 0, "initial build is not a rebuild");

    // Same rules: stable pool, no rebuilds.
    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.rebuild_count(), 0);

    rules.waveform = Waveform::Square;
    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.rebuild_count(), 2);
    assert_eq!(engine.active_voice_count(), 2);
    for sig in engine.voice_signatures() {
        assert_eq!(sig.waveform, Waveform::Square);
    }
}

#[test]
fn positional_matching_rebuilds_on_reorder_of_mixed_kinds() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    let forward = vec![
        SourceDescriptor::new("a", 100.0, SourceKind::Oscillator),
        SourceDescriptor::new("b", 50.0, SourceKind::Noise(NoiseColor::White)),
    ];
    engine.update(&forward, &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.rebuild_count(), 0);

    let reversed: Vec<_> = forward.iter().rev().cloned().collect();
    engine.update(&reversed, &rules, &no_buffers(), &no_blends(), false, None);
    // Voices are matched by list position, so swapping the kinds rebuilds
    // both paths.
    assert_eq!(engine.rebuild_count(), 2);
    assert_eq!(engine.active_voice_count(), 2);
}

#[test]
fn engine_renders_audio_after_start() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    engine.update(
        &osc_sources(&[120.0, 45.0]),
        &rules,
        &no_buffers(),
        &no_blends(),
        false,
        None,
    );
    engine.start();

    let mut block = vec![0.0f32; 8820]; // 200 ms: enough for the gain ramp
    engine.render(&mut block);
    let peak = block[4410..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.01, "expected audible output, peak {}", peak);
}

#[test]
fn unstarted_engine_stays_silent() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    engine.update(
        &osc_sources(&[120.0]),
        &rules,
        &no_buffers(),
        &no_blends(),
        false,
        None,
    );
    let mut block = vec![0.0f32; 4410];
    engine.render(&mut block);
    let peak = block.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak < 1e-4, "voices must stay at zero gain, peak {}", peak);
}

#[test]
fn retired_voices_are_reaped_after_their_grace_delay() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    let baseline = engine.graph_node_count();

    engine.update(
        &osc_sources(&[100.0]),
        &rules,
        &no_buffers(),
        &no_blends(),
        false,
        None,
    );
    assert!(engine.graph_node_count() > baseline);

    engine.update(&[], &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.active_voice_count(), 0);
    // Nodes survive the fade-out grace window, then get torn down.
    let mut block = vec![0.0f32; 6615]; // 150 ms
    engine.render(&mut block);
    engine.render(&mut block);
    assert_eq!(engine.graph_node_count(), baseline);
}

#[test]
fn non_finite_source_values_are_skipped_not_fatal() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    let sources = vec![
        SourceDescriptor::new("ok", 100.0, SourceKind::Oscillator),
        SourceDescriptor::new("bad", f32::NAN, SourceKind::Oscillator),
    ];
    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    engine.start();
    let mut block = vec![0.0f32; 4410];
    engine.render(&mut block);
    assert!(block.iter().all(|s| s.is_finite()));
    assert_eq!(engine.active_voice_count(), 2);
}

#[test]
fn rhythm_takes_over_from_the_ambient_pass() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    let settings = RhythmSettings {
        enabled: true,
        ..RhythmSettings::default()
    };
    let sources = osc_sources(&[100.0]);

    engine.update_rhythm(&settings, &RhythmMapping::default(), &sources, &rules);
    assert!(engine.is_rhythm_running());

    // While the sequencer runs, update() leaves the pool alone.
    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.active_voice_count(), 0);

    engine.stop_rhythm();
    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    assert_eq!(engine.active_voice_count(), 1);
}

#[test]
fn rhythm_synthesizes_percussion() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    let settings = RhythmSettings {
        enabled: true,
        bpm: 120.0,
        harmonic_bass: true,
        ..RhythmSettings::default()
    };
    engine.update_rhythm(&settings, &RhythmMapping::default(), &[], &rules);

    let mut block = vec![0.0f32; 22050]; // half a second
    engine.render(&mut block);
    let energy: f32 = block.iter().map(|s| s * s).sum();
    assert!(energy > 0.0, "drums must sound");
    assert!(block.iter().all(|s| s.is_finite()));
}

#[test]
fn muted_engine_keeps_time_but_stays_quiet() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    let settings = RhythmSettings {
        enabled: true,
        ..RhythmSettings::default()
    };
    engine.set_muted(true);
    engine.update_rhythm(&settings, &RhythmMapping::default(), &[], &rules);
    let mut block = vec![0.0f32; 22050];
    engine.render(&mut block);
    let peak = block.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak < 1e-3, "muted output leaked: {}", peak);
    assert!(engine.is_rhythm_running());
}

#[test]
fn play_with_fadeout_fades_back_to_silence() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    engine.update(
        &osc_sources(&[150.0]),
        &rules,
        &no_buffers(),
        &no_blends(),
        false,
        None,
    );
    engine.play_with_fadeout(0.2);

    let mut early = vec![0.0f32; 8820]; // 0 .. 0.2 s
    engine.render(&mut early);
    let peak_early = early[4410..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak_early > 0.01, "should sound before the fadeout");

    let mut late = vec![0.0f32; 44100]; // 0.2 .. 1.2 s
    engine.render(&mut late);
    let peak_late = late[39690..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(
        peak_late < peak_early * 0.2,
        "fadeout did not take: early {} late {}",
        peak_early,
        peak_late
    );
}

#[test]
fn pulse_sources_bypass_the_continuous_path() {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules::default();
    let sources = vec![SourceDescriptor::new(
        "tick",
        400.0, // maps to the fastest blip rate
        SourceKind::RhythmicPulse,
    )];
    engine.update(&sources, &rules, &no_buffers(), &no_blends(), false, None);
    engine.start();

    let mut block = vec![0.0f32; 22050];
    engine.render(&mut block);
    let energy: f32 = block.iter().map(|s| s * s).sum();
    assert!(energy > 0.0, "pulse blips must sound");
}
