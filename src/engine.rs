//! The sonification engine
//!
//! One owned value holding the signal graph, the live voice pool and the
//! rhythm clock. All mutation happens synchronously inside `update`,
//! `update_rhythm` and the render path; there are no internal threads and no
//! wall-clock timers. The granular, pulse and rhythm schedulers are pumped
//! with lookahead from `render`, and everything they schedule is stamped
//! with audio-clock times.
//!
//! Error philosophy: prefer silent degradation over interrupting sound. A
//! non-finite source value skips that source for the tick, an unresolved
//! buffer plays as an oscillator, redundant starts/stops are no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::{self, AudioBuffer, NoiseBuffers};
use crate::drums;
use crate::effects;
use crate::graph::{AudioGraph, NodeId, NodeKind, ParamTag, Transient};
use crate::granular::GrainScheduler;
use crate::lfo;
use crate::mapping::{self, Scaling};
use crate::rhythm::{self, RhythmClock};
use crate::types::{
    BlendMode, BufferStore, EngineRules, MapMode, Normalization, PointerPos, RhythmMapping,
    RhythmSettings, SourceDescriptor, SourceKind,
};
use crate::voice::{self, PulseScheduler, Voice, VoiceContext};

/// Master bus level when unmuted.
const MASTER_LEVEL: f32 = 0.8;

/// Mix headroom shared across the live voices.
const VOICE_HEADROOM: f32 = 0.7;

/// The engine. One per playback session; owns its graph exclusively.
pub struct Engine {
    graph: AudioGraph,
    master: NodeId,
    compressor: NodeId,
    /// Unit-DC source the tremolo taps reference.
    shared_dc: NodeId,
    noise: NoiseBuffers,
    impulse: AudioBuffer,
    pulse_table: Arc<Vec<f32>>,
    voices: Vec<Voice>,
    /// Faded-out voices awaiting graph teardown after their grace delay.
    retiring: Vec<Transient>,
    /// One-shot node groups (drums, grains, blips) awaiting their end.
    transients: Vec<Transient>,
    rhythm: Option<RhythmClock>,
    muted: bool,
    started: bool,
    fadeout_deadline: Option<f64>,
    rebuilds: u64,
}

impl Engine {
    pub fn new(sample_rate: f32) -> Self {
        let mut graph = AudioGraph::new(sample_rate);
        let master = graph.add_node(NodeKind::gain(MASTER_LEVEL));
        let compressor = graph.add_node(NodeKind::compressor());
        let destination = graph.destination();
        graph.connect(master, compressor);
        graph.connect(compressor, destination);

        let shared_dc = graph.add_node(NodeKind::constant(1.0));
        graph.start_node(shared_dc, 0.0);

        let noise = NoiseBuffers::generate(sample_rate);
        let impulse = buffer::reverb_impulse(sample_rate);
        let pulse_table = Arc::new(buffer::pulse_wavetable());

        info!(sample_rate, "sonification engine created");
        Self {
            graph,
            master,
            compressor,
            shared_dc,
            noise,
            impulse,
            pulse_table,
            voices: Vec::new(),
            retiring: Vec::new(),
            transients: Vec::new(),
            rhythm: None,
            muted: false,
            started: false,
            fadeout_deadline: None,
            rebuilds: 0,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.graph.sample_rate()
    }

    /// Audio-clock time in seconds.
    pub fn current_time(&self) -> f64 {
        self.graph.current_time()
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Voices rebuilt because their signature stopped matching.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn is_rhythm_running(&self) -> bool {
        self.rhythm.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        let level = if muted { 0.0 } else { MASTER_LEVEL };
        let now = self.graph.current_time();
        if let Some(g) = self.graph.param_mut(self.master, ParamTag::Gain) {
            g.set_target(level, now, 0.02);
        }
    }

    /// Ramp every continuous voice up to its target gain.
    pub fn start(&mut self) {
        self.started = true;
        self.fadeout_deadline = None;
        let now = self.graph.current_time();
        for v in &self.voices {
            if v.signature.kind == SourceKind::RhythmicPulse {
                continue;
            }
            if let Some(g) = self.graph.param_mut(v.gain, ParamTag::Gain) {
                g.set_target(v.target_gain, now, 0.02);
            }
        }
    }

    /// Fade everything out. With `immediate`, also tear the whole voice
    /// pool out of the graph synchronously; calling it twice is harmless.
    pub fn stop(&mut self, immediate: bool) {
        self.stop_rhythm();
        self.fadeout_deadline = None;
        self.started = false;
        let now = self.graph.current_time();
        let fade = if immediate { 0.05 } else { 0.2 };
        for v in &self.voices {
            if let Some(g) = self.graph.param_mut(v.gain, ParamTag::Gain) {
                g.set_target(0.0, now, fade);
            }
        }
        if immediate {
            for v in self.voices.drain(..) {
                for id in v.node_ids() {
                    self.graph.remove_node(id);
                }
            }
            for t in self.retiring.drain(..).chain(self.transients.drain(..)) {
                for id in t.nodes {
                    self.graph.remove_node(id);
                }
            }
        }
    }

    /// Start, then fade out after `duration` seconds of audio time.
    pub fn play_with_fadeout(&mut self, duration: f32) {
        self.start();
        self.fadeout_deadline = Some(self.graph.current_time() + duration as f64);
    }

    /// Drop the rhythm clock; idempotent.
    pub fn stop_rhythm(&mut self) {
        if self.rhythm.take().is_some() {
            debug!("rhythm clock stopped");
        }
    }

    /// (Re)configure the rhythm sequencer. Pattern parameters are resolved
    /// from the bound source values here, not on every tick.
    pub fn update_rhythm(
        &mut self,
        settings: &RhythmSettings,
        mapping: &RhythmMapping,
        sources: &[SourceDescriptor],
        rules: &EngineRules,
    ) {
        if !settings.enabled {
            self.stop_rhythm();
            return;
        }
        let patterns = rhythm::resolve_patterns(mapping, sources);
        match &mut self.rhythm {
            Some(clock) => {
                clock.patterns = patterns;
                clock.settings = settings.clone();
                clock.rules = rules.clone();
            }
            None => {
                let now = self.graph.current_time();
                self.rhythm = Some(RhythmClock::new(
                    now,
                    patterns,
                    settings.clone(),
                    rules.clone(),
                ));
                debug!(bpm = settings.bpm, "rhythm clock started");
            }
        }
    }

    /// Reconcile the voice pool against this tick's source list, then drive
    /// every live voice's parameters.
    pub fn update(
        &mut self,
        sources: &[SourceDescriptor],
        rules: &EngineRules,
        buffers: &BufferStore,
        blend_modes: &HashMap<String, BlendMode>,
        dragging: bool,
        pointer: Option<PointerPos>,
    ) {
        // The ambient pass stands down while the sequencer runs.
        if self
            .rhythm
            .as_ref()
            .map_or(false, |clock| clock.settings.enabled)
        {
            return;
        }
        self.stop_rhythm();

        let now = self.graph.current_time();

        // Global normalization rescales the batch before any mapping.
        let owned_sources: Vec<SourceDescriptor>;
        let sources: &[SourceDescriptor] = match rules.normalization {
            Normalization::Global => {
                let values: Vec<f32> = sources.iter().map(|s| s.value).collect();
                let scaled = mapping::normalize_global(&values);
                owned_sources = sources
                    .iter()
                    .zip(scaled)
                    .map(|(s, value)| SourceDescriptor {
                        value,
                        ..s.clone()
                    })
                    .collect();
                &owned_sources
            }
            Normalization::None => sources,
        };

        let n = sources.len().min(rules.max_polyphony.max(1));

        // Trim surplus voices from the tail.
        while self.voices.len() > n {
            if let Some(v) = self.voices.pop() {
                self.retire_voice(v, now);
            }
        }

        // Retire any voice whose signature no longer matches its source.
        let mut i = self.voices.len();
        while i > 0 {
            i -= 1;
            let matches = sources.get(i).map_or(false, |s| {
                self.voices[i].signature == voice::signature_of(s, rules, buffers)
            });
            if !matches {
                let v = self.voices.remove(i);
                self.retire_voice(v, now);
                self.rebuilds += 1;
            }
        }

        // Build voices for the uncovered tail of the list.
        while self.voices.len() < n {
            let idx = self.voices.len();
            let ctx = VoiceContext {
                buffers,
                noise: &self.noise,
                pulse_table: &self.pulse_table,
                impulse: &self.impulse,
                shared_dc: self.shared_dc,
                master: self.master,
            };
            let v = voice::build_voice(&mut self.graph, &sources[idx], rules, &ctx, now);
            self.voices.push(v);
        }

        // Parameter pass.
        let gain_per_voice = if n > 0 {
            VOICE_HEADROOM / n as f32
        } else {
            0.0
        };
        for idx in 0..n {
            let Some(source) = sources.get(idx) else { break };
            let Some(v) = self.voices.get_mut(idx) else { break };
            Self::drive_voice(
                &mut self.graph,
                v,
                source,
                rules,
                buffers,
                blend_modes,
                dragging,
                pointer,
                gain_per_voice,
                self.started,
                now,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn drive_voice(
        graph: &mut AudioGraph,
        v: &mut Voice,
        source: &SourceDescriptor,
        rules: &EngineRules,
        buffers: &BufferStore,
        blend_modes: &HashMap<String, BlendMode>,
        dragging: bool,
        pointer: Option<PointerPos>,
        gain_per_voice: f32,
        started: bool,
        now: f64,
    ) {
        let value = source.value;
        // One bad value skips one source, not the whole update.
        if !value.is_finite() {
            return;
        }

        // Rhythmic-pulse sources trade their continuous path for a blip
        // train; the two are mutually exclusive.
        if source.kind == SourceKind::RhythmicPulse {
            v.target_gain = 0.0;
            let rate = mapping::map_value_to_param(value, 0.5, 20.0, Scaling::Linear);
            let interval = 1.0 / rate.max(0.1) as f64;
            let frequency = rules.base_frequency * 2.0;
            let rearm = match v.pulse {
                Some(p) => (p.interval - interval).abs() > 1e-6,
                None => true,
            };
            if rearm {
                v.pulse = Some(PulseScheduler {
                    next_time: now + interval,
                    interval,
                    frequency,
                });
            } else if let Some(p) = &mut v.pulse {
                p.frequency = frequency;
            }
            if let Some(g) = graph.param_mut(v.gain, ParamTag::Gain) {
                g.set_target(0.0, now, 0.01);
            }
            return;
        } else if v.pulse.is_some() {
            v.pulse = None;
        }

        let blend = blend_modes
            .get(&source.key)
            .copied()
            .unwrap_or_default();
        let blend_factor = match blend {
            BlendMode::Full => 1.0,
            BlendMode::ThreeQuarters => 0.75,
            BlendMode::Half => 0.5,
            BlendMode::Quarter => 0.25,
            BlendMode::Dynamic => mapping::map_value_to_param(value, 0.1, 1.0, Scaling::Linear),
        };

        // Freeform drag bypasses the per-mode logic: sawtooth tone, pitch
        // from the value, filter driven by the pointer, modulation muted.
        if dragging {
            if let Some(p) = pointer {
                v.target_gain = gain_per_voice * blend_factor;
                let pitch = mapping::map_value_to_pitch(value, rules);
                let filter_freq = mapping::map_value_to_param(
                    p.x * mapping::NOMINAL_CEILING,
                    200.0,
                    18_000.0,
                    Scaling::Log,
                );
                let filter_q = mapping::map_value_to_param(
                    p.y * mapping::NOMINAL_CEILING,
                    1.0,
                    20.0,
                    Scaling::Linear,
                );
                if let Some(f) = graph.param_mut(v.filter, ParamTag::Frequency) {
                    f.set_target(filter_freq, now, 0.02);
                }
                if let Some(q) = graph.param_mut(v.filter, ParamTag::Q) {
                    q.set_target(filter_q, now, 0.02);
                }
                if matches!(v.signature.kind, SourceKind::Oscillator) {
                    graph.set_waveform(v.generator, crate::types::Waveform::Sawtooth);
                    if let Some(f) = graph.param_mut(v.generator, ParamTag::Frequency) {
                        f.set_target(pitch, now, 0.02);
                    }
                }
                if let Some(l) = v.lfo {
                    lfo::disable(graph, l, now);
                }
                if let Some(m) = v.modulator {
                    if let Some(g) = graph.param_mut(m.gain, ParamTag::Gain) {
                        g.set_target(0.0, now, 0.01);
                    }
                }
                if started {
                    if let Some(g) = graph.param_mut(v.gain, ParamTag::Gain) {
                        g.set_target(v.target_gain, now, 0.02);
                    }
                }
                return;
            }
        }

        if let Some(q) = graph.param_mut(v.filter, ParamTag::Q) {
            q.set_target(1.0, now, 0.02);
        }

        // Granular voices re-parameterize their grain scheduler and skip the
        // per-mode branch.
        if v.signature.kind == SourceKind::Granular {
            let params = source.params.granular.unwrap_or_default();
            let grain_buffer = source
                .buffer_ref
                .as_deref()
                .and_then(|r| buffers.get(r))
                .cloned();
            if let Some(buf) = grain_buffer {
                let sched = v
                    .granular
                    .get_or_insert_with(|| GrainScheduler::new(buf, &params, now));
                match rules.granular_modulation_target {
                    crate::types::GranularModulationTarget::Pitch => {
                        sched.playback_rate =
                            mapping::map_value_to_param(value, 0.2, 2.5, Scaling::Linear);
                    }
                    crate::types::GranularModulationTarget::Rate => {
                        let rate = mapping::map_value_to_param(value, 5.0, 100.0, Scaling::Linear);
                        sched.set_rate(rate, now);
                    }
                    crate::types::GranularModulationTarget::Duration => {
                        sched.grain_duration =
                            mapping::map_value_to_param(value, 0.01, 0.2, Scaling::Linear);
                    }
                }
            }
            v.target_gain = gain_per_voice * blend_factor;
            if started {
                if let Some(g) = graph.param_mut(v.gain, ParamTag::Gain) {
                    g.set_target(v.target_gain, now, 0.02);
                }
            }
            effects::apply_params(graph, &v.effect, &source.params, now);
            return;
        } else if v.granular.is_some() {
            v.granular = None;
        }

        let uses_buffer = matches!(
            v.signature.kind,
            SourceKind::Sample | SourceKind::Noise(_)
        );

        match rules.mode {
            MapMode::Pitch => {
                v.target_gain = gain_per_voice * blend_factor;
                if uses_buffer {
                    if let Some(p) = graph.param_mut(v.generator, ParamTag::PlaybackRate) {
                        let rate = mapping::map_value_to_param(value, 0.5, 2.0, Scaling::Linear);
                        p.set_target(rate, now, 0.02);
                    }
                } else {
                    let freq = mapping::map_value_to_pitch(value, rules);
                    graph.set_waveform(v.generator, rules.waveform);
                    if let Some(f) = graph.param_mut(v.generator, ParamTag::Frequency) {
                        f.set_target(freq, now, 0.02);
                    }
                    if let (Some(m), Some(fm)) = (v.modulator, source.params.fm) {
                        if let Some(f) = graph.param_mut(m.osc, ParamTag::Frequency) {
                            f.set_target(freq * fm.harmonicity, now, 0.02);
                        }
                        if let Some(g) = graph.param_mut(m.gain, ParamTag::Gain) {
                            g.set_target(freq * fm.mod_index, now, 0.02);
                        }
                    }
                }
                if let Some(f) = graph.param_mut(v.filter, ParamTag::Frequency) {
                    f.set_target(20_000.0, now, 0.02);
                }
            }
            MapMode::Volume => {
                v.target_gain =
                    mapping::map_value_to_param(value, 0.0, gain_per_voice * 1.5, Scaling::Linear)
                        * blend_factor;
                if uses_buffer {
                    if let Some(p) = graph.param_mut(v.generator, ParamTag::PlaybackRate) {
                        p.set_target(1.0, now, 0.02);
                    }
                } else {
                    graph.set_waveform(v.generator, rules.waveform);
                    if let Some(f) = graph.param_mut(v.generator, ParamTag::Frequency) {
                        f.set_target(rules.base_frequency, now, 0.02);
                    }
                }
                if let Some(f) = graph.param_mut(v.filter, ParamTag::Frequency) {
                    f.set_target(20_000.0, now, 0.02);
                }
            }
            MapMode::Filter => {
                v.target_gain = gain_per_voice * blend_factor;
                let cutoff =
                    mapping::map_value_to_param(value, 200.0, 12_000.0, Scaling::Log);
                if let Some(f) = graph.param_mut(v.filter, ParamTag::Frequency) {
                    f.set_target(cutoff, now, 0.02);
                }
                if !uses_buffer {
                    graph.set_waveform(v.generator, crate::types::Waveform::Sawtooth);
                    if let Some(f) = graph.param_mut(v.generator, ParamTag::Frequency) {
                        f.set_target(rules.base_frequency, now, 0.02);
                    }
                }
            }
        }

        // Modulation routing happens after the per-mode targets are set.
        if let Some(l) = v.lfo {
            lfo::route(graph, l, v.generator, v.filter, value, rules, now);
        }

        effects::apply_params(graph, &v.effect, &source.params, now);

        if started {
            if let Some(g) = graph.param_mut(v.gain, ParamTag::Gain) {
                g.set_target(v.target_gain, now, 0.02);
            }
        }
    }

    fn retire_voice(&mut self, v: Voice, now: f64) {
        if let Some(g) = self.graph.param_mut(v.gain, ParamTag::Gain) {
            g.set_target(0.0, now, 0.05);
        }
        self.graph.stop_node(v.generator, now + 0.1);
        if let Some(m) = v.modulator {
            self.graph.stop_node(m.osc, now + 0.1);
        }
        if let Some(l) = v.lfo {
            self.graph.stop_node(l.osc, now + 0.1);
        }
        // Grain/pulse schedulers die with the voice value; nothing to clear.
        self.retiring.push(Transient {
            nodes: v.node_ids(),
            end_time: now + 0.1,
        });
    }

    /// Render a block of mono samples, pumping the lookahead schedulers
    /// first. This is the host driver's entry point.
    pub fn render(&mut self, out: &mut [f32]) {
        let now = self.graph.current_time();
        let block = out.len() as f64 / self.graph.sample_rate() as f64;
        self.pump(now, block);
        self.graph.render(out);
    }

    /// Advance the fade-out deadline, reap finished node groups, and run
    /// the rhythm/granular/pulse schedulers over the lookahead window.
    fn pump(&mut self, now: f64, block: f64) {
        if let Some(deadline) = self.fadeout_deadline {
            if now >= deadline {
                self.fadeout_deadline = None;
                self.stop(false);
            }
        }

        self.reap(now);

        // Rhythm: schedule every hit inside the lookahead window at its
        // exact audio-clock time. While muted the clock keeps stepping but
        // nothing is synthesized.
        let master_level = self
            .graph
            .param(self.master, ParamTag::Gain)
            .map_or(MASTER_LEVEL, |p| p.value());
        let mut scheduled = Vec::new();
        if let Some(clock) = &mut self.rhythm {
            let events = clock.advance(now, rhythm::LOOKAHEAD);
            if !self.muted {
                for e in events {
                    if e.volume <= 0.0 {
                        continue;
                    }
                    scheduled.push(drums::schedule_drum(
                        &mut self.graph,
                        self.compressor,
                        &self.noise.white,
                        e.drum,
                        e.time,
                        e.volume * master_level,
                    ));
                    if e.harmonic_bass {
                        scheduled.push(drums::schedule_harmonic_bass(
                            &mut self.graph,
                            self.compressor,
                            e.time,
                            e.volume * master_level,
                            clock.rules.base_frequency,
                        ));
                    }
                }
            }
        }
        self.transients.extend(scheduled);

        // Per-voice schedulers.
        let lookahead = block + 0.05;
        let mut fired = Vec::new();
        for v in &mut self.voices {
            let parent_gain = self
                .graph
                .param(v.gain, ParamTag::Gain)
                .map_or(0.0, |p| p.value());
            if let Some(sched) = &mut v.granular {
                fired.extend(sched.advance(&mut self.graph, v.generator, parent_gain, now, lookahead));
            }
            if let Some(p) = &mut v.pulse {
                while p.next_time < now + lookahead {
                    let at = p.next_time.max(now);
                    p.next_time += p.interval;
                    if self.muted {
                        continue;
                    }
                    fired.push(drums::schedule_pulse_blip(
                        &mut self.graph,
                        self.compressor,
                        at,
                        p.frequency,
                        0.6 * master_level,
                    ));
                }
            }
        }
        self.transients.extend(fired);
    }

    fn reap(&mut self, now: f64) {
        let mut retiring = std::mem::take(&mut self.retiring);
        retiring.retain(|t| {
            if now >= t.end_time {
                for &id in &t.nodes {
                    self.graph.remove_node(id);
                }
                false
            } else {
                true
            }
        });
        self.retiring = retiring;

        let mut transients = std::mem::take(&mut self.transients);
        transients.retain(|t| {
            if now >= t.end_time {
                for &id in &t.nodes {
                    self.graph.remove_node(id);
                }
                false
            } else {
                true
            }
        });
        self.transients = transients;
    }

    /// Graph size, exposed for leak checks in tests.
    pub fn graph_node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Signatures of the live voices, in list order.
    pub fn voice_signatures(&self) -> Vec<crate::voice::VoiceSignature> {
        self.voices.iter().map(|v| v.signature).collect()
    }
}
