//! The audio signal graph
//!
//! Nodes are stored against opaque ids and wired through an explicit edge
//! list. A connection targets either another node's audio input or one of
//! its parameters, so audio-rate modulation (LFO -> detune, modulator ->
//! carrier frequency) uses the same plumbing as the audio path.
//!
//! Evaluation order is a Kahn topological sort over the edge list. Cycles
//! are legal topology here (the delay effect's delay -> feedback -> delay
//! loop is a signal cycle, not an ownership one), and the nodes a cycle
//! leaves behind are appended in id order, reading the previous sample's
//! value of any not-yet-computed input. Every back edge therefore carries
//! exactly one sample of implicit delay.
//!
//! The graph renders one mono sample per `process_sample` call and derives
//! its clock from the number of samples rendered. That clock is the single
//! source of timing truth: schedulers stamp events with it, never with a
//! wall clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type};
use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use tracing::debug;

use crate::buffer::AudioBuffer;
use crate::param::Param;
use crate::types::Waveform;

/// Unique identifier for nodes in the graph.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A short-lived one-shot node group (drum hit, grain, pulse blip) with a
/// scheduled end. The owner reaps the nodes once `end_time` has passed.
#[derive(Debug, Clone)]
pub struct Transient {
    pub nodes: Vec<NodeId>,
    pub end_time: f64,
}

/// Named parameters a connection can modulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamTag {
    Frequency,
    /// Pitch offset in cents.
    Detune,
    Gain,
    PlaybackRate,
    DelayTime,
    Q,
    /// DC offset of a constant source.
    Offset,
}

/// Where a connection lands: a node's audio input, or one of its parameters
/// (summed on top of the parameter's automated value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    Input(NodeId),
    Param(NodeId, ParamTag),
}

/// One edge in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from: NodeId,
    pub to: ConnectTarget,
}

/// Filter responses available on the filter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
    BandPass,
}

/// Per-sample parameter modulation gathered from `ConnectTarget::Param`
/// edges before a node runs.
#[derive(Debug, Default, Clone, Copy)]
struct ParamMods {
    frequency: f32,
    detune: f32,
    gain: f32,
    playback_rate: f32,
    delay_time: f32,
    q: f32,
    offset: f32,
}

impl ParamMods {
    fn slot(&mut self, tag: ParamTag) -> &mut f32 {
        match tag {
            ParamTag::Frequency => &mut self.frequency,
            ParamTag::Detune => &mut self.detune,
            ParamTag::Gain => &mut self.gain,
            ParamTag::PlaybackRate => &mut self.playback_rate,
            ParamTag::DelayTime => &mut self.delay_time,
            ParamTag::Q => &mut self.q,
            ParamTag::Offset => &mut self.offset,
        }
    }
}

/// Uniform-partitioned FFT convolution state for the reverb node.
///
/// The impulse is split into fixed blocks whose spectra are multiplied
/// against a ring of recent input spectra (overlap-save), giving one block
/// of latency regardless of impulse length.
pub struct ConvolverState {
    block: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    ifft: Arc<dyn ComplexToReal<f32>>,
    partitions: Vec<Vec<Complex<f32>>>,
    history: VecDeque<Vec<Complex<f32>>>,
    in_buf: Vec<f32>,
    prev_block: Vec<f32>,
    out_queue: VecDeque<f32>,
}

impl ConvolverState {
    const BLOCK: usize = 256;

    pub fn new(impulse: &AudioBuffer) -> Self {
        let block = Self::BLOCK;
        let fft_len = block * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        let mut partitions = Vec::new();
        for chunk in impulse.data.chunks(block) {
            let mut time = vec![0.0f32; fft_len];
            time[..chunk.len()].copy_from_slice(chunk);
            let mut spec = fft.make_output_vec();
            let _ = fft.process(&mut time, &mut spec);
            partitions.push(spec);
        }
        if partitions.is_empty() {
            partitions.push(vec![Complex::default(); fft_len / 2 + 1]);
        }

        Self {
            block,
            fft,
            ifft,
            partitions,
            history: VecDeque::new(),
            in_buf: Vec::with_capacity(block),
            prev_block: vec![0.0; block],
            out_queue: VecDeque::with_capacity(block * 2),
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.in_buf.push(x);
        if self.in_buf.len() == self.block {
            self.process_block();
        }
        self.out_queue.pop_front().unwrap_or(0.0)
    }

    fn process_block(&mut self) {
        let fft_len = self.block * 2;
        let mut time = Vec::with_capacity(fft_len);
        time.extend_from_slice(&self.prev_block);
        time.extend_from_slice(&self.in_buf);
        let mut spec = self.fft.make_output_vec();
        let _ = self.fft.process(&mut time, &mut spec);

        self.history.push_front(spec);
        self.history.truncate(self.partitions.len());

        let bins = fft_len / 2 + 1;
        let mut acc = vec![Complex::default(); bins];
        for (past, part) in self.history.iter().zip(self.partitions.iter()) {
            for i in 0..bins {
                acc[i] += past[i] * part[i];
            }
        }

        let mut out_time = vec![0.0f32; fft_len];
        let _ = self.ifft.process(&mut acc, &mut out_time);
        let scale = 1.0 / fft_len as f32;
        // Overlap-save: only the back half is linear-convolution valid.
        for &s in &out_time[self.block..] {
            self.out_queue.push_back(s * scale);
        }

        self.prev_block.clear();
        self.prev_block.extend_from_slice(&self.in_buf);
        self.in_buf.clear();
    }
}

impl std::fmt::Debug for ConvolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolverState")
            .field("block", &self.block)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

/// The DSP behavior of a node.
#[derive(Debug)]
pub enum NodeKind {
    Oscillator {
        waveform: Waveform,
        frequency: Param,
        /// Pitch offset in cents, modulatable (vibrato lands here).
        detune: Param,
        phase: f32,
        /// Single-cycle table used by `Waveform::Pulse`.
        wavetable: Option<Arc<Vec<f32>>>,
    },
    BufferSource {
        buffer: Option<Arc<AudioBuffer>>,
        playback_rate: Param,
        detune: Param,
        looping: bool,
        /// Start offset into the buffer, in buffer seconds.
        offset: f64,
        /// Portion of the buffer to play, in buffer seconds.
        duration: Option<f64>,
        position: f64,
        finished: bool,
    },
    Gain {
        gain: Param,
    },
    Filter {
        kind: FilterKind,
        frequency: Param,
        q: Param,
        state: Option<DirectForm1<f32>>,
        last_freq: f32,
        last_q: f32,
    },
    Delay {
        time: Param,
        line: Vec<f32>,
        write: usize,
    },
    WaveShaper {
        curve: Vec<f32>,
        prev_input: f32,
    },
    Convolver {
        state: ConvolverState,
    },
    Constant {
        offset: Param,
    },
    /// Fixed master-bus compressor.
    Compressor {
        envelope: f32,
    },
    Destination,
}

impl NodeKind {
    pub fn oscillator(waveform: Waveform, frequency: f32) -> Self {
        NodeKind::Oscillator {
            waveform,
            frequency: Param::new(frequency),
            detune: Param::new(0.0),
            phase: 0.0,
            wavetable: None,
        }
    }

    /// Oscillator carrying a wavetable so the waveform can be switched to
    /// `Pulse` live.
    pub fn oscillator_with_table(
        waveform: Waveform,
        frequency: f32,
        table: Arc<Vec<f32>>,
    ) -> Self {
        NodeKind::Oscillator {
            waveform,
            frequency: Param::new(frequency),
            detune: Param::new(0.0),
            phase: 0.0,
            wavetable: Some(table),
        }
    }

    pub fn buffer_source(buffer: Option<Arc<AudioBuffer>>, looping: bool) -> Self {
        NodeKind::BufferSource {
            buffer,
            playback_rate: Param::new(1.0),
            detune: Param::new(0.0),
            looping,
            offset: 0.0,
            duration: None,
            position: 0.0,
            finished: false,
        }
    }

    pub fn buffer_slice(buffer: Arc<AudioBuffer>, offset: f64, duration: f64) -> Self {
        let position = offset * buffer.sample_rate as f64;
        NodeKind::BufferSource {
            buffer: Some(buffer),
            playback_rate: Param::new(1.0),
            detune: Param::new(0.0),
            looping: false,
            offset,
            duration: Some(duration),
            position,
            finished: false,
        }
    }

    pub fn gain(value: f32) -> Self {
        NodeKind::Gain {
            gain: Param::new(value),
        }
    }

    pub fn filter(kind: FilterKind, frequency: f32, q: f32) -> Self {
        NodeKind::Filter {
            kind,
            frequency: Param::new(frequency),
            q: Param::new(q),
            state: None,
            last_freq: f32::NAN,
            last_q: f32::NAN,
        }
    }

    pub fn delay(max_seconds: f32, sample_rate: f32) -> Self {
        let len = ((max_seconds * sample_rate) as usize).max(1) + 1;
        NodeKind::Delay {
            time: Param::new(0.0),
            line: vec![0.0; len],
            write: 0,
        }
    }

    pub fn wave_shaper(curve: Vec<f32>) -> Self {
        NodeKind::WaveShaper {
            curve,
            prev_input: 0.0,
        }
    }

    pub fn convolver(impulse: &AudioBuffer) -> Self {
        NodeKind::Convolver {
            state: ConvolverState::new(impulse),
        }
    }

    pub fn constant(offset: f32) -> Self {
        NodeKind::Constant {
            offset: Param::new(offset),
        }
    }

    pub fn compressor() -> Self {
        NodeKind::Compressor { envelope: 0.0 }
    }

    /// Whether this kind only sounds between explicit start/stop times.
    fn is_source(&self) -> bool {
        matches!(
            self,
            NodeKind::Oscillator { .. } | NodeKind::BufferSource { .. } | NodeKind::Constant { .. }
        )
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    start_at: Option<f64>,
    stop_at: Option<f64>,
}

impl Node {
    fn is_active(&self, now: f64) -> bool {
        if !self.kind.is_source() {
            return true;
        }
        match self.start_at {
            Some(t) if now >= t => self.stop_at.map_or(true, |s| now < s),
            _ => false,
        }
    }
}

/// The owning signal graph. One per engine.
#[derive(Debug)]
pub struct AudioGraph {
    sample_rate: f32,
    nodes: HashMap<NodeId, Node>,
    connections: Vec<Connection>,
    next_id: usize,
    /// Cached evaluation order; invalidated on any topology change.
    order: Option<Vec<NodeId>>,
    input_map: HashMap<NodeId, Vec<NodeId>>,
    param_map: HashMap<NodeId, Vec<(ParamTag, NodeId)>>,
    /// Previous sample's outputs; what back edges read.
    outputs: HashMap<NodeId, f32>,
    /// This sample's outputs, in evaluation order.
    current: HashMap<NodeId, f32>,
    destination: NodeId,
    samples_rendered: u64,
}

impl AudioGraph {
    pub fn new(sample_rate: f32) -> Self {
        let mut graph = Self {
            sample_rate,
            nodes: HashMap::new(),
            connections: Vec::new(),
            next_id: 0,
            order: None,
            input_map: HashMap::new(),
            param_map: HashMap::new(),
            outputs: HashMap::new(),
            current: HashMap::new(),
            destination: NodeId(0),
            samples_rendered: 0,
        };
        graph.destination = graph.add_node(NodeKind::Destination);
        graph
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Audio-clock time in seconds: samples rendered so far.
    pub fn current_time(&self) -> f64 {
        self.samples_rendered as f64 / self.sample_rate as f64
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                start_at: None,
                stop_at: None,
            },
        );
        self.order = None;
        id
    }

    /// Remove a node and every connection touching it. Removing an absent
    /// node is a no-op.
    pub fn remove_node(&mut self, id: NodeId) {
        if self.nodes.remove(&id).is_none() {
            debug!(?id, "remove of absent node ignored");
            return;
        }
        self.connections.retain(|c| {
            c.from != id
                && match c.to {
                    ConnectTarget::Input(n) | ConnectTarget::Param(n, _) => n != id,
                }
        });
        self.outputs.remove(&id);
        self.order = None;
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        self.connections.push(Connection {
            from,
            to: ConnectTarget::Input(to),
        });
        self.order = None;
    }

    pub fn connect_param(&mut self, from: NodeId, node: NodeId, tag: ParamTag) {
        let to = ConnectTarget::Param(node, tag);
        // A modulation route is attached at most once.
        if self.connections.iter().any(|c| c.from == from && c.to == to) {
            return;
        }
        self.connections.push(Connection { from, to });
        self.order = None;
    }

    /// Remove all connections leaving `from`.
    pub fn disconnect(&mut self, from: NodeId) {
        let before = self.connections.len();
        self.connections.retain(|c| c.from != from);
        if self.connections.len() != before {
            self.order = None;
        }
    }

    /// Remove one modulation route if present; absent routes are ignored.
    pub fn disconnect_param(&mut self, from: NodeId, node: NodeId, tag: ParamTag) {
        let to = ConnectTarget::Param(node, tag);
        let before = self.connections.len();
        self.connections.retain(|c| !(c.from == from && c.to == to));
        if self.connections.len() != before {
            self.order = None;
        }
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Schedule a source to begin sounding. Starting an already-started or
    /// absent node is a silent no-op.
    pub fn start_node(&mut self, id: NodeId, when: f64) {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                if node.start_at.is_some() {
                    debug!(?id, "start of already-started node ignored");
                } else {
                    node.start_at = Some(when);
                }
            }
            None => debug!(?id, "start of absent node ignored"),
        }
    }

    /// Schedule a source to stop. Stopping an already-stopped, never-started
    /// or absent node is a silent no-op.
    pub fn stop_node(&mut self, id: NodeId, when: f64) {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                if node.start_at.is_none() || node.stop_at.is_some() {
                    debug!(?id, "stop of inactive node ignored");
                } else {
                    node.stop_at = Some(when);
                }
            }
            None => debug!(?id, "stop of absent node ignored"),
        }
    }

    /// Mutable access to a node's automatable parameter, if the node exists
    /// and has one by that name.
    pub fn param_mut(&mut self, id: NodeId, tag: ParamTag) -> Option<&mut Param> {
        let node = self.nodes.get_mut(&id)?;
        match (&mut node.kind, tag) {
            (NodeKind::Oscillator { frequency, .. }, ParamTag::Frequency) => Some(frequency),
            (NodeKind::Oscillator { detune, .. }, ParamTag::Detune) => Some(detune),
            (NodeKind::BufferSource { playback_rate, .. }, ParamTag::PlaybackRate) => {
                Some(playback_rate)
            }
            (NodeKind::BufferSource { detune, .. }, ParamTag::Detune) => Some(detune),
            (NodeKind::Gain { gain }, ParamTag::Gain) => Some(gain),
            (NodeKind::Filter { frequency, .. }, ParamTag::Frequency) => Some(frequency),
            (NodeKind::Filter { q, .. }, ParamTag::Q) => Some(q),
            (NodeKind::Delay { time, .. }, ParamTag::DelayTime) => Some(time),
            (NodeKind::Constant { offset }, ParamTag::Offset) => Some(offset),
            _ => None,
        }
    }

    /// Read access to a node's parameter.
    pub fn param(&self, id: NodeId, tag: ParamTag) -> Option<&Param> {
        let node = self.nodes.get(&id)?;
        match (&node.kind, tag) {
            (NodeKind::Oscillator { frequency, .. }, ParamTag::Frequency) => Some(frequency),
            (NodeKind::Oscillator { detune, .. }, ParamTag::Detune) => Some(detune),
            (NodeKind::BufferSource { playback_rate, .. }, ParamTag::PlaybackRate) => {
                Some(playback_rate)
            }
            (NodeKind::BufferSource { detune, .. }, ParamTag::Detune) => Some(detune),
            (NodeKind::Gain { gain }, ParamTag::Gain) => Some(gain),
            (NodeKind::Filter { frequency, .. }, ParamTag::Frequency) => Some(frequency),
            (NodeKind::Filter { q, .. }, ParamTag::Q) => Some(q),
            (NodeKind::Delay { time, .. }, ParamTag::DelayTime) => Some(time),
            (NodeKind::Constant { offset }, ParamTag::Offset) => Some(offset),
            _ => None,
        }
    }

    /// Swap an oscillator's waveform in place; other kinds ignore this.
    pub fn set_waveform(&mut self, id: NodeId, waveform: Waveform) {
        if let Some(Node {
            kind: NodeKind::Oscillator { waveform: w, .. },
            ..
        }) = self.nodes.get_mut(&id)
        {
            *w = waveform;
        }
    }

    /// Replace a wave shaper's transfer curve.
    pub fn set_curve(&mut self, id: NodeId, curve: Vec<f32>) {
        if let Some(Node {
            kind: NodeKind::WaveShaper { curve: c, .. },
            ..
        }) = self.nodes.get_mut(&id)
        {
            *c = curve;
        }
    }

    /// Last rendered output of a node (previous sample).
    pub fn output_of(&self, id: NodeId) -> f32 {
        self.outputs.get(&id).copied().unwrap_or(0.0)
    }

    fn ensure_order(&mut self) {
        if self.order.is_some() {
            return;
        }

        let mut input_map: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut param_map: HashMap<NodeId, Vec<(ParamTag, NodeId)>> = HashMap::new();
        let mut deps: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for conn in &self.connections {
            let to_node = match conn.to {
                ConnectTarget::Input(n) => {
                    input_map.entry(n).or_default().push(conn.from);
                    n
                }
                ConnectTarget::Param(n, tag) => {
                    param_map.entry(n).or_default().push((tag, conn.from));
                    n
                }
            };
            if self.nodes.contains_key(&conn.from) && self.nodes.contains_key(&to_node) {
                deps.entry(to_node).or_default().push(conn.from);
                dependents.entry(conn.from).or_default().push(to_node);
            }
        }

        // Kahn's algorithm; whatever a cycle leaves behind is appended in id
        // order and reads previous-sample values.
        let mut in_degree: HashMap<NodeId, usize> = self
            .nodes
            .keys()
            .map(|&id| (id, deps.get(&id).map_or(0, |d| d.len())))
            .collect();

        let mut queue: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        queue.sort();

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut head = 0;
        while head < queue.len() {
            let id = queue[head];
            head += 1;
            order.push(id);
            if let Some(next) = dependents.get(&id) {
                for &n in next {
                    if let Some(d) = in_degree.get_mut(&n) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push(n);
                        }
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let mut feedback: Vec<NodeId> = self
                .nodes
                .keys()
                .filter(|id| !order.contains(*id))
                .copied()
                .collect();
            feedback.sort();
            debug!(count = feedback.len(), "feedback nodes in evaluation order");
            order.extend(feedback);
        }

        self.input_map = input_map;
        self.param_map = param_map;
        self.order = Some(order);
    }

    /// Render one mono sample and advance the audio clock.
    pub fn process_sample(&mut self) -> f32 {
        self.ensure_order();
        let now = self.current_time();
        let order = self.order.take().unwrap_or_default();
        self.current.clear();

        for &id in &order {
            let mut input = 0.0f32;
            if let Some(sources) = self.input_map.get(&id) {
                for &from in sources {
                    input += self
                        .current
                        .get(&from)
                        .or_else(|| self.outputs.get(&from))
                        .copied()
                        .unwrap_or(0.0);
                }
            }
            let mut mods = ParamMods::default();
            if let Some(sources) = self.param_map.get(&id) {
                for &(tag, from) in sources {
                    *mods.slot(tag) += self
                        .current
                        .get(&from)
                        .or_else(|| self.outputs.get(&from))
                        .copied()
                        .unwrap_or(0.0);
                }
            }

            let sample_rate = self.sample_rate;
            let out = match self.nodes.get_mut(&id) {
                Some(node) => process_node(node, input, &mods, now, sample_rate),
                None => 0.0,
            };
            self.current.insert(id, out);
        }

        self.order = Some(order);
        let out = self
            .current
            .get(&self.destination)
            .copied()
            .unwrap_or(0.0);
        std::mem::swap(&mut self.outputs, &mut self.current);
        self.samples_rendered += 1;
        // Soft clipping keeps voice mixing from hard-distorting.
        out.tanh()
    }

    /// Render a block of mono samples.
    pub fn render(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.process_sample();
        }
    }
}

fn process_node(node: &mut Node, input: f32, mods: &ParamMods, now: f64, sample_rate: f32) -> f32 {
    let active = node.is_active(now);
    match &mut node.kind {
        NodeKind::Oscillator {
            waveform,
            frequency,
            detune,
            phase,
            wavetable,
        } => {
            let freq = frequency.tick(now) + mods.frequency;
            let cents = detune.tick(now) + mods.detune;
            if !active {
                return 0.0;
            }
            let f = freq * (cents / 1200.0).exp2();
            let out = match waveform {
                Waveform::Sine | Waveform::Fm => {
                    (*phase * std::f32::consts::TAU).sin()
                }
                Waveform::Square => {
                    if *phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                Waveform::Sawtooth => 2.0 * *phase - 1.0,
                Waveform::Triangle => {
                    if *phase < 0.5 {
                        4.0 * *phase - 1.0
                    } else {
                        3.0 - 4.0 * *phase
                    }
                }
                Waveform::Pulse => match wavetable {
                    Some(table) if !table.is_empty() => {
                        let pos = *phase * table.len() as f32;
                        let idx = (pos as usize).min(table.len() - 1);
                        let next = (idx + 1) % table.len();
                        let frac = pos - idx as f32;
                        table[idx] * (1.0 - frac) + table[next] * frac
                    }
                    _ => (*phase * std::f32::consts::TAU).sin(),
                },
            };
            *phase = (*phase + f / sample_rate).rem_euclid(1.0);
            out
        }

        NodeKind::BufferSource {
            buffer,
            playback_rate,
            detune,
            looping,
            offset,
            duration,
            position,
            finished,
        } => {
            let rate = playback_rate.tick(now) + mods.playback_rate;
            let cents = detune.tick(now) + mods.detune;
            if !active || *finished {
                return 0.0;
            }
            let Some(buf) = buffer else { return 0.0 };
            let start_frame = *offset * buf.sample_rate as f64;
            let end_frame = match *duration {
                Some(d) => (start_frame + d * buf.sample_rate as f64).min(buf.len() as f64),
                None => buf.len() as f64,
            };
            let out = buf.sample_at(*position);
            let step = rate as f64 * (cents as f64 / 1200.0).exp2() * buf.sample_rate as f64
                / sample_rate as f64;
            *position += step;
            if *position >= end_frame {
                if *looping && end_frame > start_frame {
                    *position = start_frame + (*position - start_frame) % (end_frame - start_frame);
                } else {
                    *finished = true;
                }
            }
            out
        }

        NodeKind::Gain { gain } => input * (gain.tick(now) + mods.gain),

        NodeKind::Filter {
            kind,
            frequency,
            q,
            state,
            last_freq,
            last_q,
        } => {
            let nyquist = sample_rate * 0.45;
            let freq = (frequency.tick(now) + mods.frequency).clamp(10.0, nyquist);
            let q_val = (q.tick(now) + mods.q).max(0.01);
            let needs_update = state.is_none()
                || (freq - *last_freq).abs() > 0.5
                || (q_val - *last_q).abs() > 1e-3;
            if needs_update {
                let ty = match kind {
                    FilterKind::LowPass => Type::LowPass,
                    FilterKind::HighPass => Type::HighPass,
                    FilterKind::BandPass => Type::BandPass,
                };
                match Coefficients::<f32>::from_params(ty, sample_rate.hz(), freq.hz(), q_val) {
                    Ok(coeffs) => {
                        match state {
                            Some(df) => df.update_coefficients(coeffs),
                            None => *state = Some(DirectForm1::<f32>::new(coeffs)),
                        }
                        *last_freq = freq;
                        *last_q = q_val;
                    }
                    Err(_) => {
                        debug!(freq, q_val, "filter coefficient update rejected");
                    }
                }
            }
            match state {
                Some(df) => df.run(input),
                None => input,
            }
        }

        NodeKind::Delay { time, line, write } => {
            let max = (line.len() - 1) as f32 / sample_rate;
            let dt = (time.tick(now) + mods.delay_time).clamp(0.0, max);
            let delay_samples = (dt * sample_rate) as f64;
            let len = line.len() as f64;
            let read = (*write as f64 - delay_samples + len) % len;
            let idx = read as usize % line.len();
            let next = (idx + 1) % line.len();
            let frac = (read - read.floor()) as f32;
            let out = line[idx] * (1.0 - frac) + line[next] * frac;
            line[*write] = input;
            *write = (*write + 1) % line.len();
            out
        }

        NodeKind::WaveShaper { curve, prev_input } => {
            if curve.is_empty() {
                return input;
            }
            // 4x oversampling: shape along the segment from the previous
            // input and average, which tames the aliasing the curve adds.
            let mut acc = 0.0f32;
            for k in 1..=4 {
                let x = *prev_input + (input - *prev_input) * (k as f32 / 4.0);
                acc += shape(curve, x);
            }
            *prev_input = input;
            acc / 4.0
        }

        NodeKind::Convolver { state } => state.process(input),

        NodeKind::Constant { offset } => {
            let v = offset.tick(now) + mods.offset;
            if active {
                v
            } else {
                0.0
            }
        }

        NodeKind::Compressor { envelope } => {
            // Master-bus settings: -12 dB threshold, 20 dB knee, 12:1 ratio,
            // 10 ms attack, 250 ms release.
            const THRESHOLD_DB: f32 = -12.0;
            const KNEE_DB: f32 = 20.0;
            const RATIO: f32 = 12.0;
            let attack = 1.0 - (-1.0 / (sample_rate * 0.01)).exp();
            let release = 1.0 - (-1.0 / (sample_rate * 0.25)).exp();
            let level = input.abs();
            let coeff = if level > *envelope { attack } else { release };
            *envelope += (level - *envelope) * coeff;
            let env_db = 20.0 * envelope.max(1e-6).log10();
            let over = env_db - THRESHOLD_DB;
            let reduction_db = if over <= -KNEE_DB / 2.0 {
                0.0
            } else if over < KNEE_DB / 2.0 {
                let x = over + KNEE_DB / 2.0;
                (x * x) / (2.0 * KNEE_DB) * (1.0 - 1.0 / RATIO)
            } else {
                over * (1.0 - 1.0 / RATIO)
            };
            input * 10f32.powf(-reduction_db / 20.0)
        }

        NodeKind::Destination => input,
    }
}

fn shape(curve: &[f32], x: f32) -> f32 {
    let pos = (x.clamp(-1.0, 1.0) + 1.0) / 2.0 * (curve.len() - 1) as f32;
    let idx = pos as usize;
    if idx + 1 < curve.len() {
        let frac = pos - idx as f32;
        curve[idx] * (1.0 - frac) + curve[idx + 1] * frac
    } else {
        curve[curve.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer;

    #[test]
    fn oscillator_renders_sine() {
        let mut graph = AudioGraph::new(44100.0);
        let osc = graph.add_node(NodeKind::oscillator(Waveform::Sine, 441.0));
        graph.connect(osc, graph.destination());
        graph.start_node(osc, 0.0);

        let mut block = vec![0.0f32; 4410];
        graph.render(&mut block);
        let peak = block.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.7, "sine should reach near unit peak, got {}", peak);
    }

    #[test]
    fn unstarted_source_is_silent() {
        let mut graph = AudioGraph::new(44100.0);
        let osc = graph.add_node(NodeKind::oscillator(Waveform::Sine, 440.0));
        graph.connect(osc, graph.destination());

        let mut block = vec![0.0f32; 512];
        graph.render(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut graph = AudioGraph::new(44100.0);
        let osc = graph.add_node(NodeKind::oscillator(Waveform::Sine, 440.0));
        graph.start_node(osc, 0.0);
        graph.start_node(osc, 1.0);
        graph.stop_node(osc, 2.0);
        graph.stop_node(osc, 3.0);
        graph.stop_node(NodeId(999), 0.0);
        graph.remove_node(NodeId(999));
    }

    #[test]
    fn feedback_cycle_renders_without_error() {
        // delay -> feedback gain -> delay: the documented signal cycle.
        let mut graph = AudioGraph::new(44100.0);
        let osc = graph.add_node(NodeKind::oscillator(Waveform::Sine, 440.0));
        let delay = graph.add_node(NodeKind::delay(1.0, 44100.0));
        let feedback = graph.add_node(NodeKind::gain(0.5));
        if let Some(p) = graph.param_mut(delay, ParamTag::DelayTime) {
            p.set_value_at(0.01, 0.0);
        }
        graph.connect(osc, delay);
        graph.connect(delay, feedback);
        graph.connect(feedback, delay);
        graph.connect(feedback, graph.destination());
        graph.start_node(osc, 0.0);

        let mut block = vec![0.0f32; 4410];
        graph.render(&mut block);
        let energy: f32 = block.iter().map(|s| s * s).sum();
        assert!(energy > 0.0, "delayed signal should come through the loop");
    }

    #[test]
    fn param_modulation_sums_on_top() {
        // A constant node wired into a gain's Gain param doubles a DC source.
        let mut graph = AudioGraph::new(44100.0);
        let dc = graph.add_node(NodeKind::constant(1.0));
        let boost = graph.add_node(NodeKind::constant(0.5));
        let gain = graph.add_node(NodeKind::gain(0.5));
        graph.connect(dc, gain);
        graph.connect_param(boost, gain, ParamTag::Gain);
        graph.connect(gain, graph.destination());
        graph.start_node(dc, 0.0);
        graph.start_node(boost, 0.0);

        let mut block = vec![0.0f32; 16];
        graph.render(&mut block);
        // 1.0 * (0.5 + 0.5) = 1.0, through the destination's soft clip.
        assert!((block[8] - 1.0f32.tanh()).abs() < 1e-3, "got {}", block[8]);
    }

    #[test]
    fn buffer_slice_plays_then_finishes() {
        let mut graph = AudioGraph::new(44100.0);
        let buf = std::sync::Arc::new(buffer::AudioBuffer::new(44100.0, vec![0.5; 4410]));
        let slice = graph.add_node(NodeKind::buffer_slice(buf, 0.0, 0.01));
        graph.connect(slice, graph.destination());
        graph.start_node(slice, 0.0);

        let mut block = vec![0.0f32; 882];
        graph.render(&mut block);
        assert!(block[100] > 0.0);
        assert_eq!(block[600], 0.0, "slice should finish after 441 frames");
    }

    #[test]
    fn convolver_convolves_with_unit_impulse() {
        let impulse = buffer::AudioBuffer::new(44100.0, {
            let mut v = vec![0.0; 64];
            v[0] = 1.0;
            v
        });
        let mut state = ConvolverState::new(&impulse);
        let mut out = Vec::new();
        for i in 0..1024 {
            let x = if i % 50 == 0 { 1.0 } else { 0.0 };
            out.push(state.process(x));
        }
        // Identity impulse: output equals input, delayed by the partition
        // block (the first pop after a block fills returns that block's
        // first sample).
        let block = ConvolverState::BLOCK;
        assert!((out[block - 1] - 1.0).abs() < 1e-3, "got {}", out[block - 1]);
        assert!(out[block].abs() < 1e-3);
    }

    #[test]
    fn removing_nodes_clears_connections() {
        let mut graph = AudioGraph::new(44100.0);
        let a = graph.add_node(NodeKind::gain(1.0));
        let b = graph.add_node(NodeKind::gain(1.0));
        graph.connect(a, b);
        graph.connect(b, graph.destination());
        assert_eq!(graph.connections().len(), 2);
        graph.remove_node(a);
        assert_eq!(graph.connections().len(), 1);
        graph.remove_node(a); // idempotent
    }
}
