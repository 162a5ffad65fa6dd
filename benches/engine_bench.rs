use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

use auralis::engine::Engine;
use auralis::types::{EngineRules, SourceDescriptor, SourceKind};

fn bench_render(c: &mut Criterion) {
    let mut engine = Engine::new(44100.0);
    let rules = EngineRules {
        max_polyphony: 8,
        ..EngineRules::default()
    };
    let sources: Vec<SourceDescriptor> = (0..8)
        .map(|i| SourceDescriptor::new(format!("s{}", i), 50.0 * i as f32, SourceKind::Oscillator))
        .collect();
    engine.update(&sources, &rules, &HashMap::new(), &HashMap::new(), false, None);
    engine.start();

    let mut block = vec![0.0f32; 512];
    c.bench_function("render_512_block_8_voices", |b| {
        b.iter(|| {
            engine.render(black_box(&mut block));
        })
    });
}

fn bench_euclid(c: &mut Criterion) {
    c.bench_function("euclid_generate_16_32", |b| {
        b.iter(|| auralis::euclid::generate(black_box(16), black_box(32)))
    });
}

criterion_group!(benches, bench_render, bench_euclid);
criterion_main!(benches);
