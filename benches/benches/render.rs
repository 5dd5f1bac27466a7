use criterion::{criterion_group, criterion_main, Criterion};

use patchbay_graph::{NodeGraph, ParamRange, SourceSelector, ROOT_ID};

fn chain_graph(stages: usize) -> NodeGraph {
    let graph = NodeGraph::with_builtin_nodes(2);
    graph
        .create_and_add("core.oscillator", "Osc", ROOT_ID)
        .unwrap();
    for stage in 0..stages {
        let id = format!("Gain{stage}");
        graph.create_and_add("core.gain", &id, ROOT_ID).unwrap();
        graph.connect("Osc", SourceSelector::Signal, &id, "gain", None);
    }
    graph
}

fn bench_serial_chain(c: &mut Criterion) {
    let graph = chain_graph(16);
    graph.prepare_to_play(48_000.0, 256);
    let mut storage = vec![vec![0.0f32; 256]; 2];

    c.bench_function("render_serial_chain_16", |b| {
        b.iter(|| {
            let mut refs: Vec<&mut [f32]> =
                storage.iter_mut().map(|c| c.as_mut_slice()).collect();
            graph.process(&mut refs, &[]);
        })
    });
}

fn bench_oversampled_chain(c: &mut Criterion) {
    let graph = NodeGraph::with_builtin_nodes(2);
    graph
        .create_and_add("container.oversample", "Ovs", ROOT_ID)
        .unwrap();
    graph.create_and_add("core.oscillator", "Osc", "Ovs").unwrap();
    graph.create_and_add("core.gain", "Gain", "Ovs").unwrap();
    graph.prepare_to_play(48_000.0, 256);
    let mut storage = vec![vec![0.0f32; 256]; 2];

    c.bench_function("render_oversampled_chain", |b| {
        b.iter(|| {
            let mut refs: Vec<&mut [f32]> =
                storage.iter_mut().map(|c| c.as_mut_slice()).collect();
            graph.process(&mut refs, &[]);
        })
    });
}

fn bench_mutation_while_idle(c: &mut Criterion) {
    let graph = chain_graph(8);
    graph.prepare_to_play(48_000.0, 256);

    c.bench_function("connect_disconnect_cycle", |b| {
        b.iter(|| {
            graph.connect(
                "Osc",
                SourceSelector::Signal,
                "Gain0",
                "gain",
                Some(ParamRange::new(0.0, 0.5)),
            );
            graph.disconnect("Osc", "Gain0", "gain");
        })
    });
}

criterion_group!(
    benches,
    bench_serial_chain,
    bench_oversampled_chain,
    bench_mutation_while_idle
);
criterion_main!(benches);
