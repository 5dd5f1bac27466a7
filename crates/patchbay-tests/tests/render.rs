//! End-to-end rendering: the non-blocking render path, event-split
//! blocks, async parameter adoption and the modulation tap.

use patchbay_graph::{
    Event, NodeGraph, RenderOutcome, SourceSelector, DEFAULT_TAP_CAPACITY, ROOT_ID,
};

fn render(graph: &NodeGraph, storage: &mut [Vec<f32>], events: &[Event]) -> RenderOutcome {
    let mut refs: Vec<&mut [f32]> = storage.iter_mut().map(|c| c.as_mut_slice()).collect();
    graph.process(&mut refs, events)
}

#[test]
fn oscillator_drives_the_gain_parameter() {
    let graph = NodeGraph::with_builtin_nodes(2);
    graph.create_and_add("core.oscillator", "Osc1", ROOT_ID).unwrap();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();
    assert!(graph.connect("Osc1", SourceSelector::Signal, "Gain1", "gain", None));
    graph.prepare_to_play(44_100.0, 64);

    let mut storage = vec![vec![0.0f32; 64]; 2];
    assert_eq!(render(&graph, &mut storage, &[]), RenderOutcome::Rendered);

    let osc = graph.get("Osc1").unwrap();
    let gain = graph.get("Gain1").unwrap().parameter_by_id("gain").unwrap();
    // The chain read the value the oscillator published this block.
    assert!((gain.effective() - osc.mod_output().last()).abs() < 1e-12);
    assert!(storage[0].iter().any(|&s| s != 0.0));
}

#[test]
fn render_skips_while_an_edit_is_in_flight() {
    let graph = NodeGraph::with_builtin_nodes(2);
    graph.create_and_add("core.oscillator", "Osc1", ROOT_ID).unwrap();
    graph.prepare_to_play(44_100.0, 64);

    let mut storage = vec![vec![0.123f32; 64]; 2];
    {
        let _edit = graph.edit_scope();
        assert_eq!(render(&graph, &mut storage, &[]), RenderOutcome::Skipped);
    }
    // The skipped block left the buffer exactly as passed in.
    assert!(storage.iter().all(|c| c.iter().all(|&s| s == 0.123)));

    assert_eq!(render(&graph, &mut storage, &[]), RenderOutcome::Rendered);
    let stats = graph.render_stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.rendered, 1);
}

#[test]
fn events_split_the_block_at_their_offset() {
    let graph = NodeGraph::with_builtin_nodes(1);
    graph.create_and_add("core.oscillator", "Osc1", ROOT_ID).unwrap();
    graph.prepare_to_play(44_100.0, 128);

    let mut storage = vec![vec![0.0f32; 128]];
    let events = [Event::note_on(0, 60, 100, 64)];
    render(&graph, &mut storage, &events);

    // Note-on resets the phase, so the sample right at the offset is
    // the start of a fresh sine cycle.
    assert!(storage[0][64].abs() < 1e-6);
    assert!(storage[0][63].abs() > 0.1);
}

#[test]
fn async_parameter_writes_are_adopted_before_rendering() {
    let graph = NodeGraph::with_builtin_nodes(1);
    graph.create_and_add("core.oscillator", "Osc1", ROOT_ID).unwrap();
    graph.prepare_to_play(44_100.0, 64);

    let level = graph
        .get("Osc1")
        .unwrap()
        .parameter_by_id("level")
        .unwrap();
    level.set_value_async(0.0);
    assert_eq!(level.value(), 0.5); // not applied yet

    let mut storage = vec![vec![1.0f32; 64]];
    render(&graph, &mut storage, &[]);
    assert_eq!(level.value(), 0.0);
    assert!(storage[0].iter().all(|&s| s == 0.0));
}

#[test]
fn modulation_tap_collects_one_slot_per_block() {
    let graph = NodeGraph::with_builtin_nodes(1);
    graph.create_and_add("core.oscillator", "Osc1", ROOT_ID).unwrap();
    graph.prepare_to_play(44_100.0, 128);

    let osc = graph.get("Osc1").unwrap();
    let mut reader = osc.mod_output().attach_tap(DEFAULT_TAP_CAPACITY).unwrap();

    let mut storage = vec![vec![0.0f32; 128]];
    render(&graph, &mut storage, &[]);
    render(&graph, &mut storage, &[]);

    let mut slots = Vec::new();
    assert_eq!(reader.read_slots(&mut slots), 2);
    assert!(slots.iter().all(|slot| slot.run == 128));
    // Destructive read: nothing is left behind.
    assert_eq!(reader.read_slots(&mut slots), 0);
}

#[test]
fn render_stats_track_timing() {
    let graph = NodeGraph::with_builtin_nodes(2);
    graph.create_and_add("core.oscillator", "Osc1", ROOT_ID).unwrap();
    graph.prepare_to_play(44_100.0, 256);

    let mut storage = vec![vec![0.0f32; 256]; 2];
    for _ in 0..4 {
        render(&graph, &mut storage, &[]);
    }
    let stats = graph.render_stats();
    assert_eq!(stats.rendered, 4);
    assert_eq!(stats.skipped, 0);
    assert!(stats.peak_micros >= stats.last_micros);
}
