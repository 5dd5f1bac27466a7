//! Modulation routing: fan-in chains, macro parameters, bypass gates
//! and source resolution through cables.

use std::sync::Arc;

use patchbay_graph::{
    connection_rate, find_real_source, CombineMode, NodeError, NodeGraph, ParamRange,
    SourceSelector, BYPASS_PARAM, ROOT_ID,
};

fn graph() -> NodeGraph {
    NodeGraph::with_builtin_nodes(2)
}

#[test]
fn single_connection_binds_directly() {
    let graph = graph();
    let src = graph.create("core.oscillator", "Src").unwrap();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();
    assert!(graph.connect("Src", SourceSelector::Signal, "Gain1", "gain", None));

    let param = graph.get("Gain1").unwrap().parameter_by_id("gain").unwrap();
    assert!(param.is_automated());

    src.mod_output().publish(0.42, 64);
    assert!((param.effective() - 0.42).abs() < 1e-12);

    assert!(graph.disconnect("Src", "Gain1", "gain"));
    assert!(!param.is_automated());
    assert_eq!(param.effective(), 1.0); // back to the static default
}

#[test]
fn fan_in_contributions_are_summed() {
    let graph = graph();
    let a = graph.create("core.oscillator", "A").unwrap();
    let b = graph.create("core.oscillator", "B").unwrap();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();
    graph.connect("A", SourceSelector::Signal, "Gain1", "gain", None);
    graph.connect("B", SourceSelector::Signal, "Gain1", "gain", None);

    a.mod_output().publish(0.3, 64);
    b.mod_output().publish(0.4, 64);
    let param = graph.get("Gain1").unwrap().parameter_by_id("gain").unwrap();
    assert!((param.effective() - 0.7).abs() < 1e-12);
}

#[test]
fn product_targets_multiply_raw_values() {
    let graph = graph();
    let a = graph.create("core.oscillator", "A").unwrap();
    let b = graph.create("core.oscillator", "B").unwrap();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();

    let param = graph.get("Gain1").unwrap().parameter_by_id("gain").unwrap();
    param.set_combine(CombineMode::Product);
    graph.connect("A", SourceSelector::Signal, "Gain1", "gain", None);
    graph.connect("B", SourceSelector::Signal, "Gain1", "gain", None);

    a.mod_output().publish(0.5, 64);
    b.mod_output().publish(0.5, 64);
    assert!((param.effective() - 0.25).abs() < 1e-12);
}

#[test]
fn product_targets_refuse_foreign_remaps() {
    let graph = graph();
    graph.create("core.oscillator", "A").unwrap();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();
    let param = graph.get("Gain1").unwrap().parameter_by_id("gain").unwrap();
    param.set_combine(CombineMode::Product);

    assert!(graph.connect(
        "A",
        SourceSelector::Signal,
        "Gain1",
        "gain",
        Some(ParamRange::new(0.0, 2.0)),
    ));
    assert_eq!(
        graph.errors().get("Gain1"),
        Some(NodeError::UnscaledModRangeMismatch)
    );
    // The remap was dropped rather than silently applied.
    let a = graph.get("A").unwrap();
    assert!(a.mod_targets()[0].range.is_none());
}

#[test]
fn macro_parameter_pushes_through_link_ranges() {
    let graph = graph();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();
    graph.create_and_add("container.chain", "Rack", ROOT_ID).unwrap();
    graph
        .add_macro_parameter("Rack", "bias", ParamRange::new(1.0, 3.0))
        .unwrap();
    graph
        .add_macro_parameter("Rack", "depth", ParamRange::new(0.0, 100.0))
        .unwrap();
    graph
        .add_macro_parameter(ROOT_ID, "Macro1", ParamRange::new(0.0, 2.0))
        .unwrap();

    // Links in the targets' own ranges plus one explicit remap.
    assert!(graph.connect(
        ROOT_ID,
        SourceSelector::Parameter("Macro1".into()),
        "Gain1",
        "gain",
        None,
    ));
    assert!(graph.connect(
        ROOT_ID,
        SourceSelector::Parameter("Macro1".into()),
        "Rack",
        "bias",
        None,
    ));
    assert!(graph.connect(
        ROOT_ID,
        SourceSelector::Parameter("Macro1".into()),
        "Rack",
        "depth",
        Some(ParamRange::new(10.0, 30.0)),
    ));

    assert!(graph.set_parameter("Macro1", 1.5)); // normalised 0.75
    let gain = graph.get("Gain1").unwrap().parameter_by_id("gain").unwrap();
    assert!((gain.value() - 0.75).abs() < 1e-9);
    let rack = graph.get("Rack").unwrap();
    assert!((rack.parameter_by_id("bias").unwrap().value() - 2.5).abs() < 1e-9);
    assert!((rack.parameter_by_id("depth").unwrap().value() - 25.0).abs() < 1e-9);
}

#[test]
fn macro_parameters_are_container_only_and_bounded() {
    let graph = graph();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();
    assert!(graph
        .add_macro_parameter("Gain1", "macro", ParamRange::default())
        .is_none());
    assert!(matches!(
        graph.errors().get("Gain1"),
        Some(NodeError::InitialisationError(_))
    ));
}

#[test]
fn bypass_gate_follows_the_published_value() {
    let graph = graph();
    let ctl = graph.create("core.oscillator", "Ctl").unwrap();
    graph.create_and_add("core.gain", "Gain1", ROOT_ID).unwrap();
    graph.create_and_add("core.oscillator", "Osc1", ROOT_ID).unwrap();
    graph.prepare_to_play(44_100.0, 64);

    assert!(graph.connect_to_bypass("Ctl", "Gain1", ParamRange::new(0.5, 1.0)));
    let gain = graph.get("Gain1").unwrap();
    assert!(gain.has_gate());

    let mut storage = vec![vec![0.0f32; 64]; 2];
    let mut render = |graph: &NodeGraph| {
        let mut refs: Vec<&mut [f32]> = storage.iter_mut().map(|c| c.as_mut_slice()).collect();
        graph.process(&mut refs, &[]);
    };

    ctl.mod_output().publish(0.8, 64);
    render(&graph);
    assert!(!gain.is_bypassed());

    ctl.mod_output().publish(0.2, 64);
    render(&graph);
    assert!(gain.is_bypassed());

    // Disconnecting the gate leaves the flag where it was.
    assert!(graph.disconnect("Ctl", "Gain1", BYPASS_PARAM));
    assert!(!gain.has_gate());
    assert!(gain.is_bypassed());
}

#[test]
fn adapters_refuse_bypass_gates() {
    let graph = graph();
    graph.create("core.oscillator", "Ctl").unwrap();
    graph
        .create_and_add("container.oversample", "Ovs", ROOT_ID)
        .unwrap();
    assert!(!graph.connect_to_bypass("Ctl", "Ovs", ParamRange::default()));
    assert_eq!(
        graph.errors().get("Ovs"),
        Some(NodeError::IllegalBypassConnection)
    );

    // Sticky: a generic clear keeps the entry.
    graph.errors().remove(None, None);
    assert_eq!(
        graph.errors().get("Ovs"),
        Some(NodeError::IllegalBypassConnection)
    );
    graph
        .errors()
        .remove(Some("Ovs"), Some(&NodeError::IllegalBypassConnection));
    assert!(graph.errors().get("Ovs").is_none());
}

#[test]
fn cables_forward_their_driving_source() {
    let graph = graph();
    let osc = graph.create("core.oscillator", "Osc1").unwrap();
    let cable = graph.create("routing.cable", "Patch1").unwrap();
    graph.connect("Osc1", SourceSelector::Signal, "Patch1", "value", None);

    let resolved = find_real_source(&cable);
    assert!(Arc::ptr_eq(&resolved, &osc));

    // An unconnected cable resolves to itself.
    let loose = graph.create("routing.cable", "Patch2").unwrap();
    assert!(Arc::ptr_eq(&find_real_source(&loose), &loose));
}

#[test]
fn connection_rate_reflects_the_common_ancestor() {
    let graph = graph();
    graph
        .create_and_add("container.oversample", "Ovs", ROOT_ID)
        .unwrap();
    graph.create_and_add("core.gain", "GainA", "Ovs").unwrap();
    graph.create_and_add("core.gain", "GainB", "Ovs").unwrap();
    graph
        .create_and_add("container.modchain", "Lane", ROOT_ID)
        .unwrap();
    graph.create_and_add("routing.cable", "CtlA", "Lane").unwrap();
    graph.create_and_add("routing.cable", "CtlB", "Lane").unwrap();
    graph.prepare_to_play(44_100.0, 512);

    let a = graph.get("GainA").unwrap();
    let b = graph.get("GainB").unwrap();
    assert_eq!(connection_rate(&a, &b), Some(88_200.0));

    let ca = graph.get("CtlA").unwrap();
    let cb = graph.get("CtlB").unwrap();
    assert_eq!(connection_rate(&ca, &cb), Some(44_100.0 / 8.0));

    // Across the two sub-trees the ancestor is the root chain.
    assert_eq!(connection_rate(&a, &ca), Some(44_100.0));
}
