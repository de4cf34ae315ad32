mod common;

use common::{program, tint_chain, BLEND, TINT};
use proptest::prelude::*;
use smart_filter_compiler::{validate, GraphError, InputValue, SmartFilter};

#[test]
fn chain_order_matches_dependencies() {
    let (filter, shaders, source, out) = tint_chain(3);
    let plan = validate(&filter).unwrap();
    let mut expected = vec![source];
    expected.extend(shaders);
    expected.push(out);
    assert_eq!(plan.order(), expected.as_slice());
}

#[test]
fn reachable_cycle_is_detected() {
    // blend.background <- pass.output and pass.input <- blend.output forms
    // a cycle that still reaches the output block.
    let mut filter = SmartFilter::new("cyclic");
    let foreground = filter.add_input("fg", InputValue::Texture(None));
    let blend = filter.add_shader_block("blend", "BlendBlock", program(BLEND));
    let pass = filter.add_shader_block("pass", "TintBlock", program(TINT));
    let out = filter.add_output("output").unwrap();

    filter.connect((foreground, "output"), (blend, "foreground")).unwrap();
    filter.connect((pass, "output"), (blend, "background")).unwrap();
    filter.connect((blend, "output"), (pass, "input")).unwrap();
    filter.connect((blend, "output"), (out, "input")).unwrap();

    assert!(matches!(validate(&filter), Err(GraphError::CyclicGraph { .. })));
}

#[test]
fn two_validations_yield_identical_plans() {
    let (filter, _, _, _) = tint_chain(4);
    let before = filter.clone();
    assert_eq!(validate(&filter).unwrap(), validate(&filter).unwrap());
    assert_eq!(filter, before, "validation must never mutate the graph");
}

/// Build a DAG from a decision tape: 0 pushes a texture input, 1 wraps the
/// top producer in a tint pass, 2 blends the top two producers. Whatever
/// remains is cascaded into one output.
fn build_from_tape(tape: &[u8]) -> SmartFilter {
    let mut filter = SmartFilter::new("taped");
    let mut producers = Vec::new();
    let mut n = 0usize;
    for &code in tape {
        match code {
            0 => {
                producers.push(filter.add_input(format!("in{n}"), InputValue::Texture(None)));
            }
            1 => {
                if let Some(top) = producers.pop() {
                    let id =
                        filter.add_shader_block(format!("tint{n}"), "TintBlock", program(TINT));
                    filter.connect((top, "output"), (id, "input")).unwrap();
                    producers.push(id);
                }
            }
            _ => {
                if producers.len() >= 2 {
                    let a = producers.pop().unwrap();
                    let b = producers.pop().unwrap();
                    let id =
                        filter.add_shader_block(format!("blend{n}"), "BlendBlock", program(BLEND));
                    filter.connect((a, "output"), (id, "background")).unwrap();
                    filter.connect((b, "output"), (id, "foreground")).unwrap();
                    producers.push(id);
                }
            }
        }
        n += 1;
    }
    if producers.is_empty() {
        producers.push(filter.add_input("fallback", InputValue::Texture(None)));
    }
    while producers.len() > 1 {
        let a = producers.pop().unwrap();
        let b = producers.pop().unwrap();
        let id = filter.add_shader_block(format!("join{n}"), "BlendBlock", program(BLEND));
        filter.connect((a, "output"), (id, "background")).unwrap();
        filter.connect((b, "output"), (id, "foreground")).unwrap();
        producers.push(id);
        n += 1;
    }
    let root = producers.pop().unwrap();
    let out = filter.add_output("output").unwrap();
    filter.connect((root, "output"), (out, "input")).unwrap();
    filter
}

proptest! {
    #[test]
    fn random_dags_order_every_edge_forward(tape in proptest::collection::vec(0u8..=2, 1..32)) {
        let filter = build_from_tape(&tape);
        let plan = validate(&filter).unwrap();
        for conn in filter.connections() {
            let from = plan.position(conn.from.block).unwrap();
            let to = plan.position(conn.to.block).unwrap();
            prop_assert!(from < to, "edge {:?} -> {:?} out of order", conn.from, conn.to);
        }
        prop_assert_eq!(*plan.order().last().unwrap(), plan.output_block());
    }

    #[test]
    fn back_edges_always_fail_as_cycles(len in 3usize..8, pick in 0usize..6) {
        let (mut filter, shaders, _, _) = tint_chain(len);
        // Rewire an earlier block's main input from a later block's output.
        let early = pick % (len - 1);
        let late = early + 1 + pick % (len - early - 1);
        filter.disconnect_input(shaders[early], "input");
        filter.connect((shaders[late], "output"), (shaders[early], "input")).unwrap();
        prop_assert!(matches!(validate(&filter), Err(GraphError::CyclicGraph { .. })), "expected cyclic graph error");
    }
}
