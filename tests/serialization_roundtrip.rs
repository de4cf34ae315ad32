mod common;

use common::{tint_chain, BLEND, TINT};
use smart_filter_compiler::{
    deserialize_filter, from_json_str, serialize_filter, to_json_string, validate, BlockRegistry,
    InputValue, OptimizerConfig, SmartFilter, SmartFilterOptimizer,
};

fn registry() -> BlockRegistry {
    let mut registry = BlockRegistry::new();
    registry.register_shader_source(TINT).unwrap();
    registry.register_shader_source(BLEND).unwrap();
    registry
}

#[test]
fn filter_round_trips_through_json() {
    let (mut filter, shaders, _, _) = tint_chain(2);
    filter.comments = Some("demo chain".to_string());
    filter.set_disabled(shaders[0], true);

    let json = to_json_string(&filter).unwrap();
    let restored = from_json_str(&json, &registry()).unwrap();
    assert_eq!(restored, filter);

    // Re-serializing the restored filter is byte-stable.
    assert_eq!(to_json_string(&restored).unwrap(), json);
}

#[test]
fn round_trip_preserves_command_order() {
    let (filter, _, _, _) = tint_chain(3);
    let json = to_json_string(&filter).unwrap();
    let restored = from_json_str(&json, &registry()).unwrap();

    let original_plan = validate(&filter).unwrap();
    let restored_plan = validate(&restored).unwrap();
    assert_eq!(original_plan.order(), restored_plan.order());
}

#[test]
fn optimized_filters_round_trip_without_registration() {
    // Synthetic fused blocks carry their full program in the document, so
    // the built-in registry entries are enough to restore them.
    let (filter, _, _, _) = tint_chain(3);
    let optimized = SmartFilterOptimizer::new(&filter, OptimizerConfig::default())
        .optimize()
        .unwrap()
        .unwrap();

    let json = to_json_string(&optimized).unwrap();
    let restored = from_json_str(&json, &BlockRegistry::new()).unwrap();
    assert_eq!(restored, optimized);
}

#[test]
fn unknown_block_type_is_rejected_with_context() {
    let (filter, _, _, _) = tint_chain(1);
    let json = to_json_string(&filter).unwrap();
    let err = from_json_str(&json, &BlockRegistry::new()).unwrap_err();
    assert!(format!("{err:#}").contains("TintBlock"));
}

#[test]
fn unsupported_version_is_rejected() {
    let (filter, _, _, _) = tint_chain(1);
    let mut doc = serialize_filter(&filter).unwrap();
    doc.version = 2;
    assert!(deserialize_filter(&doc, &registry()).is_err());
}

#[test]
fn editor_data_survives_untouched() {
    let mut filter = SmartFilter::new("with-editor-data");
    let source = filter.add_input("source", InputValue::Texture(None));
    let out = filter.add_output("output").unwrap();
    filter.connect((source, "output"), (out, "input")).unwrap();
    filter.editor_data = Some(serde_json::json!({
        "positions": { "0": [120, 40], "1": [480, 40] },
        "zoom": 1.5,
    }));

    let json = to_json_string(&filter).unwrap();
    let restored = from_json_str(&json, &registry()).unwrap();
    assert_eq!(restored.editor_data, filter.editor_data);
}
