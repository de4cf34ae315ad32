//! Shared fixtures for integration tests: annotated block sources and
//! filter builders.
#![allow(dead_code)]

use smart_filter_compiler::shader::parse::parse_fragment_block;
use smart_filter_compiler::{BlockId, InputValue, ShaderProgram, SmartFilter};

/// Route crate logs (fusion decisions, infeasibility warnings) through the
/// test harness when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const TINT: &str = r#"/*
{ "smartFilterBlockType": "TintBlock" }
*/
uniform sampler2D _input_; // main
uniform vec3 _tint_;

const float _WEIGHT_ = 0.85;

vec4 _getColor_(float f) {
    return vec4(f, f, f, 1.0);
}

vec4 _getColor_(vec3 v) {
    return vec4(v * _WEIGHT_, 1.0);
}

vec4 _tintMain_(vec2 vUV) { // main
    vec4 color = texture(_input_, vUV);
    return _getColor_(color.rgb * _tint_);
}
"#;

pub const DESATURATE: &str = r#"/*
{ "smartFilterBlockType": "DesaturateBlock" }
*/
uniform sampler2D _input_; // main
uniform float _intensity_;

vec4 _desaturateMain_(vec2 vUV) { // main
    vec4 color = texture(_input_, vUV);
    float gray = dot(color.rgb, vec3(0.3, 0.59, 0.11));
    return vec4(mix(color.rgb, vec3(gray), _intensity_), color.a);
}
"#;

pub const BLEND: &str = r#"/*
{ "smartFilterBlockType": "BlendBlock" }
*/
uniform sampler2D _background_; // main
uniform sampler2D _foreground_;
uniform float _mixAmount_;

vec4 _blendMain_(vec2 vUV) { // main
    vec4 base = texture(_background_, vUV);
    vec4 top = texture(_foreground_, vUV);
    return mix(base, top, _mixAmount_);
}
"#;

pub fn program(source: &str) -> ShaderProgram {
    ShaderProgram::from_fragment(parse_fragment_block(source).unwrap().fragment)
}

/// `source -> tint_0 -> ... -> tint_{n-1} -> output`, returning the shader
/// block ids in chain order plus the source and output ids.
pub fn tint_chain(n: usize) -> (SmartFilter, Vec<BlockId>, BlockId, BlockId) {
    let mut filter = SmartFilter::new("tint-chain");
    let source = filter.add_input("source", InputValue::Texture(Some("photo".to_string())));
    let mut shader_ids = Vec::with_capacity(n);
    let mut prev = source;
    for i in 0..n {
        let id = filter.add_shader_block(format!("tint{i}"), "TintBlock", program(TINT));
        filter.connect((prev, "output"), (id, "input")).unwrap();
        shader_ids.push(id);
        prev = id;
    }
    let out = filter.add_output("output").unwrap();
    filter.connect((prev, "output"), (out, "input")).unwrap();
    (filter, shader_ids, source, out)
}
