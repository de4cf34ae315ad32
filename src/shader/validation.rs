//! GLSL validation using the naga library.

use anyhow::{anyhow, Context, Result};

/// Parse a fragment-stage GLSL source through naga's GLSL frontend.
///
/// Used on merger output: a merged program that fails to parse indicates a
/// bug in the merger, so errors carry the full numbered source for
/// debugging.
pub fn validate_fragment_glsl(source: &str) -> Result<naga::Module> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: naga::ShaderStage::Fragment,
        defines: Default::default(),
    };
    frontend
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL validation failed:\n{}", format_parse_failure(source, &format!("{e:?}"))))
}

/// Validate and record which component generated the source.
pub fn validate_fragment_glsl_with_context(source: &str, context: &str) -> Result<naga::Module> {
    validate_fragment_glsl(source).with_context(|| format!("{context} generated invalid GLSL"))
}

fn format_parse_failure(source: &str, error: &str) -> String {
    let mut output = String::new();
    output.push_str(&format!("  {error}\n"));

    output.push_str("\nGenerated GLSL:\n");
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_glsl() {
        let source = r#"
#version 450

layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 fragColor;

uniform sampler2D inputTexture;
uniform float amount;

void main() {
    vec4 color = texture(inputTexture, vUV);
    fragColor = color * amount;
}
"#;
        assert!(validate_fragment_glsl(source).is_ok());
    }

    #[test]
    fn test_invalid_glsl_syntax() {
        let source = "vec4 broken( { return vec4(1.0); }";
        assert!(validate_fragment_glsl(source).is_err());
    }

    #[test]
    fn test_validate_with_context() {
        let source = "not glsl at all";
        let result = validate_fragment_glsl_with_context(source, "fusion optimizer");
        assert!(result.is_err());
        let err_msg = format!("{:#}", result.unwrap_err());
        assert!(err_msg.contains("fusion optimizer"));
    }
}
