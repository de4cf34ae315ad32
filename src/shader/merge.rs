//! Merging chained fragment programs into one.
//!
//! Given N programs in chain order, each block's main input texture fed by
//! its predecessor's output, this produces a single fragment program that
//! computes the same result in one pass. Every renamable symbol gets a
//! per-instance ordinal suffix, sample calls against a successor's main
//! input become direct calls of the predecessor's main function, and helper
//! functions repeated across instances of one block class are emitted once.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use super::program::{
    ConstDecl, FragmentShader, GlslType, Segment, ShaderFunction, TokenizedSource, UniformDecl,
};

/// Name of the synthesized chained main function in a merged program.
pub const MERGED_MAIN: &str = "mergedMain";

/// One member of a fusion group, in chain order.
#[derive(Clone, Copy, Debug)]
pub struct MergeEntry<'a> {
    /// Block class name; helper deduplication only applies between
    /// instances of the same class.
    pub block_class: &'a str,
    pub fragment: &'a FragmentShader,
}

/// Where a merged uniform came from.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedInput {
    /// Ordinal of the contributing member within the group.
    pub member: usize,
    /// The uniform's name in the member's own program.
    pub original: String,
    /// The uniform's name in the merged program.
    pub merged_name: String,
    pub ty: GlslType,
}

#[derive(Clone, Debug)]
pub struct MergedProgram {
    pub fragment: FragmentShader,
    /// All surviving uniforms, in member order then declaration order.
    pub inputs: Vec<MergedInput>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct HelperGroupKey {
    class: String,
    name: String,
    overloads: Vec<(Vec<String>, String, TokenizedSource)>,
}

/// Merge `entries` (chain order, N >= 2) into a single fragment program.
///
/// Callers are expected to have checked fusion eligibility already; a
/// violation surfacing here (missing main input on a successor, post-rename
/// name collision) is an internal error, not a user-facing one.
pub fn merge_programs(entries: &[MergeEntry<'_>]) -> Result<MergedProgram> {
    if entries.len() < 2 {
        bail!("internal: merge_programs requires at least two programs, got {}", entries.len());
    }

    let mut uniforms: Vec<UniformDecl> = Vec::new();
    let mut consts: Vec<ConstDecl> = Vec::new();
    let mut functions: Vec<ShaderFunction> = Vec::new();
    let mut inputs: Vec<MergedInput> = Vec::new();
    let mut used_uniform_names: HashSet<String> = HashSet::new();
    let mut dedup: HashMap<HelperGroupKey, String> = HashMap::new();
    let mut prev_main: Option<String> = None;

    for (ordinal, entry) in entries.iter().enumerate() {
        let frag = entry.fragment;
        check_symbols_declared(frag)?;

        let main_input = frag.main_input_texture.as_deref();
        if ordinal > 0 {
            if main_input.is_none() {
                bail!("internal: chained program {ordinal} has no main input texture");
            }
            if !frag.main_input_only_sampled() {
                bail!(
                    "internal: chained program {ordinal} uses its main input outside a sample call"
                );
            }
        }

        // Uniforms. The main input of every member but the first is fed by
        // the predecessor in-register and disappears entirely.
        let dropped_main_input = if ordinal > 0 { main_input } else { None };
        for u in &frag.uniforms {
            if Some(u.name.as_str()) == dropped_main_input {
                continue;
            }
            let merged_name = suffixed(&u.name, ordinal);
            if !used_uniform_names.insert(merged_name.clone()) {
                bail!("internal: uniform name collision after rename: {merged_name}");
            }
            uniforms.push(UniformDecl { name: merged_name.clone(), ty: u.ty });
            inputs.push(MergedInput {
                member: ordinal,
                original: u.name.clone(),
                merged_name,
                ty: u.ty,
            });
        }

        // Function rename plan: overload groups in first-occurrence order.
        // All overloads of one name share a post-rename name so overload
        // resolution at call sites is preserved.
        let groups = overload_groups(frag);
        let pure = pure_group_names(frag, &groups);
        let mut fn_renames: HashMap<String, String> = HashMap::new();
        let mut emit_groups: Vec<&str> = Vec::new();
        for (name, overloads) in &groups {
            if *name != frag.main_function_name && pure.contains(name.as_str()) {
                let key = HelperGroupKey {
                    class: entry.block_class.to_string(),
                    name: name.clone(),
                    overloads: overloads
                        .iter()
                        .map(|f| (f.param_signature(), f.return_type.clone(), f.body.clone()))
                        .collect(),
                };
                if let Some(existing) = dedup.get(&key) {
                    fn_renames.insert(name.clone(), existing.clone());
                    continue;
                }
                let renamed = suffixed(name, ordinal);
                dedup.insert(key, renamed.clone());
                fn_renames.insert(name.clone(), renamed);
            } else {
                fn_renames.insert(name.clone(), suffixed(name, ordinal));
            }
            emit_groups.push(name);
        }

        // Full symbol map for this member: uniforms, consts, functions.
        let mut symbol_map: HashMap<String, String> = fn_renames;
        for u in &frag.uniforms {
            if Some(u.name.as_str()) != dropped_main_input {
                symbol_map.insert(u.name.clone(), suffixed(&u.name, ordinal));
            }
        }
        for c in &frag.consts {
            symbol_map.insert(c.name.clone(), suffixed(&c.name, ordinal));
        }

        for c in &frag.consts {
            consts.push(ConstDecl {
                name: symbol_map[&c.name].clone(),
                ty: c.ty,
                value: rename_source(&c.value, &symbol_map, dropped_main_input, prev_main.as_deref()),
            });
        }

        let emit_set: HashSet<&str> = emit_groups.iter().copied().collect();
        for f in &frag.functions {
            if !emit_set.contains(f.name.as_str()) {
                continue;
            }
            functions.push(ShaderFunction {
                name: symbol_map[&f.name].clone(),
                return_type: f.return_type.clone(),
                params: f.params.clone(),
                body: rename_source(&f.body, &symbol_map, dropped_main_input, prev_main.as_deref()),
            });
        }

        prev_main = Some(symbol_map[&frag.main_function_name].clone());
    }

    let last_main = prev_main.expect("at least two members were merged");
    functions.push(ShaderFunction {
        name: MERGED_MAIN.to_string(),
        return_type: "vec4".to_string(),
        params: "vec2 vUV".to_string(),
        body: TokenizedSource::new(vec![
            Segment::Text("\n    return ".to_string()),
            Segment::Symbol(last_main),
            Segment::Text("(vUV);\n".to_string()),
        ]),
    });

    let main_input_texture = entries[0]
        .fragment
        .main_input_texture
        .as_ref()
        .map(|name| suffixed(name, 0));

    Ok(MergedProgram {
        fragment: FragmentShader {
            uniforms,
            consts,
            functions,
            main_function_name: MERGED_MAIN.to_string(),
            main_input_texture,
        },
        inputs,
    })
}

fn suffixed(name: &str, ordinal: usize) -> String {
    format!("{name}_{ordinal}")
}

/// Rewrite one tokenized source through the member's symbol map. Sample
/// calls against the dropped main input become a call of the predecessor's
/// main function; other sample calls keep their (renamed) sampler.
fn rename_source(
    src: &TokenizedSource,
    symbol_map: &HashMap<String, String>,
    dropped_main_input: Option<&str>,
    prev_main: Option<&str>,
) -> TokenizedSource {
    let mut segments = Vec::with_capacity(src.segments.len());
    for seg in &src.segments {
        match seg {
            Segment::Text(t) => segments.push(Segment::Text(t.clone())),
            Segment::Symbol(name) => {
                let renamed = symbol_map.get(name).cloned().unwrap_or_else(|| name.clone());
                segments.push(Segment::Symbol(renamed));
            }
            Segment::SampleCall { sampler } => {
                if Some(sampler.as_str()) == dropped_main_input {
                    let prev = prev_main.expect("dropped main input implies a predecessor");
                    segments.push(Segment::Symbol(prev.to_string()));
                    segments.push(Segment::Text("(".to_string()));
                } else {
                    let renamed =
                        symbol_map.get(sampler).cloned().unwrap_or_else(|| sampler.clone());
                    segments.push(Segment::SampleCall { sampler: renamed });
                }
            }
        }
    }
    TokenizedSource::new(segments)
}

/// Overload groups in first-occurrence order.
fn overload_groups(frag: &FragmentShader) -> Vec<(String, Vec<&ShaderFunction>)> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: HashMap<&str, Vec<&ShaderFunction>> = HashMap::new();
    for f in &frag.functions {
        if !by_name.contains_key(f.name.as_str()) {
            order.push(f.name.clone());
        }
        by_name.entry(f.name.as_str()).or_default().push(f);
    }
    order
        .into_iter()
        .map(|name| {
            let fns = by_name.remove(name.as_str()).unwrap_or_default();
            (name, fns)
        })
        .collect()
}

/// Names of function groups whose bodies depend on nothing instance-bound:
/// no uniforms, no sample calls, and only other pure functions or consts.
/// Only these are safe to share between instances of the same block class.
fn pure_group_names<'a>(
    frag: &'a FragmentShader,
    groups: &[(String, Vec<&'a ShaderFunction>)],
) -> HashSet<&'a str> {
    let uniform_names: HashSet<&str> = frag.uniforms.iter().map(|u| u.name.as_str()).collect();
    let const_names: HashSet<&str> = frag.consts.iter().map(|c| c.name.as_str()).collect();

    let mut pure: HashSet<&str> = HashSet::new();
    // GLSL requires declaration before use, so one ordered pass suffices.
    for (name, overloads) in groups {
        let ok = overloads.iter().all(|f| {
            f.body.segments.iter().all(|seg| match seg {
                Segment::Text(_) => true,
                Segment::SampleCall { .. } => false,
                Segment::Symbol(sym) => {
                    if uniform_names.contains(sym.as_str()) {
                        false
                    } else if const_names.contains(sym.as_str()) {
                        true
                    } else {
                        // A function reference: pure only if the target is,
                        // or it is a same-name overload call.
                        pure.contains(sym.as_str()) || sym == name
                    }
                }
            })
        });
        if ok {
            // Borrow the name from the fragment's own function list so the
            // returned set outlives `groups`.
            if let Some(f) = frag.functions.iter().find(|f| &f.name == name) {
                pure.insert(f.name.as_str());
            }
        }
    }
    pure
}

/// Every symbol referenced by a program must be one of its own uniform,
/// const, or function names.
fn check_symbols_declared(frag: &FragmentShader) -> Result<()> {
    let mut declared: HashSet<&str> = HashSet::new();
    declared.extend(frag.uniforms.iter().map(|u| u.name.as_str()));
    declared.extend(frag.consts.iter().map(|c| c.name.as_str()));
    declared.extend(frag.functions.iter().map(|f| f.name.as_str()));

    let check = |src: &TokenizedSource, what: &str| -> Result<()> {
        for sym in src.referenced_symbols() {
            if !declared.contains(sym) {
                bail!("undeclared symbol `{sym}` referenced by {what}");
            }
        }
        Ok(())
    };
    for c in &frag.consts {
        check(&c.value, &format!("const `{}`", c.name))?;
    }
    for f in &frag.functions {
        check(&f.body, &format!("function `{}`", f.name))?;
    }
    Ok(())
}

// ── Source emission ──────────────────────────────────────────────────────

/// Emit a complete `#version 450` fragment source for a program: uniform
/// and const declarations, all functions, and an entry `main` that writes
/// the program's main function result to the color output.
///
/// Samplers are emitted as loose combined-sampler uniforms; value uniforms
/// go into one std140 block, the shape naga's GLSL frontend accepts.
pub fn emit_fragment_source(frag: &FragmentShader) -> String {
    let mut out = String::new();
    out.push_str("#version 450\n\n");
    out.push_str("layout(location = 0) in vec2 vUV;\n");
    out.push_str("layout(location = 0) out vec4 fragColor;\n\n");

    let (samplers, values): (Vec<_>, Vec<_>) =
        frag.uniforms.iter().partition(|u| u.ty == GlslType::Sampler2D);
    for u in &samplers {
        out.push_str(&format!("uniform {} {};\n", u.ty.glsl(), u.name));
    }
    if !samplers.is_empty() {
        out.push('\n');
    }
    if !values.is_empty() {
        out.push_str("layout(std140) uniform BlockParams {\n");
        for u in &values {
            out.push_str(&format!("    {} {};\n", u.ty.glsl(), u.name));
        }
        out.push_str("};\n\n");
    }

    for c in &frag.consts {
        out.push_str(&format!("const {} {} = {};\n", c.ty.glsl(), c.name, c.value.emit()));
    }
    if !frag.consts.is_empty() {
        out.push('\n');
    }

    for f in &frag.functions {
        out.push_str(&format!(
            "{} {}({}) {{{}}}\n\n",
            f.return_type,
            f.name,
            f.params,
            f.body.emit()
        ));
    }

    out.push_str(&format!(
        "void main() {{\n    fragColor = {}(vUV);\n}}\n",
        frag.main_function_name
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::parse::parse_fragment_block;

    const TINT: &str = r#"/*
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

    const DESATURATE: &str = r#"/*
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

    fn fragment(source: &str) -> crate::shader::FragmentShader {
        parse_fragment_block(source).unwrap().fragment
    }

    #[test]
    fn chains_main_functions_and_drops_successor_main_input() {
        let tint = fragment(TINT);
        let desat = fragment(DESATURATE);
        let merged = merge_programs(&[
            MergeEntry { block_class: "TintBlock", fragment: &tint },
            MergeEntry { block_class: "DesaturateBlock", fragment: &desat },
        ])
        .unwrap();

        let names: Vec<&str> =
            merged.fragment.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["input_0", "tint_0", "intensity_1"]);
        assert_eq!(merged.fragment.main_input_texture.as_deref(), Some("input_0"));
        assert_eq!(merged.fragment.main_function_name, MERGED_MAIN);

        let source = emit_fragment_source(&merged.fragment);
        // The second block's sample of its main input became a call of the
        // first block's renamed main function.
        assert!(source.contains("tintMain_0("));
        assert!(!source.contains("input_1"));
        // The wrapper main returns the last member's result.
        assert!(source.contains("return desaturateMain_1(vUV);"));
    }

    #[test]
    fn identical_overloads_from_two_instances_are_emitted_once() {
        let a = fragment(TINT);
        let b = fragment(TINT);
        let merged = merge_programs(&[
            MergeEntry { block_class: "TintBlock", fragment: &a },
            MergeEntry { block_class: "TintBlock", fragment: &b },
        ])
        .unwrap();

        let get_color: Vec<&ShaderFunction> = merged
            .fragment
            .functions
            .iter()
            .filter(|f| f.name.starts_with("getColor"))
            .collect();
        assert_eq!(get_color.len(), 2, "one occurrence of each overload signature");
        assert_eq!(get_color[0].name, "getColor_0");
        assert_eq!(get_color[1].name, "getColor_0");
        assert_ne!(get_color[0].param_signature(), get_color[1].param_signature());

        // The second instance's main calls the shared helper.
        let second_main = merged
            .fragment
            .functions
            .iter()
            .find(|f| f.name == "tintMain_1")
            .unwrap();
        let body = second_main.body.emit();
        assert!(body.contains("getColor_0("));
    }

    #[test]
    fn per_instance_uniforms_never_collide() {
        let a = fragment(TINT);
        let b = fragment(TINT);
        let merged = merge_programs(&[
            MergeEntry { block_class: "TintBlock", fragment: &a },
            MergeEntry { block_class: "TintBlock", fragment: &b },
        ])
        .unwrap();
        let names: Vec<&str> =
            merged.fragment.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["input_0", "tint_0", "tint_1"]);
        // Each instance's consts stay separate.
        let const_names: Vec<&str> =
            merged.fragment.consts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(const_names, vec!["WEIGHT_0", "WEIGHT_1"]);
    }

    #[test]
    fn merging_fewer_than_two_programs_is_an_internal_error() {
        let tint = fragment(TINT);
        assert!(merge_programs(&[MergeEntry { block_class: "TintBlock", fragment: &tint }])
            .is_err());
    }
}
