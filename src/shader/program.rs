//! In-memory model of a fragment shader program.
//!
//! Sources are stored token-level: renamable symbols and texture sample
//! calls are explicit segments, everything else is verbatim text. The
//! external `_name_` decoration convention is resolved at the ingestion
//! boundary (see [`crate::shader::parse`]); nothing in this module or in the
//! merger rewrites source by string substitution.

use serde::{Deserialize, Serialize};

/// GLSL value type for uniform and const declarations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GlslType {
    Bool,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Sampler2D,
}

impl GlslType {
    /// Returns the GLSL spelling of this type.
    pub fn glsl(self) -> &'static str {
        match self {
            GlslType::Bool => "bool",
            GlslType::Float => "float",
            GlslType::Vec2 => "vec2",
            GlslType::Vec3 => "vec3",
            GlslType::Vec4 => "vec4",
            GlslType::Sampler2D => "sampler2D",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bool" => Some(GlslType::Bool),
            "float" => Some(GlslType::Float),
            "vec2" => Some(GlslType::Vec2),
            "vec3" => Some(GlslType::Vec3),
            "vec4" => Some(GlslType::Vec4),
            "sampler2D" => Some(GlslType::Sampler2D),
            _ => None,
        }
    }
}

/// One piece of tokenized shader source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Segment {
    /// Verbatim source text, emitted unchanged.
    Text(String),
    /// A renamable symbol, stored undecorated.
    Symbol(String),
    /// The `texture(<sampler>,` head of a sample call against a renamable
    /// sampler. The call's remaining arguments and closing paren live in the
    /// following `Text` segments, so parens stay balanced across rewrites.
    SampleCall { sampler: String },
}

/// Shader source split into renamable and verbatim segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenizedSource {
    pub segments: Vec<Segment>,
}

impl TokenizedSource {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Emit source text, mapping each symbol through `symbol` and each
    /// sample-call head through `sample`. `sample` returns the full
    /// replacement for `texture(<sampler>,`: either another sample head or
    /// a function-call head such as `someMain_0(`.
    pub fn emit_with<F, G>(&self, mut symbol: F, mut sample: G) -> String
    where
        F: FnMut(&str) -> String,
        G: FnMut(&str) -> String,
    {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Text(t) => out.push_str(t),
                Segment::Symbol(name) => out.push_str(&symbol(name)),
                Segment::SampleCall { sampler } => out.push_str(&sample(sampler)),
            }
        }
        out
    }

    /// Emit with identity renaming: symbols as-is, sample calls as
    /// `texture(<sampler>,`. The arguments and closing paren follow in the
    /// adjacent text segments.
    pub fn emit(&self) -> String {
        self.emit_with(|s| s.to_string(), |s| format!("texture({s},"))
    }

    /// All symbol names referenced by this source, including sampled ones.
    pub fn referenced_symbols(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Symbol(name) => Some(name.as_str()),
            Segment::SampleCall { sampler } => Some(sampler.as_str()),
            Segment::Text(_) => None,
        })
    }

    /// True if the source contains a sample call against `sampler`.
    pub fn samples(&self, sampler: &str) -> bool {
        self.segments
            .iter()
            .any(|seg| matches!(seg, Segment::SampleCall { sampler: s } if s == sampler))
    }
}

/// A `uniform <type> <name>;` declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformDecl {
    pub name: String,
    pub ty: GlslType,
}

/// A `const <type> <name> = <value>;` declaration. The value may reference
/// other renamable consts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstDecl {
    pub name: String,
    pub ty: GlslType,
    pub value: TokenizedSource,
}

/// A named shader function. `body` holds the source between the outer
/// braces; emission re-adds them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderFunction {
    pub name: String,
    pub return_type: String,
    /// Raw parameter list, exactly as written between the parens.
    pub params: String,
    pub body: TokenizedSource,
}

impl ShaderFunction {
    /// Parameter *types* only, qualifiers and names stripped: the overload
    /// signature used for deduplication.
    pub fn param_signature(&self) -> Vec<String> {
        self.params
            .split(',')
            .filter_map(|param| {
                let mut words = param
                    .split_whitespace()
                    .filter(|w| !matches!(*w, "in" | "out" | "inout" | "const" | "highp" | "mediump" | "lowp"));
                words.next().map(str::to_string)
            })
            .collect()
    }
}

/// The fragment half of a shader program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentShader {
    pub uniforms: Vec<UniformDecl>,
    pub consts: Vec<ConstDecl>,
    /// All functions in source order, main included.
    pub functions: Vec<ShaderFunction>,
    pub main_function_name: String,
    /// Name of the uniform sampler that is this block's main input texture.
    /// Disable-passthrough and fusion chaining apply to this input.
    pub main_input_texture: Option<String>,
}

impl FragmentShader {
    pub fn main_function(&self) -> Option<&ShaderFunction> {
        self.functions.iter().find(|f| f.name == self.main_function_name)
    }

    /// Number of distinct texture samplers this program declares.
    pub fn texture_sampler_count(&self) -> usize {
        self.uniforms.iter().filter(|u| u.ty == GlslType::Sampler2D).count()
    }

    /// True if the main input sampler is only ever used as the sampler of a
    /// sample call. Chain fusion replaces those call heads with a call to
    /// the predecessor's main function; a main input passed around as a
    /// bare symbol cannot be rewritten that way.
    pub fn main_input_only_sampled(&self) -> bool {
        let Some(main) = self.main_input_texture.as_deref() else {
            return true;
        };
        let symbol_free = |src: &TokenizedSource| {
            !src.segments
                .iter()
                .any(|seg| matches!(seg, Segment::Symbol(name) if name == main))
        };
        self.functions.iter().all(|f| symbol_free(&f.body))
            && self.consts.iter().all(|c| symbol_free(&c.value))
    }
}

/// A complete shader program. The vertex stage is optional; blocks without
/// one render with the host's shared full-screen vertex shader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderProgram {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex: Option<String>,
    pub fragment: FragmentShader,
}

impl ShaderProgram {
    pub fn from_fragment(fragment: FragmentShader) -> Self {
        Self { vertex: None, fragment }
    }
}
