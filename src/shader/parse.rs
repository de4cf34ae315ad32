//! Ingestion of annotated GLSL block sources.
//!
//! The external authoring convention wraps renamable identifiers in
//! underscores (`_tint_`), marks the main input sampler and the main
//! function with a trailing `// main` comment, and opens the file with a
//! JSON annotation comment naming the block type:
//!
//! ```glsl
//! /*
//! { "smartFilterBlockType": "TintBlock" }
//! */
//! uniform sampler2D _input_; // main
//! uniform vec3 _tint_;
//!
//! vec4 _tintMain_(vec2 vUV) { // main
//!     vec4 color = texture(_input_, vUV);
//!     return vec4(color.rgb * _tint_, color.a);
//! }
//! ```
//!
//! The decoration convention is resolved here, once. Sources are lexed so
//! that comment contents never produce symbols, and function bodies are
//! extracted by brace matching rather than pattern search.

use std::sync::LazyLock;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use super::program::{
    ConstDecl, FragmentShader, GlslType, Segment, ShaderFunction, TokenizedSource, UniformDecl,
};

/// Header annotation carried by every block source.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAnnotation {
    pub smart_filter_block_type: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub disable_optimization: bool,
}

#[derive(Clone, Debug)]
pub struct ParsedFragmentBlock {
    pub annotation: BlockAnnotation,
    pub fragment: FragmentShader,
}

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A\s*/\*((?s).*?)\*/").expect("header regex"));

/// Parse one annotated fragment block source.
pub fn parse_fragment_block(source: &str) -> Result<ParsedFragmentBlock> {
    let captures = HEADER
        .captures(source)
        .ok_or_else(|| anyhow!("block source is missing its leading annotation comment"))?;
    let annotation: BlockAnnotation = serde_json::from_str(captures.get(1).unwrap().as_str())
        .context("failed to parse block annotation JSON")?;

    let body = &source[captures.get(0).unwrap().end()..];
    let fragment = parse_fragment_source(body)
        .with_context(|| format!("block type {}", annotation.smart_filter_block_type))?;

    Ok(ParsedFragmentBlock { annotation, fragment })
}

// ── Lexer ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
enum Tok<'a> {
    Word(&'a str),
    LineComment(&'a str),
    BlockComment(&'a str),
    Ws(&'a str),
    Ch(char),
}

#[derive(Clone, Copy, Debug)]
struct Spanned<'a> {
    tok: Tok<'a>,
    start: usize,
    end: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenize the whole input. Tokens tile the source: every byte belongs to
/// exactly one token, so verbatim slices can be reassembled from spans.
fn lex(src: &str) -> Vec<Spanned<'_>> {
    let bytes = src.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < src.len() {
        let start = i;
        let rest = &src[i..];
        let c = rest.chars().next().expect("loop bound keeps i inside src");
        if rest.starts_with("//") {
            i = rest.find('\n').map_or(src.len(), |p| i + p);
            toks.push(Spanned { tok: Tok::LineComment(&src[start..i]), start, end: i });
        } else if rest.starts_with("/*") {
            i = rest[2..].find("*/").map_or(src.len(), |p| i + 2 + p + 2);
            toks.push(Spanned { tok: Tok::BlockComment(&src[start..i]), start, end: i });
        } else if c.is_ascii_whitespace() {
            while i < src.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            toks.push(Spanned { tok: Tok::Ws(&src[start..i]), start, end: i });
        } else if is_word_char(c) {
            while i < src.len() && is_word_char(bytes[i] as char) {
                i += 1;
            }
            toks.push(Spanned { tok: Tok::Word(&src[start..i]), start, end: i });
        } else {
            i += c.len_utf8();
            toks.push(Spanned { tok: Tok::Ch(c), start, end: i });
        }
    }
    toks
}

/// If `word` follows the `_name_` decoration convention, return the
/// undecorated name.
fn undecorate(word: &str) -> Option<&str> {
    if word.len() < 3 || !word.starts_with('_') || !word.ends_with('_') {
        return None;
    }
    let inner = &word[1..word.len() - 1];
    if inner.chars().any(|c| c.is_ascii_alphanumeric()) {
        Some(inner)
    } else {
        None
    }
}

// ── Token-stream parsing ─────────────────────────────────────────────────

struct Cursor<'a> {
    toks: &'a [Spanned<'a>],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_trivia(&mut self) {
        while let Some(s) = self.toks.get(self.pos) {
            match s.tok {
                Tok::Ws(_) | Tok::LineComment(_) | Tok::BlockComment(_) => self.pos += 1,
                _ => break,
            }
        }
    }

    fn next_word(&mut self) -> Result<&'a str> {
        self.skip_trivia();
        match self.toks.get(self.pos).map(|s| s.tok) {
            Some(Tok::Word(w)) => {
                self.pos += 1;
                Ok(w)
            }
            other => bail!("expected identifier, got {other:?}"),
        }
    }

    fn expect_ch(&mut self, expected: char) -> Result<()> {
        self.skip_trivia();
        match self.toks.get(self.pos) {
            Some(Spanned { tok: Tok::Ch(c), .. }) if *c == expected => {
                self.pos += 1;
                Ok(())
            }
            other => bail!("expected `{expected}`, got {other:?}"),
        }
    }

    /// Consume a trailing `// main` marker if it appears before the next
    /// newline. Returns true when the marker was present.
    fn take_main_marker(&mut self) -> bool {
        let mut p = self.pos;
        while let Some(s) = self.toks.get(p) {
            match s.tok {
                Tok::Ws(ws) if !ws.contains('\n') => p += 1,
                Tok::LineComment(c) if c[2..].trim() == "main" => {
                    self.pos = p + 1;
                    return true;
                }
                _ => return false,
            }
        }
        false
    }
}

fn parse_fragment_source(src: &str) -> Result<FragmentShader> {
    let toks = lex(src);
    let mut cursor = Cursor { toks: &toks, pos: 0 };

    let mut uniforms: Vec<UniformDecl> = Vec::new();
    let mut consts: Vec<ConstDecl> = Vec::new();
    let mut functions: Vec<ShaderFunction> = Vec::new();
    let mut main_function_name: Option<String> = None;
    let mut main_input_texture: Option<String> = None;

    loop {
        cursor.skip_trivia();
        let Some(spanned) = cursor.toks.get(cursor.pos) else {
            break;
        };
        match spanned.tok {
            Tok::Word("uniform") => {
                cursor.pos += 1;
                let ty_word = cursor.next_word()?;
                let ty = GlslType::parse(ty_word)
                    .ok_or_else(|| anyhow!("unsupported uniform type: {ty_word}"))?;
                let raw_name = cursor.next_word()?;
                let name = undecorate(raw_name)
                    .ok_or_else(|| anyhow!("uniform `{raw_name}` is not decorated"))?
                    .to_string();
                cursor.expect_ch(';')?;
                if cursor.take_main_marker() {
                    if ty != GlslType::Sampler2D {
                        bail!("`// main` marker on non-sampler uniform `{name}`");
                    }
                    if let Some(prev) = &main_input_texture {
                        bail!("multiple main input samplers: `{prev}` and `{name}`");
                    }
                    main_input_texture = Some(name.clone());
                }
                uniforms.push(UniformDecl { name, ty });
            }
            Tok::Word("const") => {
                cursor.pos += 1;
                let ty_word = cursor.next_word()?;
                let ty = GlslType::parse(ty_word)
                    .ok_or_else(|| anyhow!("unsupported const type: {ty_word}"))?;
                let raw_name = cursor.next_word()?;
                let name = undecorate(raw_name)
                    .ok_or_else(|| anyhow!("const `{raw_name}` is not decorated"))?
                    .to_string();
                cursor.expect_ch('=')?;
                let value_start = cursor.pos;
                let value_end = scan_to_semicolon(&toks, value_start)?;
                let value = tokenize_range(src, &toks[value_start..value_end], None);
                cursor.pos = value_end + 1; // past the `;`
                consts.push(ConstDecl { name, ty, value });
            }
            Tok::Word(_) => {
                let (function, is_main) = parse_function(src, &toks, &mut cursor)?;
                if is_main {
                    if let Some(prev) = &main_function_name {
                        bail!("multiple `// main` functions: `{prev}` and `{}`", function.name);
                    }
                    main_function_name = Some(function.name.clone());
                }
                functions.push(function);
            }
            Tok::Ch(';') => cursor.pos += 1,
            other => bail!("unexpected token at top level: {other:?}"),
        }
    }

    let main_function_name =
        main_function_name.ok_or_else(|| anyhow!("no function carries the `// main` marker"))?;

    // A single-sampler block's main input is unambiguous even unmarked.
    if main_input_texture.is_none() {
        let samplers: Vec<&UniformDecl> =
            uniforms.iter().filter(|u| u.ty == GlslType::Sampler2D).collect();
        if samplers.len() == 1 {
            main_input_texture = Some(samplers[0].name.clone());
        }
    }

    Ok(FragmentShader {
        uniforms,
        consts,
        functions,
        main_function_name,
        main_input_texture,
    })
}

fn scan_to_semicolon(toks: &[Spanned<'_>], from: usize) -> Result<usize> {
    for (offset, s) in toks[from..].iter().enumerate() {
        if matches!(s.tok, Tok::Ch(';')) {
            return Ok(from + offset);
        }
    }
    bail!("missing `;`")
}

fn parse_function<'a>(
    src: &str,
    toks: &'a [Spanned<'a>],
    cursor: &mut Cursor<'a>,
) -> Result<(ShaderFunction, bool)> {
    let return_type = cursor.next_word()?.to_string();
    let raw_name = cursor.next_word()?;
    let name = undecorate(raw_name)
        .ok_or_else(|| anyhow!("function `{raw_name}` is not decorated"))?
        .to_string();
    cursor.expect_ch('(')?;

    let params_start_byte = toks[cursor.pos - 1].end;
    let mut depth = 1usize;
    while depth > 0 {
        let Some(s) = cursor.toks.get(cursor.pos) else {
            bail!("unterminated parameter list for `{name}`");
        };
        match s.tok {
            Tok::Ch('(') => depth += 1,
            Tok::Ch(')') => depth -= 1,
            _ => {}
        }
        cursor.pos += 1;
    }
    let params_end_byte = toks[cursor.pos - 1].start;
    let params = src[params_start_byte..params_end_byte].trim().to_string();

    cursor.expect_ch('{')?;
    let body_start = cursor.pos;
    let mut depth = 1usize;
    while depth > 0 {
        let Some(s) = cursor.toks.get(cursor.pos) else {
            bail!("unterminated body for `{name}`");
        };
        match s.tok {
            Tok::Ch('{') => depth += 1,
            Tok::Ch('}') => depth -= 1,
            _ => {}
        }
        cursor.pos += 1;
    }
    let body_end = cursor.pos - 1; // index of the closing `}`

    // `// main` immediately after the opening brace marks the main function;
    // the marker is dropped from the stored body.
    let mut is_main = false;
    let mut skip_comment: Option<usize> = None;
    let mut p = body_start;
    while let Some(s) = toks.get(p) {
        if p >= body_end {
            break;
        }
        match s.tok {
            Tok::Ws(ws) if !ws.contains('\n') => p += 1,
            Tok::LineComment(c) if c[2..].trim() == "main" => {
                is_main = true;
                skip_comment = Some(p);
                break;
            }
            _ => break,
        }
    }

    let body = tokenize_range(src, &toks[body_start..body_end], skip_comment.map(|p| p - body_start));
    Ok((ShaderFunction { name, return_type, params, body }, is_main))
}

/// Turn a token range into segments: decorated words become symbols,
/// `texture(_name_,` / `texture2D(_name_,` heads become sample calls, and
/// everything else (comments included) is preserved verbatim.
fn tokenize_range(src: &str, toks: &[Spanned<'_>], skip: Option<usize>) -> TokenizedSource {
    let mut segments: Vec<Segment> = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    let flush = |text: &mut String, segments: &mut Vec<Segment>| {
        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(text)));
        }
    };

    while i < toks.len() {
        if Some(i) == skip {
            i += 1;
            continue;
        }
        let s = &toks[i];
        match s.tok {
            Tok::Word(w) if w == "texture" || w == "texture2D" => {
                if let Some((sampler, consumed)) = match_sample_head(toks, i) {
                    flush(&mut text, &mut segments);
                    segments.push(Segment::SampleCall { sampler: sampler.to_string() });
                    i += consumed;
                    continue;
                }
                text.push_str(&src[s.start..s.end]);
                i += 1;
            }
            Tok::Word(w) => {
                if let Some(name) = undecorate(w) {
                    flush(&mut text, &mut segments);
                    segments.push(Segment::Symbol(name.to_string()));
                } else {
                    text.push_str(&src[s.start..s.end]);
                }
                i += 1;
            }
            _ => {
                text.push_str(&src[s.start..s.end]);
                i += 1;
            }
        }
    }
    flush(&mut text, &mut segments);
    TokenizedSource::new(segments)
}

/// Match `texture[2D] ( _name_ ,` starting at `at`; returns the undecorated
/// sampler name and the token count consumed through the comma.
fn match_sample_head<'a>(toks: &'a [Spanned<'a>], at: usize) -> Option<(&'a str, usize)> {
    let mut p = at + 1;
    let mut skip_ws = |p: &mut usize| {
        while matches!(toks.get(*p), Some(Spanned { tok: Tok::Ws(_), .. })) {
            *p += 1;
        }
    };
    skip_ws(&mut p);
    if !matches!(toks.get(p), Some(Spanned { tok: Tok::Ch('('), .. })) {
        return None;
    }
    p += 1;
    skip_ws(&mut p);
    let sampler = match toks.get(p) {
        Some(Spanned { tok: Tok::Word(w), .. }) => undecorate(w)?,
        _ => return None,
    };
    p += 1;
    skip_ws(&mut p);
    if !matches!(toks.get(p), Some(Spanned { tok: Tok::Ch(','), .. })) {
        return None;
    }
    Some((sampler, p + 1 - at))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINT: &str = r#"/*
{ "smartFilterBlockType": "TintBlock", "namespace": "demo" }
*/
uniform sampler2D _input_; // main
uniform vec3 _tint_;
uniform float _amount_;

const float _WEIGHT_ = 0.85;

vec3 _applyTint_(vec3 color) {
    return mix(color, color * _tint_, _amount_);
}

vec4 _tintMain_(vec2 vUV) { // main
    vec4 color = texture(_input_, vUV);
    return vec4(_applyTint_(color.rgb) * _WEIGHT_, color.a);
}
"#;

    #[test]
    fn parses_annotation_and_declarations() {
        let parsed = parse_fragment_block(TINT).unwrap();
        assert_eq!(parsed.annotation.smart_filter_block_type, "TintBlock");
        assert_eq!(parsed.annotation.namespace.as_deref(), Some("demo"));
        assert!(!parsed.annotation.disable_optimization);

        let frag = &parsed.fragment;
        assert_eq!(frag.uniforms.len(), 3);
        assert_eq!(frag.uniforms[0].name, "input");
        assert_eq!(frag.uniforms[0].ty, GlslType::Sampler2D);
        assert_eq!(frag.consts.len(), 1);
        assert_eq!(frag.consts[0].name, "WEIGHT");
        assert_eq!(frag.main_function_name, "tintMain");
        assert_eq!(frag.main_input_texture.as_deref(), Some("input"));
        assert_eq!(frag.functions.len(), 2);
    }

    #[test]
    fn sample_calls_become_sample_segments() {
        let parsed = parse_fragment_block(TINT).unwrap();
        let main = parsed.fragment.main_function().unwrap();
        assert!(main.body.samples("input"));
        // The `// main` marker is not part of the stored body.
        assert!(!main.body.emit().contains("// main"));
    }

    #[test]
    fn decorations_inside_comments_are_ignored() {
        let src = r#"/*
{ "smartFilterBlockType": "CommentBlock" }
*/
uniform sampler2D _input_;

vec4 _go_(vec2 vUV) { // main
    // _input_ is sampled below; texture(_input_, here) is just prose
    return texture(_input_, vUV);
}
"#;
        let parsed = parse_fragment_block(src).unwrap();
        let main = parsed.fragment.main_function().unwrap();
        let sample_count = main
            .body
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::SampleCall { .. }))
            .count();
        assert_eq!(sample_count, 1);
        assert!(main.body.emit().contains("// _input_ is sampled below"));
    }

    #[test]
    fn single_sampler_defaults_to_main_input() {
        let src = r#"/*
{ "smartFilterBlockType": "NoMarker" }
*/
uniform sampler2D _source_;

vec4 _pass_(vec2 vUV) { // main
    return texture(_source_, vUV);
}
"#;
        let parsed = parse_fragment_block(src).unwrap();
        assert_eq!(parsed.fragment.main_input_texture.as_deref(), Some("source"));
    }

    #[test]
    fn missing_main_marker_is_an_error() {
        let src = r#"/*
{ "smartFilterBlockType": "Broken" }
*/
uniform sampler2D _input_;

vec4 _go_(vec2 vUV) {
    return texture(_input_, vUV);
}
"#;
        assert!(parse_fragment_block(src).is_err());
    }

    #[test]
    fn undecorated_uniform_is_an_error() {
        let src = r#"/*
{ "smartFilterBlockType": "Broken" }
*/
uniform float amount;

vec4 _go_(vec2 vUV) { // main
    return vec4(amount);
}
"#;
        assert!(parse_fragment_block(src).is_err());
    }
}
