//! WGSL sources and the parsing of their vertex and uniform interface.
use std::{
    borrow::Cow,
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::{
    error::ShaderCompileError,
    wgsl::{AttributeType, UniformType},
};

/// Snippets that can be pulled into a source with `//#include <name>`.
pub const BUILTIN_SNIPPETS: &[(&str, &str)] =
    &[("transform", include_str!("shaders/transform.wgsl"))];

pub const VERTEX_ENTRY_POINT: &str = "vertex_main";
pub const FRAGMENT_ENTRY_POINT: &str = "fragment_main";

/// Where a shader source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramOrigin {
    /// Ships with the crate; failing to compile it is a bug.
    BuiltIn,
    /// Provided at runtime; failing to compile it degrades the visual.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: Cow<'static, str>,
    pub code: Cow<'static, str>,
    pub origin: ProgramOrigin,
}

impl ShaderSource {
    pub const fn built_in(label: &'static str, code: &'static str) -> Self {
        Self {
            label: Cow::Borrowed(label),
            code: Cow::Borrowed(code),
            origin: ProgramOrigin::BuiltIn,
        }
    }

    pub fn dynamic(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: Cow::Owned(label.into()),
            code: Cow::Owned(code.into()),
            origin: ProgramOrigin::Dynamic,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.code.hash(&mut hasher);
        hasher.finish()
    }
}

/// A vertex attribute declared by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAttribute {
    pub location: u32,
    pub name: String,
    pub ty: AttributeType,
}

/// Interface of a vertex/fragment program pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInterface {
    pub attributes: Vec<InterfaceAttribute>,
    pub uniforms: Vec<(String, UniformType)>,
    pub entry_points: Vec<(&'static str, String)>,
}

impl ShaderInterface {
    pub fn attribute(&self, name: &str) -> Option<&InterfaceAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_entry_point(&self, stage: &str, name: &str) -> bool {
        self.entry_points
            .iter()
            .any(|(s, n)| *s == stage && n == name)
    }
}

fn line_of(code: &str, byte_offset: usize) -> usize {
    code[..byte_offset].matches('\n').count() + 1
}

/// Replaces every `//#include <name>` line with the named snippet.
pub fn resolve_includes(
    label: &str,
    code: &str,
    snippets: &[(&str, &str)],
) -> Result<String, ShaderCompileError> {
    static MATCHER: OnceCell<Regex> = OnceCell::new();
    let matcher = MATCHER.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*//#include <(?<name>[A-Za-z0-9_]+)>[ \t]*$").unwrap()
    });

    let mut resolved = String::with_capacity(code.len());
    let mut last = 0;
    for captures in matcher.captures_iter(code) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let name = &captures["name"];
        let snippet = snippets
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, s)| *s)
            .ok_or_else(|| ShaderCompileError::UnresolvedInclude {
                label: label.into(),
                name: name.into(),
            })?;

        resolved.push_str(&code[last..whole.start()]);
        resolved.push_str(snippet.trim_end());
        last = whole.end();
    }
    resolved.push_str(&code[last..]);

    Ok(resolved)
}

/// Blanks out comments while keeping the line structure intact.
fn strip_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    let mut block_depth = 0usize;
    let mut line_comment = false;

    while let Some(c) = chars.next() {
        if c == '\n' {
            line_comment = false;
            out.push('\n');
            continue;
        }
        if line_comment {
            out.push(' ');
            continue;
        }

        match (c, chars.peek().copied()) {
            ('/', Some('*')) => {
                chars.next();
                block_depth += 1;
                out.push_str("  ");
            }
            ('*', Some('/')) if block_depth > 0 => {
                chars.next();
                block_depth -= 1;
                out.push_str("  ");
            }
            ('/', Some('/')) if block_depth == 0 => {
                chars.next();
                line_comment = true;
                out.push_str("  ");
            }
            _ if block_depth > 0 => out.push(' '),
            _ => out.push(c),
        }
    }

    out
}

/// Checks that all brackets of the source are balanced.
pub fn check_syntax(label: &str, code: &str) -> Result<(), ShaderCompileError> {
    let code = strip_comments(code);
    let mut open: Vec<(char, usize)> = Vec::new();
    let mut line = 1;

    for c in code.chars() {
        match c {
            '\n' => line += 1,
            '(' | '{' | '[' => open.push((c, line)),
            ')' | '}' | ']' => {
                let expected = match c {
                    ')' => '(',
                    '}' => '{',
                    _ => '[',
                };
                match open.pop() {
                    Some((o, _)) if o == expected => {}
                    _ => {
                        return Err(ShaderCompileError::Syntax {
                            label: label.into(),
                            line,
                            message: format!("unexpected `{c}`"),
                        })
                    }
                }
            }
            _ => {}
        }
    }

    match open.pop() {
        Some((c, line)) => Err(ShaderCompileError::Syntax {
            label: label.into(),
            line,
            message: format!("unclosed `{c}`"),
        }),
        None => Ok(()),
    }
}

fn struct_body<'a>(code: &'a str, name: &str) -> Option<(usize, &'a str)> {
    static MATCHER: OnceCell<Regex> = OnceCell::new();
    let matcher = MATCHER.get_or_init(|| {
        Regex::new(r"struct\s+(?<name>[A-Za-z_][A-Za-z0-9_]*)\s*\{(?<body>[^}]*)\}").unwrap()
    });

    matcher
        .captures_iter(code)
        .find(|c| &c["name"] == name)
        .and_then(|c| c.name("body"))
        .map(|body| (body.start(), body.as_str()))
}

/// Parses the entry points, the `VertexInput` and the `Uniforms` structs.
pub fn parse_interface(label: &str, code: &str) -> Result<ShaderInterface, ShaderCompileError> {
    static ENTRY_POINT: OnceCell<Regex> = OnceCell::new();
    static ATTRIBUTE: OnceCell<Regex> = OnceCell::new();
    static FIELD: OnceCell<Regex> = OnceCell::new();
    let entry_point = ENTRY_POINT.get_or_init(|| {
        Regex::new(r"@(?<stage>vertex|fragment)\s+fn\s+(?<name>[A-Za-z_][A-Za-z0-9_]*)").unwrap()
    });
    let attribute = ATTRIBUTE.get_or_init(|| {
        Regex::new(r"@location\(\s*(?<location>\d+)\s*\)\s*(?<name>[A-Za-z_][A-Za-z0-9_]*)\s*:\s*(?<ty>[A-Za-z0-9_<>]+)").unwrap()
    });
    let field = FIELD.get_or_init(|| {
        Regex::new(r"^\s*(?<name>[A-Za-z_][A-Za-z0-9_]*)\s*:\s*(?<ty>[A-Za-z0-9_<>]+)\s*$").unwrap()
    });

    let code = strip_comments(code);

    let entry_points = entry_point
        .captures_iter(&code)
        .map(|c| {
            let stage = if &c["stage"] == "vertex" {
                "vertex"
            } else {
                "fragment"
            };
            (stage, c["name"].to_string())
        })
        .collect::<Vec<_>>();
    for stage in ["vertex", "fragment"] {
        if !entry_points.iter().any(|(s, _)| *s == stage) {
            return Err(ShaderCompileError::MissingEntryPoint {
                label: label.into(),
                stage,
            });
        }
    }

    let mut attributes = Vec::new();
    if let Some((offset, body)) = struct_body(&code, "VertexInput") {
        for c in attribute.captures_iter(body) {
            let line = line_of(&code, offset + c.get(0).map_or(0, |m| m.start()));
            let ty = AttributeType::from_wgsl(&c["ty"]).ok_or_else(|| {
                ShaderCompileError::Syntax {
                    label: label.into(),
                    line,
                    message: format!("unsupported attribute type `{}`", &c["ty"]),
                }
            })?;
            let location = c["location"]
                .parse()
                .map_err(|_| ShaderCompileError::Syntax {
                    label: label.into(),
                    line,
                    message: format!("invalid location `{}`", &c["location"]),
                })?;
            attributes.push(InterfaceAttribute {
                location,
                name: c["name"].to_string(),
                ty,
            });
        }
    }

    let mut uniforms = Vec::new();
    if let Some((offset, body)) = struct_body(&code, "Uniforms") {
        let mut consumed = 0;
        for member in body.split(',') {
            let member_offset = offset + consumed;
            consumed += member.len() + 1;
            if member.trim().is_empty() {
                continue;
            }

            let line = line_of(&code, member_offset + (member.len() - member.trim_start().len()));
            let c = field
                .captures(member)
                .ok_or_else(|| ShaderCompileError::Syntax {
                    label: label.into(),
                    line,
                    message: format!("invalid uniform member `{}`", member.trim()),
                })?;
            let ty =
                UniformType::from_wgsl(&c["ty"]).ok_or_else(|| ShaderCompileError::Syntax {
                    label: label.into(),
                    line,
                    message: format!("unsupported uniform type `{}`", &c["ty"]),
                })?;
            uniforms.push((c["name"].to_string(), ty));
        }
    }

    Ok(ShaderInterface {
        attributes,
        uniforms,
        entry_points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
//#include <transform>

struct Uniforms {
    u_transform: mat3x3<f32>,
    // u_unused: f32,
    u_viewport: vec2<f32>,
}

struct VertexInput {
    @builtin(vertex_index) vertex_index: u32,
    @location(0) a_position: vec2<f32>,
    @location(2) a_size: f32,
}

@vertex
fn vertex_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    return apply_transform(uniforms.u_transform, input.a_position);
}

@fragment
fn fragment_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
";

    #[test]
    fn includes_are_resolved() {
        let resolved = resolve_includes("test", SOURCE, BUILTIN_SNIPPETS).unwrap();
        assert!(resolved.contains("fn apply_transform"));
        assert!(!resolved.contains("//#include"));

        let err = resolve_includes("test", "//#include <missing>\n", BUILTIN_SNIPPETS);
        assert_eq!(
            err,
            Err(ShaderCompileError::UnresolvedInclude {
                label: "test".into(),
                name: "missing".into()
            })
        );
    }

    #[test]
    fn interface_is_parsed() {
        let interface = parse_interface("test", SOURCE).unwrap();
        assert_eq!(
            interface.attributes,
            vec![
                InterfaceAttribute {
                    location: 0,
                    name: "a_position".into(),
                    ty: AttributeType::Vec2F32
                },
                InterfaceAttribute {
                    location: 2,
                    name: "a_size".into(),
                    ty: AttributeType::F32
                },
            ]
        );
        assert_eq!(
            interface.uniforms,
            vec![
                ("u_transform".to_string(), UniformType::Mat3x3F32),
                ("u_viewport".to_string(), UniformType::Vec2F32),
            ]
        );
        assert!(interface.has_entry_point("vertex", "vertex_main"));
        assert!(interface.has_entry_point("fragment", "fragment_main"));
    }

    #[test]
    fn missing_fragment_stage_is_reported() {
        let code = "@vertex fn main() -> @builtin(position) vec4<f32> { return vec4<f32>(); }";
        assert_eq!(
            parse_interface("test", code),
            Err(ShaderCompileError::MissingEntryPoint {
                label: "test".into(),
                stage: "fragment"
            })
        );
    }

    #[test]
    fn unbalanced_brackets_report_the_line() {
        let code = "fn a() {\n    let x = (1.0;\n}\n";
        assert_eq!(
            check_syntax("test", code),
            Err(ShaderCompileError::Syntax {
                label: "test".into(),
                line: 3,
                message: "unexpected `}`".into()
            })
        );

        let code = "fn a() {\n    // }\n";
        assert_eq!(
            check_syntax("test", code),
            Err(ShaderCompileError::Syntax {
                label: "test".into(),
                line: 1,
                message: "unclosed `{`".into()
            })
        );
    }

    #[test]
    fn builtin_sources_are_well_formed() {
        for code in [
            include_str!("shaders/marker.wgsl"),
            include_str!("shaders/mesh.wgsl"),
            include_str!("shaders/glyph.wgsl"),
        ] {
            let code = resolve_includes("builtin", code, BUILTIN_SNIPPETS).unwrap();
            check_syntax("builtin", &code).unwrap();
            parse_interface("builtin", &code).unwrap();
        }
    }
}
