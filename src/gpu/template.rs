//! Kernel source templates: loading, compile-time constant injection, and
//! parsing/validation through naga's GLSL front end.
//!
//! Kernel files are GLSL 450. Their first line (`#version 450`) must stay
//! first, so an injected [`ConstantBlock`] is spliced in right after it and
//! the rest of the file follows verbatim.

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;

/// Marker line that opens a block built with
/// [`ConstantBlock::with_default_marker`]. Kernels can `#ifdef` on it to
/// supply fallbacks for constants the host did not inject.
pub const DEFAULT_MARKER: &str = "default_consts";

/// Pipeline stage of one kernel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Vertex kernel.
    Vertex,
    /// Fragment kernel.
    Fragment,
    /// Compute kernel.
    Compute,
}

impl Stage {
    pub(crate) fn naga(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Fragment => naga::ShaderStage::Fragment,
            Self::Compute => naga::ShaderStage::Compute,
        }
    }

    pub(crate) fn visibility(self) -> wgpu::ShaderStages {
        match self {
            Self::Vertex => wgpu::ShaderStages::VERTEX,
            Self::Fragment => wgpu::ShaderStages::FRAGMENT,
            Self::Compute => wgpu::ShaderStages::COMPUTE,
        }
    }

    /// Lower-case stage name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

/// Literal value of one injected constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// Signed integer, emitted bare (`5`).
    Int(i64),
    /// Unsigned integer, emitted with a `u` suffix (`5u`).
    Uint(u64),
    /// Float, always emitted so GLSL types it as a float (`5.0`).
    Float(f64),
    /// Boolean (`true` / `false`).
    Bool(bool),
    /// Emitted verbatim.
    Text(String),
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}u"),
            // Debug keeps the trailing `.0` on integral floats.
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

macro_rules! constant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for ConstantValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v.into())
            }
        })*
    };
}

constant_from! {
    i32 => Int,
    i64 => Int,
    u32 => Uint,
    u64 => Uint,
    f32 => Float,
    f64 => Float,
    bool => Bool,
    String => Text,
}

impl From<&str> for ConstantValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// A block of `#define NAME VALUE` lines, one declaration per line, each
/// terminated by a newline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantBlock {
    text: String,
}

impl ConstantBlock {
    /// Empty block; splicing it leaves the source unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block opened by the `#define default_consts` marker line.
    pub fn with_default_marker() -> Self {
        Self {
            text: format!("#define {DEFAULT_MARKER}\n"),
        }
    }

    /// Use `text` as the block verbatim. A missing final newline is added.
    pub fn raw(text: &str) -> Self {
        let mut text = text.to_owned();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        Self { text }
    }

    /// Append one declaration.
    #[must_use]
    pub fn define(mut self, name: &str, value: impl Into<ConstantValue>) -> Self {
        let _ = writeln!(self.text, "#define {name} {}", value.into());
        self
    }

    /// The block text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// `true` if nothing would be injected.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for ConstantBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Insert `constants` immediately after the first line of `source`.
///
/// A source without any newline is treated as a lone preamble line: a
/// newline is appended before the block.
pub fn splice_constants(source: &str, constants: &ConstantBlock) -> String {
    if constants.is_empty() {
        return source.to_owned();
    }
    let mut out = String::with_capacity(source.len() + constants.as_str().len() + 1);
    match source.split_once('\n') {
        Some((first, rest)) => {
            out.push_str(first);
            out.push('\n');
            out.push_str(constants.as_str());
            out.push_str(rest);
        }
        None => {
            out.push_str(source);
            out.push('\n');
            out.push_str(constants.as_str());
        }
    }
    out
}

/// `source` with every line prefixed by its 1-based number and a tab,
/// matching the line numbers in compiler diagnostics.
pub fn numbered_listing(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.len() / 8);
    for (i, line) in source.lines().enumerate() {
        let _ = writeln!(out, "{}\t{line}", i + 1);
    }
    out
}

/// Read kernel text from `path`. IO failures are logged and yield an empty
/// source, which then fails to compile predictably.
pub fn load_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            log::error!("failed to read kernel source {}: {e}", path.display());
            String::new()
        }
    }
}

/// Which front-end phase rejected a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// GLSL preprocessing or parsing.
    Parse,
    /// IR validation (types, bindings, layouts).
    Validate,
}

/// A kernel stage that failed to compile.
#[derive(Debug, Clone)]
pub struct CompileError {
    /// Program label.
    pub label: String,
    /// Failing stage.
    pub stage: Stage,
    /// Failing phase.
    pub kind: CompileErrorKind,
    /// Rendered diagnostic with source spans.
    pub diagnostic: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.kind {
            CompileErrorKind::Parse => "parse",
            CompileErrorKind::Validate => "validation",
        };
        write!(
            f,
            "{} {} kernel {phase} failed:\n{}",
            self.label,
            self.stage.name(),
            self.diagnostic
        )
    }
}

impl std::error::Error for CompileError {}

/// Parse and validate one spliced kernel source.
///
/// On failure the diagnostic and the numbered source are logged before
/// the error is returned.
pub fn compile_source(
    label: &str,
    stage: Stage,
    source: &str,
) -> Result<naga::Module, CompileError> {
    let result = parse_and_validate(label, stage, source);
    if let Err(e) = &result {
        log::error!("{e}\n{}", numbered_listing(source));
    }
    result
}

fn parse_and_validate(
    label: &str,
    stage: Stage,
    source: &str,
) -> Result<naga::Module, CompileError> {
    let fail = |kind, diagnostic| CompileError {
        label: label.to_owned(),
        stage,
        kind,
        diagnostic,
    };

    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(stage.naga());
    let module = frontend
        .parse(&options, source)
        .map_err(|e| fail(CompileErrorKind::Parse, e.emit_to_string(source)))?;

    let _ = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| fail(CompileErrorKind::Validate, e.emit_to_string(source)))?;

    Ok(module)
}
