//! Compilation and caching of GPU programs.
use std::{borrow::Cow, collections::HashMap};

use crate::{
    error::ShaderCompileError,
    gpu::{
        Device, PrimitiveTopology, ProgramDescriptor, RawProgramId, VertexBufferLayout,
        VertexStepMode,
    },
    shader::{self, ProgramOrigin, ShaderInterface, ShaderSource},
    wgsl::{AttributeType, UniformLayout, UniformType},
};

/// Attribute expected by a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeSignature {
    pub name: Cow<'static, str>,
    pub ty: AttributeType,
    pub step_mode: VertexStepMode,
}

impl AttributeSignature {
    pub fn vertex(name: impl Into<Cow<'static, str>>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            ty,
            step_mode: VertexStepMode::Vertex,
        }
    }

    pub fn instance(name: impl Into<Cow<'static, str>>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            ty,
            step_mode: VertexStepMode::Instance,
        }
    }
}

/// Everything the program of a visual must agree on with the visual.
///
/// The attribute order is the order in which the vertex buffers are bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramSignature {
    pub name: Cow<'static, str>,
    pub attributes: Vec<AttributeSignature>,
    pub uniforms: Vec<(Cow<'static, str>, UniformType)>,
    pub topology: PrimitiveTopology,
}

/// Handle of a program owned by a [`ProgramRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramHandle(usize);

#[derive(Debug)]
pub struct CompiledProgram {
    pub raw: RawProgramId,
    pub label: String,
    pub signature: ProgramSignature,
    pub uniform_layout: UniformLayout,
}

#[derive(Debug, Default)]
pub struct ProgramRegistry {
    cache: HashMap<(ProgramSignature, u64), Result<ProgramHandle, ShaderCompileError>>,
    programs: Vec<CompiledProgram>,
    compilations: usize,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the program for the signature and source, compiling it on the
    /// first request.
    ///
    /// Failures are cached as well, so a broken dynamic source is reported
    /// once and never recompiled.
    ///
    /// # Panics
    ///
    /// Panics if a built-in source fails to compile.
    pub fn get_or_compile<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        signature: &ProgramSignature,
        source: &ShaderSource,
    ) -> Result<ProgramHandle, ShaderCompileError> {
        let key = (signature.clone(), source.fingerprint());
        if let Some(result) = self.cache.get(&key) {
            return result.clone();
        }

        let result = self.compile(device, signature, source);
        match &result {
            Ok(_) => tracing::debug!(
                program = %signature.name,
                source = %source.label,
                "compiled program"
            ),
            Err(err) if source.origin == ProgramOrigin::BuiltIn => {
                panic!("built-in program {:?} is invalid: {err}", signature.name)
            }
            Err(err) => tracing::warn!(
                program = %signature.name,
                source = %source.label,
                %err,
                "program failed to compile, the visual will not be drawn"
            ),
        }

        self.cache.insert(key, result.clone());
        result
    }

    fn compile<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        signature: &ProgramSignature,
        source: &ShaderSource,
    ) -> Result<ProgramHandle, ShaderCompileError> {
        let label = source.label.as_ref();
        let code = shader::resolve_includes(label, &source.code, shader::BUILTIN_SNIPPETS)?;
        shader::check_syntax(label, &code)?;
        let interface = shader::parse_interface(label, &code)?;
        let vertex_buffers = check_signature(label, signature, &interface)?;

        let uniform_layout = UniformLayout::new(&signature.uniforms);
        let raw = device.create_program(&ProgramDescriptor {
            label: Cow::Borrowed(label),
            source: &code,
            vertex_entry_point: shader::VERTEX_ENTRY_POINT,
            fragment_entry_point: shader::FRAGMENT_ENTRY_POINT,
            vertex_buffers: &vertex_buffers,
            uniform_size: uniform_layout.size(),
            topology: signature.topology,
        })?;

        self.compilations += 1;
        self.programs.push(CompiledProgram {
            raw,
            label: label.into(),
            signature: signature.clone(),
            uniform_layout,
        });

        Ok(ProgramHandle(self.programs.len() - 1))
    }

    pub fn program(&self, handle: ProgramHandle) -> &CompiledProgram {
        &self.programs[handle.0]
    }

    /// Number of programs handed to the device so far.
    pub fn compilations(&self) -> usize {
        self.compilations
    }
}

/// Matches the parsed interface against the signature and returns the vertex
/// buffer layouts in signature order.
fn check_signature(
    label: &str,
    signature: &ProgramSignature,
    interface: &ShaderInterface,
) -> Result<Vec<VertexBufferLayout>, ShaderCompileError> {
    let mismatch = |detail: String| ShaderCompileError::SignatureMismatch {
        label: label.into(),
        detail,
    };

    for (stage, entry_point) in [
        ("vertex", shader::VERTEX_ENTRY_POINT),
        ("fragment", shader::FRAGMENT_ENTRY_POINT),
    ] {
        if !interface.has_entry_point(stage, entry_point) {
            return Err(ShaderCompileError::MissingEntryPoint {
                label: label.into(),
                stage,
            });
        }
    }

    let mut layouts = Vec::with_capacity(signature.attributes.len());
    for expected in &signature.attributes {
        let Some(found) = interface.attribute(&expected.name) else {
            return Err(mismatch(format!("attribute `{}` is not declared", expected.name)));
        };
        if found.ty != expected.ty {
            return Err(mismatch(format!(
                "attribute `{}` is declared as {}, expected {}",
                expected.name,
                found.ty.wgsl_name(),
                expected.ty.wgsl_name()
            )));
        }
        layouts.push(VertexBufferLayout {
            location: found.location,
            format: expected.ty,
            step_mode: expected.step_mode,
        });
    }
    if let Some(extra) = interface
        .attributes
        .iter()
        .find(|a| !signature.attributes.iter().any(|e| e.name == a.name))
    {
        return Err(mismatch(format!(
            "attribute `{}` is not provided by the visual",
            extra.name
        )));
    }

    let declared = interface
        .uniforms
        .iter()
        .map(|(name, ty)| (name.as_str(), *ty));
    let expected = signature
        .uniforms
        .iter()
        .map(|(name, ty)| (name.as_ref(), *ty));
    if !declared.clone().eq(expected.clone()) {
        return Err(mismatch(format!(
            "uniforms {:?} do not match {:?}",
            declared.collect::<Vec<_>>(),
            expected.collect::<Vec<_>>()
        )));
    }

    Ok(layouts)
}
