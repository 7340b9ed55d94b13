//! OpenCL C front end
//!
//! Program source goes through four stages: the [`preprocess`]or, the pest
//! [`parser`], the semantic checker, and finally a backend-specific lowering
//! (the host interpreter runs the checked [`ast::Module`] directly, the Metal
//! backend renders it to Metal Shading Language).
//!
//! The [`Translator`] trait is the seam between the runtime and the front end
//! so a program build can be driven by any implementation.

pub mod ast;
pub mod builtins;
mod check;
pub mod parser;
pub mod preprocess;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use ast::{AddressSpace, Module, Pos, ScalarType, Type};
use preprocess::Preprocessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A compiler message with its source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(pos, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{}:{}: {}: {}",
            self.line, self.column, severity, self.message
        )
    }
}

/// Render diagnostics as a build log, one per line
pub fn format_log(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Build options
// ============================================================================

/// Language version requested with `-cl-std=`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClStd {
    Cl10,
    Cl11,
    #[default]
    Cl12,
}

/// Parsed `clBuildProgram` option string
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildOptions {
    /// The option string as given
    pub raw: String,
    /// `-D name[=value]`
    pub defines: Vec<(String, String)>,
    /// `-I dir`; accepted and ignored since `#include` is unsupported
    pub include_dirs: Vec<String>,
    /// `-w`
    pub suppress_warnings: bool,
    /// `-Werror`
    pub warnings_as_errors: bool,
    pub cl_std: ClStd,
    pub fast_relaxed_math: bool,
    pub mad_enable: bool,
    pub no_signed_zeros: bool,
    pub unsafe_math_optimizations: bool,
    pub finite_math_only: bool,
    pub denorms_are_zero: bool,
    pub opt_disable: bool,
    pub single_precision_constant: bool,
    pub kernel_arg_info: bool,
}

impl BuildOptions {
    /// Parse an option string; the error names the offending option
    pub fn parse(options: &str) -> Result<Self, String> {
        let mut parsed = BuildOptions {
            raw: options.to_string(),
            ..Default::default()
        };
        let mut tokens = options.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "-D" => {
                    let def = tokens
                        .next()
                        .ok_or_else(|| "missing macro name after '-D'".to_string())?;
                    parsed.defines.push(split_define(def)?);
                }
                "-I" => {
                    let dir = tokens
                        .next()
                        .ok_or_else(|| "missing directory after '-I'".to_string())?;
                    parsed.include_dirs.push(dir.to_string());
                }
                "-w" => parsed.suppress_warnings = true,
                "-Werror" => parsed.warnings_as_errors = true,
                "-cl-fast-relaxed-math" => parsed.fast_relaxed_math = true,
                "-cl-mad-enable" => parsed.mad_enable = true,
                "-cl-no-signed-zeros" => parsed.no_signed_zeros = true,
                "-cl-unsafe-math-optimizations" => parsed.unsafe_math_optimizations = true,
                "-cl-finite-math-only" => parsed.finite_math_only = true,
                "-cl-denorms-are-zero" => parsed.denorms_are_zero = true,
                "-cl-opt-disable" => parsed.opt_disable = true,
                "-cl-single-precision-constant" => parsed.single_precision_constant = true,
                "-cl-kernel-arg-info" => parsed.kernel_arg_info = true,
                t if t.starts_with("-cl-std=") => {
                    parsed.cl_std = match &t["-cl-std=".len()..] {
                        "CL1.0" => ClStd::Cl10,
                        "CL1.1" => ClStd::Cl11,
                        "CL1.2" => ClStd::Cl12,
                        other => return Err(format!("unsupported language version '{}'", other)),
                    };
                }
                t if t.starts_with("-D") => parsed.defines.push(split_define(&t[2..])?),
                t if t.starts_with("-I") => parsed.include_dirs.push(t[2..].to_string()),
                other => return Err(format!("unrecognized build option '{}'", other)),
            }
        }
        Ok(parsed)
    }

    /// Whether any option relaxes IEEE float semantics
    pub fn fast_math(&self) -> bool {
        self.fast_relaxed_math || self.unsafe_math_optimizations || self.finite_math_only
    }
}

fn split_define(def: &str) -> Result<(String, String), String> {
    let (name, value) = def.split_once('=').unwrap_or((def, "1"));
    let valid = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(format!("invalid macro name '{}'", name));
    }
    Ok((name.to_string(), value.to_string()))
}

// ============================================================================
// Translation output
// ============================================================================

/// How one kernel parameter is bound at dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A memory object in `__global` or `__constant` space
    Buffer { space: AddressSpace },
    /// A `__local` pointer sized at `clSetKernelArg` time
    Local,
    Scalar(ScalarType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParam {
    pub name: String,
    pub kind: ParamKind,
    /// OpenCL C spelling of the type, e.g. `float*`
    pub type_name: String,
    pub address_space: AddressSpace,
    pub is_const: bool,
    pub is_volatile: bool,
    pub is_restrict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub params: Vec<KernelParam>,
    pub reqd_work_group_size: Option<[usize; 3]>,
    /// Attribute text reported by `CL_KERNEL_ATTRIBUTES`
    pub attributes: String,
}

impl KernelSignature {
    fn from_function(func: &ast::Function) -> Self {
        let params = func
            .params
            .iter()
            .map(|p| {
                let (kind, address_space, is_const) = match p.ty {
                    Type::Pointer(ptr) if ptr.space == AddressSpace::Local => {
                        (ParamKind::Local, ptr.space, ptr.is_const)
                    }
                    Type::Pointer(ptr) => (
                        ParamKind::Buffer { space: ptr.space },
                        ptr.space,
                        ptr.is_const,
                    ),
                    Type::Scalar(s) => (ParamKind::Scalar(s), AddressSpace::Private, p.is_const),
                    // rejected by the checker
                    _ => (ParamKind::Scalar(ScalarType::Int), AddressSpace::Private, false),
                };
                let type_name = match p.ty {
                    Type::Pointer(ptr) => format!("{}*", ptr.elem),
                    other => other.to_string(),
                };
                KernelParam {
                    name: p.name.clone(),
                    kind,
                    type_name,
                    address_space,
                    is_const,
                    is_volatile: p.is_volatile,
                    is_restrict: p.is_restrict,
                }
            })
            .collect();
        let attributes = func
            .reqd_work_group_size
            .map(|[x, y, z]| format!("reqd_work_group_size({},{},{})", x, y, z))
            .unwrap_or_default();
        Self {
            name: func.name.clone(),
            params,
            reqd_work_group_size: func.reqd_work_group_size,
            attributes,
        }
    }
}

/// A checked program ready for a backend
#[derive(Debug, Clone)]
pub struct Artifact {
    pub module: Module,
    pub kernels: Vec<KernelSignature>,
    pub options: BuildOptions,
}

impl Artifact {
    pub fn kernel(&self, name: &str) -> Option<&KernelSignature> {
        self.kernels.iter().find(|k| k.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Translation {
    pub artifact: Arc<Artifact>,
    /// Warnings
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Error)]
#[error("{}", format_log(.diagnostics))]
pub struct TranslateError {
    pub diagnostics: Vec<Diagnostic>,
}

/// Front end used by program builds
pub trait Translator: Send + Sync {
    fn translate(&self, source: &str, options: &BuildOptions)
    -> Result<Translation, TranslateError>;
}

/// The built-in OpenCL C translator
#[derive(Debug, Clone, Copy, Default)]
pub struct ClcTranslator;

impl Translator for ClcTranslator {
    fn translate(
        &self,
        source: &str,
        options: &BuildOptions,
    ) -> Result<Translation, TranslateError> {
        let fail = |d: Diagnostic| TranslateError {
            diagnostics: vec![d],
        };

        let mut pre = Preprocessor::new();
        for (name, value) in &options.defines {
            pre.define(name, value);
        }
        let expanded = pre.process(source).map_err(|e| {
            fail(Diagnostic::error(Pos::new(e.line, e.column), e.message))
        })?;

        let mut module = parser::parse(&expanded).map_err(fail)?;
        let mut diagnostics = check::check(&mut module, options);

        if options.suppress_warnings {
            diagnostics.retain(Diagnostic::is_error);
        } else if options.warnings_as_errors {
            for d in &mut diagnostics {
                d.severity = Severity::Error;
            }
        }
        if diagnostics.iter().any(Diagnostic::is_error) {
            log::debug!("translation failed with {} diagnostic(s)", diagnostics.len());
            return Err(TranslateError { diagnostics });
        }

        let kernels: Vec<KernelSignature> = module
            .kernels()
            .filter(|k| k.body.is_some())
            .map(KernelSignature::from_function)
            .collect();
        log::debug!(
            "translated program: {} function(s), {} kernel(s), {} warning(s)",
            module.functions.len(),
            kernels.len(),
            diagnostics.len()
        );
        Ok(Translation {
            artifact: Arc::new(Artifact {
                module,
                kernels,
                options: options.clone(),
            }),
            diagnostics,
        })
    }
}
