//! Metal Shading Language renderer
//!
//! Turns a checked OpenCL C module into MSL source. Every user function takes
//! the work-item state (`_cl_item`) as a hidden first parameter, so OpenCL's
//! free-standing `get_global_id` and friends become reads of that struct.
//!
//! Kernel argument layout, shared with the native dispatcher:
//! parameter `i` is `[[buffer(i)]]` (buffers and scalars) or the next
//! `[[threadgroup(j)]]` slot (`__local` pointers), followed by the dispatch
//! info buffer `[work_dim, offset0, offset1, offset2]` at index `params.len()`.

use std::fmt::Write as _;

use crate::compiler::ast::*;
use crate::compiler::builtins::{AtomicOp, Builtin, IntFn, MathFn, RelationalFn, WorkItemFn};
use crate::compiler::builtins::{CLK_GLOBAL_MEM_FENCE, CLK_LOCAL_MEM_FENCE};

/// MSL source code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetalCode(String);

impl MetalCode {
    pub fn new(code: String) -> Self {
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn contains(&self, pat: &str) -> bool {
        self.0.contains(pat)
    }
}

impl From<MetalCode> for String {
    fn from(code: MetalCode) -> Self {
        code.into_inner()
    }
}

impl AsRef<str> for MetalCode {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for MetalCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const PRELUDE: &str = r#"#include <metal_stdlib>
using namespace metal;

struct _cl_item {
    uint work_dim;
    uint3 gid;
    uint3 lid;
    uint3 grp;
    uint3 gsz;
    uint3 lsz;
    uint3 ngr;
    uint3 off;
};

inline ulong _cl_dim(uint3 v, uint d, uint work_dim, uint fallback) {
    return (d < work_dim && d < 3) ? ulong(v[d]) : ulong(fallback);
}

inline float _cl_expm1(float x) { return exp(x) - 1.0f; }
inline float _cl_log1p(float x) { return log(1.0f + x); }
inline float _cl_cbrt(float x) { return copysign(pow(fabs(x), 1.0f / 3.0f), x); }
inline float _cl_hypot(float x, float y) { return sqrt(x * x + y * y); }
inline float _cl_degrees(float x) { return x * 57.295779513082320876f; }
inline float _cl_radians(float x) { return x * 0.017453292519943295f; }
inline float _cl_recip(float x) { return 1.0f / x; }

template <typename A, typename T>
inline T _cl_cmpxchg(A p, T cmp, T val) {
    T expected = cmp;
    while (!atomic_compare_exchange_weak_explicit(p, &expected, val, memory_order_relaxed, memory_order_relaxed)) {
        if (expected != cmp) {
            break;
        }
        expected = cmp;
    }
    return expected;
}
"#;

/// MSL spelling of a scalar type (`double` is demoted to `float`)
fn scalar_name(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::Double => "float",
        other => other.name(),
    }
}

fn space_name(space: AddressSpace) -> &'static str {
    match space {
        AddressSpace::Global => "device",
        AddressSpace::Constant => "constant",
        AddressSpace::Local => "threadgroup",
        AddressSpace::Private => "thread",
    }
}

fn pointer_name(ptr: PtrType) -> String {
    let constness = if ptr.is_const && ptr.space != AddressSpace::Constant {
        "const "
    } else {
        ""
    };
    format!(
        "{} {}{}*",
        space_name(ptr.space),
        constness,
        scalar_name(ptr.elem)
    )
}

fn type_name(ty: Type) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::Scalar(s) => scalar_name(s).to_string(),
        Type::Pointer(p) => pointer_name(p),
        Type::Array { elem, .. } => scalar_name(elem).to_string(),
    }
}

fn int_literal(v: u64, ty: ScalarType) -> String {
    let signed = ty.is_signed();
    match ty {
        ScalarType::Long if (v as i64) < 0 => format!("static_cast<long>({}ul)", v),
        ScalarType::Long => format!("{}l", v),
        ScalarType::ULong => format!("{}ul", v),
        _ if signed && (v as i64) < 0 => {
            format!("static_cast<{}>({}l)", scalar_name(ty), v as i64)
        }
        ScalarType::UInt | ScalarType::UChar | ScalarType::UShort => format!("{}u", v),
        _ => v.to_string(),
    }
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string()
    } else {
        format!("{:?}f", v as f32)
    }
}

fn math_call(func: MathFn, args: &[String]) -> String {
    let joined = args.join(", ");
    let helper = match func {
        MathFn::Expm1 => Some("_cl_expm1"),
        MathFn::Log1p => Some("_cl_log1p"),
        MathFn::Cbrt => Some("_cl_cbrt"),
        MathFn::Hypot => Some("_cl_hypot"),
        MathFn::Degrees => Some("_cl_degrees"),
        MathFn::Radians => Some("_cl_radians"),
        MathFn::Recip => Some("_cl_recip"),
        _ => None,
    };
    if let Some(helper) = helper {
        return format!("{}({})", helper, joined);
    }
    match (func, args) {
        (MathFn::Divide, [x, y]) => format!("({} / {})", x, y),
        (MathFn::Mad, _) => format!("fma({})", joined),
        (MathFn::Exp10, _) => format!("exp10({})", joined),
        (func, _) => format!("{}({})", func.name(), joined),
    }
}

fn mem_flags(flags: Option<i64>) -> &'static str {
    let flags = flags.map(|f| f as u64).unwrap_or(CLK_LOCAL_MEM_FENCE | CLK_GLOBAL_MEM_FENCE);
    let local = flags & CLK_LOCAL_MEM_FENCE != 0;
    let global = flags & CLK_GLOBAL_MEM_FENCE != 0;
    match (local, global) {
        (true, true) => "mem_flags::mem_device | mem_flags::mem_threadgroup",
        (false, true) => "mem_flags::mem_device",
        (true, false) => "mem_flags::mem_threadgroup",
        (false, false) => "mem_flags::mem_none",
    }
}

fn saturate_call(value: &str, from: ScalarType, to: ScalarType) -> String {
    let target = scalar_name(to);
    if to.is_float() {
        return format!("static_cast<{}>({})", target, value);
    }
    let w = (to.size() * 8) as u32;
    let (min, max): (i128, i128) = match to {
        ScalarType::Bool => (0, 1),
        _ if to.is_signed() => (-(1i128 << (w - 1)), (1i128 << (w - 1)) - 1),
        _ => (0, (1i128 << w) - 1),
    };
    if from.is_float() {
        format!(
            "static_cast<{}>(clamp({}, {}, {}))",
            target,
            value,
            float_literal(min as f64),
            float_literal(max as f64)
        )
    } else if to == ScalarType::ULong {
        if from.is_signed() {
            format!("static_cast<ulong>(max(static_cast<long>({}), 0l))", value)
        } else {
            format!("static_cast<ulong>({})", value)
        }
    } else if from == ScalarType::ULong {
        format!("static_cast<{}>(min({}, {}ul))", target, value, max as u64)
    } else {
        format!(
            "static_cast<{}>(clamp(static_cast<long>({}), {}, {}))",
            target,
            value,
            int_literal(min as i64 as u64, ScalarType::Long),
            int_literal(max as i64 as u64, ScalarType::Long)
        )
    }
}

/// Renders a module to MSL
#[derive(Debug, Clone, Default)]
pub struct MetalRenderer {
    indent_level: usize,
    out: String,
    warnings: Vec<String>,
}

impl MetalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `module`; returns the source and the warnings collected on the way
    pub fn render(mut self, module: &Module) -> Result<(MetalCode, Vec<String>), String> {
        self.out.push_str(PRELUDE);

        for global in &module.globals {
            self.global(&global.decl);
        }

        let helpers: Vec<&Function> = module
            .functions
            .iter()
            .filter(|f| !f.is_kernel && f.body.is_some())
            .collect();
        if !helpers.is_empty() {
            self.out.push('\n');
        }
        for func in &helpers {
            let proto = self.helper_signature(func);
            let _ = writeln!(self.out, "{};", proto);
        }
        for func in &helpers {
            let proto = self.helper_signature(func);
            let _ = write!(self.out, "\n{} ", proto);
            if let Some(body) = &func.body {
                self.body(&[], body, module);
            }
        }
        for func in module.functions.iter().filter(|f| f.is_kernel && f.body.is_some()) {
            self.kernel(func, module)?;
        }
        Ok((MetalCode::new(self.out), self.warnings))
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn note_double(&mut self, ty: Type) {
        let is_double = match ty {
            Type::Scalar(s) | Type::Array { elem: s, .. } => s == ScalarType::Double,
            Type::Pointer(p) => p.elem == ScalarType::Double,
            Type::Void => false,
        };
        if is_double {
            self.warn("double precision is not supported by Metal; 'double' is computed as 'float'");
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.indent_level {
            self.out.push_str("    ");
        }
    }

    fn global(&mut self, decl: &VarDecl) {
        self.note_double(decl.ty);
        let elem = match decl.ty {
            Type::Scalar(s) | Type::Array { elem: s, .. } => s,
            _ => return,
        };
        let _ = write!(self.out, "\nconstant {} {}", scalar_name(elem), decl.name);
        if let Type::Array { len, .. } = decl.ty {
            let _ = write!(self.out, "[{}]", len);
        }
        let zero = Expr::typed(
            if elem.is_float() { ExprKind::FloatLit(0.0) } else { ExprKind::IntLit(0) },
            Type::Scalar(elem),
            decl.pos,
        );
        let init = match &decl.init {
            Some(Init::Expr(e)) => self.expr(e),
            Some(Init::List(items)) => {
                let items: Vec<String> = items.iter().map(|e| self.expr(e)).collect();
                format!("{{{}}}", items.join(", "))
            }
            None if matches!(decl.ty, Type::Array { .. }) => "{}".to_string(),
            None => self.expr(&zero),
        };
        let _ = writeln!(self.out, " = {};", init);
    }

    fn param(&mut self, param: &Param) -> String {
        self.note_double(param.ty);
        format!("{} {}", type_name(param.ty), param.name)
    }

    fn helper_signature(&mut self, func: &Function) -> String {
        self.note_double(func.ret);
        let mut params = vec!["thread const _cl_item& _item".to_string()];
        params.extend(func.params.iter().map(|p| self.param(p)));
        format!("{} {}({})", type_name(func.ret), func.name, params.join(", "))
    }

    fn kernel(&mut self, func: &Function, module: &Module) -> Result<(), String> {
        let mut params = Vec::new();
        let mut scalar_copies = Vec::new();
        let mut threadgroup = 0;
        for (i, param) in func.params.iter().enumerate() {
            let mentions_double = match param.ty {
                Type::Scalar(s) => s == ScalarType::Double,
                Type::Pointer(p) => p.elem == ScalarType::Double,
                _ => false,
            };
            if mentions_double {
                return Err(format!(
                    "kernel '{}': argument '{}' uses 'double', which Metal does not support",
                    func.name, param.name
                ));
            }
            match param.ty {
                Type::Pointer(p) if p.space == AddressSpace::Local => {
                    params.push(format!(
                        "{} {} [[threadgroup({})]]",
                        pointer_name(p),
                        param.name,
                        threadgroup
                    ));
                    threadgroup += 1;
                }
                Type::Pointer(p) => {
                    params.push(format!("{} {} [[buffer({})]]", pointer_name(p), param.name, i));
                }
                Type::Scalar(s) => {
                    params.push(format!(
                        "constant {}& _arg_{} [[buffer({})]]",
                        scalar_name(s),
                        param.name,
                        i
                    ));
                    scalar_copies.push(format!(
                        "{} {} = _arg_{};",
                        scalar_name(s),
                        param.name,
                        param.name
                    ));
                }
                other => {
                    return Err(format!(
                        "kernel '{}': unsupported argument type '{}'",
                        func.name, other
                    ));
                }
            }
        }
        params.push(format!(
            "constant uint* _dispatch [[buffer({})]]",
            func.params.len()
        ));
        params.extend(
            [
                "uint3 _gid [[thread_position_in_grid]]",
                "uint3 _lid [[thread_position_in_threadgroup]]",
                "uint3 _grp [[threadgroup_position_in_grid]]",
                "uint3 _gsz [[threads_per_grid]]",
                "uint3 _lsz [[threads_per_threadgroup]]",
                "uint3 _ngr [[threadgroups_per_grid]]",
            ]
            .map(String::from),
        );

        let _ = write!(
            self.out,
            "\nkernel void {}(\n    {}) ",
            func.name,
            params.join(",\n    ")
        );

        let mut header = vec![
            "const uint3 _off = uint3(_dispatch[1], _dispatch[2], _dispatch[3]);".to_string(),
            "const _cl_item _item = {_dispatch[0], _gid + _off, _lid, _grp, _gsz, _lsz, _ngr, _off};"
                .to_string(),
        ];
        header.extend(scalar_copies);
        if let Some(body) = &func.body {
            self.body(&header, body, module);
        }
        Ok(())
    }

    fn body(&mut self, header: &[String], stmts: &[Stmt], module: &Module) {
        self.out.push_str("{\n");
        self.indent_level += 1;
        for line in header {
            self.indent();
            self.out.push_str(line);
            self.out.push('\n');
        }
        for stmt in stmts {
            self.stmt(stmt, module);
        }
        self.indent_level -= 1;
        self.indent();
        self.out.push_str("}\n");
    }

    fn block(&mut self, stmts: &[Stmt], module: &Module) {
        self.body(&[], stmts, module);
    }

    /// Render a nested statement as a braced block
    fn nested(&mut self, stmt: &Stmt, module: &Module) {
        match stmt {
            Stmt::Block(stmts) => self.block(stmts, module),
            other => self.block(std::slice::from_ref(other), module),
        }
    }

    fn stmt(&mut self, stmt: &Stmt, module: &Module) {
        match stmt {
            Stmt::Decl(decls) => {
                for decl in decls {
                    self.indent();
                    let line = self.decl(decl);
                    self.out.push_str(&line);
                    self.out.push('\n');
                }
            }
            Stmt::Expr(e) => {
                self.indent();
                let e = self.expr(e);
                let _ = writeln!(self.out, "{};", e);
            }
            Stmt::If(cond, then, otherwise) => {
                self.indent();
                let cond = self.expr(cond);
                let _ = write!(self.out, "if ({}) ", cond);
                self.nested(then, module);
                if let Some(otherwise) = otherwise {
                    self.indent();
                    self.out.push_str("else ");
                    self.nested(otherwise, module);
                }
            }
            Stmt::While(cond, body) => {
                self.indent();
                let cond = self.expr(cond);
                let _ = write!(self.out, "while ({}) ", cond);
                self.nested(body, module);
            }
            Stmt::DoWhile(body, cond) => {
                self.indent();
                self.out.push_str("do ");
                self.nested(body, module);
                self.indent();
                let cond = self.expr(cond);
                let _ = writeln!(self.out, "while ({});", cond);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                // the init statement gets its own scope around the loop
                self.indent();
                self.out.push_str("{\n");
                self.indent_level += 1;
                if let Some(init) = init {
                    self.stmt(init, module);
                }
                self.indent();
                let cond = cond.as_ref().map(|c| self.expr(c)).unwrap_or_default();
                let step = step.as_ref().map(|s| self.expr(s)).unwrap_or_default();
                let _ = write!(self.out, "for (; {}; {}) ", cond, step);
                self.nested(body, module);
                self.indent_level -= 1;
                self.indent();
                self.out.push_str("}\n");
            }
            Stmt::Block(stmts) => {
                self.indent();
                self.block(stmts, module);
            }
            Stmt::Break(_) => {
                self.indent();
                self.out.push_str("break;\n");
            }
            Stmt::Continue(_) => {
                self.indent();
                self.out.push_str("continue;\n");
            }
            Stmt::Return(value, _) => {
                self.indent();
                match value {
                    Some(e) => {
                        let e = self.expr(e);
                        let _ = writeln!(self.out, "return {};", e);
                    }
                    None => self.out.push_str("return;\n"),
                }
            }
            Stmt::Empty => {}
        }
    }

    fn decl(&mut self, decl: &VarDecl) -> String {
        self.note_double(decl.ty);
        match decl.ty {
            Type::Array { elem, len, .. } => {
                let local = decl.space == AddressSpace::Local;
                let prefix = if local {
                    "threadgroup "
                } else {
                    ""
                };
                let init = match &decl.init {
                    Some(Init::List(items)) => {
                        let items: Vec<String> = items.iter().map(|e| self.expr(e)).collect();
                        format!(" = {{{}}}", items.join(", "))
                    }
                    _ if local => String::new(),
                    _ => " = {}".to_string(),
                };
                format!("{}{} {}[{}]{};", prefix, scalar_name(elem), decl.name, len, init)
            }
            ty => {
                let constness = if decl.is_const { "const " } else { "" };
                let init = match &decl.init {
                    Some(Init::Expr(e)) => format!(" = {}", self.expr(e)),
                    _ => match ty {
                        Type::Pointer(_) => " = nullptr".to_string(),
                        _ => " = 0".to_string(),
                    },
                };
                format!("{}{} {}{};", constness, type_name(ty), decl.name, init)
            }
        }
    }

    fn expr(&mut self, e: &Expr) -> String {
        match &e.kind {
            ExprKind::IntLit(v) => match e.ty {
                Type::Scalar(s) => int_literal(*v, s),
                // null pointer constant
                _ => "nullptr".to_string(),
            },
            ExprKind::FloatLit(v) => {
                self.note_double(e.ty);
                float_literal(*v)
            }
            ExprKind::Var(name) => name.clone(),
            ExprKind::Unary(op, inner) => {
                let inner = self.expr(inner);
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                format!("({}{})", op, inner)
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let (lhs, rhs) = (self.expr(lhs), self.expr(rhs));
                format!("({} {} {})", lhs, op.symbol(), rhs)
            }
            ExprKind::Assign(op, target, value) => {
                let (target, value) = (self.expr(target), self.expr(value));
                let op = op.map(|op| op.symbol()).unwrap_or("");
                format!("({} {}= {})", target, op, value)
            }
            ExprKind::IncDec {
                increment,
                prefix,
                target,
            } => {
                let target = self.expr(target);
                let op = if *increment { "++" } else { "--" };
                if *prefix {
                    format!("({}{})", op, target)
                } else {
                    format!("({}{})", target, op)
                }
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                let cond = self.expr(cond);
                let then = self.expr(then);
                let otherwise = self.expr(otherwise);
                format!("({} ? {} : {})", cond, then, otherwise)
            }
            ExprKind::Cast(to, inner) => {
                self.note_double(*to);
                let rendered = self.expr(inner);
                match to {
                    Type::Pointer(_) if matches!(inner.kind, ExprKind::IntLit(0)) => {
                        "nullptr".to_string()
                    }
                    Type::Pointer(_) => format!("(({})({}))", type_name(*to), rendered),
                    Type::Void => format!("((void)({}))", rendered),
                    _ => format!("static_cast<{}>({})", type_name(*to), rendered),
                }
            }
            ExprKind::Index(base, index) => {
                let (base, index) = (self.expr(base), self.expr(index));
                format!("{}[{}]", base, index)
            }
            ExprKind::Deref(inner) => format!("(*{})", self.expr(inner)),
            ExprKind::AddrOf(inner) => format!("(&{})", self.expr(inner)),
            ExprKind::Call { name, args, target } => {
                let rendered: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                match target {
                    CallTarget::Builtin(builtin) => self.builtin(*builtin, args, &rendered),
                    _ => {
                        let mut all = vec!["_item".to_string()];
                        all.extend(rendered);
                        format!("{}({})", name, all.join(", "))
                    }
                }
            }
            ExprKind::SizeOf(ty) => {
                let size = match ty {
                    Type::Scalar(s) => s.size(),
                    _ => 8,
                };
                format!("{}ul", size)
            }
            ExprKind::SizeOfExpr(inner) => format!("sizeof({})", self.expr(inner)),
        }
    }

    fn builtin(&mut self, builtin: Builtin, args: &[Expr], rendered: &[String]) -> String {
        let arg = |i: usize| rendered.get(i).cloned().unwrap_or_default();
        match builtin {
            Builtin::WorkItem(WorkItemFn::WorkDim) => "_item.work_dim".to_string(),
            Builtin::WorkItem(func) => {
                let (field, fallback) = match func {
                    WorkItemFn::GlobalId => ("gid", 0),
                    WorkItemFn::LocalId => ("lid", 0),
                    WorkItemFn::GroupId => ("grp", 0),
                    WorkItemFn::GlobalSize => ("gsz", 1),
                    WorkItemFn::LocalSize => ("lsz", 1),
                    WorkItemFn::NumGroups => ("ngr", 1),
                    _ => ("off", 0),
                };
                format!(
                    "_cl_dim(_item.{}, {}, _item.work_dim, {})",
                    field,
                    arg(0),
                    fallback
                )
            }
            Builtin::Math(func, _) => math_call(func, rendered),
            Builtin::Int(func) => match func {
                IntFn::Mul24 => format!("({} * {})", arg(0), arg(1)),
                IntFn::Mad24 => format!("({} * {} + {})", arg(0), arg(1), arg(2)),
                IntFn::MulHi => format!("mulhi({}, {})", arg(0), arg(1)),
                func => format!("{}({})", func.name(), rendered.join(", ")),
            },
            Builtin::Relational(RelationalFn::Select) => {
                format!("({} ? {} : {})", arg(2), arg(1), arg(0))
            }
            Builtin::Relational(func) => {
                let name = match func {
                    RelationalFn::IsNan => "isnan",
                    RelationalFn::IsInf => "isinf",
                    RelationalFn::IsFinite => "isfinite",
                    _ => "signbit",
                };
                format!("int({}({}))", name, arg(0))
            }
            Builtin::Convert { to, saturate } => {
                let from = args
                    .first()
                    .and_then(|a| a.ty.scalar())
                    .unwrap_or(ScalarType::Int);
                if saturate {
                    saturate_call(&arg(0), from, to)
                } else {
                    format!("static_cast<{}>({})", scalar_name(to), arg(0))
                }
            }
            Builtin::Reinterpret(to) => format!("as_type<{}>({})", scalar_name(to), arg(0)),
            Builtin::Atomic(op) => {
                let ptr = args
                    .first()
                    .and_then(|a| a.ty.pointer())
                    .unwrap_or(PtrType {
                        elem: ScalarType::Int,
                        space: AddressSpace::Global,
                        is_const: false,
                    });
                let atomic = format!(
                    "(({} atomic_{}*)({}))",
                    space_name(ptr.space),
                    scalar_name(ptr.elem),
                    arg(0)
                );
                let fetch = |name: &str, value: String| {
                    format!(
                        "atomic_{}_explicit({}, {}, memory_order_relaxed)",
                        name, atomic, value
                    )
                };
                let one = int_literal(1, ptr.elem);
                match op {
                    AtomicOp::Add => fetch("fetch_add", arg(1)),
                    AtomicOp::Sub => fetch("fetch_sub", arg(1)),
                    AtomicOp::Inc => fetch("fetch_add", one),
                    AtomicOp::Dec => fetch("fetch_sub", one),
                    AtomicOp::Xchg => fetch("exchange", arg(1)),
                    AtomicOp::Min => fetch("fetch_min", arg(1)),
                    AtomicOp::Max => fetch("fetch_max", arg(1)),
                    AtomicOp::And => fetch("fetch_and", arg(1)),
                    AtomicOp::Or => fetch("fetch_or", arg(1)),
                    AtomicOp::Xor => fetch("fetch_xor", arg(1)),
                    AtomicOp::CmpXchg => {
                        format!("_cl_cmpxchg({}, {}, {})", atomic, arg(1), arg(2))
                    }
                }
            }
            Builtin::Barrier => {
                let flags = args.first().and_then(Expr::const_int);
                format!("threadgroup_barrier({})", mem_flags(flags))
            }
            Builtin::MemFence => {
                self.warn("mem_fence has no Metal equivalent outside a barrier and is ignored");
                "((void)0)".to_string()
            }
        }
    }
}

/// Render `module` to MSL
pub fn render(module: &Module) -> Result<(MetalCode, Vec<String>), String> {
    MetalRenderer::new().render(module)
}
