//! Semantic analysis: name resolution, typing, and OpenCL C restrictions
//!
//! The checker rewrites the module in place. Every expression gets its type,
//! implicit conversions become explicit `Cast` nodes so both operands of an
//! arithmetic `Binary` share one type, built-in constants and `sizeof` fold
//! to literals, and calls are bound to a built-in or a function index.

use std::mem;

use rustc_hash::{FxHashMap, FxHashSet};

use super::ast::*;
use super::builtins::{self, Builtin, Constant};
use super::{BuildOptions, Diagnostic};

type CResult<T> = Result<T, Diagnostic>;

#[derive(Debug, Clone, Copy)]
struct Symbol {
    ty: Type,
    is_const: bool,
    used: bool,
    is_param: bool,
    pos: Pos,
}

#[derive(Debug, Clone)]
struct FnSig {
    ret: Type,
    params: Vec<Type>,
    is_kernel: bool,
    /// Index of the defining function
    def: Option<usize>,
    pos: Pos,
}

/// Check `module`, returning every error and warning found
pub(crate) fn check(module: &mut Module, options: &BuildOptions) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    let globals = check_globals(&mut module.globals, options, &mut diags);
    let sigs = match collect_signatures(&module.functions) {
        Ok(sigs) => sigs,
        Err(d) => {
            diags.push(d);
            return diags;
        }
    };

    let n = module.functions.len();
    let mut calls = vec![FxHashSet::default(); n];
    let mut barrier = vec![false; n];

    for (index, func) in module.functions.iter_mut().enumerate() {
        let Some(mut body) = func.body.take() else {
            continue;
        };
        let mut checker = FnChecker {
            globals: &globals,
            sigs: &sigs,
            diags: &mut diags,
            scopes: Vec::new(),
            ret: func.ret,
            is_kernel: func.is_kernel,
            loop_depth: 0,
            local_arrays: Vec::new(),
            calls: FxHashSet::default(),
            uses_barrier: false,
            single_precision_constant: options.single_precision_constant,
        };
        let result = checker.function(&func.params, &mut body);
        let (local_arrays, fn_calls, uses_barrier) =
            (checker.local_arrays, checker.calls, checker.uses_barrier);
        if let Err(d) = result {
            diags.push(d);
        }
        func.body = Some(body);
        func.local_arrays = local_arrays;
        calls[index] = fn_calls;
        barrier[index] = uses_barrier;
    }

    if let Some(d) = find_recursion(&module.functions, &calls) {
        diags.push(d);
    }

    // barrier use propagates from callees to callers
    loop {
        let mut changed = false;
        for i in 0..n {
            if !barrier[i] && calls[i].iter().any(|&j| barrier[j]) {
                barrier[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for (func, uses) in module.functions.iter_mut().zip(barrier) {
        func.uses_barrier = uses;
    }

    diags
}

// ============================================================================
// Program scope
// ============================================================================

fn check_globals(
    globals: &mut [GlobalVar],
    options: &BuildOptions,
    diags: &mut Vec<Diagnostic>,
) -> FxHashMap<String, Symbol> {
    let mut symbols = FxHashMap::default();
    for global in globals.iter_mut() {
        let decl = &mut global.decl;
        match check_global(decl, options) {
            Ok(()) => {
                if symbols.contains_key(&decl.name) {
                    diags.push(Diagnostic::error(
                        decl.pos,
                        format!("redefinition of '{}'", decl.name),
                    ));
                    continue;
                }
                symbols.insert(
                    decl.name.clone(),
                    Symbol {
                        ty: decl.ty,
                        is_const: true,
                        used: true,
                        is_param: false,
                        pos: decl.pos,
                    },
                );
            }
            Err(d) => diags.push(d),
        }
    }
    symbols
}

fn check_global(decl: &mut VarDecl, options: &BuildOptions) -> CResult<()> {
    if decl.space != AddressSpace::Constant {
        return Err(Diagnostic::error(
            decl.pos,
            format!(
                "program scope variable '{}' must be declared in the __constant address space",
                decl.name
            ),
        ));
    }
    if decl.ty.is_pointer_like() && decl.len_expr.is_none() {
        return Err(Diagnostic::error(
            decl.pos,
            "program scope pointers are not supported",
        ));
    }
    resolve_array_len(decl)?;
    let elem = match decl.ty {
        Type::Scalar(s) | Type::Array { elem: s, .. } => s,
        _ => return Err(Diagnostic::error(decl.pos, "unsupported program scope type")),
    };
    let fold = |e: &Expr| {
        fold_constant(e, options.single_precision_constant)
            .map(|c| literal(c, elem, e.pos))
            .ok_or_else(|| {
                Diagnostic::error(e.pos, "initializer element is not a compile-time constant")
            })
    };
    decl.init = match (&decl.init, decl.ty) {
        (None, _) => None,
        (Some(Init::Expr(e)), Type::Scalar(_)) => Some(Init::Expr(fold(e)?)),
        (Some(Init::List(items)), Type::Array { len, .. }) => {
            if items.len() > len {
                return Err(Diagnostic::error(
                    decl.pos,
                    format!("excess elements in initializer of '{}'", decl.name),
                ));
            }
            Some(Init::List(items.iter().map(fold).collect::<CResult<_>>()?))
        }
        _ => {
            return Err(Diagnostic::error(
                decl.pos,
                format!("invalid initializer for '{}'", decl.name),
            ));
        }
    };
    Ok(())
}

/// Evaluate a constant initializer expression (before type checking)
fn fold_constant(e: &Expr, single_precision: bool) -> Option<Constant> {
    if let Some(v) = e.const_int() {
        return Some(Constant::Int(v as u64, e.ty.scalar().unwrap_or(ScalarType::Int)));
    }
    match &e.kind {
        ExprKind::FloatLit(v) => Some(Constant::Float(
            *v,
            if single_precision {
                ScalarType::Float
            } else {
                e.ty.scalar().unwrap_or(ScalarType::Double)
            },
        )),
        ExprKind::Var(name) => builtins::constant(name),
        ExprKind::Unary(UnaryOp::Neg, inner) => match fold_constant(inner, single_precision)? {
            Constant::Float(v, ty) => Some(Constant::Float(-v, ty)),
            Constant::Int(v, ty) => Some(Constant::Int(v.wrapping_neg(), ty)),
        },
        ExprKind::Unary(UnaryOp::Plus, inner) => fold_constant(inner, single_precision),
        ExprKind::Cast(Type::Scalar(to), inner) => {
            match fold_constant(inner, single_precision)? {
                Constant::Float(v, _) if to.is_float() => Some(Constant::Float(v, *to)),
                Constant::Int(v, _) if to.is_integer() => Some(Constant::Int(v, *to)),
                Constant::Float(v, _) => Some(Constant::Int(v as i64 as u64, *to)),
                Constant::Int(v, from) => Some(Constant::Float(int_to_f64(v, from), *to)),
            }
        }
        _ => None,
    }
}

fn int_to_f64(v: u64, ty: ScalarType) -> f64 {
    if ty.is_signed() {
        v as i64 as f64
    } else {
        v as f64
    }
}

/// Literal of type `to` holding constant `c`
fn literal(c: Constant, to: ScalarType, pos: Pos) -> Expr {
    let kind = match (c, to.is_float()) {
        (Constant::Int(v, from), true) => ExprKind::FloatLit(int_to_f64(v, from)),
        (Constant::Int(v, _), false) => ExprKind::IntLit(v),
        (Constant::Float(v, _), true) => ExprKind::FloatLit(v),
        (Constant::Float(v, _), false) => ExprKind::IntLit(v as i64 as u64),
    };
    Expr::typed(kind, Type::Scalar(to), pos)
}

fn constant_expr(c: Constant, pos: Pos) -> Expr {
    match c {
        Constant::Int(v, ty) => Expr::typed(ExprKind::IntLit(v), Type::Scalar(ty), pos),
        Constant::Float(v, ty) => Expr::typed(ExprKind::FloatLit(v), Type::Scalar(ty), pos),
    }
}

fn resolve_array_len(decl: &mut VarDecl) -> CResult<()> {
    if let Type::Array { elem, space, .. } = decl.ty {
        let len = decl
            .len_expr
            .as_ref()
            .and_then(|e| e.const_int())
            .filter(|len| *len > 0)
            .ok_or_else(|| {
                Diagnostic::error(
                    decl.pos,
                    format!(
                        "size of array '{}' must be a positive integer constant",
                        decl.name
                    ),
                )
            })?;
        decl.ty = Type::Array {
            elem,
            len: len as usize,
            space,
        };
    }
    Ok(())
}

fn collect_signatures(functions: &[Function]) -> CResult<FxHashMap<String, FnSig>> {
    let mut sigs: FxHashMap<String, FnSig> = FxHashMap::default();
    for (index, func) in functions.iter().enumerate() {
        if builtins::is_builtin(&func.name) {
            return Err(Diagnostic::error(
                func.pos,
                format!("redefinition of built-in function '{}'", func.name),
            ));
        }
        check_function_shape(func)?;

        let params: Vec<Type> = func.params.iter().map(|p| p.ty).collect();
        let def = func.body.as_ref().map(|_| index);
        match sigs.get_mut(&func.name) {
            Some(prev) => {
                if prev.ret != func.ret || prev.params != params || prev.is_kernel != func.is_kernel
                {
                    return Err(Diagnostic::error(
                        func.pos,
                        format!(
                            "conflicting types for '{}' (previous declaration at line {})",
                            func.name, prev.pos.line
                        ),
                    ));
                }
                if prev.def.is_some() && def.is_some() {
                    return Err(Diagnostic::error(
                        func.pos,
                        format!("redefinition of '{}'", func.name),
                    ));
                }
                prev.def = prev.def.or(def);
            }
            None => {
                sigs.insert(
                    func.name.clone(),
                    FnSig {
                        ret: func.ret,
                        params,
                        is_kernel: func.is_kernel,
                        def,
                        pos: func.pos,
                    },
                );
            }
        }
    }
    Ok(sigs)
}

fn check_function_shape(func: &Function) -> CResult<()> {
    let mut names = FxHashSet::default();
    for param in &func.params {
        if param.ty.is_void() {
            return Err(Diagnostic::error(
                param.pos,
                format!("parameter '{}' has type 'void'", param.name),
            ));
        }
        if !param.name.is_empty() && !names.insert(param.name.as_str()) {
            return Err(Diagnostic::error(
                param.pos,
                format!("redefinition of parameter '{}'", param.name),
            ));
        }
    }
    if !func.is_kernel {
        return Ok(());
    }
    if !func.ret.is_void() {
        return Err(Diagnostic::error(
            func.pos,
            format!("kernel '{}' must return void", func.name),
        ));
    }
    for param in &func.params {
        match param.ty {
            Type::Pointer(ptr) if ptr.space == AddressSpace::Private => {
                return Err(Diagnostic::error(
                    param.pos,
                    format!(
                        "pointer argument '{}' of a kernel must point to __global, __constant, or __local memory",
                        param.name
                    ),
                ));
            }
            Type::Scalar(ScalarType::Bool) => {
                return Err(Diagnostic::error(
                    param.pos,
                    format!("kernel argument '{}' cannot be of type 'bool'", param.name),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn find_recursion(functions: &[Function], calls: &[FxHashSet<usize>]) -> Option<Diagnostic> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(i: usize, calls: &[FxHashSet<usize>], marks: &mut [Mark]) -> Option<usize> {
        marks[i] = Mark::Active;
        for &j in &calls[i] {
            match marks[j] {
                Mark::Active => return Some(j),
                Mark::New => {
                    if let Some(cycle) = visit(j, calls, marks) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        marks[i] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; functions.len()];
    for i in 0..functions.len() {
        if marks[i] == Mark::New {
            if let Some(j) = visit(i, calls, &mut marks) {
                let func = &functions[j];
                return Some(Diagnostic::error(
                    func.pos,
                    format!("recursive call to '{}' is not supported", func.name),
                ));
            }
        }
    }
    None
}

// ============================================================================
// Function bodies
// ============================================================================

struct FnChecker<'a> {
    globals: &'a FxHashMap<String, Symbol>,
    sigs: &'a FxHashMap<String, FnSig>,
    diags: &'a mut Vec<Diagnostic>,
    scopes: Vec<FxHashMap<String, Symbol>>,
    ret: Type,
    is_kernel: bool,
    loop_depth: usize,
    local_arrays: Vec<LocalArray>,
    calls: FxHashSet<usize>,
    uses_barrier: bool,
    single_precision_constant: bool,
}

/// Wrap `e` in a conversion to `to` unless it already has that type
fn convert(e: &mut Expr, to: Type) {
    if e.ty != to {
        let pos = e.pos;
        let inner = mem::replace(e, Expr::new(ExprKind::IntLit(0), pos));
        *e = Expr::typed(ExprKind::Cast(to, Box::new(inner)), to, pos);
    }
}

fn is_null_literal(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::IntLit(0)) && e.ty.scalar().is_some_and(|s| s.is_integer())
}

impl FnChecker<'_> {
    fn function(&mut self, params: &[Param], body: &mut [Stmt]) -> CResult<()> {
        self.push_scope();
        for param in params.iter().filter(|p| !p.name.is_empty()) {
            self.declare(
                &param.name,
                Symbol {
                    ty: param.ty,
                    is_const: param.is_const,
                    used: false,
                    is_param: true,
                    pos: param.pos,
                },
            )?;
        }
        for stmt in body.iter_mut() {
            self.stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        let mut unused: Vec<(&String, &Symbol)> = scope
            .iter()
            .filter(|(_, s)| !s.used && !s.is_param)
            .collect();
        unused.sort_by_key(|(_, s)| (s.pos.line, s.pos.column));
        for (name, sym) in unused {
            self.diags.push(Diagnostic::warning(
                sym.pos,
                format!("unused variable '{}'", name),
            ));
        }
    }

    fn declare(&mut self, name: &str, symbol: Symbol) -> CResult<()> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(Diagnostic::error(symbol.pos, "declaration outside of a scope"));
        };
        if scope.contains_key(name) {
            return Err(Diagnostic::error(
                symbol.pos,
                format!("redefinition of '{}'", name),
            ));
        }
        scope.insert(name.to_string(), symbol);
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Option<Symbol> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(sym) = scope.get_mut(name) {
                sym.used = true;
                return Some(*sym);
            }
        }
        self.globals.get(name).copied()
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn stmt(&mut self, stmt: &mut Stmt) -> CResult<()> {
        match stmt {
            Stmt::Decl(decls) => {
                for decl in decls {
                    self.decl(decl)?;
                }
            }
            Stmt::Expr(e) => self.expr(e)?,
            Stmt::If(cond, then, otherwise) => {
                self.condition(cond)?;
                self.scoped(then)?;
                if let Some(otherwise) = otherwise {
                    self.scoped(otherwise)?;
                }
            }
            Stmt::While(cond, body) => {
                self.condition(cond)?;
                self.loop_body(body)?;
            }
            Stmt::DoWhile(body, cond) => {
                self.loop_body(body)?;
                self.condition(cond)?;
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push_scope();
                let result = (|| {
                    if let Some(init) = init {
                        self.stmt(init)?;
                    }
                    if let Some(cond) = cond {
                        self.condition(cond)?;
                    }
                    if let Some(step) = step {
                        self.expr(step)?;
                    }
                    self.loop_body(body)
                })();
                self.pop_scope();
                result?;
            }
            Stmt::Block(stmts) => {
                self.push_scope();
                let result = stmts.iter_mut().try_for_each(|s| self.stmt(s));
                self.pop_scope();
                result?;
            }
            Stmt::Break(pos) if self.loop_depth == 0 => {
                return Err(Diagnostic::error(*pos, "'break' statement not in loop statement"));
            }
            Stmt::Continue(pos) if self.loop_depth == 0 => {
                return Err(Diagnostic::error(
                    *pos,
                    "'continue' statement not in loop statement",
                ));
            }
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::Return(value, pos) => match (value, self.ret) {
                (None, Type::Void) => {}
                (None, ret) => {
                    return Err(Diagnostic::error(
                        *pos,
                        format!("non-void function should return a value of type '{}'", ret),
                    ));
                }
                (Some(e), Type::Void) => {
                    return Err(Diagnostic::error(
                        e.pos,
                        "void function should not return a value",
                    ));
                }
                (Some(e), ret) => {
                    self.value(e)?;
                    self.assign_to(e, ret)?;
                }
            },
            Stmt::Empty => {}
        }
        Ok(())
    }

    fn scoped(&mut self, stmt: &mut Stmt) -> CResult<()> {
        self.push_scope();
        let result = self.stmt(stmt);
        self.pop_scope();
        result
    }

    fn loop_body(&mut self, body: &mut Stmt) -> CResult<()> {
        self.loop_depth += 1;
        let result = self.scoped(body);
        self.loop_depth -= 1;
        result
    }

    fn decl(&mut self, decl: &mut VarDecl) -> CResult<()> {
        resolve_array_len(decl)?;
        match (decl.space, decl.ty) {
            (AddressSpace::Local, Type::Array { elem, len, .. }) => {
                if !self.is_kernel {
                    return Err(Diagnostic::error(
                        decl.pos,
                        format!(
                            "__local variable '{}' can only be declared in a kernel",
                            decl.name
                        ),
                    ));
                }
                if decl.init.is_some() {
                    return Err(Diagnostic::error(
                        decl.pos,
                        format!("__local variable '{}' cannot be initialized", decl.name),
                    ));
                }
                decl.local_slot = Some(self.local_arrays.len());
                self.local_arrays.push(LocalArray { elem, len });
            }
            (AddressSpace::Local, _) => {
                return Err(Diagnostic::error(
                    decl.pos,
                    "__local scalar variables are not supported; declare a one-element array",
                ));
            }
            (AddressSpace::Global, _) => {
                return Err(Diagnostic::error(
                    decl.pos,
                    format!("variable '{}' cannot be declared in __global memory", decl.name),
                ));
            }
            (AddressSpace::Constant, _) => {
                return Err(Diagnostic::error(
                    decl.pos,
                    format!(
                        "__constant variable '{}' must be declared at program scope",
                        decl.name
                    ),
                ));
            }
            (AddressSpace::Private, _) => {}
        }

        match (&mut decl.init, decl.ty) {
            (None, _) => {}
            (Some(Init::Expr(e)), Type::Scalar(_) | Type::Pointer(_)) => {
                self.value(e)?;
                self.assign_to(e, decl.ty)?;
            }
            (Some(Init::List(items)), Type::Array { elem, len, .. }) => {
                if items.len() > len {
                    return Err(Diagnostic::error(
                        decl.pos,
                        format!("excess elements in initializer of '{}'", decl.name),
                    ));
                }
                for item in items.iter_mut() {
                    self.value(item)?;
                    self.assign_to(item, Type::Scalar(elem))?;
                }
            }
            _ => {
                return Err(Diagnostic::error(
                    decl.pos,
                    format!("invalid initializer for '{}'", decl.name),
                ));
            }
        }

        self.declare(
            &decl.name,
            Symbol {
                ty: decl.ty,
                is_const: decl.is_const,
                used: false,
                is_param: false,
                pos: decl.pos,
            },
        )
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    /// Check an expression used as a value; arrays decay to pointers
    fn value(&mut self, e: &mut Expr) -> CResult<()> {
        self.expr(e)?;
        e.ty = e.ty.decay();
        Ok(())
    }

    fn condition(&mut self, e: &mut Expr) -> CResult<()> {
        self.value(e)?;
        match e.ty {
            Type::Scalar(_) | Type::Pointer(_) => Ok(()),
            other => Err(Diagnostic::error(
                e.pos,
                format!("value of type '{}' is not contextually convertible to bool", other),
            )),
        }
    }

    fn scalar_value(&mut self, e: &mut Expr) -> CResult<ScalarType> {
        self.value(e)?;
        e.ty.scalar().ok_or_else(|| {
            Diagnostic::error(
                e.pos,
                format!("invalid operand of type '{}'", e.ty),
            )
        })
    }

    /// Implicitly convert `e` (already checked) to `to` as an assignment would
    fn assign_to(&mut self, e: &mut Expr, to: Type) -> CResult<()> {
        match (e.ty, to) {
            (Type::Scalar(_), Type::Scalar(_)) => {}
            (Type::Pointer(from), Type::Pointer(ptr)) => {
                if from.elem != ptr.elem || from.space != ptr.space {
                    return Err(Diagnostic::error(
                        e.pos,
                        format!("incompatible pointer types converting '{}' to '{}'", e.ty, to),
                    ));
                }
                if from.is_const && !ptr.is_const {
                    return Err(Diagnostic::error(
                        e.pos,
                        format!("converting '{}' to '{}' discards the const qualifier", e.ty, to),
                    ));
                }
            }
            (Type::Scalar(_), Type::Pointer(_)) if is_null_literal(e) => {}
            (from, to) => {
                return Err(Diagnostic::error(
                    e.pos,
                    format!("cannot convert '{}' to '{}'", from, to),
                ));
            }
        }
        convert(e, to);
        Ok(())
    }

    fn check_lvalue(&self, e: &Expr) -> CResult<()> {
        match &e.kind {
            ExprKind::Var(name) => {
                let sym = self
                    .scopes
                    .iter()
                    .rev()
                    .find_map(|s| s.get(name))
                    .or_else(|| self.globals.get(name));
                match sym {
                    Some(sym) if matches!(sym.ty, Type::Array { .. }) => Err(Diagnostic::error(
                        e.pos,
                        format!("array '{}' is not assignable", name),
                    )),
                    Some(sym) if sym.is_const => Err(Diagnostic::error(
                        e.pos,
                        format!("cannot assign to const-qualified variable '{}'", name),
                    )),
                    _ => Ok(()),
                }
            }
            ExprKind::Index(base, _) | ExprKind::Deref(base) => {
                if base.ty.pointer().is_some_and(|p| p.is_const) {
                    return Err(Diagnostic::error(
                        e.pos,
                        format!("cannot assign through a pointer to const ('{}')", base.ty),
                    ));
                }
                Ok(())
            }
            _ => Err(Diagnostic::error(e.pos, "expression is not assignable")),
        }
    }

    fn expr(&mut self, e: &mut Expr) -> CResult<()> {
        let pos = e.pos;
        let ty = match &mut e.kind {
            ExprKind::IntLit(_) => {
                if e.ty.is_void() {
                    Type::INT
                } else {
                    e.ty
                }
            }
            ExprKind::FloatLit(_) => {
                if self.single_precision_constant || e.ty.is_void() {
                    Type::FLOAT
                } else {
                    e.ty
                }
            }
            ExprKind::Var(name) => match self.lookup(name) {
                Some(sym) => sym.ty,
                None => match builtins::constant(name) {
                    Some(c) => {
                        *e = constant_expr(c, pos);
                        return Ok(());
                    }
                    None => {
                        return Err(Diagnostic::error(
                            pos,
                            format!("use of undeclared identifier '{}'", name),
                        ));
                    }
                },
            },
            ExprKind::Unary(op, inner) => {
                let op = *op;
                if op == UnaryOp::Not {
                    self.condition(inner)?;
                    Type::INT
                } else {
                    let s = self.scalar_value(inner)?;
                    if op == UnaryOp::BitNot && s.is_float() {
                        return Err(Diagnostic::error(
                            pos,
                            format!("invalid argument type '{}' to unary '~'", s),
                        ));
                    }
                    let result = Type::Scalar(builtins::promote(s));
                    convert(inner, result);
                    result
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let op = *op;
                self.value(lhs)?;
                self.value(rhs)?;
                self.binary(op, lhs, rhs, pos)?
            }
            ExprKind::Assign(op, target, value) => {
                let op = *op;
                self.expr(target)?;
                self.check_lvalue(target)?;
                self.value(value)?;
                let target_ty = target.ty;
                match op {
                    None => self.assign_to(value, target_ty)?,
                    Some(op) => self.compound(op, target_ty, value, pos)?,
                }
                target_ty
            }
            ExprKind::IncDec { target, .. } => {
                self.expr(target)?;
                self.check_lvalue(target)?;
                match target.ty {
                    Type::Scalar(_) | Type::Pointer(_) => target.ty,
                    other => {
                        return Err(Diagnostic::error(
                            pos,
                            format!("cannot increment value of type '{}'", other),
                        ));
                    }
                }
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                self.condition(cond)?;
                self.value(then)?;
                self.value(otherwise)?;
                match (then.ty, otherwise.ty) {
                    (Type::Scalar(a), Type::Scalar(b)) => {
                        let common = Type::Scalar(builtins::arithmetic_type(a, b));
                        convert(then, common);
                        convert(otherwise, common);
                        common
                    }
                    (Type::Pointer(_), Type::Pointer(_)) if then.ty == otherwise.ty => then.ty,
                    (Type::Pointer(_), Type::Scalar(_)) if is_null_literal(otherwise) => {
                        convert(otherwise, then.ty);
                        then.ty
                    }
                    (Type::Void, Type::Void) => Type::Void,
                    (a, b) => {
                        return Err(Diagnostic::error(
                            pos,
                            format!("incompatible operand types ('{}' and '{}')", a, b),
                        ));
                    }
                }
            }
            ExprKind::Cast(to, inner) => {
                let to = *to;
                self.value(inner)?;
                match (inner.ty, to) {
                    (_, Type::Void) | (Type::Scalar(_), Type::Scalar(_)) => {}
                    (Type::Pointer(from), Type::Pointer(ptr)) if from.space == ptr.space => {}
                    (Type::Scalar(_), Type::Pointer(_)) if is_null_literal(inner) => {}
                    (from, to) => {
                        return Err(Diagnostic::error(
                            pos,
                            format!("cannot cast '{}' to '{}'", from, to),
                        ));
                    }
                }
                to
            }
            ExprKind::Index(base, index) => {
                self.value(base)?;
                let ptr = base.ty.pointer().ok_or_else(|| {
                    Diagnostic::error(
                        pos,
                        format!("subscripted value of type '{}' is not an array or pointer", base.ty),
                    )
                })?;
                let s = self.scalar_value(index)?;
                if s.is_float() {
                    return Err(Diagnostic::error(index.pos, "array subscript is not an integer"));
                }
                convert(index, Type::Scalar(ScalarType::Long));
                Type::Scalar(ptr.elem)
            }
            ExprKind::Deref(inner) => {
                self.value(inner)?;
                let ptr = inner.ty.pointer().ok_or_else(|| {
                    Diagnostic::error(
                        pos,
                        format!("indirection requires a pointer operand ('{}' invalid)", inner.ty),
                    )
                })?;
                Type::Scalar(ptr.elem)
            }
            ExprKind::AddrOf(inner) => {
                self.expr(inner)?;
                match &inner.kind {
                    ExprKind::Index(base, _) | ExprKind::Deref(base) => {
                        Type::Pointer(base.ty.pointer().ok_or_else(|| {
                            Diagnostic::error(pos, "cannot take the address of this expression")
                        })?)
                    }
                    ExprKind::Var(name) => {
                        return Err(Diagnostic::error(
                            pos,
                            format!(
                                "taking the address of variable '{}' is not supported; use an array element",
                                name
                            ),
                        ));
                    }
                    _ => {
                        return Err(Diagnostic::error(
                            pos,
                            "cannot take the address of an rvalue",
                        ));
                    }
                }
            }
            ExprKind::Call { name, args, target } => {
                for arg in args.iter_mut() {
                    self.value(arg)?;
                }
                let name = name.clone();
                let (bound, ret) = self.call(&name, args, pos)?;
                *target = bound;
                ret
            }
            ExprKind::SizeOf(ty) => {
                let size = self.size_of(*ty, pos)?;
                *e = Expr::typed(ExprKind::IntLit(size as u64), Type::SIZE, pos);
                return Ok(());
            }
            ExprKind::SizeOfExpr(inner) => {
                self.expr(inner)?;
                let size = self.size_of(inner.ty, pos)?;
                *e = Expr::typed(ExprKind::IntLit(size as u64), Type::SIZE, pos);
                return Ok(());
            }
        };
        e.ty = ty;
        Ok(())
    }

    fn size_of(&self, ty: Type, pos: Pos) -> CResult<usize> {
        match ty {
            Type::Void => Err(Diagnostic::error(
                pos,
                "invalid application of 'sizeof' to type 'void'",
            )),
            Type::Scalar(s) => Ok(s.size()),
            Type::Pointer(_) => Ok(std::mem::size_of::<u64>()),
            Type::Array { elem, len, .. } => Ok(elem.size() * len),
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &mut Expr, rhs: &mut Expr, pos: Pos) -> CResult<Type> {
        if op.is_logical() {
            for side in [&*lhs, &*rhs] {
                if !matches!(side.ty, Type::Scalar(_) | Type::Pointer(_)) {
                    return Err(Diagnostic::error(
                        side.pos,
                        format!("invalid operand of type '{}' to '{}'", side.ty, op.symbol()),
                    ));
                }
            }
            return Ok(Type::INT);
        }

        match (lhs.ty, rhs.ty) {
            (Type::Scalar(a), Type::Scalar(b)) => {
                if op.is_integer_only() && (a.is_float() || b.is_float()) {
                    return Err(Diagnostic::error(
                        pos,
                        format!(
                            "invalid operands to binary '{}' ('{}' and '{}')",
                            op.symbol(),
                            a,
                            b
                        ),
                    ));
                }
                let common = if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
                    builtins::promote(a)
                } else {
                    builtins::arithmetic_type(a, b)
                };
                convert(lhs, Type::Scalar(common));
                convert(rhs, Type::Scalar(common));
                Ok(if op.is_comparison() {
                    Type::INT
                } else {
                    Type::Scalar(common)
                })
            }
            (Type::Pointer(_), Type::Scalar(s)) | (Type::Scalar(s), Type::Pointer(_))
                if matches!(op, BinaryOp::Add | BinaryOp::Sub) && s.is_integer() =>
            {
                if lhs.ty.scalar().is_some() {
                    if op == BinaryOp::Sub {
                        return Err(Diagnostic::error(
                            pos,
                            "cannot subtract a pointer from an integer",
                        ));
                    }
                    mem::swap(lhs, rhs);
                }
                convert(rhs, Type::Scalar(ScalarType::Long));
                Ok(lhs.ty)
            }
            (Type::Pointer(a), Type::Pointer(b)) => {
                if a.elem != b.elem || a.space != b.space {
                    return Err(Diagnostic::error(
                        pos,
                        format!("comparison of distinct pointer types ('{}' and '{}')", lhs.ty, rhs.ty),
                    ));
                }
                match op {
                    BinaryOp::Sub => Ok(Type::Scalar(ScalarType::Long)),
                    op if op.is_comparison() => Ok(Type::INT),
                    _ => Err(Diagnostic::error(
                        pos,
                        format!("invalid operands to binary '{}' (pointers)", op.symbol()),
                    )),
                }
            }
            (Type::Pointer(_), Type::Scalar(_))
                if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && is_null_literal(rhs) =>
            {
                convert(rhs, lhs.ty);
                Ok(Type::INT)
            }
            (a, b) => Err(Diagnostic::error(
                pos,
                format!(
                    "invalid operands to binary '{}' ('{}' and '{}')",
                    op.symbol(),
                    a,
                    b
                ),
            )),
        }
    }

    /// `target op= value`: the value is converted to the operation type
    fn compound(&mut self, op: BinaryOp, target: Type, value: &mut Expr, pos: Pos) -> CResult<()> {
        match (target, value.ty) {
            (Type::Pointer(_), Type::Scalar(s))
                if matches!(op, BinaryOp::Add | BinaryOp::Sub) && s.is_integer() =>
            {
                convert(value, Type::Scalar(ScalarType::Long));
                Ok(())
            }
            (Type::Scalar(a), Type::Scalar(b)) => {
                if op.is_integer_only() && (a.is_float() || b.is_float()) {
                    return Err(Diagnostic::error(
                        pos,
                        format!("invalid operands to '{}=' ('{}' and '{}')", op.symbol(), a, b),
                    ));
                }
                let common = if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
                    builtins::promote(a)
                } else {
                    builtins::arithmetic_type(a, b)
                };
                convert(value, Type::Scalar(common));
                Ok(())
            }
            (a, b) => Err(Diagnostic::error(
                pos,
                format!("invalid operands to '{}=' ('{}' and '{}')", op.symbol(), a, b),
            )),
        }
    }

    fn call(&mut self, name: &str, args: &mut [Expr], pos: Pos) -> CResult<(CallTarget, Type)> {
        let sigs = self.sigs;
        if let Some(sig) = sigs.get(name) {
            if sig.is_kernel {
                return Err(Diagnostic::error(
                    pos,
                    format!("calling kernel '{}' from device code is not supported", name),
                ));
            }
            let def = sig.def.ok_or_else(|| {
                Diagnostic::error(pos, format!("function '{}' is declared but never defined", name))
            })?;
            if args.len() != sig.params.len() {
                return Err(Diagnostic::error(
                    pos,
                    format!(
                        "'{}' expects {} argument(s), got {}",
                        name,
                        sig.params.len(),
                        args.len()
                    ),
                ));
            }
            for (arg, param) in args.iter_mut().zip(&sig.params) {
                self.assign_to(arg, *param)?;
            }
            self.calls.insert(def);
            return Ok((CallTarget::User(def), sig.ret));
        }

        let types: Vec<Type> = args.iter().map(|a| a.ty).collect();
        let sig = match builtins::resolve(name, &types) {
            None => {
                return Err(Diagnostic::error(
                    pos,
                    format!("implicit declaration of function '{}' is invalid in OpenCL", name),
                ));
            }
            Some(Err(message)) => return Err(Diagnostic::error(pos, message)),
            Some(Ok(sig)) => sig,
        };
        for (arg, param) in args.iter_mut().zip(&sig.params) {
            convert(arg, *param);
        }
        if sig.builtin == Builtin::Barrier {
            self.uses_barrier = true;
        }
        Ok((CallTarget::Builtin(sig.builtin), sig.ret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Severity, parser};

    fn checked(src: &str) -> (Module, Vec<Diagnostic>) {
        let mut module = parser::parse(src).unwrap_or_else(|d| panic!("{}", d));
        let diags = check(&mut module, &BuildOptions::default());
        (module, diags)
    }

    fn errors(src: &str) -> Vec<String> {
        checked(src)
            .1
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.message)
            .collect()
    }

    fn assert_error(src: &str, needle: &str) {
        let errs = errors(src);
        assert!(
            errs.iter().any(|e| e.contains(needle)),
            "expected an error containing {:?}, got {:?}",
            needle,
            errs
        );
    }

    #[test]
    fn test_vector_add_checks_cleanly() {
        let (module, diags) = checked(
            "__kernel void add(__global const float* a, __global const float* b, __global float* c) {\n\
                 size_t i = get_global_id(0);\n\
                 c[i] = a[i] + b[i];\n\
             }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        assert!(!module.functions[0].uses_barrier);
    }

    #[test]
    fn test_implicit_conversions_become_casts() {
        let (module, _) = checked("void f(float x, int n) { float y = x * n; }");
        let body = module.functions[0].body.as_ref().unwrap();
        let Stmt::Decl(decls) = &body[0] else { panic!() };
        let Some(Init::Expr(init)) = &decls[0].init else { panic!() };
        let ExprKind::Binary(BinaryOp::Mul, lhs, rhs) = &init.kind else {
            panic!("{:?}", init.kind)
        };
        assert_eq!(lhs.ty, Type::FLOAT);
        assert_eq!(rhs.ty, Type::FLOAT);
        assert!(matches!(rhs.kind, ExprKind::Cast(Type::Scalar(ScalarType::Float), _)));
    }

    #[test]
    fn test_comparison_yields_int() {
        let (module, _) = checked("int f(float a, float b) { return a < b; }");
        let body = module.functions[0].body.as_ref().unwrap();
        let Stmt::Return(Some(e), _) = &body[0] else { panic!() };
        assert_eq!(e.ty, Type::INT);
    }

    #[test]
    fn test_builtin_constants_fold() {
        let (module, diags) =
            checked("__kernel void k(__global float* o) { o[0] = M_PI_F; barrier(CLK_LOCAL_MEM_FENCE); }");
        assert!(diags.is_empty(), "{:?}", diags);
        assert!(module.functions[0].uses_barrier);
    }

    #[test]
    fn test_barrier_use_is_transitive() {
        let (module, diags) = checked(
            "void sync() { barrier(CLK_LOCAL_MEM_FENCE); }\n\
             void helper() { sync(); }\n\
             __kernel void k() { helper(); }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        assert!(module.functions.iter().all(|f| f.uses_barrier));
    }

    #[test]
    fn test_local_arrays_get_slots() {
        let (module, diags) = checked(
            "__kernel void k(__global float* o) { __local float a[16]; __local int b[4 * 2]; a[0] = 1.0f; b[0] = 1; o[0] = a[0]; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(
            module.functions[0].local_arrays,
            vec![
                LocalArray {
                    elem: ScalarType::Float,
                    len: 16
                },
                LocalArray {
                    elem: ScalarType::Int,
                    len: 8
                }
            ]
        );
    }

    #[test]
    fn test_sizeof_folds() {
        let (module, _) = checked("ulong f() { float a[4]; a[0] = 0.0f; return sizeof(a) + sizeof(double); }");
        let body = module.functions[0].body.as_ref().unwrap();
        let Stmt::Return(Some(e), _) = &body[1] else { panic!() };
        assert_eq!(e.const_int(), Some(24));
    }

    #[test]
    fn test_unused_variable_warns() {
        let (_, diags) = checked("void f() { int unused = 1; }");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert!(diags[0].message.contains("unused variable 'unused'"));
    }

    #[test]
    fn test_program_scope_constant() {
        let (module, diags) = checked(
            "__constant float weights[3] = {1, -2.5f, 3.0};\n\
             __kernel void k(__global float* o) { o[0] = weights[1]; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        let Some(Init::List(items)) = &module.globals[0].decl.init else { panic!() };
        assert_eq!(items[0].kind, ExprKind::FloatLit(1.0));
        assert_eq!(items[1].kind, ExprKind::FloatLit(-2.5));
        assert!(items.iter().all(|i| i.ty == Type::FLOAT));
    }

    #[test]
    fn test_pointer_arithmetic() {
        let (module, diags) = checked(
            "long f(__global float* p) { __global float* q = 2 + p; q++; return q - p; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        let body = module.functions[0].body.as_ref().unwrap();
        let Stmt::Decl(decls) = &body[0] else { panic!() };
        let Some(Init::Expr(init)) = &decls[0].init else { panic!() };
        let ExprKind::Binary(BinaryOp::Add, lhs, rhs) = &init.kind else { panic!() };
        assert!(lhs.ty.is_pointer_like());
        assert_eq!(rhs.ty, Type::Scalar(ScalarType::Long));
    }

    #[test]
    fn test_kernel_rules() {
        assert_error("__kernel int k() { return 0; }", "must return void");
        assert_error("__kernel void k(float* p) {}", "must point to __global");
        assert_error("__kernel void k(bool b) {}", "cannot be of type 'bool'");
    }

    #[test]
    fn test_semantic_errors() {
        assert_error("void f() { x = 1; }", "undeclared identifier 'x'");
        assert_error("void f() { break; }", "not in loop statement");
        assert_error("void f(__global const float* p) { p[0] = 1.0f; }", "pointer to const");
        assert_error("void f() { const int c = 1; c = 2; }", "const-qualified variable 'c'");
        assert_error("int f() { return; }", "should return a value");
        assert_error("void f() { return 1; }", "should not return a value");
        assert_error("void f() { undefined_fn(1); }", "implicit declaration");
        assert_error("void f() { int a; int a; a = 0; }", "redefinition of 'a'");
        assert_error("void f() { __local float t[4]; }", "only be declared in a kernel");
        assert_error("__kernel void k() { __local int n; }", "__local scalar");
        assert_error("void f() { int x = 0; int* p = &x; }", "taking the address of variable 'x'");
        assert_error("void f() { float a = 1.0f % 2.0f; }", "invalid operands");
        assert_error("void f(int n) { int a[n]; }", "positive integer constant");
        assert_error("float sqrt(float x) { return x; }", "built-in function 'sqrt'");
        assert_error("__global int counter;", "__constant address space");
    }

    #[test]
    fn test_recursion_rejected() {
        assert_error(
            "int fact(int n) { return n <= 1 ? 1 : n * fact(n - 1); }",
            "recursive call to 'fact'",
        );
    }

    #[test]
    fn test_prototype_then_definition() {
        let (module, diags) = checked(
            "float twice(float x);\n__kernel void k(__global float* o) { o[0] = twice(o[0]); }\nfloat twice(float x) { return 2.0f * x; }",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        let body = module.functions[1].body.as_ref().unwrap();
        let Stmt::Expr(Expr { kind: ExprKind::Assign(_, _, value), .. }) = &body[0] else {
            panic!()
        };
        assert!(matches!(
            value.kind,
            ExprKind::Call {
                target: CallTarget::User(2),
                ..
            }
        ));
    }

    #[test]
    fn test_atomic_requires_global_or_local_int() {
        let (_, diags) = checked("__kernel void k(__global int* c) { atomic_inc(&c[0]); atomic_add(c, 2); }");
        assert!(diags.is_empty(), "{:?}", diags);
        assert_error(
            "__kernel void k(__global float* c) { atomic_add(c, 1.0f); }",
            "not supported on 'float'",
        );
    }
}
