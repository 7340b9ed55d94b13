//! Tree-walking interpreter for checked kernel modules
//!
//! One [`Invocation`] runs one work-item. Values carry their scalar type, so
//! integer arithmetic wraps at the width of the type and `float` results are
//! rounded to single precision after every operation.

use std::cmp::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::barrier::GroupBarrier;
use super::memory::{Fault, Memory};
use crate::backend::traits::{BackendError, DispatchGrid};
use crate::compiler::ast::*;
use crate::compiler::builtins::{AtomicOp, Builtin, IntFn, RelationalFn, WorkItemFn};

/// Typed pointer into a memory allocation
#[derive(Debug, Clone)]
pub(crate) struct Pointer {
    pub mem: Arc<Memory>,
    /// Byte offset
    pub offset: isize,
    pub elem: ScalarType,
}

impl Pointer {
    pub fn new(mem: Arc<Memory>, elem: ScalarType) -> Self {
        Self {
            mem,
            offset: 0,
            elem,
        }
    }

    fn add(&self, n: i64) -> Pointer {
        let step = (n as isize).wrapping_mul(self.elem.size() as isize);
        Pointer {
            mem: self.mem.clone(),
            offset: self.offset.wrapping_add(step),
            elem: self.elem,
        }
    }

    fn load(&self) -> Result<Value, Fault> {
        let elem = self.elem;
        self.mem
            .access(self.offset, elem.size(), |bytes| from_bits(read_bits(bytes), elem))
    }

    fn store(&self, value: &Value) -> Result<(), Fault> {
        let bits = to_bits(value, self.elem);
        self.mem
            .access(self.offset, self.elem.size(), |bytes| write_bits(bytes, bits))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    /// Bits normalised to the type: sign-extended when signed, zero-extended otherwise
    Int(u64, ScalarType),
    Float(f64, ScalarType),
    Ptr(Pointer),
    Null,
    Void,
}

fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

fn width(ty: ScalarType) -> u32 {
    (ty.size() * 8) as u32
}

fn normalize(bits: u64, ty: ScalarType) -> u64 {
    if ty == ScalarType::Bool {
        return (bits != 0) as u64;
    }
    let w = width(ty);
    if w == 64 {
        return bits;
    }
    let m = mask(w);
    let v = bits & m;
    if ty.is_signed() && (v >> (w - 1)) & 1 == 1 {
        v | !m
    } else {
        v
    }
}

impl Value {
    pub fn int(bits: u64, ty: ScalarType) -> Self {
        Value::Int(normalize(bits, ty), ty)
    }

    pub fn float(v: f64, ty: ScalarType) -> Self {
        match ty {
            ScalarType::Float => Value::Float(v as f32 as f64, ty),
            _ => Value::Float(v, ty),
        }
    }

    fn bool(b: bool) -> Self {
        Value::Int(b as u64, ScalarType::Int)
    }

    /// Default value of a variable of type `ty`
    pub fn zero(ty: Type) -> Self {
        match ty {
            Type::Scalar(s) if s.is_float() => Value::Float(0.0, s),
            Type::Scalar(s) => Value::Int(0, s),
            Type::Pointer(_) => Value::Null,
            Type::Void | Type::Array { .. } => Value::Void,
        }
    }

    fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::Int(_, ty) | Value::Float(_, ty) => Some(*ty),
            _ => None,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Int(b, _) => *b != 0,
            Value::Float(f, _) => *f != 0.0,
            Value::Ptr(_) => true,
            Value::Null | Value::Void => false,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Value::Int(b, ty) => int_to_f64(*b, *ty),
            Value::Float(f, _) => *f,
            _ => 0.0,
        }
    }

    fn as_i64(&self) -> i64 {
        match self {
            Value::Int(b, _) => *b as i64,
            Value::Float(f, _) => *f as i64,
            _ => 0,
        }
    }

    /// Signed or unsigned reading of an integer, widened
    fn wide(&self) -> i128 {
        match self {
            Value::Int(b, ty) if ty.is_signed() => *b as i64 as i128,
            Value::Int(b, _) => *b as i128,
            Value::Float(f, _) => *f as i128,
            _ => 0,
        }
    }
}

fn int_to_f64(bits: u64, ty: ScalarType) -> f64 {
    if ty.is_signed() {
        bits as i64 as f64
    } else {
        bits as f64
    }
}

fn float_to_int(f: f64, ty: ScalarType) -> Value {
    if ty == ScalarType::Bool {
        return Value::Int((f != 0.0) as u64, ty);
    }
    let bits = if ty.is_signed() {
        f as i64 as u64
    } else {
        f as u64
    };
    Value::int(bits, ty)
}

/// Raw bit pattern of `value` stored as `ty`
fn to_bits(value: &Value, ty: ScalarType) -> u64 {
    match ty {
        ScalarType::Float => (value.as_f64() as f32).to_bits() as u64,
        ScalarType::Double => value.as_f64().to_bits(),
        _ => match value {
            Value::Int(b, _) => *b,
            Value::Float(f, _) => match float_to_int(*f, ty) {
                Value::Int(b, _) => b,
                _ => 0,
            },
            _ => 0,
        },
    }
}

fn from_bits(bits: u64, ty: ScalarType) -> Value {
    match ty {
        ScalarType::Float => Value::Float(f32::from_bits(bits as u32) as f64, ty),
        ScalarType::Double => Value::Float(f64::from_bits(bits), ty),
        _ => Value::int(bits, ty),
    }
}

pub(crate) fn read_bits(bytes: &[u8]) -> u64 {
    match *bytes {
        [a] => a as u64,
        [a, b] => u16::from_ne_bytes([a, b]) as u64,
        [a, b, c, d] => u32::from_ne_bytes([a, b, c, d]) as u64,
        [a, b, c, d, e, f, g, h] => u64::from_ne_bytes([a, b, c, d, e, f, g, h]),
        _ => 0,
    }
}

fn write_bits(bytes: &mut [u8], bits: u64) {
    match bytes.len() {
        1 => bytes.copy_from_slice(&(bits as u8).to_ne_bytes()),
        2 => bytes.copy_from_slice(&(bits as u16).to_ne_bytes()),
        4 => bytes.copy_from_slice(&(bits as u32).to_ne_bytes()),
        8 => bytes.copy_from_slice(&bits.to_ne_bytes()),
        _ => {}
    }
}

/// Decode a scalar kernel argument
pub(crate) fn scalar_arg(bytes: &[u8], ty: ScalarType) -> Option<Value> {
    (bytes.len() == ty.size()).then(|| from_bits(read_bits(bytes), ty))
}

fn cast(value: Value, to: Type) -> Result<Value, Fault> {
    Ok(match (to, value) {
        (Type::Void, _) => Value::Void,
        (Type::Scalar(ty), Value::Int(b, from)) if ty.is_float() => {
            Value::float(int_to_f64(b, from), ty)
        }
        (Type::Scalar(ty), Value::Int(b, _)) => Value::int(b, ty),
        (Type::Scalar(ty), Value::Float(f, _)) if ty.is_float() => Value::float(f, ty),
        (Type::Scalar(ty), Value::Float(f, _)) => float_to_int(f, ty),
        (Type::Pointer(p), Value::Ptr(ptr)) => Value::Ptr(Pointer {
            elem: p.elem,
            ..ptr
        }),
        (Type::Pointer(_), Value::Int(..) | Value::Null) => Value::Null,
        (to, value) => {
            return Err(Fault(format!("invalid conversion of {:?} to '{}'", value, to)));
        }
    })
}

fn int_range(ty: ScalarType) -> (i128, i128) {
    if ty == ScalarType::Bool {
        return (0, 1);
    }
    let w = width(ty);
    if ty.is_signed() {
        (-(1i128 << (w - 1)), (1i128 << (w - 1)) - 1)
    } else {
        (0, (1i128 << w) - 1)
    }
}

fn saturate(value: Value, to: ScalarType) -> Result<Value, Fault> {
    if to.is_float() {
        return cast(value, Type::Scalar(to));
    }
    let (min, max) = int_range(to);
    let wide = match value {
        Value::Float(f, _) if f.is_nan() => 0,
        Value::Float(f, _) => f.clamp(min as f64, max as f64) as i128,
        ref other => other.wide(),
    };
    Ok(Value::int(wide.clamp(min, max) as u64, to))
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, Fault> {
    Ok(match (op, value) {
        (UnaryOp::Not, v) => Value::bool(!v.truthy()),
        (UnaryOp::Plus, v) => v,
        (UnaryOp::Neg, Value::Int(b, ty)) => Value::int(b.wrapping_neg(), ty),
        (UnaryOp::Neg, Value::Float(f, ty)) => Value::float(-f, ty),
        (UnaryOp::BitNot, Value::Int(b, ty)) => Value::int(!b, ty),
        (op, v) => return Err(Fault(format!("invalid operand {:?} to {:?}", v, op))),
    })
}

fn compare(op: BinaryOp, ord: Option<Ordering>) -> Value {
    let result = match ord {
        None => op == BinaryOp::Ne,
        Some(ord) => match op {
            BinaryOp::Lt => ord.is_lt(),
            BinaryOp::Le => ord.is_le(),
            BinaryOp::Gt => ord.is_gt(),
            BinaryOp::Ge => ord.is_ge(),
            BinaryOp::Eq => ord.is_eq(),
            _ => ord.is_ne(),
        },
    };
    Value::bool(result)
}

fn int_binary(op: BinaryOp, x: u64, y: u64, ty: ScalarType) -> Value {
    let signed = ty.is_signed();
    let shift = (y as u32) & (width(ty) - 1);
    let bits = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div | BinaryOp::Rem if y == 0 => 0,
        BinaryOp::Div if signed => (x as i64).wrapping_div(y as i64) as u64,
        BinaryOp::Div => x / y,
        BinaryOp::Rem if signed => (x as i64).wrapping_rem(y as i64) as u64,
        BinaryOp::Rem => x % y,
        BinaryOp::Shl => x.wrapping_shl(shift),
        BinaryOp::Shr if signed => ((x as i64) >> shift) as u64,
        BinaryOp::Shr => x >> shift,
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
        _ => {
            let ord = if signed {
                (x as i64).cmp(&(y as i64))
            } else {
                x.cmp(&y)
            };
            return compare(op, Some(ord));
        }
    };
    Value::int(bits, ty)
}

fn float_binary(op: BinaryOp, x: f64, y: f64, ty: ScalarType) -> Value {
    let v = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => return compare(op, x.partial_cmp(&y)),
    };
    Value::float(v, ty)
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, Fault> {
    Ok(match (lhs, rhs) {
        (Value::Int(x, ty), Value::Int(y, _)) => int_binary(op, x, y, ty),
        (Value::Float(x, ty), Value::Float(y, _)) => float_binary(op, x, y, ty),
        (Value::Ptr(p), Value::Int(n, _)) if op == BinaryOp::Add => Value::Ptr(p.add(n as i64)),
        (Value::Ptr(p), Value::Int(n, _)) if op == BinaryOp::Sub => {
            Value::Ptr(p.add((n as i64).wrapping_neg()))
        }
        (Value::Ptr(p), Value::Ptr(q)) if op == BinaryOp::Sub => {
            let diff = (p.offset - q.offset) / p.elem.size() as isize;
            Value::Int(diff as i64 as u64, ScalarType::Long)
        }
        (Value::Ptr(p), Value::Ptr(q)) => {
            let ord = Arc::ptr_eq(&p.mem, &q.mem).then(|| p.offset.cmp(&q.offset));
            compare(op, ord)
        }
        (Value::Null, Value::Null) => compare(op, Some(Ordering::Equal)),
        (Value::Ptr(_), Value::Null) | (Value::Null, Value::Ptr(_)) => compare(op, None),
        (lhs, rhs) => {
            return Err(Fault(format!(
                "invalid operands to '{}': {:?} and {:?}",
                op.symbol(),
                lhs,
                rhs
            )));
        }
    })
}

fn int_function(func: IntFn, args: &[Value], ret: ScalarType) -> Value {
    let ty = args
        .first()
        .and_then(Value::scalar_type)
        .unwrap_or(ScalarType::Int);
    let w = width(ty);
    let arg = |i: usize| args.get(i).map(Value::wide).unwrap_or(0);
    let pick = |i: usize| args.get(i).cloned().unwrap_or(Value::Int(0, ty));
    match func {
        IntFn::Abs => Value::int(arg(0).unsigned_abs() as u64, ret),
        IntFn::Min => {
            if arg(1) < arg(0) {
                pick(1)
            } else {
                pick(0)
            }
        }
        IntFn::Max => {
            if arg(1) > arg(0) {
                pick(1)
            } else {
                pick(0)
            }
        }
        IntFn::Clamp => Value::int(arg(0).max(arg(1)).min(arg(2)) as u64, ty),
        IntFn::Mul24 => Value::int(arg(0).wrapping_mul(arg(1)) as u64, ty),
        IntFn::Mad24 => Value::int(arg(0).wrapping_mul(arg(1)).wrapping_add(arg(2)) as u64, ty),
        IntFn::MulHi => {
            let high = if ty.is_signed() {
                ((arg(0) * arg(1)) >> w) as u64
            } else {
                ((arg(0) as u128 * arg(1) as u128) >> w) as u64
            };
            Value::int(high, ty)
        }
        IntFn::Popcount => Value::int(((arg(0) as u64) & mask(w)).count_ones() as u64, ty),
        IntFn::Clz => {
            let v = (arg(0) as u64) & mask(w);
            Value::int((v.leading_zeros() - (64 - w)) as u64, ty)
        }
        IntFn::Rotate => {
            let v = (arg(0) as u64) & mask(w);
            let n = arg(1).rem_euclid(w as i128) as u32;
            let rotated = if n == 0 {
                v
            } else {
                (v << n | v >> (w - n)) & mask(w)
            };
            Value::int(rotated, ty)
        }
    }
}

/// New value stored by an atomic operation, `None` when memory is unchanged
fn atomic_update(op: AtomicOp, old: &Value, operands: &[Value]) -> Option<Value> {
    let (Value::Int(x, ty), operand) = (old, operands.first()) else {
        // float atomics only exist for xchg
        return operands.first().cloned();
    };
    let (x, ty) = (*x, *ty);
    let y = operand.map(|v| to_bits(v, ty)).unwrap_or(0);
    let signed = ty.is_signed();
    Some(match op {
        AtomicOp::Add => Value::int(x.wrapping_add(y), ty),
        AtomicOp::Sub => Value::int(x.wrapping_sub(y), ty),
        AtomicOp::Xchg => Value::int(y, ty),
        AtomicOp::Inc => Value::int(x.wrapping_add(1), ty),
        AtomicOp::Dec => Value::int(x.wrapping_sub(1), ty),
        AtomicOp::CmpXchg => {
            if x != y {
                return None;
            }
            Value::int(operands.get(1).map(|v| to_bits(v, ty)).unwrap_or(0), ty)
        }
        AtomicOp::Min if signed => Value::int((x as i64).min(y as i64) as u64, ty),
        AtomicOp::Min => Value::int(x.min(y), ty),
        AtomicOp::Max if signed => Value::int((x as i64).max(y as i64) as u64, ty),
        AtomicOp::Max => Value::int(x.max(y), ty),
        AtomicOp::And => Value::int(x & y, ty),
        AtomicOp::Or => Value::int(x | y, ty),
        AtomicOp::Xor => Value::int(x ^ y, ty),
    })
}

/// Materialise the program-scope `__constant` variables of `module`
pub(crate) fn program_constants(module: &Module) -> Result<FxHashMap<String, Value>, BackendError> {
    let literal = |e: &Expr, ty: ScalarType| match e.kind {
        ExprKind::IntLit(v) => cast(Value::int(v, ty), Type::Scalar(ty)),
        ExprKind::FloatLit(f) => cast(Value::float(f, ScalarType::Double), Type::Scalar(ty)),
        _ => Err(Fault(format!("initializer of type '{}' is not a literal", e.ty))),
    };
    let mut constants = FxHashMap::default();
    for global in &module.globals {
        let decl = &global.decl;
        let value = match (decl.ty, &decl.init) {
            (Type::Scalar(ty), Some(Init::Expr(e))) => literal(e, ty)?,
            (Type::Array { elem, len, .. }, init) => {
                let mem = Arc::new(Memory::zeroed(len * elem.size())?);
                let base = Pointer::new(mem, elem);
                if let Some(Init::List(items)) = init {
                    for (i, item) in items.iter().enumerate() {
                        base.add(i as i64).store(&literal(item, elem)?)?;
                    }
                }
                Value::Ptr(base)
            }
            (ty, _) => Value::zero(ty),
        };
        constants.insert(decl.name.clone(), value);
    }
    Ok(constants)
}

/// Ids of one work-item
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkItem {
    pub global_id: [usize; 3],
    pub local_id: [usize; 3],
    pub group_id: [usize; 3],
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

enum Place {
    /// Index into the current frame
    Var(usize),
    Mem(Pointer),
}

/// Execution state of one work-item
pub(crate) struct Invocation<'a> {
    module: &'a Module,
    constants: &'a FxHashMap<String, Value>,
    grid: &'a DispatchGrid,
    item: WorkItem,
    /// `__local` arrays of the kernel, shared by the work-group
    local_arrays: &'a [Arc<Memory>],
    barrier: Option<&'a GroupBarrier>,
    vars: Vec<(&'a str, Value)>,
}

impl<'a> Invocation<'a> {
    pub fn new(
        module: &'a Module,
        constants: &'a FxHashMap<String, Value>,
        grid: &'a DispatchGrid,
        item: WorkItem,
        local_arrays: &'a [Arc<Memory>],
        barrier: Option<&'a GroupBarrier>,
    ) -> Self {
        Self {
            module,
            constants,
            grid,
            item,
            local_arrays,
            barrier,
            vars: Vec::new(),
        }
    }

    pub fn run(mut self, kernel: &'a Function, args: Vec<Value>) -> Result<(), Fault> {
        self.call(kernel, args).map(|_| ())
    }

    fn call(&mut self, func: &'a Function, args: Vec<Value>) -> Result<Value, Fault> {
        let body = func
            .body
            .as_deref()
            .ok_or_else(|| Fault(format!("function '{}' has no body", func.name)))?;
        let caller = std::mem::take(&mut self.vars);
        self.vars
            .extend(func.params.iter().map(|p| p.name.as_str()).zip(args));
        let flow = self.block(body);
        self.vars = caller;
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::zero(func.ret)),
        }
    }

    fn block(&mut self, stmts: &'a [Stmt]) -> Result<Flow, Fault> {
        let mark = self.vars.len();
        let mut flow = Flow::Normal;
        for stmt in stmts {
            flow = self.stmt(stmt)?;
            if !matches!(flow, Flow::Normal) {
                break;
            }
        }
        self.vars.truncate(mark);
        Ok(flow)
    }

    fn scoped(&mut self, stmt: &'a Stmt) -> Result<Flow, Fault> {
        let mark = self.vars.len();
        let flow = self.stmt(stmt)?;
        self.vars.truncate(mark);
        Ok(flow)
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> Result<Flow, Fault> {
        match stmt {
            Stmt::Decl(decls) => {
                for decl in decls {
                    let value = self.declare(decl)?;
                    self.vars.push((decl.name.as_str(), value));
                }
            }
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
            Stmt::If(cond, then, otherwise) => {
                if self.eval(cond)?.truthy() {
                    return self.scoped(then);
                } else if let Some(otherwise) = otherwise {
                    return self.scoped(otherwise);
                }
            }
            Stmt::While(cond, body) => {
                while self.eval(cond)?.truthy() {
                    match self.scoped(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::DoWhile(body, cond) => loop {
                match self.scoped(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                if !self.eval(cond)?.truthy() {
                    break;
                }
            },
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                let mark = self.vars.len();
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                let flow = self.for_loop(cond.as_ref(), step.as_ref(), body)?;
                self.vars.truncate(mark);
                return Ok(flow);
            }
            Stmt::Block(stmts) => return self.block(stmts),
            Stmt::Break(_) => return Ok(Flow::Break),
            Stmt::Continue(_) => return Ok(Flow::Continue),
            Stmt::Return(value, _) => {
                let value = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::Void,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Empty => {}
        }
        Ok(Flow::Normal)
    }

    fn for_loop(
        &mut self,
        cond: Option<&'a Expr>,
        step: Option<&'a Expr>,
        body: &'a Stmt,
    ) -> Result<Flow, Fault> {
        loop {
            if let Some(cond) = cond {
                if !self.eval(cond)?.truthy() {
                    break;
                }
            }
            match self.scoped(body)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(step) = step {
                self.eval(step)?;
            }
        }
        Ok(Flow::Normal)
    }

    /// Initial value of a declared variable
    fn declare(&mut self, decl: &'a VarDecl) -> Result<Value, Fault> {
        match (decl.ty, decl.local_slot, &decl.init) {
            (Type::Array { elem, .. }, Some(slot), _) => {
                let mem = self.local_arrays.get(slot).ok_or_else(|| {
                    Fault(format!("__local array '{}' has no storage", decl.name))
                })?;
                Ok(Value::Ptr(Pointer::new(mem.clone(), elem)))
            }
            (Type::Array { elem, len, .. }, None, init) => {
                let mem = Memory::zeroed(len * elem.size()).map_err(|e| Fault(e.to_string()))?;
                let base = Pointer::new(Arc::new(mem), elem);
                if let Some(Init::List(items)) = init {
                    for (i, item) in items.iter().enumerate() {
                        let value = self.eval(item)?;
                        base.add(i as i64).store(&value)?;
                    }
                }
                Ok(Value::Ptr(base))
            }
            (_, _, Some(Init::Expr(e))) => self.eval(e),
            (ty, _, _) => Ok(Value::zero(ty)),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, Fault> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
            .or_else(|| self.constants.get(name).cloned())
            .ok_or_else(|| Fault(format!("unknown variable '{}'", name)))
    }

    fn eval(&mut self, e: &'a Expr) -> Result<Value, Fault> {
        match &e.kind {
            ExprKind::IntLit(v) => Ok(Value::int(*v, e.ty.scalar().unwrap_or(ScalarType::Int))),
            ExprKind::FloatLit(f) => {
                Ok(Value::float(*f, e.ty.scalar().unwrap_or(ScalarType::Float)))
            }
            ExprKind::Var(name) => self.lookup(name),
            ExprKind::Unary(op, inner) => {
                let value = self.eval(inner)?;
                unary(*op, value)
            }
            ExprKind::Binary(BinaryOp::LogicalAnd, lhs, rhs) => {
                let result = self.eval(lhs)?.truthy() && self.eval(rhs)?.truthy();
                Ok(Value::bool(result))
            }
            ExprKind::Binary(BinaryOp::LogicalOr, lhs, rhs) => {
                let result = self.eval(lhs)?.truthy() || self.eval(rhs)?.truthy();
                Ok(Value::bool(result))
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs)
            }
            ExprKind::Assign(op, target, value) => self.assign(*op, target, value),
            ExprKind::IncDec {
                increment,
                prefix,
                target,
            } => {
                let place = self.place(target)?;
                let old = self.load(&place)?;
                let new = match &old {
                    Value::Ptr(p) => Value::Ptr(p.add(if *increment { 1 } else { -1 })),
                    Value::Int(b, ty) if *increment => Value::int(b.wrapping_add(1), *ty),
                    Value::Int(b, ty) => Value::int(b.wrapping_sub(1), *ty),
                    Value::Float(f, ty) => {
                        Value::float(if *increment { f + 1.0 } else { f - 1.0 }, *ty)
                    }
                    other => return Err(Fault(format!("cannot increment {:?}", other))),
                };
                self.store(&place, new.clone())?;
                Ok(if *prefix { new } else { old })
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            ExprKind::Cast(to, inner) => {
                let value = self.eval(inner)?;
                cast(value, *to)
            }
            ExprKind::Index(base, index) => self.element(base, index)?.load(),
            ExprKind::Deref(inner) => self.pointer(inner)?.load(),
            ExprKind::AddrOf(inner) => match &inner.kind {
                ExprKind::Index(base, index) => Ok(Value::Ptr(self.element(base, index)?)),
                ExprKind::Deref(p) => self.eval(p),
                _ => Err(Fault("cannot take the address of this expression".into())),
            },
            ExprKind::Call { name, args, target } => match target {
                CallTarget::User(index) => {
                    let module = self.module;
                    let func = module
                        .functions
                        .get(*index)
                        .ok_or_else(|| Fault(format!("unknown function '{}'", name)))?;
                    let values = args
                        .iter()
                        .map(|a| self.eval(a))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.call(func, values)
                }
                CallTarget::Builtin(builtin) => self.builtin(*builtin, args, e.ty),
                CallTarget::Unresolved => Err(Fault(format!("unresolved call to '{}'", name))),
            },
            ExprKind::SizeOf(_) | ExprKind::SizeOfExpr(_) => {
                Err(Fault("sizeof was not folded".into()))
            }
        }
    }

    fn assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &'a Expr,
        value: &'a Expr,
    ) -> Result<Value, Fault> {
        let place = self.place(target)?;
        let result = match op {
            None => self.eval(value)?,
            Some(op) => {
                let rhs = self.eval(value)?;
                let current = self.load(&place)?;
                match rhs.scalar_type() {
                    Some(op_ty) if !matches!(current, Value::Ptr(_)) => {
                        let lhs = cast(current, Type::Scalar(op_ty))?;
                        cast(binary(op, lhs, rhs)?, target.ty)?
                    }
                    _ => binary(op, current, rhs)?,
                }
            }
        };
        self.store(&place, result.clone())?;
        Ok(result)
    }

    fn place(&mut self, e: &'a Expr) -> Result<Place, Fault> {
        match &e.kind {
            ExprKind::Var(name) => self
                .vars
                .iter()
                .rposition(|(n, _)| n == name)
                .map(Place::Var)
                .ok_or_else(|| Fault(format!("'{}' is not assignable", name))),
            ExprKind::Index(base, index) => Ok(Place::Mem(self.element(base, index)?)),
            ExprKind::Deref(inner) => Ok(Place::Mem(self.pointer(inner)?)),
            _ => Err(Fault("expression is not assignable".into())),
        }
    }

    fn load(&self, place: &Place) -> Result<Value, Fault> {
        match place {
            Place::Var(i) => self
                .vars
                .get(*i)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Fault("stale variable reference".into())),
            Place::Mem(p) => p.load(),
        }
    }

    fn store(&mut self, place: &Place, value: Value) -> Result<(), Fault> {
        match place {
            Place::Var(i) => {
                let slot = self
                    .vars
                    .get_mut(*i)
                    .ok_or_else(|| Fault("stale variable reference".into()))?;
                slot.1 = value;
                Ok(())
            }
            Place::Mem(p) => p.store(&value),
        }
    }

    fn pointer(&mut self, e: &'a Expr) -> Result<Pointer, Fault> {
        match self.eval(e)? {
            Value::Ptr(p) => Ok(p),
            Value::Null => Err(Fault("null pointer dereference".into())),
            other => Err(Fault(format!("expected a pointer, found {:?}", other))),
        }
    }

    fn element(&mut self, base: &'a Expr, index: &'a Expr) -> Result<Pointer, Fault> {
        let base = self.pointer(base)?;
        let index = self.eval(index)?.as_i64();
        Ok(base.add(index))
    }

    fn work_item(&self, func: WorkItemFn, dim: usize) -> usize {
        let grid = self.grid;
        if dim >= grid.work_dim as usize || dim >= 3 {
            return match func {
                WorkItemFn::GlobalSize | WorkItemFn::LocalSize | WorkItemFn::NumGroups => 1,
                _ => 0,
            };
        }
        match func {
            WorkItemFn::WorkDim => grid.work_dim as usize,
            WorkItemFn::GlobalId => self.item.global_id[dim],
            WorkItemFn::LocalId => self.item.local_id[dim],
            WorkItemFn::GroupId => self.item.group_id[dim],
            WorkItemFn::GlobalSize => grid.global_size[dim],
            WorkItemFn::LocalSize => grid.local_size[dim],
            WorkItemFn::NumGroups => grid.num_groups()[dim],
            WorkItemFn::GlobalOffset => grid.global_offset[dim],
        }
    }

    fn builtin(&mut self, builtin: Builtin, args: &'a [Expr], ret: Type) -> Result<Value, Fault> {
        if let Builtin::Atomic(op) = builtin {
            return self.atomic(op, args);
        }
        let values = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>, _>>()?;
        let first = values.first().cloned().unwrap_or(Value::Void);
        let ret_scalar = ret.scalar().unwrap_or(ScalarType::Int);
        Ok(match builtin {
            Builtin::WorkItem(WorkItemFn::WorkDim) => {
                Value::Int(self.grid.work_dim as u64, ScalarType::UInt)
            }
            Builtin::WorkItem(func) => {
                let dim = usize::try_from(first.as_i64()).unwrap_or(usize::MAX);
                Value::Int(self.work_item(func, dim) as u64, ScalarType::ULong)
            }
            Builtin::Math(func, _) => {
                let xs: Vec<f64> = values.iter().map(Value::as_f64).collect();
                Value::float(func.eval(&xs), ret_scalar)
            }
            Builtin::Int(func) => int_function(func, &values, ret_scalar),
            Builtin::Relational(RelationalFn::Select) => {
                let pick = if values.get(2).is_some_and(Value::truthy) { 1 } else { 0 };
                values.get(pick).cloned().unwrap_or(Value::Void)
            }
            Builtin::Relational(func) => {
                let x = first.as_f64();
                Value::bool(match func {
                    RelationalFn::IsNan => x.is_nan(),
                    RelationalFn::IsInf => x.is_infinite(),
                    RelationalFn::IsFinite => x.is_finite(),
                    _ => x.is_sign_negative(),
                })
            }
            Builtin::Convert { to, saturate: true } => saturate(first, to)?,
            Builtin::Convert { to, .. } => cast(first, Type::Scalar(to))?,
            Builtin::Reinterpret(to) => {
                let from = first.scalar_type().unwrap_or(to);
                from_bits(to_bits(&first, from), to)
            }
            Builtin::Barrier => {
                if let Some(barrier) = self.barrier {
                    barrier.wait();
                }
                Value::Void
            }
            Builtin::MemFence => {
                std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
                Value::Void
            }
            Builtin::Atomic(_) => Value::Void,
        })
    }

    fn atomic(&mut self, op: AtomicOp, args: &'a [Expr]) -> Result<Value, Fault> {
        let (ptr_arg, operand_args) = args
            .split_first()
            .ok_or_else(|| Fault("atomic operation without a pointer".into()))?;
        let ptr = self.pointer(ptr_arg)?;
        let operands = operand_args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>, _>>()?;
        let elem = ptr.elem;
        ptr.mem.access(ptr.offset, elem.size(), |bytes| {
            let old = from_bits(read_bits(bytes), elem);
            if let Some(new) = atomic_update(op, &old, &operands) {
                write_bits(bytes, to_bits(&new, elem));
            }
            old
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_wrapping() {
        let v = int_binary(BinaryOp::Add, i32::MAX as u64, 1, ScalarType::Int);
        assert!(matches!(v, Value::Int(b, _) if b as i64 == i32::MIN as i64));
        let v = int_binary(BinaryOp::Sub, 0, 1, ScalarType::UChar);
        assert!(matches!(v, Value::Int(255, _)));
    }

    #[test]
    fn test_division_by_zero_yields_zero() {
        assert!(matches!(int_binary(BinaryOp::Div, 7, 0, ScalarType::Int), Value::Int(0, _)));
        assert!(matches!(int_binary(BinaryOp::Rem, 7, 0, ScalarType::UInt), Value::Int(0, _)));
    }

    #[test]
    fn test_signed_shift_and_compare() {
        let minus_eight = normalize(-8i64 as u64, ScalarType::Int);
        let v = int_binary(BinaryOp::Shr, minus_eight, 1, ScalarType::Int);
        assert!(matches!(v, Value::Int(b, _) if b as i64 == -4));
        let v = int_binary(BinaryOp::Lt, minus_eight, 1, ScalarType::Int);
        assert!(matches!(v, Value::Int(1, ScalarType::Int)));
        let v = int_binary(BinaryOp::Lt, u32::MAX as u64, 1, ScalarType::UInt);
        assert!(matches!(v, Value::Int(0, _)));
    }

    #[test]
    fn test_float_rounds_to_single_precision() {
        let v = float_binary(BinaryOp::Div, 1.0, 3.0, ScalarType::Float);
        assert!(matches!(v, Value::Float(f, _) if f == (1.0f32 / 3.0f32) as f64));
    }

    #[test]
    fn test_saturating_conversion() {
        let v = saturate(Value::Float(300.5, ScalarType::Float), ScalarType::UChar).unwrap();
        assert!(matches!(v, Value::Int(255, _)));
        let v = saturate(Value::int(-5i64 as u64, ScalarType::Int), ScalarType::UInt).unwrap();
        assert!(matches!(v, Value::Int(0, _)));
        let v = cast(Value::Float(-1.75, ScalarType::Float), Type::INT).unwrap();
        assert!(matches!(v, Value::Int(b, _) if b as i64 == -1));
    }

    #[test]
    fn test_int_functions() {
        let int = |v: i64| Value::int(v as u64, ScalarType::Int);
        let abs = int_function(IntFn::Abs, &[int(-3)], ScalarType::UInt);
        assert!(matches!(abs, Value::Int(3, ScalarType::UInt)));
        let clz = int_function(IntFn::Clz, &[int(1)], ScalarType::Int);
        assert!(matches!(clz, Value::Int(31, _)));
        let rot = int_function(
            IntFn::Rotate,
            &[Value::int(0x8000_0001, ScalarType::UInt), Value::int(1, ScalarType::UInt)],
            ScalarType::UInt,
        );
        assert!(matches!(rot, Value::Int(3, _)));
        let hi = int_function(
            IntFn::MulHi,
            &[Value::int(u32::MAX as u64, ScalarType::UInt), Value::int(2, ScalarType::UInt)],
            ScalarType::UInt,
        );
        assert!(matches!(hi, Value::Int(1, _)));
    }

    #[test]
    fn test_atomic_cmpxchg_only_swaps_on_match() {
        let old = Value::int(5, ScalarType::Int);
        let swap = [Value::int(5, ScalarType::Int), Value::int(9, ScalarType::Int)];
        assert!(matches!(
            atomic_update(AtomicOp::CmpXchg, &old, &swap),
            Some(Value::Int(9, _))
        ));
        let keep = [Value::int(4, ScalarType::Int), Value::int(9, ScalarType::Int)];
        assert!(atomic_update(AtomicOp::CmpXchg, &old, &keep).is_none());
    }

    #[test]
    fn test_pointer_memory_round_trip() {
        let mem = Arc::new(Memory::zeroed(16).unwrap());
        let p = Pointer::new(mem, ScalarType::Float).add(2);
        p.store(&Value::Float(1.5, ScalarType::Float)).unwrap();
        assert!(matches!(p.load().unwrap(), Value::Float(f, _) if f == 1.5));
        assert!(p.add(2).load().is_err());
    }
}
