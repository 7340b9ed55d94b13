//! Built-in functions and constants of OpenCL C
//!
//! [`resolve`] turns a call of a built-in name with given argument types into a
//! [`Signature`]: the resolved [`Builtin`], the parameter types the arguments
//! are converted to, and the result type.

use super::ast::{AddressSpace, PtrType, ScalarType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemFn {
    WorkDim,
    GlobalId,
    LocalId,
    GroupId,
    GlobalSize,
    LocalSize,
    NumGroups,
    GlobalOffset,
}

impl WorkItemFn {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "get_work_dim" => WorkItemFn::WorkDim,
            "get_global_id" => WorkItemFn::GlobalId,
            "get_local_id" => WorkItemFn::LocalId,
            "get_group_id" => WorkItemFn::GroupId,
            "get_global_size" => WorkItemFn::GlobalSize,
            "get_local_size" => WorkItemFn::LocalSize,
            "get_num_groups" => WorkItemFn::NumGroups,
            "get_global_offset" => WorkItemFn::GlobalOffset,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            WorkItemFn::WorkDim => "get_work_dim",
            WorkItemFn::GlobalId => "get_global_id",
            WorkItemFn::LocalId => "get_local_id",
            WorkItemFn::GroupId => "get_group_id",
            WorkItemFn::GlobalSize => "get_global_size",
            WorkItemFn::LocalSize => "get_local_size",
            WorkItemFn::NumGroups => "get_num_groups",
            WorkItemFn::GlobalOffset => "get_global_offset",
        }
    }
}

/// Floating-point math functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Sqrt,
    Rsqrt,
    Exp,
    Exp2,
    Exp10,
    Expm1,
    Log,
    Log2,
    Log10,
    Log1p,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Fabs,
    Floor,
    Ceil,
    Round,
    Trunc,
    Rint,
    Cbrt,
    Sign,
    Degrees,
    Radians,
    Recip,
    Pow,
    Powr,
    Fmin,
    Fmax,
    Fmod,
    Atan2,
    Hypot,
    Copysign,
    Fdim,
    Divide,
    Step,
    Fma,
    Mad,
    Mix,
    Clamp,
    Smoothstep,
}

impl MathFn {
    fn from_name(name: &str) -> Option<Self> {
        use MathFn::*;
        Some(match name {
            "sqrt" => Sqrt,
            "rsqrt" => Rsqrt,
            "exp" => Exp,
            "exp2" => Exp2,
            "exp10" => Exp10,
            "expm1" => Expm1,
            "log" => Log,
            "log2" => Log2,
            "log10" => Log10,
            "log1p" => Log1p,
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "asin" => Asin,
            "acos" => Acos,
            "atan" => Atan,
            "sinh" => Sinh,
            "cosh" => Cosh,
            "tanh" => Tanh,
            "asinh" => Asinh,
            "acosh" => Acosh,
            "atanh" => Atanh,
            "fabs" => Fabs,
            "floor" => Floor,
            "ceil" => Ceil,
            "round" => Round,
            "trunc" => Trunc,
            "rint" => Rint,
            "cbrt" => Cbrt,
            "sign" => Sign,
            "degrees" => Degrees,
            "radians" => Radians,
            "recip" => Recip,
            "pow" => Pow,
            "powr" => Powr,
            "fmin" => Fmin,
            "fmax" => Fmax,
            "fmod" => Fmod,
            "atan2" => Atan2,
            "hypot" => Hypot,
            "copysign" => Copysign,
            "fdim" => Fdim,
            "divide" => Divide,
            "step" => Step,
            "fma" => Fma,
            "mad" => Mad,
            "mix" => Mix,
            "smoothstep" => Smoothstep,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use MathFn::*;
        match self {
            Sqrt => "sqrt",
            Rsqrt => "rsqrt",
            Exp => "exp",
            Exp2 => "exp2",
            Exp10 => "exp10",
            Expm1 => "expm1",
            Log => "log",
            Log2 => "log2",
            Log10 => "log10",
            Log1p => "log1p",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Asin => "asin",
            Acos => "acos",
            Atan => "atan",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Asinh => "asinh",
            Acosh => "acosh",
            Atanh => "atanh",
            Fabs => "fabs",
            Floor => "floor",
            Ceil => "ceil",
            Round => "round",
            Trunc => "trunc",
            Rint => "rint",
            Cbrt => "cbrt",
            Sign => "sign",
            Degrees => "degrees",
            Radians => "radians",
            Recip => "recip",
            Pow => "pow",
            Powr => "powr",
            Fmin => "fmin",
            Fmax => "fmax",
            Fmod => "fmod",
            Atan2 => "atan2",
            Hypot => "hypot",
            Copysign => "copysign",
            Fdim => "fdim",
            Divide => "divide",
            Step => "step",
            Fma => "fma",
            Mad => "mad",
            Mix => "mix",
            Clamp => "clamp",
            Smoothstep => "smoothstep",
        }
    }

    pub fn arity(self) -> usize {
        use MathFn::*;
        match self {
            Pow | Powr | Fmin | Fmax | Fmod | Atan2 | Hypot | Copysign | Fdim | Divide | Step => 2,
            Fma | Mad | Mix | Clamp | Smoothstep => 3,
            _ => 1,
        }
    }

    /// Only valid with a `native_` or `half_` prefix
    fn prefixed_only(self) -> bool {
        matches!(self, MathFn::Recip | MathFn::Divide)
    }

    /// Evaluate in double precision; callers round to the result type
    pub fn eval(self, a: &[f64]) -> f64 {
        use MathFn::*;
        let x = a.first().copied().unwrap_or(0.0);
        let y = a.get(1).copied().unwrap_or(0.0);
        let z = a.get(2).copied().unwrap_or(0.0);
        match self {
            Sqrt => x.sqrt(),
            Rsqrt => 1.0 / x.sqrt(),
            Exp => x.exp(),
            Exp2 => x.exp2(),
            Exp10 => 10f64.powf(x),
            Expm1 => x.exp_m1(),
            Log => x.ln(),
            Log2 => x.log2(),
            Log10 => x.log10(),
            Log1p => x.ln_1p(),
            Sin => x.sin(),
            Cos => x.cos(),
            Tan => x.tan(),
            Asin => x.asin(),
            Acos => x.acos(),
            Atan => x.atan(),
            Sinh => x.sinh(),
            Cosh => x.cosh(),
            Tanh => x.tanh(),
            Asinh => x.asinh(),
            Acosh => x.acosh(),
            Atanh => x.atanh(),
            Fabs => x.abs(),
            Floor => x.floor(),
            Ceil => x.ceil(),
            Round => x.round(),
            Trunc => x.trunc(),
            Rint => x.round_ties_even(),
            Cbrt => x.cbrt(),
            Sign => {
                if x.is_nan() {
                    0.0
                } else if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    x
                }
            }
            Degrees => x.to_degrees(),
            Radians => x.to_radians(),
            Recip => 1.0 / x,
            Pow | Powr => x.powf(y),
            Fmin => x.min(y),
            Fmax => x.max(y),
            Fmod => x % y,
            Atan2 => x.atan2(y),
            Hypot => x.hypot(y),
            Copysign => x.copysign(y),
            Fdim => {
                if x > y {
                    x - y
                } else {
                    0.0
                }
            }
            Divide => x / y,
            Step => {
                if y < x {
                    0.0
                } else {
                    1.0
                }
            }
            Fma | Mad => x.mul_add(y, z),
            Mix => x + (y - x) * z,
            Clamp => x.max(y).min(z),
            Smoothstep => {
                let t = ((z - x) / (y - x)).clamp(0.0, 1.0);
                t * t * (3.0 - 2.0 * t)
            }
        }
    }
}

/// `native_` and `half_` variants trade precision for speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Full,
    Native,
    Half,
}

/// Integer functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntFn {
    Abs,
    Min,
    Max,
    Clamp,
    Mul24,
    Mad24,
    MulHi,
    Popcount,
    Clz,
    Rotate,
}

impl IntFn {
    pub fn name(self) -> &'static str {
        match self {
            IntFn::Abs => "abs",
            IntFn::Min => "min",
            IntFn::Max => "max",
            IntFn::Clamp => "clamp",
            IntFn::Mul24 => "mul24",
            IntFn::Mad24 => "mad24",
            IntFn::MulHi => "mul_hi",
            IntFn::Popcount => "popcount",
            IntFn::Clz => "clz",
            IntFn::Rotate => "rotate",
        }
    }

    fn arity(self) -> usize {
        match self {
            IntFn::Abs | IntFn::Popcount | IntFn::Clz => 1,
            IntFn::Clamp | IntFn::Mad24 => 3,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationalFn {
    IsNan,
    IsInf,
    IsFinite,
    SignBit,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Sub,
    Xchg,
    Inc,
    Dec,
    CmpXchg,
    Min,
    Max,
    And,
    Or,
    Xor,
}

impl AtomicOp {
    fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "add" => AtomicOp::Add,
            "sub" => AtomicOp::Sub,
            "xchg" => AtomicOp::Xchg,
            "inc" => AtomicOp::Inc,
            "dec" => AtomicOp::Dec,
            "cmpxchg" => AtomicOp::CmpXchg,
            "min" => AtomicOp::Min,
            "max" => AtomicOp::Max,
            "and" => AtomicOp::And,
            "or" => AtomicOp::Or,
            "xor" => AtomicOp::Xor,
            _ => return None,
        })
    }

    /// Number of value operands after the pointer
    pub fn operands(self) -> usize {
        match self {
            AtomicOp::Inc | AtomicOp::Dec => 0,
            AtomicOp::CmpXchg => 2,
            _ => 1,
        }
    }
}

/// A resolved built-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    WorkItem(WorkItemFn),
    Math(MathFn, Precision),
    Int(IntFn),
    Relational(RelationalFn),
    Convert { to: ScalarType, saturate: bool },
    Reinterpret(ScalarType),
    Atomic(AtomicOp),
    Barrier,
    MemFence,
}

/// Result of resolving a built-in call
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub builtin: Builtin,
    /// Types the arguments are converted to
    pub params: Vec<Type>,
    pub ret: Type,
}

/// Usual arithmetic conversions
pub fn arithmetic_type(a: ScalarType, b: ScalarType) -> ScalarType {
    if a.is_float() || b.is_float() {
        return if a == ScalarType::Double || b == ScalarType::Double {
            ScalarType::Double
        } else {
            ScalarType::Float
        };
    }
    let (a, b) = (promote(a), promote(b));
    if a == b {
        return a;
    }
    if a.is_signed() == b.is_signed() {
        return if a.rank() >= b.rank() { a } else { b };
    }
    let (signed, unsigned) = if a.is_signed() { (a, b) } else { (b, a) };
    if unsigned.rank() >= signed.rank() {
        unsigned
    } else if signed.size() > unsigned.size() {
        signed
    } else {
        signed.to_unsigned()
    }
}

/// Integer promotion
pub fn promote(ty: ScalarType) -> ScalarType {
    match ty {
        ScalarType::Bool
        | ScalarType::Char
        | ScalarType::UChar
        | ScalarType::Short
        | ScalarType::UShort => ScalarType::Int,
        other => other,
    }
}

/// Whether `name` is the name of any built-in function
pub fn is_builtin(name: &str) -> bool {
    WorkItemFn::from_name(name).is_some()
        || split_math(name).is_some()
        || int_fn(name).is_some()
        || relational_fn(name).is_some()
        || conversion(name).is_some()
        || atomic_op(name).is_some()
        || matches!(
            name,
            "barrier" | "mem_fence" | "read_mem_fence" | "write_mem_fence"
        )
}

fn split_math(name: &str) -> Option<(MathFn, Precision)> {
    let (precision, base) = if let Some(rest) = name.strip_prefix("native_") {
        (Precision::Native, rest)
    } else if let Some(rest) = name.strip_prefix("half_") {
        (Precision::Half, rest)
    } else {
        (Precision::Full, name)
    };
    let func = MathFn::from_name(base)?;
    if precision == Precision::Full && (func.prefixed_only() || func == MathFn::Clamp) {
        return None;
    }
    Some((func, precision))
}

fn int_fn(name: &str) -> Option<IntFn> {
    Some(match name {
        "abs" => IntFn::Abs,
        "min" => IntFn::Min,
        "max" => IntFn::Max,
        "clamp" => IntFn::Clamp,
        "mul24" => IntFn::Mul24,
        "mad24" => IntFn::Mad24,
        "mul_hi" => IntFn::MulHi,
        "popcount" => IntFn::Popcount,
        "clz" => IntFn::Clz,
        "rotate" => IntFn::Rotate,
        _ => return None,
    })
}

fn relational_fn(name: &str) -> Option<RelationalFn> {
    Some(match name {
        "isnan" => RelationalFn::IsNan,
        "isinf" => RelationalFn::IsInf,
        "isfinite" => RelationalFn::IsFinite,
        "signbit" => RelationalFn::SignBit,
        "select" => RelationalFn::Select,
        _ => return None,
    })
}

fn conversion(name: &str) -> Option<Builtin> {
    if let Some(rest) = name.strip_prefix("convert_") {
        let mut parts = rest.split('_');
        let to = ScalarType::from_name(parts.next()?)?;
        let mut saturate = false;
        for part in parts {
            match part {
                "sat" if !saturate => saturate = true,
                "rte" | "rtz" | "rtp" | "rtn" => {}
                _ => return None,
            }
        }
        return Some(Builtin::Convert { to, saturate });
    }
    if let Some(rest) = name.strip_prefix("as_") {
        return ScalarType::from_name(rest).map(Builtin::Reinterpret);
    }
    None
}

fn atomic_op(name: &str) -> Option<AtomicOp> {
    let suffix = name
        .strip_prefix("atomic_")
        .or_else(|| name.strip_prefix("atom_"))?;
    AtomicOp::from_suffix(suffix)
}

fn float_type(args: &[Type]) -> ScalarType {
    if args.iter().any(|t| t.scalar() == Some(ScalarType::Double)) {
        ScalarType::Double
    } else {
        ScalarType::Float
    }
}

fn expect_arity(name: &str, args: &[Type], n: usize) -> Result<(), String> {
    if args.len() != n {
        return Err(format!(
            "'{}' expects {} argument(s), got {}",
            name,
            n,
            args.len()
        ));
    }
    Ok(())
}

fn scalars(name: &str, args: &[Type]) -> Result<Vec<ScalarType>, String> {
    args.iter()
        .map(|t| {
            t.scalar()
                .ok_or_else(|| format!("invalid argument of type '{}' to '{}'", t, name))
        })
        .collect()
}

fn math_signature(
    name: &str,
    func: MathFn,
    precision: Precision,
    args: &[Type],
) -> Result<Signature, String> {
    expect_arity(name, args, func.arity())?;
    scalars(name, args)?;
    let ty = Type::Scalar(float_type(args));
    Ok(Signature {
        builtin: Builtin::Math(func, precision),
        params: vec![ty; args.len()],
        ret: ty,
    })
}

/// Resolve a call to a built-in function
///
/// Returns `None` when `name` is not a built-in.
pub fn resolve(name: &str, args: &[Type]) -> Option<Result<Signature, String>> {
    if let Some(func) = WorkItemFn::from_name(name) {
        let result = if func == WorkItemFn::WorkDim {
            expect_arity(name, args, 0).map(|_| Signature {
                builtin: Builtin::WorkItem(func),
                params: vec![],
                ret: Type::UINT,
            })
        } else {
            expect_arity(name, args, 1)
                .and_then(|_| scalars(name, args))
                .map(|_| Signature {
                    builtin: Builtin::WorkItem(func),
                    params: vec![Type::UINT],
                    ret: Type::SIZE,
                })
        };
        return Some(result);
    }

    if let Some((func, precision)) = split_math(name) {
        return Some(math_signature(name, func, precision, args));
    }

    if let Some(func) = int_fn(name) {
        return Some(int_signature(name, func, args));
    }

    if let Some(func) = relational_fn(name) {
        return Some(relational_signature(name, func, args));
    }

    if let Some(builtin) = conversion(name) {
        return Some(conversion_signature(name, builtin, args));
    }

    if let Some(op) = atomic_op(name) {
        return Some(atomic_signature(name, op, args));
    }

    match name {
        "barrier" | "mem_fence" | "read_mem_fence" | "write_mem_fence" => {
            let builtin = if name == "barrier" {
                Builtin::Barrier
            } else {
                Builtin::MemFence
            };
            Some(
                expect_arity(name, args, 1)
                    .and_then(|_| scalars(name, args))
                    .map(|_| Signature {
                        builtin,
                        params: vec![Type::UINT],
                        ret: Type::Void,
                    }),
            )
        }
        _ => None,
    }
}

fn int_signature(name: &str, func: IntFn, args: &[Type]) -> Result<Signature, String> {
    expect_arity(name, args, func.arity())?;
    let tys = scalars(name, args)?;

    if tys.iter().any(|t| t.is_float()) {
        let math = match func {
            IntFn::Abs => MathFn::Fabs,
            IntFn::Min => MathFn::Fmin,
            IntFn::Max => MathFn::Fmax,
            IntFn::Clamp => MathFn::Clamp,
            _ => return Err(format!("'{}' requires integer arguments", name)),
        };
        return math_signature(name, math, Precision::Full, args);
    }

    let common = tys
        .iter()
        .copied()
        .reduce(arithmetic_type)
        .map(promote)
        .unwrap_or(ScalarType::Int);
    let common = match func {
        IntFn::Mul24 | IntFn::Mad24 if common.size() > 4 => {
            return Err(format!("'{}' requires 32-bit integer arguments", name));
        }
        _ => common,
    };
    let ret = if func == IntFn::Abs {
        common.to_unsigned()
    } else {
        common
    };
    Ok(Signature {
        builtin: Builtin::Int(func),
        params: vec![Type::Scalar(common); args.len()],
        ret: Type::Scalar(ret),
    })
}

fn relational_signature(
    name: &str,
    func: RelationalFn,
    args: &[Type],
) -> Result<Signature, String> {
    if func == RelationalFn::Select {
        expect_arity(name, args, 3)?;
        let tys = scalars(name, args)?;
        if !tys[2].is_integer() {
            return Err("the condition of 'select' must be an integer".to_string());
        }
        let common = arithmetic_type(tys[0], tys[1]);
        return Ok(Signature {
            builtin: Builtin::Relational(func),
            params: vec![
                Type::Scalar(common),
                Type::Scalar(common),
                Type::Scalar(tys[2]),
            ],
            ret: Type::Scalar(common),
        });
    }
    expect_arity(name, args, 1)?;
    scalars(name, args)?;
    Ok(Signature {
        builtin: Builtin::Relational(func),
        params: vec![Type::Scalar(float_type(args))],
        ret: Type::INT,
    })
}

fn conversion_signature(name: &str, builtin: Builtin, args: &[Type]) -> Result<Signature, String> {
    expect_arity(name, args, 1)?;
    let from = scalars(name, args)?[0];
    let to = match builtin {
        Builtin::Convert { to, .. } => to,
        Builtin::Reinterpret(to) => {
            if to.size() != from.size() {
                return Err(format!(
                    "'{}' cannot reinterpret a {}-byte '{}'",
                    name,
                    from.size(),
                    from
                ));
            }
            to
        }
        _ => return Err(format!("'{}' is not a conversion", name)),
    };
    Ok(Signature {
        builtin,
        params: vec![Type::Scalar(from)],
        ret: Type::Scalar(to),
    })
}

fn atomic_signature(name: &str, op: AtomicOp, args: &[Type]) -> Result<Signature, String> {
    expect_arity(name, args, op.operands() + 1)?;
    let ptr: PtrType = args[0]
        .pointer()
        .ok_or_else(|| format!("first argument of '{}' must be a pointer", name))?;
    let elem_ok = match ptr.elem {
        ScalarType::Int | ScalarType::UInt => true,
        ScalarType::Float => op == AtomicOp::Xchg,
        _ => false,
    };
    if !elem_ok {
        return Err(format!(
            "'{}' is not supported on '{}' operands",
            name, ptr.elem
        ));
    }
    if !matches!(ptr.space, AddressSpace::Global | AddressSpace::Local) || ptr.is_const {
        return Err(format!(
            "'{}' requires a writable __global or __local pointer",
            name
        ));
    }
    scalars(name, &args[1..])?;
    let mut params = vec![args[0].decay()];
    params.extend(std::iter::repeat_n(Type::Scalar(ptr.elem), op.operands()));
    Ok(Signature {
        builtin: Builtin::Atomic(op),
        params,
        ret: Type::Scalar(ptr.elem),
    })
}

/// Built-in constant value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int(u64, ScalarType),
    Float(f64, ScalarType),
}

pub const CLK_LOCAL_MEM_FENCE: u64 = 1;
pub const CLK_GLOBAL_MEM_FENCE: u64 = 2;

/// Look up a built-in constant such as `CLK_LOCAL_MEM_FENCE` or `M_PI_F`
pub fn constant(name: &str) -> Option<Constant> {
    use ScalarType::*;
    Some(match name {
        "CLK_LOCAL_MEM_FENCE" => Constant::Int(CLK_LOCAL_MEM_FENCE, UInt),
        "CLK_GLOBAL_MEM_FENCE" => Constant::Int(CLK_GLOBAL_MEM_FENCE, UInt),
        "true" => Constant::Int(1, Int),
        "false" => Constant::Int(0, Int),
        "NULL" => Constant::Int(0, Int),
        "CHAR_BIT" => Constant::Int(8, Int),
        "CHAR_MAX" | "SCHAR_MAX" => Constant::Int(127, Int),
        "UCHAR_MAX" => Constant::Int(255, Int),
        "SHRT_MAX" => Constant::Int(32767, Int),
        "USHRT_MAX" => Constant::Int(65535, Int),
        "INT_MAX" => Constant::Int(i32::MAX as u64, Int),
        "INT_MIN" => Constant::Int(i32::MIN as i64 as u64, Int),
        "UINT_MAX" => Constant::Int(u32::MAX as u64, UInt),
        "LONG_MAX" => Constant::Int(i64::MAX as u64, Long),
        "LONG_MIN" => Constant::Int(i64::MIN as u64, Long),
        "ULONG_MAX" => Constant::Int(u64::MAX, ULong),
        "FLT_MAX" | "MAXFLOAT" => Constant::Float(f32::MAX as f64, Float),
        "FLT_MIN" => Constant::Float(f32::MIN_POSITIVE as f64, Float),
        "FLT_EPSILON" => Constant::Float(f32::EPSILON as f64, Float),
        "INFINITY" | "HUGE_VALF" => Constant::Float(f64::INFINITY, Float),
        "NAN" => Constant::Float(f64::NAN, Float),
        "M_PI_F" => Constant::Float(std::f32::consts::PI as f64, Float),
        "M_PI_2_F" => Constant::Float(std::f32::consts::FRAC_PI_2 as f64, Float),
        "M_PI_4_F" => Constant::Float(std::f32::consts::FRAC_PI_4 as f64, Float),
        "M_1_PI_F" => Constant::Float(std::f32::consts::FRAC_1_PI as f64, Float),
        "M_E_F" => Constant::Float(std::f32::consts::E as f64, Float),
        "M_LN2_F" => Constant::Float(std::f32::consts::LN_2 as f64, Float),
        "M_SQRT2_F" => Constant::Float(std::f32::consts::SQRT_2 as f64, Float),
        "M_PI" => Constant::Float(std::f64::consts::PI, Double),
        "M_E" => Constant::Float(std::f64::consts::E, Double),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ScalarType::Int, ScalarType::UInt, ScalarType::UInt)]
    #[case(ScalarType::Char, ScalarType::Short, ScalarType::Int)]
    #[case(ScalarType::Long, ScalarType::UInt, ScalarType::Long)]
    #[case(ScalarType::Int, ScalarType::Float, ScalarType::Float)]
    #[case(ScalarType::Float, ScalarType::Double, ScalarType::Double)]
    #[case(ScalarType::Long, ScalarType::ULong, ScalarType::ULong)]
    fn test_arithmetic_type(
        #[case] a: ScalarType,
        #[case] b: ScalarType,
        #[case] expected: ScalarType,
    ) {
        assert_eq!(arithmetic_type(a, b), expected);
        assert_eq!(arithmetic_type(b, a), expected);
    }

    #[test]
    fn test_resolve_work_item() {
        let sig = resolve("get_global_id", &[Type::INT]).unwrap().unwrap();
        assert_eq!(sig.builtin, Builtin::WorkItem(WorkItemFn::GlobalId));
        assert_eq!(sig.ret, Type::SIZE);
        assert!(resolve("get_global_id", &[]).unwrap().is_err());
    }

    #[test]
    fn test_resolve_min_dispatches_on_type() {
        let sig = resolve("min", &[Type::INT, Type::UINT]).unwrap().unwrap();
        assert_eq!(sig.builtin, Builtin::Int(IntFn::Min));
        assert_eq!(sig.ret, Type::UINT);

        let sig = resolve("min", &[Type::FLOAT, Type::INT]).unwrap().unwrap();
        assert_eq!(sig.builtin, Builtin::Math(MathFn::Fmin, Precision::Full));
        assert_eq!(sig.ret, Type::FLOAT);
    }

    #[test]
    fn test_resolve_native_variants() {
        let sig = resolve("native_recip", &[Type::FLOAT]).unwrap().unwrap();
        assert_eq!(sig.builtin, Builtin::Math(MathFn::Recip, Precision::Native));
        assert!(resolve("recip", &[Type::FLOAT]).is_none());
    }

    #[test]
    fn test_resolve_conversions() {
        let sig = resolve("convert_int_sat_rte", &[Type::FLOAT]).unwrap().unwrap();
        assert_eq!(
            sig.builtin,
            Builtin::Convert {
                to: ScalarType::Int,
                saturate: true
            }
        );
        assert!(resolve("as_float", &[Type::UINT]).unwrap().is_ok());
        assert!(resolve("as_double", &[Type::UINT]).unwrap().is_err());
    }

    #[test]
    fn test_resolve_atomics() {
        let ptr = Type::Pointer(PtrType {
            elem: ScalarType::Int,
            space: AddressSpace::Global,
            is_const: false,
        });
        let sig = resolve("atomic_add", &[ptr, Type::INT]).unwrap().unwrap();
        assert_eq!(sig.builtin, Builtin::Atomic(AtomicOp::Add));
        assert_eq!(sig.ret, Type::INT);
        assert!(resolve("atom_inc", &[ptr]).unwrap().is_ok());
        assert!(resolve("atomic_add", &[Type::INT, Type::INT]).unwrap().is_err());
    }

    #[test]
    fn test_constants() {
        assert_eq!(
            constant("CLK_LOCAL_MEM_FENCE"),
            Some(Constant::Int(1, ScalarType::UInt))
        );
        assert!(constant("M_PI_F").is_some());
        assert!(constant("get_global_id").is_none());
    }

    #[test]
    fn test_math_eval() {
        assert_eq!(MathFn::Mad.eval(&[2.0, 3.0, 1.0]), 7.0);
        assert_eq!(MathFn::Clamp.eval(&[5.0, 0.0, 1.0]), 1.0);
        assert_eq!(MathFn::Step.eval(&[0.5, 0.25]), 0.0);
        assert_eq!(MathFn::Rint.eval(&[2.5]), 2.0);
    }
}
