//! Typed syntax tree of the supported OpenCL C subset

use std::fmt;

/// Source position (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarType {
    pub fn size(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Long | ScalarType::ULong | ScalarType::Double => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float | ScalarType::Double)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarType::Char
                | ScalarType::Short
                | ScalarType::Int
                | ScalarType::Long
                | ScalarType::Float
                | ScalarType::Double
        )
    }

    /// Integer conversion rank
    pub fn rank(self) -> u8 {
        match self {
            ScalarType::Bool => 0,
            ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt => 3,
            ScalarType::Long | ScalarType::ULong => 4,
            ScalarType::Float => 5,
            ScalarType::Double => 6,
        }
    }

    pub fn to_unsigned(self) -> ScalarType {
        match self {
            ScalarType::Char => ScalarType::UChar,
            ScalarType::Short => ScalarType::UShort,
            ScalarType::Int => ScalarType::UInt,
            ScalarType::Long => ScalarType::ULong,
            other => other,
        }
    }

    /// OpenCL C spelling
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Char => "char",
            ScalarType::UChar => "uchar",
            ScalarType::Short => "short",
            ScalarType::UShort => "ushort",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Long => "long",
            ScalarType::ULong => "ulong",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }

    pub fn from_name(name: &str) -> Option<ScalarType> {
        Some(match name {
            "bool" => ScalarType::Bool,
            "char" => ScalarType::Char,
            "uchar" => ScalarType::UChar,
            "short" => ScalarType::Short,
            "ushort" => ScalarType::UShort,
            "int" => ScalarType::Int,
            "uint" => ScalarType::UInt,
            "long" => ScalarType::Long,
            "ulong" => ScalarType::ULong,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            "size_t" | "uintptr_t" => ScalarType::ULong,
            "ptrdiff_t" | "intptr_t" => ScalarType::Long,
            _ => return None,
        })
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressSpace {
    #[default]
    Private,
    Global,
    Local,
    Constant,
}

impl AddressSpace {
    pub fn name(self) -> &'static str {
        match self {
            AddressSpace::Private => "__private",
            AddressSpace::Global => "__global",
            AddressSpace::Local => "__local",
            AddressSpace::Constant => "__constant",
        }
    }
}

/// Pointer to a scalar element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtrType {
    pub elem: ScalarType,
    pub space: AddressSpace,
    pub is_const: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Scalar(ScalarType),
    Pointer(PtrType),
    Array {
        elem: ScalarType,
        len: usize,
        space: AddressSpace,
    },
}

impl Type {
    pub const INT: Type = Type::Scalar(ScalarType::Int);
    pub const UINT: Type = Type::Scalar(ScalarType::UInt);
    pub const SIZE: Type = Type::Scalar(ScalarType::ULong);
    pub const FLOAT: Type = Type::Scalar(ScalarType::Float);

    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn pointer(&self) -> Option<PtrType> {
        match self {
            Type::Pointer(p) => Some(*p),
            Type::Array { elem, space, .. } => Some(PtrType {
                elem: *elem,
                space: *space,
                is_const: *space == AddressSpace::Constant,
            }),
            _ => None,
        }
    }

    pub fn is_pointer_like(&self) -> bool {
        matches!(self, Type::Pointer(_) | Type::Array { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Array-to-pointer decay
    pub fn decay(self) -> Type {
        match self {
            Type::Array { elem, space, .. } => Type::Pointer(PtrType {
                elem,
                space,
                is_const: space == AddressSpace::Constant,
            }),
            other => other,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Scalar(s) => write!(f, "{}", s),
            Type::Pointer(p) => {
                if p.space != AddressSpace::Private {
                    write!(f, "{} ", p.space.name())?;
                }
                if p.is_const {
                    f.write_str("const ")?;
                }
                write!(f, "{}*", p.elem)
            }
            Type::Array { elem, len, .. } => write!(f, "{}[{}]", elem, len),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    pub fn is_integer_only(self) -> bool {
        matches!(
            self,
            BinaryOp::Rem
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
        )
    }
}

/// Resolved callee of a call expression
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Not yet resolved (parser output)
    Unresolved,
    Builtin(super::builtins::Builtin),
    /// Index into `Module::functions`
    User(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    /// Filled in by the checker; `Void` before checking
    pub ty: Type,
    pub pos: Pos,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Self {
            kind,
            ty: Type::Void,
            pos,
        }
    }

    pub fn typed(kind: ExprKind, ty: Type, pos: Pos) -> Self {
        Self { kind, ty, pos }
    }

    /// Fold an integer constant expression
    pub fn const_int(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::IntLit(v) => Some(*v as i64),
            ExprKind::Cast(Type::Scalar(ty), inner) if ty.is_integer() => inner.const_int(),
            ExprKind::Unary(op, inner) => {
                let v = inner.const_int()?;
                Some(match op {
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::Plus => v,
                    UnaryOp::Not => (v == 0) as i64,
                    UnaryOp::BitNot => !v,
                })
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let (a, b) = (lhs.const_int()?, rhs.const_int()?);
                Some(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div if b != 0 => a.wrapping_div(b),
                    BinaryOp::Rem if b != 0 => a.wrapping_rem(b),
                    BinaryOp::Div | BinaryOp::Rem => return None,
                    BinaryOp::Shl => a.wrapping_shl(b as u32),
                    BinaryOp::Shr => a.wrapping_shr(b as u32),
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    BinaryOp::BitXor => a ^ b,
                    BinaryOp::Lt => (a < b) as i64,
                    BinaryOp::Le => (a <= b) as i64,
                    BinaryOp::Gt => (a > b) as i64,
                    BinaryOp::Ge => (a >= b) as i64,
                    BinaryOp::Eq => (a == b) as i64,
                    BinaryOp::Ne => (a != b) as i64,
                    BinaryOp::LogicalAnd => (a != 0 && b != 0) as i64,
                    BinaryOp::LogicalOr => (a != 0 || b != 0) as i64,
                })
            }
            ExprKind::Conditional(c, a, b) => {
                if c.const_int()? != 0 {
                    a.const_int()
                } else {
                    b.const_int()
                }
            }
            ExprKind::SizeOf(Type::Scalar(ty)) => Some(ty.size() as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal; the type comes from its suffix and magnitude
    IntLit(u64),
    FloatLit(f64),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `target op= value`, plain assignment when `op` is `None`
    Assign(Option<BinaryOp>, Box<Expr>, Box<Expr>),
    IncDec {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(Type, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Deref(Box<Expr>),
    AddrOf(Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        target: CallTarget,
    },
    /// `sizeof(type)`, folded to a literal by the checker
    SizeOf(Type),
    /// `sizeof(expr)`, folded to a literal by the checker
    SizeOfExpr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    Expr(Expr),
    List(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    /// Declared address space of the variable itself
    pub space: AddressSpace,
    pub is_const: bool,
    /// Array length expression before checking
    pub len_expr: Option<Expr>,
    pub init: Option<Init>,
    /// Slot in `Function::local_arrays` for `__local` arrays
    pub local_slot: Option<usize>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl(Vec<VarDecl>),
    Expr(Expr),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Break(Pos),
    Continue(Pos),
    Return(Option<Expr>, Pos),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// `const` on the value itself (not the pointee)
    pub is_const: bool,
    pub is_volatile: bool,
    pub is_restrict: bool,
    pub pos: Pos,
}

/// A `__local` array declared in a kernel body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalArray {
    pub elem: ScalarType,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    /// `None` for a prototype
    pub body: Option<Vec<Stmt>>,
    pub is_kernel: bool,
    pub reqd_work_group_size: Option<[usize; 3]>,
    pub local_arrays: Vec<LocalArray>,
    /// Calls `barrier` directly or through a helper
    pub uses_barrier: bool,
    pub pos: Pos,
}

/// Program-scope `__constant` variable
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub decl: VarDecl,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub globals: Vec<GlobalVar>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<(usize, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name && f.body.is_some())
    }

    pub fn kernels(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| f.is_kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_names_round_trip() {
        for ty in [ScalarType::Char, ScalarType::UInt, ScalarType::Double] {
            assert_eq!(ScalarType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ScalarType::from_name("size_t"), Some(ScalarType::ULong));
    }

    #[test]
    fn test_array_decay() {
        let arr = Type::Array {
            elem: ScalarType::Float,
            len: 4,
            space: AddressSpace::Local,
        };
        assert_eq!(
            arr.decay(),
            Type::Pointer(PtrType {
                elem: ScalarType::Float,
                space: AddressSpace::Local,
                is_const: false
            })
        );
    }

    #[test]
    fn test_const_int_folding() {
        let lit = |v| Box::new(Expr::new(ExprKind::IntLit(v), Pos::default()));
        let expr = Expr::new(
            ExprKind::Binary(
                BinaryOp::Mul,
                lit(4),
                Box::new(Expr::new(
                    ExprKind::Binary(BinaryOp::Add, lit(2), lit(3)),
                    Pos::default(),
                )),
            ),
            Pos::default(),
        );
        assert_eq!(expr.const_int(), Some(20));
        let div = Expr::new(ExprKind::Binary(BinaryOp::Div, lit(1), lit(0)), Pos::default());
        assert_eq!(div.const_int(), None);
    }

    #[test]
    fn test_pointer_display() {
        let ty = Type::Pointer(PtrType {
            elem: ScalarType::Float,
            space: AddressSpace::Global,
            is_const: true,
        });
        assert_eq!(ty.to_string(), "__global const float*");
    }
}
