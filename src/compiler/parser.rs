//! pest front end: preprocessed OpenCL C source to an untyped [`Module`]

use std::sync::LazyLock;

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;

use super::Diagnostic;
use super::ast::*;
use super::preprocess::parse_int;

#[derive(Parser)]
#[grammar = "compiler/grammar.pest"]
pub struct ClcParser;

/// Words that may not name a variable, parameter, or function
pub const RESERVED_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "bool", "uchar", "ushort", "uint", "ulong",
    "half", "size_t", "kernel", "__kernel", "global", "__global", "local", "__local", "constant",
    "__constant", "private", "__private", "image2d_t", "image3d_t", "sampler_t", "event_t",
];

static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::op_lor, Assoc::Left))
        .op(Op::infix(Rule::op_land, Assoc::Left))
        .op(Op::infix(Rule::op_bor, Assoc::Left))
        .op(Op::infix(Rule::op_bxor, Assoc::Left))
        .op(Op::infix(Rule::op_band, Assoc::Left))
        .op(Op::infix(Rule::op_eq, Assoc::Left) | Op::infix(Rule::op_ne, Assoc::Left))
        .op(Op::infix(Rule::op_lt, Assoc::Left)
            | Op::infix(Rule::op_le, Assoc::Left)
            | Op::infix(Rule::op_gt, Assoc::Left)
            | Op::infix(Rule::op_ge, Assoc::Left))
        .op(Op::infix(Rule::op_shl, Assoc::Left) | Op::infix(Rule::op_shr, Assoc::Left))
        .op(Op::infix(Rule::op_add, Assoc::Left) | Op::infix(Rule::op_sub, Assoc::Left))
        .op(Op::infix(Rule::op_mul, Assoc::Left)
            | Op::infix(Rule::op_div, Assoc::Left)
            | Op::infix(Rule::op_mod, Assoc::Left))
        .op(Op::prefix(Rule::cast)
            | Op::prefix(Rule::pre_inc)
            | Op::prefix(Rule::pre_dec)
            | Op::prefix(Rule::neg)
            | Op::prefix(Rule::plus)
            | Op::prefix(Rule::not)
            | Op::prefix(Rule::bit_not)
            | Op::prefix(Rule::deref)
            | Op::prefix(Rule::addr_of))
        .op(Op::postfix(Rule::index) | Op::postfix(Rule::post_inc) | Op::postfix(Rule::post_dec))
});

type PResult<T> = Result<T, Diagnostic>;

fn pos_of(pair: &Pair<Rule>) -> Pos {
    let (line, column) = pair.line_col();
    Pos::new(line, column)
}

fn check_reserved_keyword(name: &str, pair: &Pair<Rule>) -> PResult<()> {
    if RESERVED_KEYWORDS.contains(&name) {
        return Err(Diagnostic::error(
            pos_of(pair),
            format!(
                "'{}' is a reserved keyword and cannot be used as an identifier",
                name
            ),
        ));
    }
    Ok(())
}

fn from_pest_error(err: pest::error::Error<Rule>) -> Diagnostic {
    let err = err.renamed_rules(|rule| match rule {
        Rule::expr | Rule::assignment | Rule::conditional | Rule::binary => "expression".into(),
        Rule::statement => "statement".into(),
        Rule::ident => "identifier".into(),
        Rule::decl_specifiers | Rule::type_name => "type".into(),
        Rule::block => "'{'".into(),
        Rule::EOI => "end of input".into(),
        other => format!("{:?}", other),
    });
    let (line, column) = match err.line_col {
        pest::error::LineColLocation::Pos((l, c)) => (l, c),
        pest::error::LineColLocation::Span((l, c), _) => (l, c),
    };
    Diagnostic::error(Pos::new(line, column), err.variant.message().to_string())
}

/// Pull the next significant pair, skipping keyword tokens
fn take<'i>(pairs: &mut Pairs<'i, Rule>, at: Pos) -> PResult<Pair<'i, Rule>> {
    pairs
        .find(|p| !is_keyword(p.as_rule()))
        .ok_or_else(|| Diagnostic::error(at, "malformed syntax tree"))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_if
            | Rule::kw_else
            | Rule::kw_for
            | Rule::kw_while
            | Rule::kw_do
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_return
            | Rule::kw_sizeof
            | Rule::kw_attribute
    )
}

/// Parse preprocessed source into an unchecked module
pub fn parse(source: &str) -> PResult<Module> {
    let pairs = ClcParser::parse(Rule::translation_unit, source).map_err(from_pest_error)?;
    let mut module = Module::default();
    for pair in pairs.flat_map(|p| p.into_inner()) {
        match pair.as_rule() {
            Rule::function_def | Rule::function_proto => {
                module.functions.push(parse_function(pair)?);
            }
            Rule::global_decl => {
                for decl in parse_declaration(pair)? {
                    module.globals.push(GlobalVar { decl });
                }
            }
            _ => {}
        }
    }
    Ok(module)
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Default)]
struct Specifiers {
    is_kernel: bool,
    space: Option<AddressSpace>,
    is_const: bool,
    is_volatile: bool,
    is_restrict: bool,
    /// `None` for `void`
    base: Option<ScalarType>,
    reqd_work_group_size: Option<[usize; 3]>,
}

fn parse_specifiers(pair: Pair<Rule>) -> PResult<Specifiers> {
    let mut specs = Specifiers::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::qualifier => apply_qualifier(&mut specs, p)?,
            Rule::attribute => apply_attribute(&mut specs, p)?,
            Rule::type_name => specs.base = parse_type_name(p)?,
            _ => {}
        }
    }
    Ok(specs)
}

fn apply_qualifier(specs: &mut Specifiers, pair: Pair<Rule>) -> PResult<()> {
    let pos = pos_of(&pair);
    let kw = take(&mut pair.into_inner(), pos)?;
    let space = match kw.as_rule() {
        Rule::kw_kernel => {
            specs.is_kernel = true;
            None
        }
        Rule::kw_global => Some(AddressSpace::Global),
        Rule::kw_local => Some(AddressSpace::Local),
        Rule::kw_constant => Some(AddressSpace::Constant),
        Rule::kw_private => Some(AddressSpace::Private),
        Rule::kw_const => {
            specs.is_const = true;
            None
        }
        Rule::kw_volatile => {
            specs.is_volatile = true;
            None
        }
        Rule::kw_restrict => {
            specs.is_restrict = true;
            None
        }
        _ => None,
    };
    if let Some(space) = space {
        match specs.space {
            Some(prev) if prev != space => {
                return Err(Diagnostic::error(
                    pos,
                    format!(
                        "conflicting address spaces '{}' and '{}'",
                        prev.name(),
                        space.name()
                    ),
                ));
            }
            _ => specs.space = Some(space),
        }
    }
    Ok(())
}

fn apply_attribute(specs: &mut Specifiers, pair: Pair<Rule>) -> PResult<()> {
    for item in pair.into_inner().filter(|p| p.as_rule() == Rule::attr_item) {
        let pos = pos_of(&item);
        let mut inner = item.into_inner();
        let name = take(&mut inner, pos)?;
        let name = name.as_str().trim_matches('_');
        if name != "reqd_work_group_size" {
            log::debug!("ignoring attribute '{}'", name);
            continue;
        }
        let dims = inner
            .map(|e| {
                let e = parse_expr(e)?;
                e.const_int()
                    .filter(|v| *v > 0)
                    .map(|v| v as usize)
                    .ok_or_else(|| {
                        Diagnostic::error(
                            e.pos,
                            "reqd_work_group_size expects positive integer constants",
                        )
                    })
            })
            .collect::<PResult<Vec<usize>>>()?;
        let dims: [usize; 3] = dims.try_into().map_err(|_| {
            Diagnostic::error(pos, "reqd_work_group_size expects three arguments")
        })?;
        specs.reqd_work_group_size = Some(dims);
    }
    Ok(())
}

fn parse_type_name(pair: Pair<Rule>) -> PResult<Option<ScalarType>> {
    let pos = pos_of(&pair);
    let inner = take(&mut pair.into_inner(), pos)?;
    match inner.as_rule() {
        Rule::signed_type => {
            let mut parts = inner.into_inner();
            let unsigned = parts
                .next()
                .is_some_and(|p| p.as_rule() == Rule::kw_unsigned);
            let width = parts.next().map(|p| p.as_str()).unwrap_or("int");
            let ty = match width {
                "char" => ScalarType::Char,
                "short" => ScalarType::Short,
                "long" => ScalarType::Long,
                _ => ScalarType::Int,
            };
            Ok(Some(if unsigned { ty.to_unsigned() } else { ty }))
        }
        Rule::base_type => {
            let mut parts = inner.into_inner();
            let name = take(&mut parts, pos)?.as_str();
            if let Some(width) = parts.next() {
                return Err(Diagnostic::error(
                    pos,
                    format!(
                        "vector type '{}{}' is not supported",
                        name,
                        width.as_str()
                    ),
                ));
            }
            match name {
                "void" => Ok(None),
                "half" => Err(Diagnostic::error(pos, "type 'half' is not supported")),
                other => ScalarType::from_name(other)
                    .map(Some)
                    .ok_or_else(|| Diagnostic::error(pos, format!("unknown type '{}'", other))),
            }
        }
        _ => Err(Diagnostic::error(pos, "expected a type")),
    }
}

/// Pointer-declarator qualifiers: (const, volatile, restrict) on the pointer value
fn pointer_qualifiers(pointers: &[Pair<Rule>]) -> (bool, bool, bool) {
    let mut quals = (false, false, false);
    for kw in pointers.iter().flat_map(|p| p.clone().into_inner()) {
        let kw = kw.into_inner().next().map(|k| k.as_rule());
        match kw {
            Some(Rule::kw_const) => quals.0 = true,
            Some(Rule::kw_volatile) => quals.1 = true,
            Some(Rule::kw_restrict) => quals.2 = true,
            _ => {}
        }
    }
    quals
}

/// Build the declared type from specifiers and pointer declarators
fn declared_type(specs: &Specifiers, pointers: usize, pos: Pos) -> PResult<Type> {
    match (specs.base, pointers) {
        (None, 0) => Ok(Type::Void),
        (None, _) => Err(Diagnostic::error(pos, "'void' pointers are not supported")),
        (Some(elem), 0) => Ok(Type::Scalar(elem)),
        (Some(elem), 1) => Ok(Type::Pointer(PtrType {
            elem,
            space: specs.space.unwrap_or_default(),
            is_const: specs.is_const || specs.space == Some(AddressSpace::Constant),
        })),
        (Some(_), _) => Err(Diagnostic::error(
            pos,
            "pointers to pointers are not supported",
        )),
    }
}

fn parse_type_ref(pair: Pair<Rule>) -> PResult<Type> {
    let pos = pos_of(&pair);
    let mut inner = pair.into_inner();
    let specs = parse_specifiers(take(&mut inner, pos)?)?;
    let pointers = inner.filter(|p| p.as_rule() == Rule::pointer).count();
    declared_type(&specs, pointers, pos)
}

// ============================================================================
// Declarations
// ============================================================================

fn parse_function(pair: Pair<Rule>) -> PResult<Function> {
    let pos = pos_of(&pair);
    let mut specs = Specifiers::default();
    let mut pointers = 0;
    let mut name = String::new();
    let mut name_pos = pos;
    let mut params = Vec::new();
    let mut body = None;

    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::decl_specifiers => specs = parse_specifiers(p)?,
            Rule::pointer => pointers += 1,
            Rule::ident => {
                check_reserved_keyword(p.as_str(), &p)?;
                name = p.as_str().to_string();
                name_pos = pos_of(&p);
            }
            Rule::params => {
                for param in p.into_inner().filter(|p| p.as_rule() == Rule::param) {
                    params.push(parse_param(param)?);
                }
            }
            Rule::block => body = Some(parse_block(p)?),
            _ => {}
        }
    }

    if specs.space.is_some() && pointers == 0 {
        return Err(Diagnostic::error(
            pos,
            format!("function '{}' cannot return an address-space qualified value", name),
        ));
    }
    if specs.reqd_work_group_size.is_some() && !specs.is_kernel {
        return Err(Diagnostic::error(
            pos,
            "reqd_work_group_size applies only to kernels",
        ));
    }
    Ok(Function {
        ret: declared_type(&specs, pointers, pos)?,
        name,
        params,
        body,
        is_kernel: specs.is_kernel,
        reqd_work_group_size: specs.reqd_work_group_size,
        local_arrays: Vec::new(),
        uses_barrier: false,
        pos: name_pos,
    })
}

fn parse_param(pair: Pair<Rule>) -> PResult<Param> {
    let pos = pos_of(&pair);
    let mut specs = Specifiers::default();
    let mut pointers = Vec::new();
    let mut name = String::new();
    let mut is_array = false;

    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::decl_specifiers => specs = parse_specifiers(p)?,
            Rule::pointer => pointers.push(p),
            Rule::ident => {
                check_reserved_keyword(p.as_str(), &p)?;
                name = p.as_str().to_string();
            }
            Rule::param_array => is_array = true,
            _ => {}
        }
    }

    let (ptr_const, ptr_volatile, ptr_restrict) = pointer_qualifiers(&pointers);
    let depth = pointers.len() + usize::from(is_array);
    let ty = declared_type(&specs, depth, pos)?;
    let is_pointer = ty.is_pointer_like();
    Ok(Param {
        name,
        ty,
        is_const: if is_pointer { ptr_const } else { specs.is_const },
        is_volatile: if is_pointer { ptr_volatile } else { specs.is_volatile },
        is_restrict: ptr_restrict || (is_pointer && specs.is_restrict),
        pos,
    })
}

/// `decl_specifiers init_declarator ("," init_declarator)*`
fn parse_declaration(pair: Pair<Rule>) -> PResult<Vec<VarDecl>> {
    let pos = pos_of(&pair);
    let mut inner = pair.into_inner();
    let specs = parse_specifiers(take(&mut inner, pos)?)?;
    if specs.is_kernel {
        return Err(Diagnostic::error(pos, "'kernel' can only qualify a function"));
    }
    if specs.base.is_none() {
        return Err(Diagnostic::error(pos, "variable declared 'void'"));
    }
    inner
        .filter(|p| p.as_rule() == Rule::init_declarator)
        .map(|p| parse_init_declarator(&specs, p))
        .collect()
}

fn parse_init_declarator(specs: &Specifiers, pair: Pair<Rule>) -> PResult<VarDecl> {
    let pos = pos_of(&pair);
    let mut inner = pair.into_inner();
    let declarator = take(&mut inner, pos)?;
    let init = inner.next().map(parse_initializer).transpose()?;

    let mut pointers = Vec::new();
    let mut name = String::new();
    let mut name_pos = pos;
    let mut len_expr = None;
    for p in declarator.into_inner() {
        match p.as_rule() {
            Rule::pointer => pointers.push(p),
            Rule::ident => {
                check_reserved_keyword(p.as_str(), &p)?;
                name = p.as_str().to_string();
                name_pos = pos_of(&p);
            }
            Rule::array_suffix => {
                let expr = take(&mut p.into_inner(), pos)?;
                len_expr = Some(parse_expr(expr)?);
            }
            _ => {}
        }
    }

    let space = specs.space.unwrap_or_default();
    let (ptr_const, _, _) = pointer_qualifiers(&pointers);
    let ty = match (&len_expr, pointers.len()) {
        (Some(_), 0) => match specs.base {
            Some(elem) => Type::Array {
                elem,
                len: 0,
                space,
            },
            None => return Err(Diagnostic::error(name_pos, "array of 'void'")),
        },
        (Some(_), _) => {
            return Err(Diagnostic::error(
                name_pos,
                "arrays of pointers are not supported",
            ));
        }
        (None, depth) => {
            // A pointer variable lives in private memory; its pointee carries the space
            declared_type(specs, depth, name_pos)?
        }
    };
    let (is_const, space) = match ty {
        Type::Pointer(_) => (ptr_const, AddressSpace::Private),
        _ => (
            specs.is_const || space == AddressSpace::Constant,
            space,
        ),
    };
    Ok(VarDecl {
        name,
        ty,
        space,
        is_const,
        len_expr,
        init,
        local_slot: None,
        pos: name_pos,
    })
}

fn parse_initializer(pair: Pair<Rule>) -> PResult<Init> {
    let pos = pos_of(&pair);
    let inner = take(&mut pair.into_inner(), pos)?;
    match inner.as_rule() {
        Rule::init_list => {
            let items = inner
                .into_inner()
                .map(|item| {
                    let item_pos = pos_of(&item);
                    match parse_initializer(item)? {
                        Init::Expr(e) => Ok(e),
                        Init::List(_) => Err(Diagnostic::error(
                            item_pos,
                            "nested initializer lists are not supported",
                        )),
                    }
                })
                .collect::<PResult<Vec<Expr>>>()?;
            Ok(Init::List(items))
        }
        _ => Ok(Init::Expr(parse_expr(inner)?)),
    }
}

// ============================================================================
// Statements
// ============================================================================

fn parse_block(pair: Pair<Rule>) -> PResult<Vec<Stmt>> {
    pair.into_inner().map(parse_statement).collect()
}

fn parse_statement(pair: Pair<Rule>) -> PResult<Stmt> {
    let pos = pos_of(&pair);
    let stmt = if pair.as_rule() == Rule::statement {
        take(&mut pair.into_inner(), pos)?
    } else {
        pair
    };
    let mut inner = stmt.clone().into_inner();

    Ok(match stmt.as_rule() {
        Rule::block => Stmt::Block(parse_block(stmt)?),
        Rule::if_stmt => {
            let cond = parse_expr(take(&mut inner, pos)?)?;
            let then = parse_statement(take(&mut inner, pos)?)?;
            let otherwise = inner
                .find(|p| p.as_rule() == Rule::statement)
                .map(parse_statement)
                .transpose()?;
            Stmt::If(cond, Box::new(then), otherwise.map(Box::new))
        }
        Rule::for_stmt => {
            let mut init = None;
            let mut cond = None;
            let mut step = None;
            let mut body = None;
            for p in inner {
                match p.as_rule() {
                    Rule::for_init => {
                        let s = parse_statement(take(&mut p.into_inner(), pos)?)?;
                        if s != Stmt::Empty {
                            init = Some(Box::new(s));
                        }
                    }
                    Rule::for_cond => cond = Some(parse_expr(take(&mut p.into_inner(), pos)?)?),
                    Rule::for_step => step = Some(parse_expr(take(&mut p.into_inner(), pos)?)?),
                    Rule::statement => body = Some(parse_statement(p)?),
                    _ => {}
                }
            }
            let body = body.ok_or_else(|| Diagnostic::error(pos, "missing loop body"))?;
            Stmt::For {
                init,
                cond,
                step,
                body: Box::new(body),
            }
        }
        Rule::while_stmt => {
            let cond = parse_expr(take(&mut inner, pos)?)?;
            let body = parse_statement(take(&mut inner, pos)?)?;
            Stmt::While(cond, Box::new(body))
        }
        Rule::do_stmt => {
            let body = parse_statement(take(&mut inner, pos)?)?;
            let cond = parse_expr(take(&mut inner, pos)?)?;
            Stmt::DoWhile(Box::new(body), cond)
        }
        Rule::break_stmt => Stmt::Break(pos),
        Rule::continue_stmt => Stmt::Continue(pos),
        Rule::return_stmt => {
            let value = inner
                .find(|p| p.as_rule() == Rule::expr)
                .map(parse_expr)
                .transpose()?;
            Stmt::Return(value, pos)
        }
        Rule::decl_stmt => Stmt::Decl(parse_declaration(stmt)?),
        Rule::expr_stmt => Stmt::Expr(parse_expr(take(&mut inner, pos)?)?),
        Rule::empty_stmt => Stmt::Empty,
        other => {
            return Err(Diagnostic::error(
                pos,
                format!("unexpected {:?} in statement position", other),
            ));
        }
    })
}

// ============================================================================
// Expressions
// ============================================================================

fn parse_expr(pair: Pair<Rule>) -> PResult<Expr> {
    let pos = pos_of(&pair);
    match pair.as_rule() {
        Rule::expr => parse_expr(take(&mut pair.into_inner(), pos)?),
        Rule::assignment => {
            let mut inner = pair.into_inner();
            let target = parse_expr(take(&mut inner, pos)?)?;
            let Some(op) = inner.next() else {
                return Ok(target);
            };
            let value = parse_expr(take(&mut inner, pos)?)?;
            let op = match op.as_str() {
                "=" => None,
                "+=" => Some(BinaryOp::Add),
                "-=" => Some(BinaryOp::Sub),
                "*=" => Some(BinaryOp::Mul),
                "/=" => Some(BinaryOp::Div),
                "%=" => Some(BinaryOp::Rem),
                "<<=" => Some(BinaryOp::Shl),
                ">>=" => Some(BinaryOp::Shr),
                "&=" => Some(BinaryOp::BitAnd),
                "|=" => Some(BinaryOp::BitOr),
                "^=" => Some(BinaryOp::BitXor),
                other => {
                    return Err(Diagnostic::error(
                        pos_of(&op),
                        format!("unknown assignment operator '{}'", other),
                    ));
                }
            };
            Ok(Expr::new(
                ExprKind::Assign(op, Box::new(target), Box::new(value)),
                pos,
            ))
        }
        Rule::conditional => {
            let mut inner = pair.into_inner();
            let cond = parse_expr(take(&mut inner, pos)?)?;
            let Some(then) = inner.next() else {
                return Ok(cond);
            };
            let then = parse_expr(then)?;
            let otherwise = parse_expr(take(&mut inner, pos)?)?;
            Ok(Expr::new(
                ExprKind::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
                pos,
            ))
        }
        Rule::binary => parse_binary(pair.into_inner()),
        _ => parse_primary(pair),
    }
}

fn parse_binary(pairs: Pairs<Rule>) -> PResult<Expr> {
    PRATT
        .map_primary(parse_primary)
        .map_prefix(|op, rhs| {
            let rhs = Box::new(rhs?);
            let pos = pos_of(&op);
            let kind = match op.as_rule() {
                Rule::cast => {
                    let ty = parse_type_ref(take(&mut op.into_inner(), pos)?)?;
                    ExprKind::Cast(ty, rhs)
                }
                Rule::pre_inc | Rule::pre_dec => ExprKind::IncDec {
                    increment: op.as_rule() == Rule::pre_inc,
                    prefix: true,
                    target: rhs,
                },
                Rule::neg => ExprKind::Unary(UnaryOp::Neg, rhs),
                Rule::plus => ExprKind::Unary(UnaryOp::Plus, rhs),
                Rule::not => ExprKind::Unary(UnaryOp::Not, rhs),
                Rule::bit_not => ExprKind::Unary(UnaryOp::BitNot, rhs),
                Rule::deref => ExprKind::Deref(rhs),
                Rule::addr_of => ExprKind::AddrOf(rhs),
                other => {
                    return Err(Diagnostic::error(
                        pos,
                        format!("unexpected prefix {:?}", other),
                    ));
                }
            };
            Ok(Expr::new(kind, pos))
        })
        .map_postfix(|lhs, op| {
            let lhs = Box::new(lhs?);
            let pos = pos_of(&op);
            let kind = match op.as_rule() {
                Rule::index => {
                    let index = parse_expr(take(&mut op.into_inner(), pos)?)?;
                    ExprKind::Index(lhs, Box::new(index))
                }
                Rule::post_inc | Rule::post_dec => ExprKind::IncDec {
                    increment: op.as_rule() == Rule::post_inc,
                    prefix: false,
                    target: lhs,
                },
                other => {
                    return Err(Diagnostic::error(
                        pos,
                        format!("unexpected postfix {:?}", other),
                    ));
                }
            };
            Ok(Expr::new(kind, pos))
        })
        .map_infix(|lhs, op, rhs| {
            let pos = pos_of(&op);
            let op = match op.as_rule() {
                Rule::op_lor => BinaryOp::LogicalOr,
                Rule::op_land => BinaryOp::LogicalAnd,
                Rule::op_bor => BinaryOp::BitOr,
                Rule::op_bxor => BinaryOp::BitXor,
                Rule::op_band => BinaryOp::BitAnd,
                Rule::op_eq => BinaryOp::Eq,
                Rule::op_ne => BinaryOp::Ne,
                Rule::op_lt => BinaryOp::Lt,
                Rule::op_le => BinaryOp::Le,
                Rule::op_gt => BinaryOp::Gt,
                Rule::op_ge => BinaryOp::Ge,
                Rule::op_shl => BinaryOp::Shl,
                Rule::op_shr => BinaryOp::Shr,
                Rule::op_add => BinaryOp::Add,
                Rule::op_sub => BinaryOp::Sub,
                Rule::op_mul => BinaryOp::Mul,
                Rule::op_div => BinaryOp::Div,
                Rule::op_mod => BinaryOp::Rem,
                other => {
                    return Err(Diagnostic::error(
                        pos,
                        format!("unexpected operator {:?}", other),
                    ));
                }
            };
            Ok(Expr::new(
                ExprKind::Binary(op, Box::new(lhs?), Box::new(rhs?)),
                pos,
            ))
        })
        .parse(pairs)
}

fn parse_primary(pair: Pair<Rule>) -> PResult<Expr> {
    let pos = pos_of(&pair);
    match pair.as_rule() {
        Rule::paren => parse_expr(take(&mut pair.into_inner(), pos)?),
        Rule::ident => {
            check_reserved_keyword(pair.as_str(), &pair)?;
            Ok(Expr::new(ExprKind::Var(pair.as_str().to_string()), pos))
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = take(&mut inner, pos)?;
            check_reserved_keyword(name.as_str(), &name)?;
            let args = inner.map(parse_expr).collect::<PResult<Vec<_>>>()?;
            Ok(Expr::new(
                ExprKind::Call {
                    name: name.as_str().to_string(),
                    args,
                    target: CallTarget::Unresolved,
                },
                pos,
            ))
        }
        Rule::sizeof_expr => {
            let operand = take(&mut pair.into_inner(), pos)?;
            let kind = match operand.as_rule() {
                Rule::type_ref => ExprKind::SizeOf(parse_type_ref(operand)?),
                _ => ExprKind::SizeOfExpr(Box::new(parse_expr(operand)?)),
            };
            Ok(Expr::new(kind, pos))
        }
        Rule::int_lit => parse_int_literal(pair.as_str(), pos),
        Rule::float_lit => parse_float_literal(pair.as_str(), pos),
        Rule::char_lit => parse_char_literal(pair.as_str(), pos),
        other => Err(Diagnostic::error(
            pos,
            format!("unexpected {:?} in expression", other),
        )),
    }
}

/// Type an integer literal from its suffix and magnitude
fn parse_int_literal(text: &str, pos: Pos) -> PResult<Expr> {
    let value = parse_int(text)
        .ok_or_else(|| Diagnostic::error(pos, format!("integer literal '{}' is too large", text)))?;
    let suffix = text.trim_start_matches(|c: char| !matches!(c, 'u' | 'U' | 'l' | 'L'));
    let unsigned = suffix.contains(['u', 'U']);
    let long = suffix.contains(['l', 'L']);
    let decimal = !(text.starts_with('0') && text.len() > 1);

    let ty = if long {
        if unsigned || value > i64::MAX as u64 {
            ScalarType::ULong
        } else {
            ScalarType::Long
        }
    } else if unsigned {
        if value <= u32::MAX as u64 {
            ScalarType::UInt
        } else {
            ScalarType::ULong
        }
    } else if value <= i32::MAX as u64 {
        ScalarType::Int
    } else if !decimal && value <= u32::MAX as u64 {
        ScalarType::UInt
    } else if value <= i64::MAX as u64 {
        ScalarType::Long
    } else {
        ScalarType::ULong
    };
    Ok(Expr::typed(ExprKind::IntLit(value), Type::Scalar(ty), pos))
}

fn parse_float_literal(text: &str, pos: Pos) -> PResult<Expr> {
    let digits = text.trim_end_matches(['f', 'F', 'h', 'H']);
    let single = digits.len() != text.len();
    let value: f64 = digits
        .parse()
        .map_err(|_| Diagnostic::error(pos, format!("invalid float literal '{}'", text)))?;
    let ty = if single {
        ScalarType::Float
    } else {
        ScalarType::Double
    };
    Ok(Expr::typed(ExprKind::FloatLit(value), Type::Scalar(ty), pos))
}

fn parse_char_literal(text: &str, pos: Pos) -> PResult<Expr> {
    let body = &text[1..text.len() - 1];
    let value = match body.strip_prefix('\\') {
        None => body.chars().next().map(|c| c as u64),
        Some(escape) => match escape {
            "n" => Some(b'\n' as u64),
            "t" => Some(b'\t' as u64),
            "r" => Some(b'\r' as u64),
            "0" => Some(0),
            "\\" => Some(b'\\' as u64),
            "'" => Some(b'\'' as u64),
            "\"" => Some(b'"' as u64),
            _ => None,
        },
    }
    .ok_or_else(|| Diagnostic::error(pos, format!("unsupported character literal {}", text)))?;
    Ok(Expr::typed(ExprKind::IntLit(value), Type::INT, pos))
}
