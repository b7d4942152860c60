//! Constructor helpers for assembling trees without a parser.
//!
//! Every helper produces nodes with fresh ids and an empty span. Use
//! [`At::at`] to attach a byte span or [`At::on_line`] together with
//! [`module`] to place a node on a synthetic source line.

use smol_str::SmolStr;

use super::{
    Module,
    node::{
        Alias, Arg, BinaryOp, BoolOp, ClassDef, CompareOp, Comprehension, ExceptHandler, Expr,
        ExprKind, FunctionDef, Param, Parameters, Stmt, StmtKind, UnaryOp, WithItem,
    },
};
use crate::{
    constant::Constant,
    range::{LineIndex, Span},
};

/// Byte width of one synthetic line used by [`At::on_line`].
pub const LINE_WIDTH: u32 = 1000;

pub trait At: Sized {
    fn at(self, start: u32, end: u32) -> Self;

    /// Places the node at the start of the 1-based synthetic `line`.
    fn on_line(self, line: u32) -> Self {
        let start = line.saturating_sub(1) * LINE_WIDTH;
        self.at(start, start + 1)
    }
}

impl At for Expr {
    fn at(mut self, start: u32, end: u32) -> Self {
        self.span = Span::new(start, end);
        self
    }
}

impl At for Stmt {
    fn at(mut self, start: u32, end: u32) -> Self {
        self.span = Span::new(start, end);
        self
    }
}

/// A module whose line index matches [`At::on_line`].
pub fn module(body: Vec<Stmt>) -> Module {
    let max_end = body.iter().map(|s| s.span.end).max().unwrap_or(0);
    let lines = max_end / LINE_WIDTH + 2;
    let line_index = LineIndex::new((0..lines).map(|l| l * LINE_WIDTH).collect());
    Module::new(body, line_index)
}

fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, Span::default())
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Span::default())
}

pub fn constant(value: Constant) -> Expr {
    expr(ExprKind::Constant(value))
}

pub fn none() -> Expr {
    constant(Constant::None)
}

pub fn bool_(value: bool) -> Expr {
    constant(Constant::Bool(value))
}

pub fn int(value: i64) -> Expr {
    constant(Constant::Int(value))
}

pub fn float(value: f64) -> Expr {
    constant(Constant::Float(value))
}

pub fn str_(value: &str) -> Expr {
    constant(Constant::str(value))
}

pub fn name(id: &str) -> Expr {
    expr(ExprKind::Name(SmolStr::new(id)))
}

pub fn attr(value: Expr, attr: &str) -> Expr {
    expr(ExprKind::Attribute {
        value: Box::new(value),
        attr: SmolStr::new(attr),
    })
}

pub fn subscript(value: Expr, index: Expr) -> Expr {
    expr(ExprKind::Subscript {
        value: Box::new(value),
        index: Box::new(index),
    })
}

pub fn slice(lower: Option<Expr>, upper: Option<Expr>, step: Option<Expr>) -> Expr {
    expr(ExprKind::Slice {
        lower: lower.map(Box::new),
        upper: upper.map(Box::new),
        step: step.map(Box::new),
    })
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    expr(ExprKind::Tuple(items))
}

pub fn list(items: Vec<Expr>) -> Expr {
    expr(ExprKind::List(items))
}

pub fn set(items: Vec<Expr>) -> Expr {
    expr(ExprKind::Set(items))
}

pub fn dict(entries: Vec<(Expr, Expr)>) -> Expr {
    expr(ExprKind::Dict(entries))
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    expr(ExprKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    expr(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn and_(values: Vec<Expr>) -> Expr {
    expr(ExprKind::BoolOp {
        op: BoolOp::And,
        values,
    })
}

pub fn or_(values: Vec<Expr>) -> Expr {
    expr(ExprKind::BoolOp {
        op: BoolOp::Or,
        values,
    })
}

pub fn compare(left: Expr, comparisons: Vec<(CompareOp, Expr)>) -> Expr {
    expr(ExprKind::Compare {
        left: Box::new(left),
        comparisons,
    })
}

pub fn if_exp(test: Expr, body: Expr, orelse: Expr) -> Expr {
    expr(ExprKind::IfExp {
        test: Box::new(test),
        body: Box::new(body),
        orelse: Box::new(orelse),
    })
}

pub fn call(func: Expr, args: Vec<Arg>) -> Expr {
    expr(ExprKind::Call {
        func: Box::new(func),
        args,
    })
}

pub fn pos(value: Expr) -> Arg {
    Arg::Positional(value)
}

pub fn star_arg(value: Expr) -> Arg {
    Arg::Star(value)
}

pub fn kw(name: &str, value: Expr) -> Arg {
    Arg::Keyword(SmolStr::new(name), value)
}

pub fn double_star(value: Expr) -> Arg {
    Arg::DoubleStar(value)
}

pub fn lambda(params: Parameters, body: Expr) -> Expr {
    expr(ExprKind::Lambda {
        params: Box::new(params),
        body: Box::new(body),
    })
}

pub fn comp_for(target: Expr, iter: Expr, ifs: Vec<Expr>) -> Comprehension {
    Comprehension { target, iter, ifs }
}

pub fn list_comp(elt: Expr, generators: Vec<Comprehension>) -> Expr {
    expr(ExprKind::ListComp {
        elt: Box::new(elt),
        generators,
    })
}

pub fn set_comp(elt: Expr, generators: Vec<Comprehension>) -> Expr {
    expr(ExprKind::SetComp {
        elt: Box::new(elt),
        generators,
    })
}

pub fn dict_comp(key: Expr, value: Expr, generators: Vec<Comprehension>) -> Expr {
    expr(ExprKind::DictComp {
        key: Box::new(key),
        value: Box::new(value),
        generators,
    })
}

pub fn gen_exp(elt: Expr, generators: Vec<Comprehension>) -> Expr {
    expr(ExprKind::GeneratorExp {
        elt: Box::new(elt),
        generators,
    })
}

pub fn yield_(value: Option<Expr>) -> Expr {
    expr(ExprKind::Yield(value.map(Box::new)))
}

pub fn starred(value: Expr) -> Expr {
    expr(ExprKind::Starred(Box::new(value)))
}

pub fn joined_str(parts: Vec<Expr>) -> Expr {
    expr(ExprKind::JoinedStr(parts))
}

pub fn param(name: &str) -> Param {
    Param {
        name: SmolStr::new(name),
        span: Span::default(),
        default: None,
        annotation: None,
    }
}

pub fn param_default(name: &str, default: Expr) -> Param {
    Param {
        default: Some(default),
        ..param(name)
    }
}

/// Plain positional parameters.
pub fn params(names: &[&str]) -> Parameters {
    Parameters {
        args: names.iter().map(|n| param(n)).collect(),
        ..Parameters::default()
    }
}

pub fn expr_stmt(value: Expr) -> Stmt {
    stmt(StmtKind::Expr(value))
}

pub fn pass() -> Stmt {
    stmt(StmtKind::Pass)
}

pub fn assign(targets: Vec<Expr>, value: Expr) -> Stmt {
    stmt(StmtKind::Assign { targets, value })
}

pub fn aug_assign(target: Expr, op: BinaryOp, value: Expr) -> Stmt {
    stmt(StmtKind::AugAssign { target, op, value })
}

pub fn del(targets: Vec<Expr>) -> Stmt {
    stmt(StmtKind::Del(targets))
}

pub fn ret(value: Option<Expr>) -> Stmt {
    stmt(StmtKind::Return(value))
}

pub fn break_() -> Stmt {
    stmt(StmtKind::Break)
}

pub fn continue_() -> Stmt {
    stmt(StmtKind::Continue)
}

pub fn global(names: &[&str]) -> Stmt {
    stmt(StmtKind::Global(names.iter().map(|n| SmolStr::new(n)).collect()))
}

pub fn nonlocal(names: &[&str]) -> Stmt {
    stmt(StmtKind::Nonlocal(names.iter().map(|n| SmolStr::new(n)).collect()))
}

pub fn if_(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::If { test, body, orelse })
}

pub fn while_(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::While { test, body, orelse })
}

pub fn for_(target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::For {
        target,
        iter,
        body,
        orelse,
    })
}

pub fn try_(
    body: Vec<Stmt>,
    handlers: Vec<ExceptHandler>,
    orelse: Vec<Stmt>,
    finalbody: Vec<Stmt>,
) -> Stmt {
    stmt(StmtKind::Try {
        body,
        handlers,
        orelse,
        finalbody,
    })
}

pub fn handler(typ: Option<Expr>, name: Option<&str>, body: Vec<Stmt>) -> ExceptHandler {
    ExceptHandler {
        span: Span::default(),
        typ,
        name: name.map(SmolStr::new),
        body,
    }
}

pub fn with_(items: Vec<WithItem>, body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::With { items, body })
}

pub fn with_item(context: Expr, target: Option<Expr>) -> WithItem {
    WithItem { context, target }
}

pub fn raise(exc: Option<Expr>, cause: Option<Expr>) -> Stmt {
    stmt(StmtKind::Raise { exc, cause })
}

pub fn assert_(test: Expr, msg: Option<Expr>) -> Stmt {
    stmt(StmtKind::Assert { test, msg })
}

pub fn alias(name: &str, asname: Option<&str>) -> Alias {
    Alias {
        name: SmolStr::new(name),
        asname: asname.map(SmolStr::new),
    }
}

pub fn import(names: Vec<Alias>) -> Stmt {
    stmt(StmtKind::Import(names))
}

pub fn import_from(module: Option<&str>, names: Vec<Alias>, level: u32) -> Stmt {
    stmt(StmtKind::ImportFrom {
        module: module.map(SmolStr::new),
        names,
        level,
    })
}

pub fn import_star(module: &str) -> Stmt {
    import_from(Some(module), vec![alias(Alias::STAR, None)], 0)
}

pub fn def(name: &str, params: Parameters, body: Vec<Stmt>) -> Stmt {
    decorated_def(name, params, body, Vec::new())
}

pub fn decorated_def(name: &str, params: Parameters, body: Vec<Stmt>, decorators: Vec<Expr>) -> Stmt {
    stmt(StmtKind::FunctionDef(Box::new(FunctionDef {
        name: SmolStr::new(name),
        params,
        body,
        decorators,
        returns: None,
    })))
}

pub fn class(name: &str, bases: Vec<Expr>, body: Vec<Stmt>) -> Stmt {
    decorated_class(name, bases, body, Vec::new())
}

pub fn decorated_class(name: &str, bases: Vec<Expr>, body: Vec<Stmt>, decorators: Vec<Expr>) -> Stmt {
    stmt(StmtKind::ClassDef(Box::new(ClassDef {
        name: SmolStr::new(name),
        bases,
        body,
        decorators,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_line_matches_module_line_index() {
        let m = module(vec![pass().on_line(1), expr_stmt(name("x")).on_line(3)]);
        assert_eq!(m.line_of(m.body[0].span), 1);
        assert_eq!(m.line_of(m.body[1].span), 3);
    }

    #[test]
    fn test_params_in_slot_order() {
        let mut p = params(&["a", "b"]);
        p.vararg = Some(param("rest"));
        p.kwarg = Some(param("kw"));
        let names: Vec<_> = p.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "rest", "kw"]);
    }
}
