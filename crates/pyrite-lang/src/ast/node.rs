use std::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicU32, Ordering},
};

use smol_str::SmolStr;

use crate::{constant::Constant, range::Span};

pub type Name = SmolStr;
pub type Body = Vec<Stmt>;

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of an AST node. Binder and flow results are side tables keyed
/// by this id, so the tree itself never holds back-references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Allocates an id that is unique for the lifetime of the process.
    pub fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mult => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::LShift => "<<",
            BinaryOp::RShift => ">>",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtE => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtE => ">=",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Constant),
    Name(Name),
    Attribute {
        value: Box<Expr>,
        attr: Name,
    },
    /// `value[index]`; `index` is a `Slice` for slice syntax and a `Tuple`
    /// for comma-separated subscripts.
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        comparisons: Vec<(CompareOp, Expr)>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    Lambda {
        params: Box<Parameters>,
        body: Box<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Yield(Option<Box<Expr>>),
    Starred(Box<Expr>),
    /// An f-string: every part is converted with `str` and concatenated.
    JoinedStr(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Star(Expr),
    Keyword(Name, Expr),
    DoubleStar(Expr),
}

impl Arg {
    pub fn value(&self) -> &Expr {
        match self {
            Arg::Positional(e) | Arg::Star(e) | Arg::Keyword(_, e) | Arg::DoubleStar(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Name,
    pub span: Span,
    pub default: Option<Expr>,
    pub annotation: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters {
    pub args: Vec<Param>,
    pub vararg: Option<Param>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<Param>,
}

impl Parameters {
    /// Parameters in slot order: positional, `*args`, keyword-only, `**kwargs`.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.args
            .iter()
            .chain(self.vararg.iter())
            .chain(self.kwonly.iter())
            .chain(self.kwarg.iter())
    }

    pub fn first(&self) -> Option<&Param> {
        self.args.first()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Pass,
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinaryOp,
        value: Expr,
    },
    Del(Vec<Expr>),
    Return(Option<Expr>),
    Break,
    Continue,
    Global(Vec<Name>),
    Nonlocal(Vec<Name>),
    If {
        test: Expr,
        body: Body,
        orelse: Body,
    },
    While {
        test: Expr,
        body: Body,
        orelse: Body,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Body,
        orelse: Body,
    },
    Try {
        body: Body,
        handlers: Vec<ExceptHandler>,
        orelse: Body,
        finalbody: Body,
    },
    With {
        items: Vec<WithItem>,
        body: Body,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<Name>,
        names: Vec<Alias>,
        level: u32,
    },
    FunctionDef(Box<FunctionDef>),
    ClassDef(Box<ClassDef>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub span: Span,
    pub typ: Option<Expr>,
    pub name: Option<Name>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub target: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: Name,
    pub asname: Option<Name>,
}

impl Alias {
    pub const STAR: &'static str = "*";

    pub fn is_star(&self) -> bool {
        self.name == Self::STAR
    }

    /// Name bound in the importing scope: `c` for `import a.b as c`, `a` for `import a.b`.
    pub fn bound_name(&self) -> Name {
        match &self.asname {
            Some(asname) => asname.clone(),
            None => self
                .name
                .split('.')
                .next()
                .map(SmolStr::new)
                .unwrap_or_else(|| self.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Name,
    pub params: Parameters,
    pub body: Body,
    pub decorators: Vec<Expr>,
    pub returns: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: Name,
    pub bases: Vec<Expr>,
    pub body: Body,
    pub decorators: Vec<Expr>,
}

/// Leading string literal of a body, if any.
pub fn docstring(body: &[Stmt]) -> Option<&SmolStr> {
    match body.first().map(|s| &s.kind) {
        Some(StmtKind::Expr(Expr {
            kind: ExprKind::Constant(Constant::Str(s)),
            ..
        })) => Some(s),
        _ => None,
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            id: NodeId::fresh(),
            span,
            kind,
        }
    }

    /// Whether evaluating this node can raise, in which case the current
    /// line must be recorded before it runs.
    pub fn can_throw(&self) -> bool {
        match &self.kind {
            ExprKind::Constant(_) | ExprKind::Lambda { .. } => false,
            ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().any(Expr::can_throw),
            _ => true,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    pub fn as_name(&self) -> Option<&Name> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self {
            id: NodeId::fresh(),
            span,
            kind,
        }
    }

    pub fn can_throw(&self) -> bool {
        match &self.kind {
            StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_) => false,
            StmtKind::Expr(e) => e.can_throw(),
            StmtKind::Return(value) => value.as_ref().is_some_and(Expr::can_throw),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn name(s: &str) -> Expr {
        Expr::new(ExprKind::Name(s.into()), Span::default())
    }

    fn constant(c: Constant) -> Expr {
        Expr::new(ExprKind::Constant(c), Span::default())
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = NodeId::fresh();
        let b = NodeId::fresh();
        assert_ne!(a, b);
    }

    #[rstest]
    #[case::constant(constant(Constant::Int(1)), false)]
    #[case::name(name("x"), true)]
    #[case::literal_tuple(Expr::new(ExprKind::Tuple(vec![constant(Constant::Int(1))]), Span::default()), false)]
    #[case::tuple_of_names(Expr::new(ExprKind::Tuple(vec![name("x")]), Span::default()), true)]
    fn test_expr_can_throw(#[case] expr: Expr, #[case] expected: bool) {
        assert_eq!(expr.can_throw(), expected);
    }

    #[rstest]
    #[case::pass(StmtKind::Pass, false)]
    #[case::bare_return(StmtKind::Return(None), false)]
    #[case::return_name(StmtKind::Return(Some(name("x"))), true)]
    #[case::del(StmtKind::Del(vec![name("x")]), true)]
    fn test_stmt_can_throw(#[case] kind: StmtKind, #[case] expected: bool) {
        assert_eq!(Stmt::new(kind, Span::default()).can_throw(), expected);
    }

    #[rstest]
    #[case(Alias { name: "a.b".into(), asname: None }, "a")]
    #[case(Alias { name: "a.b".into(), asname: Some("c".into()) }, "c")]
    #[case(Alias { name: "os".into(), asname: None }, "os")]
    fn test_alias_bound_name(#[case] alias: Alias, #[case] expected: &str) {
        assert_eq!(alias.bound_name(), expected);
    }

    #[test]
    fn test_docstring() {
        let body = vec![Stmt::new(
            StmtKind::Expr(constant(Constant::str("doc"))),
            Span::default(),
        )];
        assert_eq!(docstring(&body).map(|s| s.as_str()), Some("doc"));
        assert!(docstring(&[]).is_none());
    }
}
