//! The lowered expression tree.
//!
//! Every construct evaluates to a value; statement-like nodes evaluate to
//! `None`. Variables are addressed by their resolved [`Storage`], never by a
//! scope lookup.

mod op;

use std::{fmt, sync::Arc};

use itertools::Itertools;
use smol_str::SmolStr;

pub use op::RuntimeOp;

use crate::{code::CodeObject, constant::Constant, scope::Storage};

pub type TempId = u32;
pub type LabelId = u32;
pub type YieldId = u32;
pub type TryId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct VarAccess {
    pub name: SmolStr,
    pub storage: Storage,
}

impl VarAccess {
    pub fn new(name: impl Into<SmolStr>, storage: Storage) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgKind {
    Positional,
    Star,
    Keyword(SmolStr),
    DoubleStar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub kind: ArgKind,
    pub value: Expr,
}

impl CallArg {
    pub fn positional(value: Expr) -> Self {
        Self {
            kind: ArgKind::Positional,
            value,
        }
    }
}

/// Catches any exception leaving `body` of the enclosing [`TryRegion`],
/// stores it in `exception` and runs `body`, which decides by itself
/// whether to rethrow.
#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    pub exception: TempId,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryRegion {
    pub id: TryId,
    pub body: Expr,
    pub handler: Option<Handler>,
    pub finally: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    pub code: Arc<CodeObject>,
    /// Defaults of the trailing positional parameters.
    pub defaults: Vec<Expr>,
    pub kw_defaults: Vec<(SmolStr, Expr)>,
    pub annotations: Vec<(SmolStr, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSpec {
    pub name: SmolStr,
    pub bases: Vec<Expr>,
    pub body: Arc<CodeObject>,
    /// Attribute names assigned through `self` in `__init__`.
    pub self_attrs: Vec<SmolStr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFlag {
    /// Stores the "line already recorded" flag in a temporary and clears it.
    Save(TempId),
    Restore(TempId),
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Constant),
    /// `guarded` requests an unbound check for `Local` storage; every other
    /// storage is always checked.
    Load {
        var: VarAccess,
        guarded: bool,
    },
    Store {
        var: VarAccess,
        value: Box<Expr>,
    },
    /// An unchecked delete silently leaves an unbound variable unbound.
    Delete {
        var: VarAccess,
        checked: bool,
    },
    Temp(TempId),
    SetTemp {
        temp: TempId,
        value: Box<Expr>,
    },
    Op {
        op: RuntimeOp,
        args: Vec<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<CallArg>,
    },
    /// Value of the last child, `None` when empty.
    Block(Vec<Expr>),
    If {
        test: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// Runs `body` until a `Break(break_label)`.
    Loop {
        body: Box<Expr>,
        break_label: LabelId,
        continue_label: LabelId,
    },
    Labeled {
        label: LabelId,
        body: Box<Expr>,
    },
    Break(LabelId),
    Continue(LabelId),
    Return(Box<Expr>),
    Try(Box<TryRegion>),
    Throw(Box<Expr>),
    /// Re-raises the exception currently being handled.
    Rethrow,
    MakeFunction(Box<FunctionSpec>),
    MakeClass(Box<ClassSpec>),
    /// Suspends the generator with `value`; evaluates to the sent value on
    /// resumption.
    Yield {
        id: YieldId,
        value: Box<Expr>,
    },
    /// Raises an exception injected by `throw()`/`close()` while suspended.
    GeneratorCheck,
    YieldBreak(Box<Expr>),
    SetLine(u32),
    LineFlag(LineFlag),
}

impl Expr {
    pub fn none() -> Self {
        Expr::Constant(Constant::None)
    }

    pub fn op(op: RuntimeOp, args: Vec<Expr>) -> Self {
        Expr::Op { op, args }
    }

    pub fn is_true(value: Expr) -> Self {
        Expr::op(RuntimeOp::IsTrue, vec![value])
    }

    pub fn temp(temp: TempId) -> Self {
        Expr::Temp(temp)
    }

    pub fn set_temp(temp: TempId, value: Expr) -> Self {
        Expr::SetTemp {
            temp,
            value: Box::new(value),
        }
    }

    pub fn store(var: VarAccess, value: Expr) -> Self {
        Expr::Store {
            var,
            value: Box::new(value),
        }
    }

    pub fn if_(test: Expr, then: Expr, orelse: Expr) -> Self {
        Expr::If {
            test: Box::new(test),
            then: Box::new(then),
            orelse: Box::new(orelse),
        }
    }

    /// A block, unwrapped when it has a single child.
    pub fn block(mut items: Vec<Expr>) -> Self {
        if items.len() == 1 {
            items.pop().unwrap_or_else(Expr::none)
        } else {
            Expr::Block(items)
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args: args.into_iter().map(CallArg::positional).collect(),
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expr::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Children a suspended generator can resume into, keyed by their step
    /// in a resumption path, or `None` for nodes that cannot be re-entered.
    ///
    /// Block items are keyed by position, `If` as test/then/orelse (0/1/2),
    /// `Try` as body/handler/finally (0/1/2), and the single child of
    /// `Loop`, `Labeled`, `Store` and `SetTemp` as 0.
    pub fn resumable_children(&self) -> Option<Vec<(u32, &Expr)>> {
        match self {
            Expr::Block(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (i as u32, e))
                    .collect(),
            ),
            Expr::If { test, then, orelse } => Some(vec![(0, test), (1, then), (2, orelse)]),
            Expr::Loop { body, .. } | Expr::Labeled { body, .. } => Some(vec![(0, body)]),
            Expr::Store { value, .. } | Expr::SetTemp { value, .. } => Some(vec![(0, value)]),
            Expr::Try(region) => {
                let mut out = vec![(0, &region.body)];
                out.extend(region.handler.as_ref().map(|h| (1, &h.body)));
                out.extend(region.finally.as_ref().map(|f| (2, f)));
                Some(out)
            }
            _ => None,
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant(_)
            | Expr::Load { .. }
            | Expr::Delete { .. }
            | Expr::Temp(_)
            | Expr::Break(_)
            | Expr::Continue(_)
            | Expr::Rethrow
            | Expr::GeneratorCheck
            | Expr::SetLine(_)
            | Expr::LineFlag(_) => Vec::new(),
            Expr::Store { value, .. }
            | Expr::SetTemp { value, .. }
            | Expr::Return(value)
            | Expr::Throw(value)
            | Expr::YieldBreak(value)
            | Expr::Yield { value, .. } => vec![value],
            Expr::Loop { body, .. } | Expr::Labeled { body, .. } => vec![body],
            Expr::Op { args, .. } | Expr::Block(args) => args.iter().collect(),
            Expr::Call { callee, args } => std::iter::once(&**callee)
                .chain(args.iter().map(|a| &a.value))
                .collect(),
            Expr::If { test, then, orelse } => vec![test, then, orelse],
            Expr::Try(region) => {
                let mut out = vec![&region.body];
                out.extend(region.handler.as_ref().map(|h| &h.body));
                out.extend(region.finally.as_ref());
                out
            }
            Expr::MakeFunction(spec) => spec
                .defaults
                .iter()
                .chain(spec.kw_defaults.iter().map(|(_, e)| e))
                .chain(spec.annotations.iter().map(|(_, e)| e))
                .collect(),
            Expr::MakeClass(spec) => spec.bases.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Constant(_)
            | Expr::Load { .. }
            | Expr::Delete { .. }
            | Expr::Temp(_)
            | Expr::Break(_)
            | Expr::Continue(_)
            | Expr::Rethrow
            | Expr::GeneratorCheck
            | Expr::SetLine(_)
            | Expr::LineFlag(_) => Vec::new(),
            Expr::Store { value, .. }
            | Expr::SetTemp { value, .. }
            | Expr::Return(value)
            | Expr::Throw(value)
            | Expr::YieldBreak(value)
            | Expr::Yield { value, .. } => vec![value],
            Expr::Loop { body, .. } | Expr::Labeled { body, .. } => vec![body],
            Expr::Op { args, .. } | Expr::Block(args) => args.iter_mut().collect(),
            Expr::Call { callee, args } => std::iter::once(&mut **callee)
                .chain(args.iter_mut().map(|a| &mut a.value))
                .collect(),
            Expr::If { test, then, orelse } => vec![test, then, orelse],
            Expr::Try(region) => {
                let TryRegion {
                    body,
                    handler,
                    finally,
                    ..
                } = &mut **region;
                let mut out = vec![body];
                out.extend(handler.as_mut().map(|h| &mut h.body));
                out.extend(finally.as_mut());
                out
            }
            Expr::MakeFunction(spec) => {
                let FunctionSpec {
                    defaults,
                    kw_defaults,
                    annotations,
                    ..
                } = &mut **spec;
                defaults
                    .iter_mut()
                    .chain(kw_defaults.iter_mut().map(|(_, e)| e))
                    .chain(annotations.iter_mut().map(|(_, e)| e))
                    .collect()
            }
            Expr::MakeClass(spec) => spec.bases.iter_mut().collect(),
        }
    }

    pub fn contains_yield(&self) -> bool {
        matches!(self, Expr::Yield { .. }) || self.children().into_iter().any(Expr::contains_yield)
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        1 + self.children().into_iter().map(Expr::size).sum::<usize>()
    }
}

impl fmt::Display for VarAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.storage)
    }
}

impl fmt::Display for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ArgKind::Positional => write!(f, "{}", self.value),
            ArgKind::Star => write!(f, "*{}", self.value),
            ArgKind::Keyword(name) => write!(f, "{name}={}", self.value),
            ArgKind::DoubleStar => write!(f, "**{}", self.value),
        }
    }
}

/// Compact s-expression form, used in logs and tests.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(c) => write!(f, "{c}"),
            Expr::Load { var, guarded } => {
                write!(f, "{var}")?;
                if *guarded {
                    write!(f, "!")?;
                }
                Ok(())
            }
            Expr::Store { var, value } => write!(f, "(= {var} {value})"),
            Expr::Delete { var, checked: true } => write!(f, "(del {var})"),
            Expr::Delete { var, checked: false } => write!(f, "(unbind {var})"),
            Expr::Temp(t) => write!(f, "${t}"),
            Expr::SetTemp { temp, value } => write!(f, "(= ${temp} {value})"),
            Expr::Op { op, args } if args.is_empty() => write!(f, "({op})"),
            Expr::Op { op, args } => write!(f, "({op} {})", args.iter().join(" ")),
            Expr::Call { callee, args } if args.is_empty() => write!(f, "(call {callee})"),
            Expr::Call { callee, args } => write!(f, "(call {callee} {})", args.iter().join(" ")),
            Expr::Block(items) if items.is_empty() => write!(f, "(block)"),
            Expr::Block(items) => write!(f, "(block {})", items.iter().join(" ")),
            Expr::If { test, then, orelse } => write!(f, "(if {test} {then} {orelse})"),
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => write!(f, "(loop L{break_label} L{continue_label} {body})"),
            Expr::Labeled { label, body } => write!(f, "(label L{label} {body})"),
            Expr::Break(label) => write!(f, "(break L{label})"),
            Expr::Continue(label) => write!(f, "(continue L{label})"),
            Expr::Return(value) => write!(f, "(return {value})"),
            Expr::Try(region) => {
                write!(f, "(try#{} {}", region.id, region.body)?;
                if let Some(handler) = &region.handler {
                    write!(f, " (catch ${} {})", handler.exception, handler.body)?;
                }
                if let Some(finally) = &region.finally {
                    write!(f, " (finally {finally})")?;
                }
                write!(f, ")")
            }
            Expr::Throw(value) => write!(f, "(throw {value})"),
            Expr::Rethrow => write!(f, "(rethrow)"),
            Expr::MakeFunction(spec) => {
                write!(f, "(function {}", spec.code.name)?;
                for default in &spec.defaults {
                    write!(f, " {default}")?;
                }
                for (name, default) in &spec.kw_defaults {
                    write!(f, " {name}={default}")?;
                }
                write!(f, ")")
            }
            Expr::MakeClass(spec) => {
                write!(f, "(class {}", spec.name)?;
                for base in &spec.bases {
                    write!(f, " {base}")?;
                }
                write!(f, ")")
            }
            Expr::Yield { id, value } => write!(f, "(yield#{id} {value})"),
            Expr::GeneratorCheck => write!(f, "(gencheck)"),
            Expr::YieldBreak(value) => write!(f, "(yield-break {value})"),
            Expr::SetLine(line) => write!(f, "(line {line})"),
            Expr::LineFlag(LineFlag::Save(t)) => write!(f, "(line-save ${t})"),
            Expr::LineFlag(LineFlag::Restore(t)) => write!(f, "(line-restore ${t})"),
            Expr::LineFlag(LineFlag::Clear) => write!(f, "(line-clear)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::ast::BinaryOp;

    fn local(name: &str, slot: u32) -> VarAccess {
        VarAccess::new(name, Storage::Local(slot))
    }

    #[rstest]
    #[case::load(Expr::Load { var: local("x", 0), guarded: true }, "x@local[0]!")]
    #[case::store(Expr::store(local("x", 1), Expr::Constant(Constant::Int(3))), "(= x@local[1] 3)")]
    #[case::op(
        Expr::op(RuntimeOp::Binary(BinaryOp::Add), vec![Expr::temp(0), Expr::Constant(Constant::str("a"))]),
        "(+ $0 'a')"
    )]
    #[case::unchecked_delete(Expr::Delete { var: local("e", 2), checked: false }, "(unbind e@local[2])")]
    #[case::if_(Expr::if_(Expr::temp(1), Expr::none(), Expr::Break(4)), "(if $1 None (break L4))")]
    fn test_display(#[case] expr: Expr, #[case] expected: &str) {
        assert_eq!(expr.to_string(), expected);
    }

    #[test]
    fn test_block_unwraps_single_child() {
        assert_eq!(Expr::block(vec![Expr::temp(2)]), Expr::temp(2));
        assert_eq!(Expr::block(vec![]), Expr::Block(vec![]));
    }

    #[test]
    fn test_contains_yield_looks_through_children() {
        let expr = Expr::call(
            Expr::temp(0),
            vec![Expr::Yield {
                id: 0,
                value: Box::new(Expr::none()),
            }],
        );
        assert!(expr.contains_yield());
        assert!(!Expr::call(Expr::temp(0), vec![]).contains_yield());
    }

    #[test]
    fn test_try_children() {
        let region = Expr::Try(Box::new(TryRegion {
            id: 0,
            body: Expr::temp(0),
            handler: None,
            finally: Some(Expr::temp(2)),
        }));
        assert_eq!(region.children(), vec![&Expr::temp(0), &Expr::temp(2)]);
        assert_eq!(
            region.resumable_children(),
            Some(vec![(0, &Expr::temp(0)), (2, &Expr::temp(2))])
        );
        assert_eq!(region.size(), 3);
    }

    #[test]
    fn test_operations_are_not_resumable() {
        let expr = Expr::op(RuntimeOp::BuildList, vec![Expr::temp(0)]);
        assert!(expr.resumable_children().is_none());
        assert!(Expr::temp(0).resumable_children().is_none());
    }
}
