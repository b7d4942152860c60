use std::fmt;

use smol_str::SmolStr;

use crate::ast::{BinaryOp, CompareOp, UnaryOp};

/// Operations the lowered tree calls into the runtime for.
///
/// Argument counts are fixed per operation unless noted. Slice operations
/// take `start`, `stop` and `step` operands, each [`Constant::Missing`]
/// when omitted in source.
///
/// [`Constant::Missing`]: crate::constant::Constant::Missing
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeOp {
    /// `(obj)`
    GetAttr(SmolStr),
    /// `(obj, value)`
    SetAttr(SmolStr),
    /// `(obj)`
    DelAttr(SmolStr),
    /// `(obj, index)`
    GetItem,
    /// `(obj, index, value)`
    SetItem,
    /// `(obj, index)`
    DelItem,
    /// `(obj, start, stop, step)`
    GetSlice,
    /// `(obj, start, stop, step, value)`
    SetSlice,
    /// `(obj, start, stop, step)`
    DelSlice,
    /// `(obj, i1, .., in)`: multi-dimensional `obj[i1, .., in]`.
    GetIndex(u32),
    /// `(obj, i1, .., in, value)`
    SetIndex(u32),
    /// `(obj, i1, .., in)`
    DelIndex(u32),
    Binary(BinaryOp),
    /// Augmented assignment form of a binary operator.
    InPlace(BinaryOp),
    Unary(UnaryOp),
    Compare(CompareOp),
    /// Truthiness coercion used for every branch condition.
    IsTrue,
    Not,
    /// Variadic.
    BuildTuple,
    /// Variadic.
    BuildList,
    /// Variadic.
    BuildSet,
    /// Variadic `(k1, v1, .., kn, vn)`.
    BuildDict,
    /// `(constant tuple)`: fresh list from a folded literal.
    ListFromConstant,
    /// `(iterable)`: tuple of exactly `n` items.
    Unpack(u32),
    /// `(iterable)`: tuple of `before + 1 + after` items, the starred middle
    /// collected into a list.
    UnpackStarred { before: u32, after: u32 },
    /// `(iterable)`: iterator object.
    GetEnumerator,
    /// `(iterator)`: whether the iterator owns a resource to release.
    NeedsDisposal,
    /// `(iterator)`: advance, returning whether an item is available.
    MoveNext,
    /// `(iterator)`: current item after a successful `MoveNext`.
    Current,
    /// `(iterator)`
    Dispose,
    /// `(exception, type)`
    ExceptionMatches,
    /// `(value)`: instance from an exception class or instance.
    MakeException,
    /// `(exception, cause)`: sets `__cause__` and yields the exception.
    SetCause,
    /// `(exception)`: its class.
    TypeOf,
    /// `()`: the module object for a dotted name. `top` yields the first
    /// component, as `import a.b` binds `a`.
    Import { name: SmolStr, level: u32, top: bool },
    /// `(module)`: attribute for `from m import name`.
    ImportFrom(SmolStr),
    /// `(module)`: copies public names into the current namespace.
    ImportStar,
    /// `(list, value)`
    ListAppend,
    /// `(set, value)`
    SetAdd,
    /// `(dict, key, value)`
    DictSet,
    /// `(p1, .., pn)`: concatenated string forms.
    JoinStr(u32),
}

impl RuntimeOp {
    /// The operation cannot raise for any operand.
    pub fn is_infallible(&self) -> bool {
        matches!(
            self,
            RuntimeOp::IsTrue
                | RuntimeOp::Not
                | RuntimeOp::BuildTuple
                | RuntimeOp::BuildList
                | RuntimeOp::ListFromConstant
                | RuntimeOp::TypeOf
        )
    }
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeOp::GetAttr(name) => write!(f, "getattr.{name}"),
            RuntimeOp::SetAttr(name) => write!(f, "setattr.{name}"),
            RuntimeOp::DelAttr(name) => write!(f, "delattr.{name}"),
            RuntimeOp::GetItem => write!(f, "getitem"),
            RuntimeOp::SetItem => write!(f, "setitem"),
            RuntimeOp::DelItem => write!(f, "delitem"),
            RuntimeOp::GetSlice => write!(f, "getslice"),
            RuntimeOp::SetSlice => write!(f, "setslice"),
            RuntimeOp::DelSlice => write!(f, "delslice"),
            RuntimeOp::GetIndex(n) => write!(f, "getindex/{n}"),
            RuntimeOp::SetIndex(n) => write!(f, "setindex/{n}"),
            RuntimeOp::DelIndex(n) => write!(f, "delindex/{n}"),
            RuntimeOp::Binary(op) => write!(f, "{}", op.symbol()),
            RuntimeOp::InPlace(op) => write!(f, "{}=", op.symbol()),
            RuntimeOp::Unary(op) => write!(f, "unary.{op:?}"),
            RuntimeOp::Compare(op) => write!(f, "{}", op.symbol()),
            RuntimeOp::IsTrue => write!(f, "istrue"),
            RuntimeOp::Not => write!(f, "not"),
            RuntimeOp::BuildTuple => write!(f, "tuple"),
            RuntimeOp::BuildList => write!(f, "list"),
            RuntimeOp::BuildSet => write!(f, "set"),
            RuntimeOp::BuildDict => write!(f, "dict"),
            RuntimeOp::ListFromConstant => write!(f, "list-const"),
            RuntimeOp::Unpack(n) => write!(f, "unpack/{n}"),
            RuntimeOp::UnpackStarred { before, after } => write!(f, "unpack/{before}*{after}"),
            RuntimeOp::GetEnumerator => write!(f, "iter"),
            RuntimeOp::NeedsDisposal => write!(f, "needs-dispose"),
            RuntimeOp::MoveNext => write!(f, "movenext"),
            RuntimeOp::Current => write!(f, "current"),
            RuntimeOp::Dispose => write!(f, "dispose"),
            RuntimeOp::ExceptionMatches => write!(f, "exc-matches"),
            RuntimeOp::MakeException => write!(f, "make-exc"),
            RuntimeOp::SetCause => write!(f, "set-cause"),
            RuntimeOp::TypeOf => write!(f, "type"),
            RuntimeOp::Import { name, level, top } => {
                write!(f, "import.{}{name}", ".".repeat(*level as usize))?;
                if *top {
                    write!(f, "^")?;
                }
                Ok(())
            }
            RuntimeOp::ImportFrom(name) => write!(f, "import-from.{name}"),
            RuntimeOp::ImportStar => write!(f, "import-star"),
            RuntimeOp::ListAppend => write!(f, "list-append"),
            RuntimeOp::SetAdd => write!(f, "set-add"),
            RuntimeOp::DictSet => write!(f, "dict-set"),
            RuntimeOp::JoinStr(n) => write!(f, "join/{n}"),
        }
    }
}
