use std::fmt;

use smol_str::SmolStr;

use super::ScopeId;
use crate::{arena::ArenaId, range::Span};

pub type VariableId = ArenaId<Variable>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Local,
    Parameter,
    Global,
}

/// One bound name.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: SmolStr,
    pub kind: VariableKind,
    /// Scope owning the storage.
    pub scope: ScopeId,
    pub span: Span,
    /// Target of the first explicit `del` of this name.
    pub deleted: Option<Span>,
    /// Some read may happen before any write; set by the flow checker.
    pub read_before_initialized: bool,
    /// A nested scope reads or writes this variable, so it lives in a cell.
    pub accessed_in_nested_scope: bool,
}

impl Variable {
    pub fn new(name: SmolStr, kind: VariableKind, scope: ScopeId, span: Span) -> Self {
        Self {
            name,
            kind,
            scope,
            span,
            deleted: None,
            read_before_initialized: false,
            accessed_in_nested_scope: false,
        }
    }

    pub fn is_global(&self) -> bool {
        self.kind == VariableKind::Global
    }
}

/// Where a name lives, as seen from one scope.
///
/// The same variable is `Cell` in the scope that owns it and `Free` in the
/// scopes that capture it. Indexes for `Cell`, `Free` and `FreeDictionary`
/// point into the closure tuple of the accessing scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Private activation slot.
    Local(u32),
    /// Cell owned by this scope.
    Cell(u32),
    /// Cell owned by an enclosing function.
    Free(u32),
    /// Module-wide global slot.
    Global(u32),
    /// Looked up by name: the class namespace or late-bound names, then
    /// globals, then builtins.
    Name,
    /// Locals dictionary of this scope.
    Dictionary,
    /// Locals dictionary of an enclosing function, reached through the
    /// closure tuple.
    FreeDictionary(u32),
}

impl Storage {
    /// Reads of these storages always check for an unbound value.
    pub fn always_checked(self) -> bool {
        !matches!(self, Storage::Local(_))
    }

    pub fn is_closure(self) -> bool {
        matches!(
            self,
            Storage::Cell(_) | Storage::Free(_) | Storage::FreeDictionary(_)
        )
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Local(i) => write!(f, "local[{i}]"),
            Storage::Cell(i) => write!(f, "cell[{i}]"),
            Storage::Free(i) => write!(f, "free[{i}]"),
            Storage::Global(i) => write!(f, "global[{i}]"),
            Storage::Name => write!(f, "name"),
            Storage::Dictionary => write!(f, "dict"),
            Storage::FreeDictionary(i) => write!(f, "freedict[{i}]"),
        }
    }
}
