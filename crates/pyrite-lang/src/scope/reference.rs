use smol_str::SmolStr;

use super::{ScopeId, VariableId};
use crate::{arena::ArenaId, range::Span};

pub type ReferenceId = ArenaId<Reference>;

/// Every use of one name inside one scope shares a single reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub name: SmolStr,
    pub scope: ScopeId,
    /// First use, for diagnostics.
    pub span: Span,
    /// `None` after binding means "look the name up at runtime".
    pub variable: Option<VariableId>,
}

impl Reference {
    pub fn new(name: SmolStr, scope: ScopeId, span: Span) -> Self {
        Self {
            name,
            scope,
            span,
            variable: None,
        }
    }
}
