pub mod build;
pub mod node;
pub mod walk;

use smol_str::SmolStr;

pub use node::{
    Alias, Arg, BinaryOp, Body, BoolOp, ClassDef, CompareOp, Comprehension, ExceptHandler, Expr,
    ExprKind, FunctionDef, Name, NodeId, Param, Parameters, Stmt, StmtKind, UnaryOp, WithItem,
    docstring,
};

use crate::range::{LineIndex, Span};

/// Root of a parsed compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub id: NodeId,
    pub body: Body,
    pub line_index: LineIndex,
    /// Source text, when the parser kept it; used for diagnostics rendering.
    pub source: Option<String>,
}

impl Module {
    pub fn new(body: Body, line_index: LineIndex) -> Self {
        Self {
            id: NodeId::fresh(),
            body,
            line_index,
            source: None,
        }
    }

    pub fn with_source(body: Body, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: NodeId::fresh(),
            body,
            line_index: LineIndex::from_source(&source),
            source: Some(source),
        }
    }

    pub fn docstring(&self) -> Option<&SmolStr> {
        docstring(&self.body)
    }

    pub fn line_of(&self, span: Span) -> u32 {
        self.line_index.line(span.start)
    }

    pub fn span(&self) -> Span {
        self.body
            .iter()
            .fold(Span::default(), |acc, stmt| acc.cover(stmt.span))
    }
}
