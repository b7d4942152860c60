//! Code objects: one per lowered scope.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use smol_str::SmolStr;

use crate::{
    backend::{DelegateCache, ExecutionMode, ExpressionCompiler},
    ir::{self, YieldId},
    light::LightCode,
    scope::{ScopeKind, Storage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    VarArgs,
    KwOnly,
    KwArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: SmolStr,
    pub kind: ParamKind,
    /// Where the bound argument is written when a frame is created.
    pub storage: Storage,
}

/// What a closure entry owned by this scope holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// A fresh, unbound cell.
    Cell,
    /// The frame's own locals dictionary.
    Namespace,
}

/// Shape of an activation.
///
/// The closure tuple of a frame is the parent tuple entries selected by
/// `closure_map`, followed by one new entry per `cells` item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameLayout {
    pub locals: u32,
    pub temps: u32,
    pub closure_map: Vec<u32>,
    pub cells: Vec<CellKind>,
    /// Closure index of the implicit `__class__` cell of a class body.
    pub class_cell: Option<u32>,
    /// The frame carries a name -> value namespace.
    pub namespace: bool,
}

impl FrameLayout {
    pub fn closure_len(&self) -> usize {
        self.closure_map.len() + self.cells.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeFlags {
    pub generator: bool,
    pub needs_dictionary: bool,
    pub has_late_bound_sets: bool,
    pub has_for_loop: bool,
}

#[derive(Debug)]
pub struct CodeObject {
    pub name: SmolStr,
    pub kind: ScopeKind,
    pub filename: SmolStr,
    pub docstring: Option<SmolStr>,
    pub first_line: u32,
    pub params: Vec<ParamSpec>,
    pub layout: FrameLayout,
    pub flags: CodeFlags,
    pub body: ir::Expr,
    /// Child-index path from `body` to each yield, indexed by yield id.
    pub resumption: Vec<Vec<u32>>,
    pub mode: ExecutionMode,
    pub light: Option<LightCode>,
    pub delegate: DelegateCache,
    invocations: AtomicU32,
    threshold: u32,
}

impl PartialEq for CodeObject {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

pub struct CodeObjectBuilder {
    pub name: SmolStr,
    pub kind: ScopeKind,
    pub filename: SmolStr,
    pub docstring: Option<SmolStr>,
    pub first_line: u32,
    pub params: Vec<ParamSpec>,
    pub layout: FrameLayout,
    pub flags: CodeFlags,
    pub body: ir::Expr,
    pub resumption: Vec<Vec<u32>>,
}

impl CodeObjectBuilder {
    pub fn build(self, mode: ExecutionMode, light: Option<LightCode>, threshold: u32) -> Arc<CodeObject> {
        Arc::new(CodeObject {
            name: self.name,
            kind: self.kind,
            filename: self.filename,
            docstring: self.docstring,
            first_line: self.first_line,
            params: self.params,
            layout: self.layout,
            flags: self.flags,
            body: self.body,
            resumption: self.resumption,
            mode,
            light,
            delegate: DelegateCache::new(),
            invocations: AtomicU32::new(0),
            threshold,
        })
    }
}

impl CodeObject {
    pub fn is_generator(&self) -> bool {
        self.flags.generator
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Counts one call and returns the mode that serves it.
    ///
    /// A light code object serves its first `threshold` calls with light
    /// instructions and every later call with the compiled delegate.
    pub fn record_invocation(&self) -> ExecutionMode {
        let count = self.invocations.fetch_add(1, Ordering::Relaxed);
        match (&self.light, self.mode) {
            (Some(_), ExecutionMode::Light) if count < self.threshold => ExecutionMode::Light,
            (_, ExecutionMode::Light) => {
                if count == self.threshold {
                    tracing::debug!(code = %self.name, invocations = count, "promoted to compiled");
                }
                ExecutionMode::Compiled
            }
            (_, ExecutionMode::Compiled) => ExecutionMode::Compiled,
        }
    }

    pub fn compiled<C: ExpressionCompiler>(&self, compiler: &C) -> Arc<C::Delegate> {
        self.delegate.get_or_compile(compiler, &self.body)
    }

    pub fn resume_path(&self, id: YieldId) -> Option<&[u32]> {
        self.resumption.get(id as usize).map(Vec::as_slice)
    }

    /// Parameter names in slot order.
    pub fn param_names(&self) -> impl Iterator<Item = &SmolStr> {
        self.params.iter().map(|p| &p.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Constant;

    fn code(mode: ExecutionMode, threshold: u32) -> Arc<CodeObject> {
        let body = ir::Expr::Return(Box::new(ir::Expr::Constant(Constant::Int(1))));
        let light = (mode == ExecutionMode::Light).then(|| LightCode::compile(&body));
        CodeObjectBuilder {
            name: "f".into(),
            kind: ScopeKind::Function,
            filename: "<string>".into(),
            docstring: None,
            first_line: 1,
            params: Vec::new(),
            layout: FrameLayout::default(),
            flags: CodeFlags::default(),
            body,
            resumption: Vec::new(),
        }
        .build(mode, light, threshold)
    }

    #[test]
    fn test_light_code_is_promoted_after_threshold() {
        let code = code(ExecutionMode::Light, 2);
        let modes: Vec<_> = (0..4).map(|_| code.record_invocation()).collect();
        assert_eq!(
            modes,
            vec![
                ExecutionMode::Light,
                ExecutionMode::Light,
                ExecutionMode::Compiled,
                ExecutionMode::Compiled
            ]
        );
        assert_eq!(code.invocations(), 4);
    }

    #[test]
    fn test_compiled_code_stays_compiled() {
        let code = code(ExecutionMode::Compiled, 2);
        assert_eq!(code.record_invocation(), ExecutionMode::Compiled);
    }

    #[test]
    fn test_code_objects_compare_by_identity() {
        let a = code(ExecutionMode::Compiled, 1);
        let b = code(ExecutionMode::Compiled, 1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
