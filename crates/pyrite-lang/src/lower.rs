//! Lowering of bound AST scopes into IR code objects.
//!
//! Each scope is lowered by its own [`Lowerer`]; nested function, class,
//! lambda and comprehension scopes are lowered when their defining node is
//! reached and embedded as code objects in the parent's tree.

mod assign;
mod comprehension;
mod expr;
mod fold;
mod function;
mod generator;
mod stmt;

use std::sync::Arc;

use smol_str::SmolStr;

use crate::{
    ast::{Module, NodeId, Parameters, Stmt},
    backend,
    binder::Bindings,
    code::{CellKind, CodeFlags, CodeObject, CodeObjectBuilder, FrameLayout, ParamKind, ParamSpec},
    config::CompilerOptions,
    constant::Constant,
    ir::{self, LabelId, TempId, TryId, VarAccess, YieldId},
    range::Span,
    scope::{ClosureEntry, ScopeId, ScopeKind, Storage},
};

pub use generator::resumption_table;

/// Output of lowering one module.
#[derive(Debug)]
pub struct Lowered {
    pub code: Arc<CodeObject>,
    /// Class-body code objects, candidates for background compilation.
    pub class_bodies: Vec<Arc<CodeObject>>,
}

pub fn lower_module(module: &Module, bindings: &Bindings, options: &CompilerOptions) -> Lowered {
    let mut shared = Shared {
        module,
        bindings,
        options,
        class_bodies: Vec::new(),
    };
    let scope = bindings.tree.module();
    let mut lowerer = Lowerer::new(&mut shared, scope);

    let mut body = lowerer.module_prologue();
    body.extend(lowerer.body(&module.body));
    body.push(ir::Expr::none());

    let code = lowerer.build_code(
        options.module_name.clone(),
        None,
        module.docstring().cloned(),
        module.span(),
        ir::Expr::Block(body),
    );
    Lowered {
        code,
        class_bodies: shared.class_bodies,
    }
}

struct Shared<'a> {
    module: &'a Module,
    bindings: &'a Bindings,
    options: &'a CompilerOptions,
    class_bodies: Vec<Arc<CodeObject>>,
}

#[derive(Debug, Clone, Copy)]
struct LoopLabels {
    break_label: LabelId,
    continue_label: LabelId,
}

struct Lowerer<'a, 's> {
    shared: &'s mut Shared<'a>,
    scope: ScopeId,
    generator: bool,
    temps: u32,
    labels: u32,
    yields: u32,
    tries: u32,
    loops: Vec<LoopLabels>,
}

impl<'a, 's> Lowerer<'a, 's> {
    fn new(shared: &'s mut Shared<'a>, scope: ScopeId) -> Self {
        let generator = shared.bindings.tree.scope(scope).flags.is_generator;
        Self {
            shared,
            scope,
            generator,
            temps: 0,
            labels: 0,
            yields: 0,
            tries: 0,
            loops: Vec::new(),
        }
    }

    /// Lowerer for the scope introduced by `node`.
    fn nested<'n>(&'n mut self, node: NodeId) -> Lowerer<'a, 'n> {
        let Some(scope) = self.shared.bindings.scope_of(node) else {
            panic!("node {node} has no bound scope");
        };
        Lowerer::new(&mut *self.shared, scope)
    }

    fn options(&self) -> &'a CompilerOptions {
        self.shared.options
    }

    fn bindings(&self) -> &'a Bindings {
        self.shared.bindings
    }

    fn new_temp(&mut self) -> TempId {
        self.temps += 1;
        self.temps - 1
    }

    fn new_label(&mut self) -> LabelId {
        self.labels += 1;
        self.labels - 1
    }

    fn new_yield(&mut self) -> YieldId {
        self.yields += 1;
        self.yields - 1
    }

    fn new_try(&mut self) -> TryId {
        self.tries += 1;
        self.tries - 1
    }

    fn line_of(&self, span: Span) -> u32 {
        self.shared.module.line_of(span)
    }

    /// Resolved access to `name` from this scope.
    fn var(&self, name: &str) -> VarAccess {
        match self.bindings().storage(self.scope, name) {
            Some(storage) => VarAccess::new(name, storage),
            None => panic!(
                "unresolved reference '{name}' in scope '{}'",
                self.bindings().tree.scope(self.scope).name
            ),
        }
    }

    /// Like [`Lowerer::var`], falling back to a by-name access for implicit
    /// names the source never mentions.
    fn var_or_name(&self, name: &str) -> VarAccess {
        let storage = self
            .bindings()
            .storage(self.scope, name)
            .unwrap_or(Storage::Name);
        VarAccess::new(name, storage)
    }

    fn load(&self, name: &str) -> ir::Expr {
        ir::Expr::Load {
            var: self.var(name),
            guarded: false,
        }
    }

    fn body(&mut self, stmts: &[Stmt]) -> Vec<ir::Expr> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if self.options().line_tracking && stmt.can_throw() {
                out.push(ir::Expr::SetLine(self.line_of(stmt.span)));
            }
            if let Some(lowered) = self.stmt(stmt) {
                out.push(lowered);
            }
        }
        out
    }

    fn module_prologue(&mut self) -> Vec<ir::Expr> {
        let options = self.options();
        let doc = self
            .shared
            .module
            .docstring()
            .map(|d| Constant::Str(d.clone()))
            .unwrap_or(Constant::None);
        vec![
            ir::Expr::store(
                self.var_or_name("__name__"),
                ir::Expr::Constant(Constant::Str(options.module_name.clone())),
            ),
            ir::Expr::store(
                self.var_or_name("__file__"),
                ir::Expr::Constant(Constant::Str(options.filename.clone())),
            ),
            ir::Expr::store(self.var_or_name("__doc__"), ir::Expr::Constant(doc)),
        ]
    }

    /// Unbinds slot locals that may be read before their first write, so
    /// the guarded read observes an explicit unbound value.
    fn function_prologue(&mut self) -> Vec<ir::Expr> {
        let tree = &self.bindings().tree;
        let mut out: Vec<ir::Expr> = tree
            .tracked_variables(self.scope)
            .into_iter()
            .map(|v| tree.variable(v))
            .filter(|v| v.read_before_initialized && v.kind != crate::scope::VariableKind::Parameter)
            .filter_map(|v| match tree.scope(self.scope).storage_of(&v.name) {
                Some(storage @ Storage::Local(_)) => Some(ir::Expr::Delete {
                    var: VarAccess::new(v.name.clone(), storage),
                    checked: false,
                }),
                _ => None,
            })
            .collect();
        if self.generator {
            out.push(ir::Expr::GeneratorCheck);
        }
        out
    }

    /// Final statement of a function body.
    fn implicit_return(&self) -> ir::Expr {
        if self.generator {
            ir::Expr::YieldBreak(Box::new(ir::Expr::none()))
        } else {
            ir::Expr::Return(Box::new(ir::Expr::none()))
        }
    }

    fn param_specs(&self, params: &Parameters) -> Vec<ParamSpec> {
        let spec = |name: &SmolStr, kind| ParamSpec {
            name: name.clone(),
            kind,
            storage: self.var(name).storage,
        };
        params
            .args
            .iter()
            .map(|p| spec(&p.name, ParamKind::Positional))
            .chain(params.vararg.iter().map(|p| spec(&p.name, ParamKind::VarArgs)))
            .chain(params.kwonly.iter().map(|p| spec(&p.name, ParamKind::KwOnly)))
            .chain(params.kwarg.iter().map(|p| spec(&p.name, ParamKind::KwArgs)))
            .collect()
    }

    fn layout(&self) -> FrameLayout {
        let tree = &self.bindings().tree;
        let scope = tree.scope(self.scope);
        let free = scope.closure_map.len();
        let cells = scope.closure[free..]
            .iter()
            .map(|entry| match entry {
                ClosureEntry::Cell(_) => CellKind::Cell,
                ClosureEntry::Namespace(_) => CellKind::Namespace,
            })
            .collect();
        let class_cell = (scope.kind == ScopeKind::Class)
            .then(|| {
                scope.closure.iter().position(|entry| {
                    matches!(entry, ClosureEntry::Cell(v) if tree.variable(*v).name == "__class__")
                })
            })
            .flatten()
            .map(|i| i as u32);

        FrameLayout {
            locals: scope.local_count,
            temps: self.temps,
            closure_map: scope.closure_map.clone(),
            cells,
            class_cell,
            namespace: match scope.kind {
                ScopeKind::Module => false,
                ScopeKind::Class => true,
                _ => scope.flags.needs_dictionary || scope.flags.has_late_bound_sets,
            },
        }
    }

    /// Finishes the scope: generator rewriting, backend selection and the
    /// code object itself.
    fn build_code(
        &mut self,
        name: SmolStr,
        params: Option<&Parameters>,
        docstring: Option<SmolStr>,
        span: Span,
        mut body: ir::Expr,
    ) -> Arc<CodeObject> {
        let resumption = if self.generator {
            body = generator::spill(body, &mut self.temps);
            resumption_table(&body)
        } else {
            Vec::new()
        };

        let scope = self.bindings().tree.scope(self.scope);
        let flags = CodeFlags {
            generator: self.generator,
            needs_dictionary: scope.flags.needs_dictionary,
            has_late_bound_sets: scope.flags.has_late_bound_sets,
            has_for_loop: scope.flags.has_for_loop,
        };
        let options = self.options();
        let (mode, light) = backend::select_mode(&name, &scope.flags, options, &body);
        tracing::debug!(
            code = %name,
            kind = %scope.kind,
            temps = self.temps,
            yields = resumption.len(),
            "scope lowered"
        );

        CodeObjectBuilder {
            name,
            kind: scope.kind,
            filename: options.filename.clone(),
            docstring,
            first_line: self.line_of(span),
            params: params.map(|p| self.param_specs(p)).unwrap_or_default(),
            layout: self.layout(),
            flags,
            body,
            resumption,
        }
        .build(mode, light, options.compile_threshold)
    }
}

#[cfg(test)]
mod tests;
