//! First binder pass: discover scopes, declare variables and record every
//! name use as a reference.

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::{
    ast::{
        Arg, Comprehension, Expr, ExprKind, Module, NodeId, Parameters, Stmt, StmtKind, docstring,
        walk::{self, Visitor},
    },
    diagnostic::DiagnosticSink,
    range::Span,
    scope::{ScopeId, ScopeKind, ScopeTree, VariableKind},
};

/// Implicit parameter of a comprehension scope holding the outermost
/// iterable, which is evaluated in the enclosing scope.
pub const COMPREHENSION_ARG: &str = ".0";

pub(super) struct Declared {
    pub tree: ScopeTree,
    pub scope_nodes: FxHashMap<NodeId, ScopeId>,
    pub super_calls: FxHashSet<NodeId>,
    /// Discovery order: every scope appears after its parent.
    pub order: Vec<ScopeId>,
}

pub(super) fn declare(module: &Module, sink: &mut DiagnosticSink) -> Declared {
    let tree = ScopeTree::new(module.id, module.span());
    let current = tree.module();
    let mut declarer = Declarer {
        tree,
        scope_nodes: FxHashMap::default(),
        super_calls: FxHashSet::default(),
        order: vec![current],
        sink,
        current,
        loops: 0,
    };
    declarer.scope_nodes.insert(module.id, current);

    for name in ["__name__", "__file__", "__doc__"] {
        declarer.define(&SmolStr::new_static(name), Span::default());
    }
    walk::walk_body(&mut declarer, &module.body);

    Declared {
        tree: declarer.tree,
        scope_nodes: declarer.scope_nodes,
        super_calls: declarer.super_calls,
        order: declarer.order,
    }
}

struct Declarer<'a> {
    tree: ScopeTree,
    scope_nodes: FxHashMap<NodeId, ScopeId>,
    super_calls: FxHashSet<NodeId>,
    order: Vec<ScopeId>,
    sink: &'a mut DiagnosticSink,
    current: ScopeId,
    loops: u32,
}

impl Declarer<'_> {
    fn with_scope(
        &mut self,
        kind: ScopeKind,
        name: SmolStr,
        node: NodeId,
        span: Span,
        f: impl FnOnce(&mut Self),
    ) -> ScopeId {
        let scope = self.tree.add_scope(kind, name, node, span, self.current);
        tracing::debug!(?scope, %kind, name = %self.tree.scope(scope).name, "scope discovered");
        self.scope_nodes.insert(node, scope);
        self.order.push(scope);

        let saved = (self.current, self.loops);
        self.current = scope;
        self.loops = 0;
        f(self);
        (self.current, self.loops) = saved;
        scope
    }

    fn kind(&self) -> ScopeKind {
        self.tree.scope(self.current).kind
    }

    fn reference(&mut self, name: &SmolStr, span: Span) {
        self.tree.add_reference(self.current, name, span);
    }

    fn define(&mut self, name: &SmolStr, span: Span) {
        let scope = self.current;
        let s = self.tree.scope(scope);
        if !s.nonlocal_names.contains_key(name) && s.lookup(name).is_none() {
            let kind = if scope == self.tree.module() {
                VariableKind::Global
            } else {
                VariableKind::Local
            };
            self.tree.define(scope, name, kind, span);
        }
        self.reference(name, span);
    }

    fn define_deleted(&mut self, name: &SmolStr, span: Span) {
        self.define(name, span);
        if let Some(variable) = self.tree.scope(self.current).lookup(name)
            && self.tree.variable(variable).scope == self.current
            && self.tree.variable(variable).deleted.is_none()
        {
            self.tree.variable_mut(variable).deleted = Some(span);
        }
    }

    fn define_parameters(&mut self, params: &Parameters) {
        for param in params.iter() {
            if self.tree.scope(self.current).lookup(&param.name).is_some() {
                self.sink.error(
                    format!("duplicate argument '{}' in function definition", param.name),
                    param.span,
                );
                continue;
            }
            self.tree
                .define(self.current, &param.name, VariableKind::Parameter, param.span);
            self.reference(&param.name, param.span);
        }
    }

    /// Defaults and annotations are evaluated in the enclosing scope.
    fn visit_parameter_defaults(&mut self, params: &Parameters) {
        walk::walk_parameters(self, params);
    }

    fn define_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.define(name, target.span),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let starred = items
                    .iter()
                    .filter(|e| matches!(e.kind, ExprKind::Starred(_)))
                    .count();
                if starred > 1 {
                    self.sink
                        .error("two starred expressions in assignment", target.span);
                }
                for item in items {
                    match &item.kind {
                        ExprKind::Starred(inner) => self.define_target(inner),
                        _ => self.define_target(item),
                    }
                }
            }
            ExprKind::Starred(_) => self.sink.error(
                "starred assignment target must be in a list or tuple",
                target.span,
            ),
            ExprKind::Attribute { value, .. } => self.visit_expr(value),
            ExprKind::Subscript { value, index } => {
                self.visit_expr(value);
                self.visit_expr(index);
            }
            _ => self
                .sink
                .error(format!("can't assign to {}", describe(target)), target.span),
        }
    }

    fn delete_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.define_deleted(name, target.span),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.delete_target(item);
                }
            }
            ExprKind::Attribute { value, .. } => self.visit_expr(value),
            ExprKind::Subscript { value, index } => {
                self.visit_expr(value);
                self.visit_expr(index);
            }
            _ => self
                .sink
                .error(format!("can't delete {}", describe(target)), target.span),
        }
    }

    fn declare_global(&mut self, name: &SmolStr, span: Span) {
        if self.current == self.tree.module() {
            self.tree.ensure_global(name, span);
            return;
        }

        let mut assigned_global = false;
        let conflict = self.tree.scope(self.current).lookup(name);
        if let Some(conflict) = conflict {
            match self.tree.variable(conflict).kind {
                VariableKind::Global => assigned_global = true,
                VariableKind::Local => {
                    assigned_global = true;
                    self.sink.warning(
                        format!("name '{name}' is assigned to before global declaration"),
                        span,
                    );
                }
                VariableKind::Parameter => {
                    assigned_global = true;
                    self.sink.error(
                        format!("Name '{name}' is a function parameter and declared global"),
                        span,
                    );
                }
            }
        }
        if self.tree.scope(self.current).nonlocal_names.contains_key(name) {
            self.sink
                .error(format!("name '{name}' is nonlocal and global"), span);
        }
        if self.tree.scope(self.current).is_referenced(name) && !assigned_global {
            self.sink.warning(
                format!("name '{name}' is used prior to global declaration"),
                span,
            );
        }

        let variable = self.tree.ensure_global(name, span);
        if conflict.is_none() {
            self.tree.alias(self.current, name, variable);
        }
    }

    fn declare_nonlocal(&mut self, name: &SmolStr, span: Span) {
        if self.current == self.tree.module() {
            self.sink
                .error("nonlocal declaration not allowed at module level", span);
            return;
        }

        let scope = self.tree.scope(self.current);
        match scope.lookup(name).map(|v| self.tree.variable(v).kind) {
            Some(VariableKind::Parameter) => {
                self.sink
                    .error(format!("name '{name}' is parameter and nonlocal"), span);
                return;
            }
            Some(VariableKind::Global) => {
                self.sink
                    .error(format!("name '{name}' is nonlocal and global"), span);
                return;
            }
            Some(VariableKind::Local) => {
                self.sink.error(
                    format!("name '{name}' is assigned to before nonlocal declaration"),
                    span,
                );
                return;
            }
            None if scope.is_referenced(name) => {
                self.sink.error(
                    format!("name '{name}' is used prior to nonlocal declaration"),
                    span,
                );
                return;
            }
            None => {}
        }
        self.tree
            .scope_mut(self.current)
            .nonlocal_names
            .insert(name.clone(), span);
    }

    fn visit_call(&mut self, expr: &Expr, func: &Expr, args: &[Arg]) {
        if let ExprKind::Name(name) = &func.kind {
            match name.as_str() {
                "eval" | "exec" => {
                    let flags = &mut self.tree.scope_mut(self.current).flags;
                    flags.needs_dictionary = true;
                    if name == "exec" && args.len() == 1 {
                        flags.contains_unqualified_exec = true;
                        flags.has_late_bound_sets = true;
                    }
                }
                "dir" | "vars" | "locals" if args.iter().all(|a| matches!(a, Arg::Star(_))) => {
                    self.tree.scope_mut(self.current).flags.needs_dictionary = true;
                }
                "super" if args.is_empty() => self.declare_super(expr.id),
                _ => {}
            }
        }
        walk::walk_expr(self, expr);
    }

    /// Zero-argument `super()` inside a method reads the implicit
    /// `__class__` cell of the class body and the method's first parameter.
    fn declare_super(&mut self, call: NodeId) {
        let scope = self.tree.scope(self.current);
        let Some(class) = scope.parent else {
            return;
        };
        if scope.kind != ScopeKind::Function
            || self.tree.scope(class).kind != ScopeKind::Class
            || scope.parameters.is_empty()
        {
            return;
        }

        let class_cell = SmolStr::new_static("__class__");
        let span = scope.span;
        self.tree.define(class, &class_cell, VariableKind::Local, span);
        self.reference(&class_cell, span);
        self.super_calls.insert(call);
    }

    fn visit_comprehension(
        &mut self,
        expr: &Expr,
        generators: &[Comprehension],
        elts: &[&Expr],
        name: &'static str,
    ) {
        let Some((first, rest)) = generators.split_first() else {
            self.sink
                .error("comprehension without a for clause", expr.span);
            return;
        };
        self.visit_expr(&first.iter);

        let is_generator = matches!(expr.kind, ExprKind::GeneratorExp { .. });
        self.with_scope(
            ScopeKind::Comprehension,
            SmolStr::new_static(name),
            expr.id,
            expr.span,
            |this| {
                this.tree.scope_mut(this.current).flags.is_generator = is_generator;
                let outer = SmolStr::new_static(COMPREHENSION_ARG);
                this.tree
                    .define(this.current, &outer, VariableKind::Parameter, first.iter.span);
                this.reference(&outer, first.iter.span);
                this.define_target(&first.target);
                for cond in &first.ifs {
                    this.visit_expr(cond);
                }
                for generator in rest {
                    this.visit_expr(&generator.iter);
                    this.define_target(&generator.target);
                    for cond in &generator.ifs {
                        this.visit_expr(cond);
                    }
                }
                for elt in elts {
                    this.visit_expr(elt);
                }
            },
        );
    }

    fn visit_loop_body(&mut self, body: &[Stmt]) {
        self.loops += 1;
        walk::walk_body(self, body);
        self.loops -= 1;
    }
}

impl Visitor for Declarer<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value);
                for target in targets {
                    self.define_target(target);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                match &target.kind {
                    ExprKind::Name(name) => self.define(name, target.span),
                    ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
                        self.define_target(target)
                    }
                    _ => self.sink.error(
                        "illegal expression for augmented assignment",
                        target.span,
                    ),
                }
                self.visit_expr(value);
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete_target(target);
                }
            }
            StmtKind::Return(value) => {
                if !self.kind().is_function_like() {
                    self.sink.error("'return' outside function", stmt.span);
                }
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::Break if self.loops == 0 => {
                self.sink.error("'break' outside loop", stmt.span);
            }
            StmtKind::Continue if self.loops == 0 => {
                self.sink
                    .error("'continue' not properly in loop", stmt.span);
            }
            StmtKind::Global(names) => {
                for name in names {
                    self.declare_global(name, stmt.span);
                }
            }
            StmtKind::Nonlocal(names) => {
                for name in names {
                    self.declare_nonlocal(name, stmt.span);
                }
            }
            StmtKind::While { test, body, orelse } => {
                self.visit_expr(test);
                self.visit_loop_body(body);
                walk::walk_body(self, orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                if self.kind() == ScopeKind::Function {
                    self.tree.scope_mut(self.current).flags.has_for_loop = true;
                }
                self.visit_expr(iter);
                self.define_target(target);
                self.visit_loop_body(body);
                walk::walk_body(self, orelse);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.tree
                    .scope_mut(self.current)
                    .flags
                    .contains_exception_handling = true;
                walk::walk_body(self, body);
                for handler in handlers {
                    if let Some(typ) = &handler.typ {
                        self.visit_expr(typ);
                    }
                    if let Some(name) = &handler.name {
                        self.define(name, handler.span);
                    }
                    walk::walk_body(self, &handler.body);
                }
                walk::walk_body(self, orelse);
                walk::walk_body(self, finalbody);
            }
            StmtKind::With { items, body } => {
                self.tree
                    .scope_mut(self.current)
                    .flags
                    .contains_exception_handling = true;
                for item in items {
                    self.visit_expr(&item.context);
                    if let Some(target) = &item.target {
                        self.define_target(target);
                    }
                }
                walk::walk_body(self, body);
            }
            StmtKind::Import(names) => {
                for alias in names {
                    self.define(&alias.bound_name(), stmt.span);
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                if names.iter().any(|a| a.is_star()) {
                    let flags = &mut self.tree.scope_mut(self.current).flags;
                    flags.contains_import_star = true;
                    flags.needs_dictionary = true;
                    flags.has_late_bound_sets = true;
                } else {
                    for alias in names {
                        let name = alias.asname.as_ref().unwrap_or(&alias.name).clone();
                        self.define(&name, stmt.span);
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                for decorator in &def.decorators {
                    self.visit_expr(decorator);
                }
                self.visit_parameter_defaults(&def.params);
                if let Some(returns) = &def.returns {
                    self.visit_expr(returns);
                }
                self.define(&def.name, stmt.span);
                self.with_scope(
                    ScopeKind::Function,
                    def.name.clone(),
                    stmt.id,
                    stmt.span,
                    |this| {
                        this.define_parameters(&def.params);
                        walk::walk_body(this, &def.body);
                    },
                );
            }
            StmtKind::ClassDef(def) => {
                for decorator in &def.decorators {
                    self.visit_expr(decorator);
                }
                for base in &def.bases {
                    self.visit_expr(base);
                }
                self.define(&def.name, stmt.span);
                self.with_scope(
                    ScopeKind::Class,
                    def.name.clone(),
                    stmt.id,
                    stmt.span,
                    |this| {
                        this.reference(&SmolStr::new_static("__name__"), stmt.span);
                        this.define(&SmolStr::new_static("__module__"), stmt.span);
                        if docstring(&def.body).is_some() {
                            this.define(&SmolStr::new_static("__doc__"), stmt.span);
                        }
                        walk::walk_body(this, &def.body);
                    },
                );
            }
            _ => walk::walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Name(name) => self.reference(name, expr.span),
            ExprKind::Call { func, args } => self.visit_call(expr, func, args),
            ExprKind::Lambda { params, body } => {
                self.visit_parameter_defaults(params);
                self.with_scope(
                    ScopeKind::Lambda,
                    SmolStr::new_static("<lambda>"),
                    expr.id,
                    expr.span,
                    |this| {
                        this.define_parameters(params);
                        this.visit_expr(body);
                    },
                );
            }
            ExprKind::ListComp { elt, generators } => {
                self.visit_comprehension(expr, generators, &[&**elt], "<listcomp>")
            }
            ExprKind::SetComp { elt, generators } => {
                self.visit_comprehension(expr, generators, &[&**elt], "<setcomp>")
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.visit_comprehension(expr, generators, &[&**elt], "<genexpr>")
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => self.visit_comprehension(expr, generators, &[&**key, &**value], "<dictcomp>"),
            ExprKind::Yield(_) => {
                if self.kind().is_function_like() {
                    self.tree.scope_mut(self.current).flags.is_generator = true;
                } else {
                    self.sink.error("'yield' outside function", expr.span);
                }
                walk::walk_expr(self, expr);
            }
            ExprKind::Starred(_) => {
                self.sink.error("can't use starred expression here", expr.span);
                walk::walk_expr(self, expr);
            }
            _ => walk::walk_expr(self, expr),
        }
    }
}

fn describe(expr: &Expr) -> &'static str {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Dict(_) | ExprKind::Set(_) => "literal",
        ExprKind::Call { .. } => "function call",
        ExprKind::Lambda { .. } => "lambda",
        ExprKind::ListComp { .. } | ExprKind::SetComp { .. } | ExprKind::DictComp { .. } => {
            "comprehension"
        }
        ExprKind::GeneratorExp { .. } => "generator expression",
        ExprKind::Yield(_) => "yield expression",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::IfExp { .. } => "conditional expression",
        ExprKind::JoinedStr(_) => "f-string expression",
        _ => "operator",
    }
}
