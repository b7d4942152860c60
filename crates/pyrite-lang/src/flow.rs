//! Definite-assignment analysis.
//!
//! Each scope is walked on its own with a [`FlowBits`] state threaded through
//! its statements. Reads of a scope's own variables that are not assigned on
//! every incoming path are recorded as guarded, and variables that may be
//! read before any write are flagged for an explicit unbound sentinel.

mod bits;

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

pub use bits::FlowBits;

use crate::{
    ast::{
        ClassDef, Comprehension, ExceptHandler, Expr, ExprKind, FunctionDef, Module, NodeId,
        Parameters, Stmt, StmtKind,
    },
    binder::COMPREHENSION_ARG,
    scope::{ScopeId, ScopeTree, VariableId},
};

#[derive(Clone, Copy)]
enum Body<'m> {
    Module(&'m Module),
    Function(NodeId, &'m FunctionDef),
    Class(NodeId, &'m ClassDef),
    Lambda(&'m Expr, &'m Parameters, &'m Expr),
    Comprehension(&'m Expr),
}

struct LoopState {
    breaks: FlowBits,
    continues: FlowBits,
}

/// Runs the checker over every scope of `module` and returns the ids of
/// name reads that need a runtime unbound check.
pub fn check(
    module: &Module,
    tree: &mut ScopeTree,
    scope_nodes: &FxHashMap<NodeId, ScopeId>,
) -> FxHashSet<NodeId> {
    let mut guarded = FxHashSet::default();
    let mut worklist = vec![Body::Module(module)];

    while let Some(body) = worklist.pop() {
        let node = match body {
            Body::Module(m) => m.id,
            Body::Function(id, _) | Body::Class(id, _) => id,
            Body::Lambda(e, ..) | Body::Comprehension(e) => e.id,
        };
        let Some(&scope) = scope_nodes.get(&node) else {
            continue;
        };
        let mut checker = FlowChecker::new(tree, scope, &mut guarded, &mut worklist);
        checker.run(body);
        tracing::trace!(scope = %tree.scope(scope).name, "flow checked");
    }
    guarded
}

struct FlowChecker<'t, 'm> {
    tree: &'t mut ScopeTree,
    scope: ScopeId,
    index: FxHashMap<SmolStr, usize>,
    variables: Vec<VariableId>,
    bits: FlowBits,
    /// Innermost enclosing loop; a placeholder at scope level.
    current_loop: LoopState,
    /// Meet of every state an exception can leave the innermost protected
    /// region from.
    raised: FlowBits,
    guarded: &'t mut FxHashSet<NodeId>,
    worklist: &'t mut Vec<Body<'m>>,
}

impl<'t, 'm> FlowChecker<'t, 'm> {
    fn new(
        tree: &'t mut ScopeTree,
        scope: ScopeId,
        guarded: &'t mut FxHashSet<NodeId>,
        worklist: &'t mut Vec<Body<'m>>,
    ) -> Self {
        let variables = tree.tracked_variables(scope);
        let index = variables
            .iter()
            .enumerate()
            .map(|(i, v)| (tree.variable(*v).name.clone(), i))
            .collect();
        let bits = FlowBits::new(variables.len());
        let current_loop = LoopState {
            breaks: FlowBits::top(variables.len()),
            continues: FlowBits::top(variables.len()),
        };
        let raised = FlowBits::top(variables.len());
        Self {
            tree,
            scope,
            index,
            variables,
            bits,
            current_loop,
            raised,
            guarded,
            worklist,
        }
    }

    fn top(&self) -> FlowBits {
        FlowBits::top(self.variables.len())
    }

    fn run(&mut self, body: Body<'m>) {
        let parameters: Vec<_> = self.tree.scope(self.scope).parameters.clone();
        for parameter in parameters {
            let name = self.tree.variable(parameter).name.clone();
            self.define(&name);
        }

        match body {
            Body::Module(module) => self.walk_statements(&module.body),
            Body::Function(_, def) => self.walk_statements(&def.body),
            Body::Class(_, def) => {
                for name in ["__module__", "__doc__"] {
                    self.define(name);
                }
                self.walk_statements(&def.body);
            }
            Body::Lambda(_, _, body) => self.visit_expr(body),
            Body::Comprehension(expr) => match &expr.kind {
                ExprKind::ListComp { elt, generators }
                | ExprKind::SetComp { elt, generators }
                | ExprKind::GeneratorExp { elt, generators } => {
                    self.walk_generators(generators);
                    self.visit_expr(elt);
                }
                ExprKind::DictComp {
                    key,
                    value,
                    generators,
                } => {
                    self.walk_generators(generators);
                    self.visit_expr(key);
                    self.visit_expr(value);
                }
                _ => {}
            },
        }
    }

    fn walk_generators(&mut self, generators: &'m [Comprehension]) {
        self.define(COMPREHENSION_ARG);
        for (i, generator) in generators.iter().enumerate() {
            if i > 0 {
                self.visit_expr(&generator.iter);
            }
            self.assign_target(&generator.target);
            for cond in &generator.ifs {
                self.visit_expr(cond);
            }
        }
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn define(&mut self, name: &str) {
        if let Some(slot) = self.slot(name) {
            self.bits.define(slot);
        }
    }

    fn delete(&mut self, name: &str) {
        if let Some(slot) = self.slot(name) {
            self.bits.delete(slot);
        }
    }

    fn read(&mut self, name: &str, node: NodeId) {
        let Some(slot) = self.slot(name) else {
            return;
        };
        if !self.bits.is_assigned(slot) {
            self.guarded.insert(node);
        }
        if !self.bits.is_initialized(slot) {
            let variable = self.variables[slot];
            self.tree.variable_mut(variable).read_before_initialized = true;
        }
    }

    fn walk_statements(&mut self, body: &'m [Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn assign_target(&mut self, target: &'m Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.define(name),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.assign_target(item);
                }
            }
            ExprKind::Starred(inner) => self.assign_target(inner),
            ExprKind::Attribute { value, .. } => self.visit_expr(value),
            ExprKind::Subscript { value, index } => {
                self.visit_expr(value);
                self.visit_expr(index);
            }
            _ => {}
        }
    }

    fn delete_target(&mut self, target: &'m Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.read(name, target.id);
                self.delete(name);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.delete_target(item);
                }
            }
            _ => self.visit_expr(target),
        }
    }

    /// Walks `body` as a protected region and returns the meet of every state
    /// an exception can escape it from, at any nesting depth. The result is
    /// also folded into the enclosing region.
    fn walk_protected(&mut self, body: &'m [Stmt]) -> FlowBits {
        let outer = std::mem::replace(&mut self.raised, self.bits.clone());
        self.walk_statements(body);
        let mut raised = std::mem::replace(&mut self.raised, outer);
        raised.and_with(&self.bits);
        self.raised.and_with(&raised);
        raised
    }

    /// Iterates the loop body to a fixpoint of the loop-head state.
    /// Returns the head state and the meet of all `break` states.
    fn walk_loop(&mut self, entry: &FlowBits, mut iteration: impl FnMut(&mut Self)) -> (FlowBits, FlowBits) {
        let mut head = entry.clone();
        loop {
            self.bits = head.clone();
            let fresh = LoopState {
                breaks: self.top(),
                continues: self.top(),
            };
            let saved = std::mem::replace(&mut self.current_loop, fresh);
            iteration(self);
            let state = std::mem::replace(&mut self.current_loop, saved);

            let mut next = entry.clone();
            next.and_with(&self.bits);
            next.and_with(&state.continues);
            if next == head {
                return (head, state.breaks);
            }
            head = next;
        }
    }

    fn walk_while(&mut self, test: &'m Expr, body: &'m [Stmt], orelse: &'m [Stmt]) {
        let entry = self.bits.clone();
        let mut cond = entry.clone();
        let (_, breaks) = self.walk_loop(&entry, |this| {
            this.visit_expr(test);
            cond = this.bits.clone();
            this.walk_statements(body);
        });

        let always = matches!(&test.kind, ExprKind::Constant(c) if c.is_truthy());
        self.bits = if always { self.top() } else { cond };
        self.walk_statements(orelse);
        self.bits.and_with(&breaks);
    }

    fn walk_for(&mut self, target: &'m Expr, iter: &'m Expr, body: &'m [Stmt], orelse: &'m [Stmt]) {
        self.visit_expr(iter);
        let entry = self.bits.clone();
        let (head, breaks) = self.walk_loop(&entry, |this| {
            this.assign_target(target);
            this.walk_statements(body);
        });

        self.bits = head;
        self.walk_statements(orelse);
        self.bits.and_with(&breaks);
    }

    fn walk_try(
        &mut self,
        body: &'m [Stmt],
        handlers: &'m [ExceptHandler],
        orelse: &'m [Stmt],
        finalbody: &'m [Stmt],
    ) {
        let raised = self.walk_protected(body);
        let body_end = self.bits.clone();

        let mut exceptional = raised.clone();
        let mut ends = Vec::with_capacity(handlers.len());
        for handler in handlers {
            self.bits = raised.clone();
            if let Some(typ) = &handler.typ {
                self.visit_expr(typ);
            }
            if let Some(name) = &handler.name {
                self.define(name);
            }
            exceptional.and_with(&self.walk_protected(&handler.body));
            if let Some(name) = &handler.name {
                self.delete(name);
            }
            ends.push(self.bits.clone());
        }

        self.bits = body_end;
        exceptional.and_with(&self.walk_protected(orelse));
        for end in &ends {
            self.bits.and_with(end);
        }

        if finalbody.is_empty() {
            return;
        }
        let post = self.bits.clone();

        // Guards: the finally body may run after any exceptional exit.
        let mut entry = post.clone();
        entry.and_with(&exceptional);
        self.bits = entry;
        self.walk_statements(finalbody);

        // Deletes inside finally also affect break/continue paths leaving
        // through it.
        self.bits = self.top();
        self.walk_statements(finalbody);
        let effect = self.bits.clone();
        self.current_loop.breaks.and_with(&effect);
        self.current_loop.continues.and_with(&effect);

        self.bits = post;
        self.walk_statements(finalbody);
    }

    fn jump(&mut self, kind: Jump) {
        match kind {
            Jump::Break => self.current_loop.breaks.and_with(&self.bits),
            Jump::Continue => self.current_loop.continues.and_with(&self.bits),
        }
        self.bits = self.top();
    }

    fn nested(&mut self, body: Body<'m>) {
        self.worklist.push(body);
    }
}

#[derive(Clone, Copy)]
enum Jump {
    Break,
    Continue,
}

impl<'m> FlowChecker<'_, 'm> {
    fn visit_stmt(&mut self, stmt: &'m Stmt) {
        self.raised.and_with(&self.bits);
        match &stmt.kind {
            StmtKind::Expr(e) => self.visit_expr(e),
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value);
                for target in targets {
                    self.assign_target(target);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                match &target.kind {
                    ExprKind::Name(name) => self.read(name, target.id),
                    _ => self.assign_target(target),
                }
                self.visit_expr(value);
                if let ExprKind::Name(name) = &target.kind {
                    self.define(name);
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete_target(target);
                }
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
                self.bits = self.top();
            }
            StmtKind::Break => self.jump(Jump::Break),
            StmtKind::Continue => self.jump(Jump::Continue),
            StmtKind::Raise { exc, cause } => {
                if let Some(exc) = exc {
                    self.visit_expr(exc);
                }
                if let Some(cause) = cause {
                    self.visit_expr(cause);
                }
                self.raised.and_with(&self.bits);
                self.bits = self.top();
            }
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test);
                if let Some(msg) = msg {
                    let before = self.bits.clone();
                    self.visit_expr(msg);
                    self.bits = before;
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.visit_expr(test);
                let entry = self.bits.clone();
                self.walk_statements(body);
                let then = std::mem::replace(&mut self.bits, entry);
                self.walk_statements(orelse);
                self.bits.and_with(&then);
            }
            StmtKind::While { test, body, orelse } => self.walk_while(test, body, orelse),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.walk_for(target, iter, body, orelse),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.walk_try(body, handlers, orelse, finalbody),
            StmtKind::With { items, body } => {
                for item in items {
                    self.visit_expr(&item.context);
                    if let Some(target) = &item.target {
                        self.assign_target(target);
                    }
                }
                // `__exit__` may suppress, so the exceptional states reach
                // the statement after the block.
                let raised = self.walk_protected(body);
                self.bits.and_with(&raised);
            }
            StmtKind::Import(names) => {
                for alias in names {
                    self.define(&alias.bound_name());
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names.iter().filter(|a| !a.is_star()) {
                    self.define(alias.asname.as_ref().unwrap_or(&alias.name));
                }
            }
            StmtKind::FunctionDef(def) => {
                for decorator in &def.decorators {
                    self.visit_expr(decorator);
                }
                self.visit_parameters(&def.params);
                if let Some(returns) = &def.returns {
                    self.visit_expr(returns);
                }
                self.define(&def.name);
                self.nested(Body::Function(stmt.id, def));
            }
            StmtKind::ClassDef(def) => {
                for decorator in &def.decorators {
                    self.visit_expr(decorator);
                }
                for base in &def.bases {
                    self.visit_expr(base);
                }
                self.define(&def.name);
                self.nested(Body::Class(stmt.id, def));
            }
        }
    }

    fn visit_parameters(&mut self, params: &'m Parameters) {
        for param in params.iter() {
            if let Some(default) = &param.default {
                self.visit_expr(default);
            }
            if let Some(annotation) = &param.annotation {
                self.visit_expr(annotation);
            }
        }
    }

    fn visit_expr(&mut self, expr: &'m Expr) {
        match &expr.kind {
            ExprKind::Name(name) => self.read(name, expr.id),
            ExprKind::Lambda { params, body } => {
                self.visit_parameters(params);
                self.nested(Body::Lambda(expr, params, body));
            }
            ExprKind::ListComp { generators, .. }
            | ExprKind::SetComp { generators, .. }
            | ExprKind::GeneratorExp { generators, .. }
            | ExprKind::DictComp { generators, .. } => {
                if let Some(first) = generators.first() {
                    self.visit_expr(&first.iter);
                }
                self.nested(Body::Comprehension(expr));
            }
            _ => {
                for child in children(expr) {
                    self.visit_expr(child);
                }
            }
        }
    }
}

/// Direct sub-expressions of `expr` in evaluation order. Scope-introducing
/// expressions contribute nothing: their parts are handled by the caller.
fn children(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Name(_) => {}
        ExprKind::Attribute { value, .. } | ExprKind::Starred(value) => out.push(&**value),
        ExprKind::Subscript { value, index } => {
            out.push(&**value);
            out.push(&**index);
        }
        ExprKind::Slice { lower, upper, step } => {
            out.extend([lower, upper, step].into_iter().flatten().map(|e| &**e));
        }
        ExprKind::Tuple(items)
        | ExprKind::List(items)
        | ExprKind::Set(items)
        | ExprKind::JoinedStr(items)
        | ExprKind::BoolOp { values: items, .. } => out.extend(items),
        ExprKind::Dict(entries) => {
            for (k, v) in entries {
                out.push(k);
                out.push(v);
            }
        }
        ExprKind::Unary { operand, .. } => out.push(&**operand),
        ExprKind::Binary { left, right, .. } => {
            out.push(&**left);
            out.push(&**right);
        }
        ExprKind::Compare { left, comparisons } => {
            out.push(&**left);
            out.extend(comparisons.iter().map(|(_, e)| e));
        }
        ExprKind::IfExp { test, body, orelse } => {
            out.push(&**test);
            out.push(&**body);
            out.push(&**orelse);
        }
        ExprKind::Call { func, args } => {
            out.push(&**func);
            out.extend(args.iter().map(|a| a.value()));
        }
        ExprKind::Yield(value) => out.extend(value.as_deref()),
        ExprKind::Lambda { .. }
        | ExprKind::ListComp { .. }
        | ExprKind::SetComp { .. }
        | ExprKind::DictComp { .. }
        | ExprKind::GeneratorExp { .. } => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::{
        ast::{Expr, Stmt, build::*},
        binder::bind,
        diagnostic::DiagnosticSink,
    };

    type Body = fn(Expr) -> Vec<Stmt>;

    fn raise_value_error() -> Stmt {
        raise(Some(call(name("ValueError"), vec![])), None)
    }

    /// Binds `def f(c): <body>` where `body` places the read of `x` under
    /// test, and returns whether that read is guarded and whether `x` is
    /// flagged as read before initialization.
    fn check_read(body: Body) -> (bool, bool) {
        let read = name("x");
        let read_id = read.id;
        let module = module(vec![def("f", params(&["c"]), body(read))]);
        let mut sink = DiagnosticSink::new();
        let bindings = bind(&module, &mut sink);
        assert!(!sink.has_errors());

        let f = bindings
            .scopes()
            .iter()
            .copied()
            .find(|s| bindings.tree.scope(*s).name == "f")
            .unwrap();
        let x = bindings.tree.scope(f).lookup("x").unwrap();
        (
            bindings.is_guarded(read_id),
            bindings.tree.variable(x).read_before_initialized,
        )
    }

    #[rstest]
    #[case::both_branches_assign(
        |read| vec![
            if_(name("c"), vec![assign(vec![name("x")], int(1))], vec![assign(vec![name("x")], int(2))]),
            ret(Some(read)),
        ],
        false,
        false
    )]
    #[case::one_branch_assigns(
        |read| vec![
            if_(name("c"), vec![assign(vec![name("x")], int(1))], vec![]),
            ret(Some(read)),
        ],
        true,
        true
    )]
    #[case::read_after_del(
        |read| vec![
            assign(vec![name("x")], int(1)),
            del(vec![name("x")]),
            ret(Some(read)),
        ],
        true,
        false
    )]
    #[case::loop_back_edge_deletes(
        |read| vec![
            assign(vec![name("x")], int(1)),
            while_(name("c"), vec![expr_stmt(read), del(vec![name("x")])], vec![]),
        ],
        true,
        false
    )]
    #[case::loop_reassigns_after_del(
        |read| vec![
            assign(vec![name("x")], int(1)),
            while_(
                name("c"),
                vec![expr_stmt(read), del(vec![name("x")]), assign(vec![name("x")], int(2))],
                vec![],
            ),
        ],
        false,
        false
    )]
    #[case::try_body_deletes_before_handler(
        |read| vec![
            assign(vec![name("x")], int(1)),
            try_(
                vec![del(vec![name("x")]), expr_stmt(call(name("g"), vec![]))],
                vec![handler(None, None, vec![ret(Some(read))])],
                vec![],
                vec![],
            ),
        ],
        true,
        false
    )]
    #[case::try_body_deletes_before_finally(
        |read| vec![
            assign(vec![name("x")], int(1)),
            try_(
                vec![del(vec![name("x")]), assign(vec![name("x")], int(2))],
                vec![],
                vec![],
                vec![expr_stmt(read)],
            ),
        ],
        true,
        false
    )]
    #[case::nested_del_then_raise_reaches_handler(
        |read| vec![
            assign(vec![name("x")], int(1)),
            try_(
                vec![if_(name("c"), vec![del(vec![name("x")]), raise_value_error()], vec![])],
                vec![handler(Some(name("ValueError")), None, vec![ret(Some(read))])],
                vec![],
                vec![],
            ),
        ],
        true,
        false
    )]
    #[case::nested_del_then_raise_reaches_finally(
        |read| vec![
            assign(vec![name("x")], int(1)),
            try_(
                vec![if_(name("c"), vec![del(vec![name("x")]), raise_value_error()], vec![])],
                vec![],
                vec![],
                vec![expr_stmt(read)],
            ),
        ],
        true,
        false
    )]
    #[case::nested_del_then_raise_leaves_with(
        |read| vec![
            assign(vec![name("x")], int(1)),
            with_(
                vec![with_item(call(name("m"), vec![]), None)],
                vec![if_(name("c"), vec![del(vec![name("x")]), raise_value_error()], vec![])],
            ),
            ret(Some(read)),
        ],
        true,
        false
    )]
    #[case::assignment_in_try_may_not_happen(
        |read| vec![
            try_(
                vec![assign(vec![name("x")], call(name("g"), vec![]))],
                vec![handler(None, None, vec![pass()])],
                vec![],
                vec![],
            ),
            ret(Some(read)),
        ],
        true,
        true
    )]
    #[case::handler_assigns_too(
        |read| vec![
            try_(
                vec![assign(vec![name("x")], call(name("g"), vec![]))],
                vec![handler(None, None, vec![assign(vec![name("x")], int(0))])],
                vec![],
                vec![],
            ),
            ret(Some(read)),
        ],
        false,
        false
    )]
    fn test_read_guards(#[case] body: Body, #[case] guarded: bool, #[case] before_initialized: bool) {
        assert_eq!(check_read(body), (guarded, before_initialized));
    }
}
