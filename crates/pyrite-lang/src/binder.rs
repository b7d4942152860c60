//! Name binding.
//!
//! Binding runs in order:
//! 1. declare: discover scopes, define variables and collect references,
//! 2. resolve: bind each reference, registering free and cell variables,
//! 3. verify: report scope-level restrictions,
//! 4. flow: definite-assignment analysis,
//! 5. finish: closure tuples and per-name storage.

mod declare;
mod resolve;

use rustc_hash::{FxHashMap, FxHashSet};

pub use declare::COMPREHENSION_ARG;

use crate::{
    ast::{Module, NodeId},
    diagnostic::DiagnosticSink,
    flow,
    scope::{ScopeId, ScopeTree, Storage},
};

/// Result of binding one module.
#[derive(Debug, Clone)]
pub struct Bindings {
    pub tree: ScopeTree,
    scope_nodes: FxHashMap<NodeId, ScopeId>,
    guarded: FxHashSet<NodeId>,
    super_calls: FxHashSet<NodeId>,
    order: Vec<ScopeId>,
}

impl Bindings {
    /// Scope introduced by a module, function, class, lambda or
    /// comprehension node.
    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.scope_nodes.get(&node).copied()
    }

    /// The name read `node` needs a runtime unbound check.
    pub fn is_guarded(&self, node: NodeId) -> bool {
        self.guarded.contains(&node)
    }

    /// `node` is a zero-argument `super()` call inside a method.
    pub fn is_super_call(&self, node: NodeId) -> bool {
        self.super_calls.contains(&node)
    }

    /// Scopes in discovery order, parents first.
    pub fn scopes(&self) -> &[ScopeId] {
        &self.order
    }

    pub fn storage(&self, scope: ScopeId, name: &str) -> Option<Storage> {
        self.tree.scope(scope).storage_of(name)
    }
}

pub fn bind(module: &Module, sink: &mut DiagnosticSink) -> Bindings {
    let declare::Declared {
        mut tree,
        scope_nodes,
        super_calls,
        order,
    } = declare::declare(module, sink);

    resolve::bind_references(&mut tree, &order, sink);
    resolve::verify(&tree, &order, sink);
    let guarded = flow::check(module, &mut tree, &scope_nodes);
    resolve::finish(&mut tree, &order);

    tracing::debug!(
        scopes = tree.len(),
        globals = tree.global_names().len(),
        diagnostics = sink.len(),
        "module bound"
    );

    Bindings {
        tree,
        scope_nodes,
        guarded,
        super_calls,
        order,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        ast::{BinaryOp, Stmt, build::*},
        diagnostic::Severity,
        scope::{ClosureEntry, ScopeKind},
    };

    fn bind_body(body: Vec<Stmt>) -> (Module, Bindings, DiagnosticSink) {
        let module = module(body);
        let mut sink = DiagnosticSink::new();
        let bindings = bind(&module, &mut sink);
        (module, bindings, sink)
    }

    fn scope_named(bindings: &Bindings, name: &str) -> ScopeId {
        bindings
            .scopes()
            .iter()
            .copied()
            .find(|s| bindings.tree.scope(*s).name == name)
            .unwrap_or_else(|| panic!("no scope named {name}"))
    }

    fn messages(sink: &DiagnosticSink) -> Vec<String> {
        sink.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn test_captured_variable_becomes_cell_and_free() {
        let (_, b, sink) = bind_body(vec![def(
            "f",
            params(&[]),
            vec![
                assign(vec![name("x")], int(1)),
                def("g", params(&[]), vec![ret(Some(name("x")))]),
                assign(vec![name("x")], int(2)),
                ret(Some(call(name("g"), vec![]))),
            ],
        )]);
        assert!(sink.is_empty());

        let f = scope_named(&b, "f");
        let g = scope_named(&b, "g");
        assert_eq!(b.storage(f, "x"), Some(Storage::Cell(0)));
        assert_eq!(b.storage(g, "x"), Some(Storage::Free(0)));
        assert_eq!(b.storage(f, "g"), Some(Storage::Local(0)));
        assert_eq!(b.tree.scope(g).closure_map, vec![0]);
        assert_eq!(b.tree.scope(f).closure.len(), 1);

        let x = b.tree.scope(f).lookup("x").unwrap();
        assert!(b.tree.variable(x).accessed_in_nested_scope);
        assert!(b.tree.scope(f).flags.contains_nested_free_variables);
    }

    #[test]
    fn test_uncaptured_local_stays_in_slot() {
        let (_, b, _) = bind_body(vec![def(
            "f",
            params(&["a"]),
            vec![assign(vec![name("y")], name("a")), ret(Some(name("y")))],
        )]);
        let f = scope_named(&b, "f");
        assert_eq!(b.storage(f, "a"), Some(Storage::Local(0)));
        assert_eq!(b.storage(f, "y"), Some(Storage::Local(1)));
        assert!(b.tree.scope(f).closure.is_empty());
        assert_eq!(b.tree.scope(f).local_count, 2);
    }

    #[test]
    fn test_intermediate_scope_forwards_free_variable() {
        let (_, b, _) = bind_body(vec![def(
            "outer",
            params(&[]),
            vec![
                assign(vec![name("v")], int(1)),
                def(
                    "middle",
                    params(&[]),
                    vec![def("inner", params(&[]), vec![ret(Some(name("v")))])],
                ),
            ],
        )]);
        let middle = scope_named(&b, "middle");
        let inner = scope_named(&b, "inner");
        assert_eq!(b.tree.scope(middle).free_variables.len(), 1);
        assert_eq!(b.storage(inner, "v"), Some(Storage::Free(0)));
        assert_eq!(b.tree.scope(inner).closure_map, vec![0]);
        assert_eq!(b.storage(middle, "v"), None);
    }

    #[test]
    fn test_class_locals_are_not_visible_to_methods() {
        let (_, b, _) = bind_body(vec![class(
            "C",
            vec![],
            vec![
                assign(vec![name("attr")], int(1)),
                def("m", params(&["self"]), vec![ret(Some(name("attr")))]),
            ],
        )]);
        let c = scope_named(&b, "C");
        let m = scope_named(&b, "m");
        assert_eq!(b.storage(c, "attr"), Some(Storage::Name));
        assert!(matches!(b.storage(m, "attr"), Some(Storage::Global(_))));
        assert!(b.tree.scope(m).referenced_globals.contains(&"attr".into()));
    }

    #[test]
    fn test_zero_argument_super_captures_class_cell() {
        let super_call = call(name("super"), vec![]);
        let call_id = super_call.id;
        let (_, b, sink) = bind_body(vec![class(
            "C",
            vec![],
            vec![def(
                "m",
                params(&["self"]),
                vec![expr_stmt(call(attr(super_call, "m"), vec![]))],
            )],
        )]);
        assert!(sink.is_empty());
        assert!(b.is_super_call(call_id));

        let c = scope_named(&b, "C");
        let m = scope_named(&b, "m");
        assert_eq!(b.storage(m, "__class__"), Some(Storage::Free(0)));
        let class_var = b.tree.scope(c).lookup("__class__").unwrap();
        assert_eq!(b.tree.scope(c).closure, vec![ClosureEntry::Cell(class_var)]);
    }

    #[test]
    fn test_global_declaration_binds_module_slot() {
        let (_, b, sink) = bind_body(vec![
            assign(vec![name("counter")], int(0)),
            def(
                "bump",
                params(&[]),
                vec![
                    global(&["counter"]),
                    aug_assign(name("counter"), BinaryOp::Add, int(1)),
                ],
            ),
        ]);
        assert!(sink.is_empty());
        let bump = scope_named(&b, "bump");
        let slot = b.tree.global_names().iter().position(|n| n == "counter").unwrap() as u32;
        assert_eq!(b.storage(bump, "counter"), Some(Storage::Global(slot)));
    }

    #[test]
    fn test_nonlocal_rebinds_enclosing_variable() {
        let (_, b, sink) = bind_body(vec![def(
            "f",
            params(&[]),
            vec![
                assign(vec![name("n")], int(0)),
                def(
                    "inc",
                    params(&[]),
                    vec![nonlocal(&["n"]), aug_assign(name("n"), BinaryOp::Add, int(1))],
                ),
            ],
        )]);
        assert!(sink.is_empty());
        let inc = scope_named(&b, "inc");
        assert_eq!(b.storage(inc, "n"), Some(Storage::Free(0)));
    }

    #[test]
    fn test_nonlocal_without_binding_is_an_error() {
        let (_, _, sink) = bind_body(vec![def(
            "f",
            params(&[]),
            vec![nonlocal(&["missing"]), assign(vec![name("missing")], int(1))],
        )]);
        assert_eq!(messages(&sink), vec!["no binding for nonlocal 'missing' found"]);
    }

    #[rstest]
    #[case::assigned_before_global(
        true,
        vec![assign(vec![name("x")], int(1)), global(&["x"])],
        "name 'x' is assigned to before global declaration",
        Severity::Warning
    )]
    #[case::used_before_global(
        true,
        vec![expr_stmt(name("x")), global(&["x"])],
        "name 'x' is used prior to global declaration",
        Severity::Warning
    )]
    #[case::nonlocal_at_module_level(
        false,
        vec![nonlocal(&["x"])],
        "nonlocal declaration not allowed at module level",
        Severity::Error
    )]
    #[case::return_outside_function(false, vec![ret(None)], "'return' outside function", Severity::Error)]
    #[case::break_outside_loop(false, vec![break_()], "'break' outside loop", Severity::Error)]
    #[case::continue_outside_loop(
        true,
        vec![continue_()],
        "'continue' not properly in loop",
        Severity::Error
    )]
    #[case::assign_to_literal(
        false,
        vec![assign(vec![int(1)], int(2))],
        "can't assign to literal",
        Severity::Error
    )]
    #[case::assign_to_call(
        false,
        vec![assign(vec![call(name("f"), vec![])], int(2))],
        "can't assign to function call",
        Severity::Error
    )]
    #[case::two_starred(
        false,
        vec![assign(vec![tuple(vec![starred(name("a")), starred(name("b"))])], name("c"))],
        "two starred expressions in assignment",
        Severity::Error
    )]
    #[case::duplicate_argument(
        false,
        vec![def("f", params(&["a", "a"]), vec![pass()])],
        "duplicate argument 'a' in function definition",
        Severity::Error
    )]
    #[case::yield_outside_function(
        false,
        vec![expr_stmt(yield_(None))],
        "'yield' outside function",
        Severity::Error
    )]
    fn test_binding_diagnostics(
        #[case] in_function: bool,
        #[case] body: Vec<Stmt>,
        #[case] message: &str,
        #[case] severity: Severity,
    ) {
        let body = if in_function {
            vec![def("f", params(&[]), body)]
        } else {
            body
        };
        let (_, _, sink) = bind_body(body);
        let diagnostic = sink.iter().next().expect("one diagnostic");
        assert_eq!(diagnostic.message, message);
        assert_eq!(diagnostic.severity, severity);
    }

    #[test]
    fn test_parameter_declared_global_is_an_error() {
        let (_, _, sink) = bind_body(vec![def("f", params(&["p"]), vec![global(&["p"])])]);
        assert_eq!(
            messages(&sink),
            vec!["Name 'p' is a function parameter and declared global"]
        );
    }

    #[test]
    fn test_delete_of_captured_variable_is_an_error() {
        let (_, _, sink) = bind_body(vec![def(
            "f",
            params(&[]),
            vec![
                assign(vec![name("x")], int(1)),
                def("g", params(&[]), vec![ret(Some(name("x")))]),
                del(vec![name("x").on_line(4)]),
            ],
        )]);
        assert_eq!(
            messages(&sink),
            vec!["can not delete variable 'x' referenced in nested scope"]
        );
        let at = sink.first_error().map(|d| d.span);
        assert_eq!(at, Some(name("x").on_line(4).span));
    }

    #[test]
    fn test_star_import_in_nested_function_is_fatal() {
        let (_, _, sink) = bind_body(vec![def(
            "outer",
            params(&[]),
            vec![def("inner", params(&[]), vec![import_star("os")])],
        )]);
        assert!(sink.has_errors());
        assert_eq!(
            sink.first_error().map(|d| d.message.as_str()),
            Some("import * is not allowed in function 'inner' because it is a nested function")
        );
    }

    #[test]
    fn test_star_import_forces_dictionary_storage() {
        let (_, b, sink) = bind_body(vec![def(
            "f",
            params(&[]),
            vec![
                import_star("os"),
                assign(vec![name("y")], int(1)),
                ret(Some(name("path"))),
            ],
        )]);
        assert!(sink.is_empty());
        let f = scope_named(&b, "f");
        let flags = b.tree.scope(f).flags;
        assert!(flags.needs_dictionary && flags.has_late_bound_sets && flags.contains_import_star);
        assert_eq!(b.storage(f, "y"), Some(Storage::Dictionary));
        assert_eq!(b.storage(f, "path"), Some(Storage::Name));
    }

    #[test]
    fn test_dictionary_wins_over_cell() {
        let (_, b, _) = bind_body(vec![def(
            "f",
            params(&[]),
            vec![
                assign(vec![name("x")], int(1)),
                expr_stmt(call(name("locals"), vec![])),
                def("g", params(&[]), vec![ret(Some(name("x")))]),
            ],
        )]);
        let f = scope_named(&b, "f");
        let g = scope_named(&b, "g");
        assert_eq!(b.storage(f, "x"), Some(Storage::Dictionary));
        assert_eq!(b.storage(g, "x"), Some(Storage::FreeDictionary(0)));
        assert_eq!(b.tree.scope(f).closure, vec![ClosureEntry::Namespace(f)]);
    }

    #[test]
    fn test_comprehension_first_iterable_binds_in_enclosing_scope() {
        // def f(x): return [x for x in x if x]
        let comp = list_comp(name("x"), vec![comp_for(name("x"), name("x"), vec![name("x")])]);
        let comp_id = comp.id;
        let (_, b, _) = bind_body(vec![def("f", params(&["x"]), vec![ret(Some(comp))])]);

        let f = scope_named(&b, "f");
        let inner = b.scope_of(comp_id).unwrap();
        assert_eq!(b.tree.scope(inner).kind, ScopeKind::Comprehension);
        assert_eq!(b.storage(f, "x"), Some(Storage::Local(0)));
        assert_eq!(b.storage(inner, "x"), Some(Storage::Local(1)));
        assert_eq!(b.storage(inner, COMPREHENSION_ARG), Some(Storage::Local(0)));
        assert!(b.tree.scope(inner).free_variables.is_empty());
    }

    #[test]
    fn test_read_before_assignment_is_guarded() {
        let read = name("a");
        let read_id = read.id;
        let later = name("a");
        let later_id = later.id;
        let (_, b, _) = bind_body(vec![def(
            "f",
            params(&[]),
            vec![
                expr_stmt(call(name("print"), vec![pos(read)])),
                assign(vec![name("a")], int(1)),
                expr_stmt(later),
            ],
        )]);
        assert!(b.is_guarded(read_id));
        assert!(!b.is_guarded(later_id));

        let f = scope_named(&b, "f");
        let a = b.tree.scope(f).lookup("a").unwrap();
        assert!(b.tree.variable(a).read_before_initialized);
    }
}
