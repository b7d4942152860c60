use std::sync::Arc;

use rstest::rstest;

use super::*;
use crate::{
    ast::{BinaryOp, build::*},
    backend::ExecutionMode,
    binder::bind,
    diagnostic::DiagnosticSink,
};

fn options() -> CompilerOptions {
    CompilerOptions {
        line_tracking: false,
        ..CompilerOptions::default()
    }
}

fn lower_with(body: Vec<Stmt>, options: &CompilerOptions) -> Lowered {
    let module = module(body);
    let mut sink = DiagnosticSink::new();
    let bindings = bind(&module, &mut sink);
    assert!(!sink.has_errors(), "{:?}", sink.first_error());
    lower_module(&module, &bindings, options)
}

fn lower(body: Vec<Stmt>) -> Lowered {
    lower_with(body, &options())
}

fn find<'e>(expr: &'e ir::Expr, pred: &dyn Fn(&ir::Expr) -> bool) -> Option<&'e ir::Expr> {
    if pred(expr) {
        return Some(expr);
    }
    expr.children().into_iter().find_map(|child| find(child, pred))
}

/// Code object named `name` anywhere below `code`.
fn code_named(code: &Arc<CodeObject>, name: &str) -> Arc<CodeObject> {
    fn search(expr: &ir::Expr, name: &str) -> Option<Arc<CodeObject>> {
        let nested = match expr {
            ir::Expr::MakeFunction(spec) => Some(&spec.code),
            ir::Expr::MakeClass(spec) => Some(&spec.body),
            _ => None,
        };
        if let Some(code) = nested {
            if code.name == name {
                return Some(Arc::clone(code));
            }
            if let Some(found) = search(&code.body, name) {
                return Some(found);
            }
        }
        expr.children().into_iter().find_map(|child| search(child, name))
    }
    search(&code.body, name).unwrap_or_else(|| panic!("no code object named {name}"))
}

#[test]
fn test_function_body() {
    let lowered = lower(vec![def(
        "f",
        params(&["a"]),
        vec![
            assign(vec![name("b")], binary(name("a"), BinaryOp::Add, int(1))),
            ret(Some(name("b"))),
        ],
    )]);
    let f = code_named(&lowered.code, "f");
    assert_eq!(
        f.body.to_string(),
        "(block (= b@local[1] (+ a@local[0] 1)) (return b@local[1]) (return None))"
    );
    assert_eq!(f.layout.locals, 2);
    assert_eq!(f.param_names().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(f.mode, ExecutionMode::Light);
}

#[test]
fn test_chained_assignment_evaluates_value_once() {
    let lowered = lower(vec![def(
        "f",
        params(&["x"]),
        vec![assign(vec![name("a"), name("b")], name("x"))],
    )]);
    let f = code_named(&lowered.code, "f");
    assert_eq!(
        f.body.to_string(),
        "(block (block (= $0 x@local[0]) (= a@local[1] $0) (= b@local[2] $0)) (return None))"
    );
}

#[test]
fn test_possibly_unbound_read_is_guarded() {
    let lowered = lower(vec![def(
        "f",
        params(&["c"]),
        vec![
            if_(name("c"), vec![assign(vec![name("x")], int(1))], vec![]),
            ret(Some(name("x"))),
        ],
    )]);
    let body = code_named(&lowered.code, "f").body.to_string();
    assert!(body.starts_with("(block (unbind x@local[1])"), "{body}");
    assert!(body.contains("(return x@local[1]!)"), "{body}");
    assert!(body.contains("(istrue c@local[0])"), "{body}");
}

#[test]
fn test_for_else_break_skips_else() {
    let lowered = lower(vec![def(
        "f",
        params(&["xs"]),
        vec![for_(name("x"), name("xs"), vec![break_()], vec![pass()])],
    )]);
    let f = code_named(&lowered.code, "f");
    let body = f.body.to_string();
    assert!(body.contains("(label L0 (block (loop L1 L2"), "{body}");
    assert!(body.contains("(break L0)"), "{body}");
    assert!(body.contains("(finally (if $1 (dispose $0) None))"), "{body}");
    assert!(f.flags.has_for_loop);
    assert_eq!(f.mode, ExecutionMode::Compiled);
}

#[test]
fn test_handler_name_is_unbound_after_handler() {
    let lowered = lower(vec![def(
        "f",
        params(&[]),
        vec![try_(
            vec![pass()],
            vec![handler(Some(name("ValueError")), Some("e"), vec![pass()])],
            vec![],
            vec![],
        )],
    )]);
    let body = code_named(&lowered.code, "f").body.to_string();
    assert!(body.contains("(catch $0 (if (exc-matches $0 ValueError@"), "{body}");
    assert!(body.contains("(= e@local[0] $0)"), "{body}");
    assert!(body.contains("(finally (unbind e@local[0]))"), "{body}");
    assert!(body.contains("(line-clear)"), "{body}");
    assert!(body.contains("(rethrow)"), "{body}");
}

#[test]
fn test_zero_argument_super_passes_class_cell_and_receiver() {
    let lowered = lower(vec![class(
        "C",
        vec![],
        vec![def(
            "m",
            params(&["self"]),
            vec![ret(Some(call(name("super"), vec![])))],
        )],
    )]);
    let class_body = code_named(&lowered.code, "C");
    assert!(class_body.layout.class_cell.is_some());
    let body = code_named(&lowered.code, "m").body.to_string();
    assert!(body.contains("__class__@free[0] self@local[0])"), "{body}");
}

#[test]
fn test_class_records_self_attributes() {
    let lowered = lower(vec![class(
        "Point",
        vec![],
        vec![def(
            "__init__",
            params(&["self", "x"]),
            vec![assign(vec![attr(name("self"), "x")], name("x"))],
        )],
    )]);
    let Some(ir::Expr::MakeClass(spec)) =
        find(&lowered.code.body, &|e| matches!(e, ir::Expr::MakeClass(_)))
    else {
        panic!("no class in module body");
    };
    assert_eq!(spec.self_attrs, vec!["x"]);
    assert_eq!(lowered.class_bodies.len(), 1);
    assert!(spec.body.body.to_string().contains("(= __module__@name __name__@name)"));
}

#[test]
fn test_comprehension_evaluates_outer_iterable_in_enclosing_scope() {
    let lowered = lower(vec![def(
        "f",
        params(&["xs"]),
        vec![ret(Some(list_comp(
            name("x"),
            vec![comp_for(name("x"), name("xs"), vec![])],
        )))],
    )]);
    let body = code_named(&lowered.code, "f").body.to_string();
    assert!(body.contains("(call (function <listcomp>) xs@local[0])"), "{body}");

    let comp = code_named(&lowered.code, "<listcomp>");
    let comp_body = comp.body.to_string();
    assert!(comp_body.starts_with("(block (= $0 (list))"), "{comp_body}");
    assert!(comp_body.contains("(list-append $0 x@local[1]"), "{comp_body}");
    assert_eq!(comp.param_names().collect::<Vec<_>>(), vec![".0"]);
}

#[test]
fn test_generator_resumption_paths() {
    let lowered = lower(vec![def(
        "g",
        params(&[]),
        vec![
            assign(vec![name("x")], yield_(Some(int(1)))),
            expr_stmt(yield_(Some(name("x")))),
        ],
    )]);
    let g = code_named(&lowered.code, "g");
    assert!(g.is_generator());
    assert_eq!(g.mode, ExecutionMode::Compiled);
    assert_eq!(g.resumption, vec![vec![1, 0, 0, 0], vec![2, 0, 0]]);
    assert_eq!(g.resume_path(1), Some(&[2, 0, 0][..]));
    assert!(g.body.to_string().ends_with("(yield-break None))"));
}

#[test]
fn test_yield_inside_call_is_spilled() {
    let lowered = lower(vec![def(
        "g",
        params(&["f"]),
        vec![expr_stmt(call(name("f"), vec![pos(yield_(None))]))],
    )]);
    let g = code_named(&lowered.code, "g");
    let body = g.body.to_string();
    assert!(body.contains("(call $"), "{body}");
    assert_eq!(g.resumption.len(), 1);
    let Some(ir::Expr::Call { callee, .. }) =
        find(&g.body, &|e| matches!(e, ir::Expr::Call { .. }))
    else {
        panic!("no call in generator body");
    };
    assert!(matches!(**callee, ir::Expr::Temp(_)));
}

#[rstest]
#[case::folded(true, "(= x@global[")]
#[case::kept(false, "(+ (* 2 3) 1)")]
fn test_constant_folding(#[case] optimize: bool, #[case] expected: &str) {
    let options = CompilerOptions {
        optimize,
        ..options()
    };
    let lowered = lower_with(
        vec![assign(
            vec![name("x")],
            binary(binary(int(2), BinaryOp::Mult, int(3)), BinaryOp::Add, int(1)),
        )],
        &options,
    );
    let body = lowered.code.body.to_string();
    assert!(body.contains(expected), "{body}");
    assert_eq!(body.contains("] 7)"), optimize, "{body}");
}

#[test]
fn test_line_tracking_marks_statements_that_can_raise() {
    let lowered = lower_with(
        vec![
            pass().on_line(1),
            expr_stmt(call(name("print"), vec![])).on_line(2),
        ],
        &CompilerOptions::default(),
    );
    let body = lowered.code.body.to_string();
    assert!(body.contains("(line 2) (call print@"), "{body}");
    assert!(!body.contains("(line 1)"), "{body}");
}

#[test]
fn test_module_prologue_names() {
    let lowered = lower(vec![]);
    assert_eq!(
        lowered.code.body.to_string(),
        "(block (= __name__@name '__main__') (= __file__@name '<string>') (= __doc__@name None) None)"
    );
}

#[test]
fn test_decorators_apply_innermost_first() {
    let lowered = lower(vec![decorated_def(
        "f",
        params(&[]),
        vec![pass()],
        vec![name("outer"), name("inner")],
    )]);
    let body = lowered.code.body.to_string();
    assert!(body.contains("(= $0 outer@"), "{body}");
    assert!(body.contains("(call $0 (call $1 (function f)))"), "{body}");
}
