use pyrite_lang::ast::{BinaryOp, CompareOp, Stmt, build::*};
use pyrite_runtime::{Backend, Execution, Interpreter, InterpreterOptions, RuntimeError, TraceEntry, Value};
use rstest::rstest;
use tracing_subscriber::EnvFilter;

fn interpreter(backend: Backend) -> Interpreter {
    // `RUST_LOG=pyrite_lang=debug` shows backend selection and promotion.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Interpreter::new(InterpreterOptions::default().with_backend(backend))
}

fn run(backend: Backend, body: Vec<Stmt>) -> Execution {
    interpreter(backend).run(&module(body)).unwrap()
}

fn strs(items: &[&str]) -> Value {
    Value::list(items.iter().map(|s| Value::str(*s)).collect())
}

/// `def t(x): log.append(x); return x`
fn tracer() -> Vec<Stmt> {
    vec![
        assign(vec![name("log")], list(vec![])),
        def(
            "t",
            params(&["x"]),
            vec![
                expr_stmt(call(attr(name("log"), "append"), vec![pos(name("x"))])),
                ret(Some(name("x"))),
            ],
        ),
    ]
}

#[rstest]
fn test_closure_sees_latest_binding(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![
            def(
                "outer",
                params(&[]),
                vec![
                    assign(vec![name("x")], int(1)),
                    def("inner", params(&[]), vec![ret(Some(name("x")))]),
                    assign(vec![name("x")], int(2)),
                    ret(Some(call(name("inner"), vec![]))),
                ],
            ),
            assign(vec![name("r")], call(name("outer"), vec![])),
        ],
    );
    assert_eq!(execution.get("r"), Some(Value::Int(2)));
}

#[rstest]
fn test_starred_unpack(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![assign(
            vec![tuple(vec![name("a"), starred(name("b")), name("c")])],
            list(vec![int(1), int(2), int(3), int(4)]),
        )],
    );
    assert_eq!(execution.get("a"), Some(Value::Int(1)));
    assert_eq!(execution.get("b"), Some(Value::list(vec![Value::Int(2), Value::Int(3)])));
    assert_eq!(execution.get("c"), Some(Value::Int(4)));
}

#[rstest]
#[case::completes(3, "done")]
#[case::breaks(2, "")]
fn test_for_else(
    #[values(Backend::Light, Backend::Compiled)] backend: Backend,
    #[case] stop_at: i64,
    #[case] expected: &str,
) {
    let execution = run(
        backend,
        vec![
            assign(vec![name("r")], str_("")),
            for_(
                name("i"),
                list(vec![int(1), int(2)]),
                vec![if_(
                    compare(name("i"), vec![(CompareOp::Eq, int(stop_at))]),
                    vec![break_()],
                    vec![],
                )],
                vec![assign(vec![name("r")], str_("done"))],
            ),
        ],
    );
    assert_eq!(execution.get("r"), Some(Value::str(expected)));
}

#[rstest]
fn test_try_except_finally(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![
            assign(vec![name("cleanup")], bool_(false)),
            try_(
                vec![raise(Some(call(name("ValueError"), vec![pos(str_("x"))])), None)],
                vec![handler(
                    Some(name("ValueError")),
                    Some("e"),
                    vec![assign(vec![name("msg")], call(name("str"), vec![pos(name("e"))]))],
                )],
                vec![],
                vec![assign(vec![name("cleanup")], bool_(true))],
            ),
        ],
    );
    assert_eq!(execution.get("msg"), Some(Value::str("x")));
    assert_eq!(execution.get("cleanup"), Some(Value::Bool(true)));
    assert!(execution.get("e").is_none());
}

#[rstest]
fn test_conditional_expression_short_circuits(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let mut body = tracer();
    body.push(assign(
        vec![name("r")],
        if_exp(
            bool_(false),
            call(name("t"), vec![pos(str_("a"))]),
            call(name("t"), vec![pos(str_("b"))]),
        ),
    ));
    let execution = run(backend, body);
    assert_eq!(execution.get("r"), Some(Value::str("b")));
    assert_eq!(execution.get("log"), Some(strs(&["b"])));
}

#[rstest]
fn test_operands_evaluate_left_to_right(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let t = |s: &str| call(name("t"), vec![pos(str_(s))]);
    let mut body = tracer();
    body.push(assign(
        vec![name("r")],
        binary(t("a"), BinaryOp::Add, binary(t("b"), BinaryOp::Add, t("c"))),
    ));
    let execution = run(backend, body);
    assert_eq!(execution.get("r"), Some(Value::str("abc")));
    assert_eq!(execution.get("log"), Some(strs(&["a", "b", "c"])));
}

#[rstest]
fn test_chained_assignment_evaluates_value_first(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let t = |s: &str| call(name("t"), vec![pos(str_(s))]);
    let mut body = tracer();
    body.push(assign(vec![name("a")], dict(vec![])));
    body.push(assign(vec![name("b")], dict(vec![])));
    body.push(assign(
        vec![subscript(name("a"), t("f")), subscript(name("b"), t("g"))],
        t("h"),
    ));
    body.push(assign(vec![name("r")], subscript(name("b"), str_("g"))));
    let execution = run(backend, body);
    assert_eq!(execution.get("log"), Some(strs(&["h", "f", "g"])));
    assert_eq!(execution.get("r"), Some(Value::str("h")));
}

#[rstest]
fn test_untaken_branch_never_divides(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![assign(
            vec![name("x")],
            if_exp(bool_(true), int(1), binary(int(1), BinaryOp::Div, int(0))),
        )],
    );
    assert_eq!(execution.get("x"), Some(Value::Int(1)));
}

#[rstest]
fn test_unbound_local_traceback(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let body = vec![
        def(
            "f",
            params(&[]),
            vec![
                assign(vec![name("y")], name("x")).on_line(2),
                assign(vec![name("x")], int(1)).on_line(3),
            ],
        )
        .on_line(1),
        expr_stmt(call(name("f"), vec![])).on_line(4),
    ];
    let err = interpreter(backend).run(&module(body)).unwrap_err();
    let RuntimeError::Uncaught {
        class,
        message,
        traceback,
        ..
    } = err
    else {
        panic!("expected an uncaught exception, got {err:?}");
    };
    assert_eq!(class, "UnboundLocalError");
    assert_eq!(message, "local variable 'x' referenced before assignment");
    assert_eq!(
        traceback,
        vec![
            TraceEntry {
                code: "<module>".into(),
                line: 4,
            },
            TraceEntry {
                code: "f".into(),
                line: 2,
            },
        ]
    );
}

#[test]
fn test_auto_backend_promotes_hot_functions() {
    let execution = run(
        Backend::Auto,
        vec![
            def("f", params(&[]), vec![ret(Some(int(1)))]),
            expr_stmt(call(name("f"), vec![])),
            expr_stmt(call(name("f"), vec![])),
            expr_stmt(call(name("f"), vec![])),
        ],
    );
    let Some(Value::Function(f)) = execution.get("f") else {
        panic!("f is not a function");
    };
    assert_eq!(f.code.invocations(), 3);
    assert!(f.code.light.is_some());
    assert!(f.code.delegate.is_compiled());
}

#[test]
fn test_light_backend_never_compiles_light_code() {
    let execution = run(
        Backend::Light,
        vec![
            def("f", params(&[]), vec![ret(Some(int(1)))]),
            expr_stmt(call(name("f"), vec![])),
            expr_stmt(call(name("f"), vec![])),
            expr_stmt(call(name("f"), vec![])),
        ],
    );
    let Some(Value::Function(f)) = execution.get("f") else {
        panic!("f is not a function");
    };
    assert!(!f.code.delegate.is_compiled());
}

#[rstest]
fn test_generator_send_and_close(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![
            assign(vec![name("log")], list(vec![])),
            def(
                "gen",
                params(&[]),
                vec![try_(
                    vec![
                        assign(vec![name("x")], yield_(Some(int(1)))),
                        expr_stmt(call(attr(name("log"), "append"), vec![pos(name("x"))])),
                        expr_stmt(yield_(Some(int(2)))),
                    ],
                    vec![],
                    vec![],
                    vec![expr_stmt(call(attr(name("log"), "append"), vec![pos(str_("cleanup"))]))],
                )],
            ),
            assign(vec![name("g")], call(name("gen"), vec![])),
            assign(vec![name("a")], call(name("next"), vec![pos(name("g"))])),
            assign(vec![name("b")], call(attr(name("g"), "send"), vec![pos(str_("sent"))])),
            expr_stmt(call(attr(name("g"), "close"), vec![])),
        ],
    );
    assert_eq!(execution.get("a"), Some(Value::Int(1)));
    assert_eq!(execution.get("b"), Some(Value::Int(2)));
    assert_eq!(execution.get("log"), Some(strs(&["sent", "cleanup"])));
}

#[rstest]
fn test_generator_drives_for_loop(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![
            def(
                "count",
                params(&["n"]),
                vec![
                    assign(vec![name("i")], int(0)),
                    while_(
                        compare(name("i"), vec![(CompareOp::Lt, name("n"))]),
                        vec![
                            expr_stmt(yield_(Some(name("i")))),
                            aug_assign(name("i"), BinaryOp::Add, int(1)),
                        ],
                        vec![],
                    ),
                ],
            ),
            assign(vec![name("total")], int(0)),
            for_(
                name("v"),
                call(name("count"), vec![pos(int(4))]),
                vec![aug_assign(name("total"), BinaryOp::Add, name("v"))],
                vec![],
            ),
        ],
    );
    assert_eq!(execution.get("total"), Some(Value::Int(6)));
}

#[rstest]
fn test_unbounded_recursion_raises(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let options = InterpreterOptions::default()
        .with_backend(backend)
        .with_max_call_depth(20);
    let body = vec![
        def(
            "f",
            params(&["n"]),
            vec![ret(Some(call(
                name("f"),
                vec![pos(binary(name("n"), BinaryOp::Add, int(1)))],
            )))],
        ),
        expr_stmt(call(name("f"), vec![pos(int(0))])),
    ];
    let err = Interpreter::new(options).run(&module(body)).unwrap_err();
    assert_eq!(err.exception_class(), Some("RecursionError"));
}

#[rstest]
fn test_imports_registered_modules(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let interpreter = interpreter(backend);
    interpreter.register_module("pkg", module(vec![]));
    interpreter.register_module("pkg.util", module(vec![assign(vec![name("value")], int(41))]));
    interpreter.register_native_module("host", [("answer", Value::Int(1))]);

    let execution = interpreter
        .run(&module(vec![
            import(vec![alias("pkg.util", None)]),
            import_from(Some("host"), vec![alias("answer", Some("one"))], 0),
            assign(
                vec![name("r")],
                binary(attr(attr(name("pkg"), "util"), "value"), BinaryOp::Add, name("one")),
            ),
        ]))
        .unwrap();
    assert_eq!(execution.get("r"), Some(Value::Int(42)));
}

#[test]
fn test_missing_module() {
    let err = Interpreter::default()
        .run(&module(vec![import(vec![alias("missing", None)])]))
        .unwrap_err();
    assert_eq!(err.exception_class(), Some("ImportError"));
    assert_eq!(err.to_string(), "ImportError: No module named 'missing'");
}

#[rstest]
fn test_print_is_captured(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let interpreter = interpreter(backend);
    interpreter
        .run(&module(vec![
            expr_stmt(call(name("print"), vec![pos(str_("a")), pos(int(1)), kw("sep", str_("-"))])),
            expr_stmt(call(name("print"), vec![pos(list(vec![int(1), str_("b")]))])),
        ]))
        .unwrap();
    assert_eq!(interpreter.output(), "a-1\n[1, 'b']\n");
}

#[rstest]
fn test_class_with_super(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![
            class(
                "Base",
                vec![],
                vec![def("name", params(&["self"]), vec![ret(Some(str_("base")))])],
            ),
            class(
                "Child",
                vec![name("Base")],
                vec![def(
                    "name",
                    params(&["self"]),
                    vec![ret(Some(binary(
                        call(attr(call(name("super"), vec![]), "name"), vec![]),
                        BinaryOp::Add,
                        str_("+child"),
                    )))],
                )],
            ),
            assign(
                vec![name("r")],
                call(attr(call(name("Child"), vec![]), "name"), vec![]),
            ),
        ],
    );
    assert_eq!(execution.get("r"), Some(Value::str("base+child")));
}

#[rstest]
fn test_with_exit_suppresses_exception(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let log = |s: &str| expr_stmt(call(attr(name("log"), "append"), vec![pos(str_(s))]));
    let execution = run(
        backend,
        vec![
            assign(vec![name("log")], list(vec![])),
            class(
                "Manager",
                vec![],
                vec![
                    def("__enter__", params(&["self"]), vec![log("enter"), ret(Some(int(1)))]),
                    def(
                        "__exit__",
                        params(&["self", "kind", "value", "tb"]),
                        vec![log("exit"), ret(Some(bool_(true)))],
                    ),
                ],
            ),
            with_(
                vec![with_item(call(name("Manager"), vec![]), Some(name("v")))],
                vec![log("body"), raise(Some(call(name("ValueError"), vec![])), None), log("unreached")],
            ),
        ],
    );
    assert_eq!(execution.get("v"), Some(Value::Int(1)));
    assert_eq!(execution.get("log"), Some(strs(&["enter", "body", "exit"])));
}

fn suppressing_manager() -> Stmt {
    class(
        "Manager",
        vec![],
        vec![
            def("__enter__", params(&["self"]), vec![ret(Some(name("self")))]),
            def(
                "__exit__",
                params(&["self", "kind", "value", "tb"]),
                vec![ret(Some(bool_(true)))],
            ),
        ],
    )
}

/// `x = 1; <region around: if c: del x; raise ValueError()>; return x`
#[rstest]
#[case::try_handler(|deleting| vec![try_(
    deleting,
    vec![handler(Some(name("ValueError")), None, vec![ret(Some(name("x")))])],
    vec![],
    vec![],
)])]
#[case::suppressing_with(|deleting| vec![
    with_(vec![with_item(call(name("Manager"), vec![]), None)], deleting),
    ret(Some(name("x"))),
])]
fn test_delete_before_raise_unbinds_in_handler(
    #[values(Backend::Light, Backend::Compiled)] backend: Backend,
    #[case] region: fn(Vec<Stmt>) -> Vec<Stmt>,
) {
    let deleting = vec![if_(
        name("c"),
        vec![
            del(vec![name("x")]),
            raise(Some(call(name("ValueError"), vec![])), None),
        ],
        vec![],
    )];
    let mut body = vec![assign(vec![name("x")], int(1))];
    body.extend(region(deleting));
    let body = vec![
        suppressing_manager(),
        def("f", params(&["c"]), body),
        assign(vec![name("r")], call(name("f"), vec![pos(bool_(false))])),
        expr_stmt(call(name("f"), vec![pos(bool_(true))])),
    ];

    let err = interpreter(backend).run(&module(body)).unwrap_err();
    let RuntimeError::Uncaught { class, message, .. } = err else {
        panic!("expected an uncaught exception, got {err:?}");
    };
    assert_eq!(class, "UnboundLocalError");
    assert_eq!(message, "local variable 'x' referenced before assignment");
}

#[rstest]
fn test_comprehension_iterable_binds_in_enclosing_scope(
    #[values(Backend::Light, Backend::Compiled)] backend: Backend,
) {
    let execution = run(
        backend,
        vec![
            def(
                "f",
                params(&["x"]),
                vec![ret(Some(list_comp(
                    name("x"),
                    vec![comp_for(name("x"), name("x"), vec![name("x")])],
                )))],
            ),
            assign(
                vec![name("r")],
                call(name("f"), vec![pos(list(vec![int(0), int(1), int(2)]))]),
            ),
        ],
    );
    assert_eq!(execution.get("r"), Some(Value::list(vec![Value::Int(1), Value::Int(2)])));
}

#[rstest]
fn test_nonlocal_assignment_updates_enclosing(#[values(Backend::Light, Backend::Compiled)] backend: Backend) {
    let execution = run(
        backend,
        vec![
            def(
                "outer",
                params(&[]),
                vec![
                    assign(vec![name("x")], int(1)),
                    def(
                        "inner",
                        params(&[]),
                        vec![nonlocal(&["x"]), assign(vec![name("x")], int(2))],
                    ),
                    expr_stmt(call(name("inner"), vec![])),
                    ret(Some(name("x"))),
                ],
            ),
            assign(vec![name("r")], call(name("outer"), vec![])),
        ],
    );
    assert_eq!(execution.get("r"), Some(Value::Int(2)));
}

#[rstest]
fn test_handler_name_unbound_after_handler_in_function(
    #[values(Backend::Light, Backend::Compiled)] backend: Backend,
) {
    let body = vec![
        def(
            "f",
            params(&[]),
            vec![
                try_(
                    vec![raise(Some(call(name("ValueError"), vec![])), None)],
                    vec![handler(Some(name("ValueError")), Some("e"), vec![pass()])],
                    vec![],
                    vec![],
                ),
                ret(Some(name("e"))),
            ],
        ),
        expr_stmt(call(name("f"), vec![])),
    ];
    let err = interpreter(backend).run(&module(body)).unwrap_err();
    assert_eq!(err.exception_class(), Some("UnboundLocalError"));
}
