//! Loop, branch, match and with-block behavior observed through print
//! output.

use quill::{
    ast::{
        AssignTarget, BinOp, ClassDecl, Expr, ForTarget, FunctionDecl, Literal, Loc, MatchArm, Module, Param,
        Pattern, Stmt,
    },
    compile_module, CollectStringPrint, NoopTracer, Vm, VmContext, VmOptions,
};

/// Compiles and runs a module body, returning everything printed.
fn run(body: Vec<Stmt>) -> String {
    let mut ctx = VmContext::new(VmOptions::default());
    let module = compile_module(&Module::new(body), "test", ctx.interns_mut()).expect("module compiles");
    let id = ctx.register_module(module);
    let mut print = CollectStringPrint::new();
    Vm::new(&mut ctx, &mut print, NoopTracer)
        .run_module(id)
        .expect("program runs");
    print.into_output()
}

fn print_stmt(args: Vec<Expr>) -> Stmt {
    Stmt::expr(Expr::call(Expr::name("print"), args))
}

fn aug(name: &str, op: BinOp, value: Expr) -> Stmt {
    Stmt::AugAssign {
        target: AssignTarget::Name(name.to_owned()),
        op,
        value,
        loc: Loc::default(),
    }
}

fn lt(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinOp::Lt, lhs, rhs)
}

fn eq(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinOp::Eq, lhs, rhs)
}

/// `while` repeats until its condition turns false.
#[test]
fn test_while_accumulates() {
    let out = run(vec![
        Stmt::assign("total", Expr::int(0)),
        Stmt::assign("i", Expr::int(0)),
        Stmt::While {
            cond: lt(Expr::name("i"), Expr::int(5)),
            body: vec![
                aug("total", BinOp::Add, Expr::name("i")),
                aug("i", BinOp::Add, Expr::int(1)),
            ],
            loc: Loc::default(),
        },
        print_stmt(vec![Expr::name("total")]),
    ]);
    assert_eq!(out, "10\n");
}

/// `foreach` over a range drives the full iteration protocol.
#[test]
fn test_foreach_range_sum() {
    let out = run(vec![
        Stmt::assign("total", Expr::int(0)),
        Stmt::Foreach {
            target: ForTarget::Name("i".to_owned()),
            iter: Expr::call(Expr::name("range"), vec![Expr::int(0), Expr::int(5)]),
            body: vec![aug("total", BinOp::Add, Expr::name("i"))],
            loc: Loc::default(),
        },
        print_stmt(vec![Expr::name("total")]),
    ]);
    assert_eq!(out, "10\n");
}

/// Lists and strings are iterable; strings yield one-character strings.
#[test]
fn test_foreach_list_and_string() {
    let out = run(vec![
        Stmt::Foreach {
            target: ForTarget::Name("v".to_owned()),
            iter: Expr::List(vec![Expr::int(1), Expr::int(2), Expr::int(3)], Loc::default()),
            body: vec![print_stmt(vec![Expr::name("v")])],
            loc: Loc::default(),
        },
        Stmt::Foreach {
            target: ForTarget::Name("ch".to_owned()),
            iter: Expr::str("ab"),
            body: vec![print_stmt(vec![Expr::name("ch")])],
            loc: Loc::default(),
        },
    ]);
    assert_eq!(out, "1\n2\n3\na\nb\n");
}

/// A tuple loop target destructures each element.
#[test]
fn test_foreach_tuple_target() {
    let pair = |a: i64, b: &str| Expr::Tuple(vec![Expr::int(a), Expr::str(b)], Loc::default());
    let out = run(vec![Stmt::Foreach {
        target: ForTarget::Tuple(vec!["n".to_owned(), "s".to_owned()]),
        iter: Expr::List(vec![pair(1, "one"), pair(2, "two")], Loc::default()),
        body: vec![print_stmt(vec![Expr::name("n"), Expr::name("s")])],
        loc: Loc::default(),
    }]);
    assert_eq!(out, "1 one\n2 two\n");
}

/// `continue` skips the rest of the body; `break` leaves the loop.
#[test]
fn test_break_and_continue() {
    let out = run(vec![Stmt::Foreach {
        target: ForTarget::Name("i".to_owned()),
        iter: Expr::call(Expr::name("range"), vec![Expr::int(0), Expr::int(10)]),
        body: vec![
            Stmt::If {
                cond: eq(Expr::name("i"), Expr::int(3)),
                then: vec![Stmt::Continue(Loc::default())],
                orelse: Vec::new(),
                loc: Loc::default(),
            },
            Stmt::If {
                cond: eq(Expr::name("i"), Expr::int(6)),
                then: vec![Stmt::Break(Loc::default())],
                orelse: Vec::new(),
                loc: Loc::default(),
            },
            print_stmt(vec![Expr::name("i")]),
        ],
        loc: Loc::default(),
    }]);
    assert_eq!(out, "0\n1\n2\n4\n5\n");
}

/// `do-while` runs the body before testing the condition.
#[test]
fn test_do_while_runs_once() {
    let out = run(vec![
        Stmt::assign("x", Expr::int(0)),
        Stmt::DoWhile {
            body: vec![aug("x", BinOp::Add, Expr::int(1))],
            cond: Expr::bool(false),
            loc: Loc::default(),
        },
        print_stmt(vec![Expr::name("x")]),
    ]);
    assert_eq!(out, "1\n");
}

/// The C-style loop runs its step after the body, skipping it before the
/// first iteration.
#[test]
fn test_for_c_style() {
    let out = run(vec![Stmt::For {
        init: Some(Box::new(Stmt::assign("i", Expr::int(0)))),
        cond: Some(lt(Expr::name("i"), Expr::int(3))),
        step: Some(Box::new(aug("i", BinOp::Add, Expr::int(1)))),
        body: vec![print_stmt(vec![Expr::name("i")])],
        loc: Loc::default(),
    }]);
    assert_eq!(out, "0\n1\n2\n");
}

/// `&&` and `||` skip the right operand when the left decides the result.
#[test]
fn test_short_circuit_skips_side_effect() {
    let side = FunctionDecl {
        name: "side".to_owned(),
        params: Vec::new(),
        variadic: false,
        body: vec![
            print_stmt(vec![Expr::str("called")]),
            Stmt::ret(Expr::bool(true)),
        ],
        loc: Loc::default(),
    };
    let call_side = || Expr::call(Expr::name("side"), Vec::new());
    let out = run(vec![
        Stmt::FunctionDecl(side),
        Stmt::assign("a", Expr::and(Expr::bool(false), call_side())),
        Stmt::assign("b", Expr::or(Expr::bool(true), call_side())),
        Stmt::assign("c", Expr::and(Expr::bool(true), call_side())),
        print_stmt(vec![Expr::name("a"), Expr::name("b"), Expr::name("c")]),
    ]);
    assert_eq!(out, "called\nfalse true true\n");
}

/// Match arms try patterns in order: literal, tuple extraction, guarded
/// binding, wildcard.
#[test]
fn test_match_arm_selection() {
    let arm = |pattern, guard, body| MatchArm {
        pattern,
        guard,
        body,
        loc: Loc::default(),
    };
    let classify = FunctionDecl {
        name: "classify".to_owned(),
        params: vec![Param::new("x")],
        variadic: false,
        body: vec![Stmt::Match {
            subject: Expr::name("x"),
            arms: vec![
                arm(
                    Pattern::Literal(Literal::Int(0)),
                    None,
                    vec![print_stmt(vec![Expr::str("zero")])],
                ),
                arm(
                    Pattern::Tuple(vec![Pattern::Binding("a".to_owned()), Pattern::Binding("b".to_owned())]),
                    None,
                    vec![print_stmt(vec![Expr::name("a"), Expr::name("b")])],
                ),
                arm(
                    Pattern::Binding("n".to_owned()),
                    Some(lt(Expr::name("n"), Expr::int(0))),
                    vec![print_stmt(vec![Expr::str("negative")])],
                ),
                arm(Pattern::Wildcard, None, vec![print_stmt(vec![Expr::str("other")])]),
            ],
            loc: Loc::default(),
        }],
        loc: Loc::default(),
    };
    let call = |arg| Stmt::expr(Expr::call(Expr::name("classify"), vec![arg]));
    let out = run(vec![
        Stmt::FunctionDecl(classify),
        call(Expr::int(0)),
        call(Expr::Tuple(vec![Expr::int(1), Expr::int(2)], Loc::default())),
        call(Expr::int(-5)),
        call(Expr::str("hm")),
    ]);
    assert_eq!(out, "zero\n1 2\nnegative\nother\n");
}

fn resource_class() -> Stmt {
    let method = |name: &str, body| FunctionDecl {
        name: name.to_owned(),
        params: Vec::new(),
        variadic: false,
        body,
        loc: Loc::default(),
    };
    Stmt::ClassDecl(ClassDecl {
        name: "Res".to_owned(),
        bases: Vec::new(),
        constructor: None,
        methods: vec![
            method("enter", vec![print_stmt(vec![Expr::str("enter")])]),
            method("exit", vec![print_stmt(vec![Expr::str("exit")])]),
        ],
        properties: Vec::new(),
        loc: Loc::default(),
    })
}

/// The with-block calls `enter` before the body and `exit` after it.
#[test]
fn test_with_normal_path() {
    let out = run(vec![
        resource_class(),
        Stmt::With {
            target: Expr::call(Expr::name("Res"), Vec::new()),
            binding: None,
            body: vec![print_stmt(vec![Expr::str("body")])],
            loc: Loc::default(),
        },
    ]);
    assert_eq!(out, "enter\nbody\nexit\n");
}

/// `break` leaves its try-block with the handler disarmed; an exception
/// raised after the loop must not be delivered to the abandoned handler.
#[test]
fn test_break_leaves_no_armed_handler() {
    let loop_fn = FunctionDecl {
        name: "f".to_owned(),
        params: Vec::new(),
        variadic: false,
        body: vec![
            Stmt::assign("i", Expr::int(0)),
            Stmt::While {
                cond: lt(Expr::name("i"), Expr::int(2)),
                body: vec![
                    aug("i", BinOp::Add, Expr::int(1)),
                    Stmt::Try {
                        body: vec![Stmt::Break(Loc::default())],
                        filters: vec![Expr::name("RuntimeError")],
                        binding: None,
                        handler: vec![print_stmt(vec![Expr::str("stale")])],
                        loc: Loc::default(),
                    },
                ],
                loc: Loc::default(),
            },
            print_stmt(vec![Expr::str("after")]),
            Stmt::Raise {
                value: Expr::call(Expr::name("RuntimeError"), vec![Expr::str("boom")]),
                loc: Loc::default(),
            },
        ],
        loc: Loc::default(),
    };
    let out = run(vec![
        Stmt::FunctionDecl(loop_fn),
        Stmt::Try {
            body: vec![Stmt::expr(Expr::call(Expr::name("f"), Vec::new()))],
            filters: vec![Expr::name("RuntimeError")],
            binding: None,
            handler: vec![print_stmt(vec![Expr::str("caught")])],
            loc: Loc::default(),
        },
    ]);
    assert_eq!(out, "after\ncaught\n");
}

/// `continue` inside a try-block disarms the handler on every pass, so no
/// entries pile up across iterations.
#[test]
fn test_continue_leaves_no_armed_handler() {
    let loop_fn = FunctionDecl {
        name: "f".to_owned(),
        params: Vec::new(),
        variadic: false,
        body: vec![
            Stmt::assign("i", Expr::int(0)),
            Stmt::While {
                cond: lt(Expr::name("i"), Expr::int(3)),
                body: vec![
                    aug("i", BinOp::Add, Expr::int(1)),
                    Stmt::Try {
                        body: vec![Stmt::Continue(Loc::default())],
                        filters: vec![Expr::name("RuntimeError")],
                        binding: None,
                        handler: vec![print_stmt(vec![Expr::str("stale")])],
                        loc: Loc::default(),
                    },
                ],
                loc: Loc::default(),
            },
            print_stmt(vec![Expr::name("i")]),
            Stmt::Raise {
                value: Expr::call(Expr::name("RuntimeError"), vec![Expr::str("boom")]),
                loc: Loc::default(),
            },
        ],
        loc: Loc::default(),
    };
    let out = run(vec![
        Stmt::FunctionDecl(loop_fn),
        Stmt::Try {
            body: vec![Stmt::expr(Expr::call(Expr::name("f"), Vec::new()))],
            filters: vec![Expr::name("RuntimeError")],
            binding: None,
            handler: vec![print_stmt(vec![Expr::str("caught")])],
            loc: Loc::default(),
        },
    ]);
    assert_eq!(out, "3\ncaught\n");
}

/// `break` out of a with-block runs `exit` on the way out of the loop.
#[test]
fn test_break_runs_with_exit() {
    let out = run(vec![
        resource_class(),
        Stmt::While {
            cond: Expr::bool(true),
            body: vec![Stmt::With {
                target: Expr::call(Expr::name("Res"), Vec::new()),
                binding: None,
                body: vec![Stmt::Break(Loc::default())],
                loc: Loc::default(),
            }],
            loc: Loc::default(),
        },
        print_stmt(vec![Expr::str("after")]),
    ]);
    assert_eq!(out, "enter\nexit\nafter\n");
}

/// An exception raised inside the with-body still runs `exit` before the
/// surrounding handler sees the exception.
#[test]
fn test_with_exit_runs_on_unwind() {
    let out = run(vec![
        resource_class(),
        Stmt::Try {
            body: vec![Stmt::With {
                target: Expr::call(Expr::name("Res"), Vec::new()),
                binding: None,
                body: vec![Stmt::Raise {
                    value: Expr::call(Expr::name("RuntimeError"), vec![Expr::str("boom")]),
                    loc: Loc::default(),
                }],
                loc: Loc::default(),
            }],
            filters: vec![Expr::name("RuntimeError")],
            binding: None,
            handler: vec![print_stmt(vec![Expr::str("caught")])],
            loc: Loc::default(),
        },
    ]);
    assert_eq!(out, "enter\nexit\ncaught\n");
}
