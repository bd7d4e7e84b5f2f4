//! End-to-end checks of the embedding surface: compiling a tree, running
//! it, reading globals back, invoking values from the host, and aborting.

use quill::{
    ast::{BinOp, Expr, Loc, Module, Stmt},
    compile_module, CollectStringPrint, Exception, NativeFn, NoopTracer, Value, Vm, VmContext, VmOptions,
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

/// Compiles and runs a module body that is expected to fail.
fn run_err(body: Vec<Stmt>) -> Exception {
    let mut ctx = VmContext::new(VmOptions::default());
    let module = compile_module(&Module::new(body), "test", ctx.interns_mut()).expect("module compiles");
    let id = ctx.register_module(module);
    let mut print = CollectStringPrint::new();
    Vm::new(&mut ctx, &mut print, NoopTracer)
        .run_module(id)
        .expect_err("program raises")
}

fn print_stmt(args: Vec<Expr>) -> Stmt {
    Stmt::expr(Expr::call(Expr::name("print"), args))
}

/// Arithmetic flows through the operand stack and prints via the builtin.
#[test]
fn test_arithmetic_prints() {
    let out = run(vec![print_stmt(vec![Expr::binary(
        BinOp::Sub,
        Expr::binary(
            BinOp::Mul,
            Expr::binary(BinOp::Add, Expr::int(2), Expr::int(3)),
            Expr::int(4),
        ),
        Expr::int(6),
    )])]);
    assert_eq!(out, "14\n");
}

/// Module-scope assignment to a builtin name updates the VM global table,
/// while a fresh module-scope name lands in the module's own attributes
/// and stays invisible to `get_global`.
#[test]
fn test_global_table_shadowing() {
    let mut ctx = VmContext::new(VmOptions::default());
    let tree = Module::new(vec![
        Stmt::assign("len", Expr::int(5)),
        Stmt::assign("answer", Expr::int(42)),
    ]);
    let module = compile_module(&tree, "test", ctx.interns_mut()).expect("module compiles");
    let id = ctx.register_module(module);
    let mut print = CollectStringPrint::new();
    Vm::new(&mut ctx, &mut print, NoopTracer)
        .run_module(id)
        .expect("program runs");

    assert_eq!(ctx.get_global("len"), Some(Value::Int(5)));
    assert_eq!(ctx.get_global("answer"), None);
    assert!(ctx.get_global("print").is_some());
}

/// The host can invoke a value directly and describe the result.
#[test]
fn test_host_invoke_and_describe() {
    let mut ctx = VmContext::new(VmOptions::default());
    let mut print = CollectStringPrint::new();
    let mut vm = Vm::new(&mut ctx, &mut print, NoopTracer);
    let value = vm
        .invoke(Value::Native(NativeFn::Range), vec![Value::Int(0), Value::Int(3)])
        .expect("invoke succeeds");
    drop(vm);
    assert_eq!(ctx.describe(&value), "range(0, 3)");
}

/// The host can invoke a function value as a method of a receiver of its
/// choosing; `self` binds to that receiver, not the one at capture time.
#[test]
fn test_host_invoke_method_binds_receiver() {
    let make = quill::ast::FunctionDecl {
        name: "make".to_owned(),
        params: Vec::new(),
        variadic: false,
        body: vec![Stmt::ret(Expr::Lambda {
            params: Vec::new(),
            body: vec![Stmt::ret(Expr::SelfRef(Loc::default()))],
            loc: Loc::default(),
        })],
        loc: Loc::default(),
    };
    let mut ctx = VmContext::new(VmOptions::default());
    let tree = Module::new(vec![
        Stmt::ClassDecl(quill::ast::ClassDecl {
            name: "Box".to_owned(),
            bases: Vec::new(),
            constructor: None,
            methods: vec![make],
            properties: Vec::new(),
            loc: Loc::default(),
        }),
        // Shadowing a builtin keeps the closure visible to `get_global`.
        Stmt::assign(
            "len",
            Expr::call(Expr::attr(Expr::call(Expr::name("Box"), Vec::new()), "make"), Vec::new()),
        ),
    ]);
    let module = compile_module(&tree, "test", ctx.interns_mut()).expect("module compiles");
    let id = ctx.register_module(module);
    let mut print = CollectStringPrint::new();
    Vm::new(&mut ctx, &mut print, NoopTracer)
        .run_module(id)
        .expect("program runs");

    let closure = ctx.get_global("len").expect("closure exposed");
    let mut vm = Vm::new(&mut ctx, &mut print, NoopTracer);
    let plain = vm.invoke(closure.clone(), Vec::new()).expect("plain invoke succeeds");
    assert!(matches!(plain, Value::Ref(_)), "captured self is the instance");
    let rebound = vm
        .invoke_method(closure, Value::Int(7), Vec::new())
        .expect("method invoke succeeds");
    assert_eq!(rebound, Value::Int(7));
}

/// `raise_exception` renders a script-built exception value the same way
/// an unhandled `raise` would, and rejects non-exception values with the
/// statement's TypeError.
#[test]
fn test_host_raise_exception() {
    let mut ctx = VmContext::new(VmOptions::default());
    let tree = Module::new(vec![Stmt::assign(
        "len",
        Expr::call(Expr::name("RuntimeError"), vec![Expr::str("bad input")]),
    )]);
    let module = compile_module(&tree, "test", ctx.interns_mut()).expect("module compiles");
    let id = ctx.register_module(module);
    let mut print = CollectStringPrint::new();
    Vm::new(&mut ctx, &mut print, NoopTracer)
        .run_module(id)
        .expect("program runs");

    let value = ctx.get_global("len").expect("exception value exposed");
    let mut vm = Vm::new(&mut ctx, &mut print, NoopTracer);
    assert_eq!(vm.raise_exception(value).summary(), "RuntimeError: bad input");
    assert_eq!(
        vm.raise_exception(Value::Int(3)).summary(),
        "TypeError: cannot raise a value of type 'int'"
    );
}

/// An abort requested through the handle stops execution with a summary
/// and no traceback, and is not catchable by script handlers.
#[test]
fn test_abort_requested_by_host() {
    let mut ctx = VmContext::new(VmOptions::default());
    let tree = Module::new(vec![
        Stmt::Try {
            body: vec![Stmt::assign("x", Expr::int(1))],
            filters: vec![Expr::name("Exception")],
            binding: None,
            handler: vec![print_stmt(vec![Expr::str("caught")])],
            loc: Loc::default(),
        },
    ]);
    let module = compile_module(&tree, "test", ctx.interns_mut()).expect("module compiles");
    let id = ctx.register_module(module);
    ctx.abort_handle().abort();
    let mut print = CollectStringPrint::new();
    let err = Vm::new(&mut ctx, &mut print, NoopTracer)
        .run_module(id)
        .expect_err("aborted run fails");
    assert_eq!(err.summary(), "RuntimeError: execution aborted by host");
    assert_eq!(err.traceback(), "");
    assert_eq!(print.output(), "");
}

/// An unhandled exception reaches the host with the faulting function and
/// the call site both in the traceback, innermost frame first.
#[test]
fn test_unhandled_exception_traceback() {
    let err = run_err(vec![
        Stmt::FunctionDecl(quill::ast::FunctionDecl {
            name: "f".to_owned(),
            params: Vec::new(),
            variadic: false,
            body: vec![Stmt::ret(Expr::Binary {
                op: BinOp::Div,
                lhs: Box::new(Expr::Literal(quill::ast::Literal::Int(1), Loc::line(2))),
                rhs: Box::new(Expr::Literal(quill::ast::Literal::Int(0), Loc::line(2))),
                loc: Loc::line(2),
            })],
            loc: Loc::line(1),
        }),
        Stmt::expr(Expr::Call {
            callee: Box::new(Expr::Name("f".to_owned(), Loc::line(4))),
            args: Vec::new(),
            var_arg: None,
            loc: Loc::line(4),
        }),
    ]);
    assert_eq!(err.summary(), "RuntimeError: division by zero");
    assert!(err.traceback().contains("in f, line 2"), "traceback: {}", err.traceback());
    assert!(err.traceback().contains("in <module>, line 4"), "traceback: {}", err.traceback());
    let f_pos = err.traceback().find("in f").expect("inner frame present");
    let module_pos = err.traceback().find("in <module>").expect("outer frame present");
    assert!(f_pos < module_pos, "innermost frame must come first");
}

/// `str`, `repr` and `type_of` agree with the printing rules.
#[test]
fn test_str_repr_type_of() {
    let out = run(vec![
        print_stmt(vec![Expr::call(Expr::name("str"), vec![Expr::float(3.0)])]),
        print_stmt(vec![Expr::call(Expr::name("repr"), vec![Expr::str("hi")])]),
        print_stmt(vec![Expr::call(Expr::name("type_of"), vec![Expr::bool(true)])]),
        print_stmt(vec![Expr::call(Expr::name("type_of"), vec![Expr::null()])]),
    ]);
    assert_eq!(out, "3.0\n'hi'\nbool\nnull\n");
}

/// Composite literals print with repr-style elements.
#[test]
fn test_composite_display() {
    let out = run(vec![
        print_stmt(vec![Expr::List(
            vec![Expr::int(1), Expr::str("x"), Expr::null()],
            Loc::default(),
        )]),
        print_stmt(vec![Expr::Dict(
            vec![(Expr::str("k"), Expr::int(2))],
            Loc::default(),
        )]),
    ]);
    assert_eq!(out, "[1, 'x', null]\n{'k': 2}\n");
}
