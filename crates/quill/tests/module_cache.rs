//! Saving a compiled module and reloading it into a fresh context must
//! not change what the program does.

use std::time::SystemTime;

use quill::{
    ast::{BinOp, Expr, ForTarget, FunctionDecl, Loc, Module, Param, Stmt},
    cache, compile_module, CollectStringPrint, NoopTracer, Vm, VmContext, VmOptions,
};

fn print_stmt(args: Vec<Expr>) -> Stmt {
    Stmt::expr(Expr::call(Expr::name("print"), args))
}

/// A program touching functions, loops and string constants, so the
/// round-trip covers nested code objects and the constant pool.
fn sample_tree() -> Module {
    Module::new(vec![
        Stmt::FunctionDecl(FunctionDecl {
            name: "describe".to_owned(),
            params: vec![Param::new("n")],
            variadic: false,
            body: vec![Stmt::ret(Expr::binary(
                BinOp::Add,
                Expr::call(Expr::name("str"), vec![Expr::name("n")]),
                Expr::str(" bottles"),
            ))],
            loc: Loc::default(),
        }),
        Stmt::Foreach {
            target: ForTarget::Name("i".to_owned()),
            iter: Expr::call(Expr::name("range"), vec![Expr::int(1), Expr::int(4)]),
            body: vec![print_stmt(vec![Expr::call(
                Expr::name("describe"),
                vec![Expr::name("i")],
            )])],
            loc: Loc::default(),
        },
    ])
}

fn run_registered(mut ctx: VmContext, module: quill::Module) -> String {
    let id = ctx.register_module(module);
    let mut print = CollectStringPrint::new();
    Vm::new(&mut ctx, &mut print, NoopTracer)
        .run_module(id)
        .expect("program runs");
    print.into_output()
}

/// Compile, run, save, reload into a brand-new context, run again:
/// identical output.
#[test]
fn test_round_trip_preserves_behavior() {
    let mut first = VmContext::new(VmOptions::default());
    let module = compile_module(&sample_tree(), "bottles", first.interns_mut()).expect("module compiles");

    let path = std::env::temp_dir().join(format!("quill-it-cache-{}.qbc", std::process::id()));
    let mtime = SystemTime::now();
    cache::save_module(&path, &module, mtime).expect("save succeeds");
    let reloaded = cache::load_module(&path, mtime).expect("load succeeds");
    let _ = std::fs::remove_file(&path);

    let direct = run_registered(first, module);
    let cached = run_registered(VmContext::new(VmOptions::default()), reloaded);
    assert_eq!(direct, "1 bottles\n2 bottles\n3 bottles\n");
    assert_eq!(cached, direct);
}
