//! Runs a compiled `.qbc` module cache file.

use std::{env, path::PathBuf, process::ExitCode};

use quill::{cache, NoopTracer, StdPrint, StderrTracer, Vm, VmContext, VmOptions};

const USAGE: &str = "usage: quill [--trace] <module.qbc>";

fn main() -> ExitCode {
    let mut trace = false;
    let mut path: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--trace" => trace = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            _ if path.is_none() => path = Some(PathBuf::from(arg)),
            _ => {
                eprintln!("{USAGE}");
                return ExitCode::FAILURE;
            }
        }
    }
    let Some(path) = path else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let module = match cache::load_module_unchecked(&path) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("quill: {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };
    let mut context = VmContext::new(VmOptions::default());
    let id = context.register_module(module);
    let mut print = StdPrint;
    let result = if trace {
        Vm::new(&mut context, &mut print, StderrTracer::new()).run_module(id)
    } else {
        Vm::new(&mut context, &mut print, NoopTracer).run_module(id)
    };
    drop(print);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(exception) => {
            eprintln!("{exception}");
            ExitCode::FAILURE
        }
    }
}
