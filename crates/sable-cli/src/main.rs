//! Sable command-line driver
//!
//! Runs a script file, disassembles it, or starts an interactive session.
//! Exit codes follow sysexits: 0 success, 65 compile error, 70 runtime
//! error, 74 I/O error.

mod repl;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use sable_runtime::object::Function;
use sable_runtime::{disassemble, CompileError, InterpretError, Value, Vm};

const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_IO_ERROR: i32 = 74;

/// The Sable language interpreter
#[derive(Parser)]
#[command(name = "sable", version, about = "The Sable language interpreter")]
struct Cli {
    /// Script to run; omit to start an interactive session
    script: Option<PathBuf>,

    /// Print the compiled bytecode instead of executing
    #[arg(long)]
    disasm: bool,
}

fn main() {
    let cli = Cli::parse();
    let code = match &cli.script {
        Some(path) if cli.disasm => disasm_file(path),
        Some(path) => run_file(path),
        None => repl::run(),
    };
    std::process::exit(code);
}

fn read_source(path: &Path) -> Result<String, i32> {
    fs::read_to_string(path).map_err(|err| {
        eprintln!("Could not open file \"{}\": {}", path.display(), err);
        EXIT_IO_ERROR
    })
}

fn run_file(path: &Path) -> i32 {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => 0,
        Err(InterpretError::Compile(diagnostics)) => {
            report_compile_errors(&diagnostics);
            EXIT_COMPILE_ERROR
        }
        // The VM already printed the message and backtrace to stderr
        Err(InterpretError::Runtime(_)) => EXIT_RUNTIME_ERROR,
    }
}

fn disasm_file(path: &Path) -> i32 {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(code) => return code,
    };
    match sable_runtime::compile(&source) {
        Ok(function) => {
            print_disassembly(&function);
            0
        }
        Err(diagnostics) => {
            report_compile_errors(&diagnostics);
            EXIT_COMPILE_ERROR
        }
    }
}

/// Print the script's disassembly followed by every nested function's
fn print_disassembly(function: &Function) {
    let name = function
        .name
        .as_deref()
        .map(str::to_string)
        .unwrap_or_else(|| "script".to_string());
    print!("{}", disassemble(&function.chunk, &name));
    for constant in &function.chunk.constants {
        if let Value::Function(nested) = constant {
            println!();
            print_disassembly(nested);
        }
    }
}

fn report_compile_errors(diagnostics: &[CompileError]) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    for diagnostic in diagnostics {
        let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
        let _ = writeln!(stderr, "{}", diagnostic);
        let _ = stderr.reset();
    }
}
