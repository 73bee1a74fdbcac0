//! Interactive session
//!
//! Reads one line at a time and interprets it against a persistent VM, so
//! globals defined on earlier lines stay visible.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use sable_runtime::{InterpretError, Vm};

/// Run the interactive session, returning the process exit code
pub fn run() -> i32 {
    match repl_loop() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            74
        }
    }
}

fn repl_loop() -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut vm = Vm::new();
    println!("sable {} (ctrl-d to exit)", sable_runtime::VERSION);

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match vm.interpret(&line) {
                    Ok(()) => {}
                    Err(InterpretError::Compile(diagnostics)) => {
                        for diagnostic in diagnostics {
                            eprintln!("{}", diagnostic);
                        }
                    }
                    // Message and backtrace already went to stderr
                    Err(InterpretError::Runtime(_)) => {}
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
