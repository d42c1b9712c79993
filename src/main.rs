use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use mocha::vm::{InterpretResult, VM};

const EXIT_USAGE: i32 = 64;
const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_IO_ERROR: i32 = 74;

#[derive(Parser)]
#[command(name = "mocha")]
#[command(version)]
#[command(about = "A bytecode interpreter for the mocha scripting language", long_about = None)]
struct Cli {
    /// Script to execute; starts a REPL when omitted.
    script: Option<PathBuf>,

    /// Where to write the serialized program snapshot.
    #[arg(long, value_name = "PATH")]
    artifact: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            exit(EXIT_USAGE);
        }
    };

    let mut vm = VM::new();
    if let Some(path) = &cli.artifact {
        vm.set_artifact_path(path);
    }

    match &cli.script {
        Some(path) => run_file(&mut vm, path),
        None => repl(&mut vm),
    }
}

fn run_file(vm: &mut VM, path: &PathBuf) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read file \"{}\": {}", path.display(), error);
            exit(EXIT_IO_ERROR);
        }
    };

    match vm.interpret(&source) {
        InterpretResult::InterpretOk => {}
        InterpretResult::InterpretCompileError => exit(EXIT_COMPILE_ERROR),
        InterpretResult::InterpretRuntimeError => exit(EXIT_RUNTIME_ERROR),
    }
}

fn repl(vm: &mut VM) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        match lines.next() {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                // Each line compiles and runs on its own; globals carry over.
                vm.interpret(&line);
            }
            Some(Err(error)) => {
                eprintln!("Could not read line: {}", error);
                exit(EXIT_IO_ERROR);
            }
            None => {
                println!();
                break;
            }
        }
    }
}
