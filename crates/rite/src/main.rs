//! rite command-line runner.
//!
//! Usage:
//!   rite <file.mrb>    Execute a compiled bytecode image

use std::{env, fs, process::ExitCode};

use rite::Runtime;
use rite_vm::DEFAULT_POOL_SIZE;

const USAGE: &str = "\
Usage: rite <FILE>

Arguments:
  <FILE>  Compiled RITE02 bytecode image (.mrb)";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let path = match args.as_slice() {
        [path] if path != "-h" && path != "--help" => path.clone(),
        [flag] if flag == "-h" || flag == "--help" => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let bytecode = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error reading {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut runtime = Runtime::new(DEFAULT_POOL_SIZE);
    if let Err(e) = runtime.create_task(bytecode) {
        eprintln!("error loading {path}: {e}");
        return ExitCode::FAILURE;
    }

    if runtime.run() == 1 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
