use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

/// Compile a script to a runnable JVM class file.
#[derive(Parser)]
#[command(name = "compiler")]
struct Args {
    /// Source file to compile
    input: PathBuf,
    /// Directory the class file is written to (defaults to the input file's
    /// directory)
    out_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let source = match fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("cannot open input file {}: {error}", args.input.display());
            print_usage();
            return ExitCode::from(2);
        }
    };

    let out_dir = args
        .out_dir
        .unwrap_or_else(|| args.input.parent().unwrap_or(Path::new(".")).to_path_buf());
    if !out_dir.is_dir() {
        if let Err(error) = fs::create_dir_all(&out_dir) {
            eprintln!(
                "cannot create or find output dir {}: {error}",
                out_dir.display()
            );
            print_usage();
            return ExitCode::from(2);
        }
    }

    let bytes = match mocha::compile(&source) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("{}", error.format_with_source(&source));
            return ExitCode::FAILURE;
        }
    };

    let out_file = out_dir.join(mocha::classfile::CLASS_FILE_NAME);
    if let Err(error) = fs::write(&out_file, &bytes) {
        eprintln!("cannot write {}: {error}", out_file.display());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn print_usage() {
    eprintln!("usage: compiler <INPUT> [OUT_DIR]");
}
