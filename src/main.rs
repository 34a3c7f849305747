use std::io::Read;
use std::path::{Path, PathBuf};
use std::{fs, process};

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use mjc::bytecode::disasm::disassemble;
use mjc::vm::Vm;
use mjc::{CompileOptions, ObjectFile, compile_with};

/// mjc - MicroJava compiler
#[derive(Parser, Debug)]
#[command(name = "mjc")]
#[command(about = "Compile MicroJava programs to VM object files", long_about = None)]
struct Args {
    /// Source file (.mj)
    input: PathBuf,

    /// Object file to write (defaults to the input with an .obj extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Treat overflowing integer literals as errors
    #[arg(long)]
    strict_literals: bool,

    /// Print a listing of the generated code
    #[arg(long)]
    disasm: bool,

    /// Run the compiled program, feeding it stdin
    #[arg(long)]
    run: bool,
}

fn main() {
    let args = Args::parse();

    // RUST_LOG controls the level, default warn
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    ensure_extension(&args.input);
    let source = match fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let options = CompileOptions {
        strict_literals: args.strict_literals,
        ..CompileOptions::default()
    };
    let compilation = compile_with(&source, &options);

    for warning in compilation.warnings() {
        eprintln!("-- warning: {}", warning);
    }
    for error in compilation.errors() {
        eprintln!("-- {}", error);
    }

    let object = match compilation.into_result() {
        Ok(object) => object,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("obj"));
    write_object(&object, &output);

    if args.disasm {
        match disassemble(&object) {
            Ok(listing) => print!("{}", listing),
            Err(e) => eprintln!("Disassembly failed: {}", e),
        }
    }

    if args.run {
        run_object(&object);
    }
}

fn ensure_extension(path: &Path) {
    if path.extension().and_then(|e| e.to_str()) != Some("mj") {
        eprintln!("Error: expected a .mj file, got {}", path.display());
        process::exit(1);
    }
}

fn write_object(object: &ObjectFile, path: &Path) {
    let bytes = match object.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to encode object file: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = fs::write(path, bytes) {
        eprintln!("Failed to write '{}': {}", path.display(), e);
        process::exit(1);
    }
    info!(path = %path.display(), code_size = object.code.len(), "object file written");
}

fn run_object(object: &ObjectFile) {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
        process::exit(1);
    }

    let mut vm = Vm::new(object).with_input(&input);
    let result = vm.run();
    print!("{}", vm.output());
    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        process::exit(1);
    }
}
