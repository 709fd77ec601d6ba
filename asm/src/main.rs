use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use color_print::{cformat, cprintln};

#[derive(Parser, Debug)]
#[clap(
    name = "sicasm",
    version = "v0.1.0",
    about = "Two-pass assembler for the SIC/XE machine"
)]
struct AppArgs {
    /// Assembly source file (already macro-expanded)
    input: String,

    #[clap(short = 'o', long = "output", default_value = "out.obj.yaml")]
    output: String,
}

fn main() -> ExitCode {
    let args = AppArgs::parse();

    println!("1. Read source: {}", args.input);
    let file = match File::open(&args.input) {
        Ok(file) => file,
        Err(e) => {
            cprintln!("<red,bold>error</>: cannot open {}: {}", args.input, e);
            return ExitCode::FAILURE;
        }
    };
    let lines: Vec<String> = match BufReader::new(file).lines().collect() {
        Ok(lines) => lines,
        Err(e) => {
            cprintln!("<red,bold>error</>: cannot read {}: {}", args.input, e);
            return ExitCode::FAILURE;
        }
    };

    println!("2. Assemble");
    let name = Path::new(&args.input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("OBJ");
    let module = match sicasm::assemble(name, &lines) {
        Ok(module) => module,
        Err(e) => {
            e.print_diag(&args.input);
            return ExitCode::FAILURE;
        }
    };

    println!("  - program  {}", module.program_name);
    println!("  - length   {} bytes", module.length());
    println!("  - start    0x{:06X}", module.start_address);
    println!("3. Symbols");
    for symbol in module.symbols.iter() {
        println!(
            "  {}",
            cformat!("<green>{:06X}</> {:<8} {:?}", symbol.address, symbol.name, symbol.kind)
        );
    }
    if !module.relocations.is_empty() {
        println!("4. Relocation records");
        for record in &module.relocations {
            println!(
                "  {}",
                cformat!(
                    "<yellow>{:06X}</>+{} -> {}{}",
                    record.offset,
                    record.length,
                    record.symbol,
                    if record.pc_relative { " (pc)" } else { "" }
                )
            );
        }
    }

    println!("5. Write object: {}", args.output);
    let text = match serde_yaml::to_string(&module) {
        Ok(text) => text,
        Err(e) => {
            cprintln!("<red,bold>error</>: cannot serialize module: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match File::create(&args.output).and_then(|mut f| f.write_all(text.as_bytes())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            cprintln!("<red,bold>error</>: cannot write {}: {}", args.output, e);
            ExitCode::FAILURE
        }
    }
}
