use std::fs::File;
use std::io::{BufReader, Write};
use std::process::ExitCode;

use clap::Parser;
use color_print::cprintln;

use arch::obj::ObjectModule;

#[derive(Parser, Debug)]
#[clap(
    name = "siclink",
    version = "v0.1.0",
    about = "Linker for SIC/XE object modules"
)]
struct Args {
    /// Object modules (YAML), linked in the given order
    #[clap(required = true)]
    inputs: Vec<String>,

    #[clap(short = 'o', long = "output", default_value = "linked.obj.yaml")]
    output: String,

    /// Target load address
    #[clap(short = 'a', long = "address", default_value_t = 0)]
    address: u32,

    /// Apply all relocations now (absolute output for --address)
    #[clap(long)]
    full: bool,

    /// Program name of the linked module
    #[clap(short = 'n', long = "name", default_value = "LINKED")]
    name: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut modules = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        println!("1. Read module: {path}");
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                cprintln!("<red,bold>error</>: cannot open {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        };
        let module: ObjectModule = match serde_yaml::from_reader(BufReader::new(file)) {
            Ok(module) => module,
            Err(e) => {
                cprintln!("<red,bold>error</>: bad object file {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        };
        println!("  - {} ({} bytes)", module.program_name, module.length());
        modules.push(module);
    }

    println!("2. Link at 0x{:06X} ({})", args.address, if args.full { "absolute" } else { "relocatable" });
    let linked = match siclink::link(modules, args.address, args.full, &args.name) {
        Ok(linked) => linked,
        Err(e) => {
            cprintln!("<red,bold>error</>: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("  - {} bytes, {} symbol(s), {} record(s)", linked.length(), linked.symbols.len(), linked.relocations.len());

    println!("3. Write: {}", args.output);
    let text = match serde_yaml::to_string(&linked) {
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
