use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

use clap::Parser;
use color_print::cprintln;

use arch::obj::ObjectModule;
use sicemu::{Console, CpuState, Machine};

#[derive(Parser, Debug)]
#[clap(
    name = "sicemu",
    version = "v0.1.0",
    about = "Emulator for the SIC/XE machine"
)]
struct Args {
    /// Object module (YAML) produced by sicasm or siclink
    #[arg(default_value = "out.obj.yaml")]
    input_file: String,

    /// Load address
    #[arg(short, long, default_value_t = 0)]
    base: u32,

    /// Memory size in bytes
    #[arg(short, long, default_value_t = 16 * 1024)]
    memory: usize,

    /// Maximum number of instructions to execute
    #[arg(short = 't', long, default_value_t = 100_000)]
    tmax: u64,

    /// Print the execution trace
    #[arg(long)]
    trace: bool,

    /// Echo every WD byte as it is written
    #[arg(long)]
    echo: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    println!("+-----------------------------------------------+");
    println!("| {:<45} |", args.input_file);
    println!("+-----------------------------------------------+");

    let mut module: ObjectModule = {
        let file = match File::open(&args.input_file) {
            Ok(file) => file,
            Err(e) => {
                cprintln!("<red,bold>error</>: cannot open {}: {}", args.input_file, e);
                return ExitCode::FAILURE;
            }
        };
        match serde_yaml::from_reader(BufReader::new(file)) {
            Ok(module) => module,
            Err(e) => {
                cprintln!("<red,bold>error</>: bad object file: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    let mut machine = Machine::with_device(args.memory, Box::new(Console::new(args.echo)));
    if let Err(e) = machine.load_program(&mut module, args.base) {
        cprintln!("<red,bold>error</>: {}", e);
        return ExitCode::FAILURE;
    }
    println!(
        "[LOAD] {} ({} bytes at 0x{:06X}, entry 0x{:06X})",
        module.program_name,
        module.length(),
        args.base,
        module.start_address
    );

    let outcome = machine.run(args.tmax);

    if args.trace {
        println!("[TRACE]");
        for record in machine.trace() {
            println!("  {record}");
        }
    }

    println!("[REGS]");
    for (name, value) in machine.registers().snapshot() {
        println!("  {name:<3} {value}");
    }

    match outcome {
        Ok(CpuState::Halted) => {
            println!("[HALT] after {} instruction(s)", machine.control_unit().steps());
            ExitCode::SUCCESS
        }
        Ok(state) => {
            cprintln!("<yellow,bold>warn</>: stopped in {:?} after {} step(s)", state, machine.control_unit().steps());
            ExitCode::SUCCESS
        }
        Err(e) => {
            cprintln!("<red,bold>fault</>: {}", e);
            ExitCode::FAILURE
        }
    }
}
