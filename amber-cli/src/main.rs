mod loader;

use amber_core::address_range;
use amber_core::machine::StopReason;
use amber_core::memory::Mmio;
use amber_core::registers::Specifier;
use clap::Parser;
use log::{error, info};
use std::cell::Cell;
use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;
use std::rc::Rc;

/// Guest address of the byte-wide console window. Stores to any byte in the window emit the low
/// byte of the stored value on the host's stdout.
const CONSOLE_BASE: u64 = 0x1000_0000;
const CONSOLE_SIZE: u64 = 0x100;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Guest RAM size in MiB.
    #[arg(long, default_value_t = 64)]
    ram: usize,
    /// Maximum number of instructions to execute before giving up.
    #[arg(long)]
    max_instructions: Option<u64>,
    /// Statically-linked RV64 ELF executable to run.
    binary: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let image = fs::read(&args.binary)?;
    let mut machine = loader::load_elf(&image, args.ram * 1024 * 1024)?;
    info!(
        "loaded {} (entry {:#x}, heap starts at {:#x})",
        args.binary,
        machine.registers().pc(),
        machine.heap_start()
    );

    machine.memory_mut().map_mmio(
        address_range![CONSOLE_BASE, CONSOLE_BASE + CONSOLE_SIZE - 1],
        Mmio::new(
            |_| 0,
            |_, value| {
                let mut stdout = io::stdout();
                let _ = stdout.write_all(&[value as u8]);
                let _ = stdout.flush();
            },
        ),
    );

    // exit(status): remember the status and stop the machine.
    let exit_code = Rc::new(Cell::new(0u8));
    let code = Rc::clone(&exit_code);
    machine.add_syscall(93, move |machine| {
        code.set(machine.registers().x(Specifier::A0) as u8);
        machine.stop();
    });

    // write(fd, buf, count): copy the guest bytes out and hand them to the host stream.
    machine.add_syscall(64, |machine| {
        let fd = machine.registers().x(Specifier::A0);
        let pointer = machine.registers().x(Specifier::A1);
        let count = machine.registers().x(Specifier::A2);
        let mut buf = vec![0u8; count as usize];
        let result = match machine.memory().memcpy_out(&mut buf, pointer) {
            Ok(()) => {
                let written = match fd {
                    2 => io::stderr().write(&buf),
                    _ => io::stdout().write(&buf),
                };
                written.map(|n| n as u64).unwrap_or(-1i64 as u64)
            }
            Err(_) => -1i64 as u64,
        };
        machine.registers_mut().set_x(Specifier::A0, result);
    });

    // brk(addr): trivial program break bookkeeping seeded from the `_end` symbol. The loader maps
    // the whole region above the segments read-write, so moving the break never needs a remap.
    let brk = Rc::new(Cell::new(machine.heap_start()));
    machine.add_syscall(214, move |machine| {
        let requested = machine.registers().x(Specifier::A0);
        if requested != 0 {
            brk.set(requested);
        }
        machine.registers_mut().set_x(Specifier::A0, brk.get());
    });

    match machine.simulate(args.max_instructions.unwrap_or(u64::MAX))? {
        StopReason::Stopped => Ok(ExitCode::from(exit_code.get())),
        StopReason::WaitingForInterrupt => {
            error!("guest is waiting for an interrupt that can never arrive");
            Ok(ExitCode::FAILURE)
        }
        StopReason::StepLimitReached => {
            error!("instruction budget exhausted");
            Ok(ExitCode::FAILURE)
        }
    }
}
