// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Resolve kernel addresses and function names from a kernel ELF image,
//! the same way the kernel's monitor does at runtime.

mod objfile;

use argh::FromArgs;
use kdebug::boot::BootRecord;
use kdebug::{AnyError, Config, KernelDebugInfo, ResolvedLocation, VirtAddr};
use std::path::PathBuf;

#[derive(FromArgs)]
/// Resolve kernel addresses and function names using an image's debug info.
struct Args {
    /// kernel ELF image
    #[argh(option, short = 'k')]
    kernel: PathBuf,

    /// lowest kernel-space address, in hex
    #[argh(option, from_str_fn(parse_hex))]
    kernel_base: Option<VirtAddr>,

    /// print diagnostic messages to stderr
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    cmd: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Addr(AddrCmd),
    Func(FuncCmd),
}

#[derive(FromArgs)]
/// Resolve code addresses to source locations.
#[argh(subcommand, name = "addr")]
struct AddrCmd {
    /// return addresses, in hex
    #[argh(positional, from_str_fn(parse_hex))]
    addrs: Vec<VirtAddr>,
}

#[derive(FromArgs)]
/// Resolve function names to entry addresses.
#[argh(subcommand, name = "func")]
struct FuncCmd {
    /// function names
    #[argh(positional)]
    names: Vec<String>,
}

fn parse_hex(s: &str) -> Result<VirtAddr, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
        .replace('_', "");
    VirtAddr::from_str_radix(&digits, 16).map_err(|e| format!("bad address `{s}`: {e}"))
}

fn main() -> Result<(), AnyError> {
    let args: Args = argh::from_env();
    kdebug::dbglog::set_enabled(args.verbose);

    let obj = objfile::File::load(&args.kernel)?;
    let reader = obj.parse()?;
    let sections = reader.image_sections()?;

    let config = Config {
        kernel_space_start: args
            .kernel_base
            .unwrap_or(Config::DEFAULT_KERNEL_SPACE_START),
    };
    let kdi = KernelDebugInfo::with_config(BootRecord::from_image(&sections), config);

    match args.cmd {
        Command::Addr(cmd) => {
            for addr in cmd.addrs {
                // The library treats user addresses as a caller bug.
                if addr != 0 && addr < config.kernel_space_start {
                    println!("{addr:#018x}  not a kernel address");
                    continue;
                }

                let mut loc = ResolvedLocation::new(addr);
                match kdi.resolve_address(addr, &mut loc) {
                    Ok(()) => println!("{addr:#018x}  {loc}"),
                    Err(e) => println!("{addr:#018x}  {loc}  ({e})"),
                }
            }
        }
        Command::Func(cmd) => {
            for name in cmd.names {
                match kdi.resolve_name(name.as_bytes()) {
                    0 => println!("{name}: not found"),
                    addr => println!("{name} = {addr:#018x}"),
                }
            }
        }
    }

    Ok(())
}
