// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Address and function-name resolution.
//!
//! [`KernelDebugInfo`] is the entry point used by the kernel's panic handler
//! and monitor. Both operations re-derive everything from the boot record on
//! every call: there's no state that could be left inconsistent by a fault
//! in the middle of a lookup.

use crate::boot::{BootRecord, DebugSectionSet};
use crate::bounded::BoundedStr;
use crate::dwarf::{self, DebugFormat, Error};
use crate::symtab::SymbolTableView;
use crate::{debug, VirtAddr};
use std::fmt;

/// Capacity of [`ResolvedLocation::file`].
pub const FILE_CAPACITY: usize = 256;

/// Capacity of [`ResolvedLocation::function_name`].
pub const NAME_CAPACITY: usize = 256;

/// Placeholder for names that couldn't be resolved.
pub const UNKNOWN: &str = "<unknown>";

/// Length of the call instruction preceding a return address.
///
/// Backtraces capture return addresses, which point past the call. Line and
/// function lookups use the address of the call itself so that a call in
/// tail position is attributed to the caller.
pub const CALL_INSN_LEN: u64 = 5;

/// Resolver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Lowest address considered part of the kernel.
    pub kernel_space_start: VirtAddr,
}

impl Config {
    /// First address above the canonical lower half.
    pub const DEFAULT_KERNEL_SPACE_START: VirtAddr = 0x0000_8000_0000_0000;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel_space_start: Self::DEFAULT_KERNEL_SPACE_START,
        }
    }
}

/// Source location of a code address.
///
/// Filled incrementally: fields that couldn't be determined keep the values
/// set by [`ResolvedLocation::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    /// Address that was looked up.
    pub address: VirtAddr,
    /// Source file of the compile unit.
    pub file: BoundedStr<FILE_CAPACITY>,
    /// Source line, 0 if unknown.
    pub line: u32,
    /// Name of the enclosing function.
    pub function_name: BoundedStr<NAME_CAPACITY>,
    /// Entry address of the enclosing function.
    pub function_entry: VirtAddr,
    /// Number of function arguments. Never determined; always 0.
    pub arg_count: u32,
}

impl ResolvedLocation {
    /// Location of `address` with nothing resolved yet.
    pub fn new(address: VirtAddr) -> Self {
        Self {
            address,
            file: BoundedStr::from_bytes(UNKNOWN.as_bytes()),
            line: 0,
            function_name: BoundedStr::from_bytes(UNKNOWN.as_bytes()),
            function_entry: address,
            arg_count: 0,
        }
    }

    /// Number of valid bytes in [`Self::function_name`].
    pub fn function_name_len(&self) -> usize {
        self.function_name.len()
    }

    /// Distance of the address from the function's entry.
    pub fn offset(&self) -> u64 {
        self.address.wrapping_sub(self.function_entry)
    }
}

impl fmt::Display for ResolvedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}+{:#x}",
            self.file,
            self.line,
            self.function_name,
            self.offset()
        )
    }
}

/// Debug information of the running kernel.
#[derive(Debug, Clone, Copy)]
pub struct KernelDebugInfo<'img> {
    record: BootRecord<'img>,
    config: Config,
}

impl<'img> KernelDebugInfo<'img> {
    /// Creates a resolver with the default configuration.
    pub fn new(record: BootRecord<'img>) -> Self {
        Self::with_config(record, Config::default())
    }

    /// Creates a resolver with an explicit configuration.
    pub fn with_config(record: BootRecord<'img>, config: Config) -> Self {
        Self { record, config }
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves a code address to its source location.
    ///
    /// `out` is reset first and then filled step by step. On error, the
    /// fields determined before the failing step are kept.
    ///
    /// # Panics
    ///
    /// If `addr` is non-zero and below [`Config::kernel_space_start`].
    pub fn resolve_address(&self, addr: VirtAddr, out: &mut ResolvedLocation) -> dwarf::Result {
        let sections = DebugSectionSet::locate(&self.record);
        resolve_address_in(&dwarf::Sections::load(&sections), &self.config, addr, out)
    }

    /// Resolves a function name to its entry address.
    ///
    /// Returns 0 if no function of that name exists.
    ///
    /// # Panics
    ///
    /// If the debug information is malformed.
    pub fn resolve_name(&self, name: &[u8]) -> VirtAddr {
        let sections = DebugSectionSet::locate(&self.record);
        let symbols = SymbolTableView::new(&self.record);
        resolve_name_in(&dwarf::Sections::load(&sections), &symbols, name)
    }
}

/// Resolves `addr` against an arbitrary debug-format engine.
///
/// See [`KernelDebugInfo::resolve_address`].
pub fn resolve_address_in<'img, D: DebugFormat<'img> + ?Sized>(
    engine: &D,
    config: &Config,
    addr: VirtAddr,
    out: &mut ResolvedLocation,
) -> dwarf::Result {
    *out = ResolvedLocation::new(addr);

    // Null return addresses terminate backtraces.
    if addr == 0 {
        return Ok(());
    }

    assert!(
        addr >= config.kernel_space_start,
        "{addr:#x} is not a kernel address"
    );

    let log_stop = |step: &str, e: &Error| debug!("{addr:#x}: {step} lookup failed: {e}");

    let unit = engine
        .unit_for_address(addr)
        .inspect_err(|e| log_stop("unit", e))?;

    let file = engine
        .file_for_unit(unit)
        .inspect_err(|e| log_stop("file", e))?;
    out.file.copy_from(file.name);

    let call_site = addr.saturating_sub(CALL_INSN_LEN);
    out.line = engine
        .line_for_address(call_site, file.line_program)
        .inspect_err(|e| log_stop("line", e))?;

    let function = engine
        .function_for_address(call_site, unit)
        .inspect_err(|e| log_stop("function", e))?;
    if out.function_name.copy_from(function.name).truncated {
        debug!("{addr:#x}: function name truncated");
    }
    out.function_entry = function.entry;

    Ok(())
}

/// Resolves a function name against an arbitrary debug-format engine,
/// falling back to `symbols`.
///
/// Sources are consulted in order: the name index, a full scan of the
/// debug entries, the symbol table. Only "not found" moves on to the next
/// source; any other error is fatal.
pub fn resolve_name_in<'img, D: DebugFormat<'img> + ?Sized>(
    engine: &D,
    symbols: &SymbolTableView<'_>,
    name: &[u8],
) -> VirtAddr {
    match engine.address_by_index(name) {
        Ok(addr) => return addr,
        Err(Error::NotFound) => debug!("{}: not in name index", name.escape_ascii()),
        Err(e) => malformed("name index", e),
    }

    match engine.address_by_scan(name) {
        Ok(addr) => return addr,
        Err(Error::NotFound) => debug!("{}: not in debug entries", name.escape_ascii()),
        Err(e) => malformed("debug entry tree", e),
    }

    symbols.find_function(name).unwrap_or_else(|| {
        debug!("{}: not in symbol table", name.escape_ascii());
        0
    })
}

#[cold]
#[track_caller]
fn malformed(source: &str, e: Error) -> ! {
    panic!("{source} is malformed: {e}")
}
