// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! ELF symbol table of the linked kernel image.
//!
//! Last-resort source of function addresses: hand-written assembly routines
//! have no debug entries but still show up here.

use crate::boot::BootRecord;
use crate::VirtAddr;
use object::elf::{Sym64, STB_GLOBAL, STT_FUNC};
use object::read::elf::Sym as _;
use object::LittleEndian as LE;
use std::ffi::{c_char, CStr};
use std::mem;

/// Function symbol read from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol<'img> {
    /// Symbol name, without terminator.
    pub name: &'img [u8],
    /// Symbol value.
    pub virt_addr: VirtAddr,
}

/// Where symbol names are read from.
#[derive(Debug, Clone, Copy)]
enum Strings<'img> {
    /// String table of known size.
    Bounded(&'img [u8]),

    /// String table whose end is unknown, given by its start address.
    Unbounded(VirtAddr),
}

/// Read-only view of the boot-supplied symbol table.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTableView<'img> {
    symbols: &'img [Sym64<LE>],
    strings: Strings<'img>,
}

impl<'img> SymbolTableView<'img> {
    /// Interprets the symbol and string tables of the boot record.
    ///
    /// Trailing bytes that don't form a whole record are ignored.
    pub fn new(record: &BootRecord<'img>) -> Self {
        let data = record.symbol_table();
        let count = data.len() / mem::size_of::<Sym64<LE>>();
        let symbols = object::pod::slice_from_bytes(data, count).map_or(&[][..], |(syms, _)| syms);

        let strings = match record.string_table() {
            Some(strtab) => Strings::Bounded(strtab),
            None => Strings::Unbounded(record.string_table_start()),
        };

        Self { symbols, strings }
    }

    /// Number of records, including the reserved null symbol.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Iterates over global function symbols, in table order.
    ///
    /// Symbols whose name can't be read are skipped.
    pub fn function_symbols(&self) -> impl Iterator<Item = Symbol<'img>> + '_ {
        self.symbols
            .iter()
            .filter(|sym| sym.st_bind() == STB_GLOBAL && sym.st_type() == STT_FUNC)
            .filter_map(|sym| {
                Some(Symbol {
                    name: self.name(sym.st_name(LE))?,
                    virt_addr: sym.st_value(LE),
                })
            })
    }

    /// Value of the first global function symbol named exactly `name`.
    pub fn find_function(&self, name: &[u8]) -> Option<VirtAddr> {
        self.function_symbols()
            .find(|sym| sym.name == name)
            .map(|sym| sym.virt_addr)
    }

    fn name(&self, offset: u32) -> Option<&'img [u8]> {
        match self.strings {
            Strings::Bounded(strtab) => {
                let tail = strtab.get(offset as usize..)?;
                let len = tail.iter().position(|&b| b == 0)?;
                Some(&tail[..len])
            }
            Strings::Unbounded(start) => {
                let addr = start.checked_add(offset.into())?;
                // SAFETY: `BootRecord` guarantees NUL-terminated names in
                // mapped memory when the string table size is unknown.
                let name = unsafe { CStr::from_ptr(addr as usize as *const c_char) };
                Some(name.to_bytes())
            }
        }
    }
}
