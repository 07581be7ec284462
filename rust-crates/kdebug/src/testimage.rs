// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Synthetic kernel images for tests.
//!
//! Units, abbreviations, line programs and strings are produced by the
//! [`gimli::write`] encoder. `.debug_aranges`, `.debug_pubnames` and the
//! ELF64 symbol table are assembled by hand, since the encoder doesn't emit
//! them and tests need to corrupt them.

use crate::boot::{BootRecord, ImageSections};
use crate::VirtAddr;
use gimli::constants::*;
use gimli::write::{self, Address, AttributeValue, EndianVec, UnitEntryId};
use gimli::{Encoding, Format, LineEncoding, LittleEndian};

/// Start of kernel text in synthetic images.
pub const KERNEL_TEXT: VirtAddr = 0xFFFF_FFFF_8010_0000;

/// Encoding of every synthetic unit: what a 64-bit kernel built with
/// `-gdwarf-4` looks like.
const ENCODING: Encoding = Encoding {
    format: Format::Dwarf32,
    version: 4,
    address_size: 8,
};

/// Size of the DWARF 4 unit header.
const UNIT_HEADER_LEN: usize = 11;

/// Size of an `Elf64_Sym` record.
const SYM_LEN: usize = 24;

/// How a function's debug entry is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Named entry with `DW_AT_low_pc` and `DW_AT_high_pc`.
    Contiguous,
    /// Named entry whose PC range is a `DW_AT_ranges` list.
    RangeList,
    /// Unnamed concrete entry pointing at an abstract inline root.
    OutOfLine,
    /// Unnamed definition completing a separate declaration.
    Definition,
}

/// Function to place into a synthetic unit.
pub struct Func {
    name: &'static str,
    low_pc: VirtAddr,
    len: u64,
    rows: Vec<(u64, u32)>,
    indexed: bool,
    shape: Shape,
}

/// Function `name` covering `[low_pc, low_pc + len)`.
pub fn func(name: &'static str, low_pc: VirtAddr, len: u64) -> Func {
    Func {
        name,
        low_pc,
        len,
        rows: vec![],
        indexed: true,
        shape: Shape::Contiguous,
    }
}

impl Func {
    /// Line table rows as `(offset from low_pc, line)`, ascending.
    pub fn lines(mut self, rows: &[(u64, u32)]) -> Self {
        self.rows = rows.to_vec();
        self
    }

    /// Leaves the function out of the name index.
    pub fn unindexed(mut self) -> Self {
        self.indexed = false;
        self
    }

    /// Describes the PC range with `DW_AT_ranges`.
    ///
    /// The range list goes to `.debug_ranges`, which the boot record
    /// doesn't carry.
    pub fn range_list(mut self) -> Self {
        self.shape = Shape::RangeList;
        self
    }

    /// Emits an abstract inline root carrying the name, followed by an
    /// unnamed out-of-line instance referring to it.
    pub fn out_of_line(mut self) -> Self {
        self.shape = Shape::OutOfLine;
        self
    }

    /// Emits a named declaration, followed by an unnamed definition
    /// referring to it through `DW_AT_specification`.
    pub fn separately_declared(mut self) -> Self {
        self.shape = Shape::Definition;
        self
    }
}

struct Unit {
    file: &'static str,
    funcs: Vec<Func>,
    vars: Vec<&'static str>,
}

struct Symbol {
    name: &'static str,
    value: VirtAddr,
    bind: u8,
    kind: u8,
}

/// Builder for [`TestImage`].
pub struct ImageBuilder {
    units: Vec<Unit>,
    symbols: Vec<Symbol>,
    aranges: bool,
    broken_index: Vec<(&'static str, u32)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            units: vec![],
            symbols: vec![],
            aranges: true,
            broken_index: vec![],
        }
    }

    /// Adds a compile unit for `file` containing `funcs`.
    pub fn unit(mut self, file: &'static str, funcs: Vec<Func>) -> Self {
        self.units.push(Unit {
            file,
            funcs,
            vars: vec![],
        });
        self
    }

    /// Adds an indexed variable to the most recently added unit.
    pub fn variable(mut self, name: &'static str) -> Self {
        self.units
            .last_mut()
            .expect("variable() requires a unit")
            .vars
            .push(name);
        self
    }

    /// Adds an entry to the ELF symbol table.
    pub fn symbol(mut self, name: &'static str, value: VirtAddr, bind: u8, kind: u8) -> Self {
        self.symbols.push(Symbol {
            name,
            value,
            bind,
            kind,
        });
        self
    }

    /// Adds a global function symbol.
    pub fn global_function(self, name: &'static str, value: VirtAddr) -> Self {
        self.symbol(name, value, object::elf::STB_GLOBAL, object::elf::STT_FUNC)
    }

    /// Omits `.debug_aranges` entirely.
    pub fn without_aranges(mut self) -> Self {
        self.aranges = false;
        self
    }

    /// Adds a name index set whose unit offset is `unit_offset`.
    pub fn broken_index_entry(mut self, name: &'static str, unit_offset: u32) -> Self {
        self.broken_index.push((name, unit_offset));
        self
    }

    pub fn build(self) -> TestImage {
        let mut strings = write::StringTable::default();
        let mut line_strings = write::LineStringTable::default();

        // Strings must be placed before any unit can refer to them, so all
        // units are built up front and written afterwards.
        let built: Vec<_> = self
            .units
            .iter()
            .map(|unit| {
                let mut table = write::UnitTable::default();
                let (dw_unit, names) = dwarf_unit(unit, &mut strings, &mut line_strings);
                let id = table.add(dw_unit);
                (table, id, names)
            })
            .collect();

        let mut sections = write::Sections::new(EndianVec::new(LittleEndian));
        let line_str_offsets = line_strings
            .write(&mut sections.debug_line_str)
            .expect("write .debug_line_str");
        let str_offsets = strings
            .write(&mut sections.debug_str)
            .expect("write .debug_str");

        let mut img = TestImage::default();
        for ((mut table, id, names), unit) in built.into_iter().zip(&self.units) {
            let line_offset = sections.debug_line.offset().0;
            let offsets = table
                .write(&mut sections, &line_str_offsets, &str_offsets)
                .expect("write unit");

            let unit_offset = offsets.unit(id).0;
            let unit_len = sections.debug_info.offset().0 - unit_offset;

            if self.aranges && !unit.funcs.is_empty() {
                aranges_set(&mut img.aranges, unit, unit_offset);
            }

            let names: Vec<_> = names
                .into_iter()
                .map(|(name, entry)| {
                    let die = offsets.entry(id, entry).expect("entry was written");
                    (name, (die.0 - unit_offset) as u32)
                })
                .collect();
            pubnames_set(
                &mut img.pubnames,
                unit_offset as u32,
                unit_len as u32,
                names.into_iter(),
            );

            img.unit_offsets.push(unit_offset);
            img.line_offsets.push(line_offset);
        }

        for &(name, unit_offset) in &self.broken_index {
            let die_offset = UNIT_HEADER_LEN as u32;
            pubnames_set(
                &mut img.pubnames,
                unit_offset,
                0,
                [(name, die_offset)].into_iter(),
            );
        }

        img.abbrev = sections.debug_abbrev.slice().to_vec();
        img.info = sections.debug_info.slice().to_vec();
        img.line = sections.debug_line.slice().to_vec();
        img.str = sections.debug_str.slice().to_vec();

        symbol_table(&mut img.symtab, &mut img.strtab, &self.symbols);
        img
    }
}

/// Section bytes of a synthetic image.
#[derive(Default)]
pub struct TestImage {
    pub aranges: Vec<u8>,
    pub abbrev: Vec<u8>,
    pub info: Vec<u8>,
    pub line: Vec<u8>,
    pub str: Vec<u8>,
    pub pubnames: Vec<u8>,
    pub pubtypes: Vec<u8>,
    pub symtab: Vec<u8>,
    pub strtab: Vec<u8>,

    /// `.debug_info` offset of each unit, in insertion order.
    pub unit_offsets: Vec<usize>,
    /// `.debug_line` offset of each unit's line program.
    pub line_offsets: Vec<usize>,
}

impl TestImage {
    pub fn sections(&self) -> ImageSections<'_> {
        ImageSections {
            debug_aranges: &self.aranges,
            debug_abbrev: &self.abbrev,
            debug_info: &self.info,
            debug_line: &self.line,
            debug_str: &self.str,
            debug_pubnames: &self.pubnames,
            debug_pubtypes: &self.pubtypes,
            symbol_table: &self.symtab,
            string_table: &self.strtab,
        }
    }

    pub fn record(&self) -> BootRecord<'_> {
        BootRecord::from_image(&self.sections())
    }
}

/// Builds the writable form of `unit`.
///
/// Returns the unit along with the entries to list in the name index:
/// indexed functions first, then variables.
fn dwarf_unit(
    unit: &Unit,
    strings: &mut write::StringTable,
    line_strings: &mut write::LineStringTable,
) -> (write::Unit, Vec<(&'static str, UnitEntryId)>) {
    let mut program = write::LineProgram::new(
        ENCODING,
        LineEncoding::default(),
        write::LineString::new(".", ENCODING, line_strings),
        None,
        write::LineString::new(unit.file, ENCODING, line_strings),
        None,
    );
    let dir = program.default_directory();
    let file = program.add_file(
        write::LineString::new(unit.file, ENCODING, line_strings),
        dir,
        None,
    );

    for f in unit.funcs.iter().filter(|f| !f.rows.is_empty()) {
        program.begin_sequence(Some(Address::Constant(f.low_pc)));
        for &(offset, line) in &f.rows {
            let row = program.row();
            row.file = file;
            row.address_offset = offset;
            row.line = line.into();
            program.generate_row();
        }
        program.end_sequence(f.len);
    }

    let mut dw = write::Unit::new(ENCODING, program);
    let root = dw.root();

    let cu = dw.get_mut(root);
    cu.set(DW_AT_name, AttributeValue::String(unit.file.into()));
    let low = unit.funcs.iter().map(|f| f.low_pc).min();
    let high = unit.funcs.iter().map(|f| f.low_pc + f.len).max();
    if let (Some(low), Some(high)) = (low, high) {
        cu.set(DW_AT_low_pc, AttributeValue::Address(Address::Constant(low)));
        cu.set(DW_AT_high_pc, AttributeValue::Udata(high - low));
    }

    let mut names = vec![];
    for f in &unit.funcs {
        let name = AttributeValue::StringRef(strings.add(f.name));
        let entry = match f.shape {
            Shape::Contiguous | Shape::RangeList => {
                let id = dw.add(root, DW_TAG_subprogram);
                dw.get_mut(id).set(DW_AT_name, name);
                id
            }
            Shape::OutOfLine => {
                let origin = dw.add(root, DW_TAG_subprogram);
                let die = dw.get_mut(origin);
                die.set(DW_AT_name, name);
                die.set(DW_AT_inline, AttributeValue::Inline(DW_INL_inlined));

                let id = dw.add(root, DW_TAG_subprogram);
                dw.get_mut(id)
                    .set(DW_AT_abstract_origin, AttributeValue::UnitRef(origin));
                id
            }
            Shape::Definition => {
                let decl = dw.add(root, DW_TAG_subprogram);
                let die = dw.get_mut(decl);
                die.set(DW_AT_name, name);
                die.set(DW_AT_declaration, AttributeValue::FlagPresent);

                let id = dw.add(root, DW_TAG_subprogram);
                dw.get_mut(id)
                    .set(DW_AT_specification, AttributeValue::UnitRef(decl));
                id
            }
        };

        if f.shape == Shape::RangeList {
            let list = dw.ranges.add(write::RangeList(vec![write::Range::StartLength {
                begin: Address::Constant(f.low_pc),
                length: f.len,
            }]));
            dw.get_mut(entry)
                .set(DW_AT_ranges, AttributeValue::RangeListRef(list));
        } else {
            let die = dw.get_mut(entry);
            die.set(DW_AT_low_pc, AttributeValue::Address(Address::Constant(f.low_pc)));
            die.set(DW_AT_high_pc, AttributeValue::Udata(f.len));
        }
        dw.get_mut(entry)
            .set(DW_AT_decl_file, AttributeValue::FileIndex(Some(file)));

        if f.indexed {
            names.push((f.name, entry));
        }
    }

    for &v in &unit.vars {
        let id = dw.add(root, DW_TAG_variable);
        let die = dw.get_mut(id);
        die.set(DW_AT_name, AttributeValue::String(v.into()));
        die.set(DW_AT_decl_file, AttributeValue::FileIndex(Some(file)));
        names.push((v, id));
    }

    (dw, names)
}

fn aranges_set(out: &mut Vec<u8>, unit: &Unit, unit_offset: usize) {
    let start = out.len();
    out.extend(0u32.to_le_bytes());
    out.extend(2u16.to_le_bytes());
    out.extend((unit_offset as u32).to_le_bytes());
    out.push(8); // address_size
    out.push(0); // segment_selector_size

    // Tuples are aligned to twice the address size.
    out.extend([0; 4]);

    for f in &unit.funcs {
        out.extend(f.low_pc.to_le_bytes());
        out.extend(f.len.to_le_bytes());
    }
    out.extend([0; 16]);

    patch_len(out, start);
}

fn pubnames_set<'a>(
    out: &mut Vec<u8>,
    unit_offset: u32,
    unit_len: u32,
    names: impl Iterator<Item = (&'a str, u32)>,
) {
    let start = out.len();
    out.extend(0u32.to_le_bytes());
    out.extend(2u16.to_le_bytes());
    out.extend(unit_offset.to_le_bytes());
    out.extend(unit_len.to_le_bytes());

    for (name, die_offset) in names {
        out.extend(die_offset.to_le_bytes());
        cstr(out, name);
    }
    out.extend(0u32.to_le_bytes());

    patch_len(out, start);
}

fn symbol_table(symtab: &mut Vec<u8>, strtab: &mut Vec<u8>, symbols: &[Symbol]) {
    // Index 0 is the reserved null symbol, offset 0 the empty name.
    symtab.extend([0; SYM_LEN]);
    strtab.push(0);

    for sym in symbols {
        symtab.extend((strtab.len() as u32).to_le_bytes()); // st_name
        symtab.push((sym.bind << 4) | (sym.kind & 0xf)); // st_info
        symtab.push(0); // st_other
        symtab.extend(1u16.to_le_bytes()); // st_shndx
        symtab.extend(sym.value.to_le_bytes()); // st_value
        symtab.extend(0u64.to_le_bytes()); // st_size
        cstr(strtab, sym.name);
    }
}

/// Fills in the 32-bit initial length field of the entry starting at `start`.
fn patch_len(out: &mut [u8], start: usize) {
    let len = (out.len() - start - 4) as u32;
    out[start..start + 4].copy_from_slice(&len.to_le_bytes());
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend(s.as_bytes());
    out.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_records() {
        let img = ImageBuilder::new()
            .global_function("start", KERNEL_TEXT)
            .build();
        assert_eq!(img.symtab.len(), 2 * SYM_LEN);
        assert_eq!(img.strtab, b"\0start\0");
    }

    #[test]
    fn units_are_laid_out_in_order() {
        let img = ImageBuilder::new()
            .unit("kern/init.c", vec![func("i386_init", KERNEL_TEXT, 0x40).lines(&[(0, 1)])])
            .unit("kern/trap.c", vec![func("trap", KERNEL_TEXT + 0x40, 0x20).lines(&[(0, 1)])])
            .build();

        assert_eq!(img.unit_offsets[0], 0);
        assert!(img.unit_offsets[1] > img.unit_offsets[0]);
        assert_eq!(img.line_offsets[0], 0);
        assert!(img.line_offsets[1] > img.line_offsets[0]);
        assert!(img.str.windows(5).any(|w| w == b"trap\0"));
    }
}
