// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Debug-format engine: primitive lookups on the kernel's DWARF sections.
//!
//! [`DebugFormat`] is the seam between the resolvers in [`crate::resolve`]
//! and the code that actually understands the binary format. [`Sections`] is
//! the production implementation on top of [`gimli`], reading straight from
//! the boot-supplied section bytes without copying or caching anything.

// Compiler complains about using the gimli constants in match patterns.
#![allow(non_upper_case_globals)]

use crate::boot::{DebugSectionSet, SectionKind};
use crate::{debug, VirtAddr};
use fallible_iterator::FallibleIterator;
use gimli::{constants::*, AttributeValue as AV};
use std::convert::Infallible;
use std::fmt;

/// Shorthand for the [`gimli`] reader type that we use everywhere.
///
/// The kernel image is little-endian, so we hard-code LE at compile time.
type R<'img> = gimli::EndianSlice<'img, gimli::LittleEndian>;

/// Address size of the kernel image, used when decoding line programs
/// without their owning unit.
const ADDRESS_SIZE: u8 = 8;

/// Maximum number of `DW_AT_abstract_origin` / `DW_AT_specification` hops
/// followed while looking for a subprogram's name.
const MAX_REFERENCE_DEPTH: usize = 4;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during debug-format lookups.
///
/// [`Error::NotFound`] is the only variant that means "absent". Every other
/// variant means the data contradicts its own format.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("No matching entry")]
    NotFound,

    #[error("Unit has no line-number program")]
    MissingLineProgram,

    #[error("Address range wraps around the address space")]
    AddressOverflow,

    #[error("DIE reference chain too long")]
    ReferenceChainTooLong,

    #[error("DIE reference points outside of .debug_info")]
    BadReference,

    #[error("DWARF: {0}")]
    Format(FormatError),
}

impl Error {
    /// Whether this is the "absent" outcome rather than a structural error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Decoder error.
///
/// Opaque so that [`gimli`] types don't leak into our public interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatError(gimli::Error);

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for FormatError {}

impl From<gimli::Error> for Error {
    fn from(e: gimli::Error) -> Self {
        Self::Format(FormatError(e))
    }
}

/// Offset of a compile unit's header within `.debug_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitOffset(pub usize);

/// Offset of a line-number program within `.debug_line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineProgramOffset(pub usize);

/// Source file of a compile unit along with its line-number program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitFile<'img> {
    /// Unit name as recorded by the compiler, without terminator.
    pub name: &'img [u8],
    /// Line program describing the unit.
    pub line_program: LineProgramOffset,
}

/// Function enclosing an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function<'img> {
    /// Function name, without terminator.
    pub name: &'img [u8],
    /// Entry address of the function.
    pub entry: VirtAddr,
}

/// Primitive lookups provided by a debug-format engine.
///
/// Each operation reports [`Error::NotFound`] when the data simply doesn't
/// contain an answer, and any other error when the data is inconsistent.
pub trait DebugFormat<'img> {
    /// Locates the compile unit covering `addr`.
    fn unit_for_address(&self, addr: VirtAddr) -> Result<UnitOffset>;

    /// Reads the source file name and line program of a unit.
    fn file_for_unit(&self, unit: UnitOffset) -> Result<UnitFile<'img>>;

    /// Looks up the source line of `addr` in the given line program.
    fn line_for_address(&self, addr: VirtAddr, program: LineProgramOffset) -> Result<u32>;

    /// Finds the function containing `addr` within the given unit.
    fn function_for_address(&self, addr: VirtAddr, unit: UnitOffset) -> Result<Function<'img>>;

    /// Resolves a function name through the global name index.
    fn address_by_index(&self, name: &[u8]) -> Result<VirtAddr>;

    /// Resolves a function name by traversing every unit's entry tree.
    fn address_by_scan(&self, name: &[u8]) -> Result<VirtAddr>;
}

/// DWARF sections of the running kernel.
///
/// Cheap to construct: this only wraps the section slices.
pub struct Sections<'img> {
    dwarf: gimli::Dwarf<R<'img>>,
    pubnames: gimli::DebugPubNames<R<'img>>,
}

impl<'img> Sections<'img> {
    /// Wraps the sections of the given descriptor set.
    pub fn load(set: &DebugSectionSet<'img>) -> Self {
        let reader = |kind| R::new(set.section(kind), gimli::LittleEndian);

        let dwarf = gimli::Dwarf::load(|id| {
            Ok::<_, Infallible>(match id {
                gimli::SectionId::DebugAranges => reader(SectionKind::Aranges),
                gimli::SectionId::DebugAbbrev => reader(SectionKind::Abbrev),
                gimli::SectionId::DebugInfo => reader(SectionKind::Info),
                gimli::SectionId::DebugLine => reader(SectionKind::Line),
                gimli::SectionId::DebugStr => reader(SectionKind::Str),
                _ => R::new(&[], gimli::LittleEndian),
            })
        })
        .unwrap_or_else(|never| match never {});

        Self {
            dwarf,
            pubnames: gimli::DebugPubNames::new(
                set.section(SectionKind::PubNames),
                gimli::LittleEndian,
            ),
        }
    }

    /// Decodes the unit whose header starts at `offset`.
    fn unit_at(&self, offset: UnitOffset) -> Result<gimli::Unit<R<'img>>> {
        let header = self
            .dwarf
            .debug_info
            .header_from_offset(gimli::DebugInfoOffset(offset.0))?;
        Ok(self.dwarf.unit(header)?)
    }

    /// Decodes the unit whose entries include the given `.debug_info` offset.
    fn unit_containing(&self, offset: gimli::DebugInfoOffset) -> Result<gimli::Unit<R<'img>>> {
        let mut unit_headers = self.dwarf.units();
        while let Some(header) = unit_headers.next()? {
            let Some(start) = header.offset().as_debug_info_offset() else {
                continue;
            };

            if (start.0..start.0 + header.length_including_self()).contains(&offset.0) {
                return Ok(self.dwarf.unit(header)?);
            }
        }

        Err(Error::BadReference)
    }

    /// Reads a string-valued attribute as raw bytes.
    fn attr_bytes(&self, unit: &gimli::Unit<R<'img>>, value: AV<R<'img>>) -> Result<&'img [u8]> {
        Ok(self.dwarf.attr_string(unit, value)?.slice())
    }

    /// Reads the name of the DIE that `reference` points to.
    ///
    /// Entries without a name of their own inherit it through
    /// `DW_AT_abstract_origin` and `DW_AT_specification`.
    fn referenced_name(
        &self,
        unit: &gimli::Unit<R<'img>>,
        reference: AV<R<'img>>,
        depth: usize,
    ) -> Result<Option<&'img [u8]>> {
        if depth > MAX_REFERENCE_DEPTH {
            return Err(Error::ReferenceChainTooLong);
        }

        match reference {
            AV::UnitRef(offset) => {
                let die = unit.entry(offset)?;
                self.die_name(unit, &die, depth)
            }
            AV::DebugInfoRef(offset) => {
                let target = self.unit_containing(offset)?;
                let offset = offset
                    .to_unit_offset(&target.header)
                    .ok_or(Error::BadReference)?;
                let die = target.entry(offset)?;
                self.die_name(&target, &die, depth)
            }
            _ => Err(Error::BadReference),
        }
    }

    fn die_name(
        &self,
        unit: &gimli::Unit<R<'img>>,
        die: &gimli::DebuggingInformationEntry<'_, '_, R<'img>>,
        depth: usize,
    ) -> Result<Option<&'img [u8]>> {
        let mut origin = None;
        let mut spec = None;
        let mut attrs = die.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                DW_AT_name => return Ok(Some(self.attr_bytes(unit, attr.value())?)),
                DW_AT_abstract_origin => origin = Some(attr.value()),
                DW_AT_specification => spec = Some(attr.value()),
                _ => (),
            }
        }

        for reference in origin.into_iter().chain(spec) {
            if let Some(name) = self.referenced_name(unit, reference, depth + 1)? {
                return Ok(Some(name));
            }
        }

        Ok(None)
    }
}

impl<'img> DebugFormat<'img> for Sections<'img> {
    fn unit_for_address(&self, addr: VirtAddr) -> Result<UnitOffset> {
        let mut headers = self.dwarf.debug_aranges.headers();
        while let Some(header) = headers.next()? {
            let mut entries = header.entries();
            while let Some(entry) = entries.next()? {
                let begin = entry.address();
                let end = begin
                    .checked_add(entry.length())
                    .ok_or(Error::AddressOverflow)?;

                if (begin..end).contains(&addr) {
                    return Ok(UnitOffset(header.debug_info_offset().0));
                }
            }
        }

        // Aranges are optional: units built without them still describe
        // their own PC ranges.
        debug!("{addr:#x} not covered by .debug_aranges, scanning units");

        let mut unit_headers = self.dwarf.units();
        while let Some(header) = unit_headers.next()? {
            let Some(offset) = header.offset().as_debug_info_offset() else {
                continue;
            };

            let unit = self.dwarf.unit(header)?;
            let mut ranges = self.dwarf.unit_ranges(&unit)?;
            while let Some(range) = ranges.next()? {
                if (range.begin..range.end).contains(&addr) {
                    return Ok(UnitOffset(offset.0));
                }
            }
        }

        Err(Error::NotFound)
    }

    fn file_for_unit(&self, offset: UnitOffset) -> Result<UnitFile<'img>> {
        let unit = self.unit_at(offset)?;
        let name = unit.name.ok_or(Error::NotFound)?;
        let program = unit
            .line_program
            .as_ref()
            .ok_or(Error::MissingLineProgram)?;

        Ok(UnitFile {
            name: name.slice(),
            line_program: LineProgramOffset(program.header().offset().0),
        })
    }

    fn line_for_address(&self, addr: VirtAddr, program: LineProgramOffset) -> Result<u32> {
        let program = self.dwarf.debug_line.program(
            gimli::DebugLineOffset(program.0),
            ADDRESS_SIZE,
            None,
            None,
        )?;

        // A row describes the addresses up to (excluding) the next row of
        // the same sequence.
        let mut rows = program.rows();
        let mut active: Option<(VirtAddr, u32)> = None;
        while let Some((_, row)) = rows.next_row()? {
            if let Some((begin, line)) = active {
                if (begin..row.address()).contains(&addr) {
                    return Ok(line);
                }
            }

            active = if row.end_sequence() {
                None
            } else {
                let line = row
                    .line()
                    .map_or(0, |x| u32::try_from(x.get()).unwrap_or(u32::MAX));
                Some((row.address(), line))
            };
        }

        Err(Error::NotFound)
    }

    fn function_for_address(&self, addr: VirtAddr, offset: UnitOffset) -> Result<Function<'img>> {
        let unit = self.unit_at(offset)?;
        let mut subprograms = SubprogramIter::new(&unit);

        while let Some(sp) = subprograms.next()? {
            let hit = sp.find_range(self, &unit, |range| {
                (range.begin..range.end).contains(&addr)
            })?;
            let Some(range) = hit else {
                continue;
            };

            let Some(name) = sp.name(self, &unit)? else {
                debug!("{addr:#x}: enclosing subprogram has no name");
                continue;
            };

            return Ok(Function {
                name,
                entry: sp.low_pc(self, &unit)?.unwrap_or(range.begin),
            });
        }

        Err(Error::NotFound)
    }

    fn address_by_index(&self, name: &[u8]) -> Result<VirtAddr> {
        let mut items = self.pubnames.items();
        while let Some(item) = items.next()? {
            if item.name().slice() != name {
                continue;
            }

            let unit = self.unit_at(UnitOffset(item.unit_header_offset().0))?;
            let die = unit.entry(item.die_offset())?;
            let Some(sp) = Subprogram::from_die(&die)? else {
                // The index also lists variables; keep looking.
                debug!("index entry for {} is not a function", name.escape_ascii());
                continue;
            };

            if let Some(addr) = sp.entry_or_first_range(self, &unit)? {
                return Ok(addr);
            }
        }

        Err(Error::NotFound)
    }

    fn address_by_scan(&self, name: &[u8]) -> Result<VirtAddr> {
        let mut unit_headers = self.dwarf.units();
        while let Some(header) = unit_headers.next()? {
            let unit = self.dwarf.unit(header)?;
            let mut subprograms = SubprogramIter::new(&unit);

            while let Some(sp) = subprograms.next()? {
                if sp.name(self, &unit)? != Some(name) {
                    continue;
                }
                if let Some(addr) = sp.entry_or_first_range(self, &unit)? {
                    return Ok(addr);
                }
            }
        }

        Err(Error::NotFound)
    }
}

/// Concrete (non-abstract, defining) subprogram entry.
///
/// Only the raw attribute values are kept; names, addresses and PC ranges
/// are decoded on demand so that entries which aren't of interest never
/// have their ranges read.
struct Subprogram<'img> {
    offset: gimli::UnitOffset,
    name: Option<AV<R<'img>>>,
    low_pc: Option<AV<R<'img>>>,
    abstract_origin: Option<AV<R<'img>>>,
    specification: Option<AV<R<'img>>>,
}

impl<'img> Subprogram<'img> {
    /// Extracts the subprogram described by `die`, or `None` if the DIE
    /// isn't a concrete subprogram.
    fn from_die(die: &gimli::DebuggingInformationEntry<'_, '_, R<'img>>) -> Result<Option<Self>> {
        if die.tag() != DW_TAG_subprogram {
            return Ok(None);
        }

        let mut sp = Self {
            offset: die.offset(),
            name: None,
            low_pc: None,
            abstract_origin: None,
            specification: None,
        };

        // Iterate the attributes once and pick what we need.
        let mut attrs = die.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                DW_AT_name => sp.name = Some(attr.value()),
                DW_AT_low_pc => sp.low_pc = Some(attr.value()),
                DW_AT_abstract_origin => sp.abstract_origin = Some(attr.value()),
                DW_AT_specification => sp.specification = Some(attr.value()),

                // DWARF 5 [3.3.8.1]: subroutines with a DW_AT_inline value
                // other than DW_INL_not_inlined are abstract instance roots.
                DW_AT_inline => match attr.value() {
                    AV::Inline(DW_INL_not_inlined) => (),
                    AV::Inline(_) => return Ok(None),
                    _ => (),
                },

                // DWARF 5 [2.13.1]: non-defining declarations.
                DW_AT_declaration => {
                    if let AV::Flag(true) = attr.value() {
                        return Ok(None);
                    }
                }

                _ => (),
            }
        }

        Ok(Some(sp))
    }

    /// Name of the subprogram, inherited from the abstract instance or the
    /// declaration if the entry doesn't carry one itself.
    fn name(
        &self,
        sections: &Sections<'img>,
        unit: &gimli::Unit<R<'img>>,
    ) -> Result<Option<&'img [u8]>> {
        if let Some(av) = self.name {
            return Ok(Some(sections.attr_bytes(unit, av)?));
        }

        for reference in self.abstract_origin.into_iter().chain(self.specification) {
            if let Some(name) = sections.referenced_name(unit, reference, 1)? {
                return Ok(Some(name));
            }
        }

        Ok(None)
    }

    fn low_pc(
        &self,
        sections: &Sections<'img>,
        unit: &gimli::Unit<R<'img>>,
    ) -> Result<Option<VirtAddr>> {
        match self.low_pc {
            Some(av) => Ok(sections.dwarf.attr_address(unit, av)?),
            None => Ok(None),
        }
    }

    /// First PC range of the subprogram accepted by `pred`.
    ///
    /// Range lists live in sections the boot stage doesn't load. A PC range
    /// description that can't be decoded is logged and matches nothing.
    fn find_range(
        &self,
        sections: &Sections<'img>,
        unit: &gimli::Unit<R<'img>>,
        pred: impl FnMut(&gimli::Range) -> bool,
    ) -> Result<Option<gimli::Range>> {
        let die = unit.entry(self.offset)?;
        match Self::search_ranges(sections, unit, &die, pred) {
            Ok(found) => Ok(found),
            Err(e) => {
                let offset = self.offset.0;
                debug!("subprogram at unit offset {offset:#x}: unreadable PC ranges: {e}");
                Ok(None)
            }
        }
    }

    fn search_ranges(
        sections: &Sections<'img>,
        unit: &gimli::Unit<R<'img>>,
        die: &gimli::DebuggingInformationEntry<'_, '_, R<'img>>,
        mut pred: impl FnMut(&gimli::Range) -> bool,
    ) -> gimli::Result<Option<gimli::Range>> {
        let mut ranges = sections.dwarf.die_ranges(unit, die)?;
        while let Some(range) = ranges.next()? {
            if pred(&range) {
                return Ok(Some(range));
            }
        }
        Ok(None)
    }

    /// Entry address, falling back to the start of the first PC range.
    fn entry_or_first_range(
        &self,
        sections: &Sections<'img>,
        unit: &gimli::Unit<R<'img>>,
    ) -> Result<Option<VirtAddr>> {
        if let Some(entry) = self.low_pc(sections, unit)? {
            return Ok(Some(entry));
        }
        Ok(self
            .find_range(sections, unit, |_| true)?
            .map(|range| range.begin))
    }
}

/// Iterator over the concrete subprograms in a unit.
///
/// Children of yielded subprograms are visited as well; nested concrete
/// subprograms are rare but legal.
struct SubprogramIter<'unit, 'img> {
    die_iter: gimli::EntriesCursor<'unit, 'unit, R<'img>>,
}

impl<'unit, 'img> SubprogramIter<'unit, 'img> {
    fn new(unit: &'unit gimli::Unit<R<'img>>) -> Self {
        Self {
            die_iter: unit.entries(),
        }
    }
}

impl<'unit, 'img> FallibleIterator for SubprogramIter<'unit, 'img> {
    type Item = Subprogram<'img>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        while let Some((_, die)) = self.die_iter.next_dfs()? {
            if let Some(sp) = Subprogram::from_die(die)? {
                return Ok(Some(sp));
            }
        }

        Ok(None)
    }
}
