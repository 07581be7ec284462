// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Boot hand-off record and the debug section set derived from it.
//!
//! The boot stage loads the kernel image together with its debug sections and
//! writes the address ranges of those sections into a [`RawBootRecord`]
//! exactly once before jumping to the kernel. Afterwards the record is never
//! mutated. [`BootRecord`] attaches the lifetime of the backing memory to the
//! raw record, and [`DebugSectionSet::locate`] turns it into the per-call
//! descriptor set consumed by the resolvers.

use crate::VirtAddr;
use std::marker::PhantomData;
use std::{fmt, slice};

/// Debug sections handed over by the boot stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Address-range to compile-unit index.
    Aranges,
    /// Abbreviation tables.
    Abbrev,
    /// Debugging information entry tree.
    Info,
    /// Line-number programs.
    Line,
    /// String table.
    Str,
    /// Global name index.
    PubNames,
    /// Global type index.
    PubTypes,
}

impl SectionKind {
    /// All section kinds, in boot record order.
    pub const ALL: [SectionKind; 7] = [
        Self::Aranges,
        Self::Abbrev,
        Self::Info,
        Self::Line,
        Self::Str,
        Self::PubNames,
        Self::PubTypes,
    ];

    /// ELF section name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::Aranges => ".debug_aranges",
            Self::Abbrev => ".debug_abbrev",
            Self::Info => ".debug_info",
            Self::Line => ".debug_line",
            Self::Str => ".debug_str",
            Self::PubNames => ".debug_pubnames",
            Self::PubTypes => ".debug_pubtypes",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open byte-address range `[begin, end)` of a section.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionRange {
    /// Address of the first byte.
    pub begin: VirtAddr,
    /// Address one past the last byte.
    pub end: VirtAddr,
}

impl SectionRange {
    /// Describes the memory occupied by `data`.
    pub fn of(data: &[u8]) -> Self {
        let begin = data.as_ptr() as VirtAddr;
        Self {
            begin,
            end: begin + data.len() as VirtAddr,
        }
    }

    /// Number of bytes in the range.
    ///
    /// Ranges are not validated: an inverted range reads as empty.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin) as usize
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reinterprets the range as a byte slice.
    ///
    /// # Safety
    ///
    /// Unless empty, `[begin, end)` must be mapped, readable and must not be
    /// mutated for `'a`.
    unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.is_empty() {
            return &[];
        }
        slice::from_raw_parts(self.begin as usize as *const u8, self.len())
    }
}

/// Boot hand-off record as written by the boot stage.
///
/// The layout is shared with the boot stage, hence `#[repr(C)]`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RawBootRecord {
    pub debug_aranges: SectionRange,
    pub debug_abbrev: SectionRange,
    pub debug_info: SectionRange,
    pub debug_line: SectionRange,
    pub debug_str: SectionRange,
    pub debug_pubnames: SectionRange,
    pub debug_pubtypes: SectionRange,
    /// Linked image's `Elf64_Sym` records.
    pub symbol_table: SectionRange,
    /// String table referenced by `symbol_table`. An `end` of zero means the
    /// size is unknown and names are bounded by their terminator only.
    pub string_table: SectionRange,
}

/// Section data of a loaded image, as borrowed slices.
///
/// Used to build a [`BootRecord`] without raw addresses, e.g. from an ELF
/// file mapped on the host or from synthetic test data.
#[derive(Debug, Default, Clone, Copy)]
#[allow(missing_docs)]
pub struct ImageSections<'img> {
    pub debug_aranges: &'img [u8],
    pub debug_abbrev: &'img [u8],
    pub debug_info: &'img [u8],
    pub debug_line: &'img [u8],
    pub debug_str: &'img [u8],
    pub debug_pubnames: &'img [u8],
    pub debug_pubtypes: &'img [u8],
    pub symbol_table: &'img [u8],
    pub string_table: &'img [u8],
}

impl<'img> ImageSections<'img> {
    /// Returns a mutable reference to the slot for the given debug section.
    pub fn slot_mut(&mut self, kind: SectionKind) -> &mut &'img [u8] {
        match kind {
            SectionKind::Aranges => &mut self.debug_aranges,
            SectionKind::Abbrev => &mut self.debug_abbrev,
            SectionKind::Info => &mut self.debug_info,
            SectionKind::Line => &mut self.debug_line,
            SectionKind::Str => &mut self.debug_str,
            SectionKind::PubNames => &mut self.debug_pubnames,
            SectionKind::PubTypes => &mut self.debug_pubtypes,
        }
    }
}

/// Boot hand-off record bound to the lifetime of the memory it describes.
#[derive(Debug, Clone, Copy)]
pub struct BootRecord<'img> {
    raw: RawBootRecord,
    _image: PhantomData<&'img [u8]>,
}

impl<'img> BootRecord<'img> {
    /// Wraps a record written by the boot stage.
    ///
    /// # Safety
    ///
    /// Every non-empty range in `raw` must be mapped, readable and immutable
    /// for `'img`. If the string table's end is zero, every symbol name must
    /// be NUL-terminated within mapped memory.
    pub unsafe fn from_raw(raw: RawBootRecord) -> Self {
        Self {
            raw,
            _image: PhantomData,
        }
    }

    /// Builds a record describing the given slices.
    pub fn from_image(image: &ImageSections<'img>) -> Self {
        Self {
            raw: RawBootRecord {
                debug_aranges: SectionRange::of(image.debug_aranges),
                debug_abbrev: SectionRange::of(image.debug_abbrev),
                debug_info: SectionRange::of(image.debug_info),
                debug_line: SectionRange::of(image.debug_line),
                debug_str: SectionRange::of(image.debug_str),
                debug_pubnames: SectionRange::of(image.debug_pubnames),
                debug_pubtypes: SectionRange::of(image.debug_pubtypes),
                symbol_table: SectionRange::of(image.symbol_table),
                string_table: SectionRange::of(image.string_table),
            },
            _image: PhantomData,
        }
    }

    /// The underlying raw record.
    pub fn raw(&self) -> &RawBootRecord {
        &self.raw
    }

    /// Symbol table bytes.
    pub fn symbol_table(&self) -> &'img [u8] {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { self.raw.symbol_table.as_slice() }
    }

    /// String table bytes, or `None` if the boot stage didn't record its end.
    pub fn string_table(&self) -> Option<&'img [u8]> {
        let range = self.raw.string_table;
        if range.end == 0 && range.begin != 0 {
            return None;
        }
        // SAFETY: guaranteed by the constructor contract.
        Some(unsafe { range.as_slice() })
    }

    /// Start address of the string table.
    pub fn string_table_start(&self) -> VirtAddr {
        self.raw.string_table.begin
    }
}

/// Descriptor set of the 7 debug sections.
///
/// Created fresh for every resolution call and never cached: it is a plain
/// copy of the ranges in the boot record.
#[derive(Debug, Clone, Copy)]
pub struct DebugSectionSet<'img> {
    ranges: [SectionRange; 7],
    _image: PhantomData<&'img [u8]>,
}

impl<'img> DebugSectionSet<'img> {
    /// Copies the debug section ranges out of the boot record.
    ///
    /// Performs no validation and always succeeds.
    pub fn locate(record: &BootRecord<'img>) -> Self {
        let raw = &record.raw;
        Self {
            ranges: [
                raw.debug_aranges,
                raw.debug_abbrev,
                raw.debug_info,
                raw.debug_line,
                raw.debug_str,
                raw.debug_pubnames,
                raw.debug_pubtypes,
            ],
            _image: PhantomData,
        }
    }

    /// Address range of the given section.
    pub fn range(&self, kind: SectionKind) -> SectionRange {
        self.ranges[kind as usize]
    }

    /// Contents of the given section.
    pub fn section(&self, kind: SectionKind) -> &'img [u8] {
        // SAFETY: ranges originate from a `BootRecord<'img>`, whose
        // constructors guarantee validity for `'img`.
        unsafe { self.range(kind).as_slice() }
    }
}
