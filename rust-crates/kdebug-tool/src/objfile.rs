// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Memory-mapped kernel images.

use kdebug::boot::{ImageSections, SectionKind};
use kdebug::AnyError;
use memmap2::Mmap;
use object::{CompressionFormat, Object as _, ObjectSection as _};
use std::{fs, io, path};

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur while loading a kernel image.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Big-endian images are not supported")]
    BigEndian,

    #[error("Section {0} is compressed")]
    CompressedSection(&'static str),

    #[error("IO error")]
    IO(#[from] io::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`object`] errors into ours, with type erasure.
impl From<object::Error> for Error {
    fn from(e: object::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Kernel image mapped into memory.
pub struct File(Mmap);

impl File {
    /// Map the file at the given path into memory.
    pub fn load(path: &path::Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(Self(unsafe { Mmap::map(&file)? }))
    }

    /// Parse the header and create a reader.
    pub fn parse(&self) -> Result<Reader<'_>> {
        let obj = object::File::parse(&self.0[..])?;
        if !obj.is_little_endian() {
            return Err(Error::BigEndian);
        }
        Ok(Reader(obj))
    }
}

/// Provides read access to the sections of a kernel image.
pub struct Reader<'obj>(object::File<'obj>);

impl<'obj> Reader<'obj> {
    /// Collects the sections that the boot stage would hand to the kernel.
    ///
    /// Missing sections are left empty.
    pub fn image_sections(&self) -> Result<ImageSections<'obj>> {
        let mut image = ImageSections::default();
        for kind in SectionKind::ALL {
            *image.slot_mut(kind) = self.section_data(kind.name())?;
        }
        image.symbol_table = self.section_data(".symtab")?;
        image.string_table = self.section_data(".strtab")?;
        Ok(image)
    }

    fn section_data(&self, name: &'static str) -> Result<&'obj [u8]> {
        let Some(section) = self.0.section_by_name(name) else {
            return Ok(&[]);
        };

        if section.compressed_file_range()?.format != CompressionFormat::None {
            return Err(Error::CompressedSection(name));
        }

        Ok(section.data()?)
    }
}
