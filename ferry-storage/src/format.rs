//! On-disk container layout: header, table entries, validation.
//!
//! Every field is a native-endian u32 regardless of the host's default
//! integer width. Offsets are relative to the first byte after the header;
//! `full_size` counts the payload only.

use std::io::{Read, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};

/// Header size in bytes: format, full_size, four table locators, three
/// contents locators, two u32 fields each.
pub const HEADER_SIZE: u32 = 16 * 4;

pub const STRING_ENTRY_SIZE: u32 = 8;
pub const SECTION_ENTRY_SIZE: u32 = 12;
pub const SYMBOL_ENTRY_SIZE: u32 = 12;
pub const PROPERTY_ENTRY_SIZE: u32 = 12;

/// Location of one table's entry records within the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableLocation {
    pub num_entries: u32,
    pub entries_offset: u32,
}

/// Location of one contents blob within the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentsLocation {
    pub contents_size: u32,
    pub contents_offset: u32,
}

/// Container file header.
///
/// The `format` field is an opaque caller-chosen tag; this layer stores and
/// returns it without interpretation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub format: u32,
    pub full_size: u32,

    pub string_table: TableLocation,
    pub section_table: TableLocation,
    pub symbol_table: TableLocation,
    pub property_table: TableLocation,

    pub strings: ContentsLocation,
    pub sections: ContentsLocation,
    pub properties: ContentsLocation,
}

impl TableLocation {
    fn read_from(reader: &mut impl Read) -> std::io::Result<Self> {
        Ok(Self {
            num_entries: reader.read_u32::<NativeEndian>()?,
            entries_offset: reader.read_u32::<NativeEndian>()?,
        })
    }

    fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_u32::<NativeEndian>(self.num_entries)?;
        writer.write_u32::<NativeEndian>(self.entries_offset)
    }
}

impl ContentsLocation {
    fn read_from(reader: &mut impl Read) -> std::io::Result<Self> {
        Ok(Self {
            contents_size: reader.read_u32::<NativeEndian>()?,
            contents_offset: reader.read_u32::<NativeEndian>()?,
        })
    }

    fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_u32::<NativeEndian>(self.contents_size)?;
        writer.write_u32::<NativeEndian>(self.contents_offset)
    }
}

impl FileHeader {
    pub fn read_from(reader: &mut impl Read) -> std::io::Result<Self> {
        Ok(Self {
            format: reader.read_u32::<NativeEndian>()?,
            full_size: reader.read_u32::<NativeEndian>()?,
            string_table: TableLocation::read_from(reader)?,
            section_table: TableLocation::read_from(reader)?,
            symbol_table: TableLocation::read_from(reader)?,
            property_table: TableLocation::read_from(reader)?,
            strings: ContentsLocation::read_from(reader)?,
            sections: ContentsLocation::read_from(reader)?,
            properties: ContentsLocation::read_from(reader)?,
        })
    }

    pub fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_u32::<NativeEndian>(self.format)?;
        writer.write_u32::<NativeEndian>(self.full_size)?;
        self.string_table.write_to(writer)?;
        self.section_table.write_to(writer)?;
        self.symbol_table.write_to(writer)?;
        self.property_table.write_to(writer)?;
        self.strings.write_to(writer)?;
        self.sections.write_to(writer)?;
        self.properties.write_to(writer)
    }

    /// Check that the header describes a consistent payload.
    ///
    /// Every entries region and contents region must lie within
    /// `[0, full_size)`, non-empty regions must not overlap pairwise, and a
    /// table with contents (strings, sections, properties) must have a
    /// non-empty contents blob exactly when it has entries. An all-zero
    /// header is the valid empty container.
    ///
    /// This must hold before any offset derived from the header is trusted:
    /// headers arrive from untrusted or corrupted files.
    pub fn check_validity(&self) -> bool {
        let full_size = u64::from(self.full_size);

        let tables = [
            (self.string_table, STRING_ENTRY_SIZE),
            (self.section_table, SECTION_ENTRY_SIZE),
            (self.symbol_table, SYMBOL_ENTRY_SIZE),
            (self.property_table, PROPERTY_ENTRY_SIZE),
        ];
        let contents = [self.strings, self.sections, self.properties];

        let mut regions = [(0u64, 0u64); 7];

        for (slot, (table, entry_size)) in regions.iter_mut().zip(tables) {
            *slot = (
                u64::from(table.entries_offset),
                u64::from(table.num_entries) * u64::from(entry_size),
            );
        }
        for (slot, blob) in regions[4..].iter_mut().zip(contents) {
            *slot = (u64::from(blob.contents_offset), u64::from(blob.contents_size));
        }

        for &(offset, size) in &regions {
            if offset > full_size || size > full_size - offset {
                return false;
            }
        }

        // tables with contents must have both or neither
        for (table, blob) in [
            (self.string_table, self.strings),
            (self.section_table, self.sections),
            (self.property_table, self.properties),
        ] {
            if (table.num_entries > 0) != (blob.contents_size > 0) {
                return false;
            }
        }

        for i in 0..regions.len() {
            for j in i + 1..regions.len() {
                let (a_off, a_size) = regions[i];
                let (b_off, b_size) = regions[j];

                if a_size > 0 && b_size > 0 && a_off + a_size > b_off && b_off + b_size > a_off {
                    return false;
                }
            }
        }

        true
    }
}

/// String table entry: a range within the strings contents blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StringEntry {
    pub length: u32,
    pub offset: u32,
}

/// Section table entry: name plus a range within the sections contents blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionEntry {
    pub name_str_idx: u32,
    pub size: u32,
    pub offset: u32,
}

/// Symbol table entry: a named position inside a section. Symbols have no
/// contents of their own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name_str_idx: u32,
    pub section_idx: u32,
    pub value: u32,
}

/// Property table entry: name plus a range within the properties blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropertyEntry {
    pub name_str_idx: u32,
    pub size: u32,
    pub offset: u32,
}

macro_rules! entry_stream_codec {
    ($($entry:ty { $($field:ident),+ });* $(;)?) => {$(
        impl $entry {
            pub fn read_from(reader: &mut impl Read) -> std::io::Result<Self> {
                Ok(Self {
                    $($field: reader.read_u32::<NativeEndian>()?,)+
                })
            }

            pub fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
                $(writer.write_u32::<NativeEndian>(self.$field)?;)+
                Ok(())
            }
        }
    )*};
}

entry_stream_codec! {
    StringEntry { length, offset };
    SectionEntry { name_str_idx, size, offset };
    SymbolEntry { name_str_idx, section_idx, value };
    PropertyEntry { name_str_idx, size, offset };
}
