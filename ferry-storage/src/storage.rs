//! Decoded data storage and its stream codec.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::format::{
    ContentsLocation, FileHeader, PropertyEntry, SectionEntry, StringEntry, SymbolEntry,
    TableLocation, HEADER_SIZE, PROPERTY_ENTRY_SIZE, SECTION_ENTRY_SIZE, STRING_ENTRY_SIZE,
    SYMBOL_ENTRY_SIZE,
};

/// A named blob of section bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    pub name_idx: u32,
    pub contents: Vec<u8>,
}

/// A named position inside a section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Symbol {
    pub name_idx: u32,
    pub section_idx: u32,
    pub value: u32,
}

/// A named value blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Property {
    pub name_idx: u32,
    pub value: Vec<u8>,
}

/// Decoded container: four tables with their contents attached.
///
/// Table counts are implicit in the vector lengths, so they cannot drift
/// out of sync with the contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataStorage {
    pub strings: Vec<String>,
    pub sections: Vec<Section>,
    pub symbols: Vec<Symbol>,
    pub properties: Vec<Property>,
}

/// Optional format-tag filter applied before the rest of the header is
/// trusted. A zero mask accepts any tag; the tag itself stays caller-opaque.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormatFilter {
    pub mask: u32,
    pub magic: u32,
}

impl FormatFilter {
    pub const fn any() -> Self {
        Self { mask: 0, magic: 0 }
    }

    pub const fn exact(magic: u32) -> Self {
        Self {
            mask: u32::MAX,
            magic,
        }
    }

    fn accepts(&self, format: u32) -> bool {
        format & self.mask == self.magic
    }
}

impl DataStorage {
    /// Parse a container from a stream.
    ///
    /// Validates the header and every table entry before copying contents
    /// into fresh allocations; on any failure nothing partial escapes. On
    /// success the stream is left positioned just past the payload and the
    /// caller receives the container's format tag alongside the storage.
    pub fn read_from(
        reader: &mut (impl Read + Seek),
        filter: FormatFilter,
    ) -> Result<(u32, Self)> {
        let header = FileHeader::read_from(reader)?;
        let payload_start = reader.stream_position()?;

        if !filter.accepts(header.format) {
            return Err(StorageError::FormatMismatch {
                format: header.format,
                magic: filter.magic,
            });
        }

        if !header.check_validity() {
            return Err(StorageError::InvalidHeader(
                "regions out of range, overlapping, or inconsistent with entry counts",
            ));
        }

        fn seek_to(reader: &mut impl Seek, payload_start: u64, offset: u32) -> Result<()> {
            reader.seek(SeekFrom::Start(payload_start + u64::from(offset)))?;
            Ok(())
        }

        // All four tables are read before any entry is validated, so the
        // checks below see the complete cross-reference picture.
        seek_to(reader, payload_start, header.string_table.entries_offset)?;
        let string_table = read_entries(reader, header.string_table, StringEntry::read_from)?;

        seek_to(reader, payload_start, header.section_table.entries_offset)?;
        let section_table = read_entries(reader, header.section_table, SectionEntry::read_from)?;

        seek_to(reader, payload_start, header.symbol_table.entries_offset)?;
        let symbol_table = read_entries(reader, header.symbol_table, SymbolEntry::read_from)?;

        seek_to(reader, payload_start, header.property_table.entries_offset)?;
        let property_table =
            read_entries(reader, header.property_table, PropertyEntry::read_from)?;

        for (index, entry) in string_table.iter().enumerate() {
            if !range_fits(entry.offset, entry.length, header.strings.contents_size) {
                return Err(StorageError::InvalidEntry {
                    table: "string",
                    index: index as u32,
                });
            }
        }

        for (index, entry) in section_table.iter().enumerate() {
            if entry.name_str_idx >= header.string_table.num_entries
                || !range_fits(entry.offset, entry.size, header.sections.contents_size)
            {
                return Err(StorageError::InvalidEntry {
                    table: "section",
                    index: index as u32,
                });
            }
        }

        for (index, entry) in symbol_table.iter().enumerate() {
            if entry.name_str_idx >= header.string_table.num_entries
                || entry.section_idx >= header.section_table.num_entries
            {
                return Err(StorageError::InvalidEntry {
                    table: "symbol",
                    index: index as u32,
                });
            }
        }

        for (index, entry) in property_table.iter().enumerate() {
            if entry.name_str_idx >= header.string_table.num_entries
                || !range_fits(entry.offset, entry.size, header.properties.contents_size)
            {
                return Err(StorageError::InvalidEntry {
                    table: "property",
                    index: index as u32,
                });
            }
        }

        let mut storage = DataStorage::default();

        storage.strings.reserve(string_table.len());
        for (index, entry) in string_table.iter().enumerate() {
            let mut bytes = vec![0u8; entry.length as usize];
            if entry.length > 0 {
                seek_to(reader, payload_start, header.strings.contents_offset + entry.offset)?;
                reader.read_exact(&mut bytes)?;
            }
            let text = String::from_utf8(bytes).map_err(|_| StorageError::InvalidEntry {
                table: "string",
                index: index as u32,
            })?;
            storage.strings.push(text);
        }

        storage.sections.reserve(section_table.len());
        for entry in &section_table {
            let mut contents = vec![0u8; entry.size as usize];
            if entry.size > 0 {
                seek_to(reader, payload_start, header.sections.contents_offset + entry.offset)?;
                reader.read_exact(&mut contents)?;
            }
            storage.sections.push(Section {
                name_idx: entry.name_str_idx,
                contents,
            });
        }

        storage.symbols.reserve(symbol_table.len());
        for entry in &symbol_table {
            let section_size = section_table[entry.section_idx as usize].size;
            let mut value = entry.value;

            // an out-of-section symbol becomes "first past the end"
            if value > section_size {
                warn!(
                    symbol = entry.value,
                    section_size, "clamping out-of-section symbol value"
                );
                value = section_size;
            }

            storage.symbols.push(Symbol {
                name_idx: entry.name_str_idx,
                section_idx: entry.section_idx,
                value,
            });
        }

        storage.properties.reserve(property_table.len());
        for entry in &property_table {
            let mut value = vec![0u8; entry.size as usize];
            if entry.size > 0 {
                seek_to(reader, payload_start, header.properties.contents_offset + entry.offset)?;
                reader.read_exact(&mut value)?;
            }
            storage.properties.push(Property {
                name_idx: entry.name_str_idx,
                value,
            });
        }

        reader.seek(SeekFrom::Start(payload_start + u64::from(header.full_size)))?;

        debug!(
            num_strings = storage.strings.len(),
            num_sections = storage.sections.len(),
            num_symbols = storage.symbols.len(),
            num_properties = storage.properties.len(),
            full_size = header.full_size,
            "parsed data storage container"
        );

        Ok((header.format, storage))
    }

    /// Write the container to a stream and return its payload size.
    ///
    /// The layout is canonical: header, then string, section, symbol and
    /// property table entries, then strings, sections and properties
    /// contents, in that order with no padding.
    pub fn write_to(&self, format: u32, writer: &mut impl Write) -> Result<u32> {
        let num_strings = self.strings.len() as u64;
        let num_sections = self.sections.len() as u64;
        let num_symbols = self.symbols.len() as u64;
        let num_properties = self.properties.len() as u64;

        let string_table_size = num_strings * u64::from(STRING_ENTRY_SIZE);
        let section_table_size = num_sections * u64::from(SECTION_ENTRY_SIZE);
        let symbol_table_size = num_symbols * u64::from(SYMBOL_ENTRY_SIZE);
        let property_table_size = num_properties * u64::from(PROPERTY_ENTRY_SIZE);
        let all_tables_size =
            string_table_size + section_table_size + symbol_table_size + property_table_size;

        let strings_contents_size: u64 = self.strings.iter().map(|s| s.len() as u64).sum();
        let sections_contents_size: u64 =
            self.sections.iter().map(|s| s.contents.len() as u64).sum();
        let properties_contents_size: u64 =
            self.properties.iter().map(|p| p.value.len() as u64).sum();
        let all_contents_size =
            strings_contents_size + sections_contents_size + properties_contents_size;

        let full_size = all_tables_size + all_contents_size;
        if full_size > u64::from(u32::MAX) {
            return Err(StorageError::TooLarge { size: full_size });
        }

        self.check_name_indices()?;

        let header = FileHeader {
            format,
            full_size: full_size as u32,
            string_table: TableLocation {
                num_entries: num_strings as u32,
                entries_offset: 0,
            },
            section_table: TableLocation {
                num_entries: num_sections as u32,
                entries_offset: string_table_size as u32,
            },
            symbol_table: TableLocation {
                num_entries: num_symbols as u32,
                entries_offset: (string_table_size + section_table_size) as u32,
            },
            property_table: TableLocation {
                num_entries: num_properties as u32,
                entries_offset: (string_table_size + section_table_size + symbol_table_size)
                    as u32,
            },
            strings: ContentsLocation {
                contents_size: strings_contents_size as u32,
                contents_offset: all_tables_size as u32,
            },
            sections: ContentsLocation {
                contents_size: sections_contents_size as u32,
                contents_offset: (all_tables_size + strings_contents_size) as u32,
            },
            properties: ContentsLocation {
                contents_size: properties_contents_size as u32,
                contents_offset: (all_tables_size + strings_contents_size
                    + sections_contents_size) as u32,
            },
        };

        header.write_to(writer)?;

        let mut offset = 0u32;
        for string in &self.strings {
            StringEntry {
                length: string.len() as u32,
                offset,
            }
            .write_to(writer)?;
            offset += string.len() as u32;
        }

        let mut offset = 0u32;
        for section in &self.sections {
            SectionEntry {
                name_str_idx: section.name_idx,
                size: section.contents.len() as u32,
                offset,
            }
            .write_to(writer)?;
            offset += section.contents.len() as u32;
        }

        for symbol in &self.symbols {
            SymbolEntry {
                name_str_idx: symbol.name_idx,
                section_idx: symbol.section_idx,
                value: symbol.value,
            }
            .write_to(writer)?;
        }

        let mut offset = 0u32;
        for property in &self.properties {
            PropertyEntry {
                name_str_idx: property.name_idx,
                size: property.value.len() as u32,
                offset,
            }
            .write_to(writer)?;
            offset += property.value.len() as u32;
        }

        for string in &self.strings {
            writer.write_all(string.as_bytes())?;
        }
        for section in &self.sections {
            writer.write_all(&section.contents)?;
        }
        for property in &self.properties {
            writer.write_all(&property.value)?;
        }

        debug!(full_size, format, "wrote data storage container");

        Ok(full_size as u32)
    }

    /// Total stream footprint of this container: header plus payload.
    pub fn encoded_size(&self) -> u64 {
        let tables = self.strings.len() as u64 * u64::from(STRING_ENTRY_SIZE)
            + self.sections.len() as u64 * u64::from(SECTION_ENTRY_SIZE)
            + self.symbols.len() as u64 * u64::from(SYMBOL_ENTRY_SIZE)
            + self.properties.len() as u64 * u64::from(PROPERTY_ENTRY_SIZE);
        let contents: u64 = self.strings.iter().map(|s| s.len() as u64).sum::<u64>()
            + self.sections.iter().map(|s| s.contents.len() as u64).sum::<u64>()
            + self.properties.iter().map(|p| p.value.len() as u64).sum::<u64>();
        u64::from(HEADER_SIZE) + tables + contents
    }

    /// Name of the string a table entry points at, when in range.
    pub fn string(&self, name_idx: u32) -> Option<&str> {
        self.strings.get(name_idx as usize).map(String::as_str)
    }

    /// First property with the given name.
    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| self.string(p.name_idx) == Some(name))
    }

    /// First symbol with the given name.
    pub fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|s| self.string(s.name_idx) == Some(name))
    }

    fn check_name_indices(&self) -> Result<()> {
        let num_strings = self.strings.len() as u32;
        let num_sections = self.sections.len() as u32;

        for (index, section) in self.sections.iter().enumerate() {
            if section.name_idx >= num_strings {
                return Err(StorageError::InvalidEntry {
                    table: "section",
                    index: index as u32,
                });
            }
        }

        for (index, symbol) in self.symbols.iter().enumerate() {
            if symbol.name_idx >= num_strings || symbol.section_idx >= num_sections {
                return Err(StorageError::InvalidEntry {
                    table: "symbol",
                    index: index as u32,
                });
            }
        }

        for (index, property) in self.properties.iter().enumerate() {
            if property.name_idx >= num_strings {
                return Err(StorageError::InvalidEntry {
                    table: "property",
                    index: index as u32,
                });
            }
        }

        Ok(())
    }
}

fn range_fits(offset: u32, size: u32, contents_size: u32) -> bool {
    offset <= contents_size && size <= contents_size - offset
}

fn read_entries<R: Read, T>(
    reader: &mut R,
    location: TableLocation,
    read_one: impl Fn(&mut R) -> std::io::Result<T>,
) -> Result<Vec<T>> {
    let mut entries = Vec::with_capacity(location.num_entries as usize);
    for _ in 0..location.num_entries {
        entries.push(read_one(&mut *reader)?);
    }
    Ok(entries)
}
