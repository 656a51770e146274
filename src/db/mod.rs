//! Provides the hierarchical section writer which produces RoadMap database files.
//!
//! A database file is a tree of named sections. Each section starts with a fixed size header
//! which is immediately followed by its payload. The payload of a section is either raw table
//! data or the nested sections of its children:
//!
//! ```text
//! [root header "roadmap"]
//!     [section header][payload, 4 byte aligned]
//!     [section header]
//!         [child header][payload]
//!         ...
//! ```
//!
//! Each header carries the **name** of the section (at most [MAX_NAME_LEN] bytes), its **size**
//! (the payload plus all descendants), an element **count** (informational only) and the file
//! offsets of its **first** child and its **next** sibling (0 if absent).
//!
//! The database is assembled in a growable in-memory buffer and all sections are addressed via
//! [SectionId] handles. Therefore payloads never move underneath a caller and no fixup pass is
//! required when the buffer grows. The sibling links are computed once by [Database::close]
//! which then writes the image in one go.
//!
//! Sections have to be written strictly in order: data can only be appended to the section
//! which was created last, and new sections can only be attached to a section whose payload
//! is still the tail of the file.
//!
//! # Example
//!
//! ```
//! # use buildmap::db::{Database, ByteOrder};
//! # use buildmap::db::reader::Image;
//! let mut db = Database::in_memory(ByteOrder::Little);
//! let table = db.add_section(None, "point").unwrap();
//! let _ = db.add_records(table, "data", &[1i32, 2, 3]).unwrap();
//!
//! let image = db.finish().unwrap();
//! let image = Image::parse(&image, ByteOrder::Little).unwrap();
//! assert_eq!(image.find("point/data").unwrap().i32_at(2), Some(3));
//! ```
use std::path::{Path, PathBuf};

use anyhow::Context;

mod payload;
pub mod reader;

pub use payload::{Area, ByteOrder, PayloadWriter, Record};

/// Contains the name of the root section of every database.
pub const ROOT_NAME: &str = "roadmap";

/// Contains the maximal length of a section name in bytes.
pub const MAX_NAME_LEN: usize = 19;

const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;

/// Contains the size of a section header: name, size, count, first and next.
pub const HEADER_SIZE: usize = NAME_FIELD_LEN + 4 * 4;

/// Rounds the given offset up to the next multiple of four.
pub fn align(offset: usize) -> usize {
    (offset + 3) & !3
}

/// Represents a handle to a section of a [Database].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectionId(usize);

struct Section {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    head: usize,
    data: usize,
    size: usize,
    count: i32,
}

/// Builds a single database file.
pub struct Database {
    path: Option<PathBuf>,
    order: ByteOrder,
    sections: Vec<Section>,
    buffer: Vec<u8>,
    current: Option<usize>,
}

impl Database {
    /// Creates (or truncates) the given database file and starts a new section tree.
    ///
    /// The file itself is only written by [Database::close].
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created.
    pub fn open(path: impl AsRef<Path>, order: ByteOrder) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let _ = std::fs::File::create(&path)
            .with_context(|| format!("Cannot create database {}", path.display()))?;

        let mut db = Database::in_memory(order);
        db.path = Some(path);
        Ok(db)
    }

    /// Creates a database which is only kept in memory and retrieved via [Database::finish].
    pub fn in_memory(order: ByteOrder) -> Self {
        Database {
            path: None,
            order,
            sections: vec![Section {
                name: ROOT_NAME.to_owned(),
                parent: None,
                children: Vec::new(),
                head: 0,
                data: HEADER_SIZE,
                size: 0,
                count: 0,
            }],
            buffer: vec![0; HEADER_SIZE],
            current: None,
        }
    }

    /// Returns the byte order used for all persisted fields.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Returns the total size of the database in bytes.
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.sections[0].size
    }

    /// Determines if no section has been added yet.
    pub fn is_empty(&self) -> bool {
        self.sections[0].children.is_empty()
    }

    fn end_of(&self, index: usize) -> usize {
        let section = &self.sections[index];
        align(section.data + section.size)
    }

    fn propagate(&mut self, parent: Option<usize>, delta: usize) {
        let mut cursor = parent;
        while let Some(index) = cursor {
            let section = &mut self.sections[index];
            section.count = 1;
            section.size += delta;
            cursor = section.parent;
        }
    }

    /// Adds a new section as last child of the given parent (or of the root if `None` is given).
    ///
    /// The new section becomes the current section, which is the only one which accepts data
    /// via [Database::add_data].
    ///
    /// # Errors
    ///
    /// Fails if the name is longer than [MAX_NAME_LEN] or if the parent isn't the tail of the
    /// file anymore (a section was added to another branch in the meantime).
    pub fn add_section(
        &mut self,
        parent: Option<SectionId>,
        name: &str,
    ) -> anyhow::Result<SectionId> {
        if name.len() > MAX_NAME_LEN || name.as_bytes().contains(&0) {
            return Err(anyhow::anyhow!("invalid section name {} (too long)", name));
        }

        let parent = parent.map(|id| id.0).unwrap_or(0);
        if parent >= self.sections.len() {
            return Err(anyhow::anyhow!("unknown parent section {}", parent));
        }
        if self.end_of(parent) != align(self.len()) {
            return Err(anyhow::anyhow!(
                "invalid database write sequence: section {} is not the tail of the file",
                self.sections[parent].name
            ));
        }

        let offset = self.sections[parent].data + self.sections[parent].size;
        let head = align(offset);
        let data = head + HEADER_SIZE;
        self.buffer.resize(data, 0);

        let index = self.sections.len();
        self.sections.push(Section {
            name: name.to_owned(),
            parent: Some(parent),
            children: Vec::new(),
            head,
            data,
            size: 0,
            count: 0,
        });
        self.sections[parent].children.push(index);
        self.propagate(Some(parent), (head - offset) + HEADER_SIZE);
        self.current = Some(index);

        Ok(SectionId(index))
    }

    /// Reserves payload space in the current section.
    ///
    /// Reserves `count * size` bytes or just `size` bytes if `count` is zero (which is used for
    /// singleton records). Returns the total size of the database after the allocation.
    ///
    /// # Errors
    ///
    /// Fails with "invalid database write sequence" if the given section isn't the one most
    /// recently returned by [Database::add_section].
    pub fn add_data(
        &mut self,
        section: SectionId,
        count: usize,
        size: usize,
    ) -> anyhow::Result<usize> {
        if self.current != Some(section.0) {
            return Err(anyhow::anyhow!(
                "invalid database write sequence (section {})",
                self.sections
                    .get(section.0)
                    .map(|section| section.name.as_str())
                    .unwrap_or("?")
            ));
        }

        let total = if count > 0 { count * size } else { size };
        let count = i32::try_from(count).context("Too many records for a single section")?;

        let index = section.0;
        let end = self.end_of(index);
        self.sections[index].size += total;
        let new_end = self.end_of(index);
        self.buffer.resize(new_end, 0);
        let parent = self.sections[index].parent;
        self.propagate(parent, new_end - end);
        self.sections[index].count = count;

        Ok(self.len())
    }

    /// Adds a new section and directly reserves its payload.
    pub fn add_child(
        &mut self,
        parent: SectionId,
        name: &str,
        count: usize,
        size: usize,
    ) -> anyhow::Result<SectionId> {
        let section = self
            .add_section(Some(parent), name)
            .with_context(|| format!("Cannot add new section {}", name))?;
        let _ = self
            .add_data(section, count, size)
            .with_context(|| format!("Can't add data into section {}", name))?;

        Ok(section)
    }

    /// Returns the payload of the given section.
    ///
    /// The returned slice covers the payload itself and, for inner sections, all nested
    /// sections.
    pub fn get_data(&mut self, section: SectionId) -> Option<&mut [u8]> {
        let (data, size) = self
            .sections
            .get(section.0)
            .map(|section| (section.data, section.size))?;
        self.buffer.get_mut(data..data + size)
    }

    /// Returns a writer for the payload of the given section.
    pub fn writer(&mut self, section: SectionId) -> anyhow::Result<PayloadWriter<'_>> {
        let order = self.order;
        let data = self
            .get_data(section)
            .ok_or_else(|| anyhow::anyhow!("unknown section {:?}", section))?;

        Ok(PayloadWriter::new(data, order))
    }

    /// Adds a child section named `name` which contains the given records.
    ///
    /// # Errors
    ///
    /// Fails if the section cannot be created or if the records didn't fill the reserved space
    /// exactly.
    pub fn add_records<R: Record>(
        &mut self,
        parent: SectionId,
        name: &str,
        records: &[R],
    ) -> anyhow::Result<SectionId> {
        let section = self.add_child(parent, name, records.len(), R::SIZE)?;
        let mut writer = self.writer(section)?;
        for record in records {
            record.write(&mut writer);
        }

        if (!records.is_empty() && writer.written() != records.len() * R::SIZE)
            || writer.overflow() > 0
        {
            return Err(anyhow::anyhow!(
                "inconsistent record size in section {}: wrote {} bytes for {} records",
                name,
                writer.written(),
                records.len()
            ));
        }

        Ok(section)
    }

    /// Returns the section name for the given handle.
    pub fn name_of(&self, section: SectionId) -> Option<&str> {
        self.sections
            .get(section.0)
            .map(|section| section.name.as_str())
    }

    fn write_headers(&mut self) {
        for index in 0..self.sections.len() {
            let first = self.sections[index]
                .children
                .first()
                .map(|child| self.sections[*child].head)
                .unwrap_or(0);
            let next = self.sections[index]
                .parent
                .and_then(|parent| {
                    let siblings = &self.sections[parent].children;
                    siblings
                        .iter()
                        .position(|sibling| *sibling == index)
                        .and_then(|position| siblings.get(position + 1))
                })
                .map(|sibling| self.sections[*sibling].head)
                .unwrap_or(0);

            let section = &self.sections[index];
            let mut name = [0u8; NAME_FIELD_LEN];
            name[..section.name.len()].copy_from_slice(section.name.as_bytes());
            let (head, size, count) = (section.head, section.size, section.count);

            let mut writer =
                PayloadWriter::new(&mut self.buffer[head..head + HEADER_SIZE], self.order);
            writer.put_bytes(&name);
            writer.put_i32(size as i32);
            writer.put_i32(count);
            writer.put_i32(first as i32);
            writer.put_i32(next as i32);
        }
    }

    /// Completes the section tree and returns the resulting image.
    pub fn finish(mut self) -> anyhow::Result<Vec<u8>> {
        if self.len() > i32::MAX as usize {
            return Err(anyhow::anyhow!("database too large ({} bytes)", self.len()));
        }

        self.write_headers();
        let size = self.len();
        self.buffer.truncate(size);

        Ok(self.buffer)
    }

    /// Completes the section tree, writes the database file and returns its size in bytes.
    ///
    /// The file is written with its exact size, so that no trailing garbage remains from an
    /// earlier, larger database.
    pub fn close(self) -> anyhow::Result<usize> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Cannot close an in-memory database"))?;
        let image = self.finish()?;
        std::fs::write(&path, &image)
            .with_context(|| format!("Cannot write database {}", path.display()))?;

        log::info!(
            "Wrote {} ({})...",
            path.display(),
            crate::fmt::format_size(image.len())
        );

        Ok(image.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{align, ByteOrder, Database, HEADER_SIZE};

    #[test]
    fn sections_are_nested_and_aligned() {
        let mut db = Database::in_memory(ByteOrder::Little);
        let line = db.add_section(None, "line").unwrap();
        let data = db.add_child(line, "data", 3, 1).unwrap();
        assert_eq!(db.name_of(data), Some("data"));
        let square = db.add_child(line, "bysquare", 2, 4).unwrap();
        db.get_data(square).unwrap().copy_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);

        let size = db.len();
        let image = db.finish().unwrap();
        assert_eq!(image.len(), size);
        assert_eq!(
            image.len(),
            HEADER_SIZE + (HEADER_SIZE + (HEADER_SIZE + align(3)) + (HEADER_SIZE + 8))
        );

        let image = Image::parse(&image, ByteOrder::Little).unwrap();
        assert_eq!(image.root().name(), "roadmap");
        let line = image.root().child("line").unwrap();
        assert_eq!(line.size(), 2 * HEADER_SIZE + 4 + 8);
        let names: Vec<String> = line.children().map(|c| c.name().to_owned()).collect();
        assert_eq!(names, vec!["data", "bysquare"]);
        assert_eq!(image.find("line/data").unwrap().size(), 3);
        assert_eq!(image.find("line/data").unwrap().count(), 3);
        assert_eq!(image.find("line/bysquare").unwrap().i32_at(1), Some(2));
        assert_eq!(image.find("line/bysquare").unwrap().offset() % 4, 0);
    }

    #[test]
    fn repeated_allocations_keep_the_image_consistent() {
        let mut db = Database::in_memory(ByteOrder::Little);
        let blob = db.add_section(None, "blob").unwrap();
        let _ = db.add_data(blob, 0, 3).unwrap();
        let expected = db.add_data(blob, 0, 3).unwrap();
        assert_eq!(db.get_data(blob).unwrap().len(), 6);

        let image = db.finish().unwrap();
        assert_eq!(image.len(), expected);
        assert_eq!(image.len(), HEADER_SIZE + HEADER_SIZE + align(6));

        let image = Image::parse(&image, ByteOrder::Little).unwrap();
        assert_eq!(image.find("blob").unwrap().size(), 6);
    }

    #[test]
    fn data_can_only_be_added_to_the_current_section() {
        let mut db = Database::in_memory(ByteOrder::Little);
        let first = db.add_section(None, "first").unwrap();
        let _ = db.add_section(None, "second").unwrap();

        let error = db.add_data(first, 1, 4).unwrap_err();
        assert_eq!(
            error.to_string().contains("invalid database write sequence"),
            true
        );
    }

    #[test]
    fn sections_cannot_be_added_to_a_closed_branch() {
        let mut db = Database::in_memory(ByteOrder::Little);
        let first = db.add_section(None, "first").unwrap();
        let _ = db.add_child(first, "data", 1, 4).unwrap();
        let _ = db.add_section(None, "second").unwrap();

        assert_eq!(db.add_section(Some(first), "late").is_err(), true);
    }

    #[test]
    fn long_names_are_rejected() {
        let mut db = Database::in_memory(ByteOrder::Little);
        assert_eq!(db.add_section(None, "a-much-too-long-section").is_err(), true);
        assert_eq!(db.add_section(None, "exactly-nineteen-ch").is_ok(), true);
    }

    #[test]
    fn singleton_records_reserve_one_element() {
        let mut db = Database::in_memory(ByteOrder::Little);
        let table = db.add_section(None, "zip").unwrap();
        let empty = db.add_records::<i32>(table, "data", &[]).unwrap();
        assert_eq!(db.get_data(empty).unwrap().len(), 4);
    }

    #[test]
    fn close_writes_the_exact_image() {
        let path = std::env::temp_dir().join("buildmap_db_close_test.rdm");
        let mut db = Database::open(&path, ByteOrder::Big).unwrap();
        let table = db.add_section(None, "metadata").unwrap();
        let _ = db.add_records(table, "values", &[7u16]).unwrap();
        let size = db.close().unwrap();

        let image = std::fs::read(&path).unwrap();
        assert_eq!(image.len(), size);
        let image = Image::parse(&image, ByteOrder::Big).unwrap();
        assert_eq!(image.find("metadata/values").unwrap().u16_at(0), Some(7));
        let _ = std::fs::remove_file(&path);
    }
}
