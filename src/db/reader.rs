//! Provides a minimal reader for database images.
//!
//! This is used to verify the produced files (in tests and by the `--dump` mode of the binary).
//! It walks the sibling linked section headers just like a map viewer would.
use crate::db::{ByteOrder, HEADER_SIZE, MAX_NAME_LEN};

/// Represents a parsed database image.
pub struct Image<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

/// Represents a single section within an [Image].
#[derive(Copy, Clone)]
pub struct SectionView<'a> {
    image: &'a Image<'a>,
    offset: usize,
}

impl<'a> Image<'a> {
    /// Parses the given image.
    ///
    /// # Errors
    ///
    /// Fails if the image is truncated or if any header points outside of the image.
    pub fn parse(data: &'a [u8], order: ByteOrder) -> anyhow::Result<Self> {
        let image = Image { data, order };
        if data.len() < HEADER_SIZE {
            return Err(anyhow::anyhow!("truncated database image"));
        }
        if image.root().size() + HEADER_SIZE != data.len() {
            return Err(anyhow::anyhow!(
                "database size mismatch: header says {}, image has {} bytes",
                image.root().size() + HEADER_SIZE,
                data.len()
            ));
        }
        image.verify(image.root())?;

        Ok(image)
    }

    fn verify(&self, section: SectionView) -> anyhow::Result<()> {
        if section.data_offset() + section.size() > self.data.len() {
            return Err(anyhow::anyhow!("section {} exceeds the image", section.name()));
        }
        for (field, offset) in [("first", section.field(2)), ("next", section.field(3))] {
            if offset < 0 || offset as usize + HEADER_SIZE > self.data.len() {
                return Err(anyhow::anyhow!(
                    "section {} has an invalid {} offset {}",
                    section.name(),
                    field,
                    offset
                ));
            }
        }
        for child in section.children() {
            self.verify(child)?;
        }

        Ok(())
    }

    /// Returns the root section.
    pub fn root(&'a self) -> SectionView<'a> {
        SectionView {
            image: self,
            offset: 0,
        }
    }

    /// Resolves a path like "line/bysquare1" starting at the root.
    pub fn find(&'a self, path: &str) -> Option<SectionView<'a>> {
        let mut section = self.root();
        for name in path.split('/') {
            section = section.child(name)?;
        }

        Some(section)
    }

    fn read_i32(&self, offset: usize) -> Option<i32> {
        let bytes: [u8; 4] = self.data.get(offset..offset + 4)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        })
    }

    fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes: [u8; 2] = self.data.get(offset..offset + 2)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }
}

impl<'a> SectionView<'a> {
    fn field(&self, index: usize) -> i32 {
        self.image
            .read_i32(self.offset + MAX_NAME_LEN + 1 + index * 4)
            .unwrap_or(0)
    }

    /// Returns the name of this section.
    pub fn name(&self) -> &'a str {
        let raw = &self.image.data[self.offset..self.offset + MAX_NAME_LEN + 1];
        let len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        std::str::from_utf8(&raw[..len]).unwrap_or("")
    }

    /// Returns the file offset of the header of this section.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the file offset of the payload of this section.
    pub fn data_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Returns the size of the payload (including all nested sections).
    pub fn size(&self) -> usize {
        self.field(0).max(0) as usize
    }

    /// Returns the element count stored in the header.
    pub fn count(&self) -> i32 {
        self.field(1)
    }

    /// Iterates over all direct children of this section.
    pub fn children(&self) -> impl Iterator<Item = SectionView<'a>> + 'a {
        let image = self.image;
        let mut next = self.field(2).max(0) as usize;
        std::iter::from_fn(move || {
            if next == 0 {
                return None;
            }
            let section = SectionView {
                image,
                offset: next,
            };
            next = section.field(3).max(0) as usize;
            Some(section)
        })
    }

    /// Returns the direct child with the given name.
    pub fn child(&self, name: &str) -> Option<SectionView<'a>> {
        self.children().find(|child| child.name() == name)
    }

    /// Returns the raw payload of this section.
    pub fn data(&self) -> &'a [u8] {
        let start = self.data_offset();
        &self.image.data[start..start + self.size()]
    }

    /// Reads the n-th 32 bit integer of the payload.
    pub fn i32_at(&self, index: usize) -> Option<i32> {
        if (index + 1) * 4 > self.size() {
            return None;
        }
        self.image.read_i32(self.data_offset() + index * 4)
    }

    /// Reads a 32 bit integer at the given byte offset within the payload.
    pub fn i32_at_byte(&self, position: usize) -> Option<i32> {
        if position + 4 > self.size() {
            return None;
        }
        self.image.read_i32(self.data_offset() + position)
    }

    /// Reads the n-th 16 bit integer of the payload.
    pub fn u16_at(&self, index: usize) -> Option<u16> {
        self.u16_at_byte(index * 2)
    }

    /// Reads a 16 bit integer at the given byte offset within the payload.
    pub fn u16_at_byte(&self, position: usize) -> Option<u16> {
        if position + 2 > self.size() {
            return None;
        }
        self.image.read_u16(self.data_offset() + position)
    }

    /// Renders this section and all of its descendants as an indented outline.
    pub fn outline(&self, depth: usize, output: &mut String) {
        output.push_str(&format!(
            "{:indent$}{} ({} bytes, count {})\n",
            "",
            self.name(),
            self.size(),
            self.count(),
            indent = depth * 2
        ));
        for child in self.children() {
            child.outline(depth + 1, output);
        }
    }
}
