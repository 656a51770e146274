//! Provides the byte order aware encoding of section payloads.
//!
//! Every table persists its data as flat arrays of fixed size records. Instead of casting raw
//! memory, each record type implements [Record] and writes its fields through a
//! [PayloadWriter]. The writer applies the configured [ByteOrder] to every single field, so
//! that a database can be produced for a platform with a different endianness in one place.

/// Determines the byte order used for all persisted integers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// Returns the byte order of the machine running the build.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::db::ByteOrder;
    /// assert_eq!(ByteOrder::host().swapped().swapped(), ByteOrder::host());
    /// ```
    pub fn host() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// Returns the opposite byte order.
    pub fn swapped(self) -> Self {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    /// Selects the byte order to use, given the "switch endian" flag of the build.
    pub fn for_build(switch_endian: bool) -> Self {
        if switch_endian {
            ByteOrder::host().swapped()
        } else {
            ByteOrder::host()
        }
    }
}

/// Writes fields into the payload of a single section.
///
/// The writer never panics on overflow. Instead it counts the bytes which did not fit, so that
/// the caller can verify the layout once all records have been written.
pub struct PayloadWriter<'a> {
    data: &'a mut [u8],
    position: usize,
    overflow: usize,
    order: ByteOrder,
}

impl<'a> PayloadWriter<'a> {
    /// Creates a writer for the given payload.
    pub fn new(data: &'a mut [u8], order: ByteOrder) -> Self {
        PayloadWriter {
            data,
            position: 0,
            overflow: 0,
            order,
        }
    }

    /// Returns the number of bytes written so far (including the ones which didn't fit).
    pub fn written(&self) -> usize {
        self.position + self.overflow
    }

    /// Returns the number of bytes which were written past the end of the payload.
    pub fn overflow(&self) -> usize {
        self.overflow
    }

    /// Writes the given bytes as they are.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let available = self.data.len() - self.position;
        let len = bytes.len().min(available);
        self.data[self.position..self.position + len].copy_from_slice(&bytes[..len]);
        self.position += len;
        self.overflow += bytes.len() - len;
    }

    /// Writes a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    /// Writes an unsigned 16 bit value.
    pub fn put_u16(&mut self, value: u16) {
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()),
        }
    }

    /// Writes a signed 16 bit value.
    pub fn put_i16(&mut self, value: i16) {
        self.put_u16(value as u16);
    }

    /// Writes an unsigned 32 bit value.
    pub fn put_u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()),
        }
    }

    /// Writes a signed 32 bit value.
    pub fn put_i32(&mut self, value: i32) {
        self.put_u32(value as u32);
    }

    /// Writes the given number of zero bytes (used for struct padding).
    pub fn pad(&mut self, count: usize) {
        for _ in 0..count {
            self.put_u8(0);
        }
    }
}

/// Describes a fixed size record which can be stored in a section.
pub trait Record {
    /// The number of bytes written by [Record::write].
    const SIZE: usize;

    /// Encodes this record.
    fn write(&self, out: &mut PayloadWriter);
}

impl Record for u8 {
    const SIZE: usize = 1;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u8(*self);
    }
}

impl Record for u16 {
    const SIZE: usize = 2;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(*self);
    }
}

impl Record for i32 {
    const SIZE: usize = 4;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(*self);
    }
}

impl Record for u32 {
    const SIZE: usize = 4;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u32(*self);
    }
}

/// Represents a bounding box as persisted by several tables.
///
/// Note the field order (east, north, west, south) which is part of the file format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Area {
    /// The largest longitude.
    pub east: i32,
    /// The largest latitude.
    pub north: i32,
    /// The smallest longitude.
    pub west: i32,
    /// The smallest latitude.
    pub south: i32,
}

impl Area {
    /// Creates an area which only covers the given position.
    pub fn around(longitude: i32, latitude: i32) -> Self {
        Area {
            east: longitude,
            north: latitude,
            west: longitude,
            south: latitude,
        }
    }

    /// Grows the area so that it includes the given position.
    pub fn include(&mut self, longitude: i32, latitude: i32) {
        self.west = self.west.min(longitude);
        self.east = self.east.max(longitude);
        self.south = self.south.min(latitude);
        self.north = self.north.max(latitude);
    }
}

impl Record for Area {
    const SIZE: usize = 16;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.east);
        out.put_i32(self.north);
        out.put_i32(self.west);
        out.put_i32(self.south);
    }
}

#[cfg(test)]
mod tests {
    use crate::db::payload::{Area, ByteOrder, PayloadWriter, Record};

    #[test]
    fn byte_order_is_applied_to_every_field() {
        let mut data = [0u8; 6];
        let mut writer = PayloadWriter::new(&mut data, ByteOrder::Big);
        writer.put_u16(0x0102);
        writer.put_i32(0x03040506);
        assert_eq!(writer.overflow(), 0);
        assert_eq!(data, [1, 2, 3, 4, 5, 6]);

        let mut data = [0u8; 6];
        let mut writer = PayloadWriter::new(&mut data, ByteOrder::Little);
        writer.put_u16(0x0102);
        writer.put_i32(0x03040506);
        assert_eq!(data, [2, 1, 6, 5, 4, 3]);
    }

    #[test]
    fn overflow_is_counted_instead_of_panicking() {
        let mut data = [0u8; 3];
        let mut writer = PayloadWriter::new(&mut data, ByteOrder::Little);
        writer.put_i32(-1);
        assert_eq!(writer.written(), 4);
        assert_eq!(writer.overflow(), 1);
        assert_eq!(data, [0xff, 0xff, 0xff]);
    }

    #[test]
    fn areas_grow_and_keep_their_field_order() {
        let mut area = Area::around(10, 20);
        area.include(5, 30);
        assert_eq!(
            area,
            Area {
                east: 10,
                north: 30,
                west: 5,
                south: 20
            }
        );

        let mut data = [0u8; 16];
        let mut writer = PayloadWriter::new(&mut data, ByteOrder::Little);
        area.write(&mut writer);
        assert_eq!(&data[0..4], &10i32.to_le_bytes());
        assert_eq!(&data[12..16], &20i32.to_le_bytes());
    }
}
