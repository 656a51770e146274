//! Provides the table of zip codes.
//!
//! Zip codes are referenced by a 16 bit index. Index 0 is reserved for "unknown", so that the
//! first zip code receives index 1. For each zip code, the bounding box of all positions it was
//! seen at is tracked, so that its center can be used as a rough position.
use fnv::FnvHashMap;

use crate::db::{Area, Database};

/// Represents the index of a zip code (0 means unknown).
pub type ZipId = u16;

struct Zip {
    code: i32,
    area: Area,
}

/// Contains all zip codes of a build.
pub struct ZipTable {
    zips: Vec<Zip>,
    by_code: FnvHashMap<i32, ZipId>,
    add_count: usize,
}

impl Default for ZipTable {
    fn default() -> Self {
        ZipTable::new()
    }
}

impl ZipTable {
    /// Creates a table which only contains the reserved index 0.
    pub fn new() -> Self {
        ZipTable {
            zips: vec![Zip {
                code: 0,
                area: Area::default(),
            }],
            by_code: FnvHashMap::default(),
            add_count: 0,
        }
    }

    /// Registers a zip code seen at the given position and returns its index.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::zip::ZipTable;
    /// let mut zips = ZipTable::new();
    /// let index = zips.add(94040, 100, 200).unwrap();
    /// assert_eq!(index, 1);
    /// assert_eq!(zips.add(94040, 300, 400).unwrap(), index);
    /// assert_eq!(zips.get_position(index).unwrap(), (200, 300));
    /// ```
    pub fn add(&mut self, code: i32, longitude: i32, latitude: i32) -> anyhow::Result<ZipId> {
        self.add_count += 1;

        if let Some(index) = self.by_code.get(&code) {
            self.zips[*index as usize].area.include(longitude, latitude);
            return Ok(*index);
        }

        let index = ZipId::try_from(self.zips.len())
            .map_err(|_| anyhow::anyhow!("too many zip codes"))?;
        self.zips.push(Zip {
            code,
            area: Area::around(longitude, latitude),
        });
        let _ = self.by_code.insert(code, index);

        Ok(index)
    }

    /// Returns the index of the given zip code or 0 if it is unknown.
    pub fn locate(&self, code: i32) -> ZipId {
        self.by_code.get(&code).copied().unwrap_or(0)
    }

    fn zip(&self, index: ZipId) -> anyhow::Result<&Zip> {
        if index == 0 {
            return Err(anyhow::anyhow!("invalid zip index 0"));
        }
        self.zips
            .get(index as usize)
            .ok_or_else(|| anyhow::anyhow!("invalid zip index {}", index))
    }

    /// Returns the zip code for the given index.
    pub fn get_code(&self, index: ZipId) -> anyhow::Result<i32> {
        Ok(self.zip(index)?.code)
    }

    /// Returns the center of all positions of the given zip code.
    pub fn get_position(&self, index: ZipId) -> anyhow::Result<(i32, i32)> {
        let area = &self.zip(index)?.area;
        Ok((
            ((area.east as i64 + area.west as i64) / 2) as i32,
            ((area.north as i64 + area.south as i64) / 2) as i32,
        ))
    }

    /// Returns the number of zip codes (not counting the reserved index 0).
    pub fn len(&self) -> usize {
        self.zips.len() - 1
    }

    /// Determines if there are no zip codes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the "zip" section, which lists all codes by index (including the reserved one).
    pub fn save(&self, db: &mut Database) -> anyhow::Result<()> {
        let codes: Vec<i32> = self.zips.iter().map(|zip| zip.code).collect();
        let root = db.add_section(None, "zip")?;
        let _ = db.add_data(root, codes.len(), 4)?;
        let mut writer = db.writer(root)?;
        for code in codes {
            writer.put_i32(code);
        }

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Zip code table: {} items, {} add",
            self.len(),
            self.add_count
        );
    }

    /// Discards all zip codes.
    pub fn reset(&mut self) {
        *self = ZipTable::new();
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::zip::ZipTable;

    #[test]
    fn index_zero_is_reserved() {
        let mut zips = ZipTable::new();
        assert_eq!(zips.locate(12345), 0);
        assert_eq!(zips.get_code(0).is_err(), true);

        let first = zips.add(12345, 0, 0).unwrap();
        let second = zips.add(54321, 0, 0).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(zips.locate(54321), 2);
        assert_eq!(zips.get_code(2).unwrap(), 54321);
        assert_eq!(zips.len(), 2);

        let mut db = Database::in_memory(ByteOrder::Big);
        zips.save(&mut db).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Big).unwrap();
        let zip = image.find("zip").unwrap();
        assert_eq!(zip.count(), 3);
        assert_eq!(zip.i32_at(0), Some(0));
        assert_eq!(zip.i32_at(2), Some(54321));

        zips.reset();
        assert_eq!(zips.is_empty(), true);
    }
}
