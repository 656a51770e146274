//! Provides the table of streets.
//!
//! A street is identified by its full name, which consists of four dictionary strings (prefix,
//! name, type and suffix). Streets have no position of their own. Instead each street keeps
//! track of its westernmost line (the southernmost one for equal longitudes) and is sorted by
//! the sorted rank of that line. Therefore streets which are close to each other in the map
//! are also close to each other in the street table.
use fnv::FnvHashMap;

use crate::db::{Database, PayloadWriter, Record};
use crate::dictionary::{Dictionary, StringId};
use crate::line::{LineId, LineTable};

/// Represents the index of a street in insertion order.
pub type StreetId = usize;

/// Represents the full name of a street as a set of dictionary codes.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct StreetName {
    /// The direction prefix (e.g. "N") from the "prefix" volume.
    pub prefix: StringId,
    /// The name itself from the "street" volume.
    pub name: StringId,
    /// The street type (e.g. "Ave") from the "type" volume.
    pub kind: StringId,
    /// The direction suffix from the "suffix" volume.
    pub suffix: StringId,
}

impl Record for StreetName {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(self.prefix);
        out.put_u16(self.name);
        out.put_u16(self.kind);
        out.put_u16(self.suffix);
    }
}

#[derive(Clone, Debug)]
struct Street {
    name: StreetName,
    cfcc: u8,
    start: LineId,
    start_position: (i32, i32),
    sorted: usize,
}

/// Contains all streets of a build.
#[derive(Default)]
pub struct StreetTable {
    streets: Vec<Street>,
    by_name: FnvHashMap<StreetName, StreetId>,
    add_count: usize,
    sorted: Vec<StreetId>,
    is_sorted: bool,
}

impl StreetTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        StreetTable::default()
    }

    /// Registers the given line as part of the street with the given name.
    ///
    /// `position` is the position of the "from" point of the line, which is used to determine
    /// the westernmost line of the street. Returns the id of the (possibly existing) street.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::street::{StreetName, StreetTable};
    /// let mut streets = StreetTable::new();
    /// let main = StreetName { name: 1, ..StreetName::default() };
    /// let first = streets.add(1, main, 0, (100, 0));
    /// assert_eq!(streets.add(1, main, 1, (50, 0)), first);
    /// assert_eq!(streets.start(first), Some(1));
    /// ```
    pub fn add(
        &mut self,
        cfcc: u8,
        name: StreetName,
        line: LineId,
        position: (i32, i32),
    ) -> StreetId {
        self.add_count += 1;

        if let Some(id) = self.by_name.get(&name) {
            let street = &mut self.streets[*id];
            if position < street.start_position {
                street.start = line;
                street.start_position = position;
            }
            return *id;
        }

        let id = self.streets.len();
        self.streets.push(Street {
            name,
            cfcc,
            start: line,
            start_position: position,
            sorted: 0,
        });
        let _ = self.by_name.insert(name, id);

        id
    }

    /// Returns the number of streets.
    pub fn len(&self) -> usize {
        self.streets.len()
    }

    /// Determines if there are no streets at all.
    pub fn is_empty(&self) -> bool {
        self.streets.is_empty()
    }

    /// Returns the westernmost line of the given street.
    pub fn start(&self, street: StreetId) -> Option<LineId> {
        self.streets.get(street).map(|street| street.start)
    }

    /// Sorts the streets by the sorted rank of their westernmost line.
    ///
    /// The lines must have been sorted before. Sorting twice has no effect.
    pub fn sort(&mut self, lines: &LineTable) -> anyhow::Result<()> {
        if self.is_sorted {
            return Ok(());
        }

        log::info!("Sorting {} streets...", self.streets.len());
        let mut keys = Vec::with_capacity(self.streets.len());
        for street in self.streets.iter() {
            keys.push(lines.get_sorted(street.start)?);
        }

        let mut sorted: Vec<StreetId> = (0..self.streets.len()).collect();
        sorted.sort_by_key(|id| keys[*id]);
        for (rank, id) in sorted.iter().enumerate() {
            self.streets[*id].sorted = rank;
        }
        self.sorted = sorted;
        self.is_sorted = true;

        Ok(())
    }

    /// Returns the sorted rank of the given street.
    pub fn get_sorted(&self, street: StreetId) -> anyhow::Result<usize> {
        if !self.is_sorted {
            return Err(anyhow::anyhow!("streets not sorted yet"));
        }

        self.streets
            .get(street)
            .map(|street| street.sorted)
            .ok_or_else(|| anyhow::anyhow!("invalid street index {}", street))
    }

    /// Renders the full name of the street with the given sorted rank.
    pub fn describe_sorted(&self, dictionary: &Dictionary, sorted: usize) -> Option<String> {
        let street = &self.streets[*self.sorted.get(sorted)?];
        let lookup = |volume: &str, code: StringId| {
            dictionary
                .volume(volume)
                .and_then(|volume| dictionary.get(volume, code))
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default()
        };

        Some(format!(
            "{} {} {} ({})",
            lookup("prefix", street.name.prefix),
            lookup("street", street.name.name),
            lookup("suffix", street.name.suffix),
            lookup("type", street.name.kind)
        ))
    }

    /// Writes the "street" section.
    pub fn save(&self, db: &mut Database) -> anyhow::Result<()> {
        if self.streets.is_empty() {
            return Ok(());
        }
        if !self.is_sorted {
            return Err(anyhow::anyhow!("streets not sorted yet"));
        }
        log::info!("Saving {} streets...", self.streets.len());

        let names: Vec<StreetName> = self
            .sorted
            .iter()
            .map(|id| self.streets[*id].name)
            .collect();
        let types: Vec<u8> = self
            .sorted
            .iter()
            .map(|id| self.streets[*id].cfcc)
            .collect();

        let root = db.add_section(None, "street")?;
        let _ = db.add_records(root, "name", &names)?;
        let _ = db.add_records(root, "type", &types)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Street table: {} streets, {} add, {} used",
            self.streets.len(),
            self.add_count,
            crate::fmt::format_size(self.streets.len() * StreetName::SIZE)
        );
    }

    /// Discards all streets.
    pub fn reset(&mut self) {
        *self = StreetTable::default();
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::dictionary::Dictionary;
    use crate::line::LineTable;
    use crate::point::PointTable;
    use crate::street::{StreetName, StreetTable};

    #[test]
    fn streets_follow_their_westernmost_line() {
        let mut dictionary = Dictionary::new();
        let names = dictionary.open("street").unwrap();
        let types = dictionary.open("type").unwrap();
        let _ = dictionary.open("prefix").unwrap();
        let _ = dictionary.open("suffix").unwrap();

        let mut points = PointTable::new();
        let mut lines = LineTable::new();
        let a = points.add(0, 0);
        let b = points.add(10, 0);
        let c = points.add(20, 0);
        let east = lines.add(1, 1, b, c).unwrap();
        let west = lines.add(2, 1, a, b).unwrap();
        points.sort().unwrap();
        lines.sort(&points).unwrap();

        let elm = StreetName {
            name: dictionary.add(names, "Elm").unwrap(),
            kind: dictionary.add(types, "St").unwrap(),
            ..StreetName::default()
        };
        let oak = StreetName {
            name: dictionary.add(names, "Oak").unwrap(),
            ..StreetName::default()
        };

        let mut streets = StreetTable::new();
        let oak_id = streets.add(1, oak, east, (10, 0));
        let elm_id = streets.add(1, elm, east, (10, 0));
        assert_eq!(streets.add(1, elm, west, (0, 0)), elm_id);
        assert_eq!(streets.len(), 2);
        assert_eq!(streets.get_sorted(elm_id).is_err(), true);

        streets.sort(&lines).unwrap();
        assert_eq!(streets.get_sorted(elm_id).unwrap(), 0);
        assert_eq!(streets.get_sorted(oak_id).unwrap(), 1);
        assert_eq!(
            streets.describe_sorted(&dictionary, 0),
            Some(" Elm  (St)".to_owned())
        );

        let mut db = Database::in_memory(ByteOrder::Little);
        streets.save(&mut db).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();
        let name = image.find("street/name").unwrap();
        assert_eq!(name.count(), 2);
        assert_eq!(name.u16_at(1), Some(elm.name));
        assert_eq!(name.u16_at(5), Some(oak.name));
        assert_eq!(image.find("street/type").unwrap().data(), &[1, 1]);
    }
}
