//! Provides the table of address ranges.
//!
//! An address range attaches a span of house numbers (on one or both sides) to a line of a
//! street. Ranges are sorted by street, city and line so that a viewer can locate all numbers of
//! a street quickly. The saved "range" section contains:
//!
//! * **bystreet**: the first range, first city group, first zip group and range count of each
//!   street (by sorted street rank),
//! * **bycity** / **byzip**: groups of consecutive ranges sharing the same city or zip within
//!   a street,
//! * **addr**: the ranges themselves,
//! * **noaddr**: lines of a street which carry no address at all,
//! * **place**: the known place to city associations,
//! * **bysquare**: per square, a list of "holes", i.e. spans of streets which have no range in
//!   this square. This is a lossy accelerator: only the [MAX_HOLES] largest gaps are recorded.
//!
//! House numbers are stored as 16 bit values. A range with a larger number is stored as two
//! records: the primary one (flagged with [CONTINUATION_FLAG] on its line) holds the low 16 bits
//! and the following continuation record holds the high 16 bits.
use fnv::FnvHashMap;
use itertools::Itertools;

use crate::db::{Database, PayloadWriter, Record};
use crate::dictionary::StringId;
use crate::line::{LineId, LineTable};
use crate::messages::Diagnostics;
use crate::street::{StreetId, StreetTable};

/// Marks a range whose house numbers are continued in the next record.
pub const CONTINUATION_FLAG: u32 = 0x8000_0000;

/// Contains the number of holes recorded per square.
pub const MAX_HOLES: usize = 32;

/// Determines how far the numbers of both sides may differ so that they are merged.
pub const MERGE_TOLERANCE: i64 = 10;

/// Represents the index of a range in insertion order.
pub type RangeId = usize;

/// Computes a single range covering both sides of a street.
///
/// The resulting numbers always have different parities, which is how a viewer knows that a
/// range covers both sides. Therefore the merged range might be widened by one.
///
/// # Example
///
/// ```
/// # use buildmap::range::merge;
/// // Left: 1..99 (odd), right: 2..100 (even)...
/// assert_eq!(merge(1, 99, 2, 100), (1, 100));
/// // Descending numbers are narrowed to the common span...
/// assert_eq!(merge(99, 1, 100, 2), (100, 1));
/// // Equal parities are widened...
/// assert_eq!(merge(1, 99, 3, 101), (0, 101));
/// ```
pub fn merge(from_left: u32, to_left: u32, from_right: u32, to_right: u32) -> (u32, u32) {
    let mut from = from_right;
    let mut to = to_right;

    if from < to {
        from = from.min(from_left);
        to = to.max(to_left);
        if from & 1 == to & 1 {
            if from & 1 == 1 {
                from -= 1;
            }
            if to & 1 == 0 {
                to += 1;
            }
        }
    } else {
        from = from.max(from_left);
        to = to.min(to_left);
        if from & 1 == to & 1 {
            if from & 1 == 0 {
                from += 1;
            }
            if to & 1 == 1 {
                to -= 1;
            }
        }
    }

    (from, to)
}

/// Describes the addresses of one side of a line.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressSide {
    /// The first house number.
    pub from: u32,
    /// The last house number.
    pub to: u32,
    /// The index of the zip code (see [crate::zip::ZipTable]), 0 if unknown.
    pub zip: u16,
    /// The city name (from the "city" volume).
    pub city: StringId,
    /// The place name (from the "city" volume) or 0.
    pub place: StringId,
}

impl AddressSide {
    fn can_merge(&self, other: &AddressSide) -> bool {
        self.zip == other.zip
            && self.city == other.city
            && self.place == other.place
            && (self.from as i64 - other.from as i64).abs() < MERGE_TOLERANCE
            && (self.to as i64 - other.to as i64).abs() < MERGE_TOLERANCE
    }
}

#[derive(Clone, Debug)]
struct Range {
    street: StreetId,
    zip: u16,
    city: StringId,
    line: LineId,
    from: u32,
    to: u32,
    continued: bool,
    continuation: bool,
    sorted_street: usize,
    sorted_line: usize,
}

#[derive(Clone, Debug)]
struct NoAddress {
    line: LineId,
    street: StreetId,
}

#[derive(Copy, Clone, Debug, Default)]
struct ByStreet {
    first_range: i32,
    first_city: i32,
    first_zip: i32,
    count_range: i32,
}

impl Record for ByStreet {
    const SIZE: usize = 16;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.first_range);
        out.put_i32(self.first_city);
        out.put_i32(self.first_zip);
        out.put_i32(self.count_range);
    }
}

/// A pair of 16 bit values, used for the city, zip and place lists.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Pair(u16, u16);

impl Record for Pair {
    const SIZE: usize = 4;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(self.0);
        out.put_u16(self.1);
    }
}

struct AddressRecord {
    line: u32,
    from: u16,
    to: u16,
}

impl Record for AddressRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u32(self.line);
        out.put_u16(self.from);
        out.put_u16(self.to);
    }
}

/// Describes a span of streets which is either skipped or searched within a square.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Hole {
    /// The number of streets which have no range in the square.
    pub excluded: u16,
    /// The number of streets (preceding the excluded ones) which have to be searched.
    pub included: u16,
}

#[derive(Clone, Debug, Default)]
struct BySquare {
    holes: Vec<Hole>,
    noaddr_start: i32,
    noaddr_count: i32,
}

impl Record for BySquare {
    const SIZE: usize = MAX_HOLES * 4 + 8;

    fn write(&self, out: &mut PayloadWriter) {
        for index in 0..MAX_HOLES {
            let hole = self.holes.get(index).copied().unwrap_or_default();
            out.put_u16(hole.excluded);
            out.put_u16(hole.included);
        }
        out.put_i32(self.noaddr_start);
        out.put_i32(self.noaddr_count);
    }
}

/// Encodes the given gaps (start street, street count), sorted by start, as holes.
///
/// Each hole lists the streets to search followed by the streets to skip. Values which don't
/// fit into 16 bits are split across several holes. At most [MAX_HOLES] holes are generated.
///
/// # Example
///
/// ```
/// # use buildmap::range::{encode_holes, Hole};
/// let holes = encode_holes(&[(2, 3), (10, 1)]);
/// assert_eq!(holes, vec![
///     Hole { included: 2, excluded: 3 },
///     Hole { included: 5, excluded: 1 },
/// ]);
/// ```
pub fn encode_holes(gaps: &[(usize, usize)]) -> Vec<Hole> {
    let mut holes = Vec::with_capacity(MAX_HOLES);
    let mut last: i64 = -1;

    for (start, count) in gaps {
        let mut included = *start as i64 - last - 1;
        let mut excluded = *count as i64;
        last = *start as i64 + excluded - 1;

        while included > 0xffff {
            if holes.len() >= MAX_HOLES {
                return holes;
            }
            holes.push(Hole {
                included: 0xffff,
                excluded: 0,
            });
            included -= 0xffff;
        }
        while excluded > 0xffff {
            if holes.len() >= MAX_HOLES {
                return holes;
            }
            holes.push(Hole {
                included: included as u16,
                excluded: 0xffff,
            });
            included = 0;
            excluded -= 0xffff;
        }
        if included != 0 || excluded != 0 {
            if holes.len() >= MAX_HOLES {
                return holes;
            }
            holes.push(Hole {
                included: included as u16,
                excluded: excluded as u16,
            });
        }
    }

    holes
}

/// Collects the gaps between the streets found in one square.
#[derive(Default)]
struct GapCollector {
    last: Option<usize>,
    gaps: Vec<(usize, usize)>,
}

impl GapCollector {
    fn visit(&mut self, street: usize) {
        let next = self.last.map(|last| last + 1).unwrap_or(0);
        if street > next {
            self.gaps.push((next, street - next));
        }
        self.last = Some(self.last.map_or(street, |last| last.max(street)));
    }

    /// Keeps the largest gaps (the earlier one wins a tie) in ascending order.
    fn largest(self) -> Vec<(usize, usize)> {
        self.gaps
            .into_iter()
            .sorted_by_key(|(start, count)| (std::cmp::Reverse(*count), *start))
            .take(MAX_HOLES)
            .sorted()
            .collect()
    }
}

/// Contains all address ranges of a build.
#[derive(Default)]
pub struct RangeTable {
    ranges: Vec<Range>,
    by_line: FnvHashMap<LineId, Vec<RangeId>>,
    no_address: Vec<NoAddress>,
    no_address_by_line: FnvHashMap<LineId, Vec<usize>>,
    places: Vec<Pair>,
    place_index: FnvHashMap<(StringId, StringId), usize>,
    add_count: usize,
    duplicates: usize,
    sorted: Vec<RangeId>,
    sorted_no_address: Vec<usize>,
    no_address_lines: Vec<(usize, usize)>,
    is_sorted: bool,
}

impl RangeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        RangeTable::default()
    }

    /// Adds a range of house numbers for the given line of the given street.
    ///
    /// Adding the same range twice yields the same id. Numbers exceeding 16 bits create an
    /// additional continuation record.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::range::RangeTable;
    /// let mut ranges = RangeTable::new();
    /// let first = ranges.add(0, 0, 1, 99, 1, 1).unwrap();
    /// assert_eq!(ranges.add(0, 0, 1, 99, 1, 1).unwrap(), first);
    /// assert_eq!(ranges.len(), 1);
    ///
    /// // Large numbers need a continuation record...
    /// let _ = ranges.add(1, 0, 100_001, 100_099, 1, 1).unwrap();
    /// assert_eq!(ranges.len(), 3);
    /// ```
    pub fn add(
        &mut self,
        line: LineId,
        street: StreetId,
        from: u32,
        to: u32,
        zip: u16,
        city: StringId,
    ) -> anyhow::Result<RangeId> {
        if self.is_sorted {
            return Err(anyhow::anyhow!("cannot add a range after sorting"));
        }
        self.add_count += 1;

        if let Some(candidates) = self.by_line.get(&line) {
            for index in candidates {
                let range = &self.ranges[*index];
                if range.street == street
                    && range.zip == zip
                    && range.city == city
                    && range.from == from
                    && range.to == to
                {
                    return Ok(*index);
                }
            }
        }

        let index = self.ranges.len();
        let continued = from > 0xffff || to > 0xffff;
        let range = Range {
            street,
            zip,
            city,
            line,
            from,
            to,
            continued,
            continuation: false,
            sorted_street: 0,
            sorted_line: 0,
        };
        if continued {
            self.ranges.push(range.clone());
            self.ranges.push(Range {
                continued: false,
                continuation: true,
                ..range
            });
        } else {
            self.ranges.push(range);
        }
        self.by_line.entry(line).or_default().push(index);

        Ok(index)
    }

    /// Adds the addresses of both sides of a line.
    ///
    /// If both sides are in the same city and zip code and have nearly equal numbers, a single
    /// merged range is created. Otherwise a range is created for each side with a known zip
    /// code. A side with a place name registers that place for its city and uses the place as
    /// city.
    pub fn add_both_sides(
        &mut self,
        line: LineId,
        street: StreetId,
        left: AddressSide,
        right: AddressSide,
    ) -> anyhow::Result<Vec<RangeId>> {
        let mut result = Vec::with_capacity(2);

        if left.can_merge(&right) {
            let (from, to) = merge(left.from, left.to, right.from, right.to);
            let city = self.effective_city(&left);
            result.push(self.add(line, street, from, to, left.zip, city)?);
            return Ok(result);
        }

        for side in [left, right] {
            if side.zip > 0 {
                let city = self.effective_city(&side);
                result.push(self.add(line, street, side.from, side.to, side.zip, city)?);
            }
        }

        Ok(result)
    }

    fn effective_city(&mut self, side: &AddressSide) -> StringId {
        if side.place > 0 {
            self.add_place(side.place, side.city);
            side.place
        } else {
            side.city
        }
    }

    /// Records a line of a street which carries no addresses.
    ///
    /// The first duplicate registration is reported, all further ones are only counted.
    pub fn add_no_address(
        &mut self,
        line: LineId,
        street: StreetId,
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<()> {
        if self.is_sorted {
            return Err(anyhow::anyhow!("cannot add a no-address line after sorting"));
        }

        if let Some(candidates) = self.no_address_by_line.get(&line) {
            if candidates
                .iter()
                .any(|index| self.no_address[*index].street == street)
            {
                if self.duplicates == 0 {
                    diagnostics.error("duplicated no-address line");
                }
                self.duplicates += 1;
                return Ok(());
            }
        }

        self.no_address_by_line
            .entry(line)
            .or_default()
            .push(self.no_address.len());
        self.no_address.push(NoAddress { line, street });

        Ok(())
    }

    /// Records that the given place belongs to the given city.
    ///
    /// Unknown (0) codes are ignored as well as known associations.
    pub fn add_place(&mut self, place: StringId, city: StringId) {
        if place == 0 || city == 0 || self.place_index.contains_key(&(place, city)) {
            return;
        }

        let _ = self.place_index.insert((place, city), self.places.len());
        self.places.push(Pair(place, city));
    }

    /// Returns the number of range records (including continuation records).
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Determines if there are no ranges at all.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the number of lines without addresses.
    pub fn no_address_count(&self) -> usize {
        self.no_address.len()
    }

    /// Returns the number of known place to city associations.
    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    /// Returns the number of duplicate no-address registrations.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Sorts all ranges by street, city, line and insertion order.
    ///
    /// The lines and streets must have been sorted before. Sorting twice has no effect.
    pub fn sort(&mut self, lines: &LineTable, streets: &StreetTable) -> anyhow::Result<()> {
        if self.is_sorted {
            return Ok(());
        }

        log::info!("Sorting {} ranges...", self.ranges.len());
        for range in self.ranges.iter_mut() {
            range.sorted_street = streets.get_sorted(range.street)?;
            range.sorted_line = lines.get_sorted(range.line)?;
        }

        let ranges = &self.ranges;
        self.sorted = (0..ranges.len())
            .sorted_by_key(|index| {
                let range = &ranges[*index];
                (range.sorted_street, range.city, range.sorted_line, *index)
            })
            .collect();

        let mut no_address_lines = Vec::with_capacity(self.no_address.len());
        for entry in self.no_address.iter() {
            no_address_lines.push((
                lines.get_sorted(entry.line)?,
                streets.get_sorted(entry.street)?,
            ));
        }
        self.sorted_no_address = (0..no_address_lines.len())
            .sorted_by_key(|index| (no_address_lines[*index].0, *index))
            .collect();
        self.no_address_lines = no_address_lines;
        self.is_sorted = true;

        Ok(())
    }

    /// Computes the street holes of each square.
    fn holes(&self, lines: &LineTable, square_count: usize) -> anyhow::Result<Vec<Vec<Hole>>> {
        let mut collectors: Vec<GapCollector> =
            (0..square_count).map(|_| GapCollector::default()).collect();
        for index in self.sorted.iter() {
            let range = &self.ranges[*index];
            let square = lines.get_square_sorted(range.sorted_line)?;
            collectors
                .get_mut(square)
                .ok_or_else(|| anyhow::anyhow!("invalid square index {}", square))?
                .visit(range.sorted_street);
        }

        Ok(collectors
            .into_iter()
            .map(|collector| encode_holes(&collector.largest()))
            .collect())
    }

    /// Writes the "range" section.
    ///
    /// Nothing is written if there are neither ranges nor no-address lines or if there are no
    /// squares at all.
    pub fn save(
        &self,
        db: &mut Database,
        lines: &LineTable,
        street_count: usize,
        square_count: usize,
    ) -> anyhow::Result<()> {
        if (self.ranges.is_empty() && self.no_address.is_empty()) || square_count == 0 {
            return Ok(());
        }
        if !self.is_sorted {
            return Err(anyhow::anyhow!("ranges not sorted yet"));
        }

        log::info!("Building the street search accelerator...");
        let mut by_square: Vec<BySquare> = self
            .holes(lines, square_count)?
            .into_iter()
            .map(|holes| BySquare {
                holes,
                ..BySquare::default()
            })
            .collect();

        log::info!("Saving {} ranges...", self.ranges.len());
        let mut by_street = vec![ByStreet::default(); street_count];
        let mut by_city: Vec<Pair> = Vec::new();
        let mut by_zip: Vec<Pair> = Vec::new();
        let mut addresses = Vec::with_capacity(self.ranges.len());
        let mut current_street: Option<usize> = None;
        let mut current_city: Option<StringId> = None;
        let mut current_zip: Option<u16> = None;

        for (position, index) in self.sorted.iter().enumerate() {
            let range = &self.ranges[*index];

            if current_street != Some(range.sorted_street) {
                if matches!(current_street, Some(street) if street > range.sorted_street) {
                    return Err(anyhow::anyhow!("inconsistent range order"));
                }
                let entry = by_street.get_mut(range.sorted_street).ok_or_else(|| {
                    anyhow::anyhow!("out of bound street {}", range.sorted_street)
                })?;
                *entry = ByStreet {
                    first_range: position as i32,
                    first_city: by_city.len() as i32,
                    first_zip: by_zip.len() as i32,
                    count_range: 0,
                };
                current_street = Some(range.sorted_street);
                current_city = None;
                current_zip = None;
            }
            by_street[range.sorted_street].count_range += 1;

            if current_city != Some(range.city) {
                by_city.push(Pair(range.city, 0));
                current_city = Some(range.city);
            }
            if let Some(city) = by_city.last_mut() {
                if city.1 == u16::MAX {
                    return Err(anyhow::anyhow!("too many streets in a single city"));
                }
                city.1 += 1;
            }

            if current_zip != Some(range.zip) {
                by_zip.push(Pair(range.zip, 0));
                current_zip = Some(range.zip);
            }
            if let Some(zip) = by_zip.last_mut() {
                if zip.1 == u16::MAX {
                    return Err(anyhow::anyhow!("too many streets in a single zip code"));
                }
                zip.1 += 1;
            }

            let line = range.sorted_line as u32;
            addresses.push(if range.continuation {
                AddressRecord {
                    line,
                    from: (range.from >> 16) as u16,
                    to: (range.to >> 16) as u16,
                }
            } else {
                AddressRecord {
                    line: if range.continued {
                        line | CONTINUATION_FLAG
                    } else {
                        line
                    },
                    from: (range.from & 0xffff) as u16,
                    to: (range.to & 0xffff) as u16,
                }
            });
        }

        let mut no_address = Vec::with_capacity(self.sorted_no_address.len());
        let mut current_square: Option<usize> = None;
        for (position, index) in self.sorted_no_address.iter().enumerate() {
            let (line, street) = self.no_address_lines[*index];
            no_address.push(Pair32(line as i32, street as i32));

            let square = lines.get_square_sorted(line)?;
            if current_square != Some(square) {
                if matches!(current_square, Some(previous) if previous > square) {
                    return Err(anyhow::anyhow!("no-address line out of order (square)"));
                }
                let entry = by_square
                    .get_mut(square)
                    .ok_or_else(|| anyhow::anyhow!("invalid square index {}", square))?;
                entry.noaddr_start = position as i32;
                entry.noaddr_count = 0;
                current_square = Some(square);
            }
            by_square[square].noaddr_count += 1;
        }

        let root = db.add_section(None, "range")?;
        let _ = db.add_records(root, "bystreet", &by_street)?;
        let _ = db.add_records(root, "bycity", &by_city)?;
        let _ = db.add_records(root, "place", &self.places)?;
        let _ = db.add_records(root, "byzip", &by_zip)?;
        let _ = db.add_records(root, "addr", &addresses)?;
        let _ = db.add_records(root, "noaddr", &no_address)?;
        let _ = db.add_records(root, "bysquare", &by_square)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Range table: {} items, {} add, {} used, {} duplicates",
            self.ranges.len(),
            self.add_count,
            crate::fmt::format_size(self.ranges.len() * AddressRecord::SIZE),
            self.duplicates
        );
    }

    /// Discards all ranges.
    pub fn reset(&mut self) {
        *self = RangeTable::default();
    }
}

struct Pair32(i32, i32);

impl Record for Pair32 {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.0);
        out.put_i32(self.1);
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::line::LineTable;
    use crate::messages::Diagnostics;
    use crate::point::PointTable;
    use crate::range::{encode_holes, merge, AddressSide, GapCollector, Hole, RangeTable};
    use crate::range::{CONTINUATION_FLAG, MAX_HOLES};
    use crate::street::{StreetName, StreetTable};

    #[test]
    fn merged_ranges_have_different_parities() {
        for from_left in 0..12 {
            for to_left in 0..12 {
                for delta in 0..4 {
                    let (from, to) = merge(from_left, to_left, from_left + delta, to_left + delta);
                    assert_eq!(from & 1 != to & 1, true);
                }
            }
        }
    }

    #[test]
    fn identical_ranges_are_stored_once() {
        let mut ranges = RangeTable::new();
        let first = ranges.add(3, 1, 100, 198, 2, 5).unwrap();
        let second = ranges.add(3, 1, 100, 198, 2, 5).unwrap();
        assert_eq!(first, second);
        assert_eq!(ranges.len(), 1);

        // Any difference yields a new range...
        assert_eq!(ranges.add(3, 1, 100, 198, 2, 6).unwrap(), 1);
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn both_sides_are_merged_if_similar() {
        let mut ranges = RangeTable::new();
        let left = AddressSide {
            from: 1,
            to: 99,
            zip: 1,
            city: 4,
            place: 0,
        };
        let right = AddressSide {
            from: 2,
            to: 100,
            ..left
        };
        assert_eq!(ranges.add_both_sides(0, 0, left, right).unwrap().len(), 1);

        let far = AddressSide {
            from: 200,
            to: 298,
            ..left
        };
        assert_eq!(ranges.add_both_sides(1, 0, left, far).unwrap().len(), 2);

        // Sides without a zip code are skipped...
        let unknown = AddressSide { zip: 0, ..far };
        assert_eq!(ranges.add_both_sides(2, 0, left, unknown).unwrap().len(), 1);

        // Places are registered for their city...
        let in_place = AddressSide { place: 9, ..left };
        let _ = ranges.add_both_sides(3, 0, in_place, in_place).unwrap();
        assert_eq!(ranges.place_count(), 1);
    }

    #[test]
    fn duplicate_no_address_lines_are_counted() {
        let mut ranges = RangeTable::new();
        let mut diagnostics = Diagnostics::new();
        ranges.add_no_address(1, 1, &mut diagnostics).unwrap();
        ranges.add_no_address(1, 1, &mut diagnostics).unwrap();
        ranges.add_no_address(1, 1, &mut diagnostics).unwrap();
        ranges.add_no_address(1, 2, &mut diagnostics).unwrap();

        assert_eq!(ranges.no_address_count(), 2);
        assert_eq!(ranges.duplicates(), 2);
        assert_eq!(diagnostics.errors(), 1);
    }

    #[test]
    fn places_ignore_unknown_codes() {
        let mut ranges = RangeTable::new();
        ranges.add_place(0, 1);
        ranges.add_place(1, 0);
        ranges.add_place(1, 2);
        ranges.add_place(1, 2);
        assert_eq!(ranges.place_count(), 1);
    }

    #[test]
    fn only_the_largest_gaps_become_holes() {
        let mut collector = GapCollector::default();
        for street in (0..200).step_by(2) {
            collector.visit(street);
        }
        collector.visit(1000);
        let gaps = collector.largest();
        assert_eq!(gaps.len(), MAX_HOLES);
        assert_eq!(gaps.last(), Some(&(199, 801)));
        assert_eq!(gaps.windows(2).all(|pair| pair[0].0 < pair[1].0), true);

        assert_eq!(
            encode_holes(&[(0x10005, 2)]),
            vec![
                Hole {
                    included: 0xffff,
                    excluded: 0
                },
                Hole {
                    included: 6,
                    excluded: 2
                },
            ]
        );
    }

    #[test]
    fn ranges_are_saved_by_street_and_city() {
        let mut points = PointTable::new();
        let mut lines = LineTable::new();
        let a = points.add(0, 0);
        let b = points.add(10, 0);
        let c = points.add(20, 0);
        let first = lines.add(1, 1, a, b).unwrap();
        let second = lines.add(2, 1, b, c).unwrap();
        points.sort().unwrap();
        lines.sort(&points).unwrap();

        let mut streets = StreetTable::new();
        let oak = streets.add(1, StreetName { name: 2, ..StreetName::default() }, second, (10, 0));
        let elm = streets.add(1, StreetName { name: 1, ..StreetName::default() }, first, (0, 0));
        streets.sort(&lines).unwrap();

        let mut ranges = RangeTable::new();
        let mut diagnostics = Diagnostics::new();
        let _ = ranges.add(second, oak, 1, 99, 1, 1).unwrap();
        let _ = ranges.add(first, elm, 70_000, 70_098, 1, 1).unwrap();
        let _ = ranges.add(first, elm, 2, 98, 2, 2).unwrap();
        ranges.add_no_address(second, elm, &mut diagnostics).unwrap();
        ranges.sort(&lines, &streets).unwrap();

        let mut db = Database::in_memory(ByteOrder::Little);
        ranges.save(&mut db, &lines, streets.len(), 1).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();

        // Elm (sorted rank 0) has three records (one of them a continuation) in two cities...
        let by_street = image.find("range/bystreet").unwrap();
        assert_eq!(by_street.i32_at(0), Some(0));
        assert_eq!(by_street.i32_at(3), Some(3));
        assert_eq!(by_street.i32_at(4), Some(3));
        assert_eq!(by_street.i32_at(5), Some(2));
        assert_eq!(by_street.i32_at(7), Some(1));
        assert_eq!(image.find("range/bycity").unwrap().count(), 3);

        let addr = image.find("range/addr").unwrap();
        assert_eq!(addr.count(), 4);
        assert_eq!(addr.i32_at(0), Some(CONTINUATION_FLAG as i32));
        assert_eq!(addr.u16_at(2), Some((70_000 & 0xffff) as u16));
        assert_eq!(addr.u16_at(6), Some(1));
        assert_eq!(addr.u16_at(7), Some(1));

        let noaddr = image.find("range/noaddr").unwrap();
        assert_eq!(noaddr.i32_at(0), Some(1));
        assert_eq!(noaddr.i32_at(1), Some(0));

        let by_square = image.find("range/bysquare").unwrap();
        assert_eq!(by_square.i32_at(MAX_HOLES), Some(0));
        assert_eq!(by_square.i32_at(MAX_HOLES + 1), Some(1));
    }
}
