//! Provides the table of all lines (street segments, rivers, borders...).
//!
//! A line connects two points and belongs to a layer (its category). Lines are stored in two
//! orders:
//!
//! * all lines sorted by the square of their "from" point, then by layer and points, which is
//!   the primary order (the "sorted rank" of a line),
//! * all lines crossing a square boundary sorted by the square of their "to" point, so that a
//!   viewer scanning a square also finds the lines ending there.
//!
//! Lines whose shape leaves the squares of their endpoints (or whose endpoints are in squares
//! which don't touch) are additionally recorded as **long lines** along with their bounding
//! box. A viewer scans this list to find lines passing a square without ending in it.
//!
//! Finally, the "bypoint" index lists all lines starting or ending at each point.
//!
//! # Example
//!
//! ```
//! # use buildmap::point::PointTable;
//! # use buildmap::line::LineTable;
//! let mut points = PointTable::new();
//! let mut lines = LineTable::new();
//! let a = points.add(0, 0);
//! let b = points.add(1_000, 0);
//! let line = lines.add(4711, 1, a, b).unwrap();
//!
//! points.sort().unwrap();
//! lines.sort(&points).unwrap();
//! assert_eq!(lines.find_sorted(4711).unwrap(), Some(0));
//! assert_eq!(lines.get_sorted(line).unwrap(), 0);
//! assert_eq!(lines.find_sorted(42).unwrap(), None);
//! ```
use fnv::FnvHashMap;
use itertools::Itertools;

use crate::bucket::by_square_and_layer;
use crate::db::{Area, Database, PayloadWriter, Record};
use crate::point::{PointId, PointTable};

/// Represents the index of a line in insertion order.
pub type LineId = usize;

/// Contains the default number of long lines which may be recorded.
pub const DEFAULT_LONG_LINE_CAPACITY: usize = 1000;

#[derive(Clone, Debug)]
struct Line {
    tlid: i32,
    layer: u8,
    from: PointId,
    to: PointId,
    sorted_from: usize,
    sorted_to: usize,
    square_from: usize,
    square_to: usize,
    sorted: usize,
}

/// Represents a line whose shape leaves the squares of its endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LongLine {
    /// The sorted rank of the line.
    pub line: usize,
    /// The layer of the line.
    pub layer: u8,
    /// The bounding box of all known points of the line.
    pub area: Area,
}

impl Record for LongLine {
    const SIZE: usize = 4 + 4 + Area::SIZE;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.line as i32);
        out.put_u8(self.layer);
        out.pad(3);
        self.area.write(out);
    }
}

struct LineRecord {
    from: i32,
    to: i32,
}

impl Record for LineRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.from);
        out.put_i32(self.to);
    }
}

/// Contains all lines of a build.
pub struct LineTable {
    lines: Vec<Line>,
    by_tlid: FnvHashMap<i32, LineId>,
    by_point: FnvHashMap<PointId, Vec<LineId>>,
    sorted: Vec<LineId>,
    crossing: Vec<LineId>,
    long_lines: Vec<LongLine>,
    long_by_line: FnvHashMap<usize, usize>,
    long_lines_enabled: bool,
    long_line_capacity: usize,
    is_sorted: bool,
}

impl Default for LineTable {
    fn default() -> Self {
        LineTable::new()
    }
}

impl LineTable {
    /// Creates an empty table which records up to [DEFAULT_LONG_LINE_CAPACITY] long lines.
    pub fn new() -> Self {
        LineTable::with_long_lines(true, DEFAULT_LONG_LINE_CAPACITY)
    }

    /// Creates an empty table with the given long line settings.
    pub fn with_long_lines(enabled: bool, capacity: usize) -> Self {
        LineTable {
            lines: Vec::new(),
            by_tlid: FnvHashMap::default(),
            by_point: FnvHashMap::default(),
            sorted: Vec::new(),
            crossing: Vec::new(),
            long_lines: Vec::new(),
            long_by_line: FnvHashMap::default(),
            long_lines_enabled: enabled,
            long_line_capacity: capacity,
            is_sorted: false,
        }
    }

    /// Adds a line and returns its id.
    ///
    /// # Errors
    ///
    /// Fails if the layer is 0 or if the table has already been sorted.
    pub fn add(
        &mut self,
        tlid: i32,
        layer: u8,
        from: PointId,
        to: PointId,
    ) -> anyhow::Result<LineId> {
        if self.is_sorted {
            return Err(anyhow::anyhow!("cannot add line #{} after sorting", tlid));
        }
        if layer == 0 {
            return Err(anyhow::anyhow!("invalid layer {} in line #{}", layer, tlid));
        }

        let id = self.lines.len();
        self.lines.push(Line {
            tlid,
            layer,
            from,
            to,
            sorted_from: 0,
            sorted_to: 0,
            square_from: 0,
            square_to: 0,
            sorted: 0,
        });
        let _ = self.by_tlid.entry(tlid).or_insert(id);
        for point in [from, to] {
            let lines = self.by_point.entry(point).or_default();
            if !lines.contains(&id) {
                lines.push(id);
            }
        }

        Ok(id)
    }

    /// Returns the number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Determines if there are no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the number of lines whose endpoints are in different squares.
    pub fn crossing_count(&self) -> usize {
        self.crossing.len()
    }

    /// Returns all long lines found so far.
    pub fn long_lines(&self) -> &[LongLine] {
        &self.long_lines
    }

    /// Sorts all lines and computes the crossing lines.
    ///
    /// The points must have been sorted before. Sorting twice has no effect.
    pub fn sort(&mut self, points: &PointTable) -> anyhow::Result<()> {
        if self.is_sorted {
            return Ok(());
        }
        if self.lines.is_empty() {
            self.is_sorted = true;
            return Ok(());
        }

        log::info!("Sorting {} lines...", self.lines.len());
        for line in self.lines.iter_mut() {
            line.sorted_from = points.get_sorted(line.from)?;
            line.sorted_to = points.get_sorted(line.to)?;
            line.square_from = points.get_square(line.from)?;
            line.square_to = points.get_square(line.to)?;
        }

        let lines = &self.lines;
        self.sorted = (0..lines.len())
            .sorted_by_key(|id| {
                let line = &lines[*id];
                (line.square_from, line.layer, line.sorted_from, line.sorted_to)
            })
            .collect();
        for (rank, id) in self.sorted.iter().enumerate() {
            self.lines[*id].sorted = rank;
        }

        let lines = &self.lines;
        self.crossing = (0..lines.len())
            .filter(|id| lines[*id].square_from != lines[*id].square_to)
            .sorted_by_key(|id| {
                let line = &lines[*id];
                (
                    line.square_to,
                    line.layer,
                    line.square_from,
                    line.sorted_to,
                    line.sorted_from,
                )
            })
            .collect();
        self.is_sorted = true;

        if self.long_lines_enabled {
            let grid = points.squares()?;
            for rank in 0..self.sorted.len() {
                let line = &self.lines[self.sorted[rank]];
                if !grid.is_adjacent(line.square_from, line.square_to) {
                    self.new_long(points, rank)?;
                }
            }
        }

        Ok(())
    }

    fn ensure_sorted(&self) -> anyhow::Result<()> {
        if self.is_sorted {
            Ok(())
        } else {
            Err(anyhow::anyhow!("lines not sorted yet"))
        }
    }

    fn line(&self, id: LineId) -> anyhow::Result<&Line> {
        self.lines
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("invalid line index {}", id))
    }

    fn sorted_line(&self, sorted: usize) -> anyhow::Result<&Line> {
        self.ensure_sorted()?;
        let id = self
            .sorted
            .get(sorted)
            .ok_or_else(|| anyhow::anyhow!("invalid sorted line index {}", sorted))?;
        self.line(*id)
    }

    fn new_long(&mut self, points: &PointTable, sorted: usize) -> anyhow::Result<()> {
        if self.long_lines.len() >= self.long_line_capacity {
            return Err(anyhow::anyhow!(
                "Too many long lines (capacity is {})",
                self.long_line_capacity
            ));
        }

        let line = self.sorted_line(sorted)?;
        let mut area = Area::around(
            points.longitude_sorted(line.sorted_from)?,
            points.latitude_sorted(line.sorted_from)?,
        );
        area.include(
            points.longitude_sorted(line.sorted_to)?,
            points.latitude_sorted(line.sorted_to)?,
        );

        let long_line = LongLine {
            line: sorted,
            layer: line.layer,
            area,
        };
        let _ = self.long_by_line.insert(sorted, self.long_lines.len());
        self.long_lines.push(long_line);

        Ok(())
    }

    /// Checks if the given shape point turns the given line into a long line.
    ///
    /// If so, the line is recorded as long line (or its bounding box is extended accordingly).
    pub fn test_long(
        &mut self,
        points: &PointTable,
        sorted: usize,
        longitude: i32,
        latitude: i32,
    ) -> anyhow::Result<()> {
        if !self.long_lines_enabled {
            return Ok(());
        }

        let line = self.sorted_line(sorted)?;
        let grid = points.squares()?;
        if !grid.is_long_line(line.square_from, line.square_to, longitude, latitude) {
            return Ok(());
        }

        match self.long_by_line.get(&sorted) {
            Some(index) => self.long_lines[*index].area.include(longitude, latitude),
            None => {
                self.new_long(points, sorted)?;
                if let Some(long_line) = self.long_lines.last_mut() {
                    long_line.area.include(longitude, latitude);
                }
            }
        }

        Ok(())
    }

    /// Returns the sorted rank of the line with the given natural id.
    pub fn find_sorted(&self, tlid: i32) -> anyhow::Result<Option<usize>> {
        self.ensure_sorted()?;
        Ok(self.by_tlid.get(&tlid).map(|id| self.lines[*id].sorted))
    }

    /// Returns the sorted rank of the given line.
    pub fn get_sorted(&self, id: LineId) -> anyhow::Result<usize> {
        self.ensure_sorted()?;
        Ok(self.line(id)?.sorted)
    }

    /// Returns the sorted "from" and "to" points of the line with the given sorted rank.
    pub fn get_points_sorted(&self, sorted: usize) -> anyhow::Result<(usize, usize)> {
        let line = self.sorted_line(sorted)?;
        Ok((line.sorted_from, line.sorted_to))
    }

    /// Returns the natural id of the line with the given sorted rank.
    pub fn get_id_sorted(&self, sorted: usize) -> anyhow::Result<i32> {
        Ok(self.sorted_line(sorted)?.tlid)
    }

    /// Returns the layer of the line with the given sorted rank.
    pub fn get_layer_sorted(&self, sorted: usize) -> anyhow::Result<u8> {
        Ok(self.sorted_line(sorted)?.layer)
    }

    /// Returns the square of the "from" point of the line with the given sorted rank.
    pub fn get_square_sorted(&self, sorted: usize) -> anyhow::Result<usize> {
        Ok(self.sorted_line(sorted)?.square_from)
    }

    /// Returns the position of the "from" point of the given line.
    pub fn get_position(&self, points: &PointTable, id: LineId) -> anyhow::Result<(i32, i32)> {
        let line = self.line(id)?;
        Ok((points.longitude(line.from)?, points.latitude(line.from)?))
    }

    /// Returns the position of the "from" point of the line with the given sorted rank.
    pub fn get_position_sorted(
        &self,
        points: &PointTable,
        sorted: usize,
    ) -> anyhow::Result<(i32, i32)> {
        let line = self.sorted_line(sorted)?;
        Ok((
            points.longitude_sorted(line.sorted_from)?,
            points.latitude_sorted(line.sorted_from)?,
        ))
    }

    fn by_point(&self, points: &PointTable) -> anyhow::Result<(Vec<i32>, Vec<i32>)> {
        let mut per_point = vec![Vec::new(); points.len()];
        for (point, lines) in self.by_point.iter() {
            let sorted = points.get_sorted(*point)?;
            per_point[sorted] = lines
                .iter()
                .map(|line| self.lines[*line].sorted as i32)
                .sorted()
                .collect();
        }

        let mut offsets = Vec::with_capacity(per_point.len());
        let mut lines = Vec::new();
        for point_lines in per_point {
            offsets.push(lines.len() as i32);
            lines.extend(point_lines);
            lines.push(0);
        }

        Ok((offsets, lines))
    }

    /// Writes the "line" section.
    ///
    /// Nothing is written if there are no lines.
    pub fn save(&self, db: &mut Database, points: &PointTable) -> anyhow::Result<()> {
        if self.lines.is_empty() {
            return Ok(());
        }
        self.ensure_sorted()?;
        log::info!("Saving {} lines...", self.lines.len());

        let square_count = points.squares()?.count()?;
        let (by_square1, by_layer1) = by_square_and_layer(
            self.sorted
                .iter()
                .map(|id| (self.lines[*id].square_from, self.lines[*id].layer)),
            square_count,
        )?;
        let (by_square2, by_layer2) = by_square_and_layer(
            self.crossing
                .iter()
                .map(|id| (self.lines[*id].square_to, self.lines[*id].layer)),
            square_count,
        )?;

        let data: Vec<LineRecord> = self
            .sorted
            .iter()
            .map(|id| LineRecord {
                from: self.lines[*id].sorted_from as i32,
                to: self.lines[*id].sorted_to as i32,
            })
            .collect();
        let index2: Vec<i32> = self
            .crossing
            .iter()
            .map(|id| self.lines[*id].sorted as i32)
            .collect();
        let (by_point1, by_point2) = self.by_point(points)?;

        let root = db.add_section(None, "line")?;
        let _ = db.add_records(root, "data", &data)?;
        let _ = db.add_records(root, "bysquare1", &by_square1)?;
        let _ = db.add_records(root, "bylayer1", &by_layer1)?;
        let _ = db.add_records(root, "bysquare2", &by_square2)?;
        let _ = db.add_records(root, "longlines", &self.long_lines)?;
        let _ = db.add_records(root, "bylayer2", &by_layer2)?;
        let _ = db.add_records(root, "index2", &index2)?;
        let _ = db.add_records(root, "bypoint1", &by_point1)?;
        let _ = db.add_records(root, "bypoint2", &by_point2)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Line table: {} lines, {} crossing, {} long lines",
            self.lines.len(),
            self.crossing.len(),
            self.long_lines.len()
        );
    }

    /// Discards all lines (the long line settings are kept).
    pub fn reset(&mut self) {
        *self = LineTable::with_long_lines(self.long_lines_enabled, self.long_line_capacity);
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::line::LineTable;
    use crate::point::PointTable;

    /// Creates lines in two squares 100_000 units apart (with an empty square in between).
    fn setup(lines: &mut LineTable) -> PointTable {
        let mut points = PointTable::new();
        let west_a = points.add(0, 0);
        let west_b = points.add(100, 100);
        let east_a = points.add(100_000, 0);
        let east_b = points.add(100_100, 100);

        let _ = lines.add(1, 2, west_a, west_b).unwrap();
        let _ = lines.add(2, 1, east_a, east_b).unwrap();
        let _ = lines.add(3, 1, west_b, west_a).unwrap();
        let _ = lines.add(4, 3, east_a, west_a).unwrap();

        points.sort().unwrap();
        points
    }

    #[test]
    fn lines_are_sorted_by_square_and_layer() {
        let mut lines = LineTable::new();
        let points = setup(&mut lines);
        assert_eq!(lines.find_sorted(1).is_err(), true);
        lines.sort(&points).unwrap();

        assert_eq!(lines.find_sorted(3).unwrap(), Some(0));
        assert_eq!(lines.find_sorted(1).unwrap(), Some(1));
        assert_eq!(lines.find_sorted(2).unwrap(), Some(2));
        assert_eq!(lines.find_sorted(4).unwrap(), Some(3));

        for rank in 0..lines.len() {
            let tlid = lines.get_id_sorted(rank).unwrap();
            assert_eq!(lines.find_sorted(tlid).unwrap(), Some(rank));
        }
        assert_eq!(lines.get_layer_sorted(3).unwrap(), 3);
        assert_eq!(lines.get_square_sorted(3).unwrap(), 1);
        assert_eq!(lines.get_position_sorted(&points, 2).unwrap(), (100_000, 0));
        assert_eq!(lines.get_position(&points, 0).unwrap(), (0, 0));
    }

    #[test]
    fn crossing_and_long_lines_are_detected() {
        let mut lines = LineTable::new();
        let points = setup(&mut lines);
        lines.sort(&points).unwrap();

        assert_eq!(lines.crossing_count(), 1);
        assert_eq!(lines.long_lines().len(), 1);
        assert_eq!(lines.long_lines()[0].line, 3);
        assert_eq!(lines.long_lines()[0].area.east, 100_000);

        // A shape point within the square of a short line changes nothing...
        lines.test_long(&points, 0, 50, 50).unwrap();
        assert_eq!(lines.long_lines().len(), 1);

        // ...and a known long line only gets its box extended.
        lines.test_long(&points, 3, 50_000, 0).unwrap();
        assert_eq!(lines.long_lines().len(), 1);
    }

    #[test]
    fn shape_points_outside_the_endpoint_squares_make_lines_long() {
        let mut lines = LineTable::new();
        let points = setup(&mut lines);
        lines.sort(&points).unwrap();

        lines.test_long(&points, 0, 100_050, 50).unwrap();
        assert_eq!(lines.long_lines().len(), 2);
        assert_eq!(lines.long_lines()[1].area.east, 100_050);
        assert_eq!(lines.long_lines()[1].area.west, 0);

        lines.test_long(&points, 0, 100_080, 80).unwrap();
        assert_eq!(lines.long_lines().len(), 2);
        assert_eq!(lines.long_lines()[1].area.east, 100_080);
    }

    #[test]
    fn long_lines_can_be_disabled_or_limited() {
        let mut lines = LineTable::with_long_lines(false, 0);
        let points = setup(&mut lines);
        lines.sort(&points).unwrap();
        assert_eq!(lines.long_lines().is_empty(), true);

        let mut lines = LineTable::with_long_lines(true, 0);
        let points = setup(&mut lines);
        assert_eq!(lines.sort(&points).is_err(), true);
    }

    #[test]
    fn invalid_layers_are_rejected() {
        let mut lines = LineTable::new();
        assert_eq!(lines.add(1, 0, 0, 1).is_err(), true);
    }

    #[test]
    fn lines_are_saved() {
        let mut lines = LineTable::new();
        let points = setup(&mut lines);
        lines.sort(&points).unwrap();

        let mut db = Database::in_memory(ByteOrder::Little);
        lines.save(&mut db, &points).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();

        let names: Vec<&str> = image.find("line").unwrap().children().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "data", "bysquare1", "bylayer1", "bysquare2", "longlines", "bylayer2", "index2",
                "bypoint1", "bypoint2"
            ]
        );

        // The first square holds layer 1 (line 0) and layer 2 (line 1)...
        let by_square1 = image.find("line/bysquare1").unwrap();
        assert_eq!(by_square1.i32_at(0), Some(0));
        assert_eq!(by_square1.i32_at(1), Some(2));
        let by_layer1 = image.find("line/bylayer1").unwrap();
        assert_eq!(by_layer1.i32_at(0), Some(0));
        assert_eq!(by_layer1.i32_at(1), Some(1));
        assert_eq!(by_layer1.i32_at(2), Some(2));

        // The only crossing line ends in the first square...
        let index2 = image.find("line/index2").unwrap();
        assert_eq!(index2.count(), 1);
        assert_eq!(index2.i32_at(0), Some(3));

        let long_lines = image.find("line/longlines").unwrap();
        assert_eq!(long_lines.size(), 24);
        assert_eq!(long_lines.data()[4], 3);

        // Point 0 (0, 0) is used by the lines 0, 1 and 3...
        let by_point1 = image.find("line/bypoint1").unwrap();
        let by_point2 = image.find("line/bypoint2").unwrap();
        assert_eq!(by_point1.count(), 4);
        assert_eq!(by_point1.i32_at(0), Some(0));
        assert_eq!(by_point2.i32_at(0), Some(0));
        assert_eq!(by_point2.i32_at(1), Some(1));
        assert_eq!(by_point2.i32_at(2), Some(3));
        assert_eq!(by_point2.i32_at(3), Some(0));
        assert_eq!(by_point1.i32_at(1), Some(4));
    }
}
