//! Provides the table of polygons (parks, lakes, airports...).
//!
//! Polygons are described in three steps, mirroring how census data describes them:
//!
//! 1. a **landmark** provides the category (cfcc) and the name,
//! 2. one or more **polygons** (identified by a cenid / polyid pair) belong to a landmark,
//! 3. each polygon is bounded by an unordered bag of **lines**, each tagged with the side of the
//!    line on which the polygon lies.
//!
//! When saving, the lines of each polygon are put into drawing order: each line has to start
//! where its predecessor ends, and the last one has to end where the first one starts. A line
//! with the polygon on its left side is drawn backwards, which is stored as the bitwise
//! complement of its sorted rank.
//!
//! # Example
//!
//! ```
//! # use buildmap::point::PointTable;
//! # use buildmap::line::LineTable;
//! # use buildmap::polygon::{PolygonTable, Side};
//! # use buildmap::db::{ByteOrder, Database};
//! let mut points = PointTable::new();
//! let mut lines = LineTable::new();
//! let corners = [points.add(0, 0), points.add(10, 0), points.add(5, 10)];
//! let _ = lines.add(1, 1, corners[0], corners[1]).unwrap();
//! let _ = lines.add(2, 1, corners[1], corners[2]).unwrap();
//! let _ = lines.add(3, 1, corners[0], corners[2]).unwrap();
//!
//! let mut polygons = PolygonTable::new();
//! let _ = polygons.add_landmark(1, 7, 0);
//! let _ = polygons.add(1, 0, 42).unwrap();
//! let _ = polygons.add_line(0, 42, 1, Side::Right).unwrap();
//! let _ = polygons.add_line(0, 42, 2, Side::Right).unwrap();
//! let _ = polygons.add_line(0, 42, 3, Side::Left).unwrap();
//!
//! points.sort().unwrap();
//! lines.sort(&points).unwrap();
//! polygons.sort(&lines).unwrap();
//!
//! let mut db = Database::in_memory(ByteOrder::Little);
//! polygons.save(&mut db, &lines, &points).unwrap();
//! assert_eq!(polygons.len(), 1);
//! ```
use std::fmt::Write;

use fnv::FnvHashMap;
use itertools::Itertools;

use crate::db::{Area, Database, PayloadWriter, Record};
use crate::dictionary::StringId;
use crate::line::LineTable;
use crate::point::PointTable;

/// Contains the maximal number of squares recorded per polygon.
pub const MAX_SQUARES: usize = 4;

/// Determines on which side of a line the polygon lies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    /// The polygon is on the left side, so the line is drawn from its "to" point.
    Left,
    /// The polygon is on the right side, so the line is drawn from its "from" point.
    Right,
}

impl Side {
    fn name(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

struct Landmark {
    cfcc: u8,
    name: StringId,
}

struct Polygon {
    name: StringId,
    polyid: i32,
    cfcc: u8,
    squares: Vec<usize>,
    count: usize,
    sorted: Option<usize>,
}

struct PolygonLine {
    polygon: Option<usize>,
    tlid: i32,
    side: Side,
    line: usize,
    square: usize,
}

struct PolygonHead {
    first: u16,
    count: u16,
    name: StringId,
    cfcc: u8,
    area: Area,
}

impl Record for PolygonHead {
    const SIZE: usize = 24;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(self.first);
        out.put_u16(self.count);
        out.put_u16(self.name);
        out.put_u8(self.cfcc);
        out.pad(1);
        out.put_i32(self.area.north);
        out.put_i32(self.area.west);
        out.put_i32(self.area.east);
        out.put_i32(self.area.south);
    }
}

/// Contains all landmarks, polygons and polygon lines of a build.
#[derive(Default)]
pub struct PolygonTable {
    landmarks: Vec<Landmark>,
    landmark_index: FnvHashMap<i32, usize>,
    polygons: Vec<Polygon>,
    polygon_index: FnvHashMap<(StringId, i32), usize>,
    lines: Vec<PolygonLine>,
    line_index: FnvHashMap<i32, usize>,
    sorted_polygons: Vec<usize>,
    sorted_lines: Vec<usize>,
    strict: bool,
    is_sorted: bool,
}

impl PolygonTable {
    /// Creates an empty table which tolerates disconnected polygon lines.
    pub fn new() -> Self {
        PolygonTable::default()
    }

    /// Creates an empty table which fails on disconnected polygon lines if `strict` is set.
    pub fn with_strict(strict: bool) -> Self {
        PolygonTable {
            strict,
            ..PolygonTable::default()
        }
    }

    /// Registers a landmark, which provides the category and name of its polygons.
    pub fn add_landmark(&mut self, id: i32, cfcc: u8, name: StringId) -> usize {
        let index = self.landmarks.len();
        self.landmarks.push(Landmark { cfcc, name });
        let _ = self.landmark_index.insert(id, index);

        index
    }

    /// Adds a polygon to the given landmark.
    ///
    /// Returns `None` if the landmark is unknown, so that orphaned polygons can be skipped.
    pub fn add(&mut self, landmark: i32, cenid: StringId, polyid: i32) -> Option<usize> {
        let landmark = &self.landmarks[*self.landmark_index.get(&landmark)?];

        let index = self.polygons.len();
        self.polygons.push(Polygon {
            name: landmark.name,
            polyid,
            cfcc: landmark.cfcc,
            squares: Vec::with_capacity(MAX_SQUARES),
            count: 0,
            sorted: None,
        });
        let _ = self.polygon_index.insert((cenid, polyid), index);

        Some(index)
    }

    /// Adds a boundary line (given by its natural id) to a polygon.
    ///
    /// Returns `None` if the polygon is unknown.
    pub fn add_line(
        &mut self,
        cenid: StringId,
        polyid: i32,
        tlid: i32,
        side: Side,
    ) -> Option<usize> {
        let polygon = *self.polygon_index.get(&(cenid, polyid))?;

        let index = self.lines.len();
        self.lines.push(PolygonLine {
            polygon: Some(polygon),
            tlid,
            side,
            line: 0,
            square: 0,
        });
        let _ = self.line_index.insert(tlid, index);
        self.polygons[polygon].count += 1;

        Some(index)
    }

    /// Returns the category of the polygon using the given line (if any).
    pub fn use_line(&self, tlid: i32) -> Option<u8> {
        let line = &self.lines[*self.line_index.get(&tlid)?];
        line.polygon.map(|polygon| self.polygons[polygon].cfcc)
    }

    /// Returns the number of polygons (after sorting: the number of non degenerated ones).
    pub fn len(&self) -> usize {
        if self.is_sorted {
            self.sorted_polygons.len()
        } else {
            self.polygons.len()
        }
    }

    /// Determines if there are no polygons at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of polygon lines (after sorting: the number of used ones).
    pub fn line_count(&self) -> usize {
        if self.is_sorted {
            self.sorted_lines.len()
        } else {
            self.lines.len()
        }
    }

    /// Sorts the polygons by square and category and their lines by polygon and square.
    ///
    /// Lines of zero length are dropped. Polygons which are left with one line or less are
    /// dropped as well. The lines must have been sorted before.
    ///
    /// # Errors
    ///
    /// Fails if a polygon line refers to an unknown line.
    pub fn sort(&mut self, lines: &LineTable) -> anyhow::Result<()> {
        if self.is_sorted {
            return Ok(());
        }
        if self.lines.is_empty() || self.polygons.is_empty() {
            self.polygons.clear();
            self.lines.clear();
            self.is_sorted = true;
            return Ok(());
        }

        log::info!("Retrieving lines and squares...");
        for line in self.lines.iter_mut() {
            line.line = lines.find_sorted(line.tlid)?.ok_or_else(|| {
                anyhow::anyhow!("cannot find any line with TLID = {}", line.tlid)
            })?;

            let (from, to) = lines.get_points_sorted(line.line)?;
            if from == to {
                if let Some(polygon) = line.polygon.take() {
                    self.polygons[polygon].count -= 1;
                }
                continue;
            }

            line.square = lines.get_square_sorted(line.line)?;
            if let Some(polygon) = line.polygon {
                let squares = &mut self.polygons[polygon].squares;
                if !squares.contains(&line.square) && squares.len() < MAX_SQUARES {
                    squares.push(line.square);
                }
            }
        }

        log::info!("Sorting {} polygons...", self.polygons.len());
        for polygon in self.polygons.iter_mut() {
            polygon.squares.sort_unstable();
        }
        let polygons = &self.polygons;
        self.sorted_polygons = (0..polygons.len())
            .filter(|index| polygons[*index].count > 1)
            .sorted_by_key(|index| {
                let polygon = &polygons[*index];
                (
                    polygon.squares.first().copied(),
                    polygon.cfcc,
                    polygon.squares.get(1..).map(|rest| rest.to_vec()),
                )
            })
            .collect();
        for (rank, index) in self.sorted_polygons.iter().enumerate() {
            self.polygons[*index].sorted = Some(rank);
        }

        log::info!("Sorting polygon lines...");
        let polygons = &self.polygons;
        let lines = &self.lines;
        self.sorted_lines = (0..lines.len())
            .filter_map(|index| {
                let line = &lines[index];
                let rank = polygons[line.polygon?].sorted?;
                Some((rank, line.square, index))
            })
            .sorted()
            .map(|(_, _, index)| index)
            .collect();
        self.is_sorted = true;

        Ok(())
    }

    /// Returns the point where the given line starts in drawing order and where it ends.
    fn directed(lines: &LineTable, line: &PolygonLine) -> anyhow::Result<(usize, usize)> {
        let (from, to) = lines.get_points_sorted(line.line)?;
        Ok(match line.side {
            Side::Left => (to, from),
            Side::Right => (from, to),
        })
    }

    fn encode(line: &PolygonLine) -> i32 {
        match line.side {
            Side::Left => !(line.line as i32),
            Side::Right => line.line as i32,
        }
    }

    /// Logs all lines of a polygon which cannot be drawn, marking the offending one.
    fn explain(
        &self,
        lines: &LineTable,
        points: &PointTable,
        polygon_lines: &[usize],
        problem: usize,
        text: &str,
    ) {
        let mut description = String::new();
        let _ = writeln!(
            description,
            "{:<6} {:>11} {:>6}      {:<24} {:<24}",
            "SIDE", "TLID", "POLYID", "FROM", "TO"
        );
        for index in polygon_lines {
            let line = &self.lines[*index];
            let polyid = line
                .polygon
                .map(|polygon| self.polygons[polygon].polyid)
                .unwrap_or_default();
            let Ok((from, to)) = lines.get_points_sorted(line.line) else {
                continue;
            };
            let position = |point: usize| {
                (
                    points.longitude_sorted(point).unwrap_or_default(),
                    points.latitude_sorted(point).unwrap_or_default(),
                )
            };
            let (from, to) = (position(from), position(to));
            let _ = write!(
                description,
                "{:<6} {:>11} {:>6} {:>12} {:>11} {:>12} {:>11}",
                line.side.name(),
                line.tlid,
                polyid,
                from.0,
                from.1,
                to.0,
                to.1
            );
            if *index == problem {
                let _ = write!(description, "  <-- {}", text);
            }
            description.push('\n');
        }

        log::error!(
            "{} at line {}:\n{}",
            text,
            self.lines[problem].tlid,
            description
        );
    }

    /// Puts the given lines of one polygon into drawing order.
    ///
    /// Returns the ordered lines and the number of lines which actually form the polygon.
    /// Lines following this count are a disconnected tail which isn't drawn.
    fn drawing_order(
        &self,
        lines: &LineTable,
        points: &PointTable,
        polygon_lines: &[usize],
    ) -> anyhow::Result<(Vec<usize>, usize)> {
        let mut by_start: FnvHashMap<usize, Vec<usize>> = FnvHashMap::default();
        let mut ends = Vec::with_capacity(polygon_lines.len());
        for (position, index) in polygon_lines.iter().enumerate() {
            let (start, end) = Self::directed(lines, &self.lines[*index])?;
            by_start.entry(start).or_default().push(position);
            ends.push((start, end));
        }

        let mut used = vec![false; polygon_lines.len()];
        let mut order = Vec::with_capacity(polygon_lines.len());
        let start_point = ends[0].0;
        let mut next_point = ends[0].1;
        used[0] = true;
        order.push(polygon_lines[0]);

        while order.len() < polygon_lines.len() {
            let candidate = by_start.get(&next_point).and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .find(|position| !used[*position])
            });

            match candidate {
                Some(position) => {
                    used[position] = true;
                    order.push(polygon_lines[position]);
                    next_point = ends[position].1;
                }
                None if next_point != start_point => {
                    let problem = order.last().copied().unwrap_or(polygon_lines[0]);
                    self.explain(
                        lines,
                        points,
                        polygon_lines,
                        problem,
                        "cannot find the next line",
                    );
                    return Err(anyhow::anyhow!(
                        "cannot find the next line at line {}",
                        self.lines[problem].tlid
                    ));
                }
                None => {
                    let problem = order.last().copied().unwrap_or(polygon_lines[0]);
                    if self.strict {
                        self.explain(
                            lines,
                            points,
                            polygon_lines,
                            problem,
                            "disconnected polygon lines",
                        );
                        return Err(anyhow::anyhow!(
                            "disconnected polygon lines after line {}",
                            self.lines[problem].tlid
                        ));
                    }

                    log::warn!(
                        "Skipping {} disconnected polygon lines after line {}",
                        polygon_lines.len() - order.len(),
                        self.lines[problem].tlid
                    );
                    let drawn = order.len();
                    order.extend(
                        (0..polygon_lines.len())
                            .filter(|position| !used[*position])
                            .map(|position| polygon_lines[position]),
                    );
                    return Ok((order, drawn));
                }
            }
        }

        if next_point != start_point {
            let problem = order.last().copied().unwrap_or(polygon_lines[0]);
            self.explain(lines, points, &order, problem, "open polygon");
            return Err(anyhow::anyhow!(
                "open polygon at line {}",
                self.lines[problem].tlid
            ));
        }

        let drawn = order.len();
        Ok((order, drawn))
    }

    /// Writes the "polygon" (empty, legacy) and "polygons" sections.
    ///
    /// # Errors
    ///
    /// Fails if the lines of a polygon don't form a closed loop (see [PolygonTable::with_strict]
    /// for disconnected lines) or if there are too many polygon lines.
    pub fn save(
        &self,
        db: &mut Database,
        lines: &LineTable,
        points: &PointTable,
    ) -> anyhow::Result<()> {
        if !self.is_sorted {
            return Err(anyhow::anyhow!("polygons not sorted yet"));
        }
        if self.sorted_lines.len() > 0xffff {
            return Err(anyhow::anyhow!("too many polygon lines"));
        }
        log::info!("Saving {} polygons...", self.sorted_polygons.len());

        let mut heads = Vec::with_capacity(self.sorted_polygons.len());
        let mut data = Vec::with_capacity(self.sorted_lines.len());
        let mut last_square = None;

        for (rank, group) in &self.sorted_lines.iter().chunk_by(|index| {
            self.lines[**index]
                .polygon
                .and_then(|polygon| self.polygons[polygon].sorted)
        }) {
            let rank = rank.ok_or_else(|| anyhow::anyhow!("invalid line was not removed"))?;
            if rank != heads.len() {
                return Err(anyhow::anyhow!(
                    "abnormal polygon order: {} following {}",
                    rank,
                    heads.len()
                ));
            }
            let polygon = &self.polygons[self.sorted_polygons[rank]];
            let polygon_lines: Vec<usize> = group.copied().collect();
            if polygon_lines.len() <= 1 {
                return Err(anyhow::anyhow!("empty polygon"));
            }

            let square = polygon.squares.first().copied();
            if last_square > square {
                return Err(anyhow::anyhow!(
                    "abnormal square order: {:?} following {:?}",
                    square,
                    last_square
                ));
            }
            last_square = square;

            let (order, drawn) = self.drawing_order(lines, points, &polygon_lines)?;
            let mut area: Option<Area> = None;
            for index in &order[..drawn] {
                let (from, to) = lines.get_points_sorted(self.lines[*index].line)?;
                for point in [from, to] {
                    let longitude = points.longitude_sorted(point)?;
                    let latitude = points.latitude_sorted(point)?;
                    match area.as_mut() {
                        Some(area) => area.include(longitude, latitude),
                        None => area = Some(Area::around(longitude, latitude)),
                    }
                }
            }

            heads.push(PolygonHead {
                first: data.len() as u16,
                count: drawn as u16,
                name: polygon.name,
                cfcc: polygon.cfcc,
                area: area.unwrap_or_default(),
            });
            data.extend(order.iter().map(|index| Self::encode(&self.lines[*index])));
        }

        let legacy = db.add_section(None, "polygon")?;
        let _ = db.add_records::<PolygonHead>(legacy, "head", &[])?;
        let _ = db.add_records::<i32>(legacy, "point", &[])?;

        let root = db.add_section(None, "polygons")?;
        let _ = db.add_records(root, "head", &heads)?;
        let _ = db.add_records(root, "line", &data)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Polygon table: {} polygons, {} lines",
            self.len(),
            self.line_count()
        );
    }

    /// Discards all polygons (the strict setting is kept).
    pub fn reset(&mut self) {
        *self = PolygonTable::with_strict(self.strict);
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::line::LineTable;
    use crate::point::PointTable;
    use crate::polygon::{PolygonTable, Side};

    /// Adds a closed square (tlids 1..=4) and returns the tables ready to be sorted.
    fn square(polygons: &mut PolygonTable) -> (PointTable, LineTable) {
        let mut points = PointTable::new();
        let mut lines = LineTable::new();
        let p0 = points.add(0, 0);
        let p1 = points.add(10, 0);
        let p2 = points.add(10, 10);
        let p3 = points.add(0, 10);
        let _ = lines.add(1, 1, p0, p1).unwrap();
        let _ = lines.add(2, 1, p1, p2).unwrap();
        let _ = lines.add(3, 1, p3, p2).unwrap();
        let _ = lines.add(4, 1, p0, p3).unwrap();

        let _ = polygons.add_landmark(100, 5, 1);
        let _ = polygons.add(100, 0, 1).unwrap();
        let _ = polygons.add_line(0, 1, 1, Side::Right).unwrap();
        let _ = polygons.add_line(0, 1, 3, Side::Left).unwrap();
        let _ = polygons.add_line(0, 1, 2, Side::Right).unwrap();
        let _ = polygons.add_line(0, 1, 4, Side::Left).unwrap();

        (points, lines)
    }

    fn build(polygons: &mut PolygonTable, points: &mut PointTable, lines: &mut LineTable) {
        points.sort().unwrap();
        lines.sort(points).unwrap();
        polygons.sort(lines).unwrap();
    }

    #[test]
    fn a_closed_square_is_drawn_in_order() {
        let mut polygons = PolygonTable::new();
        let (mut points, mut lines) = square(&mut polygons);
        build(&mut polygons, &mut points, &mut lines);

        let mut db = Database::in_memory(ByteOrder::Little);
        polygons.save(&mut db, &lines, &points).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();

        let head = image.find("polygons/head").unwrap();
        assert_eq!(head.count(), 1);
        assert_eq!(head.u16_at(0), Some(0));
        assert_eq!(head.u16_at(1), Some(4));
        assert_eq!(head.u16_at(2), Some(1));
        // north, west, east, south...
        assert_eq!(head.i32_at(2), Some(10));
        assert_eq!(head.i32_at(3), Some(0));
        assert_eq!(head.i32_at(4), Some(10));
        assert_eq!(head.i32_at(5), Some(0));

        // Walking the lines in drawing order yields a closed loop...
        let line = image.find("polygons/line").unwrap();
        assert_eq!(line.count(), 4);
        let mut current = None;
        let mut start = None;
        for index in 0..4 {
            let encoded = line.i32_at(index).unwrap();
            let (from, to) = if encoded < 0 {
                let (from, to) = lines.get_points_sorted(!encoded as usize).unwrap();
                (to, from)
            } else {
                lines.get_points_sorted(encoded as usize).unwrap()
            };
            if let Some(current) = current {
                assert_eq!(from, current);
            } else {
                start = Some(from);
            }
            current = Some(to);
        }
        assert_eq!(current, start);
    }

    #[test]
    fn open_polygons_are_rejected() {
        let mut polygons = PolygonTable::new();
        let (mut points, mut lines) = square(&mut polygons);
        let extra = points.add(20, 20);
        let p2 = points.add(10, 10);
        let _ = lines.add(5, 1, p2, extra).unwrap();
        let _ = polygons.add(100, 0, 2).unwrap();
        let _ = polygons.add_line(0, 2, 1, Side::Right).unwrap();
        let _ = polygons.add_line(0, 2, 2, Side::Right).unwrap();
        let _ = polygons.add_line(0, 2, 5, Side::Right).unwrap();
        build(&mut polygons, &mut points, &mut lines);

        let mut db = Database::in_memory(ByteOrder::Little);
        assert_eq!(polygons.save(&mut db, &lines, &points).is_err(), true);
    }

    fn with_disconnected_tail(polygons: &mut PolygonTable) -> (PointTable, LineTable) {
        let (mut points, mut lines) = square(polygons);
        let a = points.add(100, 100);
        let b = points.add(110, 100);
        let c = points.add(105, 110);
        let _ = lines.add(11, 1, a, b).unwrap();
        let _ = lines.add(12, 1, b, c).unwrap();
        let _ = lines.add(13, 1, c, a).unwrap();
        for tlid in 11..=13 {
            let _ = polygons.add_line(0, 1, tlid, Side::Right).unwrap();
        }

        build(polygons, &mut points, &mut lines);
        (points, lines)
    }

    #[test]
    fn disconnected_tails_are_skipped() {
        let mut polygons = PolygonTable::new();
        let (points, lines) = with_disconnected_tail(&mut polygons);

        let mut db = Database::in_memory(ByteOrder::Little);
        polygons.save(&mut db, &lines, &points).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();
        assert_eq!(image.find("polygons/head").unwrap().u16_at(1), Some(4));
        assert_eq!(image.find("polygons/line").unwrap().count(), 7);
    }

    #[test]
    fn disconnected_tails_fail_in_strict_mode() {
        let mut polygons = PolygonTable::with_strict(true);
        let (points, lines) = with_disconnected_tail(&mut polygons);

        let mut db = Database::in_memory(ByteOrder::Little);
        assert_eq!(polygons.save(&mut db, &lines, &points).is_err(), true);
    }

    #[test]
    fn degenerated_polygons_are_dropped() {
        let mut polygons = PolygonTable::new();
        let (mut points, mut lines) = square(&mut polygons);
        let p0 = points.add(0, 0);
        let _ = lines.add(20, 1, p0, p0).unwrap();
        let _ = polygons.add(100, 0, 3).unwrap();
        let _ = polygons.add_line(0, 3, 20, Side::Right).unwrap();
        let _ = polygons.add_line(0, 3, 1, Side::Right).unwrap();
        assert_eq!(polygons.len(), 2);

        build(&mut polygons, &mut points, &mut lines);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons.line_count(), 4);
    }

    #[test]
    fn orphans_are_reported() {
        let mut polygons = PolygonTable::new();
        assert_eq!(polygons.add(1, 0, 1), None);
        assert_eq!(polygons.add_line(0, 1, 1, Side::Left), None);

        let _ = polygons.add_landmark(1, 9, 0);
        let _ = polygons.add(1, 0, 1).unwrap();
        let _ = polygons.add_line(0, 1, 7, Side::Left).unwrap();
        assert_eq!(polygons.use_line(7), Some(9));
        assert_eq!(polygons.use_line(8), None);
    }

    #[test]
    fn unknown_lines_are_fatal() {
        let mut polygons = PolygonTable::new();
        let (mut points, mut lines) = square(&mut polygons);
        let _ = polygons.add_line(0, 1, 99, Side::Left).unwrap();
        points.sort().unwrap();
        lines.sort(&points).unwrap();
        assert_eq!(polygons.sort(&lines).is_err(), true);
    }
}
