//! Provides the table of all points (line endpoints and places).
//!
//! Points are deduplicated by their exact position. Once all points are known, [PointTable::sort]
//! creates the [SquareGrid] for their bounding box, assigns each point to its square and orders
//! all points by square and position. Within the database, a point is stored relative to the
//! south west corner of its square using two 16 bit values.
//!
//! # Example
//!
//! ```
//! # use buildmap::point::PointTable;
//! let mut points = PointTable::new();
//! let a = points.add(10, 20);
//! assert_eq!(points.add(10, 20), a);
//! let b = points.add(30, 40);
//! assert_eq!(points.len(), 2);
//!
//! points.sort().unwrap();
//! assert_eq!(points.get_sorted(a).unwrap(), 0);
//! assert_eq!(points.get_sorted(b).unwrap(), 1);
//! ```
use fnv::FnvHashMap;

use crate::bucket::Slice;
use crate::db::{Area, Database, PayloadWriter, Record};
use crate::square::SquareGrid;

/// Represents the index of a point in insertion order.
pub type PointId = usize;

#[derive(Clone, Debug)]
struct Point {
    longitude: i32,
    latitude: i32,
    square: usize,
    sorted: usize,
}

struct PointRecord {
    longitude: u16,
    latitude: u16,
}

impl Record for PointRecord {
    const SIZE: usize = 4;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(self.longitude);
        out.put_u16(self.latitude);
    }
}

/// Contains all points of a build.
#[derive(Default)]
pub struct PointTable {
    points: Vec<Point>,
    by_position: FnvHashMap<(i32, i32), PointId>,
    edges: Option<Area>,
    first_longitude: Option<i32>,
    warned_meridian: bool,
    sorted: Vec<PointId>,
    is_sorted: bool,
    grid: Option<SquareGrid>,
}

impl PointTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        PointTable::default()
    }

    /// Adds a point and returns its id.
    ///
    /// Adding the same position twice yields the same id.
    pub fn add(&mut self, longitude: i32, latitude: i32) -> PointId {
        if let Some(id) = self.by_position.get(&(longitude, latitude)) {
            return *id;
        }

        self.check_meridian(longitude);
        match self.edges.as_mut() {
            Some(edges) => edges.include(longitude, latitude),
            None => self.edges = Some(Area::around(longitude, latitude)),
        }

        let id = self.points.len();
        self.points.push(Point {
            longitude,
            latitude,
            square: 0,
            sorted: 0,
        });
        let _ = self.by_position.insert((longitude, latitude), id);

        id
    }

    fn check_meridian(&mut self, longitude: i32) {
        let first = *self.first_longitude.get_or_insert(longitude);
        let same_side = (first < 0) == (longitude < 0);
        let distance = (first as i64 - longitude as i64).abs();
        if !same_side && distance >= 180_000_000 && !self.warned_meridian {
            log::warn!("The points wrap around the 180th meridian!");
            self.warned_meridian = true;
        }
    }

    /// Returns the number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Determines if there are no points at all.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the bounding box of all points.
    pub fn edges(&self) -> Option<Area> {
        self.edges
    }

    fn point(&self, id: PointId) -> anyhow::Result<&Point> {
        self.points
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("invalid point index {}", id))
    }

    /// Returns the longitude of the given point.
    pub fn longitude(&self, id: PointId) -> anyhow::Result<i32> {
        Ok(self.point(id)?.longitude)
    }

    /// Returns the latitude of the given point.
    pub fn latitude(&self, id: PointId) -> anyhow::Result<i32> {
        Ok(self.point(id)?.latitude)
    }

    /// Computes the square grid and sorts all points by square and position.
    ///
    /// Sorting twice has no effect.
    ///
    /// # Errors
    ///
    /// Fails if a point cannot be placed into the grid (which would indicate an inconsistent
    /// bounding box) or if there are more squares than a 16 bit square number can address.
    pub fn sort(&mut self) -> anyhow::Result<()> {
        if self.is_sorted {
            return Ok(());
        }

        if let Some(edges) = self.edges {
            log::info!("Generating squares...");
            let mut grid = SquareGrid::new(edges);
            let mut cells = Vec::with_capacity(self.points.len());
            for point in self.points.iter() {
                cells.push(grid.add(point.longitude, point.latitude)?);
            }
            grid.sort();
            if grid.count()? > u16::MAX as usize {
                return Err(anyhow::anyhow!("too many squares ({})", grid.count()?));
            }

            for (point, cell) in self.points.iter_mut().zip(cells) {
                point.square = grid
                    .get_sorted(cell)?
                    .ok_or_else(|| anyhow::anyhow!("point in an empty square {}", cell))?;
            }
            self.grid = Some(grid);
        }

        log::info!("Sorting {} points...", self.points.len());
        let points = &self.points;
        let mut sorted: Vec<PointId> = (0..points.len()).collect();
        sorted.sort_by_key(|id| {
            let point = &points[*id];
            (point.square, point.longitude, point.latitude)
        });
        for (rank, id) in sorted.iter().enumerate() {
            self.points[*id].sorted = rank;
        }
        self.sorted = sorted;
        self.is_sorted = true;

        Ok(())
    }

    fn ensure_sorted(&self) -> anyhow::Result<()> {
        if self.is_sorted {
            Ok(())
        } else {
            Err(anyhow::anyhow!("points have not been sorted yet"))
        }
    }

    /// Returns the square grid which is available once the points are sorted.
    pub fn squares(&self) -> anyhow::Result<&SquareGrid> {
        self.ensure_sorted()?;
        self.grid
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no squares available (there are no points)"))
    }

    /// Returns the sorted rank of the given point.
    pub fn get_sorted(&self, id: PointId) -> anyhow::Result<usize> {
        self.ensure_sorted()?;
        Ok(self.point(id)?.sorted)
    }

    /// Returns the square of the given point.
    pub fn get_square(&self, id: PointId) -> anyhow::Result<usize> {
        self.ensure_sorted()?;
        Ok(self.point(id)?.square)
    }

    fn sorted_point(&self, sorted: usize) -> anyhow::Result<&Point> {
        self.ensure_sorted()?;
        let id = self
            .sorted
            .get(sorted)
            .ok_or_else(|| anyhow::anyhow!("invalid sorted point index {}", sorted))?;
        self.point(*id)
    }

    /// Returns the square of the point with the given sorted rank.
    pub fn get_square_sorted(&self, sorted: usize) -> anyhow::Result<usize> {
        Ok(self.sorted_point(sorted)?.square)
    }

    /// Returns the longitude of the point with the given sorted rank.
    pub fn longitude_sorted(&self, sorted: usize) -> anyhow::Result<i32> {
        Ok(self.sorted_point(sorted)?.longitude)
    }

    /// Returns the latitude of the point with the given sorted rank.
    pub fn latitude_sorted(&self, sorted: usize) -> anyhow::Result<i32> {
        Ok(self.sorted_point(sorted)?.latitude)
    }

    /// Writes the "point" section.
    ///
    /// Nothing is written if there are no points.
    pub fn save(&self, db: &mut Database) -> anyhow::Result<()> {
        if self.points.is_empty() {
            return Ok(());
        }

        let grid = self.squares()?;
        log::info!("Saving {} points...", self.points.len());

        let mut data = Vec::with_capacity(self.points.len());
        let mut by_square = vec![Slice::default(); grid.count()?];
        let mut last_square = None;
        let mut reference = (0, 0);
        for (rank, id) in self.sorted.iter().enumerate() {
            let point = &self.points[*id];
            if last_square != Some(point.square) {
                if point.square != last_square.map(|square| square + 1).unwrap_or(0) {
                    return Err(anyhow::anyhow!("decreasing square order in point table"));
                }
                last_square = Some(point.square);
                by_square[point.square].first = rank as i32;
                reference = grid.reference_sorted(point.square)?;
            }
            by_square[point.square].count += 1;

            data.push(PointRecord {
                longitude: (point.longitude - reference.0) as u16,
                latitude: (point.latitude - reference.1) as u16,
            });
        }

        let root = db.add_section(None, "point")?;
        let _ = db.add_records(root, "data", &data)?;
        let _ = db.add_records(root, "bysquare", &by_square)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Point table: {} points, {} used",
            self.points.len(),
            crate::fmt::format_size(self.points.len() * PointRecord::SIZE)
        );
    }

    /// Discards all points.
    pub fn reset(&mut self) {
        *self = PointTable::default();
    }
}
