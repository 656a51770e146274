//! Partitions the area covered by all points into a grid of squares.
//!
//! Squares are the spatial buckets used by the viewer to quickly find everything near a
//! position. The grid is laid out column by column: cell `k` is at column `k / count_latitude`
//! and row `k % count_latitude`. Each cell spans roughly [SquareGrid::STEP] units in both
//! directions. The last cell of each column and the whole last column are snapped to the true
//! outer edges, so that rounding never leaves a gap.
//!
//! Once all points are registered, [SquareGrid::sort] drops all empty cells and numbers the
//! remaining ones densely. This dense rank is what all other tables store as "square".
//!
//! # Example
//!
//! ```
//! # use buildmap::db::Area;
//! # use buildmap::square::SquareGrid;
//! let mut grid = SquareGrid::new(Area { east: 100_000, north: 10_000, west: 0, south: 0 });
//! assert_eq!(grid.count_longitude(), 4);
//! assert_eq!(grid.count_latitude(), 1);
//!
//! let west = grid.add(10, 10).unwrap();
//! let east = grid.add(99_000, 10).unwrap();
//! grid.sort();
//!
//! assert_eq!(grid.get_sorted(west).unwrap(), Some(0));
//! assert_eq!(grid.get_sorted(east).unwrap(), Some(1));
//! assert_eq!(grid.count().unwrap(), 2);
//! ```
use crate::db::{Area, Database, PayloadWriter, Record};

/// Represents a single cell of the grid.
#[derive(Clone, Debug, Default)]
pub struct Square {
    /// The covered area (all edges are inclusive).
    pub area: Area,
    /// The number of points within this square.
    pub count: usize,
    sorted: Option<usize>,
}

struct GlobalRecord<'a>(&'a SquareGrid);

impl Record for GlobalRecord<'_> {
    const SIZE: usize = Area::SIZE + 5 * 4;

    fn write(&self, out: &mut PayloadWriter) {
        let grid = self.0;
        grid.edges.write(out);
        out.put_i32(grid.step_longitude);
        out.put_i32(grid.step_latitude);
        out.put_i32(grid.count_longitude as i32);
        out.put_i32(grid.count_latitude as i32);
        out.put_i32(grid.sorted.len() as i32);
    }
}

struct SquareRecord {
    area: Area,
    position: i32,
    count: i32,
}

impl Record for SquareRecord {
    const SIZE: usize = Area::SIZE + 2 * 4;

    fn write(&self, out: &mut PayloadWriter) {
        self.area.write(out);
        out.put_i32(self.position);
        out.put_i32(self.count);
    }
}

/// Contains the grid of squares of a build.
pub struct SquareGrid {
    edges: Area,
    step_longitude: i32,
    step_latitude: i32,
    count_longitude: usize,
    count_latitude: usize,
    squares: Vec<Square>,
    sorted: Vec<usize>,
    is_sorted: bool,
}

/// Computes the number of cells and the step size along one axis.
fn partition(min: i32, max: i32) -> (usize, i32) {
    let span = (max as i64 - min as i64).max(0);
    let count = ((span + SquareGrid::STEP as i64 - 1) / SquareGrid::STEP as i64).max(1);
    let step = (span / count).max(1);

    (count as usize, step as i32)
}

impl SquareGrid {
    /// Contains the nominal size of a square along each axis.
    pub const STEP: i32 = 0x7ff0;

    /// Creates the grid for the given bounding box.
    ///
    /// A degenerated box (e.g. a single point) results in a single square.
    pub fn new(edges: Area) -> Self {
        let (count_longitude, step_longitude) = partition(edges.west, edges.east);
        let (count_latitude, step_latitude) = partition(edges.south, edges.north);

        let mut squares = Vec::with_capacity(count_longitude * count_latitude);
        for x in 0..count_longitude {
            let west = edges.west + x as i32 * step_longitude;
            let east = if x + 1 == count_longitude {
                edges.east
            } else {
                west + step_longitude
            };

            for y in 0..count_latitude {
                let south = edges.south + y as i32 * step_latitude;
                let north = if y + 1 == count_latitude {
                    edges.north
                } else {
                    south + step_latitude
                };

                squares.push(Square {
                    area: Area {
                        east,
                        north,
                        west,
                        south,
                    },
                    count: 0,
                    sorted: None,
                });
            }
        }

        SquareGrid {
            edges,
            step_longitude,
            step_latitude,
            count_longitude,
            count_latitude,
            squares,
            sorted: Vec::new(),
            is_sorted: false,
        }
    }

    /// Returns the bounding box of the whole grid.
    pub fn edges(&self) -> Area {
        self.edges
    }

    /// Returns the number of columns.
    pub fn count_longitude(&self) -> usize {
        self.count_longitude
    }

    /// Returns the number of rows.
    pub fn count_latitude(&self) -> usize {
        self.count_latitude
    }

    /// Returns the cell with the given (unsorted) index.
    pub fn square(&self, cell: usize) -> Option<&Square> {
        self.squares.get(cell)
    }

    fn contains(&self, cell: usize, longitude: i32, latitude: i32) -> bool {
        let area = &self.squares[cell].area;
        area.west <= longitude
            && longitude <= area.east
            && area.south <= latitude
            && latitude <= area.north
    }

    /// Determines the cell which contains the given position.
    ///
    /// The cell is computed directly and then corrected by probing the neighbours, as rounding
    /// might have placed a position on the wrong side of a boundary.
    pub fn search(&self, longitude: i32, latitude: i32) -> Option<usize> {
        let offset = |value: i32, min: i32, step: i32, count: usize| {
            let index = (value as i64 - min as i64).max(0) / step as i64;
            (index as usize).min(count - 1)
        };
        let mut x = offset(
            longitude,
            self.edges.west,
            self.step_longitude,
            self.count_longitude,
        );
        let mut y = offset(
            latitude,
            self.edges.south,
            self.step_latitude,
            self.count_latitude,
        );

        let cell = |x: usize, y: usize| x * self.count_latitude + y;
        while x + 1 < self.count_longitude && self.squares[cell(x, y)].area.east < longitude {
            x += 1;
        }
        while x > 0 && self.squares[cell(x, y)].area.west > longitude {
            x -= 1;
        }
        while y + 1 < self.count_latitude && self.squares[cell(x, y)].area.north < latitude {
            y += 1;
        }
        while y > 0 && self.squares[cell(x, y)].area.south > latitude {
            y -= 1;
        }

        let index = cell(x, y);
        if self.contains(index, longitude, latitude) {
            Some(index)
        } else {
            None
        }
    }

    /// Registers a point at the given position and returns the index of its cell.
    ///
    /// # Errors
    ///
    /// Fails if the position is outside of the grid.
    pub fn add(&mut self, longitude: i32, latitude: i32) -> anyhow::Result<usize> {
        let cell = self.search(longitude, latitude).ok_or_else(|| {
            anyhow::anyhow!(
                "point {}x{} does not fit in any square",
                longitude,
                latitude
            )
        })?;
        self.squares[cell].count += 1;

        Ok(cell)
    }

    /// Drops all empty cells and numbers the remaining ones.
    ///
    /// Sorting twice has no effect.
    pub fn sort(&mut self) {
        if self.is_sorted {
            return;
        }

        log::info!("Sorting squares...");
        self.sorted.clear();
        for (cell, square) in self.squares.iter_mut().enumerate() {
            if square.count > 0 {
                square.sorted = Some(self.sorted.len());
                self.sorted.push(cell);
            }
        }
        self.is_sorted = true;
    }

    fn ensure_sorted(&self) -> anyhow::Result<()> {
        if self.is_sorted {
            Ok(())
        } else {
            Err(anyhow::anyhow!("squares have not been sorted yet"))
        }
    }

    /// Returns the dense rank of the given cell or `None` if the cell was dropped as it is empty.
    ///
    /// # Errors
    ///
    /// Fails if the grid hasn't been sorted yet or if the cell index is invalid.
    pub fn get_sorted(&self, cell: usize) -> anyhow::Result<Option<usize>> {
        self.ensure_sorted()?;
        self.squares
            .get(cell)
            .map(|square| square.sorted)
            .ok_or_else(|| anyhow::anyhow!("invalid square index {}", cell))
    }

    /// Returns the number of remaining squares.
    pub fn count(&self) -> anyhow::Result<usize> {
        self.ensure_sorted()?;
        Ok(self.sorted.len())
    }

    fn sorted_square(&self, square: usize) -> anyhow::Result<&Square> {
        self.ensure_sorted()?;
        self.sorted
            .get(square)
            .map(|cell| &self.squares[*cell])
            .ok_or_else(|| anyhow::anyhow!("invalid sorted square index {}", square))
    }

    /// Returns the south west corner of the given sorted square.
    ///
    /// Point coordinates are stored relative to this corner.
    pub fn reference_sorted(&self, square: usize) -> anyhow::Result<(i32, i32)> {
        let square = self.sorted_square(square)?;
        Ok((square.area.west, square.area.south))
    }

    /// Returns the area of the given sorted square.
    pub fn area_sorted(&self, square: usize) -> anyhow::Result<Area> {
        Ok(self.sorted_square(square)?.area)
    }

    /// Determines if the two sorted squares are equal or share an edge.
    pub fn is_adjacent(&self, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }

        match (self.sorted.get(from), self.sorted.get(to)) {
            (Some(from), Some(to)) => {
                let (from_x, from_y) = (from / self.count_latitude, from % self.count_latitude);
                let (to_x, to_y) = (to / self.count_latitude, to % self.count_latitude);
                from_x.abs_diff(to_x) + from_y.abs_diff(to_y) == 1
            }
            _ => false,
        }
    }

    /// Determines if a shape point at the given position makes a line "long".
    ///
    /// A line is long if one of its shape points lies outside the squares of its endpoints or
    /// if its endpoints are in squares which don't touch. Viewers which only scan the squares
    /// of the endpoints would miss such lines.
    pub fn is_long_line(
        &self,
        from_square: usize,
        to_square: usize,
        longitude: i32,
        latitude: i32,
    ) -> bool {
        let shape_square = match self
            .search(longitude, latitude)
            .and_then(|cell| self.squares[cell].sorted)
        {
            Some(square) => square,
            None => return true,
        };

        if shape_square != from_square && shape_square != to_square {
            return true;
        }

        !self.is_adjacent(from_square, to_square)
    }

    /// Writes the "square" section.
    pub fn save(&self, db: &mut Database) -> anyhow::Result<()> {
        self.ensure_sorted()?;
        log::info!("Saving {} squares...", self.sorted.len());

        let records: Vec<SquareRecord> = self
            .sorted
            .iter()
            .map(|cell| SquareRecord {
                area: self.squares[*cell].area,
                position: *cell as i32,
                count: self.squares[*cell].count as i32,
            })
            .collect();

        let root = db.add_section(None, "square")?;
        let _ = db.add_records(root, "global", &[GlobalRecord(self)])?;
        let _ = db.add_records(root, "data", &records)?;

        Ok(())
    }

    /// Logs the statistics of the grid.
    pub fn summary(&self) {
        log::info!(
            "Square table: {} squares ({} x {} cells), {} used",
            self.sorted.len(),
            self.count_longitude,
            self.count_latitude,
            crate::fmt::format_size(self.sorted.len() * SquareRecord::SIZE)
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{Area, ByteOrder, Database};
    use crate::square::SquareGrid;

    fn grid() -> SquareGrid {
        SquareGrid::new(Area {
            east: -122_000_000 + 100_000,
            north: 37_000_000 + 70_000,
            west: -122_000_000,
            south: 37_000_000,
        })
    }

    #[test]
    fn cells_cover_the_box_without_gaps() {
        let grid = grid();
        assert_eq!(grid.count_longitude(), 4);
        assert_eq!(grid.count_latitude(), 3);

        for x in 0..4 {
            for y in 0..3 {
                let area = grid.square(x * 3 + y).unwrap().area;
                if y + 1 < 3 {
                    assert_eq!(grid.square(x * 3 + y + 1).unwrap().area.south, area.north);
                } else {
                    assert_eq!(area.north, grid.edges().north);
                }
                if x + 1 < 4 {
                    assert_eq!(grid.square((x + 1) * 3 + y).unwrap().area.west, area.east);
                } else {
                    assert_eq!(area.east, grid.edges().east);
                }
            }
        }
    }

    #[test]
    fn every_position_finds_its_cell() {
        let grid = grid();
        let edges = grid.edges();
        for longitude in (edges.west..=edges.east).step_by(997) {
            for latitude in (edges.south..=edges.north).step_by(1009) {
                let cell = grid.search(longitude, latitude).unwrap();
                let area = grid.square(cell).unwrap().area;
                assert_eq!(area.west <= longitude && longitude <= area.east, true);
                assert_eq!(area.south <= latitude && latitude <= area.north, true);
            }
        }

        assert_eq!(grid.search(edges.east + 1, edges.north), None);
        assert_eq!(grid.search(edges.west, edges.south - 1), None);
    }

    #[test]
    fn a_single_point_yields_a_single_square() {
        let mut grid = SquareGrid::new(Area::around(10, 20));
        assert_eq!(grid.add(10, 20).unwrap(), 0);
        assert_eq!(grid.add(11, 20).is_err(), true);
        grid.sort();
        assert_eq!(grid.count().unwrap(), 1);
    }

    #[test]
    fn empty_squares_are_dropped() {
        let mut grid = grid();
        let edges = grid.edges();
        assert_eq!(grid.get_sorted(0).is_err(), true);

        let first = grid.add(edges.west, edges.south).unwrap();
        let last = grid.add(edges.east, edges.north).unwrap();
        let _ = grid.add(edges.east, edges.north).unwrap();
        grid.sort();

        assert_eq!(grid.get_sorted(first).unwrap(), Some(0));
        assert_eq!(grid.get_sorted(last).unwrap(), Some(1));
        assert_eq!(grid.get_sorted(1).unwrap(), None);
        assert_eq!(grid.get_sorted(100).is_err(), true);
        assert_eq!(grid.count().unwrap(), 2);
        assert_eq!(grid.reference_sorted(0).unwrap(), (edges.west, edges.south));
        assert_eq!(grid.is_adjacent(0, 1), false);
    }

    #[test]
    fn long_lines_are_detected() {
        let mut grid = grid();
        let edges = grid.edges();
        // Cells 0 (x=0, y=0), 1 (x=0, y=1) and 3 (x=1, y=0)...
        let _ = grid.add(edges.west + 10, edges.south + 10).unwrap();
        let _ = grid.add(edges.west + 10, edges.south + 30_000).unwrap();
        let _ = grid.add(edges.west + 30_000, edges.south + 10).unwrap();
        grid.sort();

        assert_eq!(grid.is_adjacent(0, 1), true);
        assert_eq!(grid.is_adjacent(0, 2), true);
        assert_eq!(grid.is_adjacent(1, 2), false);

        assert_eq!(grid.is_long_line(0, 1, edges.west + 20, edges.south + 20), false);
        // The shape point lies in a square without any point...
        assert_eq!(grid.is_long_line(0, 1, edges.east, edges.north), true);
        // The endpoints are in diagonal squares...
        assert_eq!(grid.is_long_line(1, 2, edges.west + 20, edges.south + 30_000), true);
    }

    #[test]
    fn squares_are_saved() {
        let mut grid = grid();
        let edges = grid.edges();
        let _ = grid.add(edges.west, edges.south).unwrap();
        let _ = grid.add(edges.east, edges.north).unwrap();
        grid.sort();

        let mut db = Database::in_memory(ByteOrder::Little);
        grid.save(&mut db).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();

        let global = image.find("square/global").unwrap();
        assert_eq!(global.i32_at(0), Some(edges.east));
        assert_eq!(global.i32_at(6), Some(4));
        assert_eq!(global.i32_at(7), Some(3));
        assert_eq!(global.i32_at(8), Some(2));

        let data = image.find("square/data").unwrap();
        assert_eq!(data.count(), 2);
        assert_eq!(data.i32_at(6 + 4), Some(11));
        assert_eq!(data.i32_at(6 + 5), Some(1));
    }
}
