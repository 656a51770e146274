//! Provides the table of shape points.
//!
//! Shape points are the intermediate vertices of a line. They are stored per line, sorted by
//! their sequence number, as 16 bit deltas: the first one relative to the "from" point of the
//! line, every other one relative to its predecessor. If a delta doesn't fit into 16 bits,
//! synthetic intermediate points are inserted along the way.
//!
//! The saved "shape" section contains **bysquare** (the lines having shapes per square),
//! **byline** (the shapes of each line) and **data** (the deltas).
use fnv::FnvHashMap;
use itertools::Itertools;

use crate::bucket::by_square;
use crate::db::{Database, PayloadWriter, Record};
use crate::line::LineTable;
use crate::messages::Diagnostics;
use crate::point::PointTable;

const MAX_DELTA: i32 = 0x7fff;

#[derive(Clone, Debug)]
struct Shape {
    line: usize,
    sequence: u32,
    longitude: i32,
    latitude: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Delta {
    longitude: i16,
    latitude: i16,
}

impl Record for Delta {
    const SIZE: usize = 4;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i16(self.longitude);
        out.put_i16(self.latitude);
    }
}

struct ByLine {
    line: i32,
    first: i32,
    count: i32,
}

impl Record for ByLine {
    const SIZE: usize = 12;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.line);
        out.put_i32(self.first);
        out.put_i32(self.count);
    }
}

/// Computes the 16 bit deltas which lead from `from` to `to`.
///
/// The last delta reaches `to` exactly, all others are synthetic intermediate steps which keep
/// the direction of the segment.
///
/// # Example
///
/// ```
/// # use buildmap::shape::split_deltas;
/// assert_eq!(split_deltas((0, 0), (100, -50)), vec![(100, -50)]);
/// assert_eq!(split_deltas((0, 0), (0, 40_000)), vec![(0, 0x7fff), (0, 40_000 - 0x7fff)]);
/// ```
pub fn split_deltas(from: (i32, i32), to: (i32, i32)) -> Vec<(i16, i16)> {
    let (mut longitude, mut latitude) = from;
    let mut deltas = Vec::new();

    while (to.0 - longitude).abs() > MAX_DELTA || (to.1 - latitude).abs() > MAX_DELTA {
        let delta = if to.0 == longitude {
            if to.1 - latitude > MAX_DELTA {
                (0, MAX_DELTA)
            } else {
                (0, -MAX_DELTA)
            }
        } else {
            let slope = (to.1 - latitude) as f64 / (to.0 - longitude) as f64;
            if (-1.0..=1.0).contains(&slope) {
                if to.0 - longitude > MAX_DELTA {
                    (MAX_DELTA, (slope * MAX_DELTA as f64) as i32)
                } else {
                    (-MAX_DELTA, -((slope * MAX_DELTA as f64) as i32))
                }
            } else if to.1 - latitude > MAX_DELTA {
                ((MAX_DELTA as f64 / slope) as i32, MAX_DELTA)
            } else {
                (-((MAX_DELTA as f64 / slope) as i32), -MAX_DELTA)
            }
        };

        deltas.push((delta.0 as i16, delta.1 as i16));
        longitude += delta.0;
        latitude += delta.1;
    }

    deltas.push(((to.0 - longitude) as i16, (to.1 - latitude) as i16));
    deltas
}

/// Contains all shape points of a build.
#[derive(Default)]
pub struct ShapeTable {
    shapes: Vec<Shape>,
    by_line: FnvHashMap<usize, Vec<usize>>,
    add_count: usize,
    max_sequence: u32,
    sorted: Vec<usize>,
    is_sorted: bool,
}

impl ShapeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        ShapeTable::default()
    }

    /// Adds a shape point to the line with the given sorted rank.
    ///
    /// Shapes are added once the lines are sorted, as each shape point might turn its line into
    /// a long line. Adding the same sequence number twice yields the existing shape, a
    /// different position for it is reported as error.
    pub fn add(
        &mut self,
        lines: &mut LineTable,
        points: &PointTable,
        line: usize,
        sequence: u32,
        position: (i32, i32),
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<usize> {
        if self.is_sorted {
            return Err(anyhow::anyhow!("cannot add a shape after sorting"));
        }
        self.add_count += 1;

        if let Some(candidates) = self.by_line.get(&line) {
            for index in candidates {
                let shape = &self.shapes[*index];
                if shape.sequence == sequence {
                    if (shape.longitude, shape.latitude) != position {
                        diagnostics.error(format!(
                            "duplicated sequence number {} (line {}), {}/{}",
                            sequence, line, position.0, position.1
                        ));
                    }
                    return Ok(*index);
                }
            }
        }

        lines.test_long(points, line, position.0, position.1)?;

        let index = self.shapes.len();
        self.shapes.push(Shape {
            line,
            sequence,
            longitude: position.0,
            latitude: position.1,
        });
        self.by_line.entry(line).or_default().push(index);
        self.max_sequence = self.max_sequence.max(sequence);

        Ok(index)
    }

    /// Returns the number of shape points.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Determines if there are no shape points at all.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Returns the number of lines which have shape points.
    pub fn line_count(&self) -> usize {
        self.by_line.len()
    }

    /// Sorts all shapes by line and sequence number.
    pub fn sort(&mut self) {
        if self.is_sorted {
            return;
        }

        log::info!("Sorting {} shapes...", self.shapes.len());
        let shapes = &self.shapes;
        self.sorted = (0..shapes.len())
            .sorted_by_key(|index| (shapes[*index].line, shapes[*index].sequence))
            .collect();
        self.is_sorted = true;
    }

    /// Writes the "shape" section.
    ///
    /// Nothing is written if there are no shape points.
    pub fn save(
        &self,
        db: &mut Database,
        lines: &LineTable,
        points: &PointTable,
    ) -> anyhow::Result<()> {
        if self.shapes.is_empty() {
            return Ok(());
        }
        if !self.is_sorted {
            return Err(anyhow::anyhow!("shapes not sorted yet"));
        }
        log::info!("Saving {} shapes...", self.shapes.len());

        let square_count = points.squares()?.count()?;
        let mut data = Vec::with_capacity(self.shapes.len());
        let mut by_line: Vec<ByLine> = Vec::with_capacity(self.by_line.len());
        let mut squares = Vec::with_capacity(self.by_line.len());

        for (line, group) in &self
            .sorted
            .iter()
            .map(|index| &self.shapes[*index])
            .chunk_by(|shape| shape.line)
        {
            if matches!(by_line.last(), Some(previous) if previous.line as usize > line) {
                return Err(anyhow::anyhow!("decreasing line order in shape table"));
            }

            let mut position = lines.get_position_sorted(points, line)?;
            squares.push(lines.get_square_sorted(line)?);
            let first = data.len();
            for shape in group {
                let target = (shape.longitude, shape.latitude);
                data.extend(
                    split_deltas(position, target)
                        .into_iter()
                        .map(|(longitude, latitude)| Delta {
                            longitude,
                            latitude,
                        }),
                );
                position = target;
            }
            by_line.push(ByLine {
                line: line as i32,
                first: first as i32,
                count: (data.len() - first) as i32,
            });
        }

        let by_square = by_square(squares, square_count)?;

        let root = db.add_section(None, "shape")?;
        let _ = db.add_records(root, "bysquare", &by_square)?;
        let _ = db.add_records(root, "byline", &by_line)?;
        let _ = db.add_records(root, "data", &data)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Shape table: {} items, {} add, {} used, {} lines, max {} points per line",
            self.shapes.len(),
            self.add_count,
            crate::fmt::format_size(self.shapes.len() * Delta::SIZE),
            self.by_line.len(),
            self.max_sequence
        );
    }

    /// Discards all shapes.
    pub fn reset(&mut self) {
        *self = ShapeTable::default();
    }
}
