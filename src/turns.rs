//! Provides the table of turn restrictions.
//!
//! A turn restriction forbids to turn from one line into another at a given node (point). The
//! restrictions are grouped by node, the nodes by square.
use fnv::FnvHashMap;
use itertools::Itertools;

use crate::bucket::by_square;
use crate::db::{Database, PayloadWriter, Record};
use crate::line::{LineId, LineTable};
use crate::messages::Diagnostics;
use crate::point::{PointId, PointTable};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Turn {
    node: PointId,
    from: LineId,
    to: LineId,
}

struct ByNode {
    node: i32,
    first: i32,
    count: i32,
}

impl Record for ByNode {
    const SIZE: usize = 12;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.node);
        out.put_i32(self.first);
        out.put_i32(self.count);
    }
}

struct TurnRecord {
    from: i32,
    to: i32,
}

impl Record for TurnRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.from);
        out.put_i32(self.to);
    }
}

/// Contains all turn restrictions of a build.
#[derive(Default)]
pub struct TurnTable {
    turns: Vec<Turn>,
    by_node: FnvHashMap<PointId, Vec<usize>>,
    add_count: usize,
    duplicates: usize,
    sorted: Vec<(usize, usize, usize)>,
    is_sorted: bool,
}

impl TurnTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        TurnTable::default()
    }

    fn find(&self, node: PointId, from: LineId, to: LineId) -> Option<usize> {
        self.by_node.get(&node).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .find(|index| self.turns[*index] == Turn { node, from, to })
        })
    }

    /// Forbids to turn from line `from` into line `to` at the given node.
    ///
    /// The first duplicate registration is reported, all further ones are only counted.
    pub fn add(
        &mut self,
        node: PointId,
        from: LineId,
        to: LineId,
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<usize> {
        if self.is_sorted {
            return Err(anyhow::anyhow!("cannot add a turn restriction after sorting"));
        }
        self.add_count += 1;

        if let Some(index) = self.find(node, from, to) {
            if self.duplicates == 0 {
                diagnostics.error(format!(
                    "duplicated turn restriction: {} {} {}",
                    node, from, to
                ));
            }
            self.duplicates += 1;
            return Ok(index);
        }

        let index = self.turns.len();
        self.turns.push(Turn { node, from, to });
        self.by_node.entry(node).or_default().push(index);

        Ok(index)
    }

    /// Determines if the given turn is restricted.
    pub fn exists(&self, node: PointId, from: LineId, to: LineId) -> bool {
        self.find(node, from, to).is_some()
    }

    /// Returns the number of turn restrictions.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Determines if there are no turn restrictions at all.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Sorts all restrictions by the sorted ranks of their node and lines.
    pub fn sort(&mut self, points: &PointTable, lines: &LineTable) -> anyhow::Result<()> {
        if self.is_sorted {
            return Ok(());
        }

        log::info!("Sorting {} turn restrictions...", self.turns.len());
        let mut sorted = Vec::with_capacity(self.turns.len());
        for turn in self.turns.iter() {
            sorted.push((
                points.get_sorted(turn.node)?,
                lines.get_sorted(turn.from)?,
                lines.get_sorted(turn.to)?,
            ));
        }
        sorted.sort_unstable();
        self.sorted = sorted;
        self.is_sorted = true;

        Ok(())
    }

    /// Writes the "turns" section.
    ///
    /// Nothing is written if there are no turn restrictions.
    pub fn save(&self, db: &mut Database, points: &PointTable) -> anyhow::Result<()> {
        if self.turns.is_empty() {
            return Ok(());
        }
        if !self.is_sorted {
            return Err(anyhow::anyhow!("turn restrictions not sorted yet"));
        }
        log::info!("Saving {} turn restrictions...", self.turns.len());

        let mut by_node = Vec::with_capacity(self.by_node.len());
        let mut squares = Vec::with_capacity(self.by_node.len());
        let mut data = Vec::with_capacity(self.sorted.len());
        for (node, group) in &self.sorted.iter().chunk_by(|(node, _, _)| *node) {
            squares.push(points.get_square_sorted(node)?);
            let first = data.len();
            data.extend(group.map(|(_, from, to)| TurnRecord {
                from: *from as i32,
                to: *to as i32,
            }));
            by_node.push(ByNode {
                node: node as i32,
                first: first as i32,
                count: (data.len() - first) as i32,
            });
        }
        let by_square = by_square(squares, points.squares()?.count()?)?;

        let root = db.add_section(None, "turns")?;
        let _ = db.add_records(root, "bysquare", &by_square)?;
        let _ = db.add_records(root, "bynode", &by_node)?;
        let _ = db.add_records(root, "data", &data)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Turn restrictions table: {} items, {} add, {} nodes, {} duplicates",
            self.turns.len(),
            self.add_count,
            self.by_node.len(),
            self.duplicates
        );
    }

    /// Discards all turn restrictions.
    pub fn reset(&mut self) {
        *self = TurnTable::default();
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::line::LineTable;
    use crate::messages::Diagnostics;
    use crate::point::PointTable;
    use crate::turns::TurnTable;

    #[test]
    fn restrictions_are_grouped_by_node() {
        let mut points = PointTable::new();
        let mut lines = LineTable::new();
        let a = points.add(0, 0);
        let b = points.add(10, 0);
        let c = points.add(20, 0);
        let ab = lines.add(1, 1, a, b).unwrap();
        let bc = lines.add(2, 1, b, c).unwrap();

        let mut diagnostics = Diagnostics::new();
        let mut turns = TurnTable::new();
        let _ = turns.add(b, ab, bc, &mut diagnostics).unwrap();
        let _ = turns.add(b, bc, ab, &mut diagnostics).unwrap();
        let _ = turns.add(b, ab, bc, &mut diagnostics).unwrap();
        let _ = turns.add(b, ab, bc, &mut diagnostics).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(diagnostics.errors(), 1);
        assert_eq!(turns.exists(b, bc, ab), true);
        assert_eq!(turns.exists(a, bc, ab), false);

        points.sort().unwrap();
        lines.sort(&points).unwrap();
        turns.sort(&points, &lines).unwrap();

        let mut db = Database::in_memory(ByteOrder::Little);
        turns.save(&mut db, &points).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();

        let by_node = image.find("turns/bynode").unwrap();
        assert_eq!(by_node.count(), 1);
        assert_eq!(by_node.i32_at(0), Some(1));
        assert_eq!(by_node.i32_at(2), Some(2));

        let data = image.find("turns/data").unwrap();
        assert_eq!(data.i32_at(0), Some(0));
        assert_eq!(data.i32_at(1), Some(1));
    }
}
