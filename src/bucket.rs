//! Builds the square and layer indices shared by several tables.
//!
//! Most tables store their records sorted by square. A "bysquare" index then lists the first
//! record and the record count of each square. Tables which are drawn by layer (lines and
//! places) additionally sort by layer within each square and use a two level index:
//!
//! * `bysquare[square] = { first, count }` points into the layer list, `count` being the
//!   highest layer found in that square,
//! * `bylayer[first + layer - 1]` is the first record of that layer and
//!   `bylayer[first + count]` the end of the square.
//!
//! Missing layers get the start of the next present layer, so that they contain no records.
use crate::db::{PayloadWriter, Record};

/// Describes a contiguous range of sorted entries which belong to one bucket.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Slice {
    /// The first entry.
    pub first: i32,
    /// The number of entries.
    pub count: i32,
}

impl Record for Slice {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.first);
        out.put_i32(self.count);
    }
}

fn slot(by_square: &mut [Slice], square: usize) -> anyhow::Result<&mut Slice> {
    let count = by_square.len();
    by_square
        .get_mut(square)
        .ok_or_else(|| anyhow::anyhow!("invalid square {} (only {} squares)", square, count))
}

/// Computes the simple square index for entries which are sorted by square.
///
/// # Errors
///
/// Fails if the squares are not in ascending order or exceed the number of squares.
///
/// # Example
///
/// ```
/// # use buildmap::bucket::{by_square, Slice};
/// let index = by_square([0, 0, 2], 3).unwrap();
/// assert_eq!(index, vec![
///     Slice { first: 0, count: 2 },
///     Slice { first: 0, count: 0 },
///     Slice { first: 2, count: 1 },
/// ]);
/// ```
pub fn by_square(
    squares: impl IntoIterator<Item = usize>,
    square_count: usize,
) -> anyhow::Result<Vec<Slice>> {
    let mut by_square = vec![Slice::default(); square_count];
    let mut current: Option<usize> = None;
    for (index, square) in squares.into_iter().enumerate() {
        if current != Some(square) {
            if matches!(current, Some(previous) if square < previous) {
                return Err(anyhow::anyhow!(
                    "abnormal square order: {} following {:?}",
                    square,
                    current
                ));
            }
            slot(&mut by_square, square)?.first = index as i32;
            current = Some(square);
        }
        slot(&mut by_square, square)?.count += 1;
    }

    Ok(by_square)
}

/// Computes the two level square / layer index for entries sorted by square and layer.
///
/// Returns the "bysquare" and the "bylayer" tables. Layers start at 1.
///
/// # Errors
///
/// Fails if the entries are not properly sorted, if a layer is 0 or if a square exceeds the
/// number of squares.
///
/// # Example
///
/// ```
/// # use buildmap::bucket::{by_square_and_layer, Slice};
/// // Square 0 contains two entries of layer 1 and one of layer 3, square 1 is empty...
/// let (squares, layers) = by_square_and_layer([(0, 1), (0, 1), (0, 3), (2, 2)], 3).unwrap();
/// assert_eq!(squares[0], Slice { first: 0, count: 3 });
/// assert_eq!(squares[2], Slice { first: 4, count: 2 });
/// assert_eq!(layers, vec![0, 2, 2, 3, 3, 3, 4]);
/// ```
pub fn by_square_and_layer(
    entries: impl IntoIterator<Item = (usize, u8)>,
    square_count: usize,
) -> anyhow::Result<(Vec<Slice>, Vec<i32>)> {
    let mut by_square = vec![Slice::default(); square_count];
    let mut by_layer = Vec::new();
    let mut square_current: Option<usize> = None;
    let mut layer_current = 0;
    let mut sublist = 0;
    let mut total = 0;

    for (index, (square, layer)) in entries.into_iter().enumerate() {
        if layer == 0 {
            return Err(anyhow::anyhow!("invalid layer 0 in entry {}", index));
        }
        if square_current != Some(square) {
            if let Some(previous) = square_current {
                if square < previous {
                    return Err(anyhow::anyhow!(
                        "abnormal square order: {} following {}",
                        square,
                        previous
                    ));
                }
                by_layer.push(index as i32);
                *slot(&mut by_square, previous)? = Slice {
                    first: sublist as i32,
                    count: layer_current as i32,
                };
                sublist = by_layer.len();
            }
            square_current = Some(square);
            layer_current = 0;
        }

        if (layer as usize) < layer_current {
            return Err(anyhow::anyhow!(
                "abnormal layer order: {} following {}",
                layer,
                layer_current
            ));
        }
        while layer_current < layer as usize {
            by_layer.push(index as i32);
            layer_current += 1;
        }
        total = index + 1;
    }

    if let Some(previous) = square_current {
        by_layer.push(total as i32);
        *slot(&mut by_square, previous)? = Slice {
            first: sublist as i32,
            count: layer_current as i32,
        };
    }

    Ok((by_square, by_layer))
}

#[cfg(test)]
mod tests {
    use crate::bucket::{by_square, by_square_and_layer, Slice};

    #[test]
    fn unsorted_entries_are_rejected() {
        assert_eq!(by_square([1, 0], 2).is_err(), true);
        assert_eq!(by_square([5], 2).is_err(), true);
        assert_eq!(by_square_and_layer([(1, 1), (0, 1)], 2).is_err(), true);
        assert_eq!(by_square_and_layer([(0, 2), (0, 1)], 2).is_err(), true);
        assert_eq!(by_square_and_layer([(0, 0)], 2).is_err(), true);
    }

    #[test]
    fn empty_input_yields_empty_squares() {
        let (squares, layers) = by_square_and_layer(Vec::new(), 2).unwrap();
        assert_eq!(squares, vec![Slice::default(); 2]);
        assert_eq!(layers.is_empty(), true);
    }

    #[test]
    fn layers_cover_all_entries_of_a_square() {
        let entries = [(0, 2), (0, 2), (1, 1), (1, 4)];
        let (squares, layers) = by_square_and_layer(entries, 2).unwrap();

        for (square, slice) in squares.iter().enumerate() {
            let first = layers[slice.first as usize];
            let end = layers[(slice.first + slice.count) as usize];
            let expected = entries.iter().filter(|(s, _)| *s == square).count();
            assert_eq!((end - first) as usize, expected);
        }
        // Layer 1 of square 0 is empty...
        assert_eq!(layers[0], layers[1]);
    }
}
