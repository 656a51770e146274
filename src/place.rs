//! Provides the table of named places (e.g. city centers or landmarks shown as a label).
//!
//! Places are sorted by square, then by layer and finally by their point, and indexed the same
//! way as lines: through a square and a layer index.
use fnv::FnvHashMap;

use crate::bucket::by_square_and_layer;
use crate::db::Database;
use crate::dictionary::StringId;
use crate::point::{PointId, PointTable};

#[derive(Clone, Debug)]
struct Place {
    name: StringId,
    layer: u8,
    point: PointId,
    sorted_point: usize,
    square: usize,
    sorted: usize,
}

/// Contains all places of a build.
#[derive(Default)]
pub struct PlaceTable {
    places: Vec<Place>,
    by_name: FnvHashMap<StringId, Vec<usize>>,
    sorted: Vec<usize>,
    is_sorted: bool,
}

impl PlaceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        PlaceTable::default()
    }

    /// Adds a place with the given name at the given point.
    ///
    /// Layers start at 1. Places are not deduplicated, the same name may appear at several
    /// points.
    pub fn add(&mut self, name: StringId, layer: u8, point: PointId) -> anyhow::Result<usize> {
        if self.is_sorted {
            return Err(anyhow::anyhow!("cannot add a place after sorting"));
        }
        if layer == 0 {
            return Err(anyhow::anyhow!("invalid layer 0 for place {}", name));
        }

        let index = self.places.len();
        self.places.push(Place {
            name,
            layer,
            point,
            sorted_point: 0,
            square: 0,
            sorted: 0,
        });
        self.by_name.entry(name).or_default().push(index);

        Ok(index)
    }

    /// Returns the number of places.
    pub fn len(&self) -> usize {
        self.places.len()
    }

    /// Determines if there are no places at all.
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    fn ensure_sorted(&self) -> anyhow::Result<()> {
        if self.is_sorted {
            Ok(())
        } else {
            Err(anyhow::anyhow!("places not sorted yet"))
        }
    }

    /// Returns the sorted rank of the first place registered with the given name.
    pub fn find_sorted(&self, name: StringId) -> anyhow::Result<Option<usize>> {
        self.ensure_sorted()?;

        Ok(self
            .by_name
            .get(&name)
            .and_then(|places| places.first())
            .map(|index| self.places[*index].sorted))
    }

    /// Returns the sorted rank of the given place.
    pub fn get_sorted(&self, place: usize) -> anyhow::Result<usize> {
        self.ensure_sorted()?;
        self.places
            .get(place)
            .map(|place| place.sorted)
            .ok_or_else(|| anyhow::anyhow!("invalid place index {}", place))
    }

    fn get_record_sorted(&self, sorted: usize) -> anyhow::Result<&Place> {
        self.ensure_sorted()?;
        self.sorted
            .get(sorted)
            .map(|index| &self.places[*index])
            .ok_or_else(|| anyhow::anyhow!("invalid place index {}", sorted))
    }

    /// Returns the name of the place with the given sorted rank.
    pub fn get_name_sorted(&self, sorted: usize) -> anyhow::Result<StringId> {
        self.get_record_sorted(sorted).map(|place| place.name)
    }

    /// Returns the sorted point of the place with the given sorted rank.
    pub fn get_point_sorted(&self, sorted: usize) -> anyhow::Result<usize> {
        self.get_record_sorted(sorted).map(|place| place.sorted_point)
    }

    /// Returns the square of the place with the given sorted rank.
    pub fn get_square_sorted(&self, sorted: usize) -> anyhow::Result<usize> {
        self.get_record_sorted(sorted).map(|place| place.square)
    }

    /// Returns the position of the given place.
    pub fn get_position(&self, points: &PointTable, place: usize) -> anyhow::Result<(i32, i32)> {
        let place = self
            .places
            .get(place)
            .ok_or_else(|| anyhow::anyhow!("invalid place index {}", place))?;

        Ok((points.longitude(place.point)?, points.latitude(place.point)?))
    }

    /// Sorts all places by square, layer and point.
    ///
    /// The points must have been sorted before. Sorting twice has no effect.
    pub fn sort(&mut self, points: &PointTable) -> anyhow::Result<()> {
        if self.is_sorted {
            return Ok(());
        }

        log::info!("Sorting {} places...", self.places.len());
        for place in self.places.iter_mut() {
            place.sorted_point = points.get_sorted(place.point)?;
            place.square = points.get_square_sorted(place.sorted_point)?;
        }

        let places = &self.places;
        let mut sorted: Vec<usize> = (0..places.len()).collect();
        sorted.sort_by_key(|index| {
            let place = &places[*index];
            (place.square, place.layer, place.sorted_point)
        });
        for (rank, index) in sorted.iter().enumerate() {
            self.places[*index].sorted = rank;
        }
        self.sorted = sorted;
        self.is_sorted = true;

        Ok(())
    }

    /// Writes the "place" section.
    ///
    /// Nothing is written if there are no places.
    pub fn save(&self, db: &mut Database, points: &PointTable) -> anyhow::Result<()> {
        if self.places.is_empty() {
            return Ok(());
        }
        self.ensure_sorted()?;
        log::info!("Saving {} places...", self.places.len());

        let data: Vec<i32> = self
            .sorted
            .iter()
            .map(|index| self.places[*index].sorted_point as i32)
            .collect();
        let (by_square, by_layer) = by_square_and_layer(
            self.sorted
                .iter()
                .map(|index| (self.places[*index].square, self.places[*index].layer)),
            points.squares()?.count()?,
        )?;

        let root = db.add_section(None, "place")?;
        let _ = db.add_records(root, "data", &data)?;
        let _ = db.add_records(root, "bysquare", &by_square)?;
        let _ = db.add_records(root, "bylayer", &by_layer)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Place table: {} places, {} names",
            self.places.len(),
            self.by_name.len()
        );
    }

    /// Discards all places.
    pub fn reset(&mut self) {
        *self = PlaceTable::default();
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::place::PlaceTable;
    use crate::point::PointTable;

    #[test]
    fn places_are_sorted_by_layer_within_a_square() {
        let mut points = PointTable::new();
        let a = points.add(100, 100);
        let b = points.add(200, 100);

        let mut places = PlaceTable::new();
        let town = places.add(1, 3, a).unwrap();
        let village = places.add(2, 1, b).unwrap();
        let _ = places.add(2, 1, a).unwrap();
        assert_eq!(places.add(3, 0, a).is_err(), true);
        assert_eq!(places.find_sorted(1).is_err(), true);

        points.sort().unwrap();
        places.sort(&points).unwrap();
        assert_eq!(places.get_sorted(town).unwrap(), 2);
        assert_eq!(places.get_sorted(village).unwrap(), 1);
        assert_eq!(places.find_sorted(2).unwrap(), Some(1));
        assert_eq!(places.find_sorted(7).unwrap(), None);
        assert_eq!(places.get_name_sorted(0).unwrap(), 2);
        assert_eq!(places.get_position(&points, village).unwrap(), (200, 100));

        let mut db = Database::in_memory(ByteOrder::Little);
        places.save(&mut db, &points).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();

        assert_eq!(image.find("place/data").unwrap().count(), 3);
        let by_square = image.find("place/bysquare").unwrap();
        assert_eq!(by_square.i32_at(0), Some(0));
        assert_eq!(by_square.i32_at(1), Some(3));
        // Layer 1 holds two places, layer 2 none and layer 3 the last one...
        let by_layer = image.find("place/bylayer").unwrap();
        assert_eq!(by_layer.count(), 4);
        assert_eq!(by_layer.i32_at(0), Some(0));
        assert_eq!(by_layer.i32_at(1), Some(2));
        assert_eq!(by_layer.i32_at(2), Some(2));
        assert_eq!(by_layer.i32_at(3), Some(3));
    }
}
