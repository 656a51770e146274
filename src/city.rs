//! Maps census place codes (FIPS) to city names.
//!
//! Each code is known under the name of its most recent census year. The table itself isn't
//! persisted, ingestion uses it to resolve the city names of address ranges.
use fnv::FnvHashMap;

use crate::dictionary::StringId;

#[derive(Copy, Clone, Debug)]
struct City {
    year: i32,
    name: StringId,
}

/// Contains the known cities by their FIPS code.
#[derive(Default)]
pub struct CityTable {
    cities: FnvHashMap<i32, City>,
}

impl CityTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        CityTable::default()
    }

    /// Registers the name of a city as used in the given census year.
    ///
    /// A newer year replaces the name known so far, an older one is ignored.
    ///
    /// # Errors
    ///
    /// Fails if the same code is registered with two different names for the same year.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::city::CityTable;
    /// let mut cities = CityTable::new();
    /// cities.add(4711, 1990, 1).unwrap();
    /// cities.add(4711, 2000, 2).unwrap();
    /// cities.add(4711, 1980, 3).unwrap();
    /// assert_eq!(cities.get_name(4711), Some(2));
    /// assert_eq!(cities.add(4711, 2000, 4).is_err(), true);
    /// ```
    pub fn add(&mut self, fips: i32, year: i32, name: StringId) -> anyhow::Result<()> {
        match self.cities.get_mut(&fips) {
            Some(city) => {
                if city.year == year && city.name != name {
                    return Err(anyhow::anyhow!(
                        "non unique city FIPS code {} (years {} and {})",
                        fips,
                        city.year,
                        year
                    ));
                }
                if year > city.year {
                    *city = City { year, name };
                }
            }
            None => {
                let _ = self.cities.insert(fips, City { year, name });
            }
        }

        Ok(())
    }

    /// Returns the name of the city with the given code.
    pub fn get_name(&self, fips: i32) -> Option<StringId> {
        self.cities.get(&fips).map(|city| city.name)
    }

    /// Returns the number of known cities.
    pub fn len(&self) -> usize {
        self.cities.len()
    }

    /// Determines if there are no cities at all.
    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!("City table: {} cities", self.cities.len());
    }

    /// Discards all cities.
    pub fn reset(&mut self) {
        self.cities.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::city::CityTable;

    #[test]
    fn unknown_cities_have_no_name() {
        let mut cities = CityTable::new();
        assert_eq!(cities.get_name(1), None);

        cities.add(1, 2000, 5).unwrap();
        cities.add(1, 2000, 5).unwrap();
        assert_eq!(cities.len(), 1);

        cities.reset();
        assert_eq!(cities.is_empty(), true);
    }
}
