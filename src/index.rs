//! Provides the index of map files.
//!
//! The index describes a set of map databases: each map file belongs to a territory (identified
//! by its world territory id or "wtid") and each territory to an authority (e.g. "us/ca").
//! Map files are stored relative to the path of their territory which in turn is stored
//! relative to the path of its authority. These paths are computed when sorting as the common
//! parent directory of all children.
//!
//! The saved "index" section contains **authority**, **territory**, **map**, **name** (the
//! alternative names of each authority) and **city** (the cities of each territory).
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use crate::db::{Area, Database, PayloadWriter, Record};
use crate::dictionary::{Dictionary, StringId, VolumeId};

/// Contains the maximal number of names per authority.
pub const MAX_NAMES: usize = 16;

const MAX_ENTRIES: usize = 0xffff;

struct Map {
    class: StringId,
    filename: PathBuf,
    filename_index: StringId,
}

struct Territory {
    wtid: i32,
    authority: usize,
    name: StringId,
    path: PathBuf,
    path_index: StringId,
    edges: Option<Area>,
    maps: Vec<usize>,
    cities: Vec<StringId>,
    postal_low: u32,
    postal_high: u32,
}

struct Authority {
    symbol: StringId,
    names: Vec<StringId>,
    path: PathBuf,
    path_index: StringId,
    edges: Option<Area>,
    territories: Vec<usize>,
}

struct AuthorityRecord {
    symbol: StringId,
    path: StringId,
    edges: Area,
    name_first: u16,
    name_count: u16,
    territory_first: u16,
    territory_count: u16,
}

impl Record for AuthorityRecord {
    const SIZE: usize = 28;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(self.symbol);
        out.put_u16(self.path);
        self.edges.write(out);
        out.put_u16(self.name_first);
        out.put_u16(self.name_count);
        out.put_u16(self.territory_first);
        out.put_u16(self.territory_count);
    }
}

struct TerritoryRecord {
    wtid: i32,
    name: StringId,
    path: StringId,
    edges: Area,
    map_first: u16,
    map_count: u16,
    city_first: u16,
    city_count: u16,
    postal_low: u32,
    postal_high: u32,
}

impl Record for TerritoryRecord {
    const SIZE: usize = 40;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_i32(self.wtid);
        out.put_u16(self.name);
        out.put_u16(self.path);
        self.edges.write(out);
        out.put_u16(self.map_first);
        out.put_u16(self.map_count);
        out.put_u16(self.city_first);
        out.put_u16(self.city_count);
        out.put_u32(self.postal_low);
        out.put_u32(self.postal_high);
    }
}

struct MapRecord {
    class: StringId,
    filename: StringId,
}

impl Record for MapRecord {
    const SIZE: usize = 4;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(self.class);
        out.put_u16(self.filename);
    }
}

fn merge_area(outer: &mut Option<Area>, inner: Area) {
    match outer {
        Some(area) => {
            area.include(inner.west, inner.south);
            area.include(inner.east, inner.north);
        }
        None => *outer = Some(inner),
    }
}

/// Determines the longest common parent directory of the two given paths.
///
/// # Example
///
/// ```
/// # use std::path::Path;
/// # use buildmap::index::common_parent;
/// assert_eq!(common_parent(Path::new("maps/us/ca"), Path::new("maps/us/nv")), Path::new("maps/us"));
/// assert_eq!(common_parent(Path::new("maps/us"), Path::new("other")), Path::new(""));
/// ```
pub fn common_parent(first: &Path, second: &Path) -> PathBuf {
    first
        .components()
        .zip(second.components())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect()
}

fn relative_to(path: &Path, base: &Path) -> anyhow::Result<String> {
    path.strip_prefix(base)
        .map(|relative| relative.to_string_lossy().into_owned())
        .map_err(|_| {
            anyhow::anyhow!(
                "invalid common path {} in {}",
                base.display(),
                path.display()
            )
        })
}

/// Contains the authorities, territories and map files of an index.
#[derive(Default)]
pub struct IndexTable {
    base: PathBuf,
    authorities: Vec<Authority>,
    authority_by_name: FnvHashMap<StringId, usize>,
    territories: Vec<Territory>,
    territory_by_wtid: FnvHashMap<i32, usize>,
    maps: Vec<Map>,
    city_count: usize,
    current: Option<usize>,
    is_sorted: bool,
}

impl IndexTable {
    /// Creates an empty index for map files below the given base directory.
    ///
    /// Files within the base directory are recorded relative to it so that the whole set can
    /// be moved elsewhere.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        IndexTable {
            base: base.into(),
            ..IndexTable::default()
        }
    }

    fn volumes(dictionary: &mut Dictionary) -> anyhow::Result<[VolumeId; 4]> {
        Ok([
            dictionary.open("class")?,
            dictionary.open("city")?,
            dictionary.open("name")?,
            dictionary.open("file")?,
        ])
    }

    /// Adds a map file of the given class for the given territory.
    ///
    /// The territory (and its authority) becomes the current one, all further `set_*` and
    /// `add_*` calls apply to it.
    ///
    /// # Errors
    ///
    /// Fails if the territory is already managed by another authority, if it already has a
    /// map of the same class or if there are too many entries.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::dictionary::Dictionary;
    /// # use buildmap::index::IndexTable;
    /// let mut dictionary = Dictionary::new();
    /// let mut index = IndexTable::new("/var/maps");
    /// index.add_map(&mut dictionary, 6075, "All", "us/ca", "/var/maps/us/ca/06075.rdm").unwrap();
    /// index.add_map(&mut dictionary, 6075, "Local", "us/ca", "/var/maps/us/ca/06075-l.rdm").unwrap();
    /// assert_eq!(index.add_map(&mut dictionary, 6075, "All", "us/ca", "x.rdm").is_err(), true);
    /// assert_eq!(index.add_map(&mut dictionary, 6075, "Other", "us/nv", "y.rdm").is_err(), true);
    /// assert_eq!(index.map_count(), 2);
    /// ```
    pub fn add_map(
        &mut self,
        dictionary: &mut Dictionary,
        wtid: i32,
        class: &str,
        authority: &str,
        filename: &str,
    ) -> anyhow::Result<()> {
        if self.is_sorted {
            return Err(anyhow::anyhow!("cannot add a map after sorting"));
        }
        let [classes, _, names, _] = Self::volumes(dictionary)?;
        let class_index = dictionary.add(classes, class)?;
        let authority_index = dictionary.add(names, authority)?;

        let territory = match self.territory_by_wtid.get(&wtid) {
            Some(territory) => {
                let known = &self.territories[*territory];
                if self.authorities[known.authority].symbol != authority_index {
                    return Err(anyhow::anyhow!(
                        "territory {} is managed by multiple authorities",
                        wtid
                    ));
                }
                if known
                    .maps
                    .iter()
                    .any(|map| self.maps[*map].class == class_index)
                {
                    return Err(anyhow::anyhow!(
                        "class {} appears more than once for territory {}",
                        class,
                        wtid
                    ));
                }
                *territory
            }
            None => {
                let authority = match self.authority_by_name.get(&authority_index) {
                    Some(authority) => *authority,
                    None => self.new_authority(authority_index)?,
                };
                self.new_territory(wtid, authority)?
            }
        };

        if self.maps.len() >= MAX_ENTRIES {
            return Err(anyhow::anyhow!("too many maps for a single index"));
        }
        let path = Path::new(filename);
        let filename = match path.strip_prefix(&self.base) {
            Ok(relative) if !self.base.as_os_str().is_empty() => relative.to_path_buf(),
            _ => path.to_path_buf(),
        };
        self.territories[territory].maps.push(self.maps.len());
        self.maps.push(Map {
            class: class_index,
            filename,
            filename_index: 0,
        });
        self.current = Some(territory);

        Ok(())
    }

    fn new_authority(&mut self, symbol: StringId) -> anyhow::Result<usize> {
        if self.authorities.len() >= MAX_ENTRIES {
            return Err(anyhow::anyhow!("too many authorities for a single index"));
        }

        let index = self.authorities.len();
        self.authorities.push(Authority {
            symbol,
            names: Vec::new(),
            path: PathBuf::new(),
            path_index: 0,
            edges: None,
            territories: Vec::new(),
        });
        let _ = self.authority_by_name.insert(symbol, index);

        Ok(index)
    }

    fn new_territory(&mut self, wtid: i32, authority: usize) -> anyhow::Result<usize> {
        if self.territories.len() >= MAX_ENTRIES {
            return Err(anyhow::anyhow!("too many territories for a single index"));
        }

        let index = self.territories.len();
        self.territories.push(Territory {
            wtid,
            authority,
            name: 0,
            path: PathBuf::new(),
            path_index: 0,
            edges: None,
            maps: Vec::new(),
            cities: Vec::new(),
            postal_low: 0,
            postal_high: 0,
        });
        self.authorities[authority].territories.push(index);
        let _ = self.territory_by_wtid.insert(wtid, index);

        Ok(index)
    }

    fn current(&mut self) -> anyhow::Result<&mut Territory> {
        self.current
            .and_then(|index| self.territories.get_mut(index))
            .ok_or_else(|| anyhow::anyhow!("no current map"))
    }

    /// Sets the display name of the current territory.
    pub fn set_territory_name(
        &mut self,
        dictionary: &mut Dictionary,
        name: &str,
    ) -> anyhow::Result<()> {
        let [_, _, names, _] = Self::volumes(dictionary)?;
        let name = dictionary.add(names, name)?;
        self.current()?.name = name;

        Ok(())
    }

    /// Adds an alternative name to the authority of the current territory.
    ///
    /// The authority can then also be referenced by this name in [IndexTable::add_map].
    ///
    /// # Errors
    ///
    /// Fails if there is no current territory or if the authority has [MAX_NAMES] names.
    pub fn add_authority_name(
        &mut self,
        dictionary: &mut Dictionary,
        name: &str,
    ) -> anyhow::Result<()> {
        let [_, _, names, _] = Self::volumes(dictionary)?;
        let name_index = dictionary.add(names, name)?;
        let authority_index = self.current()?.authority;
        let authority = &mut self.authorities[authority_index];

        if authority.names.contains(&name_index) {
            return Ok(());
        }
        if authority.names.len() >= MAX_NAMES {
            return Err(anyhow::anyhow!(
                "too many names for authority {}",
                dictionary.get_str(names, authority.symbol).unwrap_or_default()
            ));
        }
        authority.names.push(name_index);
        let _ = self
            .authority_by_name
            .entry(name_index)
            .or_insert(authority_index);

        Ok(())
    }

    /// Extends the area covered by the current territory and its authority.
    pub fn set_map_edges(&mut self, edges: Area) -> anyhow::Result<()> {
        let territory = self.current()?;
        merge_area(&mut territory.edges, edges);
        let (authority, edges) = (territory.authority, territory.edges);

        if let Some(edges) = edges {
            merge_area(&mut self.authorities[authority].edges, edges);
        }

        Ok(())
    }

    /// Lists a city as part of the current territory.
    pub fn add_city(&mut self, dictionary: &mut Dictionary, city: &str) -> anyhow::Result<()> {
        let [_, cities, _, _] = Self::volumes(dictionary)?;
        let city = dictionary.add(cities, city)?;
        self.current()?.cities.push(city);
        self.city_count += 1;

        Ok(())
    }

    /// Extends the postal code range of the current territory.
    pub fn add_postal_code(&mut self, code: u32) -> anyhow::Result<()> {
        let territory = self.current()?;
        if territory.postal_low == 0 || territory.postal_low > code {
            territory.postal_low = code;
        }
        territory.postal_high = territory.postal_high.max(code);

        Ok(())
    }

    /// Returns the number of map files.
    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Returns the number of territories.
    pub fn territory_count(&self) -> usize {
        self.territories.len()
    }

    /// Determines if no map was added at all.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Computes the paths of all territories and authorities.
    ///
    /// The path of a territory is the common parent directory of its map files, the path of
    /// an authority the common parent of its territories. All file names and territory paths
    /// are then registered relative to their parent.
    pub fn sort(&mut self, dictionary: &mut Dictionary) -> anyhow::Result<()> {
        if self.is_sorted || self.maps.is_empty() {
            return Ok(());
        }
        log::info!("Sorting index...");
        let [_, _, _, files] = Self::volumes(dictionary)?;

        for territory in self.territories.iter_mut() {
            let mut path = territory
                .maps
                .first()
                .and_then(|map| self.maps[*map].filename.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            for map in territory.maps.iter().skip(1) {
                let parent = self.maps[*map].filename.parent().unwrap_or(Path::new(""));
                path = common_parent(&path, parent);
            }

            for map in territory.maps.iter() {
                let map = &mut self.maps[*map];
                let relative = relative_to(&map.filename, &path)?;
                map.filename_index = dictionary.add(files, relative)?;
            }
            territory.path = path;
        }

        for authority in self.authorities.iter_mut() {
            let mut territories = authority.territories.iter();
            let Some(first) = territories.next() else {
                continue;
            };
            let mut path = self.territories[*first].path.clone();
            for territory in territories {
                path = common_parent(&path, &self.territories[*territory].path);
            }

            for territory in authority.territories.iter() {
                let territory = &mut self.territories[*territory];
                territory.path_index = if territory.path == path {
                    0
                } else {
                    dictionary.add(files, relative_to(&territory.path, &path)?)?
                };
            }
            if !path.as_os_str().is_empty() {
                authority.path_index = dictionary.add(files, path.to_string_lossy().into_owned())?;
            }
            authority.path = path;
        }

        self.is_sorted = true;
        Ok(())
    }

    /// Writes the "index" section.
    ///
    /// Nothing is written if no map was added.
    pub fn save(&self, db: &mut Database) -> anyhow::Result<()> {
        if self.maps.is_empty() {
            return Ok(());
        }
        if !self.is_sorted {
            return Err(anyhow::anyhow!("index not sorted yet"));
        }
        log::info!("Saving index...");

        let mut authorities = Vec::with_capacity(self.authorities.len());
        let mut territories = Vec::with_capacity(self.territories.len());
        let mut maps = Vec::with_capacity(self.maps.len());
        let mut names = Vec::new();
        let mut cities = Vec::with_capacity(self.city_count);

        for authority in self.authorities.iter() {
            let name_first = names.len();
            names.extend(authority.names.iter().copied());
            let territory_first = territories.len();

            for territory in authority.territories.iter() {
                let territory = &self.territories[*territory];
                let map_first = maps.len();
                maps.extend(territory.maps.iter().map(|map| MapRecord {
                    class: self.maps[*map].class,
                    filename: self.maps[*map].filename_index,
                }));
                let city_first = cities.len();
                cities.extend(territory.cities.iter().copied());

                territories.push(TerritoryRecord {
                    wtid: territory.wtid,
                    name: territory.name,
                    path: territory.path_index,
                    edges: territory.edges.unwrap_or_default(),
                    map_first: map_first as u16,
                    map_count: territory.maps.len() as u16,
                    city_first: city_first as u16,
                    city_count: territory.cities.len() as u16,
                    postal_low: territory.postal_low,
                    postal_high: territory.postal_high,
                });
            }

            authorities.push(AuthorityRecord {
                symbol: authority.symbol,
                path: authority.path_index,
                edges: authority.edges.unwrap_or_default(),
                name_first: name_first as u16,
                name_count: authority.names.len() as u16,
                territory_first: territory_first as u16,
                territory_count: authority.territories.len() as u16,
            });
        }
        if cities.len() > MAX_ENTRIES || names.len() > MAX_ENTRIES {
            return Err(anyhow::anyhow!("too many cities or names for a single index"));
        }

        let root = db.add_section(None, "index")?;
        let _ = db.add_records(root, "authority", &authorities)?;
        let _ = db.add_records(root, "territory", &territories)?;
        let _ = db.add_records(root, "map", &maps)?;
        let _ = db.add_records(root, "name", &names)?;
        let _ = db.add_records(root, "city", &cities)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Index: {} authorities, {} territories, {} maps",
            self.authorities.len(),
            self.territories.len(),
            self.maps.len()
        );
    }

    /// Discards all entries but keeps the base directory.
    pub fn reset(&mut self) {
        *self = IndexTable::new(std::mem::take(&mut self.base));
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{Area, ByteOrder, Database};
    use crate::dictionary::Dictionary;
    use crate::index::IndexTable;

    #[test]
    fn paths_are_stored_relative_to_their_parent() {
        let mut dictionary = Dictionary::new();
        let mut index = IndexTable::new("/maps");
        assert_eq!(index.add_postal_code(94000).is_err(), true);

        index
            .add_map(&mut dictionary, 6075, "All", "us/ca", "/maps/usc/ca/06075.rdm")
            .unwrap();
        index.set_territory_name(&mut dictionary, "San Francisco").unwrap();
        index.add_authority_name(&mut dictionary, "California").unwrap();
        index.add_city(&mut dictionary, "San Francisco").unwrap();
        index.add_postal_code(94110).unwrap();
        index.add_postal_code(94102).unwrap();
        index
            .set_map_edges(Area {
                east: 10,
                north: 10,
                west: 0,
                south: 0,
            })
            .unwrap();

        index
            .add_map(&mut dictionary, 6001, "All", "California", "/maps/usc/ca/alameda/06001.rdm")
            .unwrap();
        index
            .set_map_edges(Area {
                east: 20,
                north: 5,
                west: 10,
                south: -5,
            })
            .unwrap();
        assert_eq!(index.territory_count(), 2);

        index.sort(&mut dictionary).unwrap();
        let files = dictionary.volume("file").unwrap();
        assert_eq!(dictionary.locate(files, "06075.rdm").is_some(), true);
        assert_eq!(dictionary.locate(files, "06001.rdm").is_some(), true);
        assert_eq!(dictionary.locate(files, "alameda").is_some(), true);
        assert_eq!(dictionary.locate(files, "usc/ca").is_some(), true);

        let mut db = Database::in_memory(ByteOrder::Little);
        index.save(&mut db).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();

        let authority = image.find("index/authority").unwrap();
        assert_eq!(authority.count(), 1);
        // The authority covers both territories...
        assert_eq!(authority.i32_at(1), Some(20));
        assert_eq!(authority.i32_at(2), Some(10));
        assert_eq!(authority.i32_at(4), Some(-5));

        let territory = image.find("index/territory").unwrap();
        assert_eq!(territory.count(), 2);
        assert_eq!(territory.i32_at(0), Some(6075));
        assert_eq!(territory.i32_at(8), Some(94102));
        assert_eq!(territory.i32_at(9), Some(94110));
        assert_eq!(territory.i32_at(10), Some(6001));

        assert_eq!(image.find("index/map").unwrap().count(), 2);
        assert_eq!(image.find("index/name").unwrap().count(), 1);
        assert_eq!(image.find("index/city").unwrap().count(), 1);
    }
}
