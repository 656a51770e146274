//! Bundles all tables of a single database build.
//!
//! A [BuildSession] owns the dictionary, the diagnostics and every entity table. Ingestion adds
//! records to the tables, then [BuildSession::save] sorts all tables in dependency order and
//! writes them into a database. Afterwards [BuildSession::reset] prepares the session for the
//! next source while keeping its settings.
//!
//! The tables depend on each other as follows: points define the squares, lines refer to
//! points, streets to lines, ranges to streets and lines, shapes, polygons and turn
//! restrictions to lines and places to points.
use std::path::{Path, PathBuf};

use crate::city::CityTable;
use crate::db::{ByteOrder, Database};
use crate::dictionary::Dictionary;
use crate::index::IndexTable;
use crate::layer::LayerTable;
use crate::line::{LineTable, DEFAULT_LONG_LINE_CAPACITY};
use crate::messages::Diagnostics;
use crate::metadata::MetadataTable;
use crate::place::PlaceTable;
use crate::point::PointTable;
use crate::polygon::PolygonTable;
use crate::range::RangeTable;
use crate::shape::ShapeTable;
use crate::street::StreetTable;
use crate::turns::TurnTable;
use crate::zip::ZipTable;

/// Contains the settings which are kept across builds.
#[derive(Clone, Debug)]
pub struct BuildSettings {
    /// Writes all fields in the opposite of the host byte order.
    pub switch_endian: bool,
    /// Records lines whose shape leaves their squares.
    pub long_lines: bool,
    /// The maximal number of long lines.
    pub long_line_capacity: usize,
    /// Rejects polygons with disconnected lines instead of truncating them.
    pub strict_polygons: bool,
    /// The base directory of the map index.
    pub index_base: PathBuf,
    /// Attributes (category, name, value) added to every database.
    pub metadata: Vec<(String, String, String)>,
    /// The named layers of the map class.
    pub layers: LayerTable,
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings {
            switch_endian: false,
            long_lines: true,
            long_line_capacity: DEFAULT_LONG_LINE_CAPACITY,
            strict_polygons: false,
            index_base: PathBuf::new(),
            metadata: Vec::new(),
            layers: LayerTable::new(),
        }
    }
}

/// Owns all tables of a build.
///
/// # Example
///
/// ```
/// # use buildmap::builder::Builder;
/// # use buildmap::db::ByteOrder;
/// # use buildmap::db::reader::Image;
/// let mut session = Builder::new().build().unwrap();
/// let a = session.points.add(0, 0);
/// let b = session.points.add(1000, 1000);
/// let _ = session.lines.add(17, 1, a, b).unwrap();
///
/// let image = session.build_in_memory().unwrap();
/// let image = Image::parse(&image, session.byte_order()).unwrap();
/// assert_eq!(image.find("line/data").unwrap().count(), 1);
/// assert_eq!(image.find("metadata/attributes").unwrap().count(), 2);
/// ```
pub struct BuildSession {
    settings: BuildSettings,
    /// The string dictionary shared by all tables.
    pub dictionary: Dictionary,
    /// Collects the data quality problems of the current source.
    pub diagnostics: Diagnostics,
    /// The points (and thereby the squares).
    pub points: PointTable,
    /// The lines.
    pub lines: LineTable,
    /// The streets.
    pub streets: StreetTable,
    /// The address ranges.
    pub ranges: RangeTable,
    /// The shape points of the lines.
    pub shapes: ShapeTable,
    /// The polygons and landmarks.
    pub polygons: PolygonTable,
    /// The census city names (not persisted).
    pub cities: CityTable,
    /// The zip codes.
    pub zips: ZipTable,
    /// The attributes of the database.
    pub metadata: MetadataTable,
    /// The turn restrictions.
    pub turns: TurnTable,
    /// The named places.
    pub places: PlaceTable,
    /// The map index.
    pub index: IndexTable,
}

impl BuildSession {
    /// Creates an empty session using the given settings.
    pub fn new(settings: BuildSettings) -> anyhow::Result<Self> {
        let mut session = BuildSession {
            dictionary: Dictionary::new(),
            diagnostics: Diagnostics::new(),
            points: PointTable::new(),
            lines: LineTable::with_long_lines(settings.long_lines, settings.long_line_capacity),
            streets: StreetTable::new(),
            ranges: RangeTable::new(),
            shapes: ShapeTable::new(),
            polygons: PolygonTable::with_strict(settings.strict_polygons),
            cities: CityTable::new(),
            zips: ZipTable::new(),
            metadata: MetadataTable::new(),
            turns: TurnTable::new(),
            places: PlaceTable::new(),
            index: IndexTable::new(settings.index_base.clone()),
            settings,
        };
        session.add_configured_metadata()?;

        Ok(session)
    }

    fn add_configured_metadata(&mut self) -> anyhow::Result<()> {
        for (category, name, value) in self.settings.metadata.iter() {
            self.metadata
                .add_attribute(&mut self.dictionary, category, name, value)?;
        }

        Ok(())
    }

    /// Returns the settings of this session.
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Returns the layers which can be referred to by name.
    pub fn layers(&self) -> &LayerTable {
        &self.settings.layers
    }

    /// Returns the byte order used for all databases of this session.
    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::for_build(self.settings.switch_endian)
    }

    /// Sorts the points and lines.
    ///
    /// This has to happen before shapes are added, as these refer to sorted lines.
    pub fn sort_lines(&mut self) -> anyhow::Result<()> {
        self.points.sort()?;
        self.lines.sort(&self.points)
    }

    /// Sorts all tables in dependency order.
    ///
    /// Sorting is idempotent, therefore tables which have already been sorted are skipped.
    pub fn sort(&mut self) -> anyhow::Result<()> {
        self.sort_lines()?;
        self.streets.sort(&self.lines)?;
        self.ranges.sort(&self.lines, &self.streets)?;
        self.shapes.sort();
        self.polygons.sort(&self.lines)?;
        self.places.sort(&self.points)?;
        self.turns.sort(&self.points, &self.lines)?;
        self.index.sort(&mut self.dictionary)?;

        Ok(())
    }

    fn add_build_metadata(&mut self) -> anyhow::Result<()> {
        if !self
            .metadata
            .get(&self.dictionary, "Build", "Version")
            .is_empty()
        {
            return Ok(());
        }

        let date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.metadata
            .add_attribute(&mut self.dictionary, "Build", "Date", &date)?;
        self.metadata.add_attribute(
            &mut self.dictionary,
            "Build",
            "Version",
            crate::BUILDMAP_VERSION,
        )?;

        Ok(())
    }

    /// Sorts all tables and writes them into the given database.
    pub fn save(&mut self, db: &mut Database) -> anyhow::Result<()> {
        self.add_build_metadata()?;
        self.sort()?;

        let square_count = if self.points.is_empty() {
            0
        } else {
            self.points.squares()?.count()?
        };

        self.metadata.save(db)?;
        self.dictionary.save(db)?;
        if square_count > 0 {
            self.points.squares()?.save(db)?;
        }
        self.points.save(db)?;
        self.lines.save(db, &self.points)?;
        self.streets.save(db)?;
        self.ranges
            .save(db, &self.lines, self.streets.len(), square_count)?;
        self.shapes.save(db, &self.lines, &self.points)?;
        self.polygons.save(db, &self.lines, &self.points)?;
        self.places.save(db, &self.points)?;
        self.turns.save(db, &self.points)?;
        self.zips.save(db)?;
        self.index.save(db)?;

        Ok(())
    }

    /// Builds the database file at the given path and returns its size.
    pub fn build(&mut self, path: impl AsRef<Path>) -> anyhow::Result<usize> {
        let mut db = Database::open(path, self.byte_order())?;
        self.save(&mut db)?;
        db.close()
    }

    /// Builds the database in memory and returns its image.
    pub fn build_in_memory(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut db = Database::in_memory(self.byte_order());
        self.save(&mut db)?;
        db.finish()
    }

    /// Logs the statistics of all tables.
    pub fn summary(&self) {
        self.dictionary.summary();
        if let Ok(squares) = self.points.squares() {
            squares.summary();
        }
        self.points.summary();
        self.lines.summary();
        self.streets.summary();
        self.ranges.summary();
        self.shapes.summary();
        self.polygons.summary();
        self.cities.summary();
        self.zips.summary();
        self.metadata.summary();
        self.turns.summary();
        self.places.summary();
        self.index.summary();
        log::info!("{} error(s) reported.", self.diagnostics.errors());
    }

    /// Discards all data so that the next database can be built.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.dictionary.reset();
        self.diagnostics.reset();
        self.points.reset();
        self.lines.reset();
        self.streets.reset();
        self.ranges.reset();
        self.shapes.reset();
        self.polygons.reset();
        self.cities.reset();
        self.zips.reset();
        self.metadata.reset();
        self.turns.reset();
        self.places.reset();
        self.index.reset();

        self.add_configured_metadata()
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::db::reader::Image;
    use crate::db::ByteOrder;
    use crate::ingest::ingest;

    const SOURCE: &str = "
city;100;2000;San Francisco
landmark;7;40;Golden Gate Park
line;1;1;0;0;1000;0
line;2;1;1000;0;1000;1000
line;3;1;0;1000;1000;1000
line;4;1;0;0;0;1000
street;1;;Main;St;
street;2;;Oak;Ave;
address;1;1;99;2;98;94110;94110;100;100;;
address;2;;;;;;;;;;
address;9;1;2;;;;;;;;
shape;1;1;500;10
polygon;7;C1;1
polygon_line;C1;1;1;R
polygon_line;C1;1;3;L
polygon_line;C1;1;2;R
polygon_line;C1;1;4;L
turn;1000;0;1;2
place;Downtown;1;500;500
attribute;Territory;Id;06075
value;Territory;Id;06076
";

    #[test]
    fn all_tables_are_written() {
        let mut session = Builder::new().build().unwrap();
        assert_eq!(ingest(&mut session, "test.csv", SOURCE.as_bytes()).unwrap(), 21);

        // The address of the unknown line #9 is reported...
        assert_eq!(session.diagnostics.errors(), 1);
        assert_eq!(session.ranges.len(), 1);
        assert_eq!(session.ranges.no_address_count(), 1);
        assert_eq!(session.points.len(), 5);

        let image = session.build_in_memory().unwrap();
        let image = Image::parse(&image, session.byte_order()).unwrap();

        assert_eq!(image.find("metadata/attributes").unwrap().count(), 3);
        assert_eq!(image.find("metadata/values").unwrap().count(), 4);
        assert_eq!(image.find("square/data").is_some(), true);
        assert_eq!(image.find("point/data").unwrap().count(), 5);
        assert_eq!(image.find("line/data").unwrap().count(), 4);
        assert_eq!(image.find("street/name").unwrap().count(), 2);
        assert_eq!(image.find("range/addr").unwrap().count(), 1);
        assert_eq!(image.find("range/noaddr").unwrap().count(), 1);
        assert_eq!(image.find("shape/data").unwrap().count(), 1);
        assert_eq!(image.find("polygons/head").unwrap().count(), 1);
        assert_eq!(image.find("polygons/line").unwrap().count(), 4);
        assert_eq!(image.find("turns/bynode").unwrap().count(), 1);
        assert_eq!(image.find("place/data").unwrap().count(), 1);
        assert_eq!(image.find("zip").unwrap().count(), 2);
        assert_eq!(image.find("string/city").is_some(), true);
        assert_eq!(image.find("string/.cenid").is_none(), true);
        assert_eq!(image.find("index").is_none(), true);
    }

    #[test]
    fn sessions_can_be_reused() {
        let mut session = Builder::new()
            .with_attribute("Territory", "Id", "06075")
            .build()
            .unwrap();
        let _ = ingest(&mut session, "first.csv", SOURCE.as_bytes()).unwrap();
        let _ = session.build_in_memory().unwrap();

        session.reset().unwrap();
        assert_eq!(session.points.is_empty(), true);
        assert_eq!(session.diagnostics.errors(), 0);
        assert_eq!(session.metadata.len(), 1);

        let source = "line;1;1;0;0;10;10\nstreet;1;;Elm;;";
        assert_eq!(ingest(&mut session, "second.csv", source.as_bytes()).unwrap(), 2);
        let image = session.build_in_memory().unwrap();
        let image = Image::parse(&image, session.byte_order()).unwrap();
        assert_eq!(image.find("line/data").unwrap().count(), 1);
        assert_eq!(image.find("polygons/head").unwrap().count(), 0);
        assert_eq!(image.find("metadata/attributes").unwrap().count(), 3);
    }

    #[test]
    fn byte_order_can_be_switched() {
        let mut session = Builder::new().enable_switch_endian().build().unwrap();
        assert_eq!(session.byte_order(), ByteOrder::host().swapped());

        let _ = ingest(&mut session, "test.csv", SOURCE.as_bytes()).unwrap();
        let image = session.build_in_memory().unwrap();
        let image = Image::parse(&image, ByteOrder::host().swapped()).unwrap();
        assert_eq!(image.find("line/data").unwrap().count(), 4);
    }

    #[test]
    fn databases_are_written_to_disk() {
        let path = std::env::temp_dir().join("buildmap-session-test.rdm");
        let mut session = Builder::new().build().unwrap();
        let _ = ingest(&mut session, "test.csv", SOURCE.as_bytes()).unwrap();

        let size = session.build(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, size);
        std::fs::remove_file(&path).unwrap();
    }
}
