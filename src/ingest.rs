//! Reads plain `;` separated source files into a [BuildSession].
//!
//! Each record starts with its type, followed by the fields of that type. Empty lines and
//! lines starting with `#` are ignored. Lines are referenced by their TIGER line id (tlid),
//! all other records refer to lines which appeared earlier in the file.
//!
//! | Type             | Fields                                                              |
//! |------------------|---------------------------------------------------------------------|
//! | `line`           | tlid, layer, from longitude, from latitude, to longitude, to latitude |
//! | `street`         | tlid, prefix, name, type, suffix                                    |
//! | `address`        | tlid, left from, left to, right from, right to, left zip, right zip, left city, right city, left place, right place |
//! | `shape`          | tlid, sequence, longitude, latitude                                 |
//! | `city`           | fips, year, name                                                    |
//! | `landmark`       | id, cfcc, name                                                      |
//! | `polygon`        | landmark, cenid, polyid                                             |
//! | `polygon_line`   | cenid, polyid, tlid, side (`L` or `R`)                              |
//! | `turn`           | node longitude, node latitude, from tlid, to tlid                   |
//! | `place`          | name, layer, longitude, latitude                                    |
//! | `attribute`      | category, name, value                                               |
//! | `value`          | category, name, value                                               |
//! | `map`            | wtid, class, authority, file name                                   |
//! | `territory`      | name                                                                |
//! | `authority`      | name                                                                |
//! | `edges`          | west, south, east, north                                            |
//! | `territory_city` | name                                                                |
//! | `postal`         | code                                                                |
//!
//! Layers (of lines and places) and landmark classes are either numeric or the name of a layer
//! of the configured class (see [crate::layer]). Address cities and places are census (FIPS)
//! codes which are resolved via previous `city` records. Shapes are collected and added once
//! all lines are known and sorted.
//!
//! # Example
//!
//! ```
//! # use buildmap::builder::Builder;
//! # use buildmap::ingest::ingest;
//! let mut session = Builder::new().build().unwrap();
//! let source = "
//! # A single street with addresses on both sides
//! line;1;1;-122400000;37700000;-122399000;37700000
//! street;1;;Main;St;
//! address;1;1;99;2;98;94110;94110;;;;
//! ";
//! assert_eq!(ingest(&mut session, "main.csv", source.as_bytes()).unwrap(), 3);
//! assert_eq!(session.streets.len(), 1);
//! assert_eq!(session.ranges.len(), 1);
//! ```
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use csv::{ReaderBuilder, StringRecord, Trim};
use fnv::FnvHashMap;

use crate::db::Area;
use crate::line::LineId;
use crate::polygon::Side;
use crate::range::AddressSide;
use crate::session::BuildSession;
use crate::street::{StreetId, StreetName};

struct KnownLine {
    id: LineId,
    layer: u8,
    from: (i32, i32),
    street: Option<StreetId>,
}

struct PendingShape {
    tlid: i32,
    sequence: u32,
    position: (i32, i32),
}

struct Fields<'r> {
    record: &'r StringRecord,
}

impl<'r> Fields<'r> {
    fn kind(&self) -> &'r str {
        self.record.get(0).unwrap_or_default()
    }

    fn text(&self, index: usize) -> anyhow::Result<&'r str> {
        self.record.get(index).ok_or_else(|| {
            anyhow::anyhow!("missing field {} in '{}' record", index, self.kind())
        })
    }

    fn parse<T: FromStr>(&self, index: usize) -> anyhow::Result<T> {
        let text = self.text(index)?;
        text.parse().map_err(|_| {
            anyhow::anyhow!(
                "invalid value '{}' for field {} in '{}' record",
                text,
                index,
                self.kind()
            )
        })
    }

    /// Parses an optional numeric field, which yields the default if it is empty.
    fn parse_or_default<T: FromStr + Default>(&self, index: usize) -> anyhow::Result<T> {
        match self.record.get(index) {
            None | Some("") => Ok(T::default()),
            Some(_) => self.parse(index),
        }
    }
}

/// Reads the records of a source into a session.
pub struct Ingester<'a> {
    session: &'a mut BuildSession,
    lines: FnvHashMap<i32, KnownLine>,
    shapes: Vec<PendingShape>,
}

impl<'a> Ingester<'a> {
    /// Creates an ingester which feeds the given session.
    pub fn new(session: &'a mut BuildSession) -> Self {
        Ingester {
            session,
            lines: FnvHashMap::default(),
            shapes: Vec::new(),
        }
    }

    /// Processes all records of the given reader and returns the number of records.
    ///
    /// Data quality problems are reported via the diagnostics of the session, malformed
    /// records abort the ingestion.
    pub fn read(&mut self, name: &str, input: impl Read) -> anyhow::Result<usize> {
        self.session.diagnostics.set_source(name);
        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(Trim::All)
            .from_reader(input);

        let mut count = 0;
        for record in reader.records() {
            let record = record.with_context(|| format!("Cannot read {}", name))?;
            if let Some(position) = record.position() {
                self.session.diagnostics.set_line(position.line() as usize);
            }
            if record.iter().all(str::is_empty) {
                continue;
            }

            self.process(&Fields { record: &record })
                .map_err(|error| self.session.diagnostics.fatal(error))?;
            count += 1;
        }

        self.add_shapes()?;
        Ok(count)
    }

    fn process(&mut self, fields: &Fields) -> anyhow::Result<()> {
        match fields.kind() {
            "line" => self.line(fields),
            "street" => self.street(fields),
            "address" => self.address(fields),
            "shape" => self.shape(fields),
            "city" => self.city(fields),
            "landmark" => self.landmark(fields),
            "polygon" => self.polygon(fields),
            "polygon_line" => self.polygon_line(fields),
            "turn" => self.turn(fields),
            "place" => self.place(fields),
            "attribute" | "value" => self.attribute(fields),
            "map" | "territory" | "authority" | "edges" | "territory_city" | "postal" => {
                self.index(fields)
            }
            kind => {
                self.session
                    .diagnostics
                    .error(format!("unknown record type '{}'", kind));
                Ok(())
            }
        }
    }

    fn known_line(&mut self, tlid: i32) -> Option<&mut KnownLine> {
        let line = self.lines.get_mut(&tlid);
        if line.is_none() {
            self.session
                .diagnostics
                .error(format!("unknown line #{}", tlid));
        }
        line
    }

    /// Resolves a numeric or named layer, unknown names are reported and yield `None`.
    fn layer(&mut self, fields: &Fields, index: usize) -> anyhow::Result<Option<u8>> {
        let text = fields.text(index)?;
        let layer = self.session.layers().resolve(text);
        if layer.is_none() {
            self.session.diagnostics.error(format!(
                "unknown layer '{}' in '{}' record",
                text,
                fields.kind()
            ));
        }

        Ok(layer)
    }

    fn line(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let tlid = fields.parse(1)?;
        let Some(layer) = self.layer(fields, 2)? else {
            return Ok(());
        };
        let from = (fields.parse(3)?, fields.parse(4)?);
        let to = (fields.parse(5)?, fields.parse(6)?);

        if self.lines.contains_key(&tlid) {
            self.session
                .diagnostics
                .error(format!("duplicated line #{}", tlid));
            return Ok(());
        }

        let session = &mut *self.session;
        let from_point = session.points.add(from.0, from.1);
        let to_point = session.points.add(to.0, to.1);
        let id = session.lines.add(tlid, layer, from_point, to_point)?;
        let _ = self.lines.insert(
            tlid,
            KnownLine {
                id,
                layer,
                from,
                street: None,
            },
        );

        Ok(())
    }

    fn street(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let tlid = fields.parse(1)?;
        let dictionary = &mut self.session.dictionary;
        let mut code = |volume: &str, index: usize| -> anyhow::Result<u16> {
            let volume = dictionary.open(volume)?;
            dictionary.add(volume, fields.text(index).unwrap_or_default())
        };
        let name = StreetName {
            prefix: code("prefix", 2)?,
            name: code("street", 3)?,
            kind: code("type", 4)?,
            suffix: code("suffix", 5)?,
        };

        let streets = &mut self.session.streets;
        if let Some(line) = self.lines.get_mut(&tlid) {
            line.street = Some(streets.add(line.layer, name, line.id, line.from));
        } else {
            let _ = self.known_line(tlid);
        }

        Ok(())
    }

    /// Reads one side of an address record, `side` being 0 for the left and 1 for the right.
    fn side(
        &mut self,
        fields: &Fields,
        side: usize,
        position: (i32, i32),
    ) -> anyhow::Result<AddressSide> {
        let from = fields.parse_or_default(2 + 2 * side)?;
        let to = fields.parse_or_default(3 + 2 * side)?;
        let zip: i32 = fields.parse_or_default(6 + side)?;
        let city: i32 = fields.parse_or_default(8 + side)?;
        let place: i32 = fields.parse_or_default(10 + side)?;

        let session = &mut *self.session;
        Ok(AddressSide {
            from,
            to,
            zip: if zip > 0 {
                session.zips.add(zip, position.0, position.1)?
            } else {
                0
            },
            city: session.cities.get_name(city).unwrap_or(0),
            place: session.cities.get_name(place).unwrap_or(0),
        })
    }

    fn address(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let tlid = fields.parse(1)?;
        let Some(line) = self.known_line(tlid) else {
            return Ok(());
        };
        let (id, from) = (line.id, line.from);
        let Some(street) = line.street else {
            self.session
                .diagnostics
                .error(format!("addresses for line #{} without a street", tlid));
            return Ok(());
        };

        let left = self.side(fields, 0, from)?;
        let right = self.side(fields, 1, from)?;
        let session = &mut *self.session;
        if left.from == 0 && left.to == 0 && right.from == 0 && right.to == 0 {
            session
                .ranges
                .add_no_address(id, street, &mut session.diagnostics)
        } else {
            session
                .ranges
                .add_both_sides(id, street, left, right)
                .map(|_| ())
        }
    }

    fn shape(&mut self, fields: &Fields) -> anyhow::Result<()> {
        self.shapes.push(PendingShape {
            tlid: fields.parse(1)?,
            sequence: fields.parse(2)?,
            position: (fields.parse(3)?, fields.parse(4)?),
        });

        Ok(())
    }

    fn add_shapes(&mut self) -> anyhow::Result<()> {
        if self.shapes.is_empty() {
            return Ok(());
        }

        let session = &mut *self.session;
        session.sort_lines()?;
        let total = self.shapes.len();
        for (done, shape) in self.shapes.drain(..).enumerate() {
            session.diagnostics.progress(done + 1, total);
            match session.lines.find_sorted(shape.tlid)? {
                Some(line) => {
                    let _ = session.shapes.add(
                        &mut session.lines,
                        &session.points,
                        line,
                        shape.sequence,
                        shape.position,
                        &mut session.diagnostics,
                    )?;
                }
                None => session
                    .diagnostics
                    .error(format!("shape {} of unknown line #{}", shape.sequence, shape.tlid)),
            }
        }

        Ok(())
    }

    fn city(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let fips = fields.parse(1)?;
        let year = fields.parse(2)?;
        let session = &mut *self.session;
        let volume = session.dictionary.open("city")?;
        let name = session.dictionary.add(volume, fields.text(3)?)?;

        session.cities.add(fips, year, name)
    }

    fn landmark(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let id = fields.parse(1)?;
        let Some(cfcc) = self.layer(fields, 2)? else {
            return Ok(());
        };
        let session = &mut *self.session;
        let volume = session.dictionary.open("landmark")?;
        let name = session.dictionary.add(volume, fields.text(3)?)?;
        let _ = session.polygons.add_landmark(id, cfcc, name);

        Ok(())
    }

    fn census_id(&mut self, fields: &Fields, index: usize) -> anyhow::Result<u16> {
        let dictionary = &mut self.session.dictionary;
        let volume = dictionary.open(".cenid")?;
        dictionary.add(volume, fields.text(index)?)
    }

    fn polygon(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let landmark = fields.parse(1)?;
        let cenid = self.census_id(fields, 2)?;
        let polyid = fields.parse(3)?;

        if self
            .session
            .polygons
            .add(landmark, cenid, polyid)
            .is_none()
        {
            log::debug!("Skipping polygon {} of unknown landmark {}", polyid, landmark);
        }

        Ok(())
    }

    fn polygon_line(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let cenid = self.census_id(fields, 1)?;
        let polyid = fields.parse(2)?;
        let tlid = fields.parse(3)?;
        let side = match fields.text(4)? {
            "L" | "l" => Side::Left,
            "R" | "r" => Side::Right,
            other => return Err(anyhow::anyhow!("invalid polygon side '{}'", other)),
        };

        if self
            .session
            .polygons
            .add_line(cenid, polyid, tlid, side)
            .is_none()
        {
            self.session.diagnostics.error(format!(
                "line #{} refers to unknown polygon {}",
                tlid, polyid
            ));
        }

        Ok(())
    }

    fn turn(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let node = (fields.parse(1)?, fields.parse(2)?);
        let from = fields.parse(3)?;
        let to = fields.parse(4)?;
        let (Some(from), Some(to)) = (
            self.known_line(from).map(|line| line.id),
            self.known_line(to).map(|line| line.id),
        ) else {
            return Ok(());
        };

        let session = &mut *self.session;
        let node = session.points.add(node.0, node.1);
        let _ = session.turns.add(node, from, to, &mut session.diagnostics)?;

        Ok(())
    }

    fn place(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let Some(layer) = self.layer(fields, 2)? else {
            return Ok(());
        };
        let position = (fields.parse(3)?, fields.parse(4)?);
        let session = &mut *self.session;
        let volume = session.dictionary.open("place")?;
        let name = session.dictionary.add(volume, fields.text(1)?)?;
        let point = session.points.add(position.0, position.1);
        let _ = session.places.add(name, layer, point)?;

        Ok(())
    }

    fn attribute(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let (category, name, value) = (fields.text(1)?, fields.text(2)?, fields.text(3)?);
        let session = &mut *self.session;
        if fields.kind() == "value" {
            session
                .metadata
                .add_value(&mut session.dictionary, category, name, value)
        } else {
            session
                .metadata
                .add_attribute(&mut session.dictionary, category, name, value)
        }
    }

    fn index(&mut self, fields: &Fields) -> anyhow::Result<()> {
        let session = &mut *self.session;
        let index = &mut session.index;
        let dictionary = &mut session.dictionary;
        match fields.kind() {
            "map" => index.add_map(
                dictionary,
                fields.parse(1)?,
                fields.text(2)?,
                fields.text(3)?,
                fields.text(4)?,
            ),
            "territory" => index.set_territory_name(dictionary, fields.text(1)?),
            "authority" => index.add_authority_name(dictionary, fields.text(1)?),
            "edges" => index.set_map_edges(Area {
                west: fields.parse(1)?,
                south: fields.parse(2)?,
                east: fields.parse(3)?,
                north: fields.parse(4)?,
            }),
            "territory_city" => index.add_city(dictionary, fields.text(1)?),
            _ => index.add_postal_code(fields.parse(1)?),
        }
    }
}

/// Reads the given source into the session and returns the number of records.
pub fn ingest(session: &mut BuildSession, name: &str, input: impl Read) -> anyhow::Result<usize> {
    Ingester::new(session).read(name, input)
}

/// Reads the given source file into the session and returns the number of records.
pub fn ingest_file(session: &mut BuildSession, path: impl AsRef<Path>) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Cannot open source {}", path.display()))?;

    ingest(session, &path.display().to_string(), file)
}
