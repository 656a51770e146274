//! Resolves layer names into the numeric layers stored in the databases.
//!
//! The layers of a map class are configured in the **build.class** section of the config. Line
//! layers are numbered first, starting at 1, followed by the polygon layers. Each list is
//! either a space separated string or a YAML list:
//!
//! ```yaml
//! build:
//!     class:
//!         lines: freeways ramps highways streets
//!         polygons: [parks, hospitals, airports]
//! ```
//!
//! Names are matched ignoring case. Without a class only numeric layers are accepted.
//!
//! # Example
//!
//! ```
//! # use buildmap::config::Config;
//! # use buildmap::layer::LayerTable;
//! let mut config = Config::new("buildmap.yml");
//! config.load_from_string("
//! build:
//!     class:
//!         lines: freeways streets
//!         polygons: [parks]
//! ").unwrap();
//!
//! let layers = LayerTable::from_config(&config).unwrap();
//! assert_eq!(layers.get("Streets"), Some(2));
//! assert_eq!(layers.get("parks"), Some(3));
//! assert_eq!(layers.resolve("7"), Some(7));
//! assert_eq!(layers.get("rivers"), None);
//! ```
use crate::config::{Config, Element};

/// Contains the layers of the map class being built.
#[derive(Clone, Debug, Default)]
pub struct LayerTable {
    lines: Vec<String>,
    polygons: Vec<String>,
}

impl LayerTable {
    /// Creates an empty table which only accepts numeric layers.
    pub fn new() -> Self {
        LayerTable::default()
    }

    /// Loads the layers listed in **build.class**.
    ///
    /// A missing class yields an empty table.
    ///
    /// # Errors
    ///
    /// Fails if a class is given but lacks line or polygon layers, or if there are more layers
    /// than fit into a single byte.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let class = config.query("build.class");
        if class.is_empty() {
            return Ok(LayerTable::new());
        }

        let mut layers = LayerTable::new();
        for name in names(class.query("lines")) {
            let _ = layers.add_line_layer(&name)?;
        }
        for name in names(class.query("polygons")) {
            let _ = layers.add_polygon_layer(&name)?;
        }

        if layers.lines.is_empty() {
            return Err(anyhow::anyhow!("cannot decode line layers in build.class"));
        }
        if layers.polygons.is_empty() {
            return Err(anyhow::anyhow!("cannot decode polygon layers in build.class"));
        }
        log::info!(
            "Loaded {} line and {} polygon layers.",
            layers.lines.len(),
            layers.polygons.len()
        );

        Ok(layers)
    }

    /// Appends a line layer and returns its number.
    ///
    /// Line layers must be added before any polygon layer, as the latter are numbered after
    /// all line layers.
    pub fn add_line_layer(&mut self, name: &str) -> anyhow::Result<u8> {
        if !self.polygons.is_empty() {
            return Err(anyhow::anyhow!(
                "line layer {} added after the polygon layers",
                name
            ));
        }
        self.check_capacity(name)?;
        self.lines.push(name.to_owned());

        Ok(self.lines.len() as u8)
    }

    /// Appends a polygon layer and returns its number.
    pub fn add_polygon_layer(&mut self, name: &str) -> anyhow::Result<u8> {
        self.check_capacity(name)?;
        self.polygons.push(name.to_owned());

        Ok(self.len() as u8)
    }

    fn check_capacity(&self, name: &str) -> anyhow::Result<()> {
        if self.len() >= u8::MAX as usize {
            Err(anyhow::anyhow!("too many layers, cannot add {}", name))
        } else {
            Ok(())
        }
    }

    /// Returns the number of the layer with the given name.
    pub fn get(&self, name: &str) -> Option<u8> {
        self.lines
            .iter()
            .chain(self.polygons.iter())
            .position(|layer| layer.eq_ignore_ascii_case(name))
            .map(|index| (index + 1) as u8)
    }

    /// Resolves either a numeric layer or a layer name.
    pub fn resolve(&self, layer: &str) -> Option<u8> {
        layer.parse().ok().or_else(|| self.get(layer))
    }

    /// Returns the number of line layers.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Returns the total number of layers.
    pub fn len(&self) -> usize {
        self.lines.len() + self.polygons.len()
    }

    /// Determines if no layers are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn names(element: Element) -> Vec<String> {
    element
        .elements()
        .filter_map(|element| element.to_scalar_string())
        .flat_map(|names| {
            names
                .split_whitespace()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .collect()
}
