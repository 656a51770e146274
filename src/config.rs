//! Contains the build configuration.
//!
//! The configuration is a YAML document (usually **config/buildmap.yml**) which is queried via
//! dotted paths like `build.switch_endian`. A missing file is not an error, all settings have
//! sensible defaults.
//!
//! # Example
//!
//! ```
//! # use buildmap::config::Config;
//! let mut config = Config::new("buildmap.yml");
//! config.load_from_string("
//! build:
//!     long_line_capacity: 500
//!     strict_polygons: true
//! ").unwrap();
//!
//! assert_eq!(config.query("build.long_line_capacity").as_int(), Some(500));
//! assert_eq!(config.query("build.strict_polygons").as_bool(), true);
//! assert_eq!(config.query("build.switch_endian").try_as_bool(), None);
//! assert_eq!(config.query("output.directory").as_str().unwrap_or("."), ".");
//! ```
use std::path::Path;

use anyhow::Context;
use yaml_rust::{Yaml, YamlLoader};

/// Contains the default location of the config file.
pub const DEFAULT_CONFIG_FILE: &str = "config/buildmap.yml";

/// Provides access to the build configuration.
pub struct Config {
    filename: String,
    doc: Yaml,
}

/// Represents a node within the configuration.
///
/// Queries which don't match yield an empty element, all accessors of which return `None` (or
/// a default value).
#[derive(Copy, Clone, Debug)]
pub struct Element<'a> {
    node: Option<&'a Yaml>,
}

impl Config {
    /// Creates an empty config which will be read from the given file.
    pub fn new(file: &str) -> Self {
        Config {
            filename: file.to_owned(),
            doc: Yaml::Null,
        }
    }

    /// Returns the name of the underlying file.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Reads the underlying file.
    ///
    /// If the file doesn't exist, the config remains empty.
    pub fn load(&mut self) -> anyhow::Result<()> {
        if !Path::new(&self.filename).is_file() {
            log::info!(
                "Config file {} doesn't exist - using defaults.",
                &self.filename
            );
            return Ok(());
        }

        log::info!("Loading config file {}...", &self.filename);
        let data = std::fs::read_to_string(&self.filename)
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        self.load_from_string(data.as_str())
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// On errors, the previously loaded configuration is kept.
    pub fn load_from_string(&mut self, data: &str) -> anyhow::Result<()> {
        let docs = match YamlLoader::load_from_str(data) {
            Ok(docs) => docs,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot parse config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        self.doc = match docs.into_iter().next() {
            Some(doc @ Yaml::Hash(_)) => doc,
            _ => Yaml::Null,
        };

        Ok(())
    }

    /// Returns the root of the configuration.
    pub fn root(&self) -> Element<'_> {
        Element {
            node: Some(&self.doc),
        }
    }

    /// Executes the given dotted query against the root of the configuration.
    pub fn query(&self, query: impl AsRef<str>) -> Element<'_> {
        self.root().query(query)
    }
}

impl<'a> Element<'a> {
    /// Resolves the given dotted path (e.g. "build.long_lines") relative to this element.
    pub fn query(self, query: impl AsRef<str>) -> Element<'a> {
        let mut node = self.node;
        for key in query.as_ref().split('.').filter(|key| !key.is_empty()) {
            node = node.and_then(|node| match node {
                Yaml::Hash(map) => map.get(&Yaml::String(key.to_owned())),
                _ => None,
            });
        }

        Element { node }
    }

    /// Determines if this element is empty (missing or null).
    pub fn is_empty(&self) -> bool {
        matches!(self.node, None | Some(Yaml::Null) | Some(Yaml::BadValue))
    }

    /// Returns the string represented by this element.
    pub fn as_str(&self) -> Option<&'a str> {
        self.node.and_then(Yaml::as_str)
    }

    /// Returns the integer represented by this element.
    pub fn as_int(&self) -> Option<i64> {
        self.node.and_then(Yaml::as_i64)
    }

    /// Returns the bool value represented by this element.
    ///
    /// This helps to distinguish missing values from `false`. If this isn't necessary,
    /// [as_bool()](Element::as_bool) can be used which treats both cases as `false`.
    pub fn try_as_bool(&self) -> Option<bool> {
        self.node.and_then(Yaml::as_bool)
    }

    /// Returns the bool value represented by this element or `false` if it is missing.
    pub fn as_bool(&self) -> bool {
        self.try_as_bool().unwrap_or(false)
    }

    /// Renders scalar values (strings, numbers and booleans) as string.
    pub fn to_scalar_string(&self) -> Option<String> {
        match self.node? {
            Yaml::String(value) => Some(value.clone()),
            Yaml::Integer(value) => Some(value.to_string()),
            Yaml::Real(value) => Some(value.clone()),
            Yaml::Boolean(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Returns all elements of the underlying list.
    ///
    /// A scalar value is treated as a list with a single element.
    pub fn elements(self) -> impl Iterator<Item = Element<'a>> {
        let (list, single) = match self.node {
            Some(Yaml::Array(list)) => (Some(list), None),
            Some(Yaml::Null) | Some(Yaml::BadValue) | None => (None, None),
            node => (None, node),
        };

        list.into_iter()
            .flat_map(|list| list.iter().map(|node| Element { node: Some(node) }))
            .chain(single.map(|node| Element { node: Some(node) }))
    }

    /// Returns all entries of the underlying map which have a string key.
    pub fn entries(self) -> impl Iterator<Item = (&'a str, Element<'a>)> {
        let map = match self.node {
            Some(Yaml::Hash(map)) => Some(map),
            _ => None,
        };

        map.into_iter().flat_map(|map| {
            map.iter().filter_map(|(key, value)| {
                key.as_str().map(|key| (key, Element { node: Some(value) }))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    #[test]
    fn malformed_configs_are_rejected() {
        let mut config = Config::new("test.yml");
        config.load_from_string("test: 42").unwrap();
        assert_eq!(config.query("test").as_int(), Some(42));

        assert_eq!(config.load_from_string("test: 'invalid").is_err(), true);
        assert_eq!(config.query("test").as_int(), Some(42));

        config.load_from_string("- 1\n- 2").unwrap();
        assert_eq!(config.query("test").is_empty(), true);
    }

    #[test]
    fn maps_can_be_enumerated() {
        let mut config = Config::new("test.yml");
        config
            .load_from_string(
                "
build:
    metadata:
        Territory:
            Id: '06075'
            Year: 2020
",
            )
            .unwrap();

        let attributes: Vec<(String, String, String)> = config
            .query("build.metadata")
            .entries()
            .flat_map(|(category, names)| {
                names.entries().map(move |(name, value)| {
                    (
                        category.to_owned(),
                        name.to_owned(),
                        value.to_scalar_string().unwrap_or_default(),
                    )
                })
            })
            .collect();

        assert_eq!(attributes.len(), 2);
        assert_eq!(
            attributes[0],
            ("Territory".to_owned(), "Id".to_owned(), "06075".to_owned())
        );
        assert_eq!(attributes[1].2, "2020");
        assert_eq!(config.query("missing").entries().count(), 0);
    }

    #[test]
    fn lists_can_be_enumerated() {
        let mut config = Config::new("test.yml");
        config
            .load_from_string("layers: [streets, highways]\nsingle: parks\n")
            .unwrap();

        let layers: Vec<&str> = config
            .query("layers")
            .elements()
            .filter_map(|layer| layer.as_str())
            .collect();
        assert_eq!(layers, vec!["streets", "highways"]);
        assert_eq!(config.query("single").elements().count(), 1);
        assert_eq!(config.query("missing").elements().count(), 0);
    }

    #[test]
    fn missing_files_yield_an_empty_config() {
        let mut config = Config::new("/this/file/does/not/exist.yml");
        config.load().unwrap();
        assert_eq!(config.root().query("build").is_empty(), true);
        assert_eq!(config.filename(), "/this/file/does/not/exist.yml");
    }
}
