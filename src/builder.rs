//! Provides a builder which is used to setup a [BuildSession].
//!
//! The builder collects the settings of a build, either programmatically or from a loaded
//! [Config], and then creates the session.
//!
//! # Example
//!
//! ```
//! # use buildmap::builder::Builder;
//! let session = Builder::new()
//!     .enable_switch_endian()
//!     .with_long_line_capacity(50)
//!     .with_attribute("Territory", "Id", "06075")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(session.settings().switch_endian, true);
//! assert_eq!(session.settings().long_line_capacity, 50);
//! assert_eq!(session.metadata.len(), 1);
//! ```
use std::path::PathBuf;

use crate::config::Config;
use crate::init_logging;
use crate::layer::LayerTable;
use crate::session::{BuildSession, BuildSettings};

/// Collects the settings of a build.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    settings: BuildSettings,
}

impl Builder {
    /// Creates a new builder using the default settings.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Reads all settings from the given config.
    ///
    /// Settings which are missing in the config keep their default value.
    ///
    /// # Errors
    ///
    /// Fails if the layers of the configured class cannot be loaded.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::builder::Builder;
    /// # use buildmap::config::Config;
    /// let mut config = Config::new("buildmap.yml");
    /// config.load_from_string("
    /// build:
    ///     long_lines: false
    ///     strict_polygons: true
    ///     metadata:
    ///         Territory:
    ///             Id: '06075'
    ///             Parent: us/ca
    /// ").unwrap();
    ///
    /// let session = Builder::from_config(&config).unwrap().build().unwrap();
    /// assert_eq!(session.settings().long_lines, false);
    /// assert_eq!(session.settings().strict_polygons, true);
    /// assert_eq!(session.settings().switch_endian, false);
    /// assert_eq!(session.metadata.len(), 2);
    /// ```
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut builder = Builder::new();
        builder.settings.layers = LayerTable::from_config(config)?;
        let build = config.query("build");

        if let Some(switch_endian) = build.query("switch_endian").try_as_bool() {
            builder.settings.switch_endian = switch_endian;
        }
        if let Some(long_lines) = build.query("long_lines").try_as_bool() {
            builder.settings.long_lines = long_lines;
        }
        if let Some(capacity) = build.query("long_line_capacity").as_int() {
            builder.settings.long_line_capacity = capacity.max(0) as usize;
        }
        if let Some(strict) = build.query("strict_polygons").try_as_bool() {
            builder.settings.strict_polygons = strict;
        }
        if let Some(base) = build.query("index_base").as_str() {
            builder.settings.index_base = PathBuf::from(base);
        }

        for (category, names) in build.query("metadata").entries() {
            for (name, value) in names.entries() {
                match value.to_scalar_string() {
                    Some(value) => builder.settings.metadata.push((
                        category.to_owned(),
                        name.to_owned(),
                        value,
                    )),
                    None => log::warn!("Ignoring non scalar attribute {}.{}", category, name),
                }
            }
        }

        Ok(builder)
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Writes the databases in the opposite of the host byte order.
    pub fn enable_switch_endian(mut self) -> Self {
        self.settings.switch_endian = true;
        self
    }

    /// Writes the databases in the host byte order (which is the default).
    pub fn disable_switch_endian(mut self) -> Self {
        self.settings.switch_endian = false;
        self
    }

    /// Enables the detection of long lines (which is the default).
    pub fn enable_long_lines(mut self) -> Self {
        self.settings.long_lines = true;
        self
    }

    /// Disables the detection of long lines.
    pub fn disable_long_lines(mut self) -> Self {
        self.settings.long_lines = false;
        self
    }

    /// Specifies the maximal number of long lines.
    pub fn with_long_line_capacity(mut self, capacity: usize) -> Self {
        self.settings.long_line_capacity = capacity;
        self
    }

    /// Rejects polygons with disconnected lines instead of truncating them.
    pub fn enable_strict_polygons(mut self) -> Self {
        self.settings.strict_polygons = true;
        self
    }

    /// Truncates polygons with disconnected lines (which is the default).
    pub fn disable_strict_polygons(mut self) -> Self {
        self.settings.strict_polygons = false;
        self
    }

    /// Specifies the base directory of the map index.
    pub fn with_index_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.settings.index_base = base.into();
        self
    }

    /// Specifies the layers which can be referred to by name.
    pub fn with_layers(mut self, layers: LayerTable) -> Self {
        self.settings.layers = layers;
        self
    }

    /// Adds an attribute which is written into every database.
    pub fn with_attribute(mut self, category: &str, name: &str, value: &str) -> Self {
        self.settings
            .metadata
            .push((category.to_owned(), name.to_owned(), value.to_owned()));
        self
    }

    /// Creates the session using the collected settings.
    ///
    /// # Errors
    ///
    /// Fails if the configured attributes are inconsistent.
    pub fn build(self) -> anyhow::Result<BuildSession> {
        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. BUILDMAP (v {}) using {} byte order",
            crate::BUILDMAP_VERSION,
            if self.settings.switch_endian {
                "swapped"
            } else {
                "host"
            }
        );

        BuildSession::new(self.settings)
    }
}
