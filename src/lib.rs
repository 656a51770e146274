//! Buildmap compiles geographic source records into compact, randomly accessible map databases.
//!
//! # Introduction
//! A map database is a tree of named sections, each carrying a flat array of fixed size records.
//! Navigation and rendering applications map such a file into memory and access it without
//! any parsing. Therefore all the hard work happens here: deduplicating the source records,
//! sorting all tables so that records which are close on the map are also close in the file
//! and generating the index arrays which make a fast spatial search possible.
//!
//! The map is split into a grid of **squares**. Almost every table is sorted by square first
//! and comes with a "bysquare" index, so that a viewer only needs to look at the squares which
//! intersect its screen.
//!
//! # Modules
//! * **Database**: The section tree writer and a reader for produced images. See [crate::db]
//! * **Dictionary**: A case insensitive string interner which persists its strings along with
//!   a compressed search trie. See [crate::dictionary]
//! * **Tables**: [points](crate::point) (which also define the [squares](crate::square)),
//!   [lines](crate::line), [streets](crate::street), [address ranges](crate::range),
//!   [shapes](crate::shape), [polygons](crate::polygon), [places](crate::place),
//!   [turn restrictions](crate::turns), [zip codes](crate::zip), [cities](crate::city),
//!   [metadata](crate::metadata) and the [map index](crate::index).
//! * **Session**: A [BuildSession](session::BuildSession) owns all tables of a build and sorts
//!   and saves them in the proper order. It is created via a [Builder](builder::Builder),
//!   optionally from a [Config](config::Config).
//! * **Ingestion**: Reads plain `;` separated source files into a session, resolving layer names
//!   via the [layers](crate::layer) of the configured class. See [crate::ingest]
//!
//! # Example
//! ```
//! # use buildmap::builder::Builder;
//! # use buildmap::db::reader::Image;
//! # use buildmap::ingest::ingest;
//! let mut session = Builder::new().build().unwrap();
//! let source = "
//! line;1;1;-122400000;37700000;-122399000;37701000
//! line;2;1;-122399000;37701000;-122398000;37701000
//! street;1;;Main;St;
//! street;2;;Main;St;
//! ";
//! let _ = ingest(&mut session, "example.csv", source.as_bytes()).unwrap();
//!
//! let image = session.build_in_memory().unwrap();
//! let image = Image::parse(&image, session.byte_order()).unwrap();
//! assert_eq!(image.find("line/data").unwrap().count(), 2);
//! assert_eq!(image.find("street/name").unwrap().count(), 1);
//! ```
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod bucket;
pub mod builder;
pub mod city;
pub mod config;
pub mod db;
pub mod dictionary;
pub mod fmt;
pub mod index;
pub mod ingest;
pub mod layer;
pub mod line;
pub mod messages;
pub mod metadata;
pub mod place;
pub mod point;
pub mod polygon;
pub mod range;
pub mod session;
pub mod shape;
pub mod square;
pub mod street;
pub mod turns;
pub mod zip;

/// Contains the version of the buildmap library, which is recorded in every database.
pub const BUILDMAP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up a
/// build, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}
