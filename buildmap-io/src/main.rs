use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use buildmap::builder::Builder;
use buildmap::config::{Config, DEFAULT_CONFIG_FILE};
use buildmap::fmt::{format_duration, format_size};
use buildmap::ingest::ingest_file;
use clap::Parser;
use log::LevelFilter;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Compiles geographic source records into RoadMap map databases.
///
/// Each source file yields one database named after the file, which is written into the
/// configured output directory.
#[derive(Parser, Debug)]
#[command(name = "buildmap-io")]
#[command(version)]
struct Args {
    /// The source files to compile
    #[arg(value_name = "SOURCES", required = true)]
    sources: Vec<PathBuf>,

    /// The YAML config file providing the build settings
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Location for the generated map files (overrides output.directory)
    #[arg(short, long, value_name = "DIRECTORY")]
    maps: Option<PathBuf>,

    /// Suppress the long line lists (lines leaving their square)
    #[arg(short, long)]
    nolonglines: bool,

    /// Show more progress information
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    buildmap::init_logging();
    log::set_max_level(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    if let Err(error) = run(&args) {
        log::error!("{:#}", error);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut config = Config::new(&args.config);
    config.load()?;

    let directory = args.maps.clone().unwrap_or_else(|| {
        PathBuf::from(config.query("output.directory").as_str().unwrap_or("."))
    });
    let name = config
        .query("output.name")
        .as_str()
        .filter(|_| args.sources.len() == 1);
    std::fs::create_dir_all(&directory)
        .with_context(|| format!("Cannot create output directory {}", directory.display()))?;

    let mut builder = Builder::from_config(&config)?.enable_logging();
    if args.nolonglines {
        builder = builder.disable_long_lines();
    }
    let mut session = builder.build()?;

    for source in args.sources.iter() {
        let watch = Instant::now();
        let records = ingest_file(&mut session, source)?;
        log::info!("Read {} records from {}...", records, source.display());

        let target = directory.join(format!("{}.rdm", name.unwrap_or(&stem(source))));
        let size = session
            .build(&target)
            .with_context(|| format!("Cannot build {}", target.display()))?;
        session.summary();
        log::info!(
            "Built {} ({}) in {}.",
            target.display(),
            format_size(size),
            format_duration(watch.elapsed())
        );

        session.reset()?;
    }

    Ok(())
}

fn stem(source: &Path) -> String {
    source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "map".to_owned())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use clap::Parser;

    use crate::{stem, Args};
    use buildmap::config::DEFAULT_CONFIG_FILE;

    #[test]
    fn defaults_are_applied() {
        let args = Args::parse_from(["buildmap-io", "tgr06075.csv"]);
        assert_eq!(args.sources, vec![PathBuf::from("tgr06075.csv")]);
        assert_eq!(args.config, DEFAULT_CONFIG_FILE);
        assert_eq!(args.maps, None);
        assert_eq!(args.nolonglines, false);
        assert_eq!(args.verbose, false);
    }

    #[test]
    fn options_are_not_mistaken_for_sources() {
        let args = Args::parse_from([
            "buildmap-io",
            "--maps",
            "out",
            "--nolonglines",
            "-v",
            "--config",
            "test.yml",
            "a.csv",
            "b.csv",
        ]);
        assert_eq!(args.maps, Some(PathBuf::from("out")));
        assert_eq!(args.nolonglines, true);
        assert_eq!(args.verbose, true);
        assert_eq!(args.config, "test.yml");
        assert_eq!(args.sources.len(), 2);
    }

    #[test]
    fn sources_are_required() {
        assert_eq!(Args::try_parse_from(["buildmap-io", "--verbose"]).is_err(), true);
    }

    #[test]
    fn databases_are_named_after_their_source() {
        assert_eq!(stem(Path::new("/data/tgr06075.csv")), "tgr06075");
        assert_eq!(stem(Path::new("/")), "map");
    }
}
