//! xref CLI tool
//!
//! Command-line interface for resolving UIDs against xref maps and packing xref archives.
//!
//! ## Commands
//!
//! - `resolve <uid>...`: Build a federation from the configured maps and print each UID's href
//! - `pack <location> <output>`: Pack a map and everything it redirects to into one archive
//!
//! Relative map locations are looked up in the base folder first, then in each fallback folder.
//! Logging follows `RUST_LOG` and defaults to `info`.

use clap::{Parser, Subcommand};
use noet_xref::{
    archive::pack_to_archive, collection::build_reader, config::XRefConfig,
    downloader::XRefMapDownloader, location::Location, reader::XRefReader, BuildonomyError,
};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "xref")]
#[command(author, version, about = "Resolve UIDs against xref maps and pack xref archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack an xref map, and every map it redirects to, into one archive
    Pack {
        /// Location of the root map (path relative to the base folder, or a URL)
        location: String,

        /// Archive file to write
        output: PathBuf,

        /// Folder relative locations are resolved in (default: current directory)
        #[arg(long)]
        base_folder: Option<PathBuf>,

        /// Extra folders probed, in order, when a relative location is not in the base folder
        #[arg(long = "fallback-folder")]
        fallback_folders: Vec<PathBuf>,
    },

    /// Resolve UIDs and print their hrefs
    Resolve {
        /// UIDs to resolve
        #[arg(required = true)]
        uids: Vec<String>,

        /// TOML configuration file listing xref maps and folders
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Additional xref map location, after those in the configuration file
        #[arg(long = "map")]
        maps: Vec<String>,

        /// Folder relative locations are resolved in (overrides the configuration file)
        #[arg(long)]
        base_folder: Option<PathBuf>,

        /// Extra fallback folder, after those in the configuration file
        #[arg(long = "fallback-folder")]
        fallback_folders: Vec<PathBuf>,

        /// Print each resolved spec as a JSON line instead of its href
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            location,
            output,
            base_folder,
            fallback_folders,
        } => {
            let root = Location::parse(&location)?;
            let downloader = Arc::new(XRefMapDownloader::new(
                base_folder.unwrap_or_else(|| PathBuf::from(".")),
                fallback_folders,
            ));

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                pack_to_archive(&root, &output, downloader, &CancellationToken::new()).await
            })?;

            println!("✓ Archive written: {}", output.display());
            Ok(())
        }

        Commands::Resolve {
            uids,
            config,
            maps,
            base_folder,
            fallback_folders,
            json,
        } => {
            let mut config = match config {
                Some(path) => XRefConfig::load(path)?,
                None => XRefConfig::default(),
            };
            // Command line folders are relative to the working directory, not the config file.
            if let Some(folder) = base_folder {
                config.base_folder = Some(std::path::absolute(folder)?);
            }
            for folder in fallback_folders {
                config.fallback_folders.push(std::path::absolute(folder)?);
            }
            config.xref_maps.extend(maps);
            if config.xref_maps.is_empty() {
                return Err(BuildonomyError::Config(
                    "No xref maps given, use --config or --map".to_string(),
                )
                .into());
            }

            let locations = config.locations()?;
            let downloader = Arc::new(config.downloader()?);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let reader = runtime.block_on(async {
                build_reader(locations, downloader, &CancellationToken::new()).await
            });

            let mut unresolved = 0usize;
            for uid in uids.iter() {
                match reader.find(uid) {
                    Some(spec) if json => println!("{}", serde_json::to_string(&spec)?),
                    Some(spec) => println!("{uid}\t{}", spec.href),
                    None => {
                        unresolved += 1;
                        eprintln!("unresolved: {uid}");
                    }
                }
            }
            if unresolved > 0 {
                eprintln!("{unresolved} of {} UIDs could not be resolved", uids.len());
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
