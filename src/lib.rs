//! # noet-xref
//!
//! Cross-reference (UID) resolution for documentation builds.
//!
//! ## Overview
//!
//! A documentation build references API members and articles by symbolic identifier (a "UID")
//! and needs the canonical URL for each one. The owning reference data often lives elsewhere: in
//! another build's output folder, on a remote documentation server, or packed inside an archive.
//! Reference data also moves, so a map can redirect part of its UID space (or all of it) to other
//! maps.
//!
//! noet-xref loads these **xref maps**, follows their **redirections**, and answers
//! `find(uid)` with an [`model::XRefSpec`]: the href plus display metadata.
//!
//! ### Key Features
//!
//! - **Fast lookup**: binary search over sorted maps, linear fallback for unsorted ones
//! - **Redirection chains**: prefix-scoped, depth-first, cycle-safe traversal across maps
//! - **Federation**: concurrent, bounded fetching of every configured map and everything it
//!   redirects to, where a failed source degrades coverage instead of failing the build
//! - **Transports**: local folders with fallbacks, `file://`, `http(s)://`, `ftp://` and
//!   `embedded://` resources bundled into the binary
//! - **Archives**: zip-packed map collections with lazy, LRU-cached entry loading, and an export
//!   path that packs a map and everything it redirects to into one self-contained archive
//!
//! ## Architecture
//!
//! - **[`model`]**: the serialized map model and [`model::ResolvedXRefMap`], the basic reader
//! - **[`reader`]**: the [`reader::XRefReader`] and [`reader::XRefContainer`] traits and the
//!   redirection-chain traversal shared by archives and federations
//! - **[`archive`]**: archive reading and writing, and [`archive::builder`] for export
//! - **[`downloader`]**: location to container, with admission control
//! - **[`collection`]**: the federation builder
//! - **[`location`]**, **[`config`]**, **[`error`]**: addressing, TOML configuration, errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use noet_xref::{collection::build_reader, config::XRefConfig, reader::XRefReader};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = XRefConfig::load("xref.toml")?;
//!     let downloader = Arc::new(config.downloader()?);
//!     let reader = build_reader(config.locations()?, downloader, &CancellationToken::new()).await;
//!
//!     match reader.find("System.String") {
//!         Some(spec) => println!("{}", spec.href),
//!         None => println!("unresolved"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Packing an archive
//!
//! ```rust,no_run
//! # use noet_xref::{archive::pack_to_archive, downloader::XRefMapDownloader, location::Location};
//! # use std::{path::Path, sync::Arc};
//! # use tokio_util::sync::CancellationToken;
//! # async fn example() -> Result<(), noet_xref::BuildonomyError> {
//! let root = Location::parse("https://docs.example.org/xrefmap.yml")?;
//! let downloader = Arc::new(XRefMapDownloader::default());
//! pack_to_archive(&root, Path::new("refs.zip"), downloader, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: the library
//! - **bin**: the `xref` command line tool (`pack` and `resolve`)

pub mod archive;
pub mod collection;
pub mod config;
pub mod downloader;
pub mod error;
pub mod location;
pub mod model;
pub mod reader;

pub use error::*;
