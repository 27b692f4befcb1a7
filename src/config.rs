//! TOML configuration for xref resolution.
//!
//! ```toml
//! xref_maps = ["https://docs.example.org/xrefmap.yml", "api/xrefmap.yml"]
//! base_folder = "_site"
//! fallback_folders = ["../shared/_site"]
//! max_parallelism = 8
//! http_timeout_secs = 30
//! ```
//!
//! Relative folders are interpreted relative to the directory holding the config file. Without a
//! `base_folder`, that directory is the base folder.
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    downloader::{XRefMapDownloader, DEFAULT_MAX_PARALLELISM},
    error::BuildonomyError,
    location::Location,
};

fn default_max_parallelism() -> usize {
    DEFAULT_MAX_PARALLELISM
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XRefConfig {
    #[serde(default)]
    pub xref_maps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_folder: Option<PathBuf>,
    #[serde(default)]
    pub fallback_folders: Vec<PathBuf>,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_timeout_secs: Option<u64>,
    /// Directory relative folders are resolved against.
    #[serde(skip)]
    root: PathBuf,
}

impl Default for XRefConfig {
    fn default() -> Self {
        XRefConfig {
            xref_maps: Vec::new(),
            base_folder: None,
            fallback_folders: Vec::new(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            http_timeout_secs: None,
            root: PathBuf::from("."),
        }
    }
}

impl XRefConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<XRefConfig, BuildonomyError> {
        let path = path.as_ref();
        tracing::debug!("[XRefConfig] reading {:?}", path);
        if !path.exists() {
            return Err(BuildonomyError::NotFound(format!(
                "xref config file {path:?} does not exist"
            )));
        }
        let content = read_to_string(path)?;
        let mut config: XRefConfig = toml::from_str(&content)?;
        config.root = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tracing::debug!(
            "[XRefConfig] {} xref maps configured, relative folders resolve in {:?}",
            config.xref_maps.len(),
            config.root
        );
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BuildonomyError> {
        tracing::debug!("[XRefConfig] writing {:?}", path.as_ref());
        write(path, toml::to_string(self)?)?;
        Ok(())
    }

    /// Directory relative folders are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn rooted(&self, folder: &Path) -> PathBuf {
        if folder.is_absolute() {
            folder.to_path_buf()
        } else {
            self.root.join(folder)
        }
    }

    pub fn base_folder(&self) -> PathBuf {
        match self.base_folder.as_deref() {
            Some(folder) => self.rooted(folder),
            None => self.root.clone(),
        }
    }

    pub fn fallback_folders(&self) -> Vec<PathBuf> {
        self.fallback_folders
            .iter()
            .map(|folder| self.rooted(folder))
            .collect()
    }

    /// Parse every configured location, in order. Any invalid location fails the whole call.
    pub fn locations(&self) -> Result<Vec<Location>, BuildonomyError> {
        self.xref_maps
            .iter()
            .map(|location| Location::parse(location))
            .collect()
    }

    pub fn downloader(&self) -> Result<XRefMapDownloader, BuildonomyError> {
        let downloader = XRefMapDownloader::new(self.base_folder(), self.fallback_folders())
            .with_max_parallelism(self.max_parallelism);
        match self.http_timeout_secs {
            Some(secs) => downloader.with_timeout(Duration::from_secs(secs)),
            None => Ok(downloader),
        }
    }
}
