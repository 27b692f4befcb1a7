//! [XRefMapDownloader] turns a [Location] into an [XRefContainer].
//!
//! ## Transports
//!
//! | Location | Source |
//! |---|---|
//! | relative path | first of the base folder and the fallback folders in which the path exists |
//! | `file://` | the local file |
//! | `http://`, `https://` | a fetch through the downloader's own HTTP client |
//! | `ftp://` | a binary `RETR`, logged in as the URL's user or `anonymous` |
//! | `embedded://{module}/{path}` | a file of an [include_dir::Dir] registered with [EmbeddedModules] |
//!
//! Local and embedded locations ending in `.zip` are opened as an [XRefArchive]; everything else
//! is parsed as a single YAML xref map. Maps fetched over the network have their relative hrefs
//! resolved against the directory of the URL they came from.
//!
//! At most `max_parallelism` downloads run at once (default [DEFAULT_MAX_PARALLELISM]); excess
//! calls wait for a permit. The downloader does not de-duplicate, every call fetches.
use include_dir::Dir;
use std::{
    collections::HashMap,
    fmt,
    io::Cursor,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use suppaftp::{types::FileType, FtpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    archive::XRefArchive,
    error::BuildonomyError,
    location::{implicit_base_url, Location, EMBEDDED_SCHEME},
    model::{ResolvedXRefMap, XRefMap},
    reader::XRefContainer,
};

pub const DEFAULT_MAX_PARALLELISM: usize = 16;

/// Registry of bundled resource directories addressable as `embedded://{module}/...`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedModules {
    modules: HashMap<String, &'static Dir<'static>>,
}

impl EmbeddedModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<N: Into<String>>(&mut self, name: N, dir: &'static Dir<'static>) {
        self.modules.insert(name.into(), dir);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Contents of the resource an `embedded://` URL points at.
    pub fn get(&self, url: &Url) -> Result<&'static [u8], BuildonomyError> {
        let module = url.host_str().unwrap_or_default();
        let dir = self.modules.get(module).ok_or_else(|| {
            BuildonomyError::NotFound(format!("No embedded module named '{module}' for {url}"))
        })?;
        let resource = url.path().trim_start_matches('/');
        dir.get_file(resource)
            .map(|file| file.contents())
            .ok_or_else(|| {
                BuildonomyError::NotFound(format!(
                    "Embedded module '{module}' has no resource '{resource}'"
                ))
            })
    }
}

pub struct XRefMapDownloader {
    base_folder: PathBuf,
    fallback_folders: Vec<PathBuf>,
    max_parallelism: usize,
    semaphore: Semaphore,
    client: reqwest::Client,
    timeout: Option<Duration>,
    embedded: EmbeddedModules,
}

impl XRefMapDownloader {
    /// `base_folder` is the primary folder relative locations are resolved in (usually the build
    /// output folder); `fallback_folders` are probed after it, in order.
    pub fn new<P: Into<PathBuf>>(base_folder: P, fallback_folders: Vec<PathBuf>) -> Self {
        XRefMapDownloader {
            base_folder: base_folder.into(),
            fallback_folders,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            semaphore: Semaphore::new(DEFAULT_MAX_PARALLELISM),
            client: reqwest::Client::new(),
            timeout: None,
            embedded: EmbeddedModules::default(),
        }
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        let max_parallelism = max_parallelism.max(1);
        self.max_parallelism = max_parallelism;
        self.semaphore = Semaphore::new(max_parallelism);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Build the owned HTTP client with a per request timeout. FTP connections use the same
    /// timeout for connecting.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, BuildonomyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        self.timeout = Some(timeout);
        Ok(self.with_client(client))
    }

    pub fn with_embedded(mut self, embedded: EmbeddedModules) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn embed<N: Into<String>>(mut self, name: N, dir: &'static Dir<'static>) -> Self {
        self.embedded.register(name, dir);
        self
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Number of downloads that could start right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// [Self::download], abandoned with [BuildonomyError::OperationCancelled] when `cancel`
    /// fires first.
    pub async fn download_cancellable(
        &self,
        location: &Location,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn XRefContainer>, BuildonomyError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BuildonomyError::OperationCancelled),
            result = self.download(location) => result,
        }
    }

    #[tracing::instrument(skip(self, location), fields(location = %location))]
    pub async fn download(
        &self,
        location: &Location,
    ) -> Result<Arc<dyn XRefContainer>, BuildonomyError> {
        let _permit = self.semaphore.acquire().await?;
        match location {
            Location::Relative(path) => {
                let file = self.find_local(path)?;
                self.load_file(file, location.is_archive()).await
            }
            Location::Absolute(url) => match url.scheme() {
                "file" => {
                    let file = url.to_file_path().map_err(|_| {
                        BuildonomyError::Config(format!("{url} is not a valid local file path"))
                    })?;
                    self.load_file(file, location.is_archive()).await
                }
                "http" | "https" => {
                    let content = self.fetch_http(url).await?;
                    remote_map(&content, url)
                }
                "ftp" => {
                    let content = self.fetch_ftp(url).await?;
                    remote_map(&content, url)
                }
                EMBEDDED_SCHEME => self.load_embedded(url, location.is_archive()),
                other => Err(BuildonomyError::Config(format!(
                    "Unsupported xref map scheme '{other}' in {url}"
                ))),
            },
        }
    }

    /// First existing `{folder}/{path}`, probing the base folder, then each fallback folder.
    pub fn find_local(&self, path: &str) -> Result<PathBuf, BuildonomyError> {
        std::iter::once(&self.base_folder)
            .chain(self.fallback_folders.iter())
            .map(|folder| folder.join(path))
            .find(|candidate| candidate.exists())
            .ok_or_else(|| {
                BuildonomyError::NotFound(format!(
                    "xref map '{path}' not found in {:?} or fallback folders {:?}",
                    self.base_folder, self.fallback_folders
                ))
            })
    }

    async fn load_file(
        &self,
        path: PathBuf,
        is_archive: bool,
    ) -> Result<Arc<dyn XRefContainer>, BuildonomyError> {
        tracing::debug!("[XRefMapDownloader] reading {:?}", path);
        if is_archive {
            let archive = tokio::task::spawn_blocking(move || XRefArchive::open(&path)).await??;
            return Ok(Arc::new(archive));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let map = XRefMap::from_yaml(&content).map_err(|e| with_source(e, &path.display()))?;
        Ok(Arc::new(ResolvedXRefMap::new(map)?))
    }

    async fn fetch_http(&self, url: &Url) -> Result<String, BuildonomyError> {
        tracing::debug!("[XRefMapDownloader] fetching {url}");
        Ok(self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    async fn fetch_ftp(&self, url: &Url) -> Result<String, BuildonomyError> {
        tracing::debug!("[XRefMapDownloader] retrieving {url}");
        let source = url.clone();
        let timeout = self.timeout;
        let bytes = tokio::task::spawn_blocking(move || retrieve_ftp(&source, timeout)).await??;
        String::from_utf8(bytes).map_err(|e| {
            BuildonomyError::Serialization(format!("{url} is not valid UTF-8: {e}"))
        })
    }

    fn load_embedded(
        &self,
        url: &Url,
        is_archive: bool,
    ) -> Result<Arc<dyn XRefContainer>, BuildonomyError> {
        let bytes = self.embedded.get(url)?;
        if is_archive {
            return Ok(Arc::new(XRefArchive::from_reader(Cursor::new(bytes))?));
        }
        let content = std::str::from_utf8(bytes).map_err(|e| {
            BuildonomyError::Serialization(format!("{url} is not valid UTF-8: {e}"))
        })?;
        Ok(Arc::new(ResolvedXRefMap::new(XRefMap::from_yaml(content)?)?))
    }
}

impl Default for XRefMapDownloader {
    fn default() -> Self {
        XRefMapDownloader::new(".", Vec::new())
    }
}

/// Parse a map fetched from `url`, resolving its relative hrefs against the URL's directory.
fn remote_map(content: &str, url: &Url) -> Result<Arc<dyn XRefContainer>, BuildonomyError> {
    let mut map = XRefMap::from_yaml(content).map_err(|e| with_source(e, url))?;
    map.update_href(&implicit_base_url(url)?)?;
    Ok(Arc::new(ResolvedXRefMap::new(map)?))
}

/// Blocking binary download of the file an `ftp://` URL names, in passive mode.
fn retrieve_ftp(url: &Url, timeout: Option<Duration>) -> Result<Vec<u8>, BuildonomyError> {
    let addrs = url.socket_addrs(|| Some(21))?;
    let mut ftp = match (timeout, addrs.first()) {
        (Some(timeout), Some(addr)) => FtpStream::connect_timeout(*addr, timeout)?,
        _ => FtpStream::connect(&addrs[..])?,
    };
    let user = match url.username() {
        "" => "anonymous",
        user => user,
    };
    ftp.login(user, url.password().unwrap_or("anonymous"))?;
    ftp.transfer_type(FileType::Binary)?;
    let buffer = ftp.retr_as_buffer(url.path())?;
    if let Err(e) = ftp.quit() {
        tracing::debug!("[XRefMapDownloader] {url}: FTP quit failed: {e}");
    }
    Ok(buffer.into_inner())
}

fn with_source(error: BuildonomyError, source: &dyn fmt::Display) -> BuildonomyError {
    match error {
        BuildonomyError::Serialization(msg) => {
            BuildonomyError::Serialization(format!("{source}: {msg}"))
        }
        other => other,
    }
}
