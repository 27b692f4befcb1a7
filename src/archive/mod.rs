//! Zip-packed xref archives.
//!
//! An archive holds many serialized [XRefMap]s. Exactly one of them, stored under
//! [MAJOR_ENTRY_NAME], is the root of every lookup; the others are minor entries that the major
//! entry (or other minor entries) reach through redirections whose href is the entry name.
//! Entry names are unique ignoring ASCII case.
//!
//! - [XRefArchive] opens an archive for reading and is an [XRefContainer] whose reader walks the
//!   redirections between entries, deserializing entries on demand into a small LRU cache.
//! - [XRefArchiveWriter] appends entries to a new archive.
//! - [builder::XRefArchiveBuilder] packs a map, and every map it redirects to, into one
//!   self-contained archive.
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fs::File,
    io::{BufReader, Read, Seek, Write},
    num::NonZeroUsize,
    path::Path,
    sync::Arc,
};
use uuid::Uuid;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::{
    error::BuildonomyError,
    model::{ResolvedXRefMap, XRefMap, XRefMapRedirection},
    reader::{RedirectionReader, RedirectionSource, XRefContainer, XRefReader},
};

pub mod builder;

pub use builder::{pack_to_archive, XRefArchiveBuilder};

/// Name of the root entry of every archive.
pub const MAJOR_ENTRY_NAME: &str = "xrefmap.yml";

/// Number of deserialized entries an [XRefArchive] keeps in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

static INVALID_ENTRY_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("entry name character class is a valid regex")
});

/// Byte source an archive can be read from.
pub trait ArchiveRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveRead for T {}

/// Entry names are compared by their Unicode lowercase form (`Ä.yml` and `ä.yml` collide).
fn entry_key(name: &str) -> String {
    name.to_lowercase()
}

/// True if `name` can be used, after suffixing, as a minor entry name: a non-empty bare file
/// name without path separators or characters that are illegal in file names.
pub fn is_valid_entry_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !INVALID_ENTRY_CHARS.is_match(trimmed)
}

/// Validate a candidate entry name and force a map file suffix onto it.
pub fn entry_name(candidate: &str) -> Result<String, BuildonomyError> {
    if !is_valid_entry_name(candidate) {
        return Err(BuildonomyError::Archive(format!(
            "Invalid archive entry name '{candidate}'"
        )));
    }
    let trimmed = candidate.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.ends_with(".yml") || lower.ends_with(".yaml") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}.yml"))
    }
}

/// The entries of an open archive, addressed by case-insensitive name.
pub struct ArchiveEntries {
    zip: Mutex<ZipArchive<Box<dyn ArchiveRead>>>,
    entries: Vec<String>,
    names: HashMap<String, String>,
    cache: Mutex<LruCache<String, Arc<ResolvedXRefMap>>>,
}

impl ArchiveEntries {
    fn read_entry(&self, entry: &str) -> Result<XRefMap, BuildonomyError> {
        let mut content = String::new();
        {
            let mut zip = self.zip.lock();
            let mut file = zip.by_name(entry)?;
            file.read_to_string(&mut content)?;
        }
        XRefMap::from_yaml(&content)
    }

    /// Cached, resolved map for the entry, deserializing it on a cache miss.
    fn load(&self, name: &str) -> Result<Option<Arc<ResolvedXRefMap>>, BuildonomyError> {
        let key = entry_key(name);
        let Some(entry) = self.names.get(&key) else {
            return Ok(None);
        };
        if let Some(hit) = self.cache.lock().get(&key) {
            tracing::debug!("[XRefArchive] cache hit for {entry}");
            return Ok(Some(hit.clone()));
        }
        tracing::debug!("[XRefArchive] cache miss for {entry}, deserializing");
        let map = Arc::new(ResolvedXRefMap::new(self.read_entry(entry)?)?);
        self.cache.lock().put(key, map.clone());
        Ok(Some(map))
    }
}

impl RedirectionSource for ArchiveEntries {
    fn normalize_key<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if name.chars().any(char::is_uppercase) {
            Cow::Owned(entry_key(name))
        } else {
            Cow::Borrowed(name)
        }
    }

    fn get_map(&self, name: &str) -> Option<Arc<dyn XRefContainer>> {
        match self.load(name) {
            Ok(map) => map.map(|map| map as Arc<dyn XRefContainer>),
            Err(e) => {
                tracing::warn!("[XRefArchive] skipping unreadable entry '{name}': {e}");
                None
            }
        }
    }
}

/// Reader over an archive, rooted at its major entry.
pub type XRefArchiveReader = RedirectionReader<ArchiveEntries>;

/// An xref archive opened for reading.
///
/// The archive handle is owned by its reader and closed when the archive is dropped.
pub struct XRefArchive {
    reader: XRefArchiveReader,
    redirections: Vec<XRefMapRedirection>,
}

impl XRefArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<XRefArchive, BuildonomyError> {
        tracing::debug!("[XRefArchive] opening {:?}", path.as_ref());
        let file = File::open(path.as_ref())?;
        XRefArchive::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: ArchiveRead + 'static>(reader: R) -> Result<XRefArchive, BuildonomyError> {
        XRefArchive::with_cache_capacity(reader, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity<R: ArchiveRead + 'static>(
        reader: R,
        capacity: usize,
    ) -> Result<XRefArchive, BuildonomyError> {
        let boxed: Box<dyn ArchiveRead> = Box::new(reader);
        let zip = ZipArchive::new(boxed)?;
        let mut entries = Vec::new();
        let mut names = HashMap::new();
        for name in zip.file_names() {
            if name.ends_with('/') {
                continue;
            }
            let key = entry_key(name);
            if names.contains_key(&key) {
                tracing::warn!("[XRefArchive] ignoring entry '{name}', its name is already taken");
                continue;
            }
            names.insert(key, name.to_string());
            entries.push(name.to_string());
        }
        if !names.contains_key(&entry_key(MAJOR_ENTRY_NAME)) {
            return Err(BuildonomyError::Archive(format!(
                "Archive has no major entry '{MAJOR_ENTRY_NAME}'"
            )));
        }
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let source = ArchiveEntries {
            zip: Mutex::new(zip),
            entries,
            names,
            cache: Mutex::new(LruCache::new(capacity)),
        };
        let redirections = source
            .load(MAJOR_ENTRY_NAME)?
            .map(|major| major.map().redirections.clone())
            .unwrap_or_default();
        let keys = source.entries.clone();
        let reader = RedirectionReader::new(MAJOR_ENTRY_NAME, keys, source)?;
        Ok(XRefArchive {
            reader,
            redirections,
        })
    }

    /// Entry names in archive order.
    pub fn entries(&self) -> &[String] {
        &self.reader.source().entries
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.reader.source().names.contains_key(&entry_key(name))
    }

    /// Deserialize an entry directly, bypassing the cache.
    pub fn get(&self, name: &str) -> Result<XRefMap, BuildonomyError> {
        let source = self.reader.source();
        let entry = source
            .names
            .get(&entry_key(name))
            .ok_or_else(|| BuildonomyError::NotFound(format!("Archive entry '{name}'")))?;
        source.read_entry(entry)
    }

    pub fn get_major(&self) -> Result<XRefMap, BuildonomyError> {
        self.get(MAJOR_ENTRY_NAME)
    }

    pub fn archive_reader(&self) -> &XRefArchiveReader {
        &self.reader
    }
}

impl XRefContainer for XRefArchive {
    fn redirections(&self) -> &[XRefMapRedirection] {
        &self.redirections
    }

    fn is_embedded_redirections(&self) -> bool {
        true
    }

    fn reader(&self) -> &dyn XRefReader {
        &self.reader
    }
}

struct WriterState<W: Write + Seek> {
    zip: ZipWriter<W>,
    entries: Vec<String>,
    written: HashSet<String>,
    reserved: HashSet<String>,
}

impl<W: Write + Seek> WriterState<W> {
    fn is_available(&self, name: &str) -> bool {
        let key = entry_key(name);
        key != entry_key(MAJOR_ENTRY_NAME)
            && !self.written.contains(&key)
            && !self.reserved.contains(&key)
    }

    fn reserve(&mut self, candidates: Vec<String>) -> Result<String, BuildonomyError> {
        for candidate in candidates {
            let name = entry_name(&candidate)?;
            if self.is_available(&name) {
                self.reserved.insert(entry_key(&name));
                return Ok(name);
            }
            tracing::debug!("[XRefArchiveWriter] entry name '{name}' is taken");
        }
        loop {
            let name = format!("{}.yml", Uuid::new_v4().simple());
            if self.is_available(&name) {
                self.reserved.insert(entry_key(&name));
                return Ok(name);
            }
        }
    }

    fn write(&mut self, name: &str, map: &XRefMap) -> Result<(), BuildonomyError> {
        let content = map.to_yaml()?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip.start_file(name, options)?;
        self.zip.write_all(content.as_bytes())?;
        let key = entry_key(name);
        self.reserved.remove(&key);
        self.written.insert(key);
        self.entries.push(name.to_string());
        tracing::debug!("[XRefArchiveWriter] wrote entry {name}");
        Ok(())
    }
}

/// Append-only writer for a new archive. Entry creation is synchronous and serialized through
/// an internal lock, so one writer can be shared by concurrent producers.
pub struct XRefArchiveWriter<W: Write + Seek> {
    state: Mutex<WriterState<W>>,
}

impl XRefArchiveWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, BuildonomyError> {
        tracing::debug!("[XRefArchiveWriter] creating {:?}", path.as_ref());
        Ok(XRefArchiveWriter::new(File::create(path.as_ref())?))
    }
}

impl<W: Write + Seek> XRefArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        XRefArchiveWriter {
            state: Mutex::new(WriterState {
                zip: ZipWriter::new(sink),
                entries: Vec::new(),
                written: HashSet::new(),
                reserved: HashSet::new(),
            }),
        }
    }

    /// Write `map` as the major entry. Fails if the major entry already exists.
    pub fn create_major(&self, map: &XRefMap) -> Result<String, BuildonomyError> {
        let mut state = self.state.lock();
        if state.written.contains(&entry_key(MAJOR_ENTRY_NAME)) {
            return Err(BuildonomyError::Archive(format!(
                "Major entry '{MAJOR_ENTRY_NAME}' already exists"
            )));
        }
        state.write(MAJOR_ENTRY_NAME, map)?;
        Ok(MAJOR_ENTRY_NAME.to_string())
    }

    /// Write `map` as a minor entry under the first available candidate name, or under a
    /// generated unique name if every candidate is taken. Returns the entry name.
    ///
    /// Candidates get a `.yml` suffix unless they already end in `.yml` or `.yaml`; a candidate
    /// that is not a valid file name is an error.
    pub fn create_minor<I, S>(&self, map: &XRefMap, candidates: I) -> Result<String, BuildonomyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let candidates = candidates
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect::<Vec<_>>();
        let mut state = self.state.lock();
        let name = state.reserve(candidates)?;
        state.write(&name, map)?;
        Ok(name)
    }

    /// Pick and hold a minor entry name, using the same rules as [Self::create_minor], without
    /// writing anything yet. Lets a caller know every entry name before it writes entries that
    /// redirect to each other.
    pub fn reserve_minor<I, S>(&self, candidates: I) -> Result<String, BuildonomyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let candidates = candidates
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect::<Vec<_>>();
        self.state.lock().reserve(candidates)
    }

    /// Write `map` under a name previously returned by [Self::reserve_minor].
    pub fn write_reserved(&self, name: &str, map: &XRefMap) -> Result<(), BuildonomyError> {
        let mut state = self.state.lock();
        if !state.reserved.contains(&entry_key(name)) {
            return Err(BuildonomyError::Archive(format!(
                "Entry name '{name}' was not reserved or was already written"
            )));
        }
        state.write(name, map)
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.state.lock().written.contains(&entry_key(name))
    }

    /// Names of the entries written so far, in write order.
    pub fn entries(&self) -> Vec<String> {
        self.state.lock().entries.clone()
    }

    /// Write the archive directory and hand back the sink. Every reserved name must have been
    /// written, and the major entry must exist.
    pub fn finish(self) -> Result<W, BuildonomyError> {
        let state = self.state.into_inner();
        if !state.reserved.is_empty() {
            return Err(BuildonomyError::Archive(format!(
                "{} reserved entries were never written",
                state.reserved.len()
            )));
        }
        if !state.written.contains(&entry_key(MAJOR_ENTRY_NAME)) {
            return Err(BuildonomyError::Archive(format!(
                "Archive is missing its major entry '{MAJOR_ENTRY_NAME}'"
            )));
        }
        Ok(state.zip.finish()?)
    }
}

#[cfg(test)]
mod tests;
